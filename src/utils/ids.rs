macro_rules! id_gen {
    ($mod_name:ident) => {
        mod $mod_name {
            use once_cell::sync::Lazy;
            use std::{collections::HashSet, sync::Mutex};

            static ID_DATA: Lazy<Mutex<(HashSet<usize>, usize)>> =
                Lazy::new(|| Mutex::new((HashSet::new(), 0)));

            pub(crate) fn next() -> usize {
                let mut guard = ID_DATA.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
                let (id_set, counter) = &mut *guard;

                while !id_set.insert(*counter) {
                    *counter = counter.wrapping_add(1);
                }

                let new_id = *counter;
                *counter = counter.wrapping_add(1);

                new_id
            }

            pub(crate) fn remove(id: usize) -> bool {
                ID_DATA
                    .lock()
                    .unwrap_or_else(|poisoned| poisoned.into_inner())
                    .0
                    .remove(&id)
            }
        }
    };
}

pub(crate) use id_gen;

#[cfg(test)]
mod tests {
    id_gen!(test_ids);

    #[test]
    fn ids_are_reused_only_after_removal() {
        let first = test_ids::next();
        let second = test_ids::next();
        assert_ne!(first, second);
        assert!(test_ids::remove(first));
        assert!(!test_ids::remove(first));
        assert!(test_ids::remove(second));
    }
}
