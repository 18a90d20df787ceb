use std::{cell::Cell, rc::Rc};

use crate::utils::IsAlive;

use super::WaylandSurface;

#[derive(Debug, Clone)]
pub(crate) struct TestSurface {
    id: u32,
    alive: Rc<Cell<bool>>,
}

impl TestSurface {
    pub(crate) fn new(id: u32) -> Self {
        TestSurface {
            id,
            alive: Rc::new(Cell::new(true)),
        }
    }

    pub(crate) fn kill(&self) {
        self.alive.set(false);
    }
}

impl PartialEq for TestSurface {
    fn eq(&self, other: &Self) -> bool {
        Rc::ptr_eq(&self.alive, &other.alive)
    }
}

impl IsAlive for TestSurface {
    fn alive(&self) -> bool {
        self.alive.get()
    }
}

impl WaylandSurface for TestSurface {
    fn protocol_id(&self) -> u32 {
        self.id
    }
}

/// Route `tracing` output of a test through the test harness, filtered by `RUST_LOG`
pub(crate) fn init_logging() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}
