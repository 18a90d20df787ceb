//! Registry of X11 windows and their association with wayland surfaces.
//!
//! Xwayland creates a `wl_surface` for every mapped window and tells the window manager which one
//! belongs to which window, either by sending the surface's protocol id (`WL_SURFACE_ID`) or by
//! sending a serial (`WL_SURFACE_SERIAL`) that is later matched against an
//! `xwayland_surface_v1` object. Both sides arrive over different sockets and can be observed in
//! any order, so whichever side comes second performs the match.

use std::collections::{HashMap, HashSet};

use tracing::{debug, warn};
use x11rb::protocol::xproto::Window as X11Window;

use super::{
    properties::SizeHints,
    surface::{SurfaceListeners, WaylandSurface, X11Surface},
};
use crate::utils::Size;

/// Reasons an association attempt is refused
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum AssociationError {
    /// The window is not known
    #[error("Unknown X11 window")]
    UnknownWindow,
    /// The window is already associated with a surface
    #[error("X11 window is already associated with a wayland surface")]
    AlreadyAssociated,
    /// The surface already belongs to another window
    #[error("The wayland surface is already associated with another X11 window")]
    SurfaceClaimed,
    /// The surface is already destroyed
    #[error("The wayland surface is dead")]
    DeadSurface,
}

/// Reasons a transient-for edge is refused
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum TransientError {
    /// Either end of the edge is not a known window
    #[error("Unknown X11 window")]
    UnknownWindow,
    /// Accepting the edge would create a cycle
    #[error("Transient-for relation would form a cycle")]
    Cycle,
}

/// Outcome of one side of the association handshake
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Association {
    /// The window got associated
    Associated(X11Window),
    /// Waiting for the other side
    Pending,
    /// The attempt was refused
    Rejected(AssociationError),
}

/// Change of the wayland-side mapped state caused by a commit
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MapChange {
    /// The surface got its first buffer
    Mapped,
    /// The buffer was removed
    Unmapped,
}

/// A commit routed to a window through its attached listeners
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Commit {
    /// Window the committed surface belongs to
    pub window: X11Window,
    /// Resulting change of the mapped state, if any
    pub map_change: Option<MapChange>,
}

/// Result of removing the wayland surface from a window
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Dissociation {
    /// The window was mapped and got unmapped in the process
    pub unmapped: bool,
    /// A surface reference was actually cleared
    pub cleared: bool,
}

/// Parent/child relations of transient windows
#[derive(Debug, Default)]
pub struct TransientTree {
    parents: HashMap<X11Window, X11Window>,
    children: HashMap<X11Window, Vec<X11Window>>,
}

impl TransientTree {
    /// Parent of `window`
    pub fn parent(&self, window: X11Window) -> Option<X11Window> {
        self.parents.get(&window).copied()
    }

    /// Direct children of `window`
    pub fn children(&self, window: X11Window) -> &[X11Window] {
        self.children.get(&window).map(Vec::as_slice).unwrap_or_default()
    }

    /// Walk upwards from `start`, returns whether `target` is reached.
    ///
    /// The walk is bounded by the set of visited windows, so a corrupted chain cannot loop.
    fn reaches(&self, start: X11Window, target: X11Window) -> bool {
        let mut visited = HashSet::new();
        let mut current = Some(start);
        while let Some(window) = current {
            if window == target {
                return true;
            }
            if !visited.insert(window) {
                return false;
            }
            current = self.parent(window);
        }
        false
    }

    fn unlink(&mut self, child: X11Window) {
        if let Some(parent) = self.parents.remove(&child) {
            if let Some(siblings) = self.children.get_mut(&parent) {
                siblings.retain(|w| *w != child);
                if siblings.is_empty() {
                    self.children.remove(&parent);
                }
            }
        }
    }

    fn set_parent(&mut self, child: X11Window, parent: Option<X11Window>) -> Result<(), TransientError> {
        if let Some(parent) = parent {
            if self.reaches(parent, child) {
                return Err(TransientError::Cycle);
            }
        }
        self.unlink(child);
        if let Some(parent) = parent {
            self.parents.insert(child, parent);
            self.children.entry(parent).or_default().push(child);
        }
        Ok(())
    }

    /// Drop `window` from the tree, orphaning its children
    fn remove(&mut self, window: X11Window) -> Vec<X11Window> {
        self.unlink(window);
        let orphans = self.children.remove(&window).unwrap_or_default();
        for orphan in &orphans {
            self.parents.remove(orphan);
        }
        orphans
    }
}

/// All windows known to one window manager
#[derive(Debug)]
pub struct SurfaceRegistry<S> {
    surfaces: Vec<X11Surface<S>>,
    // protocol id -> window, for WL_SURFACE_ID messages that arrived before the surface existed
    unpaired_ids: HashMap<u32, X11Window>,
    // shell objects that arrived before the window announced its serial
    unpaired_shells: HashMap<u64, S>,
    tree: TransientTree,
}

impl<S> Default for SurfaceRegistry<S> {
    fn default() -> Self {
        SurfaceRegistry {
            surfaces: Vec::new(),
            unpaired_ids: HashMap::new(),
            unpaired_shells: HashMap::new(),
            tree: TransientTree::default(),
        }
    }
}

impl<S: WaylandSurface> SurfaceRegistry<S> {
    /// Add a new record. Returns `false` if the window is already known.
    pub fn insert(&mut self, surface: X11Surface<S>) -> bool {
        if self.get(surface.window).is_some() {
            return false;
        }
        self.surfaces.push(surface);
        true
    }

    /// Remove a window, dropping every edge and pending association it took part in
    pub fn remove(&mut self, window: X11Window) -> Option<X11Surface<S>> {
        let pos = self.surfaces.iter().position(|s| s.window == window)?;
        let mut surface = self.surfaces.remove(pos);
        self.unpaired_ids.retain(|_, w| *w != window);
        let orphans = self.tree.remove(window);
        if !orphans.is_empty() {
            debug!(window, ?orphans, "Transient parent destroyed");
        }
        surface.wl_surface = None;
        Self::sync_listeners(&mut surface);
        Some(surface)
    }

    /// Remove every window, returning the records in creation order
    pub fn clear(&mut self) -> Vec<X11Surface<S>> {
        self.unpaired_ids.clear();
        self.unpaired_shells.clear();
        self.tree = TransientTree::default();
        let mut surfaces = std::mem::take(&mut self.surfaces);
        for surface in &mut surfaces {
            surface.wl_surface = None;
            Self::sync_listeners(surface);
        }
        surfaces
    }

    /// Record of `window`
    pub fn get(&self, window: X11Window) -> Option<&X11Surface<S>> {
        self.surfaces.iter().find(|s| s.window == window)
    }

    /// Mutable record of `window`
    pub fn get_mut(&mut self, window: X11Window) -> Option<&mut X11Surface<S>> {
        self.surfaces.iter_mut().find(|s| s.window == window)
    }

    /// All records, in creation order
    pub fn iter(&self) -> impl Iterator<Item = &X11Surface<S>> {
        self.surfaces.iter()
    }

    /// All records, mutably
    pub fn iter_mut(&mut self) -> impl Iterator<Item = &mut X11Surface<S>> {
        self.surfaces.iter_mut()
    }

    /// Ids of all known windows, in creation order
    pub fn windows(&self) -> Vec<X11Window> {
        self.surfaces.iter().map(|s| s.window).collect()
    }

    /// Number of known windows
    pub fn len(&self) -> usize {
        self.surfaces.len()
    }

    /// Whether no window is known
    pub fn is_empty(&self) -> bool {
        self.surfaces.is_empty()
    }

    /// Window currently associated with `surface`
    pub fn window_for_surface(&self, surface: &S) -> Option<X11Window> {
        self.surfaces
            .iter()
            .find(|s| s.wl_surface.as_ref() == Some(surface))
            .map(|s| s.window)
    }

    /// Number of windows with listeners attached
    pub fn attached_listeners(&self) -> usize {
        self.surfaces.iter().filter(|s| s.listeners.is_some()).count()
    }

    /// Bind `surface` to `window`.
    ///
    /// Both association paths end up here.
    pub fn associate(&mut self, window: X11Window, surface: S) -> Result<(), AssociationError> {
        if !surface.alive() {
            return Err(AssociationError::DeadSurface);
        }
        if self
            .surfaces
            .iter()
            .any(|s| s.window != window && s.wl_surface.as_ref() == Some(&surface))
        {
            warn!(window, ?surface, "Surface is already associated with another window");
            return Err(AssociationError::SurfaceClaimed);
        }
        let record = self.get_mut(window).ok_or(AssociationError::UnknownWindow)?;
        if record.wl_surface.is_some() {
            warn!(window, ?surface, "Window is already associated");
            return Err(AssociationError::AlreadyAssociated);
        }

        debug!(window, ?surface, "Associated X11 window with wayland surface");
        record.wl_surface = Some(surface);
        Self::sync_listeners(record);
        Ok(())
    }

    /// Clear the surface of `window`, unmapping it first if necessary
    pub fn dissociate(&mut self, window: X11Window) -> Dissociation {
        let Some(record) = self.get_mut(window) else {
            return Dissociation::default();
        };
        let unmapped = std::mem::replace(&mut record.mapped, false);
        record.has_buffer = false;
        let cleared = record.wl_surface.take().is_some();
        record.wl_surface_serial = None;
        Self::sync_listeners(record);
        Dissociation { unmapped, cleared }
    }

    /// Re-derive listener attachment from the association state
    fn sync_listeners(record: &mut X11Surface<S>) {
        match (&record.wl_surface, &record.listeners) {
            (Some(surface), None) => {
                record.listeners = Some(SurfaceListeners {
                    surface: surface.clone(),
                });
            }
            (Some(surface), Some(listeners)) if listeners.surface != *surface => {
                record.listeners = Some(SurfaceListeners {
                    surface: surface.clone(),
                });
            }
            (None, Some(_)) => record.listeners = None,
            _ => {}
        }
    }

    /// `WL_SURFACE_ID` message: `resolved` is the surface found in the client's object table
    pub fn surface_id_message(&mut self, window: X11Window, protocol_id: u32, resolved: Option<S>) -> Association {
        if self.get(window).is_none() {
            return Association::Rejected(AssociationError::UnknownWindow);
        }
        match resolved {
            Some(surface) => match self.associate(window, surface) {
                Ok(()) => Association::Associated(window),
                Err(err) => Association::Rejected(err),
            },
            None => {
                self.unpaired_ids.insert(protocol_id, window);
                Association::Pending
            }
        }
    }

    /// A new wayland surface appeared in the Xwayland client
    pub fn surface_created(&mut self, surface: S) -> Association {
        let Some(window) = self.unpaired_ids.remove(&surface.protocol_id()) else {
            return Association::Pending;
        };
        match self.associate(window, surface) {
            Ok(()) => Association::Associated(window),
            Err(err) => Association::Rejected(err),
        }
    }

    /// `WL_SURFACE_SERIAL` message
    pub fn surface_serial_message(&mut self, window: X11Window, serial: u64) -> Association {
        let Some(record) = self.get_mut(window) else {
            return Association::Rejected(AssociationError::UnknownWindow);
        };
        record.wl_surface_serial = Some(serial);
        match self.unpaired_shells.remove(&serial) {
            Some(surface) => match self.associate(window, surface) {
                Ok(()) => Association::Associated(window),
                Err(err) => Association::Rejected(err),
            },
            None => Association::Pending,
        }
    }

    /// An `xwayland_surface_v1` object announced `serial` for `surface`
    pub fn shell_serial(&mut self, serial: u64, surface: S) -> Association {
        let window = self
            .surfaces
            .iter()
            .find(|s| s.wl_surface_serial == Some(serial) && s.wl_surface.is_none())
            .map(|s| s.window);
        match window {
            Some(window) => match self.associate(window, surface) {
                Ok(()) => Association::Associated(window),
                Err(err) => Association::Rejected(err),
            },
            None => {
                self.unpaired_shells.retain(|_, s| s.alive());
                self.unpaired_shells.insert(serial, surface);
                Association::Pending
            }
        }
    }

    /// Route a commit of `surface` through the attached listeners.
    ///
    /// Returns `None` if no window listens on this surface.
    pub fn commit(&mut self, surface: &S, has_buffer: bool) -> Option<Commit> {
        let record = self
            .surfaces
            .iter_mut()
            .find(|s| s.listeners.as_ref().is_some_and(|l| l.surface == *surface))?;
        record.has_buffer = has_buffer;
        let map_change = match (has_buffer, record.mapped) {
            (true, false) => {
                record.mapped = true;
                Some(MapChange::Mapped)
            }
            (false, true) => {
                record.mapped = false;
                Some(MapChange::Unmapped)
            }
            _ => None,
        };
        Some(Commit {
            window: record.window,
            map_change,
        })
    }

    /// Route the destruction of `surface` through the attached listeners
    pub fn surface_destroyed(&mut self, surface: &S) -> Option<(X11Window, Dissociation)> {
        self.unpaired_shells.retain(|_, s| s != surface);
        let window = self
            .surfaces
            .iter()
            .find(|s| s.listeners.as_ref().is_some_and(|l| l.surface == *surface))
            .map(|s| s.window)?;
        Some((window, self.dissociate(window)))
    }

    /// Set or clear the transient parent of `child`
    pub fn set_transient_for(&mut self, child: X11Window, parent: Option<X11Window>) -> Result<(), TransientError> {
        if self.get(child).is_none() {
            return Err(TransientError::UnknownWindow);
        }
        if let Some(parent) = parent {
            if self.get(parent).is_none() {
                return Err(TransientError::UnknownWindow);
            }
        }
        self.tree.set_parent(child, parent)
    }

    /// Accepted transient parent of `window`
    pub fn transient_for(&self, window: X11Window) -> Option<X11Window> {
        self.tree.parent(window)
    }

    /// Windows transient for `window`
    pub fn transient_children(&self, window: X11Window) -> &[X11Window] {
        self.tree.children(window)
    }
}

/// Size a window should be given before honoring its map request.
///
/// Returns `None` if `current` is acceptable. A window is too small when it is below the
/// advertised minimum size, or below `min_size` if it advertises none. Such windows get their
/// base size if that satisfies the minimum, otherwise `fallback`.
pub fn coerced_size(current: Size, hints: Option<SizeHints>, min_size: Size, fallback: Size) -> Option<Size> {
    let minimum = hints
        .and_then(|hints| hints.min_size)
        .filter(|size| size.w > 0 && size.h > 0)
        .unwrap_or(min_size);
    if current.covers(minimum) {
        return None;
    }
    match hints.and_then(|hints| hints.base_size) {
        Some(base) if base.covers(minimum) && base.covers(min_size) => Some(base),
        _ => Some(fallback),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        utils::Rectangle,
        xwayland::xwm::test_support::{init_logging, TestSurface},
    };

    fn registry(windows: &[X11Window]) -> SurfaceRegistry<TestSurface> {
        init_logging();
        let mut registry = SurfaceRegistry::default();
        for window in windows {
            assert!(registry.insert(X11Surface::new(*window, false, Rectangle::default())));
        }
        registry
    }

    #[test]
    fn clear_hands_out_every_record() {
        let mut registry = registry(&[3, 1, 2]);
        registry.associate(1, TestSurface::new(9)).unwrap();
        registry.set_transient_for(2, Some(1)).unwrap();
        assert_eq!(registry.shell_serial(77, TestSurface::new(10)), Association::Pending);

        let records = registry.clear();
        assert_eq!(records.iter().map(|s| s.window_id()).collect::<Vec<_>>(), vec![3, 1, 2]);
        assert!(records.iter().all(|s| s.wl_surface().is_none()));
        assert!(registry.is_empty());
        assert_eq!(registry.attached_listeners(), 0);
        assert_eq!(registry.transient_children(1), &[] as &[X11Window]);

        // leftovers of the old windows do not match new ones
        assert!(registry.insert(X11Surface::new(5, false, Rectangle::default())));
        assert_eq!(registry.surface_serial_message(5, 77), Association::Pending);
    }

    #[test]
    fn legacy_association_with_existing_surface() {
        let mut registry = registry(&[100]);
        let surface = TestSurface::new(42);

        assert_eq!(
            registry.surface_id_message(100, 42, Some(surface.clone())),
            Association::Associated(100)
        );
        assert_eq!(registry.get(100).unwrap().wl_surface(), Some(&surface));
        assert_eq!(registry.attached_listeners(), 1);

        // a duplicate message is an anomaly and changes nothing
        assert_eq!(
            registry.surface_id_message(100, 42, Some(surface.clone())),
            Association::Rejected(AssociationError::AlreadyAssociated)
        );
        assert_eq!(registry.attached_listeners(), 1);
    }

    #[test]
    fn legacy_association_with_late_surface() {
        let mut registry = registry(&[100]);
        assert_eq!(registry.surface_id_message(100, 42, None), Association::Pending);
        assert_eq!(registry.attached_listeners(), 0);

        assert_eq!(registry.surface_created(TestSurface::new(7)), Association::Pending);
        assert_eq!(
            registry.surface_created(TestSurface::new(42)),
            Association::Associated(100)
        );
        assert_eq!(registry.attached_listeners(), 1);
    }

    #[test]
    fn serial_association_in_both_orders() {
        let mut registry = registry(&[1, 2]);

        // window first
        assert_eq!(registry.surface_serial_message(1, 0x1_0000_0001), Association::Pending);
        let first = TestSurface::new(10);
        assert_eq!(
            registry.shell_serial(0x1_0000_0001, first.clone()),
            Association::Associated(1)
        );

        // shell object first
        let second = TestSurface::new(11);
        assert_eq!(registry.shell_serial(5, second.clone()), Association::Pending);
        assert_eq!(registry.surface_serial_message(2, 5), Association::Associated(2));

        assert_eq!(registry.window_for_surface(&first), Some(1));
        assert_eq!(registry.window_for_surface(&second), Some(2));
    }

    #[test]
    fn surface_cannot_be_claimed_twice() {
        let mut registry = registry(&[1, 2]);
        let surface = TestSurface::new(3);
        registry.associate(1, surface.clone()).unwrap();
        assert_eq!(registry.associate(2, surface), Err(AssociationError::SurfaceClaimed));
        assert!(registry.get(2).unwrap().wl_surface().is_none());
    }

    #[test]
    fn dead_surfaces_are_refused() {
        let mut registry = registry(&[1]);
        let surface = TestSurface::new(3);
        surface.kill();
        assert_eq!(registry.associate(1, surface), Err(AssociationError::DeadSurface));
    }

    #[test]
    fn dissociation_detaches_listeners() {
        let mut registry = registry(&[1]);
        let surface = TestSurface::new(3);
        registry.associate(1, surface.clone()).unwrap();
        assert_eq!(
            registry.commit(&surface, true),
            Some(Commit {
                window: 1,
                map_change: Some(MapChange::Mapped)
            })
        );

        assert_eq!(
            registry.dissociate(1),
            Dissociation {
                unmapped: true,
                cleared: true
            }
        );
        assert!(registry.get(1).unwrap().wl_surface().is_none());
        assert!(!registry.get(1).unwrap().is_mapped());
        assert_eq!(registry.attached_listeners(), 0);

        // nothing is delivered for the old surface anymore
        assert_eq!(registry.commit(&surface, true), None);
        assert_eq!(registry.surface_destroyed(&surface), None);
    }

    #[test]
    fn reassociation_after_dissociation() {
        let mut registry = registry(&[1]);
        registry.associate(1, TestSurface::new(3)).unwrap();
        registry.dissociate(1);
        let surface = TestSurface::new(4);
        registry.associate(1, surface.clone()).unwrap();
        assert_eq!(registry.attached_listeners(), 1);
        assert_eq!(registry.commit(&surface, false).map(|c| c.window), Some(1));
    }

    #[test]
    fn destroyed_surface_dissociates() {
        let mut registry = registry(&[1]);
        let surface = TestSurface::new(3);
        registry.associate(1, surface.clone()).unwrap();
        let (window, dissociation) = registry.surface_destroyed(&surface).unwrap();
        assert_eq!(window, 1);
        assert!(dissociation.cleared);
        assert!(!dissociation.unmapped);
    }

    #[test]
    fn buffer_drives_mapping() {
        let mut registry = registry(&[1]);
        let surface = TestSurface::new(3);
        registry.associate(1, surface.clone()).unwrap();
        assert_eq!(registry.commit(&surface, false).unwrap().map_change, None);
        assert_eq!(
            registry.commit(&surface, true).unwrap().map_change,
            Some(MapChange::Mapped)
        );
        assert_eq!(registry.commit(&surface, true).unwrap().map_change, None);
        assert_eq!(
            registry.commit(&surface, false).unwrap().map_change,
            Some(MapChange::Unmapped)
        );
    }

    #[test]
    fn transient_cycles_are_rejected() {
        let mut registry = registry(&[1, 2, 3]);
        registry.set_transient_for(2, Some(1)).unwrap();
        registry.set_transient_for(3, Some(2)).unwrap();

        for _ in 0..2 {
            assert_eq!(registry.set_transient_for(1, Some(3)), Err(TransientError::Cycle));
            assert_eq!(registry.transient_for(1), None);
        }
        assert_eq!(registry.set_transient_for(1, Some(1)), Err(TransientError::Cycle));
        assert_eq!(registry.transient_children(1), &[2]);
        assert_eq!(registry.transient_children(2), &[3]);
    }

    #[test]
    fn transient_reparenting_moves_the_edge() {
        let mut registry = registry(&[1, 2, 3]);
        registry.set_transient_for(3, Some(1)).unwrap();
        registry.set_transient_for(3, Some(2)).unwrap();
        assert!(registry.transient_children(1).is_empty());
        assert_eq!(registry.transient_children(2), &[3]);
        registry.set_transient_for(3, None).unwrap();
        assert_eq!(registry.transient_for(3), None);
    }

    #[test]
    fn transient_to_unknown_window_is_rejected() {
        let mut registry = registry(&[1]);
        assert_eq!(
            registry.set_transient_for(1, Some(99)),
            Err(TransientError::UnknownWindow)
        );
    }

    #[test]
    fn removing_a_parent_orphans_children() {
        let mut registry = registry(&[1, 2]);
        registry.set_transient_for(2, Some(1)).unwrap();
        registry.remove(1);
        assert_eq!(registry.transient_for(2), None);
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn corrupted_chain_walk_terminates() {
        let mut tree = TransientTree::default();
        tree.parents.insert(1, 2);
        tree.parents.insert(2, 1);
        assert!(!tree.reaches(1, 3));
    }

    #[test]
    fn duplicate_windows_are_not_inserted() {
        let mut registry = registry(&[1]);
        assert!(!registry.insert(X11Surface::new(1, true, Rectangle::default())));
        assert!(!registry.get(1).unwrap().is_override_redirect());
    }

    fn hints(min: Option<(i32, i32)>, base: Option<(i32, i32)>) -> Option<SizeHints> {
        Some(SizeHints {
            min_size: min.map(Size::from),
            base_size: base.map(Size::from),
            ..Default::default()
        })
    }

    #[test]
    fn sized_windows_are_left_alone() {
        assert_eq!(
            coerced_size((800, 600).into(), None, (2, 2).into(), (640, 480).into()),
            None
        );
        assert_eq!(
            coerced_size(
                (300, 200).into(),
                hints(Some((300, 200)), None),
                (2, 2).into(),
                (640, 480).into()
            ),
            None
        );
    }

    #[test]
    fn tiny_windows_without_hints_get_the_fallback() {
        assert_eq!(
            coerced_size((1, 1).into(), None, (2, 2).into(), (640, 480).into()),
            Some((640, 480).into())
        );
    }

    #[test]
    fn tiny_windows_prefer_their_base_size() {
        assert_eq!(
            coerced_size(
                (10, 10).into(),
                hints(Some((100, 100)), Some((200, 150))),
                (2, 2).into(),
                (640, 480).into()
            ),
            Some((200, 150).into())
        );
    }

    #[test]
    fn base_below_minimum_is_not_used() {
        assert_eq!(
            coerced_size(
                (10, 10).into(),
                hints(Some((100, 100)), Some((50, 50))),
                (2, 2).into(),
                (640, 480).into()
            ),
            Some((640, 480).into())
        );
    }
}
