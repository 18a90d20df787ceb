//! Utilities to track object's life cycle

/// Trait that is implemented on objects whose lifetime is not owned by the window manager
pub trait IsAlive {
    /// Check if object is alive
    fn alive(&self) -> bool;
}

impl<T: IsAlive> IsAlive for &T {
    #[inline]
    fn alive(&self) -> bool {
        IsAlive::alive(*self)
    }
}
