//! Various utilities functions and types

mod alive_tracker;
mod geometry;
pub(crate) mod ids;
pub mod x11rb;

pub use self::alive_tracker::IsAlive;
pub use self::geometry::{Point, Rectangle, Size};
