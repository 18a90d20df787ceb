//! Reexports of crates, that are part of the public api, for convenience

pub use calloop;
#[cfg(feature = "wayland_frontend")]
pub use wayland_server;
pub use x11rb;
