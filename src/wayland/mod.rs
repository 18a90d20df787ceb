//! Glue between the window manager and `wayland-server`
//!
//! With the `wayland_frontend` feature, [`WlSurface`] can be used directly as the surface type
//! of an [`X11Wm`](crate::xwayland::X11Wm). A compositor built on `wayland-server` forwards the
//! lifecycle of the Xwayland client's surfaces:
//!
//! - [`X11Wm::new_wl_surface`](crate::xwayland::X11Wm::new_wl_surface) when Xwayland creates a surface,
//! - [`X11Wm::new_shell_surface`](crate::xwayland::X11Wm::new_shell_surface) when an
//!   `xwayland_surface_v1` sets its serial,
//! - [`X11Wm::commit_hook`](crate::xwayland::X11Wm::commit_hook) on every commit,
//! - [`X11Wm::surface_destroyed`](crate::xwayland::X11Wm::surface_destroyed) on destruction,
//!
//! and implements [`XwmHandler::lookup_surface`](crate::xwayland::XwmHandler::lookup_surface)
//! with [`surface_from_protocol_id`].

use wayland_server::{protocol::wl_surface::WlSurface, Client, DisplayHandle, Resource};

use crate::{utils::IsAlive, xwayland::xwm::WaylandSurface};

impl IsAlive for WlSurface {
    #[inline]
    fn alive(&self) -> bool {
        self.is_alive()
    }
}

impl WaylandSurface for WlSurface {
    #[inline]
    fn protocol_id(&self) -> u32 {
        self.id().protocol_id()
    }
}

/// Resolve a `WL_SURFACE_ID` value sent by Xwayland into the surface of its client
pub fn surface_from_protocol_id(dh: &DisplayHandle, xwayland: &Client, protocol_id: u32) -> Option<WlSurface> {
    xwayland
        .object_from_protocol_id::<WlSurface>(dh, protocol_id)
        .ok()
        .filter(|surface| surface.is_alive())
}
