//! XWayland utilities
//!
//! This module contains an X11 window manager for an already running Xwayland instance, in
//! order to support running X11 apps inside a wayland compositor.
//!
//! Spawning Xwayland is left to the compositor: it hands the window manager end of the
//! `-wm` socket pair to [`X11Wm::start_wm`] and treats Xwayland (and all its X11 apps) as one
//! special wayland client. The window manager then mirrors every X11 window as an
//! [`X11Surface`], pairs it with the wayland surface Xwayland renders it to, and reports
//! everything the compositor has to decide on through the [`XwmHandler`] trait.
//!
//! Clipboard, primary selection and drag-and-drop are bridged in both directions, see
//! [`X11Wm::new_selection`], [`X11Wm::send_selection`] and [`xwm::DataOffer`].
pub mod xwm;

pub use self::xwm::{X11Surface, X11Wm, XwmConfig, XwmHandler, XwmId};
