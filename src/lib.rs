#![cfg_attr(docsrs, feature(doc_auto_cfg))]
#![warn(missing_docs, missing_debug_implementations, rust_2018_idioms)]

//! # xwayland-bridge: an X11 window manager for wayland compositors
//!
//! This crate lets a wayland compositor run X11 applications through Xwayland. It plays the
//! role of the X11 window manager of an Xwayland instance and translates between the two worlds:
//! X11 windows become records paired with the wayland surfaces Xwayland renders them into,
//! window properties and state requests are surfaced to the compositor, keyboard focus is kept
//! consistent, and clipboard, primary selection and drag-and-drop data flows in both directions.
//!
//! ## Structure of the crate
//!
//! - [`xwayland`] contains the window manager itself, see [`xwayland::X11Wm`] and the
//!   [`xwayland::XwmHandler`] trait your compositor state implements.
//! - [`wayland`] contains glue for compositors built on `wayland-server`.
//! - [`utils`] contains geometry types and the [`calloop`] event source driving the X11
//!   connection.
//!
//! ## General principles
//!
//! ### The event loop and state handling
//!
//! The window manager is built around [`calloop`], a callback-oriented event loop. Starting it
//! inserts an event source for the X11 connection into your loop; incoming events are dispatched
//! to your compositor state through [`xwayland::XwmHandler`], which gives back access to the
//! window manager by its [`xwayland::XwmId`]. No shared pointers or locks are involved: all
//! callbacks are invoked sequentially with a mutable reference to your state.
//!
//! The window manager never makes policy decisions. Configure requests, state changes and
//! activation requests are reported and only take effect when the compositor acknowledges them.
//!
//! ### Logging
//!
//! This crate makes extensive use of [`tracing`] for its internal logging.
//!
//! For release builds it is recommended to limit the log level during compile time.
//! This can be done by adding a dependency to [`tracing`] and enabling the corresponding features.
//! For example to enable `trace` messages for debug builds, but limit release builds to `debug` add
//! the following in your binary crate `Cargo.toml`:
//!
//! ```toml
//! [dependencies]
//! tracing = { version = "0.1", features = ["max_level_trace", "release_max_level_debug"] }
//! ```
//!
//! If you do not want to use [`tracing`] for your compositor, refer to [`log compatibility`](tracing#log-compatibility)
//! for how to forward the debug output to other `log` compatible frameworks.

pub mod utils;
#[cfg(feature = "wayland_frontend")]
pub mod wayland;
pub mod xwayland;

pub mod reexports;
