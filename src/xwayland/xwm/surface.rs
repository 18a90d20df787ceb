use std::fmt;

use x11rb::{
    errors::{ConnectionError, ReplyOrIdError},
    protocol::xproto::Window as X11Window,
};

use crate::utils::{IsAlive, Rectangle, Size};

use super::{
    net_state::{RequestedState, WindowState},
    properties::{MotifHints, SizeHints, WindowProperties, WmClassInfo, WmHints, WmProtocol, WmWindowType},
};

/// The compositor's handle to a wayland surface
///
/// The window manager only ever stores clones of these handles and validates them with
/// [`IsAlive::alive`] before use. Their lifetime is owned by the compositor.
pub trait WaylandSurface: IsAlive + Clone + PartialEq + fmt::Debug {
    /// Protocol object id of the surface within the Xwayland client
    fn protocol_id(&self) -> u32;
}

/// Errors that can happen for operations on an [`X11Surface`]
#[derive(Debug, thiserror::Error)]
pub enum X11SurfaceError {
    /// Error on the underlying X11 Connection
    #[error(transparent)]
    Connection(#[from] ConnectionError),
    /// A request failed
    #[error(transparent)]
    Request(#[from] ReplyOrIdError),
    /// The window is not known to this window manager
    #[error("Unknown X11 window {0}")]
    UnknownWindow(X11Window),
    /// Operation was unsupported for an override_redirect window
    #[error("Operation was unsupported for an override_redirect window")]
    UnsupportedForOverrideRedirect,
    /// The client does not participate in the required protocol
    #[error("The window does not support the requested protocol")]
    UnsupportedProtocol,
}

/// https://x.org/releases/X11R7.6/doc/xorg-docs/specs/ICCCM/icccm.html#input_focus
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub(super) enum InputMode {
    None,
    Passive,
    LocallyActive,
    GloballyActive,
}

impl InputMode {
    /// Whether the window manager sets the input focus itself
    pub(super) fn set_input_focus(self) -> bool {
        matches!(self, InputMode::Passive | InputMode::LocallyActive)
    }

    /// Whether the client expects `WM_TAKE_FOCUS`
    pub(super) fn take_focus(self) -> bool {
        matches!(self, InputMode::LocallyActive | InputMode::GloballyActive)
    }

    /// No input model: the window never takes the keyboard focus
    pub(super) fn accepts_focus(self) -> bool {
        self != InputMode::None
    }
}

/// Destroy and commit listeners attached to an associated wayland surface
#[derive(Debug, Clone, PartialEq)]
pub(super) struct SurfaceListeners<S> {
    pub(super) surface: S,
}

/// X11 window managed by an [`X11Wm`](super::X11Wm)
///
/// Records are owned by the window manager and handed out by reference. Operations that talk to
/// the X server are methods of the [`X11Wm`](super::X11Wm) taking the window id.
#[derive(Debug)]
pub struct X11Surface<S> {
    pub(super) window: X11Window,
    pub(super) override_redirect: bool,
    pub(super) geometry: Rectangle,

    pub(super) wl_surface: Option<S>,
    pub(super) wl_surface_serial: Option<u64>,
    pub(super) listeners: Option<SurfaceListeners<S>>,
    pub(super) has_buffer: bool,
    pub(super) mapped: bool,
    pub(super) x11_mapped: bool,

    pub(super) state: WindowState,
    pub(super) requested: RequestedState,
    pub(super) properties: WindowProperties,
    pub(super) window_types: Vec<WmWindowType>,
    pub(super) pending_ping: Option<u32>,
}

impl<S: WaylandSurface> X11Surface<S> {
    pub(super) fn new(window: X11Window, override_redirect: bool, geometry: Rectangle) -> Self {
        X11Surface {
            window,
            override_redirect,
            geometry,
            wl_surface: None,
            wl_surface_serial: None,
            listeners: None,
            has_buffer: false,
            mapped: false,
            x11_mapped: false,
            state: WindowState::WITHDRAWN,
            requested: RequestedState::default(),
            properties: WindowProperties::default(),
            window_types: Vec::new(),
            pending_ping: None,
        }
    }

    /// X11 protocol id of the underlying window
    pub fn window_id(&self) -> X11Window {
        self.window
    }

    /// Returns if this window has the override redirect flag set or not
    pub fn is_override_redirect(&self) -> bool {
        self.override_redirect
    }

    /// Returns the associated wl_surface.
    ///
    /// Returns `None` if the window is not associated or the surface died already.
    pub fn wl_surface(&self) -> Option<&S> {
        self.wl_surface.as_ref().filter(|surface| surface.alive())
    }

    /// Serial announced through `WL_SURFACE_SERIAL`, if any
    pub fn wl_surface_serial(&self) -> Option<u64> {
        self.wl_surface_serial
    }

    /// Returns if the window is mapped, i.e. associated and carrying a buffer
    pub fn is_mapped(&self) -> bool {
        self.mapped
    }

    /// Returns the last known geometry of the window
    pub fn geometry(&self) -> Rectangle {
        self.geometry
    }

    /// Returns the current title of the underlying X11 window
    pub fn title(&self) -> &str {
        self.properties.title.as_deref().unwrap_or_default()
    }

    /// Returns the application id of the underlying X11 window
    pub fn class(&self) -> &str {
        self.properties
            .class
            .as_ref()
            .map(|class| class.class.as_str())
            .unwrap_or_default()
    }

    /// Returns the instance name of the underlying X11 window
    pub fn instance(&self) -> &str {
        self.properties
            .class
            .as_ref()
            .map(|class: &WmClassInfo| class.instance.as_str())
            .unwrap_or_default()
    }

    /// Returns the `WM_WINDOW_ROLE` of the underlying X11 window
    pub fn role(&self) -> Option<&str> {
        self.properties.role.as_deref()
    }

    /// Returns the startup id of the underlying X11 window
    pub fn startup_id(&self) -> Option<&str> {
        self.properties.startup_id.as_deref()
    }

    /// Returns the process id of the client owning the window, if known
    pub fn pid(&self) -> Option<u32> {
        self.properties.pid
    }

    /// Returns the window this one is transient for, as advertised by the client
    ///
    /// Use [`X11Wm::transient_for`](super::X11Wm::transient_for) for the validated edge.
    pub fn advertised_transient_for(&self) -> Option<X11Window> {
        self.properties.transient_for
    }

    /// Returns the `WM_HINTS` of the underlying X11 window
    pub fn hints(&self) -> Option<WmHints> {
        self.properties.hints
    }

    /// Returns the normalized size hints of the underlying X11 window
    pub fn size_hints(&self) -> Option<SizeHints> {
        self.properties.size_hints
    }

    /// Returns the suggested minimum size of the underlying X11 window
    pub fn min_size(&self) -> Option<Size> {
        self.properties.size_hints.and_then(|hints| hints.min_size)
    }

    /// Returns the suggested maximum size of the underlying X11 window
    pub fn max_size(&self) -> Option<Size> {
        self.properties.size_hints.and_then(|hints| hints.max_size)
    }

    /// Returns the suggested base size of the underlying X11 window
    pub fn base_size(&self) -> Option<Size> {
        self.properties.size_hints.and_then(|hints| hints.base_size)
    }

    /// Returns the `WM_PROTOCOLS` the client participates in
    pub fn protocols(&self) -> &[WmProtocol] {
        &self.properties.protocols
    }

    /// Returns the raw `_NET_WM_WINDOW_TYPE` atoms
    pub fn window_type_atoms(&self) -> &[x11rb::protocol::xproto::Atom] {
        &self.properties.window_type
    }

    /// Returns the reported window type of the underlying X11 window if set.
    ///
    /// Windows without a window type set should be considered to be of type `Normal` for
    /// backwards compatibility.
    pub fn window_type(&self) -> Option<WmWindowType> {
        self.window_types.first().copied()
    }

    /// Returns true if the window is client-side decorated
    pub fn is_decorated(&self) -> bool {
        self.properties
            .motif_hints
            .as_ref()
            .is_some_and(MotifHints::is_client_decorated)
    }

    /// Confirmed window state
    pub fn state(&self) -> WindowState {
        self.state
    }

    /// State changes the client asked for and that were not yet taken
    pub fn requested_state(&self) -> RequestedState {
        self.requested
    }

    /// Returns if the window is in the fullscreen state
    pub fn is_fullscreen(&self) -> bool {
        self.state.contains(WindowState::FULLSCREEN)
    }

    /// Returns if the window is in the maximized state
    pub fn is_maximized(&self) -> bool {
        self.state.is_maximized()
    }

    /// Returns if the window is in the minimized state
    pub fn is_minimized(&self) -> bool {
        self.state.contains(WindowState::MINIMIZED)
    }

    /// Returns if the window is modal
    pub fn is_modal(&self) -> bool {
        self.state.contains(WindowState::MODAL)
    }

    /// Returns if the window is withdrawn
    pub fn is_withdrawn(&self) -> bool {
        self.state.contains(WindowState::WITHDRAWN)
    }

    pub(super) fn input_mode(&self) -> InputMode {
        match (
            self.properties
                .hints
                .as_ref()
                .and_then(|hints| hints.input)
                .unwrap_or(true),
            self.properties.protocols.contains(&WmProtocol::TakeFocus),
        ) {
            (false, false) => InputMode::None,
            (true, false) => InputMode::Passive, // the default
            (true, true) => InputMode::LocallyActive,
            (false, true) => InputMode::GloballyActive,
        }
    }

    /// Whether the window should be listed in `_NET_CLIENT_LIST` and receive state updates
    pub(super) fn is_managed_and_mapped(&self) -> bool {
        !self.override_redirect && self.x11_mapped
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::xwayland::xwm::test_support::TestSurface;

    #[test]
    fn input_mode_defaults_to_passive() {
        let surface = X11Surface::<TestSurface>::new(1, false, Rectangle::default());
        assert_eq!(surface.input_mode(), InputMode::Passive);
        assert!(surface.input_mode().set_input_focus());
        assert!(!surface.input_mode().take_focus());
    }

    #[test]
    fn input_mode_globally_active() {
        let mut surface = X11Surface::<TestSurface>::new(1, false, Rectangle::default());
        surface.properties.hints = Some(WmHints {
            input: Some(false),
            ..Default::default()
        });
        surface.properties.protocols = vec![WmProtocol::TakeFocus];
        assert_eq!(surface.input_mode(), InputMode::GloballyActive);
        assert!(!surface.input_mode().set_input_focus());
        assert!(surface.input_mode().take_focus());
    }

    #[test]
    fn input_mode_none_refuses_focus() {
        let mut surface = X11Surface::<TestSurface>::new(1, false, Rectangle::default());
        surface.properties.hints = Some(WmHints {
            input: Some(false),
            ..Default::default()
        });
        assert_eq!(surface.input_mode(), InputMode::None);
        assert!(!surface.input_mode().accepts_focus());
        assert!(InputMode::GloballyActive.accepts_focus());
        assert!(InputMode::Passive.accepts_focus());
    }

    #[test]
    fn dead_surfaces_are_not_handed_out() {
        let mut surface = X11Surface::<TestSurface>::new(1, false, Rectangle::default());
        let wl = TestSurface::new(42);
        surface.wl_surface = Some(wl.clone());
        assert_eq!(surface.wl_surface(), Some(&wl));
        wl.kill();
        assert_eq!(surface.wl_surface(), None);
    }

    #[test]
    fn new_windows_start_withdrawn() {
        let surface = X11Surface::<TestSurface>::new(1, false, Rectangle::default());
        assert!(surface.is_withdrawn());
        assert_eq!(surface.title(), "");
        assert_eq!(surface.window_type(), None);
    }
}
