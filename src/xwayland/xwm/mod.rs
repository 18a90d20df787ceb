//! Xwayland window manager.
//!
//! Provides an [`X11Wm`] type, which registers itself as the window manager of an already spawned
//! Xwayland instance, allowing backwards-compatibility by seamlessly integrating X11 windows into a
//! wayland compositor.
//!
//! Every X11 window is tracked as an [`X11Surface`] record. Once Xwayland tells us which wayland
//! surface renders a window the record gets associated with the compositor's surface handle (any
//! type implementing [`WaylandSurface`]). The window manager itself is policy-free: it relays
//! client requests through the [`XwmHandler`] trait and the compositor acknowledges them through
//! methods of [`X11Wm`].
//!
//! ```no_run
//! # use std::os::unix::net::UnixStream;
//! # use xwayland_bridge::xwayland::xwm::{WaylandSurface, X11Wm, XwmConfig, XwmHandler, XwmId};
//! # use xwayland_bridge::utils::IsAlive;
//! # #[derive(Debug, Clone, PartialEq)]
//! # struct Surface;
//! # impl IsAlive for Surface { fn alive(&self) -> bool { true } }
//! # impl WaylandSurface for Surface { fn protocol_id(&self) -> u32 { 0 } }
//! struct State {
//!     xwm: Option<X11Wm<Surface>>,
//! }
//!
//! impl XwmHandler for State {
//!     type Surface = Surface;
//!
//!     fn xwm_state(&mut self, _xwm: XwmId) -> &mut X11Wm<Surface> {
//!         self.xwm.as_mut().unwrap()
//!     }
//!     fn lookup_surface(&mut self, _xwm: XwmId, _protocol_id: u32) -> Option<Surface> {
//!         None
//!     }
//!     fn new_window(&mut self, _xwm: XwmId, _window: u32) {}
//!     fn new_override_redirect_window(&mut self, _xwm: XwmId, _window: u32) {}
//!     fn mapped_window(&mut self, _xwm: XwmId, _window: u32) {}
//!     fn unmapped_window(&mut self, _xwm: XwmId, _window: u32) {}
//!     fn destroyed_window(&mut self, _xwm: XwmId, _window: xwayland_bridge::xwayland::xwm::X11Surface<Surface>) {}
//!     fn configure_request(
//!         &mut self,
//!         _xwm: XwmId,
//!         _window: u32,
//!         _request: xwayland_bridge::xwayland::xwm::ConfigureRequest,
//!     ) {
//!     }
//!     fn state_changed(&mut self, _xwm: XwmId, _window: u32) {}
//! }
//!
//! # let handle: calloop::LoopHandle<'static, State> = unreachable!();
//! # let connection: UnixStream = unreachable!();
//! let wm = X11Wm::start_wm(handle, connection, XwmConfig::default())
//!     .expect("Failed to attach X11 Window Manager");
//! ```

use std::{
    io,
    os::unix::{io::OwnedFd, net::UnixStream},
    sync::Arc,
};

use calloop::{ping::Ping, LoopHandle};
use smallvec::SmallVec;
use tracing::{debug, error, info, trace, warn};
use x11rb::{
    connection::{Connection as _, RequestConnection as _},
    errors::{ConnectError, ConnectionError, ReplyError, ReplyOrIdError},
    protocol::{
        composite::{self, ConnectionExt as _, Redirect},
        render::{self, ConnectionExt as _},
        res::{self, ConnectionExt as _},
        xfixes::{self, ConnectionExt as _},
        xproto::{
            Atom, AtomEnum, ChangeWindowAttributesAux, ClientMessageEvent, ConfigWindow, ConfigureNotifyEvent,
            ConfigureRequestEvent, ConfigureWindowAux, ConnectionExt as _, EventMask, InputFocus, MapState,
            PropMode, Screen, StackMode, Window as X11Window, WindowClass, CONFIGURE_NOTIFY_EVENT,
        },
        Event,
    },
    rust_connection::{DefaultStream, RustConnection},
    wrapper::ConnectionExt as _,
    CURRENT_TIME,
};

use crate::utils::{
    ids::id_gen,
    x11rb::{X11Source, X11SourceEvent},
    Point, Rectangle, Size,
};

mod dnd;
mod focus;
mod net_state;
mod properties;
mod registry;
mod selection;
mod surface;
#[cfg(test)]
pub(crate) mod test_support;

pub use self::dnd::DataOffer;
pub use self::focus::{FocusInVerdict, FocusState, FOCUS_SEQUENCE_WINDOW};
pub use self::net_state::{RequestedState, StateAction, StateProperty, WindowState};
pub use self::properties::{
    MotifHints, SizeHints, WindowProperties, WmClassInfo, WmHints, WmInitialState, WmProtocol, WmWindowProperty,
    WmWindowType,
};
pub use self::registry::{
    coerced_size, Association, AssociationError, Commit, Dissociation, MapChange, SurfaceRegistry, TransientError,
};
pub use self::selection::{negotiate, SelectionTarget};
pub use self::surface::{WaylandSurface, X11Surface, X11SurfaceError};

use self::surface::InputMode;

use self::{
    dnd::XwmDnd,
    net_state::{apply_state_message, net_state_properties, wm_state_value, ICONIC_STATE, NORMAL_STATE},
    properties::{property_for_atom, Fetched, PropertyReader},
    selection::XwmSelection,
};

#[allow(missing_docs)]
mod atoms {
    x11rb::atom_manager! {
        /// Atoms used by the XWM
        pub Atoms: AtomsCookie {
            // wayland stuff
            WL_SURFACE_ID,
            WL_SURFACE_SERIAL,

            // private
            _WL_SELECTION,

            // data formats
            UTF8_STRING,
            TEXT,

            // client -> server
            WM_HINTS,
            WM_PROTOCOLS,
            WM_TAKE_FOCUS,
            WM_DELETE_WINDOW,
            WM_CHANGE_STATE,
            WM_STATE,
            WM_WINDOW_ROLE,
            _NET_WM_NAME,
            _NET_WM_MOVERESIZE,
            _NET_WM_PID,
            _NET_WM_PING,
            _NET_STARTUP_ID,
            _MOTIF_WM_HINTS,
            _NET_WM_WINDOW_TYPE,
            _NET_WM_WINDOW_TYPE_DROPDOWN_MENU,
            _NET_WM_WINDOW_TYPE_DIALOG,
            _NET_WM_WINDOW_TYPE_MENU,
            _NET_WM_WINDOW_TYPE_NOTIFICATION,
            _NET_WM_WINDOW_TYPE_NORMAL,
            _NET_WM_WINDOW_TYPE_POPUP_MENU,
            _NET_WM_WINDOW_TYPE_SPLASH,
            _NET_WM_WINDOW_TYPE_TOOLBAR,
            _NET_WM_WINDOW_TYPE_TOOLTIP,
            _NET_WM_WINDOW_TYPE_UTILITY,
            _NET_WM_STATE,
            _NET_WM_STATE_MODAL,
            _NET_WM_STATE_FULLSCREEN,
            _NET_WM_STATE_MAXIMIZED_VERT,
            _NET_WM_STATE_MAXIMIZED_HORZ,
            _NET_WM_STATE_HIDDEN,
            _NET_WM_STATE_FOCUSED,

            // server -> client
            WM_S0,
            _NET_WM_CM_S0,
            _NET_SUPPORTED,
            _NET_ACTIVE_WINDOW,
            _NET_CLIENT_LIST,
            _NET_CLIENT_LIST_STACKING,
            _NET_SUPPORTING_WM_CHECK,

            // selections
            CLIPBOARD,
            CLIPBOARD_MANAGER,
            PRIMARY,
            TARGETS,
            TIMESTAMP,
            INCR,

            // drag and drop
            XdndSelection,
            XdndAware,
            XdndEnter,
            XdndLeave,
            XdndPosition,
            XdndStatus,
            XdndDrop,
            XdndFinished,
            XdndTypeList,
            XdndActionCopy,
        }
    }
}
pub use self::atoms::Atoms;

id_gen!(xwm_id);

/// Id of an X11 WM
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct XwmId(usize);

/// Window asks to be restacked
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Reorder {
    /// to the top of the stack
    Top,
    /// directly above the given window id
    Above(X11Window),
    /// directly below the given window id
    Below(X11Window),
    /// to the bottom of the stack
    Bottom,
}

/// Edge values for resizing
#[derive(Debug, Clone, Copy, Hash, PartialEq, Eq)]
#[allow(missing_docs)]
pub enum ResizeEdge {
    Top,
    Bottom,
    Left,
    TopLeft,
    BottomLeft,
    Right,
    TopRight,
    BottomRight,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum MoveResize {
    Move,
    Resize(ResizeEdge),
}

impl MoveResize {
    /// Decode the direction of a `_NET_WM_MOVERESIZE` message. Keyboard driven and cancel
    /// requests are not supported.
    fn from_direction(direction: u32) -> Option<MoveResize> {
        Some(match direction {
            0 => MoveResize::Resize(ResizeEdge::TopLeft),
            1 => MoveResize::Resize(ResizeEdge::Top),
            2 => MoveResize::Resize(ResizeEdge::TopRight),
            3 => MoveResize::Resize(ResizeEdge::Right),
            4 => MoveResize::Resize(ResizeEdge::BottomRight),
            5 => MoveResize::Resize(ResizeEdge::Bottom),
            6 => MoveResize::Resize(ResizeEdge::BottomLeft),
            7 => MoveResize::Resize(ResizeEdge::Left),
            8 => MoveResize::Move,
            _ => return None,
        })
    }
}

/// A configure request of a client, only containing the fields the client asked to change
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ConfigureRequest {
    /// Requested x coordinate
    pub x: Option<i32>,
    /// Requested y coordinate
    pub y: Option<i32>,
    /// Requested width
    pub width: Option<u32>,
    /// Requested height
    pub height: Option<u32>,
    /// Requested restacking
    pub reorder: Option<Reorder>,
}

impl ConfigureRequest {
    fn from_event(r: &ConfigureRequestEvent) -> ConfigureRequest {
        let mask = u16::from(r.value_mask);
        let has = |flag: ConfigWindow| mask & u16::from(flag) != 0;
        let reorder = if has(ConfigWindow::STACK_MODE) {
            match r.stack_mode {
                StackMode::ABOVE if has(ConfigWindow::SIBLING) => Some(Reorder::Above(r.sibling)),
                StackMode::ABOVE => Some(Reorder::Top),
                StackMode::BELOW if has(ConfigWindow::SIBLING) => Some(Reorder::Below(r.sibling)),
                StackMode::BELOW => Some(Reorder::Bottom),
                _ => None,
            }
        } else {
            None
        };
        ConfigureRequest {
            x: has(ConfigWindow::X).then(|| i32::from(r.x)),
            y: has(ConfigWindow::Y).then(|| i32::from(r.y)),
            width: has(ConfigWindow::WIDTH).then(|| u32::from(r.width)),
            height: has(ConfigWindow::HEIGHT).then(|| u32::from(r.height)),
            reorder,
        }
    }
}

/// Configuration of an [`X11Wm`], fixed for its lifetime
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct XwmConfig {
    /// Name advertised on the `_NET_SUPPORTING_WM_CHECK` window
    pub wm_name: String,
    /// Size given to tiny windows on map when their hints offer nothing better
    pub fallback_size: Size,
    /// Windows smaller than this are considered tiny, unless they advertise a minimum size
    pub min_size: Size,
    /// Maximum sequence distance between a focus request and the `FocusIn` confirming it
    pub focus_sequence_window: u16,
    /// Largest chunk written to a requestor in one property change
    pub incr_chunk_size: usize,
}

impl Default for XwmConfig {
    fn default() -> Self {
        XwmConfig {
            wm_name: String::from("xwayland-bridge"),
            fallback_size: Size::from((640, 480)),
            min_size: Size::from((2, 2)),
            focus_sequence_window: FOCUS_SEQUENCE_WINDOW,
            incr_chunk_size: 64 * 1024,
        }
    }
}

/// Versions of the X extensions negotiated at startup
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Capabilities {
    /// XFixes version
    pub xfixes: (u32, u32),
    /// Composite version
    pub composite: (u32, u32),
    /// X-Resource version, if the server supports it
    pub res: Option<(u32, u32)>,
    /// Render version, if the server supports it
    pub render: Option<(u32, u32)>,
}

/// Errors of starting an [`X11Wm`]
#[derive(Debug, thiserror::Error)]
pub enum XwmError {
    /// Connecting to the X server failed
    #[error("Failed to connect to the X server: {0}")]
    Connect(#[from] ConnectError),
    /// The connection broke
    #[error(transparent)]
    Connection(#[from] ConnectionError),
    /// A request failed
    #[error(transparent)]
    Reply(#[from] ReplyError),
    /// A request failed or ran out of ids
    #[error(transparent)]
    Request(#[from] ReplyOrIdError),
    /// A required extension is missing
    #[error("The X server does not support the {0} extension")]
    MissingExtension(&'static str),
    /// Setting up the event source failed
    #[error(transparent)]
    Io(#[from] io::Error),
    /// The event source could not be inserted into the event loop
    #[error("Failed to insert the X11 source into the event loop: {0}")]
    EventLoop(#[from] calloop::Error),
}

/// Handler trait for X11Wm interactions
pub trait XwmHandler {
    /// The compositor's handle of a wayland surface
    type Surface: WaylandSurface;

    /// [`X11Wm`] getter for a given ID.
    fn xwm_state(&mut self, xwm: XwmId) -> &mut X11Wm<Self::Surface>;

    /// Resolve a protocol object id of the Xwayland client into a surface, if it exists yet.
    fn lookup_surface(&mut self, xwm: XwmId, protocol_id: u32) -> Option<Self::Surface>;

    /// A new X11 window was created.
    ///
    /// New windows are not mapped yet, but various information is already accessible.
    fn new_window(&mut self, xwm: XwmId, window: X11Window);
    /// A new X11 window with the override redirect flag was created.
    ///
    /// New override redirect windows are not mapped yet, but can be mapped at any time.
    /// The compositor must not place or restack them on its own.
    fn new_override_redirect_window(&mut self, xwm: XwmId, window: X11Window);
    /// The wayland surface of a window changed, it was either associated or cleared.
    fn wl_surface_changed(&mut self, xwm: XwmId, window: X11Window) {
        let _ = (xwm, window);
    }
    /// A window got its first buffer while being mapped and should be displayed now.
    fn mapped_window(&mut self, xwm: XwmId, window: X11Window);
    /// Window was unmapped.
    fn unmapped_window(&mut self, xwm: XwmId, window: X11Window);
    /// The wayland surface of a mapped window was committed.
    fn committed_window(&mut self, xwm: XwmId, window: X11Window) {
        let _ = (xwm, window);
    }
    /// Window was destroyed, the record is handed over for a last time.
    fn destroyed_window(&mut self, xwm: XwmId, window: X11Surface<Self::Surface>);

    /// Window asks to be positioned or sized differently.
    ///
    /// Requests can be granted by calling [`X11Wm::configure`] with an updated geometry, or
    /// denied by doing nothing.
    fn configure_request(&mut self, xwm: XwmId, window: X11Window, request: ConfigureRequest);
    /// Window geometry changed on the X server.
    fn geometry_changed(&mut self, xwm: XwmId, window: X11Window, geometry: Rectangle, above: Option<X11Window>) {
        let _ = (xwm, window, geometry, above);
    }
    /// A client asked for a different window state.
    ///
    /// The requested values are available through [`X11Wm::take_requested_state`]. Confirmed state
    /// only changes through [`X11Wm::set_fullscreen`] and friends.
    fn state_changed(&mut self, xwm: XwmId, window: X11Window);
    /// A property of the window changed.
    fn metadata_changed(&mut self, xwm: XwmId, window: X11Window, property: WmWindowProperty) {
        let _ = (xwm, window, property);
    }
    /// A client asked for a window to be activated.
    fn activate_request(&mut self, xwm: XwmId, window: X11Window) {
        let _ = (xwm, window);
    }
    /// Window asks to be moved interactively.
    fn move_request(&mut self, xwm: XwmId, window: X11Window, button: u32) {
        let _ = (xwm, window, button);
    }
    /// Window asks to be resized interactively.
    fn resize_request(&mut self, xwm: XwmId, window: X11Window, button: u32, resize_edge: ResizeEdge) {
        let _ = (xwm, window, button, resize_edge);
    }
    /// A window answered a ping sent with [`X11Wm::ping`].
    fn ping_response(&mut self, xwm: XwmId, window: X11Window, timestamp: u32) {
        let _ = (xwm, window, timestamp);
    }

    /// An X11 client requested the current wayland selection.
    ///
    /// The data of the given mime type has to be written into `fd`, closing it signals the end.
    fn send_selection(&mut self, xwm: XwmId, selection: SelectionTarget, mime_type: String, fd: OwnedFd) {
        let _ = (xwm, selection, mime_type, fd);
    }
    /// An X11 client took the selection, offering the given mime types.
    ///
    /// The data can be requested with [`X11Wm::send_selection`].
    fn new_selection(&mut self, xwm: XwmId, selection: SelectionTarget, mime_types: Vec<String>) {
        let _ = (xwm, selection, mime_types);
    }
    /// An X11 client cleared the selection.
    fn cleared_selection(&mut self, xwm: XwmId, selection: SelectionTarget) {
        let _ = (xwm, selection);
    }

    /// An X11 client started a drag. Returning `false` leaves the drag to X11.
    fn allow_drag(&mut self, xwm: XwmId) -> bool {
        let _ = xwm;
        false
    }
    /// Wayland surface under the given root coordinates, if a drop may happen there.
    fn drag_target_at(&mut self, xwm: XwmId, location: Point) -> Option<Self::Surface> {
        let _ = (xwm, location);
        None
    }
    /// A drag entered a wayland surface, replacing any previous offer.
    fn new_drag_offer(&mut self, xwm: XwmId, offer: &DataOffer<Self::Surface>) {
        let _ = (xwm, offer);
    }
    /// A drag moved within the surface of the current offer.
    fn drag_motion(&mut self, xwm: XwmId, offer: &DataOffer<Self::Surface>) {
        let _ = (xwm, offer);
    }
    /// The current offer was dropped.
    ///
    /// Read its data with [`X11Wm::receive_drag_data`] and conclude with [`X11Wm::finish_drag`].
    fn drag_dropped(&mut self, xwm: XwmId, offer: &DataOffer<Self::Surface>) {
        let _ = (xwm, offer);
    }
    /// The current offer went away without a drop.
    fn drag_offer_cancelled(&mut self, xwm: XwmId) {
        let _ = xwm;
    }

    /// The connection to Xwayland was lost.
    ///
    /// Every window was already reported as destroyed. The [`X11Wm`] should be dropped and a new
    /// Xwayland instance spawned.
    fn disconnected(&mut self, xwm: XwmId) {
        let _ = xwm;
    }
}

fn client_event_mask() -> EventMask {
    EventMask::PROPERTY_CHANGE | EventMask::FOCUS_CHANGE
}

/// The runtime state of an X11 Window Manager
#[derive(Debug)]
pub struct X11Wm<S> {
    id: XwmId,
    conn: Arc<RustConnection>,
    screen: Screen,
    atoms: Atoms,
    capabilities: Capabilities,
    config: XwmConfig,
    wm_window: X11Window,

    surfaces: SurfaceRegistry<S>,
    // map order
    client_list: Vec<X11Window>,
    // bottom to top
    client_list_stacking: Vec<X11Window>,
    focus: FocusState,

    clipboard: XwmSelection,
    primary: XwmSelection,
    dnd: XwmDnd<S>,
    xwayland_focused: bool,

    flush_gate: FlushGate,
    source: Option<SourceRemover>,
}

/// Holds back flushes while a batch of X11 events is handled
#[derive(Debug)]
struct FlushGate {
    dispatching: bool,
    waker: Ping,
}

impl FlushGate {
    fn new(waker: Ping) -> Self {
        FlushGate {
            dispatching: false,
            waker,
        }
    }

    fn begin_pass(&mut self) {
        self.dispatching = true;
    }

    // the caller flushes once the pass is over
    fn end_pass(&mut self) {
        self.dispatching = false;
    }

    /// Run `flush` unless a pass is in progress.
    ///
    /// Waiting for replies may have queued events without waking the event source, so the source
    /// is pinged after every flush done outside of a pass.
    fn flush<E>(&self, flush: impl FnOnce() -> Result<(), E>) -> Result<(), E> {
        if !self.dispatching {
            flush()?;
            self.waker.ping();
        }
        Ok(())
    }
}

// removes the X11 event source from the loop it was inserted into
struct SourceRemover(Box<dyn FnOnce()>);

impl std::fmt::Debug for SourceRemover {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("SourceRemover")
    }
}

impl<S> Drop for X11Wm<S> {
    fn drop(&mut self) {
        if let Some(SourceRemover(remove)) = self.source.take() {
            remove();
        }
        let _ = self.conn.destroy_window(self.wm_window);
        let _ = self.conn.flush();
        xwm_id::remove(self.id.0);
    }
}

fn extension_version(
    conn: &RustConnection,
    name: &'static str,
    query: impl FnOnce(&RustConnection) -> Result<(u32, u32), ReplyError>,
) -> Result<Option<(u32, u32)>, XwmError> {
    if conn.extension_information(name)?.is_none() {
        return Ok(None);
    }
    Ok(Some(query(conn)?))
}

fn query_capabilities(conn: &RustConnection) -> Result<Capabilities, XwmError> {
    let xfixes = extension_version(conn, xfixes::X11_EXTENSION_NAME, |conn| {
        let reply = conn.xfixes_query_version(5, 0)?.reply()?;
        Ok((reply.major_version, reply.minor_version))
    })?
    .ok_or(XwmError::MissingExtension(xfixes::X11_EXTENSION_NAME))?;
    let composite = extension_version(conn, composite::X11_EXTENSION_NAME, |conn| {
        let reply = conn.composite_query_version(0, 4)?.reply()?;
        Ok((reply.major_version, reply.minor_version))
    })?
    .ok_or(XwmError::MissingExtension(composite::X11_EXTENSION_NAME))?;
    let res = extension_version(conn, res::X11_EXTENSION_NAME, |conn| {
        let reply = conn.res_query_version(1, 2)?.reply()?;
        Ok((u32::from(reply.server_major), u32::from(reply.server_minor)))
    })?;
    let render = extension_version(conn, render::X11_EXTENSION_NAME, |conn| {
        let reply = conn.render_query_version(0, 11)?.reply()?;
        Ok((reply.major_version, reply.minor_version))
    })?;

    Ok(Capabilities {
        xfixes,
        composite,
        res,
        render,
    })
}

impl<S: WaylandSurface + 'static> X11Wm<S> {
    /// Start a new window manager for a given Xwayland connection
    ///
    /// ## Arguments
    /// - `handle` is an eventloop handle used to queue up and handle incoming X11 events
    /// - `connection` is the corresponding x11 client connection of the Xwayland instance
    /// - `config` is the configuration for the lifetime of this window manager
    ///
    /// Windows already existing on the X server are registered right away without any
    /// notification; they are available through [`X11Wm::windows`].
    pub fn start_wm<D>(handle: LoopHandle<'static, D>, connection: UnixStream, config: XwmConfig) -> Result<Self, XwmError>
    where
        D: XwmHandler<Surface = S> + 'static,
    {
        // Create an X11 connection. XWayland only uses screen 0.
        let screen = 0;
        let (stream, _) = DefaultStream::from_unix_stream(connection)?;
        let conn = RustConnection::connect_to_stream(stream, screen)?;
        let atoms = Atoms::new(&conn)?.reply()?;
        let capabilities = query_capabilities(&conn)?;
        debug!(?capabilities, "X11 extensions");

        let screen = conn.setup().roots[0].clone();

        // Actually become the WM by redirecting some operations
        conn.change_window_attributes(
            screen.root,
            &ChangeWindowAttributesAux::default().event_mask(
                EventMask::SUBSTRUCTURE_REDIRECT
                    | EventMask::SUBSTRUCTURE_NOTIFY
                    | EventMask::PROPERTY_CHANGE
                    | EventMask::FOCUS_CHANGE,
            ),
        )?;

        // Tell XWayland that we are the WM by acquiring the WM_S0 selection. No X11 clients are accepted before this.
        let win = conn.generate_id()?;
        conn.create_window(
            screen.root_depth,
            win,
            screen.root,
            // x, y, width, height, border width
            0,
            0,
            1,
            1,
            0,
            WindowClass::INPUT_OUTPUT,
            x11rb::COPY_FROM_PARENT,
            &Default::default(),
        )?;
        conn.set_selection_owner(win, atoms.WM_S0, CURRENT_TIME)?;
        conn.set_selection_owner(win, atoms._NET_WM_CM_S0, CURRENT_TIME)?;
        conn.composite_redirect_subwindows(screen.root, Redirect::MANUAL)?;

        // Set some EWMH properties
        conn.change_property32(
            PropMode::REPLACE,
            screen.root,
            atoms._NET_SUPPORTED,
            AtomEnum::ATOM,
            &[
                atoms._NET_WM_STATE,
                atoms._NET_WM_STATE_MAXIMIZED_HORZ,
                atoms._NET_WM_STATE_MAXIMIZED_VERT,
                atoms._NET_WM_STATE_HIDDEN,
                atoms._NET_WM_STATE_FULLSCREEN,
                atoms._NET_WM_STATE_MODAL,
                atoms._NET_WM_STATE_FOCUSED,
                atoms._NET_ACTIVE_WINDOW,
                atoms._NET_WM_MOVERESIZE,
                atoms._NET_WM_PING,
                atoms._NET_CLIENT_LIST,
                atoms._NET_CLIENT_LIST_STACKING,
            ],
        )?;
        conn.change_property32(
            PropMode::REPLACE,
            screen.root,
            atoms._NET_CLIENT_LIST,
            AtomEnum::WINDOW,
            &[],
        )?;
        conn.change_property32(
            PropMode::REPLACE,
            screen.root,
            atoms._NET_CLIENT_LIST_STACKING,
            AtomEnum::WINDOW,
            &[],
        )?;
        conn.change_property32(
            PropMode::REPLACE,
            screen.root,
            atoms._NET_ACTIVE_WINDOW,
            AtomEnum::WINDOW,
            &[x11rb::NONE],
        )?;
        conn.change_property32(
            PropMode::REPLACE,
            screen.root,
            atoms._NET_SUPPORTING_WM_CHECK,
            AtomEnum::WINDOW,
            &[win],
        )?;
        conn.change_property32(
            PropMode::REPLACE,
            win,
            atoms._NET_SUPPORTING_WM_CHECK,
            AtomEnum::WINDOW,
            &[win],
        )?;
        conn.change_property8(
            PropMode::REPLACE,
            win,
            atoms._NET_WM_NAME,
            atoms.UTF8_STRING,
            config.wm_name.as_bytes(),
        )?;
        debug!(window = win, "WM Window Id");

        let clipboard = XwmSelection::new(&conn, &screen, &atoms, atoms.CLIPBOARD)?;
        let primary = XwmSelection::new(&conn, &screen, &atoms, atoms.PRIMARY)?;
        let dnd = XwmDnd::new(&conn, &screen, &atoms)?;
        conn.flush()?;

        let conn = Arc::new(conn);
        let source = X11Source::new(Arc::clone(&conn))?;
        let waker = source.waker();

        let id = XwmId(xwm_id::next());
        let mut wm = Self {
            id,
            conn,
            screen,
            atoms,
            capabilities,
            focus: FocusState::new(config.focus_sequence_window),
            config,
            wm_window: win,
            surfaces: SurfaceRegistry::default(),
            client_list: Vec::new(),
            client_list_stacking: Vec::new(),
            clipboard,
            primary,
            dnd,
            xwayland_focused: false,
            flush_gate: FlushGate::new(waker),
            source: None,
        };
        wm.scan_windows()?;

        let loop_handle = handle.clone();
        let token = handle
            .insert_source(source, move |event, _, state: &mut D| match event {
                X11SourceEvent::Event(event) => {
                    state.xwm_state(id).flush_gate.begin_pass();
                    if let Err(err) = handle_event(state, id, &loop_handle, event) {
                        warn!(?id, ?err, "Failed to handle X11 event");
                    }
                }
                X11SourceEvent::Flush => {
                    let xwm = state.xwm_state(id);
                    xwm.flush_gate.end_pass();
                    if let Err(err) = xwm.conn.flush() {
                        warn!(?id, ?err, "Failed to flush X11 connection");
                    }
                }
                X11SourceEvent::Disconnected(err) => {
                    error!(?id, ?err, "X11 connection lost");
                    connection_lost(state, id, &loop_handle);
                }
            })
            .map_err(|err| err.error)?;
        wm.source = Some(SourceRemover(Box::new(move || handle.remove(token))));

        info!(?id, "X11 window manager started");
        Ok(wm)
    }
}

impl<S: WaylandSurface> X11Wm<S> {
    /// Id of this X11 WM
    pub fn id(&self) -> XwmId {
        self.id
    }

    /// Versions of the X extensions in use
    pub fn capabilities(&self) -> Capabilities {
        self.capabilities
    }

    /// The record of a window
    pub fn surface(&self, window: X11Window) -> Option<&X11Surface<S>> {
        self.surfaces.get(window)
    }

    /// All known windows, in creation order
    pub fn windows(&self) -> impl Iterator<Item = &X11Surface<S>> {
        self.surfaces.iter()
    }

    /// Window currently associated with `surface`
    pub fn window_for_surface(&self, surface: &S) -> Option<X11Window> {
        self.surfaces.window_for_surface(surface)
    }

    /// Accepted transient parent of a window
    pub fn transient_for(&self, window: X11Window) -> Option<X11Window> {
        self.surfaces.transient_for(window)
    }

    /// Windows that are transient for `window`
    pub fn transient_children(&self, window: X11Window) -> &[X11Window] {
        self.surfaces.transient_children(window)
    }

    /// The currently focused X11 window
    pub fn focused_window(&self) -> Option<X11Window> {
        self.focus.focused()
    }

    /// Event mask to select on `window` without losing the one needed for managed windows
    pub(super) fn event_mask_for(&self, window: X11Window) -> EventMask {
        if self.surfaces.get(window).is_some() {
            client_event_mask()
        } else {
            EventMask::PROPERTY_CHANGE
        }
    }

    fn flush(&self) -> Result<(), ConnectionError> {
        self.flush_gate.flush(|| self.conn.flush())
    }

    fn is_own_window(&self, window: X11Window) -> bool {
        window == self.wm_window || self.is_selection_window(window) || self.dnd.has_window(window)
    }

    fn scan_windows(&mut self) -> Result<(), ReplyOrIdError> {
        let conn = self.conn.clone();
        let children = conn.query_tree(self.screen.root)?.reply()?.children;
        for window in children {
            if self.is_own_window(window) {
                continue;
            }
            let (Ok(attrs), Ok(geo)) = (
                conn.get_window_attributes(window)?.reply(),
                conn.get_geometry(window)?.reply(),
            ) else {
                debug!(window, "Window vanished during startup scan");
                continue;
            };
            let geometry = Rectangle::from_loc_and_size(
                (i32::from(geo.x), i32::from(geo.y)),
                (i32::from(geo.width), i32::from(geo.height)),
            );
            if self.register_window(window, attrs.override_redirect, geometry)? {
                let mapped = attrs.map_state == MapState::VIEWABLE;
                if let Some(surface) = self.surfaces.get_mut(window) {
                    surface.x11_mapped = mapped;
                }
                if mapped && !attrs.override_redirect {
                    self.client_list.push(window);
                    self.client_list_stacking.push(window);
                }
            }
        }
        self.update_client_lists()?;
        Ok(())
    }

    /// Start tracking a window. Returns `false` if it is already known.
    fn register_window(
        &mut self,
        window: X11Window,
        override_redirect: bool,
        geometry: Rectangle,
    ) -> Result<bool, ReplyOrIdError> {
        if self.surfaces.get(window).is_some() {
            return Ok(false);
        }
        let conn = self.conn.clone();
        let atoms = self.atoms;
        conn.change_window_attributes(window, &ChangeWindowAttributesAux::default().event_mask(client_event_mask()))?;

        let mut surface = X11Surface::new(window, override_redirect, geometry);
        let reader = PropertyReader {
            conn: &conn,
            atoms: &atoms,
            window,
        };
        reader.read_all(&mut surface.properties)?;
        surface.window_types = surface
            .properties
            .window_type
            .iter()
            .filter_map(|atom| WmWindowType::from_atom(*atom, &atoms))
            .collect();

        // state set before mapping is a request like any other
        if let Fetched::Present(initial) = reader.net_state()? {
            let properties = initial
                .into_iter()
                .filter_map(|atom| StateProperty::from_atom(atom, &atoms));
            apply_state_message(&mut surface.state, &mut surface.requested, StateAction::Add, properties);
        }
        if surface
            .properties
            .hints
            .is_some_and(|hints| hints.initial_state == Some(WmInitialState::Iconic))
        {
            surface.requested.minimized = Some(true);
        }

        let parent = surface.properties.transient_for;
        trace!(window, override_redirect, ?geometry, "New X11 window");
        self.surfaces.insert(surface);
        self.update_transient(window, parent);
        Ok(true)
    }

    fn update_transient(&mut self, window: X11Window, parent: Option<X11Window>) {
        match self.surfaces.set_transient_for(window, parent) {
            Ok(()) => {}
            Err(TransientError::Cycle) => {
                warn!(window, ?parent, "Rejecting transient-for relation forming a cycle");
            }
            Err(TransientError::UnknownWindow) => {
                debug!(window, ?parent, "Transient parent is not a known window");
                let _ = self.surfaces.set_transient_for(window, None);
            }
        }
    }

    /// Re-read the full property set of a window
    fn refresh_properties(&mut self, window: X11Window) -> Result<(), ReplyOrIdError> {
        let conn = self.conn.clone();
        let atoms = self.atoms;
        let Some(surface) = self.surfaces.get_mut(window) else {
            return Ok(());
        };
        PropertyReader {
            conn: &conn,
            atoms: &atoms,
            window,
        }
        .read_all(&mut surface.properties)?;
        surface.window_types = surface
            .properties
            .window_type
            .iter()
            .filter_map(|atom| WmWindowType::from_atom(*atom, &atoms))
            .collect();
        let parent = surface.properties.transient_for;
        self.update_transient(window, parent);
        Ok(())
    }

    fn update_client_lists(&self) -> Result<(), ConnectionError> {
        self.conn.change_property32(
            PropMode::REPLACE,
            self.screen.root,
            self.atoms._NET_CLIENT_LIST,
            AtomEnum::WINDOW,
            &self.client_list,
        )?;
        self.conn.change_property32(
            PropMode::REPLACE,
            self.screen.root,
            self.atoms._NET_CLIENT_LIST_STACKING,
            AtomEnum::WINDOW,
            &self.client_list_stacking,
        )?;
        Ok(())
    }

    fn write_net_state(&self, window: X11Window) -> Result<(), ConnectionError> {
        let Some(surface) = self.surfaces.get(window) else {
            return Ok(());
        };
        let focused = self.focus.focused() == Some(window);
        let atoms = net_state_properties(surface.state, focused)
            .into_iter()
            .map(|property| property.atom(&self.atoms))
            .collect::<SmallVec<[Atom; 6]>>();
        self.conn.change_property32(
            PropMode::REPLACE,
            window,
            self.atoms._NET_WM_STATE,
            AtomEnum::ATOM,
            &atoms,
        )?;
        Ok(())
    }

    fn write_wm_state(&self, window: X11Window, state: WindowState) -> Result<(), ConnectionError> {
        self.conn.change_property32(
            PropMode::REPLACE,
            window,
            self.atoms.WM_STATE,
            self.atoms.WM_STATE,
            &[wm_state_value(state), x11rb::NONE],
        )?;
        Ok(())
    }

    /// Focus is relative, so every managed window gets its state rewritten
    fn broadcast_net_state(&self) -> Result<(), ConnectionError> {
        for surface in self.surfaces.iter().filter(|s| s.is_managed_and_mapped()) {
            self.write_net_state(surface.window)?;
        }
        Ok(())
    }

    fn send_input_focus(&mut self, window: Option<X11Window>) -> Result<(), ConnectionError> {
        let sequence = self
            .conn
            .set_input_focus(InputFocus::POINTER_ROOT, window.unwrap_or(x11rb::NONE), CURRENT_TIME)?
            .sequence_number();
        self.focus.record_request(sequence);
        Ok(())
    }

    fn send_synthetic_configure(&self, window: X11Window, geometry: Rectangle) -> Result<(), ConnectionError> {
        let event = ConfigureNotifyEvent {
            response_type: CONFIGURE_NOTIFY_EVENT,
            sequence: 0,
            event: window,
            window,
            above_sibling: x11rb::NONE,
            x: geometry.loc.x as i16,
            y: geometry.loc.y as i16,
            width: geometry.size.w as u16,
            height: geometry.size.h as u16,
            border_width: 0,
            override_redirect: false,
        };
        self.conn
            .send_event(false, window, EventMask::STRUCTURE_NOTIFY, event)?;
        Ok(())
    }

    fn managed_mut(&mut self, window: X11Window) -> Result<&mut X11Surface<S>, X11SurfaceError> {
        let surface = self
            .surfaces
            .get_mut(window)
            .ok_or(X11SurfaceError::UnknownWindow(window))?;
        if surface.override_redirect {
            return Err(X11SurfaceError::UnsupportedForOverrideRedirect);
        }
        Ok(surface)
    }

    fn run_actions(&mut self, actions: &[WmAction]) -> Result<(), ConnectionError> {
        let conn = self.conn.clone();
        for action in actions {
            match *action {
                WmAction::WriteNetState(window) => self.write_net_state(window)?,
                WmAction::BroadcastNetState => self.broadcast_net_state()?,
                WmAction::WriteWmState(window) => {
                    if let Some(state) = self.surfaces.get(window).map(|s| s.state) {
                        self.write_wm_state(window, state)?;
                    }
                }
                WmAction::SetActiveWindow(window) => {
                    conn.change_property32(
                        PropMode::REPLACE,
                        self.screen.root,
                        self.atoms._NET_ACTIVE_WINDOW,
                        AtomEnum::WINDOW,
                        &[window.unwrap_or(x11rb::NONE)],
                    )?;
                }
                WmAction::SetInputFocus(window) => self.send_input_focus(window)?,
                WmAction::TakeFocus { window, track } => {
                    let event = ClientMessageEvent::new(
                        32,
                        window,
                        self.atoms.WM_PROTOCOLS,
                        [self.atoms.WM_TAKE_FOCUS, CURRENT_TIME, 0, 0, 0],
                    );
                    let sequence = conn
                        .send_event(false, window, EventMask::NO_EVENT, event)?
                        .sequence_number();
                    if track {
                        self.focus.record_request(sequence);
                    }
                }
                WmAction::Resize(window, size) => {
                    conn.configure_window(
                        window,
                        &ConfigureWindowAux::new().width(size.w as u32).height(size.h as u32),
                    )?;
                }
                WmAction::Raise(window) => {
                    conn.configure_window(window, &ConfigureWindowAux::new().stack_mode(StackMode::ABOVE))?;
                    self.client_list_stacking.retain(|w| *w != window);
                    self.client_list_stacking.push(window);
                }
                WmAction::Map(window) => {
                    conn.map_window(window)?;
                }
                WmAction::StateChanged(_) => {}
            }
        }
        Ok(())
    }

    /// Send a configure to a window, moving and resizing it.
    ///
    /// The client is always sent a synthetic `ConfigureNotify`, even if nothing changed.
    pub fn configure(&mut self, window: X11Window, geometry: Rectangle) -> Result<(), X11SurfaceError> {
        let conn = self.conn.clone();
        let surface = self.managed_mut(window)?;
        let aux = ConfigureWindowAux::default()
            .x(geometry.loc.x)
            .y(geometry.loc.y)
            .width(geometry.size.w.max(1) as u32)
            .height(geometry.size.h.max(1) as u32)
            .border_width(0);
        conn.configure_window(window, &aux)?;
        surface.geometry = geometry;
        self.send_synthetic_configure(window, geometry)?;
        self.flush()?;
        Ok(())
    }

    /// Activate or deactivate a window.
    ///
    /// Depending on the input model of the window this sets the X input focus, sends
    /// `WM_TAKE_FOCUS`, or both. Windows that accept no input at all are left unfocused.
    pub fn activate(&mut self, window: X11Window, activated: bool) -> Result<(), X11SurfaceError> {
        let mode = self.managed_mut(window)?.input_mode();
        let actions = activation_actions(window, mode, activated, &mut self.focus);
        if actions.is_empty() {
            return Ok(());
        }
        debug!(window, activated, "Window activation");
        self.run_actions(&actions)?;
        self.flush()?;
        Ok(())
    }

    fn set_state(&mut self, window: X11Window, flags: WindowState, value: bool) -> Result<(), X11SurfaceError> {
        let focused = self.focus.focused() == Some(window);
        let actions = acknowledge_state(self.managed_mut(window)?, focused, flags, value);
        self.run_actions(&actions)?;
        self.flush()?;
        Ok(())
    }

    /// Confirm the fullscreen state of a window
    pub fn set_fullscreen(&mut self, window: X11Window, fullscreen: bool) -> Result<(), X11SurfaceError> {
        self.set_state(window, WindowState::FULLSCREEN, fullscreen)
    }

    /// Confirm the maximized state of a window
    pub fn set_maximized(&mut self, window: X11Window, maximized: bool) -> Result<(), X11SurfaceError> {
        self.set_state(
            window,
            WindowState::MAXIMIZED_VERT | WindowState::MAXIMIZED_HORZ,
            maximized,
        )
    }

    /// Confirm the minimized state of a window
    pub fn set_minimized(&mut self, window: X11Window, minimized: bool) -> Result<(), X11SurfaceError> {
        self.set_state(window, WindowState::MINIMIZED, minimized)
    }

    /// Take the state changes the client requested since the last call
    pub fn take_requested_state(&mut self, window: X11Window) -> Option<RequestedState> {
        self.surfaces
            .get_mut(window)
            .map(|surface| std::mem::take(&mut surface.requested))
    }

    /// Raises a window in the internal X11 state
    ///
    /// Needs to be called to match raising of windows inside the compositor to keep the stacking order
    /// in sync with the compositor to avoid erroneous behavior.
    pub fn raise_window(&mut self, window: X11Window) -> Result<(), ConnectionError> {
        if self.surfaces.get(window).is_none() {
            return Ok(());
        }
        let conn = self.conn.clone();
        {
            let _guard = scopeguard::guard((), |_| {
                let _ = conn.ungrab_server();
            });
            conn.grab_server()?;
            conn.configure_window(window, &ConfigureWindowAux::new().stack_mode(StackMode::ABOVE))?;
            if self.client_list_stacking.contains(&window) {
                self.client_list_stacking.retain(|w| *w != window);
                self.client_list_stacking.push(window);
                conn.change_property32(
                    PropMode::REPLACE,
                    self.screen.root,
                    self.atoms._NET_CLIENT_LIST_STACKING,
                    AtomEnum::WINDOW,
                    &self.client_list_stacking,
                )?;
            }
        }
        self.flush()
    }

    /// Ask a window to close.
    ///
    /// Uses `WM_DELETE_WINDOW` if the client supports it, otherwise the client is killed.
    pub fn close(&mut self, window: X11Window) -> Result<(), X11SurfaceError> {
        let surface = self
            .surfaces
            .get(window)
            .ok_or(X11SurfaceError::UnknownWindow(window))?;
        if surface.properties.protocols.contains(&WmProtocol::DeleteWindow) {
            let event = ClientMessageEvent::new(
                32,
                window,
                self.atoms.WM_PROTOCOLS,
                [self.atoms.WM_DELETE_WINDOW, CURRENT_TIME, 0, 0, 0],
            );
            self.conn.send_event(false, window, EventMask::NO_EVENT, event)?;
        } else {
            debug!(window, "Window does not support WM_DELETE_WINDOW, killing client");
            self.conn.kill_client(window)?;
        }
        self.flush()?;
        Ok(())
    }

    /// Send a `_NET_WM_PING` to a window.
    ///
    /// The answer is reported through [`XwmHandler::ping_response`].
    pub fn ping(&mut self, window: X11Window, timestamp: u32) -> Result<(), X11SurfaceError> {
        let conn = self.conn.clone();
        let atoms = self.atoms;
        let surface = self
            .surfaces
            .get_mut(window)
            .ok_or(X11SurfaceError::UnknownWindow(window))?;
        if !surface.properties.protocols.contains(&WmProtocol::Ping) {
            return Err(X11SurfaceError::UnsupportedProtocol);
        }
        let event = ClientMessageEvent::new(
            32,
            window,
            atoms.WM_PROTOCOLS,
            [atoms._NET_WM_PING, timestamp, window, 0, 0],
        );
        conn.send_event(false, window, EventMask::NO_EVENT, event)?;
        surface.pending_ping = Some(timestamp);
        self.flush()?;
        Ok(())
    }

    /// A new wayland surface was created by the Xwayland client.
    ///
    /// Completes a `WL_SURFACE_ID` association that arrived before the surface.
    pub fn new_wl_surface<D>(state: &mut D, xwm: XwmId, surface: S) -> Result<(), ReplyOrIdError>
    where
        D: XwmHandler<Surface = S>,
    {
        let association = state.xwm_state(xwm).surfaces.surface_created(surface);
        association_result(state, xwm, association)
    }

    /// An `xwayland_surface_v1` object set the serial of its surface.
    pub fn new_shell_surface<D>(state: &mut D, xwm: XwmId, serial: u64, surface: S) -> Result<(), ReplyOrIdError>
    where
        D: XwmHandler<Surface = S>,
    {
        let association = state.xwm_state(xwm).surfaces.shell_serial(serial, surface);
        association_result(state, xwm, association)
    }

    /// Needs to be called on every commit of a surface of the Xwayland client
    pub fn commit_hook<D>(state: &mut D, xwm: XwmId, surface: &S, has_buffer: bool)
    where
        D: XwmHandler<Surface = S>,
    {
        let Some(commit) = state.xwm_state(xwm).surfaces.commit(surface, has_buffer) else {
            return;
        };
        match commit.map_change {
            Some(MapChange::Mapped) => state.mapped_window(xwm, commit.window),
            Some(MapChange::Unmapped) => state.unmapped_window(xwm, commit.window),
            None => {}
        }
        state.committed_window(xwm, commit.window);
    }

    /// Needs to be called when a surface of the Xwayland client is destroyed
    pub fn surface_destroyed<D>(state: &mut D, xwm: XwmId, surface: &S)
    where
        D: XwmHandler<Surface = S>,
    {
        if let Some((window, dissociation)) = state.xwm_state(xwm).surfaces.surface_destroyed(surface) {
            dissociated(state, xwm, window, dissociation);
        }
    }

    /// Stop managing windows.
    ///
    /// Removes the X11 event source and every pending selection transfer from the event loop,
    /// and hands each remaining record to [`XwmHandler::destroyed_window`]. The [`X11Wm`] can be
    /// dropped afterwards. Dropping it without calling this only removes the event source, no
    /// window is reported.
    pub fn shutdown<D>(state: &mut D, xwm: XwmId, loop_handle: &LoopHandle<'_, D>)
    where
        D: XwmHandler<Surface = S>,
    {
        if let Some(SourceRemover(remove)) = state.xwm_state(xwm).source.take() {
            remove();
        }
        teardown(state, xwm, loop_handle);
        info!(?xwm, "X11 window manager stopped");
    }
}

/// Effect of an event or a compositor call, carried out by [`X11Wm::run_actions`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum WmAction {
    WriteNetState(X11Window),
    /// Rewrite `_NET_WM_STATE` of every mapped managed window
    BroadcastNetState,
    WriteWmState(X11Window),
    SetActiveWindow(Option<X11Window>),
    SetInputFocus(Option<X11Window>),
    /// Send `WM_TAKE_FOCUS`, `track` makes the focus tracker wait for the resulting focus change
    TakeFocus {
        window: X11Window,
        track: bool,
    },
    Resize(X11Window, Size),
    /// Restack to the top
    Raise(X11Window),
    Map(X11Window),
    /// Report to the compositor, nothing is sent to the X server
    StateChanged(X11Window),
}

type WmActions = SmallVec<[WmAction; 6]>;

fn activation_actions(window: X11Window, mode: InputMode, activated: bool, focus: &mut FocusState) -> WmActions {
    let mut actions = WmActions::new();
    if !activated {
        if focus.focused() == Some(window) {
            focus.set_focused(None);
            actions.extend([
                WmAction::SetActiveWindow(None),
                WmAction::SetInputFocus(None),
                WmAction::BroadcastNetState,
            ]);
        }
        return actions;
    }
    if !mode.accepts_focus() {
        debug!(window, "Window takes no input, not focusing");
        return actions;
    }

    actions.push(WmAction::SetActiveWindow(Some(window)));
    if mode.set_input_focus() {
        actions.push(WmAction::SetInputFocus(Some(window)));
    }
    if mode.take_focus() {
        actions.push(WmAction::TakeFocus {
            window,
            track: !mode.set_input_focus(),
        });
    }
    focus.set_focused(Some(window));
    actions.push(WmAction::BroadcastNetState);
    actions
}

// the compositor confirmed `flags`, the matching requests are settled
fn acknowledge_state<S: WaylandSurface>(
    surface: &mut X11Surface<S>,
    focused: bool,
    flags: WindowState,
    value: bool,
) -> WmActions {
    let was_fullscreen = surface.state.contains(WindowState::FULLSCREEN);
    surface.state.set(flags, value);
    if flags.contains(WindowState::FULLSCREEN) {
        surface.requested.fullscreen = None;
    }
    if flags.contains(WindowState::MAXIMIZED_VERT) {
        surface.requested.maximized_vert = None;
    }
    if flags.contains(WindowState::MAXIMIZED_HORZ) {
        surface.requested.maximized_horz = None;
    }
    if flags.contains(WindowState::MINIMIZED) {
        surface.requested.minimized = None;
    }

    let mut actions = WmActions::new();
    let leaving_fullscreen = was_fullscreen && !surface.state.contains(WindowState::FULLSCREEN);
    if leaving_fullscreen && focused {
        // some toolkits expect the full state again after leaving fullscreen
        actions.push(WmAction::BroadcastNetState);
    } else {
        actions.push(WmAction::WriteNetState(surface.window));
    }
    if flags.contains(WindowState::MINIMIZED) {
        actions.push(WmAction::WriteWmState(surface.window));
    }
    actions
}

fn client_state_message<S: WaylandSurface>(
    surface: &mut X11Surface<S>,
    action: StateAction,
    properties: impl IntoIterator<Item = StateProperty>,
) -> WmActions {
    let mut actions = WmActions::new();
    let modal = surface.state.contains(WindowState::MODAL);
    if !apply_state_message(&mut surface.state, &mut surface.requested, action, properties) {
        return actions;
    }
    // modality is owned by the client and confirmed right away
    if surface.state.contains(WindowState::MODAL) != modal {
        actions.push(WmAction::WriteNetState(surface.window));
    }
    actions.push(WmAction::StateChanged(surface.window));
    actions
}

fn focus_in_actions(verdict: FocusInVerdict, focus: &mut FocusState) -> WmActions {
    let mut actions = WmActions::new();
    match verdict {
        FocusInVerdict::Ignore => {}
        FocusInVerdict::Accept(window) => {
            trace!(window, "Focus moved within the focused client");
            if focus.set_focused(Some(window)) {
                actions.push(WmAction::SetActiveWindow(Some(window)));
                actions.push(WmAction::BroadcastNetState);
            }
        }
        FocusInVerdict::Reassert(window) => actions.push(WmAction::SetInputFocus(window)),
    }
    actions
}

fn map_request_actions<S: WaylandSurface>(surface: &mut X11Surface<S>, min_size: Size, fallback: Size) -> WmActions {
    let window = surface.window;
    let mut actions = WmActions::new();
    if let Some(size) = coerced_size(surface.geometry.size, surface.properties.size_hints, min_size, fallback) {
        debug!(window, ?size, "Resizing tiny window before mapping");
        surface.geometry.size = size;
        actions.push(WmAction::Resize(window, size));
    }
    surface.state.remove(WindowState::WITHDRAWN);
    actions.extend([
        WmAction::Raise(window),
        WmAction::WriteWmState(window),
        WmAction::WriteNetState(window),
        WmAction::Map(window),
    ]);
    actions
}

fn association_result<D: XwmHandler>(state: &mut D, id: XwmId, association: Association) -> Result<(), ReplyOrIdError> {
    match association {
        Association::Associated(window) => {
            let xwm = state.xwm_state(id);
            xwm.refresh_properties(window)?;
            xwm.flush()?;
            state.wl_surface_changed(id, window);
        }
        Association::Pending => trace!("Surface association pending"),
        Association::Rejected(err) => warn!(?err, "Surface association rejected"),
    }
    Ok(())
}

fn dissociated<D: XwmHandler>(state: &mut D, id: XwmId, window: X11Window, dissociation: Dissociation) {
    if dissociation.unmapped {
        state.unmapped_window(id, window);
    }
    if dissociation.cleared {
        state.wl_surface_changed(id, window);
    }
}

fn connection_lost<D: XwmHandler>(state: &mut D, id: XwmId, loop_handle: &LoopHandle<'_, D>) {
    // the source removes itself after reporting the loss
    state.xwm_state(id).source = None;
    teardown(state, id, loop_handle);
    state.disconnected(id);
}

fn teardown<D: XwmHandler>(state: &mut D, id: XwmId, loop_handle: &LoopHandle<'_, D>) {
    let xwm = state.xwm_state(id);
    for slot in [
        selection::SelectionSlot::Clipboard,
        selection::SelectionSlot::Primary,
        selection::SelectionSlot::Dnd,
    ] {
        xwm.selection_mut(slot).discard_transfers(loop_handle);
    }
    xwm.flush_gate.end_pass();
    xwm.focus.set_focused(None);
    xwm.client_list.clear();
    xwm.client_list_stacking.clear();

    for surface in xwm.surfaces.clear() {
        state.destroyed_window(id, surface);
    }
}

fn handle_event<D: XwmHandler>(
    state: &mut D,
    id: XwmId,
    loop_handle: &LoopHandle<'static, D>,
    event: Event,
) -> Result<(), ReplyOrIdError> {
    if selection::handle_event(state, id, loop_handle, &event)? {
        return Ok(());
    }

    let xwm = state.xwm_state(id);
    let conn = xwm.conn.clone();
    let atoms = xwm.atoms;

    match event {
        Event::CreateNotify(n) => {
            trace!(window = n.window, "X11 Window created");
            if n.parent != xwm.screen.root || xwm.is_own_window(n.window) {
                return Ok(());
            }
            let geometry = Rectangle::from_loc_and_size(
                (i32::from(n.x), i32::from(n.y)),
                (i32::from(n.width), i32::from(n.height)),
            );
            if !xwm.register_window(n.window, n.override_redirect, geometry)? {
                return Ok(());
            }
            if n.override_redirect {
                state.new_override_redirect_window(id, n.window);
            } else {
                state.new_window(id, n.window);
            }
        }
        Event::MapRequest(r) => {
            let min_size = xwm.config.min_size;
            let fallback = xwm.config.fallback_size;
            // some clients set these racily close to the map request
            xwm.refresh_properties(r.window)?;
            let Some(surface) = xwm.surfaces.get_mut(r.window) else {
                debug!(window = r.window, "Map request for unknown window");
                conn.map_window(r.window)?;
                return Ok(());
            };

            let actions = map_request_actions(surface, min_size, fallback);
            xwm.run_actions(&actions)?;
            trace!(window = r.window, "Mapped on request");
        }
        Event::MapNotify(n) => {
            trace!(window = n.window, "X11 Window mapped");
            let Some(surface) = xwm.surfaces.get_mut(n.window) else {
                return Ok(());
            };
            surface.x11_mapped = true;
            if !surface.override_redirect {
                if !xwm.client_list.contains(&n.window) {
                    xwm.client_list.push(n.window);
                }
                if !xwm.client_list_stacking.contains(&n.window) {
                    xwm.client_list_stacking.push(n.window);
                }
                xwm.update_client_lists()?;
            }
        }
        Event::UnmapNotify(n) => {
            trace!(window = n.window, "X11 Window unmapped");
            let Some(surface) = xwm.surfaces.get_mut(n.window) else {
                return Ok(());
            };
            surface.x11_mapped = false;
            let override_redirect = surface.override_redirect;
            if !override_redirect {
                surface.state.insert(WindowState::WITHDRAWN);
                let state_now = surface.state;

                xwm.client_list.retain(|w| *w != n.window);
                xwm.client_list_stacking.retain(|w| *w != n.window);
                {
                    let _guard = scopeguard::guard((), |_| {
                        let _ = conn.ungrab_server();
                    });
                    conn.grab_server()?;
                    // the window may be gone already, errors arrive asynchronously
                    xwm.write_wm_state(n.window, state_now)?;
                    conn.delete_property(n.window, atoms._NET_WM_STATE)?;
                }
                xwm.update_client_lists()?;
            }
            if xwm.focus.forget(n.window) {
                debug!(window = n.window, "Focused window unmapped");
            }

            let dissociation = xwm.surfaces.dissociate(n.window);
            dissociated(state, id, n.window, dissociation);
        }
        Event::DestroyNotify(n) => {
            trace!(window = n.window, "X11 Window destroyed");
            xwm.selection_requestor_destroyed(n.window, loop_handle);
            xwm.focus.forget(n.window);
            let Some(surface) = xwm.surfaces.remove(n.window) else {
                return Ok(());
            };
            if xwm.client_list.contains(&n.window) || xwm.client_list_stacking.contains(&n.window) {
                xwm.client_list.retain(|w| *w != n.window);
                xwm.client_list_stacking.retain(|w| *w != n.window);
                xwm.update_client_lists()?;
            }
            if surface.mapped {
                state.unmapped_window(id, n.window);
            }
            state.destroyed_window(id, surface);
        }
        Event::ConfigureRequest(r) => {
            let Some(surface) = xwm.surfaces.get(r.window) else {
                return Ok(());
            };
            let geometry = surface.geometry;
            // Pass the request to downstream to decide
            state.configure_request(id, r.window, ConfigureRequest::from_event(&r));
            // Synthetic event, the compositor configures the window if it agrees
            let xwm = state.xwm_state(id);
            let geometry = xwm.surfaces.get(r.window).map_or(geometry, |s| s.geometry);
            xwm.send_synthetic_configure(r.window, geometry)?;
        }
        Event::ConfigureNotify(n) => {
            let Some(surface) = xwm.surfaces.get_mut(n.window) else {
                return Ok(());
            };
            let geometry = Rectangle::from_loc_and_size(
                (i32::from(n.x), i32::from(n.y)),
                (i32::from(n.width), i32::from(n.height)),
            );
            if surface.geometry == geometry {
                return Ok(());
            }
            trace!(window = n.window, ?geometry, "X11 Window configured");
            surface.geometry = geometry;
            let above = Some(n.above_sibling).filter(|w| *w != x11rb::NONE);
            state.geometry_changed(id, n.window, geometry, above);
        }
        Event::PropertyNotify(n) => {
            let Some(property) = property_for_atom(n.atom, &atoms) else {
                return Ok(());
            };
            let Some(surface) = xwm.surfaces.get_mut(n.window) else {
                return Ok(());
            };
            PropertyReader {
                conn: &conn,
                atoms: &atoms,
                window: n.window,
            }
            .read(property, &mut surface.properties)?;
            match property {
                WmWindowProperty::WindowType => {
                    surface.window_types = surface
                        .properties
                        .window_type
                        .iter()
                        .filter_map(|atom| WmWindowType::from_atom(*atom, &atoms))
                        .collect();
                }
                WmWindowProperty::TransientFor => {
                    let parent = surface.properties.transient_for;
                    xwm.update_transient(n.window, parent);
                }
                _ => {}
            }
            state.metadata_changed(id, n.window, property);
        }
        Event::FocusIn(e) => {
            if xwm.surfaces.get(e.event).is_none() {
                return Ok(());
            }
            let verdict = xwm.focus.judge_focus_in(e.event, e.sequence, e.mode, e.detail, |window| {
                xwm.surfaces.get(window).and_then(|s| s.properties.pid)
            });
            if let FocusInVerdict::Reassert(window) = verdict {
                debug!(stolen_by = e.event, ?window, "Rejecting focus change, re-asserting focus");
            }
            let actions = focus_in_actions(verdict, &mut xwm.focus);
            xwm.run_actions(&actions)?;
        }
        Event::ClientMessage(msg) => {
            if xwm.dnd.proxy == Some(msg.window) && dnd::handle_client_message(state, id, msg.type_, msg.data)? {
                return Ok(());
            }

            let xwm = state.xwm_state(id);
            let data = msg.data.as_data32();
            match msg.type_ {
                x if x == atoms.WL_SURFACE_ID => {
                    let protocol_id = data[0];
                    debug!(window = msg.window, protocol_id, "Got WL_SURFACE_ID");
                    let resolved = state.lookup_surface(id, protocol_id);
                    let association = state
                        .xwm_state(id)
                        .surfaces
                        .surface_id_message(msg.window, protocol_id, resolved);
                    association_result(state, id, association)?;
                }
                x if x == atoms.WL_SURFACE_SERIAL => {
                    let serial = u64::from(data[0]) | (u64::from(data[1]) << 32);
                    debug!(window = msg.window, serial, "Got WL_SURFACE_SERIAL");
                    let association = xwm.surfaces.surface_serial_message(msg.window, serial);
                    association_result(state, id, association)?;
                }
                x if x == atoms._NET_WM_STATE => {
                    let Some(action) = StateAction::from_wire(data[0]) else {
                        warn!(window = msg.window, action = data[0], "Unknown _NET_WM_STATE action");
                        return Ok(());
                    };
                    let Some(surface) = xwm.surfaces.get_mut(msg.window) else {
                        return Ok(());
                    };
                    let properties = [data[1], data[2]]
                        .into_iter()
                        .filter_map(|atom| StateProperty::from_atom(atom, &atoms));
                    let actions = client_state_message(surface, action, properties);
                    xwm.run_actions(&actions)?;
                    if actions.contains(&WmAction::StateChanged(msg.window)) {
                        state.state_changed(id, msg.window);
                    }
                }
                x if x == atoms.WM_CHANGE_STATE => {
                    let Some(surface) = xwm.surfaces.get_mut(msg.window) else {
                        return Ok(());
                    };
                    match data[0] {
                        ICONIC_STATE => surface.requested.minimized = Some(true),
                        NORMAL_STATE => surface.requested.minimized = Some(false),
                        value => {
                            debug!(window = msg.window, value, "Ignoring WM_CHANGE_STATE");
                            return Ok(());
                        }
                    }
                    state.state_changed(id, msg.window);
                }
                x if x == atoms._NET_ACTIVE_WINDOW => {
                    if xwm.surfaces.get(msg.window).is_some() {
                        state.activate_request(id, msg.window);
                    }
                }
                x if x == atoms._NET_WM_MOVERESIZE => {
                    if xwm.surfaces.get(msg.window).is_none() {
                        return Ok(());
                    }
                    let button = data[3];
                    match MoveResize::from_direction(data[2]) {
                        Some(MoveResize::Move) => state.move_request(id, msg.window, button),
                        Some(MoveResize::Resize(edge)) => state.resize_request(id, msg.window, button, edge),
                        None => debug!(window = msg.window, direction = data[2], "Unsupported move/resize"),
                    }
                }
                x if x == atoms.WM_PROTOCOLS && data[0] == atoms._NET_WM_PING => {
                    let (timestamp, window) = (data[1], data[2]);
                    let Some(surface) = xwm.surfaces.get_mut(window) else {
                        return Ok(());
                    };
                    if surface.pending_ping == Some(timestamp) {
                        surface.pending_ping = None;
                        state.ping_response(id, window, timestamp);
                    } else {
                        trace!(window, timestamp, "Stale ping response");
                    }
                }
                x => {
                    debug!(window = msg.window, atom = x, "Unhandled client message");
                }
            }
        }
        _ => {}
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use x11rb::protocol::xproto::{ConfigWindow, ConfigureRequestEvent, StackMode, CONFIGURE_REQUEST_EVENT};

    use super::*;
    use crate::xwayland::xwm::test_support::TestSurface;

    fn window(id: X11Window, size: (i32, i32)) -> X11Surface<TestSurface> {
        X11Surface::new(id, false, Rectangle::from_loc_and_size((0, 0), size))
    }

    fn request(mask: ConfigWindow, stack_mode: StackMode) -> ConfigureRequestEvent {
        ConfigureRequestEvent {
            response_type: CONFIGURE_REQUEST_EVENT,
            stack_mode,
            sequence: 0,
            parent: 1,
            window: 2,
            sibling: 3,
            x: -10,
            y: 20,
            width: 300,
            height: 200,
            border_width: 0,
            value_mask: mask.into(),
        }
    }

    #[test]
    fn configure_request_only_carries_masked_fields() {
        let req = ConfigureRequest::from_event(&request(ConfigWindow::X | ConfigWindow::WIDTH, StackMode::ABOVE));
        assert_eq!(
            req,
            ConfigureRequest {
                x: Some(-10),
                y: None,
                width: Some(300),
                height: None,
                reorder: None,
            }
        );
    }

    #[test]
    fn configure_request_restacking() {
        let top = ConfigureRequest::from_event(&request(ConfigWindow::STACK_MODE, StackMode::ABOVE));
        assert_eq!(top.reorder, Some(Reorder::Top));

        let below = ConfigureRequest::from_event(&request(
            ConfigWindow::STACK_MODE | ConfigWindow::SIBLING,
            StackMode::BELOW,
        ));
        assert_eq!(below.reorder, Some(Reorder::Below(3)));

        let opposite = ConfigureRequest::from_event(&request(ConfigWindow::STACK_MODE, StackMode::OPPOSITE));
        assert_eq!(opposite.reorder, None);
    }

    #[test]
    fn move_resize_directions() {
        assert_eq!(
            MoveResize::from_direction(0),
            Some(MoveResize::Resize(ResizeEdge::TopLeft))
        );
        assert_eq!(
            MoveResize::from_direction(7),
            Some(MoveResize::Resize(ResizeEdge::Left))
        );
        assert_eq!(MoveResize::from_direction(8), Some(MoveResize::Move));
        // keyboard driven variants and cancel
        for direction in 9..=11 {
            assert_eq!(MoveResize::from_direction(direction), None);
        }
    }

    #[test]
    fn default_config() {
        let config = XwmConfig::default();
        assert_eq!(config.fallback_size, Size::from((640, 480)));
        assert_eq!(config.focus_sequence_window, FOCUS_SEQUENCE_WINDOW);
        assert!(config.incr_chunk_size > 0);
    }

    #[test]
    fn state_request_is_reported_once_and_left_unconfirmed() {
        let mut surface = window(5, (800, 600));
        let actions = client_state_message(&mut surface, StateAction::Add, [StateProperty::Fullscreen]);

        assert_eq!(actions.as_slice(), &[WmAction::StateChanged(5)]);
        assert!(!surface.state.contains(WindowState::FULLSCREEN));
        assert_eq!(surface.requested.fullscreen, Some(true));
    }

    #[test]
    fn modal_request_is_written_back() {
        let mut surface = window(5, (800, 600));
        let actions = client_state_message(&mut surface, StateAction::Toggle, [StateProperty::Modal]);

        assert_eq!(
            actions.as_slice(),
            &[WmAction::WriteNetState(5), WmAction::StateChanged(5)]
        );
        assert!(surface.state.contains(WindowState::MODAL));
    }

    #[test]
    fn focus_only_state_request_is_dropped() {
        let mut surface = window(5, (800, 600));
        let actions = client_state_message(&mut surface, StateAction::Add, [StateProperty::Focused]);
        assert!(actions.is_empty());
    }

    #[test]
    fn acknowledged_state_is_written() {
        let mut surface = window(5, (800, 600));
        client_state_message(&mut surface, StateAction::Add, [StateProperty::Fullscreen]);

        let actions = acknowledge_state(&mut surface, false, WindowState::FULLSCREEN, true);
        assert_eq!(actions.as_slice(), &[WmAction::WriteNetState(5)]);
        assert!(surface.state.contains(WindowState::FULLSCREEN));
        assert_eq!(surface.requested.fullscreen, None);
    }

    #[test]
    fn leaving_fullscreen_while_focused_rebroadcasts() {
        let mut surface = window(5, (800, 600));
        surface.state.insert(WindowState::FULLSCREEN);
        let actions = acknowledge_state(&mut surface, true, WindowState::FULLSCREEN, false);
        assert_eq!(actions.as_slice(), &[WmAction::BroadcastNetState]);

        let actions = acknowledge_state(&mut surface, true, WindowState::MINIMIZED, true);
        assert_eq!(
            actions.as_slice(),
            &[WmAction::WriteNetState(5), WmAction::WriteWmState(5)]
        );
    }

    #[test]
    fn accepted_focus_in_is_published() {
        let mut focus = FocusState::default();
        focus.set_focused(Some(1));

        let actions = focus_in_actions(FocusInVerdict::Accept(2), &mut focus);
        assert_eq!(
            actions.as_slice(),
            &[WmAction::SetActiveWindow(Some(2)), WmAction::BroadcastNetState]
        );
        assert_eq!(focus.focused(), Some(2));

        // already published
        assert!(focus_in_actions(FocusInVerdict::Accept(2), &mut focus).is_empty());
    }

    #[test]
    fn stolen_focus_is_reasserted() {
        let mut focus = FocusState::default();
        focus.set_focused(Some(1));

        let actions = focus_in_actions(FocusInVerdict::Reassert(Some(1)), &mut focus);
        assert_eq!(actions.as_slice(), &[WmAction::SetInputFocus(Some(1))]);
        assert_eq!(focus.focused(), Some(1));
        assert!(focus_in_actions(FocusInVerdict::Ignore, &mut focus).is_empty());
    }

    #[test]
    fn tiny_window_is_resized_then_raised_and_mapped() {
        let mut surface = window(9, (1, 1));
        let fallback = Size::from((640, 480));
        let actions = map_request_actions(&mut surface, Size::from((2, 2)), fallback);

        assert_eq!(
            actions.as_slice(),
            &[
                WmAction::Resize(9, fallback),
                WmAction::Raise(9),
                WmAction::WriteWmState(9),
                WmAction::WriteNetState(9),
                WmAction::Map(9),
            ]
        );
        assert_eq!(surface.geometry.size, fallback);
        assert!(!surface.is_withdrawn());
    }

    #[test]
    fn sized_window_is_mapped_as_is() {
        let mut surface = window(9, (300, 200));
        let actions = map_request_actions(&mut surface, Size::from((2, 2)), Size::from((640, 480)));
        assert_eq!(actions.first(), Some(&WmAction::Raise(9)));
        assert_eq!(surface.geometry.size, Size::from((300, 200)));
    }

    #[test]
    fn passive_window_gets_input_focus() {
        let mut focus = FocusState::default();
        let actions = activation_actions(3, InputMode::Passive, true, &mut focus);
        assert_eq!(
            actions.as_slice(),
            &[
                WmAction::SetActiveWindow(Some(3)),
                WmAction::SetInputFocus(Some(3)),
                WmAction::BroadcastNetState,
            ]
        );
        assert_eq!(focus.focused(), Some(3));
    }

    #[test]
    fn globally_active_window_is_asked_to_take_focus() {
        let mut focus = FocusState::default();
        let actions = activation_actions(3, InputMode::GloballyActive, true, &mut focus);
        assert_eq!(
            actions.as_slice(),
            &[
                WmAction::SetActiveWindow(Some(3)),
                WmAction::TakeFocus { window: 3, track: true },
                WmAction::BroadcastNetState,
            ]
        );
    }

    #[test]
    fn window_without_input_is_never_focused() {
        let mut focus = FocusState::default();
        focus.set_focused(Some(1));
        assert!(activation_actions(3, InputMode::None, true, &mut focus).is_empty());
        assert_eq!(focus.focused(), Some(1));
    }

    #[test]
    fn deactivation_only_touches_the_focused_window() {
        let mut focus = FocusState::default();
        focus.set_focused(Some(1));
        assert!(activation_actions(3, InputMode::Passive, false, &mut focus).is_empty());

        let actions = activation_actions(1, InputMode::Passive, false, &mut focus);
        assert_eq!(
            actions.as_slice(),
            &[
                WmAction::SetActiveWindow(None),
                WmAction::SetInputFocus(None),
                WmAction::BroadcastNetState,
            ]
        );
        assert_eq!(focus.focused(), None);
    }

    fn woken(event_loop: &mut calloop::EventLoop<'static, usize>) -> usize {
        let mut wakeups = 0;
        event_loop
            .dispatch(Some(std::time::Duration::ZERO), &mut wakeups)
            .unwrap();
        wakeups
    }

    #[test]
    fn flushes_wait_for_the_end_of_a_pass() {
        let mut event_loop = calloop::EventLoop::<usize>::try_new().unwrap();
        let (ping, source) = calloop::ping::make_ping().unwrap();
        event_loop
            .handle()
            .insert_source(source, |_, _, wakeups| *wakeups += 1)
            .unwrap();
        let mut gate = FlushGate::new(ping);

        let mut flushes = 0;
        gate.begin_pass();
        gate.flush(|| -> Result<(), ()> {
            flushes += 1;
            Ok(())
        })
        .unwrap();
        gate.flush(|| -> Result<(), ()> {
            flushes += 1;
            Ok(())
        })
        .unwrap();
        assert_eq!(flushes, 0);
        assert_eq!(woken(&mut event_loop), 0);

        gate.end_pass();
        gate.flush(|| -> Result<(), ()> {
            flushes += 1;
            Ok(())
        })
        .unwrap();
        assert_eq!(flushes, 1);
        // a flush from a transfer callback wakes the source for events queued meanwhile
        assert_eq!(woken(&mut event_loop), 1);
    }

    #[test]
    fn failed_flush_does_not_wake() {
        let mut event_loop = calloop::EventLoop::<usize>::try_new().unwrap();
        let (ping, source) = calloop::ping::make_ping().unwrap();
        event_loop
            .handle()
            .insert_source(source, |_, _, wakeups| *wakeups += 1)
            .unwrap();
        let gate = FlushGate::new(ping);

        assert_eq!(gate.flush(|| Err("broken pipe")), Err("broken pipe"));
        assert_eq!(woken(&mut event_loop), 0);
    }
}
