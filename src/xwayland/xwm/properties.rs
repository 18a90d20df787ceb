//! Reading and normalizing ICCCM/EWMH window properties.
//!
//! The readers distinguish a property that is absent (the server replied with type `None`) from a
//! request that got no reply at all. Absent properties reset the corresponding field, failed
//! requests leave the previous value in place.

use bitflags::bitflags;
use encoding_rs::WINDOWS_1252;
use tracing::debug;
use x11rb::{
    errors::ConnectionError,
    protocol::xproto::{Atom, AtomEnum, ConnectionExt as _, GetPropertyReply, Window as X11Window},
    rust_connection::RustConnection,
};

use crate::utils::Size;

use super::Atoms;

/// Outcome of a single property read
#[derive(Debug, Clone, PartialEq, Eq)]
pub(super) enum Fetched<T> {
    /// The property exists and could be decoded
    Present(T),
    /// The property is not set, or its contents are malformed
    Absent,
    /// The request failed; keep whatever was known before
    NoReply,
}

impl<T> Fetched<T> {
    /// Store into `slot` following the keep-on-failure rule
    pub(super) fn store(self, slot: &mut Option<T>) {
        match self {
            Fetched::Present(value) => *slot = Some(value),
            Fetched::Absent => *slot = None,
            Fetched::NoReply => {}
        }
    }

    pub(super) fn map<U>(self, f: impl FnOnce(T) -> U) -> Fetched<U> {
        match self {
            Fetched::Present(value) => Fetched::Present(f(value)),
            Fetched::Absent => Fetched::Absent,
            Fetched::NoReply => Fetched::NoReply,
        }
    }
}

/// Properties tracked for every managed window, as last read from the X server
#[derive(Debug, Clone, Default, PartialEq)]
pub struct WindowProperties {
    /// `_NET_WM_NAME`, falling back to `WM_NAME`
    pub title: Option<String>,
    /// Parsed `WM_CLASS`
    pub class: Option<WmClassInfo>,
    /// Raw `WM_TRANSIENT_FOR` value; the resolved edge lives in the registry
    pub transient_for: Option<X11Window>,
    /// `WM_HINTS`
    pub hints: Option<WmHints>,
    /// Normalized `WM_NORMAL_HINTS`
    pub size_hints: Option<SizeHints>,
    /// Known entries of `WM_PROTOCOLS`
    pub protocols: Vec<WmProtocol>,
    /// `_NET_WM_WINDOW_TYPE` in the order given by the client
    pub window_type: Vec<Atom>,
    /// `WM_WINDOW_ROLE`
    pub role: Option<String>,
    /// `_NET_WM_PID`, or the X-Resource lookup when the property is missing
    pub pid: Option<u32>,
    /// `_NET_STARTUP_ID`
    pub startup_id: Option<String>,
    /// `_MOTIF_WM_HINTS`
    pub motif_hints: Option<MotifHints>,
}

/// ICCCM protocols a client may participate in
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum WmProtocol {
    /// `WM_TAKE_FOCUS`
    TakeFocus,
    /// `WM_DELETE_WINDOW`
    DeleteWindow,
    /// `_NET_WM_PING`
    Ping,
}

/// Window properties of [`X11Surface`](super::X11Surface)s
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[allow(missing_docs)]
pub enum WmWindowProperty {
    Title,
    Class,
    Protocols,
    Hints,
    NormalHints,
    TransientFor,
    WindowType,
    Role,
    MotifHints,
    StartupId,
    Pid,
}

/// Window types of [`X11Surface`](super::X11Surface)s
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[allow(missing_docs)]
pub enum WmWindowType {
    DropdownMenu,
    Dialog,
    Menu,
    Notification,
    Normal,
    PopupMenu,
    Splash,
    Toolbar,
    Tooltip,
    Utility,
}

impl WmWindowType {
    pub(super) fn from_atom(atom: Atom, atoms: &Atoms) -> Option<WmWindowType> {
        match atom {
            x if x == atoms._NET_WM_WINDOW_TYPE_DROPDOWN_MENU => Some(WmWindowType::DropdownMenu),
            x if x == atoms._NET_WM_WINDOW_TYPE_DIALOG => Some(WmWindowType::Dialog),
            x if x == atoms._NET_WM_WINDOW_TYPE_MENU => Some(WmWindowType::Menu),
            x if x == atoms._NET_WM_WINDOW_TYPE_NOTIFICATION => Some(WmWindowType::Notification),
            x if x == atoms._NET_WM_WINDOW_TYPE_NORMAL => Some(WmWindowType::Normal),
            x if x == atoms._NET_WM_WINDOW_TYPE_POPUP_MENU => Some(WmWindowType::PopupMenu),
            x if x == atoms._NET_WM_WINDOW_TYPE_SPLASH => Some(WmWindowType::Splash),
            x if x == atoms._NET_WM_WINDOW_TYPE_TOOLBAR => Some(WmWindowType::Toolbar),
            x if x == atoms._NET_WM_WINDOW_TYPE_TOOLTIP => Some(WmWindowType::Tooltip),
            x if x == atoms._NET_WM_WINDOW_TYPE_UTILITY => Some(WmWindowType::Utility),
            _ => None,
        }
    }
}

/// Parsed `WM_CLASS` property
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct WmClassInfo {
    /// Resource name of the instance
    pub instance: String,
    /// Resource class, used as the application id
    pub class: String,
}

impl WmClassInfo {
    /// Parse a raw `WM_CLASS` value.
    ///
    /// A well-formed value reads `instance\0class\0`. Anything else is taken verbatim, with
    /// surrounding whitespace and separators trimmed, for both fields.
    pub fn parse(raw: &[u8]) -> WmClassInfo {
        let separators = raw.iter().filter(|b| **b == 0).count();
        if separators == 2 {
            if let Some(first) = raw.iter().position(|b| *b == 0) {
                let instance = &raw[..first];
                let rest = &raw[first + 1..];
                let class = rest.split(|b| *b == 0).next().unwrap_or_default();
                return WmClassInfo {
                    instance: decode_latin1(instance),
                    class: decode_latin1(class),
                };
            }
        }

        let raw = decode_latin1(raw);
        let trimmed = raw.trim_matches(|c: char| c == '\0' || c.is_whitespace()).to_owned();
        WmClassInfo {
            instance: trimmed.clone(),
            class: trimmed,
        }
    }
}

fn decode_latin1(bytes: &[u8]) -> String {
    WINDOWS_1252.decode(bytes).0.into_owned()
}

bitflags! {
    /// `WM_SIZE_HINTS.flags`
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    struct SizeHintsFlags: u32 {
        const US_POSITION = 1;
        const US_SIZE = 1 << 1;
        const P_POSITION = 1 << 2;
        const P_SIZE = 1 << 3;
        const P_MIN_SIZE = 1 << 4;
        const P_MAX_SIZE = 1 << 5;
        const P_RESIZE_INC = 1 << 6;
        const P_ASPECT = 1 << 7;
        const P_BASE_SIZE = 1 << 8;
        const P_WIN_GRAVITY = 1 << 9;
    }
}

/// Normalized `WM_NORMAL_HINTS`
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SizeHints {
    /// Minimum size; inherits the base size when only that one is advertised
    pub min_size: Option<Size>,
    /// Base size; inherits the minimum size when only that one is advertised
    pub base_size: Option<Size>,
    /// Maximum size
    pub max_size: Option<Size>,
    /// Resize increments
    pub size_increment: Option<Size>,
}

impl SizeHints {
    /// Decode a raw 32-bit `WM_SIZE_HINTS` value. Returns `None` for truncated values.
    pub fn from_raw(value: &[u32]) -> Option<SizeHints> {
        // flags, 4 obsolete fields, min, max, inc, 2 aspects, base, gravity
        if value.len() < 15 {
            return None;
        }
        let flags = SizeHintsFlags::from_bits_truncate(value[0]);
        let size = |w: u32, h: u32| Size::from((w as i32, h as i32));

        let mut min_size = flags
            .contains(SizeHintsFlags::P_MIN_SIZE)
            .then(|| size(value[5], value[6]));
        let max_size = flags
            .contains(SizeHintsFlags::P_MAX_SIZE)
            .then(|| size(value[7], value[8]));
        let size_increment = flags
            .contains(SizeHintsFlags::P_RESIZE_INC)
            .then(|| size(value[9], value[10]));
        let mut base_size = (flags.contains(SizeHintsFlags::P_BASE_SIZE) && value.len() >= 17)
            .then(|| size(value[15], value[16]));

        match (min_size, base_size) {
            (Some(min), None) => base_size = Some(min),
            (None, Some(base)) => min_size = Some(base),
            _ => {}
        }

        Some(SizeHints {
            min_size,
            base_size,
            max_size,
            size_increment,
        })
    }
}

bitflags! {
    /// `WM_HINTS.flags`
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    struct HintsFlags: u32 {
        const INPUT = 1;
        const STATE = 1 << 1;
        const ICON_PIXMAP = 1 << 2;
        const ICON_WINDOW = 1 << 3;
        const ICON_POSITION = 1 << 4;
        const ICON_MASK = 1 << 5;
        const WINDOW_GROUP = 1 << 6;
        const URGENCY = 1 << 8;
    }
}

/// Initial state a client asks for in its `WM_HINTS`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WmInitialState {
    /// `NormalState`
    Normal,
    /// `IconicState`
    Iconic,
}

/// Decoded `WM_HINTS`
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct WmHints {
    /// Whether the client relies on the window manager to get keyboard input
    pub input: Option<bool>,
    /// Requested initial state
    pub initial_state: Option<WmInitialState>,
    /// Leader of the window group
    pub window_group: Option<X11Window>,
    /// Urgency hint
    pub urgent: bool,
}

impl WmHints {
    /// Decode a raw 32-bit `WM_HINTS` value. Returns `None` for truncated values.
    pub fn from_raw(value: &[u32]) -> Option<WmHints> {
        if value.len() < 9 {
            return None;
        }
        let flags = HintsFlags::from_bits_truncate(value[0]);
        Some(WmHints {
            input: flags.contains(HintsFlags::INPUT).then_some(value[1] != 0),
            initial_state: flags
                .contains(HintsFlags::STATE)
                .then(|| match value[2] {
                    3 => Some(WmInitialState::Iconic),
                    1 => Some(WmInitialState::Normal),
                    _ => None,
                })
                .flatten(),
            window_group: flags
                .contains(HintsFlags::WINDOW_GROUP)
                .then_some(value[8])
                .filter(|w| *w != x11rb::NONE),
            urgent: flags.contains(HintsFlags::URGENCY),
        })
    }
}

const MWM_HINTS_DECORATIONS: u32 = 1 << 1;

/// Decoded `_MOTIF_WM_HINTS`
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct MotifHints {
    /// Requested decorations, if the client expressed a preference
    pub decorations: Option<u32>,
}

impl MotifHints {
    /// Decode a raw `_MOTIF_WM_HINTS` value
    pub fn from_raw(value: &[u32]) -> Option<MotifHints> {
        if value.len() < 5 {
            return None;
        }
        Some(MotifHints {
            decorations: (value[0] & MWM_HINTS_DECORATIONS != 0).then_some(value[2]),
        })
    }

    /// The client draws its own decorations
    pub fn is_client_decorated(&self) -> bool {
        self.decorations == Some(0)
    }
}

/// Reads properties of one window
pub(super) struct PropertyReader<'a> {
    pub conn: &'a RustConnection,
    pub atoms: &'a Atoms,
    pub window: X11Window,
}

impl<'a> PropertyReader<'a> {
    fn get(&self, property: impl Into<Atom>, type_: impl Into<Atom>, long_length: u32) -> Result<Option<GetPropertyReply>, ConnectionError> {
        let property = property.into();
        match self
            .conn
            .get_property(false, self.window, property, type_, 0, long_length)?
            .reply_unchecked()
        {
            Ok(reply) => {
                if reply.is_none() {
                    debug!(window = self.window, property, "Property request got no reply");
                }
                Ok(reply)
            }
            Err(ConnectionError::ParseError(_)) => Ok(None),
            Err(err) => Err(err),
        }
    }

    fn values32(&self, property: impl Into<Atom>, type_: impl Into<Atom>) -> Result<Fetched<Vec<u32>>, ConnectionError> {
        Ok(match self.get(property, type_, 2048)? {
            Some(reply) => match reply.value32() {
                Some(values) => Fetched::Present(values.collect()),
                None => Fetched::Absent,
            },
            None => Fetched::NoReply,
        })
    }

    fn bytes(&self, property: impl Into<Atom>) -> Result<Fetched<(Atom, Vec<u8>)>, ConnectionError> {
        Ok(match self.get(property, AtomEnum::ANY, 2048)? {
            Some(reply) => match reply.value8() {
                Some(bytes) => Fetched::Present((reply.type_, bytes.collect())),
                None => Fetched::Absent,
            },
            None => Fetched::NoReply,
        })
    }

    /// Read a `STRING` (Latin-1) or `UTF8_STRING` property
    pub fn string(&self, property: impl Into<Atom>) -> Result<Fetched<String>, ConnectionError> {
        let utf8 = self.atoms.UTF8_STRING;
        Ok(match self.bytes(property)? {
            Fetched::Present((type_, bytes)) => match type_ {
                x if x == AtomEnum::STRING.into() => Fetched::Present(decode_latin1(&bytes)),
                x if x == utf8 => match String::from_utf8(bytes) {
                    Ok(string) => Fetched::Present(string),
                    Err(_) => Fetched::Absent,
                },
                _ => Fetched::Absent,
            },
            Fetched::Absent => Fetched::Absent,
            Fetched::NoReply => Fetched::NoReply,
        })
    }

    pub fn title(&self) -> Result<Fetched<String>, ConnectionError> {
        match self.string(self.atoms._NET_WM_NAME)? {
            Fetched::Absent => self.string(AtomEnum::WM_NAME),
            other => Ok(other),
        }
    }

    pub fn class(&self) -> Result<Fetched<WmClassInfo>, ConnectionError> {
        Ok(self
            .bytes(AtomEnum::WM_CLASS)?
            .map(|(_, bytes)| WmClassInfo::parse(&bytes)))
    }

    pub fn transient_for(&self) -> Result<Fetched<X11Window>, ConnectionError> {
        Ok(match self.values32(AtomEnum::WM_TRANSIENT_FOR, AtomEnum::WINDOW)? {
            Fetched::Present(values) => match values.first().copied().filter(|w| *w != x11rb::NONE) {
                Some(window) => Fetched::Present(window),
                None => Fetched::Absent,
            },
            Fetched::Absent => Fetched::Absent,
            Fetched::NoReply => Fetched::NoReply,
        })
    }

    pub fn hints(&self) -> Result<Fetched<WmHints>, ConnectionError> {
        Ok(
            match self.values32(AtomEnum::WM_HINTS, AtomEnum::WM_HINTS)? {
                Fetched::Present(values) => WmHints::from_raw(&values).map_or(Fetched::Absent, Fetched::Present),
                other => other.map(|_| WmHints::default()),
            },
        )
    }

    pub fn size_hints(&self) -> Result<Fetched<SizeHints>, ConnectionError> {
        Ok(
            match self.values32(AtomEnum::WM_NORMAL_HINTS, AtomEnum::WM_SIZE_HINTS)? {
                Fetched::Present(values) => {
                    SizeHints::from_raw(&values).map_or(Fetched::Absent, Fetched::Present)
                }
                other => other.map(|_| SizeHints::default()),
            },
        )
    }

    pub fn protocols(&self) -> Result<Fetched<Vec<WmProtocol>>, ConnectionError> {
        let atoms = self.atoms;
        Ok(self.values32(atoms.WM_PROTOCOLS, AtomEnum::ATOM)?.map(|values| {
            values
                .into_iter()
                .filter_map(|atom| match atom {
                    x if x == atoms.WM_TAKE_FOCUS => Some(WmProtocol::TakeFocus),
                    x if x == atoms.WM_DELETE_WINDOW => Some(WmProtocol::DeleteWindow),
                    x if x == atoms._NET_WM_PING => Some(WmProtocol::Ping),
                    _ => None,
                })
                .collect()
        }))
    }

    pub fn window_type(&self) -> Result<Fetched<Vec<Atom>>, ConnectionError> {
        self.values32(self.atoms._NET_WM_WINDOW_TYPE, AtomEnum::ATOM)
    }

    pub fn net_state(&self) -> Result<Fetched<Vec<Atom>>, ConnectionError> {
        self.values32(self.atoms._NET_WM_STATE, AtomEnum::ATOM)
    }

    pub fn role(&self) -> Result<Fetched<String>, ConnectionError> {
        self.string(self.atoms.WM_WINDOW_ROLE)
    }

    pub fn startup_id(&self) -> Result<Fetched<String>, ConnectionError> {
        self.string(self.atoms._NET_STARTUP_ID)
    }

    pub fn motif_hints(&self) -> Result<Fetched<MotifHints>, ConnectionError> {
        Ok(match self.values32(self.atoms._MOTIF_WM_HINTS, AtomEnum::ANY)? {
            Fetched::Present(values) => MotifHints::from_raw(&values).map_or(Fetched::Absent, Fetched::Present),
            other => other.map(|_| MotifHints::default()),
        })
    }

    pub fn pid(&self) -> Result<Fetched<u32>, ConnectionError> {
        Ok(match self.values32(self.atoms._NET_WM_PID, AtomEnum::CARDINAL)? {
            Fetched::Present(values) => values.first().copied().map_or(Fetched::Absent, Fetched::Present),
            other => other.map(|_| 0),
        })
    }

    /// Read the full property set into `props`
    pub fn read_all(&self, props: &mut WindowProperties) -> Result<(), ConnectionError> {
        for property in [
            WmWindowProperty::Title,
            WmWindowProperty::Class,
            WmWindowProperty::Protocols,
            WmWindowProperty::Hints,
            WmWindowProperty::NormalHints,
            WmWindowProperty::TransientFor,
            WmWindowProperty::WindowType,
            WmWindowProperty::Role,
            WmWindowProperty::MotifHints,
            WmWindowProperty::StartupId,
            WmWindowProperty::Pid,
        ] {
            self.read(property, props)?;
        }
        Ok(())
    }

    /// Re-read a single property into `props`
    pub fn read(&self, property: WmWindowProperty, props: &mut WindowProperties) -> Result<(), ConnectionError> {
        match property {
            WmWindowProperty::Title => self.title()?.store(&mut props.title),
            WmWindowProperty::Class => self.class()?.store(&mut props.class),
            WmWindowProperty::Protocols => {
                let mut protocols = Some(std::mem::take(&mut props.protocols));
                self.protocols()?.store(&mut protocols);
                props.protocols = protocols.unwrap_or_default();
            }
            WmWindowProperty::Hints => self.hints()?.store(&mut props.hints),
            WmWindowProperty::NormalHints => self.size_hints()?.store(&mut props.size_hints),
            WmWindowProperty::TransientFor => self.transient_for()?.store(&mut props.transient_for),
            WmWindowProperty::WindowType => {
                let mut window_type = Some(std::mem::take(&mut props.window_type));
                self.window_type()?.store(&mut window_type);
                props.window_type = window_type.unwrap_or_default();
            }
            WmWindowProperty::Role => self.role()?.store(&mut props.role),
            WmWindowProperty::MotifHints => self.motif_hints()?.store(&mut props.motif_hints),
            WmWindowProperty::StartupId => self.startup_id()?.store(&mut props.startup_id),
            WmWindowProperty::Pid => match self.pid()? {
                Fetched::Present(pid) => props.pid = Some(pid),
                Fetched::Absent => props.pid = props.pid.or(self.client_pid()?),
                Fetched::NoReply => {}
            },
        }
        Ok(())
    }

    /// Ask the X-Resource extension for the pid of the client owning the window
    fn client_pid(&self) -> Result<Option<u32>, ConnectionError> {
        use x11rb::{
            connection::RequestConnection as _,
            protocol::res::{self, ClientIdMask, ClientIdSpec, ConnectionExt as _},
        };

        if self.conn.extension_information(res::X11_EXTENSION_NAME)?.is_none() {
            return Ok(None);
        }
        let spec = ClientIdSpec {
            client: self.window,
            mask: ClientIdMask::LOCAL_CLIENT_PID,
        };
        match self.conn.res_query_client_ids(&[spec])?.reply_unchecked() {
            Ok(Some(reply)) => Ok(reply.ids.first().and_then(|id| id.value.first().copied())),
            Ok(None) | Err(ConnectionError::ParseError(_)) => Ok(None),
            Err(err) => Err(err),
        }
    }
}

/// Map a changed property atom to the tracked property it belongs to
pub(super) fn property_for_atom(atom: Atom, atoms: &Atoms) -> Option<WmWindowProperty> {
    match atom {
        x if x == atoms._NET_WM_NAME || x == AtomEnum::WM_NAME.into() => Some(WmWindowProperty::Title),
        x if x == AtomEnum::WM_CLASS.into() => Some(WmWindowProperty::Class),
        x if x == atoms.WM_PROTOCOLS => Some(WmWindowProperty::Protocols),
        x if x == AtomEnum::WM_HINTS.into() => Some(WmWindowProperty::Hints),
        x if x == AtomEnum::WM_NORMAL_HINTS.into() => Some(WmWindowProperty::NormalHints),
        x if x == AtomEnum::WM_TRANSIENT_FOR.into() => Some(WmWindowProperty::TransientFor),
        x if x == atoms._NET_WM_WINDOW_TYPE => Some(WmWindowProperty::WindowType),
        x if x == atoms.WM_WINDOW_ROLE => Some(WmWindowProperty::Role),
        x if x == atoms._MOTIF_WM_HINTS => Some(WmWindowProperty::MotifHints),
        x if x == atoms._NET_STARTUP_ID => Some(WmWindowProperty::StartupId),
        x if x == atoms._NET_WM_PID => Some(WmWindowProperty::Pid),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn class_with_two_separators() {
        let class = WmClassInfo::parse(b"navigator\0Firefox\0");
        assert_eq!(class.instance, "navigator");
        assert_eq!(class.class, "Firefox");
    }

    #[test]
    fn class_with_one_separator_is_used_raw() {
        let class = WmClassInfo::parse(b"  xterm\0");
        assert_eq!(class.class, "xterm");
        assert_eq!(class.instance, "xterm");
    }

    #[test]
    fn class_without_separator_is_trimmed() {
        let class = WmClassInfo::parse(b" XTerm \n");
        assert_eq!(class.class, "XTerm");
    }

    #[test]
    fn class_with_three_separators_is_not_split() {
        let class = WmClassInfo::parse(b"a\0b\0c\0");
        assert_eq!(class.class, "a\0b\0c");
    }

    #[test]
    fn class_is_decoded_as_latin1() {
        let class = WmClassInfo::parse(b"caf\xe9\0Caf\xe9\0");
        assert_eq!(class.class, "Café");
    }

    fn size_hints(flags: u32, min: (u32, u32), max: (u32, u32), base: (u32, u32)) -> Vec<u32> {
        let mut raw = vec![0u32; 18];
        raw[0] = flags;
        raw[5] = min.0;
        raw[6] = min.1;
        raw[7] = max.0;
        raw[8] = max.1;
        raw[15] = base.0;
        raw[16] = base.1;
        raw
    }

    #[test]
    fn size_hints_without_min_or_base_are_unset() {
        let hints = SizeHints::from_raw(&size_hints(1 << 5, (10, 10), (500, 400), (20, 20))).unwrap();
        assert_eq!(hints.min_size, None);
        assert_eq!(hints.base_size, None);
        assert_eq!(hints.max_size, Some(Size::from((500, 400))));
    }

    #[test]
    fn size_hints_base_inherits_min() {
        let hints = SizeHints::from_raw(&size_hints(1 << 4, (100, 50), (0, 0), (0, 0))).unwrap();
        assert_eq!(hints.min_size, Some(Size::from((100, 50))));
        assert_eq!(hints.base_size, Some(Size::from((100, 50))));
    }

    #[test]
    fn size_hints_min_inherits_base() {
        let hints = SizeHints::from_raw(&size_hints(1 << 8, (0, 0), (0, 0), (300, 200))).unwrap();
        assert_eq!(hints.min_size, Some(Size::from((300, 200))));
        assert_eq!(hints.base_size, Some(Size::from((300, 200))));
    }

    #[test]
    fn size_hints_keep_both_when_present() {
        let hints = SizeHints::from_raw(&size_hints((1 << 4) | (1 << 8), (10, 20), (0, 0), (30, 40))).unwrap();
        assert_eq!(hints.min_size, Some(Size::from((10, 20))));
        assert_eq!(hints.base_size, Some(Size::from((30, 40))));
    }

    #[test]
    fn truncated_size_hints_are_rejected() {
        assert_eq!(SizeHints::from_raw(&[1 << 4, 0, 0]), None);
    }

    #[test]
    fn wm_hints_input_and_state() {
        let mut raw = vec![0u32; 9];
        raw[0] = 1 | (1 << 1);
        raw[1] = 0;
        raw[2] = 3;
        let hints = WmHints::from_raw(&raw).unwrap();
        assert_eq!(hints.input, Some(false));
        assert_eq!(hints.initial_state, Some(WmInitialState::Iconic));
        assert!(!hints.urgent);

        raw[0] = 0;
        let hints = WmHints::from_raw(&raw).unwrap();
        assert_eq!(hints.input, None);
    }

    #[test]
    fn motif_decorations() {
        let hints = MotifHints::from_raw(&[2, 0, 0, 0, 0]).unwrap();
        assert!(hints.is_client_decorated());
        let hints = MotifHints::from_raw(&[0, 0, 0, 0, 0]).unwrap();
        assert!(!hints.is_client_decorated());
        assert!(MotifHints::from_raw(&[2, 0]).is_none());
    }

    #[test]
    fn fetched_keeps_value_without_reply() {
        let mut slot = Some(5);
        Fetched::<u32>::NoReply.store(&mut slot);
        assert_eq!(slot, Some(5));
        Fetched::<u32>::Absent.store(&mut slot);
        assert_eq!(slot, None);
        Fetched::Present(7).store(&mut slot);
        assert_eq!(slot, Some(7));
    }
}
