//! EWMH window state bookkeeping.
//!
//! Clients change `_NET_WM_STATE` through client messages. Those are never applied directly to
//! the confirmed state (except for modality, which is the client's own business); they produce a
//! [`RequestedState`] that the compositor inspects and acknowledges by calling the corresponding
//! setter on the [`X11Wm`](super::X11Wm).

use bitflags::bitflags;
use smallvec::SmallVec;
use x11rb::protocol::xproto::Atom;

use super::Atoms;

bitflags! {
    /// State of a window as confirmed by the compositor
    #[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
    pub struct WindowState: u8 {
        /// `_NET_WM_STATE_MODAL`
        const MODAL = 1;
        /// `_NET_WM_STATE_FULLSCREEN`
        const FULLSCREEN = 1 << 1;
        /// `_NET_WM_STATE_MAXIMIZED_VERT`
        const MAXIMIZED_VERT = 1 << 2;
        /// `_NET_WM_STATE_MAXIMIZED_HORZ`
        const MAXIMIZED_HORZ = 1 << 3;
        /// `_NET_WM_STATE_HIDDEN` / `IconicState`
        const MINIMIZED = 1 << 4;
        /// `WithdrawnState`
        const WITHDRAWN = 1 << 5;
    }
}

impl WindowState {
    /// Both maximization axes are set
    pub fn is_maximized(&self) -> bool {
        self.contains(WindowState::MAXIMIZED_VERT | WindowState::MAXIMIZED_HORZ)
    }
}

/// State changes a client asked for and that were not yet observed by the compositor
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RequestedState {
    /// Requested fullscreen state
    pub fullscreen: Option<bool>,
    /// Requested vertical maximization
    pub maximized_vert: Option<bool>,
    /// Requested horizontal maximization
    pub maximized_horz: Option<bool>,
    /// Requested minimization
    pub minimized: Option<bool>,
}

impl RequestedState {
    /// Nothing is requested
    pub fn is_empty(&self) -> bool {
        *self == RequestedState::default()
    }

    /// Requested maximization, if both axes agree or only one was mentioned
    pub fn maximized(&self) -> Option<bool> {
        match (self.maximized_vert, self.maximized_horz) {
            (Some(vert), Some(horz)) => Some(vert && horz),
            (Some(value), None) | (None, Some(value)) => Some(value),
            (None, None) => None,
        }
    }
}

/// Action of a `_NET_WM_STATE` client message
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StateAction {
    /// `_NET_WM_STATE_REMOVE`
    Remove,
    /// `_NET_WM_STATE_ADD`
    Add,
    /// `_NET_WM_STATE_TOGGLE`
    Toggle,
}

impl StateAction {
    /// Decode the first data word of a `_NET_WM_STATE` client message
    pub fn from_wire(value: u32) -> Option<StateAction> {
        match value {
            0 => Some(StateAction::Remove),
            1 => Some(StateAction::Add),
            2 => Some(StateAction::Toggle),
            _ => None,
        }
    }

    /// The value resulting from applying this action to `current`
    pub fn apply(self, current: bool) -> bool {
        match self {
            StateAction::Remove => false,
            StateAction::Add => true,
            StateAction::Toggle => !current,
        }
    }
}

/// A single `_NET_WM_STATE` property understood by the window manager
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StateProperty {
    /// `_NET_WM_STATE_MODAL`
    Modal,
    /// `_NET_WM_STATE_FULLSCREEN`
    Fullscreen,
    /// `_NET_WM_STATE_MAXIMIZED_VERT`
    MaximizedVert,
    /// `_NET_WM_STATE_MAXIMIZED_HORZ`
    MaximizedHorz,
    /// `_NET_WM_STATE_HIDDEN`
    Hidden,
    /// `_NET_WM_STATE_FOCUSED`
    Focused,
}

impl StateProperty {
    pub(super) fn from_atom(atom: Atom, atoms: &Atoms) -> Option<StateProperty> {
        match atom {
            x if x == atoms._NET_WM_STATE_MODAL => Some(StateProperty::Modal),
            x if x == atoms._NET_WM_STATE_FULLSCREEN => Some(StateProperty::Fullscreen),
            x if x == atoms._NET_WM_STATE_MAXIMIZED_VERT => Some(StateProperty::MaximizedVert),
            x if x == atoms._NET_WM_STATE_MAXIMIZED_HORZ => Some(StateProperty::MaximizedHorz),
            x if x == atoms._NET_WM_STATE_HIDDEN => Some(StateProperty::Hidden),
            x if x == atoms._NET_WM_STATE_FOCUSED => Some(StateProperty::Focused),
            _ => None,
        }
    }

    pub(super) fn atom(self, atoms: &Atoms) -> Atom {
        match self {
            StateProperty::Modal => atoms._NET_WM_STATE_MODAL,
            StateProperty::Fullscreen => atoms._NET_WM_STATE_FULLSCREEN,
            StateProperty::MaximizedVert => atoms._NET_WM_STATE_MAXIMIZED_VERT,
            StateProperty::MaximizedHorz => atoms._NET_WM_STATE_MAXIMIZED_HORZ,
            StateProperty::Hidden => atoms._NET_WM_STATE_HIDDEN,
            StateProperty::Focused => atoms._NET_WM_STATE_FOCUSED,
        }
    }
}

/// Apply one `_NET_WM_STATE` client message.
///
/// Every action is evaluated against the confirmed value. Modality is applied to `confirmed`,
/// everything else only ends up in `requested`. Returns whether the message touched anything.
pub fn apply_state_message(
    confirmed: &mut WindowState,
    requested: &mut RequestedState,
    action: StateAction,
    properties: impl IntoIterator<Item = StateProperty>,
) -> bool {
    let mut touched = false;
    for property in properties {
        // focus is owned by the window manager
        if matches!(property, StateProperty::Focused) {
            continue;
        }
        touched = true;
        match property {
            StateProperty::Modal => {
                let modal = action.apply(confirmed.contains(WindowState::MODAL));
                confirmed.set(WindowState::MODAL, modal);
            }
            StateProperty::Fullscreen => {
                requested.fullscreen = Some(action.apply(confirmed.contains(WindowState::FULLSCREEN)));
            }
            StateProperty::MaximizedVert => {
                requested.maximized_vert = Some(action.apply(confirmed.contains(WindowState::MAXIMIZED_VERT)));
            }
            StateProperty::MaximizedHorz => {
                requested.maximized_horz = Some(action.apply(confirmed.contains(WindowState::MAXIMIZED_HORZ)));
            }
            StateProperty::Hidden => {
                requested.minimized = Some(action.apply(confirmed.contains(WindowState::MINIMIZED)));
            }
            StateProperty::Focused => {}
        }
    }
    touched
}

/// The full `_NET_WM_STATE` list for a confirmed state
pub fn net_state_properties(state: WindowState, focused: bool) -> SmallVec<[StateProperty; 6]> {
    let mut properties = SmallVec::new();
    if state.contains(WindowState::MODAL) {
        properties.push(StateProperty::Modal);
    }
    if state.contains(WindowState::FULLSCREEN) {
        properties.push(StateProperty::Fullscreen);
    }
    if state.contains(WindowState::MAXIMIZED_VERT) {
        properties.push(StateProperty::MaximizedVert);
    }
    if state.contains(WindowState::MAXIMIZED_HORZ) {
        properties.push(StateProperty::MaximizedHorz);
    }
    if state.contains(WindowState::MINIMIZED) {
        properties.push(StateProperty::Hidden);
    }
    if focused {
        properties.push(StateProperty::Focused);
    }
    properties
}

/// ICCCM `WM_STATE` values
pub(super) const WITHDRAWN_STATE: u32 = 0;
pub(super) const NORMAL_STATE: u32 = 1;
pub(super) const ICONIC_STATE: u32 = 3;

/// The legacy `WM_STATE` value for a confirmed state
pub fn wm_state_value(state: WindowState) -> u32 {
    if state.contains(WindowState::WITHDRAWN) {
        WITHDRAWN_STATE
    } else if state.contains(WindowState::MINIMIZED) {
        ICONIC_STATE
    } else {
        NORMAL_STATE
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn toggle_twice_round_trips() {
        for current in [true, false] {
            let once = StateAction::Toggle.apply(current);
            assert_ne!(once, current);
            assert_eq!(StateAction::Toggle.apply(once), current);
        }
    }

    #[test]
    fn fullscreen_request_leaves_confirmed_untouched() {
        let mut confirmed = WindowState::empty();
        let mut requested = RequestedState::default();

        assert!(apply_state_message(
            &mut confirmed,
            &mut requested,
            StateAction::Add,
            [StateProperty::Fullscreen],
        ));
        assert_eq!(requested.fullscreen, Some(true));
        assert!(!confirmed.contains(WindowState::FULLSCREEN));
    }

    #[test]
    fn toggles_are_evaluated_against_confirmed_state() {
        let mut confirmed = WindowState::MAXIMIZED_VERT | WindowState::MAXIMIZED_HORZ;
        let mut requested = RequestedState::default();

        apply_state_message(
            &mut confirmed,
            &mut requested,
            StateAction::Toggle,
            [StateProperty::MaximizedVert, StateProperty::MaximizedHorz],
        );
        assert_eq!(requested.maximized(), Some(false));

        // the confirmed state did not move, so the same toggle yields the same request
        apply_state_message(
            &mut confirmed,
            &mut requested,
            StateAction::Toggle,
            [StateProperty::MaximizedVert, StateProperty::MaximizedHorz],
        );
        assert_eq!(requested.maximized(), Some(false));
        assert!(confirmed.is_maximized());
    }

    #[test]
    fn modality_is_applied_directly() {
        let mut confirmed = WindowState::empty();
        let mut requested = RequestedState::default();
        apply_state_message(&mut confirmed, &mut requested, StateAction::Add, [StateProperty::Modal]);
        assert!(confirmed.contains(WindowState::MODAL));
        assert!(requested.is_empty());
    }

    #[test]
    fn focused_bit_from_clients_is_ignored() {
        let mut confirmed = WindowState::empty();
        let mut requested = RequestedState::default();
        assert!(!apply_state_message(
            &mut confirmed,
            &mut requested,
            StateAction::Add,
            [StateProperty::Focused],
        ));

        // a trailing focused bit keeps the earlier request
        assert!(apply_state_message(
            &mut confirmed,
            &mut requested,
            StateAction::Add,
            [StateProperty::Fullscreen, StateProperty::Focused],
        ));
        assert_eq!(requested.fullscreen, Some(true));
    }

    #[test]
    fn outbound_list_follows_confirmed_state() {
        let state = WindowState::FULLSCREEN | WindowState::MINIMIZED;
        assert_eq!(
            net_state_properties(state, true).as_slice(),
            &[StateProperty::Fullscreen, StateProperty::Hidden, StateProperty::Focused]
        );
        assert!(net_state_properties(WindowState::WITHDRAWN, false).is_empty());
    }

    #[test]
    fn wm_state_values() {
        assert_eq!(wm_state_value(WindowState::empty()), NORMAL_STATE);
        assert_eq!(wm_state_value(WindowState::MINIMIZED), ICONIC_STATE);
        assert_eq!(
            wm_state_value(WindowState::MINIMIZED | WindowState::WITHDRAWN),
            WITHDRAWN_STATE
        );
    }

    #[test]
    fn unknown_actions_are_rejected() {
        assert_eq!(StateAction::from_wire(3), None);
        assert_eq!(StateAction::from_wire(2), Some(StateAction::Toggle));
    }
}
