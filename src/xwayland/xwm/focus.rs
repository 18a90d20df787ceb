//! Keyboard focus bookkeeping of the window manager.
//!
//! X clients are free to move input focus around themselves, most notably while sibling windows
//! of one client are torn down. A `FocusIn` is only trusted if it plausibly answers our own last
//! `SetInputFocus`/`WM_TAKE_FOCUS` request; anything else gets overridden by re-asserting the
//! focus we believe in.

use x11rb::protocol::xproto::{NotifyDetail, NotifyMode, Window as X11Window};

/// Default maximum distance between a focus request and the `FocusIn` confirming it
pub const FOCUS_SEQUENCE_WINDOW: u16 = 1024;

/// What to do about a `FocusIn` event
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FocusInVerdict {
    /// Nothing to do: grab related, pointer detail or the window is already focused
    Ignore,
    /// The event confirms focus on the given window
    Accept(X11Window),
    /// The event is stale or foreign, focus must be sent again for the current window
    Reassert(Option<X11Window>),
}

/// Focus state of one window manager instance
#[derive(Debug, Clone)]
pub struct FocusState {
    focused: Option<X11Window>,
    last_focus_seq: Option<u16>,
    sequence_window: u16,
}

impl FocusState {
    /// Nothing focused yet; `FocusIn` events must follow a request within `sequence_window`
    pub fn new(sequence_window: u16) -> Self {
        FocusState {
            focused: None,
            last_focus_seq: None,
            sequence_window,
        }
    }

    /// The currently focused window
    pub fn focused(&self) -> Option<X11Window> {
        self.focused
    }

    /// Update the focused window, returns whether it changed
    pub fn set_focused(&mut self, window: Option<X11Window>) -> bool {
        let changed = self.focused != window;
        self.focused = window;
        changed
    }

    /// Remember the sequence number of the request that moved the focus
    pub fn record_request(&mut self, sequence: u64) {
        // events only carry the lower 16 bits
        self.last_focus_seq = Some(sequence as u16);
    }

    /// Drop a window that is going away
    pub fn forget(&mut self, window: X11Window) -> bool {
        if self.focused == Some(window) {
            self.focused = None;
            true
        } else {
            false
        }
    }

    fn sequence_is_recent(&self, sequence: u16) -> bool {
        match self.last_focus_seq {
            Some(last) => sequence.wrapping_sub(last) <= self.sequence_window,
            None => false,
        }
    }

    /// Judge a `FocusIn` event.
    ///
    /// `pid_of` resolves the owning process of a managed window, `None` for unknown windows.
    pub fn judge_focus_in(
        &self,
        window: X11Window,
        sequence: u16,
        mode: NotifyMode,
        detail: NotifyDetail,
        pid_of: impl Fn(X11Window) -> Option<u32>,
    ) -> FocusInVerdict {
        if mode == NotifyMode::GRAB || mode == NotifyMode::UNGRAB || detail == NotifyDetail::POINTER {
            return FocusInVerdict::Ignore;
        }
        if self.focused == Some(window) {
            return FocusInVerdict::Ignore;
        }

        let same_client = match (self.focused.and_then(&pid_of), pid_of(window)) {
            (Some(previous), Some(requested)) => previous == requested,
            _ => false,
        };

        if same_client && self.sequence_is_recent(sequence) {
            FocusInVerdict::Accept(window)
        } else {
            FocusInVerdict::Reassert(self.focused)
        }
    }
}

impl Default for FocusState {
    fn default() -> Self {
        FocusState::new(FOCUS_SEQUENCE_WINDOW)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn pids(window: X11Window) -> Option<u32> {
        match window {
            1 | 2 => Some(100),
            3 => Some(200),
            _ => None,
        }
    }

    fn focused_on(window: X11Window, seq: u64) -> FocusState {
        let mut state = FocusState::default();
        state.set_focused(Some(window));
        state.record_request(seq);
        state
    }

    #[test]
    fn sibling_within_window_is_accepted() {
        let state = focused_on(1, 500);
        assert_eq!(
            state.judge_focus_in(2, 502, NotifyMode::NORMAL, NotifyDetail::NONLINEAR, pids),
            FocusInVerdict::Accept(2)
        );
    }

    #[test]
    fn far_sequence_is_rejected() {
        let state = focused_on(1, 500);
        assert_eq!(
            state.judge_focus_in(
                2,
                500 + FOCUS_SEQUENCE_WINDOW + 1,
                NotifyMode::NORMAL,
                NotifyDetail::NONLINEAR,
                pids
            ),
            FocusInVerdict::Reassert(Some(1))
        );
    }

    #[test]
    fn events_older_than_the_request_are_rejected() {
        let state = focused_on(1, 500);
        assert_eq!(
            state.judge_focus_in(2, 499, NotifyMode::NORMAL, NotifyDetail::NONLINEAR, pids),
            FocusInVerdict::Reassert(Some(1))
        );
    }

    #[test]
    fn other_client_is_rejected() {
        let state = focused_on(1, 500);
        assert_eq!(
            state.judge_focus_in(3, 501, NotifyMode::NORMAL, NotifyDetail::NONLINEAR, pids),
            FocusInVerdict::Reassert(Some(1))
        );
    }

    #[test]
    fn unknown_pids_never_match() {
        let state = focused_on(4, 500);
        assert_eq!(
            state.judge_focus_in(5, 500, NotifyMode::NORMAL, NotifyDetail::NONLINEAR, pids),
            FocusInVerdict::Reassert(Some(4))
        );
    }

    #[test]
    fn sequence_wraps_around() {
        let state = focused_on(1, u16::MAX as u64 - 1);
        assert_eq!(
            state.judge_focus_in(2, 3, NotifyMode::NORMAL, NotifyDetail::NONLINEAR, pids),
            FocusInVerdict::Accept(2)
        );
    }

    #[test]
    fn nothing_focused_reasserts_none() {
        let state = FocusState::default();
        assert_eq!(
            state.judge_focus_in(1, 0, NotifyMode::NORMAL, NotifyDetail::NONLINEAR, pids),
            FocusInVerdict::Reassert(None)
        );
    }

    #[test]
    fn grabs_are_ignored() {
        let state = focused_on(1, 500);
        assert_eq!(
            state.judge_focus_in(3, 501, NotifyMode::GRAB, NotifyDetail::NONLINEAR, pids),
            FocusInVerdict::Ignore
        );
    }

    #[test]
    fn focus_on_the_focused_window_is_not_reasserted() {
        let state = focused_on(4, 500);
        assert_eq!(
            state.judge_focus_in(4, 9000, NotifyMode::NORMAL, NotifyDetail::NONLINEAR, pids),
            FocusInVerdict::Ignore
        );
    }

    #[test]
    fn forgetting_the_focused_window_clears_focus() {
        let mut state = focused_on(1, 0);
        assert!(!state.forget(2));
        assert!(state.forget(1));
        assert_eq!(state.focused(), None);
    }
}
