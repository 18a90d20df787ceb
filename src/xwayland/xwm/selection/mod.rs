//! Clipboard and primary selection bridging between X11 and wayland.
//!
//! Every selection is represented on the X11 side by an invisible window of the window manager.
//! It owns the X11 selection while a wayland client provides the data, and it is the requestor of
//! all conversions while an X11 client provides the data.

use std::{
    collections::{HashMap, VecDeque},
    os::unix::io::{AsFd, BorrowedFd, OwnedFd},
};

use calloop::{generic::Generic, Interest, LoopHandle, Mode, PostAction};
use rustix::pipe::PipeFlags;
use tracing::{debug, trace, warn};
use x11rb::{
    connection::Connection as _,
    errors::ReplyOrIdError,
    protocol::{
        xfixes::{ConnectionExt as _, SelectionEventMask, SelectionNotifyEvent as XfixesSelectionNotifyEvent},
        xproto::{
            Atom, AtomEnum, ChangeWindowAttributesAux, ConnectionExt as _, CreateWindowAux, EventMask, PropMode,
            Property, PropertyNotifyEvent, Screen, SelectionNotifyEvent, SelectionRequestEvent,
            Window as X11Window, WindowClass, SELECTION_NOTIFY_EVENT,
        },
        Event,
    },
    rust_connection::RustConnection,
    wrapper::ConnectionExt as _,
    CURRENT_TIME,
};

use super::{dnd, surface::WaylandSurface, Atoms, X11Wm, XwmHandler, XwmId};

mod mime;
mod transfer;

pub use self::mime::negotiate;
pub(super) use self::mime::{atom_from_mime, mime_from_atom};
use self::mime::requested_mime_from_atom;
use self::transfer::{IncomingAction, IncomingTransfer, OutgoingAction, OutgoingTransfer};

/// Selection types bridged between X11 and wayland
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SelectionTarget {
    /// The `CLIPBOARD` selection, `wl_data_device` on the wayland side
    Clipboard,
    /// The `PRIMARY` selection, `zwp_primary_selection_device_v1` on the wayland side
    Primary,
}

/// Internal addressing of the selections, including the one used for drag and drop
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub(super) enum SelectionSlot {
    Clipboard,
    Primary,
    Dnd,
}

impl From<SelectionTarget> for SelectionSlot {
    fn from(target: SelectionTarget) -> Self {
        match target {
            SelectionTarget::Clipboard => SelectionSlot::Clipboard,
            SelectionTarget::Primary => SelectionSlot::Primary,
        }
    }
}

impl SelectionSlot {
    fn target(self) -> Option<SelectionTarget> {
        match self {
            SelectionSlot::Clipboard => Some(SelectionTarget::Clipboard),
            SelectionSlot::Primary => Some(SelectionTarget::Primary),
            SelectionSlot::Dnd => None,
        }
    }
}

#[derive(Debug)]
pub(super) struct XwmSelection {
    pub atom: Atom,
    pub window: X11Window,
    /// Current owner as reported by xfixes
    pub owner: X11Window,
    /// Time the window manager acquired the selection
    pub timestamp: u32,
    /// Timestamp used for conversions
    pub request_time: u32,

    /// Mime types offered by the wayland source, while wayland owns the selection
    pub wayland_mimes: Option<Vec<String>>,
    /// Ownership has to be claimed once X11 clients get keyboard focus
    pub announce_pending: bool,

    targets_pending: bool,
    incoming: Option<IncomingTransfer>,
    queued: VecDeque<IncomingTransfer>,
    outgoing: HashMap<(X11Window, Atom), OutgoingTransfer>,
}

impl XwmSelection {
    pub fn new(conn: &RustConnection, screen: &Screen, atoms: &Atoms, atom: Atom) -> Result<Self, ReplyOrIdError> {
        let window = conn.generate_id()?;
        conn.create_window(
            screen.root_depth,
            window,
            screen.root,
            0,
            0,
            10,
            10,
            0,
            WindowClass::INPUT_OUTPUT,
            screen.root_visual,
            &CreateWindowAux::new()
                .event_mask(EventMask::PROPERTY_CHANGE)
                .override_redirect(1),
        )?;

        if atom == atoms.CLIPBOARD {
            conn.set_selection_owner(window, atoms.CLIPBOARD_MANAGER, CURRENT_TIME)?;
        }
        conn.xfixes_select_selection_input(
            window,
            atom,
            SelectionEventMask::SET_SELECTION_OWNER
                | SelectionEventMask::SELECTION_WINDOW_DESTROY
                | SelectionEventMask::SELECTION_CLIENT_CLOSE,
        )?;

        debug!(selection_window = window, atom, "Selection init");

        Ok(XwmSelection {
            atom,
            window,
            owner: x11rb::NONE,
            timestamp: CURRENT_TIME,
            request_time: CURRENT_TIME,
            wayland_mimes: None,
            announce_pending: false,
            targets_pending: false,
            incoming: None,
            queued: VecDeque::new(),
            outgoing: HashMap::new(),
        })
    }

    /// Whether the window manager itself holds the selection
    pub fn owned_by_wm(&self) -> bool {
        self.owner == self.window
    }

    /// Drop every transfer in flight or queued
    pub fn discard_transfers<D>(&mut self, loop_handle: &LoopHandle<'_, D>) {
        if let Some(transfer) = self.incoming.take() {
            transfer.destroy(loop_handle);
        }
        for transfer in self.queued.drain(..) {
            transfer.destroy(loop_handle);
        }
        for (_, transfer) in self.outgoing.drain() {
            transfer.destroy(loop_handle);
        }
        self.targets_pending = false;
    }

    /// A window went away, drop transfers it was the requestor of
    pub fn window_destroyed<D>(&mut self, window: X11Window, loop_handle: &LoopHandle<'_, D>) -> bool {
        let keys = self
            .outgoing
            .keys()
            .filter(|(requestor, _)| *requestor == window)
            .copied()
            .collect::<Vec<_>>();
        for key in &keys {
            if let Some(transfer) = self.outgoing.remove(key) {
                transfer.destroy(loop_handle);
            }
        }
        !keys.is_empty()
    }

    fn is_requestor(&self, window: X11Window, property: Atom) -> bool {
        self.outgoing.contains_key(&(window, property))
    }
}

impl<S: WaylandSurface> X11Wm<S> {
    pub(super) fn selection_mut(&mut self, slot: SelectionSlot) -> &mut XwmSelection {
        match slot {
            SelectionSlot::Clipboard => &mut self.clipboard,
            SelectionSlot::Primary => &mut self.primary,
            SelectionSlot::Dnd => &mut self.dnd.selection,
        }
    }

    fn selections(&self) -> [(SelectionSlot, &XwmSelection); 3] {
        [
            (SelectionSlot::Clipboard, &self.clipboard),
            (SelectionSlot::Primary, &self.primary),
            (SelectionSlot::Dnd, &self.dnd.selection),
        ]
    }

    fn slot_for_atom(&self, atom: Atom) -> Option<SelectionSlot> {
        self.selections()
            .into_iter()
            .find(|(_, selection)| selection.atom == atom)
            .map(|(slot, _)| slot)
    }

    fn slot_for_window(&self, window: X11Window) -> Option<SelectionSlot> {
        self.selections()
            .into_iter()
            .find(|(_, selection)| selection.window == window)
            .map(|(slot, _)| slot)
    }

    /// Whether `window` is one of the selection windows
    pub(super) fn is_selection_window(&self, window: X11Window) -> bool {
        self.slot_for_window(window).is_some()
    }

    pub(super) fn selection_requestor_destroyed<D>(&mut self, window: X11Window, loop_handle: &LoopHandle<'_, D>) {
        for slot in [SelectionSlot::Clipboard, SelectionSlot::Primary, SelectionSlot::Dnd] {
            if self.selection_mut(slot).window_destroyed(window, loop_handle) {
                debug!(window, ?slot, "Selection requestor destroyed, transfers dropped");
            }
        }
    }

    /// Notify the window manager whether X11 clients currently hold the wayland keyboard focus.
    ///
    /// X11 clients may only read wayland selections while focused. Selections set while they were
    /// unfocused are announced to X11 once focus is gained.
    pub fn set_keyboard_focus(&mut self, focused: bool) -> Result<(), ReplyOrIdError> {
        self.xwayland_focused = focused;
        if !focused {
            return Ok(());
        }

        let conn = self.conn.clone();
        for slot in [SelectionSlot::Clipboard, SelectionSlot::Primary] {
            let selection = self.selection_mut(slot);
            if selection.announce_pending && selection.wayland_mimes.is_some() {
                selection.announce_pending = false;
                conn.set_selection_owner(selection.window, selection.atom, CURRENT_TIME)?;
                debug!(?slot, "Announcing deferred wayland selection to X11");
            }
        }
        self.flush()?;
        Ok(())
    }

    /// Notify the window manager about a new wayland selection.
    ///
    /// `None` clears the selection. Selections originating from this window manager (forwarded
    /// through [`XwmHandler::new_selection`]) must not be passed back.
    pub fn new_selection<D>(
        &mut self,
        target: SelectionTarget,
        mime_types: Option<Vec<String>>,
        loop_handle: &LoopHandle<'_, D>,
    ) -> Result<(), ReplyOrIdError> {
        let conn = self.conn.clone();
        let focused = self.xwayland_focused;
        let selection = self.selection_mut(target.into());
        selection.discard_transfers(loop_handle);

        match mime_types {
            Some(mime_types) => {
                debug!(?target, ?mime_types, "New wayland selection");
                selection.wayland_mimes = Some(mime_types);
                if focused {
                    selection.announce_pending = false;
                    conn.set_selection_owner(selection.window, selection.atom, CURRENT_TIME)?;
                } else {
                    selection.announce_pending = true;
                }
            }
            None => {
                selection.wayland_mimes = None;
                selection.announce_pending = false;
                if selection.owned_by_wm() {
                    conn.set_selection_owner(x11rb::NONE, selection.atom, selection.timestamp)?;
                }
            }
        }
        self.flush()?;
        Ok(())
    }

    /// Request the current X11 selection to be written into `fd`.
    ///
    /// Requests are served one after another. The data is written once the X11 owner answers.
    pub fn send_selection(&mut self, target: SelectionTarget, mime_type: String, fd: OwnedFd) -> Result<(), ReplyOrIdError> {
        let selection = self.selection_mut(target.into());
        if selection.owner == x11rb::NONE || selection.owned_by_wm() {
            debug!(?target, mime_type, "No X11 owner to request the selection from");
            return Ok(());
        }
        selection.request_time = CURRENT_TIME;
        self.queue_conversion(target.into(), mime_type, fd)
    }

    pub(super) fn queue_conversion(&mut self, slot: SelectionSlot, mime_type: String, fd: OwnedFd) -> Result<(), ReplyOrIdError> {
        self.selection_mut(slot)
            .queued
            .push_back(IncomingTransfer::new(mime_type, fd));
        self.start_conversion(slot)?;
        self.flush()?;
        Ok(())
    }

    fn start_conversion(&mut self, slot: SelectionSlot) -> Result<(), ReplyOrIdError> {
        let conn = self.conn.clone();
        let atoms = self.atoms;
        let selection = self.selection_mut(slot);
        if selection.targets_pending || selection.incoming.is_some() {
            return Ok(());
        }

        while let Some(transfer) = selection.queued.pop_front() {
            let target = atom_from_mime(&transfer.mime_type, &conn, &atoms)?;
            conn.convert_selection(
                selection.window,
                selection.atom,
                target,
                atoms._WL_SELECTION,
                selection.request_time,
            )?;
            trace!(?slot, mime_type = transfer.mime_type, "Converting selection");
            selection.incoming = Some(transfer);
            break;
        }
        Ok(())
    }
}

/// Offer an event to the selection engine. Returns whether it was consumed.
pub(super) fn handle_event<D: XwmHandler>(
    state: &mut D,
    id: XwmId,
    loop_handle: &LoopHandle<'static, D>,
    event: &Event,
) -> Result<bool, ReplyOrIdError> {
    let xwm = state.xwm_state(id);
    match event {
        Event::SelectionRequest(request) => {
            let Some(target) = xwm.slot_for_atom(request.selection).and_then(SelectionSlot::target) else {
                return Ok(false);
            };
            selection_request(state, id, loop_handle, target, request)?;
            Ok(true)
        }
        Event::SelectionNotify(notify) => {
            let Some(slot) = xwm.slot_for_window(notify.requestor) else {
                return Ok(false);
            };
            selection_notify(state, id, loop_handle, slot, notify)?;
            Ok(true)
        }
        Event::XfixesSelectionNotify(notify) => match xwm.slot_for_atom(notify.selection) {
            Some(SelectionSlot::Dnd) => {
                dnd::xfixes_selection_notify(state, id, loop_handle, notify)?;
                Ok(true)
            }
            Some(slot) => {
                xfixes_selection_notify(state, id, loop_handle, slot, notify)?;
                Ok(true)
            }
            None => Ok(false),
        },
        Event::PropertyNotify(notify) => property_notify(state, id, loop_handle, notify),
        _ => Ok(false),
    }
}

fn xfixes_selection_notify<D: XwmHandler>(
    state: &mut D,
    id: XwmId,
    loop_handle: &LoopHandle<'static, D>,
    slot: SelectionSlot,
    notify: &XfixesSelectionNotifyEvent,
) -> Result<(), ReplyOrIdError> {
    let xwm = state.xwm_state(id);
    let conn = xwm.conn.clone();
    let atoms = xwm.atoms;
    let selection = xwm.selection_mut(slot);

    let previous = std::mem::replace(&mut selection.owner, notify.owner);
    if notify.owner == selection.window {
        selection.timestamp = notify.selection_timestamp;
        trace!(?slot, timestamp = notify.selection_timestamp, "Selection ownership acquired");
        return Ok(());
    }

    // any ownership change invalidates running transfers
    selection.discard_transfers(loop_handle);

    if notify.owner == x11rb::NONE {
        if previous != selection.window && previous != x11rb::NONE {
            debug!(?slot, "X11 selection cleared");
            if let Some(target) = slot.target() {
                state.cleared_selection(id, target);
            }
        }
        return Ok(());
    }

    debug!(?slot, owner = notify.owner, "New X11 selection owner");
    selection.wayland_mimes = None;
    selection.announce_pending = false;
    selection.targets_pending = true;
    conn.convert_selection(
        selection.window,
        selection.atom,
        atoms.TARGETS,
        atoms._WL_SELECTION,
        notify.timestamp,
    )?;
    Ok(())
}

fn selection_request<D: XwmHandler>(
    state: &mut D,
    id: XwmId,
    loop_handle: &LoopHandle<'static, D>,
    target: SelectionTarget,
    request: &SelectionRequestEvent,
) -> Result<(), ReplyOrIdError> {
    let xwm = state.xwm_state(id);
    let conn = xwm.conn.clone();
    let atoms = xwm.atoms;
    let focused = xwm.xwayland_focused;
    let chunk_size = xwm.config.incr_chunk_size;
    let requestor_mask = xwm.event_mask_for(request.requestor);
    let selection = xwm.selection_mut(target.into());

    if request.owner != selection.window {
        return send_selection_notify_resp(&conn, request, false);
    }
    if request.time != CURRENT_TIME && request.time < selection.timestamp && request.requestor != selection.owner {
        debug!(
            ?target,
            requestor = request.requestor,
            time = request.time,
            acquired = selection.timestamp,
            "Rejecting selection request predating the ownership"
        );
        return send_selection_notify_resp(&conn, request, false);
    }
    if !focused {
        debug!(?target, requestor = request.requestor, "X11 clients are unfocused, refusing selection request");
        return send_selection_notify_resp(&conn, request, false);
    }
    let Some(mime_types) = selection.wayland_mimes.clone() else {
        return send_selection_notify_resp(&conn, request, false);
    };

    if request.target == atoms.TARGETS {
        let mut targets = vec![atoms.TARGETS, atoms.TIMESTAMP];
        for mime in &mime_types {
            let atom = atom_from_mime(mime, &conn, &atoms)?;
            if !targets.contains(&atom) {
                targets.push(atom);
            }
        }
        conn.change_property32(
            PropMode::REPLACE,
            request.requestor,
            request.property,
            AtomEnum::ATOM,
            &targets,
        )?;
        return send_selection_notify_resp(&conn, request, true);
    }

    if request.target == atoms.TIMESTAMP {
        conn.change_property32(
            PropMode::REPLACE,
            request.requestor,
            request.property,
            AtomEnum::INTEGER,
            &[selection.timestamp],
        )?;
        return send_selection_notify_resp(&conn, request, true);
    }

    let Some(requested) = requested_mime_from_atom(request.target, &conn, &atoms)? else {
        debug!(?target, atom = request.target, "Unsupported selection target requested");
        return send_selection_notify_resp(&conn, request, false);
    };
    let Some(mime_type) = negotiate(&requested, &mime_types).map(str::to_owned) else {
        return send_selection_notify_resp(&conn, request, false);
    };
    if mime_type != requested {
        debug!(?target, requested, offered = mime_type, "Substituting selection mime type");
    }

    let key = (request.requestor, request.property);
    if selection.is_requestor(key.0, key.1) {
        warn!(?target, requestor = request.requestor, "Requestor already has a transfer on this property");
        return send_selection_notify_resp(&conn, request, false);
    }

    let (read_fd, write_fd) = match rustix::pipe::pipe_with(PipeFlags::CLOEXEC | PipeFlags::NONBLOCK) {
        Ok(pipe) => pipe,
        Err(err) => {
            warn!(?err, "Failed to create pipe for selection transfer");
            return send_selection_notify_resp(&conn, request, false);
        }
    };

    let mut transfer = OutgoingTransfer::new(*request, chunk_size);
    let source = Generic::new(read_fd, Interest::READ, Mode::Level);
    match loop_handle.insert_source(source, move |_, fd, state| {
        Ok(outgoing_readable(state, id, target, key, fd.as_fd()))
    }) {
        Ok(token) => transfer.token = Some(token),
        Err(err) => {
            warn!(err = ?err.error, "Failed to insert selection transfer into the event loop");
            return send_selection_notify_resp(&conn, request, false);
        }
    }

    // property deletes of the requestor acknowledge chunks
    conn.change_window_attributes(
        request.requestor,
        &ChangeWindowAttributesAux::new().event_mask(requestor_mask),
    )?;
    conn.change_property32(
        PropMode::REPLACE,
        request.requestor,
        request.property,
        atoms.INCR,
        &[chunk_size as u32],
    )?;
    send_selection_notify_resp(&conn, request, true)?;
    selection.outgoing.insert(key, transfer);

    trace!(?target, requestor = request.requestor, mime_type, "Starting selection transfer");
    state.send_selection(id, target, mime_type, write_fd);
    Ok(())
}

fn outgoing_readable<D: XwmHandler>(
    state: &mut D,
    id: XwmId,
    target: SelectionTarget,
    key: (X11Window, Atom),
    fd: BorrowedFd<'_>,
) -> PostAction {
    let xwm = state.xwm_state(id);
    let conn = xwm.conn.clone();
    let selection = xwm.selection_mut(target.into());
    let Some(transfer) = selection.outgoing.get_mut(&key) else {
        return PostAction::Remove;
    };

    let mut buf = vec![0; transfer.read_size()];
    let action = match rustix::io::read(fd, &mut buf) {
        Ok(len) => {
            trace!(requestor = key.0, len, "Selection transfer became readable");
            transfer.on_data(&buf[..len])
        }
        Err(rustix::io::Errno::AGAIN) | Err(rustix::io::Errno::INTR) => return PostAction::Continue,
        Err(err) => {
            debug!(requestor = key.0, ?err, "Reading selection data failed, finishing transfer");
            transfer.on_error()
        }
    };

    if let OutgoingAction::Write(chunk) = action {
        if let Err(err) = write_chunk(&conn, &transfer.request, &chunk) {
            warn!(?err, requestor = key.0, "Failed to write selection chunk");
        }
    }

    let post = if transfer.is_eof() {
        transfer.token = None;
        PostAction::Remove
    } else if transfer.wants_data() {
        PostAction::Continue
    } else {
        PostAction::Disable
    };
    if let Err(err) = xwm.flush() {
        warn!(?err, "Failed to flush selection chunk");
    }
    post
}

fn write_chunk(conn: &RustConnection, request: &SelectionRequestEvent, chunk: &[u8]) -> Result<(), ReplyOrIdError> {
    trace!(requestor = request.requestor, len = chunk.len(), "Sending selection chunk");
    conn.change_property8(
        PropMode::REPLACE,
        request.requestor,
        request.property,
        request.target,
        chunk,
    )?;
    Ok(())
}

fn property_notify<D: XwmHandler>(
    state: &mut D,
    id: XwmId,
    loop_handle: &LoopHandle<'static, D>,
    notify: &PropertyNotifyEvent,
) -> Result<bool, ReplyOrIdError> {
    let xwm = state.xwm_state(id);

    if notify.state == Property::NEW_VALUE && notify.atom == xwm.atoms._WL_SELECTION {
        let Some(slot) = xwm.slot_for_window(notify.window) else {
            return Ok(false);
        };
        let incr = xwm
            .selection_mut(slot)
            .incoming
            .as_ref()
            .is_some_and(IncomingTransfer::is_incr);
        if incr {
            read_incoming(xwm, slot, loop_handle)?;
        }
        return Ok(true);
    }

    if notify.state == Property::DELETE {
        for slot in [SelectionSlot::Clipboard, SelectionSlot::Primary] {
            if xwm.selection_mut(slot).is_requestor(notify.window, notify.atom) {
                outgoing_property_deleted(xwm, slot, (notify.window, notify.atom), loop_handle)?;
                return Ok(true);
            }
        }
    }

    Ok(xwm.is_selection_window(notify.window))
}

fn outgoing_property_deleted<S: WaylandSurface, D>(
    xwm: &mut X11Wm<S>,
    slot: SelectionSlot,
    key: (X11Window, Atom),
    loop_handle: &LoopHandle<'static, D>,
) -> Result<(), ReplyOrIdError> {
    let conn = xwm.conn.clone();
    let selection = xwm.selection_mut(slot);
    let Some(transfer) = selection.outgoing.get_mut(&key) else {
        return Ok(());
    };

    match transfer.on_property_deleted() {
        OutgoingAction::Write(chunk) => write_chunk(&conn, &transfer.request, &chunk)?,
        OutgoingAction::Done => {
            debug!(requestor = key.0, "Selection transfer completed");
            if let Some(transfer) = selection.outgoing.remove(&key) {
                transfer.destroy(loop_handle);
            }
            return Ok(());
        }
        OutgoingAction::Wait => {}
    }

    if transfer.wants_data() {
        if let Some(token) = transfer.token.as_ref() {
            if let Err(err) = loop_handle.enable(token) {
                warn!(?err, "Failed to resume selection transfer");
            }
        }
    }
    Ok(())
}

fn selection_notify<D: XwmHandler>(
    state: &mut D,
    id: XwmId,
    loop_handle: &LoopHandle<'static, D>,
    slot: SelectionSlot,
    notify: &SelectionNotifyEvent,
) -> Result<(), ReplyOrIdError> {
    let xwm = state.xwm_state(id);
    let conn = xwm.conn.clone();
    let atoms = xwm.atoms;

    if notify.target == atoms.TARGETS {
        let selection = xwm.selection_mut(slot);
        if !selection.targets_pending {
            return Ok(());
        }
        selection.targets_pending = false;

        let mime_types = if notify.property == x11rb::NONE {
            Vec::new()
        } else {
            let reply = conn
                .get_property(true, selection.window, atoms._WL_SELECTION, AtomEnum::ANY, 0, 4096)?
                .reply()?;
            let mime_types = match reply.value32() {
                Some(values) => values
                    .filter_map(|atom| mime_from_atom(atom, &conn, &atoms).transpose())
                    .collect::<Result<Vec<_>, _>>()?,
                None => Vec::new(),
            };
            mime_types
        };

        xwm.start_conversion(slot)?;
        if let Some(target) = slot.target() {
            debug!(?target, ?mime_types, "New X11 selection");
            state.new_selection(id, target, mime_types);
        }
        return Ok(());
    }

    let selection = xwm.selection_mut(slot);
    if selection.incoming.is_none() {
        return Ok(());
    }

    if notify.property == x11rb::NONE {
        debug!(?slot, target = notify.target, "Selection conversion refused by the owner");
        if let Some(transfer) = selection.incoming.take() {
            transfer.destroy(loop_handle);
        }
        return xwm.start_conversion(slot);
    }

    read_incoming(xwm, slot, loop_handle)
}

fn read_incoming<S: WaylandSurface, D: XwmHandler>(
    xwm: &mut X11Wm<S>,
    slot: SelectionSlot,
    loop_handle: &LoopHandle<'static, D>,
) -> Result<(), ReplyOrIdError> {
    let conn = xwm.conn.clone();
    let atoms = xwm.atoms;
    let id = xwm.id;
    let selection = xwm.selection_mut(slot);
    let window = selection.window;
    let Some(transfer) = selection.incoming.as_mut() else {
        return Ok(());
    };

    let reply = conn
        .get_property(false, window, atoms._WL_SELECTION, AtomEnum::ANY, 0, 0x1fffffff)?
        .reply()?;

    match transfer.property_received(reply.type_ == atoms.INCR, &reply.value) {
        IncomingAction::WaitForProperty => {
            conn.delete_property(window, atoms._WL_SELECTION)?;
        }
        IncomingAction::Done => {
            conn.delete_property(window, atoms._WL_SELECTION)?;
            if let Some(transfer) = selection.incoming.take() {
                transfer.destroy(loop_handle);
            }
            xwm.start_conversion(slot)?;
        }
        IncomingAction::WaitForWritable => {
            if let Some(fd) = transfer.take_fd() {
                let source = Generic::new(fd, Interest::WRITE, Mode::Level);
                match loop_handle.insert_source(source, move |_, fd, state| {
                    Ok(incoming_writable(state, id, slot, fd.as_fd()))
                }) {
                    Ok(token) => transfer.token = Some(token),
                    Err(err) => {
                        warn!(err = ?err.error, "Failed to insert selection transfer into the event loop");
                        conn.delete_property(window, atoms._WL_SELECTION)?;
                        selection.incoming = None;
                        xwm.start_conversion(slot)?;
                    }
                }
            } else if let Some(token) = transfer.token.as_ref() {
                if let Err(err) = loop_handle.enable(token) {
                    warn!(?err, "Failed to resume selection transfer");
                }
            }
        }
    }
    Ok(())
}

fn incoming_writable<D: XwmHandler>(state: &mut D, id: XwmId, slot: SelectionSlot, fd: BorrowedFd<'_>) -> PostAction {
    let xwm = state.xwm_state(id);
    let conn = xwm.conn.clone();
    let atoms = xwm.atoms;
    let selection = xwm.selection_mut(slot);
    let window = selection.window;
    let Some(transfer) = selection.incoming.as_mut() else {
        return PostAction::Remove;
    };

    let result = transfer.write_selection(fd);
    let post = match transfer.after_write(result) {
        IncomingAction::WaitForWritable => return PostAction::Continue,
        IncomingAction::WaitForProperty => {
            // ask the owner for the next chunk
            if let Err(err) = conn.delete_property(window, atoms._WL_SELECTION) {
                warn!(?err, ?slot, "Failed to request the next selection chunk");
            }
            PostAction::Disable
        }
        IncomingAction::Done => {
            trace!(?slot, mime_type = transfer.mime_type, "Selection transfer complete");
            if transfer.is_incr() {
                if let Err(err) = conn.delete_property(window, atoms._WL_SELECTION) {
                    warn!(?err, ?slot, "Failed to clear the selection property");
                }
            }
            transfer.token = None;
            selection.incoming = None;
            if let Err(err) = xwm.start_conversion(slot) {
                warn!(?err, ?slot, "Failed to start queued selection conversion");
            }
            PostAction::Remove
        }
    };
    if let Err(err) = xwm.flush() {
        warn!(?err, ?slot, "Failed to flush selection transfer");
    }
    post
}

pub(super) fn send_selection_notify_resp(
    conn: &RustConnection,
    req: &SelectionRequestEvent,
    success: bool,
) -> Result<(), ReplyOrIdError> {
    conn.send_event(
        false,
        req.requestor,
        EventMask::NO_EVENT,
        SelectionNotifyEvent {
            response_type: SELECTION_NOTIFY_EVENT,
            sequence: 0,
            time: req.time,
            requestor: req.requestor,
            selection: req.selection,
            target: req.target,
            property: if success {
                req.property
            } else {
                AtomEnum::NONE.into()
            },
        },
    )?;
    Ok(())
}
