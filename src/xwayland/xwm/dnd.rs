//! Drags started by X11 clients and dropped onto wayland surfaces.
//!
//! While an X11 client owns `XdndSelection` the window manager maps a screen sized proxy window
//! on top of the X11 stacking order, so the X11 source talks XDND to it. Positions are resolved
//! into wayland surfaces by the compositor and every change of the target (or of the source)
//! replaces the [`DataOffer`] as a whole.

use std::os::unix::io::OwnedFd;

use calloop::LoopHandle;
use tracing::{debug, trace, warn};
use x11rb::{
    connection::Connection as _,
    errors::ReplyOrIdError,
    protocol::{
        xfixes::SelectionNotifyEvent,
        xproto::{
            Atom, AtomEnum, ClientMessageData, ClientMessageEvent, ConfigureWindowAux, ConnectionExt as _,
            CreateWindowAux, EventMask, PropMode, Screen, StackMode, Window as X11Window, WindowClass,
        },
    },
    rust_connection::RustConnection,
    wrapper::ConnectionExt as _,
};

use super::{
    selection::{mime_from_atom, SelectionSlot, XwmSelection},
    surface::WaylandSurface,
    Atoms, X11Wm, XwmHandler, XwmId,
};
use crate::utils::Point;

const DND_VERSION: u32 = 5;

/// An inbound drag of an X11 client hovering a wayland surface
#[derive(Debug, Clone, PartialEq)]
pub struct DataOffer<S> {
    /// Surface the drag is currently over
    pub surface: S,
    /// X11 window the drag originates from
    pub source: X11Window,
    /// Mime types offered by the source
    pub mime_types: Vec<String>,
    /// Last pointer location in root coordinates
    pub location: Point,
    /// Timestamp of the last position update
    pub timestamp: u32,
}

/// Effect of a drag update on the current offer
#[derive(Debug, Clone, PartialEq)]
pub(super) enum OfferChange<S> {
    /// Nothing changed for the compositor
    None,
    /// A new offer replaces the previous one, if any
    New(DataOffer<S>),
    /// The offer moved within its surface
    Motion(DataOffer<S>),
    /// The previous offer is gone
    Cancelled,
}

/// One drag of an X11 selection owner
#[derive(Debug)]
pub(super) struct InboundDrag<S> {
    pub owner: X11Window,
    pub source: Option<X11Window>,
    pub version: u32,
    pub mime_types: Vec<String>,
    pub offer: Option<DataOffer<S>>,
    pub dropped: bool,
}

impl<S: WaylandSurface> InboundDrag<S> {
    pub fn new(owner: X11Window) -> Self {
        InboundDrag {
            owner,
            source: None,
            version: 0,
            mime_types: Vec::new(),
            offer: None,
            dropped: false,
        }
    }

    /// `XdndEnter` from `source`
    pub fn enter(&mut self, source: X11Window, version: u32, mime_types: Vec<String>) -> OfferChange<S> {
        self.source = Some(source);
        self.version = version;
        self.mime_types = mime_types;
        self.dropped = false;
        match self.offer.take() {
            Some(_) => OfferChange::Cancelled,
            None => OfferChange::None,
        }
    }

    /// `XdndPosition` resolved to `target`
    pub fn position(
        &mut self,
        source: X11Window,
        location: Point,
        timestamp: u32,
        target: Option<S>,
    ) -> OfferChange<S> {
        if self.source != Some(source) || self.dropped {
            return OfferChange::None;
        }

        match (target, self.offer.as_mut()) {
            (None, None) => OfferChange::None,
            (None, Some(_)) => {
                self.offer = None;
                OfferChange::Cancelled
            }
            (Some(surface), Some(offer)) if offer.surface == surface && offer.source == source => {
                offer.location = location;
                offer.timestamp = timestamp;
                OfferChange::Motion(offer.clone())
            }
            (Some(surface), _) => {
                let offer = DataOffer {
                    surface,
                    source,
                    mime_types: self.mime_types.clone(),
                    location,
                    timestamp,
                };
                self.offer = Some(offer.clone());
                OfferChange::New(offer)
            }
        }
    }

    /// `XdndLeave` from `source`
    pub fn leave(&mut self, source: X11Window) -> OfferChange<S> {
        if self.source != Some(source) || self.dropped {
            return OfferChange::None;
        }
        self.source = None;
        match self.offer.take() {
            Some(_) => OfferChange::Cancelled,
            None => OfferChange::None,
        }
    }

    /// `XdndDrop` from `source`, returns the offer that got the drop
    pub fn drop_offer(&mut self, source: X11Window, timestamp: u32) -> Option<DataOffer<S>> {
        if self.source != Some(source) {
            return None;
        }
        let offer = self.offer.as_mut()?;
        offer.timestamp = timestamp;
        self.dropped = true;
        Some(offer.clone())
    }
}

#[derive(Debug)]
pub(super) struct XwmDnd<S> {
    pub selection: XwmSelection,
    pub proxy: Option<X11Window>,
    pub drag: Option<InboundDrag<S>>,
}

impl<S: WaylandSurface> XwmDnd<S> {
    pub fn new(conn: &RustConnection, screen: &Screen, atoms: &Atoms) -> Result<Self, ReplyOrIdError> {
        let selection = XwmSelection::new(conn, screen, atoms, atoms.XdndSelection)?;
        Ok(XwmDnd {
            selection,
            proxy: None,
            drag: None,
        })
    }

    pub fn has_window(&self, window: X11Window) -> bool {
        self.proxy == Some(window) || self.selection.window == window
    }
}

fn create_proxy(conn: &RustConnection, screen: &Screen, atoms: &Atoms) -> Result<X11Window, ReplyOrIdError> {
    let window = conn.generate_id()?;
    conn.create_window(
        screen.root_depth,
        window,
        screen.root,
        0,
        0,
        screen.width_in_pixels,
        screen.height_in_pixels,
        0,
        WindowClass::INPUT_OUTPUT,
        screen.root_visual,
        &CreateWindowAux::new()
            .event_mask(EventMask::PROPERTY_CHANGE)
            .override_redirect(1),
    )?;
    conn.change_property32(PropMode::REPLACE, window, atoms.XdndAware, AtomEnum::ATOM, &[DND_VERSION])?;
    conn.change_property8(
        PropMode::REPLACE,
        window,
        AtomEnum::WM_NAME,
        atoms.UTF8_STRING,
        "XDND proxy".as_bytes(),
    )?;
    conn.map_window(window)?;
    conn.configure_window(window, &ConfigureWindowAux::new().stack_mode(StackMode::ABOVE))?;
    Ok(window)
}

impl<S: WaylandSurface> X11Wm<S> {
    fn destroy_proxy(&mut self) -> Result<(), ReplyOrIdError> {
        if let Some(proxy) = self.dnd.proxy.take() {
            trace!(proxy, "Destroying XDND proxy");
            self.conn.destroy_window(proxy)?;
        }
        Ok(())
    }

    /// Request the data of the dropped offer to be written into `fd`.
    ///
    /// Only valid after [`XwmHandler::drag_dropped`] and before [`X11Wm::finish_drag`].
    pub fn receive_drag_data(&mut self, mime_type: String, fd: OwnedFd) -> Result<(), ReplyOrIdError> {
        let Some(timestamp) = self
            .dnd
            .drag
            .as_ref()
            .filter(|drag| drag.dropped)
            .and_then(|drag| drag.offer.as_ref())
            .map(|offer| offer.timestamp)
        else {
            debug!(mime_type, "No dropped X11 drag to receive data from");
            return Ok(());
        };
        self.dnd.selection.request_time = timestamp;
        self.queue_conversion(SelectionSlot::Dnd, mime_type, fd)
    }

    /// Finish a dropped drag, telling the X11 source whether the drop was accepted
    pub fn finish_drag(&mut self, accepted: bool) -> Result<(), ReplyOrIdError> {
        let Some(drag) = self.dnd.drag.as_mut().filter(|drag| drag.dropped) else {
            return Ok(());
        };
        drag.dropped = false;
        drag.offer = None;
        let source = drag.source.take();

        if let (Some(source), Some(proxy)) = (source, self.dnd.proxy) {
            let action = if accepted {
                self.atoms.XdndActionCopy
            } else {
                x11rb::NONE
            };
            send_xdnd(&self.conn, source, self.atoms.XdndFinished, [proxy, accepted as u32, action, 0, 0])?;
        }
        self.destroy_proxy()?;
        self.flush()?;
        Ok(())
    }
}

fn send_xdnd(conn: &RustConnection, target: X11Window, type_: Atom, data: [u32; 5]) -> Result<(), ReplyOrIdError> {
    conn.send_event(
        false,
        target,
        EventMask::NO_EVENT,
        ClientMessageEvent::new(32, target, type_, data),
    )?;
    Ok(())
}

pub(super) fn xfixes_selection_notify<D: XwmHandler>(
    state: &mut D,
    id: XwmId,
    loop_handle: &LoopHandle<'static, D>,
    event: &SelectionNotifyEvent,
) -> Result<(), ReplyOrIdError> {
    let xwm = state.xwm_state(id);
    xwm.dnd.selection.owner = event.owner;
    if event.owner == xwm.dnd.selection.window {
        xwm.dnd.selection.timestamp = event.selection_timestamp;
        return Ok(());
    }
    xwm.dnd.selection.discard_transfers(loop_handle);

    if let Some(drag) = xwm.dnd.drag.as_ref() {
        if drag.owner == event.owner {
            warn!(owner = event.owner, "Got another selection notify for an already active drag, ignoring");
            return Ok(());
        }
    }

    // any previous drag is stale now
    let had_offer = xwm
        .dnd
        .drag
        .take()
        .is_some_and(|drag| drag.offer.is_some() && !drag.dropped);
    xwm.destroy_proxy()?;
    if had_offer {
        state.drag_offer_cancelled(id);
    }

    if event.owner == x11rb::NONE {
        trace!("XDND selection went away");
        return Ok(());
    }

    if !state.allow_drag(id) {
        debug!(owner = event.owner, "Compositor refused X11 drag");
        return Ok(());
    }

    trace!(owner = event.owner, "New XDND selection");
    let xwm = state.xwm_state(id);
    let proxy = create_proxy(&xwm.conn, &xwm.screen, &xwm.atoms)?;
    xwm.dnd.proxy = Some(proxy);
    xwm.dnd.drag = Some(InboundDrag::new(event.owner));
    Ok(())
}

/// Handle a client message addressed to the drag proxy. Returns whether it was consumed.
pub(super) fn handle_client_message<D: XwmHandler>(
    state: &mut D,
    id: XwmId,
    type_: Atom,
    data: ClientMessageData,
) -> Result<bool, ReplyOrIdError> {
    let xwm = state.xwm_state(id);
    let atoms = xwm.atoms;
    let data = data.as_data32();
    let source = data[0];

    let change = if type_ == atoms.XdndEnter {
        let Some(drag) = xwm.dnd.drag.as_mut() else {
            return Ok(true);
        };
        let version = data[1] >> 24;
        if version > DND_VERSION {
            warn!(version, "Unsupported XDND version");
            return Ok(true);
        }
        trace!(source, version, "Got XdndEnter");

        let conn = xwm.conn.clone();
        let types = if (data[1] & 1) == 0 {
            data[2..5].iter().copied().filter(|atom| *atom != x11rb::NONE).collect::<Vec<_>>()
        } else {
            let reply = conn
                .get_property(false, source, atoms.XdndTypeList, AtomEnum::ANY, 0, 0x1fffffff)?
                .reply()?;
            reply.value32().map(|values| values.collect()).unwrap_or_default()
        };
        let mime_types = types
            .into_iter()
            .filter_map(|atom| mime_from_atom(atom, &conn, &atoms).transpose())
            .collect::<Result<Vec<_>, _>>()?;
        drag.enter(source, version, mime_types)
    } else if type_ == atoms.XdndPosition {
        let Some(drag) = xwm.dnd.drag.as_ref() else {
            return Ok(true);
        };
        if drag.source != Some(source) {
            debug!(source, expected = ?drag.source, "XdndPosition from unknown source, ignoring");
            return Ok(true);
        }
        let location = Point::from(((data[2] >> 16) as i16 as i32, (data[2] & 0xffff) as i16 as i32));
        let timestamp = data[3];

        let target = state.drag_target_at(id, location);
        let xwm = state.xwm_state(id);
        let Some(drag) = xwm.dnd.drag.as_mut() else {
            return Ok(true);
        };
        let change = drag.position(source, location, timestamp, target);
        let accepted = drag.offer.is_some();

        if let Some(proxy) = xwm.dnd.proxy {
            let action = if accepted {
                atoms.XdndActionCopy
            } else {
                x11rb::NONE
            };
            // bit 1: keep sending positions
            let flags = accepted as u32 | 1 << 1;
            send_xdnd(&xwm.conn, source, atoms.XdndStatus, [proxy, flags, 0, 0, action])?;
        }
        change
    } else if type_ == atoms.XdndLeave {
        trace!(source, "Got XdndLeave");
        match xwm.dnd.drag.as_mut() {
            Some(drag) => drag.leave(source),
            None => return Ok(true),
        }
    } else if type_ == atoms.XdndDrop {
        trace!(source, "Got XdndDrop");
        let Some(drag) = xwm.dnd.drag.as_mut() else {
            return Ok(true);
        };
        let timestamp = if drag.version >= 1 {
            data[2]
        } else {
            x11rb::CURRENT_TIME
        };
        match drag.drop_offer(source, timestamp) {
            Some(offer) => {
                state.drag_dropped(id, &offer);
                return Ok(true);
            }
            None => {
                if let Some(proxy) = xwm.dnd.proxy {
                    send_xdnd(&xwm.conn, source, atoms.XdndFinished, [proxy, 0, x11rb::NONE, 0, 0])?;
                }
                OfferChange::None
            }
        }
    } else {
        return Ok(false);
    };

    match change {
        OfferChange::None => {}
        OfferChange::New(offer) => state.new_drag_offer(id, &offer),
        OfferChange::Motion(offer) => state.drag_motion(id, &offer),
        OfferChange::Cancelled => state.drag_offer_cancelled(id),
    }
    Ok(true)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::xwayland::xwm::test_support::TestSurface;

    fn entered() -> InboundDrag<TestSurface> {
        let mut drag = InboundDrag::new(10);
        assert_eq!(drag.enter(11, 5, vec!["text/uri-list".into()]), OfferChange::None);
        drag
    }

    #[test]
    fn entering_a_surface_creates_an_offer() {
        let mut drag = entered();
        let surface = TestSurface::new(1);
        match drag.position(11, (5, 5).into(), 100, Some(surface.clone())) {
            OfferChange::New(offer) => {
                assert_eq!(offer.surface, surface);
                assert_eq!(offer.source, 11);
                assert_eq!(offer.mime_types, vec!["text/uri-list".to_string()]);
            }
            other => panic!("unexpected change {:?}", other),
        }
        assert!(matches!(
            drag.position(11, (6, 6).into(), 101, Some(surface)),
            OfferChange::Motion(DataOffer { timestamp: 101, .. })
        ));
    }

    #[test]
    fn new_surface_replaces_the_offer() {
        let mut drag = entered();
        drag.position(11, (0, 0).into(), 1, Some(TestSurface::new(1)));
        let second = TestSurface::new(2);
        match drag.position(11, (0, 0).into(), 2, Some(second.clone())) {
            OfferChange::New(offer) => assert_eq!(offer.surface, second),
            other => panic!("unexpected change {:?}", other),
        }
        assert_eq!(drag.offer.as_ref().map(|o| o.surface.clone()), Some(second));
    }

    #[test]
    fn new_source_replaces_the_offer() {
        let mut drag = entered();
        let surface = TestSurface::new(1);
        drag.position(11, (0, 0).into(), 1, Some(surface.clone()));
        assert_eq!(drag.enter(12, 5, vec!["text/plain".into()]), OfferChange::Cancelled);

        // the old source is no longer listened to
        assert_eq!(drag.position(11, (0, 0).into(), 2, Some(surface.clone())), OfferChange::None);
        match drag.position(12, (0, 0).into(), 3, Some(surface)) {
            OfferChange::New(offer) => {
                assert_eq!(offer.source, 12);
                assert_eq!(offer.mime_types, vec!["text/plain".to_string()]);
            }
            other => panic!("unexpected change {:?}", other),
        }
    }

    #[test]
    fn leaving_all_surfaces_cancels() {
        let mut drag = entered();
        drag.position(11, (0, 0).into(), 1, Some(TestSurface::new(1)));
        assert_eq!(drag.position(11, (9, 9).into(), 2, None), OfferChange::Cancelled);
        assert_eq!(drag.position(11, (9, 9).into(), 3, None), OfferChange::None);
    }

    #[test]
    fn drop_needs_an_offer() {
        let mut drag = entered();
        assert!(drag.drop_offer(11, 5).is_none());
        drag.position(11, (0, 0).into(), 1, Some(TestSurface::new(1)));
        assert!(drag.drop_offer(12, 5).is_none());
        let offer = drag.drop_offer(11, 5).unwrap();
        assert_eq!(offer.timestamp, 5);
        assert!(drag.dropped);
        // positions after the drop are ignored
        assert_eq!(drag.position(11, (1, 1).into(), 6, None), OfferChange::None);
    }

    #[test]
    fn leave_from_other_source_is_ignored() {
        let mut drag = entered();
        drag.position(11, (0, 0).into(), 1, Some(TestSurface::new(1)));
        assert_eq!(drag.leave(12), OfferChange::None);
        assert_eq!(drag.leave(11), OfferChange::Cancelled);
    }
}
