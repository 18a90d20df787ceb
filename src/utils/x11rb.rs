//! Helper utilities for using x11rb as an event source in calloop.
//!
//! The source polls the connection socket directly on the loop thread. x11rb may pull events off
//! the socket while a caller waits for a reply, leaving them queued inside the connection without
//! the socket becoming readable again. Anything that waits for replies outside of a dispatch of
//! this source is expected to call [`X11Source::waker`]'s `ping` afterwards, so the queue gets
//! drained on the next loop iteration.

use std::{
    io,
    os::unix::io::{AsFd, BorrowedFd},
    sync::Arc,
};

use calloop::{
    generic::Generic,
    ping::{make_ping, Ping, PingError, PingSource},
    EventSource, Interest, Mode, Poll, PostAction, Readiness, Token, TokenFactory,
};
use tracing::{error, trace};
use x11rb::{connection::Connection as _, errors::ConnectionError, protocol::Event, rust_connection::RustConnection};

/// Events produced by an [`X11Source`]
#[derive(Debug)]
pub enum X11SourceEvent {
    /// An event read from the connection
    Event(Event),
    /// All queued events of this dispatch were delivered and the connection should be flushed
    Flush,
    /// The connection is gone; the source removes itself afterwards
    Disconnected(ConnectionError),
}

/// Errors of the [`X11Source`] itself, not of the X11 connection
#[derive(Debug, thiserror::Error)]
pub enum X11SourceError {
    /// Polling the connection socket failed
    #[error("Polling the X11 socket failed: {0}")]
    Io(#[from] io::Error),
    /// The wakeup channel failed
    #[error("X11 source wakeup failed: {0}")]
    Ping(#[from] PingError),
}

#[derive(Debug)]
struct ConnectionFd(Arc<RustConnection>);

impl AsFd for ConnectionFd {
    fn as_fd(&self) -> BorrowedFd<'_> {
        self.0.stream().as_fd()
    }
}

/// Integration of an x11rb X11 connection with calloop.
///
/// All events queued on the connection are drained in one pass per dispatch, in arrival order.
#[derive(Debug)]
pub struct X11Source {
    connection: Arc<RustConnection>,
    socket: Generic<ConnectionFd>,
    wakeup: PingSource,
    waker: Ping,
}

impl X11Source {
    /// Create a new X11 source for the given connection.
    pub fn new(connection: Arc<RustConnection>) -> io::Result<Self> {
        let (waker, wakeup) = make_ping()?;
        let socket = Generic::new(
            ConnectionFd(Arc::clone(&connection)),
            Interest::READ,
            Mode::Level,
        );
        Ok(X11Source {
            connection,
            socket,
            wakeup,
            waker,
        })
    }

    /// Handle to schedule a drain of already queued events
    pub fn waker(&self) -> Ping {
        self.waker.clone()
    }
}

impl EventSource for X11Source {
    type Event = X11SourceEvent;
    type Metadata = ();
    type Ret = ();
    type Error = X11SourceError;

    fn process_events<C>(
        &mut self,
        readiness: Readiness,
        token: Token,
        mut callback: C,
    ) -> Result<PostAction, Self::Error>
    where
        C: FnMut(Self::Event, &mut Self::Metadata) -> Self::Ret,
    {
        let mut woken = false;
        let mut hangup = false;
        self.socket.process_events(readiness, token, |readiness, _| {
            woken = true;
            hangup |= readiness.error;
            Ok(PostAction::Continue)
        })?;
        self.wakeup.process_events(readiness, token, |_, _| {
            woken = true;
        })?;
        if !woken {
            return Ok(PostAction::Continue);
        }

        let mut processed = 0usize;
        loop {
            match self.connection.poll_for_event() {
                Ok(Some(event)) => {
                    processed += 1;
                    callback(X11SourceEvent::Event(event), &mut ());
                }
                Ok(None) => break,
                Err(err) => {
                    error!(?err, "X11 connection failed");
                    callback(X11SourceEvent::Disconnected(err), &mut ());
                    return Ok(PostAction::Remove);
                }
            }
        }
        trace!(processed, "Drained X11 events");

        if hangup {
            error!("X11 socket hung up");
            callback(
                X11SourceEvent::Disconnected(ConnectionError::IoError(io::ErrorKind::BrokenPipe.into())),
                &mut (),
            );
            return Ok(PostAction::Remove);
        }

        if processed > 0 {
            callback(X11SourceEvent::Flush, &mut ());
        }
        Ok(PostAction::Continue)
    }

    fn register(&mut self, poll: &mut Poll, factory: &mut TokenFactory) -> calloop::Result<()> {
        self.socket.register(poll, factory)?;
        self.wakeup.register(poll, factory)
    }

    fn reregister(&mut self, poll: &mut Poll, factory: &mut TokenFactory) -> calloop::Result<()> {
        self.socket.reregister(poll, factory)?;
        self.wakeup.reregister(poll, factory)
    }

    fn unregister(&mut self, poll: &mut Poll) -> calloop::Result<()> {
        self.socket.unregister(poll)?;
        self.wakeup.unregister(poll)
    }
}
