//! State of single selection transfers.
//!
//! The types in here do not talk to the X server themselves. They consume what arrived (pipe data,
//! property deletions, property values) and tell the caller what to send next.

use std::{
    fmt, io,
    os::unix::io::{AsFd, OwnedFd},
};

use calloop::{LoopHandle, RegistrationToken};
use tracing::warn;
use x11rb::protocol::xproto::SelectionRequestEvent;

/// What the owner of an [`OutgoingTransfer`] has to do next
#[derive(Debug, PartialEq, Eq)]
pub enum OutgoingAction {
    /// Replace the requestor's property with this chunk.
    ///
    /// An empty chunk terminates the transfer.
    Write(Vec<u8>),
    /// Nothing to do until more data arrives or the requestor consumed the last chunk
    Wait,
    /// The requestor consumed the terminating chunk
    Done,
}

/// A transfer of wayland data into the property of an X11 requestor.
///
/// Transfers always use the `INCR` convention, as the amount of data coming through the pipe is
/// unknown up front. The requestor deleting the property acknowledges every chunk, including the
/// `INCR` marker itself.
pub struct OutgoingTransfer {
    pub(crate) request: SelectionRequestEvent,
    pub(crate) token: Option<RegistrationToken>,
    chunk_size: usize,
    buffer: Vec<u8>,
    property_set: bool,
    eof: bool,
    sent_finished: bool,
}

impl fmt::Debug for OutgoingTransfer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("OutgoingTransfer")
            .field("requestor", &self.request.requestor)
            .field("property", &self.request.property)
            .field("token", &self.token)
            .field("buffered", &self.buffer.len())
            .field("property_set", &self.property_set)
            .field("eof", &self.eof)
            .field("sent_finished", &self.sent_finished)
            .finish()
    }
}

impl OutgoingTransfer {
    /// Start a transfer. The caller writes the `INCR` marker right away, which counts as the first
    /// unacknowledged property write.
    pub fn new(request: SelectionRequestEvent, chunk_size: usize) -> Self {
        OutgoingTransfer {
            request,
            token: None,
            chunk_size: chunk_size.max(1),
            buffer: Vec::new(),
            property_set: true,
            eof: false,
            sent_finished: false,
        }
    }

    /// Whether the pipe should be read further.
    ///
    /// Reading pauses while a full chunk is buffered and waits for the requestor.
    pub fn wants_data(&self) -> bool {
        !self.eof && self.buffer.len() < self.chunk_size
    }

    /// Maximum number of bytes the next read should fetch
    pub fn read_size(&self) -> usize {
        self.chunk_size.saturating_sub(self.buffer.len()).max(1)
    }

    /// The pipe produced `data`; an empty slice signals end of file.
    pub fn on_data(&mut self, data: &[u8]) -> OutgoingAction {
        if data.is_empty() {
            self.eof = true;
        } else {
            self.buffer.extend_from_slice(data);
        }
        self.next_chunk()
    }

    /// Reading the pipe failed. The data received so far is still delivered.
    pub fn on_error(&mut self) -> OutgoingAction {
        self.on_data(&[])
    }

    /// The requestor deleted the property
    pub fn on_property_deleted(&mut self) -> OutgoingAction {
        if self.sent_finished {
            return OutgoingAction::Done;
        }
        self.property_set = false;
        self.next_chunk()
    }

    /// The pipe reached its end, nothing more will be read
    pub fn is_eof(&self) -> bool {
        self.eof
    }

    pub fn is_finished(&self) -> bool {
        self.sent_finished
    }

    fn next_chunk(&mut self) -> OutgoingAction {
        if self.property_set || self.sent_finished {
            return OutgoingAction::Wait;
        }

        if !self.buffer.is_empty() {
            let len = self.buffer.len().min(self.chunk_size);
            let rest = self.buffer.split_off(len);
            let chunk = std::mem::replace(&mut self.buffer, rest);
            self.property_set = true;
            OutgoingAction::Write(chunk)
        } else if self.eof {
            self.sent_finished = true;
            self.property_set = true;
            OutgoingAction::Write(Vec::new())
        } else {
            OutgoingAction::Wait
        }
    }

    pub fn destroy<D>(mut self, handle: &LoopHandle<'_, D>) {
        if let Some(token) = self.token.take() {
            handle.remove(token);
        }
    }
}

impl Drop for OutgoingTransfer {
    fn drop(&mut self) {
        if self.token.is_some() {
            warn!(?self, "OutgoingTransfer freed before being removed from EventLoop");
        }
    }
}

/// What the owner of an [`IncomingTransfer`] has to do next
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IncomingAction {
    /// All data was written, the transfer can be dropped
    Done,
    /// Delete the property to ask the selection owner for the next chunk
    WaitForProperty,
    /// Buffered data waits for the pipe to become writable
    WaitForWritable,
}

/// A transfer of X11 selection data into a wayland client's pipe
pub struct IncomingTransfer {
    pub(crate) token: Option<RegistrationToken>,
    pub(crate) mime_type: String,
    fd: Option<OwnedFd>,
    incr: bool,
    incr_done: bool,
    failed: bool,
    data: Vec<u8>,
}

impl fmt::Debug for IncomingTransfer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("IncomingTransfer")
            .field("token", &self.token)
            .field("mime_type", &self.mime_type)
            .field("incr", &self.incr)
            .field("incr_done", &self.incr_done)
            .field("failed", &self.failed)
            .field("buffered", &self.data.len())
            .finish()
    }
}

impl IncomingTransfer {
    pub fn new(mime_type: String, fd: OwnedFd) -> Self {
        IncomingTransfer {
            token: None,
            mime_type,
            fd: Some(fd),
            incr: false,
            incr_done: false,
            failed: false,
            data: Vec::new(),
        }
    }

    /// Hand out the pipe once, to register it with the event loop
    pub fn take_fd(&mut self) -> Option<OwnedFd> {
        self.fd.take()
    }

    pub fn is_incr(&self) -> bool {
        self.incr
    }

    /// A property value arrived; `incr_marker` is set if its type was `INCR`.
    pub fn property_received(&mut self, incr_marker: bool, value: &[u8]) -> IncomingAction {
        if incr_marker && !self.incr {
            self.incr = true;
            return IncomingAction::WaitForProperty;
        }

        if self.incr && value.is_empty() {
            self.incr_done = true;
        }
        if self.failed {
            return if self.incr_done {
                IncomingAction::Done
            } else {
                IncomingAction::WaitForProperty
            };
        }
        self.data.extend_from_slice(value);
        IncomingAction::WaitForWritable
    }

    /// Write buffered data into `fd`. Returns whether the buffer was drained.
    pub fn write_selection(&mut self, fd: impl AsFd) -> io::Result<bool> {
        if self.data.is_empty() {
            return Ok(true);
        }

        let len = rustix::io::write(fd, &self.data)?;
        self.data.drain(..len);

        Ok(self.data.is_empty())
    }

    /// Decide how to proceed after [`IncomingTransfer::write_selection`]
    pub fn after_write(&mut self, result: io::Result<bool>) -> IncomingAction {
        match result {
            Ok(false) => IncomingAction::WaitForWritable,
            Ok(true) if self.incr && !self.incr_done => IncomingAction::WaitForProperty,
            Ok(true) => IncomingAction::Done,
            Err(err) if err.kind() == io::ErrorKind::WouldBlock => IncomingAction::WaitForWritable,
            Err(err) => {
                warn!(?err, mime_type = self.mime_type, "Selection transfer errored");
                self.data.clear();
                self.failed = true;
                if self.incr && !self.incr_done {
                    // the owner still has to be drained
                    IncomingAction::WaitForProperty
                } else {
                    IncomingAction::Done
                }
            }
        }
    }

    pub fn destroy<D>(mut self, handle: &LoopHandle<'_, D>) {
        if let Some(token) = self.token.take() {
            handle.remove(token);
        }
    }
}

impl Drop for IncomingTransfer {
    fn drop(&mut self) {
        if self.token.is_some() {
            warn!(?self, "IncomingTransfer freed before being removed from EventLoop");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use x11rb::protocol::xproto::SELECTION_REQUEST_EVENT;

    fn request() -> SelectionRequestEvent {
        SelectionRequestEvent {
            response_type: SELECTION_REQUEST_EVENT,
            sequence: 0,
            time: 0,
            owner: 1,
            requestor: 2,
            selection: 3,
            target: 4,
            property: 5,
        }
    }

    fn chunk(action: OutgoingAction) -> Vec<u8> {
        match action {
            OutgoingAction::Write(chunk) => chunk,
            other => panic!("expected a chunk, got {:?}", other),
        }
    }

    #[test]
    fn short_text_is_sent_in_one_chunk() {
        let mut transfer = OutgoingTransfer::new(request(), 64 * 1024);

        // the INCR marker is still pending
        assert_eq!(transfer.on_data(b"hello"), OutgoingAction::Wait);
        assert_eq!(transfer.on_data(b""), OutgoingAction::Wait);

        assert_eq!(chunk(transfer.on_property_deleted()), b"hello");
        assert!(!transfer.is_finished());
        assert_eq!(chunk(transfer.on_property_deleted()), b"");
        assert!(transfer.is_finished());
        assert_eq!(transfer.on_property_deleted(), OutgoingAction::Done);
    }

    #[test]
    fn data_after_acknowledged_marker_is_written_right_away() {
        let mut transfer = OutgoingTransfer::new(request(), 16);
        assert_eq!(transfer.on_property_deleted(), OutgoingAction::Wait);
        assert_eq!(chunk(transfer.on_data(b"abc")), b"abc");
        assert_eq!(transfer.on_data(b""), OutgoingAction::Wait);
        assert_eq!(chunk(transfer.on_property_deleted()), b"");
        assert_eq!(transfer.on_property_deleted(), OutgoingAction::Done);
    }

    #[test]
    fn large_payload_reassembles() {
        let payload = (0..10_000u32).flat_map(|i| i.to_le_bytes()).collect::<Vec<u8>>();
        let mut transfer = OutgoingTransfer::new(request(), 4096);
        let mut received = Vec::new();
        let mut chunks = Vec::new();
        let mut pipe = payload.chunks(1000);

        loop {
            while transfer.wants_data() {
                let data = pipe.next().unwrap_or_default();
                assert!(data.len() <= 1000);
                if let OutgoingAction::Write(chunk) = transfer.on_data(data) {
                    chunks.push(chunk);
                }
            }
            match transfer.on_property_deleted() {
                OutgoingAction::Write(chunk) => chunks.push(chunk),
                OutgoingAction::Done => break,
                OutgoingAction::Wait => {}
            }
            for chunk in chunks.drain(..) {
                assert!(chunk.len() <= 4096);
                received.push(chunk);
            }
        }

        assert_eq!(received.last().map(Vec::len), Some(0));
        assert_eq!(received.iter().filter(|c| c.is_empty()).count(), 1);
        assert_eq!(received.concat(), payload);
    }

    #[test]
    fn reading_pauses_while_a_chunk_waits() {
        let mut transfer = OutgoingTransfer::new(request(), 4);
        assert!(transfer.wants_data());
        transfer.on_data(b"abcd");
        assert!(!transfer.wants_data());
        assert_eq!(chunk(transfer.on_property_deleted()), b"abcd");
        assert!(transfer.wants_data());
        assert_eq!(transfer.read_size(), 4);
    }

    #[test]
    fn read_errors_terminate_the_stream() {
        let mut transfer = OutgoingTransfer::new(request(), 16);
        transfer.on_data(b"par");
        assert_eq!(transfer.on_error(), OutgoingAction::Wait);
        assert_eq!(chunk(transfer.on_property_deleted()), b"par");
        assert_eq!(chunk(transfer.on_property_deleted()), b"");
    }

    fn incoming() -> (IncomingTransfer, OwnedFd) {
        let (read, write) = rustix::pipe::pipe().unwrap();
        (IncomingTransfer::new("text/plain".into(), write), read)
    }

    fn read_all(fd: &OwnedFd, len: usize) -> Vec<u8> {
        let mut buf = vec![0; len];
        let read = rustix::io::read(fd, &mut buf).unwrap();
        buf.truncate(read);
        buf
    }

    #[test]
    fn plain_transfer_completes_after_one_write() {
        let (mut transfer, read) = incoming();
        let fd = transfer.take_fd().unwrap();
        assert!(transfer.take_fd().is_none());

        assert_eq!(transfer.property_received(false, b"data"), IncomingAction::WaitForWritable);
        let result = transfer.write_selection(&fd);
        assert_eq!(transfer.after_write(result), IncomingAction::Done);
        assert_eq!(read_all(&read, 16), b"data");
    }

    #[test]
    fn incr_transfer_asks_for_chunks_until_empty() {
        let (mut transfer, read) = incoming();
        let fd = transfer.take_fd().unwrap();

        assert_eq!(transfer.property_received(true, &[0, 0, 1, 0]), IncomingAction::WaitForProperty);
        assert!(transfer.is_incr());

        assert_eq!(transfer.property_received(false, b"ab"), IncomingAction::WaitForWritable);
        let result = transfer.write_selection(&fd);
        assert_eq!(transfer.after_write(result), IncomingAction::WaitForProperty);

        assert_eq!(transfer.property_received(false, b"cd"), IncomingAction::WaitForWritable);
        let result = transfer.write_selection(&fd);
        assert_eq!(transfer.after_write(result), IncomingAction::WaitForProperty);

        assert_eq!(transfer.property_received(false, b""), IncomingAction::WaitForWritable);
        let result = transfer.write_selection(&fd);
        assert_eq!(transfer.after_write(result), IncomingAction::Done);

        assert_eq!(read_all(&read, 16), b"abcd");
    }

    #[test]
    fn failed_incr_transfer_keeps_draining() {
        let (mut transfer, _read) = incoming();
        transfer.property_received(true, &[]);
        transfer.property_received(false, b"ab");
        let err = io::Error::from(io::ErrorKind::BrokenPipe);
        assert_eq!(transfer.after_write(Err(err)), IncomingAction::WaitForProperty);
        assert_eq!(transfer.property_received(false, b"cd"), IncomingAction::WaitForProperty);
        assert_eq!(transfer.property_received(false, b""), IncomingAction::Done);
    }
}
