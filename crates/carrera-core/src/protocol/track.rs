//! Track session
//!
//! Sends one command at a time and waits for the reply that answers it.
//!
//! The CU answers every command with a `$`-terminated frame whose first
//! byte echoes the command's first byte. Anything else that shows up on the
//! line in the meantime (stray bytes, echoes, late answers to an earlier
//! command) is logged and dropped until the matching frame arrives or the
//! response timeout expires.

use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, info_span, warn, Span};

use super::codec::{self, FRAME_END};
use super::reply::{self, Reply};
use super::{Connection, ProtocolError, Result, MAX_FRAME_SIZE};

/// Request/response state of a [`Track`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    /// No request outstanding
    Idle,
    /// A command was sent and its reply has not been seen yet
    AwaitingMatch,
}

/// Reassembles `$`-terminated frames from arbitrarily split reads
#[derive(Debug, Default)]
struct FrameReader {
    buffer: Vec<u8>,
}

impl FrameReader {
    /// Next complete frame, without its terminator. CU frames are printable
    /// ASCII, so control and high-bit bytes in front of a frame are line
    /// noise and get stripped; the count is returned alongside.
    fn take_frame(&mut self) -> Option<(Vec<u8>, usize)> {
        let end = self.buffer.iter().position(|&b| b == FRAME_END)?;
        let mut frame: Vec<u8> = self.buffer.drain(..=end).collect();
        frame.pop();
        let noise = frame.iter().take_while(|b| !b.is_ascii_graphic()).count();
        frame.drain(..noise);
        Some((frame, noise))
    }

    /// Forget any partial frame, returning how many bytes were dropped
    fn reset(&mut self) -> usize {
        let stale = self.buffer.len();
        self.buffer.clear();
        stale
    }

    fn next_frame<C: Connection + ?Sized>(
        &mut self,
        connection: &C,
        max_length: usize,
        deadline: Instant,
        span: &Span,
    ) -> Result<Vec<u8>> {
        loop {
            if let Some((frame, noise)) = self.take_frame() {
                if noise > 0 {
                    debug!(parent: span, "stripped {} bytes of line noise", noise);
                }
                return Ok(frame);
            }
            if self.buffer.len() > max_length {
                warn!(
                    parent: span,
                    "dropping {} unterminated bytes: {:?}",
                    self.buffer.len(),
                    String::from_utf8_lossy(&self.buffer)
                );
                self.buffer.clear();
            }
            if Instant::now() >= deadline {
                return Err(ProtocolError::Timeout);
            }
            let chunk = connection.recv(max_length)?;
            if chunk.is_empty() {
                return Err(ProtocolError::Timeout);
            }
            self.buffer.extend_from_slice(&chunk);
        }
    }
}

/// Request/response session over a [`Connection`].
///
/// One owner drives a session: the resynchronisation cannot tell apart
/// replies to two overlapping commands with the same leading byte. The
/// connection itself can be shared (see [`Track::connection`]) so another
/// thread can close it and unblock a pending request.
pub struct Track<C: Connection> {
    connection: Arc<C>,
    reader: FrameReader,
    state: SessionState,
    response_timeout: Duration,
    max_frame_size: usize,
    discarded: u64,
    span: Span,
}

impl<C: Connection> Track<C> {
    /// Start a session on `connection`
    pub fn new(connection: C) -> Self {
        Self::with_span(connection, info_span!("cu.track"))
    }

    /// Start a session logging under the supplied span
    pub fn with_span(connection: C, span: Span) -> Self {
        Self::from_shared(Arc::new(connection), span)
    }

    /// Start a session on a connection that is also held elsewhere
    pub fn from_shared(connection: Arc<C>, span: Span) -> Self {
        let response_timeout = connection.timeout();
        Self {
            connection,
            reader: FrameReader::default(),
            state: SessionState::Idle,
            response_timeout,
            max_frame_size: MAX_FRAME_SIZE,
            discarded: 0,
            span,
        }
    }

    /// Shared handle to the underlying connection
    pub fn connection(&self) -> Arc<C> {
        Arc::clone(&self.connection)
    }

    /// Current request/response state
    pub fn state(&self) -> SessionState {
        self.state
    }

    /// Total frames dropped while waiting for matching replies
    pub fn discarded_frames(&self) -> u64 {
        self.discarded
    }

    /// Span this session logs under
    pub fn span(&self) -> &Span {
        &self.span
    }

    /// Upper bound on the time between sending a command and its reply
    pub fn response_timeout(&self) -> Duration {
        self.response_timeout
    }

    /// Override the response timeout taken from the connection
    pub fn set_response_timeout(&mut self, timeout: Duration) {
        self.response_timeout = timeout;
    }

    /// Override the longest frame accepted before bytes are dropped as noise
    pub fn set_max_frame_size(&mut self, size: usize) {
        self.max_frame_size = size.max(1);
    }

    /// Send `command` and decode the reply that answers it
    pub fn send(&mut self, command: &[u8]) -> Result<Reply> {
        let frame = self.exchange(command)?;
        let reply = reply::classify(&frame)?;
        match &reply {
            Reply::Unrecognized(raw) => {
                debug!(parent: &self.span, "unclassified reply {:?}", String::from_utf8_lossy(raw))
            }
            decoded => debug!(parent: &self.span, "decoded reply {:?}", decoded),
        }
        Ok(reply)
    }

    /// Send `command` and return the raw frame whose first byte matches it
    pub fn exchange(&mut self, command: &[u8]) -> Result<Vec<u8>> {
        let Some(&tag) = command.first() else {
            return Err(ProtocolError::Format("empty command".into()));
        };

        self.state = SessionState::AwaitingMatch;
        let result = self.await_match(command, tag);
        self.state = SessionState::Idle;
        result
    }

    fn await_match(&mut self, command: &[u8], tag: u8) -> Result<Vec<u8>> {
        // nothing received before the command goes out can answer it
        let stale = self.reader.reset();
        if stale > 0 {
            warn!(parent: &self.span, "dropping {} stale bytes before sending", stale);
        }

        debug!(parent: &self.span, "sending {:?}", String::from_utf8_lossy(command));
        self.connection.send(&codec::frame(command))?;

        let deadline = Instant::now() + self.response_timeout;
        loop {
            let frame = self.reader.next_frame(
                self.connection.as_ref(),
                self.max_frame_size,
                deadline,
                &self.span,
            )?;
            if frame.first() == Some(&tag) {
                debug!(parent: &self.span, "received {:?}", String::from_utf8_lossy(&frame));
                return Ok(frame);
            }
            self.discarded += 1;
            warn!(
                parent: &self.span,
                "received unexpected message {:?}",
                String::from_utf8_lossy(&frame)
            );
        }
    }

    /// Close the underlying connection
    pub fn close(&self) {
        self.connection.close();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::mock::MockConnection;

    #[test]
    fn test_frame_reader_reassembles_split_frames() {
        let mock = MockConnection::with_replies([
            b"?:12".as_slice(),
            b"34$J0".as_slice(),
            b"$".as_slice(),
        ]);
        let mut reader = FrameReader::default();
        let deadline = Instant::now() + Duration::from_secs(1);
        let span = Span::none();
        assert_eq!(reader.next_frame(&mock, 64, deadline, &span).unwrap(), b"?:1234");
        assert_eq!(reader.next_frame(&mock, 64, deadline, &span).unwrap(), b"J0");
        assert!(matches!(
            reader.next_frame(&mock, 64, deadline, &span),
            Err(ProtocolError::Timeout)
        ));
    }

    #[test]
    fn test_frame_reader_drops_oversized_noise() {
        let mock = MockConnection::with_replies([b"xxxxxxxxxx".as_slice(), b"?$".as_slice()]);
        let mut reader = FrameReader::default();
        let deadline = Instant::now() + Duration::from_secs(1);
        assert_eq!(
            reader.next_frame(&mock, 8, deadline, &Span::none()).unwrap(),
            b"?"
        );
    }

    #[test]
    fn test_frame_reader_strips_leading_line_noise() {
        let mock =
            MockConnection::with_replies([b"\x00\xff\r\n".as_slice(), b"?$".as_slice()]);
        let mut reader = FrameReader::default();
        let deadline = Instant::now() + Duration::from_secs(1);
        assert_eq!(
            reader.next_frame(&mock, 64, deadline, &Span::none()).unwrap(),
            b"?"
        );
    }

    #[test]
    fn test_partial_frame_does_not_leak_into_next_exchange() {
        let mut track = Track::new(MockConnection::with_replies([b"?:12"]));
        assert!(matches!(track.exchange(b"?"), Err(ProtocolError::Timeout)));
        track.connection().push_reply(b"=$");
        assert_eq!(track.exchange(b"=10").unwrap(), b"=");
        assert_eq!(track.discarded_frames(), 0);
    }

    #[test]
    fn test_exchange_wraps_command() {
        let mut track = Track::new(MockConnection::with_replies([b"=$"]));
        assert_eq!(track.exchange(b"=10").unwrap(), b"=");
        assert_eq!(track.connection().sent(), vec![b"\"=10$".to_vec()]);
        assert_eq!(track.state(), SessionState::Idle);
    }

    #[test]
    fn test_empty_command_rejected() {
        let mut track = Track::new(MockConnection::new());
        assert!(matches!(track.exchange(b""), Err(ProtocolError::Format(_))));
        assert!(track.connection().sent().is_empty());
    }

    #[test]
    fn test_state_returns_to_idle_on_timeout() {
        let mut track = Track::new(MockConnection::new());
        assert!(matches!(track.exchange(b"?"), Err(ProtocolError::Timeout)));
        assert_eq!(track.state(), SessionState::Idle);
    }
}
