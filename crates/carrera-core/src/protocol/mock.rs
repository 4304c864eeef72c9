//! Scripted in-memory [`Connection`] for exercising the protocol without
//! a Control Unit attached.
//!
//! ```
//! use carrera_core::protocol::{mock::MockConnection, Connection};
//!
//! let mock = MockConnection::new();
//! mock.push_reply(b"0");
//! mock.push_reply(b"5337$");
//! mock.send(b"\"0$").unwrap();
//! assert_eq!(mock.recv(64).unwrap(), b"0".to_vec());
//! assert_eq!(mock.sent(), vec![b"\"0$".to_vec()]);
//! ```

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Mutex, MutexGuard};
use std::time::Duration;

use super::{Connection, ProtocolError, Result};

#[derive(Debug, Default)]
struct State {
    /// Chunks handed out by `recv`, in order
    replies: VecDeque<Vec<u8>>,
    /// Chunk repeated forever once `replies` is drained
    endless: Option<Vec<u8>>,
    /// Every buffer passed to `send`
    sent: Vec<Vec<u8>>,
    /// Number of `recv` calls
    recv_calls: usize,
    fail_on_send: bool,
}

/// A [`Connection`] fed from a queue of canned reply chunks.
///
/// `recv` pops the next chunk (truncated to `max_length`, the remainder
/// stays queued). With the queue empty it returns an empty buffer, which
/// callers treat as a read timeout, unless an endless chunk is set.
#[derive(Debug)]
pub struct MockConnection {
    state: Mutex<State>,
    closed: AtomicBool,
    timeout: Duration,
}

impl MockConnection {
    /// Create an open mock with an empty reply queue
    pub fn new() -> Self {
        Self {
            state: Mutex::new(State::default()),
            closed: AtomicBool::new(false),
            timeout: Duration::from_millis(50),
        }
    }

    /// Create a mock that will hand out `chunks` in order
    pub fn with_replies<I, B>(chunks: I) -> Self
    where
        I: IntoIterator<Item = B>,
        B: AsRef<[u8]>,
    {
        let mock = Self::new();
        for chunk in chunks {
            mock.push_reply(chunk.as_ref());
        }
        mock
    }

    /// Set the timeout reported through [`Connection::timeout`]
    pub fn set_timeout(&mut self, timeout: Duration) {
        self.timeout = timeout;
    }

    fn lock(&self) -> MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Queue one chunk for `recv`
    pub fn push_reply(&self, chunk: &[u8]) {
        self.lock().replies.push_back(chunk.to_vec());
    }

    /// Once the queue is drained, return `chunk` from every `recv`
    pub fn repeat_forever(&self, chunk: &[u8]) {
        self.lock().endless = Some(chunk.to_vec());
    }

    /// Make every subsequent `send` fail with an I/O error
    pub fn fail_sends(&self) {
        self.lock().fail_on_send = true;
    }

    /// Buffers passed to `send` so far
    pub fn sent(&self) -> Vec<Vec<u8>> {
        self.lock().sent.clone()
    }

    /// Number of `recv` calls so far
    pub fn recv_calls(&self) -> usize {
        self.lock().recv_calls
    }

    /// Number of chunks still queued
    pub fn pending(&self) -> usize {
        self.lock().replies.len()
    }
}

impl Default for MockConnection {
    fn default() -> Self {
        Self::new()
    }
}

impl Connection for MockConnection {
    fn send(&self, data: &[u8]) -> Result<()> {
        if self.is_closed() {
            return Err(ProtocolError::NotConnected);
        }
        let mut state = self.lock();
        if state.fail_on_send {
            return Err(ProtocolError::IoError(std::io::Error::new(
                std::io::ErrorKind::BrokenPipe,
                "mock write failed",
            )));
        }
        state.sent.push(data.to_vec());
        Ok(())
    }

    fn recv(&self, max_length: usize) -> Result<Vec<u8>> {
        if self.is_closed() {
            return Err(ProtocolError::NotConnected);
        }
        let mut state = self.lock();
        state.recv_calls += 1;
        let Some(mut chunk) = state.replies.pop_front().or_else(|| state.endless.clone()) else {
            return Ok(Vec::new());
        };
        if chunk.len() > max_length {
            let rest = chunk.split_off(max_length);
            state.replies.push_front(rest);
        }
        Ok(chunk)
    }

    fn close(&self) {
        self.closed.store(true, Ordering::SeqCst);
    }

    fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    fn timeout(&self) -> Duration {
        self.timeout
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_replies_in_order() {
        let mock = MockConnection::with_replies([b"ab".as_slice(), b"c".as_slice()]);
        assert_eq!(mock.recv(16).unwrap(), b"ab");
        assert_eq!(mock.recv(16).unwrap(), b"c");
        assert!(mock.recv(16).unwrap().is_empty());
        assert_eq!(mock.recv_calls(), 3);
    }

    #[test]
    fn test_recv_respects_max_length() {
        let mock = MockConnection::with_replies([b"abcdef"]);
        assert_eq!(mock.recv(4).unwrap(), b"abcd");
        assert_eq!(mock.recv(4).unwrap(), b"ef");
    }

    #[test]
    fn test_repeat_forever() {
        let mock = MockConnection::with_replies([b"x"]);
        mock.repeat_forever(b"noise$");
        assert_eq!(mock.recv(16).unwrap(), b"x");
        for _ in 0..5 {
            assert_eq!(mock.recv(16).unwrap(), b"noise$");
        }
    }

    #[test]
    fn test_closed_mock_rejects_io() {
        let mock = MockConnection::new();
        mock.close();
        mock.close();
        assert!(matches!(mock.send(b"?"), Err(ProtocolError::NotConnected)));
        assert!(matches!(mock.recv(1), Err(ProtocolError::NotConnected)));
    }

    #[test]
    fn test_send_failure() {
        let mock = MockConnection::new();
        mock.fail_sends();
        assert!(matches!(mock.send(b"?"), Err(ProtocolError::IoError(_))));
        assert!(mock.sent().is_empty());
    }
}
