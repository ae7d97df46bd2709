//! Registry-facing state of one connected client.
//!
//! The stream itself is owned by the pumps; the hub only ever sees this
//! handle. The send buffer is a bounded `mpsc` channel whose sender lives
//! here and whose receiver is drained by the write pump. Closing the buffer
//! (done only by the hub on unregistration) drops the sender, which lets the
//! write pump drain what is left and then send a close frame.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use notify_core::{ConnectionId, UserId};
use parking_lot::Mutex;
use tokio::sync::mpsc;
use tokio_tungstenite::tungstenite::Utf8Bytes;

/// Result of a non-blocking hand-off into a send buffer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SendOutcome {
    /// The payload was queued.
    Queued,
    /// The buffer is full; the payload was dropped.
    Full,
    /// The buffer has been closed by unregistration.
    Closed,
}

/// A connection as tracked by the hub.
pub struct Connection {
    id: ConnectionId,
    user_id: Option<UserId>,
    send: Mutex<Option<mpsc::Sender<Utf8Bytes>>>,
    connected_at: Instant,
    dropped_messages: AtomicU64,
}

impl Connection {
    /// Create a connection with a fresh id and an empty send buffer of
    /// `capacity` slots. Returns the receiving end for the write pump.
    pub fn new(
        user_id: Option<UserId>,
        capacity: usize,
    ) -> (Arc<Self>, mpsc::Receiver<Utf8Bytes>) {
        let (tx, rx) = mpsc::channel(capacity);
        let conn = Arc::new(Self {
            id: ConnectionId::new(),
            user_id,
            send: Mutex::new(Some(tx)),
            connected_at: Instant::now(),
            dropped_messages: AtomicU64::new(0),
        });
        (conn, rx)
    }

    /// Unique connection id.
    pub fn id(&self) -> ConnectionId {
        self.id
    }

    /// Owning user, if the connection is authenticated.
    pub fn user_id(&self) -> Option<UserId> {
        self.user_id
    }

    /// User id for log fields, `anonymous` when unauthenticated.
    pub fn user_label(&self) -> String {
        self.user_id
            .map_or_else(|| "anonymous".to_string(), |u| u.to_string())
    }

    /// Hand a payload to the write pump without waiting.
    ///
    /// A full buffer increments the dropped-message counter.
    pub fn try_send(&self, payload: Utf8Bytes) -> SendOutcome {
        let guard = self.send.lock();
        let Some(tx) = guard.as_ref() else {
            return SendOutcome::Closed;
        };
        match tx.try_send(payload) {
            Ok(()) => SendOutcome::Queued,
            Err(mpsc::error::TrySendError::Full(_)) => {
                let _ = self.dropped_messages.fetch_add(1, Ordering::Relaxed);
                SendOutcome::Full
            }
            Err(mpsc::error::TrySendError::Closed(_)) => SendOutcome::Closed,
        }
    }

    /// Close the send buffer. Returns `false` if it was already closed.
    pub(crate) fn close(&self) -> bool {
        self.send.lock().take().is_some()
    }

    /// Whether the send buffer has been closed.
    pub fn is_closed(&self) -> bool {
        self.send.lock().is_none()
    }

    /// Total messages dropped because the buffer was full.
    pub fn drop_count(&self) -> u64 {
        self.dropped_messages.load(Ordering::Relaxed)
    }

    /// Time since the connection was created.
    pub fn age(&self) -> Duration {
        self.connected_at.elapsed()
    }
}

impl std::fmt::Debug for Connection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Connection")
            .field("id", &self.id)
            .field("user_id", &self.user_id)
            .field("closed", &self.is_closed())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn text(s: &str) -> Utf8Bytes {
        Utf8Bytes::from(s.to_owned())
    }

    #[test]
    fn new_connection_has_fresh_id() {
        let user = UserId::random();
        let (a, _rx_a) = Connection::new(Some(user), 4);
        let (b, _rx_b) = Connection::new(None, 4);
        assert_ne!(a.id(), b.id());
        assert_eq!(a.user_id(), Some(user));
        assert_eq!(b.user_id(), None);
        assert!(!a.is_closed());
    }

    #[tokio::test]
    async fn send_queues_in_order() {
        let (conn, mut rx) = Connection::new(None, 8);
        for i in 0..3 {
            assert_eq!(conn.try_send(text(&format!("msg_{i}"))), SendOutcome::Queued);
        }
        for i in 0..3 {
            assert_eq!(rx.recv().await.unwrap().as_str(), format!("msg_{i}"));
        }
    }

    #[test]
    fn full_buffer_drops_and_counts() {
        let (conn, _rx) = Connection::new(None, 1);
        assert_eq!(conn.try_send(text("first")), SendOutcome::Queued);
        assert_eq!(conn.try_send(text("second")), SendOutcome::Full);
        assert_eq!(conn.try_send(text("third")), SendOutcome::Full);
        assert_eq!(conn.drop_count(), 2);
    }

    #[tokio::test]
    async fn close_drains_then_ends() {
        let (conn, mut rx) = Connection::new(None, 4);
        assert_eq!(conn.try_send(text("pending")), SendOutcome::Queued);
        assert!(conn.close());
        assert!(conn.is_closed());
        assert_eq!(rx.recv().await.unwrap().as_str(), "pending");
        assert!(rx.recv().await.is_none());
    }

    #[test]
    fn close_is_idempotent() {
        let (conn, _rx) = Connection::new(None, 4);
        assert!(conn.close());
        assert!(!conn.close());
        assert_eq!(conn.try_send(text("late")), SendOutcome::Closed);
        assert_eq!(conn.drop_count(), 0);
    }

    #[test]
    fn dropped_receiver_reports_closed() {
        let (conn, rx) = Connection::new(None, 4);
        drop(rx);
        assert_eq!(conn.try_send(text("nobody")), SendOutcome::Closed);
    }

    #[test]
    fn age_increases() {
        let (conn, _rx) = Connection::new(None, 1);
        let first = conn.age();
        std::thread::sleep(Duration::from_millis(5));
        assert!(conn.age() > first);
    }
}
