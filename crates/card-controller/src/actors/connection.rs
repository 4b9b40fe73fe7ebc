//! Outbound side of a client connection, as seen by its meeting channel.
//!
//! The channel never touches a socket. Each connection owns a bounded queue
//! of serialized snapshots; the transport drains it into the socket on its
//! own task. A full or closed queue is a failed send.

use std::fmt;
use std::sync::Arc;
use tokio::sync::mpsc;
use uuid::Uuid;

/// Identity of one connection within its channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ConnectionId(Uuid);

impl ConnectionId {
    #[must_use]
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for ConnectionId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

/// Why a frame could not be handed to a connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SendFailure {
    /// The client is not draining its queue.
    Full,
    /// The transport side has gone away.
    Closed,
}

impl SendFailure {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            SendFailure::Full => "queue_full",
            SendFailure::Closed => "closed",
        }
    }
}

/// Sending half of a connection's outbound queue.
///
/// Frames are `Arc<str>` so one serialized snapshot is shared by every
/// connection it is sent to.
#[derive(Debug, Clone)]
pub struct ConnectionHandle {
    id: ConnectionId,
    sender: mpsc::Sender<Arc<str>>,
}

impl ConnectionHandle {
    /// Create a connection with an outbound queue of `buffer` frames.
    ///
    /// The receiver goes to whoever writes to the socket.
    #[must_use]
    pub fn new(buffer: usize) -> (Self, mpsc::Receiver<Arc<str>>) {
        let (sender, receiver) = mpsc::channel(buffer.max(1));
        (
            Self {
                id: ConnectionId::new(),
                sender,
            },
            receiver,
        )
    }

    #[must_use]
    pub fn id(&self) -> ConnectionId {
        self.id
    }

    /// Queue a frame without waiting.
    ///
    /// # Errors
    ///
    /// `SendFailure::Full` if the queue is at capacity, `SendFailure::Closed`
    /// if the receiver was dropped.
    pub fn try_send(&self, frame: Arc<str>) -> Result<(), SendFailure> {
        self.sender.try_send(frame).map_err(|e| match e {
            mpsc::error::TrySendError::Full(_) => SendFailure::Full,
            mpsc::error::TrySendError::Closed(_) => SendFailure::Closed,
        })
    }

    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.sender.is_closed()
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    #[test]
    fn test_connection_ids_are_unique() {
        let (a, _rx_a) = ConnectionHandle::new(1);
        let (b, _rx_b) = ConnectionHandle::new(1);
        assert_ne!(a.id(), b.id());
        assert_eq!(a.clone().id(), a.id());
    }

    #[tokio::test]
    async fn test_try_send_delivers_in_order() {
        let (conn, mut rx) = ConnectionHandle::new(4);

        conn.try_send(Arc::from("one")).unwrap();
        conn.try_send(Arc::from("two")).unwrap();

        assert_eq!(rx.recv().await.as_deref(), Some("one"));
        assert_eq!(rx.recv().await.as_deref(), Some("two"));
    }

    #[test]
    fn test_try_send_full_queue() {
        let (conn, _rx) = ConnectionHandle::new(1);

        conn.try_send(Arc::from("first")).unwrap();
        assert_eq!(conn.try_send(Arc::from("second")), Err(SendFailure::Full));
    }

    #[test]
    fn test_try_send_after_receiver_dropped() {
        let (conn, rx) = ConnectionHandle::new(1);
        drop(rx);

        assert!(conn.is_closed());
        assert_eq!(conn.try_send(Arc::from("late")), Err(SendFailure::Closed));
    }
}
