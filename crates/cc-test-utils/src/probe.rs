//! Connection probe for channel tests.
//!
//! Stands in for a WebSocket: the channel gets a real [`ConnectionHandle`]
//! and the probe decodes whatever frames land in its queue.

use card_controller::actors::ConnectionHandle;
use card_controller::state::Snapshot;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;

/// How long [`ConnectionProbe::next_snapshot`] waits before failing the test.
///
/// Under a paused clock this is virtual time.
pub const PROBE_TIMEOUT: Duration = Duration::from_secs(30);

/// Receiving end of a test connection.
#[derive(Debug)]
pub struct ConnectionProbe {
    receiver: mpsc::Receiver<Arc<str>>,
}

impl ConnectionProbe {
    /// Create a connection with an outbound queue of `buffer` frames and the
    /// probe reading it.
    #[must_use]
    pub fn new(buffer: usize) -> (ConnectionHandle, Self) {
        let (handle, receiver) = ConnectionHandle::new(buffer);
        (handle, Self { receiver })
    }

    /// Wait for the next frame and decode it.
    ///
    /// # Panics
    ///
    /// If no frame arrives within [`PROBE_TIMEOUT`], the queue is closed, or
    /// the frame is not a snapshot.
    pub async fn next_snapshot(&mut self) -> Snapshot {
        let frame = tokio::time::timeout(PROBE_TIMEOUT, self.receiver.recv())
            .await
            .expect("timed out waiting for a snapshot")
            .expect("connection queue closed");
        serde_json::from_str(&frame).expect("frame is not a snapshot")
    }

    /// A frame already queued, if any.
    pub fn try_next_snapshot(&mut self) -> Option<Snapshot> {
        let frame = self.receiver.try_recv().ok()?;
        Some(serde_json::from_str(&frame).expect("frame is not a snapshot"))
    }

    /// Every frame queued right now, decoded.
    pub fn drain(&mut self) -> Vec<Snapshot> {
        std::iter::from_fn(|| self.try_next_snapshot()).collect()
    }

    /// Whether the channel has dropped this connection and the queue is
    /// empty.
    pub fn is_disconnected(&mut self) -> bool {
        matches!(
            self.receiver.try_recv(),
            Err(mpsc::error::TryRecvError::Disconnected)
        )
    }

    /// Discard queued frames until the channel drops this connection.
    ///
    /// # Panics
    ///
    /// If the connection is still attached after [`PROBE_TIMEOUT`].
    pub async fn wait_disconnected(&mut self) {
        tokio::time::timeout(PROBE_TIMEOUT, async {
            while self.receiver.recv().await.is_some() {}
        })
        .await
        .expect("connection still attached");
    }
}
