use chrono::{DateTime, Utc};
use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TrySendError;
use tokio_util::sync::CancellationToken;
use tracing::warn;
use uuid::Uuid;

use super::events::{ServerFrame, SessionId};

/// Maximum queued outbound frames per connection. A client that falls this far behind
/// is disconnected instead of stalling everyone else.
pub const DEFAULT_OUTBOUND_QUEUE: usize = 256;

/// The engine's handle to one live connection: a bounded outbound queue plus a
/// close signal the transport task watches.
#[derive(Debug, Clone)]
pub struct ConnectionHandle {
    pub id: SessionId,
    outbound: mpsc::Sender<ServerFrame>,
    close: CancellationToken,
}

impl ConnectionHandle {
    pub fn new(capacity: usize) -> (Self, mpsc::Receiver<ServerFrame>) {
        let (tx, rx) = mpsc::channel(capacity.max(1));
        let handle = Self {
            id: Uuid::new_v4(),
            outbound: tx,
            close: CancellationToken::new(),
        };
        (handle, rx)
    }

    /// Queue a frame without blocking. A full queue closes the connection; returns
    /// false when the frame was not queued.
    pub fn send(&self, frame: ServerFrame) -> bool {
        if self.close.is_cancelled() {
            return false;
        }
        match self.outbound.try_send(frame) {
            Ok(()) => true,
            Err(TrySendError::Full(_)) => {
                warn!(session_id = %self.id, "outbound queue full, disconnecting slow client");
                self.close.cancel();
                false
            }
            Err(TrySendError::Closed(_)) => false,
        }
    }

    /// Ask the transport to close this connection.
    pub fn close(&self) {
        self.close.cancel();
    }

    pub fn is_closed(&self) -> bool {
        self.close.is_cancelled() || self.outbound.is_closed()
    }

    /// Resolves once the connection has been asked to close.
    pub async fn closed(&self) {
        self.close.cancelled().await
    }
}

/// A joined connection: who it is and how to reach it. The display attributes are a
/// snapshot taken at join time.
#[derive(Debug)]
pub struct UserSession {
    pub connection: ConnectionHandle,
    pub user_id: String,
    pub username: String,
    pub avatar_color: String,
    pub role: String,
    pub trust_domain_id: String,
    pub joined_at: DateTime<Utc>,
}

impl UserSession {
    pub fn id(&self) -> SessionId {
        self.connection.id
    }

    pub fn send(&self, frame: ServerFrame) -> bool {
        self.connection.send(frame)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_send_queues_frames() {
        let (handle, mut rx) = ConnectionHandle::new(4);
        assert!(handle.send(ServerFrame::error("one")));
        assert_eq!(rx.recv().await, Some(ServerFrame::error("one")));
        assert!(!handle.is_closed());
    }

    #[tokio::test]
    async fn test_full_queue_closes_connection() {
        let (handle, _rx) = ConnectionHandle::new(2);
        assert!(handle.send(ServerFrame::error("1")));
        assert!(handle.send(ServerFrame::error("2")));
        assert!(!handle.send(ServerFrame::error("3")));
        assert!(handle.is_closed());

        // Resolves immediately once cancelled.
        handle.closed().await;
        assert!(!handle.send(ServerFrame::error("4")));
    }

    #[test]
    fn test_dropped_receiver_reports_closed() {
        let (handle, rx) = ConnectionHandle::new(2);
        drop(rx);
        assert!(!handle.send(ServerFrame::error("lost")));
        assert!(handle.is_closed());
    }

    #[test]
    fn test_clones_share_close_signal() {
        let (handle, _rx) = ConnectionHandle::new(2);
        let other = handle.clone();
        other.close();
        assert!(handle.is_closed());
        assert_eq!(handle.id, other.id);
    }
}
