use tokio::sync::broadcast;

use crate::types::{ExecutionEvent, SessionId};

/// Broadcast of every execution event of every session.
///
/// Publishing never blocks and never fails; with no receivers the event is
/// simply dropped. Slow receivers observe `RecvError::Lagged`.
pub struct EventBus {
    tx: broadcast::Sender<ExecutionEvent>,
}

impl EventBus {
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity.max(1));
        Self { tx }
    }

    pub fn publish(&self, event: ExecutionEvent) {
        // Ignore error if no receivers
        let _ = self.tx.send(event);
    }

    pub fn subscribe(&self) -> broadcast::Receiver<ExecutionEvent> {
        self.tx.subscribe()
    }

    /// Subscribe to the events of a single session.
    pub fn subscribe_session(&self, session_id: SessionId) -> SessionEvents {
        SessionEvents {
            rx: self.tx.subscribe(),
            session_id,
        }
    }

    pub fn subscriber_count(&self) -> usize {
        self.tx.receiver_count()
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(256)
    }
}

/// Receiver that yields only one session's events.
pub struct SessionEvents {
    rx: broadcast::Receiver<ExecutionEvent>,
    session_id: SessionId,
}

impl SessionEvents {
    pub fn session_id(&self) -> &SessionId {
        &self.session_id
    }

    /// Wait for the next event of this session.
    ///
    /// Events of other sessions are skipped. Lag counts all skipped events,
    /// not only this session's.
    pub async fn recv(&mut self) -> Result<ExecutionEvent, broadcast::error::RecvError> {
        loop {
            let event = self.rx.recv().await?;
            if event.session_id == self.session_id {
                return Ok(event);
            }
        }
    }
}
