//! Status channel.

use serde::Serialize;
use tokio::sync::broadcast;
use tracing::debug;

/// Progress reported on the status channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SyncStatus {
    /// Opening the connection.
    Connecting,
    /// Authenticated.
    Connected,
    /// A sync pass started.
    SyncStarted,
    /// A sync pass is receiving or saving data.
    SyncInProgress,
    /// A sync pass finished.
    SyncDone,
    /// The connection failed.
    Failed,
    /// The connection was closed.
    Closed,
}

/// An event broadcast to every subscriber.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum EngineEvent {
    /// Connection or sync progress.
    Status {
        /// New state.
        state: SyncStatus,
        /// Short message.
        message: String,
        /// Additional detail.
        details: Option<String>,
    },
    /// A streaming ticket was issued.
    Ticket {
        /// Stream path.
        path: String,
        /// Ticket.
        ticket: String,
    },
    /// A command finished.
    CommandOutcome {
        /// Command name.
        command: String,
        /// Whether the server accepted it.
        success: bool,
        /// Server error text.
        error: Option<String>,
    },
}

/// Sending side of the status channel.
#[derive(Debug, Clone)]
pub struct EventSender {
    tx: broadcast::Sender<EngineEvent>,
}

impl EventSender {
    /// Creates a channel buffering up to `capacity` events per subscriber.
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity.max(1));
        Self { tx }
    }

    /// Adds a subscriber.
    pub fn subscribe(&self) -> broadcast::Receiver<EngineEvent> {
        self.tx.subscribe()
    }

    /// Broadcasts an event. Having no subscribers is not an error.
    pub fn send(&self, event: EngineEvent) {
        if self.tx.send(event).is_err() {
            debug!("status event dropped, no subscribers");
        }
    }

    /// Broadcasts a status change.
    pub fn status(&self, state: SyncStatus, message: impl Into<String>, details: Option<String>) {
        self.send(EngineEvent::Status {
            state,
            message: message.into(),
            details,
        });
    }

    /// Broadcasts a ticket.
    pub fn ticket(&self, path: impl Into<String>, ticket: impl Into<String>) {
        self.send(EngineEvent::Ticket {
            path: path.into(),
            ticket: ticket.into(),
        });
    }

    /// Broadcasts a command outcome.
    pub fn outcome(&self, command: &str, error: Option<String>) {
        self.send(EngineEvent::CommandOutcome {
            command: command.to_string(),
            success: error.is_none(),
            error,
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn subscribers_receive_in_order() {
        let events = EventSender::new(16);
        let mut rx = events.subscribe();

        events.status(SyncStatus::Connecting, "Connecting", None);
        events.outcome("add_dvr_entry", Some("no space".into()));

        assert!(matches!(
            rx.try_recv().unwrap(),
            EngineEvent::Status { state: SyncStatus::Connecting, .. }
        ));
        assert_eq!(
            rx.try_recv().unwrap(),
            EngineEvent::CommandOutcome {
                command: "add_dvr_entry".into(),
                success: false,
                error: Some("no space".into()),
            }
        );
    }

    #[test]
    fn sending_without_subscribers_is_fine() {
        EventSender::new(1).ticket("/stream/channelid/1", "abc");
    }
}
