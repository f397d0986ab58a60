//! Formatting and fan-out of chat messages.

use crate::connection::ConnectionId;
use crate::registry::{BroadcastOutcome, ConnectionRegistry};
use chrono::{DateTime, Local};
use std::fmt;
use std::sync::Arc;
use tracing::debug;

/// Separator between the message header and the original text. Existing
/// clients split on it.
pub const SEPARATOR: &str = "==============>>>>>>>>>>>>";

const TIMESTAMP_FORMAT: &str = "%a %b %d %H:%M:%S %Z %Y";

/// A text message annotated with when it was received and who sent it.
///
/// Renders as `<timestamp> <sender-id> ==============>>>>>>>>>>>> <text>`.
#[derive(Debug, Clone)]
pub struct BroadcastMessage<'a> {
    timestamp: DateTime<Local>,
    sender: ConnectionId,
    text: &'a str,
}

impl<'a> BroadcastMessage<'a> {
    pub fn new(sender: ConnectionId, text: &'a str) -> Self {
        Self::with_timestamp(Local::now(), sender, text)
    }

    pub fn with_timestamp(timestamp: DateTime<Local>, sender: ConnectionId, text: &'a str) -> Self {
        Self {
            timestamp,
            sender,
            text,
        }
    }

    pub fn sender(&self) -> ConnectionId {
        self.sender
    }
}

impl fmt::Display for BroadcastMessage<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} {} {} {}",
            self.timestamp.format(TIMESTAMP_FORMAT),
            self.sender,
            SEPARATOR,
            self.text
        )
    }
}

/// Turns accepted text frames into broadcasts, sender included.
#[derive(Clone)]
pub struct BroadcastRelay {
    registry: Arc<ConnectionRegistry>,
}

impl BroadcastRelay {
    pub fn new(registry: Arc<ConnectionRegistry>) -> Self {
        Self { registry }
    }

    /// Formats `text` from `sender` and enqueues it for every registered
    /// connection. Does not wait for any write to complete.
    pub fn relay(&self, sender: ConnectionId, text: &str) -> BroadcastOutcome {
        let message = BroadcastMessage::new(sender, text).to_string();
        let outcome = self.registry.broadcast(&message);
        debug!(
            "Relayed message from {} to {} connection(s)",
            sender, outcome.delivered
        );
        outcome
    }
}
