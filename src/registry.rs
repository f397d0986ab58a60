//! Live set of established connections.

use crate::connection::{ConnectionHandle, ConnectionId, DeliveryError};
use parking_lot::RwLock;
use std::collections::HashMap;
use tracing::{debug, warn};

/// Result of one fan-out.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct BroadcastOutcome {
    /// Members whose queue accepted the message
    pub delivered: usize,
    /// Members whose queue was full; they stay registered
    pub dropped: Vec<ConnectionId>,
    /// Members whose session had already ended; they were removed
    pub disconnected: Vec<ConnectionId>,
}

/// Thread-safe registry of connection handles keyed by [`ConnectionId`].
///
/// The registry only routes: it holds send capabilities, never sockets, so
/// it is never the owner responsible for tearing a connection down. Callers
/// never see the internal lock.
#[derive(Debug, Default)]
pub struct ConnectionRegistry {
    members: RwLock<HashMap<ConnectionId, ConnectionHandle>>,
}

impl ConnectionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Inserts `handle`, replacing any handle already registered under the
    /// same id. Returns the replaced handle.
    pub fn add(&self, handle: ConnectionHandle) -> Option<ConnectionHandle> {
        let id = handle.id();
        let replaced = self.members.write().insert(id, handle);
        if replaced.is_some() {
            warn!("Connection {} was registered twice; replacing handle", id);
        }
        replaced
    }

    /// Removes `id`. Returns `false` if it was not registered.
    pub fn remove(&self, id: ConnectionId) -> bool {
        self.members.write().remove(&id).is_some()
    }

    pub fn contains(&self, id: ConnectionId) -> bool {
        self.members.read().contains_key(&id)
    }

    pub fn len(&self) -> usize {
        self.members.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.members.read().is_empty()
    }

    pub fn ids(&self) -> Vec<ConnectionId> {
        self.members.read().keys().copied().collect()
    }

    /// Enqueues `message` for every current member.
    ///
    /// Iterates over a snapshot taken under a short read lock, so concurrent
    /// `add`/`remove` calls are neither blocked by the fan-out nor able to
    /// break it. A member that cannot accept the message is logged and
    /// skipped; members whose session is gone are removed afterwards.
    pub fn broadcast(&self, message: &str) -> BroadcastOutcome {
        let snapshot: Vec<ConnectionHandle> = self.members.read().values().cloned().collect();

        let mut outcome = BroadcastOutcome::default();
        for handle in snapshot {
            match handle.send(message.to_owned()) {
                Ok(()) => outcome.delivered += 1,
                Err(DeliveryError::QueueFull(id)) => {
                    warn!("Dropping broadcast for connection {}: outbound queue full", id);
                    outcome.dropped.push(id);
                }
                Err(DeliveryError::Disconnected(id)) => {
                    debug!("Connection {} is gone; removing from registry", id);
                    outcome.disconnected.push(id);
                }
            }
        }

        if !outcome.disconnected.is_empty() {
            let mut members = self.members.write();
            for id in &outcome.disconnected {
                members.remove(id);
            }
        }

        outcome
    }
}
