//! Registration and teardown policy for connections.

use crate::connection::{Connection, DisconnectReason};
use crate::frame::FrameError;
use crate::registry::ConnectionRegistry;
use std::sync::Arc;
use tracing::{error, info};

/// Keeps the registry in step with the transport's lifecycle events.
///
/// A connection is registered when its upgraded socket becomes active and
/// deregistered when it becomes inactive, so registry membership always
/// matches the `Established`..`Closed` window.
#[derive(Clone)]
pub struct ConnectionLifecycleHooks {
    registry: Arc<ConnectionRegistry>,
}

impl ConnectionLifecycleHooks {
    pub fn new(registry: Arc<ConnectionRegistry>) -> Self {
        Self { registry }
    }

    pub fn registry(&self) -> &Arc<ConnectionRegistry> {
        &self.registry
    }

    /// Called once the handshake response has been written.
    pub fn on_active(&self, connection: &mut Connection) {
        connection.establish();
        self.registry.add(connection.handle());
        info!(
            "Connection {} from {} established ({} online)",
            connection.id(),
            connection.remote_addr(),
            self.registry.len()
        );
    }

    /// Called once the session loop has exited. Safe to call twice.
    pub fn on_inactive(&self, connection: &mut Connection, reason: &DisconnectReason) {
        connection.mark_closed();
        self.registry.remove(connection.id());
        info!(
            "Connection {} closed: {:?} ({} online)",
            connection.id(),
            reason,
            self.registry.len()
        );
    }

    /// The only fatal path: the error is logged here and the session loop
    /// force-closes the socket by dropping it.
    pub fn on_fatal(&self, connection: &Connection, err: &FrameError) {
        error!(
            "Connection {} from {} failed, closing: {:?}",
            connection.id(),
            connection.remote_addr(),
            err
        );
    }
}
