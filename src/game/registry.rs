//! Connection Registry
//!
//! Tracks the parties currently connected to the round. The engine only sees
//! connections through the [`Connection`] capability, never a transport type.

use std::fmt;
use std::sync::Arc;

use dashmap::DashMap;
use serde::{Serialize, Deserialize};
use thiserror::Error;
use uuid::Uuid;

use crate::network::protocol::OutboundEvent;

/// Opaque unique connection identifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ConnectionId(Uuid);

impl ConnectionId {
    /// Fresh random identifier.
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    /// Wrap an existing UUID.
    pub fn from_uuid(id: Uuid) -> Self {
        Self(id)
    }

    /// Short form for log lines.
    pub fn short(&self) -> String {
        self.0.simple().to_string()[..8].to_string()
    }
}

impl Default for ConnectionId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Why a single delivery failed.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DeliveryError {
    /// The remote side has gone away.
    #[error("connection closed")]
    Closed,

    /// Outbound buffer is full; the event was dropped.
    #[error("outbound buffer full")]
    Backpressure,
}

/// What the round engine needs from a connected party.
pub trait Connection: Send + Sync {
    /// Stable identifier for the lifetime of the connection.
    fn id(&self) -> ConnectionId;

    /// Whether sends can still succeed.
    fn is_open(&self) -> bool;

    /// Queue an event for delivery. Must not block.
    fn send(&self, event: &OutboundEvent) -> Result<(), DeliveryError>;
}

/// Shared handle to a registered connection.
pub type ConnectionRef = Arc<dyn Connection>;

/// Reasons a connection is not registered.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RegistryError {
    /// Connection was already closed when offered.
    #[error("connection {0} is not open")]
    Closed(ConnectionId),

    /// Same id is already registered.
    #[error("connection {0} already registered")]
    AlreadyRegistered(ConnectionId),
}

/// Concurrent map of live connections.
#[derive(Default)]
pub struct ConnectionRegistry {
    connections: DashMap<ConnectionId, ConnectionRef>,
}

impl ConnectionRegistry {
    /// Create an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Store a connection if it is open and its id is unused.
    pub fn insert(&self, connection: ConnectionRef) -> Result<(), RegistryError> {
        let id = connection.id();
        if !connection.is_open() {
            return Err(RegistryError::Closed(id));
        }

        match self.connections.entry(id) {
            dashmap::mapref::entry::Entry::Occupied(_) => Err(RegistryError::AlreadyRegistered(id)),
            dashmap::mapref::entry::Entry::Vacant(slot) => {
                slot.insert(connection);
                Ok(())
            }
        }
    }

    /// Remove a connection.
    pub fn remove(&self, id: &ConnectionId) -> Option<ConnectionRef> {
        self.connections.remove(id).map(|(_, connection)| connection)
    }

    /// Look up a connection.
    pub fn get(&self, id: &ConnectionId) -> Option<ConnectionRef> {
        self.connections.get(id).map(|entry| entry.value().clone())
    }

    /// Whether an id is registered.
    pub fn contains(&self, id: &ConnectionId) -> bool {
        self.connections.contains_key(id)
    }

    /// Registered connections at this moment.
    ///
    /// Taken without holding shard locks during delivery, so a connection
    /// added after the snapshot misses this broadcast only.
    pub fn snapshot(&self) -> Vec<ConnectionRef> {
        self.connections.iter().map(|entry| entry.value().clone()).collect()
    }

    /// Number of registered connections.
    pub fn len(&self) -> usize {
        self.connections.len()
    }

    /// Whether nobody is connected.
    pub fn is_empty(&self) -> bool {
        self.connections.is_empty()
    }
}
