//! Client Sessions
//!
//! A connected client is represented to the round engine by a [`ClientHandle`]:
//! an id plus the sending half of a bounded channel. The socket writer task
//! owns the receiving half, so a slow socket only ever fills its own buffer.

use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TrySendError;

use crate::game::registry::{Connection, ConnectionId, DeliveryError};
use crate::network::protocol::OutboundEvent;

/// Engine-facing handle for one client connection.
#[derive(Debug, Clone)]
pub struct ClientHandle {
    id: ConnectionId,
    sender: mpsc::Sender<OutboundEvent>,
}

impl ClientHandle {
    /// New handle with a fresh id and its outbound queue.
    pub fn channel(buffer: usize) -> (Self, mpsc::Receiver<OutboundEvent>) {
        Self::with_id(ConnectionId::new(), buffer)
    }

    /// New handle for a known id.
    pub fn with_id(id: ConnectionId, buffer: usize) -> (Self, mpsc::Receiver<OutboundEvent>) {
        let (sender, receiver) = mpsc::channel(buffer.max(1));
        (Self { id, sender }, receiver)
    }
}

impl Connection for ClientHandle {
    fn id(&self) -> ConnectionId {
        self.id
    }

    fn is_open(&self) -> bool {
        !self.sender.is_closed()
    }

    fn send(&self, event: &OutboundEvent) -> Result<(), DeliveryError> {
        self.sender.try_send(event.clone()).map_err(|e| match e {
            TrySendError::Full(_) => DeliveryError::Backpressure,
            TrySendError::Closed(_) => DeliveryError::Closed,
        })
    }
}

/// Drain everything currently queued for a client.
///
/// Used by tests and by the server when flushing before close.
pub fn drain(receiver: &mut mpsc::Receiver<OutboundEvent>) -> Vec<OutboundEvent> {
    let mut events = Vec::new();
    while let Ok(event) = receiver.try_recv() {
        events.push(event);
    }
    events
}
