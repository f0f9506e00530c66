//! Broadcast Gateway
//!
//! Fan-out of outbound events over the connection registry. Delivery is
//! best-effort: a failure on one connection is logged and never affects
//! the others or the caller.

use tracing::{debug, warn};

use crate::game::registry::{Connection, ConnectionId, ConnectionRegistry};
use crate::network::protocol::OutboundEvent;

/// Tally of one fan-out.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BroadcastReport {
    /// Events queued successfully.
    pub delivered: usize,
    /// Connections skipped because they were no longer open.
    pub skipped: usize,
    /// Connections whose send failed.
    pub failed: usize,
}

/// Send one event to one connection, swallowing the failure.
pub fn send_to(connection: &dyn Connection, event: &OutboundEvent) -> bool {
    if !connection.is_open() {
        debug!("Connection {} closed, {} not sent", connection.id().short(), event.kind());
        return false;
    }
    match connection.send(event) {
        Ok(()) => true,
        Err(e) => {
            warn!(
                "Dropped {} for connection {}: {}",
                event.kind(),
                connection.id().short(),
                e
            );
            false
        }
    }
}

/// Send one event to a registered connection by id.
pub fn send_to_id(registry: &ConnectionRegistry, id: &ConnectionId, event: &OutboundEvent) -> bool {
    match registry.get(id) {
        Some(connection) => send_to(connection.as_ref(), event),
        None => {
            debug!("No connection {} for {}", id.short(), event.kind());
            false
        }
    }
}

/// Deliver an event to every open registered connection.
///
/// Closed connections are skipped but left registered; removal only
/// happens when the transport reports the disconnect.
pub fn broadcast_all(registry: &ConnectionRegistry, event: &OutboundEvent) -> BroadcastReport {
    broadcast_filtered(registry, event, |_| true)
}

/// Deliver an event to every open registered connection accepted by `filter`.
pub fn broadcast_filtered<F>(
    registry: &ConnectionRegistry,
    event: &OutboundEvent,
    mut filter: F,
) -> BroadcastReport
where
    F: FnMut(&ConnectionId) -> bool,
{
    let mut report = BroadcastReport::default();

    for connection in registry.snapshot() {
        if !filter(&connection.id()) {
            continue;
        }
        if !connection.is_open() {
            report.skipped += 1;
            continue;
        }
        if send_to(connection.as_ref(), event) {
            report.delivered += 1;
        } else {
            report.failed += 1;
        }
    }

    debug!(
        "Broadcast {}: {} delivered, {} skipped, {} failed",
        event.kind(),
        report.delivered,
        report.skipped,
        report.failed
    );
    report
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::network::session::{drain, ClientHandle};
    use std::sync::Arc;

    #[test]
    fn test_broadcast_reaches_all_open() {
        let registry = ConnectionRegistry::new();
        let (a, mut rx_a) = ClientHandle::channel(8);
        let (b, mut rx_b) = ClientHandle::channel(8);
        registry.insert(Arc::new(a)).unwrap();
        registry.insert(Arc::new(b)).unwrap();

        let report = broadcast_all(&registry, &OutboundEvent::round_end());

        assert_eq!(report.delivered, 2);
        assert_eq!(drain(&mut rx_a), vec![OutboundEvent::round_end()]);
        assert_eq!(drain(&mut rx_b), vec![OutboundEvent::round_end()]);
    }

    #[test]
    fn test_closed_connection_is_skipped_not_removed() {
        let registry = ConnectionRegistry::new();
        let (open, mut rx_open) = ClientHandle::channel(8);
        let (closing, rx_closing) = ClientHandle::channel(8);
        let closing_id = closing.id();
        registry.insert(Arc::new(open)).unwrap();
        registry.insert(Arc::new(closing)).unwrap();

        // Second client goes away before the broadcast
        drop(rx_closing);
        let report = broadcast_all(&registry, &OutboundEvent::countdown(2));

        assert_eq!(report, BroadcastReport { delivered: 1, skipped: 1, failed: 0 });
        assert_eq!(drain(&mut rx_open), vec![OutboundEvent::countdown(2)]);
        assert!(registry.contains(&closing_id));
    }

    #[test]
    fn test_full_buffer_does_not_stop_fan_out() {
        let registry = ConnectionRegistry::new();
        let (slow, _rx_slow) = ClientHandle::channel(1);
        let (fast, mut rx_fast) = ClientHandle::channel(8);
        slow.send(&OutboundEvent::welcome()).unwrap();
        registry.insert(Arc::new(slow)).unwrap();
        registry.insert(Arc::new(fast)).unwrap();

        let report = broadcast_all(&registry, &OutboundEvent::round_end());

        assert_eq!(report.delivered, 1);
        assert_eq!(report.failed, 1);
        assert_eq!(drain(&mut rx_fast).len(), 1);
    }

    #[test]
    fn test_send_to_unknown_id() {
        let registry = ConnectionRegistry::new();
        assert!(!send_to_id(&registry, &ConnectionId::new(), &OutboundEvent::welcome()));
    }
}
