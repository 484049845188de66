//! Process-wide connection and message counters, reported by `/health`.

use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};

use serde::Serialize;

#[derive(Debug, Default)]
pub struct GatewayStats {
    vehicles_connected: AtomicUsize,
    messages_acked: AtomicU64,
    messages_rejected: AtomicU64,
}

#[derive(Debug, Clone, Copy, Serialize, PartialEq, Eq)]
pub struct MessageCounts {
    pub acked: u64,
    pub rejected: u64,
}

impl GatewayStats {
    pub fn vehicle_connected(&self) {
        self.vehicles_connected.fetch_add(1, Ordering::Relaxed);
    }

    pub fn vehicle_disconnected(&self) {
        // Saturate: a disconnect is never counted without its connect.
        let _ = self
            .vehicles_connected
            .fetch_update(Ordering::Relaxed, Ordering::Relaxed, |n| n.checked_sub(1));
    }

    pub fn record_ack(&self) {
        self.messages_acked.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_nack(&self) {
        self.messages_rejected.fetch_add(1, Ordering::Relaxed);
    }

    pub fn vehicles(&self) -> usize {
        self.vehicles_connected.load(Ordering::Relaxed)
    }

    pub fn messages(&self) -> MessageCounts {
        MessageCounts {
            acked: self.messages_acked.load(Ordering::Relaxed),
            rejected: self.messages_rejected.load(Ordering::Relaxed),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_counters() {
        let stats = GatewayStats::default();
        stats.vehicle_connected();
        stats.vehicle_connected();
        stats.vehicle_disconnected();
        stats.record_ack();
        stats.record_ack();
        stats.record_nack();

        assert_eq!(stats.vehicles(), 1);
        assert_eq!(stats.messages(), MessageCounts { acked: 2, rejected: 1 });
    }

    #[test]
    fn test_disconnect_never_underflows() {
        let stats = GatewayStats::default();
        stats.vehicle_disconnected();
        assert_eq!(stats.vehicles(), 0);
    }
}
