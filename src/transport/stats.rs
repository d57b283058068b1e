//! Datagram counters shared by every transport implementation
use std::sync::atomic::{AtomicU64, Ordering};

/// Live counters, updated from any task
#[derive(Debug, Default)]
pub struct TransportStats {
    pub datagrams_sent: AtomicU64,
    pub send_errors: AtomicU64,
    pub datagrams_received: AtomicU64,
    pub receive_errors: AtomicU64,
}

/// Point-in-time copy of [`TransportStats`]
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct FrozenTransportStats {
    pub datagrams_sent: u64,
    pub send_errors: u64,
    pub datagrams_received: u64,
    pub receive_errors: u64,
}

impl TransportStats {
    pub fn record_sent(&self) {
        self.datagrams_sent.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_send_error(&self) {
        self.send_errors.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_received(&self) {
        self.datagrams_received.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_receive_error(&self) {
        self.receive_errors.fetch_add(1, Ordering::Relaxed);
    }

    pub fn freeze(&self) -> FrozenTransportStats {
        FrozenTransportStats {
            datagrams_sent: self.datagrams_sent.load(Ordering::Relaxed),
            send_errors: self.send_errors.load(Ordering::Relaxed),
            datagrams_received: self.datagrams_received.load(Ordering::Relaxed),
            receive_errors: self.receive_errors.load(Ordering::Relaxed),
        }
    }
}
