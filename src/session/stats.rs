use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};

/// Snapshot of a session's I/O counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct IoStats {
    pub rx_packets: u64,
    pub rx_bytes: u64,
    pub tx_packets: u64,
    pub tx_bytes: u64,
    /// Inbound datagrams dropped by a full queue.
    pub rx_dropped: u64,
    /// Inbound datagrams over `max_datagram_size`.
    pub rx_oversized: u64,
    /// Bytes seen while waiting for a valid cookie.
    pub cookie_bytes: u64,
    pub flood_pauses: u64,
    /// Datagrams the engine could not use at all.
    pub rejected: u64,
}

impl fmt::Display for IoStats {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "rx {} packets/{} bytes (dropped {}, oversized {}, rejected {}), \
             tx {} packets/{} bytes, cookie {} bytes, {} flood pauses",
            self.rx_packets,
            self.rx_bytes,
            self.rx_dropped,
            self.rx_oversized,
            self.rejected,
            self.tx_packets,
            self.tx_bytes,
            self.cookie_bytes,
            self.flood_pauses
        )
    }
}

#[derive(Debug, Default)]
pub(crate) struct Counters {
    pub rx_packets: AtomicU64,
    pub rx_bytes: AtomicU64,
    pub tx_packets: AtomicU64,
    pub tx_bytes: AtomicU64,
    pub rx_dropped: AtomicU64,
    pub rx_oversized: AtomicU64,
    pub cookie_bytes: AtomicU64,
    pub flood_pauses: AtomicU64,
    pub rejected: AtomicU64,
}

impl Counters {
    pub fn add(counter: &AtomicU64, n: u64) {
        counter.fetch_add(n, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> IoStats {
        let get = |c: &AtomicU64| c.load(Ordering::Relaxed);
        IoStats {
            rx_packets: get(&self.rx_packets),
            rx_bytes: get(&self.rx_bytes),
            tx_packets: get(&self.tx_packets),
            tx_bytes: get(&self.tx_bytes),
            rx_dropped: get(&self.rx_dropped),
            rx_oversized: get(&self.rx_oversized),
            cookie_bytes: get(&self.cookie_bytes),
            flood_pauses: get(&self.flood_pauses),
            rejected: get(&self.rejected),
        }
    }
}
