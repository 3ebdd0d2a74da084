use std::collections::BTreeMap;
use std::time::{Duration, Instant};

/// Puts application records of one epoch back in sequence order.
///
/// Every record of the epoch is inserted, application data with its payload
/// and anything else as a filler, so gaps are only waited for when a record
/// is really missing. A gap is skipped after the timeout. Records behind the
/// delivery point are dropped.
#[derive(Debug)]
pub(crate) struct ReorderBuffer {
    window: u64,
    timeout: Duration,
    next: u64,
    pending: BTreeMap<u64, Option<Vec<u8>>>,
    gap_since: Option<Instant>,
}

pub(crate) type Delivered = Vec<(u64, Vec<u8>)>;

impl ReorderBuffer {
    pub fn new(window: u64, timeout: Duration) -> Self {
        ReorderBuffer {
            window: window.max(1),
            timeout,
            next: 0,
            pending: BTreeMap::new(),
            gap_since: None,
        }
    }

    pub fn insert(&mut self, seq: u64, data: Option<Vec<u8>>, now: Instant) -> Delivered {
        let mut out = Vec::new();
        if seq < self.next {
            trace!("Drop late record {} (expecting {})", seq, self.next);
            return out;
        }

        if seq - self.next >= self.window {
            // Too far ahead; give up on everything missing before it.
            let keep = self.pending.split_off(&seq);
            for (s, data) in std::mem::replace(&mut self.pending, keep) {
                if let Some(data) = data {
                    out.push((s, data));
                }
            }
            debug!("Reorder window overflow, skip {} -> {}", self.next, seq);
            self.next = seq;
        }

        self.pending.entry(seq).or_insert(data);
        self.drain(&mut out);
        self.update_gap(now);
        out
    }

    /// Skip a gap that has been waited on for longer than the timeout.
    pub fn handle_timeout(&mut self, now: Instant) -> Delivered {
        let mut out = Vec::new();
        let Some(deadline) = self.deadline() else {
            return out;
        };
        if now < deadline {
            return out;
        }
        if let Some((&first, _)) = self.pending.iter().next() {
            debug!("Reorder timeout, skip {} -> {}", self.next, first);
            self.next = first;
        }
        self.drain(&mut out);
        self.gap_since = None;
        self.update_gap(now);
        out
    }

    /// Deliver everything pending in order and restart at sequence 0, for
    /// the next epoch.
    pub fn flush(&mut self) -> Delivered {
        let out = std::mem::take(&mut self.pending)
            .into_iter()
            .filter_map(|(s, data)| data.map(|d| (s, d)))
            .collect();
        self.next = 0;
        self.gap_since = None;
        out
    }

    pub fn deadline(&self) -> Option<Instant> {
        self.gap_since.and_then(|t| t.checked_add(self.timeout))
    }

    fn drain(&mut self, out: &mut Delivered) {
        while let Some(data) = self.pending.remove(&self.next) {
            if let Some(data) = data {
                out.push((self.next, data));
            }
            self.next += 1;
        }
    }

    fn update_gap(&mut self, now: Instant) {
        if self.pending.is_empty() {
            self.gap_since = None;
        } else if self.gap_since.is_none() {
            self.gap_since = Some(now);
        }
    }
}
