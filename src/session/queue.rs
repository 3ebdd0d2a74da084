use std::collections::VecDeque;

/// Bounded FIFO of inbound datagrams. A full queue drops its oldest entry.
#[derive(Debug)]
pub(crate) struct InboundQueue {
    items: VecDeque<Vec<u8>>,
    capacity: usize,
}

impl InboundQueue {
    pub fn new(capacity: usize) -> Self {
        InboundQueue {
            items: VecDeque::with_capacity(capacity.min(64)),
            capacity: capacity.max(1),
        }
    }

    /// Append a datagram, returning how many old ones were dropped for it.
    pub fn push(&mut self, datagram: Vec<u8>) -> usize {
        let mut dropped = 0;
        while self.items.len() >= self.capacity {
            self.items.pop_front();
            dropped += 1;
        }
        self.items.push_back(datagram);
        dropped
    }

    pub fn front(&self) -> Option<&[u8]> {
        self.items.front().map(|d| d.as_slice())
    }

    pub fn pop(&mut self) -> Option<Vec<u8>> {
        self.items.pop_front()
    }

    pub fn clear(&mut self) {
        self.items.clear();
    }
}
