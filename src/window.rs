/// Sliding replay window over record sequence numbers of one epoch.
///
/// Tracks the highest accepted sequence number and a bitmap of the 64
/// numbers below it.
#[derive(Debug, Default)]
pub(crate) struct ReplayWindow {
    max_seq: u64,
    window: u64,
    seen_any: bool,
}

impl ReplayWindow {
    pub fn new() -> Self {
        Self::default()
    }

    /// Whether `seqno` would be accepted, without recording it.
    ///
    /// Used before decryption so forged records cannot move the window.
    pub fn is_fresh(&self, seqno: u64) -> bool {
        if !self.seen_any || seqno > self.max_seq {
            return true;
        }
        let offset = self.max_seq - seqno;
        offset < 64 && self.window & (1u64 << offset) == 0
    }

    /// Record `seqno` as seen. Returns false for duplicates and records
    /// older than the window.
    pub fn check_and_update(&mut self, seqno: u64) -> bool {
        if !self.is_fresh(seqno) {
            return false;
        }

        if !self.seen_any {
            self.seen_any = true;
            self.max_seq = seqno;
            self.window = 1;
        } else if seqno > self.max_seq {
            let delta = seqno - self.max_seq;
            self.window = if delta >= 64 { 0 } else { self.window << delta };
            self.window |= 1;
            self.max_seq = seqno;
        } else {
            self.window |= 1u64 << (self.max_seq - seqno);
        }
        true
    }
}
