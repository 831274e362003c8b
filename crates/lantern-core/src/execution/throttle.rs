use crate::config::ClientConfig;

/// Decides when balance proofs are worth fetching again.
///
/// A fetch is due when the verified head moved to a new execution state
/// root, the head is not lagging the clock by more than the threshold, and
/// at least `min_interval_ms` passed since the previous fetch.
#[derive(Clone, Debug)]
pub struct ProofThrottle {
    min_interval_ms: u64,
    slots_behind_threshold: u64,
    last_fetch_ms: Option<u64>,
    last_state_root: Option<[u8; 32]>,
}

impl ProofThrottle {
    pub fn new(min_interval_ms: u64, slots_behind_threshold: u64) -> Self {
        Self {
            min_interval_ms,
            slots_behind_threshold,
            last_fetch_ms: None,
            last_state_root: None,
        }
    }

    pub fn from_config(config: &ClientConfig) -> Self {
        Self::new(config.proof_fetch_interval_ms, config.slots_behind_threshold)
    }

    pub fn should_fetch(&self, now_ms: u64, head_state_root: &[u8; 32], head_slot: u64, clock_slot: u64) -> bool {
        if clock_slot.saturating_sub(head_slot) > self.slots_behind_threshold {
            return false;
        }
        if self.last_state_root.as_ref() == Some(head_state_root) {
            return false;
        }
        match self.last_fetch_ms {
            Some(last) => now_ms.saturating_sub(last) >= self.min_interval_ms,
            None => true,
        }
    }

    pub fn record_fetch(&mut self, now_ms: u64, state_root: [u8; 32]) {
        self.last_fetch_ms = Some(now_ms);
        self.last_state_root = Some(state_root);
    }

    /// Forget the last fetch, e.g. after the tracked address changed.
    pub fn reset(&mut self) {
        self.last_fetch_ms = None;
        self.last_state_root = None;
    }
}
