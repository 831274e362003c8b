//! Slot, epoch and sync period arithmetic.
//!
//! Time is passed in explicitly as unix seconds so every function is pure;
//! callers read the wall clock (`SystemTime` natively, `Date.now()` in the
//! browser) and hand it in.

use serde::{Deserialize, Serialize};

use crate::config::ChainConfig;
use crate::types::beacon::{
    EPOCHS_PER_SYNC_COMMITTEE_PERIOD, SLOTS_PER_EPOCH, SLOTS_PER_SYNC_COMMITTEE_PERIOD,
};

pub fn compute_epoch_at_slot(slot: u64) -> u64 {
    slot / SLOTS_PER_EPOCH
}

pub fn compute_start_slot_at_epoch(epoch: u64) -> u64 {
    epoch.saturating_mul(SLOTS_PER_EPOCH)
}

pub fn compute_sync_period_at_epoch(epoch: u64) -> u64 {
    epoch / EPOCHS_PER_SYNC_COMMITTEE_PERIOD
}

pub fn compute_sync_period_at_slot(slot: u64) -> u64 {
    slot / SLOTS_PER_SYNC_COMMITTEE_PERIOD
}

/// Slot at unix time `now`, or 0 before genesis.
pub fn slot_at_time(genesis_time: u64, seconds_per_slot: u64, now: u64) -> u64 {
    if seconds_per_slot == 0 {
        return 0;
    }
    now.saturating_sub(genesis_time) / seconds_per_slot
}

pub fn slot_start_time(genesis_time: u64, seconds_per_slot: u64, slot: u64) -> u64 {
    genesis_time.saturating_add(slot.saturating_mul(seconds_per_slot))
}

/// Seconds until the next slot boundary.
pub fn time_until_next_slot(config: &ChainConfig, now: u64) -> u64 {
    let slot = slot_at_time(config.genesis_time, config.seconds_per_slot, now);
    let next = slot_start_time(config.genesis_time, config.seconds_per_slot, slot + 1);
    next.saturating_sub(now)
}

/// Where the chain clock is at a given instant.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct ClockSnapshot {
    pub slot: u64,
    pub epoch: u64,
    pub period: u64,
    pub slot_in_epoch: u64,
    pub epoch_in_period: u64,
    /// Fraction of the current epoch elapsed, in `[0, 1)`.
    pub epoch_progress: f64,
    /// Fraction of the current sync period elapsed, in `[0, 1)`.
    pub period_progress: f64,
}

impl ClockSnapshot {
    pub fn at(config: &ChainConfig, now: u64) -> Self {
        Self::at_slot(slot_at_time(
            config.genesis_time,
            config.seconds_per_slot,
            now,
        ))
    }

    pub fn at_slot(slot: u64) -> Self {
        let epoch = compute_epoch_at_slot(slot);
        let slot_in_epoch = slot % SLOTS_PER_EPOCH;
        let epoch_in_period = epoch % EPOCHS_PER_SYNC_COMMITTEE_PERIOD;
        Self {
            slot,
            epoch,
            period: compute_sync_period_at_epoch(epoch),
            slot_in_epoch,
            epoch_in_period,
            epoch_progress: slot_in_epoch as f64 / SLOTS_PER_EPOCH as f64,
            period_progress: (slot % SLOTS_PER_SYNC_COMMITTEE_PERIOD) as f64
                / SLOTS_PER_SYNC_COMMITTEE_PERIOD as f64,
        }
    }
}
