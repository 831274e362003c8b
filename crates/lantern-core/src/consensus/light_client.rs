use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::sync::watch;
use tracing::{debug, info, warn};

use crate::config::ClientConfig;
use crate::consensus::checkpoint::{CheckpointError, VerifiedBootstrap};
use crate::consensus::clock::{compute_sync_period_at_slot, slot_at_time};
use crate::consensus::sync_committee::{verify_update, UpdateError, VerifiedUpdate};
use crate::types::beacon::*;

#[derive(Debug, Error)]
pub enum SyncError {
    #[error("Light client has not been bootstrapped")]
    NotInitialized,

    #[error("Light client is already bootstrapped")]
    AlreadyInitialized,

    #[error("Light client is bootstrapped but sync has not been started")]
    NotSyncing,

    #[error("Update finalizes slot {update_slot}, behind the store's finalized slot {store_slot}")]
    StaleUpdate { update_slot: u64, store_slot: u64 },

    #[error(transparent)]
    Update(#[from] UpdateError),

    #[error(transparent)]
    Checkpoint(#[from] CheckpointError),

    #[error("Beacon API request failed: {0}")]
    Transport(#[from] anyhow::Error),
}

impl SyncError {
    /// Errors that only mean "nothing to do with this update".
    pub fn is_soft(&self) -> bool {
        match self {
            SyncError::StaleUpdate { .. } => true,
            SyncError::Update(e) => e.is_soft(),
            _ => false,
        }
    }
}

#[derive(Clone, Debug)]
pub enum SyncState {
    Uninitialized,
    /// Trusted bootstrap installed, no updates applied yet.
    Bootstrapped(LightClientStore),
    Syncing(LightClientStore),
}

impl SyncState {
    fn store(&self) -> Option<&LightClientStore> {
        match self {
            SyncState::Uninitialized => None,
            SyncState::Bootstrapped(store) | SyncState::Syncing(store) => Some(store),
        }
    }
}

/// What applying one update changed.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct AdvanceOutcome {
    pub participants: usize,
    pub optimistic_advanced: bool,
    pub finalized_advanced: bool,
    pub next_committee_learned: bool,
    pub committee_rotated: bool,
}

impl AdvanceOutcome {
    pub fn changed_anything(&self) -> bool {
        self.optimistic_advanced || self.finalized_advanced || self.next_committee_learned || self.committee_rotated
    }
}

/// How far the verified chain is behind the wall clock.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct SyncStatus {
    /// Sync committee period of the finalized header.
    pub latest_synced_period: u64,
    pub clock_period: u64,
    pub head_slot: u64,
    pub clock_slot: u64,
    pub slots_behind: u64,
    pub is_lagging: bool,
}

/// Receivers for head changes. Value is `None` until the client is bootstrapped.
#[derive(Clone, Debug)]
pub struct HeadReceivers {
    pub finalized: watch::Receiver<Option<LightClientHeader>>,
    pub optimistic: watch::Receiver<Option<LightClientHeader>>,
}

/// The light client sync state machine. Owns the store; every update goes
/// through [`verify_update`] before it can touch it.
#[derive(Debug)]
pub struct LightClient {
    config: ClientConfig,
    state: SyncState,
    /// `UPDATE_TIMEOUT` window the participation counters belong to.
    participation_window: u64,
    finalized_tx: watch::Sender<Option<LightClientHeader>>,
    optimistic_tx: watch::Sender<Option<LightClientHeader>>,
}

impl LightClient {
    pub fn new(config: ClientConfig) -> Self {
        let (finalized_tx, _) = watch::channel(None);
        let (optimistic_tx, _) = watch::channel(None);
        Self {
            config,
            state: SyncState::Uninitialized,
            participation_window: 0,
            finalized_tx,
            optimistic_tx,
        }
    }

    pub fn config(&self) -> &ClientConfig {
        &self.config
    }

    pub fn state(&self) -> &SyncState {
        &self.state
    }

    /// Seed the store from a verified bootstrap.
    pub fn install(&mut self, bootstrap: VerifiedBootstrap) -> Result<(), SyncError> {
        if !matches!(self.state, SyncState::Uninitialized) {
            return Err(SyncError::AlreadyInitialized);
        }

        let (header, current_sync_committee) = bootstrap.into_parts();
        info!(
            slot = header.beacon.slot,
            period = compute_sync_period_at_slot(header.beacon.slot),
            "light client bootstrapped"
        );

        let store = LightClientStore {
            finalized_header: header.clone(),
            current_sync_committee,
            next_sync_committee: None,
            optimistic_header: header,
            previous_max_active_participants: 0,
            current_max_active_participants: 0,
        };
        self.publish(&store, true, true);
        self.participation_window = store.finalized_header.beacon.slot / UPDATE_TIMEOUT;
        self.state = SyncState::Bootstrapped(store);
        Ok(())
    }

    /// Begin accepting updates. Calling it again while syncing does nothing.
    pub fn start(&mut self) -> Result<(), SyncError> {
        match std::mem::replace(&mut self.state, SyncState::Uninitialized) {
            SyncState::Uninitialized => Err(SyncError::NotInitialized),
            SyncState::Bootstrapped(store) | SyncState::Syncing(store) => {
                self.state = SyncState::Syncing(store);
                Ok(())
            }
        }
    }

    pub fn is_syncing(&self) -> bool {
        matches!(self.state, SyncState::Syncing(_))
    }

    /// Verify `update` against the store and apply it.
    ///
    /// An update that finalizes an older slot than the store is rejected as
    /// [`SyncError::StaleUpdate`] before any verification. Rejected updates
    /// never change the store, except that a `current_slot` in a later
    /// `UPDATE_TIMEOUT` window first rolls the participation counters over.
    pub fn advance(&mut self, update: &LightClientUpdate, current_slot: u64) -> Result<AdvanceOutcome, SyncError> {
        let store = match &mut self.state {
            SyncState::Syncing(store) => store,
            SyncState::Bootstrapped(_) => return Err(SyncError::NotSyncing),
            SyncState::Uninitialized => return Err(SyncError::NotInitialized),
        };

        let window = current_slot / UPDATE_TIMEOUT;
        if window > self.participation_window {
            roll_participation(store, window - self.participation_window);
            self.participation_window = window;
        }
        let store = &*store;

        if update.is_finality_update() && update.finalized_slot() < store.finalized_header.beacon.slot {
            warn!(
                update_slot = update.finalized_slot(),
                store_slot = store.finalized_header.beacon.slot,
                "ignoring stale update"
            );
            return Err(SyncError::StaleUpdate {
                update_slot: update.finalized_slot(),
                store_slot: store.finalized_header.beacon.slot,
            });
        }

        let verified = match verify_update(store, update, &self.config.chain, current_slot) {
            Ok(verified) => verified,
            Err(e) if e.is_soft() => {
                debug!(error = %e, attested_slot = update.attested_header.beacon.slot, "skipping update");
                return Err(e.into());
            }
            Err(e) => {
                warn!(error = %e, attested_slot = update.attested_header.beacon.slot, "rejected invalid update");
                return Err(e.into());
            }
        };

        let mut store = store.clone();
        let outcome = apply_update(&mut store, &verified);

        self.publish(&store, outcome.finalized_advanced, outcome.optimistic_advanced);
        self.state = SyncState::Syncing(store);
        Ok(outcome)
    }

    /// The header to serve as chain head: the optimistic header, or the
    /// finalized one when optimistic tracking is off.
    pub fn head(&self) -> Option<LightClientHeader> {
        let store = self.state.store()?;
        if self.config.track_optimistic {
            Some(store.optimistic_header.clone())
        } else {
            Some(store.finalized_header.clone())
        }
    }

    pub fn finalized(&self) -> Option<LightClientHeader> {
        self.state.store().map(|s| s.finalized_header.clone())
    }

    /// A copy of the store.
    pub fn store(&self) -> Option<LightClientStore> {
        self.state.store().cloned()
    }

    pub fn current_period(&self) -> Option<u64> {
        self.state.store().map(|s| s.current_period())
    }

    /// Head lag against the wall clock at unix time `now`.
    pub fn status(&self, now: u64) -> Option<SyncStatus> {
        let store = self.state.store()?;
        let chain = &self.config.chain;
        let clock_slot = slot_at_time(chain.genesis_time, chain.seconds_per_slot, now);
        let head_slot = if self.config.track_optimistic {
            store.optimistic_header.beacon.slot
        } else {
            store.finalized_header.beacon.slot
        };
        let slots_behind = clock_slot.saturating_sub(head_slot);

        Some(SyncStatus {
            latest_synced_period: store.current_period(),
            clock_period: compute_sync_period_at_slot(clock_slot),
            head_slot,
            clock_slot,
            slots_behind,
            is_lagging: slots_behind > self.config.slots_behind_threshold,
        })
    }

    pub fn subscribe(&self) -> HeadReceivers {
        HeadReceivers {
            finalized: self.finalized_tx.subscribe(),
            optimistic: self.optimistic_tx.subscribe(),
        }
    }

    fn publish(&self, store: &LightClientStore, finalized: bool, optimistic: bool) {
        if finalized {
            self.finalized_tx.send_replace(Some(store.finalized_header.clone()));
        }
        if optimistic {
            self.optimistic_tx.send_replace(Some(store.optimistic_header.clone()));
        }
    }
}

/// The per-slot participation rollover, for `elapsed` windows at once.
fn roll_participation(store: &mut LightClientStore, elapsed: u64) {
    store.previous_max_active_participants = if elapsed == 1 {
        store.current_max_active_participants
    } else {
        0
    };
    store.current_max_active_participants = 0;
    debug!(
        previous = store.previous_max_active_participants,
        "participation window rolled over"
    );
}

/// `process_light_client_update` of the sync protocol, minus the checks
/// [`verify_update`] already made.
fn apply_update(store: &mut LightClientStore, verified: &VerifiedUpdate<'_>) -> AdvanceOutcome {
    let update = verified.update();
    let participants = verified.participants() as u64;
    let mut outcome = AdvanceOutcome {
        participants: verified.participants(),
        ..Default::default()
    };

    store.current_max_active_participants = store.current_max_active_participants.max(participants);

    let attested = &update.attested_header;
    if participants > store.safety_threshold() && attested.beacon.slot > store.optimistic_header.beacon.slot {
        store.optimistic_header = attested.clone();
        outcome.optimistic_advanced = true;
        debug!(slot = attested.beacon.slot, participants, "optimistic head advanced");
    }

    let has_supermajority = participants * 3 >= SYNC_COMMITTEE_SIZE as u64 * 2;
    if !has_supermajority {
        debug!(participants, "not enough participation to finalize");
        return outcome;
    }

    let store_period = store.current_period();
    let finalized_slot = update.finalized_slot();
    let finalized_period = compute_sync_period_at_slot(finalized_slot);
    let attested_period = compute_sync_period_at_slot(attested.beacon.slot);
    let is_newer = finalized_slot > store.finalized_header.beacon.slot;
    let learns_next_committee = store.next_sync_committee.is_none()
        && update.is_sync_committee_update()
        && update.is_finality_update()
        && finalized_period == attested_period;

    if !is_newer && !learns_next_committee {
        return outcome;
    }

    match &store.next_sync_committee {
        None => {
            if finalized_period == store_period && update.is_sync_committee_update() {
                store.next_sync_committee = update.next_committee().cloned();
                outcome.next_committee_learned = true;
                info!(period = store_period + 1, "next sync committee learned");
            }
        }
        Some(next) if finalized_period == store_period + 1 => {
            store.current_sync_committee = next.clone();
            store.next_sync_committee = update.next_committee().cloned();
            store.previous_max_active_participants = store.current_max_active_participants;
            store.current_max_active_participants = 0;
            outcome.committee_rotated = true;
            info!(period = finalized_period, "sync committee rotated");
        }
        Some(_) => {}
    }

    if is_newer {
        if let Some(finalized) = update.finalized() {
            store.finalized_header = finalized.clone();
            outcome.finalized_advanced = true;
            info!(
                slot = finalized.beacon.slot,
                participation = %format!("{:.2}%", participants as f64 / SYNC_COMMITTEE_SIZE as f64 * 100.0),
                "finalized head advanced"
            );

            if store.finalized_header.beacon.slot > store.optimistic_header.beacon.slot {
                store.optimistic_header = store.finalized_header.clone();
                outcome.optimistic_advanced = true;
            }
        }
    }

    outcome
}
