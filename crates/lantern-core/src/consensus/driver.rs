use tracing::{debug, info, warn};

use crate::api::BeaconApi;
use crate::config::ChainConfig;
use crate::consensus::checkpoint::{bootstrap, VerifiedBootstrap};
use crate::consensus::clock::{compute_sync_period_at_slot, slot_at_time};
use crate::consensus::light_client::{LightClient, SyncError};
use crate::types::beacon::LightClientUpdate;

/// Tally of one [`SyncDriver::sync_once`] step.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct SyncReport {
    /// Updates that changed the store.
    pub applied: usize,
    /// Updates dropped as stale or under-signed.
    pub skipped: usize,
    /// Updates that failed verification.
    pub rejected: usize,
    pub finalized_slot: u64,
    pub head_slot: u64,
}

/// Requests of one sync step, read off the client before any I/O.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct SyncPlan {
    pub current_slot: u64,
    /// `(start_period, count)` for `get_updates`, set while the store lags
    /// the clock or lacks the next committee.
    pub period_updates: Option<(u64, u8)>,
    pub track_optimistic: bool,
}

impl SyncPlan {
    pub fn for_client(client: &LightClient, now: u64) -> Result<Self, SyncError> {
        if !client.is_syncing() {
            return Err(SyncError::NotSyncing);
        }

        let config = client.config();
        let current_slot = slot_at_time(config.chain.genesis_time, config.chain.seconds_per_slot, now);
        let clock_period = compute_sync_period_at_slot(current_slot);

        let store_period = client.current_period().ok_or(SyncError::NotInitialized)?;
        let needs_committee = client
            .store()
            .map(|s| s.next_sync_committee.is_none())
            .unwrap_or(true);

        let period_updates = (store_period < clock_period || needs_committee).then(|| {
            let wanted = clock_period.saturating_sub(store_period) + 1;
            let count = wanted.min(config.max_updates_per_request.max(1) as u64) as u8;
            (store_period, count)
        });

        Ok(Self {
            current_slot,
            period_updates,
            track_optimistic: config.track_optimistic,
        })
    }
}

/// Feeds a [`LightClient`] from a beacon node.
///
/// Each call does one round of requests and returns. Scheduling (every slot,
/// on a timer, on user action) and retries are the caller's business.
///
/// Fetching and applying are separate steps: [`SyncDriver::fetch`] needs only
/// a [`SyncPlan`], and [`apply_updates`] takes the client mutably without
/// awaiting anything. Callers that share the client can hold it for the
/// apply alone.
pub struct SyncDriver<A> {
    api: A,
}

impl<A: BeaconApi> SyncDriver<A> {
    pub fn new(api: A) -> Self {
        Self { api }
    }

    pub fn api(&self) -> &A {
        &self.api
    }

    /// Fetch and verify the bootstrap for `checkpoint_root`.
    pub async fn fetch_bootstrap(
        &self,
        chain: &ChainConfig,
        checkpoint_root: [u8; 32],
    ) -> Result<VerifiedBootstrap, SyncError> {
        Ok(bootstrap(&self.api, checkpoint_root, chain).await?)
    }

    /// Bootstrap from `checkpoint_root`, install it and start syncing.
    pub async fn initialize(&self, client: &mut LightClient, checkpoint_root: [u8; 32]) -> Result<(), SyncError> {
        let chain = client.config().chain.clone();
        let verified = self.fetch_bootstrap(&chain, checkpoint_root).await?;
        client.install(verified)?;
        client.start()
    }

    /// Fetch the updates `plan` calls for, in apply order: whole periods
    /// first, then the latest finality update and (when tracked) the latest
    /// optimistic update.
    ///
    /// A missing finality update is only logged, nodes answer 404 until they
    /// have seen one. Any other failure ends the step with nothing fetched.
    pub async fn fetch(&self, plan: &SyncPlan) -> Result<Vec<LightClientUpdate>, SyncError> {
        let mut updates = Vec::new();

        if let Some((period, count)) = plan.period_updates {
            debug!(period, count, "requesting period updates");
            updates.extend(self.api.get_updates(period, count).await?);
        }

        match self.api.get_finality_update().await {
            Ok(update) => updates.push(update),
            Err(e) => warn!(error = %e, "could not fetch finality update"),
        }

        if plan.track_optimistic {
            updates.push(self.api.get_optimistic_update().await?);
        }
        Ok(updates)
    }

    /// One polling step at unix time `now`: plan, fetch, then apply.
    ///
    /// Rejected updates are logged and counted, not returned as errors. Only
    /// lifecycle and transport failures end the step early.
    pub async fn sync_once(&self, client: &mut LightClient, now: u64) -> Result<SyncReport, SyncError> {
        let plan = SyncPlan::for_client(client, now)?;
        let updates = self.fetch(&plan).await?;
        apply_updates(client, &updates, plan.current_slot)
    }
}

/// Apply fetched updates in order and tally the outcomes.
pub fn apply_updates(
    client: &mut LightClient,
    updates: &[LightClientUpdate],
    current_slot: u64,
) -> Result<SyncReport, SyncError> {
    if !client.is_syncing() {
        return Err(SyncError::NotSyncing);
    }

    let mut report = SyncReport::default();
    for update in updates {
        match client.advance(update, current_slot) {
            Ok(outcome) if outcome.changed_anything() => report.applied += 1,
            Ok(_) => report.skipped += 1,
            Err(e) if e.is_soft() => report.skipped += 1,
            Err(_) => report.rejected += 1,
        }
    }

    report.finalized_slot = client.finalized().map(|h| h.beacon.slot).unwrap_or_default();
    report.head_slot = client.head().map(|h| h.beacon.slot).unwrap_or_default();
    if report.applied > 0 {
        info!(
            finalized = report.finalized_slot,
            head = report.head_slot,
            applied = report.applied,
            "sync step complete"
        );
    }
    Ok(report)
}
