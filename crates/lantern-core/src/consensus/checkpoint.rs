use thiserror::Error;
use tracing::{debug, info};

use crate::api::{BeaconApi, Checkpoint};
use crate::config::ChainConfig;
use crate::consensus::sync_committee::is_valid_light_client_header;
use crate::ssz::{hash_beacon_block_header, hash_sync_committee, verify_gindex_branch};
use crate::types::beacon::{LightClientBootstrap, LightClientHeader, SyncCommittee};

/// Errors that can occur during checkpoint operations.
#[derive(Debug, Error)]
pub enum CheckpointError {
    #[error("Checkpoint root format invalid: {reason}")]
    InvalidInput { reason: String },

    #[error("Bootstrap does not match the trusted checkpoint: {reason}")]
    UntrustedBootstrap { reason: String },

    #[error("Failed to fetch bootstrap: {0}")]
    Transport(#[from] anyhow::Error),

    #[error("Insufficient checkpoint source agreement: {agreeing}/{total} sources agree (need {required})")]
    InsufficientAgreement {
        agreeing: usize,
        total: usize,
        required: usize,
    },

    #[error("No checkpoint sources available")]
    NoSources,
}

/// A bootstrap whose header is the trusted checkpoint and whose committee is
/// proven against that header's state root. This is the one moment of
/// "soft trust" in the client's lifecycle: everything after it follows from
/// sync committee signatures.
#[derive(Clone, Debug)]
pub struct VerifiedBootstrap {
    checkpoint_root: [u8; 32],
    header: LightClientHeader,
    current_sync_committee: SyncCommittee,
}

impl VerifiedBootstrap {
    pub fn checkpoint_root(&self) -> [u8; 32] {
        self.checkpoint_root
    }

    pub fn header(&self) -> &LightClientHeader {
        &self.header
    }

    pub fn current_sync_committee(&self) -> &SyncCommittee {
        &self.current_sync_committee
    }

    pub(crate) fn into_parts(self) -> (LightClientHeader, SyncCommittee) {
        (self.header, self.current_sync_committee)
    }
}

/// Parse a user supplied checkpoint block root: `0x` followed by exactly 64
/// hex characters.
pub fn parse_checkpoint_root(input: &str) -> Result<[u8; 32], CheckpointError> {
    let hex_str = input
        .strip_prefix("0x")
        .or_else(|| input.strip_prefix("0X"))
        .ok_or_else(|| CheckpointError::InvalidInput {
            reason: "missing 0x prefix".to_string(),
        })?;

    if hex_str.len() != 64 {
        return Err(CheckpointError::InvalidInput {
            reason: format!("Expected 64 hex characters, got {}", hex_str.len()),
        });
    }

    crate::types::parse_hex_array::<32>(hex_str).map_err(|reason| CheckpointError::InvalidInput { reason })
}

/// Check a bootstrap against the checkpoint root it was requested for.
/// Pure: nothing is installed anywhere.
pub fn verify_bootstrap(
    checkpoint_root: [u8; 32],
    bootstrap: &LightClientBootstrap,
    config: &ChainConfig,
) -> Result<VerifiedBootstrap, CheckpointError> {
    let untrusted = |reason: String| CheckpointError::UntrustedBootstrap { reason };

    let header_root = hash_beacon_block_header(&bootstrap.header.beacon);
    if header_root != checkpoint_root {
        return Err(untrusted(format!(
            "header root 0x{} != checkpoint 0x{}",
            hex::encode(header_root),
            hex::encode(checkpoint_root)
        )));
    }

    let fork = config.fork_at_slot(bootstrap.header.beacon.slot);
    if !is_valid_light_client_header(&bootstrap.header, fork) {
        return Err(untrusted(format!(
            "execution payload not proven for {} header at slot {}",
            fork, bootstrap.header.beacon.slot
        )));
    }

    bootstrap
        .current_sync_committee
        .validate()
        .map_err(|e| untrusted(e.to_string()))?;

    if !verify_gindex_branch(
        &hash_sync_committee(&bootstrap.current_sync_committee),
        &bootstrap.current_sync_committee_branch,
        fork.current_sync_committee_gindex(),
        &bootstrap.header.beacon.state_root,
    ) {
        return Err(untrusted(
            "current sync committee branch does not verify against the state root".to_string(),
        ));
    }

    debug!(slot = bootstrap.header.beacon.slot, %fork, "bootstrap verified");
    Ok(VerifiedBootstrap {
        checkpoint_root,
        header: bootstrap.header.clone(),
        current_sync_committee: bootstrap.current_sync_committee.clone(),
    })
}

/// Fetch the bootstrap for `checkpoint_root` and verify it.
pub async fn bootstrap<A: BeaconApi + ?Sized>(
    api: &A,
    checkpoint_root: [u8; 32],
    config: &ChainConfig,
) -> Result<VerifiedBootstrap, CheckpointError> {
    info!(checkpoint = %hex::encode(checkpoint_root), "fetching bootstrap");
    let bootstrap = api.get_bootstrap(checkpoint_root).await?;
    verify_bootstrap(checkpoint_root, &bootstrap, config)
}

/// The node's latest finalized checkpoint. Trusting it means trusting the
/// node; prefer a root from an independent source when there is one.
pub async fn trusted_checkpoint_from_node<A: BeaconApi + ?Sized>(api: &A) -> Result<Checkpoint, CheckpointError> {
    let checkpoints = api.get_finality_checkpoints("head").await?;
    info!(
        epoch = checkpoints.finalized.epoch,
        root = %hex::encode(checkpoints.finalized.root),
        "using node finalized checkpoint"
    );
    Ok(checkpoints.finalized)
}

/// Verify that multiple checkpoint sources agree on the same block root.
/// We trust that N independent operators won't all collude to hand out a
/// fake checkpoint.
pub fn verify_checkpoint_consensus(
    checkpoints: &[Checkpoint],
    required_agreement: usize,
) -> Result<Checkpoint, CheckpointError> {
    if checkpoints.is_empty() {
        return Err(CheckpointError::NoSources);
    }

    // Count how many sources agree on each block root
    let mut agreement_counts: Vec<(Checkpoint, usize)> = Vec::new();
    for checkpoint in checkpoints {
        match agreement_counts
            .iter_mut()
            .find(|(c, _)| c.root == checkpoint.root)
        {
            Some((_, count)) => *count += 1,
            None => agreement_counts.push((*checkpoint, 1)),
        }
    }

    let (best, agreeing) = agreement_counts
        .into_iter()
        .max_by_key(|(_, count)| *count)
        .ok_or(CheckpointError::NoSources)?;

    if required_agreement == 0 || agreeing < required_agreement {
        return Err(CheckpointError::InsufficientAgreement {
            agreeing,
            total: checkpoints.len(),
            required: required_agreement,
        });
    }

    Ok(best)
}
