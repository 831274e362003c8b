use thiserror::Error;

use crate::config::ChainConfig;
use crate::consensus::clock::compute_sync_period_at_slot;
use crate::ssz::{
    hash_beacon_block_header, hash_execution_payload_header, hash_sync_committee, sha256_pair,
    verify_gindex_branch,
};
use crate::types::beacon::*;
use crate::types::fork::Fork;

/// Why an update was rejected. Each variant names one failed check, in the
/// order the checks run.
#[derive(Clone, Debug, PartialEq, Eq, Error)]
pub enum UpdateError {
    #[error("Sync committee bits length mismatch: expected 64 bytes, got {got}")]
    InvalidSyncCommitteeBitsLength { got: usize },

    #[error("Invalid {which} header at slot {slot}: execution payload is not proven by the body root")]
    InvalidHeader { which: &'static str, slot: u64 },

    #[error("Invalid slot order: need signature slot {signature_slot} > attested slot {attested_slot} >= finalized slot {finalized_slot}")]
    InvalidSlotOrder {
        signature_slot: u64,
        attested_slot: u64,
        finalized_slot: u64,
    },

    #[error("Signature slot {signature_slot} is ahead of the current slot {current_slot}")]
    FutureSignature { signature_slot: u64, current_slot: u64 },

    #[error("Update for period {signature_period} (attested {attested_period}) is not usable at store period {store_period}")]
    InvalidPeriod {
        store_period: u64,
        attested_period: u64,
        signature_period: u64,
    },

    #[error("Invalid Merkle branch for next sync committee: branch verification failed")]
    InvalidNextSyncCommitteeBranch,

    #[error("Next sync committee differs from the one already proven for this period")]
    ConflictingNextSyncCommittee,

    #[error("Invalid Merkle branch for finalized header: branch verification failed")]
    InvalidFinalityBranch,

    #[error("Insufficient sync committee participation: {participants}/512 (need at least {required})")]
    InsufficientParticipants { participants: usize, required: usize },

    #[error("Invalid BLS public key at index {index}: {reason}")]
    InvalidPublicKey { index: usize, reason: String },

    #[error("Invalid BLS signature: the aggregate signature does not verify against the participating committee members")]
    InvalidSignature,

    #[error("BLS error: {0}")]
    BlsError(String),
}

impl UpdateError {
    /// Low participation is not evidence of a bad update. Callers should
    /// drop it quietly and wait for a better one.
    pub fn is_soft(&self) -> bool {
        matches!(self, UpdateError::InsufficientParticipants { .. })
    }
}

/// An update that passed every check against a particular store. Only
/// [`verify_update`] hands these out, so applying one cannot skip verification.
#[derive(Debug)]
pub struct VerifiedUpdate<'a> {
    update: &'a LightClientUpdate,
    participants: usize,
}

impl<'a> VerifiedUpdate<'a> {
    pub fn update(&self) -> &'a LightClientUpdate {
        self.update
    }

    pub fn participants(&self) -> usize {
        self.participants
    }
}

/// Compute the signing root for a beacon block header.
/// The committee signs `hash_tree_root(SigningData(header_root, domain))`.
pub fn compute_signing_root(header: &BeaconBlockHeader, domain: &[u8; 32]) -> [u8; 32] {
    sha256_pair(&hash_beacon_block_header(header), domain)
}

/// domain = domain_type + fork_data_root[:28]
pub fn compute_domain(
    domain_type: &[u8; 4],
    fork_version: &[u8; 4],
    genesis_validators_root: &[u8; 32],
) -> [u8; 32] {
    let fork_data_root = compute_fork_data_root(fork_version, genesis_validators_root);
    let mut domain = [0u8; 32];
    domain[..4].copy_from_slice(domain_type);
    domain[4..].copy_from_slice(&fork_data_root[..28]);
    domain
}

fn compute_fork_data_root(fork_version: &[u8; 4], genesis_validators_root: &[u8; 32]) -> [u8; 32] {
    let mut version_leaf = [0u8; 32];
    version_leaf[..4].copy_from_slice(fork_version);
    sha256_pair(&version_leaf, genesis_validators_root)
}

/// Check that a header's execution payload (if its fork has one) is part of
/// the block body it claims.
pub fn is_valid_light_client_header(header: &LightClientHeader, fork: Fork) -> bool {
    if !fork.has_execution_header() {
        return header.execution.is_none() && header.execution_branch.iter().all(|n| *n == [0u8; 32]);
    }

    let Some(execution) = &header.execution else {
        return false;
    };

    if !fork.has_blob_gas()
        && (execution.blob_gas_used.unwrap_or(0) != 0 || execution.excess_blob_gas.unwrap_or(0) != 0)
    {
        return false;
    }

    verify_gindex_branch(
        &hash_execution_payload_header(execution, fork),
        &header.execution_branch,
        fork.execution_payload_gindex(),
        &header.beacon.body_root,
    )
}

/// Run every check of the light client sync protocol on `update` against
/// `store`, stopping at the first failure.
///
/// The participation floor (`min_sync_committee_participants`) is checked
/// right before the signature and reported as the soft
/// [`UpdateError::InsufficientParticipants`].
pub fn verify_update<'a>(
    store: &LightClientStore,
    update: &'a LightClientUpdate,
    config: &ChainConfig,
    current_slot: u64,
) -> Result<VerifiedUpdate<'a>, UpdateError> {
    let aggregate = &update.sync_aggregate;
    if aggregate.sync_committee_bits.len() != SYNC_COMMITTEE_BITS_LEN {
        return Err(UpdateError::InvalidSyncCommitteeBitsLength {
            got: aggregate.sync_committee_bits.len(),
        });
    }

    let attested = &update.attested_header;
    let attested_fork = config.fork_at_slot(attested.beacon.slot);
    if !is_valid_light_client_header(attested, attested_fork) {
        return Err(UpdateError::InvalidHeader {
            which: "attested",
            slot: attested.beacon.slot,
        });
    }

    let finalized_slot = update.finalized_slot();
    if !(update.signature_slot > attested.beacon.slot && attested.beacon.slot >= finalized_slot) {
        return Err(UpdateError::InvalidSlotOrder {
            signature_slot: update.signature_slot,
            attested_slot: attested.beacon.slot,
            finalized_slot,
        });
    }

    if update.signature_slot > current_slot {
        return Err(UpdateError::FutureSignature {
            signature_slot: update.signature_slot,
            current_slot,
        });
    }

    let store_period = store.current_period();
    let signature_period = compute_sync_period_at_slot(update.signature_slot);
    let attested_period = compute_sync_period_at_slot(attested.beacon.slot);
    let signature_period_ok = if store.next_sync_committee.is_some() {
        signature_period == store_period || signature_period == store_period + 1
    } else {
        signature_period == store_period
    };
    let attested_period_ok = attested_period == store_period || attested_period == store_period + 1;
    if !signature_period_ok || !attested_period_ok {
        return Err(UpdateError::InvalidPeriod {
            store_period,
            attested_period,
            signature_period,
        });
    }

    match update.next_committee() {
        Some(next) => {
            if next.validate().is_err()
                || !verify_gindex_branch(
                    &hash_sync_committee(next),
                    &update.next_sync_committee_branch,
                    attested_fork.next_sync_committee_gindex(),
                    &attested.beacon.state_root,
                )
            {
                return Err(UpdateError::InvalidNextSyncCommitteeBranch);
            }
            if attested_period == store_period {
                if let Some(known) = &store.next_sync_committee {
                    if known != next {
                        return Err(UpdateError::ConflictingNextSyncCommittee);
                    }
                }
            }
        }
        None => {
            if !is_zero_branch(&update.next_sync_committee_branch) {
                return Err(UpdateError::InvalidNextSyncCommitteeBranch);
            }
        }
    }

    match update.finalized() {
        Some(finalized) => {
            // The genesis checkpoint is committed to as the zero root.
            let leaf = if finalized.beacon.slot == GENESIS_SLOT {
                if !finalized.is_empty() {
                    return Err(UpdateError::InvalidHeader {
                        which: "finalized",
                        slot: GENESIS_SLOT,
                    });
                }
                [0u8; 32]
            } else {
                let finalized_fork = config.fork_at_slot(finalized.beacon.slot);
                if !is_valid_light_client_header(finalized, finalized_fork) {
                    return Err(UpdateError::InvalidHeader {
                        which: "finalized",
                        slot: finalized.beacon.slot,
                    });
                }
                hash_beacon_block_header(&finalized.beacon)
            };
            if !verify_gindex_branch(
                &leaf,
                &update.finality_branch,
                attested_fork.finalized_root_gindex(),
                &attested.beacon.state_root,
            ) {
                return Err(UpdateError::InvalidFinalityBranch);
            }
        }
        None => {
            if !is_zero_branch(&update.finality_branch) {
                return Err(UpdateError::InvalidFinalityBranch);
            }
        }
    }

    let participants = aggregate.num_participants();
    if participants < config.min_sync_committee_participants.max(1) {
        return Err(UpdateError::InsufficientParticipants {
            participants,
            required: config.min_sync_committee_participants.max(1),
        });
    }

    let sync_committee = if signature_period == store_period {
        &store.current_sync_committee
    } else {
        store
            .next_sync_committee
            .as_ref()
            .ok_or(UpdateError::InvalidPeriod {
                store_period,
                attested_period,
                signature_period,
            })?
    };

    let domain = compute_domain(
        &DOMAIN_SYNC_COMMITTEE,
        &config.signing_fork_version(update.signature_slot),
        &config.genesis_validators_root,
    );
    let signing_root = compute_signing_root(&attested.beacon, &domain);

    let participant_pubkeys: Vec<&BlsPublicKey> = aggregate
        .participant_indices()
        .into_iter()
        .filter_map(|i| sync_committee.pubkeys.get(i))
        .collect();

    verify_aggregate_bls_signature(
        &participant_pubkeys,
        &signing_root,
        &aggregate.sync_committee_signature,
    )?;

    Ok(VerifiedUpdate {
        update,
        participants,
    })
}

/// Verify an aggregate BLS12-381 signature over `message` by all of `pubkeys`.
fn verify_aggregate_bls_signature(
    pubkeys: &[&BlsPublicKey],
    message: &[u8; 32],
    signature: &BlsSignature,
) -> Result<(), UpdateError> {
    use blst::min_pk::{PublicKey, Signature};
    use blst::BLST_ERROR;

    if pubkeys.is_empty() {
        return Err(UpdateError::InsufficientParticipants {
            participants: 0,
            required: MIN_SYNC_COMMITTEE_PARTICIPANTS,
        });
    }

    let sig = Signature::from_bytes(&signature.0)
        .map_err(|e| UpdateError::BlsError(format!("Failed to deserialize signature: {:?}", e)))?;

    let pks: Vec<PublicKey> = pubkeys
        .iter()
        .enumerate()
        .map(|(i, pk)| {
            PublicKey::from_bytes(&pk.0).map_err(|e| UpdateError::InvalidPublicKey {
                index: i,
                reason: format!("{:?}", e),
            })
        })
        .collect::<Result<Vec<_>, _>>()?;
    let pk_refs: Vec<&PublicKey> = pks.iter().collect();

    // DST (domain separation tag) for Ethereum BLS signatures
    let dst = b"BLS_SIG_BLS12381G2_XMD:SHA-256_SSWU_RO_POP_";

    let result = sig.fast_aggregate_verify(true, message, dst, &pk_refs);
    if result != BLST_ERROR::BLST_SUCCESS {
        return Err(UpdateError::InvalidSignature);
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_utils::TestChain;

    fn store_at(chain: &TestChain, slot: u64) -> LightClientStore {
        let (_, bootstrap) = chain.bootstrap(slot);
        LightClientStore {
            finalized_header: bootstrap.header.clone(),
            current_sync_committee: bootstrap.current_sync_committee,
            next_sync_committee: None,
            optimistic_header: bootstrap.header,
            previous_max_active_participants: 0,
            current_max_active_participants: 0,
        }
    }

    #[test]
    fn test_compute_domain() {
        let domain = compute_domain(&DOMAIN_SYNC_COMMITTEE, &[0x04, 0x00, 0x00, 0x00], &[0xaa; 32]);
        assert_eq!(&domain[..4], &DOMAIN_SYNC_COMMITTEE);
        let other = compute_domain(&DOMAIN_SYNC_COMMITTEE, &[0x05, 0x00, 0x00, 0x00], &[0xaa; 32]);
        assert_ne!(domain, other);
    }

    #[test]
    fn test_valid_finality_update_verifies() {
        let chain = TestChain::new(3, false);
        let store = store_at(&chain, 64);
        let update = chain.update(200, Some(160), false, 400);

        let verified = verify_update(&store, &update, &chain.config, 201).unwrap();
        assert_eq!(verified.participants(), 400);
        assert_eq!(verified.update().signature_slot, 201);
    }

    #[test]
    fn test_electra_update_uses_deeper_gindices() {
        let chain = TestChain::new(2, true);
        let store = store_at(&chain, 64);
        let update = chain.update(300, Some(256), true, 512);
        assert_eq!(update.finality_branch.len(), 7);
        assert_eq!(update.next_sync_committee_branch.len(), 6);
        assert!(verify_update(&store, &update, &chain.config, 400).is_ok());
    }

    #[test]
    fn test_slot_order_checked_before_signature() {
        let chain = TestChain::new(2, false);
        let store = store_at(&chain, 64);
        let mut update = chain.update(200, Some(160), false, 400);
        update.signature_slot = 200;

        assert!(matches!(
            verify_update(&store, &update, &chain.config, 500),
            Err(UpdateError::InvalidSlotOrder { .. })
        ));
    }

    #[test]
    fn test_future_signature_rejected() {
        let chain = TestChain::new(2, false);
        let store = store_at(&chain, 64);
        let update = chain.update(200, Some(160), false, 400);

        assert_eq!(
            verify_update(&store, &update, &chain.config, 150).unwrap_err(),
            UpdateError::FutureSignature {
                signature_slot: 201,
                current_slot: 150
            }
        );
    }

    #[test]
    fn test_next_period_signature_needs_next_committee() {
        let chain = TestChain::new(3, false);
        let store = store_at(&chain, 64);
        let update = chain.update(SLOTS_PER_SYNC_COMMITTEE_PERIOD + 10, None, false, 400);

        assert!(matches!(
            verify_update(&store, &update, &chain.config, u64::MAX),
            Err(UpdateError::InvalidPeriod { store_period: 0, .. })
        ));
    }

    #[test]
    fn test_tampered_finality_branch_rejected() {
        let chain = TestChain::new(2, false);
        let store = store_at(&chain, 64);
        let mut update = chain.update(200, Some(160), false, 400);
        update.finality_branch[2][0] ^= 1;

        assert_eq!(
            verify_update(&store, &update, &chain.config, 201).unwrap_err(),
            UpdateError::InvalidFinalityBranch
        );
    }

    #[test]
    fn test_tampered_next_committee_rejected() {
        let chain = TestChain::new(2, false);
        let store = store_at(&chain, 64);
        let mut update = chain.update(200, Some(160), true, 400);
        if let Some(next) = update.next_sync_committee.as_mut() {
            next.pubkeys.swap(0, 1);
            next.pubkeys[0].0[47] ^= 1;
        }

        assert_eq!(
            verify_update(&store, &update, &chain.config, 201).unwrap_err(),
            UpdateError::InvalidNextSyncCommitteeBranch
        );
    }

    #[test]
    fn test_zero_participants_is_soft() {
        let chain = TestChain::new(2, false);
        let store = store_at(&chain, 64);
        let update = chain.update(200, Some(160), false, 0);

        let err = verify_update(&store, &update, &chain.config, 201).unwrap_err();
        assert!(err.is_soft());
        assert!(matches!(
            err,
            UpdateError::InsufficientParticipants {
                participants: 0,
                required: 1
            }
        ));
    }

    #[test]
    fn test_wrong_signer_rejected() {
        let chain = TestChain::new(2, false);
        let store = store_at(&chain, 64);
        let mut update = chain.update(200, Some(160), false, 400);
        // Signature made by the next period's committee over the same header.
        let forged = chain.update_signed_by(1, 200, Some(160), 400);
        update.sync_aggregate.sync_committee_signature = forged.sync_aggregate.sync_committee_signature;

        assert_eq!(
            verify_update(&store, &update, &chain.config, 201).unwrap_err(),
            UpdateError::InvalidSignature
        );
    }

    #[test]
    fn test_tampered_execution_header_rejected() {
        let chain = TestChain::new(2, false);
        let store = store_at(&chain, 64);
        let mut update = chain.update(200, Some(160), false, 400);
        if let Some(execution) = update.attested_header.execution.as_mut() {
            execution.state_root[0] ^= 1;
        }

        assert!(matches!(
            verify_update(&store, &update, &chain.config, 201),
            Err(UpdateError::InvalidHeader { which: "attested", .. })
        ));
    }

    #[test]
    fn test_full_update_without_finality_verifies() {
        let chain = TestChain::new(2, false);
        let store = store_at(&chain, 64);
        // Served the way `light_client/updates` does: every field present,
        // absent parts zeroed.
        let mut update = chain.update(200, None, false, 400);
        update.finalized_header = Some(LightClientHeader::default());
        update.next_sync_committee = Some(chain.committee(1).committee.clone());
        assert_eq!(update.finality_branch.len(), 6);

        let verified = verify_update(&store, &update, &chain.config, 201).unwrap();
        assert_eq!(verified.participants(), 400);
        assert!(!update.is_finality_update());
        assert!(!update.is_sync_committee_update());
    }

    #[test]
    fn test_genesis_finalized_header_must_be_empty() {
        let chain = TestChain::new(2, false);
        let store = store_at(&chain, 64);
        let mut update = chain.update(200, Some(160), false, 400);
        let mut genesis = LightClientHeader::default();
        genesis.beacon.proposer_index = 7;
        update.finalized_header = Some(genesis);

        assert_eq!(
            verify_update(&store, &update, &chain.config, 201).unwrap_err(),
            UpdateError::InvalidHeader {
                which: "finalized",
                slot: GENESIS_SLOT
            }
        );

        // An empty genesis header gets as far as the branch check.
        update.finalized_header = Some(LightClientHeader::default());
        assert_eq!(
            verify_update(&store, &update, &chain.config, 201).unwrap_err(),
            UpdateError::InvalidFinalityBranch
        );
    }

    #[test]
    fn test_bits_length_checked_first() {
        let chain = TestChain::new(2, false);
        let store = store_at(&chain, 64);
        let mut update = chain.update(200, Some(160), false, 400);
        update.sync_aggregate.sync_committee_bits.pop();

        assert_eq!(
            verify_update(&store, &update, &chain.config, 201).unwrap_err(),
            UpdateError::InvalidSyncCommitteeBitsLength { got: 63 }
        );
    }
}
