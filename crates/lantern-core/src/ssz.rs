//! SSZ `hash_tree_root` for the handful of containers a light client hashes,
//! and Merkle branch checks against generalized indices.
//!
//! Only fixed shapes are needed here, so the merkleization is written out
//! with `sha2` instead of pulling in a full SSZ implementation.

use crate::types::beacon::{BeaconBlockHeader, BlsPublicKey, ExecutionPayloadHeader, SyncCommittee};
use crate::types::fork::Fork;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

/// Maximum length of `extra_data` in an execution payload header.
const MAX_EXTRA_DATA_BYTES: usize = 32;

/// A node position in a binary Merkle tree: the root is 1 and the children of
/// node `i` are `2i` and `2i + 1`.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct GeneralizedIndex(pub u64);

impl GeneralizedIndex {
    /// Distance from the root, i.e. the expected branch length.
    pub fn depth(self) -> usize {
        if self.0 == 0 {
            return 0;
        }
        (63 - self.0.leading_zeros()) as usize
    }

    /// Index of the node among all nodes at its depth.
    pub fn subtree_index(self) -> u64 {
        self.0 - (1u64 << self.depth())
    }
}

/// SHA256 hash of arbitrary data.
pub fn sha256_hash(data: &[u8]) -> [u8; 32] {
    let mut hasher = Sha256::new();
    hasher.update(data);
    hasher.finalize().into()
}

/// SHA256 hash of two 32-byte values concatenated.
pub fn sha256_pair(a: &[u8; 32], b: &[u8; 32]) -> [u8; 32] {
    let mut hasher = Sha256::new();
    hasher.update(a);
    hasher.update(b);
    hasher.finalize().into()
}

/// Encode a u64 as a 32-byte SSZ leaf (little-endian, zero-padded).
pub fn uint64_to_leaf(value: u64) -> [u8; 32] {
    let mut leaf = [0u8; 32];
    leaf[..8].copy_from_slice(&value.to_le_bytes());
    leaf
}

/// Root of an all-zero subtree of the given depth.
fn zero_hash(depth: usize) -> [u8; 32] {
    let mut hash = [0u8; 32];
    for _ in 0..depth {
        hash = sha256_pair(&hash, &hash);
    }
    hash
}

/// Merkleize `chunks` into a tree wide enough for `limit` chunks, padding
/// with zero subtrees.
pub fn merkleize(chunks: &[[u8; 32]], limit: usize) -> [u8; 32] {
    let width = limit.max(chunks.len()).max(1).next_power_of_two();
    let depth = width.trailing_zeros() as usize;
    if chunks.is_empty() {
        return zero_hash(depth);
    }

    let mut layer = chunks.to_vec();
    for level in 0..depth {
        if layer.len() % 2 == 1 {
            layer.push(zero_hash(level));
        }
        layer = layer
            .chunks_exact(2)
            .map(|pair| sha256_pair(&pair[0], &pair[1]))
            .collect();
    }
    layer[0]
}

pub fn mix_in_length(root: &[u8; 32], length: usize) -> [u8; 32] {
    sha256_pair(root, &uint64_to_leaf(length as u64))
}

/// Split bytes into 32-byte chunks, zero-padding the last one.
fn pack_bytes(bytes: &[u8]) -> Vec<[u8; 32]> {
    bytes
        .chunks(32)
        .map(|chunk| {
            let mut out = [0u8; 32];
            out[..chunk.len()].copy_from_slice(chunk);
            out
        })
        .collect()
}

/// hash_tree_root of a BeaconBlockHeader: 5 fields padded to 8 leaves.
pub fn hash_beacon_block_header(header: &BeaconBlockHeader) -> [u8; 32] {
    merkleize(
        &[
            uint64_to_leaf(header.slot),
            uint64_to_leaf(header.proposer_index),
            header.parent_root,
            header.state_root,
            header.body_root,
        ],
        8,
    )
}

/// A 48-byte pubkey packs into two chunks.
fn hash_bls_pubkey(pubkey: &BlsPublicKey) -> [u8; 32] {
    merkleize(&pack_bytes(&pubkey.0), 2)
}

/// hash_tree_root of a SyncCommittee: `Vector[BLSPubkey, 512]` and the
/// aggregate pubkey.
pub fn hash_sync_committee(committee: &SyncCommittee) -> [u8; 32] {
    let leaves: Vec<[u8; 32]> = committee.pubkeys.iter().map(hash_bls_pubkey).collect();
    let pubkeys_root = merkleize(&leaves, crate::types::beacon::SYNC_COMMITTEE_SIZE);
    sha256_pair(&pubkeys_root, &hash_bls_pubkey(&committee.aggregate_pubkey))
}

/// hash_tree_root of an ExecutionPayloadHeader as defined for `fork`.
/// Capella has 15 fields, Deneb and Electra add the two blob gas counters.
pub fn hash_execution_payload_header(header: &ExecutionPayloadHeader, fork: Fork) -> [u8; 32] {
    let mut fee_recipient = [0u8; 32];
    fee_recipient[..20].copy_from_slice(&header.fee_recipient);

    let extra_data_root = mix_in_length(
        &merkleize(&pack_bytes(&header.extra_data), MAX_EXTRA_DATA_BYTES / 32),
        header.extra_data.len(),
    );

    let mut leaves = vec![
        header.parent_hash,
        fee_recipient,
        header.state_root,
        header.receipts_root,
        merkleize(&pack_bytes(&header.logs_bloom), 8),
        header.prev_randao,
        uint64_to_leaf(header.block_number),
        uint64_to_leaf(header.gas_limit),
        uint64_to_leaf(header.gas_used),
        uint64_to_leaf(header.timestamp),
        extra_data_root,
        header.base_fee_per_gas.to_le_bytes::<32>(),
        header.block_hash,
        header.transactions_root,
        header.withdrawals_root,
    ];

    if fork.has_blob_gas() {
        leaves.push(uint64_to_leaf(header.blob_gas_used.unwrap_or_default()));
        leaves.push(uint64_to_leaf(header.excess_blob_gas.unwrap_or_default()));
    }

    merkleize(&leaves, leaves.len())
}

/// Fold a leaf up its branch. Bit `i` of `index` says whether the node at
/// level `i` is a right child.
pub fn compute_root_from_branch(leaf: &[u8; 32], branch: &[[u8; 32]], index: u64) -> [u8; 32] {
    let mut current = *leaf;
    for (i, node) in branch.iter().enumerate() {
        if (index >> i) & 1 == 1 {
            current = sha256_pair(node, &current);
        } else {
            current = sha256_pair(&current, node);
        }
    }
    current
}

/// Verify a Merkle branch (SSZ proof) against an expected root.
pub fn verify_merkle_branch(
    leaf: &[u8; 32],
    branch: &[[u8; 32]],
    depth: usize,
    index: u64,
    root: &[u8; 32],
) -> bool {
    if branch.len() != depth {
        return false;
    }
    compute_root_from_branch(leaf, branch, index) == *root
}

/// Verify a branch for the node at `gindex`.
pub fn verify_gindex_branch(
    leaf: &[u8; 32],
    branch: &[[u8; 32]],
    gindex: GeneralizedIndex,
    root: &[u8; 32],
) -> bool {
    verify_merkle_branch(leaf, branch, gindex.depth(), gindex.subtree_index(), root)
}
