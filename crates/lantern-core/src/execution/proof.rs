use alloy_primitives::U256;
use alloy_rlp::{Decodable, Header, EMPTY_STRING_CODE};
use thiserror::Error;
use tiny_keccak::{Hasher, Keccak};

use crate::types::execution::*;

/// Errors during Merkle-Patricia trie proof verification.
/// Each variant is specific enough to diagnose exactly what went wrong.
#[derive(Clone, Debug, PartialEq, Eq, Error)]
pub enum ProofError {
    #[error("Empty proof: no trie nodes provided")]
    EmptyProof,

    #[error("Invalid RLP encoding in proof node {index}: {reason}")]
    InvalidRlp { index: usize, reason: String },

    #[error("Proof verification failed: computed root {computed} does not match expected root {expected}")]
    RootMismatch { computed: String, expected: String },

    #[error("Proof node {index} does not hash to the reference in its parent")]
    ChildHashMismatch { index: usize },

    #[error("Invalid trie node type at depth {depth}: expected branch, extension or leaf, got {node_type}")]
    InvalidNodeType { depth: usize, node_type: String },

    #[error("Proof path incomplete: trie traversal ended at depth {depth} without reaching the key")]
    IncompleteProof { depth: usize },

    #[error("Account not found at address {address}, but the claimed account is not empty")]
    AccountNotFound { address: String },

    #[error("Proven account differs from the claim in {field}")]
    AccountMismatch { field: &'static str },

    #[error("Invalid account RLP encoding: {reason}")]
    InvalidAccountEncoding { reason: String },

    #[error("Invalid value encoding: {reason}")]
    InvalidValueEncoding { reason: String },

    #[error("Storage slot {key} holds a different value than claimed")]
    StorageValueMismatch { key: String },

    #[error("Storage proof is for key {got}, expected {expected}")]
    StorageKeyMismatch { expected: String, got: String },

    #[error("No storage proof returned")]
    MissingStorageProof,

    #[error("Proof is for account {got}, expected {expected}")]
    AddressMismatch { expected: String, got: String },
}

/// Compute keccak256 hash of data.
pub fn keccak256(data: &[u8]) -> [u8; 32] {
    let mut hasher = Keccak::v256();
    let mut output = [0u8; 32];
    hasher.update(data);
    hasher.finalize(&mut output);
    output
}

/// Verify an account proof against a known state root and return the proven
/// account. A valid exclusion proof only counts when the claimed account is
/// empty, because that is how a missing account reads.
///
/// The state root must come from a verified execution payload header.
pub fn verify_account_proof(
    state_root: &[u8; 32],
    proof: &ExecutionProof,
) -> Result<TrieAccount, ProofError> {
    let claimed = proof.claimed_account();
    let key = keccak256(&proof.address);

    match verify_merkle_patricia_proof(state_root, &key, &proof.account_proof)? {
        Some(value) => {
            let proven = TrieAccount::decode(&mut value.as_slice()).map_err(|e| {
                ProofError::InvalidAccountEncoding {
                    reason: e.to_string(),
                }
            })?;
            compare_accounts(&proven, &claimed)?;
            Ok(proven)
        }
        None if claimed.is_empty() && !claimed.has_storage() => Ok(claimed),
        None => Err(ProofError::AccountNotFound {
            address: format!("0x{}", hex::encode(proof.address)),
        }),
    }
}

fn compare_accounts(proven: &TrieAccount, claimed: &TrieAccount) -> Result<(), ProofError> {
    let field = if proven.nonce != claimed.nonce {
        "nonce"
    } else if proven.balance != claimed.balance {
        "balance"
    } else if proven.storage_root != claimed.storage_root {
        "storage hash"
    } else if proven.code_hash != claimed.code_hash {
        "code hash"
    } else {
        return Ok(());
    };
    Err(ProofError::AccountMismatch { field })
}

/// Verify a storage proof for one slot against an account's storage root and
/// return the proven value. An absent slot proves the value zero.
pub fn verify_storage_proof(storage_root: &[u8; 32], proof: &StorageProof) -> Result<U256, ProofError> {
    let key = keccak256(&proof.key);

    let value = match verify_merkle_patricia_proof(storage_root, &key, &proof.proof)? {
        Some(rlp_bytes) => decode_storage_value(&rlp_bytes)?,
        None => U256::ZERO,
    };

    if value != proof.value {
        return Err(ProofError::StorageValueMismatch {
            key: format!("0x{}", hex::encode(proof.key)),
        });
    }
    Ok(value)
}

/// Storage values are stored as RLP of the big-endian value without leading zeros.
fn decode_storage_value(rlp_bytes: &[u8]) -> Result<U256, ProofError> {
    U256::decode(&mut &rlp_bytes[..]).map_err(|e| ProofError::InvalidValueEncoding {
        reason: e.to_string(),
    })
}

/// Where the next node on the path lives.
enum NodeRef {
    Hash([u8; 32]),
    /// Nodes shorter than 32 bytes are embedded in their parent.
    Inline(Vec<u8>),
    Empty,
}

/// Core Merkle-Patricia trie proof verification.
///
/// Walks the trie from the root following `path` (the hashed key). Every
/// node must hash to the reference its parent holds, embedded nodes must be
/// byte-equal.
///
/// Returns `Some(value)` if the key exists, `None` for a proof of non-existence.
pub fn verify_merkle_patricia_proof(
    expected_root: &[u8; 32],
    path: &[u8; 32],
    proof_nodes: &[Vec<u8>],
) -> Result<Option<Vec<u8>>, ProofError> {
    if proof_nodes.is_empty() {
        if *expected_root == EMPTY_STORAGE_ROOT {
            return Ok(None);
        }
        return Err(ProofError::EmptyProof);
    }

    let nibbles = bytes_to_nibbles(path);
    let mut nibble_index = 0usize;
    let mut nodes = proof_nodes.iter().enumerate().peekable();
    let mut next = NodeRef::Hash(*expected_root);
    let mut depth = 0usize;

    loop {
        let inline;
        let (index, node): (usize, &[u8]) = match next {
            NodeRef::Empty => return Ok(None),
            NodeRef::Hash(expected) => {
                let (index, node) = nodes.next().ok_or(ProofError::IncompleteProof { depth })?;
                let computed = keccak256(node);
                if computed != expected {
                    if index == 0 {
                        return Err(ProofError::RootMismatch {
                            computed: hex::encode(computed),
                            expected: hex::encode(expected),
                        });
                    }
                    return Err(ProofError::ChildHashMismatch { index });
                }
                (index, node.as_slice())
            }
            NodeRef::Inline(bytes) => {
                // Some nodes repeat embedded children as separate proof entries.
                if nodes.peek().map(|(_, n)| n.as_slice() == bytes.as_slice()).unwrap_or(false) {
                    nodes.next();
                }
                inline = bytes;
                (depth, inline.as_slice())
            }
        };

        // keccak(rlp("")) is the empty trie.
        if node == &[EMPTY_STRING_CODE][..] {
            return Ok(None);
        }

        let items = split_list(node).map_err(|reason| ProofError::InvalidRlp { index, reason })?;

        match items.len() {
            17 => {
                if nibble_index >= nibbles.len() {
                    let value = item_payload(items[16]).map_err(|reason| ProofError::InvalidRlp { index, reason })?;
                    if value.is_empty() {
                        return Ok(None);
                    }
                    return Ok(Some(value.to_vec()));
                }

                let child = items[nibbles[nibble_index] as usize];
                nibble_index += 1;
                next = child_ref(child).map_err(|reason| ProofError::InvalidRlp { index, reason })?;
            }
            2 => {
                let encoded_path =
                    item_payload(items[0]).map_err(|reason| ProofError::InvalidRlp { index, reason })?;
                let (prefix_nibbles, is_leaf) = decode_compact_path(encoded_path)
                    .map_err(|reason| ProofError::InvalidRlp { index, reason })?;
                let remaining = &nibbles[nibble_index..];

                if is_leaf {
                    if remaining != prefix_nibbles.as_slice() {
                        // Key diverges from the leaf: proof of non-existence
                        return Ok(None);
                    }
                    let value =
                        item_payload(items[1]).map_err(|reason| ProofError::InvalidRlp { index, reason })?;
                    if value.is_empty() {
                        return Ok(None);
                    }
                    return Ok(Some(value.to_vec()));
                }

                if prefix_nibbles.is_empty() || !remaining.starts_with(&prefix_nibbles) {
                    return Ok(None);
                }
                nibble_index += prefix_nibbles.len();
                next = child_ref(items[1]).map_err(|reason| ProofError::InvalidRlp { index, reason })?;
            }
            n => {
                return Err(ProofError::InvalidNodeType {
                    depth,
                    node_type: format!("{}-element list", n),
                });
            }
        }

        depth += 1;
    }
}

fn child_ref(item: &[u8]) -> Result<NodeRef, String> {
    match item.first() {
        Some(prefix) if *prefix >= alloy_rlp::EMPTY_LIST_CODE => Ok(NodeRef::Inline(item.to_vec())),
        _ => {
            let payload = item_payload(item)?;
            match payload.len() {
                0 => Ok(NodeRef::Empty),
                32 => {
                    let mut hash = [0u8; 32];
                    hash.copy_from_slice(payload);
                    Ok(NodeRef::Hash(hash))
                }
                n => Err(format!("child reference of {} bytes", n)),
            }
        }
    }
}

/// Split an RLP list into its raw (still encoded) items.
fn split_list(node: &[u8]) -> Result<Vec<&[u8]>, String> {
    let mut buf = node;
    let header = Header::decode(&mut buf).map_err(|e| e.to_string())?;
    if !header.list {
        return Err("expected list, got string".to_string());
    }
    if header.payload_length > buf.len() {
        return Err("list payload truncated".to_string());
    }

    let mut payload = &buf[..header.payload_length];
    let mut items = Vec::with_capacity(17);
    while !payload.is_empty() {
        let start = payload;
        let item = Header::decode(&mut payload).map_err(|e| e.to_string())?;
        if item.payload_length > payload.len() {
            return Err("item payload truncated".to_string());
        }
        payload = &payload[item.payload_length..];
        items.push(&start[..start.len() - payload.len()]);
    }
    Ok(items)
}

fn item_payload(item: &[u8]) -> Result<&[u8], String> {
    let mut buf = item;
    Header::decode_bytes(&mut buf, false).map_err(|e| e.to_string())
}

/// Convert a 32-byte array to nibbles (4 bits each).
fn bytes_to_nibbles(bytes: &[u8; 32]) -> Vec<u8> {
    let mut nibbles = Vec::with_capacity(64);
    for byte in bytes {
        nibbles.push(byte >> 4);
        nibbles.push(byte & 0x0F);
    }
    nibbles
}

/// Decode compact (hex-prefix) encoding used in trie nodes.
/// Returns (nibbles, is_leaf).
fn decode_compact_path(encoded: &[u8]) -> Result<(Vec<u8>, bool), String> {
    let Some(first) = encoded.first() else {
        return Err("empty compact path".to_string());
    };

    let flag = first >> 4;
    if flag > 3 {
        return Err(format!("invalid compact path flag {}", flag));
    }
    let is_leaf = flag >= 2;
    let is_odd = flag % 2 == 1;

    let mut nibbles = Vec::with_capacity(encoded.len() * 2);
    if is_odd {
        nibbles.push(first & 0x0F);
    }
    for &byte in &encoded[1..] {
        nibbles.push(byte >> 4);
        nibbles.push(byte & 0x0F);
    }

    Ok((nibbles, is_leaf))
}
