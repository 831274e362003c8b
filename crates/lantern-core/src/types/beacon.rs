use alloy_primitives::U256;
use bitvec::prelude::*;
use serde::{Deserialize, Serialize};

/// Number of validators in the Ethereum beacon chain sync committee.
pub const SYNC_COMMITTEE_SIZE: usize = 512;

/// Number of bytes in a BLS12-381 public key (compressed).
pub const BLS_PUBKEY_LEN: usize = 48;

/// Number of bytes in a BLS12-381 signature (compressed).
pub const BLS_SIGNATURE_LEN: usize = 96;

/// Slots per epoch.
pub const SLOTS_PER_EPOCH: u64 = 32;

/// Epochs per sync committee period.
pub const EPOCHS_PER_SYNC_COMMITTEE_PERIOD: u64 = 256;

/// Slots per sync committee period (256 epochs * 32 slots/epoch = 8192).
pub const SLOTS_PER_SYNC_COMMITTEE_PERIOD: u64 = SLOTS_PER_EPOCH * EPOCHS_PER_SYNC_COMMITTEE_PERIOD;

/// Slots between two rollovers of the participation window.
pub const UPDATE_TIMEOUT: u64 = SLOTS_PER_SYNC_COMMITTEE_PERIOD;

/// Domain type for sync committee signatures.
pub const DOMAIN_SYNC_COMMITTEE: [u8; 4] = [0x07, 0x00, 0x00, 0x00];

/// Protocol floor for sync committee participation. Updates below it are
/// ignored rather than treated as invalid.
pub const MIN_SYNC_COMMITTEE_PARTICIPANTS: usize = 1;

pub const GENESIS_SLOT: u64 = 0;

/// Epoch value used by beacon nodes for forks that are not scheduled.
pub const FAR_FUTURE_EPOCH: u64 = u64::MAX;

/// Size of the sync committee participation bitvector in bytes.
pub const SYNC_COMMITTEE_BITS_LEN: usize = SYNC_COMMITTEE_SIZE / 8;

/// A BLS12-381 public key (48 bytes, compressed G1 point).
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct BlsPublicKey(pub [u8; BLS_PUBKEY_LEN]);

impl Serialize for BlsPublicKey {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&format!("0x{}", hex::encode(self.0)))
    }
}

impl<'de> Deserialize<'de> for BlsPublicKey {
    fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        let s = s.strip_prefix("0x").unwrap_or(&s);
        let bytes = hex::decode(s).map_err(serde::de::Error::custom)?;
        Self::from_bytes(&bytes).map_err(serde::de::Error::custom)
    }
}

impl BlsPublicKey {
    pub fn from_bytes(bytes: &[u8]) -> Result<Self, &'static str> {
        if bytes.len() != BLS_PUBKEY_LEN {
            return Err("Invalid BLS public key length");
        }
        let mut arr = [0u8; BLS_PUBKEY_LEN];
        arr.copy_from_slice(bytes);
        Ok(Self(arr))
    }
}

/// A BLS12-381 signature (96 bytes, compressed G2 point).
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct BlsSignature(pub [u8; BLS_SIGNATURE_LEN]);

impl Serialize for BlsSignature {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&format!("0x{}", hex::encode(self.0)))
    }
}

impl<'de> Deserialize<'de> for BlsSignature {
    fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        let s = s.strip_prefix("0x").unwrap_or(&s);
        let bytes = hex::decode(s).map_err(serde::de::Error::custom)?;
        Self::from_bytes(&bytes).map_err(serde::de::Error::custom)
    }
}

impl BlsSignature {
    pub fn from_bytes(bytes: &[u8]) -> Result<Self, &'static str> {
        if bytes.len() != BLS_SIGNATURE_LEN {
            return Err("Invalid BLS signature length");
        }
        let mut arr = [0u8; BLS_SIGNATURE_LEN];
        arr.copy_from_slice(bytes);
        Ok(Self(arr))
    }
}

/// A beacon chain block header.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct BeaconBlockHeader {
    pub slot: u64,
    pub proposer_index: u64,
    pub parent_root: [u8; 32],
    /// Root of the beacon state after this block. Sync committee and
    /// finality branches are checked against it.
    pub state_root: [u8; 32],
    /// Root of the block body. The execution branch is checked against it.
    pub body_root: [u8; 32],
}

/// The sync committee: 512 validators that sign off on the chain head.
/// Rotates every sync committee period (~27 hours).
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct SyncCommittee {
    pub pubkeys: Vec<BlsPublicKey>,
    pub aggregate_pubkey: BlsPublicKey,
}

impl SyncCommittee {
    /// Validate the sync committee has the correct number of members.
    pub fn validate(&self) -> Result<(), &'static str> {
        if self.pubkeys.len() != SYNC_COMMITTEE_SIZE {
            return Err("Sync committee must have exactly 512 members");
        }
        Ok(())
    }
}

/// The aggregate BLS signature from the sync committee together with the
/// participation bitvector (bit `i` set means member `i` signed).
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct SyncAggregate {
    pub sync_committee_bits: Vec<u8>,
    pub sync_committee_signature: BlsSignature,
}

impl SyncAggregate {
    fn bits(&self) -> &BitSlice<u8, Lsb0> {
        let len = self.sync_committee_bits.len().min(SYNC_COMMITTEE_BITS_LEN);
        self.sync_committee_bits[..len].view_bits::<Lsb0>()
    }

    /// Count how many sync committee members participated (set bits).
    pub fn num_participants(&self) -> usize {
        self.bits().count_ones()
    }

    /// Get the indices of all participating committee members.
    pub fn participant_indices(&self) -> Vec<usize> {
        self.bits().iter_ones().collect()
    }
}

/// Execution payload header, the link between the beacon and execution
/// layers. Capella fields are always present; the blob gas fields exist from
/// Deneb onward.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExecutionPayloadHeader {
    pub parent_hash: [u8; 32],
    pub fee_recipient: [u8; 20],
    /// Root of the execution state trie. Account proofs are checked against it.
    pub state_root: [u8; 32],
    pub receipts_root: [u8; 32],
    #[serde(with = "super::hex_array")]
    pub logs_bloom: [u8; 256],
    pub prev_randao: [u8; 32],
    pub block_number: u64,
    pub gas_limit: u64,
    pub gas_used: u64,
    pub timestamp: u64,
    pub extra_data: Vec<u8>,
    pub base_fee_per_gas: U256,
    pub block_hash: [u8; 32],
    pub transactions_root: [u8; 32],
    pub withdrawals_root: [u8; 32],
    #[serde(default)]
    pub blob_gas_used: Option<u64>,
    #[serde(default)]
    pub excess_blob_gas: Option<u64>,
}

impl ExecutionPayloadHeader {
    /// Every field zero, as in the empty header of the genesis checkpoint.
    pub fn is_empty(&self) -> bool {
        self.parent_hash == [0u8; 32]
            && self.fee_recipient == [0u8; 20]
            && self.state_root == [0u8; 32]
            && self.receipts_root == [0u8; 32]
            && self.logs_bloom.iter().all(|b| *b == 0)
            && self.prev_randao == [0u8; 32]
            && self.block_number == 0
            && self.gas_limit == 0
            && self.gas_used == 0
            && self.timestamp == 0
            && self.extra_data.is_empty()
            && self.base_fee_per_gas.is_zero()
            && self.block_hash == [0u8; 32]
            && self.transactions_root == [0u8; 32]
            && self.withdrawals_root == [0u8; 32]
            && self.blob_gas_used.unwrap_or(0) == 0
            && self.excess_blob_gas.unwrap_or(0) == 0
    }
}

/// A beacon header as carried by light client messages.
///
/// One type serves every fork: before Capella `execution` is `None` and the
/// branch is empty, from Capella on the execution header is proven against
/// `beacon.body_root` by `execution_branch`.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct LightClientHeader {
    pub beacon: BeaconBlockHeader,
    #[serde(default)]
    pub execution: Option<ExecutionPayloadHeader>,
    #[serde(default)]
    pub execution_branch: Vec<[u8; 32]>,
}

impl LightClientHeader {
    pub fn slot(&self) -> u64 {
        self.beacon.slot
    }

    /// Execution state root carried by this header, if any.
    pub fn execution_state_root(&self) -> Option<[u8; 32]> {
        self.execution.as_ref().map(|e| e.state_root)
    }

    pub fn execution_block_number(&self) -> Option<u64> {
        self.execution.as_ref().map(|e| e.block_number)
    }

    /// Whether this is the default header, whatever fork it is encoded for.
    pub fn is_empty(&self) -> bool {
        self.beacon == BeaconBlockHeader::default()
            && is_zero_branch(&self.execution_branch)
            && self.execution.as_ref().map_or(true, ExecutionPayloadHeader::is_empty)
    }
}

/// An all-zero (or empty) Merkle branch. Light client messages use it to
/// mark a part that is not there.
pub fn is_zero_branch(branch: &[[u8; 32]]) -> bool {
    branch.iter().all(|node| *node == [0u8; 32])
}

/// A light client bootstrap: the trusted header and the sync committee
/// needed to start following the chain from it.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct LightClientBootstrap {
    pub header: LightClientHeader,
    pub current_sync_committee: SyncCommittee,
    /// Merkle branch proving current_sync_committee against the beacon state.
    pub current_sync_committee_branch: Vec<[u8; 32]>,
}

/// A light client update. Finality and optimistic updates use the same type
/// with the optional parts absent.
///
/// Beacon nodes serve full updates with every field filled in; a part that
/// is not carried has an all-zero branch. Read the parts through
/// [`LightClientUpdate::finalized`] and [`LightClientUpdate::next_committee`].
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct LightClientUpdate {
    /// The header that the sync committee is attesting to.
    pub attested_header: LightClientHeader,
    /// Present only on sync committee updates.
    #[serde(default)]
    pub next_sync_committee: Option<SyncCommittee>,
    #[serde(default)]
    pub next_sync_committee_branch: Vec<[u8; 32]>,
    /// Present only on finality updates.
    #[serde(default)]
    pub finalized_header: Option<LightClientHeader>,
    #[serde(default)]
    pub finality_branch: Vec<[u8; 32]>,
    pub sync_aggregate: SyncAggregate,
    /// The slot at which the signature was produced.
    pub signature_slot: u64,
}

impl LightClientUpdate {
    /// The finalized header, unless the finality branch marks it absent.
    pub fn finalized(&self) -> Option<&LightClientHeader> {
        self.finalized_header
            .as_ref()
            .filter(|_| !is_zero_branch(&self.finality_branch))
    }

    /// The next sync committee, unless its branch marks it absent.
    pub fn next_committee(&self) -> Option<&SyncCommittee> {
        self.next_sync_committee
            .as_ref()
            .filter(|_| !is_zero_branch(&self.next_sync_committee_branch))
    }

    pub fn is_sync_committee_update(&self) -> bool {
        self.next_committee().is_some()
    }

    pub fn is_finality_update(&self) -> bool {
        self.finalized().is_some()
    }

    /// Finalized slot referenced by the update, or the genesis slot when the
    /// update carries no finality proof.
    pub fn finalized_slot(&self) -> u64 {
        self.finalized().map(|h| h.beacon.slot).unwrap_or(GENESIS_SLOT)
    }

    /// Drop the parts whose branch marks them absent.
    pub fn without_empty_parts(mut self) -> Self {
        if is_zero_branch(&self.finality_branch) {
            self.finalized_header = None;
        }
        if is_zero_branch(&self.next_sync_committee_branch) {
            self.next_sync_committee = None;
        }
        self
    }
}

/// The verified state of the light client.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct LightClientStore {
    /// The latest finalized header we have verified.
    pub finalized_header: LightClientHeader,
    /// Used to verify signatures in the store period.
    pub current_sync_committee: SyncCommittee,
    /// Committee of the period after the store period, once proven.
    pub next_sync_committee: Option<SyncCommittee>,
    /// Most recent header signed by enough of the committee.
    pub optimistic_header: LightClientHeader,
    pub previous_max_active_participants: u64,
    pub current_max_active_participants: u64,
}

impl LightClientStore {
    /// Sync committee period of the finalized header.
    pub fn current_period(&self) -> u64 {
        self.finalized_header.beacon.slot / SLOTS_PER_SYNC_COMMITTEE_PERIOD
    }

    /// Participation an update needs to move the optimistic header.
    pub fn safety_threshold(&self) -> u64 {
        self.previous_max_active_participants
            .max(self.current_max_active_participants)
            / 2
    }
}
