//! Fixtures shared by the unit tests: a synthetic chain whose updates are
//! really signed, a Merkle-Patricia trie builder, and in-memory collaborators.

use std::cell::RefCell;
use std::collections::{BTreeMap, HashMap};

use alloy_primitives::U256;
use alloy_rlp::{Encodable, Header, EMPTY_STRING_CODE};
use anyhow::{anyhow, Result};
use async_trait::async_trait;
use blst::min_pk::{AggregatePublicKey, AggregateSignature, PublicKey, SecretKey, Signature};

use crate::api::{BeaconApi, Checkpoint, ExecutionRpc, FinalityCheckpoints, Genesis};
use crate::config::{ChainConfig, ClientConfig, ForkSchedule, ForkVersion, NetworkName};
use crate::consensus::clock::compute_sync_period_at_slot;
use crate::consensus::sync_committee::{compute_domain, compute_signing_root};
use crate::execution::proof::keccak256;
use crate::ssz::{
    compute_root_from_branch, hash_beacon_block_header, hash_execution_payload_header,
    hash_sync_committee, sha256_hash, sha256_pair, uint64_to_leaf,
};
use crate::types::beacon::*;
use crate::types::execution::*;
use crate::types::fork::Fork;

const DST: &[u8] = b"BLS_SIG_BLS12381G2_XMD:SHA-256_SSWU_RO_POP_";
const DISTINCT_KEYS: usize = 4;

/// A sync committee of 512 seats filled by a handful of real keys.
pub struct TestCommittee {
    keys: Vec<SecretKey>,
    pub committee: SyncCommittee,
}

impl TestCommittee {
    pub fn new(seed: u8) -> Self {
        let keys: Vec<SecretKey> = (0..DISTINCT_KEYS)
            .map(|i| {
                let ikm = [seed.wrapping_mul(16).wrapping_add(i as u8 + 1); 32];
                SecretKey::key_gen(&ikm, &[]).expect("key generation")
            })
            .collect();
        let public: Vec<PublicKey> = keys.iter().map(|k| k.sk_to_pk()).collect();
        let seats: Vec<&PublicKey> = (0..SYNC_COMMITTEE_SIZE)
            .map(|i| &public[i % DISTINCT_KEYS])
            .collect();
        let aggregate = AggregatePublicKey::aggregate(&seats, false)
            .expect("aggregate pubkeys")
            .to_public_key();

        Self {
            keys,
            committee: SyncCommittee {
                pubkeys: seats.iter().map(|pk| BlsPublicKey(pk.compress())).collect(),
                aggregate_pubkey: BlsPublicKey(aggregate.compress()),
            },
        }
    }

    /// Aggregate signature of seats `0..participants` over `message`.
    pub fn sign(&self, message: &[u8; 32], participants: usize) -> BlsSignature {
        if participants == 0 {
            // Compressed point at infinity
            let mut infinity = [0u8; BLS_SIGNATURE_LEN];
            infinity[0] = 0xc0;
            return BlsSignature(infinity);
        }
        let signatures: Vec<Signature> = self.keys.iter().map(|k| k.sign(message, DST, &[])).collect();
        let seats: Vec<&Signature> = (0..participants)
            .map(|i| &signatures[i % DISTINCT_KEYS])
            .collect();
        let aggregate = AggregateSignature::aggregate(&seats, false).expect("aggregate signatures");
        BlsSignature(aggregate.to_signature().compress())
    }
}

/// Forks through Deneb active from genesis, Electra optional.
pub fn test_chain_config(electra: bool) -> ChainConfig {
    let fork = |version: u8, epoch: u64| ForkVersion {
        version: [version, 0x00, 0x00, 0x42],
        epoch,
    };
    ChainConfig {
        network: NetworkName::Custom,
        genesis_time: 1_600_000_000,
        genesis_validators_root: [0x42; 32],
        seconds_per_slot: 12,
        min_sync_committee_participants: MIN_SYNC_COMMITTEE_PARTICIPANTS,
        forks: ForkSchedule {
            genesis: fork(0, 0),
            altair: fork(1, 0),
            bellatrix: fork(2, 0),
            capella: fork(3, 0),
            deneb: fork(4, 0),
            electra: fork(5, if electra { 0 } else { FAR_FUTURE_EPOCH }),
        },
    }
}

struct StateProofs {
    state_root: [u8; 32],
    current_committee_branch: Vec<[u8; 32]>,
    next_committee_branch: Vec<[u8; 32]>,
    finality_branch: Vec<[u8; 32]>,
}

/// A beacon state tree that commits to the sync committees and the finalized
/// checkpoint at the fork's generalized indices. Other fields are filler.
fn build_state(fork: Fork, current: &SyncCommittee, next: &SyncCommittee, finalized_root: [u8; 32]) -> StateProofs {
    let depth = fork.current_sync_committee_gindex().depth();
    let mut leaves: Vec<[u8; 32]> = (0..1u64 << depth)
        .map(|i| sha256_hash(&i.to_le_bytes()))
        .collect();

    let epoch_leaf = uint64_to_leaf(42);
    let finalized_index = (fork.finalized_root_gindex().subtree_index() >> 1) as usize;
    let current_index = fork.current_sync_committee_gindex().subtree_index() as usize;
    let next_index = fork.next_sync_committee_gindex().subtree_index() as usize;
    leaves[finalized_index] = sha256_pair(&epoch_leaf, &finalized_root);
    leaves[current_index] = hash_sync_committee(current);
    leaves[next_index] = hash_sync_committee(next);

    let layers = merkle_layers(leaves);
    let mut finality_branch = vec![epoch_leaf];
    finality_branch.extend(branch_at(&layers, finalized_index));

    StateProofs {
        state_root: layers[layers.len() - 1][0],
        current_committee_branch: branch_at(&layers, current_index),
        next_committee_branch: branch_at(&layers, next_index),
        finality_branch,
    }
}

fn merkle_layers(leaves: Vec<[u8; 32]>) -> Vec<Vec<[u8; 32]>> {
    let mut layers = vec![leaves];
    while layers[layers.len() - 1].len() > 1 {
        let next = layers[layers.len() - 1]
            .chunks(2)
            .map(|pair| sha256_pair(&pair[0], &pair[1]))
            .collect();
        layers.push(next);
    }
    layers
}

fn branch_at(layers: &[Vec<[u8; 32]>], mut index: usize) -> Vec<[u8; 32]> {
    let mut branch = Vec::new();
    for layer in &layers[..layers.len() - 1] {
        branch.push(layer[index ^ 1]);
        index /= 2;
    }
    branch
}

/// A chain with one committee per period, able to produce bootstraps and
/// signed updates for any slot.
pub struct TestChain {
    pub config: ChainConfig,
    committees: Vec<TestCommittee>,
}

impl TestChain {
    /// Committees for periods `0..=periods`, so updates in the last of the
    /// `periods` periods can still carry a next committee.
    pub fn new(periods: usize, electra: bool) -> Self {
        Self {
            config: test_chain_config(electra),
            committees: (0..=periods).map(|p| TestCommittee::new(p as u8)).collect(),
        }
    }

    pub fn client_config(&self) -> ClientConfig {
        ClientConfig::new(self.config.clone(), "http://beacon.test", "http://execution.test")
    }

    pub fn committee(&self, period: u64) -> &TestCommittee {
        &self.committees[period as usize]
    }

    /// A light client header at `slot` with a proven execution payload.
    pub fn header(&self, slot: u64, state_root: [u8; 32]) -> LightClientHeader {
        let fork = self.config.fork_at_slot(slot);
        let execution = ExecutionPayloadHeader {
            parent_hash: sha256_hash(&slot.wrapping_sub(1).to_le_bytes()),
            fee_recipient: [0x0f; 20],
            state_root: keccak256(&slot.to_be_bytes()),
            receipts_root: [0x22; 32],
            logs_bloom: [0u8; 256],
            prev_randao: [0x33; 32],
            block_number: slot + 1_000,
            gas_limit: 30_000_000,
            gas_used: 12_000_000,
            timestamp: self.config.genesis_time + slot * self.config.seconds_per_slot,
            extra_data: b"lantern".to_vec(),
            base_fee_per_gas: U256::from(7u64),
            block_hash: keccak256(&[b"block".as_slice(), slot.to_be_bytes().as_slice()].concat()),
            transactions_root: [0x44; 32],
            withdrawals_root: [0x55; 32],
            blob_gas_used: fork.has_blob_gas().then_some(0),
            excess_blob_gas: fork.has_blob_gas().then_some(0),
        };
        let execution_branch: Vec<[u8; 32]> = (0u8..4).map(|i| sha256_hash(&[i, 0xbb])).collect();
        let body_root = compute_root_from_branch(
            &hash_execution_payload_header(&execution, fork),
            &execution_branch,
            fork.execution_payload_gindex().subtree_index(),
        );

        LightClientHeader {
            beacon: BeaconBlockHeader {
                slot,
                proposer_index: slot % 1000,
                parent_root: sha256_hash(&slot.wrapping_sub(1).to_be_bytes()),
                state_root,
                body_root,
            },
            execution: Some(execution),
            execution_branch,
        }
    }

    /// A bootstrap at `slot` and the block root it must be requested with.
    pub fn bootstrap(&self, slot: u64) -> ([u8; 32], LightClientBootstrap) {
        let period = compute_sync_period_at_slot(slot);
        let state = build_state(
            self.config.fork_at_slot(slot),
            &self.committee(period).committee,
            &self.committee(period + 1).committee,
            [0x99; 32],
        );
        let header = self.header(slot, state.state_root);
        let root = hash_beacon_block_header(&header.beacon);

        (
            root,
            LightClientBootstrap {
                header,
                current_sync_committee: self.committee(period).committee.clone(),
                current_sync_committee_branch: state.current_committee_branch,
            },
        )
    }

    /// An update attesting `attested_slot`, signed one slot later by the
    /// committee of the signature period with `participants` seats.
    pub fn update(
        &self,
        attested_slot: u64,
        finalized_slot: Option<u64>,
        with_next_committee: bool,
        participants: usize,
    ) -> LightClientUpdate {
        let signer = compute_sync_period_at_slot(attested_slot + 1);
        self.build_update(signer, attested_slot, finalized_slot, with_next_committee, participants)
    }

    /// Like [`TestChain::update`] but signed by an arbitrary period's committee.
    pub fn update_signed_by(
        &self,
        signer_period: u64,
        attested_slot: u64,
        finalized_slot: Option<u64>,
        participants: usize,
    ) -> LightClientUpdate {
        self.build_update(signer_period, attested_slot, finalized_slot, false, participants)
    }

    fn build_update(
        &self,
        signer_period: u64,
        attested_slot: u64,
        finalized_slot: Option<u64>,
        with_next_committee: bool,
        participants: usize,
    ) -> LightClientUpdate {
        let attested_period = compute_sync_period_at_slot(attested_slot);
        let attested_fork = self.config.fork_at_slot(attested_slot);

        let finalized_header = finalized_slot.map(|slot| self.header(slot, sha256_hash(&[0xf1, slot as u8])));
        let finalized_root = finalized_header
            .as_ref()
            .map(|h| hash_beacon_block_header(&h.beacon))
            .unwrap_or([0u8; 32]);

        let next = &self.committee(attested_period + 1).committee;
        let state = build_state(
            attested_fork,
            &self.committee(attested_period).committee,
            next,
            finalized_root,
        );
        let attested_header = self.header(attested_slot, state.state_root);

        let signature_slot = attested_slot + 1;
        let domain = compute_domain(
            &DOMAIN_SYNC_COMMITTEE,
            &self.config.signing_fork_version(signature_slot),
            &self.config.genesis_validators_root,
        );
        let signing_root = compute_signing_root(&attested_header.beacon, &domain);

        let mut bits = vec![0u8; SYNC_COMMITTEE_BITS_LEN];
        for i in 0..participants {
            bits[i / 8] |= 1 << (i % 8);
        }

        let next_sync_committee_branch = if with_next_committee {
            state.next_committee_branch
        } else {
            vec![[0u8; 32]; attested_fork.next_sync_committee_gindex().depth()]
        };
        let finality_branch = if finalized_header.is_some() {
            state.finality_branch
        } else {
            vec![[0u8; 32]; attested_fork.finalized_root_gindex().depth()]
        };

        LightClientUpdate {
            attested_header,
            next_sync_committee: with_next_committee.then(|| next.clone()),
            next_sync_committee_branch,
            finalized_header,
            finality_branch,
            sync_aggregate: SyncAggregate {
                sync_committee_bits: bits,
                sync_committee_signature: self.committee(signer_period).sign(&signing_root, participants),
            },
            signature_slot,
        }
    }
}

/// A Merkle-Patricia trie over 32-byte paths that can produce EIP-1186 style
/// proofs (root first).
#[derive(Clone, Debug, Default)]
pub struct TestTrie {
    entries: BTreeMap<[u8; 32], Vec<u8>>,
}

impl TestTrie {
    /// `value` is the leaf payload, e.g. an RLP encoded account.
    pub fn insert(&mut self, path: [u8; 32], value: Vec<u8>) {
        self.entries.insert(path, value);
    }

    pub fn root(&self) -> [u8; 32] {
        if self.entries.is_empty() {
            return EMPTY_STORAGE_ROOT;
        }
        keccak256(&encode_node(&self.nibble_entries(), None, &mut Vec::new()))
    }

    pub fn proof(&self, path: &[u8; 32]) -> Vec<Vec<u8>> {
        if self.entries.is_empty() {
            return Vec::new();
        }
        let target = to_nibbles(path);
        let mut proof = Vec::new();
        encode_node(&self.nibble_entries(), Some(&target), &mut proof);
        proof.reverse();
        proof
    }

    fn nibble_entries(&self) -> Vec<(Vec<u8>, &[u8])> {
        self.entries
            .iter()
            .map(|(path, value)| (to_nibbles(path), value.as_slice()))
            .collect()
    }
}

fn to_nibbles(bytes: &[u8; 32]) -> Vec<u8> {
    bytes.iter().flat_map(|b| [b >> 4, b & 0x0f]).collect()
}

fn compact_path(nibbles: &[u8], leaf: bool) -> Vec<u8> {
    let flag = if leaf { 2 } else { 0 };
    let mut out = Vec::with_capacity(nibbles.len() / 2 + 1);
    let rest = if nibbles.len() % 2 == 1 {
        out.push(((flag + 1) << 4) | nibbles[0]);
        &nibbles[1..]
    } else {
        out.push(flag << 4);
        nibbles
    };
    for pair in rest.chunks(2) {
        out.push((pair[0] << 4) | pair[1]);
    }
    out
}

fn encode_bytes(bytes: &[u8]) -> Vec<u8> {
    let mut out = Vec::new();
    bytes.encode(&mut out);
    out
}

fn encode_list(items: &[Vec<u8>]) -> Vec<u8> {
    let payload_length = items.iter().map(Vec::len).sum();
    let mut out = Vec::new();
    Header {
        list: true,
        payload_length,
    }
    .encode(&mut out);
    for item in items {
        out.extend_from_slice(item);
    }
    out
}

fn child_reference(node: &[u8]) -> Vec<u8> {
    if node.len() >= 32 {
        encode_bytes(&keccak256(node))
    } else {
        node.to_vec()
    }
}

/// Encode the subtrie holding `entries`, pushing every node on the way to
/// `target` into `proof` (deepest first).
fn encode_node(entries: &[(Vec<u8>, &[u8])], target: Option<&[u8]>, proof: &mut Vec<Vec<u8>>) -> Vec<u8> {
    let node = if entries.len() == 1 {
        let (path, value) = &entries[0];
        encode_list(&[encode_bytes(&compact_path(path, true)), encode_bytes(value)])
    } else {
        let first = &entries[0].0;
        let common = (0..first.len())
            .take_while(|&i| entries.iter().all(|(p, _)| p[i] == first[i]))
            .count();

        if common > 0 {
            let prefix = &first[..common];
            let children: Vec<(Vec<u8>, &[u8])> = entries
                .iter()
                .map(|(p, v)| (p[common..].to_vec(), *v))
                .collect();
            let child_target = target.filter(|t| t.starts_with(prefix)).map(|t| &t[common..]);
            let child = encode_node(&children, child_target, proof);
            encode_list(&[encode_bytes(&compact_path(prefix, false)), child_reference(&child)])
        } else {
            let mut items = Vec::with_capacity(17);
            for nibble in 0..16u8 {
                let group: Vec<(Vec<u8>, &[u8])> = entries
                    .iter()
                    .filter(|(p, _)| p[0] == nibble)
                    .map(|(p, v)| (p[1..].to_vec(), *v))
                    .collect();
                if group.is_empty() {
                    items.push(vec![EMPTY_STRING_CODE]);
                    continue;
                }
                let child_target = target.filter(|t| t.first() == Some(&nibble)).map(|t| &t[1..]);
                items.push(child_reference(&encode_node(&group, child_target, proof)));
            }
            items.push(vec![EMPTY_STRING_CODE]);
            encode_list(&items)
        }
    };

    if target.is_some() {
        proof.push(node.clone());
    }
    node
}

/// Execution state with accounts and contract storage, answering
/// `eth_getProof` like a node would.
#[derive(Clone, Debug, Default)]
pub struct StateFixture {
    accounts: BTreeMap<[u8; 20], TrieAccount>,
    storage: HashMap<[u8; 20], (TestTrie, BTreeMap<[u8; 32], U256>)>,
    trie: TestTrie,
}

impl StateFixture {
    pub fn add_account(&mut self, address: [u8; 20], account: TrieAccount) {
        self.trie.insert(keccak256(&address), alloy_rlp::encode(&account));
        self.accounts.insert(address, account);
    }

    pub fn add_contract(&mut self, address: [u8; 20], code_hash: [u8; 32], slots: &[([u8; 32], U256)]) {
        let mut storage_trie = TestTrie::default();
        let mut values = BTreeMap::new();
        for (slot, value) in slots {
            storage_trie.insert(keccak256(slot), alloy_rlp::encode(*value));
            values.insert(*slot, *value);
        }
        self.add_account(
            address,
            TrieAccount {
                nonce: 1,
                balance: U256::ZERO,
                storage_root: storage_trie.root(),
                code_hash,
            },
        );
        self.storage.insert(address, (storage_trie, values));
    }

    pub fn root(&self) -> [u8; 32] {
        self.trie.root()
    }

    pub fn proof(&self, address: [u8; 20], slots: &[[u8; 32]]) -> ExecutionProof {
        // Missing accounts come back as zeros, as geth reports them.
        let account = self.accounts.get(&address).cloned().unwrap_or(TrieAccount {
            nonce: 0,
            balance: U256::ZERO,
            storage_root: [0u8; 32],
            code_hash: [0u8; 32],
        });

        let storage_proof = slots
            .iter()
            .map(|slot| match self.storage.get(&address) {
                Some((trie, values)) => StorageProof {
                    key: *slot,
                    value: values.get(slot).copied().unwrap_or(U256::ZERO),
                    proof: trie.proof(&keccak256(slot)),
                },
                None => StorageProof {
                    key: *slot,
                    value: U256::ZERO,
                    proof: Vec::new(),
                },
            })
            .collect();

        ExecutionProof {
            address,
            account_proof: self.trie.proof(&keccak256(&address)),
            balance: account.balance,
            nonce: account.nonce,
            code_hash: account.code_hash,
            storage_hash: account.storage_root,
            storage_proof,
        }
    }
}

/// Execution RPC backed by a [`StateFixture`], or failing every request.
pub struct MockRpc {
    state: Option<StateFixture>,
    requested_blocks: RefCell<Vec<u64>>,
}

impl MockRpc {
    pub fn new(state: StateFixture) -> Self {
        Self {
            state: Some(state),
            requested_blocks: RefCell::new(Vec::new()),
        }
    }

    pub fn failing() -> Self {
        Self {
            state: None,
            requested_blocks: RefCell::new(Vec::new()),
        }
    }

    pub fn requested_blocks(&self) -> Vec<u64> {
        self.requested_blocks.borrow().clone()
    }
}

#[async_trait(?Send)]
impl ExecutionRpc for MockRpc {
    async fn get_proof(&self, address: [u8; 20], storage_keys: &[[u8; 32]], block_number: u64) -> Result<ExecutionProof> {
        self.requested_blocks.borrow_mut().push(block_number);
        match &self.state {
            Some(state) => Ok(state.proof(address, storage_keys)),
            None => Err(anyhow!("connection refused")),
        }
    }
}

/// Beacon API serving whatever the test put in. Unset responses fail.
#[derive(Default)]
pub struct MockBeacon {
    genesis: RefCell<Option<Genesis>>,
    spec: RefCell<Option<HashMap<String, String>>>,
    bootstrap: RefCell<Option<LightClientBootstrap>>,
    updates: RefCell<Vec<LightClientUpdate>>,
    finality_update: RefCell<Option<LightClientUpdate>>,
    optimistic_update: RefCell<Option<LightClientUpdate>>,
    finalized_checkpoint: RefCell<Option<Checkpoint>>,
    bootstrap_requests: RefCell<Vec<[u8; 32]>>,
    update_requests: RefCell<Vec<(u64, u8)>>,
}

impl MockBeacon {
    pub fn set_genesis(&self, genesis: Genesis) {
        *self.genesis.borrow_mut() = Some(genesis);
    }

    pub fn set_spec(&self, spec: &[(&str, &str)]) {
        let spec = spec.iter().map(|(k, v)| (k.to_string(), v.to_string())).collect();
        *self.spec.borrow_mut() = Some(spec);
    }

    pub fn set_bootstrap(&self, bootstrap: LightClientBootstrap) {
        *self.bootstrap.borrow_mut() = Some(bootstrap);
    }

    pub fn set_updates(&self, updates: Vec<LightClientUpdate>) {
        *self.updates.borrow_mut() = updates;
    }

    pub fn set_finality_update(&self, update: LightClientUpdate) {
        *self.finality_update.borrow_mut() = Some(update);
    }

    pub fn set_optimistic_update(&self, update: LightClientUpdate) {
        *self.optimistic_update.borrow_mut() = Some(update);
    }

    pub fn set_finalized_checkpoint(&self, checkpoint: Checkpoint) {
        *self.finalized_checkpoint.borrow_mut() = Some(checkpoint);
    }

    pub fn requested_bootstraps(&self) -> Vec<[u8; 32]> {
        self.bootstrap_requests.borrow().clone()
    }

    pub fn requested_update_ranges(&self) -> Vec<(u64, u8)> {
        self.update_requests.borrow().clone()
    }
}

#[async_trait(?Send)]
impl BeaconApi for MockBeacon {
    async fn get_genesis(&self) -> Result<Genesis> {
        self.genesis.borrow().clone().ok_or_else(|| anyhow!("genesis not configured"))
    }

    async fn get_spec(&self) -> Result<HashMap<String, String>> {
        self.spec.borrow().clone().ok_or_else(|| anyhow!("spec not configured"))
    }

    async fn get_finality_checkpoints(&self, _state_id: &str) -> Result<FinalityCheckpoints> {
        let finalized = self
            .finalized_checkpoint
            .borrow()
            .ok_or_else(|| anyhow!("finality checkpoints not configured"))?;
        Ok(FinalityCheckpoints {
            previous_justified: finalized,
            current_justified: finalized,
            finalized,
        })
    }

    async fn get_bootstrap(&self, block_root: [u8; 32]) -> Result<LightClientBootstrap> {
        self.bootstrap_requests.borrow_mut().push(block_root);
        self.bootstrap
            .borrow()
            .clone()
            .ok_or_else(|| anyhow!("no bootstrap for 0x{}", hex::encode(block_root)))
    }

    async fn get_updates(&self, period: u64, count: u8) -> Result<Vec<LightClientUpdate>> {
        self.update_requests.borrow_mut().push((period, count));
        Ok(self.updates.borrow().clone())
    }

    async fn get_finality_update(&self) -> Result<LightClientUpdate> {
        self.finality_update
            .borrow()
            .clone()
            .ok_or_else(|| anyhow!("no finality update"))
    }

    async fn get_optimistic_update(&self) -> Result<LightClientUpdate> {
        self.optimistic_update
            .borrow()
            .clone()
            .ok_or_else(|| anyhow!("no optimistic update"))
    }
}
