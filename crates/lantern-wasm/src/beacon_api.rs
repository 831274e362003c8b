//! Beacon API and JSON-RPC format adapters.
//!
//! The beacon chain REST API and the execution JSON-RPC use a different
//! JSON shape than lantern-core's types. This module defines serde types
//! matching the wire formats and converts them.
//!
//! Key differences:
//! - Beacon API uses decimal string numbers ("12345"), core uses u64
//! - JSON-RPC uses hex quantities ("0x1f"), core uses u64 / U256
//! - Both use 0x-prefixed hex strings where core uses byte arrays
//! - Beacon API wraps everything in { data: {...} }, sometimes with a version

use std::collections::HashMap;
use std::str::FromStr;

use alloy_primitives::U256;
use lantern_core::api::{Checkpoint, FinalityCheckpoints, Genesis};
use lantern_core::types::beacon::*;
use lantern_core::types::execution::*;
use lantern_core::types::parse_hex_array;
use serde::Deserialize;

// ---------------------------------------------------------------------------
// Hex and number helpers
// ---------------------------------------------------------------------------

pub fn hex_to_array<const N: usize>(s: &str) -> Result<[u8; N], String> {
    parse_hex_array::<N>(s)
}

pub fn hex_to_bytes(s: &str) -> Result<Vec<u8>, String> {
    let s = s.strip_prefix("0x").unwrap_or(s);
    hex::decode(s).map_err(|e| format!("hex decode: {}", e))
}

fn hex_branch(branch: &[String]) -> Result<Vec<[u8; 32]>, String> {
    branch.iter().map(|s| hex_to_array::<32>(s)).collect()
}

fn parse_u64_string(s: &str) -> Result<u64, String> {
    s.parse::<u64>().map_err(|e| format!("parse u64: {}", e))
}

fn parse_quantity(s: &str) -> Result<u64, String> {
    let digits = s.strip_prefix("0x").ok_or_else(|| format!("quantity {} lacks 0x", s))?;
    u64::from_str_radix(digits, 16).map_err(|e| format!("parse quantity: {}", e))
}

fn parse_u256_quantity(s: &str) -> Result<U256, String> {
    let digits = s.strip_prefix("0x").ok_or_else(|| format!("quantity {} lacks 0x", s))?;
    U256::from_str_radix(digits, 16).map_err(|e| format!("parse quantity: {}", e))
}

/// Storage keys and values may come back without leading zeros ("0x0").
fn left_pad_32(s: &str) -> Result<[u8; 32], String> {
    let digits = s.strip_prefix("0x").unwrap_or(s);
    if digits.len() > 64 {
        return Err(format!("storage key too long: {} hex characters", digits.len()));
    }
    hex_to_array::<32>(&format!("{:0>64}", digits))
}

// ---------------------------------------------------------------------------
// Beacon API: envelopes
// ---------------------------------------------------------------------------

/// `{ data: ... }`, with or without a `version` next to it.
#[derive(Deserialize)]
pub struct ApiEnvelope<T> {
    pub data: T,
}

/// `GET /eth/v1/beacon/light_client/updates` returns a bare list of envelopes.
pub type ApiUpdatesResponse = Vec<ApiEnvelope<ApiLightClientUpdate>>;

// ---------------------------------------------------------------------------
// Beacon API: setup endpoints
// ---------------------------------------------------------------------------

#[derive(Deserialize)]
pub struct ApiGenesis {
    pub genesis_time: String,
    pub genesis_validators_root: String,
    pub genesis_fork_version: String,
}

impl ApiGenesis {
    pub fn to_core(&self) -> Result<Genesis, String> {
        Ok(Genesis {
            genesis_time: parse_u64_string(&self.genesis_time)?,
            genesis_validators_root: hex_to_array(&self.genesis_validators_root)?,
            genesis_fork_version: hex_to_array(&self.genesis_fork_version)?,
        })
    }
}

/// Flatten `/eth/v1/config/spec`. Non-string values are skipped, none of
/// the keys the client reads have them.
pub fn spec_to_map(spec: HashMap<String, serde_json::Value>) -> HashMap<String, String> {
    spec.into_iter()
        .filter_map(|(key, value)| match value {
            serde_json::Value::String(s) => Some((key, s)),
            _ => None,
        })
        .collect()
}

#[derive(Deserialize)]
pub struct ApiCheckpoint {
    pub epoch: String,
    pub root: String,
}

impl ApiCheckpoint {
    pub fn to_core(&self) -> Result<Checkpoint, String> {
        Ok(Checkpoint {
            epoch: parse_u64_string(&self.epoch)?,
            root: hex_to_array(&self.root)?,
        })
    }
}

#[derive(Deserialize)]
pub struct ApiFinalityCheckpoints {
    pub previous_justified: ApiCheckpoint,
    pub current_justified: ApiCheckpoint,
    pub finalized: ApiCheckpoint,
}

impl ApiFinalityCheckpoints {
    pub fn to_core(&self) -> Result<FinalityCheckpoints, String> {
        Ok(FinalityCheckpoints {
            previous_justified: self.previous_justified.to_core()?,
            current_justified: self.current_justified.to_core()?,
            finalized: self.finalized.to_core()?,
        })
    }
}

// ---------------------------------------------------------------------------
// Beacon API: light client objects
// ---------------------------------------------------------------------------

#[derive(Deserialize)]
pub struct ApiBootstrap {
    pub header: ApiLightClientHeader,
    pub current_sync_committee: ApiSyncCommittee,
    pub current_sync_committee_branch: Vec<String>,
}

impl ApiBootstrap {
    pub fn to_core(&self) -> Result<LightClientBootstrap, String> {
        Ok(LightClientBootstrap {
            header: self.header.to_core()?,
            current_sync_committee: self.current_sync_committee.to_core()?,
            current_sync_committee_branch: hex_branch(&self.current_sync_committee_branch)?,
        })
    }
}

/// Full, finality and optimistic updates all fit this shape. Finality and
/// optimistic updates leave out what they do not carry; full updates send
/// every field and zero the branch of a missing part.
#[derive(Deserialize)]
pub struct ApiLightClientUpdate {
    pub attested_header: ApiLightClientHeader,
    #[serde(default)]
    pub next_sync_committee: Option<ApiSyncCommittee>,
    #[serde(default)]
    pub next_sync_committee_branch: Vec<String>,
    #[serde(default)]
    pub finalized_header: Option<ApiLightClientHeader>,
    #[serde(default)]
    pub finality_branch: Vec<String>,
    pub sync_aggregate: ApiSyncAggregate,
    pub signature_slot: String,
}

impl ApiLightClientUpdate {
    pub fn to_core(&self) -> Result<LightClientUpdate, String> {
        Ok(LightClientUpdate {
            attested_header: self.attested_header.to_core()?,
            next_sync_committee: self
                .next_sync_committee
                .as_ref()
                .map(|c| c.to_core())
                .transpose()?,
            next_sync_committee_branch: hex_branch(&self.next_sync_committee_branch)?,
            finalized_header: self
                .finalized_header
                .as_ref()
                .map(|h| h.to_core())
                .transpose()?,
            finality_branch: hex_branch(&self.finality_branch)?,
            sync_aggregate: self.sync_aggregate.to_core()?,
            signature_slot: parse_u64_string(&self.signature_slot)?,
        }
        .without_empty_parts())
    }
}

#[derive(Deserialize)]
pub struct ApiLightClientHeader {
    pub beacon: ApiBeaconBlockHeader,
    #[serde(default)]
    pub execution: Option<ApiExecutionPayloadHeader>,
    #[serde(default)]
    pub execution_branch: Vec<String>,
}

impl ApiLightClientHeader {
    pub fn to_core(&self) -> Result<LightClientHeader, String> {
        Ok(LightClientHeader {
            beacon: self.beacon.to_core()?,
            execution: self.execution.as_ref().map(|e| e.to_core()).transpose()?,
            execution_branch: hex_branch(&self.execution_branch)?,
        })
    }
}

#[derive(Deserialize)]
pub struct ApiBeaconBlockHeader {
    pub slot: String,
    pub proposer_index: String,
    pub parent_root: String,
    pub state_root: String,
    pub body_root: String,
}

impl ApiBeaconBlockHeader {
    pub fn to_core(&self) -> Result<BeaconBlockHeader, String> {
        Ok(BeaconBlockHeader {
            slot: parse_u64_string(&self.slot)?,
            proposer_index: parse_u64_string(&self.proposer_index)?,
            parent_root: hex_to_array(&self.parent_root)?,
            state_root: hex_to_array(&self.state_root)?,
            body_root: hex_to_array(&self.body_root)?,
        })
    }
}

#[derive(Deserialize)]
pub struct ApiExecutionPayloadHeader {
    pub parent_hash: String,
    pub fee_recipient: String,
    pub state_root: String,
    pub receipts_root: String,
    pub logs_bloom: String,
    pub prev_randao: String,
    pub block_number: String,
    pub gas_limit: String,
    pub gas_used: String,
    pub timestamp: String,
    pub extra_data: String,
    pub base_fee_per_gas: String,
    pub block_hash: String,
    pub transactions_root: String,
    pub withdrawals_root: String,
    #[serde(default)]
    pub blob_gas_used: Option<String>,
    #[serde(default)]
    pub excess_blob_gas: Option<String>,
}

impl ApiExecutionPayloadHeader {
    pub fn to_core(&self) -> Result<ExecutionPayloadHeader, String> {
        Ok(ExecutionPayloadHeader {
            parent_hash: hex_to_array(&self.parent_hash)?,
            fee_recipient: hex_to_array(&self.fee_recipient)?,
            state_root: hex_to_array(&self.state_root)?,
            receipts_root: hex_to_array(&self.receipts_root)?,
            logs_bloom: hex_to_array(&self.logs_bloom)?,
            prev_randao: hex_to_array(&self.prev_randao)?,
            block_number: parse_u64_string(&self.block_number)?,
            gas_limit: parse_u64_string(&self.gas_limit)?,
            gas_used: parse_u64_string(&self.gas_used)?,
            timestamp: parse_u64_string(&self.timestamp)?,
            extra_data: hex_to_bytes(&self.extra_data)?,
            base_fee_per_gas: U256::from_str(&self.base_fee_per_gas)
                .map_err(|e| format!("base_fee_per_gas: {}", e))?,
            block_hash: hex_to_array(&self.block_hash)?,
            transactions_root: hex_to_array(&self.transactions_root)?,
            withdrawals_root: hex_to_array(&self.withdrawals_root)?,
            blob_gas_used: self.blob_gas_used.as_deref().map(parse_u64_string).transpose()?,
            excess_blob_gas: self.excess_blob_gas.as_deref().map(parse_u64_string).transpose()?,
        })
    }
}

#[derive(Deserialize)]
pub struct ApiSyncAggregate {
    pub sync_committee_bits: String,
    pub sync_committee_signature: String,
}

impl ApiSyncAggregate {
    pub fn to_core(&self) -> Result<SyncAggregate, String> {
        let bits_bytes = hex_to_bytes(&self.sync_committee_bits)?;

        let sig_bytes = hex_to_bytes(&self.sync_committee_signature)?;
        let signature = BlsSignature::from_bytes(&sig_bytes)
            .map_err(|e| format!("BLS signature: {}", e))?;

        Ok(SyncAggregate {
            sync_committee_bits: bits_bytes,
            sync_committee_signature: signature,
        })
    }
}

#[derive(Deserialize)]
pub struct ApiSyncCommittee {
    pub pubkeys: Vec<String>,
    pub aggregate_pubkey: String,
}

impl ApiSyncCommittee {
    pub fn to_core(&self) -> Result<SyncCommittee, String> {
        let pubkeys: Vec<BlsPublicKey> = self
            .pubkeys
            .iter()
            .enumerate()
            .map(|(i, hex_pk)| {
                let bytes = hex_to_bytes(hex_pk)?;
                BlsPublicKey::from_bytes(&bytes)
                    .map_err(|e| format!("pubkey[{}]: {}", i, e))
            })
            .collect::<Result<_, _>>()?;

        let agg_bytes = hex_to_bytes(&self.aggregate_pubkey)?;
        let aggregate_pubkey = BlsPublicKey::from_bytes(&agg_bytes)
            .map_err(|e| format!("aggregate_pubkey: {}", e))?;

        Ok(SyncCommittee {
            pubkeys,
            aggregate_pubkey,
        })
    }
}

// ---------------------------------------------------------------------------
// Execution RPC: JSON-RPC envelope and eth_getProof
// ---------------------------------------------------------------------------

#[derive(Deserialize)]
pub struct RpcResponse<T> {
    pub result: Option<T>,
    pub error: Option<RpcErrorObject>,
}

#[derive(Debug, Deserialize)]
pub struct RpcErrorObject {
    pub code: i64,
    pub message: String,
}

impl<T> RpcResponse<T> {
    pub fn into_result(self) -> Result<T, String> {
        if let Some(err) = self.error {
            return Err(format!("RPC error {}: {}", err.code, err.message));
        }
        self.result.ok_or_else(|| "RPC result is null".to_string())
    }
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RpcGetProofResponse {
    pub address: String,
    pub account_proof: Vec<String>,
    pub balance: String,
    pub code_hash: String,
    pub nonce: String,
    pub storage_hash: String,
    #[serde(default)]
    pub storage_proof: Vec<RpcStorageProof>,
}

#[derive(Deserialize)]
pub struct RpcStorageProof {
    pub key: String,
    pub value: String,
    pub proof: Vec<String>,
}

impl RpcGetProofResponse {
    /// Decode the hex fields into an [`ExecutionProof`]. Nothing is verified
    /// here; every field is still an RPC claim.
    pub fn to_core(&self) -> Result<ExecutionProof, String> {
        let nodes = |proof: &[String]| -> Result<Vec<Vec<u8>>, String> {
            proof.iter().map(|hex_str| hex_to_bytes(hex_str)).collect()
        };

        let storage_proof = self
            .storage_proof
            .iter()
            .map(|sp| {
                Ok(StorageProof {
                    key: left_pad_32(&sp.key)?,
                    value: parse_u256_quantity(&sp.value)?,
                    proof: nodes(&sp.proof)?,
                })
            })
            .collect::<Result<_, String>>()?;

        Ok(ExecutionProof {
            address: hex_to_array(&self.address)?,
            account_proof: nodes(&self.account_proof)?,
            balance: parse_u256_quantity(&self.balance)?,
            nonce: parse_quantity(&self.nonce)?,
            code_hash: hex_to_array(&self.code_hash)?,
            storage_hash: hex_to_array(&self.storage_hash)?,
            storage_proof,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const ROOT_1: &str = "0x0000000000000000000000000000000000000000000000000000000000000001";
    const ROOT_2: &str = "0x0000000000000000000000000000000000000000000000000000000000000002";
    const ROOT_3: &str = "0x0000000000000000000000000000000000000000000000000000000000000003";

    fn header_json(slot: u64) -> serde_json::Value {
        serde_json::json!({
            "beacon": {
                "slot": slot.to_string(),
                "proposer_index": "42",
                "parent_root": ROOT_1,
                "state_root": ROOT_2,
                "body_root": ROOT_3,
            }
        })
    }

    fn aggregate_json() -> serde_json::Value {
        let mut signature = String::from("0xc0");
        signature.push_str(&"00".repeat(95));
        serde_json::json!({
            "sync_committee_bits": format!("0x{}", "ff".repeat(64)),
            "sync_committee_signature": signature,
        })
    }

    #[test]
    fn test_hex_to_array() {
        let result = hex_to_array::<32>(ROOT_1).unwrap();
        assert_eq!(result[31], 1);
        assert_eq!(result[0], 0);
    }

    #[test]
    fn test_hex_to_array_no_prefix() {
        let hex = "0000000000000000000000000000000000000000000000000000000000000002";
        let result = hex_to_array::<32>(hex).unwrap();
        assert_eq!(result[31], 2);
    }

    #[test]
    fn test_parse_u64_string() {
        assert_eq!(parse_u64_string("12345").unwrap(), 12345);
        assert_eq!(parse_u64_string("0").unwrap(), 0);
        assert!(parse_u64_string("0x10").is_err());
    }

    #[test]
    fn test_parse_quantity() {
        assert_eq!(parse_quantity("0x1f").unwrap(), 31);
        assert_eq!(parse_quantity("0x0").unwrap(), 0);
        assert!(parse_quantity("31").is_err());
        assert_eq!(
            parse_u256_quantity("0xde0b6b3a7640000").unwrap(),
            U256::from(1_000_000_000_000_000_000u64)
        );
    }

    #[test]
    fn test_left_pad_storage_key() {
        assert_eq!(left_pad_32("0x0").unwrap(), [0u8; 32]);
        assert_eq!(left_pad_32("0x02").unwrap()[31], 2);
        assert!(left_pad_32(&format!("0x{}", "1".repeat(65))).is_err());
    }

    #[test]
    fn test_api_beacon_header_conversion() {
        let api_header = ApiBeaconBlockHeader {
            slot: "100".into(),
            proposer_index: "42".into(),
            parent_root: ROOT_1.into(),
            state_root: ROOT_2.into(),
            body_root: ROOT_3.into(),
        };
        let core = api_header.to_core().unwrap();
        assert_eq!(core.slot, 100);
        assert_eq!(core.proposer_index, 42);
        assert_eq!(core.parent_root[31], 1);
    }

    #[test]
    fn test_optimistic_update_has_no_optional_parts() {
        let json = serde_json::json!({
            "version": "deneb",
            "data": {
                "attested_header": header_json(200),
                "sync_aggregate": aggregate_json(),
                "signature_slot": "201",
            }
        });
        let envelope: ApiEnvelope<ApiLightClientUpdate> = serde_json::from_value(json).unwrap();
        let update = envelope.data.to_core().unwrap();

        assert_eq!(update.attested_header.beacon.slot, 200);
        assert_eq!(update.signature_slot, 201);
        assert!(update.finalized_header.is_none());
        assert!(update.next_sync_committee.is_none());
        assert!(update.finality_branch.is_empty());
        assert_eq!(update.sync_aggregate.num_participants(), 512);
    }

    #[test]
    fn test_finality_update_conversion() {
        let json = serde_json::json!({
            "data": {
                "attested_header": header_json(200),
                "finalized_header": header_json(160),
                "finality_branch": [ROOT_1, ROOT_2, ROOT_3],
                "sync_aggregate": aggregate_json(),
                "signature_slot": "201",
            }
        });
        let envelope: ApiEnvelope<ApiLightClientUpdate> = serde_json::from_value(json).unwrap();
        let update = envelope.data.to_core().unwrap();

        assert_eq!(update.finalized_slot(), 160);
        assert_eq!(update.finality_branch.len(), 3);
        assert_eq!(update.finality_branch[2][31], 3);
    }

    #[test]
    fn test_full_update_zero_finality_branch_is_absent() {
        let zero = format!("0x{}", "00".repeat(32));
        let json = serde_json::json!([{
            "version": "deneb",
            "data": {
                "attested_header": header_json(200),
                "finalized_header": header_json(0),
                "finality_branch": vec![zero.clone(); 6],
                "next_sync_committee_branch": vec![zero; 5],
                "sync_aggregate": aggregate_json(),
                "signature_slot": "201",
            }
        }]);
        let updates: ApiUpdatesResponse = serde_json::from_value(json).unwrap();
        let update = updates[0].data.to_core().unwrap();

        assert!(update.finalized_header.is_none());
        assert!(!update.is_finality_update());
        assert!(update.next_sync_committee.is_none());
        assert_eq!(update.finality_branch.len(), 6);
    }

    #[test]
    fn test_bad_signature_length_rejected() {
        let json = serde_json::json!({
            "attested_header": header_json(200),
            "sync_aggregate": {
                "sync_committee_bits": format!("0x{}", "ff".repeat(64)),
                "sync_committee_signature": "0xc0",
            },
            "signature_slot": "201",
        });
        let update: ApiLightClientUpdate = serde_json::from_value(json).unwrap();
        assert!(update.to_core().is_err());
    }

    #[test]
    fn test_genesis_conversion() {
        let json = r#"{"data":{
            "genesis_time":"1606824023",
            "genesis_validators_root":"0x4b363db94e286120d76eb905340fdd4e54bfe9f06bf33ff6cf5ad27f511bfe95",
            "genesis_fork_version":"0x00000000"}}"#;
        let envelope: ApiEnvelope<ApiGenesis> = serde_json::from_str(json).unwrap();
        let genesis = envelope.data.to_core().unwrap();
        assert_eq!(genesis.genesis_time, 1_606_824_023);
        assert_eq!(genesis.genesis_validators_root[0], 0x4b);
    }

    #[test]
    fn test_spec_map_keeps_strings() {
        let json = r#"{"SECONDS_PER_SLOT":"12","DEPOSIT_CONTRACT_ADDRESS":"0x00","BLOB_SCHEDULE":[]}"#;
        let spec: HashMap<String, serde_json::Value> = serde_json::from_str(json).unwrap();
        let map = spec_to_map(spec);
        assert_eq!(map.get("SECONDS_PER_SLOT").map(String::as_str), Some("12"));
        assert!(!map.contains_key("BLOB_SCHEDULE"));
    }

    #[test]
    fn test_get_proof_conversion() {
        let json = serde_json::json!({
            "address": "0x6b175474e89094c44da98b954eedeac495271d0f",
            "accountProof": ["0xc0", "0x80"],
            "balance": "0x0",
            "codeHash": ROOT_3,
            "nonce": "0x1",
            "storageHash": ROOT_2,
            "storageProof": [{"key": "0x2", "value": "0x64", "proof": []}],
        });
        let proof: RpcGetProofResponse = serde_json::from_value(json).unwrap();
        let core = proof.to_core().unwrap();

        assert_eq!(core.address[0], 0x6b);
        assert_eq!(core.account_proof, vec![vec![0xc0], vec![0x80]]);
        assert_eq!(core.nonce, 1);
        assert_eq!(core.storage_proof[0].key[31], 2);
        assert_eq!(core.storage_proof[0].value, U256::from(100u64));
    }

    #[test]
    fn test_rpc_error_envelope() {
        let json = r#"{"jsonrpc":"2.0","id":1,"error":{"code":-32000,"message":"missing trie node"}}"#;
        let resp: RpcResponse<RpcGetProofResponse> = serde_json::from_str(json).unwrap();
        let err = resp.into_result().err().unwrap();
        assert!(err.contains("missing trie node"));
    }
}
