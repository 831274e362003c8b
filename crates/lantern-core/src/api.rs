//! Contracts for the network collaborators.
//!
//! The core never performs I/O itself. A beacon node (light client REST API)
//! and an execution node (JSON-RPC) are reached through these traits, and
//! everything they return is treated as untrusted input.

use std::collections::HashMap;

use anyhow::Result;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::types::beacon::{LightClientBootstrap, LightClientUpdate};
use crate::types::execution::ExecutionProof;

/// `GET /eth/v1/beacon/genesis`
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Genesis {
    pub genesis_time: u64,
    #[serde(with = "crate::types::hex_array")]
    pub genesis_validators_root: [u8; 32],
    #[serde(with = "crate::types::hex_array")]
    pub genesis_fork_version: [u8; 4],
}

/// A finality checkpoint: an epoch and the block root at its start.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Checkpoint {
    pub epoch: u64,
    #[serde(with = "crate::types::hex_array")]
    pub root: [u8; 32],
}

/// `GET /eth/v1/beacon/states/{state_id}/finality_checkpoints`
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct FinalityCheckpoints {
    pub previous_justified: Checkpoint,
    pub current_justified: Checkpoint,
    pub finalized: Checkpoint,
}

// implements the light client subset of https://github.com/ethereum/beacon-APIs
// plus the genesis/spec/finality endpoints needed for setup
#[async_trait(?Send)]
pub trait BeaconApi {
    async fn get_genesis(&self) -> Result<Genesis>;
    /// Flat `NAME -> value` map as returned by `/eth/v1/config/spec`.
    async fn get_spec(&self) -> Result<HashMap<String, String>>;
    async fn get_finality_checkpoints(&self, state_id: &str) -> Result<FinalityCheckpoints>;
    async fn get_bootstrap(&self, block_root: [u8; 32]) -> Result<LightClientBootstrap>;
    async fn get_updates(&self, period: u64, count: u8) -> Result<Vec<LightClientUpdate>>;
    async fn get_finality_update(&self) -> Result<LightClientUpdate>;
    async fn get_optimistic_update(&self) -> Result<LightClientUpdate>;
}

/// Execution layer JSON-RPC, only what proof verification needs.
#[async_trait(?Send)]
pub trait ExecutionRpc {
    /// `eth_getProof(address, keys, block)` at the given block number.
    async fn get_proof(
        &self,
        address: [u8; 20],
        storage_keys: &[[u8; 32]],
        block_number: u64,
    ) -> Result<ExecutionProof>;
}
