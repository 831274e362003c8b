//! Fetch-backed implementations of the core collaborator traits.
//!
//! These only move bytes and reshape JSON. Whatever they return is checked
//! by lantern-core before it reaches the store or a balance.

use std::cell::Cell;
use std::collections::HashMap;

use anyhow::{anyhow, Context, Result};
use async_trait::async_trait;
use lantern_core::api::{BeaconApi, ExecutionRpc, FinalityCheckpoints, Genesis};
use lantern_core::types::beacon::{LightClientBootstrap, LightClientUpdate};
use lantern_core::types::execution::ExecutionProof;
use serde::de::DeserializeOwned;

use crate::beacon_api::{
    spec_to_map, ApiBootstrap, ApiEnvelope, ApiFinalityCheckpoints, ApiGenesis,
    ApiLightClientUpdate, ApiUpdatesResponse, RpcGetProofResponse, RpcResponse,
};
use crate::network;

/// Beacon node light client REST API over `fetch`.
pub struct FetchBeaconApi {
    base_url: String,
}

impl FetchBeaconApi {
    pub fn new(base_url: &str) -> Self {
        Self {
            base_url: base_url.trim_end_matches('/').to_string(),
        }
    }

    async fn get<T: DeserializeOwned>(&self, path: &str) -> Result<T> {
        let url = format!("{}{}", self.base_url, path);
        let body = network::fetch_text(&url).await?;
        serde_json::from_str(&body).with_context(|| format!("decoding {}", path))
    }

    async fn get_update(&self, path: &str) -> Result<LightClientUpdate> {
        let envelope: ApiEnvelope<ApiLightClientUpdate> = self.get(path).await?;
        envelope.data.to_core().map_err(|e| anyhow!("{}: {}", path, e))
    }
}

#[async_trait(?Send)]
impl BeaconApi for FetchBeaconApi {
    async fn get_genesis(&self) -> Result<Genesis> {
        let envelope: ApiEnvelope<ApiGenesis> = self.get("/eth/v1/beacon/genesis").await?;
        envelope.data.to_core().map_err(|e| anyhow!("genesis: {}", e))
    }

    async fn get_spec(&self) -> Result<HashMap<String, String>> {
        let envelope: ApiEnvelope<HashMap<String, serde_json::Value>> =
            self.get("/eth/v1/config/spec").await?;
        Ok(spec_to_map(envelope.data))
    }

    async fn get_finality_checkpoints(&self, state_id: &str) -> Result<FinalityCheckpoints> {
        let path = format!("/eth/v1/beacon/states/{}/finality_checkpoints", state_id);
        let envelope: ApiEnvelope<ApiFinalityCheckpoints> = self.get(&path).await?;
        envelope.data.to_core().map_err(|e| anyhow!("finality checkpoints: {}", e))
    }

    async fn get_bootstrap(&self, block_root: [u8; 32]) -> Result<LightClientBootstrap> {
        let path = format!(
            "/eth/v1/beacon/light_client/bootstrap/0x{}",
            hex::encode(block_root)
        );
        let envelope: ApiEnvelope<ApiBootstrap> = self.get(&path).await?;
        envelope.data.to_core().map_err(|e| anyhow!("bootstrap: {}", e))
    }

    async fn get_updates(&self, period: u64, count: u8) -> Result<Vec<LightClientUpdate>> {
        let path = format!(
            "/eth/v1/beacon/light_client/updates?start_period={}&count={}",
            period, count
        );
        let updates: ApiUpdatesResponse = self.get(&path).await?;
        updates
            .iter()
            .map(|u| u.data.to_core().map_err(|e| anyhow!("update: {}", e)))
            .collect()
    }

    async fn get_finality_update(&self) -> Result<LightClientUpdate> {
        self.get_update("/eth/v1/beacon/light_client/finality_update").await
    }

    async fn get_optimistic_update(&self) -> Result<LightClientUpdate> {
        self.get_update("/eth/v1/beacon/light_client/optimistic_update").await
    }
}

/// Execution node JSON-RPC over `fetch`.
pub struct FetchExecutionRpc {
    url: String,
    next_id: Cell<u64>,
}

impl FetchExecutionRpc {
    pub fn new(url: &str) -> Self {
        Self {
            url: url.to_string(),
            next_id: Cell::new(1),
        }
    }

    async fn call<T: DeserializeOwned>(&self, method: &str, params: serde_json::Value) -> Result<T> {
        let id = self.next_id.get();
        self.next_id.set(id + 1);

        let request = serde_json::json!({
            "jsonrpc": "2.0",
            "id": id,
            "method": method,
            "params": params,
        });
        let body = network::post_json(&self.url, &request.to_string()).await?;
        let response: RpcResponse<T> =
            serde_json::from_str(&body).with_context(|| format!("decoding {} response", method))?;
        response.into_result().map_err(|e| anyhow!("{}: {}", method, e))
    }
}

#[async_trait(?Send)]
impl ExecutionRpc for FetchExecutionRpc {
    async fn get_proof(
        &self,
        address: [u8; 20],
        storage_keys: &[[u8; 32]],
        block_number: u64,
    ) -> Result<ExecutionProof> {
        let keys: Vec<String> = storage_keys
            .iter()
            .map(|k| format!("0x{}", hex::encode(k)))
            .collect();
        let params = serde_json::json!([
            format!("0x{}", hex::encode(address)),
            keys,
            format!("0x{:x}", block_number),
        ]);

        let proof: RpcGetProofResponse = self.call("eth_getProof", params).await?;
        proof.to_core().map_err(|e| anyhow!("eth_getProof: {}", e))
    }
}
