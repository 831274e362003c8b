//! # Lantern WASM
//!
//! WebAssembly bindings for the Lantern Ethereum light client.
//! This crate bridges `lantern-core`'s verification logic and sync state
//! machine to JavaScript via `wasm-bindgen`.
//!
//! ## Architecture
//!
//! - All cryptographic verification happens in Rust/WASM (never in JS)
//! - The beacon node and the execution RPC are reached with `fetch`, through
//!   the collaborator traits lantern-core defines
//! - JS drives the sync loop: call `sync()` on a timer, render the results
//! - Designed to run in a Web Worker or on the main thread

mod beacon_api;
mod network;
mod state;
mod transport;

use std::cell::RefCell;
use std::str::FromStr;

use lantern_core::config::parse_address;
use lantern_core::consensus::checkpoint::trusted_checkpoint_from_node;
use lantern_core::consensus::clock::ClockSnapshot;
use lantern_core::execution::account::fetch_and_verify_account;
use lantern_core::execution::erc20::fetch_token_balances;
use lantern_core::{
    apply_updates, parse_checkpoint_root, verify_account, AccountVerification, ClientConfig, Erc20Token,
    LightClient, LightClientHeader, NetworkName, ProofThrottle, SyncDriver, SyncPlan, TokenBalance,
};
use serde::{Deserialize, Serialize};
use wasm_bindgen::prelude::*;

use crate::state::{SyncProgress, TokenRegistry, VerifiedBalanceCache};
use crate::transport::{FetchBeaconApi, FetchExecutionRpc};

/// Set up panic hook on WASM initialization.
/// This ensures Rust panics are logged to the browser console with full stack traces.
#[wasm_bindgen(start)]
pub fn init() {
    console_error_panic_hook::set_once();
}

/// The main Lantern client: holds the light client and exposes sync and
/// balance verification to JS.
///
/// Network requests run without holding the light client. It is borrowed
/// only to read a plan or apply fetched updates, so `head()` and `status()`
/// keep answering while a `sync()` is in flight.
#[wasm_bindgen]
pub struct LanternClient {
    client: RefCell<LightClient>,
    driver: SyncDriver<FetchBeaconApi>,
    rpc: FetchExecutionRpc,
    throttle: RefCell<ProofThrottle>,
    cache: RefCell<VerifiedBalanceCache>,
    tokens: RefCell<TokenRegistry>,
    progress: RefCell<SyncProgress>,
}

#[wasm_bindgen]
impl LanternClient {
    /// Create a client from a JSON config:
    /// `{ "network": "mainnet", "beacon_api_url"?, "execution_rpc_url"?, "checkpoint"?, ... }`.
    ///
    /// Nothing is fetched until `initialize` is called.
    #[wasm_bindgen(constructor)]
    pub fn new(config_json: &str) -> Result<LanternClient, JsValue> {
        let config = ClientConfig::from_json(config_json)
            .map_err(|e| JsValue::from_str(&format!("Invalid config: {}", e)))?;
        Ok(Self::with_config(config))
    }

    /// Like the constructor, but a `custom` network without a `chain` entry
    /// gets its genesis and fork schedule from the configured beacon node.
    pub async fn connect(config_json: String) -> Result<LanternClient, JsValue> {
        let config = ClientConfig::from_json_with_node(&config_json, FetchBeaconApi::new)
            .await
            .map_err(|e| JsValue::from_str(&format!("Invalid config: {}", e)))?;
        Ok(Self::with_config(config))
    }

    /// Client for a built-in network with its default endpoints.
    pub fn for_network(network: &str) -> Result<LanternClient, JsValue> {
        let network = NetworkName::from_str(network).map_err(|e| JsValue::from_str(&e.to_string()))?;
        let config = ClientConfig::for_network(network).map_err(|e| JsValue::from_str(&e.to_string()))?;
        Ok(Self::with_config(config))
    }

    /// Bootstrap from a trusted checkpoint and start syncing.
    ///
    /// The checkpoint is the ONE moment of trust. It is taken from the
    /// argument, else from the config, else from the beacon node's own
    /// finalized checkpoint (which means trusting that node).
    pub async fn initialize(&self, checkpoint: Option<String>) -> Result<JsValue, JsValue> {
        let configured = self.client_ref()?.config().checkpoint.clone();
        let root = match checkpoint.or(configured) {
            Some(input) => parse_checkpoint_root(&input).map_err(|e| JsValue::from_str(&e.to_string()))?,
            None => {
                log_to_console("[Lantern] No checkpoint given, using the beacon node's finalized checkpoint");
                trusted_checkpoint_from_node(self.driver.api())
                    .await
                    .map_err(|e| JsValue::from_str(&e.to_string()))?
                    .root
            }
        };

        log_to_console(&format!("[Lantern] Bootstrapping from checkpoint 0x{}", hex::encode(root)));

        let chain = self.client_ref()?.config().chain.clone();
        let verified = self
            .driver
            .fetch_bootstrap(&chain, root)
            .await
            .map_err(|e| JsValue::from_str(&format!("Bootstrap failed: {}", e)))?;
        {
            let mut client = self.client_mut()?;
            let installed = client.install(verified).and_then(|()| client.start());
            installed.map_err(|e| JsValue::from_str(&format!("Bootstrap failed: {}", e)))?;
        }

        let head = self.head_response()?;
        log_to_console(&format!(
            "[Lantern] Bootstrapped at slot {}, period {}",
            head.as_ref().map(|h| h.slot).unwrap_or_default(),
            self.client_ref()?.current_period().unwrap_or_default()
        ));
        to_js(&head)
    }

    /// One sync step: catch up on missed periods, then apply the latest
    /// finality and optimistic updates. Returns a `SyncStepResult`.
    ///
    /// Invalid updates are counted, not thrown. Transport failures throw.
    pub async fn sync(&self) -> Result<JsValue, JsValue> {
        let sync_failed = |e: lantern_core::SyncError| JsValue::from_str(&format!("Sync failed: {}", e));

        let plan = SyncPlan::for_client(&*self.client_ref()?, now_secs()).map_err(sync_failed)?;
        let updates = self.driver.fetch(&plan).await.map_err(sync_failed)?;
        let report = apply_updates(&mut *self.client_mut()?, &updates, plan.current_slot).map_err(sync_failed)?;

        self.progress.borrow_mut().record_step(&report, plan.current_slot);

        let head = self.head_response()?;
        if let Some(root) = head.as_ref().and_then(|h| h.execution_state_root_bytes()) {
            self.cache.borrow_mut().on_head_change(root);
        }
        if report.rejected > 0 {
            log_to_console(&format!("[Lantern] {} update(s) rejected by verification", report.rejected));
        }

        to_js(&SyncStepResult {
            applied: report.applied,
            skipped: report.skipped,
            rejected: report.rejected,
            finalized_slot: report.finalized_slot,
            head_slot: report.head_slot,
            head,
        })
    }

    /// The current head as a `HeadResponse`, or `null` before bootstrap.
    pub fn head(&self) -> Result<JsValue, JsValue> {
        to_js(&self.head_response()?)
    }

    /// Head lag against the wall clock plus counters, as a `StatusResponse`.
    pub fn status(&self) -> Result<JsValue, JsValue> {
        let client = self.client_ref()?;
        let status = client.status(now_secs());
        let finalized_slot = client.finalized().map(|h| h.beacon.slot);
        to_js(&StatusResponse {
            status,
            finalized_slot,
            is_syncing: client.is_syncing(),
            progress: self.progress.borrow().clone(),
            sync_percentage: self.progress.borrow().sync_percentage(),
        })
    }

    /// Where the chain clock is right now (slot, epoch, period, progress).
    pub fn clock(&self) -> Result<JsValue, JsValue> {
        let client = self.client_ref()?;
        to_js(&ClockSnapshot::at(&client.config().chain, now_secs()))
    }

    /// Call `callback(head)` every time the verified head changes.
    ///
    /// The callback is held until the client is dropped.
    pub fn on_head_change(&self, callback: js_sys::Function) -> Result<(), JsValue> {
        let client = self.client_ref()?;
        let receivers = client.subscribe();
        let mut receiver = if client.config().track_optimistic {
            receivers.optimistic
        } else {
            receivers.finalized
        };

        wasm_bindgen_futures::spawn_local(async move {
            while receiver.changed().await.is_ok() {
                let head = receiver.borrow_and_update().as_ref().map(HeadResponse::from_header);
                let value = match serde_wasm_bindgen::to_value(&head) {
                    Ok(value) => value,
                    Err(e) => {
                        log_to_console(&format!("[Lantern] Head serialization failed: {}", e));
                        continue;
                    }
                };
                if let Err(e) = callback.call1(&JsValue::NULL, &value) {
                    log_to_console(&format!("[Lantern] Head callback threw: {:?}", e));
                }
            }
        });
        Ok(())
    }

    /// Whether balances are worth refreshing now: the head moved to a new
    /// state root, is not lagging, and the minimum interval passed.
    pub fn should_refresh_balances(&self) -> Result<bool, JsValue> {
        let client = self.client_ref()?;
        let Some(head) = client.head() else {
            return Ok(false);
        };
        let Some(state_root) = head.execution_state_root() else {
            return Ok(false);
        };
        let Some(status) = client.status(now_secs()) else {
            return Ok(false);
        };
        Ok(self
            .throttle
            .borrow()
            .should_fetch(now_ms(), &state_root, head.beacon.slot, status.clock_slot))
    }

    /// Fetch `eth_getProof` for `address` at the head's execution block and
    /// verify it against the head's state root. Returns a `BalanceResponse`.
    ///
    /// A proof that fails verification is returned with `verified: false`
    /// and the reason, never with a trusted-looking balance.
    pub async fn verify_balance(&self, address: &str) -> Result<JsValue, JsValue> {
        let address = parse_address(address).map_err(|e| JsValue::from_str(&e.to_string()))?;
        let (state_root, block_number) = self.head_execution()?;

        if let Some(cached) = self.cache.borrow().get_account(&address, &state_root) {
            return to_js(&BalanceResponse::from_verification(cached, block_number));
        }

        let result = fetch_and_verify_account(&self.rpc, state_root, block_number, address)
            .await
            .map_err(|e| JsValue::from_str(&format!("Proof fetch failed: {}", e)))?;

        self.throttle.borrow_mut().record_fetch(now_ms(), state_root);
        self.progress.borrow_mut().record_proof(result.verified);
        if !result.verified {
            log_to_console(&format!(
                "[Lantern] Account proof for 0x{} rejected: {}",
                hex::encode(address),
                result.failure.as_ref().map(|e| e.to_string()).unwrap_or_default()
            ));
        }

        let response = BalanceResponse::from_verification(&result, block_number);
        {
            let mut cache = self.cache.borrow_mut();
            cache.on_head_change(state_root);
            cache.cache_account(result);
        }
        to_js(&response)
    }

    /// Register an ERC-20 token for `token_balances`. `balance_mapping_index`
    /// is the storage position of the contract's `balanceOf` mapping.
    pub fn add_token(&self, symbol: &str, address: &str, balance_mapping_index: u32) -> Result<(), JsValue> {
        let contract_address = parse_address(address).map_err(|e| JsValue::from_str(&e.to_string()))?;
        let added = self.tokens.borrow_mut().add(Erc20Token {
            symbol: symbol.to_string(),
            contract_address,
            balance_mapping_index: u64::from(balance_mapping_index),
        });
        if added {
            self.cache.borrow_mut().clear_tokens();
        }
        Ok(())
    }

    /// Verify `owner`'s balance in every registered token: the network's
    /// defaults plus those added with `add_token`. Returns a list of
    /// `TokenBalanceResponse`.
    pub async fn token_balances(&self, owner: &str) -> Result<JsValue, JsValue> {
        let owner = parse_address(owner).map_err(|e| JsValue::from_str(&e.to_string()))?;
        let (state_root, block_number) = self.head_execution()?;

        if let Some(cached) = self.cache.borrow().get_tokens(&owner, &state_root) {
            let responses: Vec<TokenBalanceResponse> = cached.iter().map(TokenBalanceResponse::from_balance).collect();
            return to_js(&responses);
        }

        let tokens = self.tokens.borrow().tokens().to_vec();
        let balances = fetch_token_balances(&self.rpc, state_root, block_number, owner, &tokens).await;

        {
            let mut progress = self.progress.borrow_mut();
            for balance in &balances {
                progress.record_proof(balance.is_verified());
            }
        }
        let responses: Vec<TokenBalanceResponse> = balances.iter().map(TokenBalanceResponse::from_balance).collect();
        {
            let mut cache = self.cache.borrow_mut();
            cache.on_head_change(state_root);
            cache.cache_tokens(owner, state_root, balances);
        }
        to_js(&responses)
    }

    /// Verify a raw `eth_getProof` result against an explicit state root.
    ///
    /// For callers that captured a head's state root, fetched the proof
    /// themselves, and want it checked against that same root even if the
    /// head moved during the round-trip.
    pub fn verify_account_rpc_proof_with_root(
        &self,
        state_root_hex: &str,
        rpc_proof_json: &str,
    ) -> Result<JsValue, JsValue> {
        let state_root = beacon_api::hex_to_array::<32>(state_root_hex)
            .map_err(|e| JsValue::from_str(&format!("Invalid state root: {}", e)))?;

        let rpc_proof: beacon_api::RpcGetProofResponse = serde_json::from_str(rpc_proof_json)
            .map_err(|e| JsValue::from_str(&format!("Invalid proof JSON: {}", e)))?;
        let proof = rpc_proof
            .to_core()
            .map_err(|e| JsValue::from_str(&format!("Proof conversion: {}", e)))?;

        let result = verify_account(&state_root, &proof);
        self.progress.borrow_mut().record_proof(result.verified);
        to_js(&BalanceResponse::from_verification(&result, 0))
    }
}

// --- Response types ---

#[derive(Serialize, Deserialize)]
struct HeadResponse {
    slot: u64,
    beacon_state_root: String,
    execution_state_root: Option<String>,
    execution_block_number: Option<u64>,
}

impl HeadResponse {
    fn from_header(header: &LightClientHeader) -> Self {
        Self {
            slot: header.beacon.slot,
            beacon_state_root: format!("0x{}", hex::encode(header.beacon.state_root)),
            execution_state_root: header
                .execution_state_root()
                .map(|r| format!("0x{}", hex::encode(r))),
            execution_block_number: header.execution_block_number(),
        }
    }

    fn execution_state_root_bytes(&self) -> Option<[u8; 32]> {
        self.execution_state_root
            .as_deref()
            .and_then(|r| beacon_api::hex_to_array::<32>(r).ok())
    }
}

#[derive(Serialize, Deserialize)]
struct SyncStepResult {
    applied: usize,
    skipped: usize,
    rejected: usize,
    finalized_slot: u64,
    head_slot: u64,
    head: Option<HeadResponse>,
}

#[derive(Serialize)]
struct StatusResponse {
    status: Option<lantern_core::SyncStatus>,
    finalized_slot: Option<u64>,
    is_syncing: bool,
    progress: SyncProgress,
    sync_percentage: f64,
}

#[derive(Serialize, Deserialize)]
struct BalanceResponse {
    address: String,
    /// Wei, decimal.
    balance: String,
    nonce: u64,
    verified: bool,
    account_type: String,
    state_root: String,
    block_number: u64,
    failure: Option<String>,
}

impl BalanceResponse {
    fn from_verification(result: &AccountVerification, block_number: u64) -> Self {
        Self {
            address: format!("0x{}", hex::encode(result.address)),
            balance: result.balance.to_string(),
            nonce: result.nonce,
            verified: result.verified,
            account_type: format!("{:?}", result.account_type).to_lowercase(),
            state_root: format!("0x{}", hex::encode(result.state_root)),
            block_number,
            failure: result.failure.as_ref().map(|e| e.to_string()),
        }
    }
}

#[derive(Serialize, Deserialize)]
struct TokenBalanceResponse {
    symbol: String,
    contract: String,
    /// Smallest token unit, decimal.
    balance: Option<String>,
    verified: bool,
    error: Option<String>,
}

impl TokenBalanceResponse {
    fn from_balance(balance: &TokenBalance) -> Self {
        let (amount, error) = match &balance.outcome {
            Ok(b) => (Some(b.balance.to_string()), b.failure.as_ref().map(|e| e.to_string())),
            Err(e) => (None, Some(e.to_string())),
        };
        Self {
            symbol: balance.token.symbol.clone(),
            contract: format!("0x{}", hex::encode(balance.token.contract_address)),
            balance: amount,
            verified: balance.is_verified(),
            error,
        }
    }
}

// --- Private helpers ---

impl LanternClient {
    fn with_config(config: ClientConfig) -> Self {
        log_to_console(&format!(
            "[Lantern] {} client, beacon API {}",
            config.chain.network, config.beacon_api_url
        ));
        Self {
            driver: SyncDriver::new(FetchBeaconApi::new(&config.beacon_api_url)),
            rpc: FetchExecutionRpc::new(&config.execution_rpc_url),
            throttle: RefCell::new(ProofThrottle::from_config(&config)),
            cache: RefCell::new(VerifiedBalanceCache::new()),
            tokens: RefCell::new(TokenRegistry::for_network(config.chain.network)),
            progress: RefCell::new(SyncProgress::new()),
            client: RefCell::new(LightClient::new(config)),
        }
    }

    fn client_ref(&self) -> Result<std::cell::Ref<'_, LightClient>, JsValue> {
        self.client
            .try_borrow()
            .map_err(|_| JsValue::from_str("Light client is busy applying updates"))
    }

    fn client_mut(&self) -> Result<std::cell::RefMut<'_, LightClient>, JsValue> {
        self.client
            .try_borrow_mut()
            .map_err(|_| JsValue::from_str("Light client is busy, another call is using it"))
    }

    fn head_response(&self) -> Result<Option<HeadResponse>, JsValue> {
        Ok(self.client_ref()?.head().as_ref().map(HeadResponse::from_header))
    }

    /// State root and block number of the verified head's execution payload.
    fn head_execution(&self) -> Result<([u8; 32], u64), JsValue> {
        let head = self
            .client_ref()?
            .head()
            .ok_or_else(|| JsValue::from_str("Not bootstrapped yet, call initialize() first"))?;
        match (head.execution_state_root(), head.execution_block_number()) {
            (Some(root), Some(number)) => Ok((root, number)),
            _ => Err(JsValue::from_str(
                "Head has no execution payload (pre-Capella), balances cannot be verified",
            )),
        }
    }
}

fn to_js<T: Serialize>(value: &T) -> Result<JsValue, JsValue> {
    serde_wasm_bindgen::to_value(value)
        .map_err(|e| JsValue::from_str(&format!("Serialization error: {}", e)))
}

fn now_ms() -> u64 {
    js_sys::Date::now() as u64
}

fn now_secs() -> u64 {
    now_ms() / 1000
}

// --- Console logging ---

fn log_to_console(msg: &str) {
    web_sys::console::log_1(&JsValue::from_str(msg));
}
