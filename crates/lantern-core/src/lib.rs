//! # Lantern Core
//!
//! Ethereum light client logic with no networking of its own.
//!
//! Everything a beacon node or an execution node says is an untrusted claim
//! until it has been checked here. The crate reaches the network only through
//! the [`api::BeaconApi`] and [`api::ExecutionRpc`] traits, so it runs the
//! same natively, in tests, and inside the browser wrapper.
//!
//! ## Trust Model
//!
//! - **Checkpoint** (`consensus::checkpoint`): the one trusted input. A block
//!   root supplied by the user (or agreed on by several sources) anchors the
//!   bootstrap and its sync committee.
//!
//! - **Sync committee verification** (`consensus::sync_committee`): BLS12-381
//!   aggregate signatures from the 512-member sync committee, plus SSZ
//!   branches for finality and committee handoff. Trusts that 2/3+ of the
//!   committee is honest.
//!
//! - **Execution proof verification** (`execution`): Merkle-Patricia proofs
//!   for accounts and storage against the state root of a verified header.
//!
//! ## Usage
//!
//! ```ignore
//! use lantern_core::{ClientConfig, LightClient, SyncDriver};
//!
//! let mut client = LightClient::new(ClientConfig::for_network(NetworkName::Mainnet)?);
//! let driver = SyncDriver::new(beacon_api);
//! driver.initialize(&mut client, checkpoint_root).await?;
//! driver.sync_once(&mut client, now).await?;
//! ```

pub mod api;
pub mod config;
pub mod consensus;
pub mod execution;
pub mod ssz;
pub mod types;

#[cfg(test)]
mod test_utils;

// Re-export commonly used types for convenience
pub use api::{BeaconApi, Checkpoint, ExecutionRpc};
pub use config::{ChainConfig, ClientConfig, ConfigError, NetworkName};
pub use consensus::{
    checkpoint::{parse_checkpoint_root, verify_bootstrap, verify_checkpoint_consensus, CheckpointError},
    driver::{apply_updates, SyncDriver, SyncPlan, SyncReport},
    light_client::{LightClient, SyncError, SyncState, SyncStatus},
    sync_committee::{verify_update, UpdateError},
};
pub use execution::{
    account::{verify_account, verify_storage, AccountType, AccountVerification, StorageVerification},
    erc20::{erc20_balance_slot, verify_erc20_balance, Erc20Balance, TokenBalance},
    proof::{keccak256, verify_account_proof, verify_storage_proof, ProofError},
    throttle::ProofThrottle,
};
pub use types::{beacon::*, execution::*, fork::Fork};
