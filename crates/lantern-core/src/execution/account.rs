use alloy_primitives::U256;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::api::ExecutionRpc;
use crate::execution::proof::{verify_account_proof, verify_storage_proof, ProofError};
use crate::types::execution::*;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AccountType {
    /// No code: an externally owned account.
    External,
    Contract,
}

impl AccountType {
    pub fn from_code_hash(code_hash: &[u8; 32]) -> Self {
        if *code_hash == EMPTY_CODE_HASH || *code_hash == [0u8; 32] {
            AccountType::External
        } else {
            AccountType::Contract
        }
    }
}

/// Outcome of checking an `eth_getProof` account against a state root.
///
/// Verification never errors: a bad proof comes back with
/// `verified == false` and the reason in `failure`. The balance and nonce
/// are what the RPC claimed and are only trustworthy when `verified`.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct AccountVerification {
    pub address: [u8; 20],
    pub balance: U256,
    pub nonce: u64,
    pub verified: bool,
    pub account_type: AccountType,
    /// State root the proof was checked against.
    pub state_root: [u8; 32],
    pub failure: Option<ProofError>,
}

impl AccountVerification {
    /// Whether this result still describes the chain at `head_state_root`.
    pub fn is_current_for(&self, head_state_root: &[u8; 32]) -> bool {
        self.state_root == *head_state_root
    }
}

/// Outcome of checking one storage slot against a storage root.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct StorageVerification {
    pub key: [u8; 32],
    pub value: U256,
    pub verified: bool,
    pub failure: Option<ProofError>,
}

/// Verify the account part of an `eth_getProof` response.
///
/// The state_root must come from a verified execution payload header in our
/// light client state. The proof data can come from any source (including
/// untrusted RPCs); it is checked cryptographically regardless of source.
pub fn verify_account(state_root: &[u8; 32], proof: &ExecutionProof) -> AccountVerification {
    let result = verify_account_proof(state_root, proof);
    if let Err(e) = &result {
        debug!(address = %hex::encode(proof.address), error = %e, "account proof rejected");
    }

    AccountVerification {
        address: proof.address,
        balance: proof.balance,
        nonce: proof.nonce,
        verified: result.is_ok(),
        account_type: AccountType::from_code_hash(&proof.code_hash),
        state_root: *state_root,
        failure: result.err(),
    }
}

/// Verify one storage slot against an account's storage hash.
pub fn verify_storage(storage_root: &[u8; 32], proof: &StorageProof) -> StorageVerification {
    let result = verify_storage_proof(storage_root, proof);

    StorageVerification {
        key: proof.key,
        value: proof.value,
        verified: result.is_ok(),
        failure: result.err(),
    }
}

/// Fetch an account proof at `block_number` and verify it against
/// `state_root`, the execution state root of that same block.
pub async fn fetch_and_verify_account<R: ExecutionRpc + ?Sized>(
    rpc: &R,
    state_root: [u8; 32],
    block_number: u64,
    address: [u8; 20],
) -> anyhow::Result<AccountVerification> {
    let proof = rpc.get_proof(address, &[], block_number).await?;
    if proof.address != address {
        anyhow::bail!(
            "RPC returned a proof for 0x{} instead of 0x{}",
            hex::encode(proof.address),
            hex::encode(address)
        );
    }
    Ok(verify_account(&state_root, &proof))
}
