//! ERC-20 balances read straight from contract storage.
//!
//! A token keeps balances in `mapping(address => uint256)` at some declared
//! storage position. The slot for `owner` is
//! `keccak256(abi.encode(owner, position))`, so one `eth_getProof` with that
//! key proves both the contract account and the balance.

use alloy_primitives::U256;
use futures::future::join_all;
use thiserror::Error;
use tracing::{debug, warn};

use crate::api::ExecutionRpc;
use crate::execution::proof::{keccak256, verify_account_proof, verify_storage_proof, ProofError};
use crate::types::execution::*;

#[derive(Clone, Debug, PartialEq, Eq, Error)]
#[error("No contract deployed at 0x{}", hex::encode(.address))]
pub struct NoContractDeployed {
    pub address: [u8; 20],
}

#[derive(Clone, Debug, PartialEq, Eq, Error)]
pub enum TokenError {
    #[error(transparent)]
    NoContractDeployed(#[from] NoContractDeployed),

    #[error("Failed to fetch proof for {symbol}: {reason}")]
    Transport { symbol: String, reason: String },
}

/// Storage slot holding `owner`'s entry of the mapping declared at `mapping_index`.
pub fn erc20_balance_slot(owner: &[u8; 20], mapping_index: u64) -> [u8; 32] {
    let mut preimage = [0u8; 64];
    preimage[12..32].copy_from_slice(owner);
    preimage[56..64].copy_from_slice(&mapping_index.to_be_bytes());
    keccak256(&preimage)
}

/// A token balance checked against a state root. As with accounts, the
/// balance is the RPC's claim and only trustworthy when `verified`.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Erc20Balance {
    pub contract: [u8; 20],
    pub owner: [u8; 20],
    pub balance: U256,
    pub verified: bool,
    pub state_root: [u8; 32],
    pub failure: Option<ProofError>,
}

impl Erc20Balance {
    pub fn is_current_for(&self, head_state_root: &[u8; 32]) -> bool {
        self.state_root == *head_state_root
    }
}

/// Verify `owner`'s balance in the token at `contract`.
///
/// The proof must be for `contract` and its account proof must verify. A
/// proven account without code is reported as [`NoContractDeployed`]; every
/// other failure is a `verified == false` result.
pub fn verify_erc20_balance(
    state_root: &[u8; 32],
    proof: &ExecutionProof,
    contract: &[u8; 20],
    owner: &[u8; 20],
    mapping_index: u64,
) -> Result<Erc20Balance, NoContractDeployed> {
    let claimed_balance = proof
        .storage_proof
        .first()
        .map(|sp| sp.value)
        .unwrap_or(U256::ZERO);
    let result = |outcome: Result<(), ProofError>| Erc20Balance {
        contract: *contract,
        owner: *owner,
        balance: claimed_balance,
        verified: outcome.is_ok(),
        state_root: *state_root,
        failure: outcome.err(),
    };

    if proof.address != *contract {
        return Ok(result(Err(ProofError::AddressMismatch {
            expected: format!("0x{}", hex::encode(contract)),
            got: format!("0x{}", hex::encode(proof.address)),
        })));
    }

    let account = match verify_account_proof(state_root, proof) {
        Ok(account) => account,
        Err(e) => return Ok(result(Err(e))),
    };

    if !account.is_contract() {
        return Err(NoContractDeployed {
            address: proof.address,
        });
    }

    let Some(storage_proof) = proof.storage_proof.first() else {
        return Ok(result(Err(ProofError::MissingStorageProof)));
    };

    let expected_slot = erc20_balance_slot(owner, mapping_index);
    if storage_proof.key != expected_slot {
        return Ok(result(Err(ProofError::StorageKeyMismatch {
            expected: format!("0x{}", hex::encode(expected_slot)),
            got: format!("0x{}", hex::encode(storage_proof.key)),
        })));
    }

    Ok(result(
        verify_storage_proof(&account.storage_root, storage_proof).map(|_| ()),
    ))
}

/// Result for one token of a balance fan-out.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct TokenBalance {
    pub token: Erc20Token,
    pub outcome: Result<Erc20Balance, TokenError>,
}

impl TokenBalance {
    pub fn is_verified(&self) -> bool {
        matches!(&self.outcome, Ok(balance) if balance.verified)
    }
}

/// Fetch and verify `owner`'s balance in each token, one `eth_getProof` per
/// token, all in flight at once. Results keep the order of `tokens`.
pub async fn fetch_token_balances<R: ExecutionRpc + ?Sized>(
    rpc: &R,
    state_root: [u8; 32],
    block_number: u64,
    owner: [u8; 20],
    tokens: &[Erc20Token],
) -> Vec<TokenBalance> {
    let requests = tokens.iter().map(|token| async move {
        let slot = erc20_balance_slot(&owner, token.balance_mapping_index);
        let outcome = match rpc.get_proof(token.contract_address, &[slot], block_number).await {
            Ok(proof) => verify_erc20_balance(
                &state_root,
                &proof,
                &token.contract_address,
                &owner,
                token.balance_mapping_index,
            )
            .map_err(TokenError::from),
            Err(e) => {
                warn!(token = %token.symbol, error = %e, "token proof fetch failed");
                Err(TokenError::Transport {
                    symbol: token.symbol.clone(),
                    reason: e.to_string(),
                })
            }
        };
        if let Ok(balance) = &outcome {
            debug!(token = %token.symbol, verified = balance.verified, "token balance checked");
        }
        TokenBalance {
            token: token.clone(),
            outcome,
        }
    });

    join_all(requests).await
}
