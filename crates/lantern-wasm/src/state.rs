//! Verified balance cache and sync progress for the JS side.

use std::collections::HashMap;

use lantern_core::config::default_tokens;
use lantern_core::{AccountVerification, Erc20Token, NetworkName, SyncReport, TokenBalance};
use serde::{Deserialize, Serialize};

/// Cache of balances verified against one execution state root.
///
/// Every entry was verified before being cached. The whole cache is dropped
/// when the head moves to a different state root; a balance proven against
/// an older root is stale, not wrong, but the UI should not show it as
/// current.
pub struct VerifiedBalanceCache {
    accounts: HashMap<[u8; 20], AccountVerification>,
    tokens: HashMap<[u8; 20], Vec<TokenBalance>>,
    state_root: Option<[u8; 32]>,
}

impl VerifiedBalanceCache {
    pub fn new() -> Self {
        Self {
            accounts: HashMap::new(),
            tokens: HashMap::new(),
            state_root: None,
        }
    }

    /// Clear everything if the head's state root changed.
    pub fn on_head_change(&mut self, state_root: [u8; 32]) {
        if self.state_root != Some(state_root) {
            self.accounts.clear();
            self.tokens.clear();
            self.state_root = Some(state_root);
        }
    }

    /// Only verified results for the current root are kept.
    pub fn cache_account(&mut self, result: AccountVerification) {
        if result.verified && self.state_root == Some(result.state_root) {
            self.accounts.insert(result.address, result);
        }
    }

    pub fn get_account(&self, address: &[u8; 20], head_state_root: &[u8; 32]) -> Option<&AccountVerification> {
        self.accounts
            .get(address)
            .filter(|result| result.is_current_for(head_state_root))
    }

    /// Kept only when every token verified against the current root. A
    /// failed or unproven token is fetched again on the next call.
    pub fn cache_tokens(&mut self, owner: [u8; 20], state_root: [u8; 32], balances: Vec<TokenBalance>) {
        if self.state_root == Some(state_root) && balances.iter().all(TokenBalance::is_verified) {
            self.tokens.insert(owner, balances);
        }
    }

    /// Forget token results, e.g. after the token list changed.
    pub fn clear_tokens(&mut self) {
        self.tokens.clear();
    }

    pub fn get_tokens(&self, owner: &[u8; 20], head_state_root: &[u8; 32]) -> Option<&[TokenBalance]> {
        if self.state_root.as_ref() != Some(head_state_root) {
            return None;
        }
        self.tokens.get(owner).map(Vec::as_slice)
    }

    /// Get the number of cached entries (for diagnostics).
    pub fn size(&self) -> (usize, usize) {
        (self.accounts.len(), self.tokens.len())
    }
}

/// Tokens checked by `token_balances`: the network's defaults plus any the
/// page registered. One entry per contract address.
pub struct TokenRegistry {
    tokens: Vec<Erc20Token>,
}

impl TokenRegistry {
    pub fn for_network(network: NetworkName) -> Self {
        Self {
            tokens: default_tokens(network),
        }
    }

    /// Add `token`, replacing an earlier entry for the same contract.
    /// Returns whether the list changed.
    pub fn add(&mut self, token: Erc20Token) -> bool {
        match self
            .tokens
            .iter_mut()
            .find(|t| t.contract_address == token.contract_address)
        {
            Some(existing) if *existing == token => false,
            Some(existing) => {
                *existing = token;
                true
            }
            None => {
                self.tokens.push(token);
                true
            }
        }
    }

    pub fn tokens(&self) -> &[Erc20Token] {
        &self.tokens
    }
}

/// Sync progress tracking for the TypeScript layer.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct SyncProgress {
    /// Current verified head slot.
    pub head_slot: u64,
    pub finalized_slot: u64,
    /// Wall clock slot the head is chasing.
    pub clock_slot: u64,
    pub sync_steps: u64,
    /// Number of updates that changed the store.
    pub updates_applied: u64,
    /// Number of stale or under-signed updates dropped.
    pub updates_skipped: u64,
    /// Number of updates rejected (failed verification).
    pub updates_rejected: u64,
    /// Number of proofs verified successfully.
    pub proofs_verified: u64,
    /// Number of proofs that failed verification.
    pub proofs_rejected: u64,
}

impl SyncProgress {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record_step(&mut self, report: &SyncReport, clock_slot: u64) {
        self.sync_steps += 1;
        self.updates_applied += report.applied as u64;
        self.updates_skipped += report.skipped as u64;
        self.updates_rejected += report.rejected as u64;
        self.head_slot = report.head_slot;
        self.finalized_slot = report.finalized_slot;
        self.clock_slot = clock_slot;
    }

    pub fn record_proof(&mut self, verified: bool) {
        if verified {
            self.proofs_verified += 1;
        } else {
            self.proofs_rejected += 1;
        }
    }

    /// Calculate sync percentage (0.0 - 1.0).
    pub fn sync_percentage(&self) -> f64 {
        if self.clock_slot == 0 {
            return 0.0;
        }
        (self.head_slot as f64 / self.clock_slot as f64).min(1.0)
    }
}
