use alloy_primitives::U256;
use alloy_rlp::{RlpDecodable, RlpEncodable};
use serde::{Deserialize, Serialize};

/// The keccak256 hash of empty bytes, the code hash of accounts without code.
pub const EMPTY_CODE_HASH: [u8; 32] = [
    0xc5, 0xd2, 0x46, 0x01, 0x86, 0xf7, 0x23, 0x3c, 0x92, 0x7e, 0x7d, 0xb2, 0xdc, 0xc7, 0x03,
    0xc0, 0xe5, 0x00, 0xb6, 0x53, 0xca, 0x82, 0x27, 0x3b, 0x7b, 0xfa, 0xd8, 0x04, 0x5d, 0x85,
    0xa4, 0x70,
];

/// The root of an empty Merkle-Patricia trie (keccak256 of the RLP empty string).
pub const EMPTY_STORAGE_ROOT: [u8; 32] = [
    0x56, 0xe8, 0x1f, 0x17, 0x1b, 0xcc, 0x55, 0xa6, 0xff, 0x83, 0x45, 0xe6, 0x92, 0xc0, 0xf8,
    0x6e, 0x5b, 0x48, 0xe0, 0x1b, 0x99, 0x6c, 0xad, 0xc0, 0x01, 0x62, 0x2f, 0xb5, 0xe3, 0x63,
    0xb4, 0x21,
];

/// An account as stored in the state trie: `rlp([nonce, balance, storageRoot, codeHash])`.
#[derive(Clone, Debug, PartialEq, Eq, RlpEncodable, RlpDecodable, Serialize, Deserialize)]
pub struct TrieAccount {
    pub nonce: u64,
    pub balance: U256,
    pub storage_root: [u8; 32],
    pub code_hash: [u8; 32],
}

impl TrieAccount {
    /// Check if this is a contract account (has code deployed).
    pub fn is_contract(&self) -> bool {
        self.code_hash != EMPTY_CODE_HASH
    }

    /// Check if this account has a non-empty storage trie.
    pub fn has_storage(&self) -> bool {
        self.storage_root != EMPTY_STORAGE_ROOT
    }

    /// An account that does not exist in the trie reads as this.
    pub fn is_empty(&self) -> bool {
        self.nonce == 0 && self.balance.is_zero() && !self.is_contract()
    }
}

/// An EIP-1186 `eth_getProof` result. Every field is a claim by the RPC
/// until checked against a state root the light client holds.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExecutionProof {
    pub address: [u8; 20],
    /// RLP-encoded trie nodes from the state root down to the account.
    pub account_proof: Vec<Vec<u8>>,
    pub balance: U256,
    pub nonce: u64,
    pub code_hash: [u8; 32],
    pub storage_hash: [u8; 32],
    pub storage_proof: Vec<StorageProof>,
}

impl ExecutionProof {
    /// The claimed account, with the all-zero hashes some RPCs return for
    /// missing accounts replaced by the canonical empty hashes.
    pub fn claimed_account(&self) -> TrieAccount {
        TrieAccount {
            nonce: self.nonce,
            balance: self.balance,
            storage_root: normalize_hash(self.storage_hash, EMPTY_STORAGE_ROOT),
            code_hash: normalize_hash(self.code_hash, EMPTY_CODE_HASH),
        }
    }
}

fn normalize_hash(hash: [u8; 32], empty: [u8; 32]) -> [u8; 32] {
    if hash == [0u8; 32] {
        empty
    } else {
        hash
    }
}

/// A Merkle-Patricia trie proof for a storage slot.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct StorageProof {
    /// The storage slot (not yet hashed).
    pub key: [u8; 32],
    pub value: U256,
    /// RLP-encoded trie nodes from the storage root down to the slot.
    pub proof: Vec<Vec<u8>>,
}

/// An ERC-20 contract whose balances live in a `mapping(address => uint256)`
/// declared at storage position `balance_mapping_index`.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Erc20Token {
    pub symbol: String,
    pub contract_address: [u8; 20],
    pub balance_mapping_index: u64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_hash_constants() {
        assert_eq!(crate::execution::proof::keccak256(&[]), EMPTY_CODE_HASH);
        assert_eq!(crate::execution::proof::keccak256(&[0x80]), EMPTY_STORAGE_ROOT);
    }

    #[test]
    fn test_claimed_account_normalizes_zero_hashes() {
        let proof = ExecutionProof {
            address: [0x11; 20],
            account_proof: vec![],
            balance: U256::from(5u64),
            nonce: 1,
            code_hash: [0u8; 32],
            storage_hash: [0u8; 32],
            storage_proof: vec![],
        };
        let account = proof.claimed_account();
        assert_eq!(account.code_hash, EMPTY_CODE_HASH);
        assert_eq!(account.storage_root, EMPTY_STORAGE_ROOT);
        assert!(!account.is_contract());
        assert!(!account.has_storage());
    }
}
