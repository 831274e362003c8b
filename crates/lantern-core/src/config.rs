//! Network presets and client settings.
//!
//! Built-in networks carry their genesis data and fork schedule. Any other
//! network is described by the beacon node itself via `getGenesis` and
//! `getSpec`, see [`ChainConfig::from_node`].

use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;

use hex_literal::hex;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::debug;

use crate::api::{BeaconApi, Genesis};
use crate::types::beacon::{
    EPOCHS_PER_SYNC_COMMITTEE_PERIOD, FAR_FUTURE_EPOCH, MIN_SYNC_COMMITTEE_PARTICIPANTS,
    SLOTS_PER_EPOCH,
};
use crate::types::execution::Erc20Token;
use crate::types::fork::Fork;

/// Slots of head lag after which the client counts as lagging and proof
/// fetching pauses.
pub const DEFAULT_SLOTS_BEHIND_THRESHOLD: u64 = 96;

/// Minimum spacing between two proof fetches.
pub const DEFAULT_PROOF_FETCH_INTERVAL_MS: u64 = 1000;

/// Most updates a beacon node serves per `light_client/updates` request.
pub const MAX_REQUEST_LIGHT_CLIENT_UPDATES: u8 = 128;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Unknown network: {0}")]
    UnknownNetwork(String),

    #[error("Network {network} has no default {kind} URL, one must be configured")]
    MissingUrl { network: NetworkName, kind: &'static str },

    #[error("Custom network requires an explicit chain config")]
    MissingChainConfig,

    #[error("Spec is missing {0}")]
    MissingSpecKey(&'static str),

    #[error("Spec value {key} is invalid: {reason}")]
    InvalidSpecValue { key: &'static str, reason: String },

    #[error("Unsupported preset: {key} is {value}, only the mainnet preset is supported")]
    UnsupportedPreset { key: &'static str, value: u64 },

    #[error("Invalid address: {reason}")]
    InvalidAddress { reason: String },

    #[error("Invalid config JSON: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Could not load the chain config from the beacon node: {0}")]
    Node(#[from] anyhow::Error),
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum NetworkName {
    Mainnet,
    Sepolia,
    Holesky,
    Custom,
}

impl NetworkName {
    pub fn as_str(self) -> &'static str {
        match self {
            NetworkName::Mainnet => "mainnet",
            NetworkName::Sepolia => "sepolia",
            NetworkName::Holesky => "holesky",
            NetworkName::Custom => "custom",
        }
    }

    /// Default (beacon API, execution RPC) endpoints.
    pub fn default_urls(self) -> Option<(&'static str, &'static str)> {
        match self {
            NetworkName::Mainnet => Some((
                "https://lodestar-mainnet.chainsafe.io",
                "https://lodestar-mainnetrpc.chainsafe.io",
            )),
            NetworkName::Sepolia => Some((
                "https://lodestar-sepolia.chainsafe.io",
                "https://lodestar-sepoliarpc.chainsafe.io",
            )),
            NetworkName::Holesky | NetworkName::Custom => None,
        }
    }
}

impl fmt::Display for NetworkName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for NetworkName {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "mainnet" => Ok(NetworkName::Mainnet),
            "sepolia" => Ok(NetworkName::Sepolia),
            "holesky" => Ok(NetworkName::Holesky),
            "custom" => Ok(NetworkName::Custom),
            other => Err(ConfigError::UnknownNetwork(other.to_string())),
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ForkVersion {
    #[serde(with = "crate::types::hex_array")]
    pub version: [u8; 4],
    pub epoch: u64,
}

impl ForkVersion {
    const fn new(version: [u8; 4], epoch: u64) -> Self {
        Self { version, epoch }
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ForkSchedule {
    pub genesis: ForkVersion,
    pub altair: ForkVersion,
    pub bellatrix: ForkVersion,
    pub capella: ForkVersion,
    pub deneb: ForkVersion,
    pub electra: ForkVersion,
}

impl ForkSchedule {
    pub fn get(&self, fork: Fork) -> &ForkVersion {
        match fork {
            Fork::Phase0 => &self.genesis,
            Fork::Altair => &self.altair,
            Fork::Bellatrix => &self.bellatrix,
            Fork::Capella => &self.capella,
            Fork::Deneb => &self.deneb,
            Fork::Electra => &self.electra,
        }
    }

    /// The latest fork activated at or before `epoch`.
    pub fn fork_at_epoch(&self, epoch: u64) -> Fork {
        Fork::ALL
            .iter()
            .rev()
            .copied()
            .find(|fork| epoch >= self.get(*fork).epoch)
            .unwrap_or(Fork::Phase0)
    }

    pub fn version_at_epoch(&self, epoch: u64) -> [u8; 4] {
        self.get(self.fork_at_epoch(epoch)).version
    }
}

/// Everything about a chain the light client needs to verify it.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChainConfig {
    pub network: NetworkName,
    pub genesis_time: u64,
    #[serde(with = "crate::types::hex_array")]
    pub genesis_validators_root: [u8; 32],
    pub seconds_per_slot: u64,
    #[serde(default = "default_min_participants")]
    pub min_sync_committee_participants: usize,
    pub forks: ForkSchedule,
}

fn default_min_participants() -> usize {
    MIN_SYNC_COMMITTEE_PARTICIPANTS
}

impl ChainConfig {
    pub fn mainnet() -> Self {
        Self {
            network: NetworkName::Mainnet,
            genesis_time: 1606824023,
            genesis_validators_root: hex!(
                "4b363db94e286120d76eb905340fdd4e54bfe9f06bf33ff6cf5ad27f511bfe95"
            ),
            seconds_per_slot: 12,
            min_sync_committee_participants: MIN_SYNC_COMMITTEE_PARTICIPANTS,
            forks: ForkSchedule {
                genesis: ForkVersion::new(hex!("00000000"), 0),
                altair: ForkVersion::new(hex!("01000000"), 74240),
                bellatrix: ForkVersion::new(hex!("02000000"), 144896),
                capella: ForkVersion::new(hex!("03000000"), 194048),
                deneb: ForkVersion::new(hex!("04000000"), 269568),
                electra: ForkVersion::new(hex!("05000000"), 364032),
            },
        }
    }

    pub fn sepolia() -> Self {
        Self {
            network: NetworkName::Sepolia,
            genesis_time: 1655733600,
            genesis_validators_root: hex!(
                "d8ea171f3c94aea21ebc42a1ed61052acf3f9209c00e4efbaaddac09ed9b8078"
            ),
            seconds_per_slot: 12,
            min_sync_committee_participants: MIN_SYNC_COMMITTEE_PARTICIPANTS,
            forks: ForkSchedule {
                genesis: ForkVersion::new(hex!("90000069"), 0),
                altair: ForkVersion::new(hex!("90000070"), 50),
                bellatrix: ForkVersion::new(hex!("90000071"), 100),
                capella: ForkVersion::new(hex!("90000072"), 56832),
                deneb: ForkVersion::new(hex!("90000073"), 132608),
                electra: ForkVersion::new(hex!("90000074"), 222464),
            },
        }
    }

    pub fn holesky() -> Self {
        Self {
            network: NetworkName::Holesky,
            genesis_time: 1695902400,
            genesis_validators_root: hex!(
                "9143aa7c615a7f7115e2b6aac319c03529df8242ae705fba9df39b79c59fa8b1"
            ),
            seconds_per_slot: 12,
            min_sync_committee_participants: MIN_SYNC_COMMITTEE_PARTICIPANTS,
            forks: ForkSchedule {
                genesis: ForkVersion::new(hex!("01017000"), 0),
                altair: ForkVersion::new(hex!("02017000"), 0),
                bellatrix: ForkVersion::new(hex!("03017000"), 0),
                capella: ForkVersion::new(hex!("04017000"), 256),
                deneb: ForkVersion::new(hex!("05017000"), 29696),
                electra: ForkVersion::new(hex!("06017000"), 115968),
            },
        }
    }

    /// Preset for a built-in network. `Custom` has none.
    pub fn for_network(network: NetworkName) -> Option<Self> {
        match network {
            NetworkName::Mainnet => Some(Self::mainnet()),
            NetworkName::Sepolia => Some(Self::sepolia()),
            NetworkName::Holesky => Some(Self::holesky()),
            NetworkName::Custom => None,
        }
    }

    /// Build the config of an arbitrary network from its genesis and the
    /// `/eth/v1/config/spec` key/value map. Forks missing from the spec are
    /// treated as unscheduled.
    pub fn custom(genesis: &Genesis, spec: &HashMap<String, String>) -> Result<Self, ConfigError> {
        for (key, expected) in [
            ("SLOTS_PER_EPOCH", SLOTS_PER_EPOCH),
            ("EPOCHS_PER_SYNC_COMMITTEE_PERIOD", EPOCHS_PER_SYNC_COMMITTEE_PERIOD),
        ] {
            if let Some(value) = spec_u64(spec, key)? {
                if value != expected {
                    return Err(ConfigError::UnsupportedPreset { key, value });
                }
            }
        }

        let seconds_per_slot =
            spec_u64(spec, "SECONDS_PER_SLOT")?.ok_or(ConfigError::MissingSpecKey("SECONDS_PER_SLOT"))?;

        let fork = |version_key: &'static str, epoch_key: &'static str| -> Result<ForkVersion, ConfigError> {
            let version = match spec.get(version_key) {
                Some(v) => crate::types::parse_hex_array::<4>(v).map_err(|reason| {
                    ConfigError::InvalidSpecValue { key: version_key, reason }
                })?,
                None => return Ok(ForkVersion::new([0xff; 4], FAR_FUTURE_EPOCH)),
            };
            let epoch = spec_u64(spec, epoch_key)?.unwrap_or(FAR_FUTURE_EPOCH);
            Ok(ForkVersion::new(version, epoch))
        };

        let config = Self {
            network: NetworkName::Custom,
            genesis_time: genesis.genesis_time,
            genesis_validators_root: genesis.genesis_validators_root,
            seconds_per_slot,
            min_sync_committee_participants: MIN_SYNC_COMMITTEE_PARTICIPANTS,
            forks: ForkSchedule {
                genesis: ForkVersion::new(genesis.genesis_fork_version, 0),
                altair: fork("ALTAIR_FORK_VERSION", "ALTAIR_FORK_EPOCH")?,
                bellatrix: fork("BELLATRIX_FORK_VERSION", "BELLATRIX_FORK_EPOCH")?,
                capella: fork("CAPELLA_FORK_VERSION", "CAPELLA_FORK_EPOCH")?,
                deneb: fork("DENEB_FORK_VERSION", "DENEB_FORK_EPOCH")?,
                electra: fork("ELECTRA_FORK_VERSION", "ELECTRA_FORK_EPOCH")?,
            },
        };
        debug!(
            genesis_time = config.genesis_time,
            seconds_per_slot = config.seconds_per_slot,
            "loaded custom chain config"
        );
        Ok(config)
    }

    /// Ask the beacon node for its genesis and spec and build the config of
    /// whatever network it follows. The result is only as trustworthy as the
    /// node; the preset networks never go through here.
    pub async fn from_node<A: BeaconApi + ?Sized>(api: &A) -> Result<Self, ConfigError> {
        let genesis = api.get_genesis().await?;
        let spec = api.get_spec().await?;
        Self::custom(&genesis, &spec)
    }

    pub fn fork_at_slot(&self, slot: u64) -> Fork {
        self.forks.fork_at_epoch(slot / SLOTS_PER_EPOCH)
    }

    /// Fork version that signatures made at `signature_slot` commit to. The
    /// committee signs the previous slot's block, hence the step back.
    pub fn signing_fork_version(&self, signature_slot: u64) -> [u8; 4] {
        let slot = signature_slot.max(1) - 1;
        self.forks.version_at_epoch(slot / SLOTS_PER_EPOCH)
    }
}

fn spec_u64(spec: &HashMap<String, String>, key: &'static str) -> Result<Option<u64>, ConfigError> {
    spec.get(key)
        .map(|v| {
            v.parse::<u64>().map_err(|e| ConfigError::InvalidSpecValue {
                key,
                reason: e.to_string(),
            })
        })
        .transpose()
}

/// Settings of one light client instance.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ClientConfig {
    pub chain: ChainConfig,
    pub beacon_api_url: String,
    pub execution_rpc_url: String,
    /// Trusted block root to bootstrap from, `0x` + 64 hex chars.
    #[serde(default)]
    pub checkpoint: Option<String>,
    /// Serve the optimistic header as head. When false only finalized
    /// headers are exposed.
    #[serde(default = "default_true")]
    pub track_optimistic: bool,
    #[serde(default = "default_slots_behind")]
    pub slots_behind_threshold: u64,
    #[serde(default = "default_proof_interval")]
    pub proof_fetch_interval_ms: u64,
    #[serde(default = "default_updates_per_request")]
    pub max_updates_per_request: u8,
}

fn default_true() -> bool {
    true
}

fn default_slots_behind() -> u64 {
    DEFAULT_SLOTS_BEHIND_THRESHOLD
}

fn default_proof_interval() -> u64 {
    DEFAULT_PROOF_FETCH_INTERVAL_MS
}

fn default_updates_per_request() -> u8 {
    MAX_REQUEST_LIGHT_CLIENT_UPDATES
}

/// On-disk / JS-side shape: a network name, with the chain and URLs
/// optional when the network has presets.
#[derive(Deserialize)]
struct ClientConfigFile {
    network: NetworkName,
    #[serde(default)]
    chain: Option<ChainConfig>,
    #[serde(default)]
    beacon_api_url: Option<String>,
    #[serde(default)]
    execution_rpc_url: Option<String>,
    #[serde(default)]
    checkpoint: Option<String>,
    #[serde(default = "default_true")]
    track_optimistic: bool,
    #[serde(default = "default_slots_behind")]
    slots_behind_threshold: u64,
    #[serde(default = "default_proof_interval")]
    proof_fetch_interval_ms: u64,
    #[serde(default = "default_updates_per_request")]
    max_updates_per_request: u8,
}

impl ClientConfig {
    pub fn new(chain: ChainConfig, beacon_api_url: &str, execution_rpc_url: &str) -> Self {
        Self {
            chain,
            beacon_api_url: beacon_api_url.trim_end_matches('/').to_string(),
            execution_rpc_url: execution_rpc_url.to_string(),
            checkpoint: None,
            track_optimistic: true,
            slots_behind_threshold: DEFAULT_SLOTS_BEHIND_THRESHOLD,
            proof_fetch_interval_ms: DEFAULT_PROOF_FETCH_INTERVAL_MS,
            max_updates_per_request: MAX_REQUEST_LIGHT_CLIENT_UPDATES,
        }
    }

    /// Preset chain and default endpoints of a built-in network.
    pub fn for_network(network: NetworkName) -> Result<Self, ConfigError> {
        let chain = ChainConfig::for_network(network).ok_or(ConfigError::MissingChainConfig)?;
        let (beacon, execution) = network.default_urls().ok_or(ConfigError::MissingUrl {
            network,
            kind: "beacon API",
        })?;
        Ok(Self::new(chain, beacon, execution))
    }

    pub fn from_json(json: &str) -> Result<Self, ConfigError> {
        let file: ClientConfigFile = serde_json::from_str(json)?;
        let chain = file.chain()?;
        file.into_config(chain)
    }

    /// Like [`ClientConfig::from_json`], except that a custom network without
    /// a `chain` entry is described by its beacon node. `connect` builds the
    /// client for the configured beacon API URL.
    pub async fn from_json_with_node<A, F>(json: &str, connect: F) -> Result<Self, ConfigError>
    where
        A: BeaconApi,
        F: FnOnce(&str) -> A,
    {
        let file: ClientConfigFile = serde_json::from_str(json)?;
        let chain = match file.chain() {
            Err(ConfigError::MissingChainConfig) => {
                let api = connect(&file.beacon_api_url()?);
                ChainConfig::from_node(&api).await?
            }
            other => other?,
        };
        file.into_config(chain)
    }
}

impl ClientConfigFile {
    fn chain(&self) -> Result<ChainConfig, ConfigError> {
        match &self.chain {
            Some(chain) => Ok(chain.clone()),
            None => ChainConfig::for_network(self.network).ok_or(ConfigError::MissingChainConfig),
        }
    }

    fn beacon_api_url(&self) -> Result<String, ConfigError> {
        self.beacon_api_url
            .clone()
            .or_else(|| self.network.default_urls().map(|(beacon, _)| beacon.to_string()))
            .ok_or(ConfigError::MissingUrl {
                network: self.network,
                kind: "beacon API",
            })
    }

    fn into_config(self, chain: ChainConfig) -> Result<ClientConfig, ConfigError> {
        let network = self.network;
        let beacon_api_url = self.beacon_api_url()?;
        let execution_rpc_url = self
            .execution_rpc_url
            .or_else(|| network.default_urls().map(|(_, execution)| execution.to_string()))
            .ok_or(ConfigError::MissingUrl {
                network,
                kind: "execution RPC",
            })?;

        let mut config = ClientConfig::new(chain, &beacon_api_url, &execution_rpc_url);
        config.checkpoint = self.checkpoint;
        config.track_optimistic = self.track_optimistic;
        config.slots_behind_threshold = self.slots_behind_threshold;
        config.proof_fetch_interval_ms = self.proof_fetch_interval_ms;
        config.max_updates_per_request = self
            .max_updates_per_request
            .clamp(1, MAX_REQUEST_LIGHT_CLIENT_UPDATES);
        Ok(config)
    }
}

/// Tokens shown by default on a network. Only tokens with a known contract
/// address on that network are returned.
pub fn default_tokens(network: NetworkName) -> Vec<Erc20Token> {
    match network {
        NetworkName::Mainnet => vec![Erc20Token {
            symbol: "DAI".to_string(),
            contract_address: hex!("6b175474e89094c44da98b954eedeac495271d0f"),
            balance_mapping_index: 2,
        }],
        _ => vec![],
    }
}

/// Parse a 20-byte address, `0x` prefix optional.
pub fn parse_address(input: &str) -> Result<[u8; 20], ConfigError> {
    let trimmed = input.trim();
    let digits = trimmed
        .strip_prefix("0x")
        .or_else(|| trimmed.strip_prefix("0X"))
        .unwrap_or(trimmed);
    if digits.len() != 40 {
        return Err(ConfigError::InvalidAddress {
            reason: format!("expected 40 hex characters, got {}", digits.len()),
        });
    }
    crate::types::parse_hex_array::<20>(digits).map_err(|reason| ConfigError::InvalidAddress { reason })
}
