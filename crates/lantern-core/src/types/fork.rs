use serde::{Deserialize, Serialize};

use crate::ssz::GeneralizedIndex;

/// Beacon chain forks the light client understands. Ordering follows
/// activation order, so `fork >= Fork::Capella` reads as "Capella or later".
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Fork {
    Phase0,
    Altair,
    Bellatrix,
    Capella,
    Deneb,
    Electra,
}

impl Fork {
    pub const ALL: [Fork; 6] = [
        Fork::Phase0,
        Fork::Altair,
        Fork::Bellatrix,
        Fork::Capella,
        Fork::Deneb,
        Fork::Electra,
    ];

    /// Light client headers carry an execution payload header from Capella on.
    pub fn has_execution_header(self) -> bool {
        self >= Fork::Capella
    }

    /// Deneb added `blob_gas_used` and `excess_blob_gas` to the payload header.
    pub fn has_blob_gas(self) -> bool {
        self >= Fork::Deneb
    }

    /// Position of `finalized_checkpoint.root` in the beacon state tree.
    /// Electra grew the state past 32 fields, which added a tree level.
    pub fn finalized_root_gindex(self) -> GeneralizedIndex {
        if self >= Fork::Electra {
            GeneralizedIndex(169)
        } else {
            GeneralizedIndex(105)
        }
    }

    pub fn current_sync_committee_gindex(self) -> GeneralizedIndex {
        if self >= Fork::Electra {
            GeneralizedIndex(86)
        } else {
            GeneralizedIndex(54)
        }
    }

    pub fn next_sync_committee_gindex(self) -> GeneralizedIndex {
        if self >= Fork::Electra {
            GeneralizedIndex(87)
        } else {
            GeneralizedIndex(55)
        }
    }

    /// Position of `execution_payload` in the block body. Unchanged since Capella.
    pub fn execution_payload_gindex(self) -> GeneralizedIndex {
        GeneralizedIndex(25)
    }

    pub fn name(self) -> &'static str {
        match self {
            Fork::Phase0 => "phase0",
            Fork::Altair => "altair",
            Fork::Bellatrix => "bellatrix",
            Fork::Capella => "capella",
            Fork::Deneb => "deneb",
            Fork::Electra => "electra",
        }
    }
}

impl std::fmt::Display for Fork {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}
