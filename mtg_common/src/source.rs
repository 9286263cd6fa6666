//! Upstream data sources

use crate::record::EntityKind;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// The fixed set of upstream providers.
///
/// Adding a source means adding a variant here and a matching adapter;
/// nothing is discovered at runtime.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SourceId {
    /// Scryfall card data (`/sets` list endpoint)
    Scryfall,
    /// MTGJSON bulk JSON dumps (`SetList.json`)
    Mtgjson,
    /// MTG Vectors symbol catalog (`manifest.json`)
    Vectors,
}

impl SourceId {
    pub const ALL: [SourceId; 3] = [SourceId::Scryfall, SourceId::Mtgjson, SourceId::Vectors];

    pub fn as_str(&self) -> &'static str {
        match self {
            SourceId::Scryfall => "scryfall",
            SourceId::Mtgjson => "mtgjson",
            SourceId::Vectors => "vectors",
        }
    }

    /// Entity kinds whose records this source contributes
    pub fn entity_kinds(&self) -> &'static [EntityKind] {
        match self {
            SourceId::Scryfall | SourceId::Mtgjson => &[EntityKind::Set],
            SourceId::Vectors => &[EntityKind::SymbolSet, EntityKind::SymbolWatermark],
        }
    }
}

impl fmt::Display for SourceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for SourceId {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "scryfall" => Ok(SourceId::Scryfall),
            "mtgjson" => Ok(SourceId::Mtgjson),
            "vectors" | "mtg-vectors" => Ok(SourceId::Vectors),
            other => Err(format!(
                "unknown source '{}' (expected scryfall, mtgjson or vectors)",
                other
            )),
        }
    }
}
