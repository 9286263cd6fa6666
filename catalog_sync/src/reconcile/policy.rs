//! Static merge priority tables
//!
//! One [`FieldRule`] per canonical field. A rule lists tiers of sources in
//! priority order; the first tier holding a non-empty value decides the
//! field. Fields absent from every tier fall back to the entity's defaults.

use mtg_common::{EntityKind, SourceId};

/// Merge rule for one canonical field
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FieldRule {
    pub field: &'static str,
    /// Tiers of equally trusted sources, most trusted first
    pub priority: &'static [&'static [SourceId]],
    /// Reconciliation fails when no source supplies the field
    pub required: bool,
}

impl FieldRule {
    pub const fn required(field: &'static str, priority: &'static [&'static [SourceId]]) -> Self {
        Self {
            field,
            priority,
            required: true,
        }
    }

    pub const fn optional(field: &'static str, priority: &'static [&'static [SourceId]]) -> Self {
        Self {
            field,
            priority,
            required: false,
        }
    }

    /// Every source this rule consults
    pub fn sources(&self) -> impl Iterator<Item = SourceId> + '_ {
        self.priority.iter().flat_map(|tier| tier.iter().copied())
    }
}

const SCRYFALL_FIRST: &[&[SourceId]] = &[&[SourceId::Scryfall], &[SourceId::Mtgjson]];
const SCRYFALL_ONLY: &[&[SourceId]] = &[&[SourceId::Scryfall]];
const MTGJSON_ONLY: &[&[SourceId]] = &[&[SourceId::Mtgjson]];
const VECTORS_ONLY: &[&[SourceId]] = &[&[SourceId::Vectors]];

/// Scryfall is authoritative for set data; MTGJSON fills gaps and owns the
/// marketplace identifiers
pub const SET_RULES: &[FieldRule] = &[
    FieldRule::required("name", SCRYFALL_FIRST),
    FieldRule::required("date_released", SCRYFALL_FIRST),
    FieldRule::optional("type", SCRYFALL_FIRST),
    FieldRule::optional("block", SCRYFALL_FIRST),
    FieldRule::optional("block_code", SCRYFALL_ONLY),
    FieldRule::optional("code_alt", MTGJSON_ONLY),
    FieldRule::optional("code_arena", SCRYFALL_ONLY),
    FieldRule::optional("code_keyrune", MTGJSON_ONLY),
    FieldRule::optional("code_mtgo", SCRYFALL_FIRST),
    FieldRule::optional("code_parent", SCRYFALL_FIRST),
    FieldRule::optional("count_cards", SCRYFALL_FIRST),
    FieldRule::optional("count_printed", SCRYFALL_FIRST),
    FieldRule::optional("count_tokens", MTGJSON_ONLY),
    FieldRule::optional("id", SCRYFALL_ONLY),
    FieldRule::optional("id_cardmarket", MTGJSON_ONLY),
    FieldRule::optional("id_cardmarket_extras", MTGJSON_ONLY),
    FieldRule::optional("id_cardsphere", MTGJSON_ONLY),
    FieldRule::optional("id_tcgplayer", SCRYFALL_FIRST),
    FieldRule::optional("name_cardmarket", MTGJSON_ONLY),
    FieldRule::optional("icon_svg_uri", SCRYFALL_ONLY),
    FieldRule::optional("is_digital_only", SCRYFALL_FIRST),
    FieldRule::optional("is_foil_only", SCRYFALL_FIRST),
    FieldRule::optional("is_foreign_only", MTGJSON_ONLY),
    FieldRule::optional("is_nonfoil_only", SCRYFALL_FIRST),
    FieldRule::optional("is_paper_only", MTGJSON_ONLY),
    FieldRule::optional("is_preview", MTGJSON_ONLY),
];

pub const SYMBOL_SET_RULES: &[FieldRule] = &[
    FieldRule::optional("parent", VECTORS_ONLY),
    FieldRule::optional("supported", VECTORS_ONLY),
];

pub const SYMBOL_WATERMARK_RULES: &[FieldRule] = &[FieldRule::optional("parent", VECTORS_ONLY)];

/// Built-in rules for an entity kind
pub fn rules_for(kind: EntityKind) -> &'static [FieldRule] {
    match kind {
        EntityKind::Set => SET_RULES,
        EntityKind::SymbolSet => SYMBOL_SET_RULES,
        EntityKind::SymbolWatermark => SYMBOL_WATERMARK_RULES,
    }
}
