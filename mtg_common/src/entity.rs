//! Canonical entities and their content fingerprints
//!
//! A canonical entity is the merged, normalized record that gets persisted
//! and served. Its fingerprint is a SHA-256 over the JSON serialization of
//! the entity: struct fields serialize in declaration order and list fields
//! are kept sorted, so equal entities always hash equally.

use crate::error::EntityError;
use crate::record::{EntityKind, FieldMap};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

/// Set type used when no source reports one
pub const DEFAULT_SET_TYPE: &str = "expansion";

/// Rarity code marking watermark support on a set symbol
pub const WATERMARK_RARITY: &str = "WM";

/// Hex SHA-256 of a value's JSON serialization
pub fn fingerprint_of<T: Serialize>(value: &T) -> Result<String, serde_json::Error> {
    let bytes = serde_json::to_vec(value)?;
    Ok(format!("{:x}", Sha256::digest(&bytes)))
}

/// Boolean flags of a [`Set`]
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SetFlags {
    pub is_digital_only: bool,
    pub is_foil_only: bool,
    pub is_foreign_only: bool,
    pub is_nonfoil_only: bool,
    pub is_paper_only: bool,
    pub is_preview: bool,
}

/// A unified MTG set, merged from Scryfall and MTGJSON
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Set {
    /// Lowercase set code, the entity key
    pub code: String,
    pub name: String,
    #[serde(rename = "type")]
    pub set_type: String,
    /// Release date, `YYYY-MM-DD`
    pub date_released: String,
    pub block: Option<String>,
    pub block_code: Option<String>,
    pub code_alt: Option<String>,
    pub code_arena: Option<String>,
    pub code_keyrune: Option<String>,
    pub code_mtgo: Option<String>,
    pub code_parent: Option<String>,
    pub count_cards: i64,
    pub count_printed: Option<i64>,
    pub count_tokens: i64,
    /// Scryfall set UUID
    pub id: Option<String>,
    pub id_cardmarket: Option<i64>,
    pub id_cardmarket_extras: Option<i64>,
    pub id_cardsphere: Option<i64>,
    pub id_tcgplayer: Option<i64>,
    pub name_cardmarket: Option<String>,
    pub icon_svg_uri: Option<String>,
    pub flags: SetFlags,
}

impl Set {
    /// Build a set from merged fields.
    ///
    /// Counts default to zero and flags to false. Token sets count their
    /// own cards as tokens; other sets take the token count MTGJSON reports.
    pub fn from_fields(key: &str, fields: &FieldMap) -> Result<Self, EntityError> {
        let set_type = fields
            .text("type")?
            .unwrap_or_else(|| DEFAULT_SET_TYPE.to_string());
        let count_cards = fields.int("count_cards")?.unwrap_or(0);
        let count_tokens = if set_type == "token" {
            count_cards
        } else {
            fields.int("count_tokens")?.unwrap_or(0)
        };

        Ok(Set {
            code: key.to_lowercase(),
            name: fields.required_text("name")?,
            set_type,
            date_released: fields.required_text("date_released")?,
            block: fields.text("block")?,
            block_code: fields.text("block_code")?,
            code_alt: fields.text("code_alt")?,
            code_arena: fields.text("code_arena")?,
            code_keyrune: fields.text("code_keyrune")?,
            code_mtgo: fields.text("code_mtgo")?,
            code_parent: fields.text("code_parent")?,
            count_cards,
            count_printed: fields.int("count_printed")?,
            count_tokens,
            id: fields.text("id")?,
            id_cardmarket: fields.int("id_cardmarket")?,
            id_cardmarket_extras: fields.int("id_cardmarket_extras")?,
            id_cardsphere: fields.int("id_cardsphere")?,
            id_tcgplayer: fields.int("id_tcgplayer")?,
            name_cardmarket: fields.text("name_cardmarket")?,
            icon_svg_uri: fields.text("icon_svg_uri")?,
            flags: SetFlags {
                is_digital_only: fields.bool("is_digital_only")?.unwrap_or(false),
                is_foil_only: fields.bool("is_foil_only")?.unwrap_or(false),
                is_foreign_only: fields.bool("is_foreign_only")?.unwrap_or(false),
                is_nonfoil_only: fields.bool("is_nonfoil_only")?.unwrap_or(false),
                is_paper_only: fields.bool("is_paper_only")?.unwrap_or(false),
                is_preview: fields.bool("is_preview")?.unwrap_or(false),
            },
        })
    }
}

/// A set symbol and the rarities it is drawn in
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SymbolSet {
    /// Uppercase symbol code, the entity key
    pub code: String,
    /// Code of the symbol this one aliases
    pub parent: Option<String>,
    /// Sorted rarity codes, e.g. `["C", "M", "R", "U", "WM"]`
    pub supported: Vec<String>,
}

impl SymbolSet {
    pub fn from_fields(key: &str, fields: &FieldMap) -> Result<Self, EntityError> {
        let mut supported: Vec<String> = fields
            .list("supported")?
            .unwrap_or_default()
            .into_iter()
            .map(|r| r.to_uppercase())
            .collect();
        supported.sort();
        supported.dedup();

        Ok(SymbolSet {
            code: key.to_uppercase(),
            parent: fields.text("parent")?.map(|p| p.to_uppercase()),
            supported,
        })
    }

    /// Code whose asset directory holds this symbol's artwork
    pub fn alias(&self) -> &str {
        self.parent.as_deref().unwrap_or(&self.code)
    }

    pub fn supports_watermark(&self) -> bool {
        self.supported.iter().any(|r| r == WATERMARK_RARITY)
    }
}

/// A watermark symbol, optionally owned by a set symbol
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SymbolWatermark {
    /// Lowercase watermark name, the entity key
    pub name: String,
    /// Set symbol code when this is a set watermark
    pub parent: Option<String>,
}

impl SymbolWatermark {
    pub fn from_fields(key: &str, fields: &FieldMap) -> Result<Self, EntityError> {
        Ok(SymbolWatermark {
            name: key.to_lowercase(),
            parent: fields.text("parent")?.map(|p| p.to_uppercase()),
        })
    }
}

/// Any persisted entity
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "data", rename_all = "snake_case")]
pub enum CanonicalEntity {
    Set(Set),
    SymbolSet(SymbolSet),
    SymbolWatermark(SymbolWatermark),
}

impl CanonicalEntity {
    pub fn from_fields(kind: EntityKind, key: &str, fields: &FieldMap) -> Result<Self, EntityError> {
        Ok(match kind {
            EntityKind::Set => CanonicalEntity::Set(Set::from_fields(key, fields)?),
            EntityKind::SymbolSet => CanonicalEntity::SymbolSet(SymbolSet::from_fields(key, fields)?),
            EntityKind::SymbolWatermark => {
                CanonicalEntity::SymbolWatermark(SymbolWatermark::from_fields(key, fields)?)
            }
        })
    }

    pub fn kind(&self) -> EntityKind {
        match self {
            CanonicalEntity::Set(_) => EntityKind::Set,
            CanonicalEntity::SymbolSet(_) => EntityKind::SymbolSet,
            CanonicalEntity::SymbolWatermark(_) => EntityKind::SymbolWatermark,
        }
    }

    pub fn key(&self) -> &str {
        match self {
            CanonicalEntity::Set(s) => &s.code,
            CanonicalEntity::SymbolSet(s) => &s.code,
            CanonicalEntity::SymbolWatermark(w) => &w.name,
        }
    }

    /// Recompute the content fingerprint from the current fields
    pub fn fingerprint(&self) -> Result<String, serde_json::Error> {
        fingerprint_of(self)
    }

    pub fn as_set(&self) -> Option<&Set> {
        match self {
            CanonicalEntity::Set(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_symbol_set(&self) -> Option<&SymbolSet> {
        match self {
            CanonicalEntity::SymbolSet(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_symbol_watermark(&self) -> Option<&SymbolWatermark> {
        match self {
            CanonicalEntity::SymbolWatermark(w) => Some(w),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn mh2_fields() -> FieldMap {
        FieldMap::new()
            .with("name", "Modern Horizons 2")
            .with("date_released", "2021-06-18")
            .with("type", "draft_innovation")
            .with("count_cards", 303i64)
            .with("is_foil_only", false)
            .with("code_keyrune", "MH2")
    }

    #[test]
    fn set_from_fields_applies_sentinels() {
        let fields = FieldMap::new()
            .with("name", "Alpha")
            .with("date_released", "1993-08-05");

        let set = Set::from_fields("LEA", &fields).unwrap();
        assert_eq!(set.code, "lea");
        assert_eq!(set.set_type, DEFAULT_SET_TYPE);
        assert_eq!(set.count_cards, 0);
        assert_eq!(set.count_printed, None);
        assert_eq!(set.flags, SetFlags::default());
    }

    #[test]
    fn token_sets_count_cards_as_tokens() {
        let fields = FieldMap::new()
            .with("name", "Modern Horizons 2 Tokens")
            .with("date_released", "2021-06-18")
            .with("type", "token")
            .with("count_cards", 17i64);

        let set = Set::from_fields("tmh2", &fields).unwrap();
        assert_eq!(set.count_tokens, 17);

        // A reported token count does not override the set's own cards
        let with_reported = fields.with("count_tokens", 3i64);
        let set = Set::from_fields("tmh2", &with_reported).unwrap();
        assert_eq!(set.count_tokens, 17);
    }

    #[test]
    fn other_sets_take_reported_token_count() {
        let fields = mh2_fields().with("count_tokens", 21i64).with("id_cardsphere", 1234i64);
        let set = Set::from_fields("mh2", &fields).unwrap();
        assert_eq!(set.count_tokens, 21);
        assert_eq!(set.id_cardsphere, Some(1234));

        let set = Set::from_fields("mh2", &mh2_fields()).unwrap();
        assert_eq!(set.count_tokens, 0);
    }

    #[test]
    fn set_requires_name_and_release_date() {
        let fields = FieldMap::new().with("name", "Nameless Date");
        assert_eq!(
            Set::from_fields("xxx", &fields),
            Err(EntityError::MissingField("date_released".to_string()))
        );
    }

    #[test]
    fn fingerprint_is_stable_and_content_sensitive() {
        let a = CanonicalEntity::from_fields(EntityKind::Set, "mh2", &mh2_fields()).unwrap();
        let b = CanonicalEntity::from_fields(EntityKind::Set, "mh2", &mh2_fields()).unwrap();
        assert_eq!(a.fingerprint().unwrap(), b.fingerprint().unwrap());

        let changed = mh2_fields().with("count_cards", 304i64);
        let c = CanonicalEntity::from_fields(EntityKind::Set, "mh2", &changed).unwrap();
        assert_ne!(a.fingerprint().unwrap(), c.fingerprint().unwrap());
    }

    #[test]
    fn fingerprint_survives_json_round_trip() {
        let entity = CanonicalEntity::from_fields(EntityKind::Set, "mh2", &mh2_fields()).unwrap();
        let json = serde_json::to_string(&entity).unwrap();
        let restored: CanonicalEntity = serde_json::from_str(&json).unwrap();
        assert_eq!(restored.fingerprint().unwrap(), entity.fingerprint().unwrap());
    }

    #[test]
    fn symbol_rarities_are_normalized() {
        let fields = FieldMap::new().with(
            "supported",
            vec!["u".to_string(), "C".to_string(), "wm".to_string(), "C".to_string()],
        );
        let symbol = SymbolSet::from_fields("mh2", &fields).unwrap();
        assert_eq!(symbol.code, "MH2");
        assert_eq!(symbol.supported, vec!["C", "U", "WM"]);
        assert!(symbol.supports_watermark());
        assert_eq!(symbol.alias(), "MH2");
    }

    #[test]
    fn alias_symbol_points_at_parent() {
        let fields = FieldMap::new()
            .with("parent", "mh2")
            .with("supported", vec!["C".to_string()]);
        let symbol = SymbolSet::from_fields("H1R", &fields).unwrap();
        assert_eq!(symbol.alias(), "MH2");
        assert!(!symbol.supports_watermark());
    }

    #[test]
    fn entity_key_and_kind() {
        let wm = CanonicalEntity::from_fields(
            EntityKind::SymbolWatermark,
            "SetMH2",
            &FieldMap::new().with("parent", "MH2"),
        )
        .unwrap();
        assert_eq!(wm.kind(), EntityKind::SymbolWatermark);
        assert_eq!(wm.key(), "setmh2");
        assert_eq!(wm.as_symbol_watermark().unwrap().parent.as_deref(), Some("MH2"));
        assert!(wm.as_set().is_none());
    }
}
