//! MTG Vectors manifest adapter
//!
//! The manifest lists every set symbol with the rarities it is drawn in,
//! set-code aliases pointing at another symbol, and named watermarks:
//!
//! ```json
//! {
//!   "meta": {"version": "2024.03.01"},
//!   "set": {"symbols": {"MH2": ["C", "U", "R", "M", "WM"]}, "routes": {"PMH2": "MH2"}},
//!   "watermark": {"symbols": ["abzan", "phyrexian"]}
//! }
//! ```
//!
//! Every set symbol (alias or not) that supports the `WM` rarity also yields
//! a watermark named `set<code>` owned by that symbol.

use super::{decode, ParseError, ParsedPayload, RecordSink};
use mtg_common::entity::WATERMARK_RARITY;
use mtg_common::{EntityKind, FieldMap, IntermediateRecord, SourceId};
use serde::Deserialize;
use std::collections::{BTreeMap, HashSet};

const SOURCE: SourceId = SourceId::Vectors;

#[derive(Debug, Deserialize)]
struct Manifest {
    meta: Option<Meta>,
    set: Option<SetSection>,
    #[serde(default)]
    watermark: WatermarkSection,
}

#[derive(Debug, Deserialize)]
struct Meta {
    version: Option<String>,
}

#[derive(Debug, Deserialize)]
struct SetSection {
    symbols: BTreeMap<String, Vec<String>>,
    #[serde(default, alias = "routes")]
    aliases: BTreeMap<String, String>,
}

#[derive(Debug, Default, Deserialize)]
struct WatermarkSection {
    #[serde(default)]
    symbols: Vec<String>,
}

fn symbol_record(code: &str, parent: Option<&str>, rarities: &[String]) -> IntermediateRecord {
    let supported: Vec<String> = rarities.iter().map(|r| r.to_uppercase()).collect();
    let fields = FieldMap::new()
        .with("parent", parent.map(str::to_uppercase))
        .with("supported", supported);
    IntermediateRecord::new(SOURCE, EntityKind::SymbolSet, code.to_uppercase(), fields)
}

fn watermark_record(name: &str, parent: Option<&str>) -> IntermediateRecord {
    let fields = FieldMap::new().with("parent", parent.map(str::to_uppercase));
    IntermediateRecord::new(SOURCE, EntityKind::SymbolWatermark, name.to_lowercase(), fields)
}

fn supports_watermark(rarities: &[String]) -> bool {
    rarities.iter().any(|r| r.eq_ignore_ascii_case(WATERMARK_RARITY))
}

/// Parse the symbol manifest. Reports `meta.version` as the upstream version.
pub fn parse(body: &[u8]) -> Result<ParsedPayload, ParseError> {
    let manifest: Manifest = decode(SOURCE, body)?;
    let set = manifest.set.ok_or_else(|| ParseError::Envelope {
        source_id: SOURCE,
        message: "missing 'set' section".to_string(),
    })?;
    let version = manifest.meta.and_then(|m| m.version);

    let mut sink = RecordSink::new(SOURCE);
    let mut set_watermarks: BTreeMap<String, String> = BTreeMap::new();
    let known: HashSet<String> = set.symbols.keys().map(|c| c.to_uppercase()).collect();

    for (code, rarities) in &set.symbols {
        sink.push(symbol_record(code, None, rarities))?;
        if supports_watermark(rarities) {
            set_watermarks.insert(format!("set{}", code.to_lowercase()), code.to_uppercase());
        }
    }

    // Aliases borrow their parent's rarities; an alias shadowed by a real
    // symbol or pointing at a missing one is skipped
    for (alias, parent) in &set.aliases {
        let Some(rarities) = set
            .symbols
            .iter()
            .find(|(code, _)| code.eq_ignore_ascii_case(parent))
            .map(|(_, rarities)| rarities)
        else {
            log::debug!("Skipping symbol alias {} -> {}: parent not in manifest", alias, parent);
            continue;
        };
        if known.contains(&alias.to_uppercase()) {
            log::debug!("Skipping symbol alias {}: already a symbol", alias);
            continue;
        }
        sink.push(symbol_record(alias, Some(parent), rarities))?;
        if supports_watermark(rarities) {
            set_watermarks.insert(format!("set{}", alias.to_lowercase()), alias.to_uppercase());
        }
    }

    let mut named = HashSet::new();
    for name in &manifest.watermark.symbols {
        let name = name.to_lowercase();
        if !named.insert(name.clone()) {
            return Err(ParseError::DuplicateKey {
                source_id: SOURCE,
                kind: EntityKind::SymbolWatermark,
                key: name,
            });
        }
        // A set watermark of the same name carries the parent link
        if !set_watermarks.contains_key(&name) {
            sink.push(watermark_record(&name, None))?;
        }
    }
    for (name, parent) in &set_watermarks {
        sink.push(watermark_record(name, Some(parent)))?;
    }

    Ok(sink.finish(version))
}

#[cfg(test)]
mod tests {
    use super::*;
    use mtg_common::FieldValue;

    const MANIFEST: &str = r#"{
        "meta": {"version": "2024.03.01", "date": "2024-03-01"},
        "set": {
            "symbols": {
                "MH2": ["C", "U", "R", "M", "WM"],
                "LEA": ["C", "U", "R"]
            },
            "routes": {
                "PMH2": "MH2",
                "LEA": "LEB",
                "XYZ": "NOPE"
            }
        },
        "watermark": {"symbols": ["abzan", "Phyrexian"]}
    }"#;

    fn find<'a>(parsed: &'a ParsedPayload, kind: EntityKind, key: &str) -> Option<&'a IntermediateRecord> {
        parsed.records.iter().find(|r| r.kind == kind && r.key == key)
    }

    #[test]
    fn parses_symbols_and_version() {
        let parsed = parse(MANIFEST.as_bytes()).unwrap();
        assert_eq!(parsed.upstream_version.as_deref(), Some("2024.03.01"));

        let mh2 = find(&parsed, EntityKind::SymbolSet, "MH2").unwrap();
        assert!(mh2.fields.get("parent").is_none());
        assert_eq!(
            mh2.fields.get("supported"),
            Some(&FieldValue::List(vec![
                "C".into(),
                "U".into(),
                "R".into(),
                "M".into(),
                "WM".into()
            ]))
        );
    }

    #[test]
    fn aliases_resolve_to_existing_parents_only() {
        let parsed = parse(MANIFEST.as_bytes()).unwrap();
        assert_eq!(parsed.count(EntityKind::SymbolSet), 3);

        let alias = find(&parsed, EntityKind::SymbolSet, "PMH2").unwrap();
        assert_eq!(alias.fields.get("parent"), Some(&FieldValue::Text("MH2".into())));

        // LEA is a real symbol, XYZ points nowhere
        assert!(find(&parsed, EntityKind::SymbolSet, "LEA")
            .unwrap()
            .fields
            .get("parent")
            .is_none());
        assert!(find(&parsed, EntityKind::SymbolSet, "XYZ").is_none());
    }

    #[test]
    fn watermark_capable_symbols_yield_set_watermarks() {
        let parsed = parse(MANIFEST.as_bytes()).unwrap();

        let set_wm = find(&parsed, EntityKind::SymbolWatermark, "setmh2").unwrap();
        assert_eq!(set_wm.fields.get("parent"), Some(&FieldValue::Text("MH2".into())));
        assert!(find(&parsed, EntityKind::SymbolWatermark, "setpmh2").is_some());
        assert!(find(&parsed, EntityKind::SymbolWatermark, "setlea").is_none());

        let named = find(&parsed, EntityKind::SymbolWatermark, "phyrexian").unwrap();
        assert!(named.fields.get("parent").is_none());
        assert_eq!(parsed.count(EntityKind::SymbolWatermark), 4);
    }

    #[test]
    fn missing_set_section_is_unexpected_envelope() {
        let err = parse(br#"{"meta": {"version": "1"}, "watermark": {"symbols": []}}"#).unwrap_err();
        assert!(matches!(err, ParseError::Envelope { .. }));
    }

    #[test]
    fn duplicate_symbol_codes_reject_payload() {
        let body = br#"{"set": {"symbols": {"mh2": ["C"], "MH2": ["C"]}}}"#;
        assert!(matches!(parse(body), Err(ParseError::DuplicateKey { .. })));

        let body = br#"{"set": {"symbols": {}}, "watermark": {"symbols": ["abzan", "ABZAN"]}}"#;
        assert!(matches!(parse(body), Err(ParseError::DuplicateKey { .. })));
    }

    #[test]
    fn wrongly_typed_rarities_are_malformed() {
        let body = br#"{"set": {"symbols": {"MH2": "C,U,R"}}}"#;
        assert!(matches!(parse(body), Err(ParseError::Malformed { .. })));
    }
}
