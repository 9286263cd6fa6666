//! Tests for the Scryfall set list adapter

use super::*;
use mtg_common::FieldValue;

const MH2: &str = r#"{
    "object": "set",
    "id": "c1c7eb8c-f205-40ab-a609-767cb296544e",
    "code": "MH2",
    "mtgo_code": "mh2",
    "arena_code": "mh2",
    "tcgplayer_id": 2791,
    "name": "Modern Horizons 2",
    "set_type": "draft_innovation",
    "released_at": "2021-06-18",
    "card_count": 303,
    "printed_size": 303,
    "digital": false,
    "nonfoil_only": false,
    "foil_only": false,
    "icon_svg_uri": "https://svgs.scryfall.io/sets/mh2.svg?1700456400"
}"#;

fn list_of(sets: &[&str]) -> Vec<u8> {
    format!(r#"{{"object": "list", "has_more": false, "data": [{}]}}"#, sets.join(",")).into_bytes()
}

#[test]
fn test_parse_set_list() {
    let parsed = parse(&list_of(&[MH2])).unwrap();
    assert_eq!(parsed.records.len(), 1);
    assert!(parsed.upstream_version.is_none());

    let record = &parsed.records[0];
    assert_eq!(record.source, SourceId::Scryfall);
    assert_eq!(record.kind, EntityKind::Set);
    assert_eq!(record.key, "mh2");
    assert_eq!(
        record.fields.get("name"),
        Some(&FieldValue::Text("Modern Horizons 2".into()))
    );
    assert_eq!(
        record.fields.get("type"),
        Some(&FieldValue::Text("draft_innovation".into()))
    );
    assert_eq!(record.fields.get("count_cards"), Some(&FieldValue::Int(303)));
    assert_eq!(record.fields.get("id_tcgplayer"), Some(&FieldValue::Int(2791)));
    assert_eq!(record.fields.get("is_digital_only"), Some(&FieldValue::Bool(false)));
}

#[test]
fn test_icon_uri_query_is_stripped() {
    let parsed = parse(&list_of(&[MH2])).unwrap();
    assert_eq!(
        parsed.records[0].fields.get("icon_svg_uri"),
        Some(&FieldValue::Text("https://svgs.scryfall.io/sets/mh2.svg".into()))
    );
}

#[test]
fn test_minimal_set_leaves_optional_fields_absent() {
    let minimal = r#"{"code": "pmei", "name": "Media Inserts"}"#;
    let parsed = parse(&list_of(&[minimal])).unwrap();

    let fields = &parsed.records[0].fields;
    assert!(fields.get("date_released").is_none());
    assert!(fields.get("count_cards").is_none());
    assert!(fields.get("block").is_none());
}

#[test]
fn test_missing_code_rejects_payload() {
    let no_code = r#"{"name": "Nameless", "released_at": "2020-01-01"}"#;
    let err = parse(&list_of(&[MH2, no_code])).unwrap_err();
    assert!(matches!(err, ParseError::MissingField { field: "code", .. }));
}

#[test]
fn test_malformed_date_rejects_payload() {
    let bad_date = r#"{"code": "abc", "name": "Alpha Beta", "released_at": "June 2021"}"#;
    let err = parse(&list_of(&[bad_date])).unwrap_err();
    match err {
        ParseError::InvalidDate { key, value, .. } => {
            assert_eq!(key, "abc");
            assert_eq!(value, "June 2021");
        }
        other => panic!("unexpected error: {other}"),
    }
}

#[test]
fn test_duplicate_code_rejects_payload() {
    let upper = MH2;
    let lower = r#"{"code": "mh2", "name": "Modern Horizons 2", "released_at": "2021-06-18"}"#;
    let err = parse(&list_of(&[upper, lower])).unwrap_err();
    assert!(matches!(err, ParseError::DuplicateKey { .. }));
}

#[test]
fn test_error_object_is_unexpected_envelope() {
    let body = br#"{"object": "error", "code": "not_found", "status": 404}"#;
    let err = parse(body).unwrap_err();
    assert!(matches!(err, ParseError::Envelope { .. }));
}

#[test]
fn test_truncated_json_is_malformed() {
    let err = parse(br#"{"object": "list", "data": [{"code": "#).unwrap_err();
    assert!(matches!(err, ParseError::Malformed { .. }));
}
