//! MTGJSON set adapter
//!
//! Reads `SetList.json`, where `data` is a list of set summaries, or
//! `AllPrintings.json`, where `data` maps set codes to full sets. Only the
//! full sets carry `tokens` and `cardsphereSetId`.

use super::{check_date, decode, require, ParseError, ParsedPayload, RecordSink};
use mtg_common::{EntityKind, FieldMap, IntermediateRecord, SourceId};
use std::collections::BTreeMap;
use serde::de::IgnoredAny;
use serde::Deserialize;

const SOURCE: SourceId = SourceId::Mtgjson;

#[derive(Debug, Deserialize)]
struct SetListFile {
    meta: Option<Meta>,
    data: Option<SetData>,
}

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum SetData {
    List(Vec<MtgjsonSet>),
    ByCode(BTreeMap<String, MtgjsonSet>),
}

impl SetData {
    fn into_sets(self) -> Vec<MtgjsonSet> {
        match self {
            SetData::List(sets) => sets,
            SetData::ByCode(sets) => sets.into_values().collect(),
        }
    }
}

#[derive(Debug, Deserialize)]
struct Meta {
    version: Option<String>,
}

/// One `SetList` entry, camelCase as published
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MtgjsonSet {
    pub code: Option<String>,
    pub name: Option<String>,
    #[serde(rename = "type")]
    pub set_type: Option<String>,
    pub release_date: Option<String>,
    pub block: Option<String>,
    pub base_set_size: Option<i64>,
    pub cardsphere_set_id: Option<i64>,
    #[serde(rename = "codeV3")]
    pub code_v3: Option<String>,
    pub keyrune_code: Option<String>,
    pub mcm_id: Option<i64>,
    pub mcm_id_extras: Option<i64>,
    pub mcm_name: Option<String>,
    pub mtgo_code: Option<String>,
    pub parent_code: Option<String>,
    pub tcgplayer_group_id: Option<i64>,
    pub total_set_size: Option<i64>,
    pub is_online_only: Option<bool>,
    pub is_foil_only: Option<bool>,
    pub is_non_foil_only: Option<bool>,
    pub is_foreign_only: Option<bool>,
    pub is_paper_only: Option<bool>,
    pub is_partial_preview: Option<bool>,
    /// Only present in full set files
    pub tokens: Option<Vec<IgnoredAny>>,
}

impl MtgjsonSet {
    fn into_record(self) -> Result<IntermediateRecord, ParseError> {
        let code = require(self.code, SOURCE, "<unknown>", "code")?.to_lowercase();
        let name = require(self.name, SOURCE, &code, "name")?;
        let released = require(self.release_date, SOURCE, &code, "releaseDate")?;
        let released = check_date(SOURCE, &code, Some(released))?;

        let fields = FieldMap::new()
            .with("name", name)
            .with("type", self.set_type)
            .with("date_released", released)
            .with("block", self.block)
            .with("code_alt", self.code_v3.map(|c| c.to_lowercase()))
            .with("code_keyrune", self.keyrune_code.map(|c| c.to_lowercase()))
            .with("code_mtgo", self.mtgo_code.map(|c| c.to_lowercase()))
            .with("code_parent", self.parent_code.map(|c| c.to_lowercase()))
            .with("count_cards", self.total_set_size)
            .with("count_printed", self.base_set_size)
            .with("count_tokens", self.tokens.map(|t| t.len() as i64))
            .with("id_cardsphere", self.cardsphere_set_id)
            .with("id_cardmarket", self.mcm_id)
            .with("id_cardmarket_extras", self.mcm_id_extras)
            .with("id_tcgplayer", self.tcgplayer_group_id)
            .with("name_cardmarket", self.mcm_name)
            .with("is_digital_only", self.is_online_only)
            .with("is_foil_only", self.is_foil_only)
            .with("is_nonfoil_only", self.is_non_foil_only)
            .with("is_foreign_only", self.is_foreign_only)
            .with("is_paper_only", self.is_paper_only)
            .with("is_preview", self.is_partial_preview);

        Ok(IntermediateRecord::new(SOURCE, EntityKind::Set, code, fields))
    }
}

/// Parse a set list or full printings payload. Reports `meta.version` as
/// the upstream version.
pub fn parse(body: &[u8]) -> Result<ParsedPayload, ParseError> {
    let file: SetListFile = decode(SOURCE, body)?;
    let data = file.data.ok_or_else(|| ParseError::Envelope {
        source_id: SOURCE,
        message: "missing 'data'".to_string(),
    })?;
    let version = file.meta.and_then(|m| m.version);

    let mut sink = RecordSink::new(SOURCE);
    for set in data.into_sets() {
        sink.push(set.into_record()?)?;
    }
    Ok(sink.finish(version))
}

#[cfg(test)]
mod tests {
    use super::*;
    use mtg_common::FieldValue;

    const SET_LIST: &str = r#"{
        "meta": {"date": "2024-03-01", "version": "5.2.2+20240301"},
        "data": [
            {
                "code": "MH2",
                "name": "Modern Horizons 2",
                "type": "draft_innovation",
                "releaseDate": "2021-06-18",
                "baseSetSize": 303,
                "totalSetSize": 491,
                "keyruneCode": "MH2",
                "mcmId": 3911,
                "mcmName": "Modern Horizons 2",
                "tcgplayerGroupId": 2791,
                "isFoilOnly": false,
                "isOnlineOnly": false
            },
            {
                "code": "PMH2",
                "name": "Modern Horizons 2 Promos",
                "type": "promo",
                "releaseDate": "2021-06-18",
                "parentCode": "MH2",
                "isPartialPreview": true
            }
        ]
    }"#;

    #[test]
    fn parses_sets_and_meta_version() {
        let parsed = parse(SET_LIST.as_bytes()).unwrap();
        assert_eq!(parsed.upstream_version.as_deref(), Some("5.2.2+20240301"));
        assert_eq!(parsed.count(EntityKind::Set), 2);

        let mh2 = &parsed.records[0];
        assert_eq!(mh2.key, "mh2");
        assert_eq!(mh2.fields.get("count_cards"), Some(&FieldValue::Int(491)));
        assert_eq!(mh2.fields.get("count_printed"), Some(&FieldValue::Int(303)));
        assert_eq!(mh2.fields.get("id_cardmarket"), Some(&FieldValue::Int(3911)));
        assert_eq!(
            mh2.fields.get("code_keyrune"),
            Some(&FieldValue::Text("mh2".into()))
        );
        // The set list carries no token data
        assert!(mh2.fields.get("count_tokens").is_none());
        assert!(mh2.fields.get("id_cardsphere").is_none());

        let promos = &parsed.records[1];
        assert_eq!(
            promos.fields.get("code_parent"),
            Some(&FieldValue::Text("mh2".into()))
        );
        assert_eq!(promos.fields.get("is_preview"), Some(&FieldValue::Bool(true)));
    }

    #[test]
    fn full_sets_report_tokens_and_cardsphere_id() {
        let body = br#"{
            "meta": {"version": "5.2.2"},
            "data": {
                "MH2": {
                    "code": "MH2",
                    "name": "Modern Horizons 2",
                    "releaseDate": "2021-06-18",
                    "baseSetSize": 303,
                    "cardsphereSetId": 1521,
                    "cards": [{"name": "Ragavan, Nimble Pilferer", "number": "138"}],
                    "tokens": [{"name": "Construct"}, {"name": "Treasure"}]
                },
                "TMH2": {
                    "code": "TMH2",
                    "name": "Modern Horizons 2 Tokens",
                    "type": "token",
                    "releaseDate": "2021-06-18",
                    "tokens": []
                }
            }
        }"#;
        let parsed = parse(body).unwrap();
        assert_eq!(parsed.count(EntityKind::Set), 2);

        let mh2 = parsed.records.iter().find(|r| r.key == "mh2").unwrap();
        assert_eq!(mh2.fields.get("count_tokens"), Some(&FieldValue::Int(2)));
        assert_eq!(mh2.fields.get("id_cardsphere"), Some(&FieldValue::Int(1521)));
        assert_eq!(mh2.fields.get("count_printed"), Some(&FieldValue::Int(303)));
    }

    #[test]
    fn missing_release_date_rejects_payload() {
        let body = br#"{"meta": {}, "data": [{"code": "abc", "name": "Alpha Beta"}]}"#;
        let err = parse(body).unwrap_err();
        assert!(matches!(
            err,
            ParseError::MissingField { field: "releaseDate", .. }
        ));
    }

    #[test]
    fn missing_data_is_unexpected_envelope() {
        let err = parse(br#"{"meta": {"version": "5.2.2"}}"#).unwrap_err();
        assert!(matches!(err, ParseError::Envelope { .. }));
    }

    #[test]
    fn duplicate_codes_differing_in_case_reject_payload() {
        let body = br#"{"data": [
            {"code": "abc", "name": "A", "releaseDate": "2020-01-01"},
            {"code": "ABC", "name": "A", "releaseDate": "2020-01-01"}
        ]}"#;
        assert!(matches!(parse(body), Err(ParseError::DuplicateKey { .. })));
    }
}
