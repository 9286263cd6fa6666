//! Scryfall `/sets` adapter
//!
//! Scryfall answers with a list object: `{"object": "list", "data": [...]}`.
//! Its values take priority for most set fields.

use super::{check_date, decode, require, ParseError, ParsedPayload, RecordSink};
use mtg_common::{EntityKind, FieldMap, IntermediateRecord, SourceId};
use serde::Deserialize;

const SOURCE: SourceId = SourceId::Scryfall;

/// Scryfall list response
#[derive(Debug, Deserialize)]
pub struct ScryfallList {
    pub object: String,
    #[serde(default)]
    pub data: Vec<ScryfallSet>,
}

/// One entry of the Scryfall set list
#[derive(Debug, Deserialize)]
pub struct ScryfallSet {
    pub code: Option<String>,
    pub name: Option<String>,
    pub set_type: Option<String>,
    pub released_at: Option<String>,
    pub id: Option<String>,
    pub block: Option<String>,
    pub block_code: Option<String>,
    pub arena_code: Option<String>,
    pub mtgo_code: Option<String>,
    pub parent_set_code: Option<String>,
    pub card_count: Option<i64>,
    pub printed_size: Option<i64>,
    pub tcgplayer_id: Option<i64>,
    pub icon_svg_uri: Option<String>,
    #[serde(default)]
    pub digital: Option<bool>,
    #[serde(default)]
    pub foil_only: Option<bool>,
    #[serde(default)]
    pub nonfoil_only: Option<bool>,
}

impl ScryfallSet {
    /// Icon URI without Scryfall's cache-busting query string
    pub fn icon_uri(&self) -> Option<String> {
        self.icon_svg_uri
            .as_deref()
            .map(|uri| uri.split('?').next().unwrap_or(uri).to_string())
    }

    fn into_record(self) -> Result<IntermediateRecord, ParseError> {
        let code = require(self.code.clone(), SOURCE, "<unknown>", "code")?.to_lowercase();
        let name = require(self.name.clone(), SOURCE, &code, "name")?;
        let released = check_date(SOURCE, &code, self.released_at.clone())?;
        let icon = self.icon_uri();

        let fields = FieldMap::new()
            .with("name", name)
            .with("type", self.set_type)
            .with("date_released", released)
            .with("id", self.id)
            .with("block", self.block)
            .with("block_code", self.block_code.map(|c| c.to_lowercase()))
            .with("code_arena", self.arena_code.map(|c| c.to_lowercase()))
            .with("code_mtgo", self.mtgo_code.map(|c| c.to_lowercase()))
            .with("code_parent", self.parent_set_code.map(|c| c.to_lowercase()))
            .with("count_cards", self.card_count)
            .with("count_printed", self.printed_size)
            .with("id_tcgplayer", self.tcgplayer_id)
            .with("icon_svg_uri", icon)
            .with("is_digital_only", self.digital)
            .with("is_foil_only", self.foil_only)
            .with("is_nonfoil_only", self.nonfoil_only);

        Ok(IntermediateRecord::new(SOURCE, EntityKind::Set, code, fields))
    }
}

/// Parse a Scryfall set list payload
pub fn parse(body: &[u8]) -> Result<ParsedPayload, ParseError> {
    let list: ScryfallList = decode(SOURCE, body)?;
    if list.object != "list" {
        return Err(ParseError::Envelope {
            source_id: SOURCE,
            message: format!("expected object 'list', found '{}'", list.object),
        });
    }

    let mut sink = RecordSink::new(SOURCE);
    for set in list.data {
        sink.push(set.into_record()?)?;
    }
    Ok(sink.finish(None))
}

#[cfg(test)]
#[path = "scryfall_tests.rs"]
mod tests;
