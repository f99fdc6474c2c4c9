//! Tag events as published on the wire
//!
//! Schema (field order insignificant):
//! `{"tag_id":"04a1223f","tipo":"NFC","timestamp":1234,"nfc_data":"0102...10"}`
//! - `tipo` is `RFID` or `NFC`
//! - `timestamp` is milliseconds since node boot, not wall-clock
//! - `nfc_data` (32 hex chars) is present only when `tipo` is `NFC`

use crate::domain::types::{RawRead, BLOCK_LEN};
use anyhow::{bail, Context};
use serde::{Deserialize, Serialize};

/// Identifier-only tag vs tag whose memory block was read
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum TagKind {
    Rfid,
    Nfc,
}

impl TagKind {
    pub fn as_str(&self) -> &str {
        match self {
            TagKind::Rfid => "RFID",
            TagKind::Nfc => "NFC",
        }
    }
}

/// Canonical event for one accepted tag read
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TagEvent {
    pub tag_id: String,
    #[serde(rename = "tipo")]
    pub kind: TagKind,
    #[serde(rename = "timestamp")]
    pub observed_at: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub nfc_data: Option<String>,
}

/// Convert a raw read into its event. `observed_at` is the node-relative
/// timestamp captured by the caller.
pub fn normalize(raw: &RawRead, observed_at: u64) -> TagEvent {
    let nfc_data = raw.memory_block.as_ref().map(hex::encode);
    let kind = if nfc_data.is_some() { TagKind::Nfc } else { TagKind::Rfid };

    TagEvent { tag_id: raw.uid.to_hex(), kind, observed_at, nfc_data }
}

impl TagEvent {
    pub fn to_json(&self) -> serde_json::Result<String> {
        serde_json::to_string(self)
    }

    /// Decode a wire document, rejecting events that break the schema
    /// invariants (kind/nfc_data mismatch, non-hex ids).
    pub fn from_json(payload: &[u8]) -> anyhow::Result<Self> {
        let event: TagEvent =
            serde_json::from_slice(payload).context("tag event is not valid JSON")?;

        if event.tag_id.is_empty() || event.tag_id.len() % 2 != 0 || !is_lower_hex(&event.tag_id)
        {
            bail!("invalid tag_id {:?}", event.tag_id);
        }

        match (event.kind, &event.nfc_data) {
            (TagKind::Rfid, None) => {}
            (TagKind::Nfc, Some(data)) if data.len() == BLOCK_LEN * 2 && is_lower_hex(data) => {}
            (TagKind::Nfc, Some(data)) => bail!("invalid nfc_data {:?}", data),
            (TagKind::Nfc, None) => bail!("NFC event without nfc_data"),
            (TagKind::Rfid, Some(_)) => bail!("RFID event carries nfc_data"),
        }

        Ok(event)
    }
}

fn is_lower_hex(s: &str) -> bool {
    s.bytes().all(|b| b.is_ascii_digit() || (b'a'..=b'f').contains(&b))
}
