use serde::Deserialize;

/// A trace/span identifier as it appears on the wire: senders emit either a
/// ready-made hex string or a raw byte buffer; anything else is treated as
/// absent.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(untagged)]
pub enum RawId {
    Text(String),
    Bytes(Vec<u8>),
    Other(serde_json::Value),
}

impl RawId {
    pub fn from_bytes(bytes: Vec<u8>) -> Self {
        Self::Bytes(bytes)
    }
}

/// Canonical string form of a wire identifier. Strings pass through, byte
/// buffers render as lowercase hex, anything else yields the empty string.
/// Never fails.
pub fn decode_identifier(id: Option<&RawId>) -> String {
    match id {
        Some(RawId::Text(s)) => s.clone(),
        Some(RawId::Bytes(bytes)) => bytes.iter().map(|b| format!("{b:02x}")).collect(),
        Some(RawId::Other(_)) | None => String::new(),
    }
}
