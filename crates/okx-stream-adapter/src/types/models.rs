/*
[INPUT]:  Order book push payloads
[OUTPUT]: Typed Rust structs with serialization support
[POS]:    Data layer - book snapshot/delta wire types
[UPDATE]: When book payload schema changes
*/

use serde::{Deserialize, Deserializer, Serialize};

/// `action` field of book pushes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BookAction {
    Snapshot,
    Update,
}

impl BookAction {
    /// Parse the optional action string carried by a push
    pub fn from_wire(action: Option<&str>) -> Option<Self> {
        match action {
            Some("snapshot") => Some(BookAction::Snapshot),
            Some("update") => Some(BookAction::Update),
            _ => None,
        }
    }
}

/// One raw price level: `[price, size, deprecated, orderCount]`, strings kept verbatim.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WireLevel(pub Vec<String>);

impl WireLevel {
    pub fn price(&self) -> Option<&str> {
        self.0.first().map(String::as_str)
    }

    pub fn size(&self) -> Option<&str> {
        self.0.get(1).map(String::as_str)
    }

    pub fn order_count(&self) -> Option<u32> {
        self.0.get(3).and_then(|v| v.parse().ok())
    }
}

/// One element of a book push `data` array.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BookData {
    #[serde(default)]
    pub asks: Vec<WireLevel>,
    #[serde(default)]
    pub bids: Vec<WireLevel>,
    #[serde(default, deserialize_with = "de_u64_str")]
    pub ts: u64,
    #[serde(default)]
    pub checksum: Option<i32>,
    #[serde(default)]
    pub prev_seq_id: Option<i64>,
    #[serde(default)]
    pub seq_id: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub inst_id: Option<String>,
}

// Timestamps arrive as decimal strings; tolerate numbers too.
fn de_u64_str<'de, D>(deserializer: D) -> Result<u64, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(match serde_json::Value::deserialize(deserializer)? {
        serde_json::Value::String(s) => s.parse().unwrap_or(0),
        serde_json::Value::Number(n) => n.as_u64().unwrap_or(0),
        _ => 0,
    })
}
