/*
[INPUT]:  Operation reply items
[OUTPUT]: Typed Rust response structs with serialization support
[POS]:    Data layer - per-item acknowledgements of correlated operations
[UPDATE]: When reply schema changes or new types added
*/

use serde::{Deserialize, Serialize};

/// Per-item acknowledgement of place/cancel/amend operations.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OrderAck {
    #[serde(default)]
    pub ord_id: String,
    #[serde(default)]
    pub cl_ord_id: String,
    #[serde(default)]
    pub tag: String,
    #[serde(default)]
    pub req_id: String,
    #[serde(default)]
    pub ts: String,
    pub s_code: String,
    #[serde(default)]
    pub s_msg: String,
}

impl OrderAck {
    pub fn is_success(&self) -> bool {
        self.s_code == "0"
    }
}

/// Item of a mass-cancel reply.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MassCancelAck {
    pub result: bool,
}
