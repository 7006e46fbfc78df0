/*
[INPUT]:  Raw WebSocket text frames
[OUTPUT]: Classified frames (control event, data push, operation reply) and outbound requests
[POS]:    WebSocket layer - framing codec, no business semantics
[UPDATE]: When adding new message shapes or changing the envelope format
*/

use serde::de::DeserializeOwned;
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value;

use crate::error::ItemFailure;
use crate::types::SubscriptionArg;

/// Application-level keepalive texts
pub const PING: &str = "ping";
pub const PONG: &str = "pong";

/// Server code announcing the connection will be closed for an upgrade
pub const RECONNECT_NOTICE_CODE: &str = "64008";

/// One classified inbound frame.
#[derive(Debug, Clone, PartialEq)]
pub enum Frame {
    Pong,
    Control(ControlEvent),
    Data(DataPush),
    Reply(OperationReply),
    Unrecognized,
}

impl Frame {
    /// Classify a text frame by shape.
    pub fn parse(text: &str) -> Result<Frame, serde_json::Error> {
        let text = text.trim();
        if text == PONG {
            return Ok(Frame::Pong);
        }

        let raw: RawFrame = serde_json::from_str(text)?;

        if let Some(event) = raw.event.filter(|event| !event.is_empty()) {
            return Ok(Frame::Control(ControlEvent {
                id: raw.id,
                event,
                code: raw.code,
                msg: raw.msg,
                arg: raw.arg.and_then(|arg| SubscriptionArg::deserialize(arg).ok()),
                conn_id: raw.conn_id,
            }));
        }

        if let Some(arg) = raw.arg.as_ref().filter(|arg| has_channel(arg)) {
            if let Some(Value::Array(data)) = raw.data {
                return Ok(match SubscriptionArg::deserialize(arg) {
                    Ok(arg) => Frame::Data(DataPush {
                        arg,
                        action: raw.action,
                        data,
                    }),
                    Err(_) => Frame::Unrecognized,
                });
            }
        }

        if let Some(op) = raw.op {
            let data = match raw.data {
                Some(Value::Array(items)) => items,
                _ => Vec::new(),
            };
            return Ok(Frame::Reply(OperationReply {
                id: raw.id.unwrap_or_default(),
                op,
                code: raw.code.unwrap_or_default(),
                msg: raw.msg.unwrap_or_default(),
                data,
                in_time: raw.in_time,
                out_time: raw.out_time,
            }));
        }

        Ok(Frame::Unrecognized)
    }
}

fn has_channel(arg: &Value) -> bool {
    arg.get("channel").and_then(Value::as_str).is_some()
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawFrame {
    #[serde(default)]
    id: Option<String>,
    #[serde(default)]
    event: Option<String>,
    #[serde(default, deserialize_with = "de_opt_string")]
    code: Option<String>,
    #[serde(default)]
    msg: Option<String>,
    #[serde(default)]
    arg: Option<Value>,
    #[serde(default)]
    action: Option<String>,
    #[serde(default)]
    data: Option<Value>,
    #[serde(default)]
    op: Option<String>,
    #[serde(default)]
    conn_id: Option<String>,
    #[serde(default)]
    in_time: Option<String>,
    #[serde(default)]
    out_time: Option<String>,
}

// Codes are strings on the wire, but tolerate bare numbers.
fn de_opt_string<'de, D>(deserializer: D) -> Result<Option<String>, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(match Option::<Value>::deserialize(deserializer)? {
        Some(Value::String(s)) => Some(s),
        Some(Value::Number(n)) => Some(n.to_string()),
        _ => None,
    })
}

/// Kind of a control event.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EventKind {
    Subscribe,
    Unsubscribe,
    Login,
    Error,
    Notice,
    ChannelConnCount,
    ChannelConnCountError,
    Other(String),
}

impl From<&str> for EventKind {
    fn from(value: &str) -> Self {
        match value {
            "subscribe" => EventKind::Subscribe,
            "unsubscribe" => EventKind::Unsubscribe,
            "login" => EventKind::Login,
            "error" => EventKind::Error,
            "notice" => EventKind::Notice,
            "channel-conn-count" => EventKind::ChannelConnCount,
            "channel-conn-count-error" => EventKind::ChannelConnCountError,
            other => EventKind::Other(other.to_string()),
        }
    }
}

/// `{"id"?, "event", "code"?, "msg"?, "arg"?}`
#[derive(Debug, Clone, PartialEq)]
pub struct ControlEvent {
    pub id: Option<String>,
    pub event: String,
    pub code: Option<String>,
    pub msg: Option<String>,
    pub arg: Option<SubscriptionArg>,
    pub conn_id: Option<String>,
}

impl ControlEvent {
    pub fn kind(&self) -> EventKind {
        EventKind::from(self.event.as_str())
    }

    /// Error events, or any event carrying a non-zero code
    pub fn is_error(&self) -> bool {
        if self.kind() == EventKind::Error {
            return true;
        }
        matches!(self.code.as_deref(), Some(code) if !code.is_empty() && code != "0")
            && self.kind() != EventKind::Notice
    }

    pub fn is_reconnect_notice(&self) -> bool {
        self.kind() == EventKind::Notice && self.code.as_deref() == Some(RECONNECT_NOTICE_CODE)
    }

    pub fn code_or_default(&self) -> String {
        self.code.clone().unwrap_or_default()
    }

    pub fn msg_or_default(&self) -> String {
        self.msg.clone().unwrap_or_default()
    }
}

/// `{"arg": {channel, ...}, "action"?, "data": [...]}`
#[derive(Debug, Clone, PartialEq)]
pub struct DataPush {
    pub arg: SubscriptionArg,
    pub action: Option<String>,
    pub data: Vec<Value>,
}

impl DataPush {
    /// Decode the data array into the payload type chosen for this channel
    pub fn decode<T: DeserializeOwned>(&self) -> Result<Vec<T>, serde_json::Error> {
        self.data.iter().map(T::deserialize).collect()
    }
}

/// `{"id", "op", "code", "msg", "data": [...], "inTime"?, "outTime"?}`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OperationReply {
    pub id: String,
    pub op: String,
    pub code: String,
    pub msg: String,
    #[serde(default)]
    pub data: Vec<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub in_time: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub out_time: Option<String>,
}

impl OperationReply {
    pub fn decode<T: DeserializeOwned>(&self) -> Result<Vec<T>, serde_json::Error> {
        self.data.iter().map(T::deserialize).collect()
    }

    /// Items whose `sCode` is present and not `"0"`
    pub fn item_failures(&self) -> Vec<ItemFailure> {
        self.data
            .iter()
            .enumerate()
            .filter_map(|(index, item)| {
                let code = item.get("sCode").and_then(Value::as_str)?;
                if code.is_empty() || code == "0" {
                    return None;
                }
                Some(ItemFailure {
                    index,
                    code: code.to_string(),
                    message: item
                        .get("sMsg")
                        .and_then(Value::as_str)
                        .unwrap_or_default()
                        .to_string(),
                })
            })
            .collect()
    }
}

/// Outbound envelope: `{"id"?, "op", "args": [...]}`.
#[derive(Debug, Serialize)]
pub struct Request<'a, A> {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub id: Option<&'a str>,
    pub op: &'a str,
    pub args: &'a [A],
}

impl<'a, A: Serialize> Request<'a, A> {
    pub fn new(id: Option<&'a str>, op: &'a str, args: &'a [A]) -> Self {
        Self { id, op, args }
    }

    pub fn subscribe(id: Option<&'a str>, args: &'a [A]) -> Self {
        Self::new(id, "subscribe", args)
    }

    pub fn unsubscribe(id: Option<&'a str>, args: &'a [A]) -> Self {
        Self::new(id, "unsubscribe", args)
    }

    pub fn login(args: &'a [A]) -> Self {
        Self::new(None, "login", args)
    }

    pub fn to_text(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }
}
