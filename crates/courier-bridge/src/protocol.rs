//! Frames of the JSON bridge protocol.
//!
//! Outbound operations are built from [`ClientOp`]; inbound text is parsed
//! into [`ServerOp`].  Only the subset the dashboard needs is modelled;
//! anything else parses as [`ServerOp::Other`].

use courier_types::BridgeError;
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Bus service that lists currently published channels.
pub const TOPICS_SERVICE: &str = "/rosapi/topics";

/// Operations the dashboard sends to the bridge.
#[derive(Debug, Serialize)]
#[serde(tag = "op", rename_all = "snake_case")]
pub enum ClientOp<'a> {
    Advertise {
        id: &'a str,
        topic: &'a str,
        #[serde(rename = "type")]
        msg_type: &'a str,
    },
    Unadvertise {
        id: &'a str,
        topic: &'a str,
    },
    Subscribe {
        id: &'a str,
        topic: &'a str,
        #[serde(rename = "type")]
        msg_type: &'a str,
        throttle_rate: u64,
        queue_length: usize,
    },
    Unsubscribe {
        id: &'a str,
        topic: &'a str,
    },
    Publish {
        topic: &'a str,
        msg: &'a Value,
    },
    CallService {
        id: &'a str,
        service: &'a str,
    },
}

impl ClientOp<'_> {
    pub fn to_frame(&self) -> Result<String, BridgeError> {
        serde_json::to_string(self).map_err(|e| BridgeError::Protocol(e.to_string()))
    }
}

/// Operations the bridge sends to the dashboard.
#[derive(Debug, Deserialize, PartialEq)]
#[serde(tag = "op", rename_all = "snake_case")]
pub enum ServerOp {
    /// A message on a subscribed channel.
    Publish { topic: String, msg: Value },
    ServiceResponse {
        #[serde(default)]
        id: Option<String>,
        #[serde(default)]
        values: Value,
        #[serde(default = "default_result")]
        result: bool,
    },
    Status {
        #[serde(default)]
        level: Option<String>,
        #[serde(default)]
        msg: Option<String>,
    },
    #[serde(other)]
    Other,
}

fn default_result() -> bool {
    true
}

pub fn parse_frame(text: &str) -> Result<ServerOp, BridgeError> {
    serde_json::from_str(text).map_err(|e| BridgeError::Protocol(format!("unparseable frame: {e}")))
}

/// Extract the channel names from a topic-listing service reply.
pub fn topics_from_listing(values: &Value) -> Result<Vec<String>, BridgeError> {
    let topics = values
        .get("topics")
        .and_then(Value::as_array)
        .ok_or_else(|| BridgeError::Protocol("topic listing has no 'topics' array".into()))?;
    Ok(topics
        .iter()
        .filter_map(|t| t.as_str().map(str::to_string))
        .collect())
}
