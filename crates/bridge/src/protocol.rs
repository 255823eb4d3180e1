//! Client protocol message types
//!
//! The JSON shape spoken by DevTools frontends. Field names here are the
//! wire contract; keep them byte-for-byte.

use serde::de::Error as _;
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::{Map, Value};

use crate::error::BridgeError;

/// Request ID - client-issued or adapter-issued, never both
pub type RequestId = u64;

/// `{id, method, params}`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CDPRequest {
    pub id: RequestId,
    pub method: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub params: Option<Value>,
}

/// `{id, result}` or `{id, error}`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CDPResponse {
    pub id: RequestId,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<ProtocolError>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProtocolError {
    pub code: i64,
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
}

/// `{method, params}` - no id
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CDPEvent {
    pub method: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub params: Option<Value>,
}

/// Unified message (request, response, or event)
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum Message {
    Request(CDPRequest),
    Response(CDPResponse),
    Event(CDPEvent),
}

impl Message {
    pub fn request(id: RequestId, method: impl Into<String>, params: Option<Value>) -> Self {
        Message::Request(CDPRequest {
            id,
            method: method.into(),
            params,
        })
    }

    pub fn result(id: RequestId, result: Value) -> Self {
        Message::Response(CDPResponse {
            id,
            result: Some(result),
            error: None,
        })
    }

    pub fn error(id: RequestId, code: i64, message: impl Into<String>) -> Self {
        Message::Response(CDPResponse {
            id,
            result: None,
            error: Some(ProtocolError {
                code,
                message: message.into(),
                data: None,
            }),
        })
    }

    pub fn event(method: impl Into<String>, params: Option<Value>) -> Self {
        Message::Event(CDPEvent {
            method: method.into(),
            params,
        })
    }

    pub fn id(&self) -> Option<RequestId> {
        match self {
            Message::Request(r) => Some(r.id),
            Message::Response(r) => Some(r.id),
            Message::Event(_) => None,
        }
    }

    pub fn method(&self) -> Option<&str> {
        match self {
            Message::Request(r) => Some(&r.method),
            Message::Response(_) => None,
            Message::Event(e) => Some(&e.method),
        }
    }

    pub fn from_json(text: &str) -> serde_json::Result<Self> {
        serde_json::from_str(text)
    }

    pub fn to_json(&self) -> serde_json::Result<String> {
        serde_json::to_string(self)
    }

    /// Classify a decoded JSON object: id+method is a request, id alone a
    /// response, method alone an event.
    pub fn from_value(value: Value) -> serde_json::Result<Self> {
        let Value::Object(object) = value else {
            return Err(serde_json::Error::custom("message is not a JSON object"));
        };
        let has_id = object.get("id").is_some_and(|id| !id.is_null());
        let has_method = object.contains_key("method");

        let value = Value::Object(object);
        match (has_id, has_method) {
            (true, true) => serde_json::from_value(value).map(Message::Request),
            (true, false) => serde_json::from_value(value).map(Message::Response),
            (false, true) => serde_json::from_value(value).map(Message::Event),
            (false, false) => Err(serde_json::Error::custom(
                "message has neither id nor method",
            )),
        }
    }
}

impl<'de> Deserialize<'de> for Message {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let value = Value::deserialize(deserializer)?;
        Message::from_value(value).map_err(D::Error::custom)
    }
}

/// `params` as a mutable object, replacing anything that is not one
pub fn params_mut(params: &mut Option<Value>) -> crate::error::Result<&mut Map<String, Value>> {
    let value = params.get_or_insert_with(|| Value::Object(Map::new()));
    if !value.is_object() {
        *value = Value::Object(Map::new());
    }
    value
        .as_object_mut()
        .ok_or_else(|| BridgeError::Malformed("params is not an object".to_string()))
}
