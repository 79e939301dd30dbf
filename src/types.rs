use serde::{de::DeserializeOwned, Serialize};
use serde_json::Value as JsonValue;

use crate::RequestError;

/// A decoded response body.
#[derive(Clone, Debug, Default, PartialEq, Serialize)]
#[serde(untagged)]
pub enum Payload {
    /// `204 No Content` or an empty body. Serializes as `null`.
    #[default]
    Empty,
    Json(JsonValue),
    /// Non-JSON body, returned verbatim.
    Text(String),
}

impl Payload {
    pub fn is_empty(&self) -> bool {
        matches!(self, Payload::Empty)
    }

    pub fn as_json(&self) -> Option<&JsonValue> {
        match self {
            Payload::Json(value) => Some(value),
            _ => None,
        }
    }

    pub fn as_text(&self) -> Option<&str> {
        match self {
            Payload::Text(text) => Some(text),
            _ => None,
        }
    }

    /// Deserializes the payload into `T`.
    ///
    /// An empty payload is treated as JSON `null`, so `Option<T>` targets
    /// accept it. Text payloads and shape mismatches yield
    /// [`RequestError::Decode`].
    pub fn json<T: DeserializeOwned>(self) -> Result<T, RequestError> {
        let value = match self {
            Payload::Empty => JsonValue::Null,
            Payload::Json(value) => value,
            Payload::Text(_) => return Err(RequestError::Decode),
        };
        serde_json::from_value(value).map_err(|_err| {
            #[cfg(feature = "tracing")]
            tracing::debug!(error = %_err, "payload did not match the requested type");
            RequestError::Decode
        })
    }
}

/// A request body.
#[derive(Clone, Debug, PartialEq)]
pub enum Body {
    /// Serialized with `serde_json` before sending.
    Json(JsonValue),
    /// Sent verbatim.
    Text(String),
}

impl Body {
    /// Serializes any `Serialize` value into a JSON body.
    pub fn json<T: Serialize + ?Sized>(value: &T) -> serde_json::Result<Self> {
        serde_json::to_value(value).map(Body::Json)
    }

    pub(crate) fn into_text(self) -> String {
        match self {
            Body::Json(value) => value.to_string(),
            Body::Text(text) => text,
        }
    }
}

impl From<JsonValue> for Body {
    fn from(value: JsonValue) -> Self {
        Body::Json(value)
    }
}

impl From<String> for Body {
    fn from(value: String) -> Self {
        Body::Text(value)
    }
}

impl From<&str> for Body {
    fn from(value: &str) -> Self {
        Body::Text(value.to_owned())
    }
}
