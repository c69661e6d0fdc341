use serde::de::DeserializeOwned;
use serde_json::{Map, Value};

use crate::error::{classify_engine_error, VaultError, VaultResult};

/// Normalized `data` of an engine reply.
///
/// The engine answers with an object, a bare string or an array. Strings are
/// exposed under `"value"` and arrays under `"array"`, so every caller reads
/// a map.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Response(Map<String, Value>);

impl Response {
    /// Normalizes a raw `data` value.
    #[must_use]
    pub fn from_data(data: Option<Value>) -> Self {
        let map = match data {
            None | Some(Value::Null) => Map::new(),
            Some(Value::Object(map)) => map,
            Some(Value::String(s)) => Map::from_iter([("value".to_string(), Value::String(s))]),
            Some(Value::Array(items)) => {
                Map::from_iter([("array".to_string(), Value::Array(items))])
            }
            Some(other) => Map::from_iter([("value".to_string(), other)]),
        };
        Self(map)
    }

    /// Returns `true` when the engine sent no data.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Raw field access.
    #[must_use]
    pub fn get(&self, key: &str) -> Option<&Value> {
        self.0.get(key)
    }

    /// String field, if present and a string.
    #[must_use]
    pub fn get_str(&self, key: &str) -> Option<&str> {
        self.0.get(key).and_then(Value::as_str)
    }

    /// Boolean field; anything but `true` reads as `false`.
    #[must_use]
    pub fn flag(&self, key: &str) -> bool {
        self.0.get(key).and_then(Value::as_bool).unwrap_or(false)
    }

    /// First of `keys` holding a string.
    #[must_use]
    pub fn first_str(&self, keys: &[&str]) -> Option<&str> {
        keys.iter().find_map(|key| self.get_str(key))
    }

    /// First of `keys` holding an array.
    #[must_use]
    pub fn first_array(&self, keys: &[&str]) -> Option<&Vec<Value>> {
        keys.iter()
            .find_map(|key| self.0.get(*key).and_then(Value::as_array))
    }

    /// Decodes the whole map into `T`.
    ///
    /// # Errors
    ///
    /// Returns [`VaultError::Serialization`] if the data does not match.
    pub fn decode<T: DeserializeOwned>(&self) -> VaultResult<T> {
        Ok(serde_json::from_value(Value::Object(self.0.clone()))?)
    }

    /// Consumes the response and returns the map.
    #[must_use]
    pub fn into_map(self) -> Map<String, Value> {
        self.0
    }
}

/// Parses one reply frame.
///
/// An empty frame is an empty response. A present, non-null `error` fails
/// the call and is classified through the lock matcher.
pub(crate) fn parse_reply(frame: &[u8]) -> VaultResult<Response> {
    if frame.iter().all(u8::is_ascii_whitespace) {
        return Ok(Response::default());
    }
    let value: Value = serde_json::from_slice(frame)
        .map_err(|e| VaultError::EngineError(format!("failed to parse reply: {e}")))?;
    let Value::Object(mut reply) = value else {
        return Err(VaultError::EngineError(
            "reply is not a JSON object".to_string(),
        ));
    };

    match reply.remove("error") {
        None | Some(Value::Null) => {}
        Some(Value::String(message)) => return Err(classify_engine_error(message)),
        Some(other) => return Err(classify_engine_error(other.to_string())),
    }

    Ok(Response::from_data(reply.remove("data")))
}
