use serde::{Deserialize, de::DeserializeOwned};
use serde_json::Value;

/// Standard response wrapper used by the peer services.
#[derive(Debug, Clone, Deserialize)]
pub struct ApiResponse<T> {
    pub success: bool,

    #[serde(default)]
    pub data: Option<T>,

    #[serde(default)]
    pub error: Option<String>,

    #[serde(default)]
    pub message: String,
}

/// Decodes `T` from either a bare body or an `ApiResponse<T>` envelope.
pub fn unwrap_envelope<T: DeserializeOwned>(body: Value) -> Result<T, serde_json::Error> {
    let is_envelope = body
        .as_object()
        .is_some_and(|object| object.contains_key("success") && object.contains_key("data"));

    if !is_envelope {
        return serde_json::from_value(body);
    }

    let envelope: ApiResponse<Value> = serde_json::from_value(body)?;
    serde_json::from_value(envelope.data.unwrap_or(Value::Null))
}
