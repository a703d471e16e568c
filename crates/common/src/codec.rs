use serde::de::DeserializeOwned;
use serde::Serialize;

#[derive(Debug, thiserror::Error)]
pub enum CodecError {
    #[error("failed to serialize signal value: {0}")]
    Serialize(serde_json::Error),
    #[error("failed to deserialize signal value: {0}")]
    Deserialize(serde_json::Error),
}

/// Encode a signal value into the string form handed to providers
pub fn serialize<T: Serialize + ?Sized>(value: &T) -> Result<String, CodecError> {
    serde_json::to_string(value).map_err(CodecError::Serialize)
}

/// Decode a string received from a provider back into a signal value
pub fn deserialize<T: DeserializeOwned>(serialized: &str) -> Result<T, CodecError> {
    serde_json::from_str(serialized).map_err(CodecError::Deserialize)
}
