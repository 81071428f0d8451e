use serde_json::Value;

#[derive(Debug, thiserror::Error)]
pub enum CodecError {
    #[error("stored JSON is corrupt: {0}")]
    Corrupt(#[source] serde_json::Error),
    #[error("value could not be encoded as JSON: {0}")]
    Encode(#[source] serde_json::Error),
}

/// Encode a column value as JSON text. `None` stays SQL NULL.
pub fn encode(value: Option<&Value>) -> Result<Option<String>, CodecError> {
    value
        .map(serde_json::to_string)
        .transpose()
        .map_err(CodecError::Encode)
}

/// Decode JSON text read from a column. NULL stays `None`.
pub fn decode(text: Option<&str>) -> Result<Option<Value>, CodecError> {
    text.map(serde_json::from_str)
        .transpose()
        .map_err(CodecError::Corrupt)
}
