//! JSON/bytes conversion helpers for handler payloads
//!
//! Package `content` is opaque bytes; handlers that speak JSON inside it
//! can go through these instead of repeating the serde plumbing.

use serde::Serialize;
use serde::de::DeserializeOwned;

/// Encode any serializable value to JSON bytes
pub fn json_to_bytes<T: Serialize>(value: &T) -> anyhow::Result<Vec<u8>> {
    Ok(serde_json::to_vec(value)?)
}

/// Decode JSON bytes into any deserializable value
pub fn bytes_to_json<T: DeserializeOwned>(data: &[u8]) -> anyhow::Result<T> {
    Ok(serde_json::from_slice(data)?)
}
