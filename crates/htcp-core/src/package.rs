//! Package structures and JSON serialization
//!
//! A `Package` is the sole application-level message. On the wire it is
//! the JSON payload of a frame, with `content` carried as standard-alphabet
//! padded Base64 so arbitrary bytes survive the trip.

use crate::frame::{FLAG_ENCRYPTED, FLAG_PASSKEY, FLAG_RESPONSE};
use crate::{Error, Result};
use base64::Engine as _;
use base64::engine::general_purpose::STANDARD as BASE64;
use serde::{Deserialize, Serialize};

/// Protocol version stamped into packages built without an explicit one
pub const PROTOCOL_VERSION: &str = "1.0";

/// Backward-compatibility identifier echoed through unchanged
pub const PROTOCOL_ID: u32 = 1;

/// Reserved transaction name of the passkey authentication package
pub const AUTH_TRANSACTION: &str = "_auth";

/// The HTCP application-level message
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Package {
    /// Logical operation name; the dispatch key. Never empty.
    pub transaction: String,

    /// Opaque handler input/output. HTCP never inspects it.
    pub content: Vec<u8>,

    /// Request-correlation identifier; responses copy the request's value
    pub uuid: String,

    /// `"host:port"` the server stamps into responses
    pub from_addr: Option<String>,

    pub protocol_version: String,
    pub protocol_id: u32,

    /// Transport-level auth token, carried only in the `_auth` package
    pub passkey: Option<String>,
}

/// Wire mirror of [`Package`]
///
/// `from` is always written (null when absent) and tolerated when
/// missing; `passkey` is omitted unless carried. Unknown keys are ignored
/// for forward compatibility.
#[derive(Serialize, Deserialize)]
struct PackageWire {
    protocol_version: String,
    protocol_id: u32,
    uuid: String,
    transaction: String,
    #[serde(rename = "from", default)]
    from_addr: Option<String>,
    content: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    passkey: Option<String>,
}

impl Package {
    /// Create a package with a fresh v4 uuid and the compiled-in
    /// protocol version pair
    pub fn new(transaction: impl Into<String>, content: Vec<u8>) -> Self {
        Self {
            transaction: transaction.into(),
            content,
            uuid: uuid::Uuid::new_v4().to_string(),
            from_addr: None,
            protocol_version: PROTOCOL_VERSION.to_string(),
            protocol_id: PROTOCOL_ID,
            passkey: None,
        }
    }

    /// Replace the correlation uuid
    pub fn with_uuid(mut self, uuid: impl Into<String>) -> Self {
        self.uuid = uuid.into();
        self
    }

    /// Attach a passkey (sets `FLAG_PASSKEY` when framed)
    pub fn with_passkey(mut self, passkey: impl Into<String>) -> Self {
        self.passkey = Some(passkey.into());
        self
    }

    /// Stamp the sender address
    pub fn with_from_addr(mut self, addr: impl Into<String>) -> Self {
        self.from_addr = Some(addr.into());
        self
    }

    /// Compute the flags byte for framing this package
    pub fn flags(&self, encrypted: bool, response: bool) -> u8 {
        let mut flags = 0;
        if encrypted {
            flags |= FLAG_ENCRYPTED;
        }
        if self.passkey.is_some() {
            flags |= FLAG_PASSKEY;
        }
        if response {
            flags |= FLAG_RESPONSE;
        }
        flags
    }

    /// Serialize to the JSON payload of a frame
    pub fn to_payload(&self) -> Result<Vec<u8>> {
        let wire = PackageWire {
            protocol_version: self.protocol_version.clone(),
            protocol_id: self.protocol_id,
            uuid: self.uuid.clone(),
            transaction: self.transaction.clone(),
            from_addr: self.from_addr.clone(),
            content: BASE64.encode(&self.content),
            passkey: self.passkey.clone(),
        };

        serde_json::to_vec(&wire)
            .map_err(|e| Error::protocol(format!("package serialization failed: {e}")))
    }

    /// Deserialize from the JSON payload of a frame
    pub fn from_payload(payload: &[u8]) -> Result<Self> {
        let wire: PackageWire = serde_json::from_slice(payload)
            .map_err(|e| Error::protocol(format!("malformed package payload: {e}")))?;

        if wire.transaction.is_empty() {
            return Err(Error::protocol("package transaction is empty"));
        }

        let content = BASE64
            .decode(&wire.content)
            .map_err(|e| Error::protocol(format!("malformed package content: {e}")))?;

        Ok(Self {
            transaction: wire.transaction,
            content,
            uuid: wire.uuid,
            from_addr: wire.from_addr,
            protocol_version: wire.protocol_version,
            protocol_id: wire.protocol_id,
            passkey: wire.passkey,
        })
    }
}

/// Build an error response package
///
/// The content is the UTF-8 encoding of `{"error": message}`; the uuid
/// echoes the failing request or is freshly minted when none was parsed.
pub fn create_error_package(
    transaction: &str,
    message: &str,
    request_uuid: Option<&str>,
) -> Package {
    let content = serde_json::json!({ "error": message }).to_string().into_bytes();

    let package = Package::new(transaction, content);
    match request_uuid {
        Some(uuid) => package.with_uuid(uuid),
        None => package,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_package_roundtrip() {
        let content: Vec<u8> = (0u16..=255).map(|b| b as u8).collect();
        let package = Package::new("echo", content).with_from_addr("127.0.0.1:9576");

        let payload = package.to_payload().unwrap();
        let parsed = Package::from_payload(&payload).unwrap();

        assert_eq!(parsed, package);
    }

    #[test]
    fn test_package_roundtrip_empty_content() {
        let package = Package::new("ping", vec![]);
        let parsed = Package::from_payload(&package.to_payload().unwrap()).unwrap();
        assert_eq!(parsed, package);
        assert!(parsed.content.is_empty());
    }

    #[test]
    fn test_package_roundtrip_passkey() {
        let package = Package::new("_auth", vec![]).with_passkey("secret");
        let parsed = Package::from_payload(&package.to_payload().unwrap()).unwrap();
        assert_eq!(parsed.passkey.as_deref(), Some("secret"));
    }

    #[test]
    fn test_defaults_applied() {
        let package = Package::new("echo", b"hi".to_vec());
        assert_eq!(package.protocol_version, PROTOCOL_VERSION);
        assert_eq!(package.protocol_id, PROTOCOL_ID);
        assert!(!package.uuid.is_empty());

        let other = Package::new("echo", b"hi".to_vec());
        assert_ne!(package.uuid, other.uuid);
    }

    #[test]
    fn test_passkey_omitted_from_wire_when_absent() {
        let payload = Package::new("echo", vec![]).to_payload().unwrap();
        let value: serde_json::Value = serde_json::from_slice(&payload).unwrap();
        assert!(value.get("passkey").is_none());
        // `from` is always present, null when unset
        assert!(value.get("from").unwrap().is_null());
    }

    #[test]
    fn test_unknown_fields_ignored() {
        let payload = br#"{
            "protocol_version": "1.0",
            "protocol_id": 1,
            "uuid": "u-1",
            "transaction": "echo",
            "from": null,
            "content": "aGVsbG8=",
            "future_field": [1, 2, 3]
        }"#;

        let package = Package::from_payload(payload).unwrap();
        assert_eq!(package.content, b"hello");
        assert_eq!(package.uuid, "u-1");
    }

    #[test]
    fn test_missing_uuid_rejected() {
        let payload = br#"{
            "protocol_version": "1.0",
            "protocol_id": 1,
            "transaction": "echo",
            "content": ""
        }"#;
        assert!(matches!(
            Package::from_payload(payload),
            Err(Error::Protocol(_))
        ));
    }

    #[test]
    fn test_empty_transaction_rejected() {
        let payload = br#"{
            "protocol_version": "1.0",
            "protocol_id": 1,
            "uuid": "u-1",
            "transaction": "",
            "content": ""
        }"#;
        assert!(matches!(
            Package::from_payload(payload),
            Err(Error::Protocol(_))
        ));
    }

    #[test]
    fn test_invalid_base64_rejected() {
        let payload = br#"{
            "protocol_version": "1.0",
            "protocol_id": 1,
            "uuid": "u-1",
            "transaction": "echo",
            "content": "!!!not-base64!!!"
        }"#;
        assert!(matches!(
            Package::from_payload(payload),
            Err(Error::Protocol(_))
        ));
    }

    #[test]
    fn test_flags_computation() {
        let plain = Package::new("echo", vec![]);
        assert_eq!(plain.flags(false, false), 0);
        assert_eq!(plain.flags(true, false), FLAG_ENCRYPTED);
        assert_eq!(plain.flags(false, true), FLAG_RESPONSE);

        let auth = Package::new("_auth", vec![]).with_passkey("k");
        assert_eq!(auth.flags(true, false), FLAG_ENCRYPTED | FLAG_PASSKEY);
    }

    #[test]
    fn test_error_package() {
        let package = create_error_package("nope", "Unknown transaction: nope", Some("u-9"));
        assert_eq!(package.transaction, "nope");
        assert_eq!(package.uuid, "u-9");

        let body: serde_json::Value = serde_json::from_slice(&package.content).unwrap();
        assert_eq!(body["error"], "Unknown transaction: nope");
    }

    #[test]
    fn test_error_package_mints_uuid_when_absent() {
        let package = create_error_package("broken", "boom", None);
        assert!(!package.uuid.is_empty());
    }
}
