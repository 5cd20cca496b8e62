//! Diffie-Hellman key agreement over the connection stream
//!
//! The server owns the group parameters: it sends `dh_init` with `(p, g)`
//! and its public value, the client answers `dh_reply` with its own.
//! Both messages travel in the raw length-prefixed handshake framing and
//! carry the integers as plain JSON numbers, which is why `serde_json`
//! runs with `arbitrary_precision` in this crate.

use super::RecordCipher;
use crate::{Error, Result};
use num_bigint::{BigUint, RandBigInt};
use rand::rngs::OsRng;
use serde_json::Value;

/// RFC 3526 Group 14: 2048-bit MODP prime
const MODP_2048_HEX: &str = concat!(
    "FFFFFFFFFFFFFFFFC90FDAA22168C234C4C6628B80DC1CD1",
    "29024E088A67CC74020BBEA63B139B22514A08798E3404DD",
    "EF9519B3CD3A431B302B0A6DF25F14374FE1356D6D51C245",
    "E485B576625E7EC6F44C42E9A637ED6B0BFF5CB6F406B7ED",
    "EE386BFB5A899FA5AE9F24117C4B1FE649286651ECE45B3D",
    "C2007CB8A163BF0598DA48361C55D39A69163FA8FD24CF5F",
    "83655D23DCA3AD961C62F356208552BB9ED529077096966D",
    "670C354E4ABC9804F1746C08CA18217C32905E462E36CE3B",
    "E39E772C180E86039B2783A2EC07A28FB5C55DF06F4C52C9",
    "DE2BCBF6955817183995497CEA956AE515D2261898FA0510",
    "15728E5A8AACAA68FFFFFFFFFFFFFFFF"
);

/// Generator for Group 14
const MODP_2048_G: u32 = 2;

/// Per-connection DH state machine
///
/// Progresses `Fresh → parameters set → keypair generated → derived`;
/// calls made before their prerequisite fail with [`Error::CryptoState`].
/// [`DhExchange::derive`] is the terminal step and yields the record
/// cipher for the rest of the session.
pub struct DhExchange {
    params: Option<(BigUint, BigUint)>,
    private_key: Option<BigUint>,
    public_key: Option<BigUint>,
}

impl DhExchange {
    pub fn new() -> Self {
        Self {
            params: None,
            private_key: None,
            public_key: None,
        }
    }

    /// Load the fixed RFC 3526 group and generate a keypair
    /// (parameter-owner role: the server)
    pub fn generate_parameters(&mut self) {
        let p = BigUint::parse_bytes(MODP_2048_HEX.as_bytes(), 16)
            .unwrap_or_else(|| unreachable!("RFC 3526 prime is valid hex"));
        let g = BigUint::from(MODP_2048_G);

        self.params = Some((p, g));
        self.generate_keys();
    }

    /// Accept peer-supplied parameters and generate a keypair
    /// (client role)
    pub fn load_parameters(&mut self, p: BigUint, g: BigUint) -> Result<()> {
        let two = BigUint::from(2u32);
        if p <= two || (&p % &two) == BigUint::from(0u32) {
            return Err(Error::crypto("DH modulus must be an odd prime"));
        }
        if g < two || g >= p {
            return Err(Error::crypto("DH generator out of range"));
        }

        self.params = Some((p, g));
        self.generate_keys();
        Ok(())
    }

    fn generate_keys(&mut self) {
        let Some((p, g)) = &self.params else {
            return;
        };

        let two = BigUint::from(2u32);
        let mut rng = OsRng;
        // Upper bound is exclusive; p - 1 makes the sampled range [2, p-2]
        let private = rng.gen_biguint_range(&two, &(p - 1u32));
        let public = g.modpow(&private, p);

        self.private_key = Some(private);
        self.public_key = Some(public);
    }

    /// The group parameters `(p, g)`
    pub fn params(&self) -> Result<(&BigUint, &BigUint)> {
        self.params
            .as_ref()
            .map(|(p, g)| (p, g))
            .ok_or(Error::CryptoState("parameters requested before they were set"))
    }

    /// The local public value `g^x mod p`
    pub fn public_value(&self) -> Result<&BigUint> {
        self.public_key
            .as_ref()
            .ok_or(Error::CryptoState("public value requested before key generation"))
    }

    /// Complete the agreement: validate the peer public value, compute
    /// the shared secret and derive the session cipher
    pub fn derive(&self, peer_public: &BigUint) -> Result<RecordCipher> {
        let (p, _) = self.params()?;
        let private = self
            .private_key
            .as_ref()
            .ok_or(Error::CryptoState("derive called before key generation"))?;

        let two = BigUint::from(2u32);
        if peer_public < &two || peer_public > &(p - &two) {
            return Err(Error::crypto("peer public value out of range"));
        }

        let shared = peer_public.modpow(private, p);

        // Fixed-width big-endian, left-padded to the modulus size, to
        // match how DH implementations serialize the shared secret.
        let width = (p.bits() as usize).div_ceil(8);
        let mut bytes = shared.to_bytes_be();
        if bytes.len() < width {
            let mut padded = vec![0u8; width - bytes.len()];
            padded.append(&mut bytes);
            bytes = padded;
        }

        RecordCipher::from_shared_secret(&bytes)
    }
}

impl Default for DhExchange {
    fn default() -> Self {
        Self::new()
    }
}

/// `dh_init`: group parameters plus the server's public value
pub struct DhInit {
    pub p: BigUint,
    pub g: BigUint,
    pub public: BigUint,
}

/// `dh_reply`: the client's public value
pub struct DhReply {
    pub public: BigUint,
}

impl DhInit {
    /// Build the init message from a parameter-owning exchange
    pub fn from_exchange(dh: &DhExchange) -> Result<Self> {
        let (p, g) = dh.params()?;
        Ok(Self {
            p: p.clone(),
            g: g.clone(),
            public: dh.public_value()?.clone(),
        })
    }

    pub fn to_bytes(&self) -> Result<Vec<u8>> {
        let msg = serde_json::json!({
            "type": "dh_init",
            "p": decimal_number(&self.p)?,
            "g": decimal_number(&self.g)?,
            "public": decimal_number(&self.public)?,
        });
        Ok(msg.to_string().into_bytes())
    }

    pub fn from_bytes(data: &[u8]) -> Result<Self> {
        let value = parse_handshake(data, "dh_init")?;
        Ok(Self {
            p: biguint_field(&value, "p")?,
            g: biguint_field(&value, "g")?,
            public: biguint_field(&value, "public")?,
        })
    }
}

impl DhReply {
    pub fn from_exchange(dh: &DhExchange) -> Result<Self> {
        Ok(Self {
            public: dh.public_value()?.clone(),
        })
    }

    pub fn to_bytes(&self) -> Result<Vec<u8>> {
        let msg = serde_json::json!({
            "type": "dh_reply",
            "public": decimal_number(&self.public)?,
        });
        Ok(msg.to_string().into_bytes())
    }

    pub fn from_bytes(data: &[u8]) -> Result<Self> {
        let value = parse_handshake(data, "dh_reply")?;
        Ok(Self {
            public: biguint_field(&value, "public")?,
        })
    }
}

/// Render a big integer as a lossless JSON number
fn decimal_number(n: &BigUint) -> Result<serde_json::Number> {
    serde_json::from_str(&n.to_str_radix(10))
        .map_err(|e| Error::crypto(format!("big integer not representable as JSON: {e}")))
}

fn parse_handshake(data: &[u8], expected_type: &str) -> Result<Value> {
    let value: Value = serde_json::from_slice(data)
        .map_err(|e| Error::protocol(format!("malformed handshake message: {e}")))?;

    match value.get("type").and_then(Value::as_str) {
        Some(t) if t == expected_type => Ok(value),
        Some(t) => Err(Error::protocol(format!(
            "expected {expected_type} handshake message, got {t}"
        ))),
        None => Err(Error::protocol("handshake message missing type tag")),
    }
}

fn biguint_field(value: &Value, key: &str) -> Result<BigUint> {
    match value.get(key) {
        Some(Value::Number(n)) => BigUint::parse_bytes(n.to_string().as_bytes(), 10)
            .ok_or_else(|| {
                Error::protocol(format!("handshake field '{key}' is not a positive integer"))
            }),
        _ => Err(Error::protocol(format!(
            "handshake message missing integer field '{key}'"
        ))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_both_sides_derive_same_key() {
        let mut server = DhExchange::new();
        server.generate_parameters();

        let init = DhInit::from_exchange(&server).unwrap();

        let mut client = DhExchange::new();
        client.load_parameters(init.p.clone(), init.g.clone()).unwrap();
        let client_cipher = client.derive(&init.public).unwrap();

        let reply = DhReply::from_exchange(&client).unwrap();
        let server_cipher = server.derive(&reply.public).unwrap();

        let record = server_cipher.encrypt(b"round and round it goes").unwrap();
        assert_eq!(
            client_cipher.decrypt(&record).unwrap(),
            b"round and round it goes"
        );

        let record = client_cipher.encrypt(b"and back again").unwrap();
        assert_eq!(server_cipher.decrypt(&record).unwrap(), b"and back again");
    }

    #[test]
    fn test_state_machine_ordering() {
        let dh = DhExchange::new();
        assert!(matches!(dh.params(), Err(Error::CryptoState(_))));
        assert!(matches!(dh.public_value(), Err(Error::CryptoState(_))));
        assert!(matches!(
            dh.derive(&BigUint::from(5u32)),
            Err(Error::CryptoState(_))
        ));
    }

    #[test]
    fn test_peer_public_range_checks() {
        let mut server = DhExchange::new();
        server.generate_parameters();
        let (p, _) = server.params().unwrap();
        let p = p.clone();

        for bad in [BigUint::from(0u32), BigUint::from(1u32), &p - 1u32, p.clone()] {
            assert!(matches!(server.derive(&bad), Err(Error::Crypto(_))));
        }
    }

    #[test]
    fn test_load_parameters_rejects_degenerate_groups() {
        let mut dh = DhExchange::new();
        // Even modulus
        assert!(dh
            .load_parameters(BigUint::from(100u32), BigUint::from(2u32))
            .is_err());
        // Generator outside the group
        let mut dh2 = DhExchange::new();
        assert!(dh2
            .load_parameters(BigUint::from(23u32), BigUint::from(23u32))
            .is_err());
    }

    #[test]
    fn test_handshake_message_roundtrip() {
        let mut server = DhExchange::new();
        server.generate_parameters();

        let init = DhInit::from_exchange(&server).unwrap();
        let parsed = DhInit::from_bytes(&init.to_bytes().unwrap()).unwrap();
        assert_eq!(parsed.p, init.p);
        assert_eq!(parsed.g, init.g);
        assert_eq!(parsed.public, init.public);

        let reply = DhReply { public: init.public.clone() };
        let parsed = DhReply::from_bytes(&reply.to_bytes().unwrap()).unwrap();
        assert_eq!(parsed.public, init.public);
    }

    #[test]
    fn test_big_integers_survive_json() {
        // A value wider than anything f64 could hold exactly
        let mut server = DhExchange::new();
        server.generate_parameters();
        let init = DhInit::from_exchange(&server).unwrap();
        assert!(init.p.bits() == 2048);

        let parsed = DhInit::from_bytes(&init.to_bytes().unwrap()).unwrap();
        assert_eq!(parsed.p.bits(), 2048);
        assert_eq!(parsed.p, init.p);
    }

    #[test]
    fn test_wrong_type_tag_rejected() {
        let data = br#"{"type":"dh_init","public":5}"#;
        assert!(matches!(
            DhReply::from_bytes(data),
            Err(Error::Protocol(_))
        ));

        let data = br#"{"public":5}"#;
        assert!(matches!(
            DhReply::from_bytes(data),
            Err(Error::Protocol(_))
        ));
    }

    #[test]
    fn test_missing_field_rejected() {
        let data = br#"{"type":"dh_reply"}"#;
        assert!(matches!(
            DhReply::from_bytes(data),
            Err(Error::Protocol(_))
        ));

        let data = br#"{"type":"dh_reply","public":"not-a-number"}"#;
        assert!(matches!(
            DhReply::from_bytes(data),
            Err(Error::Protocol(_))
        ));
    }
}
