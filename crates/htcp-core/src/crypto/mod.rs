//! Session crypto
//!
//! A connection that negotiates encryption runs the Diffie-Hellman
//! exchange in [`dh`] and then encrypts every frame payload through a
//! [`RecordCipher`].
//!
//! The exchange is unauthenticated and the record layer carries no MAC;
//! an active attacker can man-in-the-middle the handshake and ciphertexts
//! are malleable. That is the wire format HTCP speaks — the layer is a
//! confidentiality envelope, not a TLS replacement.

pub mod dh;

pub use dh::{DhExchange, DhInit, DhReply};

use crate::{Error, Result};
use aes::cipher::generic_array::GenericArray;
use aes::cipher::{BlockDecryptMut, BlockEncryptMut, KeyIvInit, block_padding::Pkcs7};
use hkdf::Hkdf;
use rand::RngCore;
use rand::rngs::OsRng;
use sha2::Sha256;

type Aes256CbcEnc = cbc::Encryptor<aes::Aes256>;
type Aes256CbcDec = cbc::Decryptor<aes::Aes256>;

const AES_BLOCK_SIZE: usize = 16;

/// HKDF info label binding the derived key to this protocol
const KEY_INFO: &[u8] = b"htcp-aes-key";

/// AES-256-CBC record layer keyed from the DH shared secret
///
/// Only a completed [`DhExchange::derive`] produces one, so encrypting
/// before key agreement is not expressible.
pub struct RecordCipher {
    key: [u8; 32],
}

impl RecordCipher {
    /// Derive the session key from the raw shared secret
    pub(crate) fn from_shared_secret(shared: &[u8]) -> Result<Self> {
        let hk = Hkdf::<Sha256>::new(None, shared);
        let mut key = [0u8; 32];
        hk.expand(KEY_INFO, &mut key)
            .map_err(|_| Error::crypto("HKDF expand failed"))?;
        Ok(Self { key })
    }

    /// Encrypt a record: PKCS#7 pad, fresh random IV, `IV || ciphertext`
    pub fn encrypt(&self, plaintext: &[u8]) -> Result<Vec<u8>> {
        let mut iv = [0u8; AES_BLOCK_SIZE];
        OsRng.fill_bytes(&mut iv);

        // PKCS7 padded size: next multiple of 16
        let padded_len = (plaintext.len() / AES_BLOCK_SIZE + 1) * AES_BLOCK_SIZE;
        let mut buf = vec![0u8; padded_len];
        buf[..plaintext.len()].copy_from_slice(plaintext);

        let ciphertext = Aes256CbcEnc::new((&self.key).into(), (&iv).into())
            .encrypt_padded_mut::<Pkcs7>(&mut buf, plaintext.len())
            .map_err(|_| Error::crypto("record padding failed"))?;

        let mut out = Vec::with_capacity(AES_BLOCK_SIZE + ciphertext.len());
        out.extend_from_slice(&iv);
        out.extend_from_slice(ciphertext);
        Ok(out)
    }

    /// Decrypt a record, validating block alignment and PKCS#7 padding
    pub fn decrypt(&self, data: &[u8]) -> Result<Vec<u8>> {
        if data.len() < AES_BLOCK_SIZE {
            return Err(Error::crypto("ciphertext shorter than one IV"));
        }

        let (iv, ciphertext) = data.split_at(AES_BLOCK_SIZE);
        if ciphertext.is_empty() || ciphertext.len() % AES_BLOCK_SIZE != 0 {
            return Err(Error::crypto(format!(
                "ciphertext of {} bytes is not a whole number of blocks",
                ciphertext.len()
            )));
        }

        let mut buf = ciphertext.to_vec();
        let plaintext = Aes256CbcDec::new((&self.key).into(), GenericArray::from_slice(iv))
            .decrypt_padded_mut::<Pkcs7>(&mut buf)
            .map_err(|_| Error::crypto("invalid record padding"))?;

        Ok(plaintext.to_vec())
    }
}
