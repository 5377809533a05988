//! Login cryptography: nonce handling, key derivation and the RC4 stream cipher.
//!
//! The key schedule is fixed by the legacy client:
//!
//! ```text
//! h1  = SHA1(UTF-16LE(password))
//! h2  = SHA1(h1 || nonce[32..64])
//! key = h2[0..16]
//! ```

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use rand::Rng;
use rc4::consts::U16;
use rc4::{KeyInit, Rc4, StreamCipher};
use sha1::{Digest, Sha1};
use zeroize::{Zeroize, ZeroizeOnDrop};

use crate::error::{constants, ProtocolError, Result};

/// Total nonce length in bytes
pub const NONCE_LEN: usize = 64;
/// Length of each nonce half
pub const NONCE_HALF_LEN: usize = NONCE_LEN / 2;
/// Derived cipher key length
pub const CIPHER_KEY_LEN: usize = 16;

/// Per-connection handshake nonce.
///
/// `nc1` (bytes 0..32) is sent to the client; `nc2` (bytes 32..64) never
/// leaves the server and only feeds key derivation.
#[derive(Clone, Zeroize, ZeroizeOnDrop)]
pub struct Nonce([u8; NONCE_LEN]);

impl Nonce {
    /// Generate a nonce from the operating system RNG
    pub fn generate() -> Result<Self> {
        let mut bytes = [0u8; NONCE_LEN];
        getrandom::fill(&mut bytes).map_err(|e| {
            ProtocolError::HandshakeError(format!("{}: {e}", constants::ERR_RANDOM_SOURCE))
        })?;
        Ok(Self(bytes))
    }

    pub fn from_bytes(bytes: [u8; NONCE_LEN]) -> Self {
        Self(bytes)
    }

    pub fn from_slice(bytes: &[u8]) -> Result<Self> {
        let bytes: [u8; NONCE_LEN] = bytes
            .try_into()
            .map_err(|_| ProtocolError::HandshakeError(constants::ERR_NONCE_LENGTH.into()))?;
        Ok(Self(bytes))
    }

    /// Transmitted half
    pub fn nc1(&self) -> &[u8] {
        &self.0[..NONCE_HALF_LEN]
    }

    /// Secret half
    pub fn nc2(&self) -> &[u8] {
        &self.0[NONCE_HALF_LEN..]
    }

    /// Base64 of the transmitted half, as carried in the `nc` field
    pub fn challenge(&self) -> String {
        BASE64.encode(self.nc1())
    }
}

impl std::fmt::Debug for Nonce {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("Nonce(..)")
    }
}

/// SHA-1 over the UTF-16LE encoding of the password
pub fn password_hash(password: &str) -> [u8; 20] {
    let mut hasher = Sha1::new();
    for unit in password.encode_utf16() {
        hasher.update(unit.to_le_bytes());
    }
    hasher.finalize().into()
}

/// Derive the 16-byte RC4 key for a password and nonce
pub fn derive_key(password: &str, nonce: &Nonce) -> [u8; CIPHER_KEY_LEN] {
    let mut first = password_hash(password);

    let mut hasher = Sha1::new();
    hasher.update(first);
    hasher.update(nonce.nc2());
    let mut second: [u8; 20] = hasher.finalize().into();

    let mut key = [0u8; CIPHER_KEY_LEN];
    key.copy_from_slice(&second[..CIPHER_KEY_LEN]);

    first.zeroize();
    second.zeroize();
    key
}

/// Apply the RC4 keystream in place. Encryption and decryption are the same operation.
pub fn rc4_apply(key: &[u8; CIPHER_KEY_LEN], data: &mut [u8]) -> Result<()> {
    let mut cipher = Rc4::<U16>::new_from_slice(key)
        .map_err(|_| ProtocolError::HandshakeError(constants::ERR_INVALID_KEY_LENGTH.into()))?;
    cipher.apply_keystream(data);
    Ok(())
}

pub fn decode_base64(text: &str) -> Result<Vec<u8>> {
    BASE64.decode(text.trim()).map_err(|e| {
        ProtocolError::DecodeError(format!("{}: {e}", constants::ERR_INVALID_RESPONSE_ENCODING))
    })
}

pub fn encode_base64(bytes: &[u8]) -> String {
    BASE64.encode(bytes)
}

/// Random positive session key (fits a signed 32-bit field on the client)
pub fn generate_session_key() -> u32 {
    rand::rng().random_range(1..=i32::MAX as u32)
}
