//! Archive keys.
//!
//! An archive is identified by the public half of an ed25519 keypair. Whoever holds the
//! [`SecretKey`] is the owner of the archive and is the only party able to append to its
//! logs.

use std::{
    fmt::{self, Debug, Display},
    str::FromStr,
};

use ed25519_dalek::SigningKey;
use rand_core::{CryptoRngCore, OsRng};
use serde::{de, Deserialize, Deserializer, Serialize, Serializer};

/// The public identifier of an archive.
///
/// This is the raw 32 byte public key. It is not verified to be a valid curve point: remote
/// archives are addressed by whatever 32 bytes the user hands us, and it is the engine's job
/// to find peers for them (or not).
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ArchiveKey([u8; 32]);

impl ArchiveKey {
    /// The length of an archive key, in bytes.
    pub const LENGTH: usize = 32;

    /// Create a key from its raw bytes.
    pub const fn from_bytes(bytes: [u8; 32]) -> Self {
        Self(bytes)
    }

    /// Get the raw bytes of this key.
    pub fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }

    /// Encode as 64 lowercase hex characters.
    pub fn to_hex(&self) -> String {
        hex::encode(self.0)
    }

    /// Convert to a hex string limited to the first 5 bytes for a friendly string
    /// representation of the key.
    pub fn fmt_short(&self) -> String {
        hex::encode(&self.0[..5])
    }
}

impl AsRef<[u8]> for ArchiveKey {
    fn as_ref(&self) -> &[u8] {
        &self.0
    }
}

impl From<[u8; 32]> for ArchiveKey {
    fn from(value: [u8; 32]) -> Self {
        Self(value)
    }
}

impl Debug for ArchiveKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ArchiveKey({})", self.fmt_short())
    }
}

impl Display for ArchiveKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_hex())
    }
}

/// Error when parsing an [`ArchiveKey`] or a [`SecretKey`] from a string.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum KeyParsingError {
    /// The string was not 64 characters long.
    #[error("invalid key length: expected 64 hex characters, found {0}")]
    Length(usize),
    /// The string contained non-hex characters.
    #[error("invalid hex encoding")]
    Hex(#[from] hex::FromHexError),
}

impl FromStr for ArchiveKey {
    type Err = KeyParsingError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(Self(decode_hex32(s)?))
    }
}

fn decode_hex32(s: &str) -> Result<[u8; 32], KeyParsingError> {
    if s.len() != 64 {
        return Err(KeyParsingError::Length(s.len()));
    }
    let mut bytes = [0u8; 32];
    hex::decode_to_slice(s, &mut bytes)?;
    Ok(bytes)
}

impl Serialize for ArchiveKey {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        if serializer.is_human_readable() {
            serializer.serialize_str(&self.to_hex())
        } else {
            self.0.serialize(serializer)
        }
    }
}

impl<'de> Deserialize<'de> for ArchiveKey {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        if deserializer.is_human_readable() {
            let s = String::deserialize(deserializer)?;
            s.parse().map_err(de::Error::custom)
        } else {
            let bytes: [u8; 32] = Deserialize::deserialize(deserializer)?;
            Ok(Self(bytes))
        }
    }
}

/// The owner capability of an archive.
#[derive(Clone)]
pub struct SecretKey(SigningKey);

impl Debug for SecretKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "SecretKey({})", self.public().fmt_short())
    }
}

impl SecretKey {
    /// Generate a new key with the operating system's randomness.
    pub fn generate() -> Self {
        Self::generate_with_rng(&mut OsRng)
    }

    /// Generate a new key with a caller supplied rng.
    pub fn generate_with_rng<R: CryptoRngCore + ?Sized>(rng: &mut R) -> Self {
        Self(SigningKey::generate(rng))
    }

    /// The archive key this secret grants write access to.
    pub fn public(&self) -> ArchiveKey {
        ArchiveKey(self.0.verifying_key().to_bytes())
    }

    /// Create a secret key from its raw bytes.
    pub fn from_bytes(bytes: &[u8; 32]) -> Self {
        Self(SigningKey::from_bytes(bytes))
    }

    /// The raw secret bytes.
    pub fn to_bytes(&self) -> [u8; 32] {
        self.0.to_bytes()
    }

    /// Encode the secret as hex, for persisting it next to the archive.
    pub fn to_hex(&self) -> String {
        hex::encode(self.0.to_bytes())
    }
}

impl FromStr for SecretKey {
    type Err = KeyParsingError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(Self::from_bytes(&decode_hex32(s.trim())?))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn archive_key_hex_roundtrip() {
        let key = SecretKey::generate().public();
        let text = key.to_string();
        assert_eq!(text.len(), 64);
        assert_eq!(text.parse::<ArchiveKey>().unwrap(), key);
    }

    #[test]
    fn archive_key_accepts_any_bytes() {
        // not a valid curve point, but a perfectly fine address
        let key: ArchiveKey = "f".repeat(64).parse().unwrap();
        assert_eq!(key.as_bytes(), &[0xff; 32]);
    }

    #[test]
    fn archive_key_rejects_bad_input() {
        assert_eq!(
            "abcd".parse::<ArchiveKey>(),
            Err(KeyParsingError::Length(4))
        );
        assert!(matches!(
            "z".repeat(64).parse::<ArchiveKey>(),
            Err(KeyParsingError::Hex(_))
        ));
    }

    #[test]
    fn archive_key_serde() {
        let key = ArchiveKey::from_bytes([7u8; 32]);
        let json = serde_json::to_string(&key).unwrap();
        assert_eq!(json, format!("\"{}\"", "07".repeat(32)));
        let back: ArchiveKey = serde_json::from_str(&json).unwrap();
        assert_eq!(back, key);
    }

    #[test]
    fn secret_key_roundtrip() {
        let secret = SecretKey::generate();
        let parsed: SecretKey = secret.to_hex().parse().unwrap();
        assert_eq!(parsed.public(), secret.public());
        assert_eq!(parsed.to_bytes(), secret.to_bytes());
    }
}
