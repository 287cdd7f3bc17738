//! Reversible obfuscation of sensitive values.
//!
//! This is a placeholder with the shape of an encryption API, not
//! encryption: values are XORed with a key derived from a passphrase and
//! base64-encoded behind a version tag. Swap in an AEAD before storing
//! anything that matters.

use crate::error::{Error, Result};
use base64::engine::general_purpose::STANDARD;
use base64::Engine;

/// Prefix carried by every encoded value.
pub const ENCODED_PREFIX: &str = "enc:v1:";

const KEY_LEN: usize = 32;

// Used when no passphrase is configured so that encoding still round-trips.
const FALLBACK_PASSPHRASE: &str = "dispatch-guard-development-key";

/// Codec for sensitive values.
#[derive(Clone)]
pub struct SensitiveDataCodec {
    key: [u8; KEY_LEN],
}

impl std::fmt::Debug for SensitiveDataCodec {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SensitiveDataCodec")
            .field("key", &"<hidden>")
            .finish()
    }
}

impl SensitiveDataCodec {
    /// Create a codec from a passphrase. An empty passphrase falls back to a
    /// fixed development key.
    pub fn new(passphrase: &str) -> Self {
        let passphrase = if passphrase.is_empty() {
            log::warn!("No transform key configured; using the development key");
            FALLBACK_PASSPHRASE
        } else {
            passphrase
        };
        Self {
            key: derive_key(passphrase),
        }
    }

    pub fn encrypt(&self, plaintext: &str) -> String {
        let obfuscated = self.apply_key(plaintext.as_bytes());
        format!("{ENCODED_PREFIX}{}", STANDARD.encode(obfuscated))
    }

    pub fn decrypt(&self, encoded: &str) -> Result<String> {
        let payload = encoded
            .strip_prefix(ENCODED_PREFIX)
            .ok_or_else(|| Error::Transform("value is not tagged as encoded".to_string()))?;

        let bytes = STANDARD
            .decode(payload)
            .map_err(|e| Error::Transform(format!("corrupt payload: {e}")))?;

        String::from_utf8(self.apply_key(&bytes))
            .map_err(|_| Error::Transform("decoded value is not valid UTF-8".to_string()))
    }

    /// Whether `value` carries the encoding tag.
    pub fn is_encoded(value: &str) -> bool {
        value.starts_with(ENCODED_PREFIX)
    }

    fn apply_key(&self, data: &[u8]) -> Vec<u8> {
        data.iter()
            .zip(self.key.iter().cycle())
            .map(|(&byte, &key)| byte ^ key)
            .collect()
    }
}

/// Spread the passphrase over a fixed-size key with a few mixing rounds.
fn derive_key(passphrase: &str) -> [u8; KEY_LEN] {
    let mut key = [0u8; KEY_LEN];

    for (i, &b) in passphrase.as_bytes().iter().enumerate() {
        key[i % KEY_LEN] ^= b;
        key[(i + 13) % KEY_LEN] =
            key[(i + 13) % KEY_LEN].wrapping_add(b.wrapping_mul((i as u8).wrapping_add(1)));
    }

    for round in 0..32u8 {
        for i in 0..KEY_LEN {
            let prev = key[(i + KEY_LEN - 1) % KEY_LEN];
            key[i] = key[i]
                .wrapping_add(prev)
                .wrapping_mul(37)
                .wrapping_add(round);
        }
    }

    key
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_round_trip() {
        let codec = SensitiveDataCodec::new("s3cret");
        let encoded = codec.encrypt("4111 1111 1111 1111");

        assert!(SensitiveDataCodec::is_encoded(&encoded));
        assert_ne!(encoded, "4111 1111 1111 1111");
        assert_eq!(codec.decrypt(&encoded).unwrap(), "4111 1111 1111 1111");
    }

    #[test]
    fn test_untagged_input_is_rejected() {
        let codec = SensitiveDataCodec::new("s3cret");
        assert!(matches!(
            codec.decrypt("plain text"),
            Err(Error::Transform(_))
        ));
        assert!(matches!(
            codec.decrypt("enc:v1:!!not base64!!"),
            Err(Error::Transform(_))
        ));
    }

    #[test]
    fn test_empty_key_uses_fallback() {
        let a = SensitiveDataCodec::new("");
        let b = SensitiveDataCodec::new(FALLBACK_PASSPHRASE);
        assert_eq!(a.encrypt("x"), b.encrypt("x"));
    }

    #[test]
    fn test_different_keys_differ() {
        let a = SensitiveDataCodec::new("one");
        let b = SensitiveDataCodec::new("two");
        assert_ne!(a.encrypt("payload"), b.encrypt("payload"));
    }
}
