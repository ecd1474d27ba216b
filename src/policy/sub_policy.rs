//! Pluggable building blocks of the API policy: subject access control,
//! payload encryption and payload signing. Each concern has a null
//! implementation that the policy wires in when nothing is configured.

use bytes::Bytes;
use sha2::{Digest, Sha256};

use crate::status::GmsecResult;

/// Decides whether the local application may use a subject. Wide open by
/// default; deployments with access control plug in their own rules.
pub trait Access: Send + Sync {
    fn can_subscribe(&self, pattern: &str) -> bool;
    fn can_send(&self, subject: &str) -> bool;
}

pub struct OpenAccess;

impl Access for OpenAccess {
    fn can_subscribe(&self, _pattern: &str) -> bool {
        true
    }

    fn can_send(&self, _subject: &str) -> bool {
        true
    }
}

pub trait Cipher: Send + Sync {
    fn is_null(&self) -> bool {
        false
    }

    fn encrypt(&self, data: Bytes) -> GmsecResult<Bytes>;
    fn decrypt(&self, data: Bytes) -> GmsecResult<Bytes>;
}

pub struct NullCipher;

impl Cipher for NullCipher {
    fn is_null(&self) -> bool {
        true
    }

    fn encrypt(&self, data: Bytes) -> GmsecResult<Bytes> {
        Ok(data)
    }

    fn decrypt(&self, data: Bytes) -> GmsecResult<Bytes> {
        Ok(data)
    }
}

/// Byte rotation by a configured delta. Obfuscation rather than security,
/// kept for wire compatibility with legacy deployments.
pub struct RotCipher {
    delta: u8,
}

impl RotCipher {
    pub fn new(delta: u8) -> RotCipher {
        RotCipher { delta }
    }
}

impl Cipher for RotCipher {
    fn encrypt(&self, data: Bytes) -> GmsecResult<Bytes> {
        let rotated: Vec<u8> = data.iter().map(|b| b.wrapping_add(self.delta)).collect();
        Ok(rotated.into())
    }

    fn decrypt(&self, data: Bytes) -> GmsecResult<Bytes> {
        let rotated: Vec<u8> = data.iter().map(|b| b.wrapping_sub(self.delta)).collect();
        Ok(rotated.into())
    }
}

pub trait Signer: Send + Sync {
    fn is_null(&self) -> bool {
        false
    }

    /// Digest over the payload, or `None` if this signer produces no
    /// signature.
    fn digest(&self, data: &[u8]) -> Option<Bytes>;
}

pub struct NullSigner;

impl Signer for NullSigner {
    fn is_null(&self) -> bool {
        true
    }

    fn digest(&self, _data: &[u8]) -> Option<Bytes> {
        None
    }
}

pub struct Sha256Signer;

impl Signer for Sha256Signer {
    fn digest(&self, data: &[u8]) -> Option<Bytes> {
        Some(Bytes::copy_from_slice(&Sha256::digest(data)))
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn test_rot_cipher_round_trip() {
        let cipher = RotCipher::new(13);
        let plain = Bytes::from_static(b"\x00\x7fGMSEC\xff");

        let encrypted = cipher.encrypt(plain.clone()).unwrap();
        assert_ne!(encrypted, plain);
        assert_eq!(cipher.decrypt(encrypted).unwrap(), plain);
    }

    #[test]
    fn test_rot_cipher_wraps_around() {
        let cipher = RotCipher::new(200);
        let encrypted = cipher.encrypt(Bytes::from_static(&[100, 250])).unwrap();
        assert_eq!(encrypted.as_ref(), &[44, 194]);
    }

    #[test]
    fn test_sha256_signer_is_deterministic() {
        let signer = Sha256Signer;
        let a = signer.digest(b"payload").unwrap();
        let b = signer.digest(b"payload").unwrap();
        assert_eq!(a, b);
        assert_eq!(a.len(), 32);
        assert_ne!(signer.digest(b"other").unwrap(), a);
    }

    #[test]
    fn test_null_implementations() {
        assert!(NullCipher.is_null());
        assert_eq!(
            NullCipher.encrypt(Bytes::from_static(b"x")).unwrap(),
            Bytes::from_static(b"x")
        );
        assert!(NullSigner.is_null());
        assert!(NullSigner.digest(b"x").is_none());
        assert!(OpenAccess.can_subscribe("A.>"));
        assert!(OpenAccess.can_send("A.B"));
    }
}
