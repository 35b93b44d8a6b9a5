// hasher.rs — SHA-256 digests for the audit chain and HMAC signing for exports.
//
// All digests and signatures are lowercase hex strings.

use ring::hmac;
use sha2::{Digest, Sha256};

/// Hash arbitrary bytes, returning a lowercase hex-encoded SHA-256 string.
pub fn hash_bytes(data: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(data);
    format!("{:x}", hasher.finalize())
}

pub fn hash_str(s: &str) -> String {
    hash_bytes(s.as_bytes())
}

/// HMAC-SHA256 signer keyed with the server-held compliance secret.
#[derive(Clone)]
pub struct Signer {
    key: hmac::Key,
}

impl Signer {
    pub fn new(secret: &str) -> Self {
        Self {
            key: hmac::Key::new(hmac::HMAC_SHA256, secret.as_bytes()),
        }
    }

    /// Hex-encoded HMAC-SHA256 of `body`.
    pub fn sign(&self, body: &[u8]) -> String {
        hex::encode(hmac::sign(&self.key, body).as_ref())
    }

    /// Check a hex signature against `body` in constant time.
    pub fn verify(&self, body: &[u8], signature: &str) -> bool {
        match hex::decode(signature.trim()) {
            Ok(tag) => hmac::verify(&self.key, body, &tag).is_ok(),
            Err(_) => false,
        }
    }
}

impl std::fmt::Debug for Signer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("Signer { .. }")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn hash_known_value() {
        assert_eq!(
            hash_str(""),
            "e3b0c44298fc1c149afbf4c8996fb92427ae41e4649b934ca495991b7852b855"
        );
    }

    #[test]
    fn hmac_matches_reference_vector() {
        // RFC 4231 test case 2.
        let signer = Signer::new("Jefe");
        assert_eq!(
            signer.sign(b"what do ya want for nothing?"),
            "5bdcc146bf60754e6a042426089575c75a003f089d2739839dec58b964ec3843"
        );
    }

    #[test]
    fn verify_rejects_tampering_and_wrong_key() {
        let signer = Signer::new("dev-secret");
        let sig = signer.sign(b"\"a\",\"b\"\n");
        assert!(signer.verify(b"\"a\",\"b\"\n", &sig));
        assert!(!signer.verify(b"\"a\",\"c\"\n", &sig));
        assert!(!Signer::new("other").verify(b"\"a\",\"b\"\n", &sig));
        assert!(!signer.verify(b"\"a\",\"b\"\n", "not-hex"));
    }
}
