//! Host identities and version statement signatures.

use ed25519_dalek::{Signature, Signer, SigningKey, Verifier, VerifyingKey};
use rand::rngs::OsRng;

use crate::chunk::HostId;
use crate::error::{VersionError, VersionResult};

/// The signing side of a host.
pub trait HostIdentity: Send + Sync {
    fn host_id(&self) -> HostId;

    /// Sign `message`; returns the hex encoded signature.
    fn sign(&self, message: &[u8]) -> String;
}

/// An ed25519 identity. Its [`HostId`] is the hex encoded verifying key.
pub struct LocalHost {
    signing_key: SigningKey,
}

impl LocalHost {
    pub fn generate() -> Self {
        LocalHost {
            signing_key: SigningKey::generate(&mut OsRng),
        }
    }

    pub fn from_secret(secret: [u8; 32]) -> Self {
        LocalHost {
            signing_key: SigningKey::from_bytes(&secret),
        }
    }
}

impl HostIdentity for LocalHost {
    fn host_id(&self) -> HostId {
        HostId::new(hex::encode(self.signing_key.verifying_key().as_bytes()))
    }

    fn sign(&self, message: &[u8]) -> String {
        hex::encode(self.signing_key.sign(message).to_bytes())
    }
}

/// Check that `signature` over `message` was made by `host`.
pub fn verify_signature(host: &HostId, message: &[u8], signature: &str) -> VersionResult<()> {
    let invalid = |reason: String| VersionError::InvalidSignature {
        issuer: host.to_string(),
        reason,
    };

    let mut key_bytes = [0u8; 32];
    hex::decode_to_slice(host.as_str(), &mut key_bytes)
        .map_err(|e| invalid(format!("host id is not a key: {}", e)))?;
    let key = VerifyingKey::from_bytes(&key_bytes).map_err(|e| invalid(e.to_string()))?;

    let mut signature_bytes = [0u8; 64];
    hex::decode_to_slice(signature, &mut signature_bytes)
        .map_err(|e| invalid(format!("malformed signature: {}", e)))?;
    let signature = Signature::from_bytes(&signature_bytes);

    key.verify(message, &signature).map_err(|e| invalid(e.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sign_and_verify() {
        let host = LocalHost::generate();
        let signature = host.sign(b"statement");
        verify_signature(&host.host_id(), b"statement", &signature).unwrap();
    }

    #[test]
    fn test_verify_rejects_tampering() {
        let host = LocalHost::generate();
        let signature = host.sign(b"statement");

        assert!(matches!(
            verify_signature(&host.host_id(), b"other", &signature),
            Err(VersionError::InvalidSignature { .. })
        ));

        let other = LocalHost::generate();
        assert!(matches!(
            verify_signature(&other.host_id(), b"statement", &signature),
            Err(VersionError::InvalidSignature { .. })
        ));
    }

    #[test]
    fn test_from_secret_is_stable() {
        let a = LocalHost::from_secret([7u8; 32]);
        let b = LocalHost::from_secret([7u8; 32]);
        assert_eq!(a.host_id(), b.host_id());
        assert_eq!(a.host_id().as_str().len(), 64);
    }

    #[test]
    fn test_malformed_host_id() {
        let result = verify_signature(&HostId::new("peer"), b"m", "00");
        assert!(matches!(result, Err(VersionError::InvalidSignature { .. })));
    }
}
