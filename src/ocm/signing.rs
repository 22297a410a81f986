//! # Descriptor Signatures
//!
//! Normalised digests over component descriptors and Ed25519 signature
//! verification.
//!
//! The digest is SHA-256 over the canonical JSON of the descriptor with the
//! `signatures` field removed: object keys sorted, no insignificant
//! whitespace. The signature value is the hex-encoded Ed25519 signature over
//! the raw digest bytes.

use crate::ocm::descriptor::{ComponentDescriptor, DigestSpec, Signature, SignatureSpec};
use base64::Engine;
use ed25519_dalek::{Signer, SigningKey, Verifier, VerifyingKey};
use sha2::{Digest, Sha256};
use thiserror::Error;

pub const HASH_ALGORITHM: &str = "SHA-256";
pub const NORMALISATION_ALGORITHM: &str = "jsonNormalisation/v1";
pub const SIGNATURE_ALGORITHM: &str = "ed25519";

#[derive(Debug, Error)]
pub enum SignatureError {
    #[error("signature {0} not found on component descriptor")]
    NotFound(String),
    #[error("digest of signature {name} does not match descriptor: expected {expected}, got {actual}")]
    DigestMismatch {
        name: String,
        expected: String,
        actual: String,
    },
    #[error("signature {name} is invalid: {reason}")]
    Invalid { name: String, reason: String },
    #[error("invalid public key: {0}")]
    InvalidKey(String),
    #[error("failed to normalise descriptor: {0}")]
    Normalise(#[from] serde_json::Error),
}

/// Write `value` as canonical JSON
fn write_canonical(value: &serde_json::Value, out: &mut String) -> Result<(), serde_json::Error> {
    match value {
        serde_json::Value::Object(map) => {
            let mut keys: Vec<&String> = map.keys().collect();
            keys.sort();
            out.push('{');
            for (i, key) in keys.iter().enumerate() {
                if i > 0 {
                    out.push(',');
                }
                out.push_str(&serde_json::to_string(key)?);
                out.push(':');
                write_canonical(&map[key.as_str()], out)?;
            }
            out.push('}');
        }
        serde_json::Value::Array(items) => {
            out.push('[');
            for (i, item) in items.iter().enumerate() {
                if i > 0 {
                    out.push(',');
                }
                write_canonical(item, out)?;
            }
            out.push(']');
        }
        scalar => out.push_str(&serde_json::to_string(scalar)?),
    }
    Ok(())
}

/// Normalised digest of a descriptor, ignoring its signatures
pub fn descriptor_digest(descriptor: &ComponentDescriptor) -> Result<[u8; 32], SignatureError> {
    let mut value = serde_json::to_value(descriptor)?;
    if let Some(object) = value.as_object_mut() {
        object.remove("signatures");
    }
    let mut canonical = String::new();
    write_canonical(&value, &mut canonical)?;
    Ok(Sha256::digest(canonical.as_bytes()).into())
}

/// Verify the signature `name` on `descriptor` with `key`
pub fn verify_signature(
    descriptor: &ComponentDescriptor,
    name: &str,
    key: &VerifyingKey,
) -> Result<(), SignatureError> {
    let signature = descriptor
        .signatures
        .iter()
        .find(|s| s.name == name)
        .ok_or_else(|| SignatureError::NotFound(name.to_string()))?;

    let digest = descriptor_digest(descriptor)?;
    let actual = hex::encode(digest);
    if !signature.digest.value.eq_ignore_ascii_case(&actual) {
        return Err(SignatureError::DigestMismatch {
            name: name.to_string(),
            expected: signature.digest.value.clone(),
            actual,
        });
    }

    let invalid = |reason: String| SignatureError::Invalid {
        name: name.to_string(),
        reason,
    };
    let raw = hex::decode(signature.signature.value.trim()).map_err(|e| invalid(e.to_string()))?;
    let signature = ed25519_dalek::Signature::from_slice(&raw).map_err(|e| invalid(e.to_string()))?;
    key.verify(&digest, &signature)
        .map_err(|e| invalid(e.to_string()))
}

/// Add (or replace) the signature `name` on `descriptor`
pub fn sign_descriptor(
    descriptor: &mut ComponentDescriptor,
    name: &str,
    key: &SigningKey,
) -> Result<(), SignatureError> {
    let digest = descriptor_digest(descriptor)?;
    let signature = key.sign(&digest);
    descriptor.signatures.retain(|s| s.name != name);
    descriptor.signatures.push(Signature {
        name: name.to_string(),
        digest: DigestSpec {
            hash_algorithm: HASH_ALGORITHM.to_string(),
            normalisation_algorithm: NORMALISATION_ALGORITHM.to_string(),
            value: hex::encode(digest),
        },
        signature: SignatureSpec {
            algorithm: SIGNATURE_ALGORITHM.to_string(),
            value: hex::encode(signature.to_bytes()),
            media_type: "application/vnd.ocm.signature.ed25519".to_string(),
        },
    });
    Ok(())
}

/// Parse an Ed25519 public key given as raw bytes, hex or base64
pub fn parse_public_key(data: &[u8]) -> Result<VerifyingKey, SignatureError> {
    let bytes: Vec<u8> = if data.len() == 32 {
        data.to_vec()
    } else {
        let text = std::str::from_utf8(data)
            .map_err(|e| SignatureError::InvalidKey(e.to_string()))?
            .trim();
        if text.len() == 64 && text.chars().all(|c| c.is_ascii_hexdigit()) {
            hex::decode(text).map_err(|e| SignatureError::InvalidKey(e.to_string()))?
        } else {
            base64::engine::general_purpose::STANDARD
                .decode(text)
                .map_err(|e| SignatureError::InvalidKey(e.to_string()))?
        }
    };
    let bytes: [u8; 32] = bytes
        .as_slice()
        .try_into()
        .map_err(|_| SignatureError::InvalidKey(format!("expected 32 bytes, got {}", bytes.len())))?;
    VerifyingKey::from_bytes(&bytes).map_err(|e| SignatureError::InvalidKey(e.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ocm::descriptor::{DescriptorComponent, Meta};

    fn descriptor() -> ComponentDescriptor {
        ComponentDescriptor {
            meta: Meta::default(),
            component: DescriptorComponent {
                name: "acme.org/app".to_string(),
                version: "1.0.0".to_string(),
                provider: serde_json::json!("acme"),
                ..Default::default()
            },
            signatures: Vec::new(),
        }
    }

    #[test]
    fn test_sign_and_verify() {
        let key = SigningKey::from_bytes(&[7u8; 32]);
        let mut signed = descriptor();
        sign_descriptor(&mut signed, "acme", &key).unwrap();
        assert!(verify_signature(&signed, "acme", &key.verifying_key()).is_ok());
    }

    #[test]
    fn test_signature_ignores_other_signatures() {
        let key = SigningKey::from_bytes(&[7u8; 32]);
        let other = SigningKey::from_bytes(&[9u8; 32]);
        let mut signed = descriptor();
        sign_descriptor(&mut signed, "acme", &key).unwrap();
        sign_descriptor(&mut signed, "other", &other).unwrap();
        assert!(verify_signature(&signed, "acme", &key.verifying_key()).is_ok());
        assert!(verify_signature(&signed, "other", &other.verifying_key()).is_ok());
    }

    #[test]
    fn test_tampered_descriptor_fails_digest() {
        let key = SigningKey::from_bytes(&[7u8; 32]);
        let mut signed = descriptor();
        sign_descriptor(&mut signed, "acme", &key).unwrap();
        signed.component.version = "1.0.1".to_string();
        assert!(matches!(
            verify_signature(&signed, "acme", &key.verifying_key()),
            Err(SignatureError::DigestMismatch { .. })
        ));
    }

    #[test]
    fn test_wrong_key_fails() {
        let key = SigningKey::from_bytes(&[7u8; 32]);
        let wrong = SigningKey::from_bytes(&[8u8; 32]);
        let mut signed = descriptor();
        sign_descriptor(&mut signed, "acme", &key).unwrap();
        assert!(matches!(
            verify_signature(&signed, "acme", &wrong.verifying_key()),
            Err(SignatureError::Invalid { .. })
        ));
        assert!(matches!(
            verify_signature(&signed, "missing", &key.verifying_key()),
            Err(SignatureError::NotFound(_))
        ));
    }

    #[test]
    fn test_parse_public_key_encodings() {
        let public = SigningKey::from_bytes(&[7u8; 32]).verifying_key();
        let raw = public.to_bytes();
        assert_eq!(parse_public_key(&raw).unwrap(), public);
        assert_eq!(parse_public_key(hex::encode(raw).as_bytes()).unwrap(), public);
        let encoded = base64::engine::general_purpose::STANDARD.encode(raw);
        assert_eq!(parse_public_key(format!("{encoded}\n").as_bytes()).unwrap(), public);
        assert!(parse_public_key(b"not a key").is_err());
    }
}
