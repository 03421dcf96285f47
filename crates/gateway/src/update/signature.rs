// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Detached Ed25519 signature verification gate for update packages (spec
//! §4.7). The trusted verifying key is loaded once at startup from a raw
//! 32-byte public key file.

use std::path::Path;

use ed25519_dalek::{Signature, VerifyingKey};
use signature::Verifier;
use thiserror::Error;

use crate::error::{Classify, ErrorKind};

#[derive(Debug, Error)]
pub enum SignatureError {
    #[error("failed to read trusted key file: {0}")]
    KeyFile(#[source] std::io::Error),
    #[error("trusted key file is not a valid 32-byte Ed25519 public key")]
    MalformedKey,
    #[error("malformed detached signature")]
    MalformedSignature,
    #[error("signature verification failed")]
    Rejected,
}

impl Classify for SignatureError {
    fn kind(&self) -> ErrorKind {
        ErrorKind::Signature
    }
}

/// Load the gateway's trusted update-signing public key from disk.
pub fn load_trusted_key(path: &Path) -> Result<VerifyingKey, SignatureError> {
    let bytes = std::fs::read(path).map_err(SignatureError::KeyFile)?;
    let array: [u8; 32] = bytes.try_into().map_err(|_| SignatureError::MalformedKey)?;
    VerifyingKey::from_bytes(&array).map_err(|_| SignatureError::MalformedKey)
}

/// Verify a detached signature over `package_bytes`.
pub fn verify(key: &VerifyingKey, package_bytes: &[u8], signature_bytes: &[u8]) -> Result<(), SignatureError> {
    let array: [u8; 64] = signature_bytes.try_into().map_err(|_| SignatureError::MalformedSignature)?;
    let sig = Signature::from_bytes(&array);
    key.verify_strict(package_bytes, &sig).map_err(|_| SignatureError::Rejected)
}

#[cfg(test)]
mod tests {
    use super::*;
    use ed25519_dalek::{Signer, SigningKey};

    #[test]
    fn valid_signature_verifies() {
        let signing_key = SigningKey::from_bytes(&[7u8; 32]);
        let verifying_key = signing_key.verifying_key();
        let package = b"update-package-bytes";
        let sig = signing_key.sign(package);
        assert!(verify(&verifying_key, package, &sig.to_bytes()).is_ok());
    }

    #[test]
    fn tampered_package_is_rejected() {
        let signing_key = SigningKey::from_bytes(&[7u8; 32]);
        let verifying_key = signing_key.verifying_key();
        let sig = signing_key.sign(b"original");
        assert!(verify(&verifying_key, b"tampered", &sig.to_bytes()).is_err());
    }

    #[test]
    fn malformed_signature_bytes_rejected() {
        let verifying_key = SigningKey::from_bytes(&[7u8; 32]).verifying_key();
        assert!(matches!(
            verify(&verifying_key, b"pkg", &[0u8; 10]),
            Err(SignatureError::MalformedSignature)
        ));
    }
}
