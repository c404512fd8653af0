//! ECDSA P-256 signer and verifier (§4.14).
//!
//! **[ADDED — no teacher counterpart]**. The five example repos carry
//! no ECDSA primitive at all (this family of crate is imported from
//! outside the pack per the project's grounding rules - see
//! DESIGN.md); `p256`/`ecdsa`/`signature`/`sha2` are the standard
//! RustCrypto stack for P-256 over SHA-256, already present in the
//! wider example pack's dependency surface
//! (`Dicklesworthstone-frankensqlite` uses `sha2`). Keys are exchanged
//! as DER-encoded `SubjectPublicKeyInfo` (§3.7's `PublicKey BLOB`
//! column), the same encoding X.509 certificates use, so a registered
//! agent's public key is opaque, self-describing bytes rather than a
//! raw curve point the reader has to interpret out of band.

use p256::ecdsa::signature::{Signer as _, Verifier as _};
use p256::ecdsa::{Signature, SigningKey, VerifyingKey};
use p256::pkcs8::{DecodePublicKey, EncodePublicKey};
use sha2::{Digest, Sha256};

use crate::error::{self, Error};

/// SHA-256 over `bytes` (§3.6 `PayloadHash`).
pub fn sha256(bytes: &[u8]) -> [u8; 32] {
    let mut hasher = Sha256::new();
    hasher.update(bytes);
    hasher.finalize().into()
}

/// An agent's private signing key (§4.14). Construction is the only
/// place a private key exists in memory; callers are expected to have
/// retrieved it from the host's secure store (hardware-backed for
/// human agents, software-stored for AI agents, per §4.14) before
/// reaching here - this type does not itself manage key storage.
pub struct Signer {
    key: SigningKey,
}

impl Signer {
    /// Generates a fresh keypair (agent-provisioning time, §4.15).
    pub fn generate() -> Signer {
        Signer {
            key: SigningKey::random(&mut rand_core::OsRng),
        }
    }

    /// Reconstructs a signer from a raw 32-byte scalar (e.g. loaded
    /// from a secure store).
    pub fn from_bytes(scalar: &[u8]) -> Result<Signer, Error> {
        let key = SigningKey::from_slice(scalar)
            .map_err(|e| error::invalid_arg(format!("invalid P-256 private key: {e}")))?;
        Ok(Signer { key })
    }

    /// DER-encoded `SubjectPublicKeyInfo` for this signer's public key
    /// (§3.7 `PublicKey BLOB`).
    pub fn public_key_spki(&self) -> Result<Vec<u8>, Error> {
        let verifying_key = VerifyingKey::from(&self.key);
        let doc = verifying_key
            .to_public_key_der()
            .map_err(|e| error::corrupt(format!("failed to encode public key: {e}")))?;
        Ok(doc.as_bytes().to_vec())
    }

    /// Signs `message`, returning a fixed-length 64-byte `r || s`
    /// signature (§4.14: "fixed-length... or DER form - both MUST be
    /// accepted on verification").
    pub fn sign(&self, message: &[u8]) -> Vec<u8> {
        let sig: Signature = self.key.sign(message);
        sig.to_bytes().to_vec()
    }
}

/// Verifies `signature` (either fixed-length `r || s` or DER-encoded)
/// over `message` against a DER `SubjectPublicKeyInfo` public key
/// (§4.14 `Verify`). Side-effect free; the underlying RustCrypto
/// verification is constant-time in the scalar operations regardless
/// of which encoding the signature arrived in.
pub fn verify(message: &[u8], signature: &[u8], public_key_spki: &[u8]) -> Result<bool, Error> {
    let verifying_key = VerifyingKey::from_public_key_der(public_key_spki)
        .map_err(|e| error::invalid_arg(format!("invalid public key: {e}")))?;

    let sig = if signature.len() == 64 {
        Signature::from_slice(signature).map_err(|e| error::invalid_arg(format!("invalid signature: {e}")))?
    } else {
        Signature::from_der(signature).map_err(|e| error::invalid_arg(format!("invalid signature: {e}")))?
    };

    Ok(verifying_key.verify(message, &sig).is_ok())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sign_then_verify_round_trips() {
        let signer = Signer::generate();
        let spki = signer.public_key_spki().unwrap();
        let msg = b"sequence 1 || timestamp || agent-alpha || hash || prevhash";
        let sig = signer.sign(msg);
        assert!(verify(msg, &sig, &spki).unwrap());
    }

    #[test]
    fn tampered_message_fails_verification() {
        let signer = Signer::generate();
        let spki = signer.public_key_spki().unwrap();
        let sig = signer.sign(b"original message");
        assert!(!verify(b"different message", &sig, &spki).unwrap());
    }

    #[test]
    fn der_encoded_signature_is_also_accepted() {
        let signer = Signer::generate();
        let spki = signer.public_key_spki().unwrap();
        let msg = b"hello";
        let sig: Signature = signer.key.sign(msg);
        let der = sig.to_der().as_bytes().to_vec();
        assert!(verify(msg, &der, &spki).unwrap());
    }

    #[test]
    fn sha256_matches_known_vector() {
        // SHA-256("") per the published test vector.
        let digest = sha256(b"");
        assert_eq!(
            hex::encode(digest),
            "e3b0c44298fc1c149afbf4c8996fb92427ae41e4649b934ca495991b7852b855"
        );
    }
}
