// attestation.rs — Ed25519 attestation of the chain head.
//
// An attestation signs (seq, head hash, time) so a merkle-root holder
// outside the process (operator, certifier, auditor) can later prove which
// chain head existed at a given moment. Keys are PKCS#8 documents; the
// signature and public key travel base64-encoded.

use base64::engine::general_purpose::STANDARD;
use base64::Engine as _;
use chrono::{DateTime, Utc};
use ring::rand::SystemRandom;
use ring::signature::{self, Ed25519KeyPair, KeyPair, UnparsedPublicKey};
use serde::{Deserialize, Serialize};

use crate::error::AuditError;
use crate::log::ActionLog;

/// A signed statement about the chain head.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Attestation {
    /// Sequence number of the attested head entry.
    pub seq: u64,
    pub head_hash: String,
    pub signed_at: DateTime<Utc>,
    /// Base64 Ed25519 public key.
    pub public_key: String,
    /// Base64 Ed25519 signature over [`Attestation::message`].
    pub signature: String,
}

impl Attestation {
    fn message(seq: u64, head_hash: &str, signed_at: &DateTime<Utc>) -> String {
        format!("adr-attestation:{}:{}:{}", seq, head_hash, signed_at.to_rfc3339())
    }

    /// Check the signature against the embedded public key.
    pub fn verify(&self) -> Result<(), AuditError> {
        let public_key = STANDARD
            .decode(&self.public_key)
            .map_err(|e| AuditError::KeyError(e.to_string()))?;
        let sig = STANDARD
            .decode(&self.signature)
            .map_err(|_| AuditError::BadSignature { seq: self.seq })?;
        let message = Self::message(self.seq, &self.head_hash, &self.signed_at);
        UnparsedPublicKey::new(&signature::ED25519, public_key)
            .verify(message.as_bytes(), &sig)
            .map_err(|_| AuditError::BadSignature { seq: self.seq })
    }

    /// True if this attestation covers the given log's entry at `seq`.
    pub fn matches(&self, log: &ActionLog) -> bool {
        log.entries()
            .get(self.seq as usize)
            .is_some_and(|e| e.merkle_hash == self.head_hash)
    }
}

/// Signs chain heads with an Ed25519 key.
pub struct ChainAttestor {
    key_pair: Ed25519KeyPair,
}

impl ChainAttestor {
    /// Generate a fresh key. Returns the attestor and the PKCS#8 bytes to
    /// store for later reuse.
    pub fn generate() -> Result<(Self, Vec<u8>), AuditError> {
        let rng = SystemRandom::new();
        let pkcs8 = Ed25519KeyPair::generate_pkcs8(&rng)
            .map_err(|_| AuditError::KeyError("key generation failed".to_string()))?;
        let attestor = Self::from_pkcs8(pkcs8.as_ref())?;
        Ok((attestor, pkcs8.as_ref().to_vec()))
    }

    pub fn from_pkcs8(pkcs8: &[u8]) -> Result<Self, AuditError> {
        let key_pair =
            Ed25519KeyPair::from_pkcs8(pkcs8).map_err(|e| AuditError::KeyError(e.to_string()))?;
        Ok(Self { key_pair })
    }

    /// Sign the current head of `log`. Returns `None` for an empty log.
    pub fn attest(&self, log: &ActionLog) -> Option<Attestation> {
        let head = log.entries().last()?;
        let signed_at = Utc::now();
        let message = Attestation::message(head.seq, &head.merkle_hash, &signed_at);
        let sig = self.key_pair.sign(message.as_bytes());
        Some(Attestation {
            seq: head.seq,
            head_hash: head.merkle_hash.clone(),
            signed_at,
            public_key: STANDARD.encode(self.key_pair.public_key().as_ref()),
            signature: STANDARD.encode(sig.as_ref()),
        })
    }
}
