//! Post-quantum validator keys using CRYSTALS-Dilithium5, and the signing
//! service the emitter calls to sign events.
//!
//! Validators are identified by the fingerprint (domain-separated BLAKE3)
//! of their signing public key.

use std::collections::HashMap;

use pqcrypto_dilithium::dilithium5;
use pqcrypto_traits::sign::{
    DetachedSignature as SigTrait, PublicKey as SignPkTrait, SecretKey as SignSkTrait,
};
use serde::{Deserialize, Serialize};
use zeroize::{Zeroize, ZeroizeOnDrop};

use crate::Hash;

/// Size of a Dilithium5 detached signature.
pub fn signature_bytes() -> usize {
    dilithium5::signature_bytes()
}

/// A CRYSTALS-Dilithium5 signing public key.
///
/// Inner bytes are `pub(crate)` to prevent external construction of
/// unvalidated keys. Use [`SigningKeypair::generate`] or deserialization.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SigningPublicKey(pub(crate) Vec<u8>);

/// A CRYSTALS-Dilithium5 signing secret key, zeroized on drop.
#[derive(Clone, Zeroize, ZeroizeOnDrop)]
pub struct SigningSecretKey(pub(crate) Vec<u8>);

/// A Dilithium5 detached signature.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Signature(pub(crate) Vec<u8>);

impl Signature {
    /// Create an empty signature (unsigned events under construction).
    pub fn empty() -> Self {
        Signature(vec![])
    }

    /// Access the raw signature bytes.
    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl Serialize for Signature {
    fn serialize<S: serde::Serializer>(&self, s: S) -> Result<S::Ok, S::Error> {
        serde::Serialize::serialize(&self.0, s)
    }
}

impl<'de> Deserialize<'de> for Signature {
    fn deserialize<D: serde::Deserializer<'de>>(d: D) -> Result<Self, D::Error> {
        let bytes: Vec<u8> = serde::Deserialize::deserialize(d)?;
        // Empty is allowed for events that were never signed.
        if !bytes.is_empty() && bytes.len() != signature_bytes() {
            return Err(serde::de::Error::custom(format!(
                "invalid Dilithium5 signature: expected {} bytes, got {}",
                signature_bytes(),
                bytes.len()
            )));
        }
        Ok(Signature(bytes))
    }
}

/// A Dilithium5 signing keypair.
#[derive(Clone)]
pub struct SigningKeypair {
    pub public: SigningPublicKey,
    pub secret: SigningSecretKey,
}

impl SigningKeypair {
    /// Generate a new random Dilithium5 keypair.
    pub fn generate() -> Self {
        let (pk, sk) = dilithium5::keypair();
        SigningKeypair {
            public: SigningPublicKey(pk.as_bytes().to_vec()),
            secret: SigningSecretKey(sk.as_bytes().to_vec()),
        }
    }

    /// Sign a message, producing a detached signature.
    pub fn sign(&self, message: &[u8]) -> Result<Signature, SignError> {
        let sk = dilithium5::SecretKey::from_bytes(&self.secret.0)
            .map_err(|_| SignError::CorruptedKey)?;
        let sig = dilithium5::detached_sign(message, &sk);
        Ok(Signature(sig.as_bytes().to_vec()))
    }

    /// Create a keypair from raw bytes, validating key sizes.
    pub fn from_bytes(public: Vec<u8>, secret: Vec<u8>) -> Option<Self> {
        dilithium5::PublicKey::from_bytes(&public).ok()?;
        dilithium5::SecretKey::from_bytes(&secret).ok()?;
        Some(SigningKeypair {
            public: SigningPublicKey(public),
            secret: SigningSecretKey(secret),
        })
    }
}

impl SigningPublicKey {
    /// Access the raw public key bytes.
    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }

    /// Verify a detached signature against this public key.
    pub fn verify(&self, message: &[u8], signature: &Signature) -> bool {
        let pk = match dilithium5::PublicKey::from_bytes(&self.0) {
            Ok(pk) => pk,
            Err(_) => return false,
        };
        let sig = match dilithium5::DetachedSignature::from_bytes(&signature.0) {
            Ok(s) => s,
            Err(_) => return false,
        };
        dilithium5::verify_detached_signature(&sig, message, &pk).is_ok()
    }

    /// Derive the validator identity (BLAKE3 fingerprint of the public key).
    pub fn fingerprint(&self) -> Hash {
        crate::hash_domain(b"stratum.signing.fingerprint", &self.0)
    }
}

impl Serialize for SigningPublicKey {
    fn serialize<S: serde::Serializer>(&self, s: S) -> Result<S::Ok, S::Error> {
        serde::Serialize::serialize(&self.0, s)
    }
}

impl<'de> Deserialize<'de> for SigningPublicKey {
    fn deserialize<D: serde::Deserializer<'de>>(d: D) -> Result<Self, D::Error> {
        let bytes: Vec<u8> = serde::Deserialize::deserialize(d)?;
        if bytes.len() != dilithium5::public_key_bytes() {
            return Err(serde::de::Error::custom(format!(
                "invalid Dilithium5 public key: expected {} bytes, got {}",
                dilithium5::public_key_bytes(),
                bytes.len()
            )));
        }
        Ok(SigningPublicKey(bytes))
    }
}

/// Errors from the signing service.
#[derive(Clone, Debug, thiserror::Error)]
pub enum SignError {
    #[error("no key available for account {0}")]
    UnknownAccount(String),
    #[error("secret key bytes are corrupted")]
    CorruptedKey,
}

/// Bytes actually signed for a payload of the given mimetype.
///
/// The mimetype is length-prefixed so payloads of different kinds can never
/// collide.
pub fn sign_data(mimetype: &str, payload: &[u8]) -> Vec<u8> {
    let mut data = Vec::with_capacity(8 + mimetype.len() + payload.len());
    data.extend_from_slice(&(mimetype.len() as u64).to_le_bytes());
    data.extend_from_slice(mimetype.as_bytes());
    data.extend_from_slice(payload);
    data
}

/// Account signing service.
pub trait Signer: Send + Sync {
    fn sign(&self, account: &Hash, mimetype: &str, payload: &[u8]) -> Result<Signature, SignError>;
}

/// In-memory keystore indexed by validator id.
#[derive(Clone, Default)]
pub struct Keystore {
    keys: HashMap<Hash, SigningKeypair>,
}

impl Keystore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a keypair; returns the validator id it is filed under.
    pub fn insert(&mut self, keypair: SigningKeypair) -> Hash {
        let id = keypair.public.fingerprint();
        self.keys.insert(id, keypair);
        id
    }

    pub fn get(&self, account: &Hash) -> Option<&SigningKeypair> {
        self.keys.get(account)
    }
}

impl Signer for Keystore {
    fn sign(&self, account: &Hash, mimetype: &str, payload: &[u8]) -> Result<Signature, SignError> {
        let keypair = self
            .keys
            .get(account)
            .ok_or_else(|| SignError::UnknownAccount(crate::short_hex(account)))?;
        keypair.sign(&sign_data(mimetype, payload))
    }
}
