//! In-process software KMS.
//!
//! `LocalKms` stands in for a real provider in tests and dry runs. It keeps
//! one Ed25519 key per key reference and creates missing keys on first use.
//! Keys live in process memory, so it must not back a production chain.

use std::collections::HashMap;
use std::sync::Arc;

use ed25519_dalek::{Signer as _, SigningKey};
use parking_lot::Mutex;
use rand::RngCore;
use rand::rngs::OsRng;
use tracing::debug;

use crate::error::{Error, Result};
use crate::gateway::KmsBackend;
use crate::provider::KmsTarget;
use crate::signer::{CryptoSigner, HashAlgorithm, KeyAlgorithm, KmsSigner, PublicKey};

/// Software backend holding Ed25519 keys by key reference.
#[derive(Default)]
pub struct LocalKms {
    keys: Mutex<HashMap<String, Arc<SigningKey>>>,
    requests: Mutex<Vec<String>>,
    create_missing: bool,
}

impl LocalKms {
    /// Creates a backend that generates a key for every new reference.
    #[must_use]
    pub fn new() -> Self {
        Self {
            create_missing: true,
            ..Self::default()
        }
    }

    /// Creates a backend that only knows keys added with [`LocalKms::insert`].
    #[must_use]
    pub fn strict() -> Self {
        Self::default()
    }

    /// Stores a key under a provider reference such as `hashivault://transit/keys/root`.
    pub fn insert(&self, key_uri: impl Into<String>, key: SigningKey) {
        self.keys.lock().insert(key_uri.into(), Arc::new(key));
    }

    /// Returns the public key stored under `key_uri`, if any.
    #[must_use]
    pub fn public_key(&self, key_uri: &str) -> Option<PublicKey> {
        self.keys.lock().get(key_uri).map(|key| ed25519_public_key(key))
    }

    /// Returns the key references requested so far, in order.
    #[must_use]
    pub fn requests(&self) -> Vec<String> {
        self.requests.lock().clone()
    }

    fn key_for(&self, key_uri: &str) -> Result<Arc<SigningKey>> {
        let mut keys = self.keys.lock();
        if let Some(key) = keys.get(key_uri) {
            return Ok(Arc::clone(key));
        }
        if !self.create_missing {
            return Err(Error::KeyNotFound(key_uri.to_string()));
        }

        debug!("Generating local Ed25519 key for {}", key_uri);
        let mut secret = [0u8; 32];
        OsRng.fill_bytes(&mut secret);
        let key = Arc::new(SigningKey::from_bytes(&secret));
        keys.insert(key_uri.to_string(), Arc::clone(&key));
        Ok(key)
    }
}

impl KmsBackend for LocalKms {
    fn signer(&self, target: &KmsTarget, hash: HashAlgorithm) -> Result<Arc<dyn KmsSigner>> {
        self.requests.lock().push(target.key_uri.clone());
        let key = self.key_for(&target.key_uri)?;
        Ok(Arc::new(LocalSigner {
            key_uri: target.key_uri.clone(),
            public_key: ed25519_public_key(&key),
            key,
            hash,
        }))
    }
}

impl std::fmt::Debug for LocalKms {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LocalKms")
            .field("keys", &self.keys.lock().len())
            .field("create_missing", &self.create_missing)
            .finish_non_exhaustive()
    }
}

/// Signer handle and signing capability for one local key.
struct LocalSigner {
    key_uri: String,
    key: Arc<SigningKey>,
    public_key: PublicKey,
    hash: HashAlgorithm,
}

impl KmsSigner for LocalSigner {
    fn key_uri(&self) -> &str {
        &self.key_uri
    }

    fn public_key(&self) -> Result<PublicKey> {
        Ok(self.public_key.clone())
    }

    fn crypto_signer(&self) -> Result<Arc<dyn CryptoSigner>> {
        Ok(Arc::new(Self {
            key_uri: self.key_uri.clone(),
            key: Arc::clone(&self.key),
            public_key: self.public_key.clone(),
            hash: self.hash,
        }))
    }
}

impl CryptoSigner for LocalSigner {
    fn public_key(&self) -> &PublicKey {
        &self.public_key
    }

    fn hash(&self) -> HashAlgorithm {
        self.hash
    }

    fn sign(&self, message: &[u8]) -> Result<Vec<u8>> {
        Ok(self.key.sign(message).to_bytes().to_vec())
    }
}

fn ed25519_public_key(key: &SigningKey) -> PublicKey {
    PublicKey::new(
        KeyAlgorithm::Ed25519,
        key.verifying_key().to_bytes().to_vec(),
    )
}
