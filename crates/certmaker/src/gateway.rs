//! KMS provider gateway.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use tracing::debug;

use crate::config::{KmsConfig, ProviderKind};
use crate::error::{Error, Result};
use crate::provider::KmsTarget;
use crate::signer::{HashAlgorithm, KmsSigner};
use crate::validation::validate_config;

/// A client for one KMS provider.
///
/// Implementations resolve a key reference into a signer handle. They
/// receive all provider settings through the [`KmsTarget`].
pub trait KmsBackend: Send + Sync {
    /// Returns a signer bound to `target.key_uri` that signs with `hash`.
    fn signer(&self, target: &KmsTarget, hash: HashAlgorithm) -> Result<Arc<dyn KmsSigner>>;
}

/// Dispatches signer requests to the backend registered for each provider.
#[derive(Clone, Default)]
pub struct KmsGateway {
    backends: HashMap<ProviderKind, Arc<dyn KmsBackend>>,
}

impl KmsGateway {
    /// Creates a gateway with no backends.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers `backend` for `kind`, replacing any previous one.
    #[must_use]
    pub fn with_backend(mut self, kind: ProviderKind, backend: Arc<dyn KmsBackend>) -> Self {
        self.register(kind, backend);
        self
    }

    /// Registers `backend` for every provider.
    #[must_use]
    pub fn with_backend_for_all(mut self, backend: Arc<dyn KmsBackend>) -> Self {
        for kind in ProviderKind::ALL {
            self.register(kind, Arc::clone(&backend));
        }
        self
    }

    /// Registers `backend` for `kind`, replacing any previous one.
    pub fn register(&mut self, kind: ProviderKind, backend: Arc<dyn KmsBackend>) {
        self.backends.insert(kind, backend);
    }

    /// Returns `true` if a backend is registered for `kind`.
    #[must_use]
    pub fn supports(&self, kind: ProviderKind) -> bool {
        self.backends.contains_key(&kind)
    }

    /// Initializes a signer for the configuration's active key.
    ///
    /// The configuration is validated first; an invalid one never reaches a
    /// backend. The signer is bound to `config.root_key_id` and SHA-256.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidConfig`] for a malformed configuration and
    /// [`Error::Provider`] when no backend is registered or the backend fails.
    pub fn init_kms(&self, config: &KmsConfig) -> Result<Arc<dyn KmsSigner>> {
        validate_config(config)?;

        let target = KmsTarget::from_config(config)?;
        let provider = target.kind();
        debug!("Initializing {} signer for {}", provider, target.key_uri);

        let backend = self
            .backends
            .get(&provider)
            .ok_or_else(|| Error::BackendUnavailable(provider).for_provider(provider))?;

        backend
            .signer(&target, HashAlgorithm::Sha256)
            .map_err(|e| match e {
                err @ Error::Provider { .. } => err,
                other => other.for_provider(provider),
            })
    }
}

impl fmt::Debug for KmsGateway {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut providers: Vec<_> = self.backends.keys().collect();
        providers.sort();
        f.debug_struct("KmsGateway")
            .field("providers", &providers)
            .finish()
    }
}
