//! Certificate maker error types.

use std::path::PathBuf;

use thiserror::Error;

use crate::config::ProviderKind;
use crate::template::Stage;

/// Result type for certificate maker operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Certificate maker error variants.
#[derive(Debug, Error)]
pub enum Error {
    /// The KMS configuration is missing a field or has a malformed key identifier.
    #[error("invalid KMS configuration: {0}")]
    InvalidConfig(String),

    /// The KMS type string names no known provider.
    #[error("unsupported KMS type: {0}")]
    UnsupportedProvider(String),

    /// No backend client is registered for the provider.
    #[error("no backend registered for {0}")]
    BackendUnavailable(ProviderKind),

    /// The backend holds no key under the requested reference.
    #[error("key not found: {0}")]
    KeyNotFound(String),

    /// The provider rejected the request or could not be reached.
    #[error("failed to initialize {} KMS: {source}", .provider.display_name())]
    Provider {
        /// Provider that failed.
        provider: ProviderKind,
        /// Underlying cause.
        #[source]
        source: Box<Error>,
    },

    /// A signer handle could not produce its signing capability.
    #[error("signer does not implement CryptoSigner: {0}")]
    Capability(String),

    /// The key cannot sign with the requested digest.
    #[error("unsupported signature algorithm: {0}")]
    UnsupportedAlgorithm(String),

    /// The template advertises an algorithm the signing key cannot produce.
    #[error(
        "signature algorithm mismatch: template expects {expected}, signing key produces {actual}"
    )]
    AlgorithmMismatch {
        /// Algorithm set on the template.
        expected: String,
        /// Algorithm of the signing key.
        actual: String,
    },

    /// The KMS failed to sign.
    #[error("signing failed: {0}")]
    Signing(String),

    /// Template lookup, parsing or validation failed.
    #[error("template error: {0}")]
    Template(String),

    /// Certificate generation failed.
    #[error("certificate generation failed: {0}")]
    Generation(String),

    /// Certificate parsing failed.
    #[error("certificate parsing failed: {0}")]
    Parse(String),

    /// Signature verification failed.
    #[error("signature verification failed: {0}")]
    SignatureVerification(String),

    /// Invalid certificate chain.
    #[error("invalid certificate chain: {0}")]
    InvalidChain(String),

    /// A file could not be read or written.
    #[error("{context} at {}: {source}", .path.display())]
    Io {
        /// What was being done.
        context: String,
        /// Offending path.
        path: PathBuf,
        /// Underlying I/O error.
        #[source]
        source: std::io::Error,
    },

    /// An error raised while building one certificate of the chain.
    #[error("{stage} certificate: {context}: {source}")]
    Stage {
        /// Chain stage that failed.
        stage: Stage,
        /// What was being done.
        context: &'static str,
        /// Underlying error.
        #[source]
        source: Box<Error>,
    },
}

impl Error {
    /// Wraps this error with the chain stage and the step that failed.
    #[must_use]
    pub fn in_stage(self, stage: Stage, context: &'static str) -> Self {
        Self::Stage {
            stage,
            context,
            source: Box::new(self),
        }
    }

    /// Wraps this error as a failure of `provider`.
    #[must_use]
    pub fn for_provider(self, provider: ProviderKind) -> Self {
        Self::Provider {
            provider,
            source: Box::new(self),
        }
    }

    /// Returns the innermost error, looking through stage and provider context.
    #[must_use]
    pub fn root_cause(&self) -> &Self {
        match self {
            Self::Stage { source, .. } | Self::Provider { source, .. } => source.root_cause(),
            other => other,
        }
    }
}
