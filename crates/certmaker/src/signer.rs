//! Signing capabilities exposed by KMS-held keys.
//!
//! A [`KmsSigner`] is the handle a backend returns for one key reference. It
//! hands out the key's public half and a [`CryptoSigner`], the primitive that
//! asks the KMS for a signature. Private key material never enters the
//! process; `rcgen` reaches the KMS through [`RemoteKeyPair`] adapters built
//! here.

use std::fmt;
use std::sync::Arc;

use parking_lot::Mutex;
use rcgen::{KeyPair, RemoteKeyPair, SignatureAlgorithm};
use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::error::{Error, Result};

/// Public key algorithms a KMS key can use.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum KeyAlgorithm {
    /// Ed25519.
    Ed25519,
    /// ECDSA on NIST P-256.
    EcdsaP256,
    /// ECDSA on NIST P-384.
    EcdsaP384,
    /// RSA with PKCS#1 v1.5 signatures.
    Rsa,
}

impl fmt::Display for KeyAlgorithm {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Ed25519 => "Ed25519",
            Self::EcdsaP256 => "ECDSA P-256",
            Self::EcdsaP384 => "ECDSA P-384",
            Self::Rsa => "RSA",
        };
        f.write_str(name)
    }
}

/// Digest algorithms a signer can be bound to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum HashAlgorithm {
    /// SHA-256.
    #[default]
    Sha256,
    /// SHA-384.
    Sha384,
    /// SHA-512.
    Sha512,
}

impl fmt::Display for HashAlgorithm {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Sha256 => "SHA-256",
            Self::Sha384 => "SHA-384",
            Self::Sha512 => "SHA-512",
        };
        f.write_str(name)
    }
}

/// The public half of a KMS key.
///
/// `bytes` holds the raw key as it sits inside a `SubjectPublicKeyInfo` bit
/// string: 32 bytes for Ed25519, the uncompressed SEC1 point for ECDSA, and
/// the PKCS#1 `RSAPublicKey` DER for RSA.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PublicKey {
    algorithm: KeyAlgorithm,
    bytes: Vec<u8>,
}

impl PublicKey {
    /// Creates a public key from its algorithm and raw bytes.
    #[must_use]
    pub const fn new(algorithm: KeyAlgorithm, bytes: Vec<u8>) -> Self {
        Self { algorithm, bytes }
    }

    /// Returns the key algorithm.
    #[must_use]
    pub const fn algorithm(&self) -> KeyAlgorithm {
        self.algorithm
    }

    /// Returns the raw public key bytes.
    #[must_use]
    pub fn as_bytes(&self) -> &[u8] {
        &self.bytes
    }

    /// Algorithm identifier used when embedding this key in a certificate.
    fn spki_algorithm(&self) -> &'static SignatureAlgorithm {
        match self.algorithm {
            KeyAlgorithm::Ed25519 => &rcgen::PKCS_ED25519,
            KeyAlgorithm::EcdsaP256 => &rcgen::PKCS_ECDSA_P256_SHA256,
            KeyAlgorithm::EcdsaP384 => &rcgen::PKCS_ECDSA_P384_SHA384,
            KeyAlgorithm::Rsa => &rcgen::PKCS_RSA_SHA256,
        }
    }
}

/// Digest-signing primitive bound to one KMS key.
pub trait CryptoSigner: Send + Sync {
    /// Returns the public key of the signing key.
    fn public_key(&self) -> &PublicKey;

    /// Returns the digest the signer was bound to.
    fn hash(&self) -> HashAlgorithm;

    /// Signs `message`, returning the signature in its X.509 encoding
    /// (raw for Ed25519, DER `Ecdsa-Sig-Value` for ECDSA, PKCS#1 v1.5 for RSA).
    fn sign(&self, message: &[u8]) -> Result<Vec<u8>>;
}

/// Handle on a KMS key.
///
/// Both capabilities the chain builder needs are part of the trait, so a
/// backend cannot hand out a handle that lacks the signing primitive.
pub trait KmsSigner: Send + Sync {
    /// Provider reference the handle is bound to, e.g. `awskms:///alias/root`.
    fn key_uri(&self) -> &str;

    /// Fetches the public key.
    fn public_key(&self) -> Result<PublicKey>;

    /// Returns the signing capability for the same key.
    fn crypto_signer(&self) -> Result<Arc<dyn CryptoSigner>>;
}

/// Maps a signer and digest to the X.509 signature algorithm it produces.
///
/// # Errors
///
/// Returns [`Error::UnsupportedAlgorithm`] for key/digest pairs with no
/// matching signature algorithm, such as P-384 with SHA-256.
pub fn signature_algorithm(
    signer: &dyn CryptoSigner,
    hash: HashAlgorithm,
) -> Result<&'static SignatureAlgorithm> {
    let key = signer.public_key().algorithm();
    match (key, hash) {
        (KeyAlgorithm::Ed25519, _) => Ok(&rcgen::PKCS_ED25519),
        (KeyAlgorithm::EcdsaP256, HashAlgorithm::Sha256) => Ok(&rcgen::PKCS_ECDSA_P256_SHA256),
        (KeyAlgorithm::EcdsaP384, HashAlgorithm::Sha384) => Ok(&rcgen::PKCS_ECDSA_P384_SHA384),
        (KeyAlgorithm::Rsa, HashAlgorithm::Sha256) => Ok(&rcgen::PKCS_RSA_SHA256),
        (KeyAlgorithm::Rsa, HashAlgorithm::Sha384) => Ok(&rcgen::PKCS_RSA_SHA384),
        (KeyAlgorithm::Rsa, HashAlgorithm::Sha512) => Ok(&rcgen::PKCS_RSA_SHA512),
        (key, hash) => {
            Err(Error::UnsupportedAlgorithm(format!("{key} key cannot sign with {hash}")))
        }
    }
}

/// Failure reported by the KMS during an `rcgen` signing call.
///
/// `rcgen` only surfaces an opaque remote-key error, so the adapter parks
/// the real cause here for the caller to pick up.
#[derive(Clone, Default)]
pub(crate) struct SignFailure(Arc<Mutex<Option<Error>>>);

impl SignFailure {
    pub(crate) fn take(&self) -> Option<Error> {
        self.0.lock().take()
    }
}

/// `rcgen` key pair that delegates signing to a KMS.
struct RemoteSigner {
    signer: Arc<dyn CryptoSigner>,
    public_key: Vec<u8>,
    algorithm: &'static SignatureAlgorithm,
    failure: SignFailure,
}

impl RemoteKeyPair for RemoteSigner {
    fn public_key(&self) -> &[u8] {
        &self.public_key
    }

    fn sign(&self, msg: &[u8]) -> std::result::Result<Vec<u8>, rcgen::Error> {
        self.signer.sign(msg).map_err(|e| {
            warn!("KMS signing request failed: {}", e);
            *self.failure.0.lock() = Some(e);
            rcgen::Error::RemoteKeyError
        })
    }

    fn algorithm(&self) -> &'static SignatureAlgorithm {
        self.algorithm
    }
}

/// Public key wrapped as an `rcgen` key pair that refuses to sign.
struct PublicKeyOnly {
    key: PublicKey,
}

impl RemoteKeyPair for PublicKeyOnly {
    fn public_key(&self) -> &[u8] {
        self.key.as_bytes()
    }

    fn sign(&self, _msg: &[u8]) -> std::result::Result<Vec<u8>, rcgen::Error> {
        Err(rcgen::Error::RemoteKeyError)
    }

    fn algorithm(&self) -> &'static SignatureAlgorithm {
        self.key.spki_algorithm()
    }
}

/// Builds an `rcgen` key pair that signs through `signer` with `algorithm`.
pub(crate) fn signing_key_pair(
    signer: Arc<dyn CryptoSigner>,
    algorithm: &'static SignatureAlgorithm,
) -> Result<(KeyPair, SignFailure)> {
    let failure = SignFailure::default();
    let remote = RemoteSigner {
        public_key: signer.public_key().as_bytes().to_vec(),
        signer,
        algorithm,
        failure: failure.clone(),
    };
    let key_pair = KeyPair::from_remote(Box::new(remote))
        .map_err(|e| Error::Generation(format!("failed to wrap KMS signer: {e}")))?;
    Ok((key_pair, failure))
}

/// Builds an `rcgen` key pair carrying only a subject public key.
pub(crate) fn public_key_pair(key: &PublicKey) -> Result<KeyPair> {
    KeyPair::from_remote(Box::new(PublicKeyOnly { key: key.clone() }))
        .map_err(|e| Error::Generation(format!("failed to wrap subject public key: {e}")))
}
