//! Certificate chains signed by KMS-held keys.
#![forbid(unsafe_code)]
//!
//! This crate builds a self-signed root, an optional intermediate and a
//! code-signing leaf certificate whose private keys never leave a key
//! management service, and writes each one to a PEM file.
//!
//! # Overview
//!
//! - [`KmsConfig`] names the provider (`awskms`, `gcpkms`, `azurekms`,
//!   `hashivault`), the key of every stage and provider options.
//! - [`validate_config`] checks the configuration before any provider is
//!   contacted.
//! - [`KmsGateway`] turns a configuration into a signer handle through the
//!   [`KmsBackend`] registered for the provider.
//! - [`create_certificates`] runs the chain build.
//! - [`LocalKms`] is an in-process Ed25519 backend for tests and dry runs.
//!
//! # Example
//!
//! ```
//! use std::sync::Arc;
//! use certmaker::{
//!     ChainRequest, KmsConfig, KmsGateway, LocalKms, ProviderKind, VAULT_ADDRESS, VAULT_TOKEN,
//!     create_certificates, validate_chain,
//! };
//!
//! let config = KmsConfig::new(
//!     "Sigstore Code Signing",
//!     ProviderKind::HashiVault,
//!     "transit/keys/root",
//!     "transit/keys/leaf",
//! )
//! .option(VAULT_TOKEN, "s.token")
//! .option(VAULT_ADDRESS, "http://127.0.0.1:8200");
//!
//! let kms = Arc::new(LocalKms::new());
//! let gateway = KmsGateway::new().with_backend(ProviderKind::HashiVault, kms);
//! let root_signer = gateway.init_kms(&config).unwrap();
//!
//! let dir = tempfile::tempdir().unwrap();
//! let request = ChainRequest::in_dir(dir.path()).intermediate_key_id("transit/keys/intermediate");
//! let chain = create_certificates(&gateway, root_signer.as_ref(), &config, &request).unwrap();
//!
//! validate_chain(&chain.certificates()).unwrap();
//! assert!(dir.path().join("intermediate.pem").exists());
//! ```
//!
//! # Modules
//!
//! - [`config`] - KMS configuration and certificate lifetimes
//! - [`validation`] - Key identifier grammar per provider
//! - [`provider`] - Typed provider settings and key references
//! - [`gateway`] - Backend dispatch
//! - [`signer`] - Signing capabilities and `rcgen` adapters
//! - [`template`] - Certificate templates
//! - [`chain`] - Chain construction and validation
//! - [`writer`] - PEM output
//! - [`types`] - Parsed certificates
//! - [`error`] - Error types

pub mod chain;
pub mod config;
pub mod error;
pub mod gateway;
pub mod local;
pub mod provider;
pub mod signer;
pub mod template;
pub mod types;
pub mod validation;
pub mod writer;

// Re-export commonly used types at crate root
pub use chain::{
    ChainRequest, IssuedCertificate, IssuedChain, create_certificates, create_certificates_at,
    sign_certificate, validate_chain,
};
pub use config::{
    AWS_REGION, AZURE_TENANT_ID, GCP_CREDENTIALS_FILE, KmsConfig, Lifetimes, ProviderKind,
    VAULT_ADDRESS, VAULT_TOKEN,
};
pub use error::{Error, Result};
pub use gateway::{KmsBackend, KmsGateway};
pub use local::LocalKms;
pub use provider::{KmsProvider, KmsTarget};
pub use signer::{
    CryptoSigner, HashAlgorithm, KeyAlgorithm, KmsSigner, PublicKey, signature_algorithm,
};
pub use template::{
    CertificateTemplate, Stage, TemplateInputs, TemplateSource, default_template, parse_template,
};
pub use types::{Certificate, CertificateRole};
pub use validation::validate_config;
pub use writer::write_certificate_to_file;
