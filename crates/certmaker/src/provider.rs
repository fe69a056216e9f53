//! Typed provider configuration and key reference resolution.
//!
//! Every provider setting a backend needs travels in a [`KmsTarget`] value
//! instead of process environment variables, so signers for different
//! accounts can be built side by side.

use std::fmt;
use std::path::PathBuf;

use zeroize::{Zeroize, ZeroizeOnDrop};

use crate::config::{
    AWS_REGION, AZURE_TENANT_ID, GCP_CREDENTIALS_FILE, KmsConfig, ProviderKind, VAULT_ADDRESS,
    VAULT_TOKEN,
};
use crate::error::{Error, Result};
use crate::validation::{AZURE_NAME_PREFIX, split_azure_key_id};

/// Default Azure authority host.
pub const AZURE_AUTHORITY_HOST: &str = "https://login.microsoftonline.com/";

/// AWS KMS settings.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AwsOptions {
    /// Region the keys live in.
    pub region: String,
}

/// Google Cloud KMS settings.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GcpOptions {
    /// Service account credentials file.
    pub credentials_file: PathBuf,
}

/// Azure Key Vault settings.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AzureOptions {
    /// Directory (tenant) ID to authenticate against.
    pub tenant_id: String,
    /// Extra tenants the credential may acquire tokens for.
    pub additionally_allowed_tenants: Vec<String>,
    /// Authority host used for authentication.
    pub authority_host: String,
}

/// Vault transit settings.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HashiVaultOptions {
    /// Access token.
    pub token: VaultToken,
    /// Vault server address.
    pub address: String,
}

/// A Vault token, wiped from memory on drop.
#[derive(Clone, PartialEq, Eq, Zeroize, ZeroizeOnDrop)]
pub struct VaultToken(String);

impl VaultToken {
    /// Wraps a token.
    #[must_use]
    pub const fn new(token: String) -> Self {
        Self(token)
    }

    /// Returns the token for use in a request header.
    #[must_use]
    pub fn expose(&self) -> &str {
        &self.0
    }
}

impl fmt::Debug for VaultToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("VaultToken([REDACTED])")
    }
}

/// A KMS provider with its settings.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum KmsProvider {
    /// AWS KMS.
    Aws(AwsOptions),
    /// Google Cloud KMS.
    Gcp(GcpOptions),
    /// Azure Key Vault.
    Azure(AzureOptions),
    /// Vault transit secrets engine.
    HashiVault(HashiVaultOptions),
}

impl KmsProvider {
    /// Builds the provider settings from a configuration's option map.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidConfig`] when a required option is missing.
    pub fn from_config(config: &KmsConfig) -> Result<Self> {
        let required = |key: &str| {
            config.option_value(key).map(str::to_string).ok_or_else(|| {
                Error::InvalidConfig(format!(
                    "{key} is required for {} KMS",
                    config.kind.display_name()
                ))
            })
        };

        Ok(match config.kind {
            ProviderKind::Aws => Self::Aws(AwsOptions {
                region: required(AWS_REGION)?,
            }),
            ProviderKind::Gcp => Self::Gcp(GcpOptions {
                credentials_file: PathBuf::from(required(GCP_CREDENTIALS_FILE)?),
            }),
            ProviderKind::Azure => Self::Azure(AzureOptions {
                tenant_id: required(AZURE_TENANT_ID)?,
                additionally_allowed_tenants: vec!["*".to_string()],
                authority_host: AZURE_AUTHORITY_HOST.to_string(),
            }),
            ProviderKind::HashiVault => Self::HashiVault(HashiVaultOptions {
                token: VaultToken::new(required(VAULT_TOKEN)?),
                address: required(VAULT_ADDRESS)?,
            }),
        })
    }

    /// Returns the provider kind.
    #[must_use]
    pub const fn kind(&self) -> ProviderKind {
        match self {
            Self::Aws(_) => ProviderKind::Aws,
            Self::Gcp(_) => ProviderKind::Gcp,
            Self::Azure(_) => ProviderKind::Azure,
            Self::HashiVault(_) => ProviderKind::HashiVault,
        }
    }

    /// Builds the provider reference URI for a key identifier.
    #[must_use]
    pub fn key_uri(&self, key_id: &str) -> String {
        match self {
            Self::Aws(_) => format!("awskms:///{key_id}"),
            Self::Gcp(_) => format!("gcpkms://{key_id}"),
            Self::Azure(_) => azure_key_uri(key_id),
            Self::HashiVault(_) => format!("hashivault://{key_id}"),
        }
    }
}

/// Rewrites `azurekms:name=<n>;vault=<v>` to `azurekms://<v>.vault.azure.net/<n>`.
///
/// Identifiers in any other form are returned unchanged.
#[must_use]
pub fn azure_key_uri(key_id: &str) -> String {
    if key_id.starts_with(AZURE_NAME_PREFIX) {
        if let Some((name, vault)) = split_azure_key_id(key_id) {
            return format!("azurekms://{vault}.vault.azure.net/{name}");
        }
    }
    key_id.to_string()
}

/// A resolved request for one KMS key.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KmsTarget {
    /// Provider and its settings.
    pub provider: KmsProvider,
    /// Provider reference for the active key.
    pub key_uri: String,
}

impl KmsTarget {
    /// Resolves the target for the configuration's active key (`root_key_id`).
    pub fn from_config(config: &KmsConfig) -> Result<Self> {
        let provider = KmsProvider::from_config(config)?;
        let key_uri = provider.key_uri(&config.root_key_id);
        Ok(Self { provider, key_uri })
    }

    /// Returns the provider kind.
    #[must_use]
    pub const fn kind(&self) -> ProviderKind {
        self.provider.kind()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use test_case::test_case;

    fn config(kind: ProviderKind, key_id: &str) -> KmsConfig {
        KmsConfig::new("Sigstore", kind, key_id, key_id)
            .option(AWS_REGION, "us-east-1")
            .option(GCP_CREDENTIALS_FILE, "/etc/gcp.json")
            .option(AZURE_TENANT_ID, "tenant-1")
            .option(VAULT_TOKEN, "s.secret")
            .option(VAULT_ADDRESS, "http://127.0.0.1:8200")
    }

    #[test_case(ProviderKind::Aws, "alias/root", "awskms:///alias/root" ; "aws alias")]
    #[test_case(
        ProviderKind::Aws,
        "arn:aws:kms:us-east-1:1:key/k",
        "awskms:///arn:aws:kms:us-east-1:1:key/k" ;
        "aws arn"
    )]
    #[test_case(
        ProviderKind::Gcp,
        "projects/p/locations/l/keyRings/r/cryptoKeys/k/cryptoKeyVersions/1",
        "gcpkms://projects/p/locations/l/keyRings/r/cryptoKeys/k/cryptoKeyVersions/1" ;
        "gcp"
    )]
    #[test_case(
        ProviderKind::Azure,
        "azurekms:name=root;vault=sigstore",
        "azurekms://sigstore.vault.azure.net/root" ;
        "azure short form"
    )]
    #[test_case(
        ProviderKind::Azure,
        "azurekms://sigstore.vault.azure.net/root",
        "azurekms://sigstore.vault.azure.net/root" ;
        "azure full uri"
    )]
    #[test_case(
        ProviderKind::HashiVault,
        "transit/keys/root",
        "hashivault://transit/keys/root" ;
        "hashivault"
    )]
    fn key_uri_for_provider(kind: ProviderKind, key_id: &str, expected: &str) {
        let target = KmsTarget::from_config(&config(kind, key_id)).unwrap();
        assert_eq!(target.key_uri, expected);
        assert_eq!(target.kind(), kind);
    }

    #[test]
    fn azure_rewrite_trims_components() {
        assert_eq!(
            azure_key_uri("azurekms:name= root ;vault= sigstore"),
            "azurekms://sigstore.vault.azure.net/root"
        );
        assert_eq!(azure_key_uri("azurekms:name=root"), "azurekms:name=root");
    }

    #[test]
    fn options_are_carried_explicitly() {
        let config = config(ProviderKind::Azure, "azurekms:name=k;vault=v");
        let target = KmsTarget::from_config(&config).unwrap();
        let KmsProvider::Azure(options) = target.provider else {
            unreachable!("azure config resolves to azure provider");
        };
        assert_eq!(options.tenant_id, "tenant-1");
        assert_eq!(options.additionally_allowed_tenants, vec!["*".to_string()]);
        assert_eq!(options.authority_host, AZURE_AUTHORITY_HOST);
    }

    #[test]
    fn missing_option_is_config_error() {
        let config = KmsConfig::new("Sigstore", ProviderKind::Gcp, "k", "k");
        let err = KmsProvider::from_config(&config).unwrap_err();
        assert_eq!(
            err.to_string(),
            "invalid KMS configuration: gcp-credentials-file is required for GCP KMS"
        );
    }

    #[test]
    fn vault_token_is_redacted() {
        let config = config(ProviderKind::HashiVault, "transit/keys/root");
        let target = KmsTarget::from_config(&config).unwrap();
        let debug = format!("{target:?}");
        assert!(debug.contains("REDACTED"));
        assert!(!debug.contains("s.secret"));
        let KmsProvider::HashiVault(options) = target.provider else {
            unreachable!("vault config resolves to vault provider");
        };
        assert_eq!(options.token.expose(), "s.secret");
    }
}
