//! KMS and chain configuration.

use std::collections::BTreeMap;
use std::fmt;
use std::path::Path;
use std::str::FromStr;

use chrono::Duration;
use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};
use crate::template::Stage;

/// Option key holding the AWS region.
pub const AWS_REGION: &str = "aws-region";
/// Option key holding the path of a GCP service account credentials file.
pub const GCP_CREDENTIALS_FILE: &str = "gcp-credentials-file";
/// Option key holding the Azure tenant ID.
pub const AZURE_TENANT_ID: &str = "azure-tenant-id";
/// Option key holding the Vault token.
pub const VAULT_TOKEN: &str = "vault-token";
/// Option key holding the Vault server address.
pub const VAULT_ADDRESS: &str = "vault-address";

/// Supported KMS providers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub enum ProviderKind {
    /// AWS Key Management Service.
    Aws,
    /// Google Cloud KMS.
    Gcp,
    /// Azure Key Vault.
    Azure,
    /// Vault transit secrets engine.
    HashiVault,
}

impl ProviderKind {
    /// All providers, in declaration order.
    pub const ALL: [Self; 4] = [Self::Aws, Self::Gcp, Self::Azure, Self::HashiVault];

    /// Returns the type tag used in configuration (`awskms`, `gcpkms`, ...).
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Aws => "awskms",
            Self::Gcp => "gcpkms",
            Self::Azure => "azurekms",
            Self::HashiVault => "hashivault",
        }
    }

    /// Returns the human-readable provider name used in messages.
    #[must_use]
    pub const fn display_name(&self) -> &'static str {
        match self {
            Self::Aws => "AWS",
            Self::Gcp => "GCP",
            Self::Azure => "Azure",
            Self::HashiVault => "HashiVault",
        }
    }
}

impl fmt::Display for ProviderKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ProviderKind {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "" => Err(Error::InvalidConfig("KMS type cannot be empty".into())),
            "awskms" => Ok(Self::Aws),
            "gcpkms" => Ok(Self::Gcp),
            "azurekms" => Ok(Self::Azure),
            "hashivault" => Ok(Self::HashiVault),
            other => Err(Error::UnsupportedProvider(other.to_string())),
        }
    }
}

impl TryFrom<String> for ProviderKind {
    type Error = Error;

    fn try_from(value: String) -> Result<Self> {
        value.parse()
    }
}

impl From<ProviderKind> for String {
    fn from(kind: ProviderKind) -> Self {
        kind.as_str().to_string()
    }
}

/// Configuration for the KMS holding the chain's keys.
///
/// `root_key_id` always names the key the next gateway call binds to. To get a
/// signer for another stage, use [`KmsConfig::with_active_key`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct KmsConfig {
    /// Subject common name placed on every certificate.
    pub common_name: String,
    /// KMS provider.
    #[serde(rename = "type")]
    pub kind: ProviderKind,
    /// Key identifier for the root certificate.
    pub root_key_id: String,
    /// Key identifier for the intermediate certificate, if any.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub intermediate_key_id: Option<String>,
    /// Key identifier for the leaf certificate.
    pub leaf_key_id: String,
    /// Provider-specific settings (`aws-region`, `vault-token`, ...).
    #[serde(default)]
    pub options: BTreeMap<String, String>,
}

impl KmsConfig {
    /// Creates a configuration with no intermediate key and no options.
    pub fn new(
        common_name: impl Into<String>,
        kind: ProviderKind,
        root_key_id: impl Into<String>,
        leaf_key_id: impl Into<String>,
    ) -> Self {
        Self {
            common_name: common_name.into(),
            kind,
            root_key_id: root_key_id.into(),
            intermediate_key_id: None,
            leaf_key_id: leaf_key_id.into(),
            options: BTreeMap::new(),
        }
    }

    /// Sets the intermediate key identifier.
    #[must_use]
    pub fn intermediate_key_id(mut self, key_id: impl Into<String>) -> Self {
        self.intermediate_key_id = Some(key_id.into());
        self
    }

    /// Sets a provider option.
    #[must_use]
    pub fn option(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.options.insert(key.into(), value.into());
        self
    }

    /// Returns the value of a provider option, treating empty values as absent.
    #[must_use]
    pub fn option_value(&self, key: &str) -> Option<&str> {
        self.options
            .get(key)
            .map(String::as_str)
            .filter(|v| !v.is_empty())
    }

    /// Returns a copy whose active key (`root_key_id`) is `key_id`.
    #[must_use]
    pub fn with_active_key(&self, key_id: &str) -> Self {
        let mut config = self.clone();
        config.root_key_id = key_id.to_string();
        config
    }

    /// Parses a configuration from a JSON document.
    pub fn from_json(json: &str) -> Result<Self> {
        serde_json::from_str(json)
            .map_err(|e| Error::InvalidConfig(format!("failed to parse KMS configuration: {e}")))
    }

    /// Loads a configuration from a JSON file.
    pub fn from_json_file(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path).map_err(|source| Error::Io {
            context: "error reading KMS configuration".into(),
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_json(&content)
    }
}

/// Validity periods for each certificate of the chain.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Lifetimes {
    /// Root certificate lifetime in hours.
    pub root_hours: i64,
    /// Intermediate certificate lifetime in hours.
    pub intermediate_hours: i64,
    /// Leaf certificate lifetime in hours.
    pub leaf_hours: i64,
}

impl Lifetimes {
    /// Returns the lifetime of `stage`.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidConfig`] when the hour count does not fit a
    /// duration.
    pub fn for_stage(&self, stage: Stage) -> Result<Duration> {
        let hours = match stage {
            Stage::Root => self.root_hours,
            Stage::Intermediate => self.intermediate_hours,
            Stage::Leaf => self.leaf_hours,
        };
        Duration::try_hours(hours).ok_or_else(|| {
            Error::InvalidConfig(format!("{stage} lifetime of {hours} hours is out of range"))
        })
    }
}

impl Default for Lifetimes {
    /// Ten years for the root, five for the intermediate, one for the leaf.
    fn default() -> Self {
        Self {
            root_hours: 87_600,
            intermediate_hours: 43_800,
            leaf_hours: 8_760,
        }
    }
}
