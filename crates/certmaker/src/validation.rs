//! Key identifier validation.
//!
//! These checks are purely structural: nothing here contacts a KMS. They run
//! before every gateway call so a malformed configuration never reaches a
//! provider.

use crate::config::{
    AWS_REGION, AZURE_TENANT_ID, GCP_CREDENTIALS_FILE, KmsConfig, ProviderKind, VAULT_ADDRESS,
    VAULT_TOKEN,
};
use crate::error::{Error, Result};

/// Prefix of a fully qualified AWS KMS key ARN.
pub const AWS_ARN_PREFIX: &str = "arn:aws:kms:";
/// Prefix of an AWS KMS key alias.
pub const AWS_ALIAS_PREFIX: &str = "alias/";
/// Prefix of the short Azure key identifier form.
pub const AZURE_NAME_PREFIX: &str = "azurekms:name=";
/// Separator between key name and vault in the short Azure form.
pub const AZURE_VAULT_SEPARATOR: &str = ";vault=";

/// Path components every GCP key version resource name carries.
const GCP_COMPONENTS: [(&str, &str); 5] = [
    ("projects/", "must start with 'projects/'"),
    ("/locations/", "must contain '/locations/'"),
    ("/keyRings/", "must contain '/keyRings/'"),
    ("/cryptoKeys/", "must contain '/cryptoKeys/'"),
    ("/cryptoKeyVersions/", "must contain '/cryptoKeyVersions/'"),
];

/// Validates a KMS configuration.
///
/// Provider options are checked first, then every non-empty key identifier
/// against the provider's grammar (root, intermediate, leaf), and only then
/// that the root and leaf key identifiers are present. A provider-specific
/// error therefore takes precedence over a missing key identifier.
///
/// # Errors
///
/// Returns [`Error::InvalidConfig`] describing the first problem found.
pub fn validate_config(config: &KmsConfig) -> Result<()> {
    match config.kind {
        ProviderKind::Aws => {
            let region = required_option(config, AWS_REGION, "AWS KMS")?;
            for_each_key_id(config, |key_id, field| validate_aws_key_id(key_id, field, region))?;
        }
        ProviderKind::Gcp => {
            required_option(config, GCP_CREDENTIALS_FILE, "GCP KMS")?;
            for_each_key_id(config, validate_gcp_key_id)?;
        }
        ProviderKind::Azure => {
            required_option(config, AZURE_TENANT_ID, "Azure KMS")?;
            for_each_key_id(config, validate_azure_key_id)?;
        }
        ProviderKind::HashiVault => {
            required_option(config, VAULT_TOKEN, "HashiVault KMS")?;
            required_option(config, VAULT_ADDRESS, "HashiVault KMS")?;
            for_each_key_id(config, validate_hashivault_key_id)?;
        }
    }

    if config.root_key_id.is_empty() {
        return Err(Error::InvalidConfig("RootKeyID must be specified".into()));
    }
    if config.leaf_key_id.is_empty() {
        return Err(Error::InvalidConfig("LeafKeyID must be specified".into()));
    }

    Ok(())
}

/// Validates an AWS key identifier: a region-matching key ARN or an alias.
///
/// An empty identifier is accepted; presence is checked separately.
pub fn validate_aws_key_id(key_id: &str, field: &str, region: &str) -> Result<()> {
    if key_id.is_empty() {
        return Ok(());
    }

    if key_id.starts_with(AWS_ARN_PREFIX) {
        let parts: Vec<&str> = key_id.split(':').collect();
        if parts.len() < 6 {
            return Err(Error::InvalidConfig(format!("invalid AWS KMS ARN format for {field}")));
        }
        if parts[3] != region {
            return Err(Error::InvalidConfig(format!(
                "region in ARN ({}) does not match configured region ({region})",
                parts[3]
            )));
        }
        Ok(())
    } else if let Some(alias) = key_id.strip_prefix(AWS_ALIAS_PREFIX) {
        if alias.is_empty() {
            return Err(Error::InvalidConfig(format!("alias name cannot be empty for {field}")));
        }
        Ok(())
    } else {
        Err(Error::InvalidConfig(format!(
            "awskms {field} must start with '{AWS_ARN_PREFIX}' or '{AWS_ALIAS_PREFIX}'"
        )))
    }
}

/// Validates a GCP key version resource name.
///
/// The components may appear in any order; only their presence is checked.
pub fn validate_gcp_key_id(key_id: &str, field: &str) -> Result<()> {
    if key_id.is_empty() {
        return Ok(());
    }

    for (component, message) in GCP_COMPONENTS {
        if !key_id.contains(component) {
            return Err(Error::InvalidConfig(format!("gcpkms {field} {message}")));
        }
    }
    Ok(())
}

/// Validates an Azure key identifier of the form `azurekms:name=<n>;vault=<v>`.
pub fn validate_azure_key_id(key_id: &str, field: &str) -> Result<()> {
    if key_id.is_empty() {
        return Ok(());
    }

    if !key_id.starts_with(AZURE_NAME_PREFIX) {
        return Err(Error::InvalidConfig(format!(
            "azurekms {field} must start with '{AZURE_NAME_PREFIX}'"
        )));
    }
    let Some((name, vault)) = split_azure_key_id(key_id) else {
        return Err(Error::InvalidConfig(format!(
            "azurekms {field} must contain '{AZURE_VAULT_SEPARATOR}' parameter"
        )));
    };
    if name.is_empty() {
        return Err(Error::InvalidConfig(format!("key name cannot be empty for {field}")));
    }
    if vault.is_empty() {
        return Err(Error::InvalidConfig(format!("vault name cannot be empty for {field}")));
    }
    Ok(())
}

/// Validates a Vault transit key path of the form `transit/keys/<name>`.
pub fn validate_hashivault_key_id(key_id: &str, field: &str) -> Result<()> {
    if key_id.is_empty() {
        return Ok(());
    }

    let parts: Vec<&str> = key_id.split('/').collect();
    if parts.len() < 3 {
        return Err(Error::InvalidConfig(format!(
            "hashivault {field} must be in format: transit/keys/keyname"
        )));
    }
    if parts[0] != "transit" || parts[1] != "keys" {
        return Err(Error::InvalidConfig(format!(
            "hashivault {field} must start with 'transit/keys/'"
        )));
    }
    if parts[2].is_empty() {
        return Err(Error::InvalidConfig(format!("key name cannot be empty for {field}")));
    }
    Ok(())
}

/// Splits the short Azure form into trimmed `(name, vault)`.
///
/// Returns `None` when the vault separator is missing. The caller must have
/// checked the `azurekms:name=` prefix.
pub(crate) fn split_azure_key_id(key_id: &str) -> Option<(&str, &str)> {
    let rest = key_id.strip_prefix(AZURE_NAME_PREFIX)?;
    let vault_index = rest.find(AZURE_VAULT_SEPARATOR)?;
    let name = rest[..vault_index].trim();
    let vault = rest[vault_index + AZURE_VAULT_SEPARATOR.len()..].trim();
    Some((name, vault))
}

fn required_option<'a>(config: &'a KmsConfig, key: &str, provider: &str) -> Result<&'a str> {
    config
        .option_value(key)
        .ok_or_else(|| Error::InvalidConfig(format!("{key} is required for {provider}")))
}

fn for_each_key_id(
    config: &KmsConfig,
    mut validate: impl FnMut(&str, &str) -> Result<()>,
) -> Result<()> {
    validate(&config.root_key_id, "RootKeyID")?;
    validate(
        config.intermediate_key_id.as_deref().unwrap_or_default(),
        "IntermediateKeyID",
    )?;
    validate(&config.leaf_key_id, "LeafKeyID")
}
