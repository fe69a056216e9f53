//! Certificate templates.
//!
//! A template is a small JSON document describing the subject organisation,
//! key usages and basic constraints of one chain stage. The built-in
//! defaults produce a code-signing hierarchy; callers may supply their own
//! document per stage.
//!
//! ```json
//! {
//!   "subject": { "organization": ["Sigstore"], "organizationalUnit": ["Fulcio Root CA"] },
//!   "keyUsage": ["certSign", "crlSign"],
//!   "basicConstraints": { "isCA": true, "maxPathLen": 1 }
//! }
//! ```

use std::fmt;
use std::path::Path;

use chrono::{DateTime, Utc};
use rcgen::{
    BasicConstraints, CertificateParams, DistinguishedName, DnType, ExtendedKeyUsagePurpose, IsCa,
    KeyUsagePurpose, SerialNumber, SignatureAlgorithm,
};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::error::{Error, Result};
use crate::signer::PublicKey;
use crate::types::Certificate;

const ROOT_TEMPLATE: &str = r#"{
  "subject": {
    "country": ["US"],
    "organization": ["Sigstore"],
    "organizationalUnit": ["Fulcio Root CA"]
  },
  "keyUsage": ["certSign", "crlSign"],
  "basicConstraints": { "isCA": true, "maxPathLen": 1 }
}"#;

const INTERMEDIATE_TEMPLATE: &str = r#"{
  "subject": {
    "country": ["US"],
    "organization": ["Sigstore"],
    "organizationalUnit": ["Fulcio Intermediate CA"]
  },
  "keyUsage": ["certSign", "crlSign"],
  "extKeyUsage": ["CodeSigning"],
  "basicConstraints": { "isCA": true, "maxPathLen": 0 }
}"#;

/// Length of generated serial numbers, the RFC 5280 maximum.
const SERIAL_LEN: usize = 20;

const LEAF_TEMPLATE: &str = r#"{
  "subject": {
    "country": ["US"],
    "organization": ["Sigstore"],
    "organizationalUnit": ["Fulcio Leaf"]
  },
  "keyUsage": ["digitalSignature"],
  "extKeyUsage": ["CodeSigning"],
  "basicConstraints": { "isCA": false }
}"#;

/// A stage of the certificate chain.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Stage {
    /// Self-signed root CA.
    Root,
    /// Optional intermediate CA.
    Intermediate,
    /// End-entity certificate.
    Leaf,
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Root => "root",
            Self::Intermediate => "intermediate",
            Self::Leaf => "leaf",
        })
    }
}

/// Returns the built-in template document for `stage`.
#[must_use]
pub const fn default_template(stage: Stage) -> &'static str {
    match stage {
        Stage::Root => ROOT_TEMPLATE,
        Stage::Intermediate => INTERMEDIATE_TEMPLATE,
        Stage::Leaf => LEAF_TEMPLATE,
    }
}

/// Where a template document comes from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TemplateSource {
    /// The built-in default for a stage.
    Default(Stage),
    /// A caller-supplied document.
    Raw(String),
}

impl TemplateSource {
    /// Uses the default for `stage` when `path` is `None`, otherwise reads the file.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Io`] if the file cannot be read.
    pub fn resolve(stage: Stage, path: Option<&Path>) -> Result<Self> {
        let Some(path) = path else {
            return Ok(Self::Default(stage));
        };
        std::fs::read_to_string(path)
            .map(Self::Raw)
            .map_err(|source| Error::Io {
                context: format!("{stage} template error: template not found"),
                path: path.to_path_buf(),
                source,
            })
    }

    /// Returns the template document.
    #[must_use]
    pub fn content(&self) -> &str {
        match self {
            Self::Default(stage) => default_template(*stage),
            Self::Raw(content) => content,
        }
    }
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
struct TemplateDocument {
    #[serde(default)]
    subject: SubjectFields,
    #[serde(default)]
    key_usage: Vec<KeyUsageName>,
    #[serde(default)]
    ext_key_usage: Vec<ExtKeyUsageName>,
    #[serde(default)]
    basic_constraints: BasicConstraintsField,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
struct SubjectFields {
    /// Ignored: the common name always comes from the KMS configuration.
    #[serde(default)]
    #[allow(dead_code)]
    common_name: Option<String>,
    #[serde(default)]
    country: Vec<String>,
    #[serde(default)]
    province: Vec<String>,
    #[serde(default)]
    locality: Vec<String>,
    #[serde(default)]
    organization: Vec<String>,
    #[serde(default)]
    organizational_unit: Vec<String>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
struct BasicConstraintsField {
    #[serde(rename = "isCA", default)]
    is_ca: bool,
    #[serde(rename = "maxPathLen", default)]
    max_path_len: Option<u8>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase")]
enum KeyUsageName {
    DigitalSignature,
    ContentCommitment,
    KeyEncipherment,
    DataEncipherment,
    KeyAgreement,
    CertSign,
    CrlSign,
}

impl From<KeyUsageName> for KeyUsagePurpose {
    fn from(name: KeyUsageName) -> Self {
        match name {
            KeyUsageName::DigitalSignature => Self::DigitalSignature,
            KeyUsageName::ContentCommitment => Self::ContentCommitment,
            KeyUsageName::KeyEncipherment => Self::KeyEncipherment,
            KeyUsageName::DataEncipherment => Self::DataEncipherment,
            KeyUsageName::KeyAgreement => Self::KeyAgreement,
            KeyUsageName::CertSign => Self::KeyCertSign,
            KeyUsageName::CrlSign => Self::CrlSign,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
enum ExtKeyUsageName {
    CodeSigning,
    TimeStamping,
    ServerAuth,
    ClientAuth,
}

impl From<ExtKeyUsageName> for ExtendedKeyUsagePurpose {
    fn from(name: ExtKeyUsageName) -> Self {
        match name {
            ExtKeyUsageName::CodeSigning => Self::CodeSigning,
            ExtKeyUsageName::TimeStamping => Self::TimeStamping,
            ExtKeyUsageName::ServerAuth => Self::ServerAuth,
            ExtKeyUsageName::ClientAuth => Self::ClientAuth,
        }
    }
}

/// A parsed template, ready to be signed.
pub struct CertificateTemplate {
    stage: Stage,
    params: CertificateParams,
    subject_key: PublicKey,
    /// Signature algorithm the issuing key will produce. Must be set before signing.
    pub signature_algorithm: Option<&'static SignatureAlgorithm>,
}

impl CertificateTemplate {
    /// Returns the stage the template was parsed for.
    #[must_use]
    pub const fn stage(&self) -> Stage {
        self.stage
    }

    /// Returns the `rcgen` parameters.
    #[must_use]
    pub const fn params(&self) -> &CertificateParams {
        &self.params
    }

    pub(crate) fn into_parts(self) -> (CertificateParams, PublicKey) {
        (self.params, self.subject_key)
    }
}

impl fmt::Debug for CertificateTemplate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CertificateTemplate")
            .field("stage", &self.stage)
            .field("serial_number", &self.params.serial_number)
            .field("signature_algorithm", &self.signature_algorithm)
            .finish_non_exhaustive()
    }
}

/// Everything a template needs besides its document.
#[derive(Debug, Clone, Copy)]
pub struct TemplateInputs<'a> {
    /// Chain stage being built.
    pub stage: Stage,
    /// Issuing certificate, `None` for a self-signed root.
    pub parent: Option<&'a Certificate>,
    /// Validity start.
    pub not_before: DateTime<Utc>,
    /// Validity end.
    pub not_after: DateTime<Utc>,
    /// Public key of the certificate subject.
    pub subject_key: &'a PublicKey,
    /// Subject common name.
    pub common_name: &'a str,
}

/// Parses and validates a template for one chain stage.
///
/// # Errors
///
/// Returns [`Error::Template`] if the document is malformed or does not fit
/// the stage (see [`validate_template`]).
pub fn parse_template(
    source: &TemplateSource,
    inputs: &TemplateInputs<'_>,
) -> Result<CertificateTemplate> {
    let document: TemplateDocument = serde_json::from_str(source.content())
        .map_err(|e| Error::Template(format!("error parsing {} template: {e}", inputs.stage)))?;

    validate_template(&document, inputs)?;

    let mut params = CertificateParams::default();
    params.distinguished_name = distinguished_name(&document.subject, inputs.common_name);
    params.is_ca = if document.basic_constraints.is_ca {
        IsCa::Ca(match document.basic_constraints.max_path_len {
            Some(len) => BasicConstraints::Constrained(len),
            None => BasicConstraints::Unconstrained,
        })
    } else {
        IsCa::ExplicitNoCa
    };
    params.key_usages = document.key_usage.iter().copied().map(Into::into).collect();
    params.extended_key_usages = document
        .ext_key_usage
        .iter()
        .copied()
        .map(Into::into)
        .collect();
    params.not_before = to_rcgen_time(inputs.not_before)?;
    params.not_after = to_rcgen_time(inputs.not_after)?;
    params.use_authority_key_identifier_extension = inputs.parent.is_some();
    params.serial_number = Some(serial_number(inputs));

    Ok(CertificateTemplate {
        stage: inputs.stage,
        params,
        subject_key: inputs.subject_key.clone(),
        signature_algorithm: None,
    })
}

/// Checks that a template document fits its stage.
fn validate_template(document: &TemplateDocument, inputs: &TemplateInputs<'_>) -> Result<()> {
    let stage = inputs.stage;
    let fail = |msg: String| Err(Error::Template(format!("{stage} template: {msg}")));

    if inputs.common_name.trim().is_empty() {
        return fail("subject common name cannot be empty".into());
    }
    if inputs.not_after <= inputs.not_before {
        return fail("notAfter must be after notBefore".into());
    }

    let is_ca = document.basic_constraints.is_ca;
    let has_usage = |usage| document.key_usage.contains(&usage);
    match stage {
        Stage::Root | Stage::Intermediate => {
            if !is_ca {
                return fail("CA certificate must have isCA set".into());
            }
            if !has_usage(KeyUsageName::CertSign) {
                return fail("CA certificate must have certSign key usage".into());
            }
        }
        Stage::Leaf => {
            if is_ca {
                return fail("leaf certificate cannot be a CA".into());
            }
            if document.basic_constraints.max_path_len.is_some() {
                return fail("leaf certificate cannot set maxPathLen".into());
            }
            if !has_usage(KeyUsageName::DigitalSignature) {
                return fail("leaf certificate must have digitalSignature key usage".into());
            }
            if !document.ext_key_usage.contains(&ExtKeyUsageName::CodeSigning) {
                return fail("leaf certificate must have CodeSigning extended key usage".into());
            }
        }
    }

    match (stage, inputs.parent) {
        (Stage::Root, Some(_)) => fail("root certificate cannot have a parent".into()),
        (Stage::Intermediate | Stage::Leaf, None) => fail("certificate must have a parent".into()),
        (Stage::Intermediate | Stage::Leaf, Some(parent)) => {
            if !parent.is_ca() {
                return fail(format!("parent '{}' is not a CA", parent.subject()));
            }
            if inputs.not_after.timestamp() > parent.not_after().timestamp() {
                return fail(format!(
                    "notAfter {} exceeds parent notAfter {}",
                    inputs.not_after.to_rfc3339(),
                    parent.not_after().to_rfc3339()
                ));
            }
            Ok(())
        }
        (Stage::Root, None) => Ok(()),
    }
}

/// Derives a positive serial from everything that distinguishes one issuance
/// from another, so that a fixed clock reproduces the same certificate.
fn serial_number(inputs: &TemplateInputs<'_>) -> SerialNumber {
    let mut hasher = Sha256::new();
    hasher.update(inputs.stage.to_string());
    hasher.update(inputs.subject_key.as_bytes());
    match inputs.parent {
        Some(parent) => hasher.update(parent.der()),
        None => hasher.update(inputs.common_name),
    }
    hasher.update(inputs.not_before.timestamp().to_be_bytes());
    hasher.update(inputs.not_after.timestamp().to_be_bytes());

    let mut serial = hasher.finalize()[..SERIAL_LEN].to_vec();
    serial[0] &= 0x7f;
    SerialNumber::from(serial)
}

fn distinguished_name(subject: &SubjectFields, common_name: &str) -> DistinguishedName {
    let mut dn = DistinguishedName::new();
    for country in &subject.country {
        dn.push(DnType::CountryName, country.as_str());
    }
    for province in &subject.province {
        dn.push(DnType::StateOrProvinceName, province.as_str());
    }
    for locality in &subject.locality {
        dn.push(DnType::LocalityName, locality.as_str());
    }
    for organization in &subject.organization {
        dn.push(DnType::OrganizationName, organization.as_str());
    }
    for unit in &subject.organizational_unit {
        dn.push(DnType::OrganizationalUnitName, unit.as_str());
    }
    dn.push(DnType::CommonName, common_name);
    dn
}

/// Converts a chrono `DateTime` to rcgen `OffsetDateTime`.
fn to_rcgen_time(dt: DateTime<Utc>) -> Result<time::OffsetDateTime> {
    time::OffsetDateTime::from_unix_timestamp(dt.timestamp())
        .map_err(|e| Error::Template(format!("invalid timestamp: {e}")))
}
