//! Parsed certificates and their role in a chain.

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use x509_parser::prelude::*;

use crate::error::{Error, Result};

/// Role of a certificate within a chain.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CertificateRole {
    /// Self-signed CA certificate.
    Root,
    /// CA certificate signed by another CA.
    Intermediate,
    /// End-entity certificate.
    Leaf,
}

impl fmt::Display for CertificateRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Root => "root",
            Self::Intermediate => "intermediate",
            Self::Leaf => "leaf",
        })
    }
}

/// A DER-encoded X.509 certificate with metadata.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Certificate {
    /// DER-encoded certificate bytes.
    der: Vec<u8>,
    /// Certificate validity start time.
    not_before: DateTime<Utc>,
    /// Certificate validity end time.
    not_after: DateTime<Utc>,
    /// Subject common name.
    subject: String,
    /// Issuer common name.
    issuer: String,
    /// Whether basic constraints mark this certificate as a CA.
    is_ca: bool,
}

impl Certificate {
    /// Creates a certificate from raw DER bytes and metadata without parsing.
    #[must_use]
    pub const fn new(
        der: Vec<u8>,
        not_before: DateTime<Utc>,
        not_after: DateTime<Utc>,
        subject: String,
        issuer: String,
        is_ca: bool,
    ) -> Self {
        Self {
            der,
            not_before,
            not_after,
            subject,
            issuer,
            is_ca,
        }
    }

    /// Parses a certificate from DER-encoded bytes.
    ///
    /// # Errors
    ///
    /// Returns an error if parsing fails.
    pub fn from_der(der: &[u8]) -> Result<Self> {
        let cert = parse(der, "certificate")?;

        let not_before = DateTime::from_timestamp(cert.validity().not_before.timestamp(), 0)
            .ok_or_else(|| Error::Parse("invalid not_before timestamp".into()))?;
        let not_after = DateTime::from_timestamp(cert.validity().not_after.timestamp(), 0)
            .ok_or_else(|| Error::Parse("invalid not_after timestamp".into()))?;

        let subject = extract_common_name(cert.subject())?;
        let issuer = extract_common_name(cert.issuer())?;
        let is_ca = cert
            .basic_constraints()
            .map_err(|e| Error::Parse(format!("invalid basic constraints: {e}")))?
            .is_some_and(|bc| bc.value.ca);

        Ok(Self {
            der: der.to_vec(),
            not_before,
            not_after,
            subject,
            issuer,
            is_ca,
        })
    }

    /// Returns the DER-encoded certificate bytes.
    #[must_use]
    pub fn der(&self) -> &[u8] {
        &self.der
    }

    /// Returns the PEM-encoded certificate.
    #[must_use]
    pub fn pem(&self) -> String {
        use base64::Engine;
        let b64 = base64::engine::general_purpose::STANDARD.encode(&self.der);
        format!(
            "-----BEGIN CERTIFICATE-----\n{}\n-----END CERTIFICATE-----\n",
            b64.as_bytes()
                .chunks(64)
                .map(|chunk| std::str::from_utf8(chunk).unwrap_or(""))
                .collect::<Vec<_>>()
                .join("\n")
        )
    }

    /// Returns the certificate validity start time.
    #[must_use]
    pub const fn not_before(&self) -> DateTime<Utc> {
        self.not_before
    }

    /// Returns the certificate validity end time.
    #[must_use]
    pub const fn not_after(&self) -> DateTime<Utc> {
        self.not_after
    }

    /// Returns the subject common name.
    #[must_use]
    pub fn subject(&self) -> &str {
        &self.subject
    }

    /// Returns the issuer common name.
    #[must_use]
    pub fn issuer(&self) -> &str {
        &self.issuer
    }

    /// Returns `true` if the certificate is a CA.
    #[must_use]
    pub const fn is_ca(&self) -> bool {
        self.is_ca
    }

    /// Verifies that this certificate was signed by `issuer`'s key.
    ///
    /// # Errors
    ///
    /// Returns an error if either certificate cannot be parsed or the
    /// signature does not verify.
    pub fn verify_signed_by(&self, issuer: &Self) -> Result<()> {
        let parsed_cert = parse(&self.der, "certificate")?;
        let parsed_issuer = parse(&issuer.der, "issuer certificate")?;

        parsed_cert
            .verify_signature(Some(parsed_issuer.public_key()))
            .map_err(|e| {
                Error::SignatureVerification(format!(
                    "signature verification failed for '{}': {:?}",
                    self.subject, e
                ))
            })
    }

    /// Returns the serial number as encoded in the certificate.
    ///
    /// # Errors
    ///
    /// Returns an error if the certificate cannot be parsed.
    pub fn serial(&self) -> Result<Vec<u8>> {
        Ok(parse(&self.der, "certificate")?.raw_serial().to_vec())
    }

    /// Returns `true` if this certificate's issuer name is byte-for-byte
    /// `issuer`'s subject name.
    ///
    /// # Errors
    ///
    /// Returns an error if either certificate cannot be parsed.
    pub fn is_issued_by_name(&self, issuer: &Self) -> Result<bool> {
        let parsed_cert = parse(&self.der, "certificate")?;
        let parsed_issuer = parse(&issuer.der, "issuer certificate")?;
        let issuer_name = parsed_cert.issuer().as_raw();
        Ok(issuer_name == parsed_issuer.subject().as_raw())
    }

    /// Returns `true` if the certificate's signature verifies against its own key.
    #[must_use]
    pub fn is_self_signed(&self) -> bool {
        self.verify_signed_by(self).is_ok()
    }

    /// Classifies the certificate: a self-signed CA is a root, any other CA
    /// an intermediate, and everything else a leaf.
    #[must_use]
    pub fn role(&self) -> CertificateRole {
        if !self.is_ca {
            CertificateRole::Leaf
        } else if self.is_self_signed() {
            CertificateRole::Root
        } else {
            CertificateRole::Intermediate
        }
    }
}

fn parse<'a>(der: &'a [u8], what: &str) -> Result<X509Certificate<'a>> {
    X509Certificate::from_der(der)
        .map(|(_, cert)| cert)
        .map_err(|e| Error::Parse(format!("failed to parse {what}: {e}")))
}

/// Extracts the common name from an X.509 name.
fn extract_common_name(name: &X509Name) -> Result<String> {
    for rdn in name.iter() {
        for attr in rdn.iter() {
            if attr.attr_type() == &x509_parser::oid_registry::OID_X509_COMMON_NAME {
                return attr
                    .as_str()
                    .map(String::from)
                    .map_err(|e| Error::Parse(format!("failed to parse CN: {e}")));
            }
        }
    }
    Err(Error::Parse("common name not found".into()))
}
