//! Certificate chain construction.
//!
//! [`create_certificates`] builds a root, an optional intermediate and a leaf
//! certificate whose keys all live in a KMS, writing each one to disk as soon
//! as it is signed. Stages run strictly in order. A failure aborts the build
//! and leaves earlier files in place.

use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use tracing::{debug, info};

use crate::config::{KmsConfig, Lifetimes};
use crate::error::{Error, Result};
use crate::gateway::KmsGateway;
use crate::signer::{
    CryptoSigner, HashAlgorithm, KmsSigner, PublicKey, public_key_pair, signature_algorithm,
    signing_key_pair,
};
use crate::template::{CertificateTemplate, Stage, TemplateInputs, TemplateSource, parse_template};
use crate::types::Certificate;
use crate::writer::write_certificate_to_file;

/// Inputs of one chain build besides the KMS configuration.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ChainRequest {
    /// Root template file, or `None` for the built-in default.
    pub root_template: Option<PathBuf>,
    /// Intermediate template file, or `None` for the built-in default.
    pub intermediate_template: Option<PathBuf>,
    /// Leaf template file, or `None` for the built-in default.
    pub leaf_template: Option<PathBuf>,
    /// Output path of the root certificate.
    pub root_cert: PathBuf,
    /// Output path of the intermediate certificate.
    pub intermediate_cert: PathBuf,
    /// Output path of the leaf certificate.
    pub leaf_cert: PathBuf,
    /// Key of the intermediate CA. No intermediate is built when unset or empty.
    pub intermediate_key_id: Option<String>,
    /// Validity periods.
    pub lifetimes: Lifetimes,
}

impl ChainRequest {
    /// Creates a request writing `root.pem`, `intermediate.pem` and `leaf.pem`
    /// into `dir`, with default templates and lifetimes.
    #[must_use]
    pub fn in_dir(dir: &Path) -> Self {
        Self {
            root_cert: dir.join("root.pem"),
            intermediate_cert: dir.join("intermediate.pem"),
            leaf_cert: dir.join("leaf.pem"),
            ..Self::default()
        }
    }

    /// Sets the intermediate key identifier.
    #[must_use]
    pub fn intermediate_key_id(mut self, key_id: impl Into<String>) -> Self {
        self.intermediate_key_id = Some(key_id.into());
        self
    }

    fn intermediate_key(&self) -> Option<&str> {
        self.intermediate_key_id
            .as_deref()
            .filter(|id| !id.is_empty())
    }
}

/// A signed certificate together with the `rcgen` handle needed to issue
/// certificates below it.
pub struct IssuedCertificate {
    /// The parsed certificate.
    pub certificate: Certificate,
    signed: rcgen::Certificate,
}

impl fmt::Debug for IssuedCertificate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("IssuedCertificate")
            .field("certificate", &self.certificate)
            .finish_non_exhaustive()
    }
}

/// The certificates produced by one chain build.
#[derive(Debug)]
pub struct IssuedChain {
    /// Self-signed root.
    pub root: IssuedCertificate,
    /// Intermediate, when an intermediate key was configured.
    pub intermediate: Option<IssuedCertificate>,
    /// Leaf.
    pub leaf: IssuedCertificate,
}

impl IssuedChain {
    /// Returns the certificates leaf first, as [`validate_chain`] expects.
    #[must_use]
    pub fn certificates(&self) -> Vec<Certificate> {
        std::iter::once(&self.leaf)
            .chain(self.intermediate.as_ref())
            .chain(std::iter::once(&self.root))
            .map(|issued| issued.certificate.clone())
            .collect()
    }
}

/// Builds and writes a certificate chain, timestamped with the current time.
///
/// See [`create_certificates_at`].
///
/// # Errors
///
/// Returns [`Error::Stage`] naming the stage and step that failed.
pub fn create_certificates(
    gateway: &KmsGateway,
    root_signer: &dyn KmsSigner,
    config: &KmsConfig,
    request: &ChainRequest,
) -> Result<IssuedChain> {
    create_certificates_at(gateway, root_signer, config, request, Utc::now())
}

/// Builds and writes a certificate chain with validity starting at `now`.
///
/// The root is self-signed by `root_signer`. When the request names an
/// intermediate key, the intermediate is signed by the root key and then
/// issues the leaf; otherwise the root issues the leaf. Signers for the
/// intermediate and leaf keys are obtained from `gateway`, one fresh handle
/// per stage.
///
/// # Errors
///
/// Returns [`Error::Stage`] naming the stage and step that failed.
pub fn create_certificates_at(
    gateway: &KmsGateway,
    root_signer: &dyn KmsSigner,
    config: &KmsConfig,
    request: &ChainRequest,
    now: DateTime<Utc>,
) -> Result<IssuedChain> {
    info!("Creating certificate chain for {}", config.common_name);
    let issuance = Issuance {
        config,
        lifetimes: &request.lifetimes,
        now,
    };

    let root_key = root_signer
        .public_key()
        .map_err(|e| e.in_stage(Stage::Root, "error getting public key"))?;
    let root_crypto = root_signer
        .crypto_signer()
        .map_err(|e| e.in_stage(Stage::Root, "error getting crypto signer"))?;

    let root = issuance.issue(&StagePlan {
        stage: Stage::Root,
        template: request.root_template.as_deref(),
        parent: None,
        subject_key: &root_key,
        signing_key: &root_crypto,
        output: &request.root_cert,
    })?;

    let intermediate = match request.intermediate_key() {
        Some(key_id) => {
            let stage = Stage::Intermediate;
            let handle = gateway
                .init_kms(&config.with_active_key(key_id))
                .map_err(|e| e.in_stage(stage, "error initializing KMS"))?;
            let key = handle
                .public_key()
                .map_err(|e| e.in_stage(stage, "error getting public key"))?;
            let crypto = handle
                .crypto_signer()
                .map_err(|e| e.in_stage(stage, "error getting crypto signer"))?;

            let issued = issuance.issue(&StagePlan {
                stage,
                template: request.intermediate_template.as_deref(),
                parent: Some(&root),
                subject_key: &key,
                signing_key: &root_crypto,
                output: &request.intermediate_cert,
            })?;
            Some((issued, crypto))
        }
        None => None,
    };

    let (issuer, issuer_key) = intermediate
        .as_ref()
        .map_or((&root, &root_crypto), |(cert, key)| (cert, key));

    let stage = Stage::Leaf;
    let leaf_handle = gateway
        .init_kms(&config.with_active_key(&config.leaf_key_id))
        .map_err(|e| e.in_stage(stage, "error initializing KMS"))?;
    let leaf_key = leaf_handle
        .public_key()
        .map_err(|e| e.in_stage(stage, "error getting public key"))?;
    leaf_handle
        .crypto_signer()
        .map_err(|e| e.in_stage(stage, "error getting crypto signer"))?;

    let leaf = issuance.issue(&StagePlan {
        stage,
        template: request.leaf_template.as_deref(),
        parent: Some(issuer),
        subject_key: &leaf_key,
        signing_key: issuer_key,
        output: &request.leaf_cert,
    })?;

    Ok(IssuedChain {
        root,
        intermediate: intermediate.map(|(issued, _)| issued),
        leaf,
    })
}

/// Settings shared by every stage of one chain build.
struct Issuance<'a> {
    config: &'a KmsConfig,
    lifetimes: &'a Lifetimes,
    now: DateTime<Utc>,
}

/// Everything needed to issue and write one certificate.
struct StagePlan<'a> {
    stage: Stage,
    template: Option<&'a Path>,
    parent: Option<&'a IssuedCertificate>,
    subject_key: &'a PublicKey,
    signing_key: &'a Arc<dyn CryptoSigner>,
    output: &'a Path,
}

impl Issuance<'_> {
    fn issue(&self, plan: &StagePlan<'_>) -> Result<IssuedCertificate> {
        let stage = plan.stage;
        debug!("Issuing {} certificate", stage);

        let lifetime = self
            .lifetimes
            .for_stage(stage)
            .map_err(|e| e.in_stage(stage, "error parsing template"))?;
        let not_after = self.now.checked_add_signed(lifetime).ok_or_else(|| {
            Error::InvalidConfig(format!("{stage} lifetime overflows the validity period"))
                .in_stage(stage, "error parsing template")
        })?;
        let source = TemplateSource::resolve(stage, plan.template)
            .map_err(|e| e.in_stage(stage, "error parsing template"))?;
        let mut template = parse_template(
            &source,
            &TemplateInputs {
                stage,
                parent: plan.parent.map(|issued| &issued.certificate),
                not_before: self.now,
                not_after,
                subject_key: plan.subject_key,
                common_name: &self.config.common_name,
            },
        )
        .map_err(|e| e.in_stage(stage, "error parsing template"))?;

        template.signature_algorithm = Some(
            signature_algorithm(plan.signing_key.as_ref(), HashAlgorithm::Sha256)
                .map_err(|e| e.in_stage(stage, "error getting signature algorithm"))?,
        );

        let issued = sign_certificate(template, plan.parent, plan.signing_key)
            .map_err(|e| e.in_stage(stage, "error creating certificate"))?;
        write_certificate_to_file(&issued.certificate, plan.output)
            .map_err(|e| e.in_stage(stage, "failed to write certificate"))?;
        Ok(issued)
    }
}

/// Signs `template` with `signing_key`.
///
/// Without an issuer the certificate is self-signed, so the template's
/// subject key must be the signing key.
///
/// # Errors
///
/// Fails if the template has no signature algorithm, if it differs from the
/// one the signing key produces, or if the KMS refuses to sign.
pub fn sign_certificate(
    template: CertificateTemplate,
    issuer: Option<&IssuedCertificate>,
    signing_key: &Arc<dyn CryptoSigner>,
) -> Result<IssuedCertificate> {
    let stage = template.stage();
    let expected = template.signature_algorithm.ok_or_else(|| {
        Error::Generation(format!("{stage} template has no signature algorithm"))
    })?;
    let actual = signature_algorithm(signing_key.as_ref(), signing_key.hash())?;
    if expected != actual {
        return Err(Error::AlgorithmMismatch {
            expected: format!("{expected:?}"),
            actual: format!("{actual:?}"),
        });
    }

    let (params, subject_key) = template.into_parts();
    let (key_pair, failure) = signing_key_pair(Arc::clone(signing_key), actual)?;

    let signed = match issuer {
        None => {
            if &subject_key != signing_key.public_key() {
                return Err(Error::Generation(
                    "self-signed certificate must carry the signing key".into(),
                ));
            }
            params.self_signed(&key_pair)
        }
        Some(issuer) => {
            let subject = public_key_pair(&subject_key)?;
            params.signed_by(&subject, &issuer.signed, &key_pair)
        }
    }
    .map_err(|e| {
        failure
            .take()
            .unwrap_or_else(|| Error::Generation(format!("failed to sign certificate: {e}")))
    })?;

    let certificate = Certificate::from_der(signed.der())?;
    info!("Created {} certificate: {}", stage, certificate.subject());

    Ok(IssuedCertificate {
        certificate,
        signed,
    })
}

/// Validates a certificate chain.
///
/// The chain is ordered leaf first, root last. Every certificate must be
/// signed by the next one and name it as issuer, every issuer must be a CA,
/// and the last certificate must be self-signed.
///
/// # Errors
///
/// Returns [`Error::InvalidChain`] or [`Error::SignatureVerification`]
/// describing the first broken link.
pub fn validate_chain(chain: &[Certificate]) -> Result<()> {
    let Some(root) = chain.last() else {
        return Err(Error::InvalidChain("empty certificate chain".into()));
    };

    for link in chain.windows(2) {
        let [cert, issuer] = link else { continue };
        debug!("Validating certificate: {}", cert.subject());

        if !issuer.is_ca() {
            return Err(Error::InvalidChain(format!("issuer '{}' is not a CA", issuer.subject())));
        }
        if !cert.is_issued_by_name(issuer)? {
            return Err(Error::InvalidChain(format!(
                "issuer name of '{}' does not match subject name of '{}'",
                cert.subject(),
                issuer.subject()
            )));
        }
        if cert.not_after() > issuer.not_after() {
            return Err(Error::InvalidChain(format!(
                "'{}' outlives its issuer '{}'",
                cert.subject(),
                issuer.subject()
            )));
        }
        cert.verify_signed_by(issuer)?;
    }

    if !root.is_issued_by_name(root)? {
        return Err(Error::InvalidChain("last certificate is not self-signed".into()));
    }
    root.verify_signed_by(root)?;

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{ProviderKind, VAULT_ADDRESS, VAULT_TOKEN};
    use crate::gateway::KmsBackend;
    use crate::local::LocalKms;
    use crate::provider::KmsTarget;
    use crate::signer::KeyAlgorithm;
    use crate::types::CertificateRole;
    use chrono::Duration;
    use ed25519_dalek::SigningKey;
    use test_case::test_case;

    fn config() -> KmsConfig {
        KmsConfig::new(
            "Sigstore",
            ProviderKind::HashiVault,
            "transit/keys/root",
            "transit/keys/leaf",
        )
        .option(VAULT_TOKEN, "token")
        .option(VAULT_ADDRESS, "http://127.0.0.1:8200")
    }

    fn setup() -> (Arc<LocalKms>, KmsGateway, Arc<dyn KmsSigner>) {
        let kms = Arc::new(LocalKms::new());
        let gateway = KmsGateway::new().with_backend(ProviderKind::HashiVault, kms.clone());
        let root = gateway.init_kms(&config()).unwrap();
        (kms, gateway, root)
    }

    fn with_intermediate(dir: &Path) -> ChainRequest {
        ChainRequest::in_dir(dir).intermediate_key_id("transit/keys/intermediate")
    }

    fn failed_stage(err: &Error) -> Option<Stage> {
        match err {
            Error::Stage { stage, .. } => Some(*stage),
            _ => None,
        }
    }

    /// Asserts that exactly the first `count` outputs of `request` were written.
    fn assert_written(request: &ChainRequest, count: usize) {
        let outputs = [
            &request.root_cert,
            &request.intermediate_cert,
            &request.leaf_cert,
        ];
        for (i, path) in outputs.iter().enumerate() {
            assert_eq!(path.exists(), i < count, "{}", path.display());
        }
    }

    #[derive(Debug, Clone, Copy)]
    enum Fault {
        /// The handle cannot hand out a signing capability.
        NoCryptoSigner,
        /// The KMS refuses every signing request.
        DenySign,
    }

    /// `LocalKms` with one broken key.
    struct FaultyKms {
        inner: LocalKms,
        key_uri: String,
        fault: Fault,
    }

    struct FaultySigner {
        inner: Arc<dyn KmsSigner>,
        fault: Option<Fault>,
    }

    struct DenyingSigner(Arc<dyn CryptoSigner>);

    impl KmsBackend for FaultyKms {
        fn signer(&self, target: &KmsTarget, hash: HashAlgorithm) -> Result<Arc<dyn KmsSigner>> {
            let inner = self.inner.signer(target, hash)?;
            let fault = (target.key_uri == self.key_uri).then_some(self.fault);
            Ok(Arc::new(FaultySigner { inner, fault }))
        }
    }

    impl KmsSigner for FaultySigner {
        fn key_uri(&self) -> &str {
            self.inner.key_uri()
        }

        fn public_key(&self) -> Result<PublicKey> {
            self.inner.public_key()
        }

        fn crypto_signer(&self) -> Result<Arc<dyn CryptoSigner>> {
            let crypto = self.inner.crypto_signer()?;
            match self.fault {
                Some(Fault::NoCryptoSigner) => Err(Error::Capability(format!(
                    "{} is verify-only",
                    self.key_uri()
                ))),
                Some(Fault::DenySign) => Ok(Arc::new(DenyingSigner(crypto))),
                None => Ok(crypto),
            }
        }
    }

    impl CryptoSigner for DenyingSigner {
        fn public_key(&self) -> &PublicKey {
            self.0.public_key()
        }

        fn hash(&self) -> HashAlgorithm {
            self.0.hash()
        }

        fn sign(&self, _message: &[u8]) -> Result<Vec<u8>> {
            Err(Error::Signing("AccessDeniedException: kms:Sign".into()))
        }
    }

    fn faulty_setup(key_id: &str, fault: Fault) -> (KmsGateway, Arc<dyn KmsSigner>) {
        let kms = Arc::new(FaultyKms {
            inner: LocalKms::new(),
            key_uri: format!("hashivault://{key_id}"),
            fault,
        });
        let gateway = KmsGateway::new().with_backend(ProviderKind::HashiVault, kms);
        let root = gateway.init_kms(&config()).unwrap();
        (gateway, root)
    }

    #[test]
    fn root_and_leaf_without_intermediate() {
        let dir = tempfile::tempdir().unwrap();
        let (_, gateway, root) = setup();
        let request = ChainRequest::in_dir(dir.path());

        let chain = create_certificates(&gateway, root.as_ref(), &config(), &request).unwrap();

        assert!(chain.intermediate.is_none());
        assert_eq!(chain.root.certificate.role(), CertificateRole::Root);
        assert_eq!(chain.leaf.certificate.role(), CertificateRole::Leaf);
        let leaf = &chain.leaf.certificate;
        leaf.verify_signed_by(&chain.root.certificate).unwrap();
        validate_chain(&chain.certificates()).unwrap();
        assert!(!dir.path().join("intermediate.pem").exists());
    }

    #[test]
    fn intermediate_issues_leaf() {
        let dir = tempfile::tempdir().unwrap();
        let (_, gateway, root) = setup();
        let request = with_intermediate(dir.path());

        let chain = create_certificates(&gateway, root.as_ref(), &config(), &request).unwrap();

        let intermediate = &chain.intermediate.as_ref().unwrap().certificate;
        let leaf = &chain.leaf.certificate;
        assert_eq!(intermediate.role(), CertificateRole::Intermediate);
        leaf.verify_signed_by(intermediate).unwrap();
        assert!(leaf.verify_signed_by(&chain.root.certificate).is_err());
        assert_eq!(chain.certificates().len(), 3);
        validate_chain(&chain.certificates()).unwrap();
    }

    #[test]
    fn empty_intermediate_key_is_skipped() {
        let dir = tempfile::tempdir().unwrap();
        let (kms, gateway, root) = setup();
        let request = ChainRequest::in_dir(dir.path()).intermediate_key_id("");

        let chain = create_certificates(&gateway, root.as_ref(), &config(), &request).unwrap();

        assert!(chain.intermediate.is_none());
        assert_eq!(
            kms.requests(),
            vec![
                "hashivault://transit/keys/root",
                "hashivault://transit/keys/leaf",
            ]
        );
    }

    #[test]
    fn shared_root_and_leaf_key_get_distinct_serials() {
        let dir = tempfile::tempdir().unwrap();
        let (kms, gateway, root) = setup();
        let mut config = config();
        config.leaf_key_id = "transit/keys/root".into();
        let request = ChainRequest::in_dir(dir.path());

        let chain = create_certificates(&gateway, root.as_ref(), &config, &request).unwrap();

        // The leaf signer is still fetched for the shared key.
        assert_eq!(kms.requests().len(), 2);
        let root_cert = &chain.root.certificate;
        let leaf_cert = &chain.leaf.certificate;
        assert!(leaf_cert.is_issued_by_name(root_cert).unwrap());
        assert_ne!(leaf_cert.serial().unwrap(), root_cert.serial().unwrap());
        validate_chain(&chain.certificates()).unwrap();
    }

    #[test]
    fn reissue_with_same_keys_changes_serials() {
        let (_, gateway, root) = setup();
        let now = Utc::now();
        let first_dir = tempfile::tempdir().unwrap();
        let second_dir = tempfile::tempdir().unwrap();
        let build = |request: &ChainRequest, at| {
            create_certificates_at(&gateway, root.as_ref(), &config(), request, at).unwrap()
        };

        let first = build(&with_intermediate(first_dir.path()), now);
        let later = now + Duration::hours(1);
        let second = build(&with_intermediate(second_dir.path()), later);

        let serials = |chain: &IssuedChain| -> Vec<Vec<u8>> {
            chain
                .certificates()
                .iter()
                .map(|cert| cert.serial().unwrap())
                .collect()
        };
        let before = serials(&first);
        let after = serials(&second);
        assert!(before.iter().zip(&after).all(|(old, new)| old != new));
    }

    #[test]
    fn missing_leaf_backend_keeps_root_file() {
        let dir = tempfile::tempdir().unwrap();
        let kms = Arc::new(LocalKms::strict());
        let root_key = SigningKey::from_bytes(&[1; 32]);
        kms.insert("hashivault://transit/keys/root", root_key);
        let gateway = KmsGateway::new().with_backend(ProviderKind::HashiVault, kms.clone());
        let target = KmsTarget::from_config(&config()).unwrap();
        let root = kms.signer(&target, HashAlgorithm::Sha256).unwrap();
        let request = ChainRequest::in_dir(dir.path());

        let err = create_certificates(&gateway, root.as_ref(), &config(), &request).unwrap_err();

        assert_eq!(failed_stage(&err), Some(Stage::Leaf));
        assert!(matches!(err.root_cause(), Error::KeyNotFound(_)));
        let expected =
            "leaf certificate: error initializing KMS: failed to initialize HashiVault KMS";
        assert!(err.to_string().starts_with(expected));
        assert!(request.root_cert.exists());
        assert!(!request.leaf_cert.exists());
    }

    #[test_case(
        "transit/keys/intermediate",
        Stage::Intermediate,
        1 ;
        "intermediate"
    )]
    #[test_case("transit/keys/leaf", Stage::Leaf, 2 ; "leaf")]
    fn missing_crypto_signer_stops_at_its_stage(key_id: &str, stage: Stage, written: usize) {
        let dir = tempfile::tempdir().unwrap();
        let (gateway, root) = faulty_setup(key_id, Fault::NoCryptoSigner);
        let request = with_intermediate(dir.path());

        let err = create_certificates(&gateway, root.as_ref(), &config(), &request).unwrap_err();

        assert_eq!(failed_stage(&err), Some(stage));
        assert!(matches!(err.root_cause(), Error::Capability(_)));
        let expected = format!("{stage} certificate: error getting crypto signer");
        assert!(err.to_string().starts_with(&expected));
        assert_written(&request, written);
    }

    #[test]
    fn missing_root_crypto_signer_writes_nothing() {
        let dir = tempfile::tempdir().unwrap();
        let (gateway, root) = faulty_setup("transit/keys/root", Fault::NoCryptoSigner);
        let request = with_intermediate(dir.path());

        let err = create_certificates(&gateway, root.as_ref(), &config(), &request).unwrap_err();

        assert_eq!(failed_stage(&err), Some(Stage::Root));
        assert!(matches!(err.root_cause(), Error::Capability(_)));
        assert_written(&request, 0);
    }

    #[test_case("transit/keys/root", Stage::Root, 0 ; "root key")]
    #[test_case("transit/keys/intermediate", Stage::Leaf, 2 ; "intermediate key")]
    fn kms_sign_failure_surfaces_original_error(key_id: &str, stage: Stage, written: usize) {
        let dir = tempfile::tempdir().unwrap();
        let (gateway, root) = faulty_setup(key_id, Fault::DenySign);
        let request = with_intermediate(dir.path());

        let err = create_certificates(&gateway, root.as_ref(), &config(), &request).unwrap_err();

        assert_eq!(failed_stage(&err), Some(stage));
        assert_eq!(
            err.to_string(),
            format!(
                "{stage} certificate: error creating certificate: \
                 signing failed: AccessDeniedException: kms:Sign"
            )
        );
        assert!(matches!(err.root_cause(), Error::Signing(_)));
        assert_written(&request, written);
    }

    #[test_case(Stage::Root, 0 ; "root")]
    #[test_case(Stage::Intermediate, 1 ; "intermediate")]
    #[test_case(Stage::Leaf, 2 ; "leaf")]
    fn out_of_range_lifetime_stops_at_its_stage(stage: Stage, written: usize) {
        let dir = tempfile::tempdir().unwrap();
        let (_, gateway, root) = setup();
        let mut request = with_intermediate(dir.path());
        match stage {
            Stage::Root => request.lifetimes.root_hours = i64::MAX,
            Stage::Intermediate => request.lifetimes.intermediate_hours = i64::MAX,
            Stage::Leaf => request.lifetimes.leaf_hours = i64::MAX,
        }

        let err = create_certificates(&gateway, root.as_ref(), &config(), &request).unwrap_err();

        assert_eq!(failed_stage(&err), Some(stage));
        assert!(matches!(err.root_cause(), Error::InvalidConfig(_)));
        assert_written(&request, written);
    }

    #[test]
    fn lifetime_past_calendar_end_is_config_error() {
        let dir = tempfile::tempdir().unwrap();
        let (_, gateway, root) = setup();
        let mut request = ChainRequest::in_dir(dir.path());
        request.lifetimes.root_hours = 2_500_000_000;

        let err = create_certificates(&gateway, root.as_ref(), &config(), &request).unwrap_err();

        assert_eq!(failed_stage(&err), Some(Stage::Root));
        assert_eq!(
            err.root_cause().to_string(),
            "invalid KMS configuration: root lifetime overflows the validity period"
        );
        assert_written(&request, 0);
    }

    #[test]
    fn template_without_algorithm_is_refused() {
        let key = PublicKey::new(KeyAlgorithm::Ed25519, vec![5; 32]);
        let now = Utc::now();
        let template = parse_template(
            &TemplateSource::Default(Stage::Root),
            &TemplateInputs {
                stage: Stage::Root,
                parent: None,
                not_before: now,
                not_after: now + Duration::days(1),
                subject_key: &key,
                common_name: "Sigstore",
            },
        )
        .unwrap();
        let (_, _, root) = setup();
        let signer = root.crypto_signer().unwrap();

        let err = sign_certificate(template, None, &signer).unwrap_err();
        let msg = err.to_string();
        assert!(msg.contains("root template has no signature algorithm"));
    }

    #[test]
    fn mismatched_algorithm_is_refused() {
        let (_, _, root) = setup();
        let key = root.public_key().unwrap();
        let now = Utc::now();
        let mut template = parse_template(
            &TemplateSource::Default(Stage::Root),
            &TemplateInputs {
                stage: Stage::Root,
                parent: None,
                not_before: now,
                not_after: now + Duration::days(1),
                subject_key: &key,
                common_name: "Sigstore",
            },
        )
        .unwrap();
        template.signature_algorithm = Some(&rcgen::PKCS_ECDSA_P256_SHA256);

        let err = sign_certificate(template, None, &root.crypto_signer().unwrap()).unwrap_err();
        assert!(matches!(err, Error::AlgorithmMismatch { .. }));
    }

    #[test]
    fn validate_chain_rejects_empty_and_misordered() {
        assert!(matches!(validate_chain(&[]), Err(Error::InvalidChain(_))));

        let dir = tempfile::tempdir().unwrap();
        let (_, gateway, root) = setup();
        let request = ChainRequest::in_dir(dir.path());
        let chain = create_certificates(&gateway, root.as_ref(), &config(), &request).unwrap();

        let mut reversed = chain.certificates();
        reversed.reverse();
        assert!(validate_chain(&reversed).is_err());
    }

    #[test]
    fn validate_chain_compares_full_issuer_name() {
        let (_, gateway, root) = setup();
        let now = Utc::now();
        let dir = tempfile::tempdir().unwrap();
        let template = dir.path().join("root.json");
        std::fs::write(
            &template,
            r#"{
                "subject": {"organization": ["Sigstore"], "organizationalUnit": ["Other Root"]},
                "keyUsage": ["certSign", "crlSign"],
                "basicConstraints": {"isCA": true, "maxPathLen": 1}
            }"#,
        )
        .unwrap();
        let first_dir = tempfile::tempdir().unwrap();
        let second_dir = tempfile::tempdir().unwrap();
        let mut second_request = ChainRequest::in_dir(second_dir.path());
        second_request.root_template = Some(template);
        let build = |request: &ChainRequest| {
            create_certificates_at(&gateway, root.as_ref(), &config(), request, now).unwrap()
        };

        let first = build(&ChainRequest::in_dir(first_dir.path()));
        let second = build(&second_request);

        // Same root key and common name, different organizational unit.
        let leaf = first.leaf.certificate;
        let other_root = second.root.certificate;
        assert_eq!(leaf.issuer(), other_root.subject());
        leaf.verify_signed_by(&other_root).unwrap();

        let err = validate_chain(&[leaf, other_root]).unwrap_err();
        assert!(matches!(err, Error::InvalidChain(_)));
        assert!(err.to_string().contains("does not match subject name"));
    }
}
