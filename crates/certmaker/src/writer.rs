//! PEM output.

use std::fs::OpenOptions;
use std::io::Write;
use std::path::Path;

use tracing::info;

use crate::error::{Error, Result};
use crate::types::{Certificate, CertificateRole};

/// Writes `cert` to `path` as a single PEM block and returns its role.
///
/// Existing files are truncated. A certificate with no DER bytes is
/// rejected before the file is created.
///
/// # Errors
///
/// Returns [`Error::Generation`] for an empty certificate and
/// [`Error::Io`] if the file cannot be written.
pub fn write_certificate_to_file(cert: &Certificate, path: &Path) -> Result<CertificateRole> {
    if cert.der().is_empty() {
        return Err(Error::Generation("certificate has no raw data".into()));
    }

    let role = cert.role();
    let pem = cert.pem();

    let io_error = |context: &str| {
        let path = path.to_path_buf();
        let context = context.to_string();
        move |source| Error::Io {
            context,
            path,
            source,
        }
    };

    let mut file = OpenOptions::new()
        .write(true)
        .create(true)
        .truncate(true)
        .open(path)
        .map_err(io_error("failed to create file"))?;
    file.write_all(pem.as_bytes())
        .map_err(io_error("failed to write PEM"))?;

    info!("Saved {} cert to {}", role, path.display());
    Ok(role)
}
