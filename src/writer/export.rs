//! Certificate export for proxies that load certificates from files.

use std::path::Path;

use crate::descriptor::RouteDescriptor;
use crate::store::CertificateBundle;
use crate::writer::atomic::AtomicFile;
use crate::writer::types::WriteError;

/// Write the chain and key of every certificate the descriptor references
/// through `tls.certificates`.
///
/// Files whose content is already current are left alone. Returns how many
/// certificates were written.
pub fn export_certificates(
    descriptor: &RouteDescriptor,
    bundle: &CertificateBundle,
) -> Result<usize, WriteError> {
    let mut written = 0;

    for reference in descriptor.certificates() {
        let Some(files) = &reference.files else {
            continue;
        };
        let certificate = bundle
            .certificates()
            .iter()
            .find(|c| c.fingerprint == reference.fingerprint)
            .ok_or_else(|| WriteError::MissingCertificate {
                fingerprint: reference.fingerprint.clone(),
            })?;

        let chain_current = is_current(&files.cert_file, &certificate.chain_pem);
        let key_current = is_current(&files.key_file, certificate.key.expose());
        if chain_current && key_current {
            continue;
        }

        // Stage both before committing either. The chain goes first: if the
        // key commit fails, the pair stays mismatched until the next cycle
        // finds the stale key and writes it again.
        let chain = AtomicFile::new(&files.cert_file).stage(&certificate.chain_pem)?;
        let key = AtomicFile::private(&files.key_file).stage(certificate.key.expose())?;
        chain.commit()?;
        key.commit()?;

        tracing::info!(
            fingerprint = %reference.fingerprint,
            cert_file = %files.cert_file.display(),
            "Exported certificate"
        );
        written += 1;
    }

    Ok(written)
}

fn is_current(path: &Path, expected: &[u8]) -> bool {
    std::fs::read(path).map(|b| b == expected).unwrap_or(false)
}
