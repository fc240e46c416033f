//! TLS client setup: the relay's own certificate is the sole trust anchor.

use std::fs::File;
use std::io::BufReader;
use std::path::Path;
use std::sync::Arc;

use rustls::pki_types::ServerName;
use tokio_rustls::TlsConnector;

use crate::EndpointError;

/// Pick the ring provider once, tolerating a prior install.
pub(crate) fn ensure_crypto_provider() {
    let _ = rustls::crypto::ring::default_provider().install_default();
}

/// Build a connector trusting exactly `keys_dir/certificate.pem`, verifying
/// the relay presents `hostname`.
pub(crate) fn build_connector(
    keys_dir: &Path,
    hostname: &str,
) -> Result<(TlsConnector, ServerName<'static>), EndpointError> {
    ensure_crypto_provider();

    let cert_path = keys_dir.join("certificate.pem");
    let certs = rustls_pemfile::certs(&mut BufReader::new(File::open(&cert_path).map_err(
        |e| EndpointError::Credentials {
            path: cert_path.clone(),
            message: e.to_string(),
        },
    )?))
    .collect::<Result<Vec<_>, _>>()
    .map_err(|e| EndpointError::Credentials {
        path: cert_path.clone(),
        message: e.to_string(),
    })?;
    if certs.is_empty() {
        return Err(EndpointError::Credentials {
            path: cert_path,
            message: "no certificate found".to_owned(),
        });
    }

    let mut roots = rustls::RootCertStore::empty();
    for cert in certs {
        roots
            .add(cert)
            .map_err(|e| EndpointError::Tls(e.to_string()))?;
    }
    let config = rustls::ClientConfig::builder()
        .with_root_certificates(roots)
        .with_no_client_auth();
    let name = ServerName::try_from(hostname.to_owned())
        .map_err(|_| EndpointError::Config(format!("invalid hostname: {hostname}")))?;
    Ok((TlsConnector::from(Arc::new(config)), name))
}
