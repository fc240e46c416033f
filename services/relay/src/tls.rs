//! TLS acceptor construction from the configured credentials directory.

use std::fs::File;
use std::io::BufReader;
use std::path::Path;
use std::sync::Arc;

use tokio_rustls::TlsAcceptor;

use crate::RelayError;

/// Pick the ring provider once, tolerating a prior install.
pub(crate) fn ensure_crypto_provider() {
    let _ = rustls::crypto::ring::default_provider().install_default();
}

/// Build the acceptor from `keys_dir/certificate.pem` + `keys_dir/key.pem`.
pub(crate) fn build_acceptor(keys_dir: &Path) -> Result<TlsAcceptor, RelayError> {
    ensure_crypto_provider();

    let cert_path = keys_dir.join("certificate.pem");
    let certs = rustls_pemfile::certs(&mut BufReader::new(File::open(&cert_path).map_err(
        |e| RelayError::Credentials {
            path: cert_path.clone(),
            message: e.to_string(),
        },
    )?))
    .collect::<Result<Vec<_>, _>>()
    .map_err(|e| RelayError::Credentials {
        path: cert_path.clone(),
        message: e.to_string(),
    })?;
    if certs.is_empty() {
        return Err(RelayError::Credentials {
            path: cert_path,
            message: "no certificate found".to_owned(),
        });
    }

    let key_path = keys_dir.join("key.pem");
    let key = rustls_pemfile::private_key(&mut BufReader::new(File::open(&key_path).map_err(
        |e| RelayError::Credentials {
            path: key_path.clone(),
            message: e.to_string(),
        },
    )?))
    .map_err(|e| RelayError::Credentials {
        path: key_path.clone(),
        message: e.to_string(),
    })?
    .ok_or_else(|| RelayError::Credentials {
        path: key_path,
        message: "no private key found".to_owned(),
    })?;

    let config = rustls::ServerConfig::builder()
        .with_no_client_auth()
        .with_single_cert(certs, key)?;
    Ok(TlsAcceptor::from(Arc::new(config)))
}
