//! Server-side TLS plumbing shared by both transports.
//!
//! Certificates in this system are self-issued per agent; peers treat them as
//! opaque blobs and no CA chain is validated anywhere.

use std::fs::File;
use std::io::BufReader;
use std::path::Path;
use std::sync::Arc;

use mesh_a2a_core::{A2aError, Result};
use rustls_pki_types::{CertificateDer, PrivateKeyDer};
use tokio_rustls::rustls::ServerConfig;

/// Build a rustls server config from PEM cert/key files.
pub fn load_server_config(
    cert_file: &Path,
    key_file: &Path,
    alpn: &[&[u8]],
) -> Result<Arc<ServerConfig>> {
    let certs: Vec<CertificateDer<'static>> =
        rustls_pemfile::certs(&mut BufReader::new(File::open(cert_file)?))
            .collect::<std::io::Result<_>>()?;
    if certs.is_empty() {
        return Err(A2aError::transport(format!(
            "no certificates in {}",
            cert_file.display()
        )));
    }

    let key: PrivateKeyDer<'static> =
        rustls_pemfile::private_key(&mut BufReader::new(File::open(key_file)?))?
            .ok_or_else(|| {
                A2aError::transport(format!("no private key in {}", key_file.display()))
            })?;

    let mut config = ServerConfig::builder()
        .with_no_client_auth()
        .with_single_cert(certs, key)
        .map_err(A2aError::transport)?;
    config.alpn_protocols = alpn.iter().map(|p| p.to_vec()).collect();
    Ok(Arc::new(config))
}

/// Resolve the configured cert/key pair, erroring when TLS is enabled
/// without both files.
pub fn server_config_from(
    config: &crate::TransportConfig,
    alpn: &[&[u8]],
) -> Result<Arc<ServerConfig>> {
    match (&config.cert_file, &config.key_file) {
        (Some(cert), Some(key)) => load_server_config(cert, key, alpn),
        _ => Err(A2aError::transport(
            "ssl_enabled requires both cert_file and key_file",
        )),
    }
}
