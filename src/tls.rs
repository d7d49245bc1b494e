use std::fs::File;
use std::io::{self, BufReader, ErrorKind};
use std::path::Path;
use std::sync::Arc;

use pgwire::tokio::TlsAcceptor;
use pgwire::tokio::tokio_rustls::rustls::ServerConfig;
use pgwire::tokio::tokio_rustls::rustls::pki_types::{CertificateDer, PrivateKeyDer};
use tracing::info;

use crate::config::Config;

/// Acceptor for `SEATLINE_TLS_CERT` / `SEATLINE_TLS_KEY`, or `None` for plaintext.
pub fn acceptor(config: &Config) -> io::Result<Option<TlsAcceptor>> {
    let (cert_path, key_path) = match (config.tls_cert.as_deref(), config.tls_key.as_deref()) {
        (None, None) => return Ok(None),
        (Some(cert), Some(key)) => (Path::new(cert), Path::new(key)),
        (cert, _) => {
            let missing = if cert.is_none() { "SEATLINE_TLS_CERT" } else { "SEATLINE_TLS_KEY" };
            return Err(io::Error::new(
                ErrorKind::InvalidInput,
                format!("{missing} is unset; TLS needs both a certificate and a key"),
            ));
        }
    };

    let chain = certificate_chain(cert_path)?;
    let key = private_key(key_path)?;
    let mut server = ServerConfig::builder()
        .with_no_client_auth()
        .with_single_cert(chain, key)
        .map_err(|e| io::Error::new(ErrorKind::InvalidInput, e))?;
    server.alpn_protocols = vec![b"postgresql".to_vec()];

    info!("TLS certificate loaded from {}", cert_path.display());
    Ok(Some(TlsAcceptor::from(Arc::new(server))))
}

fn open(path: &Path) -> io::Result<BufReader<File>> {
    File::open(path)
        .map(BufReader::new)
        .map_err(|e| io::Error::new(e.kind(), format!("{}: {e}", path.display())))
}

fn certificate_chain(path: &Path) -> io::Result<Vec<CertificateDer<'static>>> {
    let chain = rustls_pemfile::certs(&mut open(path)?).collect::<Result<Vec<_>, _>>()?;
    if chain.is_empty() {
        return Err(io::Error::new(
            ErrorKind::InvalidInput,
            format!("{}: no certificate found", path.display()),
        ));
    }
    Ok(chain)
}

fn private_key(path: &Path) -> io::Result<PrivateKeyDer<'static>> {
    rustls_pemfile::private_key(&mut open(path)?)?.ok_or_else(|| {
        io::Error::new(
            ErrorKind::InvalidInput,
            format!("{}: no private key found", path.display()),
        )
    })
}
