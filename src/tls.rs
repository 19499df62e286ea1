use std::fs::File;
use std::io::{self, BufReader, ErrorKind};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use pgwire::tokio::TlsAcceptor;
use pgwire::tokio::tokio_rustls::rustls::ServerConfig;
use pgwire::tokio::tokio_rustls::rustls::pki_types::{CertificateDer, PrivateKeyDer};

/// PEM certificate chain and private key for the wire listener.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TlsFiles {
    pub cert: PathBuf,
    pub key: PathBuf,
}

impl TlsFiles {
    /// Pair up `STAYD_TLS_CERT` / `STAYD_TLS_KEY`. Neither set means plaintext.
    pub fn from_pair(cert: Option<&str>, key: Option<&str>) -> io::Result<Option<Self>> {
        match (cert, key) {
            (None, None) => Ok(None),
            (Some(cert), Some(key)) => Ok(Some(Self {
                cert: cert.into(),
                key: key.into(),
            })),
            (Some(_), None) => Err(half_configured("STAYD_TLS_KEY")),
            (None, Some(_)) => Err(half_configured("STAYD_TLS_CERT")),
        }
    }

    pub fn acceptor(&self) -> io::Result<TlsAcceptor> {
        let certs = read_certs(&self.cert)?;
        let key = read_key(&self.key)?;
        let mut config = ServerConfig::builder()
            .with_no_client_auth()
            .with_single_cert(certs, key)
            .map_err(|e| io::Error::new(ErrorKind::InvalidInput, e))?;
        config.alpn_protocols = vec![b"postgresql".to_vec()];
        Ok(TlsAcceptor::from(Arc::new(config)))
    }
}

/// Acceptor for the configured files, if any.
pub fn load_tls_acceptor(
    cert: Option<&str>,
    key: Option<&str>,
) -> io::Result<Option<TlsAcceptor>> {
    TlsFiles::from_pair(cert, key)?
        .map(|files| files.acceptor())
        .transpose()
}

fn half_configured(missing: &str) -> io::Error {
    io::Error::new(
        ErrorKind::InvalidInput,
        format!("{missing} is not set; TLS needs both a certificate and a key"),
    )
}

fn open(path: &Path) -> io::Result<BufReader<File>> {
    File::open(path)
        .map(BufReader::new)
        .map_err(|e| io::Error::new(e.kind(), format!("{}: {e}", path.display())))
}

fn read_certs(path: &Path) -> io::Result<Vec<CertificateDer<'static>>> {
    let certs: Vec<_> = rustls_pemfile::certs(&mut open(path)?).collect::<Result<_, _>>()?;
    if certs.is_empty() {
        return Err(io::Error::new(
            ErrorKind::InvalidInput,
            format!("{}: no certificates found", path.display()),
        ));
    }
    Ok(certs)
}

fn read_key(path: &Path) -> io::Result<PrivateKeyDer<'static>> {
    rustls_pemfile::private_key(&mut open(path)?)?.ok_or_else(|| {
        io::Error::new(
            ErrorKind::InvalidInput,
            format!("{}: no private key found", path.display()),
        )
    })
}
