//! TLS support for network endpoints
//!
//! Builds rustls acceptors and connectors from PEM files, generating a
//! self-signed server certificate when none is configured.

use std::io::{self, BufReader};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use rustls::pki_types::{CertificateDer, PrivateKeyDer, PrivatePkcs8KeyDer, ServerName};
use rustls::{ClientConfig, RootCertStore, ServerConfig};
use rustls_pemfile::{certs, private_key};
use thiserror::Error;
use tokio_rustls::{TlsAcceptor, TlsConnector};
use tracing::{debug, info};

/// Host name used for generated certificates and as the fallback SNI
pub const DEFAULT_SERVER_NAME: &str = "localhost";

#[derive(Debug, Error)]
pub enum TlsError {
    #[error("failed to read {}: {source}", path.display())]
    Read {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("no certificates found in {}", .0.display())]
    NoCertificates(PathBuf),

    #[error("no private key found in {}", .0.display())]
    NoPrivateKey(PathBuf),

    #[error("TLS certificate given without a private key (or vice versa)")]
    IncompleteIdentity,

    #[error("client certificate verification requires a CA certificate")]
    MissingCa,

    #[error("invalid server name {0:?}")]
    InvalidServerName(String),

    #[error(transparent)]
    Rustls(#[from] rustls::Error),

    #[error(transparent)]
    Verifier(#[from] rustls::server::VerifierBuilderError),

    #[error("failed to generate self-signed certificate: {0}")]
    Generate(#[from] rcgen::Error),
}

/// Load certificates from a PEM file
pub fn load_certs(path: &Path) -> Result<Vec<CertificateDer<'static>>, TlsError> {
    let read_err = |source| TlsError::Read {
        path: path.to_path_buf(),
        source,
    };
    let file = std::fs::File::open(path).map_err(read_err)?;
    let mut reader = BufReader::new(file);
    let certs: Vec<CertificateDer<'static>> = certs(&mut reader)
        .collect::<Result<Vec<_>, _>>()
        .map_err(read_err)?;
    if certs.is_empty() {
        return Err(TlsError::NoCertificates(path.to_path_buf()));
    }
    Ok(certs)
}

/// Load private key from a PEM file
pub fn load_private_key(path: &Path) -> Result<PrivateKeyDer<'static>, TlsError> {
    let read_err = |source| TlsError::Read {
        path: path.to_path_buf(),
        source,
    };
    let file = std::fs::File::open(path).map_err(read_err)?;
    let mut reader = BufReader::new(file);
    private_key(&mut reader)
        .map_err(read_err)?
        .ok_or_else(|| TlsError::NoPrivateKey(path.to_path_buf()))
}

fn load_root_store(path: &Path) -> Result<RootCertStore, TlsError> {
    let mut root_store = RootCertStore::empty();
    for cert in load_certs(path)? {
        root_store.add(cert)?;
    }
    Ok(root_store)
}

/// Generate a throwaway self-signed certificate for `localhost`
pub fn self_signed_identity()
-> Result<(Vec<CertificateDer<'static>>, PrivateKeyDer<'static>), TlsError> {
    let certified = rcgen::generate_simple_self_signed(vec![DEFAULT_SERVER_NAME.to_string()])?;
    let cert = certified.cert.der().clone();
    let key = PrivateKeyDer::Pkcs8(PrivatePkcs8KeyDer::from(
        certified.key_pair.serialize_der(),
    ));
    Ok((vec![cert], key))
}

/// TLS settings shared by client and server endpoints
#[derive(Debug, Clone, Default)]
pub struct TlsSettings {
    pub enabled: bool,
    /// Server: require and verify client certificates.
    /// Client: verify the server certificate chain and host name.
    pub verify: bool,
    pub cert_path: Option<PathBuf>,
    pub key_path: Option<PathBuf>,
    pub ca_path: Option<PathBuf>,
}

impl TlsSettings {
    fn identity(
        &self,
    ) -> Result<Option<(Vec<CertificateDer<'static>>, PrivateKeyDer<'static>)>, TlsError> {
        match (&self.cert_path, &self.key_path) {
            (Some(cert_path), Some(key_path)) => {
                Ok(Some((load_certs(cert_path)?, load_private_key(key_path)?)))
            }
            (None, None) => Ok(None),
            _ => Err(TlsError::IncompleteIdentity),
        }
    }

    /// Create a TLS acceptor, or `None` when TLS is disabled
    pub fn create_acceptor(&self) -> Result<Option<TlsAcceptor>, TlsError> {
        if !self.enabled {
            return Ok(None);
        }

        let (certs, key) = match self.identity()? {
            Some(identity) => identity,
            None => {
                info!("No TLS certificate configured, generating a self-signed one");
                self_signed_identity()?
            }
        };

        let builder = ServerConfig::builder();
        let config = if self.verify {
            let ca_path = self.ca_path.as_ref().ok_or(TlsError::MissingCa)?;
            let verifier =
                rustls::server::WebPkiClientVerifier::builder(Arc::new(load_root_store(ca_path)?))
                    .build()?;
            debug!("Requiring client certificates signed by {}", ca_path.display());
            builder
                .with_client_cert_verifier(verifier)
                .with_single_cert(certs, key)?
        } else {
            builder.with_no_client_auth().with_single_cert(certs, key)?
        };

        Ok(Some(TlsAcceptor::from(Arc::new(config))))
    }

    /// Create a TLS connector, or `None` when TLS is disabled
    pub fn create_connector(&self) -> Result<Option<TlsConnector>, TlsError> {
        if !self.enabled {
            return Ok(None);
        }

        let builder = if self.verify {
            let root_store = match &self.ca_path {
                Some(ca_path) => load_root_store(ca_path)?,
                None => {
                    let mut root_store = RootCertStore::empty();
                    root_store.extend(webpki_roots::TLS_SERVER_ROOTS.iter().cloned());
                    root_store
                }
            };
            ClientConfig::builder().with_root_certificates(root_store)
        } else {
            // Self-signed servers are the common case for benchmark runs
            ClientConfig::builder()
                .dangerous()
                .with_custom_certificate_verifier(Arc::new(InsecureServerCertVerifier))
        };

        let config = match self.identity()? {
            Some((certs, key)) => builder.with_client_auth_cert(certs, key)?,
            None => builder.with_no_client_auth(),
        };

        Ok(Some(TlsConnector::from(Arc::new(config))))
    }
}

/// SNI for a dial target, falling back to `localhost` for host-less descriptors
pub fn server_name(host: &str) -> Result<ServerName<'static>, TlsError> {
    let host = if host.is_empty() {
        DEFAULT_SERVER_NAME
    } else {
        host
    };
    ServerName::try_from(host.to_string()).map_err(|_| TlsError::InvalidServerName(host.to_string()))
}

/// Certificate verifier that accepts any server certificate
#[derive(Debug)]
struct InsecureServerCertVerifier;

impl rustls::client::danger::ServerCertVerifier for InsecureServerCertVerifier {
    fn verify_server_cert(
        &self,
        _end_entity: &CertificateDer<'_>,
        _intermediates: &[CertificateDer<'_>],
        _server_name: &ServerName<'_>,
        _ocsp_response: &[u8],
        _now: rustls::pki_types::UnixTime,
    ) -> Result<rustls::client::danger::ServerCertVerified, rustls::Error> {
        Ok(rustls::client::danger::ServerCertVerified::assertion())
    }

    fn verify_tls12_signature(
        &self,
        _message: &[u8],
        _cert: &CertificateDer<'_>,
        _dss: &rustls::DigitallySignedStruct,
    ) -> Result<rustls::client::danger::HandshakeSignatureValid, rustls::Error> {
        Ok(rustls::client::danger::HandshakeSignatureValid::assertion())
    }

    fn verify_tls13_signature(
        &self,
        _message: &[u8],
        _cert: &CertificateDer<'_>,
        _dss: &rustls::DigitallySignedStruct,
    ) -> Result<rustls::client::danger::HandshakeSignatureValid, rustls::Error> {
        Ok(rustls::client::danger::HandshakeSignatureValid::assertion())
    }

    fn supported_verify_schemes(&self) -> Vec<rustls::SignatureScheme> {
        vec![
            rustls::SignatureScheme::RSA_PKCS1_SHA256,
            rustls::SignatureScheme::RSA_PKCS1_SHA384,
            rustls::SignatureScheme::RSA_PKCS1_SHA512,
            rustls::SignatureScheme::ECDSA_NISTP256_SHA256,
            rustls::SignatureScheme::ECDSA_NISTP384_SHA384,
            rustls::SignatureScheme::ECDSA_NISTP521_SHA512,
            rustls::SignatureScheme::RSA_PSS_SHA256,
            rustls::SignatureScheme::RSA_PSS_SHA384,
            rustls::SignatureScheme::RSA_PSS_SHA512,
            rustls::SignatureScheme::ED25519,
        ]
    }
}
