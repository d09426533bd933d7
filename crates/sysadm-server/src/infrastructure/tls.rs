//! TLS context: certificate loading and the server-side rustls configuration.
//!
//! # Policy
//!
//! - Protocol pinned to TLS 1.2, `ring` crypto provider.
//! - Peers are not asked for a certificate.
//! - Certificate and key are PEM.  The key may be PKCS#8, PKCS#1 or SEC1.
//!
//! # Degraded mode
//!
//! If the certificate or key cannot be loaded, [`TlsContext::load_or_degrade`]
//! logs a warning and returns a context whose certificate resolver never
//! yields a certificate.  The server still binds and accepts; each handshake
//! then fails on its own and only that connection is dropped.
//!
//! The configuration is immutable once built and shared through an `Arc`.

use std::fmt;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use rustls::crypto::{ring, CryptoProvider};
use rustls::pki_types::{CertificateDer, PrivateKeyDer};
use rustls::server::{ClientHello, ResolvesServerCert};
use rustls::sign::CertifiedKey;
use rustls::{ConfigBuilder, ServerConfig, WantsVerifier};
use thiserror::Error;
use tokio_rustls::TlsAcceptor;
use tracing::{debug, warn};

/// Why a TLS configuration could not be built.
#[derive(Debug, Error)]
pub enum TlsError {
    /// The crypto provider cannot offer TLS 1.2.
    #[error("TLS 1.2 not supported by crypto provider: {0}")]
    Unavailable(#[source] rustls::Error),

    /// A certificate or key file could not be read.
    #[error("cannot read {kind} file {path}: {source}")]
    Read {
        kind: &'static str,
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    /// PEM input was malformed.
    #[error("malformed {kind} PEM: {source}")]
    Pem {
        kind: &'static str,
        #[source]
        source: io::Error,
    },

    /// PEM input held no item of the expected kind.
    #[error("no {0} found in PEM input")]
    MissingPem(&'static str),

    /// rustls refused the certificate chain or key.
    #[error("certificate or key rejected: {0}")]
    InvalidKeyPair(#[source] rustls::Error),
}

impl TlsError {
    /// `true` if the error means TLS cannot work at all on this host.
    pub fn is_unavailable(&self) -> bool {
        matches!(self, Self::Unavailable(_))
    }
}

/// Shared server-side TLS configuration.
#[derive(Clone)]
pub struct TlsContext {
    config: Arc<ServerConfig>,
    degraded: bool,
}

impl fmt::Debug for TlsContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TlsContext")
            .field("degraded", &self.degraded)
            .finish_non_exhaustive()
    }
}

fn provider() -> Arc<CryptoProvider> {
    Arc::new(ring::default_provider())
}

fn tls12_builder() -> Result<ConfigBuilder<ServerConfig, WantsVerifier>, TlsError> {
    ServerConfig::builder_with_provider(provider())
        .with_protocol_versions(&[&rustls::version::TLS12])
        .map_err(TlsError::Unavailable)
}

impl TlsContext {
    /// Checks that a TLS 1.2 server configuration can be built at all.
    ///
    /// # Errors
    ///
    /// Returns [`TlsError::Unavailable`] if the crypto provider lacks TLS 1.2.
    pub fn probe() -> Result<(), TlsError> {
        tls12_builder().map(|_| ())
    }

    /// Builds a context from in-memory PEM data.
    pub fn from_pem(cert_pem: &[u8], key_pem: &[u8]) -> Result<Self, TlsError> {
        let certs = rustls_pemfile::certs(&mut &cert_pem[..])
            .collect::<Result<Vec<CertificateDer<'static>>, _>>()
            .map_err(|source| TlsError::Pem {
                kind: "certificate",
                source,
            })?;
        if certs.is_empty() {
            return Err(TlsError::MissingPem("certificate"));
        }

        let key: PrivateKeyDer<'static> = rustls_pemfile::private_key(&mut &key_pem[..])
            .map_err(|source| TlsError::Pem {
                kind: "private key",
                source,
            })?
            .ok_or(TlsError::MissingPem("private key"))?;

        let config = tls12_builder()?
            .with_no_client_auth()
            .with_single_cert(certs, key)
            .map_err(TlsError::InvalidKeyPair)?;

        Ok(Self {
            config: Arc::new(config),
            degraded: false,
        })
    }

    /// Builds a context from PEM files, failing on any problem.
    pub fn from_files(cert_path: &Path, key_path: &Path) -> Result<Self, TlsError> {
        let cert_pem = read_pem_file("certificate", cert_path)?;
        let key_pem = read_pem_file("private key", key_path)?;
        Self::from_pem(&cert_pem, &key_pem)
    }

    /// Builds a context from PEM files, degrading instead of failing when
    /// the files are missing or unusable.
    ///
    /// # Errors
    ///
    /// Only [`TlsError::Unavailable`] is returned.
    pub fn load_or_degrade(cert_path: &Path, key_path: &Path) -> Result<Self, TlsError> {
        match Self::from_files(cert_path, key_path) {
            Ok(ctx) => {
                debug!(cert = %cert_path.display(), "TLS certificate loaded");
                Ok(ctx)
            }
            Err(e) if e.is_unavailable() => Err(e),
            Err(e) => {
                warn!(
                    cert = %cert_path.display(),
                    key = %key_path.display(),
                    error = %e,
                    "could not load TLS certificate; continuing with degraded TLS"
                );
                Self::degraded()
            }
        }
    }

    /// A context with no certificate.  Every handshake against it fails.
    pub fn degraded() -> Result<Self, TlsError> {
        let config = tls12_builder()?
            .with_no_client_auth()
            .with_cert_resolver(Arc::new(NoCertificate));
        Ok(Self {
            config: Arc::new(config),
            degraded: true,
        })
    }

    /// `true` if no certificate was loaded.
    pub fn is_degraded(&self) -> bool {
        self.degraded
    }

    /// An acceptor sharing this configuration.
    pub fn acceptor(&self) -> TlsAcceptor {
        TlsAcceptor::from(Arc::clone(&self.config))
    }
}

fn read_pem_file(kind: &'static str, path: &Path) -> Result<Vec<u8>, TlsError> {
    std::fs::read(path).map_err(|source| TlsError::Read {
        kind,
        path: path.to_path_buf(),
        source,
    })
}

/// Certificate resolver for degraded mode.
#[derive(Debug)]
struct NoCertificate;

impl ResolvesServerCert for NoCertificate {
    fn resolve(&self, _client_hello: ClientHello<'_>) -> Option<Arc<CertifiedKey>> {
        None
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────
