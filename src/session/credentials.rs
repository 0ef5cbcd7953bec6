//! Credential loading
//!
//! A [`CredentialSet`] holds the local certificate chain and private key
//! (loaded together or not at all) and, independently, the trust anchors used
//! to validate the peer. Everything is read from PEM files.

use crate::{Error, Result};
use rustls::RootCertStore;
use rustls_pemfile::Item;
use rustls_pki_types::{CertificateDer, PrivateKeyDer};
use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};

/// File locations to load credentials from; every entry is optional
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CredentialPaths {
    /// Trust anchors (CA certificates, PEM)
    pub ca_cert: Option<PathBuf>,
    /// Local certificate chain (PEM)
    pub cert: Option<PathBuf>,
    /// Private key matching `cert` (PEM)
    pub key: Option<PathBuf>,
}

impl CredentialPaths {
    /// Whether no file is configured at all
    pub fn is_empty(&self) -> bool {
        self.ca_cert.is_none() && self.cert.is_none() && self.key.is_none()
    }
}

/// Parsed certificate, key and trust material
pub struct CredentialSet {
    paths: CredentialPaths,
    cert_chain: Vec<CertificateDer<'static>>,
    key: Option<PrivateKeyDer<'static>>,
    trust_anchors: Option<RootCertStore>,
}

impl CredentialSet {
    /// A set with no identity and no explicit trust anchors
    pub fn empty() -> Self {
        Self {
            paths: CredentialPaths::default(),
            cert_chain: Vec::new(),
            key: None,
            trust_anchors: None,
        }
    }

    /// Load credentials from the given paths.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Credential`] if:
    /// - only one of certificate and key is given
    /// - a given file cannot be read
    /// - a given file holds no parsable PEM item of the expected kind
    pub fn load(paths: &CredentialPaths) -> Result<Self> {
        let (cert_chain, key) = match (&paths.cert, &paths.key) {
            (Some(cert), Some(key)) => (load_cert_chain(cert)?, Some(load_private_key(key)?)),
            (None, None) => (Vec::new(), None),
            (Some(_), None) | (None, Some(_)) => {
                return Err(Error::Credential(
                    "certificate and private key must be provided together".into(),
                ))
            }
        };

        let trust_anchors = match &paths.ca_cert {
            Some(ca) => Some(load_trust_anchors(ca)?),
            None => None,
        };

        tracing::debug!(
            identity = key.is_some(),
            trust_anchors = trust_anchors.is_some(),
            "credentials loaded"
        );

        Ok(Self {
            paths: paths.clone(),
            cert_chain,
            key,
            trust_anchors,
        })
    }

    /// Paths the set was loaded from
    pub fn paths(&self) -> &CredentialPaths {
        &self.paths
    }

    /// Whether a certificate/key pair is present
    pub fn has_identity(&self) -> bool {
        self.key.is_some()
    }

    /// Whether explicit trust anchors are present
    pub fn has_trust_anchors(&self) -> bool {
        self.trust_anchors.is_some()
    }

    /// Certificate chain and a copy of the key, if an identity is loaded
    pub(crate) fn identity(
        &self,
    ) -> Option<(Vec<CertificateDer<'static>>, PrivateKeyDer<'static>)> {
        let key = self.key.as_ref()?;
        Some((self.cert_chain.clone(), key.clone_key()))
    }

    /// Explicit trust anchors
    pub(crate) fn trust_anchors(&self) -> Option<&RootCertStore> {
        self.trust_anchors.as_ref()
    }

    /// Trust anchors for validating a server: the configured ones, or the
    /// platform's native roots when none are configured.
    pub(crate) fn root_store(&self) -> Result<RootCertStore> {
        if let Some(anchors) = &self.trust_anchors {
            return Ok(anchors.clone());
        }

        let result = rustls_native_certs::load_native_certs();
        let mut store = RootCertStore::empty();
        let (added, _ignored) = store.add_parsable_certificates(result.certs);

        if !result.errors.is_empty() && store.is_empty() {
            return Err(Error::Credential(
                "failed to load any system root certificates".to_string(),
            ));
        }
        if store.is_empty() {
            tracing::warn!("no system root certificates found; server validation will fail");
        } else {
            tracing::debug!(roots = added, "using system root certificates");
        }

        Ok(store)
    }
}

impl fmt::Debug for CredentialSet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CredentialSet")
            .field("paths", &self.paths)
            .field("cert_chain_len", &self.cert_chain.len())
            .field("key", &self.key.as_ref().map(|_| "<private key>"))
            .field(
                "trust_anchors",
                &self.trust_anchors.as_ref().map(|s| s.len()),
            )
            .finish()
    }
}

fn read_file(path: &Path, what: &str) -> Result<Vec<u8>> {
    fs::read(path).map_err(|e| {
        Error::Credential(format!(
            "failed to read {} file '{}': {}",
            what,
            path.display(),
            e
        ))
    })
}

/// Every X.509 certificate in a PEM file, other items skipped
fn parse_certificates(data: &[u8], path: &Path) -> Result<Vec<CertificateDer<'static>>> {
    let mut reader = std::io::Cursor::new(data);
    let mut certs = Vec::new();

    loop {
        match rustls_pemfile::read_one(&mut reader) {
            Ok(Some(Item::X509Certificate(cert))) => certs.push(cert),
            Ok(Some(_)) => {}
            Ok(None) => break,
            Err(_) => {
                return Err(Error::Credential(format!(
                    "failed to parse certificate PEM from '{}'",
                    path.display()
                )));
            }
        }
    }

    if certs.is_empty() {
        return Err(Error::Credential(format!(
            "no valid certificates found in '{}'",
            path.display()
        )));
    }
    Ok(certs)
}

fn load_cert_chain(path: &Path) -> Result<Vec<CertificateDer<'static>>> {
    let data = read_file(path, "certificate")?;
    parse_certificates(&data, path)
}

fn load_private_key(path: &Path) -> Result<PrivateKeyDer<'static>> {
    let data = read_file(path, "key")?;
    let mut reader = std::io::Cursor::new(&data);
    match rustls_pemfile::private_key(&mut reader) {
        Ok(Some(key)) => Ok(key),
        Ok(None) => Err(Error::Credential(format!(
            "no private key found in '{}'",
            path.display()
        ))),
        Err(e) => Err(Error::Credential(format!(
            "failed to parse private key from '{}': {}",
            path.display(),
            e
        ))),
    }
}

fn load_trust_anchors(path: &Path) -> Result<RootCertStore> {
    let data = read_file(path, "trust")?;
    let certs = parse_certificates(&data, path)?;

    let mut store = RootCertStore::empty();
    let (added, ignored) = store.add_parsable_certificates(certs);
    if added == 0 {
        return Err(Error::Credential(format!(
            "no usable trust anchors in '{}' ({} rejected)",
            path.display(),
            ignored
        )));
    }
    Ok(store)
}
