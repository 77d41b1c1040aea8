//! Key material loading and X.509 inspection.
//!
//! The simulator uses a fixed-name convention: one material directory
//! holding `client.crt`/`client.key`,
//! `server.crt`/`server.key`, and the optional per-side trust anchors
//! `client-ca.crt`/`server-ca.crt`. Every file is PEM.

use std::{
    fs,
    path::{Path, PathBuf},
};

use rustls::RootCertStore;
use rustls::pki_types::{CertificateDer, PrivateKeyDer};
use x509_parser::oid_registry::{
    OID_KEY_TYPE_EC_PUBLIC_KEY, OID_PKCS1_RSAENCRYPTION, OID_PKCS1_SHA256WITHRSA,
    OID_PKCS1_SHA384WITHRSA, OID_PKCS1_SHA512WITHRSA, OID_SIG_ECDSA_WITH_SHA256,
    OID_SIG_ECDSA_WITH_SHA384, OID_SIG_ECDSA_WITH_SHA512, OID_SIG_ED25519,
};
use x509_parser::prelude::{FromDer, X509Certificate};

use crate::error::SimError;

/// Well-known file names inside a material directory.
#[derive(Debug, Clone)]
pub struct MaterialPaths {
    dir: PathBuf,
}

impl MaterialPaths {
    /// Material rooted at `dir`.
    #[must_use]
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    fn file(&self, name: &str) -> PathBuf {
        self.dir.join(name)
    }

    /// Client certificate chain (optional; enables client authentication).
    #[must_use]
    pub fn client_cert(&self) -> PathBuf {
        self.file("client.crt")
    }

    /// Client private key.
    #[must_use]
    pub fn client_key(&self) -> PathBuf {
        self.file("client.key")
    }

    /// Server certificate chain (required).
    #[must_use]
    pub fn server_cert(&self) -> PathBuf {
        self.file("server.crt")
    }

    /// Server private key (required).
    #[must_use]
    pub fn server_key(&self) -> PathBuf {
        self.file("server.key")
    }

    /// Trust anchor the client uses to verify the server (optional).
    #[must_use]
    pub fn client_ca(&self) -> PathBuf {
        self.file("client-ca.crt")
    }

    /// Trust anchor the server uses to verify clients (optional).
    #[must_use]
    pub fn server_ca(&self) -> PathBuf {
        self.file("server-ca.crt")
    }
}

/// Load a PEM certificate chain.
pub fn load_cert_chain(path: &Path) -> Result<Vec<CertificateDer<'static>>, SimError> {
    let pem = fs::read(path).map_err(|e| material_err(path, &e.to_string()))?;
    let certs = rustls_pemfile::certs(&mut &pem[..])
        .collect::<Result<Vec<_>, _>>()
        .map_err(|e| material_err(path, &format!("failed to parse certificates: {e}")))?;
    if certs.is_empty() {
        return Err(material_err(path, "no certificates found"));
    }
    Ok(certs)
}

/// Load a PEM private key (PKCS#8, PKCS#1, or SEC1).
pub fn load_private_key(path: &Path) -> Result<PrivateKeyDer<'static>, SimError> {
    let pem = fs::read(path).map_err(|e| material_err(path, &e.to_string()))?;
    rustls_pemfile::private_key(&mut &pem[..])
        .map_err(|e| material_err(path, &format!("failed to parse private key: {e}")))?
        .ok_or_else(|| material_err(path, "no private key found"))
}

/// Load a PEM trust-anchor file into a root store.
///
/// Also returns the parsed certificates so callers can inspect the anchor
/// (the trace logs the CA's public-key family).
pub fn load_roots(
    path: &Path,
) -> Result<(RootCertStore, Vec<CertificateDer<'static>>), SimError> {
    let certs = load_cert_chain(path)?;
    let mut roots = RootCertStore::empty();
    for cert in &certs {
        roots
            .add(cert.clone())
            .map_err(|e| material_err(path, &format!("rejected trust anchor: {e}")))?;
    }
    Ok((roots, certs))
}

fn material_err(path: &Path, reason: &str) -> SimError {
    SimError::Material { path: path.display().to_string(), reason: reason.to_string() }
}

/// Human-readable family of a certificate's public key ("RSA", "EC",
/// "Ed25519", or the raw algorithm OID).
#[must_use]
pub fn public_key_family(cert: &CertificateDer<'_>) -> Option<String> {
    let (_, parsed) = X509Certificate::from_der(cert.as_ref()).ok()?;
    let oid = &parsed.public_key().algorithm.algorithm;
    let family = if *oid == OID_PKCS1_RSAENCRYPTION {
        "RSA".to_string()
    } else if *oid == OID_KEY_TYPE_EC_PUBLIC_KEY {
        "EC".to_string()
    } else if *oid == OID_SIG_ED25519 {
        "Ed25519".to_string()
    } else {
        format!("OID {oid}")
    };
    Some(family)
}

/// Name of the signature algorithm a certificate was signed with, falling
/// back to the dotted OID for algorithms outside the table.
#[must_use]
pub fn signature_algorithm_name(cert: &CertificateDer<'_>) -> Option<String> {
    let (_, parsed) = X509Certificate::from_der(cert.as_ref()).ok()?;
    let oid = &parsed.signature_algorithm.algorithm;
    let name = if *oid == OID_SIG_ECDSA_WITH_SHA256 {
        "ecdsa-with-SHA256".to_string()
    } else if *oid == OID_SIG_ECDSA_WITH_SHA384 {
        "ecdsa-with-SHA384".to_string()
    } else if *oid == OID_SIG_ECDSA_WITH_SHA512 {
        "ecdsa-with-SHA512".to_string()
    } else if *oid == OID_PKCS1_SHA256WITHRSA {
        "sha256WithRSAEncryption".to_string()
    } else if *oid == OID_PKCS1_SHA384WITHRSA {
        "sha384WithRSAEncryption".to_string()
    } else if *oid == OID_PKCS1_SHA512WITHRSA {
        "sha512WithRSAEncryption".to_string()
    } else if *oid == OID_SIG_ED25519 {
        "Ed25519".to_string()
    } else {
        format!("{oid}")
    };
    Some(name)
}
