//! Server-certificate verification policy for the simulated client.
//!
//! When no trust anchor is configured the client installs
//! [`AcceptAnyServerCert`] instead of refusing to run - any
//! certificate passes, which is exactly right for an educational sandbox
//! and obviously wrong anywhere else. The advertised signature-scheme list
//! is configurable so a `SignatureAlgorithms` restriction in the client's
//! config file still shapes the handshake.

use rustls::client::danger::{
    HandshakeSignatureValid, ServerCertVerified, ServerCertVerifier,
};
use rustls::{DigitallySignedStruct, SignatureScheme};

/// Certificate verifier that accepts any server certificate.
///
/// Simulation only: it performs no validation whatsoever.
#[derive(Debug)]
pub struct AcceptAnyServerCert {
    schemes: Vec<SignatureScheme>,
}

impl AcceptAnyServerCert {
    /// Verifier advertising the default scheme set.
    #[must_use]
    pub fn new() -> Self {
        Self { schemes: default_schemes() }
    }

    /// Verifier advertising only `schemes`. Falls back to the default set
    /// when the list is empty (rustls rejects an empty advertisement).
    #[must_use]
    pub fn with_schemes(schemes: Vec<SignatureScheme>) -> Self {
        if schemes.is_empty() { Self::new() } else { Self { schemes } }
    }
}

impl Default for AcceptAnyServerCert {
    fn default() -> Self {
        Self::new()
    }
}

/// Scheme set advertised when no restriction is configured.
#[must_use]
pub fn default_schemes() -> Vec<SignatureScheme> {
    vec![
        SignatureScheme::RSA_PKCS1_SHA256,
        SignatureScheme::RSA_PKCS1_SHA384,
        SignatureScheme::RSA_PKCS1_SHA512,
        SignatureScheme::ECDSA_NISTP256_SHA256,
        SignatureScheme::ECDSA_NISTP384_SHA384,
        SignatureScheme::ECDSA_NISTP521_SHA512,
        SignatureScheme::RSA_PSS_SHA256,
        SignatureScheme::RSA_PSS_SHA384,
        SignatureScheme::RSA_PSS_SHA512,
        SignatureScheme::ED25519,
    ]
}

impl ServerCertVerifier for AcceptAnyServerCert {
    fn verify_server_cert(
        &self,
        _end_entity: &rustls::pki_types::CertificateDer<'_>,
        _intermediates: &[rustls::pki_types::CertificateDer<'_>],
        _server_name: &rustls::pki_types::ServerName<'_>,
        _ocsp_response: &[u8],
        _now: rustls::pki_types::UnixTime,
    ) -> Result<ServerCertVerified, rustls::Error> {
        Ok(ServerCertVerified::assertion())
    }

    fn verify_tls12_signature(
        &self,
        _message: &[u8],
        _cert: &rustls::pki_types::CertificateDer<'_>,
        _dss: &DigitallySignedStruct,
    ) -> Result<HandshakeSignatureValid, rustls::Error> {
        Ok(HandshakeSignatureValid::assertion())
    }

    fn verify_tls13_signature(
        &self,
        _message: &[u8],
        _cert: &rustls::pki_types::CertificateDer<'_>,
        _dss: &DigitallySignedStruct,
    ) -> Result<HandshakeSignatureValid, rustls::Error> {
        Ok(HandshakeSignatureValid::assertion())
    }

    fn supported_verify_schemes(&self) -> Vec<SignatureScheme> {
        self.schemes.clone()
    }
}
