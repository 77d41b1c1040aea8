//! Educational explanations for certificate verification failures.
//!
//! Pure lookup from the engine's verification error to a sentence a reader
//! of the trace can act on. Unmapped errors return `None` and callers fall
//! back to the engine's own description.

use rustls::CertificateError;

/// Map a verification failure to a one-sentence explanation.
#[must_use]
pub fn explain(err: &CertificateError) -> Option<&'static str> {
    match err {
        CertificateError::UnknownIssuer => Some(
            "Chain of Trust: Unable to find issuer certificate. The CA that signed \
             this certificate is not in the trusted store.",
        ),
        CertificateError::BadSignature => Some(
            "Chain of Trust: Certificate signature verification failed. The \
             certificate may be corrupt or signed with an unsupported algorithm.",
        ),
        CertificateError::NotValidYet => Some(
            "Validity Period: Certificate is not yet valid. The 'Not Before' date \
             is in the future.",
        ),
        CertificateError::Expired => Some(
            "Validity Period: Certificate has expired. The 'Not After' date has \
             passed.",
        ),
        CertificateError::InvalidPurpose => Some(
            "Key Usage: Certificate cannot be used for this purpose. Check if \
             'clientAuth' or 'serverAuth' Extended Key Usage is set correctly.",
        ),
        CertificateError::Revoked => Some(
            "Revocation: Certificate has been revoked by the issuing CA.",
        ),
        CertificateError::NotValidForName => Some(
            "Identity: Certificate is not valid for the requested server name. \
             Check the Subject Alternative Name entries.",
        ),
        CertificateError::BadEncoding => Some(
            "Encoding: Certificate could not be parsed. The DER structure is \
             malformed or truncated.",
        ),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn known_errors_get_explanations() {
        assert!(explain(&CertificateError::UnknownIssuer)
            .is_some_and(|msg| msg.starts_with("Chain of Trust")));
        assert!(explain(&CertificateError::Expired)
            .is_some_and(|msg| msg.starts_with("Validity Period")));
        assert!(explain(&CertificateError::Revoked)
            .is_some_and(|msg| msg.starts_with("Revocation")));
    }

    #[test]
    fn unmapped_errors_return_none() {
        assert!(explain(&CertificateError::UnhandledCriticalExtension).is_none());
    }
}
