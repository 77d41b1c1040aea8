//! Accumulated per-endpoint engine settings.
//!
//! rustls configurations are immutable once built, so the config applier
//! collects its decisions here and the endpoint builder turns the result
//! into a `CryptoProvider` and config in one shot.

use rustls::crypto::{CryptoProvider, WebPkiSupportedAlgorithms, ring};
use rustls::{RootCertStore, SignatureScheme, SupportedCipherSuite};

/// Peer-verification policy bitmask (`VerifyMode` config tokens).
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct VerifyMode(u8);

impl VerifyMode {
    /// No verification.
    pub const NONE: Self = Self(0);
    /// Verify the peer's certificate if one is presented (`Peer`).
    pub const PEER: Self = Self(1);
    /// Reject the handshake when no peer certificate arrives (`Request`).
    pub const REQUIRE: Self = Self(1 << 1);

    /// OR `other` into this mask.
    pub fn insert(&mut self, other: Self) {
        self.0 |= other.0;
    }

    /// Whether all bits of `other` are set.
    #[must_use]
    pub fn contains(self, other: Self) -> bool {
        self.0 & other.0 == other.0
    }

    /// Whether no bit is set.
    #[must_use]
    pub fn is_empty(self) -> bool {
        self.0 == 0
    }
}

/// Settings gathered from a config file and the material directory before
/// an endpoint context is built. `None` means "engine default".
#[derive(Debug, Clone, Default)]
pub struct EndpointSettings {
    /// Restricted cipher-suite list (`Ciphersuites`).
    pub cipher_suites: Option<Vec<SupportedCipherSuite>>,
    /// Restricted key-exchange groups (`Groups`).
    pub kx_groups: Option<Vec<&'static dyn rustls::crypto::SupportedKxGroup>>,
    /// Restricted signature schemes (`SignatureAlgorithms`).
    pub signature_schemes: Option<Vec<SignatureScheme>>,
    /// Peer-verification policy (`VerifyMode`).
    pub verify: VerifyMode,
    /// Trust anchors (`VerifyCAFile` and/or the material directory's CA).
    pub roots: Option<RootCertStore>,
}

impl EndpointSettings {
    /// Build the crypto provider implied by these settings, starting from
    /// the ring defaults.
    #[must_use]
    pub fn provider(&self) -> CryptoProvider {
        let base = ring::default_provider();
        CryptoProvider {
            cipher_suites: self
                .cipher_suites
                .clone()
                .unwrap_or_else(|| base.cipher_suites.clone()),
            kx_groups: self.kx_groups.clone().unwrap_or_else(|| base.kx_groups.clone()),
            signature_verification_algorithms: match &self.signature_schemes {
                Some(schemes) => filter_signature_algorithms(
                    base.signature_verification_algorithms,
                    schemes,
                ),
                None => base.signature_verification_algorithms,
            },
            ..base
        }
    }

    /// Add trust anchors, creating the store on first use.
    pub fn add_roots(&mut self, certs: &[rustls::pki_types::CertificateDer<'static>]) {
        let roots = self.roots.get_or_insert_with(RootCertStore::empty);
        for cert in certs {
            // Anchors were already validated at load time.
            let _ = roots.add(cert.clone());
        }
    }
}

/// Restrict a verification-algorithm table to `allowed` schemes.
///
/// rustls wants `'static` slices here, so the filtered tables are leaked;
/// this happens at most once per endpoint per session. An empty result
/// (no recognized scheme) keeps the base table - the restriction is then
/// reported as failed by the config applier instead.
fn filter_signature_algorithms(
    base: WebPkiSupportedAlgorithms,
    allowed: &[SignatureScheme],
) -> WebPkiSupportedAlgorithms {
    let mapping: Vec<_> = base
        .mapping
        .iter()
        .filter(|(scheme, _)| allowed.contains(scheme))
        .copied()
        .collect();
    if mapping.is_empty() {
        return base;
    }
    let all: Vec<_> = mapping.iter().flat_map(|(_, algs)| algs.iter().copied()).collect();
    WebPkiSupportedAlgorithms { all: Vec::leak(all), mapping: Vec::leak(mapping) }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn verify_mode_is_a_bitmask() {
        let mut mode = VerifyMode::NONE;
        assert!(mode.is_empty());

        mode.insert(VerifyMode::PEER);
        assert!(mode.contains(VerifyMode::PEER));
        assert!(!mode.contains(VerifyMode::REQUIRE));

        mode.insert(VerifyMode::REQUIRE);
        assert!(mode.contains(VerifyMode::PEER));
        assert!(mode.contains(VerifyMode::REQUIRE));
        assert!(!mode.is_empty());
    }

    #[test]
    fn default_settings_use_engine_defaults() {
        let provider = EndpointSettings::default().provider();
        let base = ring::default_provider();
        assert_eq!(provider.cipher_suites.len(), base.cipher_suites.len());
        assert_eq!(provider.kx_groups.len(), base.kx_groups.len());
    }

    #[test]
    fn cipher_restriction_narrows_provider() {
        let base = ring::default_provider();
        let one = vec![base.cipher_suites[0]];
        let settings = EndpointSettings { cipher_suites: Some(one), ..Default::default() };
        assert_eq!(settings.provider().cipher_suites.len(), 1);
    }

    #[test]
    fn signature_restriction_filters_mapping() {
        let settings = EndpointSettings {
            signature_schemes: Some(vec![SignatureScheme::ECDSA_NISTP256_SHA256]),
            ..Default::default()
        };
        let algs = settings.provider().signature_verification_algorithms;
        assert!(algs.mapping.iter().all(|(s, _)| *s == SignatureScheme::ECDSA_NISTP256_SHA256));
    }

    #[test]
    fn unknown_scheme_restriction_keeps_base_table() {
        // ring has no ed448 support; the filter must not empty the table.
        let settings = EndpointSettings {
            signature_schemes: Some(vec![SignatureScheme::ED448]),
            ..Default::default()
        };
        let algs = settings.provider().signature_verification_algorithms;
        assert!(!algs.mapping.is_empty());
    }
}
