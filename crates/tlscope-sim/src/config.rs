//! Declarative per-endpoint configuration files.
//!
//! Single-section key/value format (an OpenSSL NCONF subset):
//!
//! ```text
//! [system_default_sect]
//! Ciphersuites = TLS_AES_256_GCM_SHA384
//! Groups = X25519:P-256
//! SignatureAlgorithms = ECDSA+SHA256
//! VerifyMode = Request,Peer
//! VerifyCAFile = /ssl/server-ca.crt
//! ```
//!
//! Absence of the file is a normal unconfigured run. Each recognized key
//! is applied and logged independently; one rejected setting never aborts
//! the rest. Unrecognized keys are ignored.

use std::path::Path;

use rustls::{SignatureScheme, SupportedCipherSuite};
use thiserror::Error;
use tlscope_trace::Side;

use crate::bridge::{SharedTrace, record};
use crate::material;
use crate::settings::{EndpointSettings, VerifyMode};

/// Section the applier reads, named like OpenSSL's default-policy section.
pub const CONFIG_SECTION: &str = "system_default_sect";

/// A line that is neither blank, comment, section header, nor `key = value`.
#[derive(Debug, Error, PartialEq, Eq)]
#[error("unparseable configuration at line {line}")]
pub struct ConfigParseError {
    /// 1-based offending line number.
    pub line: usize,
}

/// Key/value pairs of one configuration section.
#[derive(Debug, Default, Clone)]
pub struct SectionConfig {
    values: Vec<(String, String)>,
}

impl SectionConfig {
    /// Parse `text`, keeping only keys inside `section`.
    pub fn parse(text: &str, section: &str) -> Result<Self, ConfigParseError> {
        let mut values = Vec::new();
        let mut in_section = false;

        for (idx, raw_line) in text.lines().enumerate() {
            let line = raw_line.trim();
            if line.is_empty() || line.starts_with('#') || line.starts_with(';') {
                continue;
            }
            if let Some(name) = line.strip_prefix('[').and_then(|rest| rest.strip_suffix(']')) {
                in_section = name.trim() == section;
                continue;
            }
            let Some((key, value)) = line.split_once('=') else {
                return Err(ConfigParseError { line: idx + 1 });
            };
            if in_section {
                values.push((key.trim().to_string(), value.trim().to_string()));
            }
        }

        Ok(Self { values })
    }

    /// Last value recorded for `key`, if any.
    #[must_use]
    pub fn get(&self, key: &str) -> Option<&str> {
        self.values
            .iter()
            .rev()
            .find(|(k, _)| k == key)
            .map(|(_, v)| v.as_str())
    }
}

/// Split a config list value on any accepted separator.
fn tokens(raw: &str) -> impl Iterator<Item = &str> {
    raw.split([':', ',', ' ', '\t']).filter(|t| !t.is_empty())
}

/// Resolve a cipher-suite name against the engine's supported set.
///
/// Accepts both the IANA spelling (`TLS_AES_128_GCM_SHA256`) and the
/// engine spelling (`TLS13_AES_128_GCM_SHA256`).
#[must_use]
pub fn cipher_by_name(token: &str) -> Option<SupportedCipherSuite> {
    let normalized = if let Some(rest) = token.strip_prefix("TLS_") {
        format!("TLS13_{rest}")
    } else {
        token.to_string()
    };
    rustls::crypto::ring::default_provider()
        .cipher_suites
        .iter()
        .copied()
        .find(|suite| format!("{:?}", suite.suite()) == normalized)
}

/// Resolve a key-exchange group name against the engine's supported set.
#[must_use]
pub fn group_by_name(token: &str) -> Option<&'static dyn rustls::crypto::SupportedKxGroup> {
    use rustls::NamedGroup;

    let named = match token {
        "X25519" | "x25519" => NamedGroup::X25519,
        "P-256" | "secp256r1" | "prime256v1" => NamedGroup::secp256r1,
        "P-384" | "secp384r1" => NamedGroup::secp384r1,
        "P-521" | "secp521r1" => NamedGroup::secp521r1,
        "X448" | "x448" => NamedGroup::X448,
        _ => return None,
    };
    rustls::crypto::ring::default_provider()
        .kx_groups
        .iter()
        .copied()
        .find(|group| group.name() == named)
}

/// Resolve a signature-algorithm name (OpenSSL or rustls spelling).
#[must_use]
pub fn scheme_by_name(token: &str) -> Option<SignatureScheme> {
    let scheme = match token {
        "ed25519" | "Ed25519" | "ED25519" => SignatureScheme::ED25519,
        "ECDSA+SHA256" | "ecdsa_secp256r1_sha256" => SignatureScheme::ECDSA_NISTP256_SHA256,
        "ECDSA+SHA384" | "ecdsa_secp384r1_sha384" => SignatureScheme::ECDSA_NISTP384_SHA384,
        "ECDSA+SHA512" | "ecdsa_secp521r1_sha512" => SignatureScheme::ECDSA_NISTP521_SHA512,
        "RSA-PSS+SHA256" | "rsa_pss_rsae_sha256" => SignatureScheme::RSA_PSS_SHA256,
        "RSA-PSS+SHA384" | "rsa_pss_rsae_sha384" => SignatureScheme::RSA_PSS_SHA384,
        "RSA-PSS+SHA512" | "rsa_pss_rsae_sha512" => SignatureScheme::RSA_PSS_SHA512,
        "RSA+SHA256" | "rsa_pkcs1_sha256" => SignatureScheme::RSA_PKCS1_SHA256,
        "RSA+SHA384" | "rsa_pkcs1_sha384" => SignatureScheme::RSA_PKCS1_SHA384,
        "RSA+SHA512" | "rsa_pkcs1_sha512" => SignatureScheme::RSA_PKCS1_SHA512,
        _ => return None,
    };
    Some(scheme)
}

fn resolve_all<T>(raw: &str, lookup: impl Fn(&str) -> Option<T>) -> Option<Vec<T>> {
    let resolved: Vec<T> = tokens(raw).map(lookup).collect::<Option<_>>()?;
    if resolved.is_empty() { None } else { Some(resolved) }
}

/// Read the config file at `path` (if present) and fold each recognized
/// setting into `settings`, logging per-key outcomes.
pub fn apply(
    settings: &mut EndpointSettings,
    path: Option<&Path>,
    side: Side,
    trace: &SharedTrace,
) {
    let Some(path) = path else { return };
    // Absent or unreadable config means an unconfigured run, not an error.
    let Ok(text) = std::fs::read_to_string(path) else { return };

    let section = match SectionConfig::parse(&text, CONFIG_SECTION) {
        Ok(section) => section,
        Err(err) => {
            tracing::warn!(path = %path.display(), %err, "configuration rejected");
            record(trace, side, "warning", &format!("Failed to load config: {}", path.display()));
            return;
        },
    };

    record(trace, side, "config", "Loaded configuration file");

    if let Some(raw) = section.get("Ciphersuites").filter(|v| !v.is_empty()) {
        match resolve_all(raw, cipher_by_name) {
            Some(suites) => {
                settings.cipher_suites = Some(suites);
                record(trace, side, "config_ciphers", &format!("Set Ciphers: {raw}"));
            },
            None => record(trace, side, "error", "Failed to set Ciphersuites"),
        }
    }

    if let Some(raw) = section.get("Groups").filter(|v| !v.is_empty())
        && let Some(groups) = resolve_all(raw, group_by_name)
    {
        settings.kx_groups = Some(groups);
        record(trace, side, "config_groups", raw);
    }

    if let Some(raw) = section.get("SignatureAlgorithms").filter(|v| !v.is_empty())
        && let Some(schemes) = resolve_all(raw, scheme_by_name)
    {
        settings.signature_schemes = Some(schemes);
        record(trace, side, "config_sigalgs", raw);
    }

    if let Some(raw) = section.get("VerifyMode") {
        let mut mode = VerifyMode::NONE;
        if raw.contains("Peer") {
            mode.insert(VerifyMode::PEER);
        }
        if raw.contains("Request") {
            mode.insert(VerifyMode::REQUIRE);
        }
        if !mode.is_empty() {
            settings.verify.insert(mode);
            record(trace, side, "config_verify", "Enabled peer verification");
        }
    }

    if let Some(ca_file) = section.get("VerifyCAFile")
        && let Ok((roots, certs)) = material::load_roots(Path::new(ca_file))
    {
        record(trace, side, "config_ca", "Loaded CA File");
        if let Some(family) = certs.first().and_then(material::public_key_family) {
            record(trace, side, "config_ca_details", &format!("CA Key Type: {family}"));
        }
        settings.roots = match settings.roots.take() {
            None => Some(roots),
            Some(mut existing) => {
                for cert in &certs {
                    let _ = existing.add(cert.clone());
                }
                Some(existing)
            },
        };
    }
}

#[cfg(test)]
mod tests {
    use std::io::Write as _;
    use std::sync::{Arc, Mutex};

    use tlscope_trace::{Status, TraceLog};

    use super::*;

    #[test]
    fn parses_single_section() {
        let text = "# comment\n[system_default_sect]\nCiphersuites = TLS_AES_128_GCM_SHA256\nGroups=X25519\n";
        let section = SectionConfig::parse(text, CONFIG_SECTION).unwrap();
        assert_eq!(section.get("Ciphersuites"), Some("TLS_AES_128_GCM_SHA256"));
        assert_eq!(section.get("Groups"), Some("X25519"));
        assert_eq!(section.get("VerifyMode"), None);
    }

    #[test]
    fn ignores_other_sections() {
        let text = "[other]\nCiphersuites = nope\n[system_default_sect]\nGroups = P-256\n";
        let section = SectionConfig::parse(text, CONFIG_SECTION).unwrap();
        assert_eq!(section.get("Ciphersuites"), None);
        assert_eq!(section.get("Groups"), Some("P-256"));
    }

    #[test]
    fn rejects_garbage_lines() {
        let err = SectionConfig::parse("[system_default_sect]\nnot a key value\n", CONFIG_SECTION)
            .unwrap_err();
        assert_eq!(err, ConfigParseError { line: 2 });
    }

    #[test]
    fn cipher_names_accept_both_spellings() {
        assert!(cipher_by_name("TLS_AES_128_GCM_SHA256").is_some());
        assert!(cipher_by_name("TLS13_AES_128_GCM_SHA256").is_some());
        assert!(cipher_by_name("TLS_NO_SUCH_SUITE").is_none());
    }

    #[test]
    fn group_names_accept_openssl_spellings() {
        assert!(group_by_name("X25519").is_some());
        assert!(group_by_name("P-256").is_some());
        assert!(group_by_name("secp384r1").is_some());
        // ring has no X448 key exchange.
        assert!(group_by_name("X448").is_none());
        assert!(group_by_name("wat").is_none());
    }

    #[test]
    fn scheme_names_accept_openssl_spellings() {
        assert_eq!(scheme_by_name("ECDSA+SHA256"), Some(SignatureScheme::ECDSA_NISTP256_SHA256));
        assert_eq!(scheme_by_name("ed25519"), Some(SignatureScheme::ED25519));
        assert_eq!(scheme_by_name("md5"), None);
    }

    fn fresh_trace() -> SharedTrace {
        let mut log = TraceLog::new();
        log.reset();
        Arc::new(Mutex::new(log))
    }

    fn events(trace: &SharedTrace) -> Vec<(String, String)> {
        let doc = trace.lock().unwrap().finalize(Status::Success, None);
        let v: serde_json::Value = serde_json::from_str(&doc).unwrap();
        v["trace"]
            .as_array()
            .unwrap()
            .iter()
            .map(|e| {
                (
                    e["event"].as_str().unwrap().to_string(),
                    e["details"].as_str().unwrap().to_string(),
                )
            })
            .collect()
    }

    #[test]
    fn missing_file_is_silent() {
        let trace = fresh_trace();
        let mut settings = EndpointSettings::default();
        apply(&mut settings, Some(Path::new("/nonexistent.conf")), Side::Client, &trace);
        assert!(events(&trace).is_empty());
    }

    #[test]
    fn applies_recognized_keys_and_skips_unknown() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "[system_default_sect]").unwrap();
        writeln!(file, "Ciphersuites = TLS_AES_256_GCM_SHA384").unwrap();
        writeln!(file, "Groups = P-256").unwrap();
        writeln!(file, "VerifyMode = Request,Peer").unwrap();
        writeln!(file, "SomethingElse = ignored").unwrap();

        let trace = fresh_trace();
        let mut settings = EndpointSettings::default();
        apply(&mut settings, Some(file.path()), Side::Server, &trace);

        assert_eq!(settings.cipher_suites.as_ref().map(Vec::len), Some(1));
        assert_eq!(settings.kx_groups.as_ref().map(Vec::len), Some(1));
        assert!(settings.verify.contains(VerifyMode::PEER));
        assert!(settings.verify.contains(VerifyMode::REQUIRE));

        let names: Vec<String> = events(&trace).into_iter().map(|(kind, _)| kind).collect();
        assert_eq!(names, vec!["config", "config_ciphers", "config_groups", "config_verify"]);
    }

    #[test]
    fn bad_cipher_logs_error_but_continues() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "[system_default_sect]").unwrap();
        writeln!(file, "Ciphersuites = TLS_BOGUS").unwrap();
        writeln!(file, "Groups = X25519").unwrap();

        let trace = fresh_trace();
        let mut settings = EndpointSettings::default();
        apply(&mut settings, Some(file.path()), Side::Client, &trace);

        assert!(settings.cipher_suites.is_none());
        assert_eq!(settings.kx_groups.as_ref().map(Vec::len), Some(1));

        let recorded = events(&trace);
        assert!(recorded.iter().any(|(kind, details)| {
            kind == "error" && details == "Failed to set Ciphersuites"
        }));
        assert!(recorded.iter().any(|(kind, _)| kind == "config_groups"));
    }

    #[test]
    fn unparseable_file_logs_warning_and_applies_nothing() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "this is not a config").unwrap();

        let trace = fresh_trace();
        let mut settings = EndpointSettings::default();
        apply(&mut settings, Some(file.path()), Side::Client, &trace);

        assert!(settings.cipher_suites.is_none());
        let recorded = events(&trace);
        assert_eq!(recorded.len(), 1);
        assert_eq!(recorded[0].0, "warning");
    }

    #[test]
    fn ca_file_is_loaded_and_inspected() {
        let ca = rcgen::generate_simple_self_signed(vec!["Test CA".to_string()]).unwrap();
        let mut ca_file = tempfile::NamedTempFile::new().unwrap();
        ca_file.write_all(ca.cert.pem().as_bytes()).unwrap();

        let mut conf = tempfile::NamedTempFile::new().unwrap();
        writeln!(conf, "[system_default_sect]").unwrap();
        writeln!(conf, "VerifyCAFile = {}", ca_file.path().display()).unwrap();

        let trace = fresh_trace();
        let mut settings = EndpointSettings::default();
        apply(&mut settings, Some(conf.path()), Side::Server, &trace);

        assert!(settings.roots.is_some());
        let recorded = events(&trace);
        assert!(recorded.iter().any(|(kind, _)| kind == "config_ca"));
        assert!(recorded.iter().any(|(kind, details)| {
            kind == "config_ca_details" && details.starts_with("CA Key Type:")
        }));
    }
}
