//! Side attribution for the engine's asynchronous callbacks.
//!
//! rustls surfaces three kinds of out-of-band information, none of which
//! carries a side tag the simulator controls end to end:
//!
//! - secret export arrives on the [`rustls::KeyLog`] trait, which is
//!   configured per endpoint - [`SecretSink`] carries its side explicitly
//!   (the per-context association);
//! - internal diagnostics arrive on the process-global `log` facade with
//!   no context pointer at all - the [`DiagnosticRouter`] attributes them
//!   via the session's [`CurrentSide`] indicator, which the driver sets
//!   immediately before any operation that can emit diagnostics;
//! - state transitions have no callback in rustls and are synthesized by
//!   the driver, which owns the side anyway.
//!
//! Because the `log` facade is once-per-process, only one session can be
//! attached to the router at a time; the session entry point serializes
//! sessions behind a global gate.

use std::sync::{
    Arc, Mutex, Once, PoisonError,
    atomic::{AtomicU8, Ordering},
};

use tlscope_trace::{Side, TraceLog};

/// The session's shared event sink. The mutex exists because rustls
/// callback traits require `Send + Sync`; nothing actually runs
/// concurrently within a session.
pub type SharedTrace = Arc<Mutex<TraceLog>>;

/// Append one event to the shared trace, tolerating a poisoned lock (a
/// panicking test must not silence the remaining trace).
pub fn record(trace: &SharedTrace, side: Side, event: &str, details: &str) {
    let mut log = trace.lock().unwrap_or_else(PoisonError::into_inner);
    log.record(side, event, details);
}

/// Mutable "side currently being driven" indicator.
///
/// Consulted only by callbacks that structurally cannot resolve their
/// originating context (the diagnostic channel). Defaults to
/// [`Side::System`] until the driver first sets it.
#[derive(Debug)]
pub struct CurrentSide(AtomicU8);

impl Default for CurrentSide {
    fn default() -> Self {
        Self::new()
    }
}

impl CurrentSide {
    /// Create an indicator pointing at [`Side::System`].
    #[must_use]
    pub fn new() -> Self {
        Self(AtomicU8::new(encode(Side::System)))
    }

    /// Point the indicator at `side`.
    pub fn set(&self, side: Side) {
        self.0.store(encode(side), Ordering::Relaxed);
    }

    /// The side most recently set, or [`Side::System`].
    #[must_use]
    pub fn get(&self) -> Side {
        decode(self.0.load(Ordering::Relaxed))
    }
}

fn encode(side: Side) -> u8 {
    match side {
        Side::Client => 0,
        Side::Server => 1,
        Side::Connection => 2,
        Side::System => 3,
    }
}

fn decode(raw: u8) -> Side {
    match raw {
        0 => Side::Client,
        1 => Side::Server,
        2 => Side::Connection,
        _ => Side::System,
    }
}

/// Per-endpoint secret-export sink.
///
/// Installed as the endpoint's `key_log`, so every exported secret is
/// attributed by construction rather than by guessing.
#[derive(Debug)]
pub struct SecretSink {
    side: Side,
    trace: SharedTrace,
}

impl SecretSink {
    /// Create a sink recording secrets for `side`.
    #[must_use]
    pub fn new(side: Side, trace: SharedTrace) -> Self {
        Self { side, trace }
    }
}

impl rustls::KeyLog for SecretSink {
    fn log(&self, label: &str, client_random: &[u8], secret: &[u8]) {
        // NSS key-log line format, same as SSLKEYLOGFILE.
        let line = format!("{label} {} {}", hex::encode(client_random), hex::encode(secret));
        record(&self.trace, self.side, "keylog", &line);
    }
}

struct ActiveSession {
    trace: SharedTrace,
    current: Arc<CurrentSide>,
}

/// Captures the engine's internal `log` output into the active session's
/// trace, classified into coarse diagnostic categories.
pub struct DiagnosticRouter {
    active: Mutex<Option<ActiveSession>>,
}

static ROUTER: DiagnosticRouter = DiagnosticRouter { active: Mutex::new(None) };

/// Install the router as the process logger. Idempotent; quietly loses to
/// any logger the embedding application installed first.
pub fn install_diagnostics() {
    static INSTALL: Once = Once::new();
    INSTALL.call_once(|| {
        if log::set_logger(&ROUTER).is_ok() {
            log::set_max_level(log::LevelFilter::Trace);
        }
    });
}

/// Point the router at a session's trace and current-side indicator.
pub fn attach_diagnostics(trace: SharedTrace, current: Arc<CurrentSide>) {
    let mut active = ROUTER.active.lock().unwrap_or_else(PoisonError::into_inner);
    *active = Some(ActiveSession { trace, current });
}

/// Detach the router; diagnostics are dropped until the next attach.
pub fn detach_diagnostics() {
    let mut active = ROUTER.active.lock().unwrap_or_else(PoisonError::into_inner);
    *active = None;
}

impl log::Log for DiagnosticRouter {
    fn enabled(&self, metadata: &log::Metadata<'_>) -> bool {
        metadata.target().starts_with("rustls")
    }

    fn log(&self, entry: &log::Record<'_>) {
        if !self.enabled(entry.metadata()) {
            return;
        }

        let mut text = entry.args().to_string();
        while text.ends_with('\n') || text.ends_with('\r') {
            text.pop();
        }
        if text.is_empty() {
            return;
        }

        let kind = classify_target(entry.target());
        let guard = self.active.lock().unwrap_or_else(PoisonError::into_inner);
        if let Some(session) = guard.as_ref() {
            record(&session.trace, session.current.get(), kind, &text);
        }
    }

    fn flush(&self) {}
}

/// Map a rustls log target (a module path) to a trace event kind.
///
/// Message codecs are checked first so `msgs::handshake` is not mistaken
/// for handshake-state output.
fn classify_target(target: &str) -> &'static str {
    if target.contains("msgs") || target.contains("codec") {
        "crypto_trace_coder"
    } else if target.ends_with("::hs")
        || target.contains("tls13")
        || target.contains("tls12")
        || target.contains("client")
        || target.contains("server")
    {
        "crypto_trace_state"
    } else if target.contains("record")
        || target.contains("cipher")
        || target.contains("deframe")
        || target.contains("fragment")
    {
        "crypto_trace_data"
    } else if target.contains("kx")
        || target.contains("key")
        || target.contains("suites")
        || target.contains("sign")
        || target.contains("crypto")
    {
        "crypto_trace_provider"
    } else {
        "crypto_trace_other"
    }
}
