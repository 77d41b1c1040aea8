//! Lock-step handshake driver.
//!
//! Alternates between stepping each endpoint's engine and pumping wire
//! bytes between them, for at most [`MAX_HANDSHAKE_STEPS`] rounds. All
//! state-transition events (`handshake_start`, `handshake_done`, the
//! post-establishment summary) are synthesized here, since the engine has
//! no state callback of its own.

use tlscope_trace::Side;

use crate::bridge::{CurrentSide, SharedTrace, record};
use crate::endpoint::{Endpoint, HandshakeState};
use crate::error::SimError;
use crate::explain;
use crate::material;
use crate::pump;

/// Round limit before the handshake is declared stuck.
pub const MAX_HANDSHAKE_STEPS: usize = 20;

/// Terminal result of driving a handshake.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DriveOutcome {
    /// Both endpoints completed; the connection is usable.
    Established,
    /// The named side hit a fatal engine error.
    Failed(Side),
    /// No completion within [`MAX_HANDSHAKE_STEPS`] rounds.
    TimedOut,
}

/// Drive the handshake between `client` and `server` to a terminal state.
pub fn drive(
    client: &mut Endpoint,
    server: &mut Endpoint,
    trace: &SharedTrace,
    current: &CurrentSide,
) -> Result<DriveOutcome, SimError> {
    for _ in 0..MAX_HANDSHAKE_STEPS {
        if let Some(side) = step(client, trace, current)? {
            return Ok(DriveOutcome::Failed(side));
        }
        if let Some(side) = step(server, trace, current)? {
            return Ok(DriveOutcome::Failed(side));
        }

        if client.state() == HandshakeState::Completed
            && server.state() == HandshakeState::Completed
        {
            summarize(client, server, trace, current);
            return Ok(DriveOutcome::Established);
        }

        pump::pump_both(client, server, trace)?;
    }

    current.set(Side::Connection);
    record(
        trace,
        Side::Connection,
        "error",
        &format!("Handshake not completed after {MAX_HANDSHAKE_STEPS} steps"),
    );
    Ok(DriveOutcome::TimedOut)
}

/// Advance one endpoint. Returns `Some(side)` on fatal failure.
fn step(
    ep: &mut Endpoint,
    trace: &SharedTrace,
    current: &CurrentSide,
) -> Result<Option<Side>, SimError> {
    let side = ep.side();
    match ep.state() {
        HandshakeState::Completed | HandshakeState::Failed => return Ok(None),
        HandshakeState::NotStarted => {
            current.set(side);
            record(trace, side, "handshake_start", "TLS handshake initiated");
            ep.set_state(HandshakeState::InProgress);
        },
        HandshakeState::InProgress => current.set(side),
    }

    if let Err(err) = ep.ingest() {
        record(trace, side, "error", &format!("Handshake error: {err}"));
        if let SimError::Engine(rustls::Error::InvalidCertificate(cert_err)) = &err {
            let details = match explain::explain(cert_err) {
                Some(text) => text.to_string(),
                None => format!("Certificate verification failed: {cert_err:?}"),
            };
            record(trace, side, "cert_verify_error", &details);
        }
        ep.set_state(HandshakeState::Failed);
        return Ok(Some(side));
    }

    if !ep.is_handshaking() {
        ep.set_state(HandshakeState::Completed);
        record(trace, side, "handshake_done", "TLS handshake completed");
    }
    Ok(None)
}

/// Connection-level summary once both sides have completed: negotiated
/// cipher, key-exchange group, and the peer's signature algorithm.
fn summarize(client: &Endpoint, server: &Endpoint, trace: &SharedTrace, current: &CurrentSide) {
    current.set(Side::Connection);

    if let Some(suite) = client.negotiated_cipher() {
        record(
            trace,
            Side::Connection,
            "established",
            &format!("Negotiated TLSv1.3, cipher {:?}", suite.suite()),
        );
    }

    match client.negotiated_group() {
        Some(group) => record(
            trace,
            Side::Connection,
            "key_exchange",
            &format!("Key Exchange: {:?}", group.name()),
        ),
        None => record(trace, Side::Connection, "debug", "Key exchange group not reported"),
    }

    // The engine exposes no negotiated-signature-scheme accessor, so the
    // closest observable fact is the signature on the server's leaf
    // certificate: preferably the copy the client actually received,
    // otherwise the one loaded from local material.
    let (cert, source) = match client.peer_certificates().and_then(|chain| chain.first()) {
        Some(cert) => (Some(cert.clone()), "peer certificate"),
        None => (server.local_cert().cloned(), "local material"),
    };
    if let Some(cert) = cert {
        record(
            trace,
            Side::Connection,
            "debug",
            &format!("Signature algorithm read from {source}"),
        );
        if let Some(name) = material::signature_algorithm_name(&cert) {
            record(
                trace,
                Side::Connection,
                "signature_algorithm",
                &format!("Peer Signature Algorithm: {name}"),
            );
        }
    }
}
