//! Error types for the simulator.
//!
//! These are internal plumbing: the public entry point never surfaces a
//! `SimError` to callers. Setup failures finalize the trace with status
//! `error`, handshake failures with status `failed`, and everything else
//! is logged as an event and tolerated.

use std::io;

use thiserror::Error;

/// Errors raised while setting up or driving a simulation session.
#[derive(Debug, Error)]
pub enum SimError {
    /// An endpoint context could not be created.
    #[error("failed to create {side} context: {reason}")]
    Setup {
        /// Which endpoint failed ("client" or "server").
        side: &'static str,
        /// Engine-reported reason.
        reason: String,
    },

    /// Certificate or key material could not be loaded.
    #[error("invalid key material in '{path}': {reason}")]
    Material {
        /// Path of the offending file.
        path: String,
        /// What was wrong with it.
        reason: String,
    },

    /// A fatal error reported by the TLS engine.
    #[error("TLS engine error: {0}")]
    Engine(#[from] rustls::Error),

    /// An I/O error from the in-memory transport plumbing.
    #[error("transport error: {0}")]
    Io(#[from] io::Error),
}
