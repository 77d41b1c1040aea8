//! Session entry point: one complete simulation run producing one trace
//! document.
//!
//! Sessions are serialized behind a process-wide gate because the
//! diagnostic router is installed on the global `log` facade and can only
//! feed one trace at a time.

use std::path::PathBuf;
use std::sync::{Arc, Mutex, PoisonError};

use tlscope_trace::{Side, Status, TraceLog};

use crate::bridge::{self, CurrentSide, SharedTrace, record};
use crate::config;
use crate::driver::{self, DriveOutcome};
use crate::endpoint::Endpoint;
use crate::material::{self, MaterialPaths};
use crate::script;
use crate::settings::{EndpointSettings, VerifyMode};

/// Inputs of one simulation run.
#[derive(Debug, Clone)]
pub struct SimulationOptions {
    /// Directory holding the fixed-name key material files.
    pub material_dir: PathBuf,
    /// Optional client-side configuration file.
    pub client_config: Option<PathBuf>,
    /// Optional server-side configuration file.
    pub server_config: Option<PathBuf>,
    /// Optional post-handshake script.
    pub script: Option<PathBuf>,
}

impl Default for SimulationOptions {
    fn default() -> Self {
        Self {
            material_dir: PathBuf::from("/ssl"),
            client_config: None,
            server_config: None,
            script: None,
        }
    }
}

static SESSION_GATE: Mutex<()> = Mutex::new(());

/// Run one simulation and return the finalized trace document.
///
/// This never fails: every problem, including setup failures, is reported
/// inside the returned JSON document's `status` and `error` fields.
#[must_use]
pub fn run_simulation(options: &SimulationOptions) -> String {
    let _gate = SESSION_GATE.lock().unwrap_or_else(PoisonError::into_inner);
    bridge::install_diagnostics();

    let trace: SharedTrace = Arc::new(Mutex::new(TraceLog::new()));
    trace.lock().unwrap_or_else(PoisonError::into_inner).reset();
    let current = Arc::new(CurrentSide::new());
    bridge::attach_diagnostics(Arc::clone(&trace), Arc::clone(&current));

    tracing::info!(material = %options.material_dir.display(), "simulation started");
    let (status, error) = run_inner(options, &trace, &current);
    tracing::info!(status = status.as_str(), "simulation finished");

    bridge::detach_diagnostics();
    let mut log = trace.lock().unwrap_or_else(PoisonError::into_inner);
    log.finalize(status, error.as_deref())
}

fn run_inner(
    options: &SimulationOptions,
    trace: &SharedTrace,
    current: &CurrentSide,
) -> (Status, Option<String>) {
    let paths = MaterialPaths::new(&options.material_dir);

    current.set(Side::Client);
    let mut client_settings = EndpointSettings::default();
    config::apply(
        &mut client_settings,
        options.client_config.as_deref(),
        Side::Client,
        trace,
    );
    apply_material_ca(&mut client_settings, &paths.client_ca(), Side::Client, trace);

    current.set(Side::Server);
    let mut server_settings = EndpointSettings::default();
    config::apply(
        &mut server_settings,
        options.server_config.as_deref(),
        Side::Server,
        trace,
    );
    apply_material_ca(&mut server_settings, &paths.server_ca(), Side::Server, trace);

    current.set(Side::Client);
    let mut client = match Endpoint::client(&client_settings, &paths, trace) {
        Ok(endpoint) => {
            record(trace, Side::Client, "init", "Created TLS 1.3 client context");
            endpoint
        },
        Err(err) => {
            record(trace, Side::Client, "error", &format!("Failed to create client context: {err}"));
            return (Status::Error, Some("Failed to create client context".to_string()));
        },
    };

    current.set(Side::Server);
    let mut server = match Endpoint::server(&server_settings, &paths, trace) {
        Ok(endpoint) => {
            record(trace, Side::Server, "init", "Created TLS 1.3 server context");
            endpoint
        },
        Err(err) => {
            record(trace, Side::Server, "error", &format!("Failed to create server context: {err}"));
            return (Status::Error, Some("Failed to create server context".to_string()));
        },
    };

    let outcome = match driver::drive(&mut client, &mut server, trace, current) {
        Ok(outcome) => outcome,
        Err(err) => {
            record(trace, Side::System, "error", &format!("Simulation error: {err}"));
            return (Status::Error, Some("Simulation error".to_string()));
        },
    };

    match outcome {
        DriveOutcome::Failed(Side::Client) => {
            return (Status::Failed, Some("Client handshake failed".to_string()));
        },
        DriveOutcome::Failed(_) => {
            return (Status::Failed, Some("Server handshake failed".to_string()));
        },
        DriveOutcome::TimedOut => {
            return (Status::Failed, Some("Handshake timeout".to_string()));
        },
        DriveOutcome::Established => {},
    }

    if let Some(path) = &options.script {
        match std::fs::read_to_string(path) {
            Ok(text) => {
                if let Err(err) =
                    script::run_script(&text, &mut client, &mut server, trace, current)
                {
                    record(trace, Side::System, "error", &format!("Script failed: {err}"));
                    return (Status::Error, Some("Script execution failed".to_string()));
                }
            },
            Err(err) => {
                record(
                    trace,
                    Side::System,
                    "warning",
                    &format!("Failed to read script {}: {err}", path.display()),
                );
            },
        }
    }

    (Status::Success, None)
}

/// Material-directory trust convention: a per-side CA file enables peer
/// verification against it without any config file.
fn apply_material_ca(
    settings: &mut EndpointSettings,
    path: &std::path::Path,
    side: Side,
    trace: &SharedTrace,
) {
    if !path.exists() {
        return;
    }
    match material::load_roots(path) {
        Ok((_roots, certs)) => {
            settings.add_roots(&certs);
            settings.verify.insert(VerifyMode::PEER);
            record(trace, side, "config_ca", "Loaded CA File");
            if let Some(family) = certs.first().and_then(material::public_key_family) {
                record(trace, side, "config_ca_details", &format!("CA Key Type: {family}"));
            }
        },
        Err(err) => {
            record(trace, side, "warning", &format!("Failed to load CA file: {err}"));
        },
    }
}
