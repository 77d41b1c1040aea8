//! Post-handshake script interpreter.
//!
//! Script files are line oriented. Recognized commands:
//!
//! ```text
//! CLIENT_SEND:<message>
//! SERVER_SEND:<message>
//! CLIENT_DISCONNECT
//! SERVER_DISCONNECT
//! ```
//!
//! Blank lines, `#` comments, and unrecognized lines are skipped without
//! an event.

use tlscope_trace::Side;

use crate::bridge::{CurrentSide, SharedTrace, record};
use crate::endpoint::Endpoint;
use crate::error::SimError;
use crate::pump;

/// One parsed script line.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ScriptCommand {
    /// Encrypt and deliver an application message from `side`.
    Send {
        /// Originating side.
        side: Side,
        /// Plaintext payload.
        message: String,
    },
    /// Initiate an orderly TLS shutdown from `side`.
    Disconnect {
        /// Initiating side.
        side: Side,
    },
}

impl ScriptCommand {
    /// Parse one trimmed script line. `None` for unrecognized input.
    #[must_use]
    pub fn parse(line: &str) -> Option<Self> {
        if let Some(message) = line.strip_prefix("CLIENT_SEND:") {
            return Some(Self::Send { side: Side::Client, message: message.to_string() });
        }
        if let Some(message) = line.strip_prefix("SERVER_SEND:") {
            return Some(Self::Send { side: Side::Server, message: message.to_string() });
        }
        match line {
            "CLIENT_DISCONNECT" => Some(Self::Disconnect { side: Side::Client }),
            "SERVER_DISCONNECT" => Some(Self::Disconnect { side: Side::Server }),
            _ => None,
        }
    }
}

/// What a read pass on one endpoint produced.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ReadOutcome {
    /// At least one application message arrived.
    Data,
    /// The peer's `close_notify` arrived.
    Closed,
    /// Nothing was available.
    WouldBlock,
}

/// Run every line of `script` against an established connection.
pub fn run_script(
    script: &str,
    client: &mut Endpoint,
    server: &mut Endpoint,
    trace: &SharedTrace,
    current: &CurrentSide,
) -> Result<(), SimError> {
    for raw_line in script.lines() {
        let line = raw_line.trim();
        if line.is_empty() || line.starts_with('#') {
            continue;
        }
        match ScriptCommand::parse(line) {
            Some(cmd) => execute(cmd, client, server, trace, current)?,
            // Unrecognized lines are skipped without an event.
            None => tracing::debug!(line, "unrecognized script line"),
        }
    }
    Ok(())
}

fn pair<'a>(
    side: Side,
    client: &'a mut Endpoint,
    server: &'a mut Endpoint,
) -> (&'a mut Endpoint, &'a mut Endpoint) {
    match side {
        Side::Client => (client, server),
        _ => (server, client),
    }
}

fn execute(
    cmd: ScriptCommand,
    client: &mut Endpoint,
    server: &mut Endpoint,
    trace: &SharedTrace,
    current: &CurrentSide,
) -> Result<(), SimError> {
    match cmd {
        ScriptCommand::Send { side, message } => {
            let (from, to) = pair(side, client, server);
            current.set(side);
            record(trace, side, "message_sent", &format!("Sending: {message}"));
            from.write_plaintext(message.as_bytes())?;
            pump::pump(from, to, trace)?;
            process_reads(to, trace, current);
        },
        ScriptCommand::Disconnect { side } => {
            let (from, to) = pair(side, client, server);
            current.set(side);
            record(trace, side, "action", "Sending close_notify");
            from.send_close_notify();
            pump::pump(from, to, trace)?;

            // An orderly shutdown is symmetric: the peer answers with its
            // own close_notify so both sides observe a clean closure.
            if process_reads(to, trace, current) == ReadOutcome::Closed {
                let peer = to.side();
                current.set(peer);
                record(trace, peer, "action", "Sending close_notify");
                to.send_close_notify();
                pump::pump(to, from, trace)?;
                process_reads(from, trace, current);
            }
        },
    }
    Ok(())
}

/// Ingest staged bytes and drain the plaintext stream of one endpoint,
/// logging what came out. Engine errors here are logged, not fatal; the
/// rest of the script still runs.
fn process_reads(ep: &mut Endpoint, trace: &SharedTrace, current: &CurrentSide) -> ReadOutcome {
    let side = ep.side();
    current.set(side);
    if let Err(err) = ep.ingest() {
        record(trace, side, "error", &format!("Read error: {err}"));
    }

    let mut buf = [0u8; 16 * 1024];
    let mut outcome = ReadOutcome::WouldBlock;
    loop {
        match ep.read_plaintext(&mut buf) {
            Ok(0) => {
                record(trace, side, "connection_closed", "Peer closed connection (close_notify)");
                return ReadOutcome::Closed;
            },
            Ok(n) => {
                let text = String::from_utf8_lossy(&buf[..n]);
                record(trace, side, "message_received", &format!("Received: {text}"));
                outcome = ReadOutcome::Data;
            },
            Err(err) if err.kind() == std::io::ErrorKind::WouldBlock => {
                if outcome == ReadOutcome::WouldBlock {
                    record(trace, side, "read_blocked", "No application data available");
                }
                return outcome;
            },
            Err(err) => {
                record(trace, side, "error", &format!("Read error: {err}"));
                return outcome;
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use std::fs;
    use std::sync::{Arc, Mutex};

    use tlscope_trace::{Status, TraceLog};

    use super::*;
    use crate::driver::{self, DriveOutcome};
    use crate::material::MaterialPaths;
    use crate::settings::EndpointSettings;

    #[test]
    fn parses_all_commands() {
        assert_eq!(
            ScriptCommand::parse("CLIENT_SEND:hello there"),
            Some(ScriptCommand::Send { side: Side::Client, message: "hello there".to_string() })
        );
        assert_eq!(
            ScriptCommand::parse("SERVER_SEND:ack"),
            Some(ScriptCommand::Send { side: Side::Server, message: "ack".to_string() })
        );
        assert_eq!(
            ScriptCommand::parse("CLIENT_DISCONNECT"),
            Some(ScriptCommand::Disconnect { side: Side::Client })
        );
        assert_eq!(
            ScriptCommand::parse("SERVER_DISCONNECT"),
            Some(ScriptCommand::Disconnect { side: Side::Server })
        );
        assert_eq!(ScriptCommand::parse("REBOOT"), None);
        assert_eq!(ScriptCommand::parse("CLIENT_DISCONNECT now"), None);
    }

    #[test]
    fn empty_send_is_still_a_send() {
        assert_eq!(
            ScriptCommand::parse("CLIENT_SEND:"),
            Some(ScriptCommand::Send { side: Side::Client, message: String::new() })
        );
    }

    fn established_pair(
        trace: &SharedTrace,
        current: &CurrentSide,
    ) -> (Endpoint, Endpoint, tempfile::TempDir) {
        let dir = tempfile::tempdir().unwrap();
        let cert = rcgen::generate_simple_self_signed(vec!["localhost".to_string()]).unwrap();
        fs::write(dir.path().join("server.crt"), cert.cert.pem()).unwrap();
        fs::write(dir.path().join("server.key"), cert.key_pair.serialize_pem()).unwrap();

        let paths = MaterialPaths::new(dir.path());
        let mut client = Endpoint::client(&EndpointSettings::default(), &paths, trace).unwrap();
        let mut server = Endpoint::server(&EndpointSettings::default(), &paths, trace).unwrap();
        let outcome = driver::drive(&mut client, &mut server, trace, current).unwrap();
        assert_eq!(outcome, DriveOutcome::Established);
        (client, server, dir)
    }

    fn events(trace: &SharedTrace) -> Vec<(String, String, String)> {
        let doc = trace.lock().unwrap().finalize(Status::Success, None);
        let v: serde_json::Value = serde_json::from_str(&doc).unwrap();
        v["trace"]
            .as_array()
            .unwrap()
            .iter()
            .map(|e| {
                (
                    e["side"].as_str().unwrap().to_string(),
                    e["event"].as_str().unwrap().to_string(),
                    e["details"].as_str().unwrap().to_string(),
                )
            })
            .collect()
    }

    #[test]
    fn send_and_disconnect_round_trip() {
        let trace: SharedTrace = Arc::new(Mutex::new({
            let mut log = TraceLog::new();
            log.reset();
            log
        }));
        let current = CurrentSide::new();
        let (mut client, mut server, _dir) = established_pair(&trace, &current);

        run_script(
            "CLIENT_SEND:hello\nSERVER_SEND:ack\nCLIENT_DISCONNECT\n",
            &mut client,
            &mut server,
            &trace,
            &current,
        )
        .unwrap();

        let recorded = events(&trace);
        assert!(recorded.iter().any(|(s, k, d)| {
            s == "server" && k == "message_received" && d == "Received: hello"
        }));
        assert!(recorded.iter().any(|(s, k, d)| {
            s == "client" && k == "message_received" && d == "Received: ack"
        }));
        // Orderly shutdown closes both directions.
        assert!(recorded.iter().any(|(s, k, _)| s == "server" && k == "connection_closed"));
        assert!(recorded.iter().any(|(s, k, _)| s == "client" && k == "connection_closed"));
    }

    #[test]
    fn unknown_command_is_skipped_silently() {
        let trace: SharedTrace = Arc::new(Mutex::new({
            let mut log = TraceLog::new();
            log.reset();
            log
        }));
        let current = CurrentSide::new();
        let (mut client, mut server, _dir) = established_pair(&trace, &current);

        run_script("FLY_TO_MOON\nSERVER_SEND:ok\n", &mut client, &mut server, &trace, &current)
            .unwrap();

        let recorded = events(&trace);
        assert!(!recorded.iter().any(|(_, _, d)| d.contains("FLY_TO_MOON")));
        assert!(recorded.iter().any(|(s, k, _)| s == "client" && k == "message_received"));
    }
}
