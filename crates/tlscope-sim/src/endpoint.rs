//! One simulated TLS endpoint: an engine connection plus its staged
//! inbound wire bytes.
//!
//! Endpoints never touch a socket. Wire bytes leave through
//! [`Endpoint::drain_outbound`] and arrive through
//! [`Endpoint::push_inbound`]; the pump moves them between peers.

use std::io::{Read as _, Write as _};
use std::sync::Arc;

use rustls::pki_types::{CertificateDer, ServerName};
use rustls::server::WebPkiClientVerifier;
use rustls::{
    ClientConfig, ClientConnection, Connection, ServerConfig, ServerConnection,
    SupportedCipherSuite,
};
use tlscope_trace::Side;

use crate::bridge::{SecretSink, SharedTrace};
use crate::error::SimError;
use crate::material::{self, MaterialPaths};
use crate::settings::{EndpointSettings, VerifyMode};
use crate::verify::AcceptAnyServerCert;

/// Hostname the client asserts; the in-process server never checks it
/// unless a trust anchor makes the client verify names.
const SERVER_NAME: &str = "localhost";

/// Handshake progress of one endpoint.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HandshakeState {
    /// No handshake step taken yet.
    NotStarted,
    /// At least one step taken, not yet complete.
    InProgress,
    /// Handshake finished successfully.
    Completed,
    /// A fatal engine error ended the handshake.
    Failed,
}

/// A single simulated peer.
pub struct Endpoint {
    side: Side,
    conn: Connection,
    inbound: Vec<u8>,
    state: HandshakeState,
    /// Leaf of the locally loaded certificate chain, kept for inspection.
    local_cert: Option<CertificateDer<'static>>,
}

impl std::fmt::Debug for Endpoint {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Endpoint")
            .field("side", &self.side)
            .field("state", &self.state)
            .field("inbound", &self.inbound.len())
            .finish_non_exhaustive()
    }
}

impl Endpoint {
    /// Build the client endpoint.
    ///
    /// With a trust anchor and `VerifyMode` `Peer` the client verifies the
    /// server against it; otherwise any server certificate is accepted.
    /// Client authentication is enabled when `client.crt`/`client.key`
    /// exist in the material directory.
    pub fn client(
        settings: &EndpointSettings,
        paths: &MaterialPaths,
        trace: &SharedTrace,
    ) -> Result<Self, SimError> {
        let provider = Arc::new(settings.provider());
        let builder = ClientConfig::builder_with_provider(provider)
            .with_protocol_versions(&[&rustls::version::TLS13])?;

        let builder = match (&settings.roots, settings.verify.contains(VerifyMode::PEER)) {
            (Some(roots), true) => builder.with_root_certificates(roots.clone()),
            _ => {
                let schemes = settings.signature_schemes.clone().unwrap_or_default();
                builder
                    .dangerous()
                    .with_custom_certificate_verifier(Arc::new(
                        AcceptAnyServerCert::with_schemes(schemes),
                    ))
            },
        };

        let cert_path = paths.client_cert();
        let key_path = paths.client_key();
        let mut local_cert = None;
        let mut config = if cert_path.exists() && key_path.exists() {
            let chain = material::load_cert_chain(&cert_path)?;
            let key = material::load_private_key(&key_path)?;
            local_cert = chain.first().cloned();
            builder.with_client_auth_cert(chain, key)?
        } else {
            builder.with_no_client_auth()
        };
        config.key_log = Arc::new(SecretSink::new(Side::Client, Arc::clone(trace)));

        let name = ServerName::try_from(SERVER_NAME.to_string()).map_err(|e| {
            SimError::Setup { side: "client", reason: format!("invalid server name: {e}") }
        })?;
        let conn = ClientConnection::new(Arc::new(config), name)?;

        Ok(Self {
            side: Side::Client,
            conn: Connection::Client(conn),
            inbound: Vec::new(),
            state: HandshakeState::NotStarted,
            local_cert,
        })
    }

    /// Build the server endpoint. `server.crt`/`server.key` are required.
    ///
    /// With a trust anchor and `VerifyMode` `Peer` the server requests a
    /// client certificate; adding `Request` makes one mandatory.
    pub fn server(
        settings: &EndpointSettings,
        paths: &MaterialPaths,
        trace: &SharedTrace,
    ) -> Result<Self, SimError> {
        let provider = Arc::new(settings.provider());
        let builder = ServerConfig::builder_with_provider(Arc::clone(&provider))
            .with_protocol_versions(&[&rustls::version::TLS13])?;

        let builder = match (&settings.roots, settings.verify.contains(VerifyMode::PEER)) {
            (Some(roots), true) => {
                let mut verifier = WebPkiClientVerifier::builder_with_provider(
                    Arc::new(roots.clone()),
                    provider,
                );
                if !settings.verify.contains(VerifyMode::REQUIRE) {
                    verifier = verifier.allow_unauthenticated();
                }
                let verifier = verifier.build().map_err(|e| SimError::Setup {
                    side: "server",
                    reason: format!("client verifier rejected: {e}"),
                })?;
                builder.with_client_cert_verifier(verifier)
            },
            _ => builder.with_no_client_auth(),
        };

        let chain = material::load_cert_chain(&paths.server_cert())?;
        let key = material::load_private_key(&paths.server_key())?;
        let local_cert = chain.first().cloned();
        let mut config = builder.with_single_cert(chain, key)?;
        config.key_log = Arc::new(SecretSink::new(Side::Server, Arc::clone(trace)));

        let conn = ServerConnection::new(Arc::new(config))?;

        Ok(Self {
            side: Side::Server,
            conn: Connection::Server(conn),
            inbound: Vec::new(),
            state: HandshakeState::NotStarted,
            local_cert,
        })
    }

    /// Which peer this endpoint plays.
    #[must_use]
    pub fn side(&self) -> Side {
        self.side
    }

    /// Current handshake progress.
    #[must_use]
    pub fn state(&self) -> HandshakeState {
        self.state
    }

    /// Record a handshake-progress transition.
    pub fn set_state(&mut self, state: HandshakeState) {
        self.state = state;
    }

    /// Leaf certificate loaded from local material, if any.
    #[must_use]
    pub fn local_cert(&self) -> Option<&CertificateDer<'static>> {
        self.local_cert.as_ref()
    }

    /// Stage wire bytes received from the peer.
    pub fn push_inbound(&mut self, bytes: &[u8]) {
        self.inbound.extend_from_slice(bytes);
    }

    /// Feed staged wire bytes into the engine and process the resulting
    /// records. Fatal engine errors (including certificate rejection)
    /// surface here.
    pub fn ingest(&mut self) -> Result<(), SimError> {
        while !self.inbound.is_empty() {
            let mut cursor = &self.inbound[..];
            let consumed = self.conn.read_tls(&mut cursor)?;
            if consumed == 0 {
                // Engine buffer full; leave the rest staged.
                break;
            }
            self.inbound.drain(..consumed);
            self.conn.process_new_packets()?;
        }
        Ok(())
    }

    /// Pull all pending outbound wire bytes out of the engine.
    pub fn drain_outbound(&mut self) -> Result<Vec<u8>, SimError> {
        let mut out = Vec::new();
        while self.conn.wants_write() {
            self.conn.write_tls(&mut out)?;
        }
        Ok(out)
    }

    /// Whether the engine still has handshake work to do.
    #[must_use]
    pub fn is_handshaking(&self) -> bool {
        self.conn.is_handshaking()
    }

    /// Whether outbound wire bytes are pending.
    #[must_use]
    pub fn wants_write(&self) -> bool {
        self.conn.wants_write()
    }

    /// Queue application data for encryption.
    pub fn write_plaintext(&mut self, data: &[u8]) -> Result<(), SimError> {
        self.conn.writer().write_all(data)?;
        Ok(())
    }

    /// Read decrypted application data. `Ok(0)` means the peer closed
    /// cleanly; `ErrorKind::WouldBlock` means nothing is available.
    pub fn read_plaintext(&mut self, buf: &mut [u8]) -> std::io::Result<usize> {
        self.conn.reader().read(buf)
    }

    /// Queue a TLS `close_notify` alert.
    pub fn send_close_notify(&mut self) {
        self.conn.send_close_notify();
    }

    /// Negotiated cipher suite, once known.
    #[must_use]
    pub fn negotiated_cipher(&self) -> Option<SupportedCipherSuite> {
        self.conn.negotiated_cipher_suite()
    }

    /// Negotiated key-exchange group, once known.
    #[must_use]
    pub fn negotiated_group(&self) -> Option<&'static dyn rustls::crypto::SupportedKxGroup> {
        self.conn.negotiated_key_exchange_group()
    }

    /// Certificate chain the peer presented, once known.
    #[must_use]
    pub fn peer_certificates(&self) -> Option<&[CertificateDer<'static>]> {
        self.conn.peer_certificates()
    }
}
