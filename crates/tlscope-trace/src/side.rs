//! Side attribution for trace events.

use std::fmt;

/// The party an event is attributed to.
///
/// `Client` and `Server` tag the two simulated endpoints. `Connection` is
/// used for events describing the session as a whole (negotiated
/// parameters, timeouts), and `System` is the sentinel for callbacks that
/// fire before any endpoint association exists.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Side {
    /// The simulated TLS client endpoint.
    Client,
    /// The simulated TLS server endpoint.
    Server,
    /// The connection as a whole, not attributable to one endpoint.
    Connection,
    /// No endpoint association (startup/shutdown events).
    System,
}

impl Side {
    /// Stable string form used in the Trace Document.
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Client => "client",
            Self::Server => "server",
            Self::Connection => "connection",
            Self::System => "system",
        }
    }

    /// The opposite endpoint. `Connection` and `System` map to themselves.
    #[must_use]
    pub fn peer(self) -> Self {
        match self {
            Self::Client => Self::Server,
            Self::Server => Self::Client,
            other => other,
        }
    }
}

impl fmt::Display for Side {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
