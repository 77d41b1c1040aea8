//! In-process TLS 1.3 handshake simulation with event tracing.
//!
//! Two endpoints - a rustls client and a rustls server - are driven through
//! a complete handshake and an optional scripted conversation without any
//! network sockets. Bytes move between the endpoints through in-memory
//! buffers, and every observable protocol event (configuration, wire bytes,
//! derived secrets, state transitions, errors, application messages) is
//! appended to a single bounded JSON trace, attributed to the side that
//! produced it.
//!
//! The only operation callers need is [`run_simulation`], which always
//! returns a finalized Trace Document - every failure mode is routed into
//! the document's `status`/`error` fields rather than an `Err`.
//!
//! ```no_run
//! use tlscope_sim::{SimulationOptions, run_simulation};
//!
//! let opts = SimulationOptions::default();
//! let trace_json = run_simulation(&opts);
//! ```

pub mod bridge;
pub mod config;
pub mod driver;
pub mod endpoint;
pub mod error;
pub mod explain;
pub mod material;
pub mod pump;
pub mod script;
pub mod session;
pub mod settings;
pub mod verify;

pub use error::SimError;
pub use session::{SimulationOptions, run_simulation};
