//! Event tracing for in-process TLS simulations.
//!
//! A simulation produces exactly one Trace Document: an ordered JSON array
//! of `{side, event, details}` records plus a terminal status. This crate
//! owns that document's lifecycle - [`TraceLog`] is the only writer, and it
//! enforces a hard byte budget so a very chatty session (post-quantum key
//! material can run to tens of kilobytes per event) degrades to a truncated
//! but still syntactically valid document instead of failing.

mod log;
mod side;

pub use log::{DEFAULT_CAPACITY, MAX_DETAIL_LEN, Status, TraceLog};
pub use side::Side;
