//! The bounded Trace Document writer.
//!
//! The document is assembled in a single pass: a fixed header, one escaped
//! JSON object per event, and a footer appended at finalization. Every
//! `record` call checks that the entry plus a reserved footer region still
//! fits the capacity; an entry that does not fit is dropped silently so the
//! document is never left unclosed.

use std::fmt;

use crate::Side;

/// Total byte budget for one Trace Document, sized so even post-quantum
/// key material fits.
pub const DEFAULT_CAPACITY: usize = 10 * 1024 * 1024;

/// Maximum length of a single `details` payload, applied to the raw input
/// before escaping.
pub const MAX_DETAIL_LEN: usize = 16 * 1024;

/// Bytes held back for the closing footer (status + escaped error message).
const FOOTER_RESERVE: usize = 512;

/// Maximum raw length of the footer error message; its escaped form must
/// fit inside [`FOOTER_RESERVE`] together with the footer syntax.
const MAX_ERROR_LEN: usize = 200;

const HEADER: &str = "{\"trace\":[";

/// Terminal status of a Trace Document.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Status {
    /// Handshake (and any scripted exchange) completed.
    Success,
    /// Handshake failed or timed out.
    Failed,
    /// The session could not be set up at all.
    Error,
}

impl Status {
    /// Stable string form used in the Trace Document.
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Success => "success",
            Self::Failed => "failed",
            Self::Error => "error",
        }
    }
}

impl fmt::Display for Status {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Append-only, capacity-capped event sink producing one JSON document.
///
/// Lifecycle: [`TraceLog::reset`] begins a document, [`TraceLog::record`]
/// appends events, [`TraceLog::finalize`] closes it and hands back the
/// text. Records outside that window are ignored.
pub struct TraceLog {
    buf: String,
    capacity: usize,
    entries: usize,
    finalized: bool,
}

impl Default for TraceLog {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for TraceLog {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TraceLog")
            .field("len", &self.buf.len())
            .field("capacity", &self.capacity)
            .field("entries", &self.entries)
            .field("finalized", &self.finalized)
            .finish()
    }
}

impl TraceLog {
    /// Create a log with the default 10 MiB capacity. The log is inert
    /// until [`TraceLog::reset`] begins a document.
    #[must_use]
    pub fn new() -> Self {
        Self::with_capacity(DEFAULT_CAPACITY)
    }

    /// Create a log with a custom capacity. Capacities too small to hold
    /// the header and footer are clamped up.
    #[must_use]
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            buf: String::new(),
            capacity: capacity.max(HEADER.len() + FOOTER_RESERVE),
            entries: 0,
            finalized: false,
        }
    }

    /// Begin a new, empty document. Idempotent; the only way to make the
    /// log accept records.
    pub fn reset(&mut self) {
        self.buf.clear();
        self.buf.push_str(HEADER);
        self.entries = 0;
        self.finalized = false;
    }

    /// Number of events recorded (drops excluded).
    #[must_use]
    pub fn entries(&self) -> usize {
        self.entries
    }

    /// Append one event. Silently ignored if the document has not been
    /// started, has been finalized, or if the entry would not leave room
    /// for the footer.
    pub fn record(&mut self, side: Side, event: &str, details: &str) {
        if self.finalized || self.buf.is_empty() {
            return;
        }

        let mut entry = String::with_capacity(64 + details.len().min(MAX_DETAIL_LEN));
        entry.push_str("{\"side\":\"");
        entry.push_str(side.as_str());
        entry.push_str("\",\"event\":\"");
        escape_into(&mut entry, event, MAX_DETAIL_LEN);
        entry.push_str("\",\"details\":\"");
        escape_into(&mut entry, details, MAX_DETAIL_LEN);
        entry.push_str("\"}");

        // +1 for the separating comma.
        if self.buf.len() + entry.len() + 1 + FOOTER_RESERVE > self.capacity {
            return;
        }

        if self.entries > 0 {
            self.buf.push(',');
        }
        self.buf.push_str(&entry);
        self.entries += 1;
    }

    /// Close the document and return its text. The log is left finalized
    /// and empty; further records are ignored until the next `reset`.
    pub fn finalize(&mut self, status: Status, error: Option<&str>) -> String {
        if self.buf.is_empty() {
            self.buf.push_str(HEADER);
        }

        self.buf.push_str("],\"status\":\"");
        self.buf.push_str(status.as_str());
        self.buf.push_str("\",\"error\":\"");
        escape_into(&mut self.buf, error.unwrap_or(""), MAX_ERROR_LEN);
        self.buf.push_str("\"}");

        self.finalized = true;
        self.entries = 0;
        std::mem::take(&mut self.buf)
    }
}

/// Escape `raw` (truncated to `max_src` input bytes) into `out`.
///
/// `"` and `\` are backslash-escaped, newline/CR/tab become two-character
/// escapes, every other byte outside printable ASCII becomes a `?`
/// placeholder. Output is therefore pure ASCII and safe to embed in a JSON
/// string literal.
fn escape_into(out: &mut String, raw: &str, max_src: usize) {
    for &b in raw.as_bytes().iter().take(max_src) {
        match b {
            b'"' => out.push_str("\\\""),
            b'\\' => out.push_str("\\\\"),
            b'\n' => out.push_str("\\n"),
            b'\r' => out.push_str("\\r"),
            b'\t' => out.push_str("\\t"),
            0x20..=0x7e => out.push(b as char),
            _ => out.push('?'),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parsed(doc: &str) -> serde_json::Value {
        serde_json::from_str(doc).unwrap()
    }

    #[test]
    fn empty_document_after_reset() {
        let mut log = TraceLog::new();
        log.reset();
        let doc = log.finalize(Status::Success, None);
        let v = parsed(&doc);
        assert_eq!(v["trace"].as_array().unwrap().len(), 0);
        assert_eq!(v["status"], "success");
        assert_eq!(v["error"], "");
    }

    #[test]
    fn double_reset_is_idempotent() {
        let mut log = TraceLog::new();
        log.reset();
        log.reset();
        log.record(Side::Client, "init", "first");
        let doc = log.finalize(Status::Success, None);
        let v = parsed(&doc);
        let trace = v["trace"].as_array().unwrap();
        assert_eq!(trace.len(), 1);
        assert_eq!(trace[0]["details"], "first");
    }

    #[test]
    fn records_before_reset_are_ignored() {
        let mut log = TraceLog::new();
        log.record(Side::Client, "init", "lost");
        log.reset();
        let doc = log.finalize(Status::Success, None);
        assert_eq!(parsed(&doc)["trace"].as_array().unwrap().len(), 0);
    }

    #[test]
    fn records_after_finalize_are_ignored() {
        let mut log = TraceLog::new();
        log.reset();
        let _ = log.finalize(Status::Success, None);
        log.record(Side::Client, "init", "late");
        assert_eq!(log.entries(), 0);
    }

    #[test]
    fn preserves_recording_order_across_sides() {
        let mut log = TraceLog::new();
        log.reset();
        log.record(Side::Client, "a", "1");
        log.record(Side::Server, "b", "2");
        log.record(Side::Client, "c", "3");
        let doc = log.finalize(Status::Success, None);
        let v = parsed(&doc);
        let events: Vec<_> = v["trace"]
            .as_array()
            .unwrap()
            .iter()
            .map(|e| e["event"].as_str().unwrap().to_string())
            .collect();
        assert_eq!(events, vec!["a", "b", "c"]);
    }

    #[test]
    fn escapes_special_characters() {
        let mut log = TraceLog::new();
        log.reset();
        log.record(Side::Server, "msg", "quote\" slash\\ nl\n cr\r tab\t bell\x07");
        let doc = log.finalize(Status::Success, None);
        let v = parsed(&doc);
        assert_eq!(
            v["trace"][0]["details"],
            "quote\" slash\\ nl\n cr\r tab\t bell?"
        );
    }

    #[test]
    fn non_ascii_becomes_placeholder_bytes() {
        let mut log = TraceLog::new();
        log.reset();
        log.record(Side::Client, "msg", "héllo");
        let doc = log.finalize(Status::Success, None);
        // 'é' is two UTF-8 bytes, each replaced independently.
        assert_eq!(parsed(&doc)["trace"][0]["details"], "h??llo");
    }

    #[test]
    fn details_are_truncated_to_cap() {
        let mut log = TraceLog::new();
        log.reset();
        let long = "x".repeat(MAX_DETAIL_LEN + 100);
        log.record(Side::Client, "big", &long);
        let doc = log.finalize(Status::Success, None);
        let v = parsed(&doc);
        assert_eq!(v["trace"][0]["details"].as_str().unwrap().len(), MAX_DETAIL_LEN);
    }

    #[test]
    fn overflow_drops_events_but_keeps_document_valid() {
        let mut log = TraceLog::with_capacity(4096);
        log.reset();
        for i in 0..100 {
            log.record(Side::Client, "fill", &format!("event {i} {}", "y".repeat(100)));
        }
        let doc = log.finalize(Status::Success, None);
        assert!(doc.len() <= 4096);
        let v = parsed(&doc);
        let trace = v["trace"].as_array().unwrap();
        assert!(trace.len() < 100);
        assert!(!trace.is_empty());
        // Events that did fit are the earliest ones, in order.
        assert_eq!(trace[0]["details"].as_str().unwrap().split(' ').nth(1), Some("0"));
    }

    #[test]
    fn footer_error_is_escaped() {
        let mut log = TraceLog::new();
        log.reset();
        let doc = log.finalize(Status::Failed, Some("bad \"quote\"\nnewline"));
        let v = parsed(&doc);
        assert_eq!(v["status"], "failed");
        assert_eq!(v["error"], "bad \"quote\"\nnewline");
    }
}
