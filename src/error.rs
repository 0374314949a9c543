//! Error types for the wire codec, configuration loader, and time-triggered
//! state machines.
//!
//! Everything above the codec boundary is propagated with `anyhow::Result`;
//! these types exist where callers need to match on *why* something failed
//! (configuration problems are fatal at startup, stale timestamps abort a
//! round but are not fatal, wire errors drop a single datagram).

use thiserror::Error;

use crate::clock::Timestamp;

/// Failures decoding or encoding a `ControlMessage` / `RMPayload` / `DataMessage`.
///
/// A `WireError` on receive means "drop this datagram and keep the receive
/// loop running" (§7); it never aborts the transport itself.
#[derive(Debug, Error)]
pub enum WireError {
    #[error("datagram too short: got {got} bytes, need at least {need}")]
    TooShort { got: usize, need: usize },

    #[error("datagram exceeds max_length {max}: got {got}")]
    TooLong { got: usize, max: usize },

    #[error("unknown message kind {0}")]
    UnknownKind(u32),

    #[error("unknown protocol id {0}")]
    UnknownProtocol(u32),

    #[error("payload length {declared} does not match remaining bytes {actual}")]
    PayloadLengthMismatch { declared: usize, actual: usize },
}

/// Fatal configuration problems. All are raised once, at process start, and
/// never recovered from: the binary exits non-zero.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("configuration file {path} not found")]
    FileNotFound { path: String },

    #[error("section {section} missing from configuration")]
    MissingSection { section: &'static str },

    #[error("no unit settings found for host {host_name}")]
    UnknownHost { host_name: String },

    #[error("no service settings found for service id {service_id}")]
    UnknownService { service_id: u64 },

    #[error("malformed configuration: {0}")]
    Malformed(#[from] serde_json::Error),

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

/// A timestamp supplied for a wait was not strictly in the future when it
/// was validated. The affected round is aborted; the client stays in its
/// current state (§7, Scenario C).
#[derive(Debug, Error)]
#[error("timestamps invalid: {field} = {value:?} is not strictly in the future of now = {now:?}")]
pub struct TimestampError {
    pub field: &'static str,
    pub value: Timestamp,
    pub now: Timestamp,
}
