//! Smart protocol v1/v2 codec: pkt-line framing, side-band
//! demultiplexing, capability negotiation, and the fetch/push request
//! and response formats.

pub mod capability;
pub mod fetch;
pub mod pktline;
pub mod push;
pub mod sideband;
pub mod v1;
pub mod v2;

pub use capability::Capabilities;
pub use pktline::{PktLine, PktLineReader, PktLineWriter};

/// Errors from wire protocol handling.
#[derive(Debug, thiserror::Error)]
pub enum ProtocolError {
    #[error("invalid pkt-line: {0}")]
    InvalidPktLine(String),

    #[error("protocol error: {0}")]
    Protocol(String),

    #[error("remote error: {0}")]
    ServerError(String),

    #[error("remote does not support {capability} (needed for {parameter})")]
    RemoteCapability {
        capability: String,
        parameter: String,
    },

    #[error("push rejected: {refname}: {reason}")]
    PushRejected { refname: String, reason: String },

    #[error(transparent)]
    Transport(#[from] gitport_transport::TransportError),

    #[error(transparent)]
    Hash(#[from] gitport_hash::HashError),

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

/// Protocol versions the client can speak.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ProtocolVersion {
    /// Use v2 when the server advertises it, v1 otherwise.
    #[default]
    Auto,
    /// Force the v1 dialect even against a v2-capable server.
    V1,
    /// Require v2; fail when the server cannot speak it.
    V2,
}
