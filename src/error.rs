//! Error taxonomy for session handling and packet rewriting.
//!
//! `SessionError` covers everything a single proxy session can fail on;
//! every variant is logged and discarded by the caller, never propagated
//! past the session supervisor. `PacketError` covers a single packet's
//! failure to re-serialize inside the interceptor callback. A fatal
//! NFQUEUE error is deliberately *not* part of either enum: it is
//! represented as a plain `anyhow::Error` so it cannot be accidentally
//! caught by a `match` written against the local error kinds.

/// Failure of a single proxy session. Always local: the session is torn
/// down and the failure is logged, never propagated to other sessions.
#[derive(Debug, thiserror::Error)]
pub enum SessionError {
    /// The client violated the SOCKS5 handshake or request framing.
    #[error("handshake malformed: {0}")]
    HandshakeMalformed(String),

    /// Dialing the upstream target failed.
    #[error("connect to {addr} failed: {source}")]
    ConnectFailed {
        addr: String,
        #[source]
        source: std::io::Error,
    },

    /// A read or write on either socket returned an I/O error mid-stream.
    #[error("transport error: {0}")]
    Transport(#[from] std::io::Error),
}

impl SessionError {
    /// Coarse error-kind label, used only for log messages.
    pub fn kind(&self) -> &'static str {
        match self {
            SessionError::HandshakeMalformed(_) => "handshake-malformed",
            SessionError::ConnectFailed { .. } => "connect-failed",
            SessionError::Transport(_) => "io-transport",
        }
    }
}

/// Failure to parse or re-serialize a single intercepted packet.
#[derive(Debug, thiserror::Error)]
pub enum PacketError {
    /// The payload did not parse as a well-formed IPv4 packet.
    #[error("packet parse failed: {0}")]
    Parse(String),

    /// `etherparse` refused to serialize the mutated packet.
    #[error("packet serialize failed: {0}")]
    Serialize(String),
}
