use std::fmt;
use std::io;

use protocol_h2::H2Error;
use thiserror::Error;

use crate::context::ConnState;
use crate::uri::UriError;

/// Errors returned by [`Client::fetch`](crate::Client::fetch).
#[derive(Debug, Error)]
pub enum FetchError {
    /// Missing or extra command-line arguments.
    #[error("{0}")]
    Usage(String),
    #[error("could not parse URI: {0}")]
    InvalidUri(#[from] UriError),
    #[error("unsupported scheme {0:?}: only https is supported")]
    UnsupportedScheme(String),
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),
    #[error("invalid server name {0:?}")]
    InvalidServerName(String),
    /// DNS resolution or TCP connect failed.
    #[error("could not connect to the remote host: {0}")]
    ConnectFailure(#[source] io::Error),
    /// The peer finished the handshake without agreeing on HTTP/2.
    #[error("server did not negotiate h2 (selected: {selected})")]
    ProtocolNegotiation { selected: String },
    /// The peer sent bytes the protocol engine could not accept.
    #[error("fatal error: {0}")]
    ProtocolDecode(#[from] H2Error),
    #[error("{0}")]
    Transport(TransportFailure),
    #[error("TLS error: {0}")]
    Tls(#[from] rustls::Error),
    #[error("invalid connection state transition {from} -> {to}")]
    InvalidTransition { from: ConnState, to: ConnState },
}

impl FetchError {
    /// Whether the error happened before the connection-phase event loop had
    /// anything to tear down. These are reported by the caller; connection
    /// failures have already been reported on the diagnostic stream.
    pub fn is_setup_failure(&self) -> bool {
        matches!(
            self,
            Self::Usage(_)
                | Self::InvalidUri(_)
                | Self::UnsupportedScheme(_)
                | Self::InvalidConfig(_)
                | Self::InvalidServerName(_)
                | Self::ConnectFailure(_)
                | Self::ProtocolNegotiation { .. }
        )
    }

    /// Process exit status for the error.
    pub fn exit_code(&self) -> u8 {
        match self {
            Self::Usage(_) => 2,
            _ => 1,
        }
    }
}

/// Why the transport ended the connection.
#[derive(Debug)]
pub enum TransportFailure {
    Eof,
    Error(io::Error),
    Timeout,
}

impl fmt::Display for TransportFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Eof => f.write_str("Disconnected from the remote host"),
            Self::Error(err) => write!(f, "Network error: {err}"),
            Self::Timeout => f.write_str("Timeout"),
        }
    }
}
