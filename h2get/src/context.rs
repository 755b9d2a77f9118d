//! Per-request and per-connection lifecycle state.

use std::fmt;

use protocol_h2::{HeaderField, RequestTag};
use tracing::warn;

use crate::error::FetchError;
use crate::uri::{self, UriComponents};

/// Streams a connection carries. The client fetches one resource per
/// connection; [`ConnectionContext`](crate::ConnectionContext) owns exactly
/// this many [`StreamContext`]s.
pub const MAX_STREAMS_PER_CONNECTION: usize = 1;

/// Lifecycle of the single connection.
///
/// ```text
/// Idle -> Resolving -> TlsHandshaking -> ProtocolActive -> Draining -> Closed
///            \______________________________/
///              (Resolving -> ProtocolActive)
///
/// any non-terminal state -> Failed
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnState {
    Idle,
    Resolving,
    TlsHandshaking,
    ProtocolActive,
    Draining,
    Closed,
    Failed,
}

impl ConnState {
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Closed | Self::Failed)
    }

    pub fn can_transition_to(self, next: ConnState) -> bool {
        use ConnState::*;
        match (self, next) {
            (Idle, Resolving)
            | (Resolving, TlsHandshaking)
            | (Resolving | TlsHandshaking, ProtocolActive)
            | (ProtocolActive, Draining)
            | (Draining, Closed) => true,
            (from, Failed) => !from.is_terminal(),
            _ => false,
        }
    }
}

impl fmt::Display for ConnState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self, f)
    }
}

/// State of the one request a connection carries.
#[derive(Debug)]
pub struct StreamContext {
    uri: String,
    components: UriComponents,
    authority: String,
    path: String,
    default_port: u16,
    tag: RequestTag,
    stream_id: Option<u32>,
}

impl StreamContext {
    /// Parse `uri` and derive the request's `:authority` and `:path`.
    /// `default_port` is the port connected to when the URI names none.
    pub fn new(
        uri: impl Into<String>,
        tag: RequestTag,
        default_port: u16,
    ) -> Result<Self, FetchError> {
        let uri = uri.into();
        let components = uri::parse(&uri)?;
        Ok(Self::from_components(uri, components, tag, default_port))
    }

    pub fn from_components(
        uri: String,
        components: UriComponents,
        tag: RequestTag,
        default_port: u16,
    ) -> Self {
        let host = components.host.slice(&uri);
        let authority = match components.port {
            Some(port) => format!("{host}:{port}"),
            None => host.to_owned(),
        };

        let mut path = components
            .path
            .map_or("/", |span| span.slice(&uri))
            .to_owned();
        if let Some(query) = components.query {
            path.push('?');
            path.push_str(query.slice(&uri));
        }

        Self {
            uri,
            components,
            authority,
            path,
            default_port,
            tag,
            stream_id: None,
        }
    }

    pub fn uri(&self) -> &str {
        &self.uri
    }

    pub fn components(&self) -> &UriComponents {
        &self.components
    }

    pub fn scheme(&self) -> &str {
        self.components.scheme.slice(&self.uri)
    }

    /// Host as written, brackets included for IPv6 literals.
    pub fn host(&self) -> &str {
        self.components.host.slice(&self.uri)
    }

    /// Host suitable for DNS and SNI: IPv6 brackets removed.
    pub fn server_name(&self) -> &str {
        let host = self.host();
        host.strip_prefix('[')
            .and_then(|h| h.strip_suffix(']'))
            .unwrap_or(host)
    }

    /// Port to connect to.
    pub fn port(&self) -> u16 {
        self.components.port.unwrap_or(self.default_port)
    }

    pub fn authority(&self) -> &str {
        &self.authority
    }

    pub fn path(&self) -> &str {
        &self.path
    }

    pub fn tag(&self) -> RequestTag {
        self.tag
    }

    pub fn stream_id(&self) -> Option<u32> {
        self.stream_id
    }

    /// Record the stream id the engine assigned to the request. Only the
    /// first assignment sticks; returns whether this call set it.
    pub fn assign_stream_id(&mut self, stream_id: u32) -> bool {
        match self.stream_id {
            None => {
                self.stream_id = Some(stream_id);
                true
            }
            Some(current) => {
                warn!(current, ignored = stream_id, "stream id already assigned");
                false
            }
        }
    }

    /// Header set of the GET request.
    pub fn request_headers(&self) -> Vec<HeaderField> {
        vec![
            HeaderField::new(":method", "GET"),
            HeaderField::new(":scheme", self.scheme()),
            HeaderField::new(":authority", &self.authority),
            HeaderField::new(":path", &self.path),
        ]
    }
}
