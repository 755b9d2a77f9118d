//! Absolute URI decomposition into byte spans.
//!
//! ```text
//! https://user@example.com:8443/a/b?x=1#top
//! \___/   \__/ \_________/ \__/\__/ \_/ \_/
//! scheme  user    host     port path query fragment
//! ```
//!
//! Parsing never allocates: every component is an `(offset, len)` span into
//! the original text, so the caller keeps ownership of the string.

use thiserror::Error;

/// A component's position in the URI text.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Span {
    pub offset: usize,
    pub len: usize,
}

impl Span {
    fn between(start: usize, end: usize) -> Self {
        Self {
            offset: start,
            len: end - start,
        }
    }

    pub fn end(&self) -> usize {
        self.offset + self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// The component's text. `text` must be the string the span came from.
    pub fn slice<'a>(&self, text: &'a str) -> &'a str {
        &text[self.offset..self.end()]
    }
}

/// Component spans of one absolute URI.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct UriComponents {
    pub scheme: Span,
    pub userinfo: Option<Span>,
    /// Includes the brackets of an IPv6 literal.
    pub host: Span,
    /// Explicitly written port, if any.
    pub port: Option<u16>,
    pub port_span: Option<Span>,
    pub path: Option<Span>,
    /// Text after `?`, excluding the `?` itself. Present-but-empty when the
    /// URI ends in a bare `?`.
    pub query: Option<Span>,
    pub fragment: Option<Span>,
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum UriError {
    #[error("missing scheme")]
    MissingScheme,
    #[error("invalid scheme")]
    InvalidScheme,
    #[error("missing host")]
    MissingHost,
    #[error("invalid port")]
    InvalidPort,
    #[error("invalid character at offset {offset}")]
    InvalidCharacter { offset: usize },
}

const SCHEME_SEPARATOR: &str = "://";

/// Decompose `uri` into component spans.
pub fn parse(uri: &str) -> Result<UriComponents, UriError> {
    if let Some(offset) = uri.bytes().position(|b| !b.is_ascii_graphic()) {
        return Err(UriError::InvalidCharacter { offset });
    }

    let scheme_end = uri.find(SCHEME_SEPARATOR).ok_or(UriError::MissingScheme)?;
    if scheme_end == 0 {
        return Err(UriError::MissingScheme);
    }
    let scheme = Span::between(0, scheme_end);
    if !valid_scheme(scheme.slice(uri)) {
        return Err(UriError::InvalidScheme);
    }

    let authority_start = scheme_end + SCHEME_SEPARATOR.len();
    let authority_end = uri[authority_start..]
        .find(['/', '?', '#'])
        .map_or(uri.len(), |i| authority_start + i);

    let mut host_start = authority_start;
    let mut userinfo = None;
    if let Some(at) = uri[authority_start..authority_end].rfind('@') {
        userinfo = Some(Span::between(authority_start, authority_start + at));
        host_start = authority_start + at + 1;
    }

    let (host, port_start) = split_host(uri, host_start, authority_end)?;
    let (port, port_span) = match port_start {
        Some(start) => {
            let span = Span::between(start, authority_end);
            (Some(parse_port(span.slice(uri))?), Some(span))
        }
        None => (None, None),
    };

    let rest = &uri[authority_end..];
    let fragment_at = rest.find('#').map(|i| authority_end + i);
    let before_fragment = fragment_at.unwrap_or(uri.len());
    let query_at = uri[authority_end..before_fragment]
        .find('?')
        .map(|i| authority_end + i);
    let path_end = query_at.unwrap_or(before_fragment);

    let path = (path_end > authority_end).then(|| Span::between(authority_end, path_end));
    let query = query_at.map(|q| Span::between(q + 1, before_fragment));
    let fragment = fragment_at.map(|f| Span::between(f + 1, uri.len()));

    Ok(UriComponents {
        scheme,
        userinfo,
        host,
        port,
        port_span,
        path,
        query,
        fragment,
    })
}

fn valid_scheme(scheme: &str) -> bool {
    let mut bytes = scheme.bytes();
    bytes.next().is_some_and(|b| b.is_ascii_alphabetic())
        && bytes.all(|b| b.is_ascii_alphanumeric() || matches!(b, b'+' | b'-' | b'.'))
}

/// Split `host[:port]` into the host span and the offset where the port
/// digits start.
fn split_host(uri: &str, start: usize, end: usize) -> Result<(Span, Option<usize>), UriError> {
    let text = &uri[start..end];
    if text.starts_with('[') {
        let close = text
            .find(']')
            .ok_or(UriError::InvalidCharacter { offset: start })?;
        let host = Span::between(start, start + close + 1);
        if host.len == 2 {
            return Err(UriError::MissingHost);
        }
        for (i, b) in text[1..close].bytes().enumerate() {
            if !(b.is_ascii_hexdigit() || matches!(b, b':' | b'.')) {
                return Err(UriError::InvalidCharacter { offset: start + 1 + i });
            }
        }
        return match &text[close + 1..] {
            "" => Ok((host, None)),
            after if after.starts_with(':') => Ok((host, Some(host.end() + 1))),
            _ => Err(UriError::InvalidCharacter {
                offset: host.end(),
            }),
        };
    }

    let host_end = text.find(':').map_or(end, |i| start + i);
    let host = Span::between(start, host_end);
    if host.is_empty() {
        return Err(UriError::MissingHost);
    }
    for (i, b) in host.slice(uri).bytes().enumerate() {
        if !(b.is_ascii_alphanumeric() || b"-._~!$&'()*+,;=%".contains(&b)) {
            return Err(UriError::InvalidCharacter { offset: start + i });
        }
    }
    Ok((host, (host_end < end).then_some(host_end + 1)))
}

fn parse_port(digits: &str) -> Result<u16, UriError> {
    if digits.is_empty() || digits.len() > 5 || !digits.bytes().all(|b| b.is_ascii_digit()) {
        return Err(UriError::InvalidPort);
    }
    digits.parse().map_err(|_| UriError::InvalidPort)
}
