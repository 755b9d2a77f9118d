//! Single-resource fetch driver.

use protocol_h2::{ErrorCode, RequestTag};
use tracing::debug;

use crate::config::Config;
use crate::connection::{ConnectionContext, Release};
use crate::context::{ConnState, StreamContext};
use crate::error::FetchError;
use crate::output::Output;

/// How a completed fetch ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Outcome {
    /// Stream the request was sent on.
    pub stream_id: Option<u32>,
    /// Error code the stream closed with. `NO_ERROR` for a complete response.
    pub error_code: Option<ErrorCode>,
    /// Resources released during teardown, in order.
    pub released: Vec<Release>,
}

/// Fetches one `https` resource over HTTP/2.
#[derive(Debug, Clone, Default)]
pub struct Client {
    config: Config,
}

impl Client {
    pub fn new(config: Config) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    /// Fetch `uri`, writing the response body and diagnostics to `output`.
    ///
    /// Returns once the connection reached a terminal state: `Ok` after an
    /// orderly close (even if the server reset the stream), `Err` otherwise.
    pub async fn fetch(&self, uri: &str, output: Output) -> Result<Outcome, FetchError> {
        self.config.validate()?;
        let stream = StreamContext::new(uri, RequestTag(1), self.config.default_port)?;
        if !stream.scheme().eq_ignore_ascii_case("https") {
            return Err(FetchError::UnsupportedScheme(stream.scheme().to_owned()));
        }
        debug!(uri, authority = stream.authority(), path = stream.path(), "fetch");

        let mut conn = ConnectionContext::new(self.config.clone(), stream, output);
        let event = conn.initiate_connection().await?;
        conn.dispatch(event)?;
        conn.run().await?;

        if conn.state() != ConnState::Closed {
            return Err(FetchError::InvalidTransition {
                from: conn.state(),
                to: ConnState::Closed,
            });
        }
        let closed = conn.stream_closed();
        Ok(Outcome {
            stream_id: closed.map(|c| c.stream_id),
            error_code: closed.map(|c| c.error_code),
            released: conn.released().to_vec(),
        })
    }
}
