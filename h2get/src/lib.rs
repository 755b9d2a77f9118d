//! Fetch a single resource over HTTP/2 and TLS.
//!
//! `h2get` resolves the host, opens a TLS connection that must negotiate
//! `h2` through ALPN, sends one GET request and streams the response body to
//! the primary output. Status lines and header dumps go to the diagnostic
//! output. The connection is closed with GOAWAY as soon as the stream ends.
//!
//! # Architecture
//!
//! ```text
//!   Client::fetch
//!        |
//!   +----v--------------+   TransportEvent    +-------------+
//!   | ConnectionContext | <------------------ |  Transport  |  tokio TcpStream
//!   |   dispatch()      | ------------------> |  (rustls)   |  + ClientConnection
//!   +----+--------------+   write()           +-------------+
//!        |
//!   +----v--------------+
//!   | protocol_h2       |  ProtocolEventHandlers -> StreamContext, Output
//!   | Session           |
//!   +-------------------+
//! ```
//!
//! # Example
//!
//! ```rust,no_run
//! # async fn run() -> Result<(), h2get::FetchError> {
//! let client = h2get::Client::new(h2get::Config::default());
//! let outcome = client
//!     .fetch("https://nghttp2.org/", h2get::Output::stdio())
//!     .await?;
//! println!("stream {:?} closed", outcome.stream_id);
//! # Ok(())
//! # }
//! ```

pub mod client;
pub mod config;
pub mod connection;
pub mod context;
pub mod error;
pub mod output;
pub mod protocol_events;
pub mod transport;
mod transport_events;
pub mod uri;

pub use client::{Client, Outcome};
pub use config::{Config, ConfigBuilder};
pub use connection::{ConnectionContext, Release};
pub use context::{ConnState, MAX_STREAMS_PER_CONNECTION, StreamContext};
pub use error::{FetchError, TransportFailure};
pub use output::{Capture, Output};
pub use protocol_events::{ProtocolEventHandlers, StreamClosed};
pub use transport::{Resolver, Transport, TransportEvent};
pub use uri::{Span, UriComponents, UriError};
