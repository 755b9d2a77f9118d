use std::sync::Arc;
use std::time::Duration;

use crate::error::FetchError;

/// Configuration for a fetch.
#[derive(Clone, Debug)]
pub struct Config {
    /// Port used when the URI does not name one.
    pub default_port: u16,
    /// ALPN protocol identifier advertised and required from the server.
    pub alpn_protocol: Vec<u8>,
    /// SETTINGS_MAX_CONCURRENT_STREAMS sent in the initial SETTINGS frame.
    pub max_concurrent_streams: u32,
    /// Deadline for each TCP connect attempt, and for DNS resolution.
    pub connect_timeout: Duration,
    /// Maximum time to wait for socket readiness once connected.
    /// `None` waits indefinitely.
    pub io_timeout: Option<Duration>,
    /// Enable TCP_NODELAY once the TLS handshake completes.
    pub tcp_nodelay: bool,
    /// Size of the ciphertext read buffer.
    pub read_chunk_size: usize,
    /// Pre-built rustls ClientConfig. Its ALPN list is replaced with
    /// `alpn_protocol`. When unset, a config trusting the webpki root
    /// certificates is built.
    pub tls_client: Option<Arc<rustls::ClientConfig>>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            default_port: 443,
            alpn_protocol: b"h2".to_vec(),
            max_concurrent_streams: 100,
            connect_timeout: Duration::from_secs(10),
            io_timeout: Some(Duration::from_secs(30)),
            tcp_nodelay: true,
            read_chunk_size: 16 * 1024,
            tls_client: None,
        }
    }
}

impl Config {
    /// Validate configuration values. Returns an error if any value is out of range.
    pub fn validate(&self) -> Result<(), FetchError> {
        if self.default_port == 0 {
            return Err(FetchError::InvalidConfig("default_port must be > 0".into()));
        }
        if self.alpn_protocol.is_empty() || self.alpn_protocol.len() > 255 {
            return Err(FetchError::InvalidConfig(
                "alpn_protocol must be 1..=255 bytes".into(),
            ));
        }
        if self.max_concurrent_streams == 0 {
            return Err(FetchError::InvalidConfig(
                "max_concurrent_streams must be > 0".into(),
            ));
        }
        if self.connect_timeout.is_zero() {
            return Err(FetchError::InvalidConfig(
                "connect_timeout must be > 0".into(),
            ));
        }
        if self.io_timeout.is_some_and(|t| t.is_zero()) {
            return Err(FetchError::InvalidConfig("io_timeout must be > 0".into()));
        }
        if self.read_chunk_size == 0 {
            return Err(FetchError::InvalidConfig(
                "read_chunk_size must be > 0".into(),
            ));
        }
        Ok(())
    }

    /// The rustls client config to use for the handshake, with ALPN set to
    /// [`alpn_protocol`](Self::alpn_protocol).
    pub fn tls_client_config(&self) -> Result<Arc<rustls::ClientConfig>, FetchError> {
        let mut tls = match &self.tls_client {
            Some(tls) => rustls::ClientConfig::clone(tls),
            None => webpki_client_config()?,
        };
        tls.alpn_protocols = vec![self.alpn_protocol.clone()];
        Ok(Arc::new(tls))
    }
}

fn webpki_client_config() -> Result<rustls::ClientConfig, FetchError> {
    let mut roots = rustls::RootCertStore::empty();
    roots.extend(webpki_roots::TLS_SERVER_ROOTS.iter().cloned());
    let provider = Arc::new(rustls::crypto::ring::default_provider());
    let tls = rustls::ClientConfig::builder_with_provider(provider)
        .with_safe_default_protocol_versions()?
        .with_root_certificates(roots)
        .with_no_client_auth();
    Ok(tls)
}

/// Builder for [`Config`].
///
/// ```rust,ignore
/// let config = h2get::ConfigBuilder::new()
///     .io_timeout(Some(Duration::from_secs(5)))
///     .max_concurrent_streams(10)
///     .build()?;
/// ```
#[derive(Default)]
pub struct ConfigBuilder {
    config: Config,
}

impl ConfigBuilder {
    /// Create a new builder with default config values.
    pub fn new() -> Self {
        Self::default()
    }

    pub fn default_port(mut self, port: u16) -> Self {
        self.config.default_port = port;
        self
    }

    pub fn alpn_protocol(mut self, id: impl Into<Vec<u8>>) -> Self {
        self.config.alpn_protocol = id.into();
        self
    }

    pub fn max_concurrent_streams(mut self, n: u32) -> Self {
        self.config.max_concurrent_streams = n;
        self
    }

    pub fn connect_timeout(mut self, timeout: Duration) -> Self {
        self.config.connect_timeout = timeout;
        self
    }

    pub fn io_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.config.io_timeout = timeout;
        self
    }

    pub fn tcp_nodelay(mut self, enable: bool) -> Self {
        self.config.tcp_nodelay = enable;
        self
    }

    pub fn read_chunk_size(mut self, n: usize) -> Self {
        self.config.read_chunk_size = n;
        self
    }

    /// Use a pre-built rustls client config (custom roots, client auth, ...).
    pub fn tls_client(mut self, tls: Arc<rustls::ClientConfig>) -> Self {
        self.config.tls_client = Some(tls);
        self
    }

    /// Validate and build the final [`Config`].
    pub fn build(self) -> Result<Config, FetchError> {
        self.config.validate()?;
        Ok(self.config)
    }
}
