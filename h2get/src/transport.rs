//! TCP + TLS transport with buffered, non-blocking writes.
//!
//! The rustls `ClientConnection` is driven by hand (`read_tls`,
//! `process_new_packets`, `write_tls`) on top of tokio socket readiness.
//! [`Transport::next_event`] is the only place the client ever waits.

use std::io::{self, Read as _, Write as _};
use std::net::SocketAddr;
use std::time::Duration;

use bytes::{Buf, BufMut, BytesMut};
use rustls::ClientConnection;
use tokio::io::{Interest, Ready};
use tokio::net::{TcpStream, lookup_host};
use tokio::time::timeout;
use tracing::{debug, trace};

use crate::config::Config;

/// Something the transport observed. Delivered to
/// [`ConnectionContext::dispatch`](crate::ConnectionContext::dispatch) in the
/// order it happened.
#[derive(Debug)]
pub enum TransportEvent {
    /// TCP connection established; TLS handshake starting.
    TcpEstablished,
    /// TLS handshake finished.
    Connected,
    /// DNS resolution or every TCP connect attempt failed.
    ConnectFailed(io::Error),
    /// New plaintext is available in [`Transport::input`].
    ReadReady,
    /// All buffered output has been written to the socket.
    WriteComplete,
    /// The peer closed the connection.
    Eof,
    Error(io::Error),
    /// The TLS layer rejected the peer's records.
    Tls(rustls::Error),
    /// No socket readiness within the configured I/O timeout.
    Timeout,
}

/// DNS resolution for one host.
#[derive(Debug)]
pub struct Resolver {
    host: String,
    port: u16,
    timeout: Duration,
}

impl Resolver {
    pub fn new(host: impl Into<String>, port: u16, timeout: Duration) -> Self {
        Self {
            host: host.into(),
            port,
            timeout,
        }
    }

    pub async fn resolve(&self) -> io::Result<Vec<SocketAddr>> {
        let lookup = lookup_host((self.host.as_str(), self.port));
        let addrs: Vec<SocketAddr> = timeout(self.timeout, lookup)
            .await
            .map_err(|_| io::Error::new(io::ErrorKind::TimedOut, "DNS resolution timed out"))??
            .collect();
        if addrs.is_empty() {
            return Err(io::Error::new(
                io::ErrorKind::NotFound,
                format!("{} did not resolve to any address", self.host),
            ));
        }
        debug!(host = %self.host, ?addrs, "resolved");
        Ok(addrs)
    }
}

/// An encrypted connection to the server.
pub struct Transport {
    stream: TcpStream,
    tls: ClientConnection,
    /// Decrypted bytes not yet consumed.
    input: BytesMut,
    /// Plaintext waiting to be encrypted.
    output: BytesMut,
    /// Encrypted records waiting for the socket.
    cipher_out: BytesMut,
    scratch: Vec<u8>,
    io_timeout: Option<Duration>,
    connected_reported: bool,
    read_pending: bool,
    write_done: bool,
    peer_closed: bool,
    close_notify_sent: bool,
}

impl Transport {
    /// Connect to the first reachable address.
    pub async fn connect(
        addrs: &[SocketAddr],
        tls: ClientConnection,
        config: &Config,
    ) -> io::Result<Self> {
        let mut last_err = None;
        for addr in addrs {
            match timeout(config.connect_timeout, TcpStream::connect(addr)).await {
                Ok(Ok(stream)) => {
                    debug!(%addr, "tcp connected");
                    return Ok(Self::new(stream, tls, config));
                }
                Ok(Err(err)) => {
                    debug!(%addr, error = %err, "connect failed");
                    last_err = Some(err);
                }
                Err(_) => {
                    debug!(%addr, "connect timed out");
                    last_err = Some(io::Error::new(
                        io::ErrorKind::TimedOut,
                        "connect timed out",
                    ));
                }
            }
        }
        Err(last_err
            .unwrap_or_else(|| io::Error::new(io::ErrorKind::NotFound, "no address to connect to")))
    }

    fn new(stream: TcpStream, tls: ClientConnection, config: &Config) -> Self {
        Self {
            stream,
            tls,
            input: BytesMut::new(),
            output: BytesMut::new(),
            cipher_out: BytesMut::new(),
            scratch: vec![0; config.read_chunk_size],
            io_timeout: config.io_timeout,
            connected_reported: false,
            read_pending: false,
            write_done: false,
            peer_closed: false,
            close_notify_sent: false,
        }
    }

    /// Queue plaintext for sending. Never blocks; the bytes go out from
    /// [`next_event`](Self::next_event).
    pub fn write(&mut self, data: &[u8]) {
        self.output.extend_from_slice(data);
    }

    /// Decrypted input not yet drained.
    pub fn input(&self) -> &[u8] {
        &self.input
    }

    pub fn drain_input(&mut self, n: usize) {
        self.input.advance(n.min(self.input.len()));
    }

    /// Read view of the input together with the output buffer, so the input
    /// can be fed to a consumer that queues output as it goes.
    pub fn io_buffers(&mut self) -> (&[u8], &mut BytesMut) {
        (&self.input, &mut self.output)
    }

    /// Bytes accepted by [`write`](Self::write) (or produced by TLS) that
    /// have not reached the socket yet.
    pub fn pending_output_len(&self) -> usize {
        self.output.len() + self.cipher_out.len()
    }

    pub fn alpn_protocol(&self) -> Option<&[u8]> {
        self.tls.alpn_protocol()
    }

    pub fn handshake_complete(&self) -> bool {
        !self.tls.is_handshaking()
    }

    pub fn set_nodelay(&self, enable: bool) -> io::Result<()> {
        self.stream.set_nodelay(enable)
    }

    /// Whether [`shutdown_tls`](Self::shutdown_tls) already queued the alert.
    pub fn close_notify_sent(&self) -> bool {
        self.close_notify_sent
    }

    /// Queue a TLS close_notify and make one non-blocking attempt to send it
    /// along with anything else still buffered. Only the first call queues
    /// the alert.
    pub fn shutdown_tls(&mut self) {
        if self.close_notify_sent {
            return;
        }
        self.close_notify_sent = true;
        self.tls.send_close_notify();
        if self.seal().is_ok() && !self.cipher_out.is_empty() {
            match self.stream.try_write(&self.cipher_out) {
                Ok(n) => self.cipher_out.advance(n),
                Err(err) => trace!(error = %err, "close_notify not sent"),
            }
        }
    }

    /// Wait for the next transport event.
    pub async fn next_event(&mut self) -> TransportEvent {
        loop {
            if let Err(err) = self.seal() {
                return TransportEvent::Error(err);
            }

            if !self.connected_reported && self.handshake_complete() {
                self.connected_reported = true;
                return TransportEvent::Connected;
            }
            if self.read_pending {
                self.read_pending = false;
                return TransportEvent::ReadReady;
            }
            if self.write_done {
                self.write_done = false;
                return TransportEvent::WriteComplete;
            }
            if self.peer_closed {
                return TransportEvent::Eof;
            }

            let ready = match self.wait_ready().await {
                Ok(Some(ready)) => ready,
                Ok(None) => return TransportEvent::Timeout,
                Err(err) => return TransportEvent::Error(err),
            };

            if ready.is_writable() && !self.cipher_out.is_empty() {
                match self.stream.try_write(&self.cipher_out) {
                    Ok(n) => {
                        trace!(bytes = n, "wrote");
                        self.cipher_out.advance(n);
                        if self.cipher_out.is_empty() && self.connected_reported {
                            self.write_done = true;
                        }
                    }
                    Err(err) if err.kind() == io::ErrorKind::WouldBlock => {}
                    Err(err) => return TransportEvent::Error(err),
                }
            }

            if ready.is_readable() || ready.is_read_closed() {
                match self.stream.try_read(&mut self.scratch) {
                    Ok(0) => {
                        debug!("peer closed the TCP connection");
                        self.peer_closed = true;
                    }
                    Ok(n) => {
                        trace!(bytes = n, "read");
                        match decrypt(&mut self.tls, &mut self.input, &self.scratch[..n]) {
                            Ok(progress) => {
                                self.read_pending |= progress.plaintext > 0;
                                self.peer_closed |= progress.peer_closed;
                            }
                            Err(err) => {
                                // Let the alert reach the peer if it can.
                                self.shutdown_tls();
                                return TransportEvent::Tls(err);
                            }
                        }
                    }
                    Err(err) if err.kind() == io::ErrorKind::WouldBlock => {}
                    Err(err) => return TransportEvent::Error(err),
                }
            }
        }
    }

    /// Encrypt queued plaintext (once the handshake allows it) and move
    /// every pending TLS record into `cipher_out`.
    fn seal(&mut self) -> io::Result<()> {
        if self.handshake_complete() {
            while !self.output.is_empty() {
                let n = self.tls.writer().write(&self.output)?;
                self.output.advance(n);
                self.flush_records()?;
                if n == 0 {
                    break;
                }
            }
        }
        self.flush_records()
    }

    fn flush_records(&mut self) -> io::Result<()> {
        let mut sink = (&mut self.cipher_out).writer();
        while self.tls.wants_write() {
            self.tls.write_tls(&mut sink)?;
        }
        Ok(())
    }

    async fn wait_ready(&self) -> io::Result<Option<Ready>> {
        let interest = if self.cipher_out.is_empty() {
            Interest::READABLE
        } else {
            Interest::READABLE | Interest::WRITABLE
        };
        match self.io_timeout {
            Some(limit) => match timeout(limit, self.stream.ready(interest)).await {
                Ok(ready) => ready.map(Some),
                Err(_) => Ok(None),
            },
            None => self.stream.ready(interest).await.map(Some),
        }
    }
}

struct Decrypted {
    plaintext: usize,
    peer_closed: bool,
}

/// Feed ciphertext into the TLS connection and append any plaintext it
/// yields to `input`.
fn decrypt(
    tls: &mut ClientConnection,
    input: &mut BytesMut,
    mut ciphertext: &[u8],
) -> Result<Decrypted, rustls::Error> {
    let mut progress = Decrypted {
        plaintext: 0,
        peer_closed: false,
    };
    while !ciphertext.is_empty() {
        match tls.read_tls(&mut ciphertext) {
            Ok(0) => break,
            Ok(_) => {}
            Err(err) => return Err(rustls::Error::General(err.to_string())),
        }
        let state = tls.process_new_packets()?;
        let available = state.plaintext_bytes_to_read();
        if available > 0 {
            let start = input.len();
            input.resize(start + available, 0);
            tls.reader()
                .read_exact(&mut input[start..])
                .map_err(|err| rustls::Error::General(err.to_string()))?;
            progress.plaintext += available;
        }
        progress.peer_closed |= state.peer_has_closed();
    }
    Ok(progress)
}

#[cfg(test)]
mod tests {
    use rustls::pki_types::ServerName;
    use tokio::io::AsyncReadExt;
    use tokio::net::TcpListener;

    use super::*;

    /// Plaintext warning-level close_notify alert records in `wire`.
    fn close_notify_records(wire: &[u8]) -> usize {
        wire.windows(7)
            .filter(|w| w[0] == 0x15 && w[1] == 0x03 && w[3..] == [0x00, 0x02, 0x01, 0x00])
            .count()
    }

    #[tokio::test]
    async fn close_notify_is_queued_once() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();

        let config = Config::default();
        let server_name = ServerName::try_from("localhost").unwrap();
        let tls = ClientConnection::new(config.tls_client_config().unwrap(), server_name).unwrap();
        let mut transport = Transport::connect(&[addr], tls, &config).await.unwrap();
        let (mut peer, _) = listener.accept().await.unwrap();

        assert!(!transport.close_notify_sent());
        transport.shutdown_tls();
        assert!(transport.close_notify_sent());
        transport.shutdown_tls();
        transport.shutdown_tls();
        drop(transport);

        let mut wire = Vec::new();
        peer.read_to_end(&mut wire).await.unwrap();
        assert_eq!(close_notify_records(&wire), 1);
    }

    #[test]
    fn alert_pattern_matches_close_notify_only() {
        let record = [0x15, 0x03, 0x03, 0x00, 0x02, 0x01, 0x00];
        let fatal = [0x15, 0x03, 0x03, 0x00, 0x02, 0x02, 0x28];
        assert_eq!(close_notify_records(&record), 1);
        assert_eq!(close_notify_records(&fatal), 0);
    }
}
