//! Connection-scoped state and the event dispatcher.

use protocol_h2::{ErrorCode, Session};
use rustls::ClientConnection;
use rustls::pki_types::ServerName;
use tracing::{debug, info, warn};

use crate::config::Config;
use crate::context::{ConnState, StreamContext};
use crate::error::FetchError;
use crate::output::Output;
use crate::protocol_events::{ProtocolEventHandlers, StreamClosed};
use crate::transport::{Resolver, Transport, TransportEvent};

/// A resource released during teardown, in the order it happened.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Release {
    /// TLS close_notify queued and flushed once.
    TlsShutdown,
    Transport,
    Resolver,
    Session,
    Stream,
}

/// Everything one connection owns: the session, the transport, the resolver,
/// the single request stream and the output streams.
///
/// Created in [`ConnState::Idle`]. Every transport event goes through
/// [`dispatch`](Self::dispatch); resources are released exactly once, by
/// [`teardown`](Self::teardown) or on drop.
pub struct ConnectionContext {
    pub(crate) config: Config,
    pub(crate) state: ConnState,
    pub(crate) session: Option<Session>,
    pub(crate) transport: Option<Transport>,
    pub(crate) resolver: Option<Resolver>,
    pub(crate) stream: Option<StreamContext>,
    pub(crate) output: Output,
    pub(crate) closed: Option<StreamClosed>,
    released: Vec<Release>,
    torn_down: bool,
}

impl ConnectionContext {
    pub fn new(config: Config, stream: StreamContext, output: Output) -> Self {
        Self {
            config,
            state: ConnState::Idle,
            session: None,
            transport: None,
            resolver: None,
            stream: Some(stream),
            output,
            closed: None,
            released: Vec::new(),
            torn_down: false,
        }
    }

    pub fn state(&self) -> ConnState {
        self.state
    }

    /// Stream id and error code of the request stream, once it closed.
    pub fn stream_closed(&self) -> Option<StreamClosed> {
        self.closed
    }

    /// Resources released so far, in release order.
    pub fn released(&self) -> &[Release] {
        &self.released
    }

    /// Resolve the host, then connect. Returns the event describing the
    /// outcome; the caller feeds it to [`dispatch`](Self::dispatch).
    pub async fn initiate_connection(&mut self) -> Result<TransportEvent, FetchError> {
        match self.start().await {
            Ok(event) => Ok(event),
            Err(err) => {
                self.fail(&err);
                Err(err)
            }
        }
    }

    async fn start(&mut self) -> Result<TransportEvent, FetchError> {
        self.transition(ConnState::Resolving)?;

        let Some(stream) = &self.stream else {
            return Err(FetchError::InvalidTransition {
                from: self.state,
                to: ConnState::TlsHandshaking,
            });
        };
        let host = stream.server_name().to_owned();
        let port = stream.port();

        let server_name = ServerName::try_from(host.clone())
            .map_err(|_| FetchError::InvalidServerName(host.clone()))?;
        let tls = ClientConnection::new(self.config.tls_client_config()?, server_name)?;

        let resolver = self
            .resolver
            .insert(Resolver::new(host, port, self.config.connect_timeout));
        let addrs = match resolver.resolve().await {
            Ok(addrs) => addrs,
            Err(err) => return Ok(TransportEvent::ConnectFailed(err)),
        };

        match Transport::connect(&addrs, tls, &self.config).await {
            Ok(transport) => {
                self.transport = Some(transport);
                Ok(TransportEvent::TcpEstablished)
            }
            Err(err) => Ok(TransportEvent::ConnectFailed(err)),
        }
    }

    /// Handle one transport event.
    ///
    /// Events arriving after the connection reached a terminal state are
    /// ignored. On error the failure is reported on the diagnostic stream,
    /// the connection moves to [`ConnState::Failed`] and is torn down.
    pub fn dispatch(&mut self, event: TransportEvent) -> Result<(), FetchError> {
        if self.state.is_terminal() {
            debug!(state = %self.state, ?event, "event after close ignored");
            return Ok(());
        }
        debug!(state = %self.state, ?event, "dispatch");

        let result = match event {
            TransportEvent::TcpEstablished => self.transition(ConnState::TlsHandshaking),
            TransportEvent::Connected => self.on_connected(),
            TransportEvent::ConnectFailed(err) => Err(FetchError::ConnectFailure(err)),
            TransportEvent::ReadReady => self.on_read_ready(),
            TransportEvent::WriteComplete => self.on_write_complete(),
            TransportEvent::Eof => self.on_eof(),
            TransportEvent::Error(err) => self.on_network_error(err),
            TransportEvent::Timeout => self.on_timeout(),
            TransportEvent::Tls(err) => Err(FetchError::Tls(err)),
        };

        if let Err(err) = result {
            self.fail(&err);
            return Err(err);
        }
        Ok(())
    }

    /// Drive transport events into [`dispatch`](Self::dispatch) until the
    /// connection reaches a terminal state.
    pub async fn run(&mut self) -> Result<(), FetchError> {
        while !self.state.is_terminal() {
            let Some(transport) = self.transport.as_mut() else {
                break;
            };
            let event = transport.next_event().await;
            self.dispatch(event)?;
        }
        Ok(())
    }

    pub(crate) fn transition(&mut self, next: ConnState) -> Result<(), FetchError> {
        if !self.state.can_transition_to(next) {
            return Err(FetchError::InvalidTransition {
                from: self.state,
                to: next,
            });
        }
        debug!(from = %self.state, to = %next, "state");
        self.state = next;
        Ok(())
    }

    /// Hand queued session frames to the transport.
    pub(crate) fn flush_session(&mut self) -> Result<(), FetchError> {
        let (Some(session), Some(transport), Some(stream)) =
            (&mut self.session, &mut self.transport, &mut self.stream)
        else {
            return Ok(());
        };
        let (_, outbound) = transport.io_buffers();
        let mut handlers = ProtocolEventHandlers::new(outbound, stream, &mut self.output);
        session.send(&mut handlers)?;
        Ok(())
    }

    /// Start draining once the request stream closed: queue GOAWAY and let
    /// the write path finish the connection.
    pub(crate) fn begin_drain(&mut self, closed: StreamClosed) -> Result<(), FetchError> {
        if self.state != ConnState::ProtocolActive {
            return Ok(());
        }
        info!(
            stream_id = closed.stream_id,
            error_code = %closed.error_code,
            "request finished, draining"
        );
        self.closed = Some(closed);
        self.transition(ConnState::Draining)?;
        if let Some(session) = &mut self.session {
            session.submit_goaway(ErrorCode::NO_ERROR)?;
        }
        self.flush_session()
    }

    fn fail(&mut self, err: &FetchError) {
        match err {
            FetchError::Transport(failure) => self.output.status(failure),
            FetchError::Tls(tls) => self.output.status(format_args!("Network error: {tls}")),
            FetchError::ProtocolDecode(h2) => self.output.status(format_args!("Fatal error: {h2}")),
            FetchError::InvalidTransition { .. } => {
                self.output.status(format_args!("Fatal error: {err}"))
            }
            // Reported by the caller.
            _ => {}
        }
        self.output.flush();
        warn!(error = %err, state = %self.state, "connection failed");
        if self.state.can_transition_to(ConnState::Failed) {
            self.state = ConnState::Failed;
        }
        self.teardown();
    }

    /// Release every owned resource in a fixed order: TLS shutdown (only if
    /// the handshake completed), transport, resolver, session, stream.
    /// Returns the release order on the first call and `None` afterwards.
    pub fn teardown(&mut self) -> Option<Vec<Release>> {
        if self.torn_down {
            return None;
        }
        self.torn_down = true;

        if let Some(transport) = &mut self.transport
            && transport.handshake_complete()
        {
            transport.shutdown_tls();
            self.released.push(Release::TlsShutdown);
        }
        if self.transport.take().is_some() {
            self.released.push(Release::Transport);
        }
        if self.resolver.take().is_some() {
            self.released.push(Release::Resolver);
        }
        if self.session.take().is_some() {
            self.released.push(Release::Session);
        }
        if self.stream.take().is_some() {
            self.released.push(Release::Stream);
        }
        self.output.flush();
        debug!(released = ?self.released, "connection torn down");
        Some(self.released.clone())
    }
}

impl Drop for ConnectionContext {
    fn drop(&mut self) {
        self.teardown();
    }
}

#[cfg(test)]
mod tests {
    use protocol_h2::RequestTag;

    use super::*;
    use crate::output::Capture;

    fn context() -> (ConnectionContext, Capture) {
        let diag = Capture::new();
        let stream = StreamContext::new("https://localhost/", RequestTag(1), 443).unwrap();
        let ctx = ConnectionContext::new(
            Config::default(),
            stream,
            Output::new(Capture::new(), diag.clone()),
        );
        (ctx, diag)
    }

    #[test]
    fn teardown_runs_once() {
        let (mut ctx, _) = context();
        assert_eq!(ctx.teardown(), Some(vec![Release::Stream]));
        assert_eq!(ctx.teardown(), None);
        assert_eq!(ctx.released(), &[Release::Stream]);
    }

    #[test]
    fn out_of_order_event_fails_the_connection() {
        let (mut ctx, diag) = context();
        let err = ctx.dispatch(TransportEvent::TcpEstablished).unwrap_err();
        assert!(matches!(
            err,
            FetchError::InvalidTransition {
                from: ConnState::Idle,
                to: ConnState::TlsHandshaking
            }
        ));
        assert_eq!(ctx.state(), ConnState::Failed);
        assert!(diag.text().starts_with("Fatal error"));
    }

    #[test]
    fn events_after_failure_are_ignored() {
        let (mut ctx, diag) = context();
        ctx.dispatch(TransportEvent::Timeout).unwrap_err();
        assert_eq!(diag.text(), "Timeout\n");
        ctx.dispatch(TransportEvent::Eof).unwrap();
        ctx.dispatch(TransportEvent::Timeout).unwrap();
        assert_eq!(diag.text(), "Timeout\n");
        assert_eq!(ctx.state(), ConnState::Failed);
    }

    #[test]
    fn transport_failures_are_reported_verbatim() {
        let (mut ctx, diag) = context();
        ctx.dispatch(TransportEvent::Eof).unwrap_err();
        assert_eq!(diag.text(), "Disconnected from the remote host\n");

        let (mut ctx, diag) = context();
        let err = ctx
            .dispatch(TransportEvent::Error(std::io::ErrorKind::ConnectionReset.into()))
            .unwrap_err();
        assert!(!err.is_setup_failure());
        assert!(diag.text().starts_with("Network error"));
    }

    #[test]
    fn connect_failure_is_left_to_the_caller() {
        let (mut ctx, diag) = context();
        let err = ctx
            .dispatch(TransportEvent::ConnectFailed(
                std::io::ErrorKind::ConnectionRefused.into(),
            ))
            .unwrap_err();
        assert!(err.is_setup_failure());
        assert_eq!(diag.text(), "");
        assert_eq!(ctx.state(), ConnState::Failed);
    }
}
