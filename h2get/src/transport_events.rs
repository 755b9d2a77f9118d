//! Transport event handlers of [`ConnectionContext`].

use protocol_h2::{CLIENT_PREFACE, Session, Setting};
use tracing::{debug, warn};

use crate::connection::ConnectionContext;
use crate::context::ConnState;
use crate::error::{FetchError, TransportFailure};
use crate::protocol_events::ProtocolEventHandlers;

impl ConnectionContext {
    /// TLS handshake finished: verify ALPN, then send the connection preface,
    /// initial SETTINGS and the request.
    pub(crate) fn on_connected(&mut self) -> Result<(), FetchError> {
        self.output.status("Connected");

        let (Some(transport), Some(stream)) = (&mut self.transport, &self.stream) else {
            return Err(FetchError::InvalidTransition {
                from: self.state,
                to: ConnState::ProtocolActive,
            });
        };

        let selected = transport.alpn_protocol();
        if selected != Some(self.config.alpn_protocol.as_slice()) {
            let selected = selected.map_or_else(
                || "none".to_owned(),
                |p| String::from_utf8_lossy(p).into_owned(),
            );
            return Err(FetchError::ProtocolNegotiation { selected });
        }

        if self.config.tcp_nodelay
            && let Err(err) = transport.set_nodelay(true)
        {
            warn!(error = %err, "failed to set TCP_NODELAY");
        }

        transport.write(CLIENT_PREFACE);
        let mut session = Session::client();
        session.submit_settings(&[Setting::max_concurrent_streams(
            self.config.max_concurrent_streams,
        )])?;

        let headers = stream.request_headers();
        self.output.headers("Request headers:", &headers);
        session.submit_request(headers, stream.tag())?;
        self.session = Some(session);

        self.flush_session()?;
        self.output.flush();
        self.transition(ConnState::ProtocolActive)
    }

    /// Feed decrypted input to the session and queue whatever it answers.
    pub(crate) fn on_read_ready(&mut self) -> Result<(), FetchError> {
        let (Some(session), Some(transport), Some(stream)) =
            (&mut self.session, &mut self.transport, &mut self.stream)
        else {
            debug!(state = %self.state, "input before session start ignored");
            return Ok(());
        };

        let (input, outbound) = transport.io_buffers();
        let mut handlers = ProtocolEventHandlers::new(outbound, stream, &mut self.output);
        let consumed = session.mem_recv(input, &mut handlers)?;
        session.send(&mut handlers)?;
        let closed = handlers.closed;
        transport.drain_input(consumed);

        if let Some(closed) = closed {
            self.begin_drain(closed)?;
        }
        self.output.flush();
        Ok(())
    }

    /// Everything buffered reached the socket. A draining connection with
    /// nothing left to exchange is finished.
    pub(crate) fn on_write_complete(&mut self) -> Result<(), FetchError> {
        if self.state != ConnState::Draining {
            return Ok(());
        }
        let pending = self
            .transport
            .as_ref()
            .map_or(0, |transport| transport.pending_output_len());
        let idle = self
            .session
            .as_ref()
            .is_none_or(|session| !session.want_read() && !session.want_write());
        if pending == 0 && idle {
            self.transition(ConnState::Closed)?;
            self.teardown();
        }
        Ok(())
    }

    pub(crate) fn on_eof(&mut self) -> Result<(), FetchError> {
        Err(FetchError::Transport(TransportFailure::Eof))
    }

    pub(crate) fn on_network_error(&mut self, err: std::io::Error) -> Result<(), FetchError> {
        Err(FetchError::Transport(TransportFailure::Error(err)))
    }

    pub(crate) fn on_timeout(&mut self) -> Result<(), FetchError> {
        Err(FetchError::Transport(TransportFailure::Timeout))
    }
}

#[cfg(test)]
mod tests {
    use protocol_h2::{ErrorCode, RequestTag, SessionCallbacks};

    use super::*;
    use crate::config::Config;
    use crate::context::StreamContext;
    use crate::output::{Capture, Output};

    struct Sink;

    impl SessionCallbacks for Sink {
        fn send(&mut self, data: &[u8]) -> usize {
            data.len()
        }
    }

    fn draining() -> ConnectionContext {
        let stream = StreamContext::new("https://localhost/", RequestTag(1), 443).unwrap();
        let mut ctx = ConnectionContext::new(
            Config::default(),
            stream,
            Output::new(Capture::new(), Capture::new()),
        );
        ctx.state = ConnState::Draining;
        ctx.session = Some(Session::client());
        ctx
    }

    #[test]
    fn write_complete_outside_draining_is_a_no_op() {
        let mut ctx = draining();
        ctx.state = ConnState::ProtocolActive;
        ctx.on_write_complete().unwrap();
        assert_eq!(ctx.state(), ConnState::ProtocolActive);
        assert!(ctx.released().is_empty());
    }

    #[test]
    fn draining_waits_until_session_is_idle() {
        let mut ctx = draining();

        // No GOAWAY yet: the session still wants to read.
        ctx.on_write_complete().unwrap();
        assert_eq!(ctx.state(), ConnState::Draining);

        let session = ctx.session.as_mut().unwrap();
        session.submit_goaway(ErrorCode::NO_ERROR).unwrap();
        // GOAWAY queued but not serialized: the session still wants to write.
        ctx.on_write_complete().unwrap();
        assert_eq!(ctx.state(), ConnState::Draining);

        ctx.session.as_mut().unwrap().send(&mut Sink).unwrap();
        ctx.on_write_complete().unwrap();
        assert_eq!(ctx.state(), ConnState::Closed);
        assert_eq!(
            ctx.released(),
            &[crate::Release::Session, crate::Release::Stream]
        );
    }

    #[test]
    fn eof_timeout_and_error_map_to_transport_failures() {
        let mut ctx = draining();
        assert!(matches!(
            ctx.on_eof(),
            Err(FetchError::Transport(TransportFailure::Eof))
        ));
        assert!(matches!(
            ctx.on_timeout(),
            Err(FetchError::Transport(TransportFailure::Timeout))
        ));
        assert!(matches!(
            ctx.on_network_error(std::io::ErrorKind::BrokenPipe.into()),
            Err(FetchError::Transport(TransportFailure::Error(_)))
        ));
    }
}
