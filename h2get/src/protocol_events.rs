//! Session callbacks: the bridge from protocol events to output.

use bytes::BytesMut;
use protocol_h2::{ErrorCode, FrameInfo, HeadersCategory, ReceivedFrame, SessionCallbacks};
use tracing::{debug, trace};

use crate::context::StreamContext;
use crate::output::Output;

/// Close report for the tracked stream. Its arrival means the connection
/// should start draining.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StreamClosed {
    pub stream_id: u32,
    pub error_code: ErrorCode,
}

/// Borrows the pieces of a connection the session callbacks touch.
pub struct ProtocolEventHandlers<'a> {
    /// Transport plaintext output buffer.
    pub outbound: &'a mut BytesMut,
    pub stream: &'a mut StreamContext,
    pub output: &'a mut Output,
    pub closed: Option<StreamClosed>,
}

impl<'a> ProtocolEventHandlers<'a> {
    pub fn new(
        outbound: &'a mut BytesMut,
        stream: &'a mut StreamContext,
        output: &'a mut Output,
    ) -> Self {
        Self {
            outbound,
            stream,
            output,
            closed: None,
        }
    }

    fn is_tracked(&self, stream_id: u32) -> bool {
        self.stream.stream_id() == Some(stream_id)
    }
}

impl SessionCallbacks for ProtocolEventHandlers<'_> {
    fn send(&mut self, data: &[u8]) -> usize {
        // The transport buffer is unbounded, so everything is accepted.
        self.outbound.extend_from_slice(data);
        data.len()
    }

    fn before_frame_send(&mut self, frame: &FrameInfo) {
        if frame.category == Some(HeadersCategory::Request)
            && frame.request_tag == Some(self.stream.tag())
        {
            debug!(stream_id = frame.stream_id, "request stream opened");
            self.stream.assign_stream_id(frame.stream_id);
        }
    }

    fn on_frame_recv(&mut self, frame: &ReceivedFrame<'_>) {
        match frame {
            ReceivedFrame::Headers {
                stream_id,
                category: HeadersCategory::Response,
                headers,
                ..
            } if self.is_tracked(*stream_id) => {
                self.output.headers("Response headers:", headers);
            }
            other => trace!(?other, "frame received"),
        }
    }

    fn on_data_chunk_recv(&mut self, stream_id: u32, data: &[u8]) {
        if self.is_tracked(stream_id) {
            self.output.body(data);
        }
    }

    fn on_stream_close(&mut self, stream_id: u32, error_code: ErrorCode) {
        if !self.is_tracked(stream_id) {
            return;
        }
        self.output.status(format_args!(
            "Stream {stream_id} closed with error_code={}",
            error_code.as_u32()
        ));
        self.closed = Some(StreamClosed {
            stream_id,
            error_code,
        });
    }
}

#[cfg(test)]
mod tests {
    use protocol_h2::{FrameKind, HeaderField, RequestTag};

    use super::*;
    use crate::output::Capture;

    struct Fixture {
        outbound: BytesMut,
        stream: StreamContext,
        output: Output,
        body: Capture,
        diag: Capture,
    }

    impl Fixture {
        fn new() -> Self {
            let body = Capture::new();
            let diag = Capture::new();
            Self {
                outbound: BytesMut::new(),
                stream: StreamContext::new("https://example.com/", RequestTag(7), 443).unwrap(),
                output: Output::new(body.clone(), diag.clone()),
                body,
                diag,
            }
        }

        fn handlers(&mut self) -> ProtocolEventHandlers<'_> {
            ProtocolEventHandlers::new(&mut self.outbound, &mut self.stream, &mut self.output)
        }
    }

    fn request_info(stream_id: u32, tag: u64) -> FrameInfo {
        FrameInfo {
            kind: FrameKind::Headers,
            stream_id,
            category: Some(HeadersCategory::Request),
            request_tag: Some(RequestTag(tag)),
            end_stream: true,
        }
    }

    #[test]
    fn send_buffers_everything() {
        let mut fx = Fixture::new();
        let mut h = fx.handlers();
        assert_eq!(h.send(b"abc"), 3);
        assert_eq!(h.send(b"de"), 2);
        assert_eq!(&fx.outbound[..], b"abcde");
    }

    #[test]
    fn stream_id_comes_from_matching_request() {
        let mut fx = Fixture::new();
        let mut h = fx.handlers();
        h.before_frame_send(&request_info(1, 99));
        assert_eq!(h.stream.stream_id(), None);
        h.before_frame_send(&request_info(3, 7));
        assert_eq!(h.stream.stream_id(), Some(3));
    }

    #[test]
    fn only_tracked_stream_reaches_output() {
        let mut fx = Fixture::new();
        let mut h = fx.handlers();
        h.before_frame_send(&request_info(1, 7));
        let headers = [HeaderField::new(":status", "200")];
        h.on_frame_recv(&ReceivedFrame::Headers {
            stream_id: 1,
            category: HeadersCategory::Response,
            headers: &headers,
            end_stream: false,
        });
        h.on_frame_recv(&ReceivedFrame::Headers {
            stream_id: 1,
            category: HeadersCategory::Headers,
            headers: &headers,
            end_stream: true,
        });
        h.on_data_chunk_recv(1, b"hello");
        h.on_data_chunk_recv(5, b"other");
        h.on_stream_close(5, ErrorCode::CANCEL);
        assert!(h.closed.is_none());
        h.on_stream_close(1, ErrorCode::NO_ERROR);
        assert_eq!(
            h.closed,
            Some(StreamClosed {
                stream_id: 1,
                error_code: ErrorCode::NO_ERROR
            })
        );
        assert_eq!(fx.body.contents(), b"hello");
        assert_eq!(
            fx.diag.text(),
            "Response headers:\n:status: 200\n\nStream 1 closed with error_code=0\n"
        );
    }

    #[test]
    fn close_reports_numeric_code() {
        let mut fx = Fixture::new();
        let mut h = fx.handlers();
        h.before_frame_send(&request_info(1, 7));
        h.on_stream_close(1, ErrorCode::REFUSED_STREAM);
        assert_eq!(fx.diag.text(), "Stream 1 closed with error_code=7\n");
    }
}
