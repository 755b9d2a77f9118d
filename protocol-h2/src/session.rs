//! HTTP/2 client session.
//!
//! `Session` is sans-IO: received bytes are fed in with [`Session::mem_recv`]
//! and queued frames are serialized by [`Session::send`]. Everything the
//! session observes is reported synchronously through a [`SessionCallbacks`]
//! implementation passed into those two calls, so the caller never has to
//! hand the session a pointer back into its own state.

use std::collections::{HashMap, VecDeque};

use bytes::{Buf, BytesMut};
use tracing::{debug, trace};

use crate::error::{ErrorCode, H2Error};
use crate::flowcontrol::Window;
use crate::frame::{self, Frame, FrameKind};
use crate::settings::{DEFAULT_INITIAL_WINDOW_SIZE, Setting, Settings};
use crate::stream::{StreamEntry, StreamState};

/// Client connection preface (RFC 9113 Section 3.4). The caller writes it to
/// the transport before the first [`Session::send`].
pub const CLIENT_PREFACE: &[u8] = b"PRI * HTTP/2.0\r\n\r\nSM\r\n\r\n";

/// A single header name/value pair, as raw bytes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HeaderField {
    pub name: Vec<u8>,
    pub value: Vec<u8>,
}

impl HeaderField {
    pub fn new(name: impl AsRef<[u8]>, value: impl AsRef<[u8]>) -> Self {
        Self {
            name: name.as_ref().to_vec(),
            value: value.as_ref().to_vec(),
        }
    }
}

/// Opaque identity attached to a submitted request. It is handed back in
/// the [`FrameInfo`] of that request's HEADERS frame, which is also where
/// the stream identifier first becomes known.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct RequestTag(pub u64);

/// What a HEADERS frame means for its stream.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HeadersCategory {
    /// Request header block sent by this client.
    Request,
    /// Response header block, including interim (1xx) responses.
    Response,
    /// Any later block on the stream, i.e. trailers.
    Headers,
}

/// Description of a frame about to be serialized.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FrameInfo {
    pub kind: FrameKind,
    pub stream_id: u32,
    pub category: Option<HeadersCategory>,
    pub request_tag: Option<RequestTag>,
    pub end_stream: bool,
}

/// A frame that has been received and processed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReceivedFrame<'a> {
    Headers {
        stream_id: u32,
        category: HeadersCategory,
        headers: &'a [HeaderField],
        end_stream: bool,
    },
    Data {
        stream_id: u32,
        len: usize,
        end_stream: bool,
    },
    Settings {
        ack: bool,
    },
    Ping {
        ack: bool,
    },
    GoAway {
        last_stream_id: u32,
        error_code: ErrorCode,
        debug_data: &'a [u8],
    },
    RstStream {
        stream_id: u32,
        error_code: ErrorCode,
    },
    WindowUpdate {
        stream_id: u32,
        increment: u32,
    },
    PushPromise {
        stream_id: u32,
        promised_stream_id: u32,
        headers: &'a [HeaderField],
    },
}

impl ReceivedFrame<'_> {
    pub fn stream_id(&self) -> u32 {
        match self {
            Self::Headers { stream_id, .. }
            | Self::Data { stream_id, .. }
            | Self::RstStream { stream_id, .. }
            | Self::WindowUpdate { stream_id, .. }
            | Self::PushPromise { stream_id, .. } => *stream_id,
            Self::Settings { .. } | Self::Ping { .. } | Self::GoAway { .. } => 0,
        }
    }
}

/// Receiver of session events.
///
/// Callbacks run synchronously inside [`Session::send`] and
/// [`Session::mem_recv`]; they must not block.
pub trait SessionCallbacks {
    /// Accept serialized bytes for the transport. Returns how many bytes were
    /// taken; the rest stay queued in the session until the next `send`.
    fn send(&mut self, data: &[u8]) -> usize;

    /// Called for every frame right before it is serialized.
    fn before_frame_send(&mut self, _frame: &FrameInfo) {}

    /// Called once a received frame has been fully processed.
    fn on_frame_recv(&mut self, _frame: &ReceivedFrame<'_>) {}

    /// A chunk of DATA payload (padding removed).
    fn on_data_chunk_recv(&mut self, _stream_id: u32, _data: &[u8]) {}

    /// The stream reached the closed state.
    fn on_stream_close(&mut self, _stream_id: u32, _error_code: ErrorCode) {}
}

enum Outbound {
    Frame(Frame),
    Request {
        headers: Vec<HeaderField>,
        tag: RequestTag,
    },
}

/// Header block being assembled from HEADERS/PUSH_PROMISE + CONTINUATION.
struct PendingBlock {
    stream_id: u32,
    block: Vec<u8>,
    end_stream: bool,
    promised_stream_id: Option<u32>,
}

/// Client-side HTTP/2 session.
pub struct Session {
    local: Settings,
    /// Local SETTINGS sent but not yet acknowledged, oldest first.
    unacked: VecDeque<Vec<Setting>>,
    remote: Settings,
    preface_received: bool,

    streams: HashMap<u32, StreamEntry>,
    next_stream_id: u32,
    recv_window: Window,
    send_window: Window,

    encoder: hpack::Encoder<'static>,
    decoder: hpack::Decoder<'static>,
    header_block: Option<PendingBlock>,

    recv_buf: BytesMut,
    outbound: VecDeque<Outbound>,
    /// Serialized bytes the send callback has not accepted yet.
    partial: BytesMut,

    goaway_sent: bool,
    goaway_received: bool,
    terminated: bool,
}

impl Session {
    pub fn client() -> Self {
        Self {
            local: Settings::default(),
            unacked: VecDeque::new(),
            remote: Settings::default(),
            preface_received: false,
            streams: HashMap::new(),
            next_stream_id: 1,
            recv_window: Window::default(),
            send_window: Window::default(),
            encoder: hpack::Encoder::new(),
            decoder: hpack::Decoder::new(),
            header_block: None,
            recv_buf: BytesMut::new(),
            outbound: VecDeque::new(),
            partial: BytesMut::new(),
            goaway_sent: false,
            goaway_received: false,
            terminated: false,
        }
    }

    /// Queue a SETTINGS frame. The values take effect locally once the peer
    /// acknowledges them.
    pub fn submit_settings(&mut self, entries: &[Setting]) -> Result<(), H2Error> {
        self.check_open()?;
        let mut probe = self.local.clone();
        for entry in entries {
            probe.apply(*entry)?;
        }
        self.unacked.push_back(entries.to_vec());
        self.outbound.push_back(Outbound::Frame(Frame::Settings {
            ack: false,
            entries: entries.to_vec(),
        }));
        Ok(())
    }

    /// Queue a request without a body. HPACK encoding and stream id
    /// assignment happen when the HEADERS frame is serialized.
    pub fn submit_request(
        &mut self,
        headers: Vec<HeaderField>,
        tag: RequestTag,
    ) -> Result<(), H2Error> {
        self.check_open()?;
        if self.goaway_sent || self.goaway_received {
            return Err(H2Error::protocol("request submitted after GOAWAY"));
        }
        self.outbound.push_back(Outbound::Request { headers, tag });
        Ok(())
    }

    /// Queue a GOAWAY. Server-initiated streams are never accepted, so the
    /// last stream id is always 0.
    pub fn submit_goaway(&mut self, error_code: ErrorCode) -> Result<(), H2Error> {
        self.check_open()?;
        self.outbound.push_back(Outbound::Frame(Frame::GoAway {
            last_stream_id: 0,
            error_code,
            debug_data: Vec::new(),
        }));
        Ok(())
    }

    /// Serialize queued frames in order and hand the bytes to
    /// [`SessionCallbacks::send`] until the queue is empty or the callback
    /// stops accepting.
    pub fn send(&mut self, cb: &mut impl SessionCallbacks) -> Result<(), H2Error> {
        if self.terminated {
            return Ok(());
        }
        loop {
            if !self.partial.is_empty() {
                let accepted = cb.send(&self.partial).min(self.partial.len());
                self.partial.advance(accepted);
                if !self.partial.is_empty() {
                    return Ok(());
                }
            }
            let Some(item) = self.outbound.pop_front() else {
                return Ok(());
            };
            match item {
                Outbound::Frame(frame) => self.serialize_frame(frame, cb),
                Outbound::Request { headers, tag } => self.serialize_request(&headers, tag, cb),
            }
        }
    }

    /// Feed received bytes. Incomplete frames are buffered internally, so
    /// on success the whole input counts as consumed. Any error is fatal:
    /// the session is terminated and accepts no more work.
    pub fn mem_recv(
        &mut self,
        data: &[u8],
        cb: &mut impl SessionCallbacks,
    ) -> Result<usize, H2Error> {
        self.check_open()?;
        self.recv_buf.extend_from_slice(data);
        match self.process_recv_buf(cb) {
            Ok(()) => Ok(data.len()),
            Err(err) => {
                debug!(error = %err, "session terminated");
                self.terminated = true;
                Err(err)
            }
        }
    }

    /// Whether the session still expects input from the peer.
    pub fn want_read(&self) -> bool {
        !self.terminated
            && (self.active_streams() > 0 || !(self.goaway_sent || self.goaway_received))
    }

    /// Whether the session has frames waiting to be handed to the transport.
    pub fn want_write(&self) -> bool {
        !self.terminated && (!self.outbound.is_empty() || !self.partial.is_empty())
    }

    /// Open streams plus requests still waiting for serialization.
    pub fn active_streams(&self) -> usize {
        let queued = self
            .outbound
            .iter()
            .filter(|item| matches!(item, Outbound::Request { .. }))
            .count();
        self.streams.len() + queued
    }

    pub fn stream_state(&self, stream_id: u32) -> Option<StreamState> {
        self.streams.get(&stream_id).map(|s| s.state)
    }

    pub fn local_settings(&self) -> &Settings {
        &self.local
    }

    pub fn remote_settings(&self) -> &Settings {
        &self.remote
    }

    pub fn is_terminated(&self) -> bool {
        self.terminated
    }

    fn check_open(&self) -> Result<(), H2Error> {
        if self.terminated {
            Err(H2Error::Terminated)
        } else {
            Ok(())
        }
    }

    // -- Outbound --

    fn serialize_frame(&mut self, frame: Frame, cb: &mut impl SessionCallbacks) {
        let end_stream = matches!(
            frame,
            Frame::Data {
                end_stream: true,
                ..
            }
        );
        cb.before_frame_send(&FrameInfo {
            kind: frame.kind(),
            stream_id: frame.stream_id(),
            category: None,
            request_tag: None,
            end_stream,
        });
        if let Frame::GoAway { error_code, .. } = &frame {
            debug!(%error_code, "sending GOAWAY");
            self.goaway_sent = true;
        }
        trace!(kind = %frame.kind(), stream_id = frame.stream_id(), "send frame");
        frame.encode(&mut self.partial);
    }

    fn serialize_request(
        &mut self,
        headers: &[HeaderField],
        tag: RequestTag,
        cb: &mut impl SessionCallbacks,
    ) {
        if self.goaway_received {
            debug!(?tag, "dropping request queued before GOAWAY");
            return;
        }
        let stream_id = self.next_stream_id;
        self.next_stream_id += 2;

        cb.before_frame_send(&FrameInfo {
            kind: FrameKind::Headers,
            stream_id,
            category: Some(HeadersCategory::Request),
            request_tag: Some(tag),
            end_stream: true,
        });

        let block = self.encoder.encode(
            headers
                .iter()
                .map(|h| (h.name.as_slice(), h.value.as_slice())),
        );
        let max = self.remote.max_frame_size as usize;
        let mut chunks = block.chunks(max).peekable();
        let first = chunks.next().unwrap_or_default().to_vec();
        Frame::Headers {
            stream_id,
            block: first,
            end_stream: true,
            end_headers: chunks.peek().is_none(),
        }
        .encode(&mut self.partial);
        while let Some(chunk) = chunks.next() {
            Frame::Continuation {
                stream_id,
                block: chunk.to_vec(),
                end_headers: chunks.peek().is_none(),
            }
            .encode(&mut self.partial);
        }
        trace!(stream_id, "send request HEADERS");

        let mut entry = StreamEntry::new(
            self.local.initial_window_size,
            self.remote.initial_window_size,
        );
        entry.state = entry.state.close_local();
        self.streams.insert(stream_id, entry);
    }

    // -- Inbound --

    fn process_recv_buf(&mut self, cb: &mut impl SessionCallbacks) -> Result<(), H2Error> {
        while !self.terminated {
            let Some((frame, used)) = frame::decode(&self.recv_buf, self.local.max_frame_size)?
            else {
                break;
            };
            self.recv_buf.advance(used);
            trace!(kind = %frame.kind(), stream_id = frame.stream_id(), "recv frame");
            self.handle_frame(frame, cb)?;
        }
        Ok(())
    }

    fn handle_frame(&mut self, frame: Frame, cb: &mut impl SessionCallbacks) -> Result<(), H2Error> {
        // A header block must not be interleaved with other frames.
        if let Some(pending) = &self.header_block {
            match &frame {
                Frame::Continuation { stream_id, .. } if *stream_id == pending.stream_id => {}
                _ => return Err(H2Error::protocol("expected CONTINUATION")),
            }
        }
        if !self.preface_received {
            if !matches!(frame, Frame::Settings { ack: false, .. }) {
                return Err(H2Error::protocol("server preface must start with SETTINGS"));
            }
            self.preface_received = true;
        }

        match frame {
            Frame::Data {
                stream_id,
                payload,
                end_stream,
                flow_len,
            } => self.handle_data(stream_id, &payload, end_stream, flow_len, cb),
            Frame::Headers {
                stream_id,
                block,
                end_stream,
                end_headers,
            } => {
                let pending = PendingBlock {
                    stream_id,
                    block,
                    end_stream,
                    promised_stream_id: None,
                };
                self.begin_block(pending, end_headers, cb)
            }
            Frame::PushPromise {
                stream_id,
                promised_stream_id,
                block,
                end_headers,
            } => {
                if !self.local.enable_push {
                    return Err(H2Error::protocol("PUSH_PROMISE with push disabled"));
                }
                let pending = PendingBlock {
                    stream_id,
                    block,
                    end_stream: false,
                    promised_stream_id: Some(promised_stream_id),
                };
                self.begin_block(pending, end_headers, cb)
            }
            Frame::Continuation {
                stream_id,
                block,
                end_headers,
            } => {
                let Some(pending) = self.header_block.as_mut() else {
                    return Err(H2Error::protocol(format!(
                        "CONTINUATION on stream {stream_id} without a header block"
                    )));
                };
                pending.block.extend_from_slice(&block);
                if end_headers && let Some(pending) = self.header_block.take() {
                    self.finish_block(pending, cb)?;
                }
                Ok(())
            }
            Frame::Settings { ack, entries } => self.handle_settings(ack, entries, cb),
            Frame::Ping { ack, opaque } => {
                if !ack {
                    self.outbound
                        .push_back(Outbound::Frame(Frame::Ping { ack: true, opaque }));
                }
                cb.on_frame_recv(&ReceivedFrame::Ping { ack });
                Ok(())
            }
            Frame::GoAway {
                last_stream_id,
                error_code,
                debug_data,
            } => {
                debug!(last_stream_id, %error_code, "GOAWAY received");
                self.goaway_received = true;
                cb.on_frame_recv(&ReceivedFrame::GoAway {
                    last_stream_id,
                    error_code,
                    debug_data: &debug_data,
                });
                let mut refused: Vec<u32> = self
                    .streams
                    .keys()
                    .copied()
                    .filter(|id| *id > last_stream_id)
                    .collect();
                refused.sort_unstable();
                for stream_id in refused {
                    self.close_stream(stream_id, ErrorCode::REFUSED_STREAM, cb);
                }
                Ok(())
            }
            Frame::RstStream {
                stream_id,
                error_code,
            } => {
                self.check_not_idle(stream_id, FrameKind::RstStream)?;
                cb.on_frame_recv(&ReceivedFrame::RstStream {
                    stream_id,
                    error_code,
                });
                if self.streams.contains_key(&stream_id) {
                    self.close_stream(stream_id, error_code, cb);
                }
                Ok(())
            }
            Frame::WindowUpdate {
                stream_id,
                increment,
            } => {
                if stream_id == 0 {
                    self.send_window.release(increment)?;
                } else if let Some(stream) = self.streams.get_mut(&stream_id) {
                    stream.send_window.release(increment)?;
                }
                cb.on_frame_recv(&ReceivedFrame::WindowUpdate {
                    stream_id,
                    increment,
                });
                Ok(())
            }
            Frame::Priority { .. } | Frame::Unknown { .. } => Ok(()),
        }
    }

    fn handle_data(
        &mut self,
        stream_id: u32,
        payload: &[u8],
        end_stream: bool,
        flow_len: u32,
        cb: &mut impl SessionCallbacks,
    ) -> Result<(), H2Error> {
        self.recv_window.consume(flow_len)?;
        self.refill_connection_window()?;

        let Some(stream) = self.streams.get_mut(&stream_id) else {
            // Late DATA on a stream we already closed still counts against
            // the connection window, which has been refilled above.
            return self.check_not_idle(stream_id, FrameKind::Data);
        };
        if !stream.state.accepts_remote() {
            return Err(H2Error::StreamClosed(stream_id));
        }
        stream.recv_window.consume(flow_len)?;
        if end_stream {
            stream.state = stream.state.close_remote();
        } else if let Some(increment) = stream.recv_window.refill(self.local.initial_window_size) {
            stream.recv_window.release(increment)?;
            self.outbound
                .push_back(Outbound::Frame(Frame::WindowUpdate {
                    stream_id,
                    increment,
                }));
        }
        let closed = stream.state == StreamState::Closed;

        if !payload.is_empty() {
            cb.on_data_chunk_recv(stream_id, payload);
        }
        cb.on_frame_recv(&ReceivedFrame::Data {
            stream_id,
            len: payload.len(),
            end_stream,
        });
        if closed {
            self.close_stream(stream_id, ErrorCode::NO_ERROR, cb);
        }
        Ok(())
    }

    fn refill_connection_window(&mut self) -> Result<(), H2Error> {
        if let Some(increment) = self.recv_window.refill(DEFAULT_INITIAL_WINDOW_SIZE) {
            self.recv_window.release(increment)?;
            self.outbound
                .push_back(Outbound::Frame(Frame::WindowUpdate {
                    stream_id: 0,
                    increment,
                }));
        }
        Ok(())
    }

    fn begin_block(
        &mut self,
        pending: PendingBlock,
        end_headers: bool,
        cb: &mut impl SessionCallbacks,
    ) -> Result<(), H2Error> {
        if end_headers {
            self.finish_block(pending, cb)
        } else {
            self.header_block = Some(pending);
            Ok(())
        }
    }

    fn finish_block(
        &mut self,
        pending: PendingBlock,
        cb: &mut impl SessionCallbacks,
    ) -> Result<(), H2Error> {
        // Decode even when the stream is gone so HPACK state stays in sync.
        let headers: Vec<HeaderField> = self
            .decoder
            .decode(&pending.block)
            .map_err(|err| H2Error::Compression(format!("{err:?}")))?
            .into_iter()
            .map(|(name, value)| HeaderField { name, value })
            .collect();

        let stream_id = pending.stream_id;
        if let Some(promised_stream_id) = pending.promised_stream_id {
            cb.on_frame_recv(&ReceivedFrame::PushPromise {
                stream_id,
                promised_stream_id,
                headers: &headers,
            });
            debug!(promised_stream_id, "refusing pushed stream");
            self.outbound.push_back(Outbound::Frame(Frame::RstStream {
                stream_id: promised_stream_id,
                error_code: ErrorCode::REFUSED_STREAM,
            }));
            return Ok(());
        }

        let Some(stream) = self.streams.get_mut(&stream_id) else {
            return self.check_not_idle(stream_id, FrameKind::Headers);
        };
        if !stream.state.accepts_remote() {
            return Err(H2Error::StreamClosed(stream_id));
        }
        let category = if stream.response_seen {
            HeadersCategory::Headers
        } else {
            let interim = headers
                .iter()
                .find(|h| h.name == b":status")
                .is_some_and(|h| h.value.first() == Some(&b'1'));
            stream.response_seen = !interim;
            HeadersCategory::Response
        };
        if pending.end_stream {
            stream.state = stream.state.close_remote();
        }
        let closed = stream.state == StreamState::Closed;

        cb.on_frame_recv(&ReceivedFrame::Headers {
            stream_id,
            category,
            headers: &headers,
            end_stream: pending.end_stream,
        });
        if closed {
            self.close_stream(stream_id, ErrorCode::NO_ERROR, cb);
        }
        Ok(())
    }

    fn handle_settings(
        &mut self,
        ack: bool,
        entries: Vec<Setting>,
        cb: &mut impl SessionCallbacks,
    ) -> Result<(), H2Error> {
        if ack {
            let Some(acked) = self.unacked.pop_front() else {
                return Err(H2Error::protocol("unexpected SETTINGS ack"));
            };
            let old_window = self.local.initial_window_size;
            for entry in acked {
                self.local.apply(entry)?;
            }
            let delta =
                i64::from(self.local.initial_window_size) - i64::from(old_window);
            if delta != 0 {
                for stream in self.streams.values_mut() {
                    stream.recv_window.shift(delta)?;
                }
            }
        } else {
            let old_window = self.remote.initial_window_size;
            for entry in entries {
                self.remote.apply(entry)?;
            }
            let delta =
                i64::from(self.remote.initial_window_size) - i64::from(old_window);
            if delta != 0 {
                for stream in self.streams.values_mut() {
                    stream.send_window.shift(delta)?;
                }
            }
            self.outbound.push_back(Outbound::Frame(Frame::Settings {
                ack: true,
                entries: Vec::new(),
            }));
        }
        cb.on_frame_recv(&ReceivedFrame::Settings { ack });
        Ok(())
    }

    /// Frames on a stream id this client never opened are a connection
    /// error; frames on streams that were opened and since closed are
    /// ignored.
    fn check_not_idle(&self, stream_id: u32, kind: FrameKind) -> Result<(), H2Error> {
        if stream_id % 2 == 0 || stream_id >= self.next_stream_id {
            return Err(H2Error::protocol(format!(
                "{kind} on idle stream {stream_id}"
            )));
        }
        trace!(stream_id, %kind, "ignoring frame for closed stream");
        Ok(())
    }

    fn close_stream(
        &mut self,
        stream_id: u32,
        error_code: ErrorCode,
        cb: &mut impl SessionCallbacks,
    ) {
        if self.streams.remove(&stream_id).is_some() {
            debug!(stream_id, %error_code, "stream closed");
            cb.on_stream_close(stream_id, error_code);
        }
    }
}

impl Default for Session {
    fn default() -> Self {
        Self::client()
    }
}
