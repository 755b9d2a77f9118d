//! Integration tests: a client `Session` exchanging frames with a scripted
//! in-memory peer that speaks the server side of the protocol.

use protocol_h2::frame::{self, FRAME_HEADER_LEN, FrameHeader, flags};
use protocol_h2::{
    CLIENT_PREFACE, ErrorCode, Frame, FrameInfo, FrameKind, HeaderField, HeadersCategory,
    ReceivedFrame, RequestTag, Session, SessionCallbacks, Setting, SettingId,
};

// -- Client side --

#[derive(Default)]
struct Client {
    outbound: Vec<u8>,
    request_stream: Option<u32>,
    response: Vec<HeaderField>,
    trailers: Vec<HeaderField>,
    body: Vec<u8>,
    closed: Vec<(u32, ErrorCode)>,
}

impl SessionCallbacks for Client {
    fn send(&mut self, data: &[u8]) -> usize {
        self.outbound.extend_from_slice(data);
        data.len()
    }

    fn before_frame_send(&mut self, frame: &FrameInfo) {
        if frame.category == Some(HeadersCategory::Request) && frame.request_tag == Some(TAG) {
            self.request_stream = Some(frame.stream_id);
        }
    }

    fn on_frame_recv(&mut self, frame: &ReceivedFrame<'_>) {
        if let ReceivedFrame::Headers {
            category, headers, ..
        } = frame
        {
            match category {
                HeadersCategory::Response => self.response = headers.to_vec(),
                HeadersCategory::Headers => self.trailers = headers.to_vec(),
                HeadersCategory::Request => unreachable!("requests are never received"),
            }
        }
    }

    fn on_data_chunk_recv(&mut self, _stream_id: u32, data: &[u8]) {
        self.body.extend_from_slice(data);
    }

    fn on_stream_close(&mut self, stream_id: u32, error_code: ErrorCode) {
        self.closed.push((stream_id, error_code));
    }
}

const TAG: RequestTag = RequestTag(42);

// -- Scripted server --

struct Peer {
    encoder: hpack::Encoder<'static>,
    decoder: hpack::Decoder<'static>,
    received: Vec<Frame>,
    requests: Vec<(u32, Vec<(Vec<u8>, Vec<u8>)>)>,
}

impl Peer {
    fn new() -> Self {
        Self {
            encoder: hpack::Encoder::new(),
            decoder: hpack::Decoder::new(),
            received: Vec::new(),
            requests: Vec::new(),
        }
    }

    /// Parse everything the client wrote, preface included.
    fn absorb(&mut self, mut wire: &[u8]) {
        if let Some(rest) = wire.strip_prefix(CLIENT_PREFACE) {
            wire = rest;
        }
        while let Some((frame, used)) = frame::decode(wire, 16_384).unwrap() {
            wire = &wire[used..];
            if let Frame::Headers {
                stream_id, block, ..
            } = &frame
            {
                let headers = self.decoder.decode(block).unwrap();
                self.requests.push((*stream_id, headers));
            }
            self.received.push(frame);
        }
        assert!(wire.is_empty(), "client wrote a partial frame");
    }

    fn headers(&mut self, stream_id: u32, fields: &[(&str, &str)], end_stream: bool) -> Frame {
        let block = self
            .encoder
            .encode(fields.iter().map(|(n, v)| (n.as_bytes(), v.as_bytes())));
        Frame::Headers {
            stream_id,
            block,
            end_stream,
            end_headers: true,
        }
    }
}

fn encode_all(frames: &[Frame]) -> Vec<u8> {
    let mut buf = Vec::new();
    for frame in frames {
        frame.encode(&mut buf);
    }
    buf
}

fn padded_data(stream_id: u32, body: &[u8], pad: u8) -> Vec<u8> {
    let mut buf = Vec::new();
    let len = 1 + body.len() + usize::from(pad);
    FrameHeader::new(len, FrameKind::Data, flags::PADDED, stream_id).encode(&mut buf);
    buf.push(pad);
    buf.extend_from_slice(body);
    buf.extend(std::iter::repeat_n(0u8, usize::from(pad)));
    buf
}

fn start(client: &mut Client) -> Session {
    let mut session = Session::client();
    client.outbound.extend_from_slice(CLIENT_PREFACE);
    session
        .submit_settings(&[Setting::max_concurrent_streams(100)])
        .unwrap();
    session
        .submit_request(
            vec![
                HeaderField::new(":method", "GET"),
                HeaderField::new(":scheme", "https"),
                HeaderField::new(":authority", "example.com:8443"),
                HeaderField::new(":path", "/index.html?lang=en"),
            ],
            TAG,
        )
        .unwrap();
    session.send(client).unwrap();
    session
}

#[test]
fn client_opens_with_preface_settings_and_request() {
    let mut client = Client::default();
    let _session = start(&mut client);
    assert!(client.outbound.starts_with(CLIENT_PREFACE));

    let mut peer = Peer::new();
    peer.absorb(&client.outbound);
    assert_eq!(peer.received.len(), 2);
    assert_eq!(
        peer.received[0],
        Frame::Settings {
            ack: false,
            entries: vec![Setting::new(SettingId::MaxConcurrentStreams, 100)],
        }
    );
    let (stream_id, headers) = &peer.requests[0];
    assert_eq!(*stream_id, 1);
    assert_eq!(client.request_stream, Some(1));
    let names: Vec<&[u8]> = headers.iter().map(|(n, _)| n.as_slice()).collect();
    assert_eq!(
        names,
        vec![
            &b":method"[..],
            &b":scheme"[..],
            &b":authority"[..],
            &b":path"[..]
        ]
    );
    assert_eq!(headers[3].1, b"/index.html?lang=en");
    match &peer.received[1] {
        Frame::Headers { end_stream, .. } => assert!(*end_stream),
        other => panic!("expected HEADERS, got {other:?}"),
    }
}

#[test]
fn full_exchange_then_graceful_goaway() {
    let mut client = Client::default();
    let mut session = start(&mut client);
    client.outbound.clear();
    let mut peer = Peer::new();

    let mut input = encode_all(&[
        Frame::Settings {
            ack: false,
            entries: Vec::new(),
        },
        Frame::Settings {
            ack: true,
            entries: Vec::new(),
        },
    ]);
    let response = peer.headers(1, &[(":status", "200"), ("content-length", "11")], false);
    response.encode(&mut input);
    input.extend(padded_data(1, b"hello ", 4));
    Frame::data(1, b"world".to_vec(), false).encode(&mut input);
    peer.headers(1, &[("grpc-status", "0")], true).encode(&mut input);

    // Split the input at an awkward boundary.
    let (a, b) = input.split_at(FRAME_HEADER_LEN + 3);
    assert_eq!(session.mem_recv(a, &mut client).unwrap(), a.len());
    assert_eq!(session.mem_recv(b, &mut client).unwrap(), b.len());

    assert_eq!(client.response[0], HeaderField::new(":status", "200"));
    assert_eq!(client.trailers, vec![HeaderField::new("grpc-status", "0")]);
    assert_eq!(client.body, b"hello world");
    assert_eq!(client.closed, vec![(1, ErrorCode::NO_ERROR)]);
    assert!(session.want_write(), "SETTINGS ack is queued");

    session.submit_goaway(ErrorCode::NO_ERROR).unwrap();
    session.send(&mut client).unwrap();
    peer.absorb(&client.outbound);
    let kinds: Vec<FrameKind> = peer.received.iter().map(Frame::kind).collect();
    assert_eq!(kinds, vec![FrameKind::Settings, FrameKind::GoAway]);
    assert!(!session.want_read());
    assert!(!session.want_write());
}

#[test]
fn server_goaway_without_processing_refuses_stream() {
    let mut client = Client::default();
    let mut session = start(&mut client);
    let input = encode_all(&[
        Frame::Settings {
            ack: false,
            entries: Vec::new(),
        },
        Frame::GoAway {
            last_stream_id: 0,
            error_code: ErrorCode::NO_ERROR,
            debug_data: b"maintenance".to_vec(),
        },
    ]);
    session.mem_recv(&input, &mut client).unwrap();
    assert_eq!(client.closed, vec![(1, ErrorCode::REFUSED_STREAM)]);
    assert!(!session.want_read());
}

#[test]
fn malformed_header_block_terminates_session() {
    let mut client = Client::default();
    let mut session = start(&mut client);
    let input = encode_all(&[
        Frame::Settings {
            ack: false,
            entries: Vec::new(),
        },
        Frame::Headers {
            stream_id: 1,
            // Indexed field referencing a dynamic entry that does not exist.
            block: vec![0xff, 0x7f],
            end_stream: false,
            end_headers: true,
        },
    ]);
    let err = session.mem_recv(&input, &mut client).unwrap_err();
    assert_eq!(err.code(), ErrorCode::COMPRESSION_ERROR);
    assert!(session.is_terminated());
    assert!(!session.want_read());
    assert!(!session.want_write());
}
