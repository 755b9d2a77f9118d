//! HTTP/2 frame codec (RFC 9113 Section 4).
//!
//! Every frame starts with a fixed 9-byte header:
//! ```text
//! +-----------------------------------------------+
//! |                 Length (24)                    |
//! +---------------+---------------+---------------+
//! |   Type (8)    |   Flags (8)   |
//! +-+-------------+---------------+------...------+
//! |R|                 Stream Identifier (31)       |
//! +-+---------------------------------------------+
//! |                   Frame Payload ...            |
//! +-----------------------------------------------+
//! ```

use std::fmt;

use bytes::{Buf, BufMut};

use crate::error::{ErrorCode, H2Error};
use crate::settings::{self, Setting};

/// Frame header size in bytes.
pub const FRAME_HEADER_LEN: usize = 9;

const STREAM_ID_MASK: u32 = 0x7fff_ffff;

/// Frame flag bits. Their meaning depends on the frame type.
pub mod flags {
    pub const END_STREAM: u8 = 0x1;
    pub const ACK: u8 = 0x1;
    pub const END_HEADERS: u8 = 0x4;
    pub const PADDED: u8 = 0x8;
    pub const PRIORITY: u8 = 0x20;
}

/// Frame type (RFC 9113 Section 6).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FrameKind {
    Data,
    Headers,
    Priority,
    RstStream,
    Settings,
    PushPromise,
    Ping,
    GoAway,
    WindowUpdate,
    Continuation,
    Unknown(u8),
}

impl FrameKind {
    pub fn from_u8(kind: u8) -> Self {
        match kind {
            0x0 => Self::Data,
            0x1 => Self::Headers,
            0x2 => Self::Priority,
            0x3 => Self::RstStream,
            0x4 => Self::Settings,
            0x5 => Self::PushPromise,
            0x6 => Self::Ping,
            0x7 => Self::GoAway,
            0x8 => Self::WindowUpdate,
            0x9 => Self::Continuation,
            other => Self::Unknown(other),
        }
    }

    pub fn as_u8(self) -> u8 {
        match self {
            Self::Data => 0x0,
            Self::Headers => 0x1,
            Self::Priority => 0x2,
            Self::RstStream => 0x3,
            Self::Settings => 0x4,
            Self::PushPromise => 0x5,
            Self::Ping => 0x6,
            Self::GoAway => 0x7,
            Self::WindowUpdate => 0x8,
            Self::Continuation => 0x9,
            Self::Unknown(kind) => kind,
        }
    }
}

impl fmt::Display for FrameKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Data => "DATA",
            Self::Headers => "HEADERS",
            Self::Priority => "PRIORITY",
            Self::RstStream => "RST_STREAM",
            Self::Settings => "SETTINGS",
            Self::PushPromise => "PUSH_PROMISE",
            Self::Ping => "PING",
            Self::GoAway => "GOAWAY",
            Self::WindowUpdate => "WINDOW_UPDATE",
            Self::Continuation => "CONTINUATION",
            Self::Unknown(kind) => return write!(f, "UNKNOWN(0x{kind:x})"),
        };
        f.write_str(name)
    }
}

/// The fixed 9-byte frame header.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FrameHeader {
    pub length: u32,
    pub kind: FrameKind,
    pub flags: u8,
    pub stream_id: u32,
}

impl FrameHeader {
    pub fn new(length: usize, kind: FrameKind, flags: u8, stream_id: u32) -> Self {
        Self {
            length: length as u32,
            kind,
            flags,
            stream_id,
        }
    }

    pub fn encode(&self, buf: &mut impl BufMut) {
        buf.put_uint(u64::from(self.length), 3);
        buf.put_u8(self.kind.as_u8());
        buf.put_u8(self.flags);
        buf.put_u32(self.stream_id & STREAM_ID_MASK);
    }

    /// Parse a header from the front of `buf`; `None` if fewer than 9 bytes.
    pub fn decode(mut buf: &[u8]) -> Option<Self> {
        if buf.len() < FRAME_HEADER_LEN {
            return None;
        }
        let length = buf.get_uint(3) as u32;
        let kind = FrameKind::from_u8(buf.get_u8());
        let flags = buf.get_u8();
        let stream_id = buf.get_u32() & STREAM_ID_MASK;
        Some(Self {
            length,
            kind,
            flags,
            stream_id,
        })
    }

    fn has(&self, flag: u8) -> bool {
        self.flags & flag != 0
    }
}

/// A decoded (or to-be-encoded) HTTP/2 frame.
///
/// Header blocks are carried as raw HPACK fragments; decompression happens
/// in the session once a block is complete.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Frame {
    Data {
        stream_id: u32,
        payload: Vec<u8>,
        end_stream: bool,
        /// Full payload length including padding, which counts against
        /// flow control.
        flow_len: u32,
    },
    Headers {
        stream_id: u32,
        block: Vec<u8>,
        end_stream: bool,
        end_headers: bool,
    },
    Priority {
        stream_id: u32,
    },
    RstStream {
        stream_id: u32,
        error_code: ErrorCode,
    },
    Settings {
        ack: bool,
        entries: Vec<Setting>,
    },
    PushPromise {
        stream_id: u32,
        promised_stream_id: u32,
        block: Vec<u8>,
        end_headers: bool,
    },
    Ping {
        ack: bool,
        opaque: [u8; 8],
    },
    GoAway {
        last_stream_id: u32,
        error_code: ErrorCode,
        debug_data: Vec<u8>,
    },
    WindowUpdate {
        stream_id: u32,
        increment: u32,
    },
    Continuation {
        stream_id: u32,
        block: Vec<u8>,
        end_headers: bool,
    },
    /// Extension frame types are skipped (RFC 9113 Section 4.1).
    Unknown {
        kind: u8,
        stream_id: u32,
    },
}

impl Frame {
    /// Plain DATA frame without padding.
    pub fn data(stream_id: u32, payload: impl Into<Vec<u8>>, end_stream: bool) -> Self {
        let payload = payload.into();
        Self::Data {
            stream_id,
            flow_len: payload.len() as u32,
            payload,
            end_stream,
        }
    }

    pub fn kind(&self) -> FrameKind {
        match self {
            Self::Data { .. } => FrameKind::Data,
            Self::Headers { .. } => FrameKind::Headers,
            Self::Priority { .. } => FrameKind::Priority,
            Self::RstStream { .. } => FrameKind::RstStream,
            Self::Settings { .. } => FrameKind::Settings,
            Self::PushPromise { .. } => FrameKind::PushPromise,
            Self::Ping { .. } => FrameKind::Ping,
            Self::GoAway { .. } => FrameKind::GoAway,
            Self::WindowUpdate { .. } => FrameKind::WindowUpdate,
            Self::Continuation { .. } => FrameKind::Continuation,
            Self::Unknown { kind, .. } => FrameKind::Unknown(*kind),
        }
    }

    pub fn stream_id(&self) -> u32 {
        match self {
            Self::Data { stream_id, .. }
            | Self::Headers { stream_id, .. }
            | Self::Priority { stream_id }
            | Self::RstStream { stream_id, .. }
            | Self::PushPromise { stream_id, .. }
            | Self::WindowUpdate { stream_id, .. }
            | Self::Continuation { stream_id, .. }
            | Self::Unknown { stream_id, .. } => *stream_id,
            Self::Settings { .. } | Self::Ping { .. } | Self::GoAway { .. } => 0,
        }
    }

    /// Serialize the frame. Padding and priority fields are never emitted.
    pub fn encode(&self, buf: &mut impl BufMut) {
        match self {
            Self::Data {
                stream_id,
                payload,
                end_stream,
                ..
            } => {
                let flags = if *end_stream { flags::END_STREAM } else { 0 };
                FrameHeader::new(payload.len(), FrameKind::Data, flags, *stream_id).encode(buf);
                buf.put_slice(payload);
            }
            Self::Headers {
                stream_id,
                block,
                end_stream,
                end_headers,
            } => {
                let mut flags = 0;
                if *end_stream {
                    flags |= flags::END_STREAM;
                }
                if *end_headers {
                    flags |= flags::END_HEADERS;
                }
                FrameHeader::new(block.len(), FrameKind::Headers, flags, *stream_id).encode(buf);
                buf.put_slice(block);
            }
            Self::Priority { stream_id } => {
                FrameHeader::new(5, FrameKind::Priority, 0, *stream_id).encode(buf);
                buf.put_u32(0);
                buf.put_u8(15);
            }
            Self::RstStream {
                stream_id,
                error_code,
            } => {
                FrameHeader::new(4, FrameKind::RstStream, 0, *stream_id).encode(buf);
                buf.put_u32(error_code.as_u32());
            }
            Self::Settings { ack, entries } => {
                let flags = if *ack { flags::ACK } else { 0 };
                FrameHeader::new(entries.len() * 6, FrameKind::Settings, flags, 0).encode(buf);
                settings::encode_entries(entries, buf);
            }
            Self::PushPromise {
                stream_id,
                promised_stream_id,
                block,
                end_headers,
            } => {
                let flags = if *end_headers { flags::END_HEADERS } else { 0 };
                FrameHeader::new(4 + block.len(), FrameKind::PushPromise, flags, *stream_id)
                    .encode(buf);
                buf.put_u32(*promised_stream_id & STREAM_ID_MASK);
                buf.put_slice(block);
            }
            Self::Ping { ack, opaque } => {
                let flags = if *ack { flags::ACK } else { 0 };
                FrameHeader::new(8, FrameKind::Ping, flags, 0).encode(buf);
                buf.put_slice(opaque);
            }
            Self::GoAway {
                last_stream_id,
                error_code,
                debug_data,
            } => {
                FrameHeader::new(8 + debug_data.len(), FrameKind::GoAway, 0, 0).encode(buf);
                buf.put_u32(*last_stream_id & STREAM_ID_MASK);
                buf.put_u32(error_code.as_u32());
                buf.put_slice(debug_data);
            }
            Self::WindowUpdate {
                stream_id,
                increment,
            } => {
                FrameHeader::new(4, FrameKind::WindowUpdate, 0, *stream_id).encode(buf);
                buf.put_u32(*increment & STREAM_ID_MASK);
            }
            Self::Continuation {
                stream_id,
                block,
                end_headers,
            } => {
                let flags = if *end_headers { flags::END_HEADERS } else { 0 };
                FrameHeader::new(block.len(), FrameKind::Continuation, flags, *stream_id)
                    .encode(buf);
                buf.put_slice(block);
            }
            Self::Unknown { kind, stream_id } => {
                FrameHeader::new(0, FrameKind::Unknown(*kind), 0, *stream_id).encode(buf);
            }
        }
    }
}

/// Decode one frame from the start of `buf`.
///
/// Returns `Ok(None)` when `buf` does not yet hold a whole frame, otherwise
/// the frame and the number of bytes it occupied.
pub fn decode(buf: &[u8], max_frame_size: u32) -> Result<Option<(Frame, usize)>, H2Error> {
    let Some(header) = FrameHeader::decode(buf) else {
        return Ok(None);
    };
    if header.length > max_frame_size {
        return Err(H2Error::frame_size(format!(
            "{} frame of {} bytes exceeds {}",
            header.kind, header.length, max_frame_size
        )));
    }
    let total = FRAME_HEADER_LEN + header.length as usize;
    if buf.len() < total {
        return Ok(None);
    }
    let payload = &buf[FRAME_HEADER_LEN..total];
    let frame = decode_payload(&header, payload)?;
    Ok(Some((frame, total)))
}

fn decode_payload(header: &FrameHeader, payload: &[u8]) -> Result<Frame, H2Error> {
    let stream_id = header.stream_id;
    let kind = header.kind;
    match kind {
        FrameKind::Data
        | FrameKind::Headers
        | FrameKind::Priority
        | FrameKind::RstStream
        | FrameKind::PushPromise
        | FrameKind::Continuation
            if stream_id == 0 =>
        {
            return Err(H2Error::protocol(format!("{kind} on stream 0")));
        }
        FrameKind::Settings | FrameKind::Ping | FrameKind::GoAway if stream_id != 0 => {
            return Err(H2Error::protocol(format!("{kind} on stream {stream_id}")));
        }
        _ => {}
    }

    let frame = match kind {
        FrameKind::Data => Frame::Data {
            stream_id,
            payload: strip_padding(header, payload)?.to_vec(),
            end_stream: header.has(flags::END_STREAM),
            flow_len: header.length,
        },
        FrameKind::Headers => {
            let mut block = strip_padding(header, payload)?;
            if header.has(flags::PRIORITY) {
                if block.len() < 5 {
                    return Err(H2Error::frame_size("HEADERS priority fields truncated"));
                }
                block = &block[5..];
            }
            Frame::Headers {
                stream_id,
                block: block.to_vec(),
                end_stream: header.has(flags::END_STREAM),
                end_headers: header.has(flags::END_HEADERS),
            }
        }
        FrameKind::Priority => {
            if payload.len() != 5 {
                return Err(H2Error::frame_size("PRIORITY payload must be 5 bytes"));
            }
            Frame::Priority { stream_id }
        }
        FrameKind::RstStream => {
            if payload.len() != 4 {
                return Err(H2Error::frame_size("RST_STREAM payload must be 4 bytes"));
            }
            Frame::RstStream {
                stream_id,
                error_code: ErrorCode::from_u32((&payload[..]).get_u32()),
            }
        }
        FrameKind::Settings => {
            let ack = header.has(flags::ACK);
            if ack && !payload.is_empty() {
                return Err(H2Error::frame_size("SETTINGS ack with payload"));
            }
            Frame::Settings {
                ack,
                entries: settings::decode_entries(payload)?,
            }
        }
        FrameKind::PushPromise => {
            let mut data = strip_padding(header, payload)?;
            if data.len() < 4 {
                return Err(H2Error::frame_size("PUSH_PROMISE truncated"));
            }
            let promised_stream_id = data.get_u32() & STREAM_ID_MASK;
            Frame::PushPromise {
                stream_id,
                promised_stream_id,
                block: data.to_vec(),
                end_headers: header.has(flags::END_HEADERS),
            }
        }
        FrameKind::Ping => {
            let opaque: [u8; 8] = payload
                .try_into()
                .map_err(|_| H2Error::frame_size("PING payload must be 8 bytes"))?;
            Frame::Ping {
                ack: header.has(flags::ACK),
                opaque,
            }
        }
        FrameKind::GoAway => {
            if payload.len() < 8 {
                return Err(H2Error::frame_size("GOAWAY truncated"));
            }
            let mut data = payload;
            let last_stream_id = data.get_u32() & STREAM_ID_MASK;
            let error_code = ErrorCode::from_u32(data.get_u32());
            Frame::GoAway {
                last_stream_id,
                error_code,
                debug_data: data.to_vec(),
            }
        }
        FrameKind::WindowUpdate => {
            if payload.len() != 4 {
                return Err(H2Error::frame_size("WINDOW_UPDATE payload must be 4 bytes"));
            }
            let increment = (&payload[..]).get_u32() & STREAM_ID_MASK;
            if increment == 0 {
                return Err(H2Error::protocol("WINDOW_UPDATE with zero increment"));
            }
            Frame::WindowUpdate {
                stream_id,
                increment,
            }
        }
        FrameKind::Continuation => Frame::Continuation {
            stream_id,
            block: payload.to_vec(),
            end_headers: header.has(flags::END_HEADERS),
        },
        FrameKind::Unknown(kind) => Frame::Unknown { kind, stream_id },
    };
    Ok(frame)
}

/// Strip the pad-length octet and trailing padding when PADDED is set.
fn strip_padding<'a>(header: &FrameHeader, payload: &'a [u8]) -> Result<&'a [u8], H2Error> {
    if !header.has(flags::PADDED) {
        return Ok(payload);
    }
    let Some((&pad_len, rest)) = payload.split_first() else {
        return Err(H2Error::frame_size("padded frame without pad length"));
    };
    let pad_len = usize::from(pad_len);
    if pad_len > rest.len() {
        return Err(H2Error::protocol("padding exceeds payload"));
    }
    Ok(&rest[..rest.len() - pad_len])
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::settings::DEFAULT_MAX_FRAME_SIZE;

    fn encoded(frame: &Frame) -> Vec<u8> {
        let mut buf = Vec::new();
        frame.encode(&mut buf);
        buf
    }

    #[test]
    fn header_layout() {
        let mut buf = Vec::new();
        FrameHeader::new(100, FrameKind::Data, flags::END_STREAM, 1).encode(&mut buf);
        assert_eq!(buf, [0, 0, 100, 0x0, 0x1, 0, 0, 0, 1]);
        let header = FrameHeader::decode(&buf).unwrap();
        assert_eq!(header.length, 100);
        assert_eq!(header.kind, FrameKind::Data);
        assert_eq!(header.stream_id, 1);
    }

    #[test]
    fn reserved_bit_is_ignored() {
        let buf = [0, 0, 0, 0x8, 0, 0x80, 0, 0, 3];
        assert_eq!(FrameHeader::decode(&buf).unwrap().stream_id, 3);
    }

    #[test]
    fn incomplete_frame_needs_more() {
        let buf = encoded(&Frame::data(1, b"hello".to_vec(), true));
        assert_eq!(decode(&buf[..4], DEFAULT_MAX_FRAME_SIZE).unwrap(), None);
        assert_eq!(
            decode(&buf[..buf.len() - 1], DEFAULT_MAX_FRAME_SIZE).unwrap(),
            None
        );
        let (frame, used) = decode(&buf, DEFAULT_MAX_FRAME_SIZE).unwrap().unwrap();
        assert_eq!(used, buf.len());
        assert_eq!(frame, Frame::data(1, b"hello".to_vec(), true));
    }

    #[test]
    fn padded_data_keeps_flow_length() {
        // pad length 3, body "ab", 3 bytes of padding
        let mut buf = Vec::new();
        FrameHeader::new(6, FrameKind::Data, flags::PADDED, 1).encode(&mut buf);
        buf.extend_from_slice(&[3, b'a', b'b', 0, 0, 0]);
        let (frame, _) = decode(&buf, DEFAULT_MAX_FRAME_SIZE).unwrap().unwrap();
        match frame {
            Frame::Data {
                payload, flow_len, ..
            } => {
                assert_eq!(payload, b"ab");
                assert_eq!(flow_len, 6);
            }
            other => panic!("expected DATA, got {other:?}"),
        }
    }

    #[test]
    fn excessive_padding_is_protocol_error() {
        let mut buf = Vec::new();
        FrameHeader::new(2, FrameKind::Data, flags::PADDED, 1).encode(&mut buf);
        buf.extend_from_slice(&[5, b'a']);
        assert!(matches!(
            decode(&buf, DEFAULT_MAX_FRAME_SIZE),
            Err(H2Error::Protocol(_))
        ));
    }

    #[test]
    fn headers_priority_fields_are_skipped() {
        let mut buf = Vec::new();
        FrameHeader::new(
            7,
            FrameKind::Headers,
            flags::PRIORITY | flags::END_HEADERS,
            1,
        )
        .encode(&mut buf);
        buf.extend_from_slice(&[0x80, 0, 0, 0, 255, 0x88, 0x89]);
        let (frame, _) = decode(&buf, DEFAULT_MAX_FRAME_SIZE).unwrap().unwrap();
        assert_eq!(
            frame,
            Frame::Headers {
                stream_id: 1,
                block: vec![0x88, 0x89],
                end_stream: false,
                end_headers: true,
            }
        );
    }

    #[test]
    fn oversized_frame_is_rejected() {
        let mut buf = Vec::new();
        FrameHeader::new(DEFAULT_MAX_FRAME_SIZE as usize + 1, FrameKind::Data, 0, 1)
            .encode(&mut buf);
        assert!(matches!(
            decode(&buf, DEFAULT_MAX_FRAME_SIZE),
            Err(H2Error::FrameSize(_))
        ));
    }

    #[test]
    fn stream_zero_rules() {
        let data_on_zero = encoded(&Frame::data(0, Vec::new(), false));
        assert!(decode(&data_on_zero, DEFAULT_MAX_FRAME_SIZE).is_err());

        let mut ping_on_stream = Vec::new();
        FrameHeader::new(8, FrameKind::Ping, 0, 1).encode(&mut ping_on_stream);
        ping_on_stream.extend_from_slice(&[0; 8]);
        assert!(decode(&ping_on_stream, DEFAULT_MAX_FRAME_SIZE).is_err());
    }

    #[test]
    fn settings_entries_and_ack() {
        let frame = Frame::Settings {
            ack: false,
            entries: vec![Setting::max_concurrent_streams(100)],
        };
        let buf = encoded(&frame);
        assert_eq!(buf.len(), FRAME_HEADER_LEN + 6);
        assert_eq!(
            decode(&buf, DEFAULT_MAX_FRAME_SIZE).unwrap().unwrap().0,
            frame
        );

        let mut ack_with_body = Vec::new();
        FrameHeader::new(6, FrameKind::Settings, flags::ACK, 0).encode(&mut ack_with_body);
        ack_with_body.extend_from_slice(&[0, 3, 0, 0, 0, 1]);
        assert!(decode(&ack_with_body, DEFAULT_MAX_FRAME_SIZE).is_err());
    }

    #[test]
    fn goaway_carries_debug_data() {
        let frame = Frame::GoAway {
            last_stream_id: 7,
            error_code: ErrorCode::ENHANCE_YOUR_CALM,
            debug_data: b"slow down".to_vec(),
        };
        let (decoded, _) = decode(&encoded(&frame), DEFAULT_MAX_FRAME_SIZE)
            .unwrap()
            .unwrap();
        assert_eq!(decoded, frame);
    }

    #[test]
    fn zero_window_increment_is_protocol_error() {
        let mut buf = Vec::new();
        FrameHeader::new(4, FrameKind::WindowUpdate, 0, 0).encode(&mut buf);
        buf.extend_from_slice(&[0, 0, 0, 0]);
        assert!(matches!(
            decode(&buf, DEFAULT_MAX_FRAME_SIZE),
            Err(H2Error::Protocol(_))
        ));
    }

    #[test]
    fn unknown_type_is_consumed() {
        let mut buf = Vec::new();
        FrameHeader::new(3, FrameKind::Unknown(0xfa), 0, 0).encode(&mut buf);
        buf.extend_from_slice(b"xyz");
        let (frame, used) = decode(&buf, DEFAULT_MAX_FRAME_SIZE).unwrap().unwrap();
        assert_eq!(used, 12);
        assert_eq!(frame.kind(), FrameKind::Unknown(0xfa));
    }
}
