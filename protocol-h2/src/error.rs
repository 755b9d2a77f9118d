use std::fmt;

/// HTTP/2 error code carried by RST_STREAM and GOAWAY (RFC 9113 Section 7).
///
/// Kept as an open `u32` because peers may send codes this crate does not
/// know; unknown codes are reported verbatim.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ErrorCode(u32);

impl ErrorCode {
    pub const NO_ERROR: Self = Self(0x0);
    pub const PROTOCOL_ERROR: Self = Self(0x1);
    pub const INTERNAL_ERROR: Self = Self(0x2);
    pub const FLOW_CONTROL_ERROR: Self = Self(0x3);
    pub const SETTINGS_TIMEOUT: Self = Self(0x4);
    pub const STREAM_CLOSED: Self = Self(0x5);
    pub const FRAME_SIZE_ERROR: Self = Self(0x6);
    pub const REFUSED_STREAM: Self = Self(0x7);
    pub const CANCEL: Self = Self(0x8);
    pub const COMPRESSION_ERROR: Self = Self(0x9);
    pub const CONNECT_ERROR: Self = Self(0xa);
    pub const ENHANCE_YOUR_CALM: Self = Self(0xb);
    pub const INADEQUATE_SECURITY: Self = Self(0xc);
    pub const HTTP_1_1_REQUIRED: Self = Self(0xd);

    pub const fn from_u32(code: u32) -> Self {
        Self(code)
    }

    pub const fn as_u32(self) -> u32 {
        self.0
    }

    /// Registered name of the code, if it is one of the RFC 9113 codes.
    pub fn name(self) -> Option<&'static str> {
        let name = match self.0 {
            0x0 => "NO_ERROR",
            0x1 => "PROTOCOL_ERROR",
            0x2 => "INTERNAL_ERROR",
            0x3 => "FLOW_CONTROL_ERROR",
            0x4 => "SETTINGS_TIMEOUT",
            0x5 => "STREAM_CLOSED",
            0x6 => "FRAME_SIZE_ERROR",
            0x7 => "REFUSED_STREAM",
            0x8 => "CANCEL",
            0x9 => "COMPRESSION_ERROR",
            0xa => "CONNECT_ERROR",
            0xb => "ENHANCE_YOUR_CALM",
            0xc => "INADEQUATE_SECURITY",
            0xd => "HTTP_1_1_REQUIRED",
            _ => return None,
        };
        Some(name)
    }
}

impl fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.name() {
            Some(name) => f.write_str(name),
            None => write!(f, "0x{:x}", self.0),
        }
    }
}

/// Fatal session errors. Any of these ends the session: the caller is
/// expected to tear the connection down.
#[derive(Debug, thiserror::Error)]
pub enum H2Error {
    /// A frame's length does not fit its type or the negotiated maximum.
    #[error("frame size error: {0}")]
    FrameSize(String),

    /// The peer violated the framing or stream rules.
    #[error("protocol error: {0}")]
    Protocol(String),

    /// An HPACK header block could not be decoded.
    #[error("header compression error: {0}")]
    Compression(String),

    /// A flow-control window was overrun or overflowed.
    #[error("flow control error")]
    FlowControl,

    /// A frame arrived for a stream that can no longer accept it.
    #[error("stream {0} closed")]
    StreamClosed(u32),

    /// The session has terminated and accepts no further work.
    #[error("session terminated")]
    Terminated,
}

impl H2Error {
    /// Error code a GOAWAY for this error would carry.
    pub fn code(&self) -> ErrorCode {
        match self {
            Self::FrameSize(_) => ErrorCode::FRAME_SIZE_ERROR,
            Self::Protocol(_) => ErrorCode::PROTOCOL_ERROR,
            Self::Compression(_) => ErrorCode::COMPRESSION_ERROR,
            Self::FlowControl => ErrorCode::FLOW_CONTROL_ERROR,
            Self::StreamClosed(_) => ErrorCode::STREAM_CLOSED,
            Self::Terminated => ErrorCode::INTERNAL_ERROR,
        }
    }

    pub(crate) fn protocol(msg: impl Into<String>) -> Self {
        Self::Protocol(msg.into())
    }

    pub(crate) fn frame_size(msg: impl Into<String>) -> Self {
        Self::FrameSize(msg.into())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn known_codes_display_by_name() {
        assert_eq!(ErrorCode::NO_ERROR.to_string(), "NO_ERROR");
        assert_eq!(ErrorCode::REFUSED_STREAM.to_string(), "REFUSED_STREAM");
    }

    #[test]
    fn unknown_code_displays_hex() {
        let code = ErrorCode::from_u32(0xff);
        assert_eq!(code.name(), None);
        assert_eq!(code.to_string(), "0xff");
        assert_eq!(code.as_u32(), 0xff);
    }

    #[test]
    fn error_maps_to_goaway_code() {
        assert_eq!(H2Error::FlowControl.code(), ErrorCode::FLOW_CONTROL_ERROR);
        assert_eq!(
            H2Error::Compression("bad".into()).code(),
            ErrorCode::COMPRESSION_ERROR
        );
    }
}
