//! Per-stream state tracking (RFC 9113 Section 5.1).

use crate::flowcontrol::Window;

/// State of a client-initiated stream.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StreamState {
    /// Request sent without END_STREAM.
    Open,
    /// We sent END_STREAM.
    HalfClosedLocal,
    /// Peer sent END_STREAM.
    HalfClosedRemote,
    Closed,
}

impl StreamState {
    /// State after the local side sends END_STREAM.
    pub fn close_local(self) -> Self {
        match self {
            Self::HalfClosedRemote | Self::Closed => Self::Closed,
            _ => Self::HalfClosedLocal,
        }
    }

    /// State after the peer sends END_STREAM.
    pub fn close_remote(self) -> Self {
        match self {
            Self::HalfClosedLocal | Self::Closed => Self::Closed,
            _ => Self::HalfClosedRemote,
        }
    }

    /// Whether the peer may still send frames on the stream.
    pub fn accepts_remote(self) -> bool {
        matches!(self, Self::Open | Self::HalfClosedLocal)
    }
}

pub(crate) struct StreamEntry {
    pub state: StreamState,
    pub recv_window: Window,
    pub send_window: Window,
    /// A final (non-1xx) response header block has been received.
    pub response_seen: bool,
}

impl StreamEntry {
    pub fn new(recv_window: u32, send_window: u32) -> Self {
        Self {
            state: StreamState::Open,
            recv_window: Window::new(recv_window),
            send_window: Window::new(send_window),
            response_seen: false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn both_halves_close_the_stream() {
        let state = StreamState::Open.close_local();
        assert_eq!(state, StreamState::HalfClosedLocal);
        assert!(state.accepts_remote());
        let state = state.close_remote();
        assert_eq!(state, StreamState::Closed);
        assert!(!state.accepts_remote());
    }

    #[test]
    fn remote_close_first() {
        let state = StreamState::Open.close_remote();
        assert_eq!(state, StreamState::HalfClosedRemote);
        assert!(!state.accepts_remote());
        assert_eq!(state.close_local(), StreamState::Closed);
    }
}
