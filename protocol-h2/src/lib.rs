//! Sans-IO HTTP/2 client session.
//!
//! The caller owns the transport. It writes [`CLIENT_PREFACE`], feeds
//! received plaintext into [`Session::mem_recv`] and lets [`Session::send`]
//! hand serialized frames back through [`SessionCallbacks::send`]. Every
//! frame the session sends or receives is reported through the same
//! callback trait. HPACK is provided by the `hpack` crate.
//!
//! # Architecture
//!
//! ```text
//!   TLS plaintext
//!        |
//!   +----v----------+
//!   | protocol-h2   |  framing, flow control, HPACK
//!   | Session       |  SessionCallbacks: before_frame_send, on_frame_recv,
//!   +---------------+  on_data_chunk_recv, on_stream_close
//! ```
//!
//! # Example
//!
//! ```rust,ignore
//! use protocol_h2::{CLIENT_PREFACE, HeaderField, RequestTag, Session, Setting};
//!
//! let mut session = Session::client();
//! transport.write(CLIENT_PREFACE);
//! session.submit_settings(&[Setting::max_concurrent_streams(100)])?;
//! session.submit_request(
//!     vec![
//!         HeaderField::new(":method", "GET"),
//!         HeaderField::new(":scheme", "https"),
//!         HeaderField::new(":authority", "example.com"),
//!         HeaderField::new(":path", "/"),
//!     ],
//!     RequestTag(1),
//! )?;
//! session.send(&mut handlers)?;
//!
//! // Later, for every chunk of received plaintext:
//! session.mem_recv(&plaintext, &mut handlers)?;
//! session.send(&mut handlers)?;
//! ```

pub mod error;
pub mod flowcontrol;
pub mod frame;
pub mod session;
pub mod settings;
mod stream;

pub use error::{ErrorCode, H2Error};
pub use frame::{Frame, FrameKind};
pub use session::{
    CLIENT_PREFACE, FrameInfo, HeaderField, HeadersCategory, ReceivedFrame, RequestTag, Session,
    SessionCallbacks,
};
pub use settings::{Setting, SettingId, Settings};
pub use stream::StreamState;
