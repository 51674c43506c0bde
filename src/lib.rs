//! A non-blocking HTTP/1.1 engine for HLS chunk streaming, built directly
//! on mio readiness polling.
//!
//! Each worker thread owns one poll instance and every connection ever
//! assigned to it; parsing and serialization are resumable state machines
//! fed whatever the socket produced, at any byte boundary. Application
//! logic plugs in through the [`server::Handler`] hooks and the
//! [`storage::SegmentStore`] contract.
//!
//! One message per connection: no keep-alive, no pipelining, no chunked
//! transfer encoding. The peer gets its response and the socket closes.

pub mod bytestr;
pub mod client;
mod connection;
pub mod error;
pub mod message;
pub mod reader;
mod scan;
pub mod server;
pub mod storage;
pub mod uri;
mod worker;

pub use crate::bytestr::ByteStr;
pub use crate::client::Client;
pub use crate::error::ProtocolError;
pub use crate::message::{Body, ContentType, Method, Request, Response};
pub use crate::reader::{Chunk, MessageReader};
pub use crate::server::{Handle, Handler, Server};
pub use crate::uri::Uri;

/// Longest request-target we accept, in bytes.
pub const MAX_REQUEST_TARGET: usize = 200;
/// Upper bound on the unterminated header section; too large a buffer is of
/// limited use for the requests this service actually sees.
pub const MAX_HEADERS_SIZE: usize = 16384;
/// Not "enough for everyone", but media segments never get close.
pub const MAX_BODY_SIZE: usize = 104_856_700;
/// Initial scratch allocation per connection; body reads grow it to the
/// exact declared length.
pub const INITIAL_BUF_SIZE: usize = 2048;
