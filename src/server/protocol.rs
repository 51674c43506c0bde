//! The contract between the engine and the application.

use crate::message::{Request, Response};
use crate::uri::Uri;

/// Verdict of a parsing-checkpoint hook.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Handle {
    /// Not interesting to the handler; the engine applies its default
    /// (for a header: store it verbatim in the header map).
    Ignore,
    /// Consumed by the handler; the engine moves on without storing.
    Success,
    /// Reject the message with this status code. Parsing stops and the
    /// connection goes straight to the write phase.
    Error(u16),
}

/// Server-side application hooks.
///
/// All three run synchronously on the reactor thread that owns the
/// connection, so they must return promptly; anything slow belongs behind
/// the storage collaborator, which is invoked concurrently from every
/// reactor thread and has to be thread-safe on its own.
pub trait Handler: Send + Sync {
    /// Called with the parsed request-target before anything else of the
    /// request exists. The classification/early-rejection point; state for
    /// later hooks goes into `req.user_data`.
    fn uri(&self, _req: &mut Request, _uri: &Uri) -> Handle {
        Handle::Ignore
    }

    /// Called once per header line, after the key/value split and trim.
    /// `Content-Length` never reaches this hook; the engine consumes it.
    fn header(&self, _req: &mut Request, _key: &str, _value: &str) -> Handle {
        Handle::Ignore
    }

    /// Called once the body is complete. Must return a ready response; it
    /// may not perform further non-blocking I/O of its own.
    fn request(&self, req: Request) -> Response;
}
