//! Request and response value objects.
//!
//! Both are plain structs with public fields: mutable field-by-field while
//! a parser fills them in, treated as immutable once handed to a
//! `MessageReader` for serialization. The body is a tagged union; exactly
//! zero or one variant carries data, and an empty body is the same thing as
//! `Content-Length: 0` (the header is suppressed).

use std::any::Any;
use std::collections::HashMap;
use std::path::PathBuf;

use bytes::Bytes;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Method {
    Get,
    Post,
    Options,
}

impl Method {
    pub fn parse(token: &[u8]) -> Option<Method> {
        match token {
            b"GET" => Some(Method::Get),
            b"POST" => Some(Method::Post),
            b"OPTIONS" => Some(Method::Options),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match *self {
            Method::Get => "GET",
            Method::Post => "POST",
            Method::Options => "OPTIONS",
        }
    }
}

/// The handful of content types the service actually serves.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ContentType {
    #[default]
    None,
    Text,
    Json,
    HlsChunk,
    HlsPlaylist,
}

impl ContentType {
    pub fn header_value(&self) -> Option<&'static str> {
        match *self {
            ContentType::None => None,
            ContentType::Text => Some("text/plain"),
            ContentType::Json => Some("application/json"),
            ContentType::HlsChunk => Some("video/MP2T"),
            ContentType::HlsPlaylist => Some("application/vnd.apple.mpegurl"),
        }
    }
}

#[derive(Debug, Clone, Default)]
pub enum Body {
    #[default]
    Empty,
    Str(String),
    Buf(Bytes),
    File(PathBuf),
}

impl Body {
    pub fn is_empty(&self) -> bool {
        matches!(*self, Body::Empty)
    }
}

/// One HTTP request.
///
/// `user_data` is the handler context slot: the URI hook typically parks a
/// classification object here, later hooks and the request-complete handler
/// pick it up. It lives exactly as long as the in-flight message.
pub struct Request {
    pub remote_host: String,
    pub remote_port: u16,
    pub method: Method,
    pub target: String,
    pub headers: HashMap<String, String>,
    pub body: Body,
    pub user_data: Option<Box<dyn Any + Send>>,
}

impl Request {
    pub fn new(method: Method, remote_host: &str, remote_port: u16, target: &str) -> Request {
        Request {
            remote_host: remote_host.to_string(),
            remote_port,
            method,
            target: target.to_string(),
            headers: HashMap::new(),
            body: Body::Empty,
            user_data: None,
        }
    }
}

#[derive(Debug, Default)]
pub struct Response {
    pub code: u16,
    pub headers: HashMap<String, String>,
    pub content_type: ContentType,
    pub body: Body,
}

impl Response {
    pub fn new(code: u16) -> Response {
        Response { code, ..Response::default() }
    }
}

pub fn status_text(code: u16) -> &'static str {
    match code {
        200 => "OK",
        400 => "Bad Request",
        404 => "Not Found",
        411 => "Length Required",
        413 => "Payload Too Large",
        500 => "Internal Error",
        _ => "Unknown",
    }
}
