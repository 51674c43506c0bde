//! Resumable serialization of a fully-built message.
//!
//! A `MessageReader` renders the start line and header block eagerly, then
//! hands out fragments on demand: byte slices for the head and in-memory
//! bodies, a `(fd, offset, len)` triple for file bodies so the worker can
//! `sendfile` without copying. It performs no socket I/O itself; the caller
//! does the write and reports back whatever the kernel accepted, so
//! backpressure is handled by simply not advancing past it.

use std::fmt::Write as _;
use std::fs::File;
use std::io;
use std::os::unix::io::{AsRawFd, RawFd};

use bytes::Bytes;

use crate::message::{status_text, Body, Request, Response};

/// One output fragment.
#[derive(Debug, Clone, Copy)]
pub enum Chunk<'a> {
    Slice(&'a [u8]),
    File { fd: RawFd, offset: u64, len: u64 },
}

enum Source {
    None,
    Str(String),
    Buf(Bytes),
    File(File),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum State {
    Head,
    Body,
    Done,
}

pub struct MessageReader {
    head: String,
    head_sent: usize,
    source: Source,
    body_size: u64,
    body_sent: u64,
    state: State,
}

impl MessageReader {
    /// Builds a reader for a server reply. Opening or stat'ing a file body
    /// fails the whole construction; the caller substitutes
    /// [`MessageReader::error`] instead of sending a broken message.
    pub fn response(resp: Response) -> io::Result<MessageReader> {
        let (source, body_size) = Source::from_body(resp.body)?;

        let mut head = String::with_capacity(128);
        let _ = write!(head, "HTTP/1.1 {} {}\r\n", resp.code, status_text(resp.code));
        for (key, value) in &resp.headers {
            let _ = write!(head, "{}: {}\r\n", key, value);
        }
        head.push_str("Access-Control-Allow-Origin: *\r\n");
        if body_size > 0 {
            let _ = write!(head, "Content-Length: {}\r\n", body_size);
            if let Some(ctype) = resp.content_type.header_value() {
                let _ = write!(head, "Content-Type: {}\r\n", ctype);
            }
        }
        head.push_str("\r\n");

        Ok(MessageReader::new(head, source, body_size))
    }

    /// Builds a reader for an outbound client request.
    pub fn request(req: Request) -> io::Result<MessageReader> {
        let (source, body_size) = Source::from_body(req.body)?;

        let mut head = String::with_capacity(128);
        let _ = write!(head, "{} {} HTTP/1.1\r\n", req.method.as_str(), req.target);
        for (key, value) in &req.headers {
            let _ = write!(head, "{}: {}\r\n", key, value);
        }
        let _ = write!(head, "Host: {}:{}\r\n", req.remote_host, req.remote_port);
        if body_size > 0 {
            let _ = write!(head, "Content-Length: {}\r\n", body_size);
        }
        head.push_str("\r\n");

        Ok(MessageReader::new(head, source, body_size))
    }

    /// An empty-body reply with the given status. Never fails, which is the
    /// point: this is the fallback when building the real reader failed.
    pub fn error(code: u16) -> MessageReader {
        let mut head = String::with_capacity(64);
        let _ = write!(head, "HTTP/1.1 {} {}\r\n", code, status_text(code));
        head.push_str("Access-Control-Allow-Origin: *\r\n\r\n");
        MessageReader::new(head, Source::None, 0)
    }

    fn new(head: String, source: Source, body_size: u64) -> MessageReader {
        MessageReader {
            head,
            head_sent: 0,
            source,
            body_size,
            body_sent: 0,
            state: State::Head,
        }
    }

    pub fn has_chunks(&self) -> bool {
        self.state != State::Done
    }

    /// The next unsent fragment. Stable across repeated calls until
    /// `advance` moves the cursor.
    pub fn chunk(&self) -> Chunk<'_> {
        match self.state {
            State::Head => Chunk::Slice(&self.head.as_bytes()[self.head_sent..]),
            State::Body => {
                let offset = self.body_sent;
                let remaining = self.body_size - self.body_sent;
                match self.source {
                    Source::Str(ref s) => Chunk::Slice(&s.as_bytes()[offset as usize..]),
                    Source::Buf(ref b) => Chunk::Slice(&b[offset as usize..]),
                    Source::File(ref f) => Chunk::File {
                        fd: f.as_raw_fd(),
                        offset,
                        len: remaining,
                    },
                    Source::None => Chunk::Slice(&[]),
                }
            }
            State::Done => Chunk::Slice(&[]),
        }
    }

    /// Records `n` bytes as transmitted. The state only ever moves forward:
    /// head, then body, then done.
    pub fn advance(&mut self, n: usize) {
        match self.state {
            State::Head => {
                self.head_sent += n;
                if self.head_sent >= self.head.len() {
                    self.state = if self.body_size > 0 { State::Body } else { State::Done };
                }
            }
            State::Body => {
                self.body_sent += n as u64;
                if self.body_sent >= self.body_size {
                    self.state = State::Done;
                }
            }
            State::Done => {}
        }
    }
}

impl Source {
    fn from_body(body: Body) -> io::Result<(Source, u64)> {
        match body {
            Body::Empty => Ok((Source::None, 0)),
            Body::Str(s) => {
                let size = s.len() as u64;
                Ok((Source::Str(s), size))
            }
            Body::Buf(b) => {
                let size = b.len() as u64;
                Ok((Source::Buf(b), size))
            }
            Body::File(path) => {
                let file = File::open(&path)?;
                let size = file.metadata()?.len();
                Ok((Source::File(file), size))
            }
        }
    }
}

#[cfg(test)]
mod test {
    use std::io::Write;

    use super::{Chunk, MessageReader};
    use crate::message::{Body, ContentType, Method, Request, Response};

    fn drain(reader: &mut MessageReader) -> Vec<u8> {
        let mut out = Vec::new();
        while reader.has_chunks() {
            let n = match reader.chunk() {
                Chunk::Slice(s) => {
                    out.extend_from_slice(s);
                    s.len()
                }
                Chunk::File { .. } => panic!("unexpected file chunk"),
            };
            reader.advance(n);
        }
        out
    }

    #[test]
    fn string_body_response() {
        let mut resp = Response::new(200);
        resp.content_type = ContentType::Text;
        resp.body = Body::Str("hello".to_string());

        let mut reader = MessageReader::response(resp).unwrap();
        let out = String::from_utf8(drain(&mut reader)).unwrap();

        assert!(out.starts_with("HTTP/1.1 200 OK\r\n"));
        assert!(out.contains("Content-Length: 5\r\n"));
        assert!(out.contains("Content-Type: text/plain\r\n"));
        assert!(out.ends_with("\r\n\r\nhello"));
    }

    #[test]
    fn empty_body_suppresses_content_length() {
        let mut reader = MessageReader::response(Response::new(404)).unwrap();
        let out = String::from_utf8(drain(&mut reader)).unwrap();
        assert!(out.starts_with("HTTP/1.1 404 Not Found\r\n"));
        assert!(!out.contains("Content-Length"));
        assert!(out.ends_with("\r\n\r\n"));
    }

    #[test]
    fn request_head_carries_host() {
        let mut req = Request::new(Method::Get, "127.0.0.1", 8080, "/hls/a/live/1.ts");
        req.headers.insert("X-Id".to_string(), "abc".to_string());

        let mut reader = MessageReader::request(req).unwrap();
        let out = String::from_utf8(drain(&mut reader)).unwrap();
        assert!(out.starts_with("GET /hls/a/live/1.ts HTTP/1.1\r\n"));
        assert!(out.contains("Host: 127.0.0.1:8080\r\n"));
        assert!(out.contains("X-Id: abc\r\n"));
    }

    #[test]
    fn one_byte_advances_report_correct_remainder() {
        let mut resp = Response::new(200);
        resp.body = Body::Buf(bytes::Bytes::from_static(b"abcdef"));
        let mut reader = MessageReader::response(resp).unwrap();

        let mut out = Vec::new();
        while reader.has_chunks() {
            match reader.chunk() {
                Chunk::Slice(s) => {
                    assert!(!s.is_empty());
                    out.push(s[0]);
                    reader.advance(1);
                }
                Chunk::File { .. } => unreachable!(),
            }
        }
        let text = String::from_utf8(out).unwrap();
        assert!(text.ends_with("abcdef"));
    }

    #[test]
    fn file_body_emits_exactly_file_size() {
        let path = std::env::temp_dir().join(format!("rill-reader-{}.ts", std::process::id()));
        let payload = vec![0x47u8; 1880];
        std::fs::File::create(&path)
            .unwrap()
            .write_all(&payload)
            .unwrap();

        let mut resp = Response::new(200);
        resp.content_type = ContentType::HlsChunk;
        resp.body = Body::File(path.clone());
        let mut reader = MessageReader::response(resp).unwrap();

        // flush the head first
        while reader.has_chunks() {
            match reader.chunk() {
                Chunk::Slice(s) => {
                    let len = s.len();
                    reader.advance(len);
                }
                Chunk::File { .. } => break,
            }
        }

        // then "write" the file one byte at a time
        let mut total = 0u64;
        while reader.has_chunks() {
            match reader.chunk() {
                Chunk::File { offset, len, .. } => {
                    assert_eq!(offset, total);
                    assert_eq!(len, payload.len() as u64 - total);
                    reader.advance(1);
                    total += 1;
                }
                Chunk::Slice(_) => unreachable!(),
            }
        }
        assert_eq!(total, payload.len() as u64);
        std::fs::remove_file(&path).unwrap();
    }

    #[test]
    fn missing_file_fails_construction() {
        let mut resp = Response::new(200);
        resp.body = Body::File("/nonexistent/rill/chunk.ts".into());
        assert!(MessageReader::response(resp).is_err());
        // and the substitute still renders
        let mut fallback = MessageReader::error(500);
        let out = String::from_utf8(drain(&mut fallback)).unwrap();
        assert!(out.starts_with("HTTP/1.1 500 Internal Error\r\n"));
    }
}
