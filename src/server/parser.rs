//! The request parsing state machine.
//!
//! `feed` is driven once per readiness-triggered read with whatever the
//! socket produced; the wait mode segments the scratch buffer and the
//! transition function consumes one token per terminator. Application hooks
//! fire at the request-target and at every header line, and the
//! request-complete handler runs synchronously as soon as the body is in.
//! Every failure, protocol or hook-rejection alike, funnels through one
//! go-to-error transition that turns it into an empty-body reply and leaves
//! the connection ready for the write phase.

use std::str::from_utf8;
use std::sync::Arc;

use bytes::BytesMut;
use log::warn;

use crate::bytestr::ByteStr;
use crate::error::ProtocolError;
use crate::message::{Body, Method, Request, Response};
use crate::scan::{take_token, Wait};
use crate::server::protocol::{Handle, Handler};
use crate::uri::Uri;
use crate::{INITIAL_BUF_SIZE, MAX_BODY_SIZE, MAX_HEADERS_SIZE, MAX_REQUEST_TARGET};

/// Longest method token we accept before giving up on the peer.
const MAX_METHOD_SIZE: usize = 16;

/// What a `feed` call produced.
pub enum Feed {
    /// The message is still incomplete; keep reading.
    More,
    /// A reply is ready (handler result or synthesized error); switch the
    /// connection to the write phase.
    Reply(Response),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum State {
    ReadMethod,
    ReadUri(Method),
    ReadVersion,
    ReadHeader,
    ReadBody,
    Done,
}

pub struct RequestParser {
    state: State,
    wait: Wait,
    req: Option<Request>,
    body_len: usize,
    handler: Arc<dyn Handler>,
    remote_host: String,
    remote_port: u16,
}

impl RequestParser {
    pub fn new(handler: Arc<dyn Handler>, remote_host: String, remote_port: u16) -> RequestParser {
        RequestParser {
            state: State::ReadMethod,
            wait: Wait::Space,
            req: None,
            body_len: 0,
            handler,
            remote_host,
            remote_port,
        }
    }

    /// Consumes as many complete tokens as the scratch buffer holds.
    /// Unterminated trailing bytes stay in the buffer for the next call, so
    /// the caller may split the inbound stream at any byte boundary.
    pub fn feed(&mut self, scratch: &mut BytesMut) -> Feed {
        loop {
            match take_token(scratch, self.wait) {
                Some(token) => match self.step(token) {
                    Ok(None) => continue,
                    Ok(Some(resp)) => return Feed::Reply(resp),
                    Err(err) => return self.go_error(err),
                },
                None => {
                    if let Err(err) = self.check_pending(scratch.len()) {
                        return self.go_error(err);
                    }
                    return Feed::More;
                }
            }
        }
    }

    /// How much the next socket read should aim for: the exact remainder
    /// when the body length is known, one scratch block otherwise.
    pub fn read_hint(&self, buffered: usize) -> usize {
        match self.wait {
            Wait::Count(n) if n > buffered => n - buffered,
            _ => INITIAL_BUF_SIZE,
        }
    }

    fn step(&mut self, token: BytesMut) -> Result<Option<Response>, ProtocolError> {
        match self.state {
            State::ReadMethod => {
                let method = Method::parse(&token).ok_or(ProtocolError::BadMethod)?;
                self.state = State::ReadUri(method);
                self.wait = Wait::Space;
                Ok(None)
            }
            State::ReadUri(method) => {
                if token.len() > MAX_REQUEST_TARGET {
                    return Err(ProtocolError::TargetTooLong(MAX_REQUEST_TARGET));
                }
                let target = from_utf8(&token).map_err(|_| ProtocolError::BadUri)?;
                let uri = Uri::parse(&token).ok_or(ProtocolError::BadUri)?;
                let mut req =
                    Request::new(method, &self.remote_host, self.remote_port, target);
                match self.handler.uri(&mut req, &uri) {
                    Handle::Error(code) => return Err(ProtocolError::Rejected(code)),
                    Handle::Ignore | Handle::Success => {}
                }
                self.req = Some(req);
                self.state = State::ReadVersion;
                self.wait = Wait::Crlf;
                Ok(None)
            }
            State::ReadVersion => {
                if &token[..] != b"HTTP/1.1" && &token[..] != b"HTTP/1.0" {
                    return Err(ProtocolError::BadVersion);
                }
                self.state = State::ReadHeader;
                self.wait = Wait::Crlf;
                Ok(None)
            }
            State::ReadHeader => {
                if token.is_empty() {
                    return self.end_of_headers();
                }
                self.header_line(&token)?;
                Ok(None)
            }
            State::ReadBody => {
                let body = Body::Buf(token.freeze());
                Ok(Some(self.complete(body)))
            }
            State::Done => Ok(None),
        }
    }

    fn header_line(&mut self, token: &[u8]) -> Result<(), ProtocolError> {
        let mut rest = ByteStr::new(token);
        let key = rest.cut_by(b':').trim();
        if key.is_empty() {
            return Err(ProtocolError::BadHeader);
        }
        let value = rest.trim();

        let key = key.to_str().ok_or(ProtocolError::BadHeader)?;
        if key.eq_ignore_ascii_case("content-length") {
            let len = value.to_u64().ok_or(ProtocolError::BadContentLength)?;
            if len > MAX_BODY_SIZE as u64 {
                return Err(ProtocolError::BodyTooLarge(MAX_BODY_SIZE));
            }
            self.body_len = len as usize;
            return Ok(());
        }

        let value = value.to_str().ok_or(ProtocolError::BadHeader)?;
        let req = self.req.as_mut().expect("request exists past the uri state");
        match self.handler.header(req, key, value) {
            // last header with a given key wins, by design
            Handle::Ignore => {
                req.headers.insert(key.to_string(), value.to_string());
            }
            Handle::Success => {}
            Handle::Error(code) => return Err(ProtocolError::Rejected(code)),
        }
        Ok(())
    }

    fn end_of_headers(&mut self) -> Result<Option<Response>, ProtocolError> {
        let method = match self.req {
            Some(ref req) => req.method,
            None => return Err(ProtocolError::BadMethod),
        };
        match method {
            Method::Post => {
                if self.body_len == 0 {
                    return Err(ProtocolError::LengthRequired);
                }
                self.state = State::ReadBody;
                self.wait = Wait::Count(self.body_len);
                Ok(None)
            }
            Method::Get | Method::Options => {
                if self.body_len > 0 {
                    return Err(ProtocolError::UnexpectedBody);
                }
                Ok(Some(self.complete(Body::Empty)))
            }
        }
    }

    fn complete(&mut self, body: Body) -> Response {
        self.state = State::Done;
        self.wait = Wait::None;
        let mut req = self.req.take().expect("request exists on completion");
        req.body = body;
        self.handler.request(req)
    }

    /// The single error transition: log, drop the half-built request and
    /// hand back an empty-body reply with the mapped status.
    fn go_error(&mut self, err: ProtocolError) -> Feed {
        warn!(
            "{}:{}: {}",
            self.remote_host, self.remote_port, err
        );
        self.state = State::Done;
        self.wait = Wait::None;
        self.req = None;
        Feed::Reply(Response::new(err.status()))
    }

    /// Limits applied to bytes whose terminator has not arrived, so an
    /// endless method or target is cut off without buffering it all.
    fn check_pending(&self, pending: usize) -> Result<(), ProtocolError> {
        match self.state {
            State::ReadMethod if pending > MAX_METHOD_SIZE => Err(ProtocolError::BadMethod),
            State::ReadUri(_) if pending > MAX_REQUEST_TARGET => {
                Err(ProtocolError::TargetTooLong(MAX_REQUEST_TARGET))
            }
            State::ReadVersion | State::ReadHeader if pending > MAX_HEADERS_SIZE => {
                Err(ProtocolError::HeadersTooLarge(MAX_HEADERS_SIZE))
            }
            _ => Ok(()),
        }
    }
}

#[cfg(test)]
mod test {
    use std::collections::HashMap;
    use std::sync::{Arc, Mutex};

    use bytes::BytesMut;

    use super::{Feed, RequestParser};
    use crate::message::{Body, Method, Request, Response};
    use crate::server::protocol::{Handle, Handler};
    use crate::uri::Uri;

    /// Records what the request-complete hook saw, for later inspection.
    #[derive(Default)]
    struct Capture {
        seen: Mutex<Option<(Method, String, HashMap<String, String>, Vec<u8>)>>,
    }

    impl Handler for Capture {
        fn request(&self, req: Request) -> Response {
            let body = match req.body {
                Body::Buf(ref b) => b.to_vec(),
                _ => Vec::new(),
            };
            *self.seen.lock().unwrap() =
                Some((req.method, req.target.clone(), req.headers.clone(), body));
            Response::new(200)
        }
    }

    fn parser(handler: Arc<dyn Handler>) -> RequestParser {
        RequestParser::new(handler, "127.0.0.1".to_string(), 40000)
    }

    fn feed_whole(p: &mut RequestParser, bytes: &[u8]) -> Option<Response> {
        let mut scratch = BytesMut::from(bytes);
        match p.feed(&mut scratch) {
            Feed::Reply(resp) => Some(resp),
            Feed::More => None,
        }
    }

    fn feed_byte_at_a_time(p: &mut RequestParser, bytes: &[u8]) -> Option<Response> {
        let mut scratch = BytesMut::new();
        for &b in bytes {
            scratch.extend_from_slice(&[b]);
            if let Feed::Reply(resp) = p.feed(&mut scratch) {
                return Some(resp);
            }
        }
        None
    }

    const POST: &[u8] =
        b"POST /files HTTP/1.1\r\nX-Id: abc\r\nContent-Length: 5\r\n\r\nhello";

    #[test]
    fn post_with_body() {
        let capture = Arc::new(Capture::default());
        let mut p = parser(capture.clone());
        let resp = feed_whole(&mut p, POST).unwrap();
        assert_eq!(resp.code, 200);

        let seen = capture.seen.lock().unwrap().take().unwrap();
        assert_eq!(seen.0, Method::Post);
        assert_eq!(seen.1, "/files");
        assert_eq!(seen.2.get("X-Id").unwrap(), "abc");
        assert_eq!(seen.3, b"hello");
    }

    #[test]
    fn chunk_boundary_invariance() {
        let whole = Arc::new(Capture::default());
        let resp = feed_whole(&mut parser(whole.clone()), POST).unwrap();
        assert_eq!(resp.code, 200);

        let split = Arc::new(Capture::default());
        let resp = feed_byte_at_a_time(&mut parser(split.clone()), POST).unwrap();
        assert_eq!(resp.code, 200);

        assert_eq!(
            whole.seen.lock().unwrap().take().unwrap(),
            split.seen.lock().unwrap().take().unwrap()
        );
    }

    #[test]
    fn get_request() {
        let capture = Arc::new(Capture::default());
        let mut p = parser(capture.clone());
        let resp =
            feed_whole(&mut p, b"GET /hls/a/live/index.m3u8 HTTP/1.1\r\n\r\n").unwrap();
        assert_eq!(resp.code, 200);
        let seen = capture.seen.lock().unwrap().take().unwrap();
        assert_eq!(seen.0, Method::Get);
        assert!(seen.3.is_empty());
    }

    #[test]
    fn post_without_length_is_rejected() {
        let capture = Arc::new(Capture::default());
        let mut p = parser(capture.clone());
        let resp = feed_whole(&mut p, b"POST /files HTTP/1.1\r\n\r\n").unwrap();
        assert_eq!(resp.code, 400);
        assert!(capture.seen.lock().unwrap().is_none());
    }

    #[test]
    fn get_with_body_is_rejected() {
        let mut p = parser(Arc::new(Capture::default()));
        let resp =
            feed_whole(&mut p, b"GET /x HTTP/1.1\r\nContent-Length: 3\r\n\r\nabc").unwrap();
        assert_eq!(resp.code, 400);
    }

    #[test]
    fn oversized_target_rejected_without_handler() {
        let capture = Arc::new(Capture::default());
        let mut p = parser(capture.clone());
        let mut raw = b"GET /".to_vec();
        raw.extend(std::iter::repeat(b'a').take(300));
        raw.extend_from_slice(b" HTTP/1.1\r\n\r\n");
        let resp = feed_whole(&mut p, &raw).unwrap();
        assert_eq!(resp.code, 414);
        assert!(capture.seen.lock().unwrap().is_none());
    }

    #[test]
    fn unknown_method_rejected() {
        let mut p = parser(Arc::new(Capture::default()));
        let resp = feed_whole(&mut p, b"BREW /pot HTTP/1.1\r\n\r\n").unwrap();
        assert_eq!(resp.code, 400);
    }

    #[test]
    fn bad_content_length_rejected() {
        let mut p = parser(Arc::new(Capture::default()));
        let resp =
            feed_whole(&mut p, b"POST /f HTTP/1.1\r\nContent-Length: 5x\r\n\r\n").unwrap();
        assert_eq!(resp.code, 400);
    }

    #[test]
    fn duplicate_header_last_wins() {
        let capture = Arc::new(Capture::default());
        let mut p = parser(capture.clone());
        feed_whole(&mut p, b"GET /x HTTP/1.1\r\nX-Id: one\r\nX-Id: two\r\n\r\n").unwrap();
        let seen = capture.seen.lock().unwrap().take().unwrap();
        assert_eq!(seen.2.get("X-Id").unwrap(), "two");
    }

    /// Consumes `X-Seq` into user_data, rejects `X-Forbidden`.
    struct Picky;

    impl Handler for Picky {
        fn uri(&self, req: &mut Request, uri: &Uri) -> Handle {
            if uri.path_items().is_empty() {
                return Handle::Error(404);
            }
            req.user_data = Some(Box::new(0i64));
            Handle::Success
        }

        fn header(&self, req: &mut Request, key: &str, value: &str) -> Handle {
            match key {
                "X-Seq" => match value.parse::<i64>() {
                    Ok(seq) => {
                        req.user_data = Some(Box::new(seq));
                        Handle::Success
                    }
                    Err(_) => Handle::Error(400),
                },
                "X-Forbidden" => Handle::Error(403),
                _ => Handle::Ignore,
            }
        }

        fn request(&self, req: Request) -> Response {
            let seq = req
                .user_data
                .as_ref()
                .and_then(|d| d.downcast_ref::<i64>())
                .copied()
                .unwrap_or(-1);
            let mut resp = Response::new(200);
            resp.body = Body::Str(seq.to_string());
            assert!(!req.headers.contains_key("X-Seq"), "consumed header stored");
            resp
        }
    }

    #[test]
    fn consumed_header_reaches_user_data_not_map() {
        let mut p = parser(Arc::new(Picky));
        let resp =
            feed_whole(&mut p, b"GET /x HTTP/1.1\r\nX-Seq: 17\r\nX-Other: v\r\n\r\n").unwrap();
        assert_eq!(resp.code, 200);
        match resp.body {
            Body::Str(s) => assert_eq!(s, "17"),
            _ => panic!("expected string body"),
        }
    }

    #[test]
    fn header_hook_rejection_short_circuits() {
        let mut p = parser(Arc::new(Picky));
        let resp =
            feed_whole(&mut p, b"GET /x HTTP/1.1\r\nX-Forbidden: 1\r\n\r\n").unwrap();
        assert_eq!(resp.code, 403);
    }
}
