//! The response parsing state machine, mirror image of the server side:
//! status line instead of request line, no hooks, a missing
//! `Content-Length` simply means an empty body.

use bytes::BytesMut;

use crate::bytestr::ByteStr;
use crate::error::ProtocolError;
use crate::message::{Body, Response};
use crate::scan::{take_token, Wait};
use crate::{INITIAL_BUF_SIZE, MAX_BODY_SIZE, MAX_HEADERS_SIZE};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum State {
    ReadVersion,
    ReadCode,
    ReadReason,
    ReadHeader,
    ReadBody,
    Done,
}

pub struct ResponseParser {
    state: State,
    wait: Wait,
    resp: Response,
    body_len: usize,
}

impl Default for ResponseParser {
    fn default() -> ResponseParser {
        ResponseParser::new()
    }
}

impl ResponseParser {
    pub fn new() -> ResponseParser {
        ResponseParser {
            state: State::ReadVersion,
            wait: Wait::Space,
            resp: Response::new(0),
            body_len: 0,
        }
    }

    /// Consumes complete tokens from the scratch buffer. `Ok(None)` means
    /// the message is still incomplete; malformed input surfaces as a
    /// `ProtocolError` for the completion callback to translate.
    pub fn feed(&mut self, scratch: &mut BytesMut) -> Result<Option<Response>, ProtocolError> {
        loop {
            match take_token(scratch, self.wait) {
                Some(token) => {
                    if let Some(resp) = self.step(token)? {
                        return Ok(Some(resp));
                    }
                }
                None => {
                    self.check_pending(scratch.len())?;
                    return Ok(None);
                }
            }
        }
    }

    pub fn read_hint(&self, buffered: usize) -> usize {
        match self.wait {
            Wait::Count(n) if n > buffered => n - buffered,
            _ => INITIAL_BUF_SIZE,
        }
    }

    fn step(&mut self, token: BytesMut) -> Result<Option<Response>, ProtocolError> {
        match self.state {
            State::ReadVersion => {
                if !token.starts_with(b"HTTP/1.") {
                    return Err(ProtocolError::BadStatusLine);
                }
                self.state = State::ReadCode;
                self.wait = Wait::Space;
                Ok(None)
            }
            State::ReadCode => {
                let code = ByteStr::new(&token)
                    .to_u64()
                    .filter(|&c| (100..600).contains(&c))
                    .ok_or(ProtocolError::BadStatusLine)?;
                self.resp.code = code as u16;
                self.state = State::ReadReason;
                self.wait = Wait::Crlf;
                Ok(None)
            }
            State::ReadReason => {
                // reason phrase is cosmetic, the code already said it all
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
                self.resp.body = Body::Buf(token.freeze());
                self.state = State::Done;
                self.wait = Wait::None;
                Ok(Some(std::mem::take(&mut self.resp)))
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
        self.resp
            .headers
            .insert(key.to_string(), value.to_string());
        Ok(())
    }

    fn end_of_headers(&mut self) -> Result<Option<Response>, ProtocolError> {
        if self.body_len > 0 {
            self.state = State::ReadBody;
            self.wait = Wait::Count(self.body_len);
            return Ok(None);
        }
        self.state = State::Done;
        self.wait = Wait::None;
        Ok(Some(std::mem::take(&mut self.resp)))
    }

    fn check_pending(&self, pending: usize) -> Result<(), ProtocolError> {
        match self.state {
            State::ReadVersion | State::ReadCode if pending > 64 => {
                Err(ProtocolError::BadStatusLine)
            }
            State::ReadReason | State::ReadHeader if pending > MAX_HEADERS_SIZE => {
                Err(ProtocolError::HeadersTooLarge(MAX_HEADERS_SIZE))
            }
            _ => Ok(()),
        }
    }
}
