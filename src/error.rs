use quick_error::quick_error;

quick_error! {
    /// Everything that can go wrong while parsing an inbound message.
    ///
    /// Each variant maps onto the status code of the error response through
    /// `status()`; the worker never sees these as panics, only as a reply
    /// that happens to be a 4xx/5xx.
    #[derive(Debug, PartialEq, Eq)]
    pub enum ProtocolError {
        BadMethod {
            display("unknown request method")
        }
        TargetTooLong(limit: usize) {
            display("request-target is longer than {} bytes", limit)
        }
        BadUri {
            display("malformed request-target")
        }
        BadVersion {
            display("unsupported protocol version")
        }
        HeadersTooLarge(limit: usize) {
            display("header section is larger than {} bytes", limit)
        }
        BadHeader {
            display("malformed header line")
        }
        BadContentLength {
            display("invalid `Content-Length` value")
        }
        LengthRequired {
            display("POST without `Content-Length`")
        }
        UnexpectedBody {
            display("GET with a declared body")
        }
        BodyTooLarge(limit: usize) {
            display("declared body is larger than {} bytes", limit)
        }
        BadStatusLine {
            display("malformed status line")
        }
        Rejected(code: u16) {
            display("rejected by handler with status {}", code)
        }
    }
}

impl ProtocolError {
    /// Status code of the response this error turns into.
    pub fn status(&self) -> u16 {
        use self::ProtocolError::*;
        match *self {
            BadMethod => 400,
            TargetTooLong(_) => 414,
            BadUri => 400,
            BadVersion => 400,
            HeadersTooLarge(_) => 431,
            BadHeader => 400,
            BadContentLength => 400,
            LengthRequired => 400,
            UnexpectedBody => 400,
            BodyTooLarge(_) => 413,
            BadStatusLine => 400,
            Rejected(code) => code,
        }
    }
}
