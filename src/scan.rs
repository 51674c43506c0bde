//! Wait-mode segmentation of the inbound scratch buffer.
//!
//! The parsers never look at raw bytes directly: the current wait mode
//! decides how the buffer is cut, `take_token` slices out exactly one
//! complete token per terminator found, and whatever has no terminator yet
//! simply stays in the buffer for the next read. Segmentation and state
//! transition stay separate, which is what makes the machines insensitive
//! to how the peer happens to fragment its writes.

use bytes::BytesMut;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Wait {
    /// Up to a single ASCII space (method and request-target boundaries).
    Space,
    /// Up to a CRLF pair (lines and headers). A CR not followed by LF is
    /// ordinary token data.
    Crlf,
    /// Exactly this many bytes (fixed-length body).
    Count(usize),
    /// Terminal, nothing more is expected.
    None,
}

/// Cuts the next complete token off the front of `buf`, consuming its
/// terminator. Returns `None` when the terminator has not arrived yet.
pub fn take_token(buf: &mut BytesMut, wait: Wait) -> Option<BytesMut> {
    match wait {
        Wait::Space => {
            let pos = buf.iter().position(|&b| b == b' ')?;
            let token = buf.split_to(pos);
            let _ = buf.split_to(1);
            Some(token)
        }
        Wait::Crlf => {
            let pos = buf.windows(2).position(|w| w == b"\r\n")?;
            let token = buf.split_to(pos);
            let _ = buf.split_to(2);
            Some(token)
        }
        Wait::Count(n) => {
            if buf.len() < n {
                return None;
            }
            Some(buf.split_to(n))
        }
        Wait::None => None,
    }
}

#[cfg(test)]
mod test {
    use bytes::BytesMut;

    use super::{take_token, Wait};

    #[test]
    fn space_token() {
        let mut buf = BytesMut::from(&b"POST /files HTTP/1.1\r\n"[..]);
        assert_eq!(take_token(&mut buf, Wait::Space).unwrap(), "POST");
        assert_eq!(take_token(&mut buf, Wait::Space).unwrap(), "/files");
        assert_eq!(take_token(&mut buf, Wait::Crlf).unwrap(), "HTTP/1.1");
        assert!(buf.is_empty());
    }

    #[test]
    fn crlf_waits_for_the_pair() {
        let mut buf = BytesMut::from(&b"X-Id: abc\r"[..]);
        assert!(take_token(&mut buf, Wait::Crlf).is_none());
        assert_eq!(buf.len(), 10);
        buf.extend_from_slice(b"\n");
        assert_eq!(take_token(&mut buf, Wait::Crlf).unwrap(), "X-Id: abc");
    }

    #[test]
    fn lone_cr_is_data() {
        let mut buf = BytesMut::from(&b"a\rb\r\n"[..]);
        assert_eq!(take_token(&mut buf, Wait::Crlf).unwrap(), "a\rb");
    }

    #[test]
    fn count_is_exact() {
        let mut buf = BytesMut::from(&b"hel"[..]);
        assert!(take_token(&mut buf, Wait::Count(5)).is_none());
        buf.extend_from_slice(b"lo");
        assert_eq!(take_token(&mut buf, Wait::Count(5)).unwrap(), "hello");
    }

    #[test]
    fn empty_header_line() {
        let mut buf = BytesMut::from(&b"\r\nbody"[..]);
        let token = take_token(&mut buf, Wait::Crlf).unwrap();
        assert!(token.is_empty());
        assert_eq!(&buf[..], b"body");
    }
}
