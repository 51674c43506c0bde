//! Non-owning byte spans used by the line/header/uri parsing code.
//!
//! All operations are cursor movements over one borrowed slice, so the hot
//! path never allocates. The only way to tell "empty field" apart from
//! "delimiter not found" in `cut_by` is whether the span shrank, which is
//! exactly what the callers rely on.

use std::fmt;

#[derive(Clone, Copy, PartialEq, Eq)]
pub struct ByteStr<'a>(&'a [u8]);

impl<'a> ByteStr<'a> {
    pub fn new(buf: &'a [u8]) -> ByteStr<'a> {
        ByteStr(buf)
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn as_bytes(&self) -> &'a [u8] {
        self.0
    }

    pub fn to_str(&self) -> Option<&'a str> {
        std::str::from_utf8(self.0).ok()
    }

    pub fn find(&self, ch: u8) -> Option<usize> {
        self.0.iter().position(|&b| b == ch)
    }

    /// Strips leading and trailing ASCII space (0x20). Nothing else is
    /// considered whitespace here; header values keep their tabs.
    pub fn trim(self) -> ByteStr<'a> {
        let mut buf = self.0;
        while let Some((&b' ', rest)) = buf.split_first() {
            buf = rest;
        }
        while let Some((&b' ', rest)) = buf.split_last() {
            buf = rest;
        }
        ByteStr(buf)
    }

    /// The sub-span before the first `ch`, or the empty span when `ch` is
    /// missing or is the very first byte.
    pub fn sub_to(&self, ch: u8) -> ByteStr<'a> {
        if self.0.first() == Some(&ch) {
            return ByteStr(&[]);
        }
        match self.find(ch) {
            Some(pos) => ByteStr(&self.0[..pos]),
            None => ByteStr(&[]),
        }
    }

    /// Cuts off and returns the sub-span before the first `ch`, advancing
    /// self past the delimiter. A leading delimiter is consumed on its own
    /// (empty result, span shrinks by one); a missing delimiter leaves self
    /// untouched (empty result, same length).
    pub fn cut_by(&mut self, ch: u8) -> ByteStr<'a> {
        let res = self.sub_to(ch);
        if !res.is_empty() {
            self.0 = &self.0[res.len() + 1..];
        } else if self.0.first() == Some(&ch) {
            self.0 = &self.0[1..];
        }
        res
    }

    /// Splits on `ch`, collapsing empty items: leading, trailing and doubled
    /// delimiters produce nothing, so `/a//b/` gives `["a", "b"]`.
    pub fn split(mut self, ch: u8) -> Vec<ByteStr<'a>> {
        let mut items = Vec::new();
        while !self.is_empty() {
            let before = self.len();
            let item = self.cut_by(ch);
            if !item.is_empty() {
                items.push(item);
            } else if self.len() == before {
                // no delimiter left, the tail is the last item
                items.push(self);
                break;
            }
        }
        items
    }

    /// Unsigned decimal parse. Fails on empty input and on any non-digit,
    /// including sign characters.
    pub fn to_u64(&self) -> Option<u64> {
        if self.0.is_empty() {
            return None;
        }
        let mut res: u64 = 0;
        for &b in self.0 {
            if !b.is_ascii_digit() {
                return None;
            }
            res = res.checked_mul(10)?.checked_add(u64::from(b - b'0'))?;
        }
        Some(res)
    }
}

impl PartialEq<&str> for ByteStr<'_> {
    fn eq(&self, other: &&str) -> bool {
        self.0 == other.as_bytes()
    }
}

impl fmt::Debug for ByteStr<'_> {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "ByteStr({:?})", String::from_utf8_lossy(self.0))
    }
}

#[cfg(test)]
mod test {
    use super::ByteStr;

    #[test]
    fn cut_by_advances_past_delimiter() {
        let mut s = ByteStr::new(b"GET /files");
        assert_eq!(s.cut_by(b' '), "GET");
        assert_eq!(s, "/files");
    }

    #[test]
    fn cut_by_leading_delimiter_consumes_it() {
        let mut s = ByteStr::new(b"/live/files");
        assert!(s.cut_by(b'/').is_empty());
        assert_eq!(s, "live/files");
    }

    #[test]
    fn cut_by_missing_delimiter_leaves_span() {
        let mut s = ByteStr::new(b"index.m3u8");
        let before = s.len();
        assert!(s.cut_by(b'?').is_empty());
        assert_eq!(s.len(), before);
    }

    #[test]
    fn trim_spaces_only() {
        assert_eq!(ByteStr::new(b"  abc  ").trim(), "abc");
        assert_eq!(ByteStr::new(b"\tabc").trim(), "\tabc");
        assert!(ByteStr::new(b"   ").trim().is_empty());
    }

    #[test]
    fn split_collapses_empty_items() {
        let items = ByteStr::new(b"/a//b/").split(b'/');
        assert_eq!(items, [ByteStr::new(b"a"), ByteStr::new(b"b")]);
        assert!(ByteStr::new(b"///").split(b'/').is_empty());
        assert_eq!(ByteStr::new(b"abc").split(b'/'), [ByteStr::new(b"abc")]);
    }

    #[test]
    fn to_u64_digits_only() {
        assert_eq!(ByteStr::new(b"1024").to_u64(), Some(1024));
        assert_eq!(ByteStr::new(b"").to_u64(), None);
        assert_eq!(ByteStr::new(b"+5").to_u64(), None);
        assert_eq!(ByteStr::new(b"-5").to_u64(), None);
        assert_eq!(ByteStr::new(b"12x").to_u64(), None);
        assert_eq!(ByteStr::new(b"99999999999999999999999").to_u64(), None);
    }
}
