//! Request-target decomposition.
//!
//! A target like `/hls/42/live/index.m3u8?start=1000&duration=2000` becomes
//! path items `["hls", "42", "live", "index.m3u8"]` and query pairs
//! `[("start", "1000"), ("duration", "2000")]`, all borrowed from the
//! original buffer. Path splitting collapses empty items, so a doubled or
//! trailing slash does not produce phantom segments.

use crate::bytestr::ByteStr;

#[derive(Debug)]
pub struct Uri<'a> {
    path_items: Vec<ByteStr<'a>>,
    query_items: Vec<(ByteStr<'a>, ByteStr<'a>)>,
}

impl<'a> Uri<'a> {
    /// Parses a raw request-target. Returns `None` when the path is empty
    /// or any query pair is missing its key or value: a half-formed query
    /// invalidates the whole target.
    pub fn parse(raw: &'a [u8]) -> Option<Uri<'a>> {
        let mut rest = ByteStr::new(raw).trim();

        let mut path = rest.cut_by(b'?');
        if path.is_empty() {
            if rest.is_empty() {
                return None;
            }
            // no '?' found: the whole target is the path
            path = rest;
            rest = ByteStr::new(&[]);
        }

        let path_items = path.split(b'/');
        if path_items.is_empty() {
            return None;
        }

        let mut query_items = Vec::new();
        for mut pair in rest.split(b'&') {
            let key = pair.cut_by(b'=');
            if key.is_empty() || pair.is_empty() {
                return None;
            }
            query_items.push((key, pair));
        }

        Some(Uri { path_items, query_items })
    }

    pub fn path_items(&self) -> &[ByteStr<'a>] {
        &self.path_items
    }

    pub fn query_items(&self) -> &[(ByteStr<'a>, ByteStr<'a>)] {
        &self.query_items
    }

    pub fn query_value(&self, key: &str) -> Option<ByteStr<'a>> {
        self.query_items
            .iter()
            .find(|(k, _)| *k == key)
            .map(|&(_, v)| v)
    }
}
