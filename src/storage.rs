//! The storage collaborator.
//!
//! The engine itself never touches chunk storage; handlers call through
//! the `SegmentStore` contract, concurrently from every reactor thread.
//! `LiveStore` is the in-memory live sliding window: per-stream deque of
//! the most recent segments, gap slots for sequences that never arrived,
//! and a playlist text cache rebuilt on insert. The stream map is sharded
//! so two reactor threads posting different streams rarely contend.

use std::collections::hash_map::DefaultHasher;
use std::collections::{HashMap, VecDeque};
use std::fmt::Write as _;
use std::hash::{Hash, Hasher};
use std::sync::{Arc, RwLock, RwLockReadGuard, RwLockWriteGuard};

use bytes::Bytes;
use log::warn;
use quick_error::quick_error;

/// One media segment of an HLS stream.
#[derive(Debug, Clone, Default)]
pub struct Chunk {
    pub seq: i64,
    pub start_ut_msecs: i64,
    pub duration_msecs: i64,
    pub data: Bytes,
}

quick_error! {
    #[derive(Debug, PartialEq, Eq)]
    pub enum StoreError {
        InvalidChunk {
            display("chunk is missing its sequence number or timing")
        }
    }
}

/// What any chunk store has to provide. Every method must be safe to call
/// from arbitrary reactor threads at once.
pub trait SegmentStore: Send + Sync {
    fn add_chunk(&self, stream_id: &str, chunk: Chunk) -> Result<(), StoreError>;
    fn get_chunk(&self, stream_id: &str, seq: i64) -> Option<Arc<Chunk>>;
    fn playlist_text(&self, stream_id: &str) -> Option<String>;
}

const SHARDS: usize = 16;

pub struct LiveStore {
    live_size: usize,
    keep_size: usize,
    hostname: String,
    shards: Vec<RwLock<HashMap<String, Playlist>>>,
}

struct Playlist {
    /// Sequence number of the front slot.
    head_seq: i64,
    /// Most recent `keep_size` slots; `None` marks a gap.
    slots: VecDeque<Option<Arc<Chunk>>>,
    cache_txt: String,
}

impl LiveStore {
    /// `live_size` is the playlist window; `keep_size` (>= `live_size`) is
    /// how many segments stay fetchable after they scroll out of it.
    pub fn new(live_size: usize, keep_size: usize, hostname: &str) -> LiveStore {
        let keep_size = keep_size.max(live_size).max(1);
        LiveStore {
            live_size: live_size.max(1),
            keep_size,
            hostname: hostname.to_string(),
            shards: (0..SHARDS).map(|_| RwLock::new(HashMap::new())).collect(),
        }
    }

    fn read_shard(&self, stream_id: &str) -> RwLockReadGuard<'_, HashMap<String, Playlist>> {
        match self.shards[shard_index(stream_id)].read() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }

    fn write_shard(&self, stream_id: &str) -> RwLockWriteGuard<'_, HashMap<String, Playlist>> {
        match self.shards[shard_index(stream_id)].write() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }

    fn build_playlist(&self, stream_id: &str, plst: &Playlist) -> String {
        let window_start = plst.slots.len().saturating_sub(self.live_size);
        let window = plst.slots.iter().skip(window_start);

        let target = window
            .clone()
            .flatten()
            .map(|c| (c.duration_msecs + 999) / 1000)
            .max()
            .unwrap_or(0);
        let media_seq = plst.head_seq + window_start as i64;

        let mut txt = String::new();
        txt.push_str("#EXTM3U\n#EXT-X-VERSION:3\n");
        let _ = write!(txt, "#EXT-X-TARGETDURATION:{}\n", target);
        let _ = write!(txt, "#EXT-X-MEDIA-SEQUENCE:{}\n", media_seq);
        for chunk in window.flatten() {
            let _ = write!(txt, "#EXTINF:{:.3},\n", chunk.duration_msecs as f64 / 1000.0);
            let _ = write!(
                txt,
                "http://{}/hls/{}/live/{}.ts\n",
                self.hostname, stream_id, chunk.seq
            );
        }
        txt
    }
}

impl SegmentStore for LiveStore {
    fn add_chunk(&self, stream_id: &str, chunk: Chunk) -> Result<(), StoreError> {
        if chunk.seq < 0 || chunk.start_ut_msecs < 0 || chunk.duration_msecs < 0 {
            return Err(StoreError::InvalidChunk);
        }
        let mut shard = self.write_shard(stream_id);
        let plst = shard
            .entry(stream_id.to_string())
            .or_insert_with(Playlist::new);
        plst.insert(Arc::new(chunk), self.live_size, self.keep_size);
        plst.cache_txt = self.build_playlist(stream_id, plst);
        Ok(())
    }

    fn get_chunk(&self, stream_id: &str, seq: i64) -> Option<Arc<Chunk>> {
        let shard = self.read_shard(stream_id);
        let plst = shard.get(stream_id)?;
        if seq < plst.head_seq {
            return None;
        }
        let idx = (seq - plst.head_seq) as usize;
        plst.slots.get(idx)?.clone()
    }

    fn playlist_text(&self, stream_id: &str) -> Option<String> {
        let shard = self.read_shard(stream_id);
        shard.get(stream_id).map(|plst| plst.cache_txt.clone())
    }
}

impl Playlist {
    fn new() -> Playlist {
        Playlist {
            head_seq: 0,
            slots: VecDeque::new(),
            cache_txt: String::new(),
        }
    }

    fn insert(&mut self, chunk: Arc<Chunk>, live_size: usize, keep_size: usize) {
        let seq = chunk.seq;
        if self.slots.is_empty() {
            self.head_seq = seq;
            self.slots.push_back(Some(chunk));
        } else {
            let last_seq = self.head_seq + self.slots.len() as i64 - 1;
            let back_gap = seq - last_seq;
            if back_gap >= 1 {
                if back_gap as usize <= live_size {
                    for _ in 1..back_gap {
                        self.slots.push_back(None);
                    }
                    self.slots.push_back(Some(chunk));
                } else {
                    // the encoder jumped far ahead, restart the window
                    warn!("sequence jumped from {} to {}, window reset", last_seq, seq);
                    self.slots.clear();
                    self.head_seq = seq;
                    self.slots.push_back(Some(chunk));
                }
            } else if back_gap < 0 {
                if seq >= self.head_seq {
                    // late arrival for a slot still in the window
                    self.slots[(seq - self.head_seq) as usize] = Some(chunk);
                } else {
                    let front_gap = (self.head_seq - seq) as usize;
                    if keep_size - self.slots.len() > front_gap {
                        for _ in 1..front_gap {
                            self.slots.push_front(None);
                        }
                        self.slots.push_front(Some(chunk));
                        self.head_seq = seq;
                    }
                }
            }
            // back_gap == 0: duplicate of the newest segment, ignored
        }

        while self.slots.len() > keep_size {
            self.slots.pop_front();
            self.head_seq += 1;
        }
    }
}

fn shard_index(stream_id: &str) -> usize {
    let mut hasher = DefaultHasher::new();
    stream_id.hash(&mut hasher);
    hasher.finish() as usize % SHARDS
}
