use crate::types::{Delta, SongId, Timestamp};

/// One hash collision between the snippet and a stored row.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct HistogramEntry {
    pub song_id: SongId,
    /// Stored timestamp minus incoming timestamp
    pub delta: Delta,
    /// Stored timestamp
    pub timestamp: Timestamp,
}

impl HistogramEntry {
    pub fn new(song_id: SongId, stored: Timestamp, incoming: Timestamp) -> Self {
        Self {
            song_id,
            delta: stored.wrapping_sub(incoming),
            timestamp: stored,
        }
    }

    pub fn key(&self) -> (SongId, Delta) {
        (self.song_id, self.delta)
    }
}
