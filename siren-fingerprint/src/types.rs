//! Shared domain types

use serde::{Deserialize, Serialize};
use std::collections::HashMap;

pub type SongId = u64;
pub type Hash = u64;
pub type Timestamp = i32;
pub type Delta = i32;

/// Ordered sequence of (hash, timestamp) pairs characterizing a track or snippet.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Fingerprint {
    points: Vec<(Hash, Timestamp)>,
}

impl Fingerprint {
    pub fn new(points: Vec<(Hash, Timestamp)>) -> Self {
        Self { points }
    }

    /// Build from the wire map, ordered by (timestamp, hash).
    pub fn from_map(map: &HashMap<Hash, Timestamp>) -> Self {
        let mut points: Vec<(Hash, Timestamp)> = map.iter().map(|(h, t)| (*h, *t)).collect();
        points.sort_by_key(|&(hash, timestamp)| (timestamp, hash));
        Self { points }
    }

    pub fn points(&self) -> &[(Hash, Timestamp)] {
        &self.points
    }

    pub fn hashes(&self) -> impl Iterator<Item = Hash> + '_ {
        self.points.iter().map(|(hash, _)| *hash)
    }

    pub fn len(&self) -> usize {
        self.points.len()
    }

    pub fn is_empty(&self) -> bool {
        self.points.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_from_map_orders_by_timestamp() {
        let mut map = HashMap::new();
        map.insert(9, 30);
        map.insert(5, 10);
        map.insert(7, 10);

        let fp = Fingerprint::from_map(&map);
        assert_eq!(fp.points(), &[(5, 10), (7, 10), (9, 30)]);
        assert_eq!(fp.hashes().collect::<Vec<_>>(), vec![5, 7, 9]);
    }
}
