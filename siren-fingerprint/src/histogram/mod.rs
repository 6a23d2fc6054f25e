//! Histogram matcher
//!
//! Correlates an incoming fingerprint with stored rows sharing its hashes. A
//! true match shows up as many collisions at one (song, delta) pair; false
//! positives scatter over many pairs with small counts.

pub mod entry;
pub mod stats;

pub use entry::HistogramEntry;

use crate::config::MatchingConfig;
use crate::storage::Command;
use crate::types::{Delta, Fingerprint, Hash, SongId, Timestamp};
use std::collections::{HashMap, HashSet};
use tracing::{debug, error, info};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HistStatus {
    Ok,
    Uncertain,
}

/// Outcome of a match attempt
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct HistReturnType {
    pub status: HistStatus,
    pub song_id: SongId,
    pub timestamp: Timestamp,
    pub wasserstein_distance: f64,
}

impl HistReturnType {
    pub fn ok(song_id: SongId, timestamp: Timestamp, wasserstein_distance: f64) -> Self {
        Self {
            status: HistStatus::Ok,
            song_id,
            timestamp,
            wasserstein_distance,
        }
    }

    pub fn uncertain() -> Self {
        Self::uncertain_at(0.0)
    }

    fn uncertain_at(wasserstein_distance: f64) -> Self {
        Self {
            status: HistStatus::Uncertain,
            song_id: 0,
            timestamp: 0,
            wasserstein_distance,
        }
    }

    pub fn is_ok(&self) -> bool {
        self.status == HistStatus::Ok
    }
}

impl From<HistReturnType> for bool {
    fn from(result: HistReturnType) -> bool {
        result.is_ok()
    }
}

/// Thresholds for `find_dominant_peak`
#[derive(Debug, Clone, PartialEq)]
pub struct HistogramParams {
    /// Peak/noise distance that must be exceeded to accept
    pub min_distance: f64,
    /// Modified z-score at which a competing cluster counts as an outlier
    pub min_zscore: f64,
    /// Fraction of the peak count an outlier competitor must reach
    pub min_peak_percent: f64,
    /// Distinct counts sampled as noise
    pub noise_sample_size: usize,
    /// Noise value used when nothing but the peak exists
    pub empty_noise_sentinel: f64,
}

impl Default for HistogramParams {
    fn default() -> Self {
        Self::from(&MatchingConfig::default())
    }
}

impl From<&MatchingConfig> for HistogramParams {
    fn from(config: &MatchingConfig) -> Self {
        Self {
            min_distance: config.min_wasserstein_distance,
            min_zscore: config.min_zscore,
            min_peak_percent: config.min_peak_percent,
            noise_sample_size: config.noise_sample_size,
            empty_noise_sentinel: config.empty_noise_sentinel,
        }
    }
}

/// Collision count of one (song, delta) pair
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DeltaGroup {
    pub count: usize,
    pub song_id: SongId,
    pub delta: Delta,
}

pub struct Histogram {
    /// Sorted by (song_id, delta, timestamp)
    entries: Vec<HistogramEntry>,
    params: HistogramParams,
}

impl Histogram {
    /// Drain `rows` (columns `hash`, `timestamp`, `song_id`) and correlate them with `fingerprint`.
    ///
    /// Rows missing a column are logged and skipped.
    pub fn new(rows: &mut dyn Command, fingerprint: &Fingerprint, params: HistogramParams) -> Self {
        let mut stored: HashMap<Hash, Vec<(SongId, Timestamp)>> = HashMap::new();
        let mut skipped = 0usize;
        while rows.fetch_next() {
            let hash = rows.as_u64("hash");
            let timestamp = rows.as_i32("timestamp");
            let song_id = rows.as_u64("song_id");
            match (hash, timestamp, song_id) {
                (Some(hash), Some(timestamp), Some(song_id)) => {
                    stored.entry(hash).or_default().push((song_id, timestamp));
                }
                _ => skipped += 1,
            }
        }
        if skipped > 0 {
            error!("Could not extract hash/timestamp/song_id from {} rows", skipped);
        }

        Self::from_stored(&stored, fingerprint, params)
    }

    /// Build from an in-memory hash → (song, stored timestamp) multimap.
    pub fn from_stored(
        stored: &HashMap<Hash, Vec<(SongId, Timestamp)>>,
        fingerprint: &Fingerprint,
        params: HistogramParams,
    ) -> Self {
        let mut entries = Vec::new();
        for &(hash, incoming) in fingerprint.points() {
            if let Some(matches) = stored.get(&hash) {
                entries.extend(
                    matches
                        .iter()
                        .map(|&(song_id, original)| HistogramEntry::new(song_id, original, incoming)),
                );
            }
        }
        entries.sort_unstable();

        debug!(entries = entries.len(), "Histogram built");
        Self { entries, params }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn entries(&self) -> &[HistogramEntry] {
        &self.entries
    }

    /// Distinct song ids with at least one collision
    pub fn song_ids(&self) -> HashSet<SongId> {
        self.entries.iter().map(|e| e.song_id).collect()
    }

    /// Representative stored timestamp of a (song, delta) pair: the latest one.
    pub fn lookup(&self, song_id: SongId, delta: Delta) -> Option<Timestamp> {
        let end = self
            .entries
            .partition_point(|e| (e.song_id, e.delta) <= (song_id, delta));
        end.checked_sub(1)
            .map(|i| self.entries[i])
            .filter(|e| e.key() == (song_id, delta))
            .map(|e| e.timestamp)
    }

    /// Collapse equal (song, delta) runs into counts, largest count first.
    ///
    /// Ties keep (song, delta) ascending order.
    pub fn group_deltas_by_count(&self) -> Vec<DeltaGroup> {
        let mut groups: Vec<DeltaGroup> = Vec::new();
        for entry in &self.entries {
            match groups.last_mut() {
                Some(group) if (group.song_id, group.delta) == entry.key() => group.count += 1,
                _ => groups.push(DeltaGroup {
                    count: 1,
                    song_id: entry.song_id,
                    delta: entry.delta,
                }),
            }
        }
        groups.sort_by(|a, b| b.count.cmp(&a.count));
        groups
    }

    /// Decide whether one (song, delta) cluster clearly dominates.
    ///
    /// The top group is the peak. Up to `noise_sample_size` distinct counts of
    /// the following groups form the noise sample. The peak is accepted when the
    /// Wasserstein distance between peak and noise exceeds `min_distance`, unless
    /// a different song also stands out as a large outlier in the sample.
    pub fn find_dominant_peak(&self) -> HistReturnType {
        let groups = self.group_deltas_by_count();
        let Some(peak) = groups.first().copied() else {
            info!("Histogram is empty; could not infer song id");
            return HistReturnType::uncertain();
        };

        let mut noise_groups: Vec<DeltaGroup> = Vec::new();
        let mut seen_counts: HashSet<usize> = HashSet::new();
        for group in &groups[1..] {
            if seen_counts.len() >= self.params.noise_sample_size {
                break;
            }
            if seen_counts.insert(group.count) {
                noise_groups.push(*group);
            }
        }

        let peak_sample = [peak.count as f64];
        let mut noise_sample: Vec<f64> = noise_groups.iter().map(|g| g.count as f64).collect();
        if noise_sample.is_empty() {
            noise_sample.push(self.params.empty_noise_sentinel);
        }

        let distance = stats::wasserstein(
            &peak_sample,
            &[1.0],
            &noise_sample,
            &vec![1.0; noise_sample.len()],
        );

        if distance <= self.params.min_distance {
            info!(
                song_id = peak.song_id,
                peak = peak.count,
                distance,
                "Peak does not stand out from noise; could not infer song id"
            );
            return HistReturnType::uncertain_at(distance);
        }

        if let Some(rival) = self.competing_cluster(&peak, &noise_groups) {
            info!(
                song_id = peak.song_id,
                rival_song_id = rival.song_id,
                peak = peak.count,
                rival = rival.count,
                "Competing cluster found; could not infer song id"
            );
            return HistReturnType::uncertain_at(distance);
        }

        let timestamp = self.lookup(peak.song_id, peak.delta).unwrap_or(0);
        info!(
            song_id = peak.song_id,
            peak = peak.count,
            distance,
            timestamp,
            "Found a song"
        );
        HistReturnType::ok(peak.song_id, timestamp, distance)
    }

    /// A noise group of another song that is itself an outlier and close to the peak in size.
    fn competing_cluster(&self, peak: &DeltaGroup, noise: &[DeltaGroup]) -> Option<DeltaGroup> {
        if noise.is_empty() {
            return None;
        }

        let counts: Vec<f64> = std::iter::once(peak.count as f64)
            .chain(noise.iter().map(|g| g.count as f64))
            .collect();
        let scores = stats::modified_z_scores(&counts);
        let min_count = self.params.min_peak_percent * peak.count as f64;

        noise
            .iter()
            .zip(scores.iter().skip(1))
            .find(|(group, &score)| {
                group.song_id != peak.song_id
                    && score >= self.params.min_zscore
                    && group.count as f64 >= min_count
            })
            .map(|(group, _)| *group)
    }
}
