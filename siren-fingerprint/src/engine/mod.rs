//! Matching pipeline
//!
//! Owns one connection pool per store. Lookups try the fast store first and
//! fall back to the primary; a primary hit schedules a cache repopulation.
//! Ingest and cache writes run on the shared worker pool.

mod background;
pub mod queries;

pub use background::{BackgroundGuard, BackgroundTracker};
pub use queries::SearchShape;

use crate::config::{IngestConfig, ServiceConfig};
use crate::fingerprinter::FingerprintCore;
use crate::histogram::{HistReturnType, Histogram, HistogramParams};
use crate::http::HttpClient;
use crate::storage::{Command, ConnectionPool, QueryCollection, StorageError};
use crate::thread_pool::WorkSubmitter;
use crate::types::{Fingerprint, SongId};
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

/// Tunables the engine needs from the service configuration
#[derive(Debug, Clone)]
pub struct EngineSettings {
    pub histogram: HistogramParams,
    pub search: SearchShape,
    pub ingest: IngestConfig,
    pub metadata_url: Option<String>,
}

impl EngineSettings {
    pub fn from_config(config: &ServiceConfig) -> Self {
        Self {
            histogram: HistogramParams::from(&config.matching),
            search: SearchShape {
                hashes_per_query: config.elastic.query_batch_size,
                result_window: config.elastic.result_window,
                focus_buckets: config.elastic.focus_buckets,
            },
            ingest: config.ingest.clone(),
            metadata_url: config.metadata.base_url(),
        }
    }
}

impl Default for EngineSettings {
    fn default() -> Self {
        Self::from_config(&ServiceConfig::default())
    }
}

/// Outcome of a metadata service lookup
#[derive(Debug, Clone, PartialEq)]
pub enum MetadataLookup {
    Found(serde_json::Value),
    NotFound,
    Failed(String),
    /// No metadata service configured
    Disabled,
}

struct EngineShared {
    primary: Arc<ConnectionPool>,
    cache: Arc<ConnectionPool>,
    core: Box<dyn FingerprintCore>,
    http: Arc<dyn HttpClient>,
    settings: EngineSettings,
}

/// Dropping the engine waits for outstanding background jobs.
pub struct Engine {
    shared: Arc<EngineShared>,
    submitter: WorkSubmitter,
    background: Arc<BackgroundTracker>,
}

impl Engine {
    pub fn new(
        primary: Arc<ConnectionPool>,
        cache: Arc<ConnectionPool>,
        core: Box<dyn FingerprintCore>,
        http: Arc<dyn HttpClient>,
        submitter: WorkSubmitter,
        settings: EngineSettings,
    ) -> Self {
        Self {
            shared: Arc::new(EngineShared {
                primary,
                cache,
                core,
                http,
                settings,
            }),
            submitter,
            background: BackgroundTracker::new(),
        }
    }

    pub fn settings(&self) -> &EngineSettings {
        &self.shared.settings
    }

    /// Identify the song a fingerprint belongs to.
    pub fn find_song_id_by_fingerprint(&self, fingerprint: &Fingerprint) -> HistReturnType {
        if fingerprint.is_empty() {
            debug!("Empty fingerprint, nothing to match");
            return HistReturnType::uncertain();
        }

        match self.shared.search_cache(fingerprint) {
            Ok(result) if result.is_ok() => {
                info!(song_id = result.song_id, store = "cache", "Fingerprint matched");
                return result;
            }
            Ok(_) => debug!("Fast store lookup was inconclusive, trying primary store"),
            Err(e) => warn!("Fast store lookup failed, trying primary store: {}", e),
        }

        match self.shared.search_primary(fingerprint) {
            Ok(result) if result.is_ok() => {
                info!(song_id = result.song_id, store = "primary", "Fingerprint matched");
                self.schedule_cache_repopulation(result.song_id);
                result
            }
            Ok(result) => {
                debug!(
                    distance = result.wasserstein_distance,
                    "Primary store lookup was inconclusive"
                );
                result
            }
            Err(e) => {
                error!("Primary store lookup failed: {}", e);
                HistReturnType::uncertain()
            }
        }
    }

    /// Copy a song's rows from the primary store into the fast store.
    ///
    /// Skipped when the fast store already holds documents for the song.
    pub fn cache_fingerprint_by_song_id(&self, song_id: SongId) -> bool {
        self.shared.cache_fingerprint_by_song_id(song_id)
    }

    /// Download, fingerprint and store a track under `song_id`.
    ///
    /// Returns once the fingerprint exists; the store writes continue in the
    /// background.
    pub fn load_track_by_url(&self, url: &str, song_id: SongId, is_caching: bool) -> bool {
        match self.shared.claim_song_id(song_id) {
            Ok(true) => {}
            Ok(false) => {
                error!(song_id, "Tried to load a song that already exists in storage");
                return false;
            }
            Err(e) => {
                error!(song_id, "Could not check song id: {}", e);
                return false;
            }
        }

        let fingerprint = match self.shared.fingerprint_remote_track(url) {
            Ok(fingerprint) => fingerprint,
            Err(message) => {
                error!(song_id, url, "{}", message);
                self.shared.release_claim(song_id);
                return false;
            }
        };
        info!(
            song_id,
            "Created a fingerprint of size {} for the track", fingerprint.len()
        );

        let fingerprint = Arc::new(fingerprint);
        {
            let fingerprint = Arc::clone(&fingerprint);
            self.spawn_background(move |shared| shared.load_into_primary(&fingerprint, song_id));
        }
        if is_caching {
            self.spawn_background(move |shared| shared.load_into_cache(&fingerprint, song_id));
        }
        true
    }

    /// Delete a song from both stores. Both deletions run concurrently and
    /// both must succeed.
    pub fn purge_fingerprint_by_song_id(&self, song_id: SongId) -> bool {
        let primary = {
            let shared = Arc::clone(&self.shared);
            self.submitter
                .submit_task(move || shared.purge_primary(song_id), true)
        };
        let cache = {
            let shared = Arc::clone(&self.shared);
            self.submitter
                .submit_task(move || shared.purge_cache(song_id), true)
        };

        let primary_ok = primary.join().unwrap_or(false);
        let cache_ok = cache.join().unwrap_or(false);
        if !primary_ok {
            error!(song_id, "Failed to delete song from primary store");
        }
        if !cache_ok {
            error!(song_id, "Failed to delete song from fast store");
        }
        primary_ok && cache_ok
    }

    /// Look up song details in the metadata service.
    pub fn fetch_song_metadata(&self, song_id: SongId) -> MetadataLookup {
        let Some(base) = self.shared.settings.metadata_url.as_deref() else {
            return MetadataLookup::Disabled;
        };
        let url = format!("{}/songs/{}", base.trim_end_matches('/'), song_id);
        let response = self.shared.http.get(
            &url,
            "",
            "application/json",
            None,
            self.shared.settings.ingest.verify_tls,
        );

        if response.status_code == 404 {
            return MetadataLookup::NotFound;
        }
        if !response.is_success() {
            let message = response.describe_failure();
            warn!(song_id, "Metadata lookup failed: {}", message);
            return MetadataLookup::Failed(message);
        }
        match serde_json::from_str(&response.text) {
            Ok(value) => MetadataLookup::Found(value),
            Err(e) => {
                warn!(song_id, "Metadata service returned malformed JSON: {}", e);
                MetadataLookup::Failed(e.to_string())
            }
        }
    }

    /// Number of fire-and-forget jobs still outstanding
    pub fn background_jobs(&self) -> usize {
        self.background.pending()
    }

    /// Block until every background job submitted so far has finished.
    pub fn wait_for_background(&self) {
        self.background.wait();
    }

    fn schedule_cache_repopulation(&self, song_id: SongId) {
        debug!(song_id, "Scheduling fast store repopulation");
        self.spawn_background(move |shared| shared.cache_fingerprint_by_song_id(song_id));
    }

    fn spawn_background<F>(&self, job: F)
    where
        F: FnOnce(&EngineShared) -> bool + Send + 'static,
    {
        let guard = self.background.start();
        let shared = Arc::clone(&self.shared);
        // The future is dropped right away; the guard tracks completion.
        let _ = self.submitter.submit_task(
            move || {
                let _guard = guard;
                job(shared.as_ref())
            },
            false,
        );
    }
}

impl Drop for Engine {
    fn drop(&mut self) {
        if self.background.pending() > 0 {
            info!(
                pending = self.background.pending(),
                "Waiting for background jobs before shutting down the engine"
            );
            self.background.wait();
        }
    }
}

impl EngineShared {
    fn execute(pool: &ConnectionPool, queries: QueryCollection) -> Result<Box<dyn Command>, StorageError> {
        let connection = pool.get_connection()?;
        let mut command = connection.create_command(queries);
        let executed = command.execute();
        pool.release_connection(connection)?;
        executed?;
        Ok(command)
    }

    fn search_cache(&self, fingerprint: &Fingerprint) -> Result<HistReturnType, StorageError> {
        let queries = queries::cache_lookup(fingerprint, &self.settings.search)?;
        let mut rows = Self::execute(&self.cache, queries)?;
        let histogram = Histogram::new(rows.as_mut(), fingerprint, self.settings.histogram.clone());
        Ok(histogram.find_dominant_peak())
    }

    fn search_primary(&self, fingerprint: &Fingerprint) -> Result<HistReturnType, StorageError> {
        let queries = QueryCollection::from(queries::primary_lookup(fingerprint));
        let mut rows = Self::execute(&self.primary, queries)?;
        let histogram = Histogram::new(rows.as_mut(), fingerprint, self.settings.histogram.clone());
        Ok(histogram.find_dominant_peak())
    }

    /// True when the id was free and is now reserved by a placeholder row.
    fn claim_song_id(&self, song_id: SongId) -> Result<bool, StorageError> {
        let queries = QueryCollection::from(queries::claim_song_id(song_id));
        let mut result = Self::execute(&self.primary, queries)?;
        if !result.fetch_next() {
            return Err(StorageError::Malformed("song id check returned no rows".to_string()));
        }
        let taken = result
            .as_bool("find_song_id")
            .ok_or(StorageError::MissingField("find_song_id"))?;
        Ok(!taken)
    }

    fn release_claim(&self, song_id: SongId) {
        let queries = QueryCollection::from(queries::release_claim(song_id));
        if let Err(e) = Self::execute(&self.primary, queries) {
            warn!(song_id, "Could not release song id reservation: {}", e);
        }
    }

    fn fingerprint_remote_track(&self, url: &str) -> Result<Fingerprint, String> {
        let ingest = &self.settings.ingest;
        let path: PathBuf = ingest
            .download_dir
            .join(format!("siren-{}.track", Uuid::new_v4()));

        let response = self
            .http
            .download_file(url, &path, ingest.timeout_ms, ingest.verify_tls);
        if !response.is_success() {
            let _ = std::fs::remove_file(&path);
            return Err(format!("Download failed: {}", response.describe_failure()));
        }

        let fingerprint = self.core.make_fingerprint(&path);
        if let Err(e) = std::fs::remove_file(&path) {
            warn!(path = %path.display(), "Could not remove downloaded track: {}", e);
        }
        fingerprint.map_err(|e| format!("Fingerprinting failed: {}", e))
    }

    fn load_into_primary(&self, fingerprint: &Fingerprint, song_id: SongId) -> bool {
        let stored = queries::primary_insert(fingerprint, song_id)
            .and_then(|queries| Self::execute(&self.primary, queries));
        match stored {
            Ok(_) => {
                info!(song_id, rows = fingerprint.len(), "Stored fingerprint in primary store");
                true
            }
            Err(e) => {
                error!(song_id, "Failed to store fingerprint in primary store: {}", e);
                false
            }
        }
    }

    fn load_into_cache(&self, fingerprint: &Fingerprint, song_id: SongId) -> bool {
        let stored = queries::cache_insert(fingerprint.points().iter().copied(), song_id)
            .and_then(|queries| Self::execute(&self.cache, queries));
        match stored {
            Ok(_) => {
                info!(song_id, rows = fingerprint.len(), "Stored fingerprint in fast store");
                true
            }
            Err(e) => {
                error!(song_id, "Failed to store fingerprint in fast store: {}", e);
                false
            }
        }
    }

    fn is_cached(&self, song_id: SongId) -> Result<bool, StorageError> {
        let queries = QueryCollection::from(queries::cache_count(song_id));
        let mut result = Self::execute(&self.cache, queries)?;
        if !result.fetch_next() {
            return Ok(false);
        }
        Ok(result.as_u64("count").unwrap_or(0) > 0)
    }

    fn cache_fingerprint_by_song_id(&self, song_id: SongId) -> bool {
        match self.is_cached(song_id) {
            Ok(true) => {
                warn!(song_id, "Song is already in the fast store, skipping repopulation");
                return true;
            }
            Ok(false) => {}
            Err(e) => {
                error!(song_id, "Could not check fast store contents: {}", e);
                return false;
            }
        }

        let queries = QueryCollection::from(queries::primary_rows_of_song(song_id));
        let mut rows = match Self::execute(&self.primary, queries) {
            Ok(rows) => rows,
            Err(e) => {
                error!(song_id, "Could not read song from primary store: {}", e);
                return false;
            }
        };

        let mut points = Vec::with_capacity(rows.size());
        while rows.fetch_next() {
            match (rows.as_u64("hash"), rows.as_i32("timestamp")) {
                (Some(hash), Some(timestamp)) => points.push((hash, timestamp)),
                _ => warn!(song_id, "Skipping primary row with missing columns"),
            }
        }
        if points.is_empty() {
            warn!(song_id, "No rows to cache for song");
            return false;
        }

        let count = points.len();
        let stored = queries::cache_insert(points, song_id)
            .and_then(|queries| Self::execute(&self.cache, queries));
        match stored {
            Ok(_) => {
                info!(song_id, rows = count, "Repopulated fast store");
                true
            }
            Err(e) => {
                error!(song_id, "Fast store repopulation failed: {}", e);
                false
            }
        }
    }

    fn purge_primary(&self, song_id: SongId) -> bool {
        let queries = QueryCollection::from(queries::primary_purge(song_id));
        match Self::execute(&self.primary, queries) {
            Ok(_) => true,
            Err(e) => {
                error!(song_id, store = "primary", "Purge failed: {}", e);
                false
            }
        }
    }

    fn purge_cache(&self, song_id: SongId) -> bool {
        let queries = QueryCollection::from(queries::cache_purge(song_id));
        match Self::execute(&self.cache, queries) {
            Ok(_) => true,
            Err(e) => {
                error!(song_id, store = "cache", "Purge failed: {}", e);
                false
            }
        }
    }
}
