//! Shared fakes for integration tests
//!
//! `FakeStore` stands in for either back-end: every executed batch is
//! recorded and answered by a responder closure.

#![allow(dead_code)]

use siren_fingerprint::engine::{Engine, EngineSettings};
use siren_fingerprint::fingerprinter::{CoreError, FingerprintCore};
use siren_fingerprint::http::{Auth, HttpClient, HttpResponse, Method};
use siren_fingerprint::storage::{
    ColumnValue, Command, Connection, ConnectionPool, Connector, QueryCollection, RowBuffer,
    StorageError,
};
use siren_fingerprint::thread_pool::{ThreadPool, WorkSubmitter};
use siren_fingerprint::types::{Fingerprint, SongId, Timestamp};
use std::collections::HashMap;
use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

pub type Row = HashMap<String, ColumnValue>;
pub type Responder = Arc<dyn Fn(&QueryCollection) -> Result<Vec<Row>, StorageError> + Send + Sync>;

/// Row with the `hash`, `timestamp`, `song_id` columns both stores return
pub fn fingerprint_row(hash: u64, timestamp: Timestamp, song_id: SongId) -> Row {
    let mut row = Row::new();
    row.insert("hash".to_string(), ColumnValue::Int(hash as i64));
    row.insert("timestamp".to_string(), ColumnValue::Int(timestamp as i64));
    row.insert("song_id".to_string(), ColumnValue::Int(song_id as i64));
    row
}

pub fn single_column(name: &str, value: ColumnValue) -> Vec<Row> {
    let mut row = Row::new();
    row.insert(name.to_string(), value);
    vec![row]
}

/// `count` snippet hashes colliding with `song_id` at a constant delta
pub fn colliding_rows(song_id: SongId, delta: Timestamp, count: u64) -> Vec<Row> {
    (0..count)
        .map(|i| fingerprint_row(i + 1, i as Timestamp * 10 + delta, song_id))
        .collect()
}

/// Snippet whose hash `i + 1` sits at timestamp `i * 10`
pub fn snippet(count: u64) -> Fingerprint {
    Fingerprint::new((0..count).map(|i| (i + 1, i as Timestamp * 10)).collect())
}

pub struct FakeStore {
    name: &'static str,
    calls: Mutex<Vec<QueryCollection>>,
    responder: Mutex<Responder>,
}

impl FakeStore {
    pub fn new(name: &'static str) -> Arc<Self> {
        Arc::new(Self {
            name,
            calls: Mutex::new(Vec::new()),
            responder: Mutex::new(Arc::new(|_| Ok(Vec::new()))),
        })
    }

    pub fn respond_with<F>(&self, responder: F)
    where
        F: Fn(&QueryCollection) -> Result<Vec<Row>, StorageError> + Send + Sync + 'static,
    {
        *self.responder.lock().unwrap() = Arc::new(responder);
    }

    pub fn calls(&self) -> Vec<QueryCollection> {
        self.calls.lock().unwrap().clone()
    }

    pub fn call_count(&self) -> usize {
        self.calls.lock().unwrap().len()
    }

    /// Batches whose first query has `key` containing `needle`
    pub fn calls_matching(&self, key: &str, needle: &str) -> usize {
        self.calls
            .lock()
            .unwrap()
            .iter()
            .filter(|queries| {
                queries
                    .first()
                    .and_then(|q| q.get(key))
                    .is_some_and(|value| value.contains(needle))
            })
            .count()
    }

    fn run(&self, queries: &QueryCollection) -> Result<Vec<Row>, StorageError> {
        self.calls.lock().unwrap().push(queries.clone());
        let responder = Arc::clone(&*self.responder.lock().unwrap());
        responder(queries)
    }

    pub fn pool(self: &Arc<Self>, capacity: usize) -> Arc<ConnectionPool> {
        Arc::new(ConnectionPool::new(
            Arc::new(FakeConnector {
                store: Arc::clone(self),
            }),
            capacity,
        ))
    }
}

pub struct FakeConnector {
    store: Arc<FakeStore>,
}

impl Connector for FakeConnector {
    fn connector_type(&self) -> &'static str {
        self.store.name
    }

    fn create_connection(&self) -> Arc<dyn Connection> {
        Arc::new(FakeConnection {
            store: Arc::clone(&self.store),
            alive: AtomicBool::new(true),
        })
    }
}

pub struct FakeConnection {
    store: Arc<FakeStore>,
    alive: AtomicBool,
}

impl Connection for FakeConnection {
    fn open(&self) -> Result<(), StorageError> {
        self.alive.store(true, Ordering::SeqCst);
        Ok(())
    }

    fn close(&self) {
        self.alive.store(false, Ordering::SeqCst);
    }

    fn is_alive(&self) -> bool {
        self.alive.load(Ordering::SeqCst)
    }

    fn create_command(&self, queries: QueryCollection) -> Box<dyn Command> {
        Box::new(FakeCommand {
            store: Arc::clone(&self.store),
            queries,
            rows: RowBuffer::new(),
        })
    }
}

pub struct FakeCommand {
    store: Arc<FakeStore>,
    queries: QueryCollection,
    rows: RowBuffer<Row>,
}

impl Command for FakeCommand {
    fn queries(&self) -> &QueryCollection {
        &self.queries
    }

    fn execute(&mut self) -> Result<(), StorageError> {
        let rows = self.store.run(&self.queries)?;
        self.rows.clear();
        self.rows.extend(rows);
        Ok(())
    }

    fn fetch_next(&mut self) -> bool {
        self.rows.fetch_next()
    }

    fn size(&self) -> usize {
        self.rows.len()
    }

    fn column(&self, name: &str) -> Option<ColumnValue> {
        self.rows.current()?.get(name).cloned()
    }
}

/// HTTP collaborator with a fixed reply per URL fragment
#[derive(Default)]
pub struct FakeHttp {
    replies: Mutex<Vec<(String, HttpResponse)>>,
    download_body: Mutex<Option<String>>,
    requests: Mutex<Vec<String>>,
}

impl FakeHttp {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn reply_for(&self, url_fragment: &str, response: HttpResponse) {
        self.replies
            .lock()
            .unwrap()
            .push((url_fragment.to_string(), response));
    }

    /// Downloads succeed and write `body`; without it they fail with 404.
    pub fn serve_downloads(&self, body: &str) {
        *self.download_body.lock().unwrap() = Some(body.to_string());
    }

    pub fn requests(&self) -> Vec<String> {
        self.requests.lock().unwrap().clone()
    }
}

impl HttpClient for FakeHttp {
    fn send(
        &self,
        _method: Method,
        url: &str,
        _body: &str,
        _content_type: &str,
        _auth: Option<&Auth>,
        _verify_tls: bool,
    ) -> HttpResponse {
        self.requests.lock().unwrap().push(url.to_string());
        self.replies
            .lock()
            .unwrap()
            .iter()
            .find(|(fragment, _)| url.contains(fragment.as_str()))
            .map(|(_, response)| response.clone())
            .unwrap_or_else(|| HttpResponse::transport_error("no route"))
    }

    fn download_file(&self, url: &str, destination: &Path, _timeout_ms: u64, _verify_tls: bool) -> HttpResponse {
        self.requests.lock().unwrap().push(url.to_string());
        match self.download_body.lock().unwrap().clone() {
            Some(body) => match std::fs::write(destination, body) {
                Ok(()) => HttpResponse::new(200, ""),
                Err(e) => HttpResponse::transport_error(e.to_string()),
            },
            None => HttpResponse::new(404, "missing"),
        }
    }
}

/// Fingerprint core returning a fixed fingerprint (or failing when empty)
pub struct FakeCore {
    fingerprint: Fingerprint,
}

impl FakeCore {
    pub fn new(fingerprint: Fingerprint) -> Self {
        Self { fingerprint }
    }
}

impl FingerprintCore for FakeCore {
    fn make_fingerprint(&self, path: &Path) -> Result<Fingerprint, CoreError> {
        if !path.exists() {
            return Err(CoreError::Spawn(std::io::Error::new(
                std::io::ErrorKind::NotFound,
                "downloaded file is missing",
            )));
        }
        if self.fingerprint.is_empty() {
            return Err(CoreError::Empty);
        }
        Ok(self.fingerprint.clone())
    }
}

/// Engine wired to fakes, plus handles to inspect them
pub struct Harness {
    pub engine: Engine,
    pub primary: Arc<FakeStore>,
    pub cache: Arc<FakeStore>,
    pub http: Arc<FakeHttp>,
    pub pool: Arc<ThreadPool>,
    pub download_dir: tempfile::TempDir,
}

impl Harness {
    pub fn new(core: FakeCore) -> Self {
        Self::with_settings(core, |_| {})
    }

    pub fn with_settings(core: FakeCore, adjust: impl FnOnce(&mut EngineSettings)) -> Self {
        let primary = FakeStore::new("primary");
        let cache = FakeStore::new("cache");
        let http = FakeHttp::new();
        let pool = Arc::new(ThreadPool::new(2, 2, true));
        let download_dir = tempfile::tempdir().expect("tempdir");

        let mut settings = EngineSettings::default();
        settings.histogram.min_distance = 10.0;
        settings.ingest.download_dir = download_dir.path().to_path_buf();
        settings.metadata_url = None;
        adjust(&mut settings);

        let engine = Engine::new(
            primary.pool(2),
            cache.pool(2),
            Box::new(core),
            Arc::clone(&http) as Arc<dyn HttpClient>,
            WorkSubmitter::new(Arc::clone(&pool)),
            settings,
        );

        Self {
            engine,
            primary,
            cache,
            http,
            pool,
            download_dir,
        }
    }
}
