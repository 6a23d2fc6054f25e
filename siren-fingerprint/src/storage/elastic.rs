//! Fast document/search store over the HTTP collaborator (Elasticsearch)
//!
//! Query fields:
//! - `lucene`: path appended to the base URL (`fingerprint/_msearch`)
//! - `request_type`: GET / POST / PUT / DELETE
//! - `query`: request body
//! - `header`: NDJSON action line, required for `_bulk` and `_msearch`
//!
//! `_bulk`/`_msearch` batches are framed as NDJSON and split into chunks that
//! run concurrently on the worker pool. Hits are flattened into rows; column
//! lookups read `_source` first.

use super::{ColumnValue, Command, Connection, Connector, QueryCollection, RowBuffer, StorageError};
use crate::config::ElasticConfig;
use crate::http::{Auth, HttpClient, Method};
use crate::thread_pool::WorkSubmitter;
use serde_json::Value;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use tracing::{debug, error, warn};

const JSON: &str = "application/json";
const NDJSON: &str = "application/x-ndjson";

/// Connection-independent settings shared by every command
#[derive(Debug, Clone)]
pub struct ElasticSettings {
    /// Base URL ending with `/`
    pub base_url: String,
    pub auth: Auth,
    pub verify_tls: bool,
    /// Documents per `_bulk` request
    pub batch_size: usize,
    /// Searches per `_msearch` request
    pub multi_batch_size: usize,
}

impl ElasticSettings {
    pub fn from_config(config: &ElasticConfig) -> Self {
        if config.user.is_empty() || config.password.is_empty() {
            warn!("Fast store credentials have not been set");
        }
        Self {
            base_url: config.base_url(),
            auth: Auth::new(config.user.clone(), config.password.clone()),
            verify_tls: config.use_ssl,
            batch_size: config.batch_size,
            multi_batch_size: config.multi_batch_size,
        }
    }
}

pub struct ElasticConnector {
    settings: Arc<ElasticSettings>,
    http: Arc<dyn HttpClient>,
    submitter: WorkSubmitter,
}

impl ElasticConnector {
    pub fn new(settings: ElasticSettings, http: Arc<dyn HttpClient>, submitter: WorkSubmitter) -> Self {
        Self {
            settings: Arc::new(settings),
            http,
            submitter,
        }
    }
}

impl Connector for ElasticConnector {
    fn connector_type(&self) -> &'static str {
        "elastic"
    }

    fn create_connection(&self) -> Arc<dyn Connection> {
        Arc::new(ElasticConnection {
            settings: Arc::clone(&self.settings),
            http: Arc::clone(&self.http),
            submitter: self.submitter.clone(),
            alive: AtomicBool::new(true),
        })
    }
}

/// Stateless HTTP "connection": liveness is a flag toggled by open/close.
pub struct ElasticConnection {
    settings: Arc<ElasticSettings>,
    http: Arc<dyn HttpClient>,
    submitter: WorkSubmitter,
    alive: AtomicBool,
}

impl Connection for ElasticConnection {
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
        Box::new(ElasticCommand {
            settings: Arc::clone(&self.settings),
            http: Arc::clone(&self.http),
            submitter: self.submitter.clone(),
            queries,
            rows: RowBuffer::new(),
        })
    }
}

/// One HTTP endpoint hit by every request of a command
struct Target {
    http: Arc<dyn HttpClient>,
    method: Method,
    url: String,
    content_type: &'static str,
    auth: Auth,
    verify_tls: bool,
}

impl Target {
    fn run(&self, body: &str) -> Result<Vec<Value>, StorageError> {
        let response = self.http.send(
            self.method,
            &self.url,
            body,
            self.content_type,
            Some(&self.auth),
            self.verify_tls,
        );

        if !response.is_success() {
            let message = response.describe_failure();
            error!(url = %self.url, "Fast store request failed: {}", message);
            return Err(StorageError::Request(message));
        }

        let parsed: Value = serde_json::from_str(&response.text).map_err(|e| {
            error!(url = %self.url, "Failed to parse fast store response: {}", e);
            StorageError::Malformed(e.to_string())
        })?;

        extract_hits(parsed)
    }
}

/// Flatten a response into result rows.
///
/// Search hits come from `hits.hits`, from each `responses[*]` of a multi-search
/// (aggregation buckets first), and otherwise the response object itself is the
/// single row (`_count`, `_bulk`, `_delete_by_query`).
pub fn extract_hits(response: Value) -> Result<Vec<Value>, StorageError> {
    if let Some(took) = response.get("took") {
        debug!("Fast store query took {} ms", took);
    }

    let has_errors = response.get("errors").and_then(Value::as_bool) == Some(true);
    if response.get("error").is_some() || has_errors {
        let text = truncate(response.to_string());
        error!("Fast store response has error(s): {}", text);
        return Err(StorageError::Backend(text));
    }

    if let Some(hits) = response.pointer("/hits/hits").and_then(Value::as_array) {
        return Ok(hits.clone());
    }

    if let Some(responses) = response.get("responses").and_then(Value::as_array) {
        let mut rows = Vec::new();
        for item in responses {
            if let Some(err) = item.get("error") {
                let text = truncate(err.to_string());
                error!("Multi-search item failed: {}", text);
                return Err(StorageError::Backend(text));
            }
            match item
                .pointer("/aggregations/sample/histogram/buckets")
                .and_then(Value::as_array)
            {
                Some(buckets) => {
                    for bucket in buckets {
                        if let Some(hits) = bucket
                            .pointer("/most_frequent/hits/hits")
                            .and_then(Value::as_array)
                        {
                            rows.extend(hits.iter().cloned());
                        }
                    }
                }
                None => {
                    if let Some(hits) = item.pointer("/hits/hits").and_then(Value::as_array) {
                        rows.extend(hits.iter().cloned());
                    }
                }
            }
        }
        return Ok(rows);
    }

    if response.is_object() {
        return Ok(vec![response]);
    }
    Ok(Vec::new())
}

fn truncate(mut text: String) -> String {
    const LIMIT: usize = 2048;
    if text.len() > LIMIT {
        let mut cut = LIMIT;
        while !text.is_char_boundary(cut) {
            cut -= 1;
        }
        text.truncate(cut);
        text.push_str("...");
    }
    text
}

pub struct ElasticCommand {
    settings: Arc<ElasticSettings>,
    http: Arc<dyn HttpClient>,
    submitter: WorkSubmitter,
    queries: QueryCollection,
    rows: RowBuffer<Value>,
}

impl ElasticCommand {
    fn run_concurrently(&self, target: Arc<Target>, bodies: Vec<String>) -> Result<Vec<Value>, StorageError> {
        let collected: Arc<Mutex<Vec<Value>>> = Arc::new(Mutex::new(Vec::new()));

        let futures: Vec<_> = bodies
            .into_iter()
            .map(|body| {
                let target = Arc::clone(&target);
                let collected = Arc::clone(&collected);
                self.submitter.submit_task(
                    move || -> Result<(), StorageError> {
                        let hits = target.run(&body)?;
                        collected.lock().unwrap().extend(hits);
                        Ok(())
                    },
                    true,
                )
            })
            .collect();

        let mut failure = None;
        for future in futures {
            match future.join() {
                Some(Ok(())) => {}
                Some(Err(e)) => {
                    failure.get_or_insert(e);
                }
                None => {
                    failure.get_or_insert(StorageError::Request(
                        "fast store request was dropped before completion".to_string(),
                    ));
                }
            }
        }
        if let Some(e) = failure {
            error!(
                "Fast store batch failed; consider smaller batches (ELASTIC_BATCH_SIZE / ELASTIC_MULTI_BATCH_SIZE): {}",
                e
            );
            return Err(e);
        }

        let mut rows = collected.lock().unwrap();
        Ok(std::mem::take(&mut *rows))
    }
}

impl Command for ElasticCommand {
    fn queries(&self) -> &QueryCollection {
        &self.queries
    }

    fn execute(&mut self) -> Result<(), StorageError> {
        self.rows.clear();

        let Some(first) = self.queries.first() else {
            warn!("Tried to execute an empty fast store query");
            return Ok(());
        };

        let lucene = first
            .get("lucene")
            .filter(|s| !s.is_empty())
            .ok_or(StorageError::MissingField("lucene"))?;
        let method: Method = first
            .get("request_type")
            .filter(|s| !s.is_empty())
            .ok_or(StorageError::MissingField("request_type"))?
            .parse()
            .map_err(|e: crate::http::HttpError| StorageError::Request(e.to_string()))?;
        let header = first.get("header").unwrap_or_default();

        let is_bulk = lucene.contains("_bulk");
        let is_multi_search = lucene.contains("_msearch");
        let framed = is_bulk || is_multi_search;

        let mut target = Target {
            http: Arc::clone(&self.http),
            method,
            url: format!("{}{}", self.settings.base_url, lucene),
            content_type: JSON,
            auth: self.settings.auth.clone(),
            verify_tls: self.settings.verify_tls,
        };

        if framed {
            if header.is_empty() {
                error!(lucene, "Query lacks header to perform bulk/msearch request");
                return Err(StorageError::MissingField("header"));
            }
            target.content_type = NDJSON;
        }

        let rows = if framed {
            let chunk_size = if is_multi_search {
                self.settings.multi_batch_size
            } else {
                self.settings.batch_size
            }
            .max(1);

            let bodies: Vec<String> = self
                .queries
                .as_slice()
                .chunks(chunk_size)
                .map(|chunk| {
                    chunk
                        .iter()
                        .map(|q| format!("{}\n{}\n", header, q.get("query").unwrap_or_default()))
                        .collect()
                })
                .collect();

            debug!(
                lucene,
                queries = self.queries.len(),
                requests = bodies.len(),
                "Executing framed fast store batch"
            );
            if bodies.len() == 1 {
                target.run(&bodies[0])?
            } else {
                self.run_concurrently(Arc::new(target), bodies)?
            }
        } else if self.queries.is_batch() {
            let bodies = self
                .queries
                .iter()
                .map(|q| q.get("query").unwrap_or_default().to_string())
                .collect();
            self.run_concurrently(Arc::new(target), bodies)?
        } else {
            target.run(first.get("query").unwrap_or_default())?
        };

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
        let row = self.rows.current()?;
        row.get("_source")
            .and_then(|source| source.get(name))
            .or_else(|| row.get(name))
            .map(ColumnValue::from)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::http::HttpResponse;
    use crate::storage::Query;
    use crate::thread_pool::ThreadPool;
    use serde_json::json;
    use std::path::Path;

    /// Replies with a fixed response and records request bodies.
    struct CannedHttp {
        status: u16,
        reply: String,
        bodies: Mutex<Vec<(String, String)>>,
    }

    impl CannedHttp {
        fn new(status: u16, reply: Value) -> Arc<Self> {
            Arc::new(Self {
                status,
                reply: reply.to_string(),
                bodies: Mutex::new(Vec::new()),
            })
        }
    }

    impl HttpClient for CannedHttp {
        fn send(&self, _m: Method, url: &str, body: &str, _ct: &str, _a: Option<&Auth>, _v: bool) -> HttpResponse {
            self.bodies.lock().unwrap().push((url.to_string(), body.to_string()));
            HttpResponse::new(self.status, self.reply.clone())
        }

        fn download_file(&self, _url: &str, _d: &Path, _t: u64, _v: bool) -> HttpResponse {
            HttpResponse::transport_error("not supported")
        }
    }

    fn settings() -> ElasticSettings {
        ElasticSettings {
            base_url: "https://es:9200/".to_string(),
            auth: Auth::new("elastic", "secret"),
            verify_tls: false,
            batch_size: 1000,
            multi_batch_size: 2,
        }
    }

    fn command(http: Arc<CannedHttp>, queries: QueryCollection) -> Box<dyn Command> {
        let pool = Arc::new(ThreadPool::new(2, 1, true));
        let connector = ElasticConnector::new(settings(), http, WorkSubmitter::new(pool));
        connector.create_connection().create_command(queries)
    }

    fn search(hashes: &str) -> Query {
        Query::new()
            .with("lucene", "fingerprint/_msearch")
            .with("header", "{}")
            .with("query", format!("{{\"terms\":[{}]}}", hashes))
            .with("request_type", "GET")
    }

    #[test]
    fn test_msearch_batch_is_chunked_and_flattened() {
        let reply = json!({
            "took": 3,
            "responses": [{
                "aggregations": {"sample": {"histogram": {"buckets": [
                    {"most_frequent": {"hits": {"hits": [
                        {"_source": {"hash": "11", "song_id": 42, "timestamp": 7}}
                    ]}}}
                ]}}}
            }]
        });
        let http = CannedHttp::new(200, reply);

        let mut batch = QueryCollection::new();
        for i in 0..5 {
            batch.insert_query(search(&i.to_string())).unwrap();
        }
        let mut cmd = command(http.clone(), batch);
        cmd.execute().unwrap();

        let bodies = http.bodies.lock().unwrap().clone();
        assert_eq!(bodies.len(), 3);
        assert!(bodies.iter().all(|(url, _)| url == "https://es:9200/fingerprint/_msearch"));
        assert!(bodies.iter().all(|(_, body)| body.starts_with("{}\n") && body.ends_with('\n')));

        // One hit per request
        assert_eq!(cmd.size(), 3);
        assert!(cmd.fetch_next());
        assert_eq!(cmd.as_u64("hash"), Some(11));
        assert_eq!(cmd.as_u64("song_id"), Some(42));
        assert_eq!(cmd.as_i32("timestamp"), Some(7));
    }

    #[test]
    fn test_count_response_is_single_row() {
        let http = CannedHttp::new(200, json!({"count": 12, "_shards": {"total": 1}}));
        let query = Query::new()
            .with("lucene", "fingerprint/_count")
            .with("query", "{\"query\":{\"match\":{\"song_id\":1}}}")
            .with("request_type", "GET");
        let mut cmd = command(http, QueryCollection::from(query));

        cmd.execute().unwrap();
        assert!(cmd.fetch_next());
        assert_eq!(cmd.as_usize("count"), Some(12));
    }

    #[test]
    fn test_error_responses_fail() {
        let http = CannedHttp::new(200, json!({"errors": true, "items": []}));
        let mut cmd = command(http, QueryCollection::from(search("1")));
        assert!(matches!(cmd.execute(), Err(StorageError::Backend(_))));

        let http = CannedHttp::new(503, json!({"status": 503}));
        let mut cmd = command(http, QueryCollection::from(search("1")));
        assert!(matches!(cmd.execute(), Err(StorageError::Request(_))));
    }

    #[test]
    fn test_framed_request_requires_header() {
        let http = CannedHttp::new(200, json!({}));
        let query = Query::new()
            .with("lucene", "fingerprint/_bulk")
            .with("query", "{}")
            .with("request_type", "POST");
        let mut cmd = command(http.clone(), QueryCollection::from(query));

        assert!(matches!(cmd.execute(), Err(StorageError::MissingField("header"))));
        assert!(http.bodies.lock().unwrap().is_empty());
    }

    #[test]
    fn test_missing_routing_fields() {
        let http = CannedHttp::new(200, json!({}));
        let mut cmd = command(http, QueryCollection::from(Query::new().with("query", "{}")));
        assert!(matches!(cmd.execute(), Err(StorageError::MissingField("lucene"))));
    }

    #[test]
    fn test_extract_plain_hits() {
        let rows = extract_hits(json!({"hits": {"hits": [{"_id": "a"}, {"_id": "b"}]}})).unwrap();
        assert_eq!(rows.len(), 2);
    }
}
