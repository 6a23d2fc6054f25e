//! Query builders for both stores

use crate::storage::{Query, QueryCollection, StorageError};
use crate::types::{Fingerprint, Hash, SongId, Timestamp};
use serde_json::json;

pub const FINGERPRINT_INDEX: &str = "fingerprint";

/// Rows per INSERT statement
const INSERT_CHUNK: usize = 1000;

/// Hashes are stored in signed BIGINT columns
fn sql_hash(hash: Hash) -> i64 {
    hash as i64
}

/// Fast-store parameters for the lookup aggregation
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SearchShape {
    pub hashes_per_query: usize,
    pub result_window: usize,
    pub focus_buckets: usize,
}

/// `_msearch` lookups, one per `hashes_per_query` hashes.
///
/// Each search samples the best `focus_buckets` songs and keeps up to
/// `result_window` hits per song.
pub fn cache_lookup(fingerprint: &Fingerprint, shape: &SearchShape) -> Result<QueryCollection, StorageError> {
    let hashes: Vec<String> = fingerprint.hashes().map(|h| h.to_string()).collect();
    let shard_size = shape.focus_buckets * shape.result_window;

    let mut queries = QueryCollection::with_capacity(hashes.len() / shape.hashes_per_query.max(1) + 1);
    for chunk in hashes.chunks(shape.hashes_per_query.max(1)) {
        let body = json!({
            "size": 0,
            "query": {
                "function_score": {
                    "random_score": {},
                    "query": {"terms": {"hash": chunk}}
                }
            },
            "aggs": {
                "sample": {
                    "sampler": {"shard_size": shard_size},
                    "aggs": {
                        "histogram": {
                            "terms": {"field": "song_id", "size": shape.focus_buckets},
                            "aggs": {
                                "most_frequent": {"top_hits": {"size": shape.result_window}}
                            }
                        }
                    }
                }
            }
        });
        queries.insert_query(
            Query::new()
                .with("lucene", format!("{}/_msearch", FINGERPRINT_INDEX))
                .with("header", "{}")
                .with("query", body.to_string())
                .with("request_type", "GET"),
        )?;
    }
    Ok(queries)
}

/// Rows of the primary store sharing any hash of `fingerprint`
pub fn primary_lookup(fingerprint: &Fingerprint) -> Query {
    let hashes: Vec<String> = fingerprint.hashes().map(|h| sql_hash(h).to_string()).collect();
    Query::new().with(
        "query",
        format!(
            "SELECT hash, timestamp, song_id FROM fingerprint WHERE hash = ANY('{{{}}}'::BIGINT[])",
            hashes.join(",")
        ),
    )
}

/// Atomically report whether `song_id` exists and, if not, insert a placeholder row.
///
/// The single result column `find_song_id` is true when the id was already taken.
pub fn claim_song_id(song_id: SongId) -> Query {
    Query::new().with(
        "query",
        format!(
            "WITH existing AS (SELECT 1 FROM fingerprint WHERE song_id = {id} LIMIT 1), \
             claimed AS (INSERT INTO fingerprint (hash, song_id, timestamp) \
             SELECT -1, {id}, -1 WHERE NOT EXISTS (SELECT 1 FROM existing) RETURNING song_id) \
             SELECT EXISTS (SELECT 1 FROM existing) AS find_song_id",
            id = sql_hash(song_id)
        ),
    )
}

/// Remove the placeholder row written by [`claim_song_id`]
pub fn release_claim(song_id: SongId) -> Query {
    Query::new().with(
        "query",
        format!(
            "DELETE FROM fingerprint WHERE hash = -1 AND timestamp = -1 AND song_id = {}",
            sql_hash(song_id)
        ),
    )
}

/// INSERT batches for the whole fingerprint followed by the placeholder cleanup.
pub fn primary_insert(fingerprint: &Fingerprint, song_id: SongId) -> Result<QueryCollection, StorageError> {
    let song = sql_hash(song_id);
    let mut queries = QueryCollection::new();
    for chunk in fingerprint.points().chunks(INSERT_CHUNK) {
        let values: Vec<String> = chunk
            .iter()
            .map(|&(hash, timestamp)| format!("({},{},{})", sql_hash(hash), song, timestamp))
            .collect();
        queries.insert_query(Query::new().with(
            "query",
            format!(
                "INSERT INTO fingerprint (hash, song_id, timestamp) VALUES {}",
                values.join(",")
            ),
        ))?;
    }
    queries.insert_query(release_claim(song_id))?;
    Ok(queries)
}

/// Stored rows of one song (placeholder excluded)
pub fn primary_rows_of_song(song_id: SongId) -> Query {
    Query::new().with(
        "query",
        format!(
            "SELECT hash, timestamp, song_id FROM fingerprint WHERE song_id = {} AND timestamp <> -1",
            sql_hash(song_id)
        ),
    )
}

pub fn primary_purge(song_id: SongId) -> Query {
    Query::new().with(
        "query",
        format!("DELETE FROM fingerprint WHERE song_id = {}", sql_hash(song_id)),
    )
}

/// `_bulk` index actions, one document per (hash, timestamp)
pub fn cache_insert<I>(points: I, song_id: SongId) -> Result<QueryCollection, StorageError>
where
    I: IntoIterator<Item = (Hash, Timestamp)>,
{
    let mut queries = QueryCollection::new();
    for (hash, timestamp) in points {
        let document = json!({
            "hash": hash.to_string(),
            "song_id": song_id,
            "timestamp": timestamp,
        });
        queries.insert_query(
            Query::new()
                .with("lucene", format!("{}/_bulk", FINGERPRINT_INDEX))
                .with("header", "{\"index\": {}}")
                .with("query", document.to_string())
                .with("request_type", "POST"),
        )?;
    }
    Ok(queries)
}

/// `_count` of documents for `song_id`; result column `count`
pub fn cache_count(song_id: SongId) -> Query {
    Query::new()
        .with("lucene", format!("{}/_count", FINGERPRINT_INDEX))
        .with("query", json!({"query": {"match": {"song_id": song_id}}}).to_string())
        .with("request_type", "GET")
}

pub fn cache_purge(song_id: SongId) -> Query {
    Query::new()
        .with("lucene", format!("{}/_delete_by_query", FINGERPRINT_INDEX))
        .with("query", json!({"query": {"term": {"song_id": song_id}}}).to_string())
        .with("request_type", "POST")
}
