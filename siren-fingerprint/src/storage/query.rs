//! Query bodies and homogeneous batches

use super::StorageError;
use std::collections::BTreeMap;

/// A single request body: named string fields.
///
/// Keys are kept ordered so two queries can be compared by field set.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Query {
    body: BTreeMap<String, String>,
}

impl Query {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert a field. An existing field keeps its first value.
    pub fn emplace(&mut self, key: impl Into<String>, value: impl Into<String>) -> &mut Self {
        self.body.entry(key.into()).or_insert_with(|| value.into());
        self
    }

    /// Builder form of [`Query::emplace`]
    pub fn with(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.emplace(key, value);
        self
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.body.get(key).map(String::as_str)
    }

    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.body.keys().map(String::as_str)
    }

    /// True when both queries carry exactly the same field names.
    pub fn key_compare(&self, other: &Query) -> bool {
        self.body.len() == other.body.len() && self.keys().eq(other.keys())
    }

    pub fn len(&self) -> usize {
        self.body.len()
    }

    pub fn is_empty(&self) -> bool {
        self.body.is_empty()
    }
}

impl<K, V> FromIterator<(K, V)> for Query
where
    K: Into<String>,
    V: Into<String>,
{
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        let mut query = Query::new();
        for (key, value) in iter {
            query.emplace(key, value);
        }
        query
    }
}

/// Batch of queries sharing one field set.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct QueryCollection {
    queries: Vec<Query>,
}

impl QueryCollection {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            queries: Vec::with_capacity(capacity),
        }
    }

    /// Append a query. Rejected when its field names differ from the first query's.
    pub fn insert_query(&mut self, query: Query) -> Result<(), StorageError> {
        if let Some(first) = self.queries.first() {
            if !first.key_compare(&query) {
                return Err(StorageError::HeterogeneousBatch {
                    expected: first.keys().map(str::to_string).collect(),
                    found: query.keys().map(str::to_string).collect(),
                });
            }
        }
        self.queries.push(query);
        Ok(())
    }

    pub fn first(&self) -> Option<&Query> {
        self.queries.first()
    }

    pub fn get(&self, index: usize) -> Option<&Query> {
        self.queries.get(index)
    }

    pub fn iter(&self) -> std::slice::Iter<'_, Query> {
        self.queries.iter()
    }

    pub fn as_slice(&self) -> &[Query] {
        &self.queries
    }

    pub fn len(&self) -> usize {
        self.queries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.queries.is_empty()
    }

    pub fn is_batch(&self) -> bool {
        self.queries.len() > 1
    }
}

impl From<Query> for QueryCollection {
    fn from(query: Query) -> Self {
        Self {
            queries: vec![query],
        }
    }
}

impl IntoIterator for QueryCollection {
    type Item = Query;
    type IntoIter = std::vec::IntoIter<Query>;

    fn into_iter(self) -> Self::IntoIter {
        self.queries.into_iter()
    }
}

impl<'a> IntoIterator for &'a QueryCollection {
    type Item = &'a Query;
    type IntoIter = std::slice::Iter<'a, Query>;

    fn into_iter(self) -> Self::IntoIter {
        self.queries.iter()
    }
}
