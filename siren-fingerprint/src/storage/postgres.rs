//! Primary row store over sqlx (PostgreSQL)
//!
//! Each query of a command carries its SQL under the `query` field. A batch runs
//! inside one transaction; rows returned by every statement are concatenated.

use super::{ColumnValue, Command, Connection, Connector, QueryCollection, RowBuffer, StorageError};
use crate::config::PostgresConfig;
use sqlx::postgres::{PgConnectOptions, PgConnection, PgRow};
use sqlx::{Column, Connection as SqlxConnection, Row};
use std::str::FromStr;
use std::sync::Arc;
use tokio::runtime::Handle;
use tokio::sync::Mutex;
use tracing::{debug, error, info};

/// Schema bootstrap for the fingerprint table
pub const SCHEMA: &[&str] = &[
    "CREATE TABLE IF NOT EXISTS fingerprint (
        hash BIGINT NOT NULL,
        song_id BIGINT NOT NULL,
        timestamp INTEGER NOT NULL
    )",
    "CREATE INDEX IF NOT EXISTS idx_fingerprint_hash ON fingerprint(hash)",
    "CREATE INDEX IF NOT EXISTS idx_fingerprint_song_id ON fingerprint(song_id)",
];

struct PgShared {
    handle: Handle,
    options: PgConnectOptions,
    connection: Mutex<Option<PgConnection>>,
}

/// Creates connections to the primary store.
///
/// Connections block on `handle`, so they must be used from plain threads.
pub struct PostgresConnector {
    handle: Handle,
    options: PgConnectOptions,
}

impl PostgresConnector {
    pub fn new(handle: Handle, config: &PostgresConfig) -> Result<Self, StorageError> {
        let options = PgConnectOptions::from_str(&config.url())?;
        Ok(Self { handle, options })
    }

    /// Create the fingerprint table and its indexes if missing.
    pub fn ensure_schema(&self) -> Result<(), StorageError> {
        let connection = self.create_connection();
        if !connection.is_alive() {
            return Err(StorageError::Connection(
                "could not open primary store for schema bootstrap".to_string(),
            ));
        }

        let mut queries = QueryCollection::new();
        for statement in SCHEMA {
            queries.insert_query(super::Query::new().with("query", *statement))?;
        }
        let mut command = connection.create_command(queries);
        command.execute()?;
        connection.close();
        info!("Primary store schema verified");
        Ok(())
    }
}

impl Connector for PostgresConnector {
    fn connector_type(&self) -> &'static str {
        "postgres"
    }

    fn create_connection(&self) -> Arc<dyn Connection> {
        let connection = PostgresConnection {
            shared: Arc::new(PgShared {
                handle: self.handle.clone(),
                options: self.options.clone(),
                connection: Mutex::new(None),
            }),
        };
        if let Err(e) = connection.open() {
            error!("Failed to open primary store connection: {}", e);
        }
        Arc::new(connection)
    }
}

pub struct PostgresConnection {
    shared: Arc<PgShared>,
}

impl Connection for PostgresConnection {
    fn open(&self) -> Result<(), StorageError> {
        let shared = Arc::clone(&self.shared);
        self.shared.handle.block_on(async move {
            let connection = PgConnection::connect_with(&shared.options).await?;
            *shared.connection.lock().await = Some(connection);
            Ok::<(), StorageError>(())
        })
    }

    fn close(&self) {
        let shared = Arc::clone(&self.shared);
        self.shared.handle.block_on(async move {
            if let Some(connection) = shared.connection.lock().await.take() {
                if let Err(e) = connection.close().await {
                    debug!("Error while closing primary store connection: {}", e);
                }
            }
        });
    }

    fn is_alive(&self) -> bool {
        let shared = Arc::clone(&self.shared);
        self.shared.handle.block_on(async move {
            match shared.connection.lock().await.as_mut() {
                Some(connection) => connection.ping().await.is_ok(),
                None => false,
            }
        })
    }

    fn create_command(&self, queries: QueryCollection) -> Box<dyn Command> {
        Box::new(PostgresCommand {
            shared: Arc::clone(&self.shared),
            queries,
            rows: RowBuffer::new(),
        })
    }
}

pub struct PostgresCommand {
    shared: Arc<PgShared>,
    queries: QueryCollection,
    rows: RowBuffer<PgRow>,
}

impl Command for PostgresCommand {
    fn queries(&self) -> &QueryCollection {
        &self.queries
    }

    fn execute(&mut self) -> Result<(), StorageError> {
        if self.queries.is_empty() {
            return Ok(());
        }

        let mut statements = Vec::with_capacity(self.queries.len());
        for query in &self.queries {
            let sql = query.get("query").ok_or(StorageError::MissingField("query"))?;
            statements.push(sql.to_string());
        }

        let shared = Arc::clone(&self.shared);
        let rows = self.shared.handle.block_on(async move {
            let mut guard = shared.connection.lock().await;
            let connection = guard
                .as_mut()
                .ok_or_else(|| StorageError::Connection("connection is not open".to_string()))?;

            let mut transaction = connection.begin().await?;
            let mut rows = Vec::new();
            for sql in &statements {
                let mut fetched = sqlx::query(sql).fetch_all(&mut *transaction).await?;
                rows.append(&mut fetched);
            }
            transaction.commit().await?;
            Ok::<_, StorageError>(rows)
        })?;

        debug!(
            statements = self.queries.len(),
            rows = rows.len(),
            "Primary store command executed"
        );
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
        let row = self.rows.current()?;
        let index = row.columns().iter().position(|c| c.name() == name)?;
        decode_column(row, index)
    }
}

fn decode_column(row: &PgRow, index: usize) -> Option<ColumnValue> {
    if let Ok(value) = row.try_get::<Option<i64>, _>(index) {
        return Some(value.map_or(ColumnValue::Null, ColumnValue::Int));
    }
    if let Ok(value) = row.try_get::<Option<i32>, _>(index) {
        return Some(value.map_or(ColumnValue::Null, |v| ColumnValue::Int(v.into())));
    }
    if let Ok(value) = row.try_get::<Option<i16>, _>(index) {
        return Some(value.map_or(ColumnValue::Null, |v| ColumnValue::Int(v.into())));
    }
    if let Ok(value) = row.try_get::<Option<bool>, _>(index) {
        return Some(value.map_or(ColumnValue::Null, ColumnValue::Bool));
    }
    if let Ok(value) = row.try_get::<Option<f64>, _>(index) {
        return Some(value.map_or(ColumnValue::Null, ColumnValue::Float));
    }
    if let Ok(value) = row.try_get::<Option<f32>, _>(index) {
        return Some(value.map_or(ColumnValue::Null, |v| ColumnValue::Float(v.into())));
    }
    if let Ok(value) = row.try_get::<Option<String>, _>(index) {
        return Some(value.map_or(ColumnValue::Null, ColumnValue::Text));
    }
    None
}
