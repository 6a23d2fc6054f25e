//! Fixed-size connection pool

use super::{Connection, Connector, StorageError};
use crate::common::SafeQueue;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use tracing::{error, info, warn};

/// Pool of reusable connections to one back-end.
///
/// `get_connection` hands out an idle connection, creates one on the fly while
/// fewer than `capacity` exist, and otherwise blocks until one is released.
pub struct ConnectionPool {
    connector: Arc<dyn Connector>,
    idle: SafeQueue<Arc<dyn Connection>>,
    capacity: usize,
    /// Connections owned by the pool (idle + checked out)
    owned: AtomicUsize,
    closed: AtomicBool,
}

impl ConnectionPool {
    /// Create the pool and open up to `capacity` connections eagerly.
    pub fn new(connector: Arc<dyn Connector>, capacity: usize) -> Self {
        let pool = Self {
            connector,
            idle: SafeQueue::new(),
            capacity,
            owned: AtomicUsize::new(0),
            closed: AtomicBool::new(false),
        };

        for _ in 0..capacity {
            let connection = pool.connector.create_connection();
            if !connection.is_alive() {
                warn!(
                    backend = pool.connector.connector_type(),
                    "Initial connection is not alive; remaining connections will be created on demand"
                );
                break;
            }
            pool.idle.push(connection);
            pool.owned.fetch_add(1, Ordering::SeqCst);
        }

        info!(
            backend = pool.connector.connector_type(),
            "Connection pool initialized with {} of {} connections",
            pool.idle.size(),
            capacity
        );
        pool
    }

    fn create_on_the_fly(&self) -> Result<Arc<dyn Connection>, StorageError> {
        let connection = self.connector.create_connection();
        if !connection.is_alive() && !connection.try_revive() {
            error!(
                backend = self.connector.connector_type(),
                "Connection created on the fly is invalid"
            );
            return Err(StorageError::Connection(format!(
                "could not open a {} connection",
                self.connector.connector_type()
            )));
        }
        Ok(connection)
    }

    /// Check out a connection.
    pub fn get_connection(&self) -> Result<Arc<dyn Connection>, StorageError> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(StorageError::PoolClosed);
        }

        if self.capacity == 0 {
            warn!(
                backend = self.connector.connector_type(),
                "Connection pool has no capacity, creating a connection on the fly"
            );
            return self.create_on_the_fly();
        }

        let connection = match self.idle.try_pop() {
            Some(connection) => connection,
            None => {
                let reserved = self
                    .owned
                    .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |owned| {
                        (owned < self.capacity).then_some(owned + 1)
                    })
                    .is_ok();
                if reserved {
                    return self.create_on_the_fly().inspect_err(|_| {
                        self.owned.fetch_sub(1, Ordering::SeqCst);
                    });
                }
                self.idle.pop().ok_or(StorageError::PoolClosed)?
            }
        };

        if connection.is_alive() || connection.try_revive() {
            return Ok(connection);
        }

        warn!(
            backend = self.connector.connector_type(),
            "Idle connection could not be revived, replacing it"
        );
        self.create_on_the_fly().inspect_err(|_| {
            self.owned.fetch_sub(1, Ordering::SeqCst);
        })
    }

    /// Return a connection. A connection that cannot be revived is dropped and
    /// reported as an error.
    pub fn release_connection(&self, connection: Arc<dyn Connection>) -> Result<(), StorageError> {
        if !connection.is_alive() && !connection.try_revive() {
            error!(
                backend = self.connector.connector_type(),
                invariant = "pool-connection-alive",
                "Client returned a broken connection"
            );
            self.owned.fetch_sub(1, Ordering::SeqCst);
            return Err(StorageError::BrokenConnection);
        }

        if self.closed.load(Ordering::SeqCst) {
            connection.close();
            self.owned.fetch_sub(1, Ordering::SeqCst);
            return Ok(());
        }

        self.idle.push(connection);
        Ok(())
    }

    /// Run `f` with a checked-out connection, releasing it afterwards.
    pub fn with_connection<R>(
        &self,
        f: impl FnOnce(&dyn Connection) -> R,
    ) -> Result<R, StorageError> {
        let connection = self.get_connection()?;
        let result = f(connection.as_ref());
        self.release_connection(connection)?;
        Ok(result)
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn idle_count(&self) -> usize {
        self.idle.size()
    }

    pub fn backend(&self) -> &'static str {
        self.connector.connector_type()
    }

    /// Close every idle connection and wake blocked callers. Idempotent.
    pub fn close(&self) {
        if self.closed.swap(true, Ordering::SeqCst) {
            return;
        }

        while let Some(connection) = self.idle.try_pop() {
            connection.close();
            self.owned.fetch_sub(1, Ordering::SeqCst);
        }
        self.idle.signal_abort();

        let outstanding = self.owned.load(Ordering::SeqCst);
        if outstanding != 0 {
            warn!(
                backend = self.connector.connector_type(),
                "Connection pool closed with {} connections still checked out", outstanding
            );
        }
        info!(backend = self.connector.connector_type(), "Connection pool has been shut down");
    }
}

impl Drop for ConnectionPool {
    fn drop(&mut self) {
        self.close();
    }
}
