//! Connection and connector abstractions

use super::{Command, Query, QueryCollection};
use std::sync::Arc;

/// A live link to one storage back-end.
pub trait Connection: Send + Sync {
    fn open(&self) -> Result<(), super::StorageError>;

    fn close(&self);

    fn is_alive(&self) -> bool;

    /// Close and reopen. Returns whether the connection is usable afterwards.
    fn try_revive(&self) -> bool {
        self.close();
        self.open().is_ok() && self.is_alive()
    }

    fn create_command(&self, queries: QueryCollection) -> Box<dyn Command>;

    fn create_query_command(&self, query: Query) -> Box<dyn Command> {
        self.create_command(QueryCollection::from(query))
    }
}

/// Factory for connections to one back-end.
pub trait Connector: Send + Sync {
    /// Short back-end name used in logs
    fn connector_type(&self) -> &'static str;

    /// Create (and try to open) a connection. The result may be dead; callers
    /// check `is_alive`.
    fn create_connection(&self) -> Arc<dyn Connection>;
}
