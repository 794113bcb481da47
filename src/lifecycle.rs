//! Target dataset and table lifecycle.
//!
//! Every run starts from a clean table: [`TableLifecycle::recreate_table`]
//! drops whatever is there and creates it again from the given schema, so
//! reruns never accumulate rows. The same call is used when the upload stage
//! widens the table to its degraded schema.

use crate::error::LoadError;
use crate::schema::TableSchema;
use crate::sink::{SinkResult, TableRef, TableStats, WarehouseSink};
use std::sync::Arc;
use tracing::{debug, info};

pub struct TableLifecycle {
    sink: Arc<dyn WarehouseSink>,
    table: TableRef,
    location: String,
}

impl TableLifecycle {
    pub fn new(sink: Arc<dyn WarehouseSink>, table: TableRef, location: impl Into<String>) -> Self {
        Self {
            sink,
            table,
            location: location.into(),
        }
    }

    #[must_use]
    pub fn table(&self) -> &TableRef {
        &self.table
    }

    #[must_use]
    pub fn sink(&self) -> &dyn WarehouseSink {
        self.sink.as_ref()
    }

    /// Create the target dataset unless it already exists.
    ///
    /// # Errors
    /// Returns [`LoadError::Dataset`] if the lookup or the creation fails.
    pub fn ensure_dataset(&self) -> Result<(), LoadError> {
        let dataset = self.table.dataset_ref();
        if self.sink.dataset_exists(&dataset).map_err(LoadError::Dataset)? {
            debug!(%dataset, "dataset exists");
            return Ok(());
        }
        self.sink
            .create_dataset(&dataset, &self.location)
            .map_err(LoadError::Dataset)?;
        info!(%dataset, location = %self.location, "dataset created");
        Ok(())
    }

    /// Drop the table if present, then create it with `schema`.
    ///
    /// # Errors
    /// Returns [`LoadError::Schema`] for an invalid schema, or
    /// [`LoadError::Table`] if the drop or create fails.
    pub fn recreate_table(&self, schema: &TableSchema) -> Result<(), LoadError> {
        schema.validate()?;
        self.drop_table().map_err(LoadError::Table)?;
        self.sink
            .create_table(&self.table, schema)
            .map_err(LoadError::Table)?;
        info!(
            table = %self.table,
            columns = schema.len(),
            all_string = schema.is_all_string(),
            "table created"
        );
        Ok(())
    }

    /// Delete the table; a table that does not exist counts as deleted.
    ///
    /// # Errors
    /// Returns the sink error for anything other than "not found".
    pub fn drop_table(&self) -> SinkResult<()> {
        match self.sink.delete_table(&self.table) {
            Ok(()) => {
                debug!(table = %self.table, "table dropped");
                Ok(())
            }
            Err(e) if e.is_not_found() => Ok(()),
            Err(e) => Err(e),
        }
    }

    /// Row count and stored size of the table after the load.
    ///
    /// # Errors
    /// Returns [`LoadError::Stats`] if the sink cannot report them.
    pub fn final_stats(&self) -> Result<TableStats, LoadError> {
        self.sink.table_stats(&self.table).map_err(LoadError::Stats)
    }
}
