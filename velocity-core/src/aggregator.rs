//! Query + reduce: the unit the metrics endpoint calls.

use crate::metrics::{calculate_metrics, VelocityMetrics};
use crate::record::{RawRow, VelocityRecord, COLUMNS, COL_VELOCITY_TIER};
use crate::warehouse::TableRef;
use async_trait::async_trait;
use std::sync::Arc;
use tracing::info;

/// Tabular data source reachable by a query string.
#[async_trait]
pub trait VelocitySource: Send + Sync {
    /// Run `sql` and return every result row keyed by column name.
    async fn fetch_rows(&self, sql: &str) -> crate::Result<Vec<RawRow>>;

    /// The table velocity data is read from.
    fn table(&self) -> &TableRef;
}

/// Build the velocity projection over `table`.
pub fn velocity_query(table: &TableRef) -> String {
    format!(
        "SELECT {} FROM `{}` WHERE {} IS NOT NULL",
        COLUMNS.join(", "),
        table,
        COL_VELOCITY_TIER
    )
}

/// Reads velocity records from a [`VelocitySource`] and summarizes them.
#[derive(Clone)]
pub struct Aggregator {
    source: Arc<dyn VelocitySource>,
}

impl Aggregator {
    pub fn new(source: Arc<dyn VelocitySource>) -> Self {
        Self { source }
    }

    pub fn table(&self) -> &TableRef {
        self.source.table()
    }

    /// Fetch all tiered company records. Errors are returned as-is, never retried.
    pub async fn query_velocity_data(&self) -> crate::Result<Vec<VelocityRecord>> {
        let table = self.source.table();
        let sql = velocity_query(table);
        info!(table = %table, "querying velocity data");

        let rows = self.source.fetch_rows(&sql).await?;
        info!(rows = rows.len(), "retrieved velocity records");

        Ok(rows.iter().map(VelocityRecord::from_row).collect())
    }

    pub async fn get_velocity_metrics(&self) -> crate::Result<VelocityMetrics> {
        let records = self.query_velocity_data().await?;
        Ok(calculate_metrics(&records))
    }
}
