//! Velocity Core - GP velocity metrics from the warehouse
//!
//! This library reads the synced company table from the warehouse, maps each
//! row to a [`VelocityRecord`], and reduces the record set to
//! [`VelocityMetrics`].

pub mod aggregator;
pub mod config;
pub mod error;
pub mod metrics;
pub mod record;
pub mod warehouse;

pub use aggregator::{Aggregator, VelocitySource};
pub use config::Config;
pub use error::VelocityError;
pub use metrics::{calculate_metrics, TierBreakdown, VelocityMetrics, VelocityTier};
pub use record::{RawRow, VelocityRecord};
pub use warehouse::{BigQueryClient, TableRef};

/// Result type alias for velocity operations
pub type Result<T> = std::result::Result<T, VelocityError>;
