//! `pgshp-core` is the core library of `pgshp`, exporting the result of a
//! PostGIS query to an ESRI Shapefile.
//!
//! This crate includes:
//! - **Configuration**: [`ExportConfig`] with the built-in defaults.
//! - **Operations**: [`export`] and [`inspect`], plus reader/writer generic
//!   variants.
//! - **Errors**: the root [`PgShpError`] with user-facing messages.

pub mod config;
pub mod error;
pub mod operations;
pub mod types;

pub use config::{
    DEFAULT_BATCH_SIZE, DEFAULT_DATABASE_URL, DEFAULT_GEOMETRY_COLUMN, DEFAULT_OUTPUT,
    DEFAULT_QUERY, ExportConfig,
};
pub use error::{ConfigError, PgShpError, Result};
pub use operations::{export, export_with, inspect, inspect_with};
pub use pgshp_core_common::WrittenField;
pub use types::{ExportSummary, FieldInfo, GeometryColumnInfo, TableInfo};
