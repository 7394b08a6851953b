//! I/O traits for reading and writing geospatial data.
//!
//! A reader produces a [`GeoTable`]; a writer consumes one. Keeping the two
//! behind traits lets the export pipeline run against in-memory sources in
//! tests.

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use pgshp_shared::{SpatialReadResult, SpatialWriteResult};

use crate::table::GeoTable;

/// Trait for reading a [`GeoTable`] from a data source.
#[async_trait]
pub trait DataReader: Send + Sync {
    /// Reads the complete result set into memory.
    ///
    /// # Errors
    ///
    /// Returns a [`pgshp_shared::SpatialReadError`] if the source cannot be
    /// reached, the query fails, or a value cannot be converted.
    async fn read(&self) -> SpatialReadResult<GeoTable>;
}

/// Trait for writing a [`GeoTable`] to a file format.
pub trait DataWriter: Send + Sync {
    /// Writes `table` to `path`, replacing any existing output.
    ///
    /// # Errors
    ///
    /// Returns a [`pgshp_shared::SpatialWriteError`] if the table cannot be
    /// represented in the format or the files cannot be written.
    fn write(&self, table: &GeoTable, path: &Path) -> SpatialWriteResult<WriteSummary>;
}

/// Description of a field as it was written to the output.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WrittenField {
    /// Field name in the output.
    pub name: String,
    /// Output type code or name (e.g. `"C"`, `"N"`).
    pub field_type: String,
    /// Width in characters.
    pub width: usize,
    /// Number of decimal places.
    pub decimals: usize,
}

/// Outcome of a successful write.
#[derive(Debug, Clone)]
pub struct WriteSummary {
    /// Main output file, after any extension the format appends.
    pub path: PathBuf,
    /// Every file created or replaced, in creation order.
    pub files: Vec<PathBuf>,
    /// Number of feature records written.
    pub feature_count: usize,
    /// Output geometry type name.
    pub geometry_type: String,
    /// Attribute fields in output order.
    pub fields: Vec<WrittenField>,
}
