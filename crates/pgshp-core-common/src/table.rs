//! In-memory tabular-with-geometry collection.
//!
//! A [`GeoTable`] is a list of Arrow record batches sharing one schema, with
//! exactly one designated geometry column. Geometries are stored as ISO WKB in
//! a `Binary` column tagged with the `geoarrow.wkb` extension, so any Arrow
//! consumer that understands `GeoArrow` can read them directly.

use std::collections::HashMap;

use arrow_array::cast::AsArray;
use arrow_array::{Array, RecordBatch};
use arrow_schema::{ArrowError, DataType, Field, FieldRef, SchemaRef};
use serde_json::json;

/// Arrow metadata key holding an extension type name.
pub const EXTENSION_NAME_KEY: &str = "ARROW:extension:name";

/// Arrow metadata key holding serialized extension metadata.
pub const EXTENSION_METADATA_KEY: &str = "ARROW:extension:metadata";

/// Extension name used for the geometry column.
pub const GEOMETRY_EXTENSION_NAME: &str = "geoarrow.wkb";

/// Coordinate reference system attached to a geometry column.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Crs {
    /// Spatial reference identifier as stored in PostGIS `spatial_ref_sys`.
    pub srid: i32,
    /// Authority name and code (`auth_name`, `auth_srid`), when known.
    pub authority: Option<(String, i32)>,
    /// Well-known text definition, when known.
    pub wkt: Option<String>,
}

impl Crs {
    /// Creates a CRS known only by its SRID.
    #[must_use]
    pub fn new(srid: i32) -> Self {
        Self {
            srid,
            authority: None,
            wkt: None,
        }
    }

    /// Attaches the defining authority, e.g. `("EPSG", 4326)`.
    #[must_use]
    pub fn with_authority(mut self, name: impl Into<String>, code: i32) -> Self {
        self.authority = Some((name.into(), code));
        self
    }

    /// Attaches the WKT definition.
    #[must_use]
    pub fn with_wkt(mut self, wkt: impl Into<String>) -> Self {
        self.wkt = Some(wkt.into());
        self
    }

    /// Returns `<auth_name>:<auth_srid>`, or `SRID:<srid>` when no
    /// authority is known.
    #[must_use]
    pub fn authority_code(&self) -> String {
        match &self.authority {
            Some((name, code)) => format!("{name}:{code}"),
            None => format!("SRID:{}", self.srid),
        }
    }
}

/// Builds the Arrow field used for a geometry column.
#[must_use]
pub fn geometry_field(name: &str, crs: Option<&Crs>) -> Field {
    let extension_metadata = match crs {
        Some(crs) => json!({ "crs": crs.authority_code() }),
        None => json!({}),
    };

    let metadata = HashMap::from([
        (
            EXTENSION_NAME_KEY.to_string(),
            GEOMETRY_EXTENSION_NAME.to_string(),
        ),
        (
            EXTENSION_METADATA_KEY.to_string(),
            extension_metadata.to_string(),
        ),
    ]);

    Field::new(name, DataType::Binary, true).with_metadata(metadata)
}

/// Returns `true` if the field carries the geometry extension tag.
#[must_use]
pub fn is_geometry_field(field: &Field) -> bool {
    field
        .metadata()
        .get(EXTENSION_NAME_KEY)
        .is_some_and(|name| name == GEOMETRY_EXTENSION_NAME)
}

/// Ordered rows of attributes plus one geometry per row.
#[derive(Debug, Clone)]
pub struct GeoTable {
    schema: SchemaRef,
    batches: Vec<RecordBatch>,
    geometry_index: usize,
    crs: Option<Crs>,
}

impl GeoTable {
    /// Creates a table from batches that all share `schema`.
    ///
    /// # Errors
    ///
    /// Returns an error if `geometry_column` is not in the schema, is not a
    /// `Binary` column, or if a batch has a different set of fields.
    pub fn try_new(
        schema: SchemaRef,
        batches: Vec<RecordBatch>,
        geometry_column: &str,
        crs: Option<Crs>,
    ) -> Result<Self, ArrowError> {
        let geometry_index = schema.index_of(geometry_column)?;
        let data_type = schema.field(geometry_index).data_type();
        if data_type != &DataType::Binary {
            return Err(ArrowError::SchemaError(format!(
                "Geometry column '{geometry_column}' must be Binary WKB, found {data_type}"
            )));
        }

        for batch in &batches {
            if batch.schema().fields() != schema.fields() {
                return Err(ArrowError::SchemaError(
                    "Record batch schema does not match the table schema".to_string(),
                ));
            }
        }

        Ok(Self {
            schema,
            batches,
            geometry_index,
            crs,
        })
    }

    /// The table schema, including the geometry column.
    #[must_use]
    pub fn schema(&self) -> &SchemaRef {
        &self.schema
    }

    /// The record batches in row order.
    #[must_use]
    pub fn batches(&self) -> &[RecordBatch] {
        &self.batches
    }

    /// Name of the geometry column.
    #[must_use]
    pub fn geometry_column(&self) -> &str {
        self.schema.field(self.geometry_index).name()
    }

    /// Position of the geometry column in the schema.
    #[must_use]
    pub fn geometry_index(&self) -> usize {
        self.geometry_index
    }

    /// The coordinate reference system shared by all geometries.
    #[must_use]
    pub fn crs(&self) -> Option<&Crs> {
        self.crs.as_ref()
    }

    /// Total number of rows across all batches.
    #[must_use]
    pub fn num_rows(&self) -> usize {
        self.batches.iter().map(RecordBatch::num_rows).sum()
    }

    /// Returns `true` if the table has no rows.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.num_rows() == 0
    }

    /// Every non-geometry field with its column index, in schema order.
    #[must_use]
    pub fn attribute_fields(&self) -> Vec<(usize, &FieldRef)> {
        self.schema
            .fields()
            .iter()
            .enumerate()
            .filter(|(index, _)| *index != self.geometry_index)
            .collect()
    }

    /// WKB geometries in row order; `None` for null geometries.
    pub fn geometries(&self) -> impl Iterator<Item = Option<&[u8]>> + '_ {
        self.batches.iter().flat_map(move |batch| {
            let array = batch.column(self.geometry_index).as_binary::<i32>();
            (0..array.len()).map(move |row| array.is_valid(row).then(|| array.value(row)))
        })
    }
}
