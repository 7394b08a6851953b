//! Data types describing query results and finished exports.
//!
//! These are plain values for display; they hold no connections or buffers.

use std::path::PathBuf;

use arrow_schema::DataType;
use pgshp_core_common::table::EXTENSION_NAME_KEY;
use pgshp_core_common::{GeoTable, WriteSummary, WrittenField};

/// Information about a query result.
#[derive(Debug, Clone)]
pub struct TableInfo {
    /// SQL text that produced the result
    pub query: String,
    /// Number of rows returned
    pub row_count: usize,
    /// Geometry column information
    pub geometry: GeometryColumnInfo,
    /// Attribute fields, in column order
    pub fields: Vec<FieldInfo>,
}

/// Information about a geometry column.
#[derive(Debug, Clone)]
pub struct GeometryColumnInfo {
    /// Column name
    pub name: String,
    /// Data type description
    pub data_type: String,
    /// Extension name (e.g., "geoarrow.wkb")
    pub extension: Option<String>,
    /// CRS information
    pub crs: Option<String>,
}

/// Information about a field/column.
#[derive(Debug, Clone)]
pub struct FieldInfo {
    /// Field name
    pub name: String,
    /// Data type
    pub data_type: String,
    /// Whether the field is nullable
    pub nullable: bool,
}

impl TableInfo {
    /// Describes `table`, which was produced by `query`.
    #[must_use]
    pub fn from_table(query: &str, table: &GeoTable) -> Self {
        let geometry_field = table.schema().field(table.geometry_index());
        let geometry = GeometryColumnInfo {
            name: geometry_field.name().clone(),
            data_type: format_data_type(geometry_field.data_type()),
            extension: geometry_field.metadata().get(EXTENSION_NAME_KEY).cloned(),
            crs: table.crs().map(|crs| crs.authority_code()),
        };

        let fields = table
            .attribute_fields()
            .into_iter()
            .map(|(_, field)| FieldInfo {
                name: field.name().clone(),
                data_type: format_data_type(field.data_type()),
                nullable: field.is_nullable(),
            })
            .collect();

        Self {
            query: query.to_string(),
            row_count: table.num_rows(),
            geometry,
            fields,
        }
    }
}

/// Outcome of a completed export.
#[derive(Debug, Clone)]
pub struct ExportSummary {
    /// Path of the `.shp` file
    pub output: PathBuf,
    /// Every file created or replaced
    pub files: Vec<PathBuf>,
    /// Number of features written
    pub feature_count: usize,
    /// Shapefile geometry type name
    pub geometry_type: String,
    /// Attribute fields as written
    pub fields: Vec<WrittenField>,
    /// Authority code of the source CRS, e.g. `EPSG:4326`
    pub crs: Option<String>,
}

impl ExportSummary {
    pub(crate) fn new(table: &GeoTable, summary: WriteSummary) -> Self {
        Self {
            output: summary.path,
            files: summary.files,
            feature_count: summary.feature_count,
            geometry_type: summary.geometry_type,
            fields: summary.fields,
            crs: table.crs().map(|crs| crs.authority_code()),
        }
    }
}

/// Formats an Arrow [`DataType`] as a short, human-readable label.
#[must_use]
pub fn format_data_type(data_type: &DataType) -> String {
    match data_type {
        DataType::Utf8 => "String".to_string(),
        DataType::LargeUtf8 => "LargeString".to_string(),
        DataType::Timestamp(unit, tz) => {
            let tz_str = tz.as_ref().map_or("", |t| t.as_ref());
            format!("Timestamp({unit:?}, {tz_str})")
        },
        _ => format!("{data_type:?}"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    use arrow_array::{ArrayRef, BinaryArray, Int64Array, RecordBatch, StringArray};
    use arrow_schema::{Field, Schema, TimeUnit};
    use pgshp_core_common::{Crs, geometry_field};

    fn table() -> GeoTable {
        let crs = Crs::new(4326).with_authority("EPSG", 4326);
        let schema = Arc::new(Schema::new(vec![
            Field::new("gid", DataType::Int64, false),
            Field::new("name", DataType::Utf8, true),
            geometry_field("geom", Some(&crs)),
        ]));
        let columns: Vec<ArrayRef> = vec![
            Arc::new(Int64Array::from(vec![1, 2])),
            Arc::new(StringArray::from(vec![Some("Main"), None])),
            Arc::new(BinaryArray::from_iter(vec![None::<Vec<u8>>, None])),
        ];
        let batch = RecordBatch::try_new(schema.clone(), columns).unwrap();
        GeoTable::try_new(schema, vec![batch], "geom", Some(crs)).unwrap()
    }

    #[test]
    fn test_table_info_from_table() {
        let info = TableInfo::from_table("SELECT * FROM roads", &table());

        assert_eq!(info.query, "SELECT * FROM roads");
        assert_eq!(info.row_count, 2);
        assert_eq!(info.geometry.name, "geom");
        assert_eq!(info.geometry.data_type, "Binary");
        assert_eq!(info.geometry.extension.as_deref(), Some("geoarrow.wkb"));
        assert_eq!(info.geometry.crs.as_deref(), Some("EPSG:4326"));

        assert_eq!(info.fields.len(), 2);
        assert_eq!(info.fields[0].name, "gid");
        assert_eq!(info.fields[0].data_type, "Int64");
        assert!(!info.fields[0].nullable);
        assert_eq!(info.fields[1].data_type, "String");
        assert!(info.fields[1].nullable);
    }

    #[test]
    fn test_format_data_type() {
        assert_eq!(format_data_type(&DataType::Boolean), "Boolean");
        assert_eq!(format_data_type(&DataType::Float64), "Float64");
        assert_eq!(format_data_type(&DataType::Date32), "Date32");
        assert_eq!(
            format_data_type(&DataType::Timestamp(
                TimeUnit::Microsecond,
                Some("UTC".into())
            )),
            "Timestamp(Microsecond, UTC)"
        );
        assert_eq!(
            format_data_type(&DataType::Timestamp(TimeUnit::Microsecond, None)),
            "Timestamp(Microsecond, )"
        );
    }
}
