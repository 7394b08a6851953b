//! Display utilities for formatting CLI output.
//!
//! This module provides table row structures and formatting functions
//! for presenting query schemas and export results in a human-readable format.

use tabled::{Table, Tabled};

use pgshp_core::{ExportSummary, TableInfo};

/// Table row representation for displaying geometry column information.
#[derive(Tabled)]
pub struct GeometryRow {
    /// Name of the geometry column.
    #[tabled(rename = "Column")]
    pub name: String,
    /// Storage type of the geometry column.
    #[tabled(rename = "Type")]
    pub data_type: String,
    /// `GeoArrow` extension name for the geometry encoding.
    #[tabled(rename = "Extension")]
    pub extension: String,
    /// Coordinate Reference System information.
    #[tabled(rename = "CRS")]
    pub crs: String,
}

/// Table row representation for displaying field/column information.
#[derive(Tabled)]
pub struct FieldRow {
    /// Name of the field.
    #[tabled(rename = "Field")]
    pub name: String,
    /// Data type of the field.
    #[tabled(rename = "Type")]
    pub data_type: String,
    /// Whether the field can contain null values.
    #[tabled(rename = "Nullable")]
    pub nullable: String,
}

/// Table row representation for a dBASE field as written.
#[derive(Tabled)]
pub struct DbfFieldRow {
    /// Name of the field.
    #[tabled(rename = "Field")]
    pub name: String,
    /// dBASE type code.
    #[tabled(rename = "Type")]
    pub field_type: String,
    #[tabled(rename = "Width")]
    pub width: usize,
    #[tabled(rename = "Decimals")]
    pub decimals: usize,
}

fn or_na(value: Option<&String>) -> String {
    value.cloned().unwrap_or_else(|| "N/A".to_string())
}

/// Display query result information in a formatted table.
///
/// # Arguments
///
/// * `info` - The table information to display
pub fn display_table_info(info: &TableInfo) {
    println!("\nQuery: {}", info.query);
    println!("Rows: {}", info.row_count);

    println!("\n=== Geometry Column ===");
    let geo_rows = vec![GeometryRow {
        name: info.geometry.name.clone(),
        data_type: info.geometry.data_type.clone(),
        extension: or_na(info.geometry.extension.as_ref()),
        crs: or_na(info.geometry.crs.as_ref()),
    }];
    println!("{}", Table::new(geo_rows));

    if !info.fields.is_empty() {
        println!("\n=== Fields ===");

        let field_rows: Vec<FieldRow> = info
            .fields
            .iter()
            .map(|f| FieldRow {
                name: f.name.clone(),
                data_type: f.data_type.clone(),
                nullable: if f.nullable { "Yes" } else { "No" }.to_string(),
            })
            .collect();

        println!("{}", Table::new(field_rows));
    }
}

/// Display the outcome of an export.
pub fn display_export_summary(summary: &ExportSummary) {
    println!(
        "\nExported {} {} feature(s) to {}",
        summary.feature_count,
        summary.geometry_type,
        summary.output.display()
    );
    println!("CRS: {}", or_na(summary.crs.as_ref()));

    println!("\n=== Files ===");
    for file in &summary.files {
        println!("{}", file.display());
    }

    if !summary.fields.is_empty() {
        println!("\n=== Fields ===");
        println!("{}", Table::new(dbf_rows(summary)));
    }
}

fn dbf_rows(summary: &ExportSummary) -> Vec<DbfFieldRow> {
    summary
        .fields
        .iter()
        .map(|f| DbfFieldRow {
            name: f.name.clone(),
            field_type: f.field_type.clone(),
            width: f.width,
            decimals: f.decimals,
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    use pgshp_core::WrittenField;

    fn summary() -> ExportSummary {
        ExportSummary {
            output: PathBuf::from("roads_export.shp"),
            files: vec![
                PathBuf::from("roads_export.shp"),
                PathBuf::from("roads_export.shx"),
                PathBuf::from("roads_export.dbf"),
            ],
            feature_count: 2,
            geometry_type: "PolyLine".to_string(),
            fields: vec![
                WrittenField {
                    name: "gid".to_string(),
                    field_type: "N".to_string(),
                    width: 11,
                    decimals: 0,
                },
                WrittenField {
                    name: "length".to_string(),
                    field_type: "N".to_string(),
                    width: 24,
                    decimals: 15,
                },
            ],
            crs: None,
        }
    }

    #[test]
    fn test_or_na() {
        assert_eq!(or_na(None), "N/A");
        assert_eq!(or_na(Some(&"EPSG:4326".to_string())), "EPSG:4326");
    }

    #[test]
    fn test_dbf_rows() {
        let rows = dbf_rows(&summary());
        assert_eq!(rows.len(), 2);
        assert_eq!(rows[1].name, "length");
        assert_eq!(rows[1].width, 24);
        assert_eq!(rows[1].decimals, 15);
    }

    #[test]
    fn test_dbf_table_rendering() {
        let table = Table::new(dbf_rows(&summary())).to_string();
        assert!(table.contains("Field"));
        assert!(table.contains("Decimals"));
        assert!(table.contains("gid"));
    }

    #[test]
    fn test_field_row_creation() {
        let row = FieldRow {
            name: "name".to_string(),
            data_type: "String".to_string(),
            nullable: "Yes".to_string(),
        };
        assert_eq!(row.name, "name");
        assert_eq!(row.data_type, "String");
        assert_eq!(row.nullable, "Yes");
    }
}
