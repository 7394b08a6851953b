//! ESRI Shapefile output for `pgshp`.
//!
//! [`ShapefileWriter`] turns a [`pgshp_core_common::GeoTable`] into the
//! `.shp`/`.shx`/`.dbf` triple plus the `.cpg` code page and, when the CRS
//! definition is known, a `.prj` file.
//!
//! One file holds one geometry type. Points and multi-points share the
//! multi-point type, lines and multi-lines share the polyline type, polygons
//! and multi-polygons share the polygon type; any other mix is rejected.

pub mod dbf;
pub mod shape;
pub mod writer;

pub use dbf::{DbfTable, FieldDescriptor, FieldType};
pub use shape::{Shape, ShapeType};
pub use writer::{FileSet, ShapefileWriter, ShapefileWriterOptions};
