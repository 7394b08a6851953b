//! PostGIS source for `pgshp`.
//!
//! This crate provides:
//! - **Connections**: [`ConnectionFactory`] turns a `postgresql://` string into
//!   a session, masking credentials in everything it logs.
//! - **Reading**: [`PostgisReader`] runs one SQL query and collects the rows
//!   into a [`pgshp_core_common::GeoTable`], converting the designated
//!   geometry column from EWKB to WKB and recording its SRID.

pub mod columns;
pub mod connection;
pub mod ewkb;
pub mod reader;

pub use connection::ConnectionFactory;
pub use reader::{
    DEFAULT_BATCH_SIZE, DEFAULT_GEOMETRY_COLUMN, DEFAULT_QUERY, PostgisReader,
    PostgisReaderOptions,
};
