//! Common types and traits shared across `pgshp` crates.
//!
//! This crate provides the core abstractions that are shared between
//! `pgshp-core` and the format implementation crates, preventing circular
//! dependencies.

pub mod io;
pub mod table;

// Re-export commonly used types
pub use io::{DataReader, DataWriter, WriteSummary, WrittenField};
pub use table::{Crs, GeoTable, geometry_field, is_geometry_field};
