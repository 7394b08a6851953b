//! Shapefile writer.
//!
//! Everything is encoded in memory first: geometry family, field layout,
//! value widths and file sizes are all checked before the first file is
//! touched, so a rejected table leaves the output directory unchanged.

use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use bytes::{BufMut, BytesMut};
use chrono::{Local, NaiveDate};
use log::{debug, info};
use pgshp_core_common::{DataWriter, GeoTable, WriteSummary, WrittenField};
use pgshp_shared::{SpatialWriteError, SpatialWriteResult};

use crate::dbf::DbfTable;
use crate::shape::{BoundingBox, Shape, ShapeType, decode_geometries, resolve_shape_type, to_shape};

/// Largest file the format can address.
pub const MAX_FILE_SIZE: u64 = i32::MAX as u64;

/// Contents of the `.cpg` sidecar.
pub const CODE_PAGE: &str = "UTF-8";

const FILE_CODE: i32 = 9994;
const VERSION: i32 = 1000;
const MAIN_HEADER_LEN: usize = 100;
const RECORD_HEADER_LEN: usize = 8;

/// Options for writing Shapefiles
#[derive(Debug, Clone)]
pub struct ShapefileWriterOptions {
    /// Write a `.prj` file when the CRS definition is known (default: true)
    pub write_prj: bool,
    /// Date stored in the `.dbf` header (default: today)
    pub last_update: Option<NaiveDate>,
}

impl Default for ShapefileWriterOptions {
    fn default() -> Self {
        Self {
            write_prj: true,
            last_update: None,
        }
    }
}

impl ShapefileWriterOptions {
    /// Create new writer options with defaults
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Set whether to write the `.prj` file
    #[must_use]
    pub fn with_prj(mut self, write_prj: bool) -> Self {
        self.write_prj = write_prj;
        self
    }

    /// Set the `.dbf` last update date
    #[must_use]
    pub fn with_last_update(mut self, date: NaiveDate) -> Self {
        self.last_update = Some(date);
        self
    }
}

/// Paths of the files making up one Shapefile.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileSet {
    pub shp: PathBuf,
    pub shx: PathBuf,
    pub dbf: PathBuf,
    pub cpg: PathBuf,
    pub prj: PathBuf,
}

impl FileSet {
    /// Derives the file set from the path of the `.shp` file.
    ///
    /// A path without the `.shp` extension gets it appended.
    ///
    /// # Errors
    ///
    /// Returns [`SpatialWriteError::InvalidPath`] if the path has no file
    /// name, names a directory, or its parent directory does not exist.
    pub fn from_path(path: &Path) -> SpatialWriteResult<Self> {
        let invalid = |reason: &str| SpatialWriteError::InvalidPath {
            path: path.to_path_buf(),
            reason: reason.to_string(),
        };

        if path.file_name().is_none() {
            return Err(invalid("path has no file name"));
        }
        if path.is_dir() {
            return Err(invalid("path is a directory"));
        }
        if let Some(parent) = path.parent()
            && !parent.as_os_str().is_empty()
            && !parent.is_dir()
        {
            return Err(invalid("parent directory does not exist"));
        }

        let has_shp_extension = path
            .extension()
            .is_some_and(|ext| ext.eq_ignore_ascii_case("shp"));
        let shp = if has_shp_extension {
            path.to_path_buf()
        } else {
            let mut name = path.as_os_str().to_os_string();
            name.push(".shp");
            PathBuf::from(name)
        };

        Ok(Self {
            shx: shp.with_extension("shx"),
            dbf: shp.with_extension("dbf"),
            cpg: shp.with_extension("cpg"),
            prj: shp.with_extension("prj"),
            shp,
        })
    }
}

/// Writes a [`GeoTable`] as an ESRI Shapefile.
#[derive(Debug, Clone, Default)]
pub struct ShapefileWriter {
    options: ShapefileWriterOptions,
}

impl ShapefileWriter {
    /// Creates a writer with the given options.
    #[must_use]
    pub fn new(options: ShapefileWriterOptions) -> Self {
        Self { options }
    }

    /// The writer options.
    #[must_use]
    pub fn options(&self) -> &ShapefileWriterOptions {
        &self.options
    }
}

impl DataWriter for ShapefileWriter {
    fn write(&self, table: &GeoTable, path: &Path) -> SpatialWriteResult<WriteSummary> {
        let files = FileSet::from_path(path)?;

        let geometries = decode_geometries(table)?;
        let shape_type = resolve_shape_type(&geometries)?;
        let dbf = DbfTable::infer(table)?;
        let shapes: Vec<Shape> = geometries
            .iter()
            .map(|geometry| to_shape(geometry.as_ref(), shape_type))
            .collect();
        debug!(
            "Writing {} {shape_type} records with {} attribute fields",
            shapes.len(),
            dbf.descriptors().count()
        );

        let shp_len = MAIN_HEADER_LEN as u64
            + shapes
                .iter()
                .map(|shape| (RECORD_HEADER_LEN + shape.content_len()) as u64)
                .sum::<u64>();
        let shx_len = (MAIN_HEADER_LEN + RECORD_HEADER_LEN * shapes.len()) as u64;
        for (path, size) in [
            (&files.shp, shp_len),
            (&files.shx, shx_len),
            (&files.dbf, dbf.file_len(shapes.len())),
        ] {
            if size > MAX_FILE_SIZE {
                return Err(SpatialWriteError::FileTooLarge {
                    path: path.clone(),
                    size,
                });
            }
        }

        let (shp, shx) = encode_shapes(&shapes, shape_type);
        let last_update = self
            .options
            .last_update
            .unwrap_or_else(|| Local::now().date_naive());
        let dbf_bytes = dbf.encode(table, last_update)?;

        let mut written = Vec::with_capacity(5);
        write_file(&files.shp, &shp, &mut written)?;
        write_file(&files.shx, &shx, &mut written)?;
        write_file(&files.dbf, &dbf_bytes, &mut written)?;
        write_file(&files.cpg, CODE_PAGE.as_bytes(), &mut written)?;

        let wkt = table.crs().and_then(|crs| crs.wkt.as_deref());
        match wkt {
            Some(wkt) if self.options.write_prj => {
                write_file(&files.prj, wkt.as_bytes(), &mut written)?;
            },
            _ => remove_stale(&files.prj)?,
        }

        info!(
            "Wrote {} {shape_type} features to {}",
            shapes.len(),
            files.shp.display()
        );

        Ok(WriteSummary {
            path: files.shp,
            files: written,
            feature_count: shapes.len(),
            geometry_type: shape_type.to_string(),
            fields: dbf.descriptors().map(WrittenField::from).collect(),
        })
    }
}

/// Encodes the main file and its index.
fn encode_shapes(shapes: &[Shape], shape_type: ShapeType) -> (BytesMut, BytesMut) {
    let shp_len = MAIN_HEADER_LEN
        + shapes
            .iter()
            .map(|shape| RECORD_HEADER_LEN + shape.content_len())
            .sum::<usize>();
    let shx_len = MAIN_HEADER_LEN + RECORD_HEADER_LEN * shapes.len();

    let bbox = shapes
        .iter()
        .filter_map(Shape::bbox)
        .reduce(|mut acc, bbox| {
            acc.extend(&bbox);
            acc
        });

    let mut shp = BytesMut::with_capacity(shp_len);
    let mut shx = BytesMut::with_capacity(shx_len);
    put_main_header(&mut shp, shp_len, shape_type, bbox.as_ref());
    put_main_header(&mut shx, shx_len, shape_type, bbox.as_ref());

    for (index, shape) in shapes.iter().enumerate() {
        let offset = shp.len();
        let content_len = shape.content_len();

        shp.put_i32(to_i32(index + 1));
        shp.put_i32(to_i32(content_len / 2));
        shape.encode(&mut shp);

        shx.put_i32(to_i32(offset / 2));
        shx.put_i32(to_i32(content_len / 2));
    }

    (shp, shx)
}

fn put_main_header(
    buf: &mut BytesMut,
    file_len: usize,
    shape_type: ShapeType,
    bbox: Option<&BoundingBox>,
) {
    buf.put_i32(FILE_CODE);
    buf.put_bytes(0, 20);
    buf.put_i32(to_i32(file_len / 2));
    buf.put_i32_le(VERSION);
    buf.put_i32_le(shape_type.code());
    match bbox {
        Some(bbox) => {
            buf.put_f64_le(bbox.min_x);
            buf.put_f64_le(bbox.min_y);
            buf.put_f64_le(bbox.max_x);
            buf.put_f64_le(bbox.max_y);
        },
        None => buf.put_bytes(0, 32),
    }
    // Z and M ranges
    buf.put_bytes(0, 32);
}

// Sizes are checked against MAX_FILE_SIZE before encoding.
#[allow(clippy::cast_possible_truncation, clippy::cast_possible_wrap)]
fn to_i32(value: usize) -> i32 {
    value as i32
}

fn write_file(path: &Path, contents: &[u8], written: &mut Vec<PathBuf>) -> SpatialWriteResult<()> {
    fs::write(path, contents).map_err(|source| SpatialWriteError::Io {
        path: path.to_path_buf(),
        source,
    })?;
    debug!("Wrote {} bytes to {}", contents.len(), path.display());
    written.push(path.to_path_buf());
    Ok(())
}

fn remove_stale(path: &Path) -> SpatialWriteResult<()> {
    match fs::remove_file(path) {
        Ok(()) => {
            debug!("Removed stale {}", path.display());
            Ok(())
        },
        Err(err) if err.kind() == io::ErrorKind::NotFound => Ok(()),
        Err(source) => Err(SpatialWriteError::Io {
            path: path.to_path_buf(),
            source,
        }),
    }
}
