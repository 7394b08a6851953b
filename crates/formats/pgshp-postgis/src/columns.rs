//! Mapping from PostgreSQL result columns to Arrow columns.

use std::sync::Arc;

use arrow_array::ArrayRef;
use arrow_array::builder::{
    BinaryBuilder, BooleanBuilder, Date32Builder, Float32Builder, Float64Builder, Int16Builder,
    Int32Builder, Int64Builder, StringBuilder, TimestampMicrosecondBuilder,
};
use arrow_array::types::Date32Type;
use arrow_schema::{DataType, Field, TimeUnit};
use bytes::Buf;
use geozero::wkb::Ewkb;
use pgshp_core_common::{Crs, geometry_field};
use pgshp_shared::{BoxError, SpatialReadError, SpatialReadResult};
use sqlx::postgres::{PgColumn, PgRow, PgValueFormat};
use sqlx::types::JsonValue;
use sqlx::types::chrono::{DateTime, NaiveDate, NaiveDateTime, Utc};
use sqlx::{Column, Postgres, Row, TypeInfo, ValueRef};

use crate::ewkb::{ewkb_srid, ewkb_to_wkb};

const UTC: &str = "UTC";

// Sign words of the binary `numeric` format.
const NUMERIC_POS: u16 = 0x0000;
const NUMERIC_NEG: u16 = 0x4000;
const NUMERIC_NAN: u16 = 0xC000;
const NUMERIC_PINF: u16 = 0xD000;
const NUMERIC_NINF: u16 = 0xF000;
const NUMERIC_NBASE: i16 = 10_000;

/// How a result column is decoded and stored.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ColumnKind {
    /// `bool`
    Boolean,
    /// `int2`
    Int16,
    /// `int4`
    Int32,
    /// `int8`
    Int64,
    /// `float4`
    Float32,
    /// `float8`
    Float64,
    /// `numeric`, coerced to `Float64`
    Numeric,
    /// Character types
    Text,
    /// The single-byte `"char"` type
    Char,
    /// `json` and `jsonb`, stored as serialized text
    Json,
    /// `date`
    Date,
    /// `timestamp`
    Timestamp,
    /// `timestamptz`, normalized to UTC
    TimestampTz,
    /// A spatial column other than the designated one, stored as hex EWKB
    RawGeometry,
    /// The designated geometry column, stored as WKB
    Geometry,
}

impl ColumnKind {
    /// Maps a PostgreSQL type name to a column kind.
    ///
    /// Returns `None` for types without a tabular representation.
    #[must_use]
    pub fn from_type_name(type_name: &str) -> Option<Self> {
        let kind = match type_name.to_ascii_uppercase().as_str() {
            "BOOL" => Self::Boolean,
            "INT2" => Self::Int16,
            "INT4" => Self::Int32,
            "INT8" => Self::Int64,
            "FLOAT4" => Self::Float32,
            "FLOAT8" => Self::Float64,
            "NUMERIC" => Self::Numeric,
            "TEXT" | "VARCHAR" | "CHAR" | "BPCHAR" | "NAME" => Self::Text,
            "\"CHAR\"" => Self::Char,
            "JSON" | "JSONB" => Self::Json,
            "DATE" => Self::Date,
            "TIMESTAMP" => Self::Timestamp,
            "TIMESTAMPTZ" => Self::TimestampTz,
            "GEOMETRY" | "GEOGRAPHY" => Self::RawGeometry,
            _ => return None,
        };
        Some(kind)
    }

    /// Arrow type used to store the column.
    #[must_use]
    pub fn data_type(self) -> DataType {
        match self {
            Self::Boolean => DataType::Boolean,
            Self::Int16 => DataType::Int16,
            Self::Int32 => DataType::Int32,
            Self::Int64 => DataType::Int64,
            Self::Float32 => DataType::Float32,
            Self::Float64 | Self::Numeric => DataType::Float64,
            Self::Text | Self::Char | Self::Json | Self::RawGeometry => DataType::Utf8,
            Self::Date => DataType::Date32,
            Self::Timestamp => DataType::Timestamp(TimeUnit::Microsecond, None),
            Self::TimestampTz => DataType::Timestamp(TimeUnit::Microsecond, Some(UTC.into())),
            Self::Geometry => DataType::Binary,
        }
    }
}

enum ColumnBuilder {
    Boolean(BooleanBuilder),
    Int16(Int16Builder),
    Int32(Int32Builder),
    Int64(Int64Builder),
    Float32(Float32Builder),
    Float64(Float64Builder),
    Utf8(StringBuilder),
    Date32(Date32Builder),
    Timestamp(TimestampMicrosecondBuilder),
    Binary(BinaryBuilder),
}

impl ColumnBuilder {
    fn new(kind: ColumnKind, capacity: usize) -> Self {
        match kind {
            ColumnKind::Boolean => Self::Boolean(BooleanBuilder::with_capacity(capacity)),
            ColumnKind::Int16 => Self::Int16(Int16Builder::with_capacity(capacity)),
            ColumnKind::Int32 => Self::Int32(Int32Builder::with_capacity(capacity)),
            ColumnKind::Int64 => Self::Int64(Int64Builder::with_capacity(capacity)),
            ColumnKind::Float32 => Self::Float32(Float32Builder::with_capacity(capacity)),
            ColumnKind::Float64 | ColumnKind::Numeric => {
                Self::Float64(Float64Builder::with_capacity(capacity))
            },
            ColumnKind::Text | ColumnKind::Char | ColumnKind::Json | ColumnKind::RawGeometry => {
                Self::Utf8(StringBuilder::with_capacity(capacity, capacity * 16))
            },
            ColumnKind::Date => Self::Date32(Date32Builder::with_capacity(capacity)),
            ColumnKind::Timestamp => {
                Self::Timestamp(TimestampMicrosecondBuilder::with_capacity(capacity))
            },
            ColumnKind::TimestampTz => Self::Timestamp(
                TimestampMicrosecondBuilder::with_capacity(capacity).with_timezone(UTC),
            ),
            ColumnKind::Geometry => Self::Binary(BinaryBuilder::with_capacity(capacity, 0)),
        }
    }

    fn append_null(&mut self) {
        match self {
            Self::Boolean(builder) => builder.append_null(),
            Self::Int16(builder) => builder.append_null(),
            Self::Int32(builder) => builder.append_null(),
            Self::Int64(builder) => builder.append_null(),
            Self::Float32(builder) => builder.append_null(),
            Self::Float64(builder) => builder.append_null(),
            Self::Utf8(builder) => builder.append_null(),
            Self::Date32(builder) => builder.append_null(),
            Self::Timestamp(builder) => builder.append_null(),
            Self::Binary(builder) => builder.append_null(),
        }
    }

    fn finish(&mut self) -> ArrayRef {
        match self {
            Self::Boolean(builder) => Arc::new(builder.finish()),
            Self::Int16(builder) => Arc::new(builder.finish()),
            Self::Int32(builder) => Arc::new(builder.finish()),
            Self::Int64(builder) => Arc::new(builder.finish()),
            Self::Float32(builder) => Arc::new(builder.finish()),
            Self::Float64(builder) => Arc::new(builder.finish()),
            Self::Utf8(builder) => Arc::new(builder.finish()),
            Self::Date32(builder) => Arc::new(builder.finish()),
            Self::Timestamp(builder) => Arc::new(builder.finish()),
            Self::Binary(builder) => Arc::new(builder.finish()),
        }
    }
}

/// Decodes one result column into an Arrow array, batch by batch.
pub struct ColumnDecoder {
    name: String,
    index: usize,
    kind: ColumnKind,
    builder: ColumnBuilder,
    srid: Option<i32>,
}

impl ColumnDecoder {
    /// Creates a decoder for the column at `index`.
    #[must_use]
    pub fn new(name: impl Into<String>, index: usize, kind: ColumnKind, capacity: usize) -> Self {
        Self {
            name: name.into(),
            index,
            kind,
            builder: ColumnBuilder::new(kind, capacity),
            srid: None,
        }
    }

    /// Column name.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Column kind.
    #[must_use]
    pub fn kind(&self) -> ColumnKind {
        self.kind
    }

    /// SRID shared by the geometries decoded so far.
    #[must_use]
    pub fn srid(&self) -> Option<i32> {
        self.srid
    }

    /// Arrow field describing the decoded column.
    #[must_use]
    pub fn field(&self, crs: Option<&Crs>) -> Field {
        match self.kind {
            ColumnKind::Geometry => geometry_field(&self.name, crs),
            kind => Field::new(&self.name, kind.data_type(), true),
        }
    }

    /// Appends the value of this column from `row`.
    ///
    /// `row_number` is 1-based and only used for error reporting.
    ///
    /// # Errors
    ///
    /// Returns an error if the value cannot be decoded, the geometry is not
    /// valid EWKB, or its SRID differs from earlier geometries.
    pub fn append(&mut self, row: &PgRow, row_number: usize) -> SpatialReadResult<()> {
        let cell = Cell {
            row,
            index: self.index,
            name: &self.name,
            row_number,
        };
        if cell.is_null()? {
            self.builder.append_null();
            return Ok(());
        }

        match &mut self.builder {
            ColumnBuilder::Boolean(builder) => builder.append_value(cell.get::<bool>()?),
            ColumnBuilder::Int16(builder) => builder.append_value(cell.get::<i16>()?),
            ColumnBuilder::Int32(builder) => builder.append_value(cell.get::<i32>()?),
            ColumnBuilder::Int64(builder) => builder.append_value(cell.get::<i64>()?),
            ColumnBuilder::Float32(builder) => builder.append_value(cell.get::<f32>()?),
            ColumnBuilder::Float64(builder) => match self.kind {
                ColumnKind::Numeric => builder.append_value(cell.numeric()?),
                _ => builder.append_value(cell.get::<f64>()?),
            },
            ColumnBuilder::Utf8(builder) => match self.kind {
                ColumnKind::Char => builder.append_value(char_to_string(cell.get::<i8>()?)),
                ColumnKind::Json => builder.append_value(cell.get::<JsonValue>()?.to_string()),
                ColumnKind::RawGeometry => builder.append_value(ewkb_hex(cell.bytes()?)),
                _ => builder.append_value(cell.get::<String>()?),
            },
            ColumnBuilder::Date32(builder) => {
                builder.append_value(Date32Type::from_naive_date(cell.get::<NaiveDate>()?));
            },
            ColumnBuilder::Timestamp(builder) => match self.kind {
                ColumnKind::TimestampTz => {
                    builder.append_value(cell.get::<DateTime<Utc>>()?.timestamp_micros());
                },
                _ => {
                    let value = cell.get::<NaiveDateTime>()?;
                    builder.append_value(value.and_utc().timestamp_micros());
                },
            },
            ColumnBuilder::Binary(builder) => {
                let Ewkb(ewkb) = cell.get::<Ewkb<Vec<u8>>>()?;
                let wkb = convert_geometry(&ewkb, &mut self.srid, row_number)?;
                builder.append_value(wkb);
            },
        }
        Ok(())
    }

    /// Appends a null value.
    pub fn append_null(&mut self) {
        self.builder.append_null();
    }

    /// Finishes the current batch, resetting the builder.
    pub fn finish(&mut self) -> ArrayRef {
        self.builder.finish()
    }
}

/// One value of one row, with enough context to report decode failures.
struct Cell<'a> {
    row: &'a PgRow,
    index: usize,
    name: &'a str,
    row_number: usize,
}

impl<'a> Cell<'a> {
    fn is_null(&self) -> SpatialReadResult<bool> {
        self.row
            .try_get_raw(self.index)
            .map(|value| value.is_null())
            .map_err(|err| self.decode_error(Box::new(err)))
    }

    fn get<T>(&self) -> SpatialReadResult<T>
    where
        T: sqlx::Decode<'a, Postgres> + sqlx::Type<Postgres>,
    {
        self.row
            .try_get::<T, _>(self.index)
            .map_err(|err| self.decode_error(Box::new(err)))
    }

    fn bytes(&self) -> SpatialReadResult<&'a [u8]> {
        let value = self
            .row
            .try_get_raw(self.index)
            .map_err(|err| self.decode_error(Box::new(err)))?;
        value.as_bytes().map_err(|err| self.decode_error(err))
    }

    /// Reads a `numeric` value without going through a fixed-precision type,
    /// so that `NaN`, infinities and very large values survive.
    fn numeric(&self) -> SpatialReadResult<f64> {
        let value = self
            .row
            .try_get_raw(self.index)
            .map_err(|err| self.decode_error(Box::new(err)))?;
        match value.format() {
            PgValueFormat::Binary => {
                let bytes = value.as_bytes().map_err(|err| self.decode_error(err))?;
                numeric_to_f64(bytes).map_err(|message| self.decode_error(message.into()))
            },
            PgValueFormat::Text => {
                let text = value.as_str().map_err(|err| self.decode_error(err))?;
                text.parse::<f64>()
                    .map_err(|err| self.decode_error(Box::new(err)))
            },
        }
    }

    fn decode_error(&self, source: BoxError) -> SpatialReadError {
        SpatialReadError::Decode {
            column: self.name.to_string(),
            row: self.row_number,
            source,
        }
    }
}

/// Converts a binary `numeric` to the nearest `f64`.
///
/// Values beyond the `f64` range become infinite.
fn numeric_to_f64(mut bytes: &[u8]) -> Result<f64, String> {
    if bytes.remaining() < 8 {
        return Err(format!("numeric header is {} bytes long", bytes.len()));
    }
    let ndigits = usize::from(bytes.get_u16());
    let weight = i32::from(bytes.get_i16());
    let sign = bytes.get_u16();
    let _dscale = bytes.get_u16();

    let negative = match sign {
        NUMERIC_POS => false,
        NUMERIC_NEG => true,
        NUMERIC_NAN => return Ok(f64::NAN),
        NUMERIC_PINF => return Ok(f64::INFINITY),
        NUMERIC_NINF => return Ok(f64::NEG_INFINITY),
        other => return Err(format!("unknown numeric sign {other:#06x}")),
    };
    if bytes.remaining() != ndigits * 2 {
        return Err(format!(
            "numeric declares {ndigits} digits but carries {} bytes",
            bytes.remaining()
        ));
    }
    if ndigits == 0 {
        return Ok(if negative { -0.0 } else { 0.0 });
    }

    // 0.d0d1d2...e(4 * (weight + 1)), parsed with correct rounding.
    let mut text = String::with_capacity(ndigits * 4 + 16);
    if negative {
        text.push('-');
    }
    text.push_str("0.");
    for _ in 0..ndigits {
        let digit = bytes.get_i16();
        if !(0..NUMERIC_NBASE).contains(&digit) {
            return Err(format!("numeric digit {digit} is out of range"));
        }
        text.push_str(&format!("{digit:04}"));
    }
    text.push_str(&format!("e{}", 4 * (weight + 1)));

    text.parse::<f64>().map_err(|err| err.to_string())
}

/// Renders a Postgres `"char"` byte; the zero byte is the empty string.
fn char_to_string(value: i8) -> String {
    match u8::from_ne_bytes(value.to_ne_bytes()) {
        0 => String::new(),
        byte => char::from(byte).to_string(),
    }
}

/// Hex EWKB, as PostGIS prints a geometry.
fn ewkb_hex(ewkb: &[u8]) -> String {
    hex::encode_upper(ewkb)
}

/// Strips the EWKB header down to plain WKB, tracking the SRID of the column.
fn convert_geometry(
    ewkb: &[u8],
    srid: &mut Option<i32>,
    row_number: usize,
) -> SpatialReadResult<Vec<u8>> {
    if let Some(found) = ewkb_srid(ewkb) {
        match *srid {
            Some(first) if first != found => {
                return Err(SpatialReadError::MixedSrid {
                    first,
                    other: found,
                    row: row_number,
                });
            },
            Some(_) => {},
            None => *srid = Some(found),
        }
    }

    ewkb_to_wkb(ewkb).map_err(|message| SpatialReadError::InvalidGeometry {
        row: row_number,
        message,
    })
}

/// Name, position and type of a result column.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ColumnSpec<'a> {
    /// Column name
    pub name: &'a str,
    /// Zero-based position in the row
    pub ordinal: usize,
    /// PostgreSQL type name as reported by the driver
    pub type_name: &'a str,
}

impl<'a> From<&'a PgColumn> for ColumnSpec<'a> {
    fn from(column: &'a PgColumn) -> Self {
        Self {
            name: column.name(),
            ordinal: column.ordinal(),
            type_name: column.type_info().name(),
        }
    }
}

/// Builds one decoder per result column.
///
/// # Errors
///
/// Returns an error if `geometry_column` is missing or is not a PostGIS
/// `geometry`, or if any column type is unsupported.
pub fn plan_columns(
    columns: &[PgColumn],
    geometry_column: &str,
    capacity: usize,
) -> SpatialReadResult<Vec<ColumnDecoder>> {
    let specs: Vec<ColumnSpec<'_>> = columns.iter().map(ColumnSpec::from).collect();
    plan_specs(&specs, geometry_column, capacity)
}

/// Builds one decoder per described column.
///
/// # Errors
///
/// Same as [`plan_columns`].
pub fn plan_specs(
    columns: &[ColumnSpec<'_>],
    geometry_column: &str,
    capacity: usize,
) -> SpatialReadResult<Vec<ColumnDecoder>> {
    let Some(geometry) = columns.iter().find(|c| c.name == geometry_column) else {
        let available = columns
            .iter()
            .map(|c| c.name)
            .collect::<Vec<_>>()
            .join(", ");
        return Err(SpatialReadError::MissingGeometryColumn {
            column: geometry_column.to_string(),
            available,
        });
    };

    if !geometry.type_name.eq_ignore_ascii_case("geometry") {
        return Err(SpatialReadError::NotAGeometryColumn {
            column: geometry_column.to_string(),
            found: geometry.type_name.to_string(),
        });
    }

    columns
        .iter()
        .map(|column| {
            let kind = if column.ordinal == geometry.ordinal {
                ColumnKind::Geometry
            } else {
                ColumnKind::from_type_name(column.type_name).ok_or_else(|| {
                    SpatialReadError::UnsupportedColumnType {
                        column: column.name.to_string(),
                        type_name: column.type_name.to_string(),
                    }
                })?
            };
            Ok(ColumnDecoder::new(
                column.name,
                column.ordinal,
                kind,
                capacity,
            ))
        })
        .collect()
}
