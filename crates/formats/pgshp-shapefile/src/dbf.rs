//! dBASE III attribute table (`.dbf`).
//!
//! The field layout is inferred once from the table schema and data, then
//! every row is formatted into a fixed-width record. Text is stored as UTF-8
//! and announced through the `.cpg` sidecar, so the language driver byte in
//! the header stays zero.

use std::collections::HashSet;

use arrow_array::cast::AsArray;
use arrow_array::types::{
    Date32Type, Float32Type, Float64Type, Int8Type, Int16Type, Int32Type, Int64Type,
    TimestampMicrosecondType, TimestampMillisecondType, TimestampNanosecondType,
    TimestampSecondType, UInt8Type, UInt16Type, UInt32Type,
};
use arrow_array::{Array, ArrayRef};
use arrow_schema::{DataType, Field, TimeUnit};
use bytes::{BufMut, BytesMut};
use chrono::{Datelike, NaiveDate, NaiveDateTime};
use log::warn;
use pgshp_core_common::{GeoTable, WrittenField};
use pgshp_shared::{SpatialWriteError, SpatialWriteResult};

/// Longest field name, in bytes.
pub const MAX_FIELD_NAME_LEN: usize = 10;

/// Widest character field, in bytes.
pub const MAX_CHARACTER_WIDTH: usize = 254;

/// Most fields a table may declare.
pub const MAX_FIELDS: usize = 255;

const VERSION: u8 = 0x03;
const HEADER_LEN: usize = 32;
const DESCRIPTOR_LEN: usize = 32;
const HEADER_TERMINATOR: u8 = 0x0D;
const END_OF_FILE: u8 = 0x1A;
const RECORD_ACTIVE: u8 = b' ';

const FLOAT_WIDTH: usize = 24;
const FLOAT_DECIMALS: usize = 15;
const DATE_FORMAT: &str = "%Y%m%d";
const TIMESTAMP_FORMAT: &str = "%Y-%m-%dT%H:%M:%S%.6f";
const TIMESTAMP_WIDTH: usize = 26;

/// dBASE field type.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FieldType {
    /// `C`, space-padded text.
    Character,
    /// `N`, right-aligned decimal text.
    Numeric,
    /// `L`, `T`/`F`/`?`.
    Logical,
    /// `D`, `YYYYMMDD`.
    Date,
}

impl FieldType {
    /// Single-byte type code.
    #[must_use]
    pub fn code(self) -> u8 {
        match self {
            Self::Character => b'C',
            Self::Numeric => b'N',
            Self::Logical => b'L',
            Self::Date => b'D',
        }
    }
}

/// Field descriptor as stored in the header.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FieldDescriptor {
    pub name: String,
    pub field_type: FieldType,
    pub width: usize,
    pub decimals: usize,
}

impl From<&FieldDescriptor> for WrittenField {
    fn from(descriptor: &FieldDescriptor) -> Self {
        Self {
            name: descriptor.name.clone(),
            field_type: char::from(descriptor.field_type.code()).to_string(),
            width: descriptor.width,
            decimals: descriptor.decimals,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ValueFormat {
    Boolean,
    Integer,
    Float,
    Text,
    Date,
    Timestamp { utc: bool },
}

#[derive(Debug, Clone)]
struct DbfField {
    descriptor: FieldDescriptor,
    column: usize,
    format: ValueFormat,
}

/// Field layout of the attribute table.
#[derive(Debug, Clone)]
pub struct DbfTable {
    fields: Vec<DbfField>,
}

impl DbfTable {
    /// Infers the field layout for every attribute column of `table`.
    ///
    /// # Errors
    ///
    /// Fails on too many columns, a name that is empty, too long or
    /// repeated, or a column type without a dBASE representation.
    pub fn infer(table: &GeoTable) -> SpatialWriteResult<Self> {
        let attributes = table.attribute_fields();
        if attributes.len() > MAX_FIELDS {
            return Err(SpatialWriteError::TooManyFields {
                count: attributes.len(),
                max: MAX_FIELDS,
            });
        }

        let mut seen = HashSet::new();
        let mut fields = Vec::with_capacity(attributes.len());
        for (column, field) in attributes {
            validate_name(field.name())?;
            if !seen.insert(field.name().to_ascii_uppercase()) {
                return Err(SpatialWriteError::DuplicateFieldName {
                    name: field.name().clone(),
                });
            }

            let (field_type, width, decimals, format) = layout(table, column, field)?;
            fields.push(DbfField {
                descriptor: FieldDescriptor {
                    name: field.name().clone(),
                    field_type,
                    width,
                    decimals,
                },
                column,
                format,
            });
        }

        Ok(Self { fields })
    }

    /// Field descriptors in output order.
    pub fn descriptors(&self) -> impl Iterator<Item = &FieldDescriptor> {
        self.fields.iter().map(|field| &field.descriptor)
    }

    /// Length of the header including descriptors and terminator.
    #[must_use]
    pub fn header_len(&self) -> usize {
        HEADER_LEN + DESCRIPTOR_LEN * self.fields.len() + 1
    }

    /// Length of one record including the deletion flag.
    #[must_use]
    pub fn record_len(&self) -> usize {
        1 + self
            .fields
            .iter()
            .map(|field| field.descriptor.width)
            .sum::<usize>()
    }

    /// Size of the complete file for `records` rows.
    #[must_use]
    pub fn file_len(&self, records: usize) -> u64 {
        (self.header_len() + 1) as u64 + (self.record_len() as u64) * records as u64
    }

    /// Encodes the complete `.dbf` file.
    ///
    /// # Errors
    ///
    /// Returns [`SpatialWriteError::ValueOverflow`] when a formatted value is
    /// wider than its field.
    pub fn encode(&self, table: &GeoTable, last_update: NaiveDate) -> SpatialWriteResult<BytesMut> {
        let records = table.num_rows();
        let capacity = usize::try_from(self.file_len(records)).unwrap_or(usize::MAX);
        let mut buf = BytesMut::with_capacity(capacity);

        self.encode_header(&mut buf, records, last_update);

        let mut row_number = 0;
        for batch in table.batches() {
            for row in 0..batch.num_rows() {
                row_number += 1;
                buf.put_u8(RECORD_ACTIVE);
                for field in &self.fields {
                    field.encode_value(&mut buf, batch.column(field.column), row, row_number)?;
                }
            }
        }

        buf.put_u8(END_OF_FILE);
        Ok(buf)
    }

    // Header fields are bounded: at most 255 descriptors of at most 254 bytes.
    #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
    fn encode_header(&self, buf: &mut BytesMut, records: usize, last_update: NaiveDate) {
        buf.put_u8(VERSION);
        buf.put_u8((last_update.year() - 1900).clamp(0, 255) as u8);
        buf.put_u8(last_update.month() as u8);
        buf.put_u8(last_update.day() as u8);
        buf.put_u32_le(u32::try_from(records).unwrap_or(u32::MAX));
        buf.put_u16_le(self.header_len() as u16);
        buf.put_u16_le(self.record_len() as u16);
        buf.put_bytes(0, HEADER_LEN - 12);

        for field in &self.fields {
            let descriptor = &field.descriptor;
            let name = descriptor.name.as_bytes();
            buf.put_slice(name);
            buf.put_bytes(0, 11 - name.len());
            buf.put_u8(descriptor.field_type.code());
            buf.put_bytes(0, 4);
            buf.put_u8(descriptor.width as u8);
            buf.put_u8(descriptor.decimals as u8);
            buf.put_bytes(0, 14);
        }
        buf.put_u8(HEADER_TERMINATOR);
    }
}

fn validate_name(name: &str) -> SpatialWriteResult<()> {
    if name.is_empty() {
        return Err(SpatialWriteError::InvalidFieldName {
            name: name.to_string(),
            reason: "name is empty".to_string(),
        });
    }
    if name.contains('\0') {
        return Err(SpatialWriteError::InvalidFieldName {
            name: name.to_string(),
            reason: "name contains a NUL byte".to_string(),
        });
    }
    if name.len() > MAX_FIELD_NAME_LEN {
        return Err(SpatialWriteError::FieldNameTooLong {
            name: name.to_string(),
            max: MAX_FIELD_NAME_LEN,
        });
    }
    Ok(())
}

fn layout(
    table: &GeoTable,
    column: usize,
    field: &Field,
) -> SpatialWriteResult<(FieldType, usize, usize, ValueFormat)> {
    let layout = match field.data_type() {
        DataType::Boolean => (FieldType::Logical, 1, 0, ValueFormat::Boolean),
        DataType::Int8 | DataType::Int16 | DataType::UInt8 => {
            (FieldType::Numeric, 6, 0, ValueFormat::Integer)
        },
        DataType::Int32 | DataType::UInt16 => (FieldType::Numeric, 11, 0, ValueFormat::Integer),
        DataType::Int64 | DataType::UInt32 => (FieldType::Numeric, 20, 0, ValueFormat::Integer),
        DataType::Float32 | DataType::Float64 => (
            FieldType::Numeric,
            FLOAT_WIDTH,
            FLOAT_DECIMALS,
            ValueFormat::Float,
        ),
        DataType::Utf8 | DataType::LargeUtf8 => {
            let width = text_width(table, column, field.name());
            (FieldType::Character, width, 0, ValueFormat::Text)
        },
        DataType::Date32 => (FieldType::Date, 8, 0, ValueFormat::Date),
        DataType::Timestamp(_, timezone) => {
            let utc = timezone.is_some();
            (
                FieldType::Character,
                TIMESTAMP_WIDTH + usize::from(utc),
                0,
                ValueFormat::Timestamp { utc },
            )
        },
        other => {
            return Err(SpatialWriteError::UnsupportedFieldType {
                field: field.name().clone(),
                data_type: other.to_string(),
            });
        },
    };
    Ok(layout)
}

/// Longest value of a text column in bytes, clamped to `1..=254`.
fn text_width(table: &GeoTable, column: usize, name: &str) -> usize {
    let mut longest = 0;
    let mut too_long = 0usize;
    for batch in table.batches() {
        for value in text_values(batch.column(column)).into_iter().flatten() {
            longest = longest.max(value.len());
            if value.len() > MAX_CHARACTER_WIDTH {
                too_long += 1;
            }
        }
    }
    if too_long > 0 {
        warn!(
            "Field '{name}': {too_long} values are longer than {MAX_CHARACTER_WIDTH} bytes and will be truncated"
        );
    }
    longest.clamp(1, MAX_CHARACTER_WIDTH)
}

fn text_values(array: &ArrayRef) -> Vec<Option<&str>> {
    match array.data_type() {
        DataType::LargeUtf8 => array.as_string::<i64>().iter().collect(),
        _ => array.as_string::<i32>().iter().collect(),
    }
}

impl DbfField {
    fn encode_value(
        &self,
        buf: &mut BytesMut,
        array: &ArrayRef,
        row: usize,
        row_number: usize,
    ) -> SpatialWriteResult<()> {
        let width = self.descriptor.width;
        if array.is_null(row) {
            let blank = if self.format == ValueFormat::Boolean {
                b'?'
            } else {
                b' '
            };
            buf.put_bytes(blank, width);
            return Ok(());
        }

        match self.format {
            ValueFormat::Boolean => {
                let value = array.as_boolean().value(row);
                buf.put_u8(if value { b'T' } else { b'F' });
            },
            ValueFormat::Integer => {
                let text = integer_text(array, row);
                self.put_right_aligned(buf, &text, row_number)?;
            },
            ValueFormat::Float => match float_value(array, row).and_then(format_float) {
                Some(text) => self.put_right_aligned(buf, &text, row_number)?,
                None => buf.put_bytes(b' ', width),
            },
            ValueFormat::Text => {
                let value = match array.data_type() {
                    DataType::LargeUtf8 => array.as_string::<i64>().value(row),
                    _ => array.as_string::<i32>().value(row),
                };
                put_left_aligned(buf, truncate(value, width), width);
            },
            ValueFormat::Date => {
                let date = array.as_primitive::<Date32Type>().value_as_date(row);
                let text = date
                    .filter(|date| (0..=9999).contains(&date.year()))
                    .map(|date| date.format(DATE_FORMAT).to_string());
                match text {
                    Some(text) => buf.put_slice(text.as_bytes()),
                    None => return Err(self.overflow(format!("{date:?}"), row_number)),
                }
            },
            ValueFormat::Timestamp { utc } => {
                let text = timestamp_value(array, row)
                    .map(|ts| {
                        let text = ts.format(TIMESTAMP_FORMAT).to_string();
                        if utc { text + "Z" } else { text }
                    })
                    .unwrap_or_default();
                if text.len() > width {
                    return Err(self.overflow(text, row_number));
                }
                put_left_aligned(buf, &text, width);
            },
        }
        Ok(())
    }

    fn put_right_aligned(
        &self,
        buf: &mut BytesMut,
        text: &str,
        row_number: usize,
    ) -> SpatialWriteResult<()> {
        let width = self.descriptor.width;
        if text.len() > width {
            return Err(self.overflow(text.to_string(), row_number));
        }
        buf.put_bytes(b' ', width - text.len());
        buf.put_slice(text.as_bytes());
        Ok(())
    }

    fn overflow(&self, value: String, row_number: usize) -> SpatialWriteError {
        SpatialWriteError::ValueOverflow {
            field: self.descriptor.name.clone(),
            value,
            width: self.descriptor.width,
            row: row_number,
        }
    }
}

fn put_left_aligned(buf: &mut BytesMut, text: &str, width: usize) {
    buf.put_slice(text.as_bytes());
    buf.put_bytes(b' ', width - text.len());
}

/// Cuts `value` to at most `width` bytes without splitting a character.
fn truncate(value: &str, width: usize) -> &str {
    if value.len() <= width {
        return value;
    }
    let mut end = width;
    while !value.is_char_boundary(end) {
        end -= 1;
    }
    &value[..end]
}

fn integer_text(array: &ArrayRef, row: usize) -> String {
    match array.data_type() {
        DataType::Int8 => array.as_primitive::<Int8Type>().value(row).to_string(),
        DataType::Int16 => array.as_primitive::<Int16Type>().value(row).to_string(),
        DataType::Int32 => array.as_primitive::<Int32Type>().value(row).to_string(),
        DataType::UInt8 => array.as_primitive::<UInt8Type>().value(row).to_string(),
        DataType::UInt16 => array.as_primitive::<UInt16Type>().value(row).to_string(),
        DataType::UInt32 => array.as_primitive::<UInt32Type>().value(row).to_string(),
        _ => array.as_primitive::<Int64Type>().value(row).to_string(),
    }
}

fn float_value(array: &ArrayRef, row: usize) -> Option<f64> {
    let value = match array.data_type() {
        DataType::Float32 => f64::from(array.as_primitive::<Float32Type>().value(row)),
        _ => array.as_primitive::<Float64Type>().value(row),
    };
    value.is_finite().then_some(value)
}

/// Formats a float into at most 24 characters, giving up decimals first.
fn format_float(value: f64) -> Option<String> {
    for decimals in (0..=FLOAT_DECIMALS).rev() {
        let text = format!("{value:.decimals$}");
        if text.len() <= FLOAT_WIDTH {
            return Some(text);
        }
    }
    for precision in (0..=FLOAT_DECIMALS).rev() {
        let text = format!("{value:.precision$e}");
        if text.len() <= FLOAT_WIDTH {
            return Some(text);
        }
    }
    None
}

fn timestamp_value(array: &ArrayRef, row: usize) -> Option<NaiveDateTime> {
    match array.data_type() {
        DataType::Timestamp(TimeUnit::Second, _) => array
            .as_primitive::<TimestampSecondType>()
            .value_as_datetime(row),
        DataType::Timestamp(TimeUnit::Millisecond, _) => array
            .as_primitive::<TimestampMillisecondType>()
            .value_as_datetime(row),
        DataType::Timestamp(TimeUnit::Nanosecond, _) => array
            .as_primitive::<TimestampNanosecondType>()
            .value_as_datetime(row),
        _ => array
            .as_primitive::<TimestampMicrosecondType>()
            .value_as_datetime(row),
    }
}
