//! dBase attribute tables (`.dbf`), read through `shapefile::dbase`.
//!
//! Field types are inferred once from the table's field descriptors. Text
//! values are decoded under the dataset's declared [`TextEncoding`]; column
//! names are always ASCII. Blank numeric, date, and logical values are left
//! out of a record's attributes rather than stored as placeholders.

use std::fs::File;
use std::io::{BufReader, Read, Seek, SeekFrom};
use std::path::Path;

use cartoforge_dataset_models::{
    AttributeValue, Attributes, DatasetLayerField, FieldType, TextEncoding,
};
use chrono::{NaiveDate, NaiveTime};
use shapefile::dbase::{self, ErrorKind, FieldValue};

use crate::IngestError;

const HEADER_LEN: usize = 32;
const DESCRIPTOR_LEN: usize = 32;
const HEADER_TERMINATOR: u8 = 0x0D;
const DECIMALS_OFFSET: usize = 17;

/// Magnitude under which a whole `f64` converts to `i64` exactly.
const MAX_EXACT_INT: f64 = 9_007_199_254_740_992.0;

/// One column descriptor of a dBase table.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DbfField {
    /// Column name.
    pub name: String,
    /// dBase type letter (`C`, `N`, `F`, `D`, `T`, `L`, ...).
    pub kind: u8,
    /// Declared width in bytes.
    pub length: u8,
    /// Declared number of decimals.
    pub decimals: u8,
}

impl DbfField {
    /// OGR-style type tag for this column.
    #[must_use]
    pub const fn field_type(&self) -> FieldType {
        match self.kind {
            b'N' | b'F' if self.decimals > 0 => FieldType::Real,
            b'N' | b'F' if self.length < 10 => FieldType::Integer,
            b'N' | b'F' => FieldType::Integer64,
            b'B' | b'Y' => FieldType::Real,
            b'I' | b'L' => FieldType::Integer,
            b'D' => FieldType::Date,
            b'T' => FieldType::DateTime,
            _ => FieldType::String,
        }
    }

    /// The layer field this column becomes.
    #[must_use]
    pub fn to_layer_field(&self) -> DatasetLayerField {
        DatasetLayerField {
            name: self.name.clone(),
            field_type: self.field_type(),
            max_length: u32::from(self.length),
            precision: u32::from(self.decimals),
        }
    }
}

/// One decoded row.
#[derive(Debug, Clone, PartialEq)]
pub struct DbfRecord {
    /// Whether the row carries the deletion flag. Deleted rows have no
    /// attributes.
    pub deleted: bool,
    /// Non-blank values keyed by column name.
    pub attributes: Attributes,
}

/// Sequential reader over the records of a dBase table.
///
/// `dbase::Reader` skips deleted rows, so a second handle on the same table
/// reports the deletion flags that keep rows aligned with their shapes.
pub struct DbfReader<R: Read + Seek> {
    path: String,
    encoding: TextEncoding,
    flags: dbase::File<R>,
    values: dbase::Reader<R>,
    fields: Vec<DbfField>,
    position: usize,
}

impl<R: Read + Seek> std::fmt::Debug for DbfReader<R> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DbfReader")
            .field("path", &self.path)
            .field("encoding", &self.encoding)
            .field("fields", &self.fields)
            .field("position", &self.position)
            .finish_non_exhaustive()
    }
}

impl DbfReader<BufReader<File>> {
    /// Opens the table at `path`.
    ///
    /// # Errors
    ///
    /// See [`DbfReader::new`]; [`IngestError::Io`] if the file cannot be
    /// opened.
    pub fn open(path: &Path, encoding: TextEncoding) -> Result<Self, IngestError> {
        let open = || {
            File::open(path)
                .map(BufReader::new)
                .map_err(|source| IngestError::Io {
                    path: path.display().to_string(),
                    source,
                })
        };
        Self::new(open()?, open()?, encoding, path.display().to_string())
    }
}

impl<R: Read + Seek> DbfReader<R> {
    /// Reads the table header and field descriptors from two handles on the
    /// same table.
    ///
    /// `path` is only used in error messages.
    ///
    /// # Errors
    ///
    /// * [`IngestError::Parse`] if the header is truncated or declares an
    ///   unknown field type
    /// * [`IngestError::Encoding`] for UTF-16, which fixed-width dBase
    ///   columns cannot hold
    pub fn new(
        mut flags: R,
        values: R,
        encoding: TextEncoding,
        path: impl Into<String>,
    ) -> Result<Self, IngestError> {
        let path = path.into();

        if encoding == TextEncoding::Utf16 {
            return Err(IngestError::Encoding {
                path,
                encoding,
                message: "dBase columns cannot hold UTF-16 text".to_string(),
            });
        }

        let decimals = read_decimals(&mut flags).map_err(|e| IngestError::Parse {
            path: path.clone(),
            message: format!("truncated table header: {e}"),
        })?;

        let flags = dbase::File::open(flags).map_err(|e| table_error(&path, encoding, &e))?;
        let mut values = dbase::Reader::new(values).map_err(|e| table_error(&path, encoding, &e))?;
        match encoding {
            TextEncoding::Utf8 => values.set_encoding(dbase::Unicode),
            TextEncoding::Ascii => values.set_encoding(dbase::encoding::Ascii),
            TextEncoding::Latin1 | TextEncoding::Iso8859_1 | TextEncoding::Utf16 => {
                values.set_encoding(dbase::yore::code_pages::CP1252);
            }
        }

        let fields: Vec<DbfField> = flags
            .fields()
            .iter()
            .enumerate()
            .map(|(i, info)| DbfField {
                name: info.name().trim().to_string(),
                kind: u8::from(info.field_type()),
                length: info.length(),
                decimals: decimals.get(i).copied().unwrap_or(0),
            })
            .collect();

        log::debug!(
            "{path}: {} records, {} fields, encoding {encoding}",
            flags.num_records(),
            fields.len()
        );

        Ok(Self {
            path,
            encoding,
            flags,
            values,
            fields,
            position: 0,
        })
    }

    /// Column descriptors, in declaration order.
    #[must_use]
    pub fn fields(&self) -> &[DbfField] {
        &self.fields
    }

    /// Number of records declared by the header.
    #[must_use]
    pub fn record_count(&self) -> u32 {
        self.values.header().num_records
    }

    /// Reads the next record, or `None` once every declared record has been
    /// read.
    ///
    /// # Errors
    ///
    /// * [`IngestError::Parse`] if the file ends early or a value is
    ///   malformed
    /// * [`IngestError::Encoding`] if a value cannot be decoded
    pub fn next_record(&mut self) -> Result<Option<DbfRecord>, IngestError> {
        let index = self.position;
        let Some(mut flag) = self.flags.record(index) else {
            return Ok(None);
        };
        let deleted = flag
            .is_deleted()
            .map_err(|e| table_error(&self.path, self.encoding, &e))?;
        self.position += 1;

        if deleted {
            return Ok(Some(DbfRecord {
                deleted,
                attributes: Attributes::new(),
            }));
        }

        let mut row = self
            .values
            .iter_records()
            .next()
            .ok_or_else(|| IngestError::Parse {
                path: self.path.clone(),
                message: format!("record {}: table ends early", index + 1),
            })?
            .map_err(|e| table_error(&self.path, self.encoding, &e))?;

        let mut attributes = Attributes::new();
        for field in &self.fields {
            if let Some(value) = row.remove(&field.name).and_then(|v| attribute(field, v)) {
                attributes.insert(field.name.clone(), value);
            }
        }

        Ok(Some(DbfRecord {
            deleted,
            attributes,
        }))
    }
}

/// Reads the decimal counts of the field descriptors, then rewinds.
fn read_decimals<R: Read + Seek>(source: &mut R) -> std::io::Result<Vec<u8>> {
    let mut header = [0u8; HEADER_LEN];
    source.read_exact(&mut header)?;

    let mut decimals = Vec::new();
    let mut descriptor = [0u8; DESCRIPTOR_LEN];
    loop {
        source.read_exact(&mut descriptor[..1])?;
        if descriptor[0] == HEADER_TERMINATOR {
            break;
        }
        source.read_exact(&mut descriptor[1..])?;
        decimals.push(descriptor[DECIMALS_OFFSET]);
    }

    source.seek(SeekFrom::Start(0))?;
    Ok(decimals)
}

fn table_error(path: &str, encoding: TextEncoding, error: &dbase::Error) -> IngestError {
    let location = match error.field() {
        Some(field) => format!("record {}, field {}", error.record_num() + 1, field.name()),
        None => format!("record {}", error.record_num() + 1),
    };
    match error.kind() {
        ErrorKind::StringDecodeError(cause) => IngestError::Encoding {
            path: path.to_string(),
            encoding,
            message: format!("{location}: {cause}"),
        },
        kind => IngestError::Parse {
            path: path.to_string(),
            message: format!("{location}: {kind}"),
        },
    }
}

fn attribute(field: &DbfField, value: FieldValue) -> Option<AttributeValue> {
    match value {
        FieldValue::Character(text) => text.map(AttributeValue::String),
        FieldValue::Memo(text) => (!text.is_empty()).then_some(AttributeValue::String(text)),
        FieldValue::Numeric(number) => number.map(|n| numeric(field, n)),
        FieldValue::Float(number) => number.map(|n| numeric(field, f64::from(n))),
        FieldValue::Logical(flag) => flag.map(|b| AttributeValue::Int(i64::from(b))),
        FieldValue::Integer(n) => Some(AttributeValue::Int(i64::from(n))),
        FieldValue::Currency(n) | FieldValue::Double(n) => Some(AttributeValue::Float(n)),
        FieldValue::Date(date) => date
            .and_then(|d| calendar_date(&d))
            .map(|d| AttributeValue::Date(d.format("%Y-%m-%d").to_string())),
        FieldValue::DateTime(at) => {
            let time = at.time();
            let time = NaiveTime::from_hms_opt(time.hours(), time.minutes(), time.seconds())?;
            let date = calendar_date(&at.date())?;
            Some(AttributeValue::Date(
                date.and_time(time).format("%Y-%m-%dT%H:%M:%S").to_string(),
            ))
        }
    }
}

/// Whole values of columns without decimals are integers.
#[allow(clippy::cast_possible_truncation)]
fn numeric(field: &DbfField, value: f64) -> AttributeValue {
    if field.decimals == 0 && value.fract() == 0.0 && value.abs() < MAX_EXACT_INT {
        AttributeValue::Int(value as i64)
    } else {
        AttributeValue::Float(value)
    }
}

fn calendar_date(date: &dbase::Date) -> Option<NaiveDate> {
    NaiveDate::from_ymd_opt(
        i32::try_from(date.year()).ok()?,
        date.month(),
        date.day(),
    )
}

#[cfg(test)]
mod tests {
    use std::io::Cursor;

    use crate::fixtures::{DbfColumn, dbf_bytes};

    use super::*;

    const COLUMNS: &[DbfColumn] = &[
        ("NAME", b'C', 20, 0),
        ("POP", b'N', 8, 0),
        ("AREA", b'N', 12, 3),
        ("INSEE", b'N', 12, 0),
        ("CREATED", b'D', 8, 0),
        ("VALID", b'L', 1, 0),
    ];

    fn open(bytes: &[u8], encoding: TextEncoding) -> Result<DbfReader<Cursor<&[u8]>>, IngestError> {
        DbfReader::new(Cursor::new(bytes), Cursor::new(bytes), encoding, "communes.dbf")
    }

    fn reader(bytes: &[u8], encoding: TextEncoding) -> DbfReader<Cursor<&[u8]>> {
        open(bytes, encoding).unwrap()
    }

    #[test]
    fn infers_field_types_from_descriptors() {
        let bytes = dbf_bytes(COLUMNS, &[]);
        let table = reader(&bytes, TextEncoding::Utf8);

        let fields: Vec<DatasetLayerField> =
            table.fields().iter().map(DbfField::to_layer_field).collect();
        let types: Vec<FieldType> = fields.iter().map(|f| f.field_type).collect();
        assert_eq!(
            types,
            vec![
                FieldType::String,
                FieldType::Integer,
                FieldType::Real,
                FieldType::Integer64,
                FieldType::Date,
                FieldType::Integer,
            ]
        );
        assert_eq!(fields[0].max_length, 20);
        assert_eq!(fields[2].max_length, 12);
        assert_eq!(fields[2].precision, 3);
        assert_eq!(table.record_count(), 0);
    }

    #[test]
    fn decodes_typed_values() {
        let row: &[&[u8]] = &[b"Metz", b"  120000", b"41.940", b"57463", b"20240131", b"T"];
        let bytes = dbf_bytes(COLUMNS, &[(false, row)]);
        let mut table = reader(&bytes, TextEncoding::Utf8);

        let record = table.next_record().unwrap().unwrap();
        assert!(!record.deleted);
        let attrs = &record.attributes;
        assert_eq!(attrs.get("NAME"), Some(&AttributeValue::String("Metz".into())));
        assert_eq!(attrs.get("POP"), Some(&AttributeValue::Int(120_000)));
        assert_eq!(attrs.get("AREA"), Some(&AttributeValue::Float(41.94)));
        assert_eq!(attrs.get("INSEE"), Some(&AttributeValue::Int(57463)));
        assert_eq!(
            attrs.get("CREATED"),
            Some(&AttributeValue::Date("2024-01-31".into()))
        );
        assert_eq!(attrs.get("VALID"), Some(&AttributeValue::Int(1)));

        assert!(table.next_record().unwrap().is_none());
    }

    #[test]
    fn blank_values_are_left_out() {
        let row: &[&[u8]] = &[b"Nancy", b"", b"", b"********", b"", b"?"];
        let bytes = dbf_bytes(COLUMNS, &[(false, row)]);
        let mut table = reader(&bytes, TextEncoding::Utf8);

        let record = table.next_record().unwrap().unwrap();
        assert_eq!(record.attributes.len(), 1);
        assert!(record.attributes.contains_key("NAME"));
    }

    #[test]
    fn deleted_rows_keep_their_place() {
        let first: &[&[u8]] = &[b"Metz", b"1", b"", b"", b"", b""];
        let gone: &[&[u8]] = &[b"Nancy", b"2", b"", b"", b"", b""];
        let last: &[&[u8]] = &[b"Toul", b"3", b"", b"", b"", b""];
        let bytes = dbf_bytes(COLUMNS, &[(false, first), (true, gone), (false, last)]);
        let mut table = reader(&bytes, TextEncoding::Utf8);
        assert_eq!(table.record_count(), 3);

        let names: Vec<(bool, Option<AttributeValue>)> = std::iter::from_fn(|| {
            table
                .next_record()
                .unwrap()
                .map(|r| (r.deleted, r.attributes.get("NAME").cloned()))
        })
        .collect();
        assert_eq!(
            names,
            vec![
                (false, Some(AttributeValue::String("Metz".into()))),
                (true, None),
                (false, Some(AttributeValue::String("Toul".into()))),
            ]
        );
    }

    #[test]
    fn honours_the_declared_encoding() {
        let columns: &[DbfColumn] = &[("NAME", b'C', 10, 0)];
        let row: &[&[u8]] = &[b"Th\xe9on"];
        let bytes = dbf_bytes(columns, &[(false, row)]);

        let mut latin1 = reader(&bytes, TextEncoding::Latin1);
        let record = latin1.next_record().unwrap().unwrap();
        assert_eq!(
            record.attributes.get("NAME"),
            Some(&AttributeValue::String("Th\u{e9}on".into()))
        );

        let mut utf8 = reader(&bytes, TextEncoding::Utf8);
        assert!(matches!(
            utf8.next_record(),
            Err(IngestError::Encoding { encoding: TextEncoding::Utf8, .. })
        ));

        let mut ascii = reader(&bytes, TextEncoding::Ascii);
        assert!(matches!(
            ascii.next_record(),
            Err(IngestError::Encoding { .. })
        ));
    }

    #[test]
    fn column_names_do_not_follow_the_text_encoding() {
        let columns: &[DbfColumn] = &[("NAME", b'C', 10, 0), ("CODE", b'N', 5, 0)];
        let bytes = dbf_bytes(columns, &[]);

        for encoding in [
            TextEncoding::Utf8,
            TextEncoding::Latin1,
            TextEncoding::Iso8859_1,
            TextEncoding::Ascii,
        ] {
            let table = reader(&bytes, encoding);
            let names: Vec<&str> = table.fields().iter().map(|f| f.name.as_str()).collect();
            assert_eq!(names, ["NAME", "CODE"], "{encoding}");
        }
    }

    #[test]
    fn utf16_tables_are_rejected() {
        let columns: &[DbfColumn] = &[("NAME", b'C', 10, 0)];
        let row: &[&[u8]] = &[b"M\0e\0t\0z\0"];
        let bytes = dbf_bytes(columns, &[(false, row)]);

        assert!(matches!(
            open(&bytes, TextEncoding::Utf16),
            Err(IngestError::Encoding { encoding: TextEncoding::Utf16, .. })
        ));
    }

    #[test]
    fn decodes_binary_timestamps() {
        let columns: &[DbfColumn] = &[("SEEN", b'T', 8, 0)];
        let mut raw = Vec::new();
        raw.extend_from_slice(&2_460_341_i32.to_le_bytes());
        raw.extend_from_slice(&49_510_000_u32.to_le_bytes());
        let row: &[&[u8]] = &[&raw];
        let bytes = dbf_bytes(columns, &[(false, row)]);

        let mut table = reader(&bytes, TextEncoding::Utf8);
        let record = table.next_record().unwrap().unwrap();
        assert_eq!(
            record.attributes.get("SEEN"),
            Some(&AttributeValue::Date("2024-01-31T13:45:10".into()))
        );
        assert_eq!(table.fields()[0].field_type(), FieldType::DateTime);
    }

    #[test]
    fn malformed_numbers_fail() {
        let columns: &[DbfColumn] = &[("POP", b'N', 6, 0)];
        let row: &[&[u8]] = &[b"12a"];
        let bytes = dbf_bytes(columns, &[(false, row)]);

        let mut table = reader(&bytes, TextEncoding::Utf8);
        assert!(matches!(table.next_record(), Err(IngestError::Parse { .. })));
    }

    #[test]
    fn truncated_tables_fail() {
        let bytes = dbf_bytes(COLUMNS, &[]);
        assert!(matches!(
            open(&bytes[..40], TextEncoding::Utf8),
            Err(IngestError::Parse { .. })
        ));
    }
}
