//! CSV input and output for a batch of telemetry rows.
//!
//! Input columns are passed through untouched; provider columns and one
//! status column per provider are appended.

use std::fs::File;
use std::io;
use std::path::Path;

use csv::{ByteRecord, ReaderBuilder, WriterBuilder};

use crate::{
    error::{InputError, TableError},
    mapper::FieldMapper,
    model::{EnrichedRecord, Record, RecordInput},
    pipeline::ProviderBinding,
    provider::ProviderId,
};

/// Names of the input columns a record is built from. Case-sensitive.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ColumnNames {
    pub latitude: String,
    pub longitude: String,
    pub timestamp: String,
}

impl Default for ColumnNames {
    fn default() -> Self {
        Self {
            latitude: "INSPVAS__Latitude".to_string(),
            longitude: "INSPVAS__Longitude".to_string(),
            timestamp: "Timestamp".to_string(),
        }
    }
}

/// The raw input table, kept as bytes so it can be written back unchanged
/// whatever the encoding of the pass-through columns.
#[derive(Debug, Clone)]
pub struct InputTable {
    headers: ByteRecord,
    rows: Vec<ByteRecord>,
}

impl InputTable {
    pub fn read_path(path: &Path) -> Result<Self, TableError> {
        let file = File::open(path).map_err(|source| TableError::Io {
            path: path.display().to_string(),
            source,
        })?;
        Self::from_reader(file)
    }

    pub fn from_reader<R: io::Read>(reader: R) -> Result<Self, TableError> {
        let mut reader = ReaderBuilder::new().flexible(true).from_reader(reader);
        let headers = reader.byte_headers()?.clone();

        let mut rows = Vec::new();
        for row in reader.byte_records() {
            rows.push(row?);
        }

        Ok(Self { headers, rows })
    }

    pub fn headers(&self) -> &ByteRecord {
        &self.headers
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    fn position(&self, name: &str) -> Result<usize, TableError> {
        self.headers
            .iter()
            .position(|h| h == name.as_bytes())
            .ok_or_else(|| TableError::MissingColumn(name.to_string()))
    }

    /// Turn every row into a record, or the reason it cannot be one.
    ///
    /// Only a header lacking one of the required columns is an error here;
    /// bad cells, including ones that are not UTF-8, become per-row input
    /// errors.
    pub fn records(&self, names: &ColumnNames) -> Result<Vec<RecordInput>, TableError> {
        let lat = self.position(&names.latitude)?;
        let lon = self.position(&names.longitude)?;
        let ts = self.position(&names.timestamp)?;

        Ok(self
            .rows
            .iter()
            .map(|row| {
                Record::parse(
                    text_cell(row, lat, &names.latitude, InputError::InvalidCoordinate)?,
                    text_cell(row, lon, &names.longitude, InputError::InvalidCoordinate)?,
                    text_cell(row, ts, &names.timestamp, InputError::InvalidTimestamp)?,
                )
            })
            .collect())
    }

    pub fn write_path(
        &self,
        path: &Path,
        enriched: &[EnrichedRecord],
        layout: &OutputLayout,
        absent_marker: &str,
    ) -> Result<(), TableError> {
        let file = File::create(path).map_err(|source| TableError::Io {
            path: path.display().to_string(),
            source,
        })?;
        self.write_enriched(file, enriched, layout, absent_marker)
    }

    /// Write the input columns followed by `layout`'s columns, one line per row.
    pub fn write_enriched<W: io::Write>(
        &self,
        writer: W,
        enriched: &[EnrichedRecord],
        layout: &OutputLayout,
        absent_marker: &str,
    ) -> Result<(), TableError> {
        if enriched.len() != self.rows.len() {
            return Err(TableError::LengthMismatch {
                expected: self.rows.len(),
                found: enriched.len(),
            });
        }

        let mut out = WriterBuilder::new().from_writer(writer);

        let mut header = self.headers.clone();
        for column in layout.columns() {
            header.push_field(column.as_bytes());
        }
        out.write_byte_record(&header)?;

        let width = self.headers.len();
        for (row, rec) in self.rows.iter().zip(enriched) {
            let mut line = ByteRecord::with_capacity(row.as_slice().len(), width);
            for i in 0..width {
                line.push_field(row.get(i).unwrap_or_default());
            }

            for (provider, columns) in &layout.providers {
                for column in columns {
                    match rec.value(column) {
                        Some(value) => line.push_field(value.to_string().as_bytes()),
                        None => line.push_field(absent_marker.as_bytes()),
                    }
                }
                match rec.status(*provider) {
                    Some(status) => line.push_field(status.label().as_bytes()),
                    None => line.push_field(absent_marker.as_bytes()),
                }
            }

            out.write_byte_record(&line)?;
        }

        out.flush().map_err(|source| TableError::Io {
            path: "<output>".to_string(),
            source,
        })?;
        Ok(())
    }
}

fn text_cell<'r>(
    row: &'r ByteRecord,
    index: usize,
    name: &str,
    invalid: fn(String) -> InputError,
) -> Result<&'r str, InputError> {
    std::str::from_utf8(row.get(index).unwrap_or_default())
        .map_err(|e| invalid(format!("{name} is not valid UTF-8: {e}")))
}

/// The appended output columns, grouped per provider in run order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutputLayout {
    providers: Vec<(ProviderId, Vec<String>)>,
}

impl OutputLayout {
    pub fn new(bindings: &[ProviderBinding]) -> Self {
        Self::from_mappers(bindings.iter().map(|b| (b.id(), &b.mapper)))
    }

    pub fn from_mappers<'a>(
        mappers: impl IntoIterator<Item = (ProviderId, &'a FieldMapper)>,
    ) -> Self {
        let providers = mappers
            .into_iter()
            .map(|(id, mapper)| (id, mapper.columns(id)))
            .collect();
        Self { providers }
    }

    pub fn status_column(provider: ProviderId) -> String {
        format!("Status_{}", provider.column_suffix())
    }

    /// Appended column names, provider fields first, then that provider's status.
    pub fn columns(&self) -> Vec<String> {
        self.providers
            .iter()
            .flat_map(|(id, cols)| {
                cols.iter()
                    .cloned()
                    .chain(std::iter::once(Self::status_column(*id)))
            })
            .collect()
    }
}
