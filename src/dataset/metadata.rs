//! Per-image metadata table
//!
//! CSV with a header row. The first column holds the image file name, the
//! remaining columns are named attributes (one of them is the label).

use std::io::Read;
use std::path::Path;

use super::DatasetError;

/// One metadata row
#[derive(Debug, Clone, PartialEq)]
pub struct MetadataRow {
    /// Image file name, relative to the image source
    pub name: String,
    /// Attribute values, aligned with [`MetadataTable::columns`]
    pub values: Vec<String>,
}

/// Metadata for a batch of images
#[derive(Debug, Clone, Default, PartialEq)]
pub struct MetadataTable {
    columns: Vec<String>,
    rows: Vec<MetadataRow>,
}

impl MetadataTable {
    /// Build a table from already parsed parts
    pub fn new(columns: Vec<String>, rows: Vec<MetadataRow>) -> Self {
        Self { columns, rows }
    }

    /// Read a CSV file
    pub fn from_csv_path<P: AsRef<Path>>(path: P) -> Result<Self, DatasetError> {
        let reader = csv::Reader::from_path(path)?;
        Self::from_csv(reader)
    }

    /// Read CSV from any reader
    pub fn from_reader<R: Read>(reader: R) -> Result<Self, DatasetError> {
        Self::from_csv(csv::Reader::from_reader(reader))
    }

    fn from_csv<R: Read>(mut reader: csv::Reader<R>) -> Result<Self, DatasetError> {
        let header = reader.headers()?.clone();
        if header.is_empty() {
            return Err(DatasetError::Metadata("metadata table has no columns".to_string()));
        }
        let columns: Vec<String> = header.iter().skip(1).map(str::to_string).collect();

        let mut rows = Vec::new();
        for record in reader.records() {
            let record = record?;
            let mut fields = record.iter();
            let name = fields
                .next()
                .map(str::trim)
                .filter(|name| !name.is_empty())
                .ok_or_else(|| {
                    DatasetError::Metadata(format!("row {} has no image name", rows.len() + 1))
                })?
                .to_string();
            let values: Vec<String> = fields.map(|value| value.trim().to_string()).collect();
            rows.push(MetadataRow { name, values });
        }

        Ok(Self { columns, rows })
    }

    /// Attribute column names (the name column excluded)
    pub fn columns(&self) -> &[String] {
        &self.columns
    }

    /// All rows in file order
    pub fn rows(&self) -> &[MetadataRow] {
        &self.rows
    }

    /// Number of rows
    pub fn len(&self) -> usize {
        self.rows.len()
    }

    /// True when there are no rows
    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    /// Image names in file order
    pub fn names(&self) -> Vec<String> {
        self.rows.iter().map(|row| row.name.clone()).collect()
    }

    /// Position of an attribute column
    pub fn column_index(&self, column: &str) -> Result<usize, DatasetError> {
        self.columns
            .iter()
            .position(|name| name == column)
            .ok_or_else(|| DatasetError::MissingColumn(column.to_string()))
    }
}

impl MetadataRow {
    /// Numeric label stored in attribute `column`
    pub fn label(&self, column: usize) -> Result<f64, DatasetError> {
        let raw = self.values.get(column).map(String::as_str).unwrap_or("");
        parse_label(raw).ok_or_else(|| DatasetError::InvalidLabel {
            row: self.name.clone(),
            value: raw.to_string(),
        })
    }
}

/// Booleans map to 1/0, anything else must be a finite number
fn parse_label(raw: &str) -> Option<f64> {
    match raw.to_ascii_lowercase().as_str() {
        "true" => Some(1.0),
        "false" => Some(0.0),
        other => other.parse::<f64>().ok().filter(|value| value.is_finite()),
    }
}
