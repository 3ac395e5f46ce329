//! Record source contracts, file-backed sources and column-role identification.

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use exr_core::{FieldRole, FieldRoles, Record};
use serde::{Deserialize, Serialize};
use serde_json::{Number, Value};
use thiserror::Error;
use tokio::fs;
use tracing::info;

pub const CRATE_NAME: &str = "exr-adapters";

#[derive(Debug, Error)]
pub enum AdapterError {
    #[error("could not identify a {} column; available columns: {columns:?}", .role.as_str())]
    MissingRole {
        role: FieldRole,
        columns: Vec<String>,
    },
    #[error("reading {path}: {source}")]
    Io {
        path: String,
        source: std::io::Error,
    },
    #[error("parsing {path}: {message}")]
    Parse { path: String, message: String },
    #[error("unsupported record file {path}: expected a .json or .csv extension")]
    UnsupportedFormat { path: String },
}

/// One batch of raw records plus the schema they were read with.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct RecordBatch {
    pub source_id: String,
    /// Column names in schema order.
    pub columns: Vec<String>,
    pub records: Vec<Record>,
}

impl RecordBatch {
    pub fn new(source_id: impl Into<String>, records: Vec<Record>) -> Self {
        let mut columns: Vec<String> = Vec::new();
        for record in &records {
            for name in record.column_names() {
                if !columns.iter().any(|c| c == name) {
                    columns.push(name.to_string());
                }
            }
        }
        Self {
            source_id: source_id.into(),
            columns,
            records,
        }
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }
}

#[async_trait]
pub trait RecordSource: Send + Sync {
    fn source_id(&self) -> &str;

    async fn load(&self) -> Result<RecordBatch, AdapterError>;
}

async fn read_source_text(path: &Path) -> Result<String, AdapterError> {
    fs::read_to_string(path)
        .await
        .map_err(|source| AdapterError::Io {
            path: path.display().to_string(),
            source,
        })
}

/// JSON array of flat objects; key order is kept as written.
#[derive(Debug, Clone)]
pub struct JsonRecordSource {
    path: PathBuf,
    source_id: String,
}

impl JsonRecordSource {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        let path = path.into();
        let source_id = path.display().to_string();
        Self { path, source_id }
    }
}

pub fn parse_json_records(text: &str, origin: &str) -> Result<RecordBatch, AdapterError> {
    let records: Vec<Record> = serde_json::from_str(text).map_err(|e| AdapterError::Parse {
        path: origin.to_string(),
        message: e.to_string(),
    })?;
    Ok(RecordBatch::new(origin, records))
}

#[async_trait]
impl RecordSource for JsonRecordSource {
    fn source_id(&self) -> &str {
        &self.source_id
    }

    async fn load(&self) -> Result<RecordBatch, AdapterError> {
        let text = read_source_text(&self.path).await?;
        let batch = parse_json_records(&text, &self.source_id)?;
        info!(source = %self.source_id, records = batch.len(), "loaded json records");
        Ok(batch)
    }
}

/// Header row plus data rows. Empty cells become null.
#[derive(Debug, Clone)]
pub struct CsvRecordSource {
    path: PathBuf,
    source_id: String,
}

impl CsvRecordSource {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        let path = path.into();
        let source_id = path.display().to_string();
        Self { path, source_id }
    }
}

/// Numbers are kept numeric only when their text round-trips, so values such as
/// `02139` or `1.50` stay text.
fn csv_cell_value(cell: &str) -> Value {
    if cell.trim().is_empty() {
        return Value::Null;
    }
    if let Ok(n) = cell.parse::<i64>() {
        if n.to_string() == cell {
            return Value::Number(n.into());
        }
    }
    if let Ok(f) = cell.parse::<f64>() {
        if f.is_finite() && f.to_string() == cell {
            if let Some(n) = Number::from_f64(f) {
                return Value::Number(n);
            }
        }
    }
    Value::String(cell.to_string())
}

pub fn parse_csv_records(text: &str, origin: &str) -> Result<RecordBatch, AdapterError> {
    let parse_err = |e: csv::Error| AdapterError::Parse {
        path: origin.to_string(),
        message: e.to_string(),
    };
    let mut reader = csv::ReaderBuilder::new()
        .flexible(true)
        .from_reader(text.as_bytes());
    let headers = reader
        .headers()
        .map_err(parse_err)?
        .iter()
        .map(|h| h.trim().to_string())
        .collect::<Vec<_>>();

    let mut records = Vec::new();
    for row in reader.records() {
        let row = row.map_err(parse_err)?;
        let record = Record::from_fields(
            headers
                .iter()
                .enumerate()
                .map(|(idx, header)| (header.clone(), csv_cell_value(row.get(idx).unwrap_or("")))),
        );
        records.push(record);
    }

    Ok(RecordBatch {
        source_id: origin.to_string(),
        columns: headers,
        records,
    })
}

#[async_trait]
impl RecordSource for CsvRecordSource {
    fn source_id(&self) -> &str {
        &self.source_id
    }

    async fn load(&self) -> Result<RecordBatch, AdapterError> {
        let text = read_source_text(&self.path).await?;
        let batch = parse_csv_records(&text, &self.source_id)?;
        info!(source = %self.source_id, records = batch.len(), "loaded csv records");
        Ok(batch)
    }
}

/// Pick a source implementation from the file extension.
pub fn source_for_path(path: impl AsRef<Path>) -> Result<Box<dyn RecordSource>, AdapterError> {
    let path = path.as_ref();
    let ext = path
        .extension()
        .and_then(|e| e.to_str())
        .map(str::to_ascii_lowercase);
    match ext.as_deref() {
        Some("json") => Ok(Box::new(JsonRecordSource::new(path))),
        Some("csv") => Ok(Box::new(CsvRecordSource::new(path))),
        _ => Err(AdapterError::UnsupportedFormat {
            path: path.display().to_string(),
        }),
    }
}

/// Known header synonyms for each role, matched case-insensitively.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ColumnSynonyms {
    pub name: Vec<String>,
    pub title: Vec<String>,
    pub address: Vec<String>,
    pub company: Vec<String>,
}

fn owned(list: &[&str]) -> Vec<String> {
    list.iter().map(|s| s.to_string()).collect()
}

impl Default for ColumnSynonyms {
    fn default() -> Self {
        Self {
            name: owned(&[
                "name",
                "executive_name",
                "person_name",
                "full_name",
                "first_name",
                "last_name",
                "exec_name",
            ]),
            title: owned(&["title", "job_title", "position", "role", "job", "exec_title"]),
            address: owned(&[
                "address",
                "location",
                "city",
                "state",
                "address_line",
                "street",
                "mailing_address",
            ]),
            company: owned(&[
                "company",
                "company_name",
                "employer",
                "firm",
                "organization",
                "org",
            ]),
        }
    }
}

impl ColumnSynonyms {
    pub fn for_role(&self, role: FieldRole) -> &[String] {
        match role {
            FieldRole::Name => &self.name,
            FieldRole::Title => &self.title,
            FieldRole::Address => &self.address,
            FieldRole::Company => &self.company,
        }
    }
}

/// Resolve the four roles against a schema. Exact header matches win over substring
/// matches, and a column is never assigned to more than one role.
pub fn identify_field_roles(
    columns: &[String],
    synonyms: &ColumnSynonyms,
) -> Result<FieldRoles, AdapterError> {
    let lowered = columns
        .iter()
        .map(|c| c.trim().to_lowercase())
        .collect::<Vec<_>>();
    let mut claimed = vec![false; columns.len()];
    let mut resolved: [Option<usize>; 4] = [None; 4];

    for exact in [true, false] {
        for (slot, role) in FieldRole::ALL.iter().enumerate() {
            if resolved[slot].is_some() {
                continue;
            }
            let wanted = synonyms
                .for_role(*role)
                .iter()
                .map(|s| s.to_lowercase())
                .collect::<Vec<_>>();
            let hit = lowered.iter().enumerate().position(|(idx, header)| {
                !claimed[idx]
                    && wanted.iter().any(|w| {
                        if exact {
                            header == w
                        } else {
                            header.contains(w.as_str())
                        }
                    })
            });
            if let Some(idx) = hit {
                claimed[idx] = true;
                resolved[slot] = Some(idx);
            }
        }
    }

    let column_at = |slot: usize| resolved[slot].map(|idx| columns[idx].clone());
    let Some(name) = column_at(0) else {
        return Err(AdapterError::MissingRole {
            role: FieldRole::Name,
            columns: columns.to_vec(),
        });
    };

    let roles = FieldRoles {
        name,
        title: column_at(1),
        address: column_at(2),
        company: column_at(3),
    };
    info!(
        name = %roles.name,
        title = roles.title.as_deref().unwrap_or("NOT FOUND"),
        address = roles.address.as_deref().unwrap_or("NOT FOUND"),
        company = roles.company.as_deref().unwrap_or("NOT FOUND"),
        "identified columns"
    );
    Ok(roles)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn cols(names: &[&str]) -> Vec<String> {
        names.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn exact_headers_win_over_substrings() {
        let roles = identify_field_roles(
            &cols(&["id", "company_name", "Executive_Name", "Job Title", "mailing_address"]),
            &ColumnSynonyms::default(),
        )
        .unwrap();
        assert_eq!(roles.name, "Executive_Name");
        assert_eq!(roles.company.as_deref(), Some("company_name"));
        assert_eq!(roles.title.as_deref(), Some("Job Title"));
        assert_eq!(roles.address.as_deref(), Some("mailing_address"));
    }

    #[test]
    fn claimed_column_is_not_reused() {
        let err = identify_field_roles(&cols(&["person", "company_name"]), &ColumnSynonyms::default())
            .unwrap_err();
        match err {
            AdapterError::MissingRole { role, columns } => {
                assert_eq!(role, FieldRole::Name);
                assert_eq!(columns, cols(&["person", "company_name"]));
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn substring_fallback_and_unresolved_roles() {
        let roles = identify_field_roles(&cols(&["exec_full_name", "hq_city"]), &ColumnSynonyms::default())
            .unwrap();
        assert_eq!(roles.name, "exec_full_name");
        assert_eq!(roles.address.as_deref(), Some("hq_city"));
        assert_eq!(roles.title, None);
        assert_eq!(roles.company, None);
    }

    #[test]
    fn custom_synonyms_are_honoured() {
        let synonyms = ColumnSynonyms {
            name: cols(&["nombre"]),
            ..ColumnSynonyms::default()
        };
        let roles = identify_field_roles(&cols(&["Nombre", "empresa"]), &synonyms).unwrap();
        assert_eq!(roles.name, "Nombre");
    }

    #[test]
    fn csv_cells_keep_text_that_does_not_round_trip() {
        assert_eq!(csv_cell_value(""), Value::Null);
        assert_eq!(csv_cell_value("42"), Value::from(42));
        assert_eq!(csv_cell_value("2.5"), Value::from(2.5));
        assert_eq!(csv_cell_value("02139"), Value::from("02139"));
        assert_eq!(csv_cell_value("1.50"), Value::from("1.50"));
        assert_eq!(csv_cell_value("nan"), Value::from("nan"));
    }

    #[test]
    fn csv_batch_keeps_header_order() {
        let text = "name,title,company\nJohn Smith,CEO,Tesla\nSmith John,,SpaceX\n";
        let batch = parse_csv_records(text, "inline.csv").unwrap();
        assert_eq!(batch.columns, cols(&["name", "title", "company"]));
        assert_eq!(batch.len(), 2);
        assert_eq!(batch.records[1].get("title"), Some(&Value::Null));
        assert_eq!(batch.records[1].text("company"), "SpaceX");
    }

    #[test]
    fn json_rejects_non_object_rows() {
        let err = parse_json_records("[1, 2]", "inline.json").unwrap_err();
        assert!(matches!(err, AdapterError::Parse { .. }));
    }

    #[tokio::test]
    async fn json_source_loads_union_of_columns() {
        let dir = tempdir().expect("tempdir");
        let path = dir.path().join("execs.json");
        std::fs::write(
            &path,
            r#"[{"name": "John Smith", "company": "Tesla"},
                {"name": "Smith, John", "address": "123 Main St", "company": null}]"#,
        )
        .expect("write");

        let source = source_for_path(&path).expect("source");
        let batch = source.load().await.expect("load");
        assert_eq!(batch.columns, cols(&["name", "company", "address"]));
        assert_eq!(batch.records[1].text("address"), "123 Main St");
    }

    #[tokio::test]
    async fn missing_file_reports_io_error() {
        let dir = tempdir().expect("tempdir");
        let source = CsvRecordSource::new(dir.path().join("absent.csv"));
        let err = source.load().await.unwrap_err();
        assert!(matches!(err, AdapterError::Io { .. }));
    }

    #[test]
    fn unknown_extension_is_rejected() {
        assert!(matches!(
            source_for_path("execs.xlsx"),
            Err(AdapterError::UnsupportedFormat { .. })
        ));
    }
}
