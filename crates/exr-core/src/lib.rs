//! Core domain model for executive record resolution.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

pub const CRATE_NAME: &str = "exr-core";

/// One raw row from the source table, field order preserved.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Record {
    fields: Map<String, Value>,
}

impl Record {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_fields<I, K, V>(fields: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<Value>,
    {
        Self {
            fields: fields
                .into_iter()
                .map(|(k, v)| (k.into(), v.into()))
                .collect(),
        }
    }

    /// Builder-style insert used while a record is being read.
    pub fn with(mut self, field: impl Into<String>, value: impl Into<Value>) -> Self {
        self.fields.insert(field.into(), value.into());
        self
    }

    pub fn get(&self, field: &str) -> Option<&Value> {
        self.fields.get(field)
    }

    pub fn fields(&self) -> impl Iterator<Item = (&str, &Value)> {
        self.fields.iter().map(|(k, v)| (k.as_str(), v))
    }

    pub fn column_names(&self) -> impl Iterator<Item = &str> {
        self.fields.keys().map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.fields.len()
    }

    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }

    /// Raw text of a field; missing and null fields read as the empty string.
    pub fn text(&self, field: &str) -> String {
        self.get(field).map(value_text).unwrap_or_default()
    }

    /// Number of fields holding a non-null value with non-blank text.
    pub fn populated_field_count(&self) -> usize {
        self.fields
            .values()
            .filter(|v| !v.is_null() && !value_text(v).trim().is_empty())
            .count()
    }
}

/// Text form of a scalar field value.
pub fn value_text(value: &Value) -> String {
    match value {
        Value::Null => String::new(),
        Value::String(s) => s.clone(),
        Value::Bool(b) => b.to_string(),
        Value::Number(n) => n.to_string(),
        other => other.to_string(),
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FieldRole {
    Name,
    Title,
    Address,
    Company,
}

impl FieldRole {
    pub const ALL: [FieldRole; 4] = [
        FieldRole::Name,
        FieldRole::Title,
        FieldRole::Address,
        FieldRole::Company,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            FieldRole::Name => "name",
            FieldRole::Title => "title",
            FieldRole::Address => "address",
            FieldRole::Company => "company",
        }
    }
}

/// Concrete column chosen for each logical role. `name` is mandatory.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FieldRoles {
    pub name: String,
    pub title: Option<String>,
    pub address: Option<String>,
    pub company: Option<String>,
}

impl FieldRoles {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            title: None,
            address: None,
            company: None,
        }
    }

    pub fn with_title(mut self, column: impl Into<String>) -> Self {
        self.title = Some(column.into());
        self
    }

    pub fn with_address(mut self, column: impl Into<String>) -> Self {
        self.address = Some(column.into());
        self
    }

    pub fn with_company(mut self, column: impl Into<String>) -> Self {
        self.company = Some(column.into());
        self
    }

    pub fn column(&self, role: FieldRole) -> Option<&str> {
        match role {
            FieldRole::Name => Some(self.name.as_str()),
            FieldRole::Title => self.title.as_deref(),
            FieldRole::Address => self.address.as_deref(),
            FieldRole::Company => self.company.as_deref(),
        }
    }

    /// Raw text for a role; unresolved roles read as the empty string.
    pub fn text(&self, record: &Record, role: FieldRole) -> String {
        self.column(role)
            .map(|column| record.text(column))
            .unwrap_or_default()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ConfidenceTier {
    Low,
    Uncertain,
    High,
}

impl ConfidenceTier {
    pub fn as_str(self) -> &'static str {
        match self {
            ConfidenceTier::Low => "low",
            ConfidenceTier::Uncertain => "uncertain",
            ConfidenceTier::High => "high",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct GroupConfidence {
    pub avg_similarity: f64,
    pub tier: ConfidenceTier,
}

/// Person-group of record indices produced by clustering.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Group {
    pub group_id: usize,
    /// Member indices, founding (seed) member first.
    pub members: Vec<usize>,
    /// Distinct non-empty normalized company values, first-seen order.
    pub companies: Vec<String>,
    /// Normalized name of the founding member.
    pub person_name: String,
    /// Filled in by the confidence classifier.
    pub confidence: Option<GroupConfidence>,
}

impl Group {
    pub fn len(&self) -> usize {
        self.members.len()
    }

    pub fn is_empty(&self) -> bool {
        self.members.is_empty()
    }

    pub fn tier(&self) -> Option<ConfidenceTier> {
        self.confidence.map(|c| c.tier)
    }

    pub fn avg_similarity(&self) -> Option<f64> {
        self.confidence.map(|c| c.avg_similarity)
    }

    pub fn spans_multiple_companies(&self) -> bool {
        self.companies.len() > 1
    }

    pub fn member_records<'a>(&'a self, records: &'a [Record]) -> impl Iterator<Item = &'a Record> {
        self.members.iter().filter_map(move |&idx| records.get(idx))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ReviewDecision {
    Approved,
    Rejected,
    Skipped,
}

impl ReviewDecision {
    pub fn as_str(self) -> &'static str {
        match self {
            ReviewDecision::Approved => "approved",
            ReviewDecision::Rejected => "rejected",
            ReviewDecision::Skipped => "skipped",
        }
    }
}

/// One source record's view of the person, kept for traceability.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Variation {
    pub name: String,
    pub title: String,
    pub company: String,
    pub address: String,
}

/// Canonical person produced from an approved group.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PersonEntity {
    pub name: String,
    pub address: String,
    pub companies: Vec<String>,
    pub grouped_from: usize,
    pub all_variations: Vec<Variation>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub titles: Vec<String>,
}

/// Attribution link from a company to a consolidated person.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CompanyLink {
    #[serde(skip)]
    pub company_key: String,
    #[serde(skip)]
    pub person_key: String,
    pub person_name: String,
    pub linked_at: DateTime<Utc>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn record_text_reads_absent_and_null_as_empty() {
        let record = Record::new()
            .with("name", "Jane Doe")
            .with("zip", 94105)
            .with("ratio", 1.5)
            .with("title", Value::Null);
        assert_eq!(record.text("name"), "Jane Doe");
        assert_eq!(record.text("zip"), "94105");
        assert_eq!(record.text("ratio"), "1.5");
        assert_eq!(record.text("title"), "");
        assert_eq!(record.text("missing"), "");
    }

    #[test]
    fn populated_field_count_skips_null_and_blank() {
        let record = Record::new()
            .with("name", "Jane Doe")
            .with("title", "  ")
            .with("company", Value::Null)
            .with("zip", 0);
        assert_eq!(record.populated_field_count(), 2);
    }

    #[test]
    fn record_preserves_field_order() {
        let record: Record =
            serde_json::from_value(json!({"zeta": 1, "alpha": "a", "mid": null})).unwrap();
        let names: Vec<_> = record.column_names().collect();
        assert_eq!(names, vec!["zeta", "alpha", "mid"]);
    }

    #[test]
    fn unresolved_roles_read_empty() {
        let roles = FieldRoles::new("full_name").with_company("employer");
        let record = Record::new()
            .with("full_name", "Jane Doe")
            .with("employer", "Acme")
            .with("title", "CEO");
        assert_eq!(roles.text(&record, FieldRole::Name), "Jane Doe");
        assert_eq!(roles.text(&record, FieldRole::Company), "Acme");
        assert_eq!(roles.text(&record, FieldRole::Title), "");
    }

    #[test]
    fn person_entity_omits_empty_titles() {
        let person = PersonEntity {
            name: "Jane Doe".into(),
            address: String::new(),
            companies: vec!["acme".into()],
            grouped_from: 2,
            all_variations: vec![],
            titles: vec![],
        };
        let value = serde_json::to_value(&person).unwrap();
        assert!(value.get("titles").is_none());
        assert_eq!(value["grouped_from"], 2);
    }

    #[test]
    fn tiers_serialize_lowercase() {
        assert_eq!(
            serde_json::to_value(ConfidenceTier::Uncertain).unwrap(),
            json!("uncertain")
        );
        assert_eq!(ReviewDecision::Skipped.as_str(), "skipped");
    }
}
