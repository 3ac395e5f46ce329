//! Batch resolution pipeline: load, resolve, export for review, review, consolidate, persist.

use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;

use anyhow::{bail, Context, Result};
use chrono::{DateTime, Utc};
use exr_adapters::{identify_field_roles, ColumnSynonyms, RecordBatch, RecordSource};
use exr_core::{value_text, ConfidenceTier, FieldRole, FieldRoles, PersonEntity, Record};
use exr_resolve::{consolidate, Resolution, ResolveEngine, Thresholds};
use exr_review::{DecisionSource, ReviewOutcome, ReviewSession};
use exr_storage::{
    persist_person, DocumentStore, FsDocumentStore, RestDocumentStore, RestStoreConfig,
};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use sha2::{Digest, Sha256};
use thiserror::Error;
use tokio::fs;
use tracing::{info, info_span, warn, Instrument};
use uuid::Uuid;

pub const CRATE_NAME: &str = "exr-pipeline";

pub const REVIEW_TYPE: &str = "uncertain_executive_matches";

#[derive(Debug, Clone)]
pub struct ResolveConfig {
    pub thresholds: Thresholds,
    pub output_dir: PathBuf,
    pub input: Option<PathBuf>,
    pub store_dir: PathBuf,
    pub store_url: Option<String>,
    pub store_auth: Option<String>,
    pub http_timeout_secs: u64,
    pub columns: ColumnSynonyms,
}

impl Default for ResolveConfig {
    fn default() -> Self {
        Self {
            thresholds: Thresholds::default(),
            output_dir: PathBuf::from("."),
            input: None,
            store_dir: PathBuf::from("./store"),
            store_url: None,
            store_auth: None,
            http_timeout_secs: 20,
            columns: ColumnSynonyms::default(),
        }
    }
}

pub const CONFIG_FILE_VERSION: u32 = 1;

/// Parse an optional setting, keeping `default` when it is unset. Unparseable values are
/// reported and also fall back to `default`.
fn parse_setting<T>(name: &str, raw: Option<String>, default: T) -> T
where
    T: FromStr + fmt::Display + Copy,
{
    let Some(raw) = raw else {
        return default;
    };
    match raw.trim().parse() {
        Ok(value) => value,
        Err(_) => {
            warn!(
                setting = name,
                value = raw.as_str(),
                fallback = %default,
                "ignoring unparseable setting"
            );
            default
        }
    }
}

fn env_setting<T>(name: &str, default: T) -> T
where
    T: FromStr + fmt::Display + Copy,
{
    parse_setting(name, std::env::var(name).ok(), default)
}

#[derive(Debug, Clone, Deserialize)]
struct ConfigFile {
    version: Option<u32>,
    grouping_threshold: Option<f64>,
    uncertainty_threshold: Option<f64>,
    output_dir: Option<PathBuf>,
    columns: Option<ColumnSynonyms>,
}

impl ResolveConfig {
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            thresholds: Thresholds {
                grouping_threshold: env_setting(
                    "EXR_GROUPING_THRESHOLD",
                    defaults.thresholds.grouping_threshold,
                ),
                uncertainty_threshold: env_setting(
                    "EXR_UNCERTAINTY_THRESHOLD",
                    defaults.thresholds.uncertainty_threshold,
                ),
            },
            output_dir: std::env::var("EXR_OUTPUT_DIR")
                .map(PathBuf::from)
                .unwrap_or(defaults.output_dir),
            input: std::env::var("EXR_INPUT").ok().map(PathBuf::from),
            store_dir: std::env::var("EXR_STORE_DIR")
                .map(PathBuf::from)
                .unwrap_or(defaults.store_dir),
            store_url: std::env::var("EXR_STORE_URL").ok().filter(|v| !v.trim().is_empty()),
            store_auth: std::env::var("EXR_STORE_AUTH").ok().filter(|v| !v.trim().is_empty()),
            http_timeout_secs: env_setting("EXR_HTTP_TIMEOUT_SECS", defaults.http_timeout_secs),
            columns: defaults.columns,
        }
    }

    /// Overlay values from a YAML config file.
    pub fn apply_yaml(&mut self, text: &str, origin: &str) -> Result<()> {
        let file: ConfigFile =
            serde_yaml::from_str(text).with_context(|| format!("parsing {origin}"))?;
        if let Some(version) = file.version {
            if version != CONFIG_FILE_VERSION {
                bail!("{origin}: unsupported config version {version}, expected {CONFIG_FILE_VERSION}");
            }
        }
        if let Some(v) = file.grouping_threshold {
            self.thresholds.grouping_threshold = v;
        }
        if let Some(v) = file.uncertainty_threshold {
            self.thresholds.uncertainty_threshold = v;
        }
        if let Some(dir) = file.output_dir {
            self.output_dir = dir;
        }
        if let Some(columns) = file.columns {
            self.columns = columns;
        }
        Ok(())
    }

    pub fn apply_file(&mut self, path: &Path) -> Result<()> {
        let text = std::fs::read_to_string(path)
            .with_context(|| format!("reading {}", path.display()))?;
        self.apply_yaml(&text, &path.display().to_string())
    }

    /// Environment, then `EXR_CONFIG` if set, then validation.
    pub fn load_from_env() -> Result<Self> {
        let mut config = Self::from_env();
        if let Ok(path) = std::env::var("EXR_CONFIG") {
            config.apply_file(Path::new(&path))?;
        }
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        self.thresholds
            .validate()
            .context("invalid resolution thresholds")
    }
}

/// Build the store handle for one run. A REST URL wins over the local directory.
pub fn open_store(config: &ResolveConfig) -> Result<Box<dyn DocumentStore>> {
    match &config.store_url {
        Some(url) => {
            let mut rest = RestStoreConfig::new(url.clone());
            rest.auth_token = config.store_auth.clone();
            rest.timeout = Duration::from_secs(config.http_timeout_secs);
            rest.user_agent = Some(format!("exr/{}", env!("CARGO_PKG_VERSION")));
            let store = RestDocumentStore::connect(rest)
                .with_context(|| format!("connecting to document store {url}"))?;
            Ok(Box::new(store))
        }
        None => Ok(Box::new(FsDocumentStore::new(config.store_dir.clone()))),
    }
}

#[derive(Debug, Error)]
pub enum ExportError {
    #[error("creating output directory {path}: {source}")]
    CreateDir {
        path: String,
        source: std::io::Error,
    },
    #[error("writing review file {path}: {source}")]
    Write {
        path: String,
        source: std::io::Error,
    },
    #[error("serializing review export: {0}")]
    Serialize(#[from] serde_json::Error),
}

#[derive(Debug, Clone, Serialize)]
pub struct ExportInfo {
    pub run_id: Uuid,
    pub timestamp: DateTime<Utc>,
    pub total_groups: usize,
    pub total_records: usize,
    pub review_type: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct ExportRecord {
    pub name: String,
    pub title: String,
    pub company: String,
    pub address: String,
    pub all_fields: Map<String, Value>,
}

#[derive(Debug, Clone, Serialize)]
pub struct ExportGroup {
    pub group_id: usize,
    pub confidence: ConfidenceTier,
    pub average_similarity: f64,
    pub record_count: usize,
    pub companies: Vec<String>,
    pub person_name: String,
    pub records: Vec<ExportRecord>,
}

/// Advisory review document. Never read back by the resolver.
#[derive(Debug, Clone, Serialize)]
pub struct ReviewExport {
    pub export_info: ExportInfo,
    pub groups: Vec<ExportGroup>,
}

fn round2(value: f64) -> f64 {
    (value * 100.0).round() / 100.0
}

fn export_record(record: &Record, roles: &FieldRoles) -> ExportRecord {
    let all_fields = record
        .fields()
        .filter(|(_, v)| !v.is_null())
        .map(|(k, v)| (k.to_string(), Value::String(value_text(v))))
        .collect();
    ExportRecord {
        name: roles.text(record, FieldRole::Name),
        title: roles.text(record, FieldRole::Title),
        company: roles.text(record, FieldRole::Company),
        address: roles.text(record, FieldRole::Address),
        all_fields,
    }
}

/// Uncertain groups only, in group-id order.
pub fn build_review_export(
    run_id: Uuid,
    timestamp: DateTime<Utc>,
    resolution: &Resolution,
    records: &[Record],
    roles: &FieldRoles,
) -> ReviewExport {
    let groups = resolution
        .uncertain()
        .map(|group| ExportGroup {
            group_id: group.group_id,
            confidence: group.tier().unwrap_or(ConfidenceTier::Uncertain),
            average_similarity: round2(group.avg_similarity().unwrap_or_default()),
            record_count: group.len(),
            companies: group.companies.clone(),
            person_name: group.person_name.clone(),
            records: group
                .member_records(records)
                .map(|r| export_record(r, roles))
                .collect(),
        })
        .collect::<Vec<_>>();

    ReviewExport {
        export_info: ExportInfo {
            run_id,
            timestamp,
            total_groups: groups.len(),
            total_records: groups.iter().map(|g| g.record_count).sum(),
            review_type: REVIEW_TYPE.to_string(),
        },
        groups,
    }
}

pub fn review_file_name(timestamp: DateTime<Utc>) -> String {
    format!("executive_review_{}.json", timestamp.format("%Y%m%d_%H%M%S"))
}

/// Write the review document; in-memory state is untouched on failure so callers may retry.
pub async fn export_review(output_dir: &Path, export: &ReviewExport) -> Result<PathBuf, ExportError> {
    fs::create_dir_all(output_dir)
        .await
        .map_err(|source| ExportError::CreateDir {
            path: output_dir.display().to_string(),
            source,
        })?;
    let path = output_dir.join(review_file_name(export.export_info.timestamp));
    let bytes = serde_json::to_vec_pretty(export)?;
    fs::write(&path, bytes)
        .await
        .map_err(|source| ExportError::Write {
            path: path.display().to_string(),
            source,
        })?;
    Ok(path)
}

#[derive(Debug, Clone, Serialize)]
pub struct RunManifest {
    pub schema_version: u32,
    pub run_id: Uuid,
    pub files: Vec<RunManifestFile>,
}

#[derive(Debug, Clone, Serialize)]
pub struct RunManifestFile {
    pub name: String,
    pub path: String,
    pub sha256: String,
    pub bytes: u64,
}

fn manifest_entry(name: &str, base_dir: &Path, path: &Path) -> Result<RunManifestFile> {
    let bytes = std::fs::read(path).with_context(|| format!("reading {}", path.display()))?;
    let mut hasher = Sha256::new();
    hasher.update(&bytes);
    let sha256 = hex::encode(hasher.finalize());
    let rel = path
        .strip_prefix(base_dir)
        .unwrap_or(path)
        .display()
        .to_string();
    Ok(RunManifestFile {
        name: name.to_string(),
        path: rel,
        sha256,
        bytes: bytes.len() as u64,
    })
}

/// `runs/<run_id>/people.json` plus a manifest hashing it and, when one was written, the
/// review file.
pub async fn write_run_artifacts(
    output_dir: &Path,
    run_id: Uuid,
    review_file: Option<&Path>,
    people: &[PersonEntity],
) -> Result<PathBuf> {
    let run_dir = output_dir.join("runs").join(run_id.to_string());
    fs::create_dir_all(&run_dir)
        .await
        .with_context(|| format!("creating {}", run_dir.display()))?;

    let people_path = run_dir.join("people.json");
    let people_json = serde_json::to_vec_pretty(people).context("serializing consolidated people")?;
    fs::write(&people_path, people_json)
        .await
        .with_context(|| format!("writing {}", people_path.display()))?;

    let mut files = Vec::with_capacity(2);
    if let Some(review_file) = review_file {
        files.push(manifest_entry("review", output_dir, review_file)?);
    }
    files.push(manifest_entry("people", output_dir, &people_path)?);

    let manifest = RunManifest {
        schema_version: 1,
        run_id,
        files,
    };
    let manifest_path = run_dir.join("manifest.json");
    let bytes = serde_json::to_vec_pretty(&manifest).context("serializing run manifest")?;
    fs::write(&manifest_path, bytes)
        .await
        .with_context(|| format!("writing {}", manifest_path.display()))?;
    Ok(manifest_path)
}

#[derive(Debug, Clone, Serialize)]
pub struct RunSummary {
    pub run_id: Uuid,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub source_id: String,
    pub total_records: usize,
    pub roles: FieldRoles,
    pub groups: usize,
    pub uncertain: usize,
    pub high: usize,
    pub low: usize,
    pub review: ReviewOutcome,
    pub persisted: Vec<String>,
    pub persist_errors: Vec<String>,
    pub review_file: Option<String>,
    pub review_export_error: Option<String>,
    pub manifest: Option<String>,
}

/// Records, roles and classified groups for one batch, before any review.
#[derive(Debug, Clone)]
pub struct PreparedBatch {
    pub batch: RecordBatch,
    pub roles: FieldRoles,
    pub resolution: Resolution,
}

pub struct ResolvePipeline {
    config: ResolveConfig,
    engine: ResolveEngine,
    store: Box<dyn DocumentStore>,
}

impl ResolvePipeline {
    pub fn new(config: ResolveConfig, store: Box<dyn DocumentStore>) -> Result<Self> {
        config.validate()?;
        let engine = ResolveEngine::new(config.thresholds);
        Ok(Self {
            config,
            engine,
            store,
        })
    }

    pub fn config(&self) -> &ResolveConfig {
        &self.config
    }

    /// Load and resolve a batch. Fails before any grouping when no name column exists.
    pub async fn prepare(&self, source: &dyn RecordSource) -> Result<PreparedBatch> {
        let batch = source
            .load()
            .await
            .with_context(|| format!("loading records from {}", source.source_id()))?;
        if batch.is_empty() {
            bail!("no executive records found in {}", batch.source_id);
        }
        let roles = identify_field_roles(&batch.columns, &self.config.columns)
            .with_context(|| format!("identifying columns of {}", batch.source_id))?;
        let resolution = self.engine.resolve(&batch.records, &roles);
        Ok(PreparedBatch {
            batch,
            roles,
            resolution,
        })
    }

    pub async fn run_once(
        &self,
        source: &dyn RecordSource,
        decisions: &mut dyn DecisionSource,
    ) -> Result<RunSummary> {
        let started_at = Utc::now();
        let run_id = Uuid::new_v4();
        let span = info_span!("resolve_run", %run_id);
        self.run_inner(run_id, started_at, source, decisions)
            .instrument(span)
            .await
    }

    async fn run_inner(
        &self,
        run_id: Uuid,
        started_at: DateTime<Utc>,
        source: &dyn RecordSource,
        decisions: &mut dyn DecisionSource,
    ) -> Result<RunSummary> {
        let prepared = self.prepare(source).await?;
        let records = &prepared.batch.records;
        let roles = &prepared.roles;
        let resolution = &prepared.resolution;

        let export = build_review_export(run_id, started_at, resolution, records, roles);
        let (review_file, review_export_error) =
            match export_review(&self.config.output_dir, &export).await {
                Ok(path) => {
                    info!(path = %path.display(), groups = export.groups.len(), "review data exported");
                    (Some(path), None)
                }
                Err(err) => {
                    warn!(error = %err, "review export failed; continuing with review");
                    (None, Some(err.to_string()))
                }
            };

        let review = ReviewSession::new(records, roles)
            .run(&resolution.groups, decisions)
            .context("running review session")?;

        let mut people = Vec::new();
        let mut persisted = Vec::new();
        let mut persist_errors = Vec::new();
        for group in &resolution.groups {
            if !review.is_approved(group.group_id) {
                continue;
            }
            let person = consolidate(group, records, roles);
            match persist_person(self.store.as_ref(), &person, Utc::now()).await {
                Ok(saved) => {
                    info!(
                        group_id = group.group_id,
                        person_key = %saved.person_key,
                        companies = saved.links.len(),
                        "persisted person"
                    );
                    persisted.push(saved.person_key);
                }
                Err(err) => {
                    warn!(group_id = group.group_id, error = %err, "failed to persist person");
                    persist_errors.push(format!("group {}: {err}", group.group_id));
                }
            }
            people.push(person);
        }

        let manifest = match write_run_artifacts(
            &self.config.output_dir,
            run_id,
            review_file.as_deref(),
            &people,
        )
        .await
        {
            Ok(manifest) => Some(manifest.display().to_string()),
            Err(err) => {
                warn!(error = ?err, "writing run artifacts failed");
                None
            }
        };

        let count_tier = |tier: ConfidenceTier| resolution.groups_with_tier(tier).count();
        Ok(RunSummary {
            run_id,
            started_at,
            finished_at: Utc::now(),
            source_id: prepared.batch.source_id.clone(),
            total_records: resolution.total_records,
            roles: roles.clone(),
            groups: resolution.groups.len(),
            uncertain: count_tier(ConfidenceTier::Uncertain),
            high: count_tier(ConfidenceTier::High),
            low: count_tier(ConfidenceTier::Low),
            review,
            persisted,
            persist_errors,
            review_file: review_file.map(|p| p.display().to_string()),
            review_export_error,
            manifest,
        })
    }
}

/// Run one batch with configuration and store taken from the environment.
pub async fn run_once_from_env(decisions: &mut dyn DecisionSource) -> Result<RunSummary> {
    let config = ResolveConfig::load_from_env()?;
    let Some(input) = config.input.clone() else {
        bail!("EXR_INPUT is not set; point it at a .json or .csv export of the executives table");
    };
    let source = exr_adapters::source_for_path(&input)?;
    let store = open_store(&config)?;
    let pipeline = ResolvePipeline::new(config, store)?;
    pipeline.run_once(source.as_ref(), decisions).await
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use tempfile::tempdir;

    fn records() -> Vec<Record> {
        vec![
            Record::new()
                .with("name", "John Smith")
                .with("company", "Tesla")
                .with("address", "123 Main St")
                .with("notes", Value::Null),
            Record::new()
                .with("name", "Smith, John")
                .with("company", "SpaceX")
                .with("address", "123 Main Street")
                .with("zip", 94105),
        ]
    }

    fn roles() -> FieldRoles {
        FieldRoles::new("name")
            .with_company("company")
            .with_address("address")
    }

    fn fixed_time() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 2, 24, 12, 0, 0).single().unwrap()
    }

    #[test]
    fn yaml_overrides_thresholds_and_columns() {
        let mut config = ResolveConfig::default();
        config
            .apply_yaml(
                "version: 1\ngrouping_threshold: 70\nuncertainty_threshold: 90\ncolumns:\n  name: [nombre]\n",
                "inline.yaml",
            )
            .unwrap();
        assert_eq!(config.thresholds.grouping_threshold, 70.0);
        assert_eq!(config.thresholds.uncertainty_threshold, 90.0);
        assert_eq!(config.columns.name, vec!["nombre".to_string()]);
        assert_eq!(config.columns.title, ColumnSynonyms::default().title);
        config.validate().unwrap();
    }

    #[test]
    fn config_version_is_optional_but_checked() {
        let mut config = ResolveConfig::default();
        config
            .apply_yaml("uncertainty_threshold: 88\n", "unversioned.yaml")
            .unwrap();
        assert_eq!(config.thresholds.uncertainty_threshold, 88.0);

        let err = config
            .apply_yaml("version: 2\ngrouping_threshold: 10\n", "future.yaml")
            .unwrap_err();
        assert!(err.to_string().contains("unsupported config version 2"));
        assert_eq!(config.thresholds.grouping_threshold, 75.0);
    }

    #[test]
    fn unparseable_settings_fall_back_to_defaults() {
        assert_eq!(parse_setting("EXR_GROUPING_THRESHOLD", None, 75.0), 75.0);
        assert_eq!(
            parse_setting("EXR_GROUPING_THRESHOLD", Some(" 80.5 ".into()), 75.0),
            80.5
        );
        assert_eq!(
            parse_setting("EXR_GROUPING_THRESHOLD", Some("8O".into()), 75.0),
            75.0
        );
        assert_eq!(
            parse_setting("EXR_HTTP_TIMEOUT_SECS", Some("-3".into()), 20u64),
            20
        );
    }

    #[test]
    fn inverted_thresholds_fail_validation() {
        let mut config = ResolveConfig::default();
        config.thresholds.grouping_threshold = 90.0;
        let err = config.validate().unwrap_err();
        assert!(format!("{err:#}").contains("exceeds uncertainty threshold"));
    }

    #[test]
    fn export_contains_only_uncertain_groups() {
        let records = records();
        let roles = roles();
        // the pair averages about 86, so widen the uncertain band to include it
        let engine = ResolveEngine::new(Thresholds::new(75.0, 95.0).unwrap());
        let resolution = engine.resolve(&records, &roles);
        let export = build_review_export(Uuid::nil(), fixed_time(), &resolution, &records, &roles);

        assert_eq!(export.export_info.total_groups, 1);
        assert_eq!(export.export_info.total_records, 2);
        assert_eq!(export.export_info.review_type, REVIEW_TYPE);
        let group = &export.groups[0];
        assert_eq!(group.average_similarity, 86.26);
        assert_eq!(group.companies, vec!["tesla", "spacex"]);
        assert_eq!(group.person_name, "john smith");
        assert_eq!(group.records[0].title, "");
        assert!(group.records[0].all_fields.get("notes").is_none());
        assert_eq!(group.records[1].all_fields["zip"], Value::from("94105"));

        let high_only = ResolveEngine::new(Thresholds::default()).resolve(&records, &roles);
        let export = build_review_export(Uuid::nil(), fixed_time(), &high_only, &records, &roles);
        assert_eq!(export.export_info.total_groups, 0);
        assert!(export.groups.is_empty());
    }

    #[tokio::test]
    async fn export_writes_timestamped_file() {
        let dir = tempdir().expect("tempdir");
        let records = records();
        let roles = roles();
        let resolution = ResolveEngine::new(Thresholds::new(75.0, 95.0).unwrap())
            .resolve(&records, &roles);
        let export = build_review_export(Uuid::nil(), fixed_time(), &resolution, &records, &roles);

        let path = export_review(&dir.path().join("review"), &export)
            .await
            .expect("export");
        assert_eq!(
            path.file_name().unwrap().to_string_lossy(),
            "executive_review_20260224_120000.json"
        );
        let written: Value =
            serde_json::from_str(&std::fs::read_to_string(&path).unwrap()).unwrap();
        assert_eq!(written["export_info"]["total_groups"], 1);
        assert_eq!(written["groups"][0]["confidence"], "uncertain");
        assert_eq!(written["groups"][0]["records"][1]["name"], "Smith, John");
    }

    #[tokio::test]
    async fn export_failure_is_reported() {
        let dir = tempdir().expect("tempdir");
        let blocker = dir.path().join("not-a-dir");
        std::fs::write(&blocker, b"x").unwrap();
        let export = ReviewExport {
            export_info: ExportInfo {
                run_id: Uuid::nil(),
                timestamp: fixed_time(),
                total_groups: 0,
                total_records: 0,
                review_type: REVIEW_TYPE.into(),
            },
            groups: vec![],
        };
        let err = export_review(&blocker, &export).await.unwrap_err();
        assert!(matches!(err, ExportError::CreateDir { .. }));
    }

    #[tokio::test]
    async fn run_artifacts_hash_review_and_people() {
        let dir = tempdir().expect("tempdir");
        let review = dir.path().join("executive_review_x.json");
        std::fs::write(&review, b"hello world").unwrap();

        let manifest_path = write_run_artifacts(dir.path(), Uuid::nil(), Some(review.as_path()), &[])
            .await
            .expect("artifacts");
        let manifest: Value =
            serde_json::from_str(&std::fs::read_to_string(&manifest_path).unwrap()).unwrap();
        assert_eq!(manifest["files"][0]["path"], "executive_review_x.json");
        assert_eq!(
            manifest["files"][0]["sha256"],
            "b94d27b9934d3e08a52e52d7da7dabfac484efe37a5380ee9088f7ace2efcde9"
        );
        assert_eq!(manifest["files"][1]["name"], "people");
    }

    #[tokio::test]
    async fn run_artifacts_without_review_file_still_snapshot_people() {
        let dir = tempdir().expect("tempdir");
        let person = PersonEntity {
            name: "Jane Doe".into(),
            address: String::new(),
            companies: vec!["acme".into()],
            grouped_from: 2,
            all_variations: vec![],
            titles: vec![],
        };

        let manifest_path = write_run_artifacts(dir.path(), Uuid::nil(), None, &[person])
            .await
            .expect("artifacts");
        let run_dir = manifest_path.parent().unwrap();
        let people: Value =
            serde_json::from_str(&std::fs::read_to_string(run_dir.join("people.json")).unwrap())
                .unwrap();
        assert_eq!(people[0]["name"], "Jane Doe");

        let manifest: Value =
            serde_json::from_str(&std::fs::read_to_string(&manifest_path).unwrap()).unwrap();
        let files = manifest["files"].as_array().unwrap();
        assert_eq!(files.len(), 1);
        assert_eq!(files[0]["name"], "people");
    }

    #[test]
    fn local_store_is_default() {
        let config = ResolveConfig::default();
        assert!(open_store(&config).is_ok());
    }
}
