//! Key-value document storage for consolidated people and their company links.

use std::fmt;
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::Context;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use exr_core::{CompanyLink, PersonEntity};
use exr_resolve::normalize_text;
use reqwest::StatusCode;
use serde_json::Value;
use thiserror::Error;
use tokio::fs;
use tokio::io::AsyncWriteExt;
use tracing::{debug, info_span, Instrument};
use uuid::Uuid;

pub const CRATE_NAME: &str = "exr-storage";

pub const PEOPLE_ROOT: &str = "executives";
pub const LINKS_ROOT: &str = "person_companies";

/// Characters that cannot appear in a document key segment.
const KEY_STRIPPED: [char; 8] = [',', '.', '$', '#', '[', ']', '/', '\\'];

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("request failed after retries: {0}")]
    Request(#[from] reqwest::Error),
    #[error("http status {status} writing {path}")]
    HttpStatus { status: u16, path: String },
    #[error("io error on {path}: {source}")]
    Io {
        path: String,
        source: std::io::Error,
    },
    #[error("serializing document {path}: {source}")]
    Serialize {
        path: String,
        source: serde_json::Error,
    },
    #[error("invalid document key segment `{0}`")]
    InvalidKey(String),
}

/// Key for a name or company: normalized, spaces to `_`, reserved characters removed.
/// Returns `None` when nothing usable is left.
pub fn document_key(input: &str) -> Option<String> {
    let key = normalize_text(input)
        .replace(' ', "_")
        .chars()
        .filter(|c| !KEY_STRIPPED.contains(c))
        .collect::<String>();
    if key.is_empty() {
        None
    } else {
        Some(key)
    }
}

/// Slash-separated location of a document, e.g. `executives/john_smith`.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct DocumentPath {
    segments: Vec<String>,
}

impl DocumentPath {
    pub fn new<I, S>(segments: I) -> Result<Self, StoreError>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let segments = segments.into_iter().map(Into::into).collect::<Vec<String>>();
        if segments.is_empty() {
            return Err(StoreError::InvalidKey(String::new()));
        }
        for segment in &segments {
            if segment.is_empty()
                || segment == ".."
                || segment.contains(['/', '\\', '.', '$', '#', '[', ']'])
            {
                return Err(StoreError::InvalidKey(segment.clone()));
            }
        }
        Ok(Self { segments })
    }

    pub fn person(person_key: &str) -> Result<Self, StoreError> {
        Self::new([PEOPLE_ROOT, person_key])
    }

    pub fn company_link(company_key: &str, person_key: &str) -> Result<Self, StoreError> {
        Self::new([LINKS_ROOT, company_key, person_key])
    }

    pub fn segments(&self) -> &[String] {
        &self.segments
    }
}

impl fmt::Display for DocumentPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.segments.join("/"))
    }
}

#[async_trait]
pub trait DocumentStore: Send + Sync {
    /// Create or replace the document at `path`.
    async fn set(&self, path: &DocumentPath, value: &Value) -> Result<(), StoreError>;

    async fn get(&self, path: &DocumentPath) -> Result<Option<Value>, StoreError>;
}

/// One JSON file per document under a root directory, written via temp file + rename.
#[derive(Debug, Clone)]
pub struct FsDocumentStore {
    root: PathBuf,
}

impl FsDocumentStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn file_path(&self, path: &DocumentPath) -> PathBuf {
        let mut file = self.root.clone();
        let (last, parents) = path
            .segments()
            .split_last()
            .expect("document paths are never empty");
        for segment in parents {
            file.push(segment);
        }
        file.push(format!("{last}.json"));
        file
    }
}

fn io_err(path: &Path) -> impl FnOnce(std::io::Error) -> StoreError + '_ {
    move |source| StoreError::Io {
        path: path.display().to_string(),
        source,
    }
}

#[async_trait]
impl DocumentStore for FsDocumentStore {
    async fn set(&self, path: &DocumentPath, value: &Value) -> Result<(), StoreError> {
        let absolute_path = self.file_path(path);
        let bytes = serde_json::to_vec_pretty(value).map_err(|source| StoreError::Serialize {
            path: path.to_string(),
            source,
        })?;

        let parent = absolute_path
            .parent()
            .expect("document file always has parent")
            .to_path_buf();
        fs::create_dir_all(&parent).await.map_err(io_err(&parent))?;

        let temp_path = parent.join(format!(".{}.{}.tmp", Uuid::new_v4(), bytes.len()));
        let mut file = fs::OpenOptions::new()
            .create_new(true)
            .write(true)
            .open(&temp_path)
            .await
            .map_err(io_err(&temp_path))?;
        file.write_all(&bytes).await.map_err(io_err(&temp_path))?;
        file.flush().await.map_err(io_err(&temp_path))?;
        drop(file);

        if let Err(source) = fs::rename(&temp_path, &absolute_path).await {
            let _ = fs::remove_file(&temp_path).await;
            return Err(StoreError::Io {
                path: absolute_path.display().to_string(),
                source,
            });
        }
        debug!(path = %path, bytes = bytes.len(), "document written");
        Ok(())
    }

    async fn get(&self, path: &DocumentPath) -> Result<Option<Value>, StoreError> {
        let absolute_path = self.file_path(path);
        let bytes = match fs::read(&absolute_path).await {
            Ok(bytes) => bytes,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(err) => return Err(io_err(&absolute_path)(err)),
        };
        let value = serde_json::from_slice(&bytes).map_err(|source| StoreError::Serialize {
            path: path.to_string(),
            source,
        })?;
        Ok(Some(value))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetryDisposition {
    Retryable,
    NonRetryable,
}

pub fn classify_status(status: StatusCode) -> RetryDisposition {
    if status.is_server_error() || status == StatusCode::TOO_MANY_REQUESTS {
        RetryDisposition::Retryable
    } else {
        RetryDisposition::NonRetryable
    }
}

pub fn classify_reqwest_error(err: &reqwest::Error) -> RetryDisposition {
    if err.is_timeout() || err.is_connect() || err.is_request() {
        RetryDisposition::Retryable
    } else {
        RetryDisposition::NonRetryable
    }
}

#[derive(Debug, Clone, Copy)]
pub struct BackoffPolicy {
    pub max_retries: usize,
    pub base_delay: Duration,
    pub max_delay: Duration,
}

impl Default for BackoffPolicy {
    fn default() -> Self {
        Self {
            max_retries: 3,
            base_delay: Duration::from_millis(250),
            max_delay: Duration::from_secs(5),
        }
    }
}

impl BackoffPolicy {
    pub fn delay_for_attempt(&self, attempt_index: usize) -> Duration {
        let factor = 1u32.checked_shl(attempt_index as u32).unwrap_or(u32::MAX);
        let delay = self.base_delay.saturating_mul(factor);
        delay.min(self.max_delay)
    }
}

#[derive(Debug, Clone)]
pub struct RestStoreConfig {
    /// Database root, e.g. `https://<project>-default-rtdb.firebaseio.com`.
    pub base_url: String,
    pub auth_token: Option<String>,
    pub timeout: Duration,
    pub user_agent: Option<String>,
    pub backoff: BackoffPolicy,
}

impl RestStoreConfig {
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into(),
            auth_token: None,
            timeout: Duration::from_secs(20),
            user_agent: None,
            backoff: BackoffPolicy::default(),
        }
    }
}

/// Realtime-Database style REST store: `PUT <base>/<path>.json`.
///
/// The handle is built explicitly for a run and dropped when the run ends.
#[derive(Debug)]
pub struct RestDocumentStore {
    client: reqwest::Client,
    base_url: String,
    auth_token: Option<String>,
    backoff: BackoffPolicy,
}

impl RestDocumentStore {
    pub fn connect(config: RestStoreConfig) -> anyhow::Result<Self> {
        let mut builder = reqwest::Client::builder()
            .gzip(true)
            .brotli(true)
            .timeout(config.timeout);

        if let Some(user_agent) = &config.user_agent {
            builder = builder.user_agent(user_agent.clone());
        }

        let client = builder.build().context("building reqwest client")?;
        Ok(Self {
            client,
            base_url: config.base_url.trim_end_matches('/').to_string(),
            auth_token: config.auth_token,
            backoff: config.backoff,
        })
    }

    pub fn document_url(&self, path: &DocumentPath) -> String {
        format!("{}/{}.json", self.base_url, path)
    }

    fn request(&self, method: reqwest::Method, path: &DocumentPath) -> reqwest::RequestBuilder {
        let builder = self.client.request(method, self.document_url(path));
        match &self.auth_token {
            Some(token) => builder.query(&[("auth", token.as_str())]),
            None => builder,
        }
    }

    async fn send_with_retry(
        &self,
        method: reqwest::Method,
        path: &DocumentPath,
        body: Option<&Value>,
    ) -> Result<reqwest::Response, StoreError> {
        let mut last_request_error: Option<reqwest::Error> = None;

        for attempt in 0..=self.backoff.max_retries {
            let mut builder = self.request(method.clone(), path);
            if let Some(body) = body {
                builder = builder.json(body);
            }

            match builder.send().await {
                Ok(resp) => {
                    let status = resp.status();
                    if status.is_success() {
                        return Ok(resp);
                    }
                    if classify_status(status) == RetryDisposition::Retryable
                        && attempt < self.backoff.max_retries
                    {
                        tokio::time::sleep(self.backoff.delay_for_attempt(attempt)).await;
                        continue;
                    }
                    return Err(StoreError::HttpStatus {
                        status: status.as_u16(),
                        path: path.to_string(),
                    });
                }
                Err(err) => {
                    if classify_reqwest_error(&err) == RetryDisposition::Retryable
                        && attempt < self.backoff.max_retries
                    {
                        last_request_error = Some(err);
                        tokio::time::sleep(self.backoff.delay_for_attempt(attempt)).await;
                        continue;
                    }
                    return Err(StoreError::Request(err));
                }
            }
        }

        Err(StoreError::Request(
            last_request_error.expect("retry loop should capture a request error"),
        ))
    }
}

#[async_trait]
impl DocumentStore for RestDocumentStore {
    async fn set(&self, path: &DocumentPath, value: &Value) -> Result<(), StoreError> {
        let span = info_span!("store_put", path = %path);
        self.send_with_retry(reqwest::Method::PUT, path, Some(value))
            .instrument(span)
            .await?;
        Ok(())
    }

    async fn get(&self, path: &DocumentPath) -> Result<Option<Value>, StoreError> {
        let resp = self.send_with_retry(reqwest::Method::GET, path, None).await?;
        let value: Value = resp.json().await?;
        Ok(if value.is_null() { None } else { Some(value) })
    }
}

/// Keys written for one consolidated person.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PersistedPerson {
    pub person_key: String,
    pub links: Vec<CompanyLink>,
}

/// Write the person document plus one attribution link per company.
pub async fn persist_person(
    store: &dyn DocumentStore,
    person: &PersonEntity,
    linked_at: DateTime<Utc>,
) -> Result<PersistedPerson, StoreError> {
    let person_key =
        document_key(&person.name).ok_or_else(|| StoreError::InvalidKey(person.name.clone()))?;
    let person_path = DocumentPath::person(&person_key)?;
    let document = serde_json::to_value(person).map_err(|source| StoreError::Serialize {
        path: person_path.to_string(),
        source,
    })?;
    store.set(&person_path, &document).await?;

    let mut links = Vec::with_capacity(person.companies.len());
    for company in &person.companies {
        let Some(company_key) = document_key(company) else {
            continue;
        };
        let link = CompanyLink {
            company_key: company_key.clone(),
            person_key: person_key.clone(),
            person_name: person.name.clone(),
            linked_at,
        };
        let link_path = DocumentPath::company_link(&company_key, &person_key)?;
        let document = serde_json::to_value(&link).map_err(|source| StoreError::Serialize {
            path: link_path.to_string(),
            source,
        })?;
        store.set(&link_path, &document).await?;
        links.push(link);
    }

    Ok(PersistedPerson { person_key, links })
}

#[cfg(test)]
mod tests {
    use super::*;
    use exr_core::Variation;
    use serde_json::json;
    use tempfile::tempdir;

    fn person() -> PersonEntity {
        PersonEntity {
            name: "John  Smith Jr.".into(),
            address: "123 Main St".into(),
            companies: vec!["tesla".into(), "space x, inc.".into()],
            grouped_from: 2,
            all_variations: vec![Variation {
                name: "John Smith Jr.".into(),
                title: "CEO".into(),
                company: "Tesla".into(),
                address: "123 Main St".into(),
            }],
            titles: vec!["CEO".into()],
        }
    }

    #[test]
    fn document_keys_are_sanitised() {
        assert_eq!(document_key("  Smith, John J. ").as_deref(), Some("smith_john_j"));
        assert_eq!(document_key("A/B [Holdings] #1 $").as_deref(), Some("ab_holdings_1_"));
        assert_eq!(document_key(" .. "), None);
        assert_eq!(document_key(""), None);
    }

    #[test]
    fn document_paths_reject_reserved_segments() {
        assert!(DocumentPath::new(["executives", "a.b"]).is_err());
        assert!(DocumentPath::new(["executives", ""]).is_err());
        assert!(DocumentPath::new(Vec::<String>::new()).is_err());
        let path = DocumentPath::company_link("tesla", "john_smith").unwrap();
        assert_eq!(path.to_string(), "person_companies/tesla/john_smith");
    }

    #[tokio::test]
    async fn fs_store_round_trips_and_overwrites() {
        let dir = tempdir().expect("tempdir");
        let store = FsDocumentStore::new(dir.path());
        let path = DocumentPath::person("john_smith").unwrap();

        assert_eq!(store.get(&path).await.expect("get"), None);
        store.set(&path, &json!({"v": 1})).await.expect("first set");
        store.set(&path, &json!({"v": 2})).await.expect("second set");
        assert_eq!(store.get(&path).await.expect("get"), Some(json!({"v": 2})));
        assert!(dir.path().join("executives/john_smith.json").exists());
    }

    #[tokio::test]
    async fn persist_person_writes_person_and_links() {
        let dir = tempdir().expect("tempdir");
        let store = FsDocumentStore::new(dir.path());
        let linked_at = DateTime::parse_from_rfc3339("2026-02-24T12:00:00Z")
            .expect("ts")
            .with_timezone(&Utc);

        let persisted = persist_person(&store, &person(), linked_at)
            .await
            .expect("persist");
        assert_eq!(persisted.person_key, "john_smith_jr");
        assert_eq!(persisted.links.len(), 2);
        assert_eq!(persisted.links[1].company_key, "space_x_inc");

        let doc = store
            .get(&DocumentPath::person("john_smith_jr").unwrap())
            .await
            .expect("get")
            .expect("person document");
        assert_eq!(doc["grouped_from"], 2);
        assert_eq!(doc["companies"], json!(["tesla", "space x, inc."]));
        assert_eq!(doc["titles"], json!(["CEO"]));

        let link = store
            .get(&DocumentPath::company_link("tesla", "john_smith_jr").unwrap())
            .await
            .expect("get")
            .expect("link document");
        assert_eq!(link["person_name"], "John  Smith Jr.");
        assert!(link.get("company_key").is_none());
        assert!(link["linked_at"].as_str().unwrap().starts_with("2026-02-24T12:00:00"));
    }

    #[tokio::test]
    async fn persist_person_rejects_blank_names() {
        let dir = tempdir().expect("tempdir");
        let store = FsDocumentStore::new(dir.path());
        let mut nameless = person();
        nameless.name = "  ".into();
        let err = persist_person(&store, &nameless, Utc::now()).await.unwrap_err();
        assert!(matches!(err, StoreError::InvalidKey(_)));
    }

    #[test]
    fn rest_urls_carry_json_suffix() {
        let store = RestDocumentStore::connect(RestStoreConfig::new(
            "https://example-default-rtdb.firebaseio.com/",
        ))
        .expect("client");
        let path = DocumentPath::person("john_smith").unwrap();
        assert_eq!(
            store.document_url(&path),
            "https://example-default-rtdb.firebaseio.com/executives/john_smith.json"
        );
    }

    #[test]
    fn retryable_statuses() {
        assert_eq!(
            classify_status(StatusCode::SERVICE_UNAVAILABLE),
            RetryDisposition::Retryable
        );
        assert_eq!(
            classify_status(StatusCode::TOO_MANY_REQUESTS),
            RetryDisposition::Retryable
        );
        assert_eq!(
            classify_status(StatusCode::UNAUTHORIZED),
            RetryDisposition::NonRetryable
        );
    }

    #[test]
    fn backoff_logic_is_exponential_and_capped() {
        let policy = BackoffPolicy {
            max_retries: 5,
            base_delay: Duration::from_millis(100),
            max_delay: Duration::from_millis(350),
        };

        assert_eq!(policy.delay_for_attempt(0), Duration::from_millis(100));
        assert_eq!(policy.delay_for_attempt(1), Duration::from_millis(200));
        assert_eq!(policy.delay_for_attempt(2), Duration::from_millis(350));
        assert_eq!(policy.delay_for_attempt(5), Duration::from_millis(350));
    }
}
