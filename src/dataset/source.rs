//! Where dataset records come from.
//!
//! A [`DatasetSource`] turns a dataset identifier into an in-memory polars
//! frame. The registry decides when to call it; sources themselves keep no
//! cache.

use crate::error::DatasetError;
use async_trait::async_trait;
use polars::prelude::*;
use std::collections::HashMap;
use std::io::Cursor;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{PoisonError, RwLock};

/// Fetches the full record set of a dataset.
#[async_trait]
pub trait DatasetSource: Send + Sync {
    async fn fetch(&self, dataset_id: &str) -> Result<DataFrame, DatasetError>;
}

/// Decode a JSON array of records into a frame.
pub fn frame_from_json(dataset_id: &str, bytes: Vec<u8>) -> Result<DataFrame, DatasetError> {
    JsonReader::new(Cursor::new(bytes))
        .with_json_format(JsonFormat::Json)
        .finish()
        .map_err(|e| DatasetError::Decode {
            id: dataset_id.to_owned(),
            message: e.to_string(),
        })
}

/// Reads dataset items from the Apify platform API.
pub struct ApifySource {
    client: reqwest::Client,
    base_url: String,
    token: Option<String>,
}

impl ApifySource {
    pub fn new(base_url: impl Into<String>, token: Option<String>) -> Self {
        Self {
            client: reqwest::Client::new(),
            base_url: base_url.into().trim_end_matches('/').to_owned(),
            token,
        }
    }

    /// The items endpoint for `dataset_id`, with the id percent-encoded as
    /// a single path segment.
    fn items_url(&self, dataset_id: &str) -> Result<reqwest::Url, DatasetError> {
        if matches!(dataset_id, "" | "." | "..") {
            return Err(DatasetError::NotFound(dataset_id.to_owned()));
        }
        let invalid = |message: String| DatasetError::Fetch {
            id: dataset_id.to_owned(),
            message,
        };

        let mut url = reqwest::Url::parse(&self.base_url)
            .map_err(|e| invalid(format!("invalid base URL {}: {e}", self.base_url)))?;
        url.path_segments_mut()
            .map_err(|()| invalid(format!("base URL {} cannot take a path", self.base_url)))?
            .pop_if_empty()
            .extend(["v2", "datasets", dataset_id, "items"]);
        url.query_pairs_mut()
            .append_pair("format", "json")
            .append_pair("clean", "true");
        Ok(url)
    }
}

#[async_trait]
impl DatasetSource for ApifySource {
    async fn fetch(&self, dataset_id: &str) -> Result<DataFrame, DatasetError> {
        let fetch_err = |message: String| DatasetError::Fetch {
            id: dataset_id.to_owned(),
            message,
        };

        let mut request = self.client.get(self.items_url(dataset_id)?);
        if let Some(token) = &self.token {
            request = request.bearer_auth(token);
        }

        let response = request.send().await.map_err(|e| fetch_err(e.to_string()))?;
        let status = response.status();
        if status == reqwest::StatusCode::NOT_FOUND {
            return Err(DatasetError::NotFound(dataset_id.to_owned()));
        }
        if !status.is_success() {
            return Err(fetch_err(format!("HTTP {status}")));
        }

        let bytes = response
            .bytes()
            .await
            .map_err(|e| fetch_err(e.to_string()))?;
        tracing::debug!(dataset_id, bytes = bytes.len(), "Fetched dataset items");

        frame_from_json(dataset_id, bytes.to_vec())
    }
}

/// Reads `<dir>/<id>.json`, `<dir>/<id>.csv` or `<dir>/<id>.parquet`.
pub struct DirectorySource {
    dir: PathBuf,
}

impl DirectorySource {
    const EXTENSIONS: [&'static str; 3] = ["json", "csv", "parquet"];

    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    fn locate(&self, dataset_id: &str) -> Option<PathBuf> {
        Self::EXTENSIONS
            .iter()
            .map(|ext| self.dir.join(format!("{dataset_id}.{ext}")))
            .find(|path| path.is_file())
    }
}

fn load_file(dataset_id: &str, path: &Path) -> Result<DataFrame, DatasetError> {
    let decode_err = |e: PolarsError| DatasetError::Decode {
        id: dataset_id.to_owned(),
        message: e.to_string(),
    };
    let open = || {
        std::fs::File::open(path).map_err(|e| DatasetError::Fetch {
            id: dataset_id.to_owned(),
            message: format!("{}: {e}", path.display()),
        })
    };

    let ext = path
        .extension()
        .and_then(|s| s.to_str())
        .unwrap_or("")
        .to_lowercase();

    match ext.as_str() {
        "csv" => LazyCsvReader::new(path)
            .with_infer_schema_length(Some(10_000))
            .with_has_header(true)
            .with_try_parse_dates(true)
            .finish()
            .and_then(LazyFrame::collect)
            .map_err(decode_err),
        "parquet" => ParquetReader::new(open()?).finish().map_err(decode_err),
        "json" => JsonReader::new(open()?).finish().map_err(decode_err),
        _ => Err(DatasetError::Decode {
            id: dataset_id.to_owned(),
            message: format!("unsupported file extension: {ext}"),
        }),
    }
}

#[async_trait]
impl DatasetSource for DirectorySource {
    async fn fetch(&self, dataset_id: &str) -> Result<DataFrame, DatasetError> {
        if dataset_id.contains(['/', '\\']) || dataset_id.starts_with('.') {
            return Err(DatasetError::NotFound(dataset_id.to_owned()));
        }
        let path = self
            .locate(dataset_id)
            .ok_or_else(|| DatasetError::NotFound(dataset_id.to_owned()))?;

        let id = dataset_id.to_owned();
        tokio::task::spawn_blocking(move || load_file(&id, &path))
            .await
            .map_err(|e| DatasetError::Fetch {
                id: dataset_id.to_owned(),
                message: e.to_string(),
            })?
    }
}

/// Pre-registered frames, served from memory.
#[derive(Default)]
pub struct MemorySource {
    frames: RwLock<HashMap<String, DataFrame>>,
    fetches: AtomicUsize,
}

impl MemorySource {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_frame(self, dataset_id: impl Into<String>, frame: DataFrame) -> Self {
        self.insert(dataset_id, frame);
        self
    }

    /// Add or replace a dataset. Already-loaded handles are unaffected until
    /// the registry refreshes them.
    pub fn insert(&self, dataset_id: impl Into<String>, frame: DataFrame) {
        self.frames
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(dataset_id.into(), frame);
    }

    /// Number of successful and failed `fetch` calls so far.
    pub fn fetch_count(&self) -> usize {
        self.fetches.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl DatasetSource for MemorySource {
    async fn fetch(&self, dataset_id: &str) -> Result<DataFrame, DatasetError> {
        self.fetches.fetch_add(1, Ordering::SeqCst);
        self.frames
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(dataset_id)
            .cloned()
            .ok_or_else(|| DatasetError::NotFound(dataset_id.to_owned()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_frame_from_json_array() {
        let json = br#"[{"title": "Gravesend Pizza", "reviewsCount": 80},
                        {"title": "Lucia Pizza of Avenue X", "reviewsCount": 200}]"#;
        let frame = frame_from_json("pizza", json.to_vec()).expect("valid json");
        assert_eq!(frame.height(), 2);
        assert_eq!(frame.width(), 2);
    }

    #[test]
    fn test_frame_from_invalid_json() {
        let err = frame_from_json("pizza", b"not json".to_vec()).expect_err("invalid");
        assert!(matches!(err, DatasetError::Decode { .. }));
    }

    #[test]
    fn test_apify_items_url() -> Result<(), DatasetError> {
        let source = ApifySource::new("https://api.apify.com/", None);
        assert_eq!(
            source.items_url("abc123")?.as_str(),
            "https://api.apify.com/v2/datasets/abc123/items?format=json&clean=true"
        );

        let prefixed = ApifySource::new("http://localhost:8080/proxy", None);
        assert_eq!(
            prefixed.items_url("abc123")?.as_str(),
            "http://localhost:8080/proxy/v2/datasets/abc123/items?format=json&clean=true"
        );
        Ok(())
    }

    #[test]
    fn test_apify_items_url_encodes_the_id() -> Result<(), DatasetError> {
        let source = ApifySource::new("https://api.apify.com", None);

        let url = source.items_url("x?token=leak#frag")?;
        assert_eq!(url.path(), "/v2/datasets/x%3Ftoken=leak%23frag/items");
        assert_eq!(url.query(), Some("format=json&clean=true"));
        assert_eq!(url.fragment(), None);

        let url = source.items_url("../../v1/users/me")?;
        assert_eq!(url.path(), "/v2/datasets/..%2F..%2Fv1%2Fusers%2Fme/items");

        for id in ["", ".", ".."] {
            assert!(matches!(source.items_url(id), Err(DatasetError::NotFound(_))), "{id:?}");
        }
        Ok(())
    }

    #[tokio::test]
    async fn test_directory_source_reads_csv() {
        let dir = tempfile::tempdir().expect("temp dir");
        std::fs::write(
            dir.path().join("shops.csv"),
            "title,totalScore\nSmith Street Pizza,4.8\nGravesend Pizza,4.6\n",
        )
        .expect("write csv");

        let source = DirectorySource::new(dir.path());
        let frame = source.fetch("shops").await.expect("csv loads");
        assert_eq!(frame.height(), 2);

        let missing = source.fetch("absent").await.expect_err("missing");
        assert!(matches!(missing, DatasetError::NotFound(_)));
    }

    #[tokio::test]
    async fn test_directory_source_rejects_path_traversal() {
        let dir = tempfile::tempdir().expect("temp dir");
        let source = DirectorySource::new(dir.path());
        let err = source.fetch("../etc/passwd").await.expect_err("rejected");
        assert!(matches!(err, DatasetError::NotFound(_)));
    }

    #[tokio::test]
    async fn test_memory_source_counts_fetches() {
        let source = MemorySource::new().with_frame("a", df!("x" => &[1i64]).expect("frame"));
        assert!(source.fetch("a").await.is_ok());
        assert!(source.fetch("b").await.is_err());
        assert_eq!(source.fetch_count(), 2);
    }
}
