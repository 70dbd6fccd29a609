//! Object Stores
//!
//! Destinations the publisher uploads to. [`GcsStore`] talks to the Google
//! Cloud Storage JSON API with a bearer token picked up from the
//! environment or the instance metadata server, fetched once per store.
//! [`LocalDirStore`] copies
//! into a directory tree instead.

use std::fs::{self, File};
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use reqwest::header::CONTENT_TYPE;
use serde::Deserialize;
use tracing::{debug, info};

use crate::config::StoreConfig;
use crate::utils::error::{DiceError, Result};

const UPLOAD_ENDPOINT: &str = "https://storage.googleapis.com/upload/storage/v1/b";

const METADATA_TOKEN_URL: &str =
    "http://metadata.google.internal/computeMetadata/v1/instance/service-accounts/default/token";

/// Where an uploaded file ended up
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoredObject {
    pub key: String,
    pub uri: String,
    pub bytes: u64,
}

/// A flat key/value blob store
pub trait ObjectStore {
    /// Upload the file at `source` under `key`
    fn put(&self, key: &str, source: &Path) -> Result<StoredObject>;

    /// Human-readable destination, for logs
    fn describe(&self) -> String;
}

/// Build the store named by the configuration
pub fn store_from_config(config: &StoreConfig, bucket: &str) -> Result<Box<dyn ObjectStore>> {
    match config {
        StoreConfig::Gcs { token_env } => Ok(Box::new(GcsStore::new(bucket, token_env)?)),
        StoreConfig::Local { root } => Ok(Box::new(LocalDirStore::new(root.join(bucket)))),
    }
}

#[derive(Debug, Deserialize)]
struct TokenResponse {
    access_token: String,
    #[serde(default)]
    expires_in: u64,
    #[serde(default)]
    token_type: String,
}

/// Google Cloud Storage bucket
pub struct GcsStore {
    bucket: String,
    token_env: String,
    client: reqwest::blocking::Client,
    token: Mutex<Option<String>>,
}

impl GcsStore {
    pub fn new(bucket: impl Into<String>, token_env: impl Into<String>) -> Result<Self> {
        let client = reqwest::blocking::Client::builder()
            .user_agent(concat!("dice-trainer/", env!("CARGO_PKG_VERSION")))
            .timeout(None)
            .build()
            .map_err(|e| DiceError::Credentials(format!("cannot build HTTP client: {}", e)))?;

        Ok(Self {
            bucket: bucket.into(),
            token_env: token_env.into(),
            client,
            token: Mutex::new(None),
        })
    }

    /// Token shared by every upload made through this store
    fn bearer_token(&self) -> Result<String> {
        let mut cached = self
            .token
            .lock()
            .map_err(|_| DiceError::Credentials("token cache lock poisoned".into()))?;
        if let Some(token) = cached.as_ref() {
            return Ok(token.clone());
        }

        let token = self.access_token()?;
        *cached = Some(token.clone());
        Ok(token)
    }

    /// Bearer token from the environment, else from the metadata server
    fn access_token(&self) -> Result<String> {
        if let Ok(token) = std::env::var(&self.token_env) {
            if !token.trim().is_empty() {
                debug!("Using access token from ${}", self.token_env);
                return Ok(token.trim().to_string());
            }
        }

        debug!("Requesting access token from the metadata server");
        let response: TokenResponse = self
            .client
            .get(METADATA_TOKEN_URL)
            .header("Metadata-Flavor", "Google")
            .send()
            .and_then(|r| r.error_for_status())
            .and_then(|r| r.json())
            .map_err(|e| {
                DiceError::Credentials(format!(
                    "no ${} set and the metadata server is unavailable: {}",
                    self.token_env, e
                ))
            })?;

        debug!(
            "Got {} token valid for {}s",
            response.token_type, response.expires_in
        );
        Ok(response.access_token)
    }
}

impl ObjectStore for GcsStore {
    fn put(&self, key: &str, source: &Path) -> Result<StoredObject> {
        let token = self.bearer_token()?;
        let bytes = fs::metadata(source)?.len();
        let file = File::open(source)?;

        self.client
            .post(format!("{}/{}/o", UPLOAD_ENDPOINT, self.bucket))
            .query(&[("uploadType", "media"), ("name", key)])
            .bearer_auth(token)
            .header(CONTENT_TYPE, "application/octet-stream")
            .body(file)
            .send()
            .and_then(|r| r.error_for_status())
            .map_err(|e| DiceError::upload(key, e))?;

        let uri = format!("gs://{}/{}", self.bucket, key);
        info!("Uploaded {:?} to {}", source, uri);
        Ok(StoredObject {
            key: key.to_string(),
            uri,
            bytes,
        })
    }

    fn describe(&self) -> String {
        format!("gs://{}", self.bucket)
    }
}

/// A directory standing in for a bucket; keys become relative paths
#[derive(Debug, Clone)]
pub struct LocalDirStore {
    root: PathBuf,
}

impl LocalDirStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn path_for(&self, key: &str) -> PathBuf {
        key.split('/')
            .filter(|part| !part.is_empty())
            .fold(self.root.clone(), |path, part| path.join(part))
    }
}

impl ObjectStore for LocalDirStore {
    fn put(&self, key: &str, source: &Path) -> Result<StoredObject> {
        if key.split('/').any(|part| part == "..") {
            return Err(DiceError::upload(key, "key must not contain '..'"));
        }

        let dest = self.path_for(key);
        if let Some(parent) = dest.parent() {
            fs::create_dir_all(parent)?;
        }
        let bytes = fs::copy(source, &dest).map_err(|e| DiceError::upload(key, e))?;

        info!("Copied {:?} to {:?}", source, dest);
        Ok(StoredObject {
            key: key.to_string(),
            uri: dest.to_string_lossy().to_string(),
            bytes,
        })
    }

    fn describe(&self) -> String {
        self.root.display().to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_local_store_copies_under_key() {
        let src_dir = TempDir::new().unwrap();
        let source = src_dir.path().join("weights.mpk");
        fs::write(&source, b"12345").unwrap();

        let bucket = TempDir::new().unwrap();
        let store = LocalDirStore::new(bucket.path());
        let stored = store.put("dice/models/weights_0.1.0_ts", &source).unwrap();

        assert_eq!(stored.bytes, 5);
        let copied = bucket.path().join("dice").join("models").join("weights_0.1.0_ts");
        assert_eq!(fs::read(copied).unwrap(), b"12345");
    }

    #[test]
    fn test_local_store_rejects_parent_segments() {
        let bucket = TempDir::new().unwrap();
        let store = LocalDirStore::new(bucket.path());

        let err = store.put("../escape", Path::new("/dev/null")).unwrap_err();
        assert!(matches!(err, DiceError::Upload { .. }));
    }

    #[test]
    fn test_local_store_missing_source_is_upload_error() {
        let bucket = TempDir::new().unwrap();
        let store = LocalDirStore::new(bucket.path());

        let err = store
            .put("dice/models/x", &bucket.path().join("missing"))
            .unwrap_err();
        assert!(matches!(err, DiceError::Upload { .. }));
    }

    #[test]
    fn test_store_from_config_local_nests_bucket() {
        let root = TempDir::new().unwrap();
        let store = store_from_config(
            &StoreConfig::Local {
                root: root.path().to_path_buf(),
            },
            "raspberry-pi-vision",
        )
        .unwrap();

        assert!(store.describe().ends_with("raspberry-pi-vision"));
    }

    #[test]
    fn test_gcs_describe() {
        let store = GcsStore::new("raspberry-pi-vision", "UNUSED_TOKEN_VAR").unwrap();
        assert_eq!(store.describe(), "gs://raspberry-pi-vision");
    }

    #[test]
    fn test_gcs_token_is_fetched_once() {
        let var = "DICE_TRAINER_TEST_TOKEN_ONCE";
        std::env::set_var(var, " first-token \n");
        let store = GcsStore::new("bucket", var).unwrap();

        assert_eq!(store.bearer_token().unwrap(), "first-token");

        std::env::set_var(var, "second-token");
        assert_eq!(store.bearer_token().unwrap(), "first-token");

        std::env::remove_var(var);
        assert_eq!(store.bearer_token().unwrap(), "first-token");
    }
}
