//! Artifact publishing: uploads the saved weights and model bundle under
//! keys qualified by version and one shared UTC timestamp.

use chrono::{DateTime, Utc};
use tracing::info;

use super::bundle::SavedArtifacts;
use super::store::{ObjectStore, StoredObject};
use crate::utils::error::Result;

/// `YYYY-MM-DD HH:MM:SS.ffffff`
pub const TIMESTAMP_FORMAT: &str = "%Y-%m-%d %H:%M:%S%.6f";

/// Keys of one publication
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PublishedArtifacts {
    pub timestamp: String,
    pub weights: StoredObject,
    pub model: StoredObject,
}

pub fn upload_timestamp(now: DateTime<Utc>) -> String {
    now.format(TIMESTAMP_FORMAT).to_string()
}

/// `<prefix>/<kind>_<version>_<timestamp>`
pub fn object_key(prefix: &str, kind: &str, version: &str, timestamp: &str) -> String {
    let prefix = prefix.trim_end_matches('/');
    if prefix.is_empty() {
        format!("{}_{}_{}", kind, version, timestamp)
    } else {
        format!("{}/{}_{}_{}", prefix, kind, version, timestamp)
    }
}

pub struct ArtifactPublisher<'a> {
    store: &'a dyn ObjectStore,
    key_prefix: String,
}

impl<'a> ArtifactPublisher<'a> {
    pub fn new(store: &'a dyn ObjectStore, key_prefix: impl Into<String>) -> Self {
        Self {
            store,
            key_prefix: key_prefix.into(),
        }
    }

    /// Upload both artifacts stamped with the current UTC time
    pub fn publish(&self, saved: &SavedArtifacts) -> Result<PublishedArtifacts> {
        self.publish_at(saved, Utc::now())
    }

    /// Upload both artifacts stamped with `now`. Stops at the first failure.
    pub fn publish_at(&self, saved: &SavedArtifacts, now: DateTime<Utc>) -> Result<PublishedArtifacts> {
        let timestamp = upload_timestamp(now);
        info!(
            "Publishing version {} to {} at {}",
            saved.version,
            self.store.describe(),
            timestamp
        );

        let weights_key = object_key(&self.key_prefix, "weights", &saved.version, &timestamp);
        let weights = self.store.put(&weights_key, &saved.weights_path)?;

        let model_key = object_key(&self.key_prefix, "model", &saved.version, &timestamp);
        let model = self.store.put(&model_key, &saved.model_path)?;

        Ok(PublishedArtifacts {
            timestamp,
            weights,
            model,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::utils::error::DiceError;
    use chrono::TimeZone;
    use std::cell::RefCell;
    use std::path::{Path, PathBuf};

    /// Records keys, optionally failing on a given key prefix
    #[derive(Default)]
    struct RecordingStore {
        keys: RefCell<Vec<String>>,
        fail_on: Option<&'static str>,
    }

    impl ObjectStore for RecordingStore {
        fn put(&self, key: &str, _source: &Path) -> Result<StoredObject> {
            if let Some(fail) = self.fail_on {
                if key.contains(fail) {
                    return Err(DiceError::upload(key, "503 Service Unavailable"));
                }
            }
            self.keys.borrow_mut().push(key.to_string());
            Ok(StoredObject {
                key: key.to_string(),
                uri: format!("mem://{}", key),
                bytes: 0,
            })
        }

        fn describe(&self) -> String {
            "memory".to_string()
        }
    }

    fn saved() -> SavedArtifacts {
        SavedArtifacts {
            version: "0.1.0".to_string(),
            weights_path: PathBuf::from("data/weights_0.1.0.mpk"),
            model_path: PathBuf::from("data/model_0.1.0.tar"),
        }
    }

    #[test]
    fn test_timestamp_format() {
        let now = Utc.with_ymd_and_hms(2019, 3, 7, 14, 5, 9).unwrap();
        assert_eq!(upload_timestamp(now), "2019-03-07 14:05:09.000000");
    }

    #[test]
    fn test_object_key() {
        assert_eq!(
            object_key("dice/models/", "weights", "0.1.0", "ts"),
            "dice/models/weights_0.1.0_ts"
        );
        assert_eq!(object_key("", "model", "1", "ts"), "model_1_ts");
    }

    #[test]
    fn test_both_keys_share_one_timestamp() {
        let store = RecordingStore::default();
        let publisher = ArtifactPublisher::new(&store, "dice/models");
        let now = Utc.with_ymd_and_hms(2020, 1, 2, 3, 4, 5).unwrap();

        let published = publisher.publish_at(&saved(), now).unwrap();

        assert_eq!(
            *store.keys.borrow(),
            vec![
                "dice/models/weights_0.1.0_2020-01-02 03:04:05.000000".to_string(),
                "dice/models/model_0.1.0_2020-01-02 03:04:05.000000".to_string(),
            ]
        );
        assert_eq!(published.timestamp, "2020-01-02 03:04:05.000000");
    }

    #[test]
    fn test_upload_failure_propagates() {
        let store = RecordingStore {
            fail_on: Some("model_"),
            ..Default::default()
        };
        let publisher = ArtifactPublisher::new(&store, "dice/models");

        let err = publisher.publish(&saved()).unwrap_err();

        assert!(matches!(err, DiceError::Upload { .. }));
        assert_eq!(store.keys.borrow().len(), 1);
    }
}
