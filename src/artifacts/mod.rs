//! Artifacts module
//!
//! - `bundle`: save the weights file and the full model bundle, load them back
//! - `store`: object stores (Google Cloud Storage, local directory)
//! - `publisher`: upload both artifacts under timestamped keys

pub mod bundle;
pub mod publisher;
pub mod store;

pub use bundle::{
    load_model_bundle, load_weights, read_manifest, save_artifacts, ModelManifest, SavedArtifacts,
};
pub use publisher::{ArtifactPublisher, PublishedArtifacts};
pub use store::{store_from_config, GcsStore, LocalDirStore, ObjectStore, StoredObject};
