//! Dataset Provisioning
//!
//! Makes sure the labeled image directory exists before anything reads it.
//! An existing data directory is used as-is. Otherwise the archive is
//! extracted, downloading it first if it is not on disk yet. There is no
//! checksum and no retry; the archive is kept after extraction.

use std::fs::{self, File};
use std::io::{BufWriter, Write};
use std::path::Path;

use flate2::read::GzDecoder;
use tracing::{debug, info};

use crate::config::DatasetConfig;
use crate::utils::error::{DiceError, Result};
use crate::utils::format_bytes;

/// What [`provision`] had to do
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProvisionOutcome {
    /// The data directory was already there
    AlreadyPresent,
    /// The archive was on disk and got extracted
    ExtractedExisting,
    /// The archive was downloaded, then extracted
    Downloaded,
}

/// Source of the dataset archive
pub trait ArchiveFetcher {
    /// Write the resource at `url` to `dest`, returning the byte count
    fn fetch(&self, url: &str, dest: &Path) -> Result<u64>;
}

/// Blocking HTTP(S) GET
pub struct HttpFetcher {
    client: reqwest::blocking::Client,
}

impl HttpFetcher {
    pub fn new() -> Result<Self> {
        let client = reqwest::blocking::Client::builder()
            .user_agent(concat!("dice-trainer/", env!("CARGO_PKG_VERSION")))
            .timeout(None)
            .build()
            .map_err(|e| DiceError::download("<client>", e))?;
        Ok(Self { client })
    }
}

impl ArchiveFetcher for HttpFetcher {
    fn fetch(&self, url: &str, dest: &Path) -> Result<u64> {
        let mut response = self
            .client
            .get(url)
            .send()
            .and_then(|r| r.error_for_status())
            .map_err(|e| DiceError::download(url, e))?;

        let mut writer = BufWriter::new(File::create(dest)?);
        let written = response
            .copy_to(&mut writer)
            .map_err(|e| DiceError::download(url, e))?;
        writer.flush()?;

        Ok(written)
    }
}

/// Ensure the data directory exists, fetching and extracting as needed
pub fn provision(config: &DatasetConfig, fetcher: &dyn ArchiveFetcher) -> Result<ProvisionOutcome> {
    let data_dir = config.data_dir();
    if data_dir.is_dir() {
        info!("Dataset found at {:?}", data_dir);
        return Ok(ProvisionOutcome::AlreadyPresent);
    }

    fs::create_dir_all(&config.workspace_dir)?;
    let archive = config.archive_path();

    let outcome = if archive.exists() {
        info!("Archive {:?} already downloaded, extracting", archive);
        ProvisionOutcome::ExtractedExisting
    } else {
        info!("Downloading dataset from {}", config.archive_url);
        let bytes = fetcher.fetch(&config.archive_url, &archive)?;
        info!("Downloaded {} to {:?}", format_bytes(bytes), archive);
        ProvisionOutcome::Downloaded
    };

    extract_tar_gz(&archive, &config.workspace_dir)?;

    if !data_dir.is_dir() {
        return Err(DiceError::Dataset(format!(
            "archive {} did not contain a '{}' directory",
            archive.display(),
            config.data_dir_name
        )));
    }

    info!("Dataset ready at {:?}", data_dir);
    Ok(outcome)
}

/// Unpack a gzip-compressed tarball into `output_dir`
pub fn extract_tar_gz(archive_path: &Path, output_dir: &Path) -> Result<()> {
    debug!("Extracting {:?} into {:?}", archive_path, output_dir);
    let file = File::open(archive_path)?;
    let mut archive = tar::Archive::new(GzDecoder::new(file));

    archive
        .unpack(output_dir)
        .map_err(|e| DiceError::Archive(archive_path.to_path_buf(), e.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use flate2::write::GzEncoder;
    use flate2::Compression;
    use std::cell::Cell;
    use std::path::PathBuf;
    use tempfile::TempDir;

    /// Counts calls and serves a prepared archive from disk
    struct CountingFetcher {
        source: Option<PathBuf>,
        calls: Cell<usize>,
    }

    impl CountingFetcher {
        fn new(source: Option<PathBuf>) -> Self {
            Self {
                source,
                calls: Cell::new(0),
            }
        }
    }

    impl ArchiveFetcher for CountingFetcher {
        fn fetch(&self, url: &str, dest: &Path) -> Result<u64> {
            self.calls.set(self.calls.get() + 1);
            match &self.source {
                Some(src) => Ok(fs::copy(src, dest)?),
                None => Err(DiceError::download(url, "offline")),
            }
        }
    }

    /// Build `data/train/a/x.txt` and `data/valid/b/y.txt` as a tar.gz
    fn build_archive(path: &Path) {
        let file = File::create(path).unwrap();
        let mut builder = tar::Builder::new(GzEncoder::new(file, Compression::default()));
        for (name, body) in [("data/train/a/x.txt", "x"), ("data/valid/b/y.txt", "yy")] {
            let mut header = tar::Header::new_gnu();
            header.set_size(body.len() as u64);
            header.set_mode(0o644);
            header.set_cksum();
            builder.append_data(&mut header, name, body.as_bytes()).unwrap();
        }
        builder.into_inner().unwrap().finish().unwrap();
    }

    fn config_in(dir: &Path) -> DatasetConfig {
        DatasetConfig {
            workspace_dir: dir.to_path_buf(),
            archive_url: "https://example.invalid/data.tar.gz".to_string(),
            ..DatasetConfig::default()
        }
    }

    #[test]
    fn test_present_directory_skips_network() {
        let dir = TempDir::new().unwrap();
        fs::create_dir(dir.path().join("data")).unwrap();
        let fetcher = CountingFetcher::new(None);

        let outcome = provision(&config_in(dir.path()), &fetcher).unwrap();

        assert_eq!(outcome, ProvisionOutcome::AlreadyPresent);
        assert_eq!(fetcher.calls.get(), 0);
    }

    #[test]
    fn test_stray_file_named_data_is_not_a_dataset() {
        let dir = TempDir::new().unwrap();
        fs::write(dir.path().join("data"), b"leftover").unwrap();
        let fetcher = CountingFetcher::new(None);

        let err = provision(&config_in(dir.path()), &fetcher).unwrap_err();

        assert!(matches!(err, DiceError::Download { .. }));
        assert_eq!(fetcher.calls.get(), 1);
    }

    #[test]
    fn test_existing_archive_is_extracted_without_fetch() {
        let dir = TempDir::new().unwrap();
        build_archive(&dir.path().join("data.tar.gz"));
        let fetcher = CountingFetcher::new(None);

        let outcome = provision(&config_in(dir.path()), &fetcher).unwrap();

        assert_eq!(outcome, ProvisionOutcome::ExtractedExisting);
        assert_eq!(fetcher.calls.get(), 0);
        assert!(dir.path().join("data/train/a/x.txt").is_file());
        assert!(dir.path().join("data.tar.gz").exists());
    }

    #[test]
    fn test_missing_archive_is_downloaded_once() {
        let source_dir = TempDir::new().unwrap();
        let source = source_dir.path().join("remote.tar.gz");
        build_archive(&source);

        let dir = TempDir::new().unwrap();
        let fetcher = CountingFetcher::new(Some(source));

        let outcome = provision(&config_in(dir.path()), &fetcher).unwrap();

        assert_eq!(outcome, ProvisionOutcome::Downloaded);
        assert_eq!(fetcher.calls.get(), 1);
        assert_eq!(
            fs::read_to_string(dir.path().join("data/valid/b/y.txt")).unwrap(),
            "yy"
        );
    }

    #[test]
    fn test_fetch_failure_propagates() {
        let dir = TempDir::new().unwrap();
        let fetcher = CountingFetcher::new(None);

        let err = provision(&config_in(dir.path()), &fetcher).unwrap_err();
        assert!(matches!(err, DiceError::Download { .. }));
    }

    #[test]
    fn test_corrupt_archive_is_archive_error() {
        let dir = TempDir::new().unwrap();
        fs::write(dir.path().join("data.tar.gz"), b"\x1f\x8bgarbage").unwrap();

        let err = provision(&config_in(dir.path()), &CountingFetcher::new(None)).unwrap_err();
        assert!(matches!(err, DiceError::Archive(_, _)));
    }

    #[test]
    fn test_archive_without_data_dir_is_rejected() {
        let dir = TempDir::new().unwrap();
        let config = DatasetConfig {
            data_dir_name: "images".to_string(),
            ..config_in(dir.path())
        };
        build_archive(&dir.path().join("data.tar.gz"));

        let err = provision(&config, &CountingFetcher::new(None)).unwrap_err();
        assert!(matches!(err, DiceError::Dataset(_)));
    }
}
