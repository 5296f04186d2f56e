//! Remote weight fetching
//!
//! Downloads model weight files into an XDG-compliant cache so that
//! [`crate::models::WeightSource::RemoteObjectStore`] sources can resolve
//! synchronously at startup. Fetching is async and happens once; loading
//! never touches the network.

use crate::error::{AnalysisError, Result};
use reqwest::Client;
use sha2::{Digest, Sha256};
use std::fs;
use std::path::{Path, PathBuf};

/// Environment variable overriding the weight cache location
const CACHE_DIR_ENV: &str = "LESIONSCAN_CACHE_DIR";

/// Resolve the weight cache directory.
///
/// - Override: `LESIONSCAN_CACHE_DIR`
/// - Linux/macOS: `~/.cache/lesionscan/weights/`
/// - Windows: `%LOCALAPPDATA%/lesionscan/weights/`
///
/// # Errors
/// - No user cache directory can be determined and no override is set
pub fn default_cache_dir() -> Result<PathBuf> {
    if let Ok(cache_override) = std::env::var(CACHE_DIR_ENV) {
        return Ok(PathBuf::from(cache_override).join("weights"));
    }

    Ok(dirs::cache_dir()
        .ok_or_else(|| {
            AnalysisError::invalid_config(format!(
                "Failed to determine cache directory. Set {CACHE_DIR_ENV}."
            ))
        })?
        .join("lesionscan")
        .join("weights"))
}

/// Derive a cache-safe file name for a weight URL: the URL's final path
/// segment disambiguated by a digest prefix, so distinct URLs sharing a
/// file name never collide in the cache.
#[must_use]
pub fn weight_id_for_url(url: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(url.as_bytes());
    let digest = format!("{:x}", hasher.finalize());
    let prefix = digest.get(..12).unwrap_or(&digest);

    let file_name = url
        .rsplit('/')
        .next()
        .filter(|s| !s.is_empty())
        .unwrap_or("weights");
    let sanitized: String = file_name
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() || c == '.' || c == '-' || c == '_' {
            c
        } else {
            '-'
        })
        .collect();

    format!("{prefix}--{sanitized}")
}

/// Cache location a given weight URL resolves to
///
/// # Errors
/// - Cache directory cannot be determined
pub fn cached_weight_path(url: &str) -> Result<PathBuf> {
    Ok(default_cache_dir()?.join(weight_id_for_url(url)))
}

/// Async downloader populating the weight cache
#[derive(Debug)]
pub struct WeightDownloader {
    client: Client,
    cache_dir: PathBuf,
}

impl WeightDownloader {
    /// Create a downloader over the default cache directory
    ///
    /// # Errors
    /// - Failed to create the HTTP client or the cache directory
    pub fn new() -> Result<Self> {
        Self::with_cache_dir(default_cache_dir()?)
    }

    /// Create a downloader over a specific cache directory
    ///
    /// # Errors
    /// - Failed to create the HTTP client or the cache directory
    pub fn with_cache_dir<P: Into<PathBuf>>(cache_dir: P) -> Result<Self> {
        let cache_dir = cache_dir.into();
        if !cache_dir.exists() {
            fs::create_dir_all(&cache_dir).map_err(|e| {
                AnalysisError::file_io_error("create weight cache directory", &cache_dir, &e)
            })?;
        }

        let client = Client::builder()
            .timeout(std::time::Duration::from_secs(300))
            .build()
            .map_err(|e| AnalysisError::model(format!("Failed to create HTTP client: {e}")))?;

        Ok(Self { client, cache_dir })
    }

    /// The cache directory this downloader writes into
    #[must_use]
    pub fn cache_dir(&self) -> &Path {
        &self.cache_dir
    }

    /// Whether the weights for `url` are already cached
    #[must_use]
    pub fn is_cached(&self, url: &str) -> bool {
        self.cache_dir.join(weight_id_for_url(url)).is_file()
    }

    /// Fetch `url` into the cache, returning the cached file path. A cached
    /// copy is reused unless `overwrite` is set. The file lands atomically:
    /// it is written to a temporary sibling and renamed into place.
    ///
    /// # Errors
    /// - Network failures or non-success HTTP status
    /// - File system errors writing the cache entry
    pub async fn fetch(&self, url: &str, overwrite: bool) -> Result<PathBuf> {
        let target = self.cache_dir.join(weight_id_for_url(url));
        if target.is_file() && !overwrite {
            log::debug!("Weights for {url} already cached at {}", target.display());
            return Ok(target);
        }

        log::info!("Fetching weights from {url}");
        let response = self
            .client
            .get(url)
            .send()
            .await
            .map_err(|e| AnalysisError::model(format!("Failed to fetch '{url}': {e}")))?
            .error_for_status()
            .map_err(|e| AnalysisError::model(format!("Failed to fetch '{url}': {e}")))?;

        let bytes = response
            .bytes()
            .await
            .map_err(|e| AnalysisError::model(format!("Failed to read body of '{url}': {e}")))?;

        let mut hasher = Sha256::new();
        hasher.update(&bytes);
        log::info!(
            "Fetched {} bytes (sha256 {:x})",
            bytes.len(),
            hasher.finalize()
        );

        let staging = target.with_extension("part");
        tokio::fs::write(&staging, &bytes)
            .await
            .map_err(|e| AnalysisError::file_io_error("write weight cache entry", &staging, &e))?;
        tokio::fs::rename(&staging, &target)
            .await
            .map_err(|e| AnalysisError::file_io_error("finalize weight cache entry", &target, &e))?;

        Ok(target)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_weight_id_is_stable_and_sanitized() {
        let url = "https://models.example.org/weights/classifier v2.onnx";
        let id = weight_id_for_url(url);
        assert_eq!(id, weight_id_for_url(url));
        assert!(id.ends_with("classifier-v2.onnx"));
        assert!(!id.contains(' '));
    }

    #[test]
    fn test_distinct_urls_get_distinct_ids() {
        let a = weight_id_for_url("https://a.example.org/model.onnx");
        let b = weight_id_for_url("https://b.example.org/model.onnx");
        assert_ne!(a, b);
    }

    #[tokio::test]
    async fn test_with_cache_dir_creates_directory() {
        let dir = tempfile::tempdir().unwrap();
        let cache = dir.path().join("nested").join("weights");

        let downloader = WeightDownloader::with_cache_dir(&cache).unwrap();
        assert!(cache.is_dir());
        assert!(!downloader.is_cached("https://example.org/model.onnx"));
    }
}
