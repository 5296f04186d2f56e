//! On-disk archive of per-analysis artifacts
//!
//! One directory per analysis, named `analysis_<14-digit-timestamp>`,
//! holding `original.<ext>` and, for positive analyses, `mask.png` and
//! `overlay.png`. The directory layout is a compatibility surface: the
//! listing logic and external viewers both rely on it.

use crate::error::{AnalysisError, Result};
use chrono::NaiveDateTime;
use image::{GrayImage, RgbImage};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

/// Directory name prefix for analysis folders
const DIR_PREFIX: &str = "analysis_";

/// Timestamp layout of analysis ids: second resolution, lexicographically
/// sortable.
const ID_FORMAT: &str = "%Y%m%d%H%M%S";

/// Display layout of the timestamp parsed back out of an id
const DATE_FORMAT: &str = "%d/%m/%Y %H:%M:%S";

/// Handle to one analysis directory, returned by [`AnalysisArchive::create`]
#[derive(Debug, Clone)]
pub struct AnalysisFolder {
    id: String,
    path: PathBuf,
}

impl AnalysisFolder {
    /// The bare 14-digit analysis id
    #[must_use]
    pub fn id(&self) -> &str {
        &self.id
    }

    /// Absolute path of the analysis directory
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Path of `file_name` relative to the archive root, the form used in
    /// response descriptors and listings
    #[must_use]
    pub fn relative(&self, file_name: &str) -> String {
        format!("{DIR_PREFIX}{}/{file_name}", self.id)
    }
}

/// One listed analysis
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AnalysisRecord {
    /// Bare 14-digit analysis id
    pub id: String,
    /// Path of the archived upload relative to the archive root
    pub original: String,
    /// Human-formatted timestamp parsed back out of the id
    pub date: String,
}

/// Archive of analysis directories under one root
#[derive(Debug)]
pub struct AnalysisArchive {
    root: PathBuf,
}

impl AnalysisArchive {
    /// Open an archive rooted at `root`, creating the directory if needed.
    ///
    /// # Errors
    /// - Failed to create the root directory
    pub fn new<P: Into<PathBuf>>(root: P) -> Result<Self> {
        let root = root.into();
        if !root.exists() {
            fs::create_dir_all(&root)
                .map_err(|e| AnalysisError::file_io_error("create archive root", &root, &e))?;
        }
        Ok(Self { root })
    }

    /// The archive root directory
    #[must_use]
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Mint a new analysis id from the current wall clock and create its
    /// directory before anything is written into it, so a concurrent
    /// lister sees either nothing or a fully-identified record.
    ///
    /// Ids have second resolution: two creations within the same second
    /// share one id and directory. A known limitation, kept because
    /// strengthening the id would change observable identifiers.
    ///
    /// # Errors
    /// - Failed to create the analysis directory
    pub fn create(&self) -> Result<AnalysisFolder> {
        let id = chrono::Local::now().format(ID_FORMAT).to_string();
        let path = self.root.join(format!("{DIR_PREFIX}{id}"));

        fs::create_dir_all(&path)
            .map_err(|e| AnalysisError::file_io_error("create analysis directory", &path, &e))?;

        log::debug!("Created analysis folder {}", path.display());
        Ok(AnalysisFolder { id, path })
    }

    /// Persist the uploaded bytes as `original.<ext>`, sniffing the
    /// extension from the data. Returns the path relative to the root.
    ///
    /// # Errors
    /// - Failed to write the file
    pub fn save_original(&self, folder: &AnalysisFolder, bytes: &[u8]) -> Result<String> {
        let extension = image::guess_format(bytes)
            .ok()
            .and_then(|format| format.extensions_str().first().copied())
            .unwrap_or("bin");

        let file_name = format!("original.{extension}");
        let path = folder.path.join(&file_name);
        fs::write(&path, bytes)
            .map_err(|e| AnalysisError::file_io_error("write original upload", &path, &e))?;

        Ok(folder.relative(&file_name))
    }

    /// Persist the cleaned binary mask as `mask.png`. Returns the path
    /// relative to the root.
    ///
    /// # Errors
    /// - PNG encoding or file write failures
    pub fn save_mask(&self, folder: &AnalysisFolder, mask: &GrayImage) -> Result<String> {
        let path = folder.path.join("mask.png");
        mask.save_with_format(&path, image::ImageFormat::Png)?;
        Ok(folder.relative("mask.png"))
    }

    /// Persist the overlay visualization as `overlay.png`. Returns the
    /// path relative to the root.
    ///
    /// # Errors
    /// - PNG encoding or file write failures
    pub fn save_overlay(&self, folder: &AnalysisFolder, overlay: &RgbImage) -> Result<String> {
        let path = folder.path.join("overlay.png");
        overlay.save_with_format(&path, image::ImageFormat::Png)?;
        Ok(folder.relative("overlay.png"))
    }

    /// List up to `limit` analyses, most recently modified first.
    ///
    /// Directories whose id does not parse as a timestamp are skipped and
    /// logged; they never abort the listing.
    ///
    /// # Errors
    /// - Failed to read the archive root
    pub fn list(&self, limit: usize) -> Result<Vec<AnalysisRecord>> {
        if !self.root.exists() {
            return Ok(Vec::new());
        }

        let entries = fs::read_dir(&self.root)
            .map_err(|e| AnalysisError::file_io_error("read archive root", &self.root, &e))?;

        let mut folders: Vec<(std::time::SystemTime, String, PathBuf)> = Vec::new();
        for entry in entries {
            let entry = entry
                .map_err(|e| AnalysisError::file_io_error("read archive entry", &self.root, &e))?;
            let path = entry.path();
            let Some(name) = path.file_name().and_then(|n| n.to_str()) else {
                continue;
            };
            if !path.is_dir() || !name.starts_with(DIR_PREFIX) {
                continue;
            }

            let modified = entry
                .metadata()
                .and_then(|m| m.modified())
                .unwrap_or(std::time::SystemTime::UNIX_EPOCH);
            folders.push((modified, name.to_string(), path));
        }

        folders.sort_by(|a, b| b.0.cmp(&a.0));

        let mut records = Vec::new();
        for (_, name, path) in folders.into_iter().take(limit) {
            let id = name.trim_start_matches(DIR_PREFIX);
            match Self::parse_id_timestamp(id) {
                Ok(timestamp) => {
                    let original = Self::find_original(&path)
                        .map_or_else(|| format!("{name}/original.jpg"), |f| format!("{name}/{f}"));
                    records.push(AnalysisRecord {
                        id: id.to_string(),
                        original,
                        date: timestamp.format(DATE_FORMAT).to_string(),
                    });
                },
                Err(e) => {
                    log::debug!("Skipping archive entry '{name}': {e}");
                },
            }
        }

        Ok(records)
    }

    /// Delete the whole directory tree for `id`. Accepts the bare id or
    /// the `analysis_`-prefixed directory name.
    ///
    /// # Errors
    /// - `NotFound` when no directory exists for the id — including when a
    ///   concurrent delete got there first
    /// - File I/O errors removing the tree
    pub fn delete(&self, id: &str) -> Result<()> {
        let bare = id.strip_prefix(DIR_PREFIX).unwrap_or(id);
        if bare.is_empty() || !bare.chars().all(|c| c.is_ascii_digit()) {
            return Err(AnalysisError::not_found(format!("No analysis '{id}'")));
        }

        let path = self.root.join(format!("{DIR_PREFIX}{bare}"));
        match fs::remove_dir_all(&path) {
            Ok(()) => {
                log::info!("Deleted analysis {bare}");
                Ok(())
            },
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                Err(AnalysisError::not_found(format!("No analysis '{bare}'")))
            },
            Err(e) => Err(AnalysisError::file_io_error(
                "delete analysis directory",
                &path,
                &e,
            )),
        }
    }

    /// Parse an analysis id back into its timestamp
    fn parse_id_timestamp(id: &str) -> Result<NaiveDateTime> {
        NaiveDateTime::parse_from_str(id, ID_FORMAT)
            .map_err(|e| AnalysisError::corrupt_record(format!("id '{id}': {e}")))
    }

    /// Locate the archived upload inside an analysis directory, whatever
    /// extension it was stored with
    fn find_original(dir: &Path) -> Option<String> {
        let entries = fs::read_dir(dir).ok()?;
        for entry in entries.flatten() {
            let name = entry.file_name();
            let name = name.to_str()?;
            if Path::new(name)
                .file_stem()
                .is_some_and(|stem| stem == "original")
            {
                return Some(name.to_string());
            }
        }
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::Luma;

    fn png_bytes() -> Vec<u8> {
        let img = image::DynamicImage::ImageRgb8(image::ImageBuffer::from_pixel(
            8,
            8,
            image::Rgb([1, 2, 3]),
        ));
        let mut bytes = Vec::new();
        img.write_to(
            &mut std::io::Cursor::new(&mut bytes),
            image::ImageFormat::Png,
        )
        .unwrap();
        bytes
    }

    #[test]
    fn test_create_mints_timestamp_id() {
        let dir = tempfile::tempdir().unwrap();
        let archive = AnalysisArchive::new(dir.path()).unwrap();

        let folder = archive.create().unwrap();
        assert_eq!(folder.id().len(), 14);
        assert!(folder.id().chars().all(|c| c.is_ascii_digit()));
        assert!(folder.path().is_dir());
        assert_eq!(fs::read_dir(folder.path()).unwrap().count(), 0);
    }

    #[test]
    fn test_save_original_sniffs_extension() {
        let dir = tempfile::tempdir().unwrap();
        let archive = AnalysisArchive::new(dir.path()).unwrap();
        let folder = archive.create().unwrap();

        let rel = archive.save_original(&folder, &png_bytes()).unwrap();
        assert_eq!(rel, format!("analysis_{}/original.png", folder.id()));
        assert!(dir.path().join(&rel).exists());
    }

    #[test]
    fn test_artifact_round_trip_and_listing() {
        let dir = tempfile::tempdir().unwrap();
        let archive = AnalysisArchive::new(dir.path()).unwrap();
        let folder = archive.create().unwrap();

        archive.save_original(&folder, &png_bytes()).unwrap();
        let mask = GrayImage::from_pixel(8, 8, Luma([255]));
        let mask_rel = archive.save_mask(&folder, &mask).unwrap();
        let overlay = RgbImage::from_pixel(8, 8, image::Rgb([255, 0, 0]));
        let overlay_rel = archive.save_overlay(&folder, &overlay).unwrap();

        assert!(dir.path().join(mask_rel).exists());
        assert!(dir.path().join(overlay_rel).exists());

        let records = archive.list(10).unwrap();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].id, folder.id());
        assert!(records[0].original.ends_with("original.png"));
    }

    #[test]
    fn test_list_orders_most_recent_first() {
        let dir = tempfile::tempdir().unwrap();
        let archive = AnalysisArchive::new(dir.path()).unwrap();

        for id in ["20240101000000", "20240103000000", "20240102000000"] {
            fs::create_dir(dir.path().join(format!("analysis_{id}"))).unwrap();
            std::thread::sleep(std::time::Duration::from_millis(30));
        }

        let records = archive.list(10).unwrap();
        let ids: Vec<_> = records.iter().map(|r| r.id.as_str()).collect();
        // Modification-time order, not id order
        assert_eq!(ids, ["20240102000000", "20240103000000", "20240101000000"]);
    }

    #[test]
    fn test_list_respects_limit() {
        let dir = tempfile::tempdir().unwrap();
        let archive = AnalysisArchive::new(dir.path()).unwrap();

        for day in 1..=5 {
            fs::create_dir(dir.path().join(format!("analysis_2024010{day}000000"))).unwrap();
        }

        assert_eq!(archive.list(3).unwrap().len(), 3);
    }

    #[test]
    fn test_list_skips_corrupt_records() {
        let dir = tempfile::tempdir().unwrap();
        let archive = AnalysisArchive::new(dir.path()).unwrap();

        fs::create_dir(dir.path().join("analysis_20240101000000")).unwrap();
        fs::create_dir(dir.path().join("analysis_not-a-timestamp")).unwrap();
        fs::create_dir(dir.path().join("unrelated")).unwrap();

        let records = archive.list(10).unwrap();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].id, "20240101000000");
        assert_eq!(records[0].date, "01/01/2024 00:00:00");
    }

    #[test]
    fn test_delete_then_not_found() {
        let dir = tempfile::tempdir().unwrap();
        let archive = AnalysisArchive::new(dir.path()).unwrap();
        let folder = archive.create().unwrap();
        archive.save_original(&folder, &png_bytes()).unwrap();

        archive.delete(folder.id()).unwrap();
        assert!(archive.list(10).unwrap().is_empty());

        let err = archive.delete(folder.id()).unwrap_err();
        assert!(matches!(err, AnalysisError::NotFound(_)));
    }

    #[test]
    fn test_delete_accepts_prefixed_id() {
        let dir = tempfile::tempdir().unwrap();
        let archive = AnalysisArchive::new(dir.path()).unwrap();
        let folder = archive.create().unwrap();

        archive
            .delete(&format!("analysis_{}", folder.id()))
            .unwrap();
        assert!(!folder.path().exists());
    }

    #[test]
    fn test_delete_rejects_traversal_shaped_ids() {
        let dir = tempfile::tempdir().unwrap();
        let archive = AnalysisArchive::new(dir.path()).unwrap();

        let err = archive.delete("../outside").unwrap_err();
        assert!(matches!(err, AnalysisError::NotFound(_)));
    }
}
