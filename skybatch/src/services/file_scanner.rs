//! Work discovery
//!
//! Recursive image discovery with idempotent skip-detection. Results folders
//! are pruned outright, result files are never candidates, and inputs whose
//! output already exists are reported as already processed instead of
//! pending.
//!
//! Discovery is best-effort: a missing or unreadable root degrades to an
//! empty result, and unreadable entries are logged and skipped.

use crate::services::result_path::file_stem;
use chrono::Utc;
use skybatch_common::events::{BatchEvent, EventBus};
use skybatch_common::ResultNaming;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use thiserror::Error;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;
use walkdir::{DirEntry, WalkDir};

/// Input extensions accepted for transformation
const IMAGE_EXTENSIONS: &[&str] = &["jpg", "jpeg", "png", "bmp", "tiff", "tif", "webp"];

/// Extensions probed when looking for an earlier output
const OUTPUT_EXTENSIONS: &[&str] = &["jpg", "jpeg", "png", "webp"];

/// Discovery errors (never surfaced past the scanner)
#[derive(Debug, Error)]
pub enum ScanError {
    /// Specified path does not exist
    #[error("Path not found: {0}")]
    PathNotFound(PathBuf),

    /// Path exists but is not a directory
    #[error("Not a directory: {0}")]
    NotADirectory(PathBuf),
}

/// Discovery output, handed off once to the orchestrator
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ScanResult {
    /// Inputs needing work, lexicographically sorted
    pub pending: Vec<PathBuf>,
    /// Input → existing output
    pub already_processed: BTreeMap<PathBuf, PathBuf>,
    /// Results folders pruned from the walk
    pub skipped_dirs: usize,
    /// Result files ignored as candidates
    pub skipped_result_files: usize,
    /// True when the walk was cut short by cancellation
    pub cancelled: bool,
}

impl ScanResult {
    /// Pending + already processed
    pub fn total(&self) -> usize {
        self.pending.len() + self.already_processed.len()
    }
}

/// Image scanner
#[derive(Debug, Clone)]
pub struct FileScanner {
    naming: ResultNaming,
    max_depth: Option<usize>,
}

impl FileScanner {
    pub fn new(naming: ResultNaming) -> Self {
        Self { naming, max_depth: None }
    }

    /// Limit recursion depth (root is depth 0)
    pub fn with_max_depth(mut self, depth: usize) -> Self {
        self.max_depth = Some(depth);
        self
    }

    pub fn naming(&self) -> &ResultNaming {
        &self.naming
    }

    /// Scan a tree, degrading any failure to an empty result
    pub fn scan(&self, root: &Path, cancel: &CancellationToken) -> ScanResult {
        match self.try_scan(root, cancel) {
            Ok(result) => result,
            Err(e) => {
                tracing::error!(root = %root.display(), error = %e, "Scan failed, nothing found");
                ScanResult::default()
            }
        }
    }

    /// Scan a tree, reporting an unusable root as an error
    pub fn try_scan(&self, root: &Path, cancel: &CancellationToken) -> Result<ScanResult, ScanError> {
        if !root.exists() {
            return Err(ScanError::PathNotFound(root.to_path_buf()));
        }

        if !root.is_dir() {
            return Err(ScanError::NotADirectory(root.to_path_buf()));
        }

        let mut result = ScanResult::default();
        let mut pruned_dirs = 0usize;

        let walker = WalkDir::new(root)
            .follow_links(false)
            .sort_by_file_name()
            .max_depth(self.max_depth.unwrap_or(usize::MAX))
            .into_iter()
            .filter_entry(|e| self.should_process_entry(e, &mut pruned_dirs));

        for entry in walker {
            if cancel.is_cancelled() {
                tracing::info!(
                    root = %root.display(),
                    found = result.total(),
                    "Scan cancelled"
                );
                result.cancelled = true;
                break;
            }

            let entry = match entry {
                Ok(entry) => entry,
                Err(e) => {
                    tracing::warn!("Error accessing entry: {}", e);
                    continue;
                }
            };

            if !entry.file_type().is_file() {
                continue;
            }

            let file_name = entry.file_name().to_string_lossy();
            if self.naming.is_result_file_name(&file_name) {
                result.skipped_result_files += 1;
                continue;
            }

            let path = entry.path();
            if !is_image_file(path) {
                continue;
            }

            match self.find_existing_result(path) {
                Some(existing) => {
                    tracing::debug!(
                        file = %path.display(),
                        output = %existing.display(),
                        "Already processed"
                    );
                    result.already_processed.insert(path.to_path_buf(), existing);
                }
                None => result.pending.push(path.to_path_buf()),
            }
        }

        result.skipped_dirs = pruned_dirs;
        result.pending.sort();

        tracing::info!(
            root = %root.display(),
            pending = result.pending.len(),
            already_processed = result.already_processed.len(),
            skipped_dirs = result.skipped_dirs,
            skipped_result_files = result.skipped_result_files,
            "Scan completed"
        );

        Ok(result)
    }

    /// Run the scan on the blocking pool
    pub async fn scan_async(&self, root: PathBuf, cancel: CancellationToken) -> ScanResult {
        let scanner = self.clone();
        let handle = tokio::task::spawn_blocking(move || scanner.scan(&root, &cancel));

        match handle.await {
            Ok(result) => result,
            Err(e) => {
                tracing::error!(error = %e, "Scan task failed, nothing found");
                ScanResult::default()
            }
        }
    }

    /// Scan and publish `FilesFound` followed by `ScanFinished`
    pub async fn scan_and_publish(
        &self,
        scan_id: Uuid,
        root: PathBuf,
        cancel: CancellationToken,
        event_bus: &EventBus,
    ) -> ScanResult {
        let result = self.scan_async(root, cancel).await;

        event_bus.emit_lossy(BatchEvent::FilesFound {
            scan_id,
            pending: result.pending.clone(),
            cancelled: result.cancelled,
            timestamp: Utc::now(),
        });
        event_bus.emit_lossy(BatchEvent::ScanFinished {
            scan_id,
            total: result.total(),
            timestamp: Utc::now(),
        });

        result
    }

    /// Locate an earlier output for an input, if any
    ///
    /// Probes, in order: the input's directory, `<dir>/<stem>_<results>`,
    /// `<parent>/<dir_name>_<results>` and `<parent>/<results>`.
    pub fn find_existing_result(&self, input: &Path) -> Option<PathBuf> {
        let stem = file_stem(input);
        let output_stem = self.naming.output_stem(&stem);

        for dir in self.candidate_dirs(input, &stem) {
            for ext in OUTPUT_EXTENSIONS {
                let candidate = dir.join(format!("{}.{}", output_stem, ext));
                if candidate.exists() {
                    return Some(candidate);
                }
            }
        }

        None
    }

    fn candidate_dirs(&self, input: &Path, stem: &str) -> Vec<PathBuf> {
        let image_dir = input.parent().map(Path::to_path_buf).unwrap_or_default();
        let mut dirs = vec![
            image_dir.clone(),
            image_dir.join(self.naming.results_dir_name(stem)),
        ];

        if let (Some(parent), Some(dir_name)) = (image_dir.parent(), image_dir.file_name()) {
            let by_folder = parent.join(self.naming.results_dir_name(&dir_name.to_string_lossy()));
            let shared = parent.join(&self.naming.results_suffix);
            for dir in [by_folder, shared] {
                if !dirs.contains(&dir) {
                    dirs.push(dir);
                }
            }
        }

        dirs
    }

    /// Results folders are pruned together with their contents
    fn should_process_entry(&self, entry: &DirEntry, pruned_dirs: &mut usize) -> bool {
        if entry.file_type().is_dir() && self.naming.is_results_dir_name(&entry.file_name().to_string_lossy()) {
            tracing::debug!(dir = %entry.path().display(), "Pruning results folder");
            *pruned_dirs += 1;
            return false;
        }

        true
    }
}

impl Default for FileScanner {
    fn default() -> Self {
        Self::new(ResultNaming::default())
    }
}

/// Check if extension is a recognized image
fn is_image_file(path: &Path) -> bool {
    path.extension()
        .map(|ext| ext.to_string_lossy().to_lowercase())
        .map(|ext| IMAGE_EXTENSIONS.contains(&ext.as_str()))
        .unwrap_or(false)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::TempDir;

    fn touch(path: &Path) {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).unwrap();
        }
        fs::write(path, b"img").unwrap();
    }

    #[test]
    fn test_image_extension_detection() {
        assert!(is_image_file(Path::new("a.jpg")));
        assert!(is_image_file(Path::new("a.JPEG")));
        assert!(is_image_file(Path::new("a.tif")));
        assert!(!is_image_file(Path::new("a.txt")));
        assert!(!is_image_file(Path::new("jpg")));
    }

    #[test]
    fn test_scan_nonexistent_path_degrades() {
        let scanner = FileScanner::default();
        let cancel = CancellationToken::new();

        assert!(matches!(
            scanner.try_scan(Path::new("/nonexistent/skybatch"), &cancel),
            Err(ScanError::PathNotFound(_))
        ));
        assert_eq!(
            scanner.scan(Path::new("/nonexistent/skybatch"), &cancel),
            ScanResult::default()
        );
    }

    #[test]
    fn test_scan_file_as_root() {
        let dir = TempDir::new().unwrap();
        let file = dir.path().join("a.jpg");
        touch(&file);

        let scanner = FileScanner::default();
        assert!(matches!(
            scanner.try_scan(&file, &CancellationToken::new()),
            Err(ScanError::NotADirectory(_))
        ));
    }

    #[test]
    fn test_result_files_are_not_candidates() {
        let dir = TempDir::new().unwrap();
        touch(&dir.path().join("a.jpg"));
        touch(&dir.path().join("b_gemini.jpg"));
        touch(&dir.path().join("notes.txt"));

        let result = FileScanner::default().scan(dir.path(), &CancellationToken::new());
        assert_eq!(result.pending, vec![dir.path().join("a.jpg")]);
        assert_eq!(result.skipped_result_files, 1);
    }

    #[test]
    fn test_existing_output_probe_locations() {
        let dir = TempDir::new().unwrap();
        let photos = dir.path().join("photos");

        // Same directory
        touch(&photos.join("a.jpg"));
        touch(&photos.join("a_gemini.png"));
        // Per-file results folder
        touch(&photos.join("b.jpg"));
        touch(&photos.join("b_gemini_results").join("b_gemini.jpg"));
        // Per-folder results folder beside the input folder
        touch(&photos.join("c.jpg"));
        touch(&dir.path().join("photos_gemini_results").join("c_gemini.webp"));
        // Shared results folder
        touch(&photos.join("d.jpg"));
        touch(&dir.path().join("gemini_results").join("d_gemini.jpeg"));
        // Nothing
        touch(&photos.join("e.jpg"));

        let scanner = FileScanner::default();
        assert_eq!(
            scanner.find_existing_result(&photos.join("a.jpg")),
            Some(photos.join("a_gemini.png"))
        );
        assert_eq!(
            scanner.find_existing_result(&photos.join("b.jpg")),
            Some(photos.join("b_gemini_results").join("b_gemini.jpg"))
        );
        assert_eq!(
            scanner.find_existing_result(&photos.join("c.jpg")),
            Some(dir.path().join("photos_gemini_results").join("c_gemini.webp"))
        );
        assert_eq!(
            scanner.find_existing_result(&photos.join("d.jpg")),
            Some(dir.path().join("gemini_results").join("d_gemini.jpeg"))
        );
        assert_eq!(scanner.find_existing_result(&photos.join("e.jpg")), None);
    }

    #[test]
    fn test_cancelled_before_walk() {
        let dir = TempDir::new().unwrap();
        touch(&dir.path().join("a.jpg"));

        let cancel = CancellationToken::new();
        cancel.cancel();

        let result = FileScanner::default().scan(dir.path(), &cancel);
        assert!(result.cancelled);
        assert!(result.pending.is_empty());
    }
}
