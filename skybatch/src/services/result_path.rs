//! Result path resolution
//!
//! Pure functions computing where an item's output lives. Discovery uses
//! them to detect earlier outputs; the orchestrator uses them to decide
//! where to write.

use skybatch_common::ResultNaming;
use std::collections::BTreeSet;
use std::path::{Path, PathBuf};

/// Where outputs of a run are written
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OutputDirPolicy {
    /// Fixed directory
    Explicit(PathBuf),
    /// Process working directory (output path is a bare file name)
    CurrentDir,
    /// Next to each input
    BesideInput,
}

/// Expected output path for an input: `<dir>/<stem>_<suffix>.<ext>`
pub fn resolve_output_path(input: &Path, policy: &OutputDirPolicy, naming: &ResultNaming) -> PathBuf {
    let file_name = naming.output_file_name(&file_stem(input));

    match policy {
        OutputDirPolicy::Explicit(dir) => dir.join(file_name),
        OutputDirPolicy::CurrentDir => PathBuf::from(file_name),
        OutputDirPolicy::BesideInput => match input.parent() {
            Some(parent) => parent.join(file_name),
            None => PathBuf::from(file_name),
        },
    }
}

/// Derive a run's output directory from its inputs
///
/// - one input: `<input_dir>/<stem>_<results_suffix>`
/// - all inputs in one directory: `<parent>/<dir_name>_<results_suffix>`
/// - inputs spread over directories: `<parent of first dir>/<results_suffix>`
///
/// Returns `None` when there are no inputs.
pub fn derive_run_output_dir(inputs: &[PathBuf], naming: &ResultNaming) -> Option<PathBuf> {
    let first = inputs.first()?;
    let first_dir = parent_dir(first);

    if inputs.len() == 1 {
        let dir_name = naming.results_dir_name(&file_stem(first));
        return Some(first_dir.join(dir_name));
    }

    let dirs: BTreeSet<PathBuf> = inputs.iter().map(|p| parent_dir(p)).collect();
    if dirs.len() == 1 {
        let base = first_dir
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();
        let container = first_dir.parent().map(Path::to_path_buf).unwrap_or_else(|| first_dir.clone());
        if base.is_empty() {
            return Some(container.join(&naming.results_suffix));
        }
        return Some(container.join(naming.results_dir_name(&base)));
    }

    let container = first_dir.parent().map(Path::to_path_buf).unwrap_or(first_dir);
    Some(container.join(&naming.results_suffix))
}

/// File name without its extension
pub(crate) fn file_stem(path: &Path) -> String {
    path.file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_default()
}

/// Base name for progress messages
pub(crate) fn file_name(path: &Path) -> String {
    path.file_name()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_else(|| path.display().to_string())
}

fn parent_dir(path: &Path) -> PathBuf {
    path.parent().map(Path::to_path_buf).unwrap_or_default()
}
