//! Result naming conventions
//!
//! Outputs are written as `<stem>_<suffix>.<ext>`, grouped in folders named
//! `<something>_<results_suffix>`. Discovery uses the same conventions to
//! recognize (and skip) earlier results.

use serde::{Deserialize, Serialize};

/// Naming rules shared by discovery and the output-path resolver
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ResultNaming {
    /// Suffix appended to an output file stem (`photo` → `photo_gemini`)
    pub suffix: String,
    /// Results folder marker (`photos` → `photos_gemini_results`)
    pub results_suffix: String,
    /// Extension of written outputs, without the dot
    pub output_extension: String,
}

impl Default for ResultNaming {
    fn default() -> Self {
        Self {
            suffix: "gemini".to_string(),
            results_suffix: "gemini_results".to_string(),
            output_extension: "jpg".to_string(),
        }
    }
}

impl ResultNaming {
    /// Output file name for an input stem
    pub fn output_file_name(&self, stem: &str) -> String {
        format!("{}_{}.{}", stem, self.suffix, self.output_extension)
    }

    /// Output stem (no extension) for an input stem
    pub fn output_stem(&self, stem: &str) -> String {
        format!("{}_{}", stem, self.suffix)
    }

    /// Results folder name for a base name
    pub fn results_dir_name(&self, base: &str) -> String {
        format!("{}_{}", base, self.results_suffix)
    }

    /// True if a directory name marks a results folder
    pub fn is_results_dir_name(&self, name: &str) -> bool {
        let name = name.to_lowercase();
        let marker = self.results_suffix.to_lowercase();
        name.ends_with(&format!("_{}", marker)) || name.contains(&marker)
    }

    /// True if a file name looks like a produced result
    pub fn is_result_file_name(&self, name: &str) -> bool {
        name.to_lowercase().contains(&self.suffix.to_lowercase())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_output_file_name() {
        let naming = ResultNaming::default();
        assert_eq!(naming.output_file_name("IMG_001"), "IMG_001_gemini.jpg");
        assert_eq!(naming.results_dir_name("photos"), "photos_gemini_results");
    }

    #[test]
    fn test_results_dir_detection() {
        let naming = ResultNaming::default();
        assert!(naming.is_results_dir_name("photos_gemini_results"));
        assert!(naming.is_results_dir_name("Photos_GEMINI_Results"));
        assert!(naming.is_results_dir_name("gemini_results"));
        assert!(!naming.is_results_dir_name("photos"));
        assert!(!naming.is_results_dir_name("gemini"));
    }

    #[test]
    fn test_result_file_detection() {
        let naming = ResultNaming::default();
        assert!(naming.is_result_file_name("IMG_001_gemini.jpg"));
        assert!(naming.is_result_file_name("Gemini_cover.png"));
        assert!(!naming.is_result_file_name("IMG_001.jpg"));
    }
}
