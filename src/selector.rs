//! Algorithm selection
//!
//! The active variant is named in a small text file that operators edit
//! while the pipeline runs. It is re-read once per tick.

use crate::classifier::VariantKind;
use parking_lot::RwLock;
use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};

/// Parse selection content.
///
/// The first line is either a bare variant name (`svm`) or an assignment
/// whose double-quoted value names the variant (`algorithm = "svm"`).
pub fn parse_selection(content: &str) -> Option<VariantKind> {
    let line = content.lines().next()?.trim();
    let value = if line.contains('"') {
        line.split('"').nth(1)?
    } else {
        line
    };
    value.trim().parse().ok()
}

/// Reads the selection file each tick
pub struct VariantSelector {
    path: PathBuf,
    default: Option<VariantKind>,
    last: RwLock<Option<VariantKind>>,
}

impl VariantSelector {
    pub fn new(path: impl Into<PathBuf>, default: Option<VariantKind>) -> Self {
        Self {
            path: path.into(),
            default,
            last: RwLock::new(None),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Re-read the file. `None` means classification is skipped this tick.
    pub fn refresh(&self) -> Option<VariantKind> {
        let selected = match fs::read_to_string(&self.path) {
            Ok(content) => {
                let parsed = parse_selection(&content);
                if parsed.is_none() {
                    tracing::warn!(
                        "Unrecognized algorithm selection in {}: {:?}",
                        self.path.display(),
                        content.lines().next().unwrap_or("")
                    );
                }
                parsed
            }
            Err(e) if e.kind() == ErrorKind::NotFound => {
                if self.default.is_none() {
                    tracing::debug!("No algorithm selection at {}", self.path.display());
                }
                self.default
            }
            Err(e) => {
                tracing::warn!("Failed to read {}: {}", self.path.display(), e);
                None
            }
        };

        if let Some(kind) = selected {
            let previous = self.last.write().replace(kind);
            if previous != Some(kind) {
                tracing::info!("Classifier variant selected: {}", kind);
            }
        }
        selected
    }

    /// Most recent valid selection
    pub fn current(&self) -> Option<VariantKind> {
        *self.last.read()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_selection() {
        assert_eq!(parse_selection("svm\n"), Some(VariantKind::Svm));
        assert_eq!(parse_selection("  kmeans  "), Some(VariantKind::KMeans));
        assert_eq!(parse_selection("algorithm = \"nb\"\n"), Some(VariantKind::NaiveBayes));
        assert_eq!(parse_selection("ALGO=\"tree\" # decision tree"), Some(VariantKind::Tree));
        assert_eq!(parse_selection("tree\nsvm"), Some(VariantKind::Tree));

        assert_eq!(parse_selection(""), None);
        assert_eq!(parse_selection("forest"), None);
        assert_eq!(parse_selection("algorithm = \"forest\""), None);
        assert_eq!(parse_selection("algorithm = \""), None);
    }

    #[test]
    fn test_refresh_follows_file_edits() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("conf.txt");
        let selector = VariantSelector::new(&path, None);

        assert_eq!(selector.refresh(), None);

        fs::write(&path, "algorithm = \"svm\"\n").unwrap();
        assert_eq!(selector.refresh(), Some(VariantKind::Svm));

        fs::write(&path, "kmeans\n").unwrap();
        assert_eq!(selector.refresh(), Some(VariantKind::KMeans));

        fs::write(&path, "bogus\n").unwrap();
        assert_eq!(selector.refresh(), None);
        assert_eq!(selector.current(), Some(VariantKind::KMeans));
    }

    #[test]
    fn test_default_only_when_file_missing() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("conf.txt");
        let selector = VariantSelector::new(&path, Some(VariantKind::Tree));

        assert_eq!(selector.refresh(), Some(VariantKind::Tree));

        fs::write(&path, "").unwrap();
        assert_eq!(selector.refresh(), None);
    }
}
