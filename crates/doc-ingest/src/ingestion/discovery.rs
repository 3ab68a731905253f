//! Input directory walking and eligibility filtering

use std::collections::HashSet;
use std::path::{Path, PathBuf};
use walkdir::{DirEntry, WalkDir};

use crate::config::ProcessingConfig;
use crate::error::{Error, Result};

/// A candidate file found under the input directory
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DiscoveredFile {
    pub path: PathBuf,
    pub size: u64,
}

/// Files found under a root, split by eligibility
#[derive(Debug, Default)]
pub struct Discovery {
    /// Allowed extension and within the size limit
    pub eligible: Vec<DiscoveredFile>,
    /// Allowed extension but over `max_file_size`
    pub oversized: Vec<DiscoveredFile>,
    /// Files with an extension that is not allowed
    pub ignored: usize,
}

/// Eligibility rules for one walk
#[derive(Debug, Clone)]
pub struct DiscoveryOptions {
    pub allowed_extensions: Vec<String>,
    pub max_file_size: u64,
    /// Never pick up this file (the task's own output artifact)
    pub exclude: Option<PathBuf>,
    /// Canonical paths that are always eligible, whatever their extension or size
    pub pinned: HashSet<PathBuf>,
}

impl DiscoveryOptions {
    pub fn from_config(config: &ProcessingConfig, exclude: Option<PathBuf>) -> Self {
        Self {
            allowed_extensions: config
                .allowed_extensions
                .iter()
                .map(|e| e.trim_start_matches('.').to_lowercase())
                .collect(),
            max_file_size: config.max_file_size,
            exclude,
            pinned: HashSet::new(),
        }
    }

    /// Always admit these files (already extracted upstream)
    pub fn with_pinned(mut self, paths: impl IntoIterator<Item = PathBuf>) -> Self {
        self.pinned.extend(paths);
        self
    }

    fn is_pinned(&self, path: &Path) -> bool {
        !self.pinned.is_empty()
            && self
                .pinned
                .contains(&path.canonicalize().unwrap_or_else(|_| path.to_path_buf()))
    }

    fn is_allowed(&self, path: &Path) -> bool {
        path.extension()
            .and_then(|e| e.to_str())
            .map(|e| {
                let ext = e.to_lowercase();
                self.allowed_extensions.iter().any(|a| *a == ext)
            })
            .unwrap_or(false)
    }
}

fn is_hidden(entry: &DirEntry) -> bool {
    entry.depth() > 0
        && entry
            .file_name()
            .to_str()
            .map(|s| s.starts_with('.'))
            .unwrap_or(false)
}

/// Walk `root` recursively, skipping hidden entries and the excluded output file
pub fn discover_files(root: &Path, options: &DiscoveryOptions) -> Result<Discovery> {
    if !root.is_dir() {
        return Err(Error::InvalidInput(format!(
            "Input path is not a directory: {}",
            root.display()
        )));
    }

    let exclude = options
        .exclude
        .as_ref()
        .map(|p| p.canonicalize().unwrap_or_else(|_| p.clone()));

    let mut discovery = Discovery::default();

    for entry in WalkDir::new(root)
        .follow_links(false)
        .sort_by_file_name()
        .into_iter()
        .filter_entry(|e| !is_hidden(e))
    {
        let entry = match entry {
            Ok(entry) => entry,
            Err(e) => {
                tracing::warn!("Skipping unreadable entry under {}: {}", root.display(), e);
                continue;
            }
        };
        if !entry.file_type().is_file() {
            continue;
        }

        let path = entry.path();
        if let Some(exclude) = &exclude {
            let candidate = path.canonicalize().unwrap_or_else(|_| path.to_path_buf());
            if &candidate == exclude {
                continue;
            }
        }

        let pinned = options.is_pinned(path);
        if !pinned && !options.is_allowed(path) {
            discovery.ignored += 1;
            continue;
        }

        let size = entry.metadata().map(|m| m.len()).unwrap_or(0);
        let file = DiscoveredFile {
            path: path.to_path_buf(),
            size,
        };
        if !pinned && size > options.max_file_size {
            tracing::info!(
                "[{}] skipped: {} bytes exceeds limit of {}",
                path.display(),
                size,
                options.max_file_size
            );
            discovery.oversized.push(file);
        } else {
            discovery.eligible.push(file);
        }
    }

    Ok(discovery)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    fn options(max: u64, exclude: Option<PathBuf>) -> DiscoveryOptions {
        DiscoveryOptions {
            allowed_extensions: vec!["txt".into(), "md".into(), "json".into()],
            max_file_size: max,
            exclude,
            pinned: HashSet::new(),
        }
    }

    #[test]
    fn test_discovery_filters() {
        let dir = tempfile::tempdir().unwrap();
        let root = dir.path();
        fs::write(root.join("a.txt"), "alpha").unwrap();
        fs::write(root.join("B.MD"), "beta").unwrap();
        fs::write(root.join("image.png"), "png").unwrap();
        fs::create_dir(root.join("nested")).unwrap();
        fs::write(root.join("nested/c.txt"), "gamma").unwrap();
        fs::create_dir(root.join(".git")).unwrap();
        fs::write(root.join(".git/config.txt"), "hidden").unwrap();
        fs::write(root.join("big.txt"), "x".repeat(64)).unwrap();
        fs::write(root.join("out.json"), "{}").unwrap();

        let found = discover_files(root, &options(32, Some(root.join("out.json")))).unwrap();
        let names: Vec<_> = found
            .eligible
            .iter()
            .map(|f| f.path.file_name().unwrap().to_string_lossy().into_owned())
            .collect();

        assert_eq!(names, vec!["B.MD", "a.txt", "c.txt"]);
        assert_eq!(found.oversized.len(), 1);
        assert_eq!(found.ignored, 1);
    }

    #[test]
    fn test_missing_root_is_invalid_input() {
        let err = discover_files(Path::new("/definitely/not/here"), &options(10, None)).unwrap_err();
        assert!(matches!(err, Error::InvalidInput(_)));
    }

    #[test]
    fn test_pinned_files_skip_extension_and_size_rules() {
        let dir = tempfile::tempdir().unwrap();
        let root = dir.path();
        fs::write(root.join("download"), "x".repeat(64)).unwrap();
        fs::write(root.join("huge.txt"), "x".repeat(64)).unwrap();
        fs::write(root.join("other.bin"), "x").unwrap();

        let pinned = [root.join("download"), root.join("huge.txt")]
            .iter()
            .map(|p| p.canonicalize().unwrap())
            .collect::<Vec<_>>();
        let found = discover_files(root, &options(32, None).with_pinned(pinned)).unwrap();
        let names: Vec<_> = found
            .eligible
            .iter()
            .map(|f| f.path.file_name().unwrap().to_string_lossy().into_owned())
            .collect();

        assert_eq!(names, vec!["download", "huge.txt"]);
        assert!(found.oversized.is_empty());
        assert_eq!(found.ignored, 1);
    }
}
