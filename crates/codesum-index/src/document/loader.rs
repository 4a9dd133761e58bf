use std::path::Path;

use super::types::Document;
use crate::error::{IndexError, Result};

/// Binary and asset files never worth embedding.
pub const DEFAULT_EXCLUDES: &[&str] = &[
    "**/non-utf8-encoding.py",
    "*.ico",
    "*.pdf",
    "*.pptx",
    "*.docx",
    "*.xlsx",
    "*.png",
    "*.jpg",
    "*.jpeg",
    "*.gif",
    "*.zip",
    "*.gz",
    "*.tar",
    "*.jar",
    "*.exe",
    "*.dll",
    "*.so",
    "*.woff",
    "*.woff2",
    "*.ttf",
    "*.lock",
];

/// Compiled exclusion globs matched against snapshot-relative paths.
#[derive(Debug, Clone, Default)]
pub struct ExclusionSet {
    patterns: Vec<glob::Pattern>,
}

impl ExclusionSet {
    /// # Errors
    ///
    /// Returns `IndexError::Pattern` for the first pattern that does not compile.
    pub fn new<I, S>(patterns: I) -> Result<Self>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let patterns = patterns
            .into_iter()
            .map(|p| {
                let p = p.as_ref();
                glob::Pattern::new(p).map_err(|source| IndexError::Pattern {
                    pattern: p.to_owned(),
                    source,
                })
            })
            .collect::<Result<Vec<_>>>()?;
        Ok(Self { patterns })
    }

    /// # Errors
    ///
    /// Never fails for the built-in list; the signature mirrors [`ExclusionSet::new`].
    pub fn defaults() -> Result<Self> {
        Self::new(DEFAULT_EXCLUDES)
    }

    #[must_use]
    pub fn is_excluded(&self, relative_path: &str) -> bool {
        self.patterns.iter().any(|p| p.matches(relative_path))
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.patterns.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.patterns.is_empty()
    }
}

#[derive(Debug, Default)]
struct LoadStats {
    loaded: usize,
    excluded: usize,
    too_large: usize,
    not_utf8: usize,
    unreadable: usize,
}

/// Reads every text file of a snapshot into [`Document`]s.
#[derive(Debug, Clone)]
pub struct SnapshotLoader {
    exclusions: ExclusionSet,
    max_file_size: u64,
}

impl SnapshotLoader {
    #[must_use]
    pub fn new(exclusions: ExclusionSet, max_file_size: u64) -> Self {
        Self {
            exclusions,
            max_file_size,
        }
    }

    /// Walk `root` and load all non-excluded UTF-8 files, sorted by relative path.
    ///
    /// Hidden entries (including `.git`) are skipped. Oversized, non-UTF-8 and unreadable
    /// files are logged and skipped.
    ///
    /// # Errors
    ///
    /// Returns an error if `root` itself cannot be read.
    pub fn load(&self, root: &Path) -> Result<Vec<Document>> {
        std::fs::read_dir(root)?;

        let mut stats = LoadStats::default();
        let mut documents = Vec::new();

        for entry in ignore::WalkBuilder::new(root)
            .hidden(true)
            .git_ignore(true)
            .build()
        {
            let entry = match entry {
                Ok(entry) => entry,
                Err(e) => {
                    tracing::warn!("skipping unreadable entry: {e}");
                    stats.unreadable += 1;
                    continue;
                }
            };
            if !entry.file_type().is_some_and(|ft| ft.is_file()) {
                continue;
            }

            let relative = relative_path(root, entry.path());
            if self.exclusions.is_excluded(&relative) {
                stats.excluded += 1;
                continue;
            }

            if let Ok(meta) = entry.metadata()
                && meta.len() > self.max_file_size
            {
                tracing::debug!(path = %relative, size = meta.len(), "skipping large file");
                stats.too_large += 1;
                continue;
            }

            let bytes = match std::fs::read(entry.path()) {
                Ok(bytes) => bytes,
                Err(e) => {
                    tracing::warn!(path = %relative, "skipping unreadable file: {e}");
                    stats.unreadable += 1;
                    continue;
                }
            };
            match String::from_utf8(bytes) {
                Ok(content) => {
                    documents.push(Document::new(relative, content));
                    stats.loaded += 1;
                }
                Err(_) => {
                    tracing::warn!(path = %relative, "skipping non-UTF-8 file");
                    stats.not_utf8 += 1;
                }
            }
        }

        documents.sort_by(|a, b| a.path.cmp(&b.path));
        tracing::info!(
            root = %root.display(),
            loaded = stats.loaded,
            excluded = stats.excluded,
            too_large = stats.too_large,
            not_utf8 = stats.not_utf8,
            unreadable = stats.unreadable,
            "snapshot loaded"
        );
        Ok(documents)
    }
}

fn relative_path(root: &Path, path: &Path) -> String {
    let rel = path.strip_prefix(root).unwrap_or(path);
    rel.components()
        .map(|c| c.as_os_str().to_string_lossy())
        .collect::<Vec<_>>()
        .join("/")
}
