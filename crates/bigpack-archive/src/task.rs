//! Build task: what goes into an archive and how each file is stored.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::format::CompressionMethod;
use crate::{Error, Result};

/// A complete archive description.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct BuildTask {
    /// Archive display name.
    pub name: String,
    pub tocs: Vec<TocTask>,
}

/// One table of contents.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TocTask {
    pub name: String,
    #[serde(default)]
    pub alias: String,
    /// Directory rooting this TOC, relative to the build root.
    #[serde(default)]
    pub root: PathBuf,
    /// Method used when no rule overrides it.
    #[serde(default)]
    pub default_compression: CompressionMethod,
    /// Rules in priority order.
    #[serde(default)]
    pub rules: Vec<FileRule>,
    /// Source files, absolute or relative to the build root.
    #[serde(default)]
    pub files: Vec<PathBuf>,
}

/// A per-file storage rule.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileRule {
    #[serde(flatten)]
    pub action: RuleAction,
    /// `*`/`?` pattern matched against the lowercase file name.
    pub wildcard: String,
    #[serde(default)]
    pub min_size: Option<u64>,
    #[serde(default)]
    pub max_size: Option<u64>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "action", rename_all = "snake_case")]
pub enum RuleAction {
    /// Store matching files with `compression`.
    Override { compression: CompressionMethod },
    /// Leave matching files out.
    Skip,
}

impl FileRule {
    pub fn overriding(wildcard: impl Into<String>, compression: CompressionMethod) -> Self {
        Self {
            action: RuleAction::Override { compression },
            wildcard: wildcard.into(),
            min_size: None,
            max_size: None,
        }
    }

    pub fn skipping(wildcard: impl Into<String>) -> Self {
        Self {
            action: RuleAction::Skip,
            wildcard: wildcard.into(),
            min_size: None,
            max_size: None,
        }
    }

    pub fn with_size_range(mut self, min_size: Option<u64>, max_size: Option<u64>) -> Self {
        self.min_size = min_size;
        self.max_size = max_size;
        self
    }

    /// Whether `size` lies within the rule's bounds.
    #[inline]
    pub fn accepts_size(&self, size: u64) -> bool {
        self.min_size.map_or(true, |min| size >= min) && self.max_size.map_or(true, |max| size <= max)
    }
}

impl TocTask {
    pub fn new(name: impl Into<String>, root: impl Into<PathBuf>) -> Self {
        let name = name.into();
        Self {
            alias: name.clone(),
            name,
            root: root.into(),
            default_compression: CompressionMethod::default(),
            rules: Vec::new(),
            files: Vec::new(),
        }
    }
}

impl BuildTask {
    /// Load a task from a JSON file.
    pub fn load(path: &Path) -> Result<Self> {
        let text = std::fs::read_to_string(path).map_err(|e| Error::io(path, e))?;
        serde_json::from_str(&text)
            .map_err(|e| Error::InvalidTask(format!("{}: {e}", path.display())))
    }

    /// Total number of listed source files.
    pub fn file_count(&self) -> usize {
        self.tocs.iter().map(|toc| toc.files.len()).sum()
    }
}
