//! Configuration and data directory management.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Default maximum input file size (50 MB).
pub const DEFAULT_MAX_FILE_SIZE: u64 = 50 * 1024 * 1024;
/// Sections longer than this are truncated with a marker.
pub const MAX_SECTION_CHARS: usize = 50_000;
/// OCR output stored per document is capped at this many characters.
pub const MAX_OCR_CHARS: usize = 10_000;
/// Only the first pages of a PDF are scanned for tables.
pub const MAX_PAGES_FOR_TABLE_EXTRACTION: usize = 10;
/// Extensions accepted by path validation and folder enumeration.
pub const ALLOWED_EXTENSIONS: &[&str] = &["pdf", "docx"];

/// Paths to all kbforge data files.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DataPaths {
    /// Root data directory (e.g., `data/`).
    pub root: PathBuf,
    /// Aggregate store (`data/knowledge_base.json`).
    pub knowledge_base: PathBuf,
    /// Dedup ledger (`data/processing_tracker.db`).
    pub tracker_db: PathBuf,
    /// Point-in-time copies of the store (`data/snapshots/`).
    pub snapshots: PathBuf,
}

impl DataPaths {
    /// Create data paths from a root directory. Creates directories if needed.
    pub fn new(root: impl AsRef<Path>) -> std::io::Result<Self> {
        let root = root.as_ref().to_path_buf();
        let paths = Self {
            knowledge_base: root.join("knowledge_base.json"),
            tracker_db: root.join("processing_tracker.db"),
            snapshots: root.join("snapshots"),
            root,
        };
        paths.ensure_dirs()?;
        Ok(paths)
    }

    fn ensure_dirs(&self) -> std::io::Result<()> {
        std::fs::create_dir_all(&self.root)?;
        std::fs::create_dir_all(&self.snapshots)?;
        Ok(())
    }
}

/// A named input folder. The name becomes the `type` of every entry ingested from it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InputFolder {
    pub category: String,
    pub path: PathBuf,
}

impl InputFolder {
    pub fn new(category: impl Into<String>, path: impl Into<PathBuf>) -> Self {
        Self {
            category: category.into(),
            path: path.into(),
        }
    }

    /// Parse a `name=path` pair as given on the command line.
    pub fn parse(spec: &str) -> crate::Result<Self> {
        match spec.split_once('=') {
            Some((name, path)) if !name.trim().is_empty() && !path.trim().is_empty() => {
                Ok(Self::new(name.trim(), path.trim()))
            }
            _ => Err(crate::Error::Config(format!(
                "invalid folder mapping '{}', expected name=path",
                spec
            ))),
        }
    }
}

/// Chunking parameters.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChunkingConfig {
    pub chunk_size: usize,
    pub overlap: usize,
}

impl Default for ChunkingConfig {
    fn default() -> Self {
        Self {
            chunk_size: 500,
            overlap: 50,
        }
    }
}

/// Top-level kbforge configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct KbConfig {
    /// Data directory paths.
    pub data_paths: DataPaths,
    /// Input folders, in processing order.
    pub folders: Vec<InputFolder>,
    /// Files larger than this fail path validation.
    pub max_file_size: u64,
    pub chunking: ChunkingConfig,
    /// Explicit OCR language string (e.g. `ara+eng`); discovered when unset.
    pub ocr_languages: Option<String>,
}

impl KbConfig {
    /// Create configuration from environment and defaults.
    pub fn from_env(data_dir: impl AsRef<Path>) -> std::io::Result<Self> {
        let data_paths = DataPaths::new(data_dir)?;

        let max_file_size = env_parse("KBFORGE_MAX_FILE_SIZE").unwrap_or(DEFAULT_MAX_FILE_SIZE);
        let defaults = ChunkingConfig::default();
        let chunking = ChunkingConfig {
            chunk_size: env_parse("KBFORGE_CHUNK_SIZE").unwrap_or(defaults.chunk_size),
            overlap: env_parse("KBFORGE_CHUNK_OVERLAP").unwrap_or(defaults.overlap),
        };
        let ocr_languages = std::env::var("KBFORGE_OCR_LANGUAGES")
            .ok()
            .filter(|s| !s.trim().is_empty());

        let folders = vec![
            InputFolder::new("proposals", data_paths.root.join("proposals")),
            InputFolder::new("reports", data_paths.root.join("reports")),
        ];

        Ok(Self {
            data_paths,
            folders,
            max_file_size,
            chunking,
            ocr_languages,
        })
    }

    /// Replace the default folders.
    pub fn with_folders(mut self, folders: Vec<InputFolder>) -> Self {
        if !folders.is_empty() {
            self.folders = folders;
        }
        self
    }
}

fn env_parse<T: std::str::FromStr>(key: &str) -> Option<T> {
    std::env::var(key).ok().and_then(|v| v.trim().parse().ok())
}
