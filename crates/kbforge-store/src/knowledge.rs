//! JSON knowledge base: atomic persistence, merge, snapshots and rollback.
//!
//! The store file is only ever replaced by renaming a fully written sibling
//! temp file over it, so readers see either the old or the new content.

use std::collections::BTreeSet;
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};

use chrono::NaiveDateTime;
use serde_json::Value;
use tracing::{debug, error, info, warn};

use crate::tracker::{hash_file, DuplicateTracker};
use crate::types::*;
use kbforge_core::{DataPaths, Error, Result};

const SNAPSHOT_PREFIX: &str = "knowledge_base_snapshot_";
const SNAPSHOT_TIME_FORMAT: &str = "%Y%m%d_%H%M%S";
/// Nesting deeper than this is rejected before write.
const MAX_TREE_DEPTH: usize = 64;
/// Strings are capped at this many characters when sanitized.
pub const MAX_STRING_CHARS: usize = 1_000_000;

/// The on-disk knowledge base and its snapshot directory.
#[derive(Debug, Clone)]
pub struct KnowledgeStore {
    path: PathBuf,
    snapshot_dir: PathBuf,
}

impl KnowledgeStore {
    pub fn new(path: impl Into<PathBuf>, snapshot_dir: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            snapshot_dir: snapshot_dir.into(),
        }
    }

    pub fn from_paths(paths: &DataPaths) -> Self {
        Self::new(&paths.knowledge_base, &paths.snapshots)
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn snapshot_dir(&self) -> &Path {
        &self.snapshot_dir
    }

    pub fn load(&self) -> Result<KnowledgeBase> {
        load(&self.path)
    }

    pub fn save(&self, kb: &KnowledgeBase) -> Result<()> {
        save(kb, &self.path)
    }

    /// Write `kb` to a new timestamped file in the snapshot directory.
    pub fn snapshot(&self, kb: &KnowledgeBase) -> Result<PathBuf> {
        std::fs::create_dir_all(&self.snapshot_dir)?;
        let stamp = chrono::Local::now().format(SNAPSHOT_TIME_FORMAT).to_string();
        let mut path = self
            .snapshot_dir
            .join(format!("{}{}.json", SNAPSHOT_PREFIX, stamp));
        let mut n = 1;
        while path.exists() {
            path = self
                .snapshot_dir
                .join(format!("{}{}_{}.json", SNAPSHOT_PREFIX, stamp, n));
            n += 1;
        }
        save(kb, &path)?;
        info!("Created snapshot {} ({} documents)", path.display(), kb.len());
        Ok(path)
    }

    /// Snapshots on disk, newest first.
    pub fn list_snapshots(&self) -> Result<Vec<SnapshotInfo>> {
        if !self.snapshot_dir.exists() {
            return Ok(Vec::new());
        }
        let mut snapshots = Vec::new();
        for dirent in std::fs::read_dir(&self.snapshot_dir)? {
            let dirent = dirent?;
            let path = dirent.path();
            let Some(timestamp) = snapshot_timestamp(&path) else {
                debug!("Ignoring non-snapshot file {}", path.display());
                continue;
            };
            let size_bytes = dirent.metadata()?.len();
            snapshots.push(SnapshotInfo {
                timestamp,
                file_path: path,
                size_bytes,
            });
        }
        snapshots.sort_by(|a, b| {
            b.timestamp
                .cmp(&a.timestamp)
                .then_with(|| b.file_path.cmp(&a.file_path))
        });
        Ok(snapshots)
    }

    /// Restore the store from `snapshot`. Failures are logged and reported as `false`.
    pub fn rollback(&self, snapshot: &Path) -> bool {
        match rollback(snapshot, &self.path) {
            Ok(backup) => {
                info!(
                    "Rolled back {} to {} (previous content in {})",
                    self.path.display(),
                    snapshot.display(),
                    backup
                        .as_deref()
                        .map(|p| p.display().to_string())
                        .unwrap_or_else(|| "no backup, target was absent".into())
                );
                true
            }
            Err(e) => {
                error!("Rollback to {} failed: {}", snapshot.display(), e);
                false
            }
        }
    }

    /// Record every store file that the ledger does not know about.
    pub fn sync_states(&self, tracker: &DuplicateTracker) -> Result<SyncReport> {
        let kb = self.load()?;
        let mut report = SyncReport::default();

        if self.path.exists() {
            let backup = sibling_with_suffix(&self.path, ".sync_backup");
            match std::fs::copy(&self.path, &backup) {
                Ok(_) => {
                    report
                        .actions
                        .push(format!("Created backup: {}", backup.display()));
                    report.backup = Some(backup);
                }
                Err(e) => report
                    .warnings
                    .push(format!("Could not create backup: {}", e)),
            }
        }

        let tracked: BTreeSet<String> = tracker.get_all_tracked_files()?.into_iter().collect();
        let kb_paths: BTreeSet<&str> = kb.file_paths().collect();

        for file_path in kb_paths.iter().filter(|p| !p.is_empty() && !tracked.contains(**p)) {
            match hash_file(Path::new(file_path))
                .and_then(|hash| tracker.record_processed(file_path, &hash))
            {
                Ok(()) => report
                    .actions
                    .push(format!("Added to tracker: {}", display_name(file_path))),
                Err(e) => report
                    .errors
                    .push(format!("Failed to add {} to tracker: {}", file_path, e)),
            }
        }

        let orphaned = tracked
            .iter()
            .filter(|t| !kb_paths.contains(t.as_str()))
            .count();
        if orphaned > 0 {
            report.warnings.push(format!(
                "Found {} files in tracker not in KB (keeping for history)",
                orphaned
            ));
        }

        info!(
            "State synchronization completed: {} actions taken",
            report.actions.len()
        );
        Ok(report)
    }
}

/// Load a store file. A missing file is an empty store.
pub fn load(path: &Path) -> Result<KnowledgeBase> {
    if !path.exists() {
        debug!("No knowledge base at {}, starting empty", path.display());
        return Ok(KnowledgeBase::default());
    }
    let value = load_value(path)?;
    let kb: KnowledgeBase = serde_json::from_value(value)
        .map_err(|e| Error::StoreCorruption(format!("{}: {}", path.display(), e)))?;
    info!("Loaded {} documents from {}", kb.len(), path.display());
    Ok(kb)
}

/// Read and shape-check a raw store tree.
fn load_value(path: &Path) -> Result<Value> {
    let bytes = std::fs::read(path).map_err(|e| Error::from_io(e, path))?;
    if bytes.contains(&0) {
        return Err(Error::StoreCorruption(format!(
            "{} contains null bytes",
            path.display()
        )));
    }
    let value: Value = serde_json::from_slice(&bytes)
        .map_err(|e| Error::StoreCorruption(format!("{}: {}", path.display(), e)))?;
    if !value.is_object() {
        return Err(Error::StoreCorruption(format!(
            "{} does not hold a JSON object",
            path.display()
        )));
    }
    Ok(value)
}

/// Validate and atomically replace `path` with `kb`.
pub fn save(kb: &KnowledgeBase, path: &Path) -> Result<()> {
    for (id, entry) in &kb.entries {
        if entry.segments.is_none() && entry.error.is_none() {
            return Err(Error::StoreCorruption(format!(
                "entry '{}' has neither segments nor error",
                id
            )));
        }
    }
    let value = serde_json::to_value(kb)?;
    validate_tree(&value)?;
    atomic_write_json(&value, path)?;
    info!("Saved {} documents to {}", kb.len(), path.display());
    Ok(())
}

/// Reject trees that must not reach disk: a non-object top level, NUL
/// characters, empty keys or runaway nesting.
pub fn validate_tree(value: &Value) -> Result<()> {
    if !value.is_object() {
        return Err(Error::StoreCorruption(
            "top-level payload must be a JSON object".into(),
        ));
    }
    validate_node(value, "$", 0)
}

fn validate_node(value: &Value, at: &str, depth: usize) -> Result<()> {
    if depth > MAX_TREE_DEPTH {
        return Err(Error::StoreCorruption(format!("nesting too deep at {}", at)));
    }
    match value {
        Value::Null | Value::Bool(_) => Ok(()),
        Value::Number(n) => {
            if n.as_f64().map(f64::is_finite).unwrap_or(false) {
                Ok(())
            } else {
                Err(Error::StoreCorruption(format!("non-finite number at {}", at)))
            }
        }
        Value::String(s) => {
            if s.contains('\0') {
                Err(Error::StoreCorruption(format!("null character at {}", at)))
            } else {
                Ok(())
            }
        }
        Value::Array(items) => items
            .iter()
            .enumerate()
            .try_for_each(|(i, v)| validate_node(v, &format!("{}[{}]", at, i), depth + 1)),
        Value::Object(map) => map.iter().try_for_each(|(k, v)| {
            if k.is_empty() || k.contains('\0') {
                return Err(Error::StoreCorruption(format!("invalid key at {}", at)));
            }
            validate_node(v, &format!("{}.{}", at, k), depth + 1)
        }),
    }
}

/// Pretty-print `value` into a temp file beside `target`, then rename over it.
/// On any failure the temp file is removed and `target` is untouched.
fn atomic_write_json(value: &Value, target: &Path) -> Result<()> {
    let dir = match target.parent() {
        Some(p) if !p.as_os_str().is_empty() => p.to_path_buf(),
        _ => PathBuf::from("."),
    };
    std::fs::create_dir_all(&dir)?;

    let mut tmp = tempfile::Builder::new()
        .prefix(".kb-")
        .suffix(".tmp")
        .tempfile_in(&dir)?;
    {
        let mut writer = BufWriter::new(tmp.as_file_mut());
        serde_json::to_writer_pretty(&mut writer, value)?;
        writer.flush()?;
    }
    tmp.as_file().sync_all()?;
    tmp.persist(target).map_err(|e| Error::Io(e.error))?;
    Ok(())
}

/// Combine a previous store with the results of a run.
///
/// Ids in `new` replace their previous entries; ids only in `existing` are
/// carried forward unchanged. The curated sub-tree of `existing` wins.
pub fn merge(existing: &KnowledgeBase, new: KnowledgeBase) -> KnowledgeBase {
    let mut merged = new;
    for (id, entry) in &existing.entries {
        merged
            .entries
            .entry(id.clone())
            .or_insert_with(|| entry.clone());
    }
    if existing.curated.is_some() {
        merged.curated = existing.curated.clone();
    }
    merged
}

/// Copy `target` to a `.rollback_backup` sibling, then atomically write the
/// snapshot content over it. Returns the backup path when one was made.
pub fn rollback(snapshot: &Path, target: &Path) -> Result<Option<PathBuf>> {
    if !snapshot.is_file() {
        return Err(Error::FileNotFound(snapshot.to_path_buf()));
    }
    let value = load_value(snapshot)?;
    // Must also be a readable store, not just any object.
    serde_json::from_value::<KnowledgeBase>(value.clone())
        .map_err(|e| Error::StoreCorruption(format!("{}: {}", snapshot.display(), e)))?;
    validate_tree(&value)?;

    let backup = if target.exists() {
        let backup = sibling_with_suffix(target, ".rollback_backup");
        std::fs::copy(target, &backup)?;
        Some(backup)
    } else {
        None
    };
    atomic_write_json(&value, target)?;
    Ok(backup)
}

/// Cross-reference ledger paths with store entries.
pub fn validate_consistency(tracker: &DuplicateTracker, kb: &KnowledgeBase) -> ConsistencyReport {
    let mut report = ConsistencyReport {
        kb_documents: kb.len(),
        ..Default::default()
    };

    let tracked = match tracker.get_all_tracked_files() {
        Ok(files) => files,
        Err(e) => {
            report.errors.push(format!("Validation failed: {}", e));
            report.status = HealthStatus::Error;
            return report;
        }
    };
    report.tracked_files = tracked.len();

    let kb_paths: BTreeSet<&str> = kb.file_paths().collect();
    let tracked_set: BTreeSet<&str> = tracked.iter().map(String::as_str).collect();

    let missing: Vec<&str> = tracked
        .iter()
        .map(String::as_str)
        .filter(|p| !kb_paths.contains(p))
        .collect();
    let untracked = kb_paths
        .iter()
        .filter(|p| !p.is_empty() && !tracked_set.contains(*p))
        .count();

    if !missing.is_empty() {
        let preview: Vec<&str> = missing.iter().take(3).copied().collect();
        report.errors.push(format!(
            "Duplicate tracker has {} files not in knowledge base: {:?}...",
            missing.len(),
            preview
        ));
    }
    if untracked > 0 {
        report.warnings.push(format!(
            "Knowledge base has {} documents not in duplicate tracker",
            untracked
        ));
    }

    report.status = if !report.errors.is_empty() {
        HealthStatus::Error
    } else if !report.warnings.is_empty() {
        HealthStatus::Warning
    } else {
        HealthStatus::Healthy
    };
    if report.status != HealthStatus::Healthy {
        warn!(
            "State consistency {}: {} errors, {} warnings",
            report.status,
            report.errors.len(),
            report.warnings.len()
        );
    }
    report
}

/// Strip NUL characters and cap string length in an entry before it is stored.
pub fn sanitize_entry(entry: &mut KnowledgeBaseEntry) {
    if let Some(segments) = entry.segments.as_mut() {
        let cleaned = std::mem::take(segments)
            .into_iter()
            .map(|(k, v)| (sanitize_str(&k), sanitize_str(&v)))
            .collect();
        *segments = cleaned;
    }
    for table in &mut entry.tables {
        for cell in table.headers.iter_mut().chain(table.rows.iter_mut().flatten()) {
            *cell = sanitize_str(cell);
        }
        if let Some(caption) = table.caption.as_mut() {
            *caption = sanitize_str(caption);
        }
    }
    if let Some(error) = entry.error.as_mut() {
        *error = sanitize_str(error);
    }
}

fn sanitize_str(s: &str) -> String {
    let cleaned: String = s.chars().filter(|c| *c != '\0').collect();
    if cleaned.chars().count() > MAX_STRING_CHARS {
        cleaned.chars().take(MAX_STRING_CHARS).collect()
    } else {
        cleaned
    }
}

fn snapshot_timestamp(path: &Path) -> Option<NaiveDateTime> {
    let name = path.file_name()?.to_str()?;
    let stamp = name.strip_prefix(SNAPSHOT_PREFIX)?.strip_suffix(".json")?;
    NaiveDateTime::parse_from_str(stamp.get(..15)?, SNAPSHOT_TIME_FORMAT).ok()
}

fn sibling_with_suffix(path: &Path, suffix: &str) -> PathBuf {
    let mut name = path.as_os_str().to_os_string();
    name.push(suffix);
    PathBuf::from(name)
}

fn display_name(file_path: &str) -> &str {
    Path::new(file_path)
        .file_name()
        .and_then(|n| n.to_str())
        .unwrap_or(file_path)
}
