//! Input file typing and path validation.

use std::path::{Path, PathBuf};

use kbforge_core::config::ALLOWED_EXTENSIONS;
use kbforge_core::{Error, Result};

/// Formats the extractor understands.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FileType {
    Pdf,
    Docx,
}

impl FileType {
    /// Detect file type from extension (without the dot, any case).
    pub fn from_extension(ext: &str) -> Option<Self> {
        match ext.to_lowercase().as_str() {
            "pdf" => Some(Self::Pdf),
            "docx" => Some(Self::Docx),
            _ => None,
        }
    }

    pub fn from_path(path: &Path) -> Result<Self> {
        let ext = path.extension().and_then(|e| e.to_str()).unwrap_or("");
        Self::from_extension(ext).ok_or_else(|| Error::UnsupportedFormat {
            path: path.to_path_buf(),
            detected: ext.to_lowercase(),
        })
    }

    /// Stored `format` value, e.g. `.pdf`.
    pub fn format(&self) -> &'static str {
        match self {
            Self::Pdf => ".pdf",
            Self::Docx => ".docx",
        }
    }
}

/// Regular files in `dir` with a supported extension, sorted by name.
pub fn list_documents(dir: &Path) -> Result<Vec<PathBuf>> {
    let mut files = Vec::new();
    for entry in std::fs::read_dir(dir).map_err(|e| Error::from_io(e, dir))? {
        let path = entry?.path();
        let supported = path
            .extension()
            .and_then(|e| e.to_str())
            .and_then(FileType::from_extension)
            .is_some();
        if supported && path.is_file() {
            files.push(path);
        }
    }
    files.sort();
    Ok(files)
}

/// Check that `path` is safe to ingest from `base`: no null bytes, resolves to a
/// regular file inside `base` (symlinks included), carries an allowed
/// extension and is no larger than `max_size`. Returns the resolved path.
pub fn validate_path(path: &Path, base: &Path, max_size: u64) -> Result<PathBuf> {
    let shown = path.to_string_lossy().into_owned();
    if shown.contains('\0') {
        return Err(Error::path_validation(shown, "path contains null bytes"));
    }

    let base = base
        .canonicalize()
        .map_err(|e| Error::path_validation(shown.clone(), format!("invalid base directory: {}", e)))?;
    let resolved = path.canonicalize().map_err(|e| match e.kind() {
        std::io::ErrorKind::NotFound => Error::FileNotFound(path.to_path_buf()),
        _ => Error::path_validation(shown.clone(), format!("cannot resolve path: {}", e)),
    })?;

    if !resolved.starts_with(&base) {
        return Err(Error::path_validation(shown, "path escapes the input directory"));
    }

    // canonicalize already followed the link; check the link itself too so a
    // chain through an outside directory is caught.
    let link_meta = std::fs::symlink_metadata(path).map_err(|e| Error::from_io(e, path))?;
    if link_meta.file_type().is_symlink() {
        let target = std::fs::read_link(path).map_err(|e| Error::from_io(e, path))?;
        let target = if target.is_absolute() {
            target
        } else {
            path.parent().unwrap_or(Path::new(".")).join(target)
        };
        let target = target.canonicalize().map_err(|e| Error::from_io(e, path))?;
        if !target.starts_with(&base) {
            return Err(Error::path_validation(shown, "symlink target escapes the input directory"));
        }
    }

    let ext = resolved
        .extension()
        .and_then(|e| e.to_str())
        .map(str::to_lowercase)
        .unwrap_or_default();
    if !ALLOWED_EXTENSIONS.contains(&ext.as_str()) {
        return Err(Error::path_validation(shown, format!("extension '{}' is not allowed", ext)));
    }

    let meta = std::fs::metadata(&resolved).map_err(|e| Error::from_io(e, path))?;
    if !meta.is_file() {
        return Err(Error::path_validation(shown, "not a regular file"));
    }
    if meta.len() > max_size {
        return Err(Error::path_validation(
            shown,
            format!("file too large ({} bytes, limit {})", meta.len(), max_size),
        ));
    }

    Ok(resolved)
}
