//! OCR engine discovery.
//!
//! Resolved once at startup and passed by value into the extractor; nothing
//! here is cached in global state.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::process::Command;
use tracing::{debug, info, warn};

/// Environment variable that overrides the OCR binary location.
pub const TESSERACT_PATH_ENV: &str = "TESSERACT_PATH";

/// Whether OCR is usable on this machine, and with what.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct OcrCapability {
    pub available: bool,
    /// Validated engine binary.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub binary: Option<PathBuf>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub version: Option<String>,
    /// Installed language packs (e.g. `eng`, `ara`).
    pub languages: Vec<String>,
}

impl std::fmt::Display for OcrCapability {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        if !self.available {
            return write!(f, "unavailable");
        }
        write!(
            f,
            "tesseract {} [{}]",
            self.version.as_deref().unwrap_or("unknown"),
            self.languages.join(", ")
        )
    }
}

impl OcrCapability {
    /// A capability with OCR disabled.
    pub fn unavailable() -> Self {
        Self::default()
    }

    /// Discover the OCR engine: env override, then well-known platform paths,
    /// then the bare binary name on `PATH`.
    pub fn discover() -> Self {
        let env_override = std::env::var_os(TESSERACT_PATH_ENV).map(PathBuf::from);
        let mut candidates: Vec<PathBuf> = env_override.into_iter().collect();
        candidates.extend(platform_candidates());
        candidates.extend(path_candidates());
        Self::discover_from(&candidates)
    }

    /// Probe `candidates` in order; the first valid executable wins.
    pub fn discover_from(candidates: &[PathBuf]) -> Self {
        for candidate in candidates {
            if !is_executable_file(candidate) {
                debug!("OCR candidate rejected: {}", candidate.display());
                continue;
            }
            let version = probe_version(candidate);
            let languages = probe_languages(candidate);
            if version.is_none() && languages.is_empty() {
                warn!("OCR binary did not respond: {}", candidate.display());
                continue;
            }
            let capability = Self {
                available: true,
                binary: Some(candidate.clone()),
                version,
                languages,
            };
            info!("OCR engine found at {}: {}", candidate.display(), capability);
            return capability;
        }
        warn!("No OCR engine found, scanned PDFs will be recorded as failures");
        Self::unavailable()
    }

    pub fn supports(&self, language: &str) -> bool {
        self.languages.iter().any(|l| l == language)
    }

    /// Language argument for the engine: Arabic plus English when installed.
    pub fn language_arg(&self) -> String {
        if self.supports("ara") && self.supports("eng") {
            "ara+eng".to_string()
        } else if self.languages.is_empty() || self.supports("eng") {
            "eng".to_string()
        } else {
            self.languages.join("+")
        }
    }
}

fn platform_candidates() -> Vec<PathBuf> {
    #[cfg(target_os = "linux")]
    {
        vec![
            PathBuf::from("/usr/bin/tesseract"),
            PathBuf::from("/usr/local/bin/tesseract"),
        ]
    }
    #[cfg(target_os = "macos")]
    {
        vec![
            PathBuf::from("/opt/homebrew/bin/tesseract"),
            PathBuf::from("/usr/local/bin/tesseract"),
        ]
    }
    #[cfg(target_os = "windows")]
    {
        vec![
            PathBuf::from(r"C:\Program Files\Tesseract-OCR\tesseract.exe"),
            PathBuf::from(r"C:\Program Files (x86)\Tesseract-OCR\tesseract.exe"),
        ]
    }
    #[cfg(not(any(target_os = "linux", target_os = "macos", target_os = "windows")))]
    {
        Vec::new()
    }
}

fn path_candidates() -> Vec<PathBuf> {
    let name = if cfg!(windows) { "tesseract.exe" } else { "tesseract" };
    std::env::var_os("PATH")
        .map(|paths| std::env::split_paths(&paths).map(|p| p.join(name)).collect())
        .unwrap_or_default()
}

/// A regular file (symlinks resolved) with an execute bit set.
pub fn is_executable_file(path: &Path) -> bool {
    let Ok(meta) = std::fs::metadata(path) else {
        return false;
    };
    if !meta.is_file() {
        return false;
    }
    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        meta.permissions().mode() & 0o111 != 0
    }
    #[cfg(not(unix))]
    {
        path.extension()
            .and_then(|e| e.to_str())
            .map(|e| e.eq_ignore_ascii_case("exe"))
            .unwrap_or(false)
    }
}

fn probe_version(binary: &Path) -> Option<String> {
    let output = Command::new(binary).arg("--version").output().ok()?;
    // Older releases print the banner on stderr.
    let text = if output.stdout.is_empty() {
        String::from_utf8_lossy(&output.stderr).into_owned()
    } else {
        String::from_utf8_lossy(&output.stdout).into_owned()
    };
    parse_version(&text)
}

fn probe_languages(binary: &Path) -> Vec<String> {
    match Command::new(binary).arg("--list-langs").output() {
        Ok(output) => {
            let mut text = String::from_utf8_lossy(&output.stdout).into_owned();
            if text.trim().is_empty() {
                text = String::from_utf8_lossy(&output.stderr).into_owned();
            }
            parse_languages(&text)
        }
        Err(_) => Vec::new(),
    }
}

/// Extract the version from a `tesseract --version` banner.
pub fn parse_version(banner: &str) -> Option<String> {
    banner.lines().find_map(|line| {
        let mut parts = line.split_whitespace();
        match (parts.next(), parts.next()) {
            (Some(name), Some(version)) if name.eq_ignore_ascii_case("tesseract") => {
                Some(version.trim_start_matches('v').to_string())
            }
            _ => None,
        }
    })
}

/// Parse `tesseract --list-langs` output; the first line is a header.
pub fn parse_languages(listing: &str) -> Vec<String> {
    listing
        .lines()
        .map(str::trim)
        .filter(|l| !l.is_empty() && !l.contains(' ') && !l.ends_with(':'))
        .map(String::from)
        .collect()
}
