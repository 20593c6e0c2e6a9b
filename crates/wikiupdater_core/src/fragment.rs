use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use tracing::debug;

pub const UNKNOWN_VERSION: &str = "Unknown";

const FALLBACK_SUBFOLDERS: [&str; 2] = ["id", "page"];
const VERSION_PROBE_ITEM: &str = "Base.Axe";

/// Resolve a fragment path, trying `base`, then `id/` and `page/` next to it.
///
/// Returns `base` unchanged when no candidate exists; the caller's read then
/// fails with `NotFound`, which is how a missing fragment is reported.
pub fn locate(base: &Path) -> PathBuf {
    if base.exists() {
        return base.to_path_buf();
    }
    let (Some(directory), Some(filename)) = (base.parent(), base.file_name()) else {
        return base.to_path_buf();
    };
    for subfolder in FALLBACK_SUBFOLDERS {
        let candidate = directory.join(subfolder).join(filename);
        if candidate.exists() {
            return candidate;
        }
    }
    base.to_path_buf()
}

/// Read a located fragment. A missing or blank file is `Ok(None)`; other I/O
/// errors propagate.
pub fn read_located(base: &Path) -> Result<Option<String>> {
    let found = locate(base);
    match fs::read_to_string(&found) {
        Ok(content) if content.trim().is_empty() => {
            debug!(path = %normalize_path(&found), "fragment is blank");
            Ok(None)
        }
        Ok(content) => Ok(Some(content)),
        Err(error) if error.kind() == ErrorKind::NotFound => {
            debug!(path = %normalize_path(base), "fragment not found");
            Ok(None)
        }
        Err(error) => {
            Err(error).with_context(|| format!("failed to read {}", normalize_path(&found)))
        }
    }
}

/// Fragment tree rooted at the parser output directory plus the history export.
#[derive(Debug, Clone)]
pub struct FragmentStore {
    pub parser_output: PathBuf,
    pub history: PathBuf,
    pub default_language: String,
}

impl FragmentStore {
    pub fn new(
        parser_output: impl Into<PathBuf>,
        history: impl Into<PathBuf>,
        default_language: impl Into<String>,
    ) -> Self {
        Self {
            parser_output: parser_output.into(),
            history: history.into(),
            default_language: default_language.into(),
        }
    }

    pub fn path(&self, parts: &[&str]) -> PathBuf {
        let mut path = self.parser_output.clone();
        for part in parts {
            path.push(part);
        }
        path
    }

    pub fn localized_path(&self, language: &str, parts: &[&str]) -> PathBuf {
        let mut path = self.parser_output.join(language);
        for part in parts {
            path.push(part);
        }
        path
    }

    pub fn read(&self, parts: &[&str]) -> Result<Option<String>> {
        read_located(&self.path(parts))
    }

    pub fn read_localized(&self, language: &str, parts: &[&str]) -> Result<Option<String>> {
        read_located(&self.localized_path(language, parts))
    }

    /// Localized read that falls back to the default language when absent.
    pub fn read_localized_or_default(
        &self,
        language: &str,
        parts: &[&str],
    ) -> Result<Option<String>> {
        if let Some(content) = self.read_localized(language, parts)? {
            return Ok(Some(content));
        }
        if language == self.default_language {
            return Ok(None);
        }
        self.read_localized(&self.default_language, parts)
    }

    pub fn read_history(&self, item_id: &str) -> Result<Option<String>> {
        read_located(&self.history.join(format!("{item_id}.txt")))
    }

    /// Game version stamped into the reference item infobox, or `Unknown`.
    pub fn game_version(&self) -> String {
        let path = self.localized_path(
            &self.default_language,
            &["item", "infoboxes", &format!("{VERSION_PROBE_ITEM}.txt")],
        );
        let Ok(content) = fs::read_to_string(&path) else {
            return UNKNOWN_VERSION.to_string();
        };
        content
            .lines()
            .find_map(|line| line.strip_prefix("|infobox_version="))
            .map(|value| value.trim().to_string())
            .unwrap_or_else(|| UNKNOWN_VERSION.to_string())
    }
}

/// Encode a page title the way the parser names its per-article files.
pub fn encode_article_name(title: &str) -> String {
    let mut encoded = String::with_capacity(title.len());
    for character in title.chars() {
        match character {
            ' ' => encoded.push('_'),
            '\'' => encoded.push_str("%27"),
            ':' => encoded.push_str("%3A"),
            '"' => encoded.push_str("%22"),
            ',' => encoded.push_str("%2C"),
            '!' => encoded.push_str("%21"),
            ';' => encoded.push_str("%3B"),
            '&' => encoded.push_str("%26"),
            '?' => encoded.push_str("%3F"),
            other => encoded.push(other),
        }
    }
    encoded
}

fn normalize_path(path: &Path) -> String {
    path.to_string_lossy().replace('\\', "/")
}
