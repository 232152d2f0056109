//! Per-entity manifest
//!
//! After every partition of an entity type has finished, the entity's output
//! tree is scanned and each part file is listed with its remote URL, its
//! on-disk (compressed) size and its line count. The manifest is built as a
//! value and serialized once.
//!
//! ```json
//! {
//!   "entries": [
//!     {"url": "s3://bucket/data/works/updated_date=2024-01-02/part_000.gz",
//!      "meta": {"content_length": 1024, "record_count": 10}}
//!   ],
//!   "meta": {"content_length": 1024, "record_count": 10}
//! }
//! ```

use flate2::read::MultiGzDecoder;
use serde::{Deserialize, Serialize};
use snapex_common::{Result, SnapexError};
use std::fs::{self, File};
use std::io::{BufRead, BufReader};
use std::path::{Path, PathBuf};
use tracing::{debug, info};
use walkdir::WalkDir;

use crate::writer::PART_EXTENSION;

/// File name of the manifest inside an entity directory
pub const MANIFEST_FILE_NAME: &str = "manifest";

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ManifestMeta {
    pub content_length: u64,
    pub record_count: u64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ManifestEntry {
    pub url: String,
    pub meta: ManifestMeta,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Manifest {
    pub entries: Vec<ManifestEntry>,
    pub meta: ManifestMeta,
}

impl Manifest {
    /// Totals are summed from the entries
    pub fn from_entries(entries: Vec<ManifestEntry>) -> Self {
        let meta = entries.iter().fold(ManifestMeta::default(), |acc, entry| ManifestMeta {
            content_length: acc.content_length + entry.meta.content_length,
            record_count: acc.record_count + entry.meta.record_count,
        });
        Self { entries, meta }
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// `<remote_base>/<entity_type>/<relative path>` with `/` separators
pub fn remote_url(remote_base: &str, entity_type: &str, relative: &Path) -> String {
    let relative: Vec<String> = relative
        .components()
        .map(|c| c.as_os_str().to_string_lossy().into_owned())
        .collect();
    format!(
        "{}/{}/{}",
        remote_base.trim_end_matches('/'),
        entity_type,
        relative.join("/")
    )
}

/// Number of lines in a gzip file, counting an unterminated last line
pub fn count_lines(path: &Path) -> std::io::Result<u64> {
    let mut reader = BufReader::new(MultiGzDecoder::new(File::open(path)?));
    let mut line = Vec::new();
    let mut count = 0;
    loop {
        line.clear();
        if reader.read_until(b'\n', &mut line)? == 0 {
            return Ok(count);
        }
        count += 1;
    }
}

/// Scan `entity_dir` and describe every part file under it.
///
/// A missing directory yields an empty manifest.
pub fn build_manifest(entity_dir: &Path, entity_type: &str, remote_base: &str) -> Result<Manifest> {
    if !entity_dir.exists() {
        debug!(dir = %entity_dir.display(), "No output for entity, manifest is empty");
        return Ok(Manifest::default());
    }

    let mut parts: Vec<(PathBuf, PathBuf)> = Vec::new();
    for entry in WalkDir::new(entity_dir) {
        let entry = entry.map_err(|e| SnapexError::manifest(entity_type, e))?;
        let path = entry.path();
        let is_part = entry.file_type().is_file()
            && path.extension().is_some_and(|ext| ext == PART_EXTENSION);
        if !is_part {
            continue;
        }
        let relative = path
            .strip_prefix(entity_dir)
            .map_err(|e| SnapexError::manifest(entity_type, e))?
            .to_path_buf();
        parts.push((relative, path.to_path_buf()));
    }
    parts.sort_by(|a, b| a.0.cmp(&b.0));

    let mut entries = Vec::with_capacity(parts.len());
    for (relative, path) in parts {
        let content_length = fs::metadata(&path)
            .map_err(|e| SnapexError::manifest(entity_type, format!("{}: {}", path.display(), e)))?
            .len();
        let record_count = count_lines(&path)
            .map_err(|e| SnapexError::manifest(entity_type, format!("{}: {}", path.display(), e)))?;

        entries.push(ManifestEntry {
            url: remote_url(remote_base, entity_type, &relative),
            meta: ManifestMeta {
                content_length,
                record_count,
            },
        });
    }

    let manifest = Manifest::from_entries(entries);
    info!(
        entity = entity_type,
        files = manifest.entries.len(),
        records = manifest.meta.record_count,
        bytes = manifest.meta.content_length,
        "Manifest built"
    );
    Ok(manifest)
}

/// Write `manifest` to `<entity_dir>/manifest`, replacing any previous one.
pub fn write_manifest(entity_dir: &Path, entity_type: &str, manifest: &Manifest) -> Result<PathBuf> {
    let path = entity_dir.join(MANIFEST_FILE_NAME);
    let body = serde_json::to_vec_pretty(manifest)?;
    fs::create_dir_all(entity_dir)
        .and_then(|_| fs::write(&path, body))
        .map_err(|e| SnapexError::manifest(entity_type, format!("{}: {}", path.display(), e)))?;
    Ok(path)
}

/// Build the manifest of `entity_dir` and write it in place
pub fn refresh_manifest(entity_dir: &Path, entity_type: &str, remote_base: &str) -> Result<Manifest> {
    let manifest = build_manifest(entity_dir, entity_type, remote_base)?;
    let path = write_manifest(entity_dir, entity_type, &manifest)?;
    debug!(path = %path.display(), "Manifest written");
    Ok(manifest)
}

/// Read a manifest written by [`write_manifest`]
pub fn read_manifest(path: &Path) -> Result<Manifest> {
    let body = fs::read(path)?;
    Ok(serde_json::from_slice(&body)?)
}
