//! Ingestion of plain-text documents.
//!
//! Walks a file or directory, keeps `.txt` and `.md` files, cleans and
//! chunks each one, and adds its fragments to the configured store with
//! one `add` call per file. Every fragment carries metadata:
//!
//! | Key | Value |
//! |-----|-------|
//! | `source` | path relative to the ingested root |
//! | `chunk` | fragment index within the document |
//! | `hash` | SHA-256 of the fragment text |
//! | `indexed_at` | RFC 3339 timestamp of the run |

use anyhow::{bail, Result};
use chrono::Utc;
use globset::{Glob, GlobSet, GlobSetBuilder};
use serde::Serialize;
use sha2::{Digest, Sha256};
use std::path::{Path, PathBuf};
use tracing::{error, info, warn};
use walkdir::WalkDir;

use crate::chunk::{chunk_document, clean_text};
use crate::config::Config;
use crate::models::Metadata;
use crate::vector_index::VectorIndex;

const INCLUDE_GLOBS: &[&str] = &["**/*.txt", "**/*.md"];
const EXCLUDE_GLOBS: &[&str] = &["**/.git/**", "**/target/**", "**/node_modules/**"];

#[derive(Debug, Default, Clone, PartialEq, Eq, Serialize)]
pub struct IngestReport {
    /// Files read and chunked.
    pub files: usize,
    pub fragments: usize,
    pub added: usize,
    /// Fragments excluded for a dimension mismatch.
    pub rejected: usize,
    /// Fragments whose embedding failed.
    pub failed: usize,
    /// Files that could not be read.
    pub unreadable: usize,
}

/// Ingest `path` (a file or a directory) into the configured store.
pub async fn ingest_path(index: &VectorIndex, config: &Config, path: &Path) -> Result<IngestReport> {
    if !path.exists() {
        bail!("Path does not exist: {}", path.display());
    }

    let files = collect_files(path)?;
    info!(path = %path.display(), files = files.len(), "ingesting");

    let store = &config.index.store;
    let indexed_at = Utc::now().to_rfc3339();
    let mut report = IngestReport::default();

    for (file, source) in files {
        let bytes = match std::fs::read(&file) {
            Ok(b) => b,
            Err(e) => {
                error!(file = %file.display(), error = %e, "failed to read file");
                report.unreadable += 1;
                continue;
            }
        };
        report.files += 1;

        let text = clean_text(&String::from_utf8_lossy(&bytes));
        let fragments = chunk_document(
            &source,
            &text,
            config.chunking.max_chars,
            config.chunking.overlap_chars,
        );
        if fragments.is_empty() {
            warn!(source = %source, "document produced no fragments");
            continue;
        }

        let texts: Vec<String> = fragments.iter().map(|f| f.text.clone()).collect();
        let metadatas: Vec<Metadata> = fragments
            .iter()
            .map(|f| {
                let mut meta = f.metadata();
                meta.insert("hash".to_string(), sha256_hex(&f.text).into());
                meta.insert("indexed_at".to_string(), indexed_at.clone().into());
                meta
            })
            .collect();

        let added = index.add(&texts, &metadatas, store).await?;
        report.fragments += fragments.len();
        report.added += added.added();
        report.rejected += added.rejected.len();
        report.failed += added.failed.len();
    }

    info!(
        store = %store,
        files = report.files,
        fragments = report.fragments,
        added = report.added,
        "ingestion complete"
    );
    Ok(report)
}

/// Files under `root` matching the include globs, as `(path, source id)`
/// pairs sorted by source id. A single file is returned under its file name.
pub fn collect_files(root: &Path) -> Result<Vec<(PathBuf, String)>> {
    let include_set = build_globset(INCLUDE_GLOBS)?;

    if root.is_file() {
        let name = root
            .file_name()
            .map(|n| n.to_string_lossy().to_string())
            .unwrap_or_default();
        if !include_set.is_match(&name) {
            bail!("Unsupported file type: {} (expected .txt or .md)", root.display());
        }
        return Ok(vec![(root.to_path_buf(), name)]);
    }

    let exclude_set = build_globset(EXCLUDE_GLOBS)?;
    let mut files = Vec::new();
    for entry in WalkDir::new(root) {
        let entry = entry?;
        if !entry.file_type().is_file() {
            continue;
        }

        let path = entry.path();
        let relative = path.strip_prefix(root).unwrap_or(path);
        let rel_str = relative.to_string_lossy().replace('\\', "/");

        if exclude_set.is_match(&rel_str) || !include_set.is_match(&rel_str) {
            continue;
        }
        files.push((path.to_path_buf(), rel_str));
    }

    files.sort_by(|a, b| a.1.cmp(&b.1));
    Ok(files)
}

fn build_globset(patterns: &[&str]) -> Result<GlobSet> {
    let mut builder = GlobSetBuilder::new();
    for pattern in patterns {
        builder.add(Glob::new(pattern)?);
    }
    Ok(builder.build()?)
}

fn sha256_hex(text: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(text.as_bytes());
    format!("{:x}", hasher.finalize())
}
