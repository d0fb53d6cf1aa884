//! Ingestion pipeline: files and direct content into the store.
//!
//! ```text
//! path → size cap → extension allow-list → read → sanitize → hash
//!      → dedup check → atomize → persist (one transaction)
//! ```
//!
//! Deduplication is global by content hash: re-ingesting identical content
//! returns the existing compound id with status `skipped`. A known path whose
//! content hash changed replaces its prior rows under the same path-stable id
//! (last writer wins).

use data_encoding::BASE32_NOPAD;
use std::path::Path;
use tracing::{info, warn};

use crate::atomizer;
use crate::error::{EngineError, EngineResult};
use crate::models::{IngestOutcome, IngestStatus, Provenance};
use crate::store::Store;

/// Extensions accepted from the watched directory. Extensionless files are
/// treated as plain text.
const ALLOWED_EXTENSIONS: &[&str] = &[
    "txt", "md", "json", "yaml", "yml", "js", "ts", "py", "html", "css", "bat", "ps1", "sh",
];

/// Derive the path-stable compound id: base32 of the root-relative path.
pub fn compound_id_for_source(source: &str) -> String {
    BASE32_NOPAD.encode(source.as_bytes()).to_lowercase()
}

/// Millisecond ingest timestamp.
pub fn now_millis() -> i64 {
    chrono::Utc::now().timestamp_millis()
}

/// Ingest caller-supplied content directly.
///
/// `source` labels the record (used for the path-stable id and retrieval
/// headers); `buckets` must be non-empty, and the engine facade defaults it
/// to `["core"]` before calling here.
pub async fn ingest_content(
    store: &Store,
    content: &str,
    source: &str,
    provenance: Provenance,
    buckets: Vec<String>,
) -> EngineResult<IngestOutcome> {
    if content.is_empty() {
        return Err(EngineError::BadRequest("content must not be empty".into()));
    }
    if buckets.is_empty() {
        return Err(EngineError::BadRequest("buckets must not be empty".into()));
    }

    let body = atomizer::sanitize(content);
    let hash = atomizer::content_hash(&body);

    if let Some(existing) = store.find_compound_by_hash(&hash).await? {
        return Ok(IngestOutcome {
            status: IngestStatus::Skipped,
            id: existing,
        });
    }

    let id = compound_id_for_source(source);
    let doc = atomizer::atomize(&id, source, &body, provenance, buckets, now_millis());
    store.put_compound_tree(&doc).await?;

    info!(
        compound = %id,
        molecules = doc.molecules.len(),
        atoms = doc.atoms.len(),
        "ingested {}",
        source
    );

    Ok(IngestOutcome {
        status: IngestStatus::Inserted,
        id,
    })
}

/// Ingest one file from the watched directory.
///
/// Returns `Ok(None)` when the file was filtered out (too large, disallowed
/// extension, unreadable). Filtered files are logged, never errors, so the
/// watcher loop keeps running.
pub async fn ingest_file(
    store: &Store,
    root: &Path,
    path: &Path,
    max_file_bytes: u64,
) -> EngineResult<Option<IngestOutcome>> {
    let metadata = std::fs::metadata(path)?;
    if metadata.len() > max_file_bytes {
        warn!(
            "skipping {} ({} bytes exceeds cap of {})",
            path.display(),
            metadata.len(),
            max_file_bytes
        );
        return Ok(None);
    }

    if !extension_allowed(path) {
        return Ok(None);
    }

    let content = match std::fs::read_to_string(path) {
        Ok(c) => c,
        Err(e) => {
            warn!("skipping {} (unreadable: {})", path.display(), e);
            return Ok(None);
        }
    };
    if content.is_empty() {
        return Ok(None);
    }

    let relative = path.strip_prefix(root).unwrap_or(path);
    let source = relative.to_string_lossy().replace('\\', "/");
    let buckets = buckets_for_relative_path(&source);

    let outcome = ingest_content(store, &content, &source, Provenance::Internal, buckets).await?;
    Ok(Some(outcome))
}

/// The first path segment under the watched root becomes the bucket; files
/// in the root itself land in `core`.
pub fn buckets_for_relative_path(relative: &str) -> Vec<String> {
    match relative.split('/').next() {
        Some(first) if relative.contains('/') && !first.is_empty() => vec![first.to_string()],
        _ => vec!["core".to_string()],
    }
}

/// Extension allow-list check; extensionless files pass.
pub fn extension_allowed(path: &Path) -> bool {
    match path.extension() {
        None => true,
        Some(ext) => {
            let ext = ext.to_string_lossy().to_lowercase();
            ALLOWED_EXTENSIONS.contains(&ext.as_str())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    #[test]
    fn compound_ids_are_stable_and_distinct() {
        let a = compound_id_for_source("notes/a.md");
        let b = compound_id_for_source("notes/a.md");
        let c = compound_id_for_source("notes/b.md");
        assert_eq!(a, b);
        assert_ne!(a, c);
    }

    #[test]
    fn bucket_is_first_path_segment() {
        assert_eq!(buckets_for_relative_path("notes/a.md"), vec!["notes"]);
        assert_eq!(buckets_for_relative_path("work/deep/b.md"), vec!["work"]);
        assert_eq!(buckets_for_relative_path("root.md"), vec!["core"]);
    }

    #[test]
    fn extension_allow_list() {
        assert!(extension_allowed(&PathBuf::from("a.md")));
        assert!(extension_allowed(&PathBuf::from("a.yaml")));
        assert!(extension_allowed(&PathBuf::from("Makefile")));
        assert!(!extension_allowed(&PathBuf::from("a.png")));
        assert!(!extension_allowed(&PathBuf::from("a.exe")));
    }
}
