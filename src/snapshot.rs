//! Snapshot lifecycle: eject to a portable YAML file, hydrate from one.
//!
//! A snapshot is an ordered sequence of compound-level records. Molecules and
//! atoms are deliberately absent: they re-derive deterministically from the
//! compound bodies through the atomizer, so the seven record fields are the
//! whole portable state.
//!
//! Hydration bypasses deduplication: records carry their original `id`,
//! `hash`, and `timestamp`. A record missing `hash` is backfilled with
//! `md5(content)`; missing `buckets` defaults to `["core"]`; unknown fields
//! are ignored. One bad record logs and skips, never aborts the rest.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tracing::{info, warn};

use crate::atomizer;
use crate::error::{EngineError, EngineResult};
use crate::models::Provenance;
use crate::store::Store;

/// Snapshot files are named `context_snapshot_<ts>.yaml`; the watcher
/// excludes anything matching this shape so the engine never re-ingests its
/// own backups.
const SNAPSHOT_PREFIX: &str = "context_snapshot_";

/// One portable compound record.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SnapshotRecord {
    pub id: String,
    pub timestamp: i64,
    pub content: String,
    pub source: String,
    #[serde(rename = "type", default)]
    pub kind: Option<String>,
    #[serde(default)]
    pub hash: Option<String>,
    #[serde(default)]
    pub buckets: Option<Vec<String>>,
}

/// Counts reported by a hydration pass.
#[derive(Debug, Clone, Copy, Default, Serialize)]
pub struct HydrateReport {
    pub restored: usize,
    pub failed: usize,
}

/// Does a file name match the snapshot pattern?
pub fn is_snapshot_file(name: &str) -> bool {
    name.starts_with(SNAPSHOT_PREFIX) && name.ends_with(".yaml")
}

/// Eject every compound into a YAML document and write a timestamped copy
/// under the backups directory. Returns the document and the written path.
pub async fn eject(store: &Store, backups_dir: &Path) -> EngineResult<(String, PathBuf)> {
    let compounds = store.scan_compounds().await?;

    let records: Vec<SnapshotRecord> = compounds
        .into_iter()
        .map(|c| SnapshotRecord {
            id: c.id,
            timestamp: c.timestamp,
            content: c.body,
            source: c.path,
            kind: Some(c.provenance.as_str().to_string()),
            hash: Some(c.hash),
            buckets: Some(c.buckets),
        })
        .collect();

    let document = serde_yaml::to_string(&records)?;

    std::fs::create_dir_all(backups_dir)?;
    let stamp = chrono::Utc::now().format("%Y%m%d_%H%M%S");
    let path = backups_dir.join(format!("{SNAPSHOT_PREFIX}{stamp}.yaml"));
    std::fs::write(&path, &document)?;

    info!("ejected {} compounds to {}", records.len(), path.display());
    Ok((document, path))
}

/// Hydrate the store from a snapshot file. Deduplication is bypassed; each
/// record lands under its original id with its original hash and timestamp.
pub async fn hydrate_from_file(store: &Store, path: &Path) -> EngineResult<HydrateReport> {
    let raw = std::fs::read_to_string(path)?;
    let records: Vec<SnapshotRecord> = serde_yaml::from_str(&raw)?;
    let total = records.len();

    let mut report = HydrateReport::default();
    for (index, record) in records.into_iter().enumerate() {
        match hydrate_record(store, record).await {
            Ok(()) => report.restored += 1,
            Err(e) => {
                warn!("skipping snapshot record {}: {}", index, e);
                report.failed += 1;
            }
        }
        if (index + 1) % 100 == 0 {
            info!("hydration progress: {}/{}", index + 1, total);
        }
    }

    info!(
        "hydrated {} compounds ({} failed) from {}",
        report.restored,
        report.failed,
        path.display()
    );
    Ok(report)
}

async fn hydrate_record(store: &Store, record: SnapshotRecord) -> EngineResult<()> {
    if record.content.is_empty() {
        return Err(EngineError::BadRequest("record has empty content".into()));
    }

    let provenance = record
        .kind
        .as_deref()
        .and_then(Provenance::parse)
        .unwrap_or(Provenance::Internal);
    let buckets = match record.buckets {
        Some(b) if !b.is_empty() => b,
        _ => vec!["core".to_string()],
    };

    // Molecules and atoms re-derive from the body; the stored hash is
    // preserved verbatim so the round-trip stays lossless.
    let mut doc = atomizer::atomize(
        &record.id,
        &record.source,
        &record.content,
        provenance,
        buckets,
        record.timestamp,
    );
    doc.compound.hash = record
        .hash
        .unwrap_or_else(|| atomizer::content_hash(&record.content));

    store.put_compound_tree(&doc).await
}

/// Boot-time policy: hydrate only an empty store, from the newest backup.
pub async fn auto_hydrate(store: &Store, backups_dir: &Path) -> EngineResult<Option<HydrateReport>> {
    if store.compound_count().await? > 0 {
        return Ok(None);
    }

    let Some(newest) = newest_backup(backups_dir)? else {
        return Ok(None);
    };

    info!("empty store, auto-hydrating from {}", newest.display());
    let report = hydrate_from_file(store, &newest).await?;
    Ok(Some(report))
}

/// The most recently modified `.yaml` backup, if any.
fn newest_backup(backups_dir: &Path) -> EngineResult<Option<PathBuf>> {
    if !backups_dir.exists() {
        return Ok(None);
    }

    let mut newest: Option<(std::time::SystemTime, PathBuf)> = None;
    for entry in std::fs::read_dir(backups_dir)? {
        let entry = entry?;
        let path = entry.path();
        if path.extension().and_then(|e| e.to_str()) != Some("yaml") {
            continue;
        }
        let modified = entry.metadata()?.modified()?;
        match &newest {
            Some((best, _)) if *best >= modified => {}
            _ => newest = Some((modified, path)),
        }
    }
    Ok(newest.map(|(_, path)| path))
}
