//! Dream: offline maintenance over unclassified memories.
//!
//! `dream()` walks every compound still carrying the default bucket
//! assignment (`["core"]` or empty), re-runs atom extraction over its body,
//! and rebuilds the engram sidecar from the refreshed atom labels. Running it
//! after rule-table changes folds the new categories into old memories; the
//! pass is idempotent on an unchanged store.

use serde::Serialize;
use sha2::{Digest, Sha256};
use tracing::info;

use crate::atomizer;
use crate::error::EngineResult;
use crate::models::Engram;
use crate::store::Store;

/// How many molecule ids an engram row retains per label.
const ENGRAM_FANOUT: i64 = 32;

/// Counts returned by a dream pass.
#[derive(Debug, Clone, Copy, Default, Serialize)]
pub struct DreamReport {
    pub retagged: usize,
    pub engrams: usize,
}

/// Re-tag default-bucketed compounds and rebuild the engram sidecar.
pub async fn dream(store: &Store) -> EngineResult<DreamReport> {
    let mut report = DreamReport::default();

    for compound in store.scan_unclassified_compounds().await? {
        let doc = atomizer::atomize(
            &compound.id,
            &compound.path,
            &compound.body,
            compound.provenance,
            compound.buckets.clone(),
            compound.timestamp,
        );
        store.put_compound_tree(&doc).await?;
        report.retagged += 1;
    }

    // Rebuild engrams: one row per atom label, digest of the normalized
    // label mapped to the molecules that carry it.
    store.clear_engrams().await?;
    for atom in store.scan_atoms().await? {
        let molecules = store
            .molecules_with_tags(std::slice::from_ref(&atom.label), ENGRAM_FANOUT)
            .await?;
        if molecules.is_empty() {
            continue;
        }
        let mut memory_ids: Vec<String> =
            molecules.into_iter().map(|m| m.molecule_id).collect();
        memory_ids.sort();

        store
            .put_engram(&Engram {
                key_digest: label_digest(&atom.label),
                memory_ids,
            })
            .await?;
        report.engrams += 1;
    }

    info!(
        "dream pass complete: {} retagged, {} engrams",
        report.retagged, report.engrams
    );
    Ok(report)
}

/// Engram key for an atom label: digest of the normalized label, matching
/// the query-side normalization in [`crate::search::engram_key_digest`].
fn label_digest(label: &str) -> String {
    let normalized = crate::store::sanitize_fts_query(label);
    let mut hasher = Sha256::new();
    hasher.update(normalized.as_bytes());
    format!("{:x}", hasher.finalize())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn label_digest_matches_query_digest() {
        // A search for the bare label must hit the engram built from it
        assert_eq!(label_digest("#technical"), crate::search::engram_key_digest("technical"));
        assert_eq!(label_digest("Orion Gateway"), crate::search::engram_key_digest("orion gateway"));
    }
}
