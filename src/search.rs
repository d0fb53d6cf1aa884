//! Tag-Walker search: engram lookup, FTS anchors, tag harvest, neighbor walk.
//!
//! The hybrid retrieval protocol runs four phases against the store:
//!
//! 1. **Engram** — O(1) lookup of the normalized query digest. Hits enter the
//!    result set at a constant high score; engrams are a latency shortcut and
//!    may be stale, so missing ids are dropped silently.
//! 2. **Anchors** — sanitized full-text search, hydrated and filtered
//!    in-process (the authoritative bucket/scope filter), then boosted by the
//!    provenance table below.
//! 3. **Tag harvest** — the union of tags and buckets across all anchors.
//! 4. **Neighbor walk** — molecules sharing harvested tags join with an
//!    associative score of `50 + 10·overlap`.
//!
//! Provenance boost table (quarantine is always filtered out):
//!
//! | Mode        | internal | external |
//! |-------------|----------|----------|
//! | `sovereign` | ×3.0     | ×0.5     |
//! | `external`  | ×1.0     | ×1.5     |
//! | `all`       | ×2.0     | ×1.0     |
//!
//! Results merge, dedup by molecule id, and sort by score descending with
//! timestamp-then-id tie-breaks, so repeating a query on an unchanged store
//! yields identical ordering. Every search carries a deadline; on expiry the
//! phases gathered so far are returned with `partial = true`.

use sha2::{Digest, Sha256};
use std::collections::HashSet;
use std::time::{Duration, Instant};
use tracing::warn;

use crate::config::RetrievalConfig;
use crate::error::EngineResult;
use crate::models::Provenance;
use crate::query::parse_query;
use crate::store::{sanitize_fts_query, HydratedMolecule, Store};

/// Constant score for engram hits.
const ENGRAM_SCORE: f64 = 100.0;
/// Base associative score for a neighbor.
const NEIGHBOR_BASE: f64 = 50.0;
/// Per-shared-tag increment for a neighbor.
const NEIGHBOR_PER_TAG: f64 = 10.0;
/// Extra internal bias applied to neighbors in sovereign mode.
const SOVEREIGN_NEIGHBOR_BOOST: f64 = 1.5;
/// Candidate slots per 500 budget characters.
const CHARS_PER_SLOT: usize = 500;

/// Ranking mode derived from the caller's `provenance` parameter.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProvenanceMode {
    /// Internal-biased ranking (`sovereign`; `internal` is an alias).
    Sovereign,
    /// External-biased ranking.
    External,
    /// Neutral ranking.
    All,
}

impl ProvenanceMode {
    pub fn parse(s: &str) -> Option<ProvenanceMode> {
        match s {
            "sovereign" | "internal" => Some(ProvenanceMode::Sovereign),
            "external" => Some(ProvenanceMode::External),
            "all" => Some(ProvenanceMode::All),
            _ => None,
        }
    }

    /// Multiplicative boost for a record's provenance; `None` filters it out.
    fn boost(&self, provenance: Provenance) -> Option<f64> {
        match (self, provenance) {
            (_, Provenance::Quarantine) => None,
            (ProvenanceMode::Sovereign, Provenance::Internal) => Some(3.0),
            (ProvenanceMode::Sovereign, Provenance::External) => Some(0.5),
            (ProvenanceMode::External, Provenance::Internal) => Some(1.0),
            (ProvenanceMode::External, Provenance::External) => Some(1.5),
            (ProvenanceMode::All, Provenance::Internal) => Some(2.0),
            (ProvenanceMode::All, Provenance::External) => Some(1.0),
        }
    }
}

/// Caller inputs for one search.
#[derive(Debug, Clone)]
pub struct SearchOptions {
    pub buckets: Option<Vec<String>>,
    pub scope_tags: Vec<String>,
    pub max_chars: usize,
    pub provenance: ProvenanceMode,
    pub deadline: Duration,
}

/// A molecule with its final retrieval score.
#[derive(Debug, Clone)]
pub struct ScoredHit {
    pub molecule: HydratedMolecule,
    pub score: f64,
}

/// Ranked output of the Tag-Walker plus phase accounting.
#[derive(Debug, Clone, Default)]
pub struct WalkOutcome {
    pub hits: Vec<ScoredHit>,
    pub partial: bool,
    pub engram_hits: usize,
    pub anchor_hits: usize,
    pub neighbor_hits: usize,
}

impl WalkOutcome {
    fn finish(mut self) -> Self {
        // Dedup by molecule id, keeping the higher score
        let mut seen: HashSet<String> = HashSet::new();
        self.hits.sort_by(|a, b| {
            b.score
                .partial_cmp(&a.score)
                .unwrap_or(std::cmp::Ordering::Equal)
        });
        self.hits.retain(|h| seen.insert(h.molecule.molecule_id.clone()));

        self.hits.sort_by(|a, b| {
            b.score
                .partial_cmp(&a.score)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then(b.molecule.timestamp.cmp(&a.molecule.timestamp))
                .then(a.molecule.molecule_id.cmp(&b.molecule.molecule_id))
        });
        self
    }
}

/// Digest of the normalized lookup key used by the engram sidecar.
pub fn engram_key_digest(raw_query: &str) -> String {
    let normalized = sanitize_fts_query(raw_query);
    let mut hasher = Sha256::new();
    hasher.update(normalized.as_bytes());
    format!("{:x}", hasher.finalize())
}

/// Run the Tag-Walker against the store.
pub async fn tag_walk(
    store: &Store,
    retrieval: &RetrievalConfig,
    raw_query: &str,
    opts: &SearchOptions,
) -> EngineResult<WalkOutcome> {
    let started = Instant::now();
    let parsed = parse_query(raw_query);

    // Bucket selectors in the query merge with the caller's filter
    let mut bucket_filter: Option<Vec<String>> = opts.buckets.clone();
    if !parsed.buckets.is_empty() {
        let merged = bucket_filter.get_or_insert_with(Vec::new);
        for bucket in &parsed.buckets {
            if !merged.contains(bucket) {
                merged.push(bucket.clone());
            }
        }
    }

    let total_target = (opts.max_chars.div_ceil(CHARS_PER_SLOT)).max(1);
    let anchor_target = ((total_target * 7).div_ceil(10)).max(1);
    let neighbor_target = total_target.saturating_sub(anchor_target);

    let mut outcome = WalkOutcome::default();

    // ── Phase 1: engram lookup ──────────────────────────────────────
    if let Some(engram) = store.get_engram(&engram_key_digest(raw_query)).await? {
        let hydrated = store.hydrate_molecules(&engram.memory_ids).await?;
        for molecule in hydrated {
            if !passes_filters(&molecule, &bucket_filter, &opts.scope_tags) {
                continue;
            }
            if opts.provenance.boost(molecule.provenance).is_none() {
                continue;
            }
            outcome.hits.push(ScoredHit {
                molecule,
                score: ENGRAM_SCORE,
            });
        }
        outcome.engram_hits = outcome.hits.len();
    }

    if started.elapsed() >= opts.deadline {
        outcome.partial = true;
        return Ok(outcome.finish());
    }

    // ── Phase 2: FTS anchors ────────────────────────────────────────
    let fts_text = parsed.fts_text();
    let k = retrieval.fts_base_k.max(2 * total_target as i64);

    let mut anchors: Vec<ScoredHit> = Vec::new();
    match store.fts_search(&fts_text, k).await {
        Ok(candidates) => {
            let ids: Vec<String> = candidates.iter().map(|(id, _)| id.clone()).collect();
            let scores: std::collections::HashMap<&str, f64> = candidates
                .iter()
                .map(|(id, score)| (id.as_str(), *score))
                .collect();
            // Hydration drops ids that vanished since the FTS pass; align by id
            let hydrated = store.hydrate_molecules(&ids).await?;
            for molecule in hydrated {
                let Some(raw_score) = scores.get(molecule.molecule_id.as_str()) else {
                    continue;
                };
                if !passes_filters(&molecule, &bucket_filter, &opts.scope_tags) {
                    continue;
                }
                let Some(boost) = opts.provenance.boost(molecule.provenance) else {
                    continue;
                };
                anchors.push(ScoredHit {
                    molecule,
                    score: raw_score * boost,
                });
            }
        }
        Err(e) => {
            // FTS unavailable: degrade to the linear substring scan
            warn!("FTS search failed ({}), falling back to linear scan", e);
            let scanned = store.substring_scan(&fts_text).await?;
            for molecule in scanned {
                if !passes_filters(&molecule, &bucket_filter, &opts.scope_tags) {
                    continue;
                }
                let Some(boost) = opts.provenance.boost(molecule.provenance) else {
                    continue;
                };
                anchors.push(ScoredHit {
                    molecule,
                    score: boost,
                });
            }
        }
    }

    anchors.sort_by(|a, b| {
        b.score
            .partial_cmp(&a.score)
            .unwrap_or(std::cmp::Ordering::Equal)
    });
    anchors.truncate(10usize.max(2 * anchor_target));
    outcome.anchor_hits = anchors.len();

    // ── Phase 3: tag harvest ────────────────────────────────────────
    let mut harvested: Vec<String> = Vec::new();
    for anchor in &anchors {
        for label in anchor.molecule.tags.iter().chain(anchor.molecule.buckets.iter()) {
            if !harvested.contains(label) {
                harvested.push(label.clone());
            }
        }
    }

    let known_ids: HashSet<String> = outcome
        .hits
        .iter()
        .chain(anchors.iter())
        .map(|h| h.molecule.molecule_id.clone())
        .collect();
    outcome.hits.extend(anchors);

    if started.elapsed() >= opts.deadline {
        outcome.partial = true;
        return Ok(outcome.finish());
    }

    // ── Phase 4: neighbor walk ──────────────────────────────────────
    if neighbor_target > 0 && !harvested.is_empty() {
        let fetch_limit = ((neighbor_target * 10).max(100)) as i64;
        let candidates = store.molecules_with_tags(&harvested, fetch_limit).await?;

        let mut neighbors: Vec<ScoredHit> = Vec::new();
        for molecule in candidates {
            if known_ids.contains(&molecule.molecule_id) {
                continue;
            }
            if !passes_filters(&molecule, &bucket_filter, &opts.scope_tags) {
                continue;
            }
            if opts.provenance.boost(molecule.provenance).is_none() {
                continue;
            }
            let overlap = molecule
                .tags
                .iter()
                .filter(|t| harvested.contains(t))
                .count();
            if overlap == 0 {
                continue;
            }
            let mut score = NEIGHBOR_BASE + NEIGHBOR_PER_TAG * overlap as f64;
            if opts.provenance == ProvenanceMode::Sovereign {
                score *= SOVEREIGN_NEIGHBOR_BOOST;
            }
            neighbors.push(ScoredHit { molecule, score });
        }

        neighbors.sort_by(|a, b| {
            b.score
                .partial_cmp(&a.score)
                .unwrap_or(std::cmp::Ordering::Equal)
        });
        neighbors.truncate(neighbor_target);
        outcome.neighbor_hits = neighbors.len();
        outcome.hits.extend(neighbors);
    }

    Ok(outcome.finish())
}

/// The authoritative in-process filter: bucket intersection and scope tags.
/// The store queries return supersets; this decides membership.
fn passes_filters(
    molecule: &HydratedMolecule,
    bucket_filter: &Option<Vec<String>>,
    scope_tags: &[String],
) -> bool {
    if let Some(wanted) = bucket_filter {
        if !wanted.is_empty() && !molecule.buckets.iter().any(|b| wanted.contains(b)) {
            return false;
        }
    }
    if !scope_tags.is_empty() && !molecule.tags.iter().any(|t| scope_tags.contains(t)) {
        return false;
    }
    true
}

#[cfg(test)]
mod tests {
    use super::*;

    fn molecule(id: &str, buckets: &[&str], tags: &[&str], provenance: Provenance) -> HydratedMolecule {
        HydratedMolecule {
            molecule_id: id.to_string(),
            compound_id: "c".to_string(),
            start_byte: 0,
            end_byte: 10,
            content: "0123456789".to_string(),
            tags: tags.iter().map(|s| s.to_string()).collect(),
            source: "a.md".to_string(),
            timestamp: 1,
            provenance,
            buckets: buckets.iter().map(|s| s.to_string()).collect(),
        }
    }

    #[test]
    fn provenance_table_matches_modes() {
        use Provenance::*;
        assert_eq!(ProvenanceMode::Sovereign.boost(Internal), Some(3.0));
        assert_eq!(ProvenanceMode::Sovereign.boost(External), Some(0.5));
        assert_eq!(ProvenanceMode::External.boost(Internal), Some(1.0));
        assert_eq!(ProvenanceMode::External.boost(External), Some(1.5));
        assert_eq!(ProvenanceMode::All.boost(Internal), Some(2.0));
        assert_eq!(ProvenanceMode::All.boost(External), Some(1.0));
        for mode in [
            ProvenanceMode::Sovereign,
            ProvenanceMode::External,
            ProvenanceMode::All,
        ] {
            assert_eq!(mode.boost(Quarantine), None);
        }
    }

    #[test]
    fn internal_is_an_alias_for_sovereign() {
        assert_eq!(ProvenanceMode::parse("internal"), Some(ProvenanceMode::Sovereign));
        assert_eq!(ProvenanceMode::parse("sovereign"), Some(ProvenanceMode::Sovereign));
        assert_eq!(ProvenanceMode::parse("loud"), None);
    }

    #[test]
    fn bucket_filter_is_authoritative() {
        let m = molecule("m1", &["notes"], &[], Provenance::Internal);
        assert!(passes_filters(&m, &Some(vec!["notes".into()]), &[]));
        assert!(!passes_filters(&m, &Some(vec!["work".into()]), &[]));
        assert!(passes_filters(&m, &None, &[]));
    }

    #[test]
    fn scope_tags_require_intersection() {
        let m = molecule("m1", &["core"], &["#technical"], Provenance::Internal);
        assert!(passes_filters(&m, &None, &["#technical".to_string()]));
        assert!(!passes_filters(&m, &None, &["#emotional".to_string()]));
    }

    #[test]
    fn ranking_is_deterministic_on_ties() {
        let mut outcome = WalkOutcome::default();
        for id in ["m2", "m1", "m3"] {
            outcome.hits.push(ScoredHit {
                molecule: molecule(id, &["core"], &[], Provenance::Internal),
                score: 5.0,
            });
        }
        let ranked = outcome.finish();
        let ids: Vec<&str> = ranked.hits.iter().map(|h| h.molecule.molecule_id.as_str()).collect();
        assert_eq!(ids, vec!["m1", "m2", "m3"]);
    }

    #[test]
    fn dedup_keeps_highest_score() {
        let mut outcome = WalkOutcome::default();
        outcome.hits.push(ScoredHit {
            molecule: molecule("m1", &["core"], &[], Provenance::Internal),
            score: 10.0,
        });
        outcome.hits.push(ScoredHit {
            molecule: molecule("m1", &["core"], &[], Provenance::Internal),
            score: 90.0,
        });
        let ranked = outcome.finish();
        assert_eq!(ranked.hits.len(), 1);
        assert!((ranked.hits[0].score - 90.0).abs() < f64::EPSILON);
    }

    #[test]
    fn engram_digest_normalizes_queries() {
        assert_eq!(engram_key_digest("Hello,   World!"), engram_key_digest("hello world"));
        assert_ne!(engram_key_digest("alpha"), engram_key_digest("beta"));
    }
}
