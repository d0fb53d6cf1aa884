//! Context Inflator: molecule hits → coherent, budget-capped reading windows.
//!
//! Scattered hits rarely make good LLM context on their own. The inflator
//! groups them by compound, merges hits that sit close together in the body,
//! pads each merged span with surrounding text, caps the result around the
//! hit centroid, and re-hydrates the final window from the compound body
//! (the authoritative source) rather than trusting stored molecule copies.
//!
//! # Dynamic density
//!
//! Window sizing adapts to the caller's total character budget `B` over `n`
//! hits:
//!
//! - `n · MIN_VIABLE_SIZE > B`: the hit list is truncated to
//!   `⌊B / MIN_VIABLE_SIZE⌋` and every window gets exactly
//!   `MIN_VIABLE_SIZE` characters.
//! - otherwise each window targets `B / n`, padded by half the target
//!   (clamped to `[MIN_PADDING, MAX_PADDING]`).
//!
//! The emitted total never exceeds the budget, and no window is smaller than
//! `MIN_WINDOW_CAP` unless density mode forced truncation.

use std::collections::HashMap;

use crate::config::InflatorConfig;
use crate::error::EngineResult;
use crate::models::Provenance;
use crate::search::ScoredHit;
use crate::store::Store;

/// Static budget used when the caller supplies none.
const STATIC_FALLBACK_BUDGET: usize = 2500;

/// One inflated reading window, hydrated from its compound body.
#[derive(Debug, Clone)]
pub struct InflatedWindow {
    pub compound_id: String,
    pub source: String,
    pub timestamp: i64,
    pub provenance: Provenance,
    pub score: f64,
    /// Byte range of the window within the compound body.
    pub window_start: usize,
    pub window_end: usize,
    /// Window text, with `...` affixes when clipped from a larger body.
    pub content: String,
    pub is_inflated: bool,
}

/// Inflation output: the windows kept under budget plus the rendered context.
#[derive(Debug, Clone, Default)]
pub struct InflationResult {
    pub windows: Vec<InflatedWindow>,
    pub context: String,
}

/// A merged, padded, capped span before hydration.
#[derive(Debug, Clone, PartialEq)]
struct PlannedWindow {
    start: usize,
    end: usize,
    score: f64,
}

/// Inflate ranked hits into reading windows under `budget` characters.
///
/// `hits` must arrive sorted by score descending (the Tag-Walker's output
/// order); the density truncation keeps the best-scoring hits.
pub async fn inflate(
    store: &Store,
    cfg: &InflatorConfig,
    hits: &[ScoredHit],
    budget: Option<usize>,
) -> EngineResult<InflationResult> {
    if hits.is_empty() {
        return Ok(InflationResult::default());
    }

    let total_budget = budget.unwrap_or(STATIC_FALLBACK_BUDGET);

    // Dynamic density: shrink the result set before shrinking the windows
    let mut kept: Vec<&ScoredHit> = hits.iter().collect();
    let forced = kept.len() * cfg.min_viable_size > total_budget;
    let target_window = if forced {
        kept.truncate((total_budget / cfg.min_viable_size).max(1));
        cfg.min_viable_size
    } else {
        total_budget / kept.len()
    };
    let target_padding = (target_window / 2).clamp(cfg.min_padding, cfg.max_padding);

    // Group by compound, preserving the best score per group member
    let mut by_compound: HashMap<&str, Vec<&ScoredHit>> = HashMap::new();
    for hit in kept {
        by_compound
            .entry(hit.molecule.compound_id.as_str())
            .or_default()
            .push(hit);
    }

    let mut windows: Vec<InflatedWindow> = Vec::new();
    for (compound_id, group) in by_compound {
        let Some(compound) = store.get_compound(compound_id).await? else {
            continue;
        };

        let spans: Vec<(usize, usize, f64)> = group
            .iter()
            .map(|h| {
                (
                    h.molecule.start_byte as usize,
                    h.molecule.end_byte as usize,
                    h.score,
                )
            })
            .collect();

        let planned = merge_and_size(
            &spans,
            compound.body.len(),
            target_window,
            target_padding,
            cfg.merge_threshold,
            cfg.min_window_cap,
            forced,
        );

        for plan in planned {
            let start = snap_back(&compound.body, plan.start);
            let end = snap_back(&compound.body, plan.end);
            if start >= end {
                continue;
            }
            let mut content = String::new();
            if start > 0 {
                content.push_str("...");
            }
            content.push_str(&compound.body[start..end]);
            if end < compound.body.len() {
                content.push_str("...");
            }

            windows.push(InflatedWindow {
                compound_id: compound.id.clone(),
                source: compound.path.clone(),
                timestamp: compound.timestamp,
                provenance: compound.provenance,
                score: plan.score,
                window_start: start,
                window_end: end,
                content,
                is_inflated: true,
            });
        }
    }

    // Final pass: emit in score order, never exceeding the budget
    windows.sort_by(|a, b| {
        b.score
            .partial_cmp(&a.score)
            .unwrap_or(std::cmp::Ordering::Equal)
            .then(b.timestamp.cmp(&a.timestamp))
            .then(a.compound_id.cmp(&b.compound_id))
    });

    let mut result = InflationResult::default();
    let mut emitted_chars = 0usize;
    for window in windows {
        let len = window.content.chars().count();
        if emitted_chars + len > total_budget {
            continue;
        }
        emitted_chars += len;

        let timestamp = chrono::DateTime::from_timestamp_millis(window.timestamp)
            .map(|dt| dt.format("%Y-%m-%dT%H:%M:%SZ").to_string())
            .unwrap_or_else(|| window.timestamp.to_string());
        result.context.push_str(&format!(
            "[Source: {}](Timestamp: {})\n{}\n\n",
            window.source, timestamp, window.content
        ));
        result.windows.push(window);
    }

    Ok(result)
}

/// Merge proximate spans, pad, enforce the window floor, and cap around the
/// hit centroid. Pure; operates on byte offsets within one compound body.
fn merge_and_size(
    spans: &[(usize, usize, f64)],
    body_len: usize,
    target_window: usize,
    target_padding: usize,
    merge_threshold: usize,
    min_window_cap: usize,
    forced: bool,
) -> Vec<PlannedWindow> {
    if spans.is_empty() || body_len == 0 {
        return Vec::new();
    }

    let mut sorted: Vec<(usize, usize, f64)> = spans.to_vec();
    sorted.sort_by_key(|(start, _, _)| *start);

    // Linear merge scan: groups of spans closer than the threshold
    struct Group {
        start: usize,
        end: usize,
        score: f64,
        centroid_sum: usize,
        members: usize,
    }
    let mut groups: Vec<Group> = Vec::new();
    for (start, end, score) in sorted {
        match groups.last_mut() {
            Some(group) if start.saturating_sub(group.end) < merge_threshold => {
                group.end = group.end.max(end);
                group.score = group.score.max(score);
                group.centroid_sum += (start + end) / 2;
                group.members += 1;
            }
            _ => groups.push(Group {
                start,
                end,
                score,
                centroid_sum: (start + end) / 2,
                members: 1,
            }),
        }
    }

    let floor = if forced { 0 } else { min_window_cap };

    groups
        .into_iter()
        .map(|group| {
            let centroid = group.centroid_sum / group.members;
            let mut start = group.start.saturating_sub(target_padding);
            let mut end = (group.end + target_padding).min(body_len);

            // Enforce the window floor where the body allows it
            if end - start < floor {
                let deficit = floor - (end - start);
                let grow_left = (deficit / 2).min(start);
                start -= grow_left;
                end = (end + (deficit - grow_left)).min(body_len);
            }

            // Cap oversized windows symmetrically around the hit centroid
            if end - start > target_window {
                let half = target_window / 2;
                start = centroid.saturating_sub(half).max(
                    // never drift past the original window edges
                    group.start.saturating_sub(target_padding),
                );
                end = (start + target_window).min(body_len);
                start = end.saturating_sub(target_window);
            }

            PlannedWindow {
                start,
                end,
                score: group.score,
            }
        })
        .collect()
}

/// Snap a byte offset back to the nearest UTF-8 boundary at or before it.
fn snap_back(body: &str, mut idx: usize) -> usize {
    idx = idx.min(body.len());
    while idx > 0 && !body.is_char_boundary(idx) {
        idx -= 1;
    }
    idx
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn proximate_spans_merge() {
        // Two hits 100 bytes apart with a 500 threshold: one window
        let planned = merge_and_size(&[(100, 150, 2.0), (250, 300, 5.0)], 5000, 1000, 100, 500, 200, false);
        assert_eq!(planned.len(), 1);
        assert!((planned[0].score - 5.0).abs() < f64::EPSILON);
        assert!(planned[0].start <= 100);
        assert!(planned[0].end >= 300);
    }

    #[test]
    fn distant_spans_stay_separate() {
        let planned = merge_and_size(&[(0, 50, 1.0), (3000, 3050, 1.0)], 5000, 600, 100, 500, 200, false);
        assert_eq!(planned.len(), 2);
    }

    #[test]
    fn windows_respect_the_floor() {
        let planned = merge_and_size(&[(2500, 2510, 1.0)], 5000, 600, 50, 500, 200, false);
        assert_eq!(planned.len(), 1);
        assert!(planned[0].end - planned[0].start >= 200);
    }

    #[test]
    fn forced_mode_allows_small_windows() {
        let planned = merge_and_size(&[(2500, 2510, 1.0)], 5000, 150, 50, 500, 200, true);
        assert_eq!(planned.len(), 1);
        assert!(planned[0].end - planned[0].start <= 150);
    }

    #[test]
    fn oversized_windows_cap_around_centroid() {
        let planned = merge_and_size(&[(2000, 2900, 1.0)], 10000, 400, 500, 500, 200, false);
        assert_eq!(planned.len(), 1);
        let width = planned[0].end - planned[0].start;
        assert!(width <= 400, "width {} exceeds cap", width);
        // The capped window still covers the span centroid
        let centroid = 2450;
        assert!(planned[0].start <= centroid && centroid <= planned[0].end);
    }

    #[test]
    fn windows_never_leave_the_body() {
        let planned = merge_and_size(&[(10, 30, 1.0), (4980, 4999, 1.0)], 5000, 600, 500, 500, 200, false);
        for plan in &planned {
            assert!(plan.end <= 5000);
        }
    }

    #[test]
    fn empty_input_plans_nothing() {
        assert!(merge_and_size(&[], 1000, 500, 100, 500, 200, false).is_empty());
        assert!(merge_and_size(&[(0, 10, 1.0)], 0, 500, 100, 500, 200, false).is_empty());
    }

    #[test]
    fn snap_back_lands_on_char_boundaries() {
        let body = "aé中z";
        for idx in 0..=body.len() {
            let snapped = snap_back(body, idx);
            assert!(body.is_char_boundary(snapped));
            assert!(snapped <= idx);
        }
    }
}
