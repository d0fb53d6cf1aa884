//! End-to-end scenarios against the embedded engine API.
//!
//! Each test boots a fresh engine over a temporary directory, so the suite
//! exercises the real store, atomizer, Tag-Walker, and inflator together.

use std::path::Path;
use tempfile::TempDir;

use context_engine::config::Config;
use context_engine::engine::Engine;
use context_engine::error::EngineError;
use context_engine::models::IngestStatus;

fn test_config(root: &Path) -> Config {
    let mut config = Config::default();
    config.paths.watched_dir = root.join("context");
    config.paths.db_path = root.join("engine/context.db");
    config.paths.backups_dir = root.join("backups");
    config.paths.models_dir = root.join("models");
    config
}

async fn open_engine(root: &Path) -> Engine {
    Engine::open(test_config(root)).await.expect("engine open")
}

#[tokio::test]
async fn ingest_then_search_hit() {
    let tmp = TempDir::new().unwrap();
    let engine = open_engine(tmp.path()).await;

    let outcome = engine
        .ingest(
            "The ECE stores memory in a graph.",
            Some("a.md"),
            None,
            Some(vec!["notes".to_string()]),
        )
        .await
        .unwrap();
    assert_eq!(outcome.status, IngestStatus::Inserted);

    let response = engine
        .search("ECE", Some(vec!["notes".to_string()]), 500, Some("all"))
        .await
        .unwrap();

    assert_eq!(response.results.len(), 1);
    assert!(response.results[0].score > 0.0);
    assert_eq!(response.results[0].source, "a.md");
    assert!(response.context.contains("ECE"));
}

#[tokio::test]
async fn duplicate_content_is_skipped_with_same_id() {
    let tmp = TempDir::new().unwrap();
    let engine = open_engine(tmp.path()).await;

    let first = engine
        .ingest("identical content for dedup", Some("a.md"), None, None)
        .await
        .unwrap();
    let second = engine
        .ingest("identical content for dedup", Some("a.md"), None, None)
        .await
        .unwrap();

    assert_eq!(first.status, IngestStatus::Inserted);
    assert_eq!(second.status, IngestStatus::Skipped);
    assert_eq!(first.id, second.id);

    // Dedup is global: a different source with the same content also skips
    let third = engine
        .ingest("identical content for dedup", Some("b.md"), None, None)
        .await
        .unwrap();
    assert_eq!(third.status, IngestStatus::Skipped);
    assert_eq!(third.id, first.id);
}

#[tokio::test]
async fn bucket_isolation() {
    let tmp = TempDir::new().unwrap();
    let engine = open_engine(tmp.path()).await;

    engine
        .ingest(
            "alpha alignment note one",
            Some("a1.md"),
            None,
            Some(vec!["A".to_string()]),
        )
        .await
        .unwrap();
    engine
        .ingest(
            "alpha alignment note two",
            Some("b1.md"),
            None,
            Some(vec!["B".to_string()]),
        )
        .await
        .unwrap();

    let response = engine
        .search("alpha", Some(vec!["A".to_string()]), 500, Some("all"))
        .await
        .unwrap();

    assert!(!response.results.is_empty());
    for result in &response.results {
        assert_eq!(result.source, "a1.md", "bucket B content leaked into A");
    }
}

#[tokio::test]
async fn provenance_bias_orders_results() {
    let tmp = TempDir::new().unwrap();
    let engine = open_engine(tmp.path()).await;

    // Same token shape so raw FTS scores tie; only provenance differs
    engine
        .ingest(
            "shared planning note alpha",
            Some("internal.md"),
            Some("internal"),
            None,
        )
        .await
        .unwrap();
    engine
        .ingest(
            "shared planning note gamma",
            Some("external.md"),
            Some("external"),
            None,
        )
        .await
        .unwrap();

    let sovereign = engine
        .search("shared", None, 1000, Some("sovereign"))
        .await
        .unwrap();
    assert!(sovereign.results.len() >= 2);
    assert_eq!(sovereign.results[0].provenance, "internal");

    let external = engine
        .search("shared", None, 1000, Some("external"))
        .await
        .unwrap();
    assert!(external.results.len() >= 2);
    assert_eq!(external.results[0].provenance, "external");
}

#[tokio::test]
async fn quarantine_is_never_returned() {
    let tmp = TempDir::new().unwrap();
    let engine = open_engine(tmp.path()).await;

    engine
        .ingest(
            "hazardous quarantined content",
            Some("q.md"),
            Some("quarantine"),
            None,
        )
        .await
        .unwrap();

    for mode in ["sovereign", "external", "all"] {
        let response = engine
            .search("quarantined", None, 500, Some(mode))
            .await
            .unwrap();
        assert!(
            response.results.is_empty(),
            "quarantined content surfaced in {mode} mode"
        );
    }
}

#[tokio::test]
async fn inflator_respects_character_budget() {
    let tmp = TempDir::new().unwrap();
    let engine = open_engine(tmp.path()).await;

    // ~5000-char compound with the needle scattered through it
    let filler = "This sentence is plain filler text for the inflator test. ";
    let mut body = String::new();
    while body.len() < 5000 {
        if body.len() >= 100 && !body.contains("needle one") {
            body.push_str("Here hides needle one in the body. ");
        } else if body.len() >= 2500 && !body.contains("needle two") {
            body.push_str("Here hides needle two in the body. ");
        } else if body.len() >= 4800 && !body.contains("needle three") {
            body.push_str("Here hides needle three in the body. ");
        } else {
            body.push_str(filler);
        }
    }

    engine
        .ingest(&body, Some("big.md"), None, None)
        .await
        .unwrap();

    let response = engine.search("needle", None, 2000, Some("all")).await.unwrap();

    assert!(!response.results.is_empty());
    assert!(response.results.len() <= 3);

    let total: usize = response
        .results
        .iter()
        .map(|r| r.content.chars().count())
        .sum();
    assert!(total <= 2000, "emitted {total} chars over the 2000 budget");

    for result in &response.results {
        assert!(result.is_inflated);
        // Window floor holds unless density mode forced truncation
        assert!(result.content.chars().count() >= 150);
    }
}

#[tokio::test]
async fn snapshot_round_trip_restores_bodies() {
    let tmp = TempDir::new().unwrap();

    let bodies = [
        "First compound body for the round trip. It has two sentences.",
        "Second compound body with different content entirely inside it.",
        "Third compound body, the final one of the snapshot test trio.",
    ];

    let original = {
        let engine = open_engine(tmp.path()).await;
        for (i, body) in bodies.iter().enumerate() {
            engine
                .ingest(body, Some(&format!("doc{i}.md")), None, None)
                .await
                .unwrap();
        }
        engine.backup().await.unwrap();
        let mut compounds = engine.store().scan_compounds().await.unwrap();
        compounds.sort_by(|a, b| a.id.cmp(&b.id));
        compounds
    };

    // Wipe the database; boot again and let auto-hydration restore
    std::fs::remove_dir_all(tmp.path().join("engine")).unwrap();
    let engine = open_engine(tmp.path()).await;

    let mut restored = engine.store().scan_compounds().await.unwrap();
    restored.sort_by(|a, b| a.id.cmp(&b.id));

    assert_eq!(restored.len(), original.len());
    for (a, b) in original.iter().zip(restored.iter()) {
        assert_eq!(a.id, b.id);
        assert_eq!(a.body, b.body, "compound body must round-trip byte-exactly");
        assert_eq!(a.hash, b.hash);
        assert_eq!(a.timestamp, b.timestamp);
        assert_eq!(a.buckets, b.buckets);
    }

    // Molecules re-derive and still hit
    let response = engine.search("snapshot test trio", None, 500, Some("all")).await.unwrap();
    assert!(!response.results.is_empty());
}

#[tokio::test]
async fn auto_hydration_skips_non_empty_store() {
    let tmp = TempDir::new().unwrap();

    {
        let engine = open_engine(tmp.path()).await;
        engine
            .ingest("original resident content", Some("a.md"), None, None)
            .await
            .unwrap();
        engine.backup().await.unwrap();
        engine
            .ingest("content added after the backup", Some("b.md"), None, None)
            .await
            .unwrap();
    }

    // Store is non-empty: boot must not roll back to the snapshot
    let engine = open_engine(tmp.path()).await;
    assert_eq!(engine.store().compound_count().await.unwrap(), 2);
}

#[tokio::test]
async fn empty_query_and_small_budget_are_rejected() {
    let tmp = TempDir::new().unwrap();
    let engine = open_engine(tmp.path()).await;

    let err = engine.search("  ", None, 500, Some("all")).await.unwrap_err();
    assert!(matches!(err, EngineError::BadRequest(_)));
    assert!(err.to_string().starts_with("bad request:"));

    let err = engine.search("ok", None, 10, Some("all")).await.unwrap_err();
    assert!(matches!(err, EngineError::BadRequest(_)));

    let err = engine.search("ok", None, 500, Some("bogus")).await.unwrap_err();
    assert!(matches!(err, EngineError::BadRequest(_)));
}

#[tokio::test]
async fn empty_content_and_empty_buckets_are_rejected() {
    let tmp = TempDir::new().unwrap();
    let engine = open_engine(tmp.path()).await;

    assert!(matches!(
        engine.ingest("", None, None, None).await.unwrap_err(),
        EngineError::BadRequest(_)
    ));
    assert!(matches!(
        engine
            .ingest("fine", None, None, Some(vec![]))
            .await
            .unwrap_err(),
        EngineError::BadRequest(_)
    ));
    assert!(matches!(
        engine
            .ingest("fine", None, Some("sideways"), None)
            .await
            .unwrap_err(),
        EngineError::BadRequest(_)
    ));
}

#[tokio::test]
async fn zero_match_query_returns_empty_success() {
    let tmp = TempDir::new().unwrap();
    let engine = open_engine(tmp.path()).await;

    engine
        .ingest("some indexed content", Some("a.md"), None, None)
        .await
        .unwrap();

    let response = engine
        .search("xyzzyplugh", None, 500, Some("all"))
        .await
        .unwrap();
    assert!(response.results.is_empty());
    assert_eq!(response.context, "");
}

#[tokio::test]
async fn buckets_reflect_ingested_union() {
    let tmp = TempDir::new().unwrap();
    let engine = open_engine(tmp.path()).await;

    // Empty store still reports core
    assert_eq!(engine.buckets().await.unwrap(), vec!["core".to_string()]);

    engine
        .ingest("note one", Some("a.md"), None, Some(vec!["work".to_string()]))
        .await
        .unwrap();
    engine
        .ingest(
            "note two",
            Some("b.md"),
            None,
            Some(vec!["archive".to_string(), "work".to_string()]),
        )
        .await
        .unwrap();
    engine.ingest("note three", Some("c.md"), None, None).await.unwrap();

    assert_eq!(
        engine.buckets().await.unwrap(),
        vec!["archive".to_string(), "core".to_string(), "work".to_string()]
    );
}

#[tokio::test]
async fn changed_path_content_replaces_under_same_id() {
    let tmp = TempDir::new().unwrap();
    let engine = open_engine(tmp.path()).await;

    let first = engine
        .ingest("original version of the note", Some("a.md"), None, None)
        .await
        .unwrap();
    let second = engine
        .ingest("revised version of the note", Some("a.md"), None, None)
        .await
        .unwrap();

    assert_eq!(first.id, second.id, "path-stable id must survive edits");
    assert_eq!(second.status, IngestStatus::Inserted);
    assert_eq!(engine.store().compound_count().await.unwrap(), 1);

    let compound = engine.store().get_compound(&first.id).await.unwrap().unwrap();
    assert!(compound.body.contains("revised"));
}

#[tokio::test]
async fn molecule_coordinates_slice_the_body_exactly() {
    let tmp = TempDir::new().unwrap();
    let engine = open_engine(tmp.path()).await;

    let outcome = engine
        .ingest(
            "The first sentence anchors the compound body. The second sentence extends it further. The third closes the document completely.",
            Some("slice.md"),
            None,
            None,
        )
        .await
        .unwrap();

    let compound = engine.store().get_compound(&outcome.id).await.unwrap().unwrap();
    let molecules = engine
        .store()
        .molecules_for_compound(&outcome.id)
        .await
        .unwrap();

    assert!(!molecules.is_empty());
    for m in &molecules {
        let start = m.start_byte as usize;
        let end = m.end_byte as usize;
        assert!(start < end && end <= compound.body.len());
        assert_eq!(m.content, &compound.body[start..end]);
    }
    // Molecules tile the body with shared boundaries
    assert_eq!(molecules[0].start_byte, 0);
    assert_eq!(molecules.last().unwrap().end_byte as usize, compound.body.len());
    for pair in molecules.windows(2) {
        assert_eq!(pair[0].end_byte, pair[1].start_byte);
    }
}

#[tokio::test]
async fn dream_reports_and_builds_engrams() {
    let tmp = TempDir::new().unwrap();
    let engine = open_engine(tmp.path()).await;

    engine
        .ingest(
            "We must deploy the database server after the meeting.",
            Some("a.md"),
            None,
            None,
        )
        .await
        .unwrap();

    let report = engine.dream().await.unwrap();
    assert_eq!(report.retagged, 1);
    assert!(report.engrams > 0);

    // The engram path now serves label queries at a constant high score
    let response = engine.search("technical", None, 500, Some("all")).await.unwrap();
    assert!(response.metadata.engram_hits > 0 || !response.results.is_empty());
}

#[tokio::test]
async fn scribe_state_is_empty_and_clearable_without_generator() {
    let tmp = TempDir::new().unwrap();
    let engine = open_engine(tmp.path()).await;

    assert_eq!(engine.scribe_get().await.unwrap(), "");

    // With the generator disabled, an update fails and leaves no state
    let err = engine
        .scribe_update(&[("user".to_string(), "hello".to_string())])
        .await
        .unwrap_err();
    assert!(matches!(err, EngineError::Generator(_)));
    assert_eq!(engine.scribe_get().await.unwrap(), "");

    engine.scribe_clear().await.unwrap();
}

#[tokio::test]
async fn search_repeats_identically_on_unchanged_store() {
    let tmp = TempDir::new().unwrap();
    let engine = open_engine(tmp.path()).await;

    for i in 0..5 {
        engine
            .ingest(
                &format!("repeated ranking subject number {i} with shared terms"),
                Some(&format!("r{i}.md")),
                None,
                None,
            )
            .await
            .unwrap();
    }

    let first = engine.search("shared terms", None, 2000, Some("all")).await.unwrap();
    let second = engine.search("shared terms", None, 2000, Some("all")).await.unwrap();

    let ids: Vec<&str> = first.results.iter().map(|r| r.id.as_str()).collect();
    let ids2: Vec<&str> = second.results.iter().map(|r| r.id.as_str()).collect();
    assert_eq!(ids, ids2, "search must be monotone on an unchanged store");
}
