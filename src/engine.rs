//! The engine facade: every public operation behind one type.
//!
//! All frontends (CLI, HTTP server, embedded use) delegate to [`Engine`];
//! ingress validation happens here once, so the surfaces stay thin. The
//! engine owns the store, the generator provider, and the scribe, giving the
//! single-owner shape the concurrency model requires.

use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;
use tracing::warn;

use crate::config::Config;
use crate::db;
use crate::dream::{self, DreamReport};
use crate::error::{EngineError, EngineResult};
use crate::generator::{create_generator, Generator};
use crate::inflate;
use crate::ingest;
use crate::migrate;
use crate::models::{IngestOutcome, Provenance};
use crate::scribe::{weave, Scribe};
use crate::search::{tag_walk, ProvenanceMode, SearchOptions};
use crate::snapshot::{self, HydrateReport};
use crate::store::Store;

/// Character budget for one assembled chat prompt (≈4 chars per token).
const CHAT_PROMPT_BUDGET: usize = 8000;

/// One conversation turn, OpenAI message shape.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatTurn {
    pub role: String,
    pub content: String,
}

/// One emitted search result window.
#[derive(Debug, Clone, Serialize)]
pub struct SearchResult {
    pub id: String,
    pub source: String,
    pub timestamp: String,
    pub provenance: String,
    pub score: f64,
    pub content: String,
    pub window_start: usize,
    pub window_end: usize,
    pub is_inflated: bool,
}

/// Search response: rendered context, result windows, and accounting.
#[derive(Debug, Clone, Serialize)]
pub struct SearchResponse {
    pub context: String,
    pub results: Vec<SearchResult>,
    pub metadata: SearchMetadata,
}

#[derive(Debug, Clone, Serialize)]
pub struct SearchMetadata {
    pub max_chars: usize,
    pub provenance: String,
    pub engram_hits: usize,
    pub anchor_hits: usize,
    pub neighbor_hits: usize,
    pub emitted_chars: usize,
    pub partial: bool,
}

/// Store-level counts for the stats surface.
#[derive(Debug, Clone, Serialize)]
pub struct StatsReport {
    pub compounds: i64,
    pub molecules: i64,
    pub atoms: i64,
    pub engrams: i64,
    pub buckets: Vec<String>,
    pub generator: String,
}

/// The context engine: store + generator + scribe behind the public ops.
pub struct Engine {
    config: Config,
    store: Store,
    generator: Box<dyn Generator>,
    scribe: Scribe,
}

impl Engine {
    /// Open the database, run migrations, and apply the boot-time
    /// auto-hydration policy (an empty store restores from the newest
    /// backup; a non-empty store is left alone).
    pub async fn open(config: Config) -> EngineResult<Engine> {
        let pool = db::connect(&config.paths.db_path).await?;
        migrate::run_migrations(&pool).await?;
        let store = Store::new(pool);

        snapshot::auto_hydrate(&store, &config.paths.backups_dir).await?;

        let generator = create_generator(&config.generator)?;

        Ok(Engine {
            config,
            store,
            generator,
            scribe: Scribe::new(),
        })
    }

    pub fn store(&self) -> &Store {
        &self.store
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    // ============ ingest ============

    /// Direct ingest. `source` defaults to a digest-derived label, `kind`
    /// (provenance) to `internal`, `buckets` to `["core"]`.
    pub async fn ingest(
        &self,
        content: &str,
        source: Option<&str>,
        kind: Option<&str>,
        buckets: Option<Vec<String>>,
    ) -> EngineResult<IngestOutcome> {
        if content.trim().is_empty() {
            return Err(EngineError::BadRequest("content must not be empty".into()));
        }

        let provenance = match kind {
            None => Provenance::Internal,
            Some(raw) => Provenance::parse(raw).ok_or_else(|| {
                EngineError::BadRequest(format!(
                    "type must be internal, external, or quarantine (got '{raw}')"
                ))
            })?,
        };

        let buckets = match buckets {
            None => vec!["core".to_string()],
            Some(list) => {
                if list.is_empty() || list.iter().any(|b| b.trim().is_empty()) {
                    return Err(EngineError::BadRequest(
                        "buckets must be a non-empty list of non-empty labels".into(),
                    ));
                }
                list
            }
        };

        let derived_source;
        let source = match source {
            Some(s) if !s.trim().is_empty() => s,
            _ => {
                let digest = crate::atomizer::content_hash(content);
                derived_source = format!("direct/{}", &digest[..12]);
                derived_source.as_str()
            }
        };

        ingest::ingest_content(&self.store, content, source, provenance, buckets).await
    }

    /// Ingest one file path relative to the watched root.
    pub async fn ingest_path(&self, path: &std::path::Path) -> EngineResult<Option<IngestOutcome>> {
        ingest::ingest_file(
            &self.store,
            &self.config.paths.watched_dir,
            path,
            self.config.ingest.max_file_bytes,
        )
        .await
    }

    // ============ search ============

    pub async fn search(
        &self,
        query: &str,
        buckets: Option<Vec<String>>,
        max_chars: usize,
        provenance: Option<&str>,
    ) -> EngineResult<SearchResponse> {
        if query.trim().is_empty() {
            return Err(EngineError::BadRequest("query must not be empty".into()));
        }
        if max_chars < self.config.inflator.min_window_cap {
            return Err(EngineError::BadRequest(format!(
                "max_chars must be at least {} (got {})",
                self.config.inflator.min_window_cap, max_chars
            )));
        }

        let mode = match provenance {
            None => ProvenanceMode::All,
            Some(raw) => ProvenanceMode::parse(raw).ok_or_else(|| {
                EngineError::BadRequest(format!(
                    "provenance must be sovereign, external, or all (got '{raw}')"
                ))
            })?,
        };

        let opts = SearchOptions {
            buckets,
            scope_tags: Vec::new(),
            max_chars,
            provenance: mode,
            deadline: Duration::from_secs(self.config.retrieval.search_timeout_secs),
        };

        let walk = tag_walk(&self.store, &self.config.retrieval, query, &opts).await?;
        let inflated = inflate::inflate(
            &self.store,
            &self.config.inflator,
            &walk.hits,
            Some(max_chars),
        )
        .await?;

        let emitted_chars = inflated
            .windows
            .iter()
            .map(|w| w.content.chars().count())
            .sum();

        let results = inflated
            .windows
            .into_iter()
            .map(|w| SearchResult {
                id: w.compound_id,
                source: w.source,
                timestamp: chrono::DateTime::from_timestamp_millis(w.timestamp)
                    .map(|dt| dt.format("%Y-%m-%dT%H:%M:%SZ").to_string())
                    .unwrap_or_else(|| w.timestamp.to_string()),
                provenance: w.provenance.as_str().to_string(),
                score: w.score,
                content: w.content,
                window_start: w.window_start,
                window_end: w.window_end,
                is_inflated: w.is_inflated,
            })
            .collect();

        Ok(SearchResponse {
            context: inflated.context,
            results,
            metadata: SearchMetadata {
                max_chars,
                provenance: match mode {
                    ProvenanceMode::Sovereign => "sovereign".to_string(),
                    ProvenanceMode::External => "external".to_string(),
                    ProvenanceMode::All => "all".to_string(),
                },
                engram_hits: walk.engram_hits,
                anchor_hits: walk.anchor_hits,
                neighbor_hits: walk.neighbor_hits,
                emitted_chars,
                partial: walk.partial,
            },
        })
    }

    // ============ maintenance ============

    /// Deduplicated bucket labels, lex-sorted; `["core"]` when empty.
    pub async fn buckets(&self) -> EngineResult<Vec<String>> {
        let buckets = self.store.list_buckets().await?;
        if buckets.is_empty() {
            return Ok(vec!["core".to_string()]);
        }
        Ok(buckets)
    }

    pub async fn dream(&self) -> EngineResult<DreamReport> {
        dream::dream(&self.store).await
    }

    /// Eject a snapshot; returns the YAML document and the backup path.
    pub async fn backup(&self) -> EngineResult<(String, PathBuf)> {
        snapshot::eject(&self.store, &self.config.paths.backups_dir).await
    }

    /// Explicit hydrate from a named snapshot file.
    pub async fn restore(&self, path: &std::path::Path) -> EngineResult<HydrateReport> {
        snapshot::hydrate_from_file(&self.store, path).await
    }

    pub async fn stats(&self) -> EngineResult<StatsReport> {
        Ok(StatsReport {
            compounds: self.store.compound_count().await?,
            molecules: self.store.molecule_count().await?,
            atoms: self.store.atom_count().await?,
            engrams: self.store.engram_count().await?,
            buckets: self.buckets().await?,
            generator: self.generator.name().to_string(),
        })
    }

    // ============ scribe ============

    pub async fn scribe_update(&self, history: &[(String, String)]) -> EngineResult<String> {
        self.scribe
            .update_state(&self.store, self.generator.as_ref(), history)
            .await
    }

    pub async fn scribe_get(&self) -> EngineResult<String> {
        self.scribe.get_state(&self.store).await
    }

    pub async fn scribe_clear(&self) -> EngineResult<()> {
        self.scribe.clear_state(&self.store).await
    }

    // ============ chat ============

    /// One chat round through Context Weaving: session state, the user
    /// message, and retrieved context assemble into a single prompt for the
    /// generator. The scribe folds the exchange into the session state
    /// afterwards; a scribe failure degrades to stale state, never an error.
    pub async fn chat(&self, messages: &[ChatTurn]) -> EngineResult<String> {
        let user_message = messages
            .iter()
            .rev()
            .find(|m| m.role == "user")
            .map(|m| m.content.clone())
            .ok_or_else(|| EngineError::BadRequest("messages must include a user turn".into()))?;

        let state = self.scribe_get().await?;

        // Budget priority: session state, then the message, then retrieval
        let woven = weave(&state, &user_message);
        let context_budget = CHAT_PROMPT_BUDGET
            .saturating_sub(woven.chars().count())
            .max(self.config.inflator.min_window_cap);

        let retrieved = self
            .search(&user_message, None, context_budget, Some("all"))
            .await
            .map(|r| r.context)
            .unwrap_or_default();

        let prompt = if retrieved.is_empty() {
            woven
        } else {
            format!("{woven}\n\n[RETRIEVED CONTEXT]\n{retrieved}")
        };

        let reply = self.generator.generate(&prompt).await?;

        // Fold the exchange into the session state; stale state is fine
        let mut turns: Vec<(String, String)> = messages
            .iter()
            .map(|m| (m.role.clone(), m.content.clone()))
            .collect();
        turns.push(("assistant".to_string(), reply.clone()));
        if let Err(e) = self.scribe_update(&turns).await {
            warn!("scribe update failed, keeping previous state: {}", e);
        }

        Ok(reply)
    }
}
