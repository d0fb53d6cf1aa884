//! # Context Engine
//!
//! **A local-first context engine: atomic ingestion, hybrid retrieval, and
//! budget-aware context inflation for a local language model.**
//!
//! The engine watches a directory of heterogeneous text (notes, code, YAML,
//! Markdown), decomposes each document into a three-level atomic taxonomy
//! (Compound → Molecule → Atom) inside an embedded SQLite store, and answers
//! retrieval queries with token-budgeted, context-inflated evidence windows.
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────┐   ┌─────────────┐   ┌───────────────┐
//! │  Watcher /  │──▶│  Atomizer    │──▶│    SQLite     │
//! │ direct API  │   │ sanitize+split│   │ FTS5 + graph │
//! └─────────────┘   └─────────────┘   └──────┬────────┘
//!                                           │
//!                  ┌────────────────────────┤
//!                  ▼                        ▼
//!            ┌──────────┐            ┌──────────┐
//!            │Tag-Walker │──windows──▶│ Inflator │──▶ caller
//!            └──────────┘            └──────────┘
//!                  ▲
//!        chat ─────┴── Scribe (rolling session state) ──▶ generator
//! ```
//!
//! ## Data flow
//!
//! 1. The **watcher** ([`watcher`]) debounces file writes and feeds the
//!    **ingestor** ([`ingest`]), which deduplicates by content hash and
//!    assigns path-stable ids.
//! 2. The **atomizer** ([`atomizer`]) sanitizes the text and splits it into
//!    molecules with byte-accurate coordinates; [`atoms`] tags each molecule
//!    with category and entity atoms.
//! 3. The **Tag-Walker** ([`search`]) answers queries with an engram lookup,
//!    FTS anchors, a tag harvest, and a graph-associative neighbor walk,
//!    ranked under a provenance bias table.
//! 4. The **inflator** ([`inflate`]) merges and pads molecule hits into
//!    coherent windows under the caller's character budget.
//! 5. The **scribe** ([`scribe`]) maintains a rolling compressed session
//!    summary woven into every generation prompt.
//! 6. **Snapshots** ([`snapshot`]) eject the store to a portable YAML file
//!    and hydrate it back on boot.
//!
//! ## Quick start
//!
//! ```bash
//! ctxe init                          # create the database
//! ctxe ingest ./context             # backfill a directory
//! ctxe watch                         # watch for changes
//! ctxe search "deploy checklist" --buckets work --max-chars 2000
//! ctxe backup                        # eject a snapshot
//! ctxe serve                         # start the HTTP API
//! ```
//!
//! ## Modules
//!
//! | Module | Purpose |
//! |--------|---------|
//! | [`config`] | TOML configuration with defaults and validation |
//! | [`models`] | Compound / Molecule / Atom data model |
//! | [`error`] | `EngineError` kinds and the `<kind>: <detail>` contract |
//! | [`db`] | SQLite connection pool (WAL mode) |
//! | [`migrate`] | Idempotent schema migrations |
//! | [`store`] | Typed relation operations, FTS search, transactions |
//! | [`signature`] | 64-bit SimHash fingerprints |
//! | [`atoms`] | Category rule table and entity extraction |
//! | [`atomizer`] | Sanitization and coordinate-exact splitting |
//! | [`ingest`] | Hash-deduplicated ingestion pipeline |
//! | [`watcher`] | Debounced polling watcher with a bounded queue |
//! | [`query`] | Query grammar parser |
//! | [`search`] | Tag-Walker retrieval protocol |
//! | [`inflate`] | Budget-capped context inflation |
//! | [`scribe`] | Markovian session state |
//! | [`generator`] | External model provider seam |
//! | [`snapshot`] | YAML eject / hydrate lifecycle |
//! | [`dream`] | Re-tagging and engram maintenance |
//! | [`engine`] | Public operation facade |
//! | [`server`] | Axum JSON API |

pub mod atomizer;
pub mod atoms;
pub mod config;
pub mod db;
pub mod dream;
pub mod engine;
pub mod error;
pub mod generator;
pub mod inflate;
pub mod ingest;
pub mod migrate;
pub mod models;
pub mod query;
pub mod scribe;
pub mod search;
pub mod server;
pub mod signature;
pub mod snapshot;
pub mod store;
pub mod watcher;
