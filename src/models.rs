//! Core data model: the three-level atomic taxonomy and its sidecars.
//!
//! Every ingested document becomes one [`Compound`], an ordered list of
//! [`Molecule`]s with byte coordinates into the compound body, and a set of
//! shared [`Atom`]s referenced from molecule tag sets:
//!
//! ```text
//! file / direct ingest → sanitize → Compound
//!                                      ├── Molecule 0  [start_byte..end_byte)
//!                                      ├── Molecule 1  ...
//!                                      └── Molecule N
//!                        tags ────────→ Atom ←─ AtomEdge ─→ Atom
//! ```
//!
//! # Persistence invariants
//!
//! 1. Every molecule's `[start_byte, end_byte)` lies inside its compound body.
//! 2. `content == body[start_byte..end_byte)` byte-exactly; the body is the
//!    single source of truth and molecules are re-sliceable from it.
//! 3. Re-ingesting content with an identical `hash` yields no new compound.
//! 4. Every label in a molecule's tag set has a corresponding atom row.
//! 5. `buckets` is never empty; the first element is the top-level folder
//!    (or `core` for root-level and direct ingests).

use serde::{Deserialize, Serialize};

/// Trust class of a stored record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Provenance {
    /// Content from the watched directory or direct local ingest.
    Internal,
    /// Content imported from outside the sovereign boundary.
    External,
    /// Content held back from retrieval entirely.
    Quarantine,
}

impl Provenance {
    pub fn as_str(&self) -> &'static str {
        match self {
            Provenance::Internal => "internal",
            Provenance::External => "external",
            Provenance::Quarantine => "quarantine",
        }
    }

    pub fn parse(s: &str) -> Option<Provenance> {
        match s {
            "internal" => Some(Provenance::Internal),
            "external" => Some(Provenance::External),
            "quarantine" => Some(Provenance::Quarantine),
            _ => None,
        }
    }
}

/// Structural class of a molecule, chosen by the atomizer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MoleculeKind {
    /// Sentence-split natural language.
    Prose,
    /// Indentation-block or fenced source code.
    Code,
    /// Line- or key-oriented structured text (JSON, YAML, logs).
    Data,
}

impl MoleculeKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            MoleculeKind::Prose => "prose",
            MoleculeKind::Code => "code",
            MoleculeKind::Data => "data",
        }
    }

    pub fn parse(s: &str) -> Option<MoleculeKind> {
        match s {
            "prose" => Some(MoleculeKind::Prose),
            "code" => Some(MoleculeKind::Code),
            "data" => Some(MoleculeKind::Data),
            _ => None,
        }
    }
}

/// An ingested document: the full sanitized text of one file or one direct
/// ingest call, stored in the `compounds` relation.
///
/// | Field | Description |
/// |-------|-------------|
/// | `id` | Stable identifier: base32 of the root-relative source path |
/// | `path` | Relative path under the watched root, or the caller's `source` |
/// | `timestamp` | Millisecond ingest time |
/// | `hash` | MD5 digest of the sanitized body (dedup key, not a security property) |
/// | `body` | Full sanitized text; authoritative source for molecule slices |
/// | `provenance` | Trust class; watched files default to `internal` |
/// | `signature` | 64-bit SimHash of the body (near-duplicate signal) |
/// | `buckets` | Non-empty ordered namespace tags; first is the top-level folder |
#[derive(Debug, Clone)]
pub struct Compound {
    pub id: String,
    pub path: String,
    pub timestamp: i64,
    pub hash: String,
    pub body: String,
    pub provenance: Provenance,
    pub signature: u64,
    pub buckets: Vec<String>,
}

/// A coherent span within a compound: a sentence, an indentation block, or a
/// top-level data entry. Stored in the `molecules` relation and indexed in FTS.
///
/// `content` is a redundant copy of `body[start_byte..end_byte)` kept for the
/// FTS index; any disagreement is resolved by re-slicing the compound body.
#[derive(Debug, Clone)]
pub struct Molecule {
    /// Derived id: `<compound_id>:<sequence>`.
    pub id: String,
    pub compound_id: String,
    /// 0-based position within the compound.
    pub sequence: i64,
    /// Half-open byte range into the compound body.
    pub start_byte: i64,
    pub end_byte: i64,
    pub content: String,
    pub kind: MoleculeKind,
    /// Atom labels present in this molecule.
    pub tags: Vec<String>,
    pub signature: u64,
}

impl Molecule {
    /// Derive the stable molecule id from its compound and sequence.
    pub fn derive_id(compound_id: &str, sequence: i64) -> String {
        format!("{}:{}", compound_id, sequence)
    }
}

/// Semantic category of an atom.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AtomKind {
    System,
    Concept,
    Person,
    Place,
    Date,
    Technical,
}

impl AtomKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            AtomKind::System => "system",
            AtomKind::Concept => "concept",
            AtomKind::Person => "person",
            AtomKind::Place => "place",
            AtomKind::Date => "date",
            AtomKind::Technical => "technical",
        }
    }

    pub fn parse(s: &str) -> Option<AtomKind> {
        match s {
            "system" => Some(AtomKind::System),
            "concept" => Some(AtomKind::Concept),
            "person" => Some(AtomKind::Person),
            "place" => Some(AtomKind::Place),
            "date" => Some(AtomKind::Date),
            "technical" => Some(AtomKind::Technical),
            _ => None,
        }
    }
}

/// A normalized semantic label shared across compounds: a category like
/// `#technical`, or an extracted entity. Atoms are reference-counted only
/// conceptually; orphans are swept by `dream`, never required for correctness.
#[derive(Debug, Clone)]
pub struct Atom {
    /// SHA-256 of the normalized label.
    pub id: String,
    /// Canonical label, e.g. `#technical` or `Orion Gateway`.
    pub label: String,
    pub kind: AtomKind,
    /// Importance hint in `[0, 1]`.
    pub weight: f64,
}

/// Directed weighted relation between two atoms (co-occurrence or explicit).
#[derive(Debug, Clone)]
pub struct AtomEdge {
    pub from_id: String,
    pub to_id: String,
    pub weight: f64,
    pub relation: String,
}

/// O(1) lexical sidecar row: digest of a normalized lookup key mapped to the
/// molecule ids it should surface. Engrams are a latency optimization and may
/// be stale; search treats them as hints, never as the source of truth.
#[derive(Debug, Clone)]
pub struct Engram {
    pub key_digest: String,
    pub memory_ids: Vec<String>,
}

/// The one process-wide scribe record (fixed id `session_state`).
#[derive(Debug, Clone, Default)]
pub struct SessionState {
    pub summary: String,
    pub updated_at: i64,
}

/// Outcome of an ingest call.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum IngestStatus {
    Inserted,
    Skipped,
}

/// Result row for an ingest call: the compound id plus whether it was new.
#[derive(Debug, Clone, Serialize)]
pub struct IngestOutcome {
    pub status: IngestStatus,
    pub id: String,
}
