//! Typed store over the embedded SQLite database.
//!
//! [`Store`] is the single point of serialization for writes: the top-level
//! host owns one value and every subcomponent borrows it. All multi-row
//! mutations run inside a transaction, so readers never observe a partially
//! ingested document.
//!
//! The FTS index is queried through [`Store::fts_search`], which sanitizes
//! the caller's text (alphanumeric + spaces only, lower-cased) before it
//! reaches the FTS5 parser, and negates the BM25 rank so that higher scores
//! are better.

use sqlx::{Row, SqlitePool};

use crate::error::{EngineError, EngineResult};
use crate::models::{
    Atom, AtomKind, Compound, Engram, Molecule, MoleculeKind, Provenance, SessionState,
};

/// Fixed primary key of the single scribe row.
const SESSION_STATE_ID: &str = "session_state";

/// A molecule joined with the compound fields retrieval needs.
#[derive(Debug, Clone)]
pub struct HydratedMolecule {
    pub molecule_id: String,
    pub compound_id: String,
    pub start_byte: i64,
    pub end_byte: i64,
    pub content: String,
    pub tags: Vec<String>,
    pub source: String,
    pub timestamp: i64,
    pub provenance: Provenance,
    pub buckets: Vec<String>,
}

/// Owning handle over the database pool.
#[derive(Clone)]
pub struct Store {
    pool: SqlitePool,
}

impl Store {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    // ============ Compounds ============

    /// Persist one atomized document: the compound row, its molecules, the
    /// FTS entries, atoms, tag references, and co-occurrence edges, all in
    /// one transaction. Prior molecules for the compound id are replaced.
    pub async fn put_compound_tree(&self, doc: &crate::atomizer::Atomized) -> EngineResult<()> {
        let mut tx = self.pool.begin().await?;
        let compound = &doc.compound;

        sqlx::query(
            "DELETE FROM molecule_atoms WHERE molecule_id IN \
             (SELECT id FROM molecules WHERE compound_id = ?)",
        )
        .bind(&compound.id)
        .execute(&mut *tx)
        .await?;
        sqlx::query("DELETE FROM molecules_fts WHERE compound_id = ?")
            .bind(&compound.id)
            .execute(&mut *tx)
            .await?;
        sqlx::query("DELETE FROM molecules WHERE compound_id = ?")
            .bind(&compound.id)
            .execute(&mut *tx)
            .await?;

        sqlx::query(
            r#"
            INSERT INTO compounds (id, path, timestamp, hash, body, provenance, signature, buckets)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?)
            ON CONFLICT(id) DO UPDATE SET
                path = excluded.path,
                timestamp = excluded.timestamp,
                hash = excluded.hash,
                body = excluded.body,
                provenance = excluded.provenance,
                signature = excluded.signature,
                buckets = excluded.buckets
            "#,
        )
        .bind(&compound.id)
        .bind(&compound.path)
        .bind(compound.timestamp)
        .bind(&compound.hash)
        .bind(&compound.body)
        .bind(compound.provenance.as_str())
        .bind(compound.signature as i64)
        .bind(serde_json::to_string(&compound.buckets)?)
        .execute(&mut *tx)
        .await?;

        for molecule in &doc.molecules {
            sqlx::query(
                "INSERT INTO molecules \
                 (id, compound_id, sequence, start_byte, end_byte, content, kind, tags, signature) \
                 VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)",
            )
            .bind(&molecule.id)
            .bind(&molecule.compound_id)
            .bind(molecule.sequence)
            .bind(molecule.start_byte)
            .bind(molecule.end_byte)
            .bind(&molecule.content)
            .bind(molecule.kind.as_str())
            .bind(serde_json::to_string(&molecule.tags)?)
            .bind(molecule.signature as i64)
            .execute(&mut *tx)
            .await?;

            sqlx::query(
                "INSERT INTO molecules_fts (molecule_id, compound_id, content) VALUES (?, ?, ?)",
            )
            .bind(&molecule.id)
            .bind(&molecule.compound_id)
            .bind(&molecule.content)
            .execute(&mut *tx)
            .await?;
        }

        for atom in &doc.atoms {
            sqlx::query(
                "INSERT INTO atoms (id, label, kind, weight) VALUES (?, ?, ?, ?) \
                 ON CONFLICT(id) DO UPDATE SET weight = MAX(weight, excluded.weight)",
            )
            .bind(&atom.id)
            .bind(&atom.label)
            .bind(atom.kind.as_str())
            .bind(atom.weight)
            .execute(&mut *tx)
            .await?;
        }

        for molecule in &doc.molecules {
            for tag in &molecule.tags {
                sqlx::query(
                    "INSERT OR IGNORE INTO molecule_atoms (atom_id, molecule_id) VALUES (?, ?)",
                )
                .bind(crate::atoms::atom_id(tag))
                .bind(&molecule.id)
                .execute(&mut *tx)
                .await?;
            }
        }

        for edge in &doc.edges {
            sqlx::query(
                "INSERT INTO atom_edges (from_id, to_id, weight, relation) VALUES (?, ?, ?, ?) \
                 ON CONFLICT(from_id, to_id) DO UPDATE SET weight = atom_edges.weight + excluded.weight",
            )
            .bind(&edge.from_id)
            .bind(&edge.to_id)
            .bind(edge.weight)
            .bind(&edge.relation)
            .execute(&mut *tx)
            .await?;
        }

        tx.commit().await?;
        Ok(())
    }

    pub async fn get_compound(&self, id: &str) -> EngineResult<Option<Compound>> {
        let row = sqlx::query(
            "SELECT id, path, timestamp, hash, body, provenance, signature, buckets \
             FROM compounds WHERE id = ?",
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;
        row.map(compound_from_row).transpose()
    }

    /// Global dedup lookup: the id of any compound with this content hash.
    pub async fn find_compound_by_hash(&self, hash: &str) -> EngineResult<Option<String>> {
        let id = sqlx::query_scalar("SELECT id FROM compounds WHERE hash = ? LIMIT 1")
            .bind(hash)
            .fetch_optional(&self.pool)
            .await?;
        Ok(id)
    }

    pub async fn compound_count(&self) -> EngineResult<i64> {
        let count = sqlx::query_scalar("SELECT COUNT(*) FROM compounds")
            .fetch_one(&self.pool)
            .await?;
        Ok(count)
    }

    /// All compounds in id order (snapshot dump; finite, single-shot).
    pub async fn scan_compounds(&self) -> EngineResult<Vec<Compound>> {
        let rows = sqlx::query(
            "SELECT id, path, timestamp, hash, body, provenance, signature, buckets \
             FROM compounds ORDER BY id",
        )
        .fetch_all(&self.pool)
        .await?;
        rows.into_iter().map(compound_from_row).collect()
    }

    /// Compounds still carrying the default bucket assignment (`["core"]` or
    /// empty); these are the re-tagging candidates for `dream`.
    pub async fn scan_unclassified_compounds(&self) -> EngineResult<Vec<Compound>> {
        let all = self.scan_compounds().await?;
        Ok(all
            .into_iter()
            .filter(|c| c.buckets.is_empty() || c.buckets == ["core"])
            .collect())
    }

    /// Remove a compound and everything derived from it.
    pub async fn delete_compound(&self, id: &str) -> EngineResult<()> {
        let mut tx = self.pool.begin().await?;
        sqlx::query(
            "DELETE FROM molecule_atoms WHERE molecule_id IN \
             (SELECT id FROM molecules WHERE compound_id = ?)",
        )
        .bind(id)
        .execute(&mut *tx)
        .await?;
        sqlx::query("DELETE FROM molecules_fts WHERE compound_id = ?")
            .bind(id)
            .execute(&mut *tx)
            .await?;
        sqlx::query("DELETE FROM molecules WHERE compound_id = ?")
            .bind(id)
            .execute(&mut *tx)
            .await?;
        sqlx::query("DELETE FROM compounds WHERE id = ?")
            .bind(id)
            .execute(&mut *tx)
            .await?;
        tx.commit().await?;
        Ok(())
    }

    /// Deduplicated bucket labels across all compounds, lex-sorted.
    pub async fn list_buckets(&self) -> EngineResult<Vec<String>> {
        let rows: Vec<String> = sqlx::query_scalar("SELECT buckets FROM compounds")
            .fetch_all(&self.pool)
            .await?;
        let mut buckets: Vec<String> = Vec::new();
        for raw in rows {
            let list: Vec<String> = serde_json::from_str(&raw).unwrap_or_default();
            for bucket in list {
                if !buckets.contains(&bucket) {
                    buckets.push(bucket);
                }
            }
        }
        buckets.sort();
        Ok(buckets)
    }

    // ============ Molecules ============

    pub async fn molecules_for_compound(&self, compound_id: &str) -> EngineResult<Vec<Molecule>> {
        let rows = sqlx::query(
            "SELECT id, compound_id, sequence, start_byte, end_byte, content, kind, tags, signature \
             FROM molecules WHERE compound_id = ? ORDER BY sequence",
        )
        .bind(compound_id)
        .fetch_all(&self.pool)
        .await?;
        rows.into_iter().map(molecule_from_row).collect()
    }

    pub async fn molecule_count(&self) -> EngineResult<i64> {
        let count = sqlx::query_scalar("SELECT COUNT(*) FROM molecules")
            .fetch_one(&self.pool)
            .await?;
        Ok(count)
    }

    /// Hydrate molecule ids into joined retrieval rows. Ids that no longer
    /// exist are silently dropped (engrams may be stale).
    pub async fn hydrate_molecules(&self, ids: &[String]) -> EngineResult<Vec<HydratedMolecule>> {
        let mut out = Vec::with_capacity(ids.len());
        for id in ids {
            let row = sqlx::query(
                "SELECT m.id AS molecule_id, m.compound_id, m.start_byte, m.end_byte, m.content, \
                        m.tags, c.path, c.timestamp, c.provenance, c.buckets \
                 FROM molecules m JOIN compounds c ON c.id = m.compound_id \
                 WHERE m.id = ?",
            )
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;
            if let Some(row) = row {
                out.push(hydrated_from_row(row)?);
            }
        }
        Ok(out)
    }

    // ============ Full-text search ============

    /// Lexical search over molecule content. Returns `(molecule_id, score)`
    /// with BM25 rank negated so higher is better. The query text is
    /// sanitized before it reaches the FTS5 parser.
    pub async fn fts_search(&self, text: &str, k: i64) -> EngineResult<Vec<(String, f64)>> {
        let sanitized = sanitize_fts_query(text);
        if sanitized.is_empty() {
            return Ok(Vec::new());
        }

        let rows = sqlx::query(
            "SELECT molecule_id, rank FROM molecules_fts WHERE molecules_fts MATCH ? \
             ORDER BY rank LIMIT ?",
        )
        .bind(&sanitized)
        .bind(k)
        .fetch_all(&self.pool)
        .await?;

        Ok(rows
            .into_iter()
            .map(|row| {
                let id: String = row.get("molecule_id");
                let rank: f64 = row.get("rank");
                (id, -rank)
            })
            .collect())
    }

    /// Fallback scan when FTS is unavailable: case-insensitive substring
    /// match over molecule content and compound path. Correctness-preserving
    /// but linear in the store size.
    pub async fn substring_scan(&self, needle: &str) -> EngineResult<Vec<HydratedMolecule>> {
        let needle = needle.to_lowercase();
        let rows = sqlx::query(
            "SELECT m.id AS molecule_id, m.compound_id, m.start_byte, m.end_byte, m.content, \
                    m.tags, c.path, c.timestamp, c.provenance, c.buckets \
             FROM molecules m JOIN compounds c ON c.id = m.compound_id",
        )
        .fetch_all(&self.pool)
        .await?;

        let mut out = Vec::new();
        for row in rows {
            let hit = hydrated_from_row(row)?;
            if hit.content.to_lowercase().contains(&needle)
                || hit.source.to_lowercase().contains(&needle)
            {
                out.push(hit);
            }
        }
        Ok(out)
    }

    // ============ Graph walk ============

    /// Molecules reachable from the harvested tag set: any molecule whose
    /// tags intersect `labels`. The caller applies exclusions and scoring;
    /// this query deliberately returns a superset.
    pub async fn molecules_with_tags(
        &self,
        labels: &[String],
        limit: i64,
    ) -> EngineResult<Vec<HydratedMolecule>> {
        if labels.is_empty() {
            return Ok(Vec::new());
        }

        let atom_ids: Vec<String> = labels.iter().map(|l| crate::atoms::atom_id(l)).collect();
        let placeholders = vec!["?"; atom_ids.len()].join(", ");
        let sql = format!(
            "SELECT DISTINCT m.id AS molecule_id, m.compound_id, m.start_byte, m.end_byte, \
                    m.content, m.tags, c.path, c.timestamp, c.provenance, c.buckets \
             FROM molecule_atoms ma \
             JOIN molecules m ON m.id = ma.molecule_id \
             JOIN compounds c ON c.id = m.compound_id \
             WHERE ma.atom_id IN ({placeholders}) LIMIT ?"
        );

        let mut query = sqlx::query(&sql);
        for atom_id in &atom_ids {
            query = query.bind(atom_id);
        }
        query = query.bind(limit);

        let rows = query.fetch_all(&self.pool).await?;
        rows.into_iter().map(hydrated_from_row).collect()
    }

    pub async fn atom_count(&self) -> EngineResult<i64> {
        let count = sqlx::query_scalar("SELECT COUNT(*) FROM atoms")
            .fetch_one(&self.pool)
            .await?;
        Ok(count)
    }

    /// All atoms in label order (finite, single-shot).
    pub async fn scan_atoms(&self) -> EngineResult<Vec<Atom>> {
        let rows = sqlx::query("SELECT id, label, kind, weight FROM atoms ORDER BY label")
            .fetch_all(&self.pool)
            .await?;
        Ok(rows
            .into_iter()
            .map(|row| {
                let kind: String = row.get("kind");
                Atom {
                    id: row.get("id"),
                    label: row.get("label"),
                    kind: AtomKind::parse(&kind).unwrap_or(AtomKind::Concept),
                    weight: row.get("weight"),
                }
            })
            .collect())
    }

    pub async fn get_atom(&self, id: &str) -> EngineResult<Option<Atom>> {
        let row = sqlx::query("SELECT id, label, kind, weight FROM atoms WHERE id = ?")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;
        Ok(row.map(|row| {
            let kind: String = row.get("kind");
            Atom {
                id: row.get("id"),
                label: row.get("label"),
                kind: AtomKind::parse(&kind).unwrap_or(AtomKind::Concept),
                weight: row.get("weight"),
            }
        }))
    }

    // ============ Engrams ============

    pub async fn get_engram(&self, key_digest: &str) -> EngineResult<Option<Engram>> {
        let row = sqlx::query("SELECT key_digest, memory_ids FROM engrams WHERE key_digest = ?")
            .bind(key_digest)
            .fetch_optional(&self.pool)
            .await?;
        row.map(|row| {
            let raw: String = row.get("memory_ids");
            Ok(Engram {
                key_digest: row.get("key_digest"),
                memory_ids: serde_json::from_str(&raw)?,
            })
        })
        .transpose()
    }

    pub async fn put_engram(&self, engram: &Engram) -> EngineResult<()> {
        sqlx::query(
            "INSERT INTO engrams (key_digest, memory_ids) VALUES (?, ?) \
             ON CONFLICT(key_digest) DO UPDATE SET memory_ids = excluded.memory_ids",
        )
        .bind(&engram.key_digest)
        .bind(serde_json::to_string(&engram.memory_ids)?)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    pub async fn clear_engrams(&self) -> EngineResult<()> {
        sqlx::query("DELETE FROM engrams").execute(&self.pool).await?;
        Ok(())
    }

    pub async fn engram_count(&self) -> EngineResult<i64> {
        let count = sqlx::query_scalar("SELECT COUNT(*) FROM engrams")
            .fetch_one(&self.pool)
            .await?;
        Ok(count)
    }

    // ============ Session state ============

    pub async fn get_session_state(&self) -> EngineResult<Option<SessionState>> {
        let row = sqlx::query("SELECT summary, updated_at FROM session_state WHERE id = ?")
            .bind(SESSION_STATE_ID)
            .fetch_optional(&self.pool)
            .await?;
        Ok(row.map(|row| SessionState {
            summary: row.get("summary"),
            updated_at: row.get("updated_at"),
        }))
    }

    pub async fn put_session_state(&self, state: &SessionState) -> EngineResult<()> {
        sqlx::query(
            "INSERT INTO session_state (id, summary, updated_at) VALUES (?, ?, ?) \
             ON CONFLICT(id) DO UPDATE SET summary = excluded.summary, updated_at = excluded.updated_at",
        )
        .bind(SESSION_STATE_ID)
        .bind(&state.summary)
        .bind(state.updated_at)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    pub async fn clear_session_state(&self) -> EngineResult<()> {
        sqlx::query("DELETE FROM session_state WHERE id = ?")
            .bind(SESSION_STATE_ID)
            .execute(&self.pool)
            .await?;
        Ok(())
    }
}

/// Strip everything the FTS5 query parser could misread: only alphanumeric
/// characters and spaces survive, lower-cased, with runs of spaces collapsed.
pub fn sanitize_fts_query(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    let mut last_space = true;
    for c in text.chars() {
        if c.is_alphanumeric() {
            out.extend(c.to_lowercase());
            last_space = false;
        } else if !last_space {
            out.push(' ');
            last_space = true;
        }
    }
    out.trim_end().to_string()
}

fn compound_from_row(row: sqlx::sqlite::SqliteRow) -> EngineResult<Compound> {
    let provenance: String = row.get("provenance");
    let buckets_raw: String = row.get("buckets");
    let signature: i64 = row.get("signature");
    Ok(Compound {
        id: row.get("id"),
        path: row.get("path"),
        timestamp: row.get("timestamp"),
        hash: row.get("hash"),
        body: row.get("body"),
        provenance: Provenance::parse(&provenance)
            .ok_or_else(|| EngineError::Fatal(format!("corrupt provenance: {provenance}")))?,
        signature: signature as u64,
        buckets: serde_json::from_str(&buckets_raw)?,
    })
}

fn molecule_from_row(row: sqlx::sqlite::SqliteRow) -> EngineResult<Molecule> {
    let kind: String = row.get("kind");
    let tags_raw: String = row.get("tags");
    let signature: i64 = row.get("signature");
    Ok(Molecule {
        id: row.get("id"),
        compound_id: row.get("compound_id"),
        sequence: row.get("sequence"),
        start_byte: row.get("start_byte"),
        end_byte: row.get("end_byte"),
        content: row.get("content"),
        kind: MoleculeKind::parse(&kind).unwrap_or(MoleculeKind::Prose),
        tags: serde_json::from_str(&tags_raw)?,
        signature: signature as u64,
    })
}

fn hydrated_from_row(row: sqlx::sqlite::SqliteRow) -> EngineResult<HydratedMolecule> {
    let provenance: String = row.get("provenance");
    let tags_raw: String = row.get("tags");
    let buckets_raw: String = row.get("buckets");
    Ok(HydratedMolecule {
        molecule_id: row.get("molecule_id"),
        compound_id: row.get("compound_id"),
        start_byte: row.get("start_byte"),
        end_byte: row.get("end_byte"),
        content: row.get("content"),
        tags: serde_json::from_str(&tags_raw)?,
        source: row.get("path"),
        timestamp: row.get("timestamp"),
        provenance: Provenance::parse(&provenance)
            .ok_or_else(|| EngineError::Fatal(format!("corrupt provenance: {provenance}")))?,
        buckets: serde_json::from_str(&buckets_raw)?,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fts_query_sanitization_strips_operators() {
        assert_eq!(sanitize_fts_query("hello AND (world)"), "hello and world");
        assert_eq!(sanitize_fts_query("\"phrase\" OR col:umn"), "phrase or col umn");
        assert_eq!(sanitize_fts_query("   "), "");
        assert_eq!(sanitize_fts_query("a--b__c"), "a b c");
    }

    #[test]
    fn fts_query_sanitization_collapses_spaces() {
        assert_eq!(sanitize_fts_query("a   !!   b"), "a b");
    }
}
