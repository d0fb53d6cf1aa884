//! The atomizer: sanitized text → one compound + coordinate-exact molecules.
//!
//! Decomposition is **pure**: the same input bytes always produce the same
//! compound hash, molecule ids, byte coordinates, and signatures. The
//! ingestor relies on this to make re-ingestion idempotent and to let the
//! snapshot path re-derive molecules from compound bodies alone.
//!
//! # Pipeline
//!
//! 1. **Sanitize** — strip wrapper artifacts (log prefixes, single-field JSON
//!    envelopes, excess trailing whitespace). Files on disk are never
//!    modified; sanitization only shapes the stored body.
//! 2. **Split** — by source kind: prose at sentence terminators (with fenced
//!    blocks lifted out as code molecules), code at equal-indentation blocks,
//!    data by line or top-level key.
//! 3. **Extract** — category and entity atoms per molecule, co-occurrence
//!    edges per compound.
//!
//! Molecules tile the sanitized body: ranges are half-open, overlaps are
//! forbidden, and adjacent molecules share a boundary byte, so
//! `content == body[start..end)` holds for every row.

use md5::{Digest, Md5};
use regex::Regex;
use std::collections::HashMap;
use std::sync::LazyLock;

use crate::atoms::extract_atoms;
use crate::models::{Atom, AtomEdge, Compound, Molecule, MoleculeKind, Provenance};
use crate::signature::simhash;

/// Prose fragments shorter than this are merged into the previous molecule.
const MIN_FRAGMENT_BYTES: usize = 40;

/// Leading `YYYY-MM-DD HH:MM:SS [LEVEL]` log decoration, per line.
static LOG_PREFIX: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?m)^\d{4}-\d{2}-\d{2} \d{2}:\d{2}:\d{2} \[[A-Z]+\] ?").unwrap()
});

/// Full atomizer output for one document.
#[derive(Debug, Clone)]
pub struct Atomized {
    pub compound: Compound,
    pub molecules: Vec<Molecule>,
    pub atoms: Vec<Atom>,
    pub edges: Vec<AtomEdge>,
}

/// Compute the MD5 content digest of a sanitized body.
pub fn content_hash(body: &str) -> String {
    let mut hasher = Md5::new();
    hasher.update(body.as_bytes());
    format!("{:x}", hasher.finalize())
}

/// Strip recognizable wrapper artifacts from raw text.
///
/// Applied before splitting; the result is the stored compound body.
/// Three rules, in order:
///
/// 1. A JSON envelope whose only payload field is the content is unwrapped.
/// 2. Log-line prefixes of the form `YYYY-MM-DD HH:MM:SS [LEVEL]` are removed.
/// 3. Newline runs longer than two are collapsed; trailing whitespace at the
///    end of the body is reduced to a single newline.
pub fn sanitize(raw: &str) -> String {
    let mut text = unwrap_json_envelope(raw);

    if LOG_PREFIX.is_match(&text) {
        text = LOG_PREFIX.replace_all(&text, "").into_owned();
    }

    let mut out = collapse_newline_runs(&text);

    // Trailing whitespace: keep at most one final newline
    let trimmed = out.trim_end();
    if trimmed.len() < out.len() {
        out.truncate(trimmed.len());
        if !out.is_empty() {
            out.push('\n');
        }
    }

    out
}

fn unwrap_json_envelope(raw: &str) -> String {
    let trimmed = raw.trim();
    if !trimmed.starts_with('{') {
        return raw.to_string();
    }
    if let Ok(serde_json::Value::Object(map)) =
        serde_json::from_str::<serde_json::Value>(trimmed)
    {
        if map.len() == 1 {
            if let Some(serde_json::Value::String(inner)) = map.values().next() {
                return inner.clone();
            }
        }
    }
    raw.to_string()
}

fn collapse_newline_runs(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    let mut newline_run = 0usize;
    for c in text.chars() {
        if c == '\n' {
            newline_run += 1;
            if newline_run <= 2 {
                out.push(c);
            }
        } else {
            newline_run = 0;
            out.push(c);
        }
    }
    out
}

/// Pick the document-level molecule kind from the source path extension.
pub fn classify_source(path: &str) -> MoleculeKind {
    let ext = path.rsplit_once('.').map(|(_, e)| e.to_lowercase());
    match ext.as_deref() {
        Some("json") | Some("yaml") | Some("yml") => MoleculeKind::Data,
        Some("js") | Some("ts") | Some("py") | Some("rs") | Some("css") | Some("bat")
        | Some("ps1") | Some("sh") => MoleculeKind::Code,
        _ => MoleculeKind::Prose,
    }
}

/// Decompose sanitized text into a compound and its molecules, atoms, and
/// edges. `body` must already be sanitized; `id` is the caller's stable
/// compound id (base32 of the relative path).
pub fn atomize(
    id: &str,
    path: &str,
    body: &str,
    provenance: Provenance,
    buckets: Vec<String>,
    timestamp: i64,
) -> Atomized {
    let kind = classify_source(path);
    let ranges = split_ranges(body, kind);

    let mut molecules = Vec::with_capacity(ranges.len());
    let mut atom_index: HashMap<String, Atom> = HashMap::new();
    let mut edge_weights: HashMap<(String, String), f64> = HashMap::new();

    for (sequence, (start, end, mol_kind)) in ranges.into_iter().enumerate() {
        let content = &body[start..end];
        let mol_atoms = extract_atoms(content);
        let tags: Vec<String> = mol_atoms.iter().map(|a| a.label.clone()).collect();

        // Co-occurrence edges between every atom pair in this molecule
        for (i, a) in mol_atoms.iter().enumerate() {
            for b in mol_atoms.iter().skip(i + 1) {
                *edge_weights
                    .entry((a.id.clone(), b.id.clone()))
                    .or_insert(0.0) += 1.0;
            }
        }
        for atom in mol_atoms {
            atom_index.entry(atom.id.clone()).or_insert(atom);
        }

        molecules.push(Molecule {
            id: Molecule::derive_id(id, sequence as i64),
            compound_id: id.to_string(),
            sequence: sequence as i64,
            start_byte: start as i64,
            end_byte: end as i64,
            content: content.to_string(),
            kind: mol_kind,
            tags,
            signature: simhash(content),
        });
    }

    let mut atoms: Vec<Atom> = atom_index.into_values().collect();
    atoms.sort_by(|a, b| a.id.cmp(&b.id));

    let mut edges: Vec<AtomEdge> = edge_weights
        .into_iter()
        .map(|((from_id, to_id), weight)| AtomEdge {
            from_id,
            to_id,
            weight,
            relation: "co-occurs".to_string(),
        })
        .collect();
    edges.sort_by(|a, b| (&a.from_id, &a.to_id).cmp(&(&b.from_id, &b.to_id)));

    let compound = Compound {
        id: id.to_string(),
        path: path.to_string(),
        timestamp,
        hash: content_hash(body),
        body: body.to_string(),
        provenance,
        signature: simhash(body),
        buckets,
    };

    Atomized {
        compound,
        molecules,
        atoms,
        edges,
    }
}

// ============ Splitting ============

/// Compute molecule ranges tiling the body. Each range is `(start, end, kind)`
/// with `start < end`; consecutive ranges share their boundary byte.
fn split_ranges(body: &str, kind: MoleculeKind) -> Vec<(usize, usize, MoleculeKind)> {
    if body.is_empty() {
        return Vec::new();
    }
    match kind {
        MoleculeKind::Prose => split_prose(body),
        MoleculeKind::Code => split_code(body),
        MoleculeKind::Data => split_data(body),
    }
}

/// Prose: sentence terminators followed by whitespace, with fenced code
/// blocks lifted out as single code molecules. Fragments shorter than
/// [`MIN_FRAGMENT_BYTES`] are merged into the previous molecule.
fn split_prose(body: &str) -> Vec<(usize, usize, MoleculeKind)> {
    let fences = fenced_regions(body);
    let mut ranges: Vec<(usize, usize, MoleculeKind)> = Vec::new();
    let mut cursor = 0usize;

    for (fence_start, fence_end) in fences {
        if cursor < fence_start {
            append_sentences(body, cursor, fence_start, &mut ranges);
        }
        ranges.push((fence_start, fence_end, MoleculeKind::Code));
        cursor = fence_end;
    }
    if cursor < body.len() {
        append_sentences(body, cursor, body.len(), &mut ranges);
    }

    ranges
}

/// Sentence-split `body[from..to)` and push the resulting prose ranges,
/// merging undersized fragments into their predecessor.
fn append_sentences(
    body: &str,
    from: usize,
    to: usize,
    ranges: &mut Vec<(usize, usize, MoleculeKind)>,
) {
    let slice = &body[from..to];
    let mut points: Vec<usize> = Vec::new(); // sentence end offsets, relative to `from`

    let mut chars = slice.char_indices().peekable();
    while let Some((i, c)) = chars.next() {
        if matches!(c, '.' | '!' | '?') {
            if let Some(&(_, next)) = chars.peek() {
                if next.is_whitespace() {
                    // End the sentence after the whitespace run that follows
                    let mut end = i + c.len_utf8();
                    while let Some(&(j, w)) = chars.peek() {
                        if w.is_whitespace() {
                            end = j + w.len_utf8();
                            chars.next();
                        } else {
                            break;
                        }
                    }
                    points.push(end);
                }
            }
        }
    }

    let first_new = ranges.len();
    let mut start = 0usize;
    for end in points {
        if end > start {
            ranges.push((from + start, from + end, MoleculeKind::Prose));
            start = end;
        }
    }
    if start < slice.len() {
        ranges.push((from + start, from + slice.len(), MoleculeKind::Prose));
    }

    // Merge short fragments into the previous prose range of this run
    let mut i = first_new;
    while i < ranges.len() {
        let (start, end, _) = ranges[i];
        if end - start < MIN_FRAGMENT_BYTES && i > first_new {
            ranges[i - 1].1 = end;
            ranges.remove(i);
        } else {
            i += 1;
        }
    }
}

/// Find triple-backtick fenced regions. Each region spans from the start of
/// the opening fence line to the end of the closing fence line (newline
/// included). An unclosed fence extends to the end of the body.
fn fenced_regions(body: &str) -> Vec<(usize, usize)> {
    let mut regions = Vec::new();
    let mut open: Option<usize> = None;
    let mut offset = 0usize;

    for line in body.split_inclusive('\n') {
        if line.trim_start().starts_with("```") {
            match open.take() {
                None => open = Some(offset),
                Some(start) => regions.push((start, offset + line.len())),
            }
        }
        offset += line.len();
    }
    if let Some(start) = open {
        regions.push((start, body.len()));
    }
    regions
}

/// Code: consecutive lines with equal indentation form one block. Blank
/// lines attach to the current block.
fn split_code(body: &str) -> Vec<(usize, usize, MoleculeKind)> {
    let mut ranges: Vec<(usize, usize, MoleculeKind)> = Vec::new();
    let mut block_start = 0usize;
    let mut block_indent: Option<usize> = None;
    let mut offset = 0usize;

    for line in body.split_inclusive('\n') {
        let is_blank = line.trim().is_empty();
        if !is_blank {
            let indent = line.len() - line.trim_start_matches([' ', '\t']).len();
            match block_indent {
                Some(prev) if prev != indent => {
                    if offset > block_start {
                        ranges.push((block_start, offset, MoleculeKind::Code));
                    }
                    block_start = offset;
                    block_indent = Some(indent);
                }
                None => block_indent = Some(indent),
                _ => {}
            }
        }
        offset += line.len();
    }
    if block_start < body.len() {
        ranges.push((block_start, body.len(), MoleculeKind::Code));
    }

    ranges
}

/// Data: top-level entries start at column zero (YAML keys, JSON braces,
/// log lines); indented continuation lines stay with their entry.
fn split_data(body: &str) -> Vec<(usize, usize, MoleculeKind)> {
    let mut ranges: Vec<(usize, usize, MoleculeKind)> = Vec::new();
    let mut entry_start = 0usize;
    let mut offset = 0usize;
    let mut seen_any = false;

    for line in body.split_inclusive('\n') {
        let starts_entry = !line.starts_with(' ') && !line.starts_with('\t') && !line.trim().is_empty();
        if starts_entry && seen_any && offset > entry_start {
            ranges.push((entry_start, offset, MoleculeKind::Data));
            entry_start = offset;
        }
        if starts_entry {
            seen_any = true;
        }
        offset += line.len();
    }
    if entry_start < body.len() {
        ranges.push((entry_start, body.len(), MoleculeKind::Data));
    }

    ranges
}
