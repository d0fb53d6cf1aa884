//! Atom extraction: category rules and entity detection.
//!
//! A molecule's tag set is built from two sources:
//!
//! 1. A fixed rule table mapping trigger keywords to high-level category
//!    atoms (`#technical`, `#temporal`, ...).
//! 2. Capitalized non-common-word runs, stored as concept atoms under their
//!    surface form (`Orion Gateway`).
//!
//! Extraction is pure: the same text always yields the same atoms in the
//! same order, which keeps the whole atomizer deterministic.

use sha2::{Digest, Sha256};

use crate::models::{Atom, AtomKind};

/// One row of the category rule table.
struct CategoryRule {
    /// Emitted atom label.
    label: &'static str,
    kind: AtomKind,
    weight: f64,
    /// Lower-case trigger keywords; any match classifies the span.
    triggers: &'static [&'static str],
}

/// Category rule table. Order is significant only for output stability.
const CATEGORY_RULES: &[CategoryRule] = &[
    CategoryRule {
        label: "#relationship",
        kind: AtomKind::Person,
        weight: 0.7,
        triggers: &[
            "friend", "family", "partner", "colleague", "mother", "father", "brother", "sister",
            "wife", "husband", "married", "relationship",
        ],
    },
    CategoryRule {
        label: "#narrative",
        kind: AtomKind::Concept,
        weight: 0.5,
        triggers: &[
            "story", "happened", "remember", "once", "then we", "after that", "eventually",
        ],
    },
    CategoryRule {
        label: "#technical",
        kind: AtomKind::Technical,
        weight: 0.8,
        triggers: &[
            "code", "function", "server", "database", "api", "bug", "deploy", "compile", "config",
            "algorithm", "module", "schema", "endpoint", "query", "protocol",
        ],
    },
    CategoryRule {
        label: "#industry",
        kind: AtomKind::Concept,
        weight: 0.5,
        triggers: &[
            "market", "company", "startup", "client", "customer", "revenue", "product", "vendor",
        ],
    },
    CategoryRule {
        label: "#location",
        kind: AtomKind::Place,
        weight: 0.6,
        triggers: &[
            "city", "country", "street", "office", "north", "south", "east", "west", "located",
            "airport", "station",
        ],
    },
    CategoryRule {
        label: "#emotional",
        kind: AtomKind::Concept,
        weight: 0.6,
        triggers: &[
            "happy", "sad", "angry", "afraid", "excited", "anxious", "love", "hate", "worried",
            "frustrated", "proud",
        ],
    },
    CategoryRule {
        label: "#temporal",
        kind: AtomKind::Date,
        weight: 0.6,
        triggers: &[
            "yesterday", "today", "tomorrow", "morning", "evening", "last week", "next week",
            "monday", "tuesday", "wednesday", "thursday", "friday", "saturday", "sunday",
            "january", "february", "march", "april", "june", "july", "august", "september",
            "october", "november", "december",
        ],
    },
    CategoryRule {
        label: "#causal",
        kind: AtomKind::Concept,
        weight: 0.5,
        triggers: &[
            "because", "therefore", "caused", "leads to", "as a result", "due to", "so that",
        ],
    },
    CategoryRule {
        label: "#professional",
        kind: AtomKind::Concept,
        weight: 0.6,
        triggers: &[
            "meeting", "project", "deadline", "manager", "interview", "salary", "promotion",
            "hired", "contract", "report",
        ],
    },
    CategoryRule {
        label: "#personal",
        kind: AtomKind::Person,
        weight: 0.5,
        triggers: &[
            "my ", "i feel", "i think", "i want", "i need", "myself", "my own",
        ],
    },
    CategoryRule {
        label: "#knowledge",
        kind: AtomKind::Concept,
        weight: 0.6,
        triggers: &[
            "learned", "definition", "means that", "concept", "theory", "principle", "fact",
            "research", "study",
        ],
    },
];

/// Capitalized words too common to be entities.
const COMMON_CAPITALIZED: &[&str] = &[
    "The", "And", "For", "But", "Not", "All", "Any", "Are", "Was", "Has", "Had", "His", "Her",
    "Its", "Our", "You", "Your", "They", "Them", "This", "That", "These", "Those", "With", "From",
    "Into", "Over", "When", "Where", "Which", "While", "What", "Who", "How", "Why", "Then", "There",
    "Here", "Also", "After", "Before", "About", "Above", "Below", "Between", "During", "Each",
    "Every", "Some", "Such", "Than", "Will", "Would", "Could", "Should", "May", "Might", "Must",
    "Can", "Does", "Did", "Done", "Being", "Been", "Have", "More", "Most", "Other", "Only", "Just",
    "Like", "Very", "Even", "Now", "New", "One", "Two", "First", "Second", "Last", "Next", "It",
    "If", "In", "On", "At", "As", "An", "Or", "No", "So", "To", "Of", "By", "We", "He", "She", "Is",
    "Be", "Do", "Up", "My", "Me", "A", "I",
];

/// Derive the stable atom id: SHA-256 of the lower-cased label.
pub fn atom_id(label: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(label.to_lowercase().as_bytes());
    format!("{:x}", hasher.finalize())
}

/// Extract category and entity atoms from a text span.
///
/// Returns atoms in a stable order: category rules in table order, then
/// entities in order of first appearance. Labels are unique within the result.
pub fn extract_atoms(text: &str) -> Vec<Atom> {
    let lower = text.to_lowercase();
    let mut atoms: Vec<Atom> = Vec::new();

    for rule in CATEGORY_RULES {
        if rule.triggers.iter().any(|t| lower.contains(t)) {
            atoms.push(Atom {
                id: atom_id(rule.label),
                label: rule.label.to_string(),
                kind: rule.kind,
                weight: rule.weight,
            });
        }
    }

    for entity in extract_entities(text) {
        let id = atom_id(&entity);
        if atoms.iter().any(|a| a.id == id) {
            continue;
        }
        atoms.push(Atom {
            id,
            label: entity,
            kind: AtomKind::Concept,
            weight: 0.6,
        });
    }

    atoms
}

/// Extract capitalized runs, skipping common words and sentence-initial noise.
///
/// A run is one or more consecutive words that each start with an uppercase
/// letter. Single common words (`The`, `And`, ...) never form a run on their
/// own; a run that starts with one keeps only its uncommon tail.
fn extract_entities(text: &str) -> Vec<String> {
    let mut entities: Vec<String> = Vec::new();
    let mut run: Vec<&str> = Vec::new();

    let mut flush = |run: &mut Vec<&str>, entities: &mut Vec<String>| {
        // Drop leading common words from the run
        while let Some(first) = run.first() {
            if COMMON_CAPITALIZED.contains(first) {
                run.remove(0);
            } else {
                break;
            }
        }
        if !run.is_empty() {
            let candidate = run.join(" ");
            // Single letters and all-digit tokens are not entities
            if candidate.len() > 1 && !entities.contains(&candidate) {
                entities.push(candidate);
            }
        }
        run.clear();
    };

    for word in text.split_whitespace() {
        let cleaned = word.trim_matches(|c: char| !c.is_alphanumeric());
        let is_capitalized = cleaned
            .chars()
            .next()
            .map(|c| c.is_uppercase())
            .unwrap_or(false);

        if is_capitalized {
            run.push(cleaned);
        } else {
            flush(&mut run, &mut entities);
        }
    }
    flush(&mut run, &mut entities);

    entities
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn category_rules_fire_on_triggers() {
        let atoms = extract_atoms("We need to deploy the server after the meeting tomorrow.");
        let labels: Vec<&str> = atoms.iter().map(|a| a.label.as_str()).collect();
        assert!(labels.contains(&"#technical"));
        assert!(labels.contains(&"#professional"));
        assert!(labels.contains(&"#temporal"));
    }

    #[test]
    fn entities_are_extracted_and_common_words_skipped() {
        let atoms = extract_atoms("The Orion Gateway talks to Redis over the wire.");
        let labels: Vec<&str> = atoms.iter().map(|a| a.label.as_str()).collect();
        assert!(labels.contains(&"Orion Gateway"));
        assert!(labels.contains(&"Redis"));
        assert!(!labels.contains(&"The"));
    }

    #[test]
    fn extraction_is_deterministic() {
        let text = "Maya met Dr. Chen in Lisbon because the project deadline moved.";
        let a = extract_atoms(text);
        let b = extract_atoms(text);
        assert_eq!(a.len(), b.len());
        for (x, y) in a.iter().zip(b.iter()) {
            assert_eq!(x.id, y.id);
            assert_eq!(x.label, y.label);
        }
    }

    #[test]
    fn atom_id_is_case_insensitive() {
        assert_eq!(atom_id("#Technical"), atom_id("#technical"));
    }

    #[test]
    fn no_atoms_from_plain_lowercase_text() {
        let atoms = extract_atoms("plain words without triggers or names");
        assert!(atoms.is_empty());
    }
}
