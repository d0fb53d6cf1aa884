//! Molecular signatures: 64-bit SimHash fingerprints.
//!
//! A signature is a locality-sensitive fingerprint of a text span. Texts that
//! share most of their tokens produce signatures with a small Hamming
//! distance, which makes the signature a cheap near-duplicate signal at both
//! the compound and the molecule level.
//!
//! Token hashing uses FNV-1a so signatures are stable across builds and
//! platforms; re-atomizing the same bytes always yields the same signature.

/// FNV-1a offset basis (64-bit).
const FNV_OFFSET: u64 = 0xcbf29ce484222325;
/// FNV-1a prime (64-bit).
const FNV_PRIME: u64 = 0x100000001b3;

fn fnv1a64(bytes: &[u8]) -> u64 {
    let mut hash = FNV_OFFSET;
    for b in bytes {
        hash ^= *b as u64;
        hash = hash.wrapping_mul(FNV_PRIME);
    }
    hash
}

/// Compute the 64-bit SimHash of a text span.
///
/// Tokens are lower-cased alphanumeric runs. Each token votes on all 64 bit
/// positions; the sign of each accumulated vote decides the output bit.
/// Empty input hashes to 0.
pub fn simhash(text: &str) -> u64 {
    let mut votes = [0i32; 64];
    let mut saw_token = false;

    for token in text
        .split(|c: char| !c.is_alphanumeric())
        .filter(|t| !t.is_empty())
    {
        saw_token = true;
        let h = fnv1a64(token.to_lowercase().as_bytes());
        for (bit, vote) in votes.iter_mut().enumerate() {
            if h >> bit & 1 == 1 {
                *vote += 1;
            } else {
                *vote -= 1;
            }
        }
    }

    if !saw_token {
        return 0;
    }

    let mut signature = 0u64;
    for (bit, vote) in votes.iter().enumerate() {
        if *vote > 0 {
            signature |= 1 << bit;
        }
    }
    signature
}

/// Hamming distance between two signatures.
pub fn hamming_distance(a: u64, b: u64) -> u32 {
    (a ^ b).count_ones()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn deterministic() {
        let text = "The quick brown fox jumps over the lazy dog.";
        assert_eq!(simhash(text), simhash(text));
    }

    #[test]
    fn empty_is_zero() {
        assert_eq!(simhash(""), 0);
        assert_eq!(simhash("   \n\t"), 0);
    }

    #[test]
    fn near_duplicates_are_close() {
        let a = simhash("the engine stores memory in a graph of atoms and molecules");
        let b = simhash("the engine stores memory in a graph of atoms and compounds");
        let c = simhash("completely unrelated sentence about weather patterns tomorrow");
        assert!(hamming_distance(a, b) < hamming_distance(a, c));
    }

    #[test]
    fn case_insensitive_tokens() {
        assert_eq!(simhash("Alpha Beta"), simhash("alpha beta"));
    }
}
