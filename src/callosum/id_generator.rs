//! Deterministic compound id generation.
//!
//! Two id families:
//!
//! - Temporal ids (`plan`, `action`, `result`): `{kind}_{sequence:06}_{hash8}`
//!   where the sequence is process-local and monotonic, and the hash is the
//!   first 8 hex chars of SHA-256 over the content. Combined temporal +
//!   content uniqueness keeps collisions out at 10^4+ entities.
//! - Pattern ids: `{kind}_{hash32}` — content only (128-bit SHA-256 prefix),
//!   so identical signatures produce identical ids across processes.

use sha2::{Digest, Sha256};
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};

/// Hex chars of SHA-256 kept in temporal compound ids.
const CONTENT_HASH_LEN: usize = 8;
/// Hex chars kept in pattern ids (128-bit prefix).
const PATTERN_HASH_LEN: usize = 32;

fn sha256_hex(content: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(content.as_bytes());
    format!("{:x}", hasher.finalize())
}

/// Issues `{kind}_{sequence:06}_{hash8}` compound ids.
///
/// # Example
///
/// ```rust
/// use callosum::id_generator::IdGenerator;
///
/// let ids = IdGenerator::new();
/// let a = ids.generate("plan", "create_file:/tmp/x");
/// let b = ids.generate("plan", "create_file:/tmp/x");
/// assert!(a.starts_with("plan_000000_"));
/// assert_ne!(a, b); // same content, different sequence
/// ```
#[derive(Debug, Default)]
pub struct IdGenerator {
    sequence: AtomicU64,
}

impl IdGenerator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Generate the next compound id for `kind` over `content`.
    pub fn generate(&self, kind: &str, content: &str) -> String {
        let sequence = self.sequence.fetch_add(1, Ordering::Relaxed);
        let hash = sha256_hex(content);
        format!("{}_{:06}_{}", kind, sequence, &hash[..CONTENT_HASH_LEN])
    }
}

/// Generate a content-only pattern id: `{kind}_{sha256[..32]}`.
///
/// Deterministic across processes — identical signatures always map to the
/// same id (and only colliding *content* can collide ids).
///
/// # Example
///
/// ```rust
/// use callosum::id_generator::generate_pattern_id;
///
/// let sig = ["create_directory", "write_file"];
/// let a = generate_pattern_id("seq", &sig);
/// let b = generate_pattern_id("seq", &sig);
/// assert_eq!(a, b);
/// assert!(a.starts_with("seq_"));
/// ```
pub fn generate_pattern_id<S: AsRef<str>>(kind: &str, signature: &[S]) -> String {
    let joined = signature
        .iter()
        .map(|s| s.as_ref())
        .collect::<Vec<_>>()
        .join("\u{1f}");
    let hash = sha256_hex(&joined);
    format!("{}_{}", kind, &hash[..PATTERN_HASH_LEN])
}

/// A parsed compound id.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CompoundId {
    pub kind: String,
    pub sequence: u64,
    pub content_hash: String,
}

impl CompoundId {
    /// Parse a `{kind}_{sequence:06}_{hash8}` id. Kinds may themselves
    /// contain underscores; the last two segments are sequence and hash.
    pub fn parse(id: &str) -> Option<CompoundId> {
        let mut parts: Vec<&str> = id.rsplitn(3, '_').collect();
        if parts.len() != 3 {
            return None;
        }
        parts.reverse();
        let kind = parts[0];
        let sequence = parts[1].parse::<u64>().ok()?;
        let content_hash = parts[2];
        if kind.is_empty() || content_hash.len() != CONTENT_HASH_LEN {
            return None;
        }
        Some(CompoundId {
            kind: kind.to_string(),
            sequence,
            content_hash: content_hash.to_string(),
        })
    }
}

/// Tracks issued ids and counts collisions. Collision detection is still
/// performed even though the id format makes collisions vanishingly rare.
#[derive(Debug, Default)]
pub struct IdCollisionDetector {
    seen: HashMap<String, u64>,
    collisions: u64,
}

impl IdCollisionDetector {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record an id. Returns `true` when it was fresh, `false` on collision.
    pub fn record(&mut self, id: &str) -> bool {
        let count = self.seen.entry(id.to_string()).or_insert(0);
        *count += 1;
        if *count > 1 {
            self.collisions += 1;
            false
        } else {
            true
        }
    }

    pub fn collisions(&self) -> u64 {
        self.collisions
    }

    pub fn unique_ids(&self) -> usize {
        self.seen.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn compound_ids_are_unique_under_load() {
        let ids = IdGenerator::new();
        let mut detector = IdCollisionDetector::new();
        for i in 0..10_000 {
            let id = ids.generate("pattern", &format!("action_{}", i % 7));
            assert!(detector.record(&id));
        }
        assert_eq!(detector.unique_ids(), 10_000);
        assert_eq!(detector.collisions(), 0);
    }

    #[test]
    fn pattern_ids_are_content_deterministic() {
        let a = generate_pattern_id("seq", &["write_file", "write_file", "create_directory"]);
        let b = generate_pattern_id("seq", &["write_file", "write_file", "create_directory"]);
        let c = generate_pattern_id("seq", &["create_directory", "write_file", "write_file"]);
        assert_eq!(a, b);
        assert_ne!(a, c);
        // kind + separator + 32 hex chars
        assert_eq!(a.len(), "seq".len() + 1 + 32);
    }

    #[test]
    fn pattern_ids_resist_concatenation_ambiguity() {
        // ["ab", "c"] and ["a", "bc"] must not collide.
        let a = generate_pattern_id("seq", &["ab", "c"]);
        let b = generate_pattern_id("seq", &["a", "bc"]);
        assert_ne!(a, b);
    }

    #[test]
    fn parse_round_trips() {
        let ids = IdGenerator::new();
        let id = ids.generate("plan", "content");
        let parsed = CompoundId::parse(&id).unwrap();
        assert_eq!(parsed.kind, "plan");
        assert_eq!(parsed.sequence, 0);
        assert_eq!(parsed.content_hash.len(), 8);

        assert!(CompoundId::parse("nonsense").is_none());
        assert!(CompoundId::parse("plan_xx_deadbeef").is_none());
    }
}
