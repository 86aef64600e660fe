//! Brute-force nearest-neighbor store backing identity resolution.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Opaque handle naming a registered identity.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize,
)]
pub struct IdentityId(u64);

impl IdentityId {
    pub(crate) fn new(raw: u64) -> Self {
        Self(raw)
    }

    /// Returns the raw handle value.
    pub fn as_u64(&self) -> u64 {
        self.0
    }
}

impl fmt::Display for IdentityId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Metadata for one registered identity.
///
/// Created exactly once by the resolver on a no-match decision and never
/// deleted; only `embedding_count` changes afterwards.
#[derive(Debug, Clone)]
pub struct Identity {
    /// Stable handle for this identity.
    pub id: IdentityId,
    /// Optional operator-assigned name; `None` until labeled.
    pub display_name: Option<String>,
    /// When the identity was first registered.
    pub created_at: DateTime<Utc>,
    /// Number of embeddings associated so far.
    pub embedding_count: u32,
}

/// Errors raised by index operations.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IndexError {
    /// The embedding's length differs from the index's fixed dimension.
    DimensionMismatch {
        /// Dimension the index was built with.
        expected: usize,
        /// Dimension of the offending embedding.
        actual: usize,
    },
}

impl fmt::Display for IndexError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            IndexError::DimensionMismatch { expected, actual } => write!(
                f,
                "embedding has {actual} dimensions but the index expects {expected}"
            ),
        }
    }
}

impl std::error::Error for IndexError {}

/// Nearest entry returned by a search.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SearchHit {
    /// Identity owning the nearest stored embedding.
    pub identity: IdentityId,
    /// Squared Euclidean distance to that embedding.
    pub distance: f32,
}

#[derive(Debug)]
struct IndexEntry {
    embedding: Vec<f32>,
    identity: IdentityId,
}

/// Append-only vector index mapping embeddings to identity handles.
///
/// Search is exact brute force; at the entry counts this system sees
/// (hundreds to low thousands per process) a linear scan is cheaper than
/// maintaining an approximate structure.
#[derive(Debug)]
pub struct IdentityIndex {
    dimension: usize,
    entries: Vec<IndexEntry>,
}

impl IdentityIndex {
    /// Creates an empty index with a fixed embedding dimension.
    pub fn new(dimension: usize) -> Self {
        Self {
            dimension,
            entries: Vec::new(),
        }
    }

    /// Dimension every stored embedding must have.
    pub fn dimension(&self) -> usize {
        self.dimension
    }

    /// Number of stored entries.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether the index holds no entries.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    fn check_dimension(&self, embedding: &[f32]) -> Result<(), IndexError> {
        if embedding.len() != self.dimension {
            return Err(IndexError::DimensionMismatch {
                expected: self.dimension,
                actual: embedding.len(),
            });
        }
        Ok(())
    }

    /// Returns the single nearest stored entry, or `None` on an empty index.
    ///
    /// Deterministic for a fixed entry set: ties are broken by insertion
    /// order, earliest entry wins (strict `<` comparison below).
    pub fn search(&self, embedding: &[f32]) -> Result<Option<SearchHit>, IndexError> {
        self.check_dimension(embedding)?;
        let mut best: Option<SearchHit> = None;
        for entry in &self.entries {
            let distance = squared_l2(&entry.embedding, embedding);
            match best {
                Some(hit) if distance >= hit.distance => {}
                _ => {
                    best = Some(SearchHit {
                        identity: entry.identity,
                        distance,
                    });
                }
            }
        }
        Ok(best)
    }

    /// Appends an embedding under the given identity handle.
    pub fn insert(&mut self, embedding: Vec<f32>, identity: IdentityId) -> Result<(), IndexError> {
        self.check_dimension(&embedding)?;
        self.entries.push(IndexEntry {
            embedding,
            identity,
        });
        Ok(())
    }

    /// Iterates stored entries in insertion order.
    pub fn entries(&self) -> impl Iterator<Item = (IdentityId, &[f32])> {
        self.entries
            .iter()
            .map(|entry| (entry.identity, entry.embedding.as_slice()))
    }
}

fn squared_l2(a: &[f32], b: &[f32]) -> f32 {
    a.iter()
        .zip(b.iter())
        .map(|(x, y)| {
            let d = x - y;
            d * d
        })
        .sum()
}
