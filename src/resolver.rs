//! Match-or-register decisions over the shared identity index.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use tokio::sync::Mutex;

use crate::index::{Identity, IdentityId, IdentityIndex, IndexError};

/// Outcome of resolving one embedding.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Resolution {
    /// The embedding fell within the match threshold of a known identity.
    Matched(IdentityId),
    /// No known identity was close enough; a fresh one was created.
    Registered(IdentityId),
}

impl Resolution {
    /// Identity the embedding now belongs to.
    pub fn identity(&self) -> IdentityId {
        match self {
            Resolution::Matched(id) | Resolution::Registered(id) => *id,
        }
    }

    /// Whether this resolution created a new identity.
    pub fn is_registration(&self) -> bool {
        matches!(self, Resolution::Registered(_))
    }
}

/// Snapshot row describing one registered identity, suitable for JSONL export.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IdentityRecord {
    /// Identity handle.
    pub id: IdentityId,
    /// Operator-assigned name, if any.
    pub display_name: Option<String>,
    /// Registration time.
    pub created_at: DateTime<Utc>,
    /// Embeddings associated with the identity.
    pub embedding_count: u32,
    /// First embedding observed for the identity.
    pub embedding: Vec<f32>,
}

#[derive(Debug)]
struct ResolverState {
    index: IdentityIndex,
    identities: HashMap<IdentityId, Identity>,
    next_id: u64,
}

/// Decision layer that keeps the index and identity registry consistent.
///
/// The search-threshold-decide-insert sequence runs as one critical section
/// behind a single async mutex, so two cameras resolving near-duplicate
/// embeddings at the same time can never both take the "no match" path and
/// register the same person twice.
#[derive(Debug)]
pub struct IdentityResolver {
    match_threshold: f32,
    state: Mutex<ResolverState>,
}

impl IdentityResolver {
    /// Creates a resolver over an empty index.
    pub fn new(dimension: usize, match_threshold: f32) -> Self {
        Self {
            match_threshold,
            state: Mutex::new(ResolverState {
                index: IdentityIndex::new(dimension),
                identities: HashMap::new(),
                next_id: 1,
            }),
        }
    }

    /// Distance cutoff separating a match from a new registration.
    pub fn match_threshold(&self) -> f32 {
        self.match_threshold
    }

    /// Resolves one embedding to an existing or freshly registered identity.
    pub async fn resolve(&self, embedding: Vec<f32>) -> Result<Resolution, IndexError> {
        let mut state = self.state.lock().await;
        let hit = state.index.search(&embedding)?;
        match hit {
            Some(hit) if hit.distance < self.match_threshold => {
                state.index.insert(embedding, hit.identity)?;
                if let Some(identity) = state.identities.get_mut(&hit.identity) {
                    identity.embedding_count += 1;
                }
                Ok(Resolution::Matched(hit.identity))
            }
            _ => {
                let id = IdentityId::new(state.next_id);
                state.next_id += 1;
                state.index.insert(embedding, id)?;
                state.identities.insert(
                    id,
                    Identity {
                        id,
                        display_name: None,
                        created_at: Utc::now(),
                        embedding_count: 1,
                    },
                );
                Ok(Resolution::Registered(id))
            }
        }
    }

    /// Returns a copy of the identity metadata, if registered.
    pub async fn identity(&self, id: IdentityId) -> Option<Identity> {
        self.state.lock().await.identities.get(&id).cloned()
    }

    /// Number of distinct identities registered so far.
    pub async fn identity_count(&self) -> usize {
        self.state.lock().await.identities.len()
    }

    /// Number of embeddings stored in the index.
    pub async fn entry_count(&self) -> usize {
        self.state.lock().await.index.len()
    }

    /// Exports one record per identity, carrying its earliest embedding.
    pub async fn export(&self) -> Vec<IdentityRecord> {
        let state = self.state.lock().await;
        let mut first_embedding: HashMap<IdentityId, Vec<f32>> = HashMap::new();
        for (id, embedding) in state.index.entries() {
            first_embedding.entry(id).or_insert_with(|| embedding.to_vec());
        }

        let mut records: Vec<IdentityRecord> = state
            .identities
            .values()
            .map(|identity| IdentityRecord {
                id: identity.id,
                display_name: identity.display_name.clone(),
                created_at: identity.created_at,
                embedding_count: identity.embedding_count,
                embedding: first_embedding.remove(&identity.id).unwrap_or_default(),
            })
            .collect();
        records.sort_by_key(|record| record.id);
        records
    }
}
