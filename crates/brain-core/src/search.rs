//! Semantic search over a user's memories.
//!
//! 1. Embed the query and fetch `top_k × CANDIDATE_MULTIPLIER` chunk matches
//!    from the owner's namespace.
//! 2. Group matches by parent record.
//! 3. Hydrate each record from the store; records that no longer exist for
//!    the owner are dropped. The best chunk whose text still occurs in the
//!    current content gives the score and snippet; a record with only
//!    stale chunks is dropped.
//! 4. Sort by score (desc), updated_at (desc), id (asc) and truncate.

use std::collections::HashMap;

use thiserror::Error;

use crate::index::{IndexError, Indexer};
use crate::models::{Identity, SearchHit, NOTE_ID_KEY, TEXT_KEY};
use crate::store::{MemoryStore, StoreError};

pub const DEFAULT_TOP_K: usize = 5;
pub const MAX_TOP_K: usize = 50;
/// Chunk matches fetched per requested result, to survive grouping.
const CANDIDATE_MULTIPLIER: usize = 3;
const SNIPPET_CHARS: usize = 240;

#[derive(Debug, Error)]
pub enum SearchError {
    #[error("query cannot be empty")]
    EmptyQuery,

    #[error("vector search is not configured")]
    NotConfigured,

    #[error(transparent)]
    Index(#[from] IndexError),

    #[error(transparent)]
    Store(#[from] StoreError),
}

/// Clamp a requested result count into `1..=MAX_TOP_K`.
pub fn clamp_top_k(top_k: Option<usize>) -> usize {
    top_k.unwrap_or(DEFAULT_TOP_K).clamp(1, MAX_TOP_K)
}

/// Search `identity`'s memories for `query`.
pub async fn semantic_search(
    store: &dyn MemoryStore,
    indexer: Option<&Indexer>,
    identity: &Identity,
    query: &str,
    top_k: usize,
) -> Result<Vec<SearchHit>, SearchError> {
    let query = query.trim();
    if query.is_empty() {
        return Err(SearchError::EmptyQuery);
    }
    let indexer = indexer.ok_or(SearchError::NotConfigured)?;
    let top_k = top_k.clamp(1, MAX_TOP_K);

    let matches = indexer
        .query(&identity.user_id, query, top_k * CANDIDATE_MULTIPLIER)
        .await?;
    let match_count = matches.len();

    // Candidate chunks per record, best first after sorting below.
    let mut by_note: HashMap<String, Vec<(f32, String)>> = HashMap::new();
    for m in matches {
        let Some(note_id) = m.metadata.get(NOTE_ID_KEY).and_then(|v| v.as_str()) else {
            continue;
        };
        let text = m
            .metadata
            .get(TEXT_KEY)
            .and_then(|v| v.as_str())
            .unwrap_or_default()
            .to_string();
        by_note
            .entry(note_id.to_string())
            .or_default()
            .push((m.score, text));
    }

    let mut hits = Vec::with_capacity(by_note.len());
    for (note_id, mut candidates) in by_note {
        let Some(record) = store.get(&identity.user_id, &note_id).await? else {
            tracing::debug!(note_id = %note_id, "dropping hit for missing memory");
            continue;
        };

        // A re-save that yields fewer chunks leaves the old tail vectors in
        // the index. Only chunks whose text is still in the record count.
        candidates.sort_by(|a, b| b.0.total_cmp(&a.0));
        let Some((score, text)) = candidates
            .into_iter()
            .find(|(_, text)| !text.is_empty() && record.content.contains(text.as_str()))
        else {
            tracing::debug!(note_id = %note_id, "dropping hit for stale chunks");
            continue;
        };

        hits.push(SearchHit {
            note_id: record.id.clone(),
            score,
            snippet: make_snippet(&text),
            title: record.title().map(str::to_string),
            metadata: record.metadata,
            updated_at: record.updated_at,
        });
    }

    hits.sort_by(|a, b| {
        b.score
            .partial_cmp(&a.score)
            .unwrap_or(std::cmp::Ordering::Equal)
            .then(b.updated_at.cmp(&a.updated_at))
            .then(a.note_id.cmp(&b.note_id))
    });
    hits.truncate(top_k);

    tracing::debug!(
        user_id = %identity.user_id,
        matches = match_count,
        results = hits.len(),
        "semantic search"
    );
    Ok(hits)
}

fn make_snippet(text: &str) -> String {
    if text.chars().count() <= SNIPPET_CHARS {
        return text.to_string();
    }
    let mut snippet: String = text.chars().take(SNIPPET_CHARS).collect();
    snippet.push('…');
    snippet
}
