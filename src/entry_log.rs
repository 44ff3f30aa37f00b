//! Append-only log of index entries.
//!
//! Every entry is `(id, vector, text, metadata)`. Ids come from an explicit
//! `next_id` counter and always equal the entry's position in the log, which
//! is the positional correspondence the persisted artifacts rely on. The
//! vector dimension is fixed by the first entry ever accepted.

use serde::Serialize;

use crate::embedding::dot;
use crate::models::Metadata;

#[derive(Debug, Clone, PartialEq)]
pub struct IndexEntry {
    pub id: u64,
    /// Unit-length embedding.
    pub vector: Vec<f32>,
    pub text: String,
    pub metadata: Metadata,
}

/// A normalized vector waiting for an id.
#[derive(Debug, Clone)]
pub struct Candidate {
    /// Position of the item in the caller's batch.
    pub position: usize,
    pub vector: Vec<f32>,
    pub text: String,
    pub metadata: Metadata,
}

/// A batch item excluded because its dimension does not match the log's.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Rejection {
    pub position: usize,
    pub expected: usize,
    pub actual: usize,
}

#[derive(Debug, Default, Clone)]
pub struct EntryLog {
    entries: Vec<IndexEntry>,
    dimension: Option<usize>,
    next_id: u64,
}

impl EntryLog {
    pub fn new() -> Self {
        Self::default()
    }

    /// Rebuild a log from persisted entries.
    ///
    /// Fails with a description of the first inconsistency: an id that is
    /// not its position, or a vector whose length differs from the first.
    pub fn from_entries(entries: Vec<IndexEntry>) -> Result<Self, String> {
        let dimension = entries.first().map(|e| e.vector.len());
        for (position, entry) in entries.iter().enumerate() {
            if entry.id != position as u64 {
                return Err(format!(
                    "entry at position {} has id {}",
                    position, entry.id
                ));
            }
            if Some(entry.vector.len()) != dimension {
                return Err(format!(
                    "entry {} has dimension {}, expected {}",
                    entry.id,
                    entry.vector.len(),
                    dimension.unwrap_or(0)
                ));
            }
        }
        Ok(Self {
            next_id: entries.len() as u64,
            entries,
            dimension,
        })
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn dimension(&self) -> Option<usize> {
        self.dimension
    }

    pub fn next_id(&self) -> u64 {
        self.next_id
    }

    pub fn entries(&self) -> &[IndexEntry] {
        &self.entries
    }

    /// Assign ids to candidates without modifying the log.
    ///
    /// The first candidate fixes the dimension of an empty log. Candidates
    /// of any other length are rejected. The returned entries must be passed
    /// to [`EntryLog::append`] unchanged.
    pub fn stage(&self, candidates: Vec<Candidate>) -> (Vec<IndexEntry>, Vec<Rejection>) {
        let mut dimension = self.dimension;
        let mut next_id = self.next_id;
        let mut staged = Vec::with_capacity(candidates.len());
        let mut rejected = Vec::new();

        for candidate in candidates {
            let expected = *dimension.get_or_insert(candidate.vector.len());
            if candidate.vector.len() != expected {
                rejected.push(Rejection {
                    position: candidate.position,
                    expected,
                    actual: candidate.vector.len(),
                });
                continue;
            }
            staged.push(IndexEntry {
                id: next_id,
                vector: candidate.vector,
                text: candidate.text,
                metadata: candidate.metadata,
            });
            next_id += 1;
        }

        (staged, rejected)
    }

    /// Append entries produced by [`EntryLog::stage`].
    pub fn append(&mut self, staged: Vec<IndexEntry>) {
        for entry in staged {
            debug_assert_eq!(entry.id, self.next_id);
            if self.dimension.is_none() {
                self.dimension = Some(entry.vector.len());
            }
            self.next_id = entry.id + 1;
            self.entries.push(entry);
        }
    }

    /// Exact inner-product search. Returns `(position, score)` pairs, best first.
    pub fn nearest(&self, query: &[f32], k: usize) -> Vec<(usize, f32)> {
        if k == 0 || Some(query.len()) != self.dimension {
            return Vec::new();
        }
        let mut scored: Vec<(usize, f32)> = self
            .entries
            .iter()
            .enumerate()
            .map(|(i, e)| (i, dot(&e.vector, query)))
            .collect();
        scored.sort_by(|a, b| b.1.total_cmp(&a.1).then(a.0.cmp(&b.0)));
        scored.truncate(k);
        scored
    }
}
