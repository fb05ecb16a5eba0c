//! Ticket sync: fetch, transform, load.
//!
//! Each ticket is fetched from the tracker, turned into a [`Ticket`]
//! document and written to the hub index. When the index rejects a document
//! because of malformed text, the ticket is fetched and built again with
//! re-encoded free text and written once more. Nothing else is retried.
//!
//! Batches run strictly in order and stop at the first failure.
//!
//! [`Ticket`]: crate::models::Ticket

use thiserror::Error;
use tracing::{info, warn};

use crate::error::{IndexError, TrackerError};
use crate::index::SearchIndex;
use crate::tracker::Tracker;
use crate::transform::build_ticket_document;

/// Result of syncing one ticket.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SyncOutcome {
    Indexed {
        id: u64,
        attempts: u32,
        reencoded: bool,
    },
    /// The tracker has no such ticket; nothing was written.
    NotFound { id: u64 },
}

/// A fatal sync failure, carrying the ticket that caused it.
#[derive(Debug, Error)]
pub enum SyncError {
    #[error("failed indexing ticket #{id} after {attempts} attempt(s): {source}")]
    Index {
        id: u64,
        attempts: u32,
        #[source]
        source: IndexError,
    },

    #[error("failed fetching ticket #{id}: {source}")]
    Tracker {
        id: u64,
        #[source]
        source: TrackerError,
    },

    #[error("failed deleting ticket #{id}: {source}")]
    Delete {
        id: u64,
        #[source]
        source: IndexError,
    },
}

impl SyncError {
    pub fn ticket_id(&self) -> u64 {
        match self {
            SyncError::Index { id, .. }
            | SyncError::Tracker { id, .. }
            | SyncError::Delete { id, .. } => *id,
        }
    }
}

/// Counters for a batch sync.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct SyncSummary {
    pub indexed: u64,
    pub skipped: u64,
    pub reencoded: u64,
}

enum AttemptError {
    Tracker(TrackerError),
    Index(IndexError),
}

/// Syncs tickets from a tracker into one index.
pub struct TicketSync<'a> {
    tracker: &'a dyn Tracker,
    index: &'a dyn SearchIndex,
    base_url: &'a str,
    index_name: &'a str,
}

impl<'a> TicketSync<'a> {
    pub fn new(
        tracker: &'a dyn Tracker,
        index: &'a dyn SearchIndex,
        base_url: &'a str,
        index_name: &'a str,
    ) -> Self {
        Self {
            tracker,
            index,
            base_url,
            index_name,
        }
    }

    /// Sync one ticket, retrying once with re-encoded text if the index
    /// rejects the document's encoding.
    pub async fn sync_ticket(&self, id: u64) -> Result<SyncOutcome, SyncError> {
        let mut encode_fallback = false;
        let mut attempts = 0;

        loop {
            attempts += 1;
            match self.attempt(id, encode_fallback).await {
                Ok(true) => {
                    info!(ticket = id, attempts, reencoded = encode_fallback, "indexed ticket");
                    return Ok(SyncOutcome::Indexed {
                        id,
                        attempts,
                        reencoded: encode_fallback,
                    });
                }
                Ok(false) => {
                    info!(ticket = id, "ticket not found in tracker, skipping");
                    return Ok(SyncOutcome::NotFound { id });
                }
                Err(AttemptError::Index(e)) if e.is_encoding() && !encode_fallback => {
                    warn!(ticket = id, error = %e, "index rejected ticket text, retrying re-encoded");
                    encode_fallback = true;
                }
                Err(AttemptError::Index(source)) => {
                    return Err(SyncError::Index {
                        id,
                        attempts,
                        source,
                    })
                }
                Err(AttemptError::Tracker(source)) => {
                    return Err(SyncError::Tracker { id, source })
                }
            }
        }
    }

    /// One fetch-transform-load pass. `Ok(false)` when the ticket is missing.
    async fn attempt(&self, id: u64, encode_fallback: bool) -> Result<bool, AttemptError> {
        let ticket = build_ticket_document(self.tracker, self.base_url, id, encode_fallback)
            .await
            .map_err(AttemptError::Tracker)?;
        let Some(ticket) = ticket else {
            return Ok(false);
        };
        let body = serde_json::to_value(&ticket)
            .map_err(|e| AttemptError::Index(IndexError::from(e)))?;
        self.index
            .index_document(self.index_name, &id.to_string(), &body)
            .await
            .map_err(AttemptError::Index)?;
        Ok(true)
    }

    /// Sync tickets in order, stopping at the first failure.
    pub async fn sync_tickets(&self, ids: &[u64]) -> Result<SyncSummary, SyncError> {
        let mut summary = SyncSummary::default();
        for (n, &id) in ids.iter().enumerate() {
            info!(ticket = id, n = n + 1, total = ids.len(), "syncing ticket");
            match self.sync_ticket(id).await? {
                SyncOutcome::Indexed { reencoded, .. } => {
                    summary.indexed += 1;
                    if reencoded {
                        summary.reencoded += 1;
                    }
                }
                SyncOutcome::NotFound { .. } => summary.skipped += 1,
            }
        }
        Ok(summary)
    }

    /// Remove a ticket document. Returns `false` if it was not indexed.
    pub async fn delete_ticket(&self, id: u64) -> Result<bool, SyncError> {
        let existed = self
            .index
            .delete_document(self.index_name, &id.to_string())
            .await
            .map_err(|source| SyncError::Delete { id, source })?;
        if existed {
            info!(ticket = id, "deleted ticket");
        } else {
            info!(ticket = id, "ticket was not indexed");
        }
        Ok(existed)
    }
}
