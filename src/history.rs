//! Windowed history job.
//!
//! Maintains the local index of historical ticket copies and the daily stats
//! for one time window `(start, end]` (epoch milliseconds):
//!
//! 1. Tickets created in the window are read from the hub index, replayed
//!    back to their created state, and written to the local index.
//! 2. Tracked-field updates made during the window are read from the hub
//!    index in chronological order and applied to the local copies.
//! 3. A stats snapshot is computed from the local index and stored.
//!
//! Every step runs sequentially and any index error aborts the run.

use anyhow::{anyhow, bail, Context, Result};
use serde_json::{json, Value};
use tracing::{info, warn};

use crate::config::StatsConfig;
use crate::index::{hits_total, SearchIndex};
use crate::models::{StatsSnapshot, TicketState, TrackedTicket, Update};
use crate::replay::{apply_update, replay_original_state, TRACKED_UPDATE_TYPES};
use crate::stats::StatsAggregator;

/// Hub-index fields needed for replay.
const REPLAY_SOURCE_FIELDS: [&str; 6] = [
    "status",
    "ticket_type",
    "milestone",
    "component",
    "keywords",
    "updates",
];

/// An update observed in the window, with the ticket it belongs to.
#[derive(Debug, Clone, PartialEq)]
pub struct WindowUpdate {
    pub ticket_id: String,
    pub update: Update,
}

/// Counters and the resulting snapshot for one window run.
#[derive(Debug, Clone)]
pub struct WindowReport {
    pub tickets_reset: u64,
    pub updates_applied: u64,
    pub updates_skipped: u64,
    pub snapshot: StatsSnapshot,
}

/// Index names the window job reads from and writes to.
#[derive(Debug, Clone, Copy)]
pub struct WindowIndices<'a> {
    pub hub: &'a str,
    pub local: &'a str,
    pub stats: &'a str,
}

pub struct WindowJob<'a> {
    hub: &'a dyn SearchIndex,
    local: &'a dyn SearchIndex,
    indices: WindowIndices<'a>,
    config: &'a StatsConfig,
}

impl<'a> WindowJob<'a> {
    pub fn new(
        hub: &'a dyn SearchIndex,
        local: &'a dyn SearchIndex,
        indices: WindowIndices<'a>,
        config: &'a StatsConfig,
    ) -> Self {
        Self {
            hub,
            local,
            indices,
            config,
        }
    }

    pub async fn run(&self, start: i64, end: i64) -> Result<WindowReport> {
        info!(start, end, "collecting tickets created in window");
        let tickets = self.tickets_in_window(start, end).await?;

        let mut tickets_reset = 0;
        for (id, ticket) in &tickets {
            info!(ticket = %id, "resetting ticket to created state");
            let original = replay_original_state(ticket);
            self.store_state(id, &original).await?;
            tickets_reset += 1;
        }

        info!("collecting updates made in window");
        let updates = self.updates_in_window(start, end).await?;

        let mut updates_applied = 0;
        let mut updates_skipped = 0;
        for item in &updates {
            let Some(mut state) = self.load_state(&item.ticket_id).await? else {
                warn!(
                    ticket = %item.ticket_id,
                    update_type = item.update.update_type(),
                    "ticket missing from local index, skipping update"
                );
                updates_skipped += 1;
                continue;
            };
            if apply_update(&mut state, &item.update) {
                info!(ticket = %item.ticket_id, update_type = item.update.update_type(), "applying update");
                self.store_state(&item.ticket_id, &state).await?;
                updates_applied += 1;
            } else {
                updates_skipped += 1;
            }
        }

        info!("computing stats snapshot");
        let snapshot = StatsAggregator::new(
            self.local,
            self.indices.local,
            self.indices.stats,
            self.config,
        )
        .compute_and_persist_snapshot(start, end)
        .await?;

        Ok(WindowReport {
            tickets_reset,
            updates_applied,
            updates_skipped,
            snapshot,
        })
    }

    /// Hub tickets created in `(start, end]`, oldest first.
    pub async fn tickets_in_window(
        &self,
        start: i64,
        end: i64,
    ) -> Result<Vec<(String, TrackedTicket)>> {
        let page_size = self.config.ticket_page_size;
        let mut tickets = Vec::new();

        loop {
            let body = tickets_query(start, end, tickets.len(), page_size);
            let response = self
                .hub
                .search(self.indices.hub, &body)
                .await
                .context("searching tickets created in window")?;
            let total = hits_total(&response).unwrap_or(0) as usize;
            let hits = response
                .pointer("/hits/hits")
                .and_then(Value::as_array)
                .ok_or_else(|| anyhow!("ticket search returned no hits array"))?;

            for hit in hits {
                let id = hit_id(hit)?;
                let source = hit.get("_source").cloned().unwrap_or(Value::Null);
                let ticket: TrackedTicket = serde_json::from_value(source)
                    .with_context(|| format!("decoding hub ticket #{}", id))?;
                tickets.push((id, ticket));
            }

            if hits.is_empty() || tickets.len() >= total {
                break;
            }
        }

        Ok(tickets)
    }

    /// Tracked-field updates made in `(start, end]`, oldest first.
    pub async fn updates_in_window(&self, start: i64, end: i64) -> Result<Vec<WindowUpdate>> {
        let page_size = self.config.update_page_size;
        let window = self.config.max_inner_result_window;
        let mut updates = Vec::new();
        let mut offset = 0usize;

        loop {
            if offset + page_size > window {
                bail!(
                    "window has more tracked updates than one top_hits request can page \
                     through ({} collected); raise index.max_inner_result_window on {} and \
                     stats.max_inner_result_window to match",
                    updates.len(),
                    self.indices.hub
                );
            }
            let response = self
                .hub
                .search(self.indices.hub, &updates_query(start, end, offset, page_size))
                .await
                .context("searching updates made in window")?;
            let filtered = response
                .pointer("/aggregations/updates/filterUpdates")
                .ok_or_else(|| anyhow!("update search returned no filterUpdates aggregation"))?;
            let count = filtered
                .get("doc_count")
                .and_then(Value::as_u64)
                .unwrap_or(0) as usize;
            let hits = filtered
                .pointer("/rawData/hits/hits")
                .and_then(Value::as_array)
                .ok_or_else(|| anyhow!("update search returned no top hits"))?;

            for hit in hits {
                let ticket_id = hit_id(hit)?;
                let source = hit.get("_source").cloned().unwrap_or(Value::Null);
                let update: Update = serde_json::from_value(source)
                    .with_context(|| format!("decoding update for ticket #{}", ticket_id))?;
                updates.push(WindowUpdate { ticket_id, update });
            }

            offset += page_size;
            if hits.is_empty() || offset >= count {
                break;
            }
        }

        Ok(updates)
    }

    async fn load_state(&self, id: &str) -> Result<Option<TicketState>> {
        let doc = self
            .local
            .get_document(self.indices.local, id)
            .await
            .with_context(|| format!("loading local ticket #{}", id))?;
        doc.map(|source| {
            serde_json::from_value(source)
                .with_context(|| format!("decoding local ticket #{}", id))
        })
        .transpose()
    }

    async fn store_state(&self, id: &str, state: &TicketState) -> Result<()> {
        let body = serde_json::to_value(state)?;
        self.local
            .index_document(self.indices.local, id, &body)
            .await
            .with_context(|| format!("indexing local ticket #{}", id))
    }
}

/// One page of hub tickets created in `(start, end]`.
///
/// Ties on `created` are broken by ticket id so pages never overlap, and
/// totals are tracked exactly so paging does not stop at 10,000 hits.
pub fn tickets_query(start: i64, end: i64, from: usize, size: usize) -> Value {
    json!({
        "_source": REPLAY_SOURCE_FIELDS,
        "from": from,
        "size": size,
        "track_total_hits": true,
        "sort": [
            { "created": { "order": "asc" } },
            { "id": { "order": "asc" } }
        ],
        "query": { "range": { "created": { "gt": start, "lte": end } } },
    })
}

/// Nested aggregation returning one page of window updates as top hits.
pub fn updates_query(start: i64, end: i64, offset: usize, page_size: usize) -> Value {
    json!({
        "size": 0,
        "aggs": {
            "updates": {
                "nested": { "path": "updates" },
                "aggs": {
                    "filterUpdates": {
                        "filter": {
                            "bool": {
                                "filter": [
                                    { "range": { "updates.time": { "gt": start, "lte": end } } },
                                    { "terms": { "updates.update_type": TRACKED_UPDATE_TYPES } }
                                ]
                            }
                        },
                        "aggs": {
                            "rawData": {
                                "top_hits": {
                                    "from": offset,
                                    "size": page_size,
                                    "sort": [ { "updates.time": { "order": "asc" } } ]
                                }
                            }
                        }
                    }
                }
            }
        }
    })
}

fn hit_id(hit: &Value) -> Result<String> {
    match hit.get("_id") {
        Some(Value::String(s)) => Ok(s.clone()),
        Some(Value::Number(n)) => Ok(n.to_string()),
        _ => Err(anyhow!("search hit has no _id")),
    }
}
