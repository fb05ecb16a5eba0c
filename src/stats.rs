//! Daily ticket statistics.
//!
//! Counts all tickets in the local index, then counts open tickets with a
//! nested terms aggregation and flattens the bucket tree into a
//! [`StatsSnapshot`]. The snapshot is upserted into the stats index under the
//! UTC date of the window start, so re-running a window overwrites it.
//!
//! # Rollups
//!
//! ```text
//! ticket_type
//! keyword ─ ticket_type
//! milestone ─┬ ticket_type
//!            └ keyword ─ ticket_type
//! component ─┬ ticket_type
//!            ├ keyword ─ ticket_type
//!            └ milestone ─┬ ticket_type
//!                         └ keyword ─ ticket_type
//! ```
//!
//! The same [`Dimension`] tree builds the query and walks the response.

use std::collections::BTreeMap;

use anyhow::{anyhow, bail, Context, Result};
use chrono::DateTime;
use serde_json::{json, Map, Value};
use tracing::info;

use crate::config::StatsConfig;
use crate::index::{hits_total, SearchIndex};
use crate::models::{Bucket, StatsSnapshot};

/// How a dimension's terms aggregation selects buckets.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Terms {
    /// Default terms aggregation.
    All,
    /// Only keywords from the configured allow-list.
    Keywords,
    /// Top 100 keys, ordered by key.
    Top { descending: bool },
}

/// One level of the rollup tree.
#[derive(Debug, Clone, Copy)]
pub struct Dimension {
    /// Aggregation name, also the key in the snapshot document.
    pub name: &'static str,
    /// Indexed field the terms aggregation runs on.
    pub field: &'static str,
    pub terms: Terms,
    pub children: &'static [Dimension],
}

const TOP_SIZE: u64 = 100;

const TICKET_TYPE: Dimension = Dimension {
    name: "ticket_type",
    field: "ticket_type",
    terms: Terms::All,
    children: &[],
};

const KEYWORD: Dimension = Dimension {
    name: "keyword",
    field: "keywords",
    terms: Terms::Keywords,
    children: &[TICKET_TYPE],
};

const MILESTONE: Dimension = Dimension {
    name: "milestone",
    field: "milestone",
    terms: Terms::Top { descending: true },
    children: &[TICKET_TYPE, KEYWORD],
};

const COMPONENT: Dimension = Dimension {
    name: "component",
    field: "component",
    terms: Terms::Top { descending: false },
    children: &[TICKET_TYPE, KEYWORD, MILESTONE],
};

/// Top-level rollups of a snapshot.
pub const ROLLUPS: &[Dimension] = &[TICKET_TYPE, KEYWORD, MILESTONE, COMPONENT];

/// Build the `aggs` object for a set of sibling dimensions.
pub fn build_aggs(dimensions: &[Dimension], keywords: &[String]) -> Value {
    let mut aggs = Map::new();
    for dim in dimensions {
        let mut terms = json!({ "field": dim.field });
        match dim.terms {
            Terms::All => {}
            Terms::Keywords => terms["include"] = json!(keywords),
            Terms::Top { descending } => {
                terms["size"] = json!(TOP_SIZE);
                terms["order"] = json!({ "_key": if descending { "desc" } else { "asc" } });
            }
        }
        let mut agg = json!({ "terms": terms });
        if !dim.children.is_empty() {
            agg["aggs"] = build_aggs(dim.children, keywords);
        }
        aggs.insert(dim.name.to_string(), agg);
    }
    Value::Object(aggs)
}

/// Query counting open tickets and aggregating every rollup.
pub fn open_tickets_query(config: &StatsConfig) -> Value {
    json!({
        "size": 0,
        "query": {
            "bool": {
                "filter": {
                    "terms": { "status": config.open_statuses }
                }
            }
        },
        "aggs": build_aggs(ROLLUPS, &config.keywords),
    })
}

/// Flatten one aggregation result into buckets, following `dim`'s children.
pub fn flatten_buckets(aggregation: &Value, dim: &Dimension) -> Result<Vec<Bucket>> {
    let buckets = aggregation
        .get("buckets")
        .and_then(Value::as_array)
        .ok_or_else(|| anyhow!("aggregation `{}` has no buckets", dim.name))?;

    buckets
        .iter()
        .map(|raw| {
            let key = bucket_key(raw)
                .ok_or_else(|| anyhow!("bucket in `{}` has no key", dim.name))?;
            let doc_count = raw
                .get("doc_count")
                .and_then(Value::as_u64)
                .ok_or_else(|| anyhow!("bucket `{}` in `{}` has no doc_count", key, dim.name))?;
            let mut children = BTreeMap::new();
            for child in dim.children {
                let nested = raw.get(child.name).ok_or_else(|| {
                    anyhow!("bucket `{}` in `{}` is missing `{}`", key, dim.name, child.name)
                })?;
                children.insert(child.name.to_string(), flatten_buckets(nested, child)?);
            }
            Ok(Bucket {
                key,
                doc_count,
                children,
            })
        })
        .collect()
}

fn bucket_key(raw: &Value) -> Option<String> {
    if let Some(s) = raw.get("key_as_string").and_then(Value::as_str) {
        return Some(s.to_string());
    }
    match raw.get("key")? {
        Value::String(s) => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        Value::Bool(b) => Some(b.to_string()),
        _ => None,
    }
}

/// Snapshot document id: the UTC calendar date of `window_start`.
pub fn snapshot_id(window_start: i64) -> Result<String> {
    DateTime::from_timestamp_millis(window_start)
        .map(|dt| dt.format("%Y-%m-%d").to_string())
        .ok_or_else(|| anyhow!("window start {} is out of range", window_start))
}

/// Computes and stores daily snapshots from the local index.
pub struct StatsAggregator<'a> {
    index: &'a dyn SearchIndex,
    ticket_index: &'a str,
    stats_index: &'a str,
    config: &'a StatsConfig,
}

impl<'a> StatsAggregator<'a> {
    pub fn new(
        index: &'a dyn SearchIndex,
        ticket_index: &'a str,
        stats_index: &'a str,
        config: &'a StatsConfig,
    ) -> Self {
        Self {
            index,
            ticket_index,
            stats_index,
            config,
        }
    }

    /// Query the local index and build the snapshot for a window.
    pub async fn compute_snapshot(&self, window_start: i64, window_end: i64) -> Result<StatsSnapshot> {
        if window_end < window_start {
            bail!(
                "window end {} is before window start {}",
                window_end,
                window_start
            );
        }

        let all = self
            .index
            .search(self.ticket_index, &json!({ "size": 0, "query": { "match_all": {} } }))
            .await
            .context("counting all tickets")?;
        let total = hits_total(&all).ok_or_else(|| anyhow!("total count missing hits.total"))?;

        let open = self
            .index
            .search(self.ticket_index, &open_tickets_query(self.config))
            .await
            .context("aggregating open tickets")?;
        let open_count =
            hits_total(&open).ok_or_else(|| anyhow!("open count missing hits.total"))?;
        let aggs = open
            .get("aggregations")
            .ok_or_else(|| anyhow!("open ticket search returned no aggregations"))?;

        let mut rollups = Vec::with_capacity(ROLLUPS.len());
        for dim in ROLLUPS {
            let agg = aggs
                .get(dim.name)
                .ok_or_else(|| anyhow!("aggregation `{}` missing from response", dim.name))?;
            rollups.push(flatten_buckets(agg, dim)?);
        }
        let mut rollups = rollups.into_iter();
        let mut next = || rollups.next().unwrap_or_default();

        Ok(StatsSnapshot {
            time: window_start,
            total,
            open: open_count,
            ticket_type: next(),
            keyword: next(),
            milestone: next(),
            component: next(),
        })
    }

    /// Compute the snapshot and upsert it under its date id.
    pub async fn compute_and_persist_snapshot(
        &self,
        window_start: i64,
        window_end: i64,
    ) -> Result<StatsSnapshot> {
        let snapshot = self.compute_snapshot(window_start, window_end).await?;
        let id = snapshot_id(window_start)?;
        let body = serde_json::to_value(&snapshot)?;
        self.index
            .index_document(self.stats_index, &id, &body)
            .await
            .with_context(|| format!("storing snapshot {}", id))?;
        info!(
            snapshot = %id,
            total = snapshot.total,
            open = snapshot.open,
            "indexed stats snapshot"
        );
        Ok(snapshot)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn query_nests_rollups() {
        let config = StatsConfig::default();
        let query = open_tickets_query(&config);
        let aggs = &query["aggs"];

        assert_eq!(query["query"]["bool"]["filter"]["terms"]["status"][0], "new");
        assert!(aggs["ticket_type"].get("aggs").is_none());
        assert_eq!(aggs["keyword"]["terms"]["field"], "keywords");
        assert_eq!(aggs["keyword"]["terms"]["include"][0], "has-patch");
        assert_eq!(aggs["milestone"]["terms"]["order"]["_key"], "desc");
        assert_eq!(aggs["milestone"]["terms"]["size"], 100);
        assert_eq!(aggs["component"]["terms"]["order"]["_key"], "asc");
        assert_eq!(
            aggs["component"]["aggs"]["milestone"]["aggs"]["keyword"]["aggs"]["ticket_type"]
                ["terms"]["field"],
            "ticket_type"
        );
    }

    #[test]
    fn flattens_nested_buckets() {
        let agg = json!({
            "buckets": [
                {
                    "key": "has-patch",
                    "doc_count": 3,
                    "ticket_type": { "buckets": [
                        { "key": "defect (bug)", "doc_count": 2 },
                        { "key": "enhancement", "doc_count": 1 }
                    ]}
                }
            ]
        });
        let buckets = flatten_buckets(&agg, &KEYWORD).unwrap();
        assert_eq!(buckets.len(), 1);
        assert_eq!(buckets[0].key, "has-patch");
        assert_eq!(buckets[0].doc_count, 3);
        let types = &buckets[0].children["ticket_type"];
        assert_eq!(types[1].key, "enhancement");
        assert!(types[1].children.is_empty());
    }

    #[test]
    fn missing_child_aggregation_is_an_error() {
        let agg = json!({ "buckets": [ { "key": "6.0", "doc_count": 1 } ] });
        let err = flatten_buckets(&agg, &MILESTONE).unwrap_err();
        assert!(err.to_string().contains("missing `ticket_type`"));
    }

    #[test]
    fn numeric_keys_become_strings() {
        let agg = json!({ "buckets": [ { "key": 5, "doc_count": 1 } ] });
        assert_eq!(flatten_buckets(&agg, &TICKET_TYPE).unwrap()[0].key, "5");
    }

    #[test]
    fn snapshot_id_is_utc_date_of_start() {
        // 2024-03-09T23:59:59.999Z
        assert_eq!(snapshot_id(1_710_028_799_999).unwrap(), "2024-03-09");
        assert_eq!(snapshot_id(1_710_028_800_000).unwrap(), "2024-03-10");
    }
}
