//! Core data models used throughout trac-sync.
//!
//! These types represent the raw tracker records, the normalized ticket
//! documents written to the hub index, the historical ticket copies written to
//! the local index, and the daily statistics snapshots.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

/// Raw ticket fields as returned by the tracker.
///
/// Timestamps are in seconds. Every field the tracker may omit defaults to an
/// empty string.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RawTicket {
    pub id: u64,
    pub time: i64,
    pub changetime: i64,
    pub status: String,
    pub ticket_type: String,
    pub summary: String,
    pub description: String,
    pub reporter: String,
    pub owner: String,
    pub milestone: String,
    pub priority: String,
    pub severity: String,
    pub version: String,
    pub component: String,
    pub keywords: String,
    pub focuses: String,
    pub cc: String,
    pub resolution: String,
}

/// One raw change-log entry: `(timestamp, author, field, old, new)`.
///
/// The meaning of `old` and `new` depends on `field`: for attachments `new`
/// holds the filename, for comments `old` holds the comment numbering and
/// `new` the comment text.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RawChange {
    pub time: i64,
    pub author: String,
    pub field: String,
    pub old: String,
    pub new: String,
}

/// Normalized ticket document stored in the hub index.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Ticket {
    pub id: u64,
    pub link: String,
    pub status: String,
    pub ticket_type: String,
    pub created: i64,
    pub updated: i64,
    pub summary: String,
    pub description: String,
    pub reporter: String,
    pub owner: String,
    pub milestone: String,
    pub priority: String,
    pub severity: String,
    pub version: String,
    pub component: String,
    pub keywords: Vec<String>,
    pub focuses: Vec<String>,
    /// Raw cc list. Kept for completeness but never written to the index.
    #[serde(skip_serializing)]
    pub cc: String,
    pub resolution: String,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub updates: Vec<Update>,
}

/// One normalized change-log entry.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "UpdateRecord", into = "UpdateRecord")]
pub struct Update {
    /// Milliseconds since the epoch.
    pub time: i64,
    pub user: String,
    pub change: Change,
}

/// The type-specific payload of an [`Update`].
#[derive(Debug, Clone, PartialEq)]
pub enum Change {
    Attachment {
        link: String,
    },
    Comment {
        comment: String,
        comment_id: Option<String>,
        replying_to: Option<i64>,
        link: Option<String>,
    },
    Keywords {
        previous_terms: Vec<String>,
        new_terms: Vec<String>,
    },
    Focuses {
        previous_terms: Vec<String>,
        new_terms: Vec<String>,
    },
    /// Any other field change (status, milestone, type, summary, ...).
    Field {
        name: String,
        previous: String,
        new: String,
    },
}

impl Update {
    /// The `update_type` discriminant as written to the index.
    pub fn update_type(&self) -> &str {
        match &self.change {
            Change::Attachment { .. } => "attachment",
            Change::Comment { .. } => "comment",
            Change::Keywords { .. } => "keywords",
            Change::Focuses { .. } => "focuses",
            Change::Field { name, .. } => name,
        }
    }
}

/// Flat wire shape of an [`Update`]. Which optional keys are present is
/// decided by `update_type`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
struct UpdateRecord {
    time: i64,
    #[serde(default)]
    user: String,
    update_type: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    link: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    comment: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    comment_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    replying_to: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    previous_terms: Option<Vec<String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    new_terms: Option<Vec<String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    previous: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    new: Option<String>,
}

impl From<Update> for UpdateRecord {
    fn from(update: Update) -> Self {
        let update_type = update.update_type().to_string();
        let mut record = UpdateRecord {
            time: update.time,
            user: update.user,
            update_type,
            ..Default::default()
        };
        match update.change {
            Change::Attachment { link } => record.link = Some(link),
            Change::Comment {
                comment,
                comment_id,
                replying_to,
                link,
            } => {
                record.comment = Some(comment);
                record.comment_id = comment_id;
                record.replying_to = replying_to;
                record.link = link;
            }
            Change::Keywords {
                previous_terms,
                new_terms,
            }
            | Change::Focuses {
                previous_terms,
                new_terms,
            } => {
                record.previous_terms = Some(previous_terms);
                record.new_terms = Some(new_terms);
            }
            Change::Field { previous, new, .. } => {
                record.previous = Some(previous);
                record.new = Some(new);
            }
        }
        record
    }
}

impl TryFrom<UpdateRecord> for Update {
    type Error = String;

    fn try_from(record: UpdateRecord) -> Result<Self, Self::Error> {
        let missing = |key: &str| format!("{} update is missing `{}`", record.update_type, key);
        let change = match record.update_type.as_str() {
            "attachment" => Change::Attachment {
                link: record.link.clone().ok_or_else(|| missing("link"))?,
            },
            "comment" => Change::Comment {
                comment: record.comment.clone().ok_or_else(|| missing("comment"))?,
                comment_id: record.comment_id.clone(),
                replying_to: record.replying_to,
                link: record.link.clone(),
            },
            "keywords" | "focuses" => {
                let previous_terms = record
                    .previous_terms
                    .clone()
                    .ok_or_else(|| missing("previous_terms"))?;
                let new_terms = record
                    .new_terms
                    .clone()
                    .ok_or_else(|| missing("new_terms"))?;
                if record.update_type == "keywords" {
                    Change::Keywords {
                        previous_terms,
                        new_terms,
                    }
                } else {
                    Change::Focuses {
                        previous_terms,
                        new_terms,
                    }
                }
            }
            "" => return Err("update is missing `update_type`".to_string()),
            name => Change::Field {
                name: name.to_string(),
                previous: record.previous.clone().unwrap_or_default(),
                new: record.new.clone().unwrap_or_default(),
            },
        };
        Ok(Update {
            time: record.time,
            user: record.user,
            change,
        })
    }
}

/// The subset of ticket fields tracked historically in the local index.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TicketState {
    pub status: String,
    pub ticket_type: String,
    pub milestone: String,
    pub component: String,
    pub keywords: Vec<String>,
}

/// A hub-index ticket as fetched for replay: tracked fields plus history.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(default)]
pub struct TrackedTicket {
    #[serde(flatten)]
    pub state: TicketState,
    pub updates: Vec<Update>,
}

/// One level of an aggregation rollup.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Bucket {
    pub key: String,
    pub doc_count: u64,
    /// Nested rollups keyed by dimension name (`ticket_type`, `keyword`, ...).
    #[serde(flatten)]
    pub children: BTreeMap<String, Vec<Bucket>>,
}

/// Daily statistics document stored in the stats index.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StatsSnapshot {
    /// Window start in epoch milliseconds.
    pub time: i64,
    pub total: u64,
    pub open: u64,
    pub ticket_type: Vec<Bucket>,
    pub keyword: Vec<Bucket>,
    pub milestone: Vec<Bucket>,
    pub component: Vec<Bucket>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn comment_update_serializes_flat() {
        let update = Update {
            time: 1_000,
            user: "alice".to_string(),
            change: Change::Comment {
                comment: "Patch looks good".to_string(),
                comment_id: Some("3".to_string()),
                replying_to: Some(2),
                link: Some("https://trac.example/ticket/7#comment:3".to_string()),
            },
        };
        let value = serde_json::to_value(&update).unwrap();
        assert_eq!(
            value,
            json!({
                "time": 1000,
                "user": "alice",
                "update_type": "comment",
                "comment": "Patch looks good",
                "comment_id": "3",
                "replying_to": 2,
                "link": "https://trac.example/ticket/7#comment:3"
            })
        );
    }

    #[test]
    fn field_update_uses_update_type_as_name() {
        let update: Update = serde_json::from_value(json!({
            "time": 5,
            "user": "bob",
            "update_type": "milestone",
            "previous": "4.9",
            "new": "5.0"
        }))
        .unwrap();
        assert_eq!(update.update_type(), "milestone");
        assert_eq!(
            update.change,
            Change::Field {
                name: "milestone".to_string(),
                previous: "4.9".to_string(),
                new: "5.0".to_string(),
            }
        );
    }

    #[test]
    fn comment_without_text_is_rejected() {
        let result: Result<Update, _> = serde_json::from_value(json!({
            "time": 5,
            "user": "bob",
            "update_type": "comment",
            "comment_id": "1"
        }));
        assert!(result.is_err());
    }

    #[test]
    fn ticket_never_serializes_cc() {
        let ticket = Ticket {
            id: 1,
            cc: "someone@example.com".to_string(),
            ..Default::default()
        };
        let value = serde_json::to_value(&ticket).unwrap();
        assert!(value.get("cc").is_none());
        assert!(value.get("updates").is_none());
    }

    #[test]
    fn bucket_children_are_flattened() {
        let mut children = BTreeMap::new();
        children.insert(
            "ticket_type".to_string(),
            vec![Bucket {
                key: "defect (bug)".to_string(),
                doc_count: 4,
                children: BTreeMap::new(),
            }],
        );
        let bucket = Bucket {
            key: "has-patch".to_string(),
            doc_count: 4,
            children,
        };
        assert_eq!(
            serde_json::to_value(&bucket).unwrap(),
            json!({
                "key": "has-patch",
                "doc_count": 4,
                "ticket_type": [{ "key": "defect (bug)", "doc_count": 4 }]
            })
        );
    }
}
