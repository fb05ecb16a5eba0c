//! Tracker collaborator.
//!
//! [`Tracker`] is the seam between the transform logic and the remote bug
//! tracker. [`TracRpcClient`] implements it against the Trac XML-RPC plugin
//! (`ticket.get` and `ticket.changeLog`), authenticating with HTTP basic auth.
//!
//! # Configuration
//!
//! ```toml
//! [tracker]
//! base_url = "https://core.trac.wordpress.org"
//! rpc_path = "/login/xmlrpc"
//! # username / password, or TRAC_USERNAME / TRAC_PASSWORD
//! ```

use std::time::Duration;

use async_trait::async_trait;
use tracing::warn;

use crate::config::TrackerConfig;
use crate::error::TrackerError;
use crate::models::{RawChange, RawTicket};
use crate::xmlrpc::{self, Value};

/// Read access to tickets and their change logs.
#[async_trait]
pub trait Tracker: Send + Sync {
    /// Fetch a ticket's current fields. `Ok(None)` means the tracker has no
    /// such ticket; transport problems are errors.
    async fn get_ticket(&self, id: u64) -> Result<Option<RawTicket>, TrackerError>;

    /// Fetch a ticket's full change log, oldest first.
    async fn get_change_log(&self, id: u64) -> Result<Vec<RawChange>, TrackerError>;
}

/// Trac XML-RPC client.
pub struct TracRpcClient {
    client: reqwest::Client,
    url: String,
    credentials: Option<(String, String)>,
}

impl TracRpcClient {
    pub fn new(config: &TrackerConfig) -> Result<Self, TrackerError> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .user_agent(concat!("trac-sync/", env!("CARGO_PKG_VERSION")))
            .build()?;
        let credentials = match (&config.username, &config.password) {
            (Some(user), Some(pass)) => Some((user.clone(), pass.clone())),
            _ => None,
        };
        Ok(Self {
            client,
            url: config.rpc_url(),
            credentials,
        })
    }

    async fn call(&self, method: &str, params: &[Value]) -> Result<Value, TrackerError> {
        let body = xmlrpc::method_call(method, params);
        let mut request = self
            .client
            .post(&self.url)
            .header("Content-Type", "text/xml")
            .body(body);
        if let Some((user, pass)) = &self.credentials {
            request = request.basic_auth(user, Some(pass));
        }

        let response = request.send().await?;
        let status = response.status();
        let text = response.text().await?;
        if !status.is_success() {
            return Err(TrackerError::Http {
                status: status.as_u16(),
                body: text,
            });
        }
        xmlrpc::parse_response(&text)
    }
}

#[async_trait]
impl Tracker for TracRpcClient {
    async fn get_ticket(&self, id: u64) -> Result<Option<RawTicket>, TrackerError> {
        match self.call("ticket.get", &[Value::String(id.to_string())]).await {
            Ok(value) => raw_ticket_from_value(id, &value),
            Err(TrackerError::Fault { code, message }) if is_missing_ticket(code, &message) => {
                Ok(None)
            }
            Err(e) => Err(e),
        }
    }

    async fn get_change_log(&self, id: u64) -> Result<Vec<RawChange>, TrackerError> {
        let value = self
            .call("ticket.changeLog", &[Value::String(id.to_string())])
            .await?;
        let entries = value
            .as_array()
            .ok_or_else(|| TrackerError::Decode("changeLog did not return an array".into()))?;
        Ok(entries
            .iter()
            .enumerate()
            .filter_map(|(n, entry)| {
                let change = raw_change_from_value(entry);
                if change.is_none() {
                    warn!(ticket = id, row = n, "skipping malformed changeLog row");
                }
                change
            })
            .collect())
    }
}

fn is_missing_ticket(code: i64, message: &str) -> bool {
    code == 404 || message.contains("does not exist")
}

/// Decode a `ticket.get` result: `[id, created, changed, attributes]`.
///
/// An empty or absent attribute struct means the ticket does not exist.
fn raw_ticket_from_value(id: u64, value: &Value) -> Result<Option<RawTicket>, TrackerError> {
    let items = value
        .as_array()
        .ok_or_else(|| TrackerError::Decode("ticket.get did not return an array".into()))?;
    let attrs = match items.get(3).and_then(Value::as_struct) {
        Some(attrs) if !attrs.is_empty() => attrs,
        _ => return Ok(None),
    };

    let text = |key: &str| attrs.get(key).map(Value::to_text).unwrap_or_default();
    let timestamp = |key: &str, position: usize| {
        attrs
            .get(key)
            .or_else(|| items.get(position))
            .and_then(Value::to_timestamp)
            .ok_or_else(|| TrackerError::Decode(format!("ticket {} has no valid `{}`", id, key)))
    };

    Ok(Some(RawTicket {
        id,
        time: timestamp("time", 1)?,
        changetime: timestamp("changetime", 2)?,
        status: text("status"),
        ticket_type: text("type"),
        summary: text("summary"),
        description: text("description"),
        reporter: text("reporter"),
        owner: text("owner"),
        milestone: text("milestone"),
        priority: text("priority"),
        severity: text("severity"),
        version: text("version"),
        component: text("component"),
        keywords: text("keywords"),
        focuses: text("focuses"),
        cc: text("cc"),
        resolution: text("resolution"),
    }))
}

/// Decode one `ticket.changeLog` row: `[time, author, field, old, new, permanent]`.
///
/// Missing trailing slots read as empty text. Rows that are not arrays, or
/// have no usable timestamp or field name, yield `None`.
fn raw_change_from_value(value: &Value) -> Option<RawChange> {
    let row = value.as_array()?;
    let time = row.first()?.to_timestamp()?;
    let text = |position: usize| row.get(position).map(Value::to_text).unwrap_or_default();
    let field = text(2);
    if field.is_empty() {
        return None;
    }
    Some(RawChange {
        time,
        author: text(1),
        field,
        old: text(3),
        new: text(4),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeMap;

    fn ticket_value(attrs: &[(&str, Value)]) -> Value {
        let members: BTreeMap<String, Value> = attrs
            .iter()
            .map(|(k, v)| (k.to_string(), v.clone()))
            .collect();
        Value::Array(vec![
            Value::Int(1),
            Value::DateTime("20200101T00:00:00".into()),
            Value::DateTime("20200102T00:00:00".into()),
            Value::Struct(members),
        ])
    }

    #[test]
    fn decodes_ticket_attributes() {
        let value = ticket_value(&[
            ("status", Value::String("new".into())),
            ("type", Value::String("defect (bug)".into())),
            ("keywords", Value::String("has-patch".into())),
            ("time", Value::DateTime("20200101T00:00:10".into())),
        ]);
        let ticket = raw_ticket_from_value(1, &value).unwrap().unwrap();
        assert_eq!(ticket.status, "new");
        assert_eq!(ticket.ticket_type, "defect (bug)");
        assert_eq!(ticket.keywords, "has-patch");
        assert_eq!(ticket.time, 1_577_836_810);
        // falls back to the positional change time
        assert_eq!(ticket.changetime, 1_577_923_200);
        assert_eq!(ticket.owner, "");
    }

    #[test]
    fn empty_attributes_mean_not_found() {
        let value = ticket_value(&[]);
        assert_eq!(raw_ticket_from_value(1, &value).unwrap(), None);
    }

    #[test]
    fn missing_ticket_fault_detection() {
        assert!(is_missing_ticket(404, "anything"));
        assert!(is_missing_ticket(1, "Ticket 123 does not exist."));
        assert!(!is_missing_ticket(403, "TICKET_VIEW privileges are required"));
    }

    #[test]
    fn decodes_change_row() {
        let row = Value::Array(vec![
            Value::DateTime("20200101T00:00:00".into()),
            Value::String("jdoe".into()),
            Value::String("comment".into()),
            Value::String("1.2".into()),
            Value::String("Thanks!".into()),
            Value::Int(1),
        ]);
        let change = raw_change_from_value(&row).unwrap();
        assert_eq!(change.time, 1_577_836_800);
        assert_eq!(change.field, "comment");
        assert_eq!(change.old, "1.2");
    }

    #[test]
    fn short_change_row_pads_missing_values() {
        let row = Value::Array(vec![
            Value::DateTime("20200101T00:00:00".into()),
            Value::String("jdoe".into()),
            Value::String("status".into()),
            Value::String("new".into()),
        ]);
        let change = raw_change_from_value(&row).unwrap();
        assert_eq!(change.field, "status");
        assert_eq!(change.old, "new");
        assert_eq!(change.new, "");
    }

    #[test]
    fn unusable_change_rows_are_dropped() {
        assert!(raw_change_from_value(&Value::Array(vec![Value::Int(1)])).is_none());
        assert!(raw_change_from_value(&Value::String("junk".into())).is_none());
        let bad_time = Value::Array(vec![
            Value::String("yesterday".into()),
            Value::String("jdoe".into()),
            Value::String("comment".into()),
            Value::String("1".into()),
            Value::String("hi".into()),
        ]);
        assert!(raw_change_from_value(&bad_time).is_none());
    }
}
