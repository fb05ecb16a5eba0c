//! Ticket document construction.
//!
//! Fetches a ticket and its change log from the [`Tracker`] and builds the
//! [`Ticket`] document written to the hub index.

use crate::encoding::maybe_reencode;
use crate::error::TrackerError;
use crate::models::{RawChange, RawTicket, Ticket};
use crate::terms::parse_terms_or_empty;
use crate::tracker::Tracker;
use crate::update::normalize_update;

/// Build the indexable document for `ticket_id`.
///
/// Returns `Ok(None)` when the tracker has no such ticket. When
/// `encode_fallback` is set, free-text fields are re-encoded.
pub async fn build_ticket_document(
    tracker: &dyn Tracker,
    base_url: &str,
    ticket_id: u64,
    encode_fallback: bool,
) -> Result<Option<Ticket>, TrackerError> {
    let raw = match tracker.get_ticket(ticket_id).await? {
        Some(raw) => raw,
        None => return Ok(None),
    };
    let changes = tracker.get_change_log(ticket_id).await?;
    Ok(Some(assemble_ticket(
        base_url,
        ticket_id,
        raw,
        &changes,
        encode_fallback,
    )))
}

/// Map raw tracker data onto a [`Ticket`]. `cc` changes are dropped from the
/// update history so addresses never reach the index.
pub fn assemble_ticket(
    base_url: &str,
    ticket_id: u64,
    raw: RawTicket,
    changes: &[RawChange],
    encode_fallback: bool,
) -> Ticket {
    let updates = changes
        .iter()
        .map(|change| normalize_update(base_url, ticket_id, change, encode_fallback))
        .filter(|update| update.update_type() != "cc")
        .collect();

    Ticket {
        id: ticket_id,
        link: format!("{}/ticket/{}", base_url, ticket_id),
        status: raw.status,
        ticket_type: raw.ticket_type,
        created: raw.time * 1000,
        updated: raw.changetime * 1000,
        summary: maybe_reencode(&raw.summary, encode_fallback),
        description: maybe_reencode(&raw.description, encode_fallback),
        reporter: raw.reporter,
        owner: raw.owner,
        milestone: raw.milestone,
        priority: raw.priority,
        severity: raw.severity,
        version: raw.version,
        component: raw.component,
        keywords: parse_terms_or_empty(&raw.keywords),
        focuses: parse_terms_or_empty(&raw.focuses),
        cc: raw.cc,
        resolution: raw.resolution,
        updates,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::Change;

    const BASE: &str = "https://core.trac.wordpress.org";

    fn raw_ticket() -> RawTicket {
        RawTicket {
            id: 100,
            time: 1_600_000_000,
            changetime: 1_600_086_400,
            status: "new".into(),
            ticket_type: "enhancement".into(),
            summary: "Improve\u{0} media modal".into(),
            description: "Steps to reproduce".into(),
            reporter: "alice".into(),
            owner: "carol".into(),
            milestone: "Awaiting Review".into(),
            priority: "normal".into(),
            severity: "normal".into(),
            version: "5.5".into(),
            component: "Media".into(),
            keywords: "has-patch needs-testing".into(),
            focuses: "".into(),
            cc: "bob@example.com".into(),
            resolution: "duplicate".into(),
        }
    }

    fn change(time: i64, field: &str, old: &str, new: &str) -> RawChange {
        RawChange {
            time,
            author: "bob".into(),
            field: field.into(),
            old: old.into(),
            new: new.into(),
        }
    }

    #[test]
    fn maps_fields_and_converts_timestamps() {
        let ticket = assemble_ticket(BASE, 100, raw_ticket(), &[], false);
        assert_eq!(
            ticket,
            Ticket {
                id: 100,
                link: "https://core.trac.wordpress.org/ticket/100".into(),
                status: "new".into(),
                ticket_type: "enhancement".into(),
                created: 1_600_000_000_000,
                updated: 1_600_086_400_000,
                summary: "Improve\u{0} media modal".into(),
                description: "Steps to reproduce".into(),
                reporter: "alice".into(),
                owner: "carol".into(),
                milestone: "Awaiting Review".into(),
                priority: "normal".into(),
                severity: "normal".into(),
                version: "5.5".into(),
                component: "Media".into(),
                keywords: vec!["has-patch".into(), "needs-testing".into()],
                focuses: Vec::new(),
                cc: "bob@example.com".into(),
                resolution: "duplicate".into(),
                updates: Vec::new(),
            }
        );
    }

    #[test]
    fn fallback_reencodes_free_text() {
        let ticket = assemble_ticket(BASE, 100, raw_ticket(), &[], true);
        assert_eq!(ticket.summary, "Improve media modal");
    }

    #[test]
    fn cc_changes_are_dropped_in_order() {
        let changes = vec![
            change(1, "comment", "1", "first"),
            change(2, "cc", "", "bob@example.com"),
            change(3, "status", "new", "assigned"),
        ];
        let ticket = assemble_ticket(BASE, 100, raw_ticket(), &changes, false);
        assert_eq!(ticket.updates.len(), 2);
        assert_eq!(ticket.updates[0].update_type(), "comment");
        assert_eq!(ticket.updates[1].update_type(), "status");
        assert!(matches!(ticket.updates[1].change, Change::Field { .. }));
    }
}
