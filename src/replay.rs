//! Ticket state replay.
//!
//! A hub-index ticket holds its latest field values plus its full update
//! history. Walking the history forward and taking the *previous* value of
//! the first update to each tracked field recovers the value the field had
//! when the ticket was created.

use crate::models::{Change, TicketState, TrackedTicket, Update};

/// Update types whose values are tracked historically.
pub const TRACKED_UPDATE_TYPES: [&str; 5] = ["type", "milestone", "keywords", "status", "component"];

/// Reconstruct a ticket's tracked fields as they were at creation.
///
/// For each tracked field the earliest update wins; later updates of the same
/// field are ignored. Fields never updated keep their current value. The
/// result carries no update history.
pub fn replay_original_state(ticket: &TrackedTicket) -> TicketState {
    let mut state = ticket.state.clone();
    let mut pending: Vec<&str> = TRACKED_UPDATE_TYPES.to_vec();

    for update in &ticket.updates {
        if pending.is_empty() {
            break;
        }
        let kind = update.update_type();
        let Some(pos) = pending.iter().position(|t| *t == kind) else {
            continue;
        };
        match &update.change {
            Change::Keywords { previous_terms, .. } => state.keywords = previous_terms.clone(),
            Change::Field { previous, .. } => set_field(&mut state, kind, previous.clone()),
            _ => continue,
        }
        pending.swap_remove(pos);
    }

    state
}

/// Apply an update's *new* value to a historical ticket copy.
///
/// Returns `false` when the update does not touch a tracked field.
pub fn apply_update(state: &mut TicketState, update: &Update) -> bool {
    match &update.change {
        Change::Keywords { new_terms, .. } => {
            state.keywords = new_terms.clone();
            true
        }
        Change::Field { name, new, .. } if TRACKED_UPDATE_TYPES.contains(&name.as_str()) => {
            set_field(state, name, new.clone());
            true
        }
        _ => false,
    }
}

fn set_field(state: &mut TicketState, update_type: &str, value: String) {
    match update_type {
        "type" => state.ticket_type = value,
        "milestone" => state.milestone = value,
        "status" => state.status = value,
        "component" => state.component = value,
        _ => {}
    }
}
