//! The table status state machine.
//!
//! Every function here is pure: a snapshot plus an action (and the caller's
//! notion of `now`) goes in, a new snapshot comes out. An action whose guard
//! does not match the current status returns the input unchanged.

use crate::limits::*;
use crate::model::*;

/// Note left on a table after a manual CANCEL.
pub const CANCEL_NOTE: &str = "Storniert";

/// Note left on a table released by the expiry sweep.
pub fn no_show_note(threshold_minutes: i64) -> String {
    format!("Auto-Storno: Verspätung >{threshold_minutes}m")
}

/// Apply `action` to `table`. Identity when the guard fails.
pub fn transition(table: &Table, action: &TableAction, now: Ms) -> Table {
    if table.status != action.required_status() {
        return table.clone();
    }

    let mut next = table.clone();
    match action {
        TableAction::SeatNow => {
            next.status = TableStatus::Seated;
            next.since = Some(now);
            next.name = None;
            next.party_size = None;
            next.note = None;
            next.reserved_for = None;
        }
        TableAction::Reserve(details) => {
            next.status = TableStatus::Reserved;
            next.since = Some(now);
            next.name = details
                .name
                .clone()
                .or_else(|| table.name.clone())
                .or_else(|| Some(DEFAULT_RESERVATION_NAME.to_string()));
            next.party_size = details
                .party_size
                .or(table.party_size)
                .or(Some(DEFAULT_PARTY_SIZE));
            next.note = None;
            next.reserved_for = details.reserved_for;
        }
        TableAction::Cancel => {
            next.status = TableStatus::Free;
            next.since = None;
            next.name = None;
            next.party_size = None;
            next.note = Some(CANCEL_NOTE.to_string());
            next.reserved_for = None;
        }
        TableAction::CheckIn => {
            next.status = TableStatus::Seated;
            next.since = Some(now);
            next.note = None;
            next.reserved_for = None;
        }
        TableAction::CheckOut => {
            next.status = TableStatus::Dirty;
            next.since = Some(now);
            next.name = None;
            next.party_size = None;
            next.reserved_for = None;
        }
        TableAction::Clean => {
            next.status = TableStatus::Free;
            next.since = None;
            next.name = None;
            next.party_size = None;
            next.note = None;
            next.reserved_for = None;
        }
    }
    next
}

/// True when a RESERVED table's planned arrival is at least `threshold` ago.
pub fn is_no_show(table: &Table, now: Ms, threshold: Ms) -> bool {
    match (table.status, table.reserved_for) {
        (TableStatus::Reserved, Some(planned)) => planned > 0 && now - planned >= threshold,
        _ => false,
    }
}

/// The snapshot the expiry sweep writes for a no-show table.
pub fn release_no_show(table: &Table, threshold_minutes: i64) -> Table {
    Table {
        status: TableStatus::Free,
        since: None,
        reserved_for: None,
        name: None,
        party_size: None,
        note: Some(no_show_note(threshold_minutes)),
        ..table.clone()
    }
}
