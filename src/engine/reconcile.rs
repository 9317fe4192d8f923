use chrono::{Local, TimeZone};
use tracing::{debug, warn};

use crate::model::*;
use crate::observability::*;
use crate::rows::{decode_key, decode_reservation, decode_table, DecodeError};
use crate::store::{ChangeKind, Row, RowChange};
use crate::transition::is_no_show;

use super::EngineCore;

fn dropped(collection: Collection, err: &DecodeError) {
    metrics::counter!(ROWS_DROPPED_TOTAL, "collection" => collection.as_str()).increment(1);
    warn!(%collection, "dropping malformed row: {err}");
}

/// Decode table rows, dropping (and logging) the malformed ones.
pub fn decode_tables(rows: &[Row]) -> Vec<Table> {
    rows.iter()
        .filter_map(|row| match decode_table(row) {
            Ok(t) => Some(t),
            Err(e) => {
                dropped(Collection::Tables, &e);
                None
            }
        })
        .collect()
}

/// Decode reservation rows, resolving `"HH:MM"` times against `now` in `tz`.
pub fn decode_reservations<Tz: TimeZone>(rows: &[Row], now: Ms, tz: &Tz) -> Vec<Reservation> {
    rows.iter()
        .filter_map(|row| match decode_reservation(row, now, tz) {
            Ok(r) => Some(r),
            Err(e) => {
                dropped(Collection::Reservations, &e);
                None
            }
        })
        .collect()
}

impl EngineCore {
    /// Fold one change notification into local state.
    pub(super) fn merge(&mut self, collection: Collection, change: RowChange) {
        let Some(row) = change.row() else {
            dropped(collection, &DecodeError::MissingField("id"));
            return;
        };
        match (change.kind, collection) {
            (ChangeKind::Delete, _) => {
                let id = match decode_key(row) {
                    Ok(id) => id,
                    Err(e) => return dropped(collection, &e),
                };
                match collection {
                    Collection::Tables => {
                        self.state.remove_table(&id);
                    }
                    Collection::Reservations => {
                        self.state.remove_reservation(&id);
                    }
                }
                debug!(%collection, %id, "merged delete");
            }
            (_, Collection::Tables) => match decode_table(row) {
                Ok(table) => {
                    debug!(%collection, id = %table.id, status = %table.status, "merged change");
                    self.state.upsert_table(table);
                }
                Err(e) => return dropped(collection, &e),
            },
            (_, Collection::Reservations) => match decode_reservation(row, now_ms(), &Local) {
                Ok(reservation) => {
                    debug!(%collection, id = %reservation.id, "merged change");
                    self.state.upsert_reservation(reservation);
                }
                Err(e) => return dropped(collection, &e),
            },
        }
        metrics::counter!(
            NOTIFICATIONS_MERGED_TOTAL,
            "collection" => collection.as_str(),
            "kind" => change_kind_label(change.kind)
        )
        .increment(1);
        self.publish_gauges();
    }

    /// Swap a whole collection for a fresh read of the store.
    pub(super) fn replace(&mut self, collection: Collection, rows: Vec<Row>) {
        match collection {
            Collection::Tables => self.state.replace_tables(decode_tables(&rows)),
            Collection::Reservations => self
                .state
                .replace_reservations(decode_reservations(&rows, now_ms(), &Local)),
        }
        metrics::counter!(RESYNCS_TOTAL, "collection" => collection.as_str()).increment(1);
        self.publish_gauges();
    }

    pub(super) fn due_for_expiry(&self, now: Ms, threshold: Ms) -> Vec<Table> {
        self.state
            .tables()
            .iter()
            .filter(|t| is_no_show(t, now, threshold))
            .cloned()
            .collect()
    }
}

fn change_kind_label(kind: ChangeKind) -> &'static str {
    match kind {
        ChangeKind::Insert => "insert",
        ChangeKind::Update => "update",
        ChangeKind::Delete => "delete",
    }
}
