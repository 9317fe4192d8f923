use std::future::Future;
use std::time::Instant;

use chrono::Local;
use tracing::{debug, error, info, warn};

use crate::model::*;
use crate::observability::*;
use crate::rows::{encode_reservation, planned_arrival, table_update_fields};
use crate::store::StoreError;
use crate::transition::transition;

use super::{EngineCore, EngineError, Intent, Notice, Reply};

/// How to put one entity back if its remote write fails.
pub(crate) enum Undo {
    Table {
        previous: Table,
        version: u64,
    },
    Reservation {
        id: String,
        /// `None`: the entity did not exist before.
        previous: Option<Reservation>,
        version: u64,
    },
}

pub(crate) enum WriteOutcome {
    Committed,
    Failed(StoreError),
    /// Table reserved remotely, reservation still in the remote book.
    Partial {
        reservation_id: String,
        table_id: String,
        error: StoreError,
    },
}

pub(crate) struct Settlement {
    subject: String,
    collection: Collection,
    undo: Vec<Undo>,
    outcome: WriteOutcome,
    response: Reply,
}

impl EngineCore {
    /// Run a remote write off the queue; its outcome comes back as `Intent::Settle`.
    fn spawn_write<F>(
        &self,
        subject: String,
        collection: Collection,
        undo: Vec<Undo>,
        response: Reply,
        write: F,
    ) where
        F: Future<Output = WriteOutcome> + Send + 'static,
    {
        let intents = self.intents.clone();
        tokio::spawn(async move {
            let started = Instant::now();
            let outcome = write.await;
            metrics::histogram!(REMOTE_WRITE_DURATION_SECONDS, "collection" => collection.as_str())
                .record(started.elapsed().as_secs_f64());
            let settlement = Settlement {
                subject,
                collection,
                undo,
                outcome,
                response,
            };
            match intents.upgrade() {
                Some(tx) => {
                    let _ = tx.send(Intent::Settle(settlement)).await;
                }
                None => debug!("engine gone before write settled"),
            }
        });
    }

    pub(super) fn apply(&mut self, table_id: String, action: TableAction, now: Ms, response: Reply) {
        let Some(current) = self.state.table(&table_id).cloned() else {
            let _ = response.send(Err(EngineError::NotFound(table_id)));
            return;
        };
        let next = transition(&current, &action, now);
        if next == current {
            debug!(table = %table_id, %action, status = %current.status, "guard not met, ignoring");
            let _ = response.send(Ok(Outcome::Unchanged));
            return;
        }

        metrics::counter!(TRANSITIONS_TOTAL, "action" => action.label()).increment(1);
        let fields = table_update_fields(&next);
        let version = self.state.upsert_table(next);
        self.publish_gauges();

        let store = self.store.clone();
        let id = table_id.clone();
        self.spawn_write(
            table_id,
            Collection::Tables,
            vec![Undo::Table {
                previous: current,
                version,
            }],
            response,
            async move {
                match store.update(Collection::Tables, &id, fields).await {
                    Ok(()) => WriteOutcome::Committed,
                    Err(e) => WriteOutcome::Failed(e),
                }
            },
        );
    }

    pub(super) fn add_reservation(&mut self, reservation: Reservation, response: Reply) {
        if self.state.book().get(&reservation.id).is_some() {
            let _ = response.send(Ok(Outcome::Unchanged));
            return;
        }
        let id = reservation.id.clone();
        let row = encode_reservation(&reservation);
        let version = self.state.upsert_reservation(reservation);
        self.publish_gauges();

        let store = self.store.clone();
        self.spawn_write(
            id.clone(),
            Collection::Reservations,
            vec![Undo::Reservation {
                id,
                previous: None,
                version,
            }],
            response,
            async move {
                match store.insert(Collection::Reservations, row).await {
                    Ok(()) => WriteOutcome::Committed,
                    Err(e) => WriteOutcome::Failed(e),
                }
            },
        );
    }

    pub(super) fn remove_reservation(&mut self, id: String, response: Reply) {
        if self.state.book().get(&id).is_none() {
            let _ = response.send(Ok(Outcome::Unchanged));
            return;
        }
        let (previous, version) = self.state.remove_reservation(&id);
        self.publish_gauges();

        let store = self.store.clone();
        let key = id.clone();
        self.spawn_write(
            id.clone(),
            Collection::Reservations,
            vec![Undo::Reservation {
                id,
                previous,
                version,
            }],
            response,
            async move {
                match store.delete(Collection::Reservations, &key).await {
                    Ok(()) => WriteOutcome::Committed,
                    Err(e) => WriteOutcome::Failed(e),
                }
            },
        );
    }

    /// Reserve the table with the booking's data, then drop the booking.
    ///
    /// Remote order: table update, reservation delete. If the delete fails the
    /// table update is compensated by writing back the pre-assignment row; only
    /// if that also fails does the caller get `PartialAssignment`.
    pub(super) fn assign(&mut self, reservation_id: String, table_id: String, now: Ms, response: Reply) {
        let Some(reservation) = self.state.book().get(&reservation_id).cloned() else {
            debug!(reservation = %reservation_id, "assign: reservation not in book");
            let _ = response.send(Ok(Outcome::Unchanged));
            return;
        };
        let Some(current) = self.state.table(&table_id).cloned() else {
            let _ = response.send(Err(EngineError::NotFound(table_id)));
            return;
        };
        let action = TableAction::Reserve(ReserveDetails {
            name: Some(reservation.name.clone()),
            party_size: Some(reservation.party_size),
            reserved_for: Some(planned_arrival(&reservation, now, &Local)),
        });
        let next = transition(&current, &action, now);
        if next == current {
            debug!(table = %table_id, status = %current.status, "assign: table not free");
            let _ = response.send(Ok(Outcome::Unchanged));
            return;
        }

        metrics::counter!(TRANSITIONS_TOTAL, "action" => "ASSIGN").increment(1);
        let fields = table_update_fields(&next);
        let restore = table_update_fields(&current);
        let table_version = self.state.upsert_table(next);
        let (_, reservation_version) = self.state.remove_reservation(&reservation_id);
        self.publish_gauges();

        let store = self.store.clone();
        let (rid, tid) = (reservation_id.clone(), table_id.clone());
        self.spawn_write(
            table_id,
            Collection::Tables,
            vec![
                Undo::Table {
                    previous: current,
                    version: table_version,
                },
                Undo::Reservation {
                    id: reservation_id,
                    previous: Some(reservation),
                    version: reservation_version,
                },
            ],
            response,
            async move {
                if let Err(e) = store.update(Collection::Tables, &tid, fields).await {
                    return WriteOutcome::Failed(e);
                }
                let error = match store.delete(Collection::Reservations, &rid).await {
                    Ok(()) => return WriteOutcome::Committed,
                    Err(e) => e,
                };
                warn!(table = %tid, reservation = %rid, "reservation delete failed, restoring table: {error}");
                match store.update(Collection::Tables, &tid, restore).await {
                    Ok(()) => WriteOutcome::Failed(error),
                    Err(compensation) => {
                        error!(
                            table = %tid,
                            reservation = %rid,
                            "could not restore table after failed assignment: {compensation}"
                        );
                        WriteOutcome::Partial {
                            reservation_id: rid,
                            table_id: tid,
                            error,
                        }
                    }
                }
            },
        );
    }

    pub(super) fn settle(&mut self, settlement: Settlement) {
        let Settlement {
            subject,
            collection,
            undo,
            outcome,
            response,
        } = settlement;

        let reply = match outcome {
            WriteOutcome::Committed => {
                metrics::counter!(REMOTE_WRITES_TOTAL, "collection" => collection.as_str(), "status" => "ok")
                    .increment(1);
                Ok(Outcome::Applied)
            }
            WriteOutcome::Failed(error) => {
                metrics::counter!(REMOTE_WRITES_TOTAL, "collection" => collection.as_str(), "status" => "failed")
                    .increment(1);
                warn!(subject = %subject, "remote write failed, rolling back: {error}");
                for u in undo {
                    self.roll_back(u);
                }
                let _ = self.notices.send(Notice::for_store_error(&subject, &error));
                Err(EngineError::RemoteWrite(error))
            }
            WriteOutcome::Partial {
                reservation_id,
                table_id,
                error,
            } => {
                metrics::counter!(PARTIAL_ASSIGNMENTS_TOTAL).increment(1);
                error!(
                    table = %table_id,
                    reservation = %reservation_id,
                    "assignment left table reserved and reservation in the book: {error}"
                );
                // The table write stuck remotely; only the book goes back.
                for u in undo {
                    if matches!(u, Undo::Reservation { .. }) {
                        self.roll_back(u);
                    }
                }
                let _ = self
                    .notices
                    .send(Notice::partial_assignment(&reservation_id, &table_id));
                Err(EngineError::PartialAssignment {
                    reservation_id,
                    table_id,
                    error,
                })
            }
        };
        self.publish_gauges();
        let _ = response.send(reply);
    }

    /// Restore the pre-mutation value unless something newer arrived meanwhile.
    fn roll_back(&mut self, undo: Undo) {
        match undo {
            Undo::Table { previous, version } => {
                let current = self.state.version(Collection::Tables, &previous.id);
                if current != version {
                    metrics::counter!(ROLLBACKS_DISCARDED_TOTAL).increment(1);
                    info!(table = %previous.id, "newer state arrived, keeping it instead of rolling back");
                    return;
                }
                metrics::counter!(ROLLBACKS_TOTAL).increment(1);
                info!(table = %previous.id, status = %previous.status, "rolled back");
                self.state.upsert_table(previous);
            }
            Undo::Reservation {
                id,
                previous,
                version,
            } => {
                let current = self.state.version(Collection::Reservations, &id);
                if current != version {
                    metrics::counter!(ROLLBACKS_DISCARDED_TOTAL).increment(1);
                    info!(reservation = %id, "newer state arrived, keeping it instead of rolling back");
                    return;
                }
                metrics::counter!(ROLLBACKS_TOTAL).increment(1);
                info!(reservation = %id, "rolled back");
                match previous {
                    Some(r) => {
                        self.state.upsert_reservation(r);
                    }
                    None => {
                        self.state.remove_reservation(&id);
                    }
                }
            }
        }
    }
}
