mod error;
mod mutations;
mod queries;
mod reconcile;
mod state;

pub use error::{EngineError, Notice, NoticeKind};
pub use queries::{
    attention, elapsed_label, Snapshot, LATE_ARRIVAL_MINUTES, LONG_SEATED_MINUTES, NO_SHOW_MINUTES,
};
pub use reconcile::{decode_reservations, decode_tables};
pub use state::LocalState;

use std::sync::Arc;

use chrono::Local;
use tokio::sync::{broadcast, mpsc, oneshot};
use tracing::debug;

use crate::book::prepare_booking;
use crate::model::*;
use crate::store::{Row, RowChange, RowStore};

use mutations::Settlement;

pub(crate) type Reply = oneshot::Sender<Result<Outcome, EngineError>>;

const NOTICE_CAPACITY: usize = 64;

// ── Mutation queue ───────────────────────────────────────

/// Everything that reads or changes local state goes through this queue and
/// is handled, one at a time, by the task that owns the state.
pub(crate) enum Intent {
    Apply {
        table_id: String,
        action: TableAction,
        now: Ms,
        response: Reply,
    },
    AddReservation {
        reservation: Reservation,
        response: Reply,
    },
    RemoveReservation {
        id: String,
        response: Reply,
    },
    Assign {
        reservation_id: String,
        table_id: String,
        now: Ms,
        response: Reply,
    },
    /// A remote write spawned by one of the above finished.
    Settle(Settlement),
    Merge {
        collection: Collection,
        change: RowChange,
    },
    Replace {
        collection: Collection,
        rows: Vec<Row>,
    },
    DueForExpiry {
        now: Ms,
        threshold: Ms,
        response: oneshot::Sender<Vec<Table>>,
    },
    Snapshot {
        response: oneshot::Sender<Snapshot>,
    },
}

/// Sole owner of the local collections.
pub(crate) struct EngineCore {
    state: LocalState,
    store: Arc<dyn RowStore>,
    /// Weak, so spawned writes don't keep the queue open after every handle is gone.
    intents: mpsc::WeakSender<Intent>,
    notices: broadcast::Sender<Notice>,
}

impl EngineCore {
    fn handle(&mut self, intent: Intent) {
        match intent {
            Intent::Apply {
                table_id,
                action,
                now,
                response,
            } => self.apply(table_id, action, now, response),
            Intent::AddReservation {
                reservation,
                response,
            } => self.add_reservation(reservation, response),
            Intent::RemoveReservation { id, response } => self.remove_reservation(id, response),
            Intent::Assign {
                reservation_id,
                table_id,
                now,
                response,
            } => self.assign(reservation_id, table_id, now, response),
            Intent::Settle(settlement) => self.settle(settlement),
            Intent::Merge { collection, change } => self.merge(collection, change),
            Intent::Replace { collection, rows } => self.replace(collection, rows),
            Intent::DueForExpiry {
                now,
                threshold,
                response,
            } => {
                let _ = response.send(self.due_for_expiry(now, threshold));
            }
            Intent::Snapshot { response } => {
                let _ = response.send(self.state.snapshot());
            }
        }
    }

    fn publish_gauges(&self) {
        for status in TableStatus::ALL {
            let count = self
                .state
                .tables()
                .iter()
                .filter(|t| t.status == status)
                .count();
            metrics::gauge!(crate::observability::TABLES, "status" => status.as_str())
                .set(count as f64);
        }
        metrics::gauge!(crate::observability::RESERVATIONS_PENDING)
            .set(self.state.book().len() as f64);
    }
}

/// Drain the queue until every handle is dropped.
async fn engine_loop(mut core: EngineCore, mut rx: mpsc::Receiver<Intent>) {
    core.publish_gauges();
    while let Some(intent) = rx.recv().await {
        core.handle(intent);
    }
    debug!("engine queue closed");
}

// ── Handle ───────────────────────────────────────────────

/// Cheap, cloneable access to a running engine.
#[derive(Clone)]
pub struct EngineHandle {
    tx: mpsc::Sender<Intent>,
    notices: broadcast::Sender<Notice>,
}

/// Start the engine task over an already hydrated state.
pub fn spawn(store: Arc<dyn RowStore>, state: LocalState, queue_depth: usize) -> EngineHandle {
    let (tx, rx) = mpsc::channel(queue_depth.max(1));
    let (notices, _) = broadcast::channel(NOTICE_CAPACITY);
    let core = EngineCore {
        state,
        store,
        intents: tx.downgrade(),
        notices: notices.clone(),
    };
    tokio::spawn(engine_loop(core, rx));
    EngineHandle { tx, notices }
}

impl EngineHandle {
    /// True once the engine task has stopped.
    pub fn is_closed(&self) -> bool {
        self.tx.is_closed()
    }

    async fn request<T>(
        &self,
        make: impl FnOnce(oneshot::Sender<T>) -> Intent,
    ) -> Result<T, EngineError> {
        let (tx, rx) = oneshot::channel();
        self.tx
            .send(make(tx))
            .await
            .map_err(|_| EngineError::ShutDown)?;
        rx.await.map_err(|_| EngineError::ShutDown)
    }

    /// Run `action` on a table: update locally at once, then write remote,
    /// rolling back on failure. Resolves once the remote write settled.
    pub async fn apply(&self, table_id: &str, action: TableAction) -> Result<Outcome, EngineError> {
        self.apply_at(table_id, action, now_ms()).await
    }

    pub async fn apply_at(
        &self,
        table_id: &str,
        action: TableAction,
        now: Ms,
    ) -> Result<Outcome, EngineError> {
        self.request(|response| Intent::Apply {
            table_id: table_id.to_string(),
            action,
            now,
            response,
        })
        .await?
    }

    /// Book a reservation. `time` is `"HH:MM"` (today, local time) or ISO-8601.
    /// Returns the new id, or `None` when the submission was ignored.
    pub async fn add_reservation(
        &self,
        name: &str,
        party_size: u32,
        time: &str,
    ) -> Result<Option<String>, EngineError> {
        let Some(reservation) = prepare_booking(name, party_size, time, now_ms(), &Local)? else {
            debug!(name, time, "booking ignored: name or time missing");
            return Ok(None);
        };
        let id = reservation.id.clone();
        self.request(|response| Intent::AddReservation {
            reservation,
            response,
        })
        .await??;
        Ok(Some(id))
    }

    pub async fn remove_reservation(&self, id: &str) -> Result<Outcome, EngineError> {
        self.request(|response| Intent::RemoveReservation {
            id: id.to_string(),
            response,
        })
        .await?
    }

    /// Move a reservation out of the book onto a FREE table.
    pub async fn assign(&self, reservation_id: &str, table_id: &str) -> Result<Outcome, EngineError> {
        self.assign_at(reservation_id, table_id, now_ms()).await
    }

    pub async fn assign_at(
        &self,
        reservation_id: &str,
        table_id: &str,
        now: Ms,
    ) -> Result<Outcome, EngineError> {
        self.request(|response| Intent::Assign {
            reservation_id: reservation_id.to_string(),
            table_id: table_id.to_string(),
            now,
            response,
        })
        .await?
    }

    pub async fn snapshot(&self) -> Result<Snapshot, EngineError> {
        self.request(|response| Intent::Snapshot { response }).await
    }

    pub async fn table(&self, id: &str) -> Result<Option<Table>, EngineError> {
        Ok(self.snapshot().await?.table(id).cloned())
    }

    /// Subscribe to user-visible failure notices.
    pub fn notices(&self) -> broadcast::Receiver<Notice> {
        self.notices.subscribe()
    }

    pub(crate) async fn merge(&self, collection: Collection, change: RowChange) -> Result<(), EngineError> {
        self.tx
            .send(Intent::Merge { collection, change })
            .await
            .map_err(|_| EngineError::ShutDown)
    }

    pub(crate) async fn replace(&self, collection: Collection, rows: Vec<Row>) -> Result<(), EngineError> {
        self.tx
            .send(Intent::Replace { collection, rows })
            .await
            .map_err(|_| EngineError::ShutDown)
    }

    /// RESERVED tables whose planned arrival is at least `threshold` before `now`.
    pub(crate) async fn due_for_expiry(&self, now: Ms, threshold: Ms) -> Result<Vec<Table>, EngineError> {
        self.request(|response| Intent::DueForExpiry {
            now,
            threshold,
            response,
        })
        .await
    }
}
