use std::sync::Arc;
use std::time::Duration;

use tokio::time::{interval_at, Instant, MissedTickBehavior};
use tracing::{debug, info, warn};

use crate::engine::{EngineError, EngineHandle};
use crate::model::*;
use crate::observability::*;
use crate::rows::table_update_fields;
use crate::store::RowStore;
use crate::transition::release_no_show;

/// Background task that periodically frees tables whose guests never arrived.
pub async fn run_sweeper(
    engine: EngineHandle,
    store: Arc<dyn RowStore>,
    every: Duration,
    threshold_minutes: i64,
) {
    let mut ticks = interval_at(Instant::now() + every, every);
    ticks.set_missed_tick_behavior(MissedTickBehavior::Delay);
    loop {
        ticks.tick().await;
        match sweep_once(&engine, store.as_ref(), now_ms(), threshold_minutes).await {
            Ok(0) => {}
            Ok(n) => info!("sweep released {n} no-show tables"),
            Err(EngineError::ShutDown) => {
                debug!("engine gone, stopping sweeper");
                return;
            }
            Err(e) => warn!("sweep failed: {e}"),
        }
    }
}

/// One sweep pass at `now`. Writes go straight to the store; the change feed
/// brings the result back into local state. Returns how many writes succeeded.
pub async fn sweep_once(
    engine: &EngineHandle,
    store: &dyn RowStore,
    now: Ms,
    threshold_minutes: i64,
) -> Result<usize, EngineError> {
    metrics::counter!(SWEEPS_TOTAL).increment(1);
    let due = engine
        .due_for_expiry(now, threshold_minutes * MINUTE_MS)
        .await?;

    let mut released = 0;
    for table in due {
        let fields = table_update_fields(&release_no_show(&table, threshold_minutes));
        match store.update(Collection::Tables, &table.id, fields).await {
            Ok(()) => {
                released += 1;
                metrics::counter!(NO_SHOWS_RELEASED_TOTAL).increment(1);
                info!(table = %table.id, "released no-show reservation");
            }
            Err(e) => {
                // Still due on the next tick.
                metrics::counter!(SWEEP_WRITE_FAILURES_TOTAL).increment(1);
                warn!(table = %table.id, "could not release no-show: {e}");
            }
        }
    }
    Ok(released)
}
