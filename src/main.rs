use std::sync::Arc;

use chrono::Local;
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing::info;

use tableside::config::Config;
use tableside::engine::{EngineError, EngineHandle};
use tableside::memory::MemoryStore;
use tableside::model::*;
use tableside::rows::{ms_to_iso, parse_reservation_time};
use tableside::venue::{provision_tables, Venue};

const HELP: &str = "\
commands:
  list [STATUS] [QUERY]        floor overview (STATUS: FREE|RESERVED|SEATED|DIRTY)
  totals                       tables per status
  seat|checkin|checkout|clean|cancel TABLE
  reserve TABLE [NAME] [PARTY] [HH:MM]
  book NAME PARTY TIME         add to the reservation book
  bookings                     list the reservation book
  assign RESERVATION TABLE
  remove RESERVATION
  quit";

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt::init();

    let config = Config::from_env();
    tableside::observability::init(config.metrics_port)?;

    let store = Arc::new(MemoryStore::new());
    provision_tables(store.as_ref(), &config).await?;
    let venue = Venue::open(store.clone(), &config).await?;
    info!("tableside ready");
    info!("  tables: {}", config.table_count);
    info!("  sweep: every {:?}, no-show after {}m", config.sweep_interval, config.no_show_minutes);
    info!("  metrics: {}", config.metrics_port.map_or("disabled".to_string(), |p| format!("http://0.0.0.0:{p}/metrics")));

    let mut notices = venue.engine().notices();
    tokio::spawn(async move {
        while let Ok(notice) = notices.recv().await {
            println!("! {}: {}", notice.subject, notice.message);
        }
    });

    // Graceful shutdown on SIGTERM/ctrl-c
    #[cfg(unix)]
    let mut sigterm = tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())?;
    let shutdown = async {
        let ctrl_c = tokio::signal::ctrl_c();
        #[cfg(unix)]
        {
            tokio::select! {
                _ = ctrl_c => {}
                _ = sigterm.recv() => {}
            }
        }
        #[cfg(not(unix))]
        {
            ctrl_c.await.ok();
        }
    };
    tokio::pin!(shutdown);

    println!("{HELP}");
    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    loop {
        tokio::select! {
            line = lines.next_line() => {
                let Some(line) = line? else { break };
                let line = line.trim();
                if line.is_empty() {
                    continue;
                }
                if line == "quit" || line == "exit" {
                    break;
                }
                match run_command(venue.engine(), line).await {
                    Ok(out) => println!("{out}"),
                    Err(e) => println!("error: {e}"),
                }
            }
            _ = &mut shutdown => {
                info!("shutdown signal received");
                break;
            }
        }
    }

    venue.shutdown();
    store.shutdown();
    info!("tableside stopped");
    Ok(())
}

async fn run_command(engine: &EngineHandle, line: &str) -> Result<String, String> {
    let args: Vec<&str> = line.split_whitespace().collect();
    let arg = |i: usize| args.get(i).copied().ok_or_else(|| format!("missing argument\n{HELP}"));
    let engine_err = |e: EngineError| e.to_string();

    match args[0] {
        "help" => Ok(HELP.to_string()),
        "list" => {
            let (filter, query) = match args.get(1).map(|s| s.parse::<TableStatus>()) {
                Some(Ok(status)) => (Some(status), args[2..].join(" ")),
                _ => (None, args[1..].join(" ")),
            };
            let snapshot = engine.snapshot().await.map_err(engine_err)?;
            let now = now_ms();
            let rows: Vec<String> = snapshot
                .overview(filter, &query, now)
                .into_iter()
                .map(|v| {
                    format!(
                        "{:<5} {:>2}p  {:<10} {:<20} {:>7}  {}",
                        v.table.id,
                        v.table.capacity,
                        v.table.status.label(),
                        v.table.name.as_deref().unwrap_or(v.table.note.as_deref().unwrap_or("")),
                        v.elapsed,
                        v.attention.map(|a| a.label()).unwrap_or(""),
                    )
                })
                .collect();
            Ok(rows.join("\n"))
        }
        "totals" => {
            let totals = engine.snapshot().await.map_err(engine_err)?.totals();
            let parts: Vec<String> = TableStatus::ALL
                .iter()
                .map(|s| format!("{}: {}", s.label(), totals.get(*s)))
                .collect();
            Ok(format!("Alle: {}  {}", totals.all, parts.join("  ")))
        }
        "bookings" => {
            let snapshot = engine.snapshot().await.map_err(engine_err)?;
            let rows: Vec<String> = snapshot
                .reservations
                .iter()
                .map(|r| {
                    format!(
                        "{}  {:<20} {:>2}p  {}",
                        r.id,
                        r.name,
                        r.party_size,
                        ms_to_iso(r.time).unwrap_or_default()
                    )
                })
                .collect();
            Ok(rows.join("\n"))
        }
        "book" => {
            let party = arg(2)?.parse::<u32>().map_err(|e| e.to_string())?;
            match engine
                .add_reservation(arg(1)?, party, arg(3)?)
                .await
                .map_err(engine_err)?
            {
                Some(id) => Ok(format!("booked {id}")),
                None => Ok("ignored: name and time are required".to_string()),
            }
        }
        "assign" => outcome(engine.assign(arg(1)?, arg(2)?).await),
        "remove" => outcome(engine.remove_reservation(arg(1)?).await),
        "reserve" => {
            let table = arg(1)?;
            let party_size = args
                .get(3)
                .map(|s| s.parse::<u32>().map_err(|e| e.to_string()))
                .transpose()?;
            let reserved_for = match args.get(4) {
                Some(t) => Some(
                    parse_reservation_time(t, now_ms(), &Local)
                        .ok_or_else(|| format!("bad time {t:?}"))?,
                ),
                None => None,
            };
            let details = ReserveDetails {
                name: args.get(2).map(|s| s.to_string()),
                party_size,
                reserved_for,
            };
            outcome(engine.apply(table, TableAction::Reserve(details)).await)
        }
        verb => {
            let action: TableAction = verb.parse().map_err(|e: ParseLabelError| e.to_string())?;
            outcome(engine.apply(arg(1)?, action).await)
        }
    }
}

fn outcome(result: Result<Outcome, EngineError>) -> Result<String, String> {
    match result {
        Ok(Outcome::Applied) => Ok("ok".to_string()),
        Ok(Outcome::Unchanged) => Ok("nothing to do".to_string()),
        Err(e) => Err(e.to_string()),
    }
}
