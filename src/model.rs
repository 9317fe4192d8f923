use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;

use chrono::NaiveTime;
use serde::{Deserialize, Serialize};

use crate::limits::*;

/// Unix milliseconds.
pub type Ms = i64;

pub const MINUTE_MS: Ms = 60_000;

pub fn now_ms() -> Ms {
    chrono::Utc::now().timestamp_millis()
}

/// Occupancy state of a physical table.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TableStatus {
    Free,
    Reserved,
    Seated,
    Dirty,
}

impl TableStatus {
    pub const ALL: [TableStatus; 4] = [
        TableStatus::Free,
        TableStatus::Reserved,
        TableStatus::Seated,
        TableStatus::Dirty,
    ];

    /// Wire form, as stored in the `status` column.
    pub fn as_str(&self) -> &'static str {
        match self {
            TableStatus::Free => "FREE",
            TableStatus::Reserved => "RESERVED",
            TableStatus::Seated => "SEATED",
            TableStatus::Dirty => "DIRTY",
        }
    }

    /// Floor staff label.
    pub fn label(&self) -> &'static str {
        match self {
            TableStatus::Free => "Frei",
            TableStatus::Reserved => "Reserviert",
            TableStatus::Seated => "Belegt",
            TableStatus::Dirty => "Reinigung",
        }
    }

    /// Position in the floor overview: occupied tables first, free last.
    pub fn display_rank(&self) -> u8 {
        match self {
            TableStatus::Seated => 0,
            TableStatus::Reserved => 1,
            TableStatus::Dirty => 2,
            TableStatus::Free => 3,
        }
    }
}

impl fmt::Display for TableStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParseLabelError {
    pub kind: &'static str,
    pub value: String,
}

impl fmt::Display for ParseLabelError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "unknown {}: {:?}", self.kind, self.value)
    }
}

impl std::error::Error for ParseLabelError {}

impl FromStr for TableStatus {
    type Err = ParseLabelError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_uppercase().as_str() {
            "FREE" => Ok(TableStatus::Free),
            "RESERVED" => Ok(TableStatus::Reserved),
            "SEATED" => Ok(TableStatus::Seated),
            "DIRTY" => Ok(TableStatus::Dirty),
            _ => Err(ParseLabelError {
                kind: "table status",
                value: s.to_string(),
            }),
        }
    }
}

/// A physical table. The roster is fixed at provisioning; the core only
/// ever rewrites these fields through the state machine.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Table {
    pub id: String,
    pub capacity: u32,
    pub status: TableStatus,
    /// Party name while RESERVED or SEATED.
    pub name: Option<String>,
    pub party_size: Option<u32>,
    /// When the current status began.
    pub since: Option<Ms>,
    /// Planned arrival, only while RESERVED.
    pub reserved_for: Option<Ms>,
    pub note: Option<String>,
}

impl Table {
    pub fn new(id: impl Into<String>, capacity: u32) -> Self {
        Self {
            id: id.into(),
            capacity,
            status: TableStatus::Free,
            name: None,
            party_size: None,
            since: None,
            reserved_for: None,
            note: None,
        }
    }
}

/// Build the provisioning roster `T1..Tn`, all FREE.
pub fn default_roster(count: usize, capacity: u32, overrides: &HashMap<String, u32>) -> Vec<Table> {
    let mut tables: Vec<Table> = (1..=count)
        .map(|i| {
            let id = format!("T{i}");
            let cap = overrides.get(&id).copied().unwrap_or(capacity);
            Table::new(id, cap)
        })
        .collect();
    tables.sort_by(|a, b| a.id.cmp(&b.id));
    tables
}

/// Optional data carried by a RESERVE action.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ReserveDetails {
    pub name: Option<String>,
    pub party_size: Option<u32>,
    pub reserved_for: Option<Ms>,
}

/// A user- or system-triggered status change request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TableAction {
    /// Walk-in: FREE → SEATED.
    SeatNow,
    /// FREE → RESERVED.
    Reserve(ReserveDetails),
    /// RESERVED → FREE.
    Cancel,
    /// RESERVED → SEATED.
    CheckIn,
    /// SEATED → DIRTY.
    CheckOut,
    /// DIRTY → FREE.
    Clean,
}

impl TableAction {
    pub fn label(&self) -> &'static str {
        match self {
            TableAction::SeatNow => "SEAT_NOW",
            TableAction::Reserve(_) => "RESERVE",
            TableAction::Cancel => "CANCEL",
            TableAction::CheckIn => "CHECKIN",
            TableAction::CheckOut => "CHECKOUT",
            TableAction::Clean => "CLEAN",
        }
    }

    /// The guard: the only status this action takes effect from.
    pub fn required_status(&self) -> TableStatus {
        match self {
            TableAction::SeatNow | TableAction::Reserve(_) => TableStatus::Free,
            TableAction::Cancel | TableAction::CheckIn => TableStatus::Reserved,
            TableAction::CheckOut => TableStatus::Seated,
            TableAction::Clean => TableStatus::Dirty,
        }
    }
}

impl fmt::Display for TableAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

impl FromStr for TableAction {
    type Err = ParseLabelError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_uppercase().as_str() {
            "SEAT_NOW" | "SEAT" => Ok(TableAction::SeatNow),
            "RESERVE" => Ok(TableAction::Reserve(ReserveDetails::default())),
            "CANCEL" => Ok(TableAction::Cancel),
            "CHECKIN" => Ok(TableAction::CheckIn),
            "CHECKOUT" => Ok(TableAction::CheckOut),
            "CLEAN" => Ok(TableAction::Clean),
            _ => Err(ParseLabelError {
                kind: "table action",
                value: s.to_string(),
            }),
        }
    }
}

/// An unassigned booking in the reservation book.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Reservation {
    pub id: String,
    pub name: String,
    pub party_size: u32,
    /// Requested arrival, normalized to Unix ms at the store boundary.
    /// Orders the book.
    pub time: Ms,
    /// Wall-clock time when booked as `"HH:MM"`; re-resolved against the
    /// day of assignment.
    #[serde(default)]
    pub time_of_day: Option<NaiveTime>,
}

impl Reservation {
    pub fn new(id: impl Into<String>, name: impl Into<String>, party_size: u32, time: Ms) -> Self {
        let party_size = if party_size == 0 {
            DEFAULT_PARTY_SIZE
        } else {
            party_size
        };
        Self {
            id: id.into(),
            name: name.into(),
            party_size,
            time,
            time_of_day: None,
        }
    }

    pub fn at_time_of_day(mut self, time_of_day: NaiveTime) -> Self {
        self.time_of_day = Some(time_of_day);
        self
    }
}

/// The two row collections the core keeps a local copy of.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Collection {
    Tables,
    Reservations,
}

impl Collection {
    pub fn as_str(&self) -> &'static str {
        match self {
            Collection::Tables => "tables",
            Collection::Reservations => "reservations",
        }
    }
}

impl fmt::Display for Collection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Result of a mutation that did not fail.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    /// Local state changed and the store accepted the write.
    Applied,
    /// Guard failed or target absent; no I/O happened.
    Unchanged,
}

// ── Query result types ───────────────────────────────────────────

/// Highlight shown on a table card.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum Attention {
    /// Reserved guest is 20–30 minutes late.
    LateArrival,
    /// Reserved guest is at least 30 minutes late.
    NoShow,
    /// Seated for 90 minutes or more.
    LongSeated,
}

impl Attention {
    pub fn label(&self) -> &'static str {
        match self {
            Attention::LateArrival => "Gast verspätet",
            Attention::NoShow => "No-Show (30m+)",
            Attention::LongSeated => "Tisch > 90m belegt",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TableView {
    pub table: Table,
    pub attention: Option<Attention>,
    /// Human form of the time since `since`.
    pub elapsed: String,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct StatusTotals {
    pub all: usize,
    pub free: usize,
    pub reserved: usize,
    pub seated: usize,
    pub dirty: usize,
}

impl StatusTotals {
    pub fn get(&self, status: TableStatus) -> usize {
        match status {
            TableStatus::Free => self.free,
            TableStatus::Reserved => self.reserved,
            TableStatus::Seated => self.seated,
            TableStatus::Dirty => self.dirty,
        }
    }

    pub(crate) fn count(&mut self, status: TableStatus) {
        self.all += 1;
        match status {
            TableStatus::Free => self.free += 1,
            TableStatus::Reserved => self.reserved += 1,
            TableStatus::Seated => self.seated += 1,
            TableStatus::Dirty => self.dirty += 1,
        }
    }
}

/// A FREE table offered when assigning a reservation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Candidate {
    pub id: String,
    pub capacity: u32,
}
