use chrono::TimeZone;
use ulid::Ulid;

use crate::engine::EngineError;
use crate::limits::*;
use crate::model::*;
use crate::rows::{parse_reservation_time, parse_time_of_day};

/// Unassigned reservations, kept in display order: by requested time, then id.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ReservationBook {
    entries: Vec<Reservation>,
}

impl ReservationBook {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_entries(entries: Vec<Reservation>) -> Self {
        let mut book = Self { entries: Vec::new() };
        for r in entries {
            book.upsert(r);
        }
        book
    }

    pub fn entries(&self) -> &[Reservation] {
        &self.entries
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn get(&self, id: &str) -> Option<&Reservation> {
        self.entries.iter().find(|r| r.id == id)
    }

    /// Replace the entry with the same id in place, or append. Returns true if
    /// the book changed.
    pub fn upsert(&mut self, reservation: Reservation) -> bool {
        match self.entries.iter_mut().find(|r| r.id == reservation.id) {
            Some(existing) if *existing == reservation => return false,
            Some(existing) => *existing = reservation,
            None => self.entries.push(reservation),
        }
        self.sort();
        true
    }

    pub fn remove(&mut self, id: &str) -> Option<Reservation> {
        let pos = self.entries.iter().position(|r| r.id == id)?;
        Some(self.entries.remove(pos))
    }

    fn sort(&mut self) {
        self.entries
            .sort_by(|a, b| a.time.cmp(&b.time).then_with(|| a.id.cmp(&b.id)));
    }
}

/// Validate a booking submission and build the reservation it creates.
///
/// An empty name or a missing/unparseable time is silently ignored
/// (`Ok(None)`); out-of-bounds input is a limit error.
pub fn prepare_booking<Tz: TimeZone>(
    name: &str,
    party_size: u32,
    time: &str,
    now: Ms,
    tz: &Tz,
) -> Result<Option<Reservation>, EngineError> {
    let name = name.trim();
    if name.is_empty() || time.trim().is_empty() {
        return Ok(None);
    }
    if name.chars().count() > MAX_NAME_LEN {
        return Err(EngineError::LimitExceeded("guest name too long"));
    }
    let party_size = if party_size == 0 { DEFAULT_PARTY_SIZE } else { party_size };
    if party_size > MAX_PARTY_SIZE {
        return Err(EngineError::LimitExceeded("party too large"));
    }
    let Some(at) = parse_reservation_time(time, now, tz) else {
        return Ok(None);
    };
    let reservation = Reservation::new(Ulid::new().to_string(), name, party_size, at);
    Ok(Some(match parse_time_of_day(time) {
        Some(t) => reservation.at_time_of_day(t),
        None => reservation,
    }))
}
