use std::collections::HashMap;

use crate::book::ReservationBook;
use crate::model::*;

use super::queries::Snapshot;

/// The client's local copy of both collections, plus a version per entity.
///
/// Every local mutation of an entity stamps it with a fresh number from one
/// monotonically increasing sequence, so a version never repeats even if the
/// entity is removed and comes back.
#[derive(Debug, Clone, Default)]
pub struct LocalState {
    tables: Vec<Table>,
    book: ReservationBook,
    versions: HashMap<(Collection, String), u64>,
    seq: u64,
}

impl LocalState {
    pub fn hydrate(tables: Vec<Table>, reservations: Vec<Reservation>) -> Self {
        let mut state = Self::default();
        state.replace_tables(tables);
        state.replace_reservations(reservations);
        state
    }

    pub fn tables(&self) -> &[Table] {
        &self.tables
    }

    pub fn table(&self, id: &str) -> Option<&Table> {
        self.tables.iter().find(|t| t.id == id)
    }

    pub fn book(&self) -> &ReservationBook {
        &self.book
    }

    pub fn version(&self, collection: Collection, id: &str) -> u64 {
        self.versions
            .get(&(collection, id.to_string()))
            .copied()
            .unwrap_or(0)
    }

    fn bump(&mut self, collection: Collection, id: &str) -> u64 {
        self.seq += 1;
        self.versions.insert((collection, id.to_string()), self.seq);
        self.seq
    }

    // ── Tables ───────────────────────────────────────────────

    /// Replace in place or append, keep id order. Returns the new version.
    pub fn upsert_table(&mut self, table: Table) -> u64 {
        let version = self.bump(Collection::Tables, &table.id);
        match self.tables.iter_mut().find(|t| t.id == table.id) {
            Some(existing) => *existing = table,
            None => {
                self.tables.push(table);
                self.tables.sort_by(|a, b| a.id.cmp(&b.id));
            }
        }
        version
    }

    pub fn remove_table(&mut self, id: &str) -> Option<Table> {
        self.bump(Collection::Tables, id);
        let pos = self.tables.iter().position(|t| t.id == id)?;
        Some(self.tables.remove(pos))
    }

    pub fn replace_tables(&mut self, tables: Vec<Table>) {
        let mut ids: Vec<String> = self.tables.iter().map(|t| t.id.clone()).collect();
        ids.extend(tables.iter().map(|t| t.id.clone()));
        for id in ids {
            self.bump(Collection::Tables, &id);
        }
        self.tables = Vec::with_capacity(tables.len());
        for t in tables {
            match self.tables.iter_mut().find(|x| x.id == t.id) {
                Some(existing) => *existing = t,
                None => self.tables.push(t),
            }
        }
        self.tables.sort_by(|a, b| a.id.cmp(&b.id));
    }

    // ── Reservations ─────────────────────────────────────────

    pub fn upsert_reservation(&mut self, reservation: Reservation) -> u64 {
        let version = self.bump(Collection::Reservations, &reservation.id);
        self.book.upsert(reservation);
        version
    }

    /// Remove from the book. Returns the removed entry and the new version.
    pub fn remove_reservation(&mut self, id: &str) -> (Option<Reservation>, u64) {
        let version = self.bump(Collection::Reservations, id);
        (self.book.remove(id), version)
    }

    pub fn replace_reservations(&mut self, reservations: Vec<Reservation>) {
        let mut ids: Vec<String> = self.book.entries().iter().map(|r| r.id.clone()).collect();
        ids.extend(reservations.iter().map(|r| r.id.clone()));
        for id in ids {
            self.bump(Collection::Reservations, &id);
        }
        self.book = ReservationBook::from_entries(reservations);
    }

    pub fn snapshot(&self) -> Snapshot {
        Snapshot {
            tables: self.tables.clone(),
            reservations: self.book.entries().to_vec(),
        }
    }
}
