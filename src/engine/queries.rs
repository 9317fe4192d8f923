use crate::model::*;

/// Reserved guests this late get a warning.
pub const LATE_ARRIVAL_MINUTES: i64 = 20;

/// Reserved guests this late count as a no-show.
pub const NO_SHOW_MINUTES: i64 = 30;

/// Seated parties this long get flagged.
pub const LONG_SEATED_MINUTES: i64 = 90;

/// A point-in-time copy of both local collections, in canonical order.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Snapshot {
    pub tables: Vec<Table>,
    pub reservations: Vec<Reservation>,
}

impl Snapshot {
    pub fn table(&self, id: &str) -> Option<&Table> {
        self.tables.iter().find(|t| t.id == id)
    }

    pub fn reservation(&self, id: &str) -> Option<&Reservation> {
        self.reservations.iter().find(|r| r.id == id)
    }

    /// Floor overview: filtered by status and by a case-insensitive match on
    /// `"<id> <name>"`, occupied tables first, then by id.
    pub fn overview(&self, filter: Option<TableStatus>, query: &str, now: Ms) -> Vec<TableView> {
        let needle = query.trim().to_lowercase();
        let mut views: Vec<TableView> = self
            .tables
            .iter()
            .filter(|t| filter.is_none_or(|s| t.status == s))
            .filter(|t| {
                needle.is_empty()
                    || format!("{} {}", t.id, t.name.as_deref().unwrap_or(""))
                        .to_lowercase()
                        .contains(&needle)
            })
            .map(|t| TableView {
                table: t.clone(),
                attention: attention(t, now),
                elapsed: elapsed_label(t.since, now),
            })
            .collect();
        views.sort_by(|a, b| {
            a.table
                .status
                .display_rank()
                .cmp(&b.table.status.display_rank())
                .then_with(|| a.table.id.cmp(&b.table.id))
        });
        views
    }

    pub fn totals(&self) -> StatusTotals {
        let mut totals = StatusTotals::default();
        for t in &self.tables {
            totals.count(t.status);
        }
        totals
    }

    /// FREE tables a reservation can be assigned to.
    pub fn candidates(&self) -> Vec<Candidate> {
        self.tables
            .iter()
            .filter(|t| t.status == TableStatus::Free)
            .map(|t| Candidate {
                id: t.id.clone(),
                capacity: t.capacity,
            })
            .collect()
    }
}

fn minutes_between(from: Ms, to: Ms) -> i64 {
    (to - from).div_euclid(MINUTE_MS)
}

/// Card highlight for a table at `now`.
pub fn attention(table: &Table, now: Ms) -> Option<Attention> {
    match table.status {
        TableStatus::Reserved => {
            let late = minutes_between(table.reserved_for.filter(|t| *t > 0)?, now);
            if late >= NO_SHOW_MINUTES {
                Some(Attention::NoShow)
            } else if late >= LATE_ARRIVAL_MINUTES {
                Some(Attention::LateArrival)
            } else {
                None
            }
        }
        TableStatus::Seated => {
            let seated = minutes_between(table.since?, now);
            (seated >= LONG_SEATED_MINUTES).then_some(Attention::LongSeated)
        }
        TableStatus::Free | TableStatus::Dirty => None,
    }
}

/// `"–"`, `"<1m"`, `"42m"` or `"2h 5m"`.
pub fn elapsed_label(since: Option<Ms>, now: Ms) -> String {
    let Some(since) = since else {
        return "–".to_string();
    };
    let mins = minutes_between(since, now);
    if mins < 1 {
        return "<1m".to_string();
    }
    if mins < 60 {
        return format!("{mins}m");
    }
    format!("{}h {}m", mins / 60, mins % 60)
}

#[cfg(test)]
mod tests {
    use super::*;

    const NOW: Ms = 1_760_011_200_000;

    fn table(id: &str, status: TableStatus) -> Table {
        Table {
            status,
            ..Table::new(id, 4)
        }
    }

    #[test]
    fn elapsed_labels() {
        assert_eq!(elapsed_label(None, NOW), "–");
        assert_eq!(elapsed_label(Some(NOW - 30_000), NOW), "<1m");
        assert_eq!(elapsed_label(Some(NOW - 42 * MINUTE_MS), NOW), "42m");
        assert_eq!(elapsed_label(Some(NOW - 125 * MINUTE_MS), NOW), "2h 5m");
        // Clock skew: a start in the future still reads as just now.
        assert_eq!(elapsed_label(Some(NOW + MINUTE_MS), NOW), "<1m");
    }

    #[test]
    fn attention_thresholds() {
        let mut reserved = table("T1", TableStatus::Reserved);
        reserved.reserved_for = Some(NOW - 19 * MINUTE_MS);
        assert_eq!(attention(&reserved, NOW), None);
        reserved.reserved_for = Some(NOW - 20 * MINUTE_MS);
        assert_eq!(attention(&reserved, NOW), Some(Attention::LateArrival));
        reserved.reserved_for = Some(NOW - 30 * MINUTE_MS);
        assert_eq!(attention(&reserved, NOW), Some(Attention::NoShow));
        reserved.reserved_for = None;
        assert_eq!(attention(&reserved, NOW), None);

        let mut seated = table("T2", TableStatus::Seated);
        seated.since = Some(NOW - 89 * MINUTE_MS);
        assert_eq!(attention(&seated, NOW), None);
        seated.since = Some(NOW - 90 * MINUTE_MS);
        assert_eq!(attention(&seated, NOW), Some(Attention::LongSeated));
    }

    #[test]
    fn overview_orders_and_filters() {
        let mut seated = table("T4", TableStatus::Seated);
        seated.name = Some("Özdemir".into());
        let snap = Snapshot {
            tables: vec![
                table("T1", TableStatus::Free),
                table("T2", TableStatus::Dirty),
                table("T3", TableStatus::Reserved),
                seated,
            ],
            reservations: Vec::new(),
        };

        let ids: Vec<String> = snap
            .overview(None, "", NOW)
            .into_iter()
            .map(|v| v.table.id)
            .collect();
        assert_eq!(ids, vec!["T4", "T3", "T2", "T1"]);

        let free = snap.overview(Some(TableStatus::Free), "", NOW);
        assert_eq!(free.len(), 1);
        assert_eq!(free[0].table.id, "T1");

        let by_name = snap.overview(None, "özd", NOW);
        assert_eq!(by_name.len(), 1);
        assert_eq!(by_name[0].table.id, "T4");

        let by_id = snap.overview(None, "t2", NOW);
        assert_eq!(by_id[0].table.id, "T2");
    }

    #[test]
    fn totals_and_candidates() {
        let snap = Snapshot {
            tables: vec![
                table("T1", TableStatus::Free),
                table("T2", TableStatus::Free),
                table("T3", TableStatus::Seated),
            ],
            reservations: Vec::new(),
        };
        let totals = snap.totals();
        assert_eq!(totals.all, 3);
        assert_eq!(totals.free, 2);
        assert_eq!(totals.seated, 1);

        let candidates = snap.candidates();
        assert_eq!(
            candidates,
            vec![
                Candidate { id: "T1".into(), capacity: 4 },
                Candidate { id: "T2".into(), capacity: 4 },
            ]
        );
    }
}
