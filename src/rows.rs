//! Row codec for the two collections.
//!
//! Decoding is strict and fails closed: a row missing a required column, or
//! carrying a column of the wrong shape, is an error the caller drops and logs.
//! Encoding always writes every nullable column, as an explicit `null` when
//! cleared, because the remote row is sparse and an omitted column would keep
//! its old value.

use std::fmt;

use chrono::{DateTime, NaiveTime, SecondsFormat, TimeZone, Utc};
use serde_json::{Number, Value};

use crate::limits::*;
use crate::model::*;
use crate::store::Row;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DecodeError {
    MissingField(&'static str),
    InvalidField { field: &'static str, reason: String },
}

impl fmt::Display for DecodeError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DecodeError::MissingField(field) => write!(f, "missing required field `{field}`"),
            DecodeError::InvalidField { field, reason } => {
                write!(f, "invalid field `{field}`: {reason}")
            }
        }
    }
}

impl std::error::Error for DecodeError {}

fn invalid(field: &'static str, reason: impl Into<String>) -> DecodeError {
    DecodeError::InvalidField {
        field,
        reason: reason.into(),
    }
}

// ── Timestamps ──────────────────────────────────────────────────

/// Unix ms → RFC 3339 UTC with millisecond precision.
pub fn ms_to_iso(ms: Ms) -> Option<String> {
    DateTime::<Utc>::from_timestamp_millis(ms).map(|d| d.to_rfc3339_opts(SecondsFormat::Millis, true))
}

pub fn iso_to_ms(s: &str) -> Option<Ms> {
    DateTime::parse_from_rfc3339(s.trim())
        .ok()
        .map(|d| d.timestamp_millis())
}

/// Resolve an `"HH:MM"` time against the calendar day `now` falls on in `tz`.
pub fn resolve_time_of_day<Tz: TimeZone>(hhmm: &str, now: Ms, tz: &Tz) -> Option<Ms> {
    time_on_day(parse_time_of_day(hhmm)?, now, tz)
}

/// Place a wall-clock time on the calendar day `now` falls on in `tz`.
pub fn time_on_day<Tz: TimeZone>(time: NaiveTime, now: Ms, tz: &Tz) -> Option<Ms> {
    let today = DateTime::<Utc>::from_timestamp_millis(now)?
        .with_timezone(tz)
        .date_naive();
    let local = today.and_time(time);
    local
        .and_local_timezone(tz.clone())
        .earliest()
        .or_else(|| {
            // Inside a DST gap: the wall-clock time does not exist, take the first valid one after it.
            (local + chrono::Duration::hours(1))
                .and_local_timezone(tz.clone())
                .earliest()
        })
        .map(|d| d.timestamp_millis())
}

/// True for the `"HH:MM"` form of a reservation time.
pub fn is_time_of_day(s: &str) -> bool {
    let s = s.trim();
    s.len() == 5 && s.as_bytes().get(2) == Some(&b':')
}

pub fn parse_time_of_day(s: &str) -> Option<NaiveTime> {
    if !is_time_of_day(s) {
        return None;
    }
    NaiveTime::parse_from_str(s.trim(), "%H:%M").ok()
}

/// Parse a requested arrival in any accepted representation into Unix ms.
pub fn parse_reservation_time<Tz: TimeZone>(input: &str, now: Ms, tz: &Tz) -> Option<Ms> {
    if is_time_of_day(input) {
        resolve_time_of_day(input, now, tz)
    } else {
        iso_to_ms(input)
    }
}

/// When the guest is expected, as seen at `now`: an `"HH:MM"` booking lands
/// on the current day, an absolute one stays where it is.
pub fn planned_arrival<Tz: TimeZone>(reservation: &Reservation, now: Ms, tz: &Tz) -> Ms {
    reservation
        .time_of_day
        .and_then(|t| time_on_day(t, now, tz))
        .unwrap_or(reservation.time)
}

fn instant_value(ms: Option<Ms>) -> Value {
    ms.and_then(ms_to_iso).map(Value::String).unwrap_or(Value::Null)
}

// ── Field readers ───────────────────────────────────────────────

fn present<'a>(row: &'a Row, field: &'static str) -> Option<&'a Value> {
    row.get(field).filter(|v| !v.is_null())
}

fn read_id(row: &Row) -> Result<String, DecodeError> {
    let id = match present(row, "id") {
        Some(Value::String(s)) => s.trim().to_string(),
        Some(Value::Number(n)) => n.to_string(),
        Some(other) => return Err(invalid("id", format!("expected string, got {other}"))),
        None => return Err(DecodeError::MissingField("id")),
    };
    if id.is_empty() {
        return Err(DecodeError::MissingField("id"));
    }
    if id.len() > MAX_TABLE_ID_LEN {
        return Err(invalid("id", "too long"));
    }
    Ok(id)
}

fn read_positive(row: &Row, field: &'static str) -> Result<Option<u32>, DecodeError> {
    match present(row, field) {
        None => Ok(None),
        Some(v) => {
            let n = v
                .as_u64()
                .ok_or_else(|| invalid(field, format!("expected positive integer, got {v}")))?;
            if n == 0 {
                return Err(invalid(field, "must be positive"));
            }
            u32::try_from(n)
                .map(Some)
                .map_err(|_| invalid(field, "out of range"))
        }
    }
}

fn read_text(row: &Row, field: &'static str) -> Result<Option<String>, DecodeError> {
    match present(row, field) {
        None => Ok(None),
        Some(Value::String(s)) if s.trim().is_empty() => Ok(None),
        Some(Value::String(s)) => Ok(Some(s.clone())),
        Some(other) => Err(invalid(field, format!("expected string, got {other}"))),
    }
}

fn read_instant(row: &Row, field: &'static str) -> Result<Option<Ms>, DecodeError> {
    match present(row, field) {
        None => Ok(None),
        Some(Value::Number(n)) => n
            .as_i64()
            .map(Some)
            .ok_or_else(|| invalid(field, "epoch millis out of range")),
        Some(Value::String(s)) => iso_to_ms(s)
            .map(Some)
            .ok_or_else(|| invalid(field, format!("not an ISO-8601 timestamp: {s:?}"))),
        Some(other) => Err(invalid(field, format!("expected timestamp, got {other}"))),
    }
}

// ── Tables ──────────────────────────────────────────────────────

pub fn decode_table(row: &Row) -> Result<Table, DecodeError> {
    let id = read_id(row)?;
    let capacity = read_positive(row, "capacity")?.ok_or(DecodeError::MissingField("capacity"))?;
    let status = match present(row, "status") {
        Some(Value::String(s)) => s
            .parse::<TableStatus>()
            .map_err(|e| invalid("status", e.to_string()))?,
        Some(other) => return Err(invalid("status", format!("expected string, got {other}"))),
        None => return Err(DecodeError::MissingField("status")),
    };
    Ok(Table {
        id,
        capacity,
        status,
        name: read_text(row, "name")?,
        party_size: read_positive(row, "party_size")?,
        since: read_instant(row, "since")?,
        reserved_for: read_instant(row, "reserved_for")?,
        note: read_text(row, "note")?,
    })
}

/// Columns the state machine owns, every one present.
pub fn table_update_fields(table: &Table) -> Row {
    let mut row = Row::new();
    row.insert("status".into(), Value::String(table.status.as_str().into()));
    row.insert(
        "name".into(),
        table.name.clone().map(Value::String).unwrap_or(Value::Null),
    );
    row.insert(
        "party_size".into(),
        table
            .party_size
            .map(|n| Value::Number(Number::from(n)))
            .unwrap_or(Value::Null),
    );
    row.insert("since".into(), instant_value(table.since));
    row.insert("reserved_for".into(), instant_value(table.reserved_for));
    row.insert(
        "note".into(),
        table.note.clone().map(Value::String).unwrap_or(Value::Null),
    );
    row
}

/// Full row including identity and capacity, for provisioning.
pub fn encode_table(table: &Table) -> Row {
    let mut row = Row::new();
    row.insert("id".into(), Value::String(table.id.clone()));
    row.insert("capacity".into(), Value::Number(Number::from(table.capacity)));
    row.extend(table_update_fields(table));
    row
}

// ── Reservations ────────────────────────────────────────────────

pub fn decode_reservation<Tz: TimeZone>(row: &Row, now: Ms, tz: &Tz) -> Result<Reservation, DecodeError> {
    let id = read_id(row)?;
    let name = read_text(row, "name")?.ok_or(DecodeError::MissingField("name"))?;
    let party_size =
        read_positive(row, "party_size")?.ok_or(DecodeError::MissingField("party_size"))?;
    let (time, time_of_day) = match present(row, "time") {
        Some(Value::String(s)) => {
            let time = parse_reservation_time(s, now, tz)
                .ok_or_else(|| invalid("time", format!("unrecognized time {s:?}")))?;
            (time, parse_time_of_day(s))
        }
        Some(Value::Number(n)) => (
            n.as_i64()
                .ok_or_else(|| invalid("time", "epoch millis out of range"))?,
            None,
        ),
        Some(other) => return Err(invalid("time", format!("expected time, got {other}"))),
        None => return Err(DecodeError::MissingField("time")),
    };
    Ok(Reservation {
        id,
        name,
        party_size,
        time,
        time_of_day,
    })
}

pub fn encode_reservation(reservation: &Reservation) -> Row {
    let mut row = Row::new();
    row.insert("id".into(), Value::String(reservation.id.clone()));
    row.insert("name".into(), Value::String(reservation.name.clone()));
    row.insert(
        "party_size".into(),
        Value::Number(Number::from(reservation.party_size)),
    );
    let time = match reservation.time_of_day {
        Some(t) => Value::String(t.format("%H:%M").to_string()),
        None => instant_value(Some(reservation.time)),
    };
    row.insert("time".into(), time);
    row
}

/// Only the key of a row, e.g. from a DELETE notification.
pub fn decode_key(row: &Row) -> Result<String, DecodeError> {
    read_id(row)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::FixedOffset;
    use serde_json::json;

    fn obj(v: Value) -> Row {
        match v {
            Value::Object(m) => m,
            _ => panic!("not an object"),
        }
    }

    // 2025-10-09T12:00:00Z
    const NOON_UTC: Ms = 1_760_011_200_000;

    #[test]
    fn iso_round_trip() {
        let iso = ms_to_iso(NOON_UTC).unwrap();
        assert_eq!(iso, "2025-10-09T12:00:00.000Z");
        assert_eq!(iso_to_ms(&iso), Some(NOON_UTC));
        assert_eq!(iso_to_ms("2025-10-09T14:00:00+02:00"), Some(NOON_UTC));
        assert_eq!(iso_to_ms("yesterday"), None);
    }

    #[test]
    fn time_of_day_resolves_in_zone() {
        let utc = Utc;
        let expected = iso_to_ms("2025-10-09T19:00:00Z").unwrap();
        assert_eq!(resolve_time_of_day("19:00", NOON_UTC, &utc), Some(expected));

        let berlin = FixedOffset::east_opt(2 * 3600).unwrap();
        let expected = iso_to_ms("2025-10-09T19:00:00+02:00").unwrap();
        assert_eq!(resolve_time_of_day("19:00", NOON_UTC, &berlin), Some(expected));

        assert_eq!(resolve_time_of_day("25:99", NOON_UTC, &utc), None);
    }

    #[test]
    fn reservation_time_forms_agree() {
        let utc = Utc;
        let from_hhmm = parse_reservation_time("18:30", NOON_UTC, &utc).unwrap();
        let from_iso = parse_reservation_time("2025-10-09T18:30:00Z", NOON_UTC, &utc).unwrap();
        assert_eq!(from_hhmm, from_iso);
        assert!(is_time_of_day("07:05"));
        assert!(!is_time_of_day("2025-10-09T07:05:00Z"));
    }

    #[test]
    fn decode_full_table_row() {
        let row = obj(json!({
            "id": "T3",
            "capacity": 4,
            "status": "RESERVED",
            "name": "Müller",
            "party_size": 4,
            "since": "2025-10-09T12:00:00.000Z",
            "reserved_for": "2025-10-09T19:00:00Z",
            "note": null
        }));
        let t = decode_table(&row).unwrap();
        assert_eq!(t.id, "T3");
        assert_eq!(t.status, TableStatus::Reserved);
        assert_eq!(t.name.as_deref(), Some("Müller"));
        assert_eq!(t.party_size, Some(4));
        assert_eq!(t.since, Some(NOON_UTC));
        assert_eq!(t.reserved_for, iso_to_ms("2025-10-09T19:00:00Z"));
        assert_eq!(t.note, None);
    }

    #[test]
    fn decode_accepts_epoch_millis() {
        let row = obj(json!({"id": "T1", "capacity": 2, "status": "SEATED", "since": NOON_UTC}));
        assert_eq!(decode_table(&row).unwrap().since, Some(NOON_UTC));
    }

    #[test]
    fn decode_fails_closed() {
        let missing_id = obj(json!({"capacity": 4, "status": "FREE"}));
        assert_eq!(decode_table(&missing_id), Err(DecodeError::MissingField("id")));

        let blank_id = obj(json!({"id": "  ", "capacity": 4, "status": "FREE"}));
        assert_eq!(decode_table(&blank_id), Err(DecodeError::MissingField("id")));

        let bad_status = obj(json!({"id": "T1", "capacity": 4, "status": "BUSY"}));
        assert!(matches!(
            decode_table(&bad_status),
            Err(DecodeError::InvalidField { field: "status", .. })
        ));

        let zero_capacity = obj(json!({"id": "T1", "capacity": 0, "status": "FREE"}));
        assert!(decode_table(&zero_capacity).is_err());

        let bad_since = obj(json!({"id": "T1", "capacity": 4, "status": "FREE", "since": "soon"}));
        assert!(matches!(
            decode_table(&bad_since),
            Err(DecodeError::InvalidField { field: "since", .. })
        ));
    }

    #[test]
    fn update_fields_write_explicit_nulls() {
        let t = Table::new("T1", 4);
        let row = table_update_fields(&t);
        for field in ["name", "party_size", "since", "reserved_for", "note"] {
            assert_eq!(row.get(field), Some(&Value::Null), "{field}");
        }
        assert_eq!(row.get("status"), Some(&json!("FREE")));
        assert!(!row.contains_key("id"));
    }

    #[test]
    fn table_encode_decode_preserves_instants() {
        let mut t = Table::new("T7", 6);
        t.status = TableStatus::Reserved;
        t.name = Some("Kaya".into());
        t.party_size = Some(5);
        t.since = Some(NOON_UTC + 123);
        t.reserved_for = Some(NOON_UTC + 3_600_000);
        let back = decode_table(&encode_table(&t)).unwrap();
        assert_eq!(back, t);
    }

    #[test]
    fn decode_reservation_rows() {
        let utc = Utc;
        let iso = obj(json!({"id": 42, "name": "Müller", "party_size": 4, "time": "2025-10-09T19:00:00Z"}));
        let r = decode_reservation(&iso, NOON_UTC, &utc).unwrap();
        assert_eq!(r.id, "42");
        assert_eq!(r.time, iso_to_ms("2025-10-09T19:00:00Z").unwrap());

        let hhmm = obj(json!({"id": "r1", "name": "Müller", "party_size": 4, "time": "19:00"}));
        assert_eq!(decode_reservation(&hhmm, NOON_UTC, &utc).unwrap().time, r.time);

        let no_name = obj(json!({"id": "r1", "party_size": 4, "time": "19:00"}));
        assert_eq!(
            decode_reservation(&no_name, NOON_UTC, &utc),
            Err(DecodeError::MissingField("name"))
        );

        let no_time = obj(json!({"id": "r1", "name": "A", "party_size": 2}));
        assert_eq!(
            decode_reservation(&no_time, NOON_UTC, &utc),
            Err(DecodeError::MissingField("time"))
        );
    }

    #[test]
    fn reservation_row_uses_iso_time() {
        let r = Reservation::new("r1", "Weber", 3, NOON_UTC);
        let row = encode_reservation(&r);
        assert_eq!(row.get("time"), Some(&json!("2025-10-09T12:00:00.000Z")));
        assert_eq!(decode_reservation(&row, NOON_UTC, &Utc).unwrap(), r);
    }

    #[test]
    fn time_of_day_survives_the_store() {
        let row = obj(json!({"id": "r1", "name": "Müller", "party_size": 4, "time": "19:00"}));
        let r = decode_reservation(&row, NOON_UTC, &Utc).unwrap();
        assert_eq!(r.time_of_day, NaiveTime::from_hms_opt(19, 0, 0));
        assert_eq!(encode_reservation(&r).get("time"), Some(&json!("19:00")));

        let next_day = NOON_UTC + 24 * 3_600_000;
        assert_eq!(planned_arrival(&r, NOON_UTC, &Utc), r.time);
        assert_eq!(planned_arrival(&r, next_day, &Utc), r.time + 24 * 3_600_000);

        let fixed = Reservation::new("r2", "Weber", 2, NOON_UTC);
        assert_eq!(planned_arrival(&fixed, next_day, &Utc), NOON_UTC);
    }

    #[test]
    fn key_only_rows() {
        assert_eq!(decode_key(&obj(json!({"id": "T9"}))).unwrap(), "T9");
        assert!(decode_key(&obj(json!({"name": "x"}))).is_err());
    }
}
