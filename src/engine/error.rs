use serde::Serialize;

use crate::store::StoreError;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EngineError {
    NotFound(String),
    LimitExceeded(&'static str),
    /// The store rejected the write, or it never completed. Local state was
    /// rolled back.
    RemoteWrite(StoreError),
    /// The table was reserved remotely but the reservation could not be
    /// removed from the book, and restoring the table failed too.
    PartialAssignment {
        reservation_id: String,
        table_id: String,
        error: StoreError,
    },
    ShutDown,
}

impl std::fmt::Display for EngineError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            EngineError::NotFound(id) => write!(f, "not found: {id}"),
            EngineError::LimitExceeded(msg) => write!(f, "limit exceeded: {msg}"),
            EngineError::RemoteWrite(e) => write!(f, "remote write failed: {e}"),
            EngineError::PartialAssignment {
                reservation_id,
                table_id,
                error,
            } => write!(
                f,
                "reservation {reservation_id} assigned to table {table_id} but not removed from the book: {error}"
            ),
            EngineError::ShutDown => write!(f, "engine shut down"),
        }
    }
}

impl std::error::Error for EngineError {}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum NoticeKind {
    /// The store refused a write; the change was undone.
    SaveFailed,
    /// A write never completed; the change was undone.
    NetworkFailure,
    /// Table and book disagree; staff must fix it by hand.
    PartialAssignment,
}

/// A user-visible failure message.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Notice {
    pub kind: NoticeKind,
    /// Id of the table or reservation the failed change was about.
    pub subject: String,
    pub message: String,
}

impl Notice {
    pub(crate) fn for_store_error(subject: &str, error: &StoreError) -> Self {
        if error.is_network() {
            Self {
                kind: NoticeKind::NetworkFailure,
                subject: subject.to_string(),
                message: "Netzwerkproblem – Änderung wurde zurückgesetzt.".into(),
            }
        } else {
            Self {
                kind: NoticeKind::SaveFailed,
                subject: subject.to_string(),
                message: "Konnte Status nicht speichern. Bitte erneut versuchen.".into(),
            }
        }
    }

    pub(crate) fn partial_assignment(reservation_id: &str, table_id: &str) -> Self {
        Self {
            kind: NoticeKind::PartialAssignment,
            subject: table_id.to_string(),
            message: format!(
                "Tisch {table_id} reserviert, aber Reservierung {reservation_id} steht noch im Buch. Bitte manuell prüfen."
            ),
        }
    }
}
