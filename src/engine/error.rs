use ulid::Ulid;

use crate::model::UnavailableReason;

#[derive(Debug)]
pub enum EngineError {
    NotFound(Ulid),
    AlreadyExists(Ulid),
    /// The requested instant is not bookable; detected before writing.
    Conflict(UnavailableReason),
    /// The Checker said yes but the uniqueness index said no: someone else
    /// took the instant in between.
    StorageRace { existing: Ulid },
    InvalidInput(String),
    HasFutureAppointments(Ulid),
    LimitExceeded(&'static str),
    WalError(String),
}

impl EngineError {
    /// Conflict and StorageRace are the same outcome to a caller: pick
    /// another instant.
    pub fn is_conflict(&self) -> bool {
        matches!(self, EngineError::Conflict(_) | EngineError::StorageRace { .. })
    }
}

impl std::fmt::Display for EngineError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            EngineError::NotFound(id) => write!(f, "not found: {id}"),
            EngineError::AlreadyExists(id) => write!(f, "already exists: {id}"),
            EngineError::Conflict(reason) => write!(f, "conflict: {reason}"),
            EngineError::StorageRace { existing } => {
                write!(f, "conflict: slot already booked (taken concurrently by {existing})")
            }
            EngineError::InvalidInput(msg) => write!(f, "invalid input: {msg}"),
            EngineError::HasFutureAppointments(id) => {
                write!(f, "cannot delete salesperson {id}: has future appointments")
            }
            EngineError::LimitExceeded(msg) => write!(f, "limit exceeded: {msg}"),
            EngineError::WalError(e) => write!(f, "WAL error: {e}"),
        }
    }
}

impl std::error::Error for EngineError {}
