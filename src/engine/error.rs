use ulid::Ulid;

use crate::model::{ConflictType, ReservationStatus, WaitlistStatus};

/// Failures reported by a storage collaborator.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StoreError {
    NotFound(Ulid),
    Duplicate(Ulid),
    /// The backend could not complete the call; retrying may succeed.
    Unavailable(String),
}

impl StoreError {
    pub fn is_transient(&self) -> bool {
        matches!(self, StoreError::Unavailable(_))
    }
}

impl std::fmt::Display for StoreError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            StoreError::NotFound(id) => write!(f, "record not found: {id}"),
            StoreError::Duplicate(id) => write!(f, "duplicate record: {id}"),
            StoreError::Unavailable(e) => write!(f, "storage unavailable: {e}"),
        }
    }
}

impl std::error::Error for StoreError {}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SchedError {
    InvalidPattern(&'static str),
    InvalidWindow(&'static str),
    /// A request whose fields contradict each other.
    InvalidRequest(&'static str),
    /// The requested window is (still) taken. Recoverable: re-resolve or waitlist.
    StillConflicting {
        conflict_type: ConflictType,
        competing: Vec<Ulid>,
    },
    ConflictAlreadyResolved(Ulid),
    InvalidWaitlistTransition {
        entry_id: Ulid,
        status: WaitlistStatus,
    },
    InvalidReservationState {
        id: Ulid,
        status: ReservationStatus,
    },
    ResourceNotFound(Ulid),
    /// Unknown reservation, conflict, series, or waitlist entry.
    NotFound(Ulid),
    NoAvailableCandidate,
    SeriesAborted(String),
    /// A storage write failed twice in a row.
    InstanceCommitFailed(String),
    Storage(StoreError),
}

impl std::fmt::Display for SchedError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SchedError::InvalidPattern(msg) => write!(f, "invalid recurrence pattern: {msg}"),
            SchedError::InvalidWindow(msg) => write!(f, "invalid time window: {msg}"),
            SchedError::InvalidRequest(msg) => write!(f, "invalid request: {msg}"),
            SchedError::StillConflicting {
                conflict_type,
                competing,
            } => write!(
                f,
                "window still conflicting ({}) with {:?}",
                conflict_type.as_str(),
                competing
            ),
            SchedError::ConflictAlreadyResolved(id) => {
                write!(f, "conflict {id} is already resolved")
            }
            SchedError::InvalidWaitlistTransition { entry_id, status } => {
                write!(f, "waitlist entry {entry_id} cannot respond from {status:?}")
            }
            SchedError::InvalidReservationState { id, status } => {
                write!(f, "reservation {id} is {status:?}")
            }
            SchedError::ResourceNotFound(id) => write!(f, "resource not found: {id}"),
            SchedError::NotFound(id) => write!(f, "not found: {id}"),
            SchedError::NoAvailableCandidate => {
                write!(f, "no candidate resource meets the capacity floor")
            }
            SchedError::SeriesAborted(reason) => write!(f, "series aborted: {reason}"),
            SchedError::InstanceCommitFailed(reason) => {
                write!(f, "instance commit failed: {reason}")
            }
            SchedError::Storage(e) => write!(f, "storage error: {e}"),
        }
    }
}

impl std::error::Error for SchedError {}

impl From<StoreError> for SchedError {
    fn from(e: StoreError) -> Self {
        match e {
            StoreError::NotFound(id) => SchedError::NotFound(id),
            other => SchedError::Storage(other),
        }
    }
}
