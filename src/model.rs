use std::collections::BTreeSet;

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use ulid::Ulid;

/// Unix milliseconds, the only time type.
pub type Ms = i64;

pub const MINUTE_MS: Ms = 60_000;
pub const HOUR_MS: Ms = 60 * MINUTE_MS;
pub const DAY_MS: Ms = 24 * HOUR_MS;

/// Half-open interval `[start, end)`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Span {
    pub start: Ms,
    pub end: Ms,
}

impl Span {
    pub fn new(start: Ms, end: Ms) -> Self {
        debug_assert!(start < end, "Span start must be before end");
        Self { start, end }
    }

    /// Like `new`, but returns `None` for empty or inverted windows.
    pub fn checked(start: Ms, end: Ms) -> Option<Self> {
        (start < end).then_some(Self { start, end })
    }

    pub fn duration_ms(&self) -> Ms {
        self.end - self.start
    }

    /// Touching endpoints do not overlap.
    pub fn overlaps(&self, other: &Span) -> bool {
        self.start < other.end && other.start < self.end
    }

    pub fn contains_instant(&self, t: Ms) -> bool {
        self.start <= t && t < self.end
    }

    /// Returns true if `self` fully contains `other`.
    pub fn contains_span(&self, other: &Span) -> bool {
        self.start <= other.start && other.end <= self.end
    }
}

// ── Recurrence ───────────────────────────────────────────────────

/// How a series repeats. Weekday numbers run 0 (Sunday) to 6 (Saturday).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Frequency {
    Daily,
    Weekly { days_of_week: BTreeSet<u8> },
    Monthly { month_day: u32 },
}

impl Frequency {
    pub fn label(&self) -> &'static str {
        match self {
            Frequency::Daily => "DAILY",
            Frequency::Weekly { .. } => "WEEKLY",
            Frequency::Monthly { .. } => "MONTHLY",
        }
    }
}

/// Exactly one termination condition per pattern.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum RecurrenceEnd {
    /// Last calendar date (UTC) an occurrence may start on.
    Until(NaiveDate),
    Count(u32),
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RecurrencePattern {
    pub frequency: Frequency,
    /// Repeat every `interval` days/weeks/months.
    pub interval: u32,
    pub end: RecurrenceEnd,
    /// Dates whose occurrences are emitted as exceptions and never booked.
    #[serde(default)]
    pub exceptions: BTreeSet<NaiveDate>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Occurrence {
    /// 1-based position in the series.
    pub instance_number: u32,
    pub span: Span,
    pub is_exception: bool,
}

// ── Resources & blocks ───────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Location {
    pub building: String,
    pub campus: String,
}

impl Location {
    pub fn new(building: impl Into<String>, campus: impl Into<String>) -> Self {
        Self {
            building: building.into(),
            campus: campus.into(),
        }
    }
}

/// The attributes reassignment scoring compares.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResourceProfile {
    pub id: Ulid,
    pub name: Option<String>,
    pub capacity: u32,
    pub features: BTreeSet<String>,
    pub location: Location,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum BlockKind {
    Maintenance,
    Institutional,
}

/// A window during which a resource cannot be booked at all.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Block {
    pub id: Ulid,
    pub resource_id: Ulid,
    pub span: Span,
    pub kind: BlockKind,
    pub reason: Option<String>,
}

// ── Reservations ─────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ReservationStatus {
    Pending,
    Confirmed,
    Cancelled,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReservationInstance {
    pub id: Ulid,
    /// `None` for standalone bookings and detached series exceptions.
    pub series_id: Option<Ulid>,
    pub resource_id: Ulid,
    pub span: Span,
    pub status: ReservationStatus,
    pub purpose: Option<String>,
    pub requester: Option<String>,
}

impl ReservationInstance {
    /// Cancelled instances never block anything.
    pub fn is_active(&self) -> bool {
        self.status != ReservationStatus::Cancelled
    }
}

/// What a caller wants booked. Conflicts and waitlist entries keep a copy so
/// the request can be replayed once the conflict is resolved.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BookingRequest {
    pub resource_id: Ulid,
    pub span: Span,
    pub purpose: Option<String>,
    pub requester: Option<String>,
    pub series_id: Option<Ulid>,
    /// Status the instance is committed with (`Pending` leaves it to approval).
    pub status: ReservationStatus,
}

impl BookingRequest {
    pub fn new(resource_id: Ulid, span: Span) -> Self {
        Self {
            resource_id,
            span,
            purpose: None,
            requester: None,
            series_id: None,
            status: ReservationStatus::Confirmed,
        }
    }

    pub fn pending(mut self) -> Self {
        self.status = ReservationStatus::Pending;
        self
    }

    pub fn with_purpose(mut self, purpose: impl Into<String>) -> Self {
        self.purpose = Some(purpose.into());
        self
    }

    pub fn with_requester(mut self, requester: impl Into<String>) -> Self {
        self.requester = Some(requester.into());
        self
    }

    pub fn into_instance(self, id: Ulid) -> ReservationInstance {
        ReservationInstance {
            id,
            series_id: self.series_id,
            resource_id: self.resource_id,
            span: self.span,
            status: self.status,
            purpose: self.purpose,
            requester: self.requester,
        }
    }
}

// ── Conflicts ────────────────────────────────────────────────────

/// Declared from softest to hardest; `Ord` follows classification precedence.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ConflictType {
    /// Against a pending (unconfirmed) reservation.
    Overlap,
    DoubleBooking,
    Maintenance,
    Institutional,
}

impl ConflictType {
    pub fn as_str(&self) -> &'static str {
        match self {
            ConflictType::Overlap => "OVERLAP",
            ConflictType::DoubleBooking => "DOUBLE_BOOKING",
            ConflictType::Maintenance => "MAINTENANCE",
            ConflictType::Institutional => "INSTITUTIONAL",
        }
    }

    pub fn severity(&self) -> Severity {
        match self {
            ConflictType::Overlap => Severity::Low,
            ConflictType::Maintenance => Severity::Medium,
            ConflictType::DoubleBooking | ConflictType::Institutional => Severity::High,
        }
    }
}

impl From<BlockKind> for ConflictType {
    fn from(kind: BlockKind) -> Self {
        match kind {
            BlockKind::Maintenance => ConflictType::Maintenance,
            BlockKind::Institutional => ConflictType::Institutional,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Severity {
    Low,
    Medium,
    High,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ResolutionState {
    Pending,
    AutoResolved,
    ManualResolved,
    Cancelled,
}

impl ResolutionState {
    pub fn is_terminal(&self) -> bool {
        !matches!(self, ResolutionState::Pending)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            ResolutionState::Pending => "PENDING",
            ResolutionState::AutoResolved => "AUTO_RESOLVED",
            ResolutionState::ManualResolved => "MANUAL_RESOLVED",
            ResolutionState::Cancelled => "CANCELLED",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Conflict {
    pub id: Ulid,
    pub resource_id: Ulid,
    pub span: Span,
    pub conflict_type: ConflictType,
    pub severity: Severity,
    pub competing: BTreeSet<Ulid>,
    pub resolution: ResolutionState,
    /// The request that could not be satisfied.
    pub request: BookingRequest,
    pub detected_at: Ms,
    pub resolved_at: Option<Ms>,
    pub notes: Option<String>,
}

// ── Reassignment ─────────────────────────────────────────────────

/// Sub-scores in `0..=100`.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ScoreBreakdown {
    pub capacity: f64,
    pub features: f64,
    pub location: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReassignmentSuggestion {
    pub resource_id: Ulid,
    pub match_score: f64,
    pub breakdown: ScoreBreakdown,
    pub available: bool,
}

// ── Waitlist ─────────────────────────────────────────────────────

/// Declared lowest first so the derived `Ord` ranks URGENT highest.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Priority {
    Low,
    Normal,
    High,
    Urgent,
}

impl Priority {
    pub fn rank(&self) -> u8 {
        match self {
            Priority::Low => 0,
            Priority::Normal => 1,
            Priority::High => 2,
            Priority::Urgent => 3,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum WaitlistStatus {
    Waiting,
    Notified,
    Accepted,
    Expired,
    Cancelled,
}

impl WaitlistStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            WaitlistStatus::Accepted | WaitlistStatus::Expired | WaitlistStatus::Cancelled
        )
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WaitlistEntry {
    pub id: Ulid,
    pub resource_id: Ulid,
    pub desired: Span,
    pub priority: Priority,
    pub requested_at: Ms,
    pub status: WaitlistStatus,
    pub requester: Option<String>,
    pub purpose: Option<String>,
    pub notified_at: Option<Ms>,
    /// Deadline of the outstanding offer.
    pub offer_expires_at: Option<Ms>,
    /// Reservation created when the offer was accepted.
    pub reservation_id: Option<Ulid>,
}

// ── Events ───────────────────────────────────────────────────────

/// Everything the engine announces to listeners, keyed by resource.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Event {
    ReservationCommitted {
        id: Ulid,
        resource_id: Ulid,
        span: Span,
        status: ReservationStatus,
    },
    ReservationCancelled {
        id: Ulid,
        resource_id: Ulid,
        span: Span,
    },
    ConflictDetected {
        id: Ulid,
        resource_id: Ulid,
        conflict_type: ConflictType,
    },
    ConflictResolved {
        id: Ulid,
        resource_id: Ulid,
        resolution: ResolutionState,
    },
    WaitlistOffered {
        entry_id: Ulid,
        resource_id: Ulid,
        span: Span,
        expires_at: Ms,
    },
    WaitlistExpired {
        entry_id: Ulid,
        resource_id: Ulid,
    },
}

impl Event {
    pub fn resource_id(&self) -> Ulid {
        match self {
            Event::ReservationCommitted { resource_id, .. }
            | Event::ReservationCancelled { resource_id, .. }
            | Event::ConflictDetected { resource_id, .. }
            | Event::ConflictResolved { resource_id, .. }
            | Event::WaitlistOffered { resource_id, .. }
            | Event::WaitlistExpired { resource_id, .. } => *resource_id,
        }
    }
}
