//! Caller-facing data contracts. Field names are camelCase on the wire;
//! conversions into engine types validate everything a type cannot express.

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use ulid::Ulid;

use crate::engine::{FailedInstance, Resolution, SchedError, SeriesOutcome};
use crate::limits::DEFAULT_PAGE_LIMIT;
use crate::model::*;
use crate::recurrence::Expansion;

pub(crate) fn to_ms(t: DateTime<Utc>) -> Ms {
    t.timestamp_millis()
}

pub(crate) fn to_utc(ms: Ms) -> DateTime<Utc> {
    DateTime::from_timestamp_millis(ms).unwrap_or_default()
}

pub(crate) fn span_of(start: DateTime<Utc>, end: DateTime<Utc>) -> Result<Span, SchedError> {
    Span::checked(to_ms(start), to_ms(end)).ok_or(SchedError::InvalidWindow("start must be before end"))
}

/// Both ends or neither.
fn optional_span(
    start: Option<DateTime<Utc>>,
    end: Option<DateTime<Utc>>,
) -> Result<Option<Span>, SchedError> {
    match (start, end) {
        (Some(s), Some(e)) => span_of(s, e).map(Some),
        (None, None) => Ok(None),
        _ => Err(SchedError::InvalidRequest(
            "newStartTime and newEndTime must be given together",
        )),
    }
}

// ── Recurrence ───────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum FrequencyDto {
    Daily,
    Weekly,
    Monthly,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RecurrencePatternDto {
    pub frequency: FrequencyDto,
    pub interval: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub end_date: Option<NaiveDate>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub occurrences: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub days_of_week: Option<Vec<u8>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub month_day: Option<u32>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub exceptions: Vec<NaiveDate>,
}

impl TryFrom<RecurrencePatternDto> for RecurrencePattern {
    type Error = SchedError;

    fn try_from(dto: RecurrencePatternDto) -> Result<Self, SchedError> {
        let end = match (dto.end_date, dto.occurrences) {
            (Some(date), None) => RecurrenceEnd::Until(date),
            (None, Some(n)) => RecurrenceEnd::Count(n),
            (Some(_), Some(_)) => {
                return Err(SchedError::InvalidPattern(
                    "endDate and occurrences are mutually exclusive",
                ));
            }
            (None, None) => {
                return Err(SchedError::InvalidPattern("endDate or occurrences is required"));
            }
        };
        let frequency = match dto.frequency {
            FrequencyDto::Daily => Frequency::Daily,
            FrequencyDto::Weekly => Frequency::Weekly {
                days_of_week: dto
                    .days_of_week
                    .ok_or(SchedError::InvalidPattern("weekly pattern requires daysOfWeek"))?
                    .into_iter()
                    .collect(),
            },
            FrequencyDto::Monthly => Frequency::Monthly {
                month_day: dto
                    .month_day
                    .ok_or(SchedError::InvalidPattern("monthly pattern requires monthDay"))?,
            },
        };
        Ok(RecurrencePattern {
            frequency,
            interval: dto.interval,
            end,
            exceptions: dto.exceptions.into_iter().collect(),
        })
    }
}

impl From<&RecurrencePattern> for RecurrencePatternDto {
    fn from(p: &RecurrencePattern) -> Self {
        let (frequency, days_of_week, month_day) = match &p.frequency {
            Frequency::Daily => (FrequencyDto::Daily, None, None),
            Frequency::Weekly { days_of_week } => (
                FrequencyDto::Weekly,
                Some(days_of_week.iter().copied().collect()),
                None,
            ),
            Frequency::Monthly { month_day } => (FrequencyDto::Monthly, None, Some(*month_day)),
        };
        let (end_date, occurrences) = match p.end {
            RecurrenceEnd::Until(d) => (Some(d), None),
            RecurrenceEnd::Count(n) => (None, Some(n)),
        };
        Self {
            frequency,
            interval: p.interval,
            end_date,
            occurrences,
            days_of_week,
            month_day,
            exceptions: p.exceptions.iter().copied().collect(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct OccurrenceDto {
    pub start_date: DateTime<Utc>,
    pub end_date: DateTime<Utc>,
    pub instance_number: u32,
    pub is_exception: bool,
}

impl From<&Occurrence> for OccurrenceDto {
    fn from(o: &Occurrence) -> Self {
        Self {
            start_date: to_utc(o.span.start),
            end_date: to_utc(o.span.end),
            instance_number: o.instance_number,
            is_exception: o.is_exception,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PreviewRecurringReservationRequest {
    pub resource_id: Ulid,
    /// Start of the first occurrence.
    pub start_date: DateTime<Utc>,
    /// End of the first occurrence.
    pub end_date: DateTime<Utc>,
    pub recurrence_pattern: RecurrencePatternDto,
    #[serde(default)]
    pub page: Option<u32>,
    #[serde(default)]
    pub limit: Option<u32>,
}

impl PreviewRecurringReservationRequest {
    pub fn page(&self) -> u32 {
        self.page.unwrap_or(1)
    }

    pub fn limit(&self) -> u32 {
        self.limit.unwrap_or(DEFAULT_PAGE_LIMIT)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PreviewRecurringReservationResponse {
    pub occurrences: Vec<OccurrenceDto>,
    pub total_instances: u32,
    pub page: u32,
    pub limit: u32,
    pub has_more: bool,
    pub total_pages: u32,
    pub pattern: RecurrencePatternDto,
}

impl PreviewRecurringReservationResponse {
    pub fn new(expansion: Expansion, pattern: &RecurrencePattern) -> Self {
        Self {
            occurrences: expansion.occurrences.iter().map(OccurrenceDto::from).collect(),
            total_instances: expansion.total_instances,
            page: expansion.page,
            limit: expansion.limit,
            has_more: expansion.has_more,
            total_pages: expansion.total_pages,
            pattern: pattern.into(),
        }
    }
}

// ── Series creation ──────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateRecurringReservationRequest {
    pub resource_id: Ulid,
    pub start_date: DateTime<Utc>,
    pub end_date: DateTime<Utc>,
    pub purpose: String,
    pub recurrence_pattern: RecurrencePatternDto,
    #[serde(default)]
    pub participants: Vec<String>,
    #[serde(default)]
    pub notes: Option<String>,
    #[serde(default)]
    pub requester: Option<String>,
    /// Defaults to false: conflicting occurrences are skipped and reported.
    #[serde(default)]
    pub create_all_or_none: bool,
    /// Explicitly asks for partial creation. Contradicts `createAllOrNone`.
    #[serde(default)]
    pub skip_conflicts: Option<bool>,
    /// Book every occurrence as PENDING instead of CONFIRMED.
    #[serde(default)]
    pub pending: bool,
}

impl CreateRecurringReservationRequest {
    pub fn into_series_request(self) -> Result<crate::engine::SeriesRequest, SchedError> {
        if self.create_all_or_none && self.skip_conflicts == Some(true) {
            return Err(SchedError::InvalidRequest(
                "createAllOrNone and skipConflicts cannot both be set",
            ));
        }
        Ok(crate::engine::SeriesRequest {
            resource_id: self.resource_id,
            anchor: span_of(self.start_date, self.end_date)?,
            pattern: self.recurrence_pattern.try_into()?,
            purpose: Some(self.purpose),
            requester: self.requester,
            notes: self.notes,
            participants: self.participants,
            status: if self.pending {
                ReservationStatus::Pending
            } else {
                ReservationStatus::Confirmed
            },
            all_or_none: self.create_all_or_none,
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ReservationDto {
    pub id: Ulid,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub series_id: Option<Ulid>,
    pub resource_id: Ulid,
    pub start_time: DateTime<Utc>,
    pub end_time: DateTime<Utc>,
    pub status: ReservationStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub purpose: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub requester: Option<String>,
}

impl From<&ReservationInstance> for ReservationDto {
    fn from(r: &ReservationInstance) -> Self {
        Self {
            id: r.id,
            series_id: r.series_id,
            resource_id: r.resource_id,
            start_time: to_utc(r.span.start),
            end_time: to_utc(r.span.end),
            status: r.status,
            purpose: r.purpose.clone(),
            requester: r.requester.clone(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct FailedInstanceDto {
    /// Calendar date (UTC) of the occurrence.
    pub date: NaiveDate,
    pub instance_number: u32,
    pub start_date: DateTime<Utc>,
    pub end_date: DateTime<Utc>,
    pub reason: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub detail: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub conflicting_reservation_id: Option<Ulid>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub conflict_id: Option<Ulid>,
}

impl From<&FailedInstance> for FailedInstanceDto {
    fn from(f: &FailedInstance) -> Self {
        let start = to_utc(f.span.start);
        Self {
            date: start.date_naive(),
            instance_number: f.instance_number,
            start_date: start,
            end_date: to_utc(f.span.end),
            reason: f.reason.label().to_string(),
            detail: match &f.reason {
                crate::engine::FailureReason::CommitFailed(e) => Some(e.clone()),
                _ => None,
            },
            conflicting_reservation_id: f.conflicting_id,
            conflict_id: f.conflict_id,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateRecurringReservationResponse {
    pub series_id: Ulid,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub master_reservation_id: Option<Ulid>,
    pub instances: Vec<ReservationDto>,
    pub total_instances: u32,
    pub successful_instances: u32,
    pub failed_instances: Vec<FailedInstanceDto>,
    pub skipped_exceptions: Vec<OccurrenceDto>,
    pub pattern: RecurrencePatternDto,
    pub aborted: bool,
    pub cancelled: bool,
    pub execution_time_ms: u64,
}

impl From<&SeriesOutcome> for CreateRecurringReservationResponse {
    fn from(o: &SeriesOutcome) -> Self {
        Self {
            series_id: o.series_id,
            master_reservation_id: o.master_reservation_id,
            instances: o.instances.iter().map(ReservationDto::from).collect(),
            total_instances: o.total_instances,
            successful_instances: o.successful_instances(),
            failed_instances: o.failed_instances.iter().map(FailedInstanceDto::from).collect(),
            skipped_exceptions: o.exceptions.iter().map(OccurrenceDto::from).collect(),
            pattern: (&o.pattern).into(),
            aborted: o.aborted,
            cancelled: o.cancelled,
            execution_time_ms: o.execution_time_ms,
        }
    }
}

// ── Conflicts ────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ResolutionKind {
    Manual,
    AutoReassign,
    Waitlist,
    Cancel,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ResolveConflictRequest {
    pub conflict_id: Ulid,
    pub resolution: ResolutionKind,
    #[serde(default)]
    pub notes: Option<String>,
    #[serde(default)]
    pub new_resource_id: Option<Ulid>,
    #[serde(default)]
    pub new_start_time: Option<DateTime<Utc>>,
    #[serde(default)]
    pub new_end_time: Option<DateTime<Utc>>,
    /// AUTO_REASSIGN: take the best available substitute.
    #[serde(default)]
    pub auto_pick: bool,
    /// WAITLIST: queue priority, NORMAL when absent.
    #[serde(default)]
    pub priority: Option<Priority>,
}

impl TryFrom<ResolveConflictRequest> for Resolution {
    type Error = SchedError;

    fn try_from(req: ResolveConflictRequest) -> Result<Self, SchedError> {
        let span = optional_span(req.new_start_time, req.new_end_time)?;
        Ok(match req.resolution {
            ResolutionKind::Manual => Resolution::Manual {
                resource_id: req.new_resource_id,
                span,
            },
            ResolutionKind::AutoReassign => Resolution::AutoReassign {
                auto_pick: req.auto_pick,
                resource_id: req.new_resource_id,
            },
            ResolutionKind::Waitlist => Resolution::Waitlist {
                priority: req.priority.unwrap_or(Priority::Normal),
            },
            ResolutionKind::Cancel => Resolution::Cancel,
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ConflictDto {
    pub id: Ulid,
    pub resource_id: Ulid,
    pub start_time: DateTime<Utc>,
    pub end_time: DateTime<Utc>,
    #[serde(rename = "type")]
    pub conflict_type: ConflictType,
    pub severity: Severity,
    pub competing_instance_ids: Vec<Ulid>,
    pub resolution: ResolutionState,
    pub detected_at: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub resolved_at: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub notes: Option<String>,
}

impl From<&Conflict> for ConflictDto {
    fn from(c: &Conflict) -> Self {
        Self {
            id: c.id,
            resource_id: c.resource_id,
            start_time: to_utc(c.span.start),
            end_time: to_utc(c.span.end),
            conflict_type: c.conflict_type,
            severity: c.severity,
            competing_instance_ids: c.competing.iter().copied().collect(),
            resolution: c.resolution,
            detected_at: to_utc(c.detected_at),
            resolved_at: c.resolved_at.map(to_utc),
            notes: c.notes.clone(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ReassignmentSuggestionDto {
    pub resource_id: Ulid,
    pub match_score: f64,
    pub capacity_score: f64,
    pub feature_score: f64,
    pub location_score: f64,
    pub available: bool,
}

impl From<&ReassignmentSuggestion> for ReassignmentSuggestionDto {
    fn from(s: &ReassignmentSuggestion) -> Self {
        Self {
            resource_id: s.resource_id,
            match_score: s.match_score,
            capacity_score: s.breakdown.capacity,
            feature_score: s.breakdown.features,
            location_score: s.breakdown.location,
            available: s.available,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ResolveConflictResponse {
    pub conflict: ConflictDto,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reservation: Option<ReservationDto>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub waitlist_entry: Option<WaitlistEntryDto>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub suggestions: Vec<ReassignmentSuggestionDto>,
}

// ── Reassignment ─────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RequestReassignmentRequest {
    pub reservation_id: Ulid,
    pub new_resource_id: Ulid,
    pub reason: String,
    #[serde(default)]
    pub reason_details: Option<String>,
    #[serde(default)]
    pub notify_user: bool,
    #[serde(default)]
    pub new_start_time: Option<DateTime<Utc>>,
    #[serde(default)]
    pub new_end_time: Option<DateTime<Utc>>,
}

impl RequestReassignmentRequest {
    pub fn new_span(&self) -> Result<Option<Span>, SchedError> {
        optional_span(self.new_start_time, self.new_end_time)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ReassignmentResponse {
    pub original: ReservationDto,
    pub replacement: ReservationDto,
    pub reason: String,
    pub notify_user: bool,
}

// ── Waitlist ─────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct JoinWaitlistRequest {
    pub resource_id: Ulid,
    pub desired_start: DateTime<Utc>,
    pub desired_end: DateTime<Utc>,
    #[serde(default)]
    pub priority: Option<Priority>,
    #[serde(default)]
    pub purpose: Option<String>,
    #[serde(default)]
    pub requester: Option<String>,
}

impl TryFrom<JoinWaitlistRequest> for crate::engine::WaitlistRequest {
    type Error = SchedError;

    fn try_from(req: JoinWaitlistRequest) -> Result<Self, SchedError> {
        Ok(Self {
            resource_id: req.resource_id,
            desired: span_of(req.desired_start, req.desired_end)?,
            priority: req.priority.unwrap_or(Priority::Normal),
            requester: req.requester,
            purpose: req.purpose,
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NotifyWaitlistRequest {
    pub resource_id: Ulid,
    pub available_from: DateTime<Utc>,
    pub available_until: DateTime<Utc>,
    #[serde(default)]
    pub notify_top: Option<usize>,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RespondWaitlistRequest {
    pub entry_id: Ulid,
    pub accepted: bool,
    #[serde(default)]
    pub new_resource_id: Option<Ulid>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct WaitlistEntryDto {
    pub id: Ulid,
    pub resource_id: Ulid,
    pub desired_start: DateTime<Utc>,
    pub desired_end: DateTime<Utc>,
    pub priority: Priority,
    pub status: WaitlistStatus,
    pub requested_at: DateTime<Utc>,
    /// Only set while the entry is WAITING.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub position: Option<usize>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub notified_at: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub offer_expires_at: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reservation_id: Option<Ulid>,
}

impl WaitlistEntryDto {
    pub fn new(e: &WaitlistEntry, position: Option<usize>) -> Self {
        Self {
            id: e.id,
            resource_id: e.resource_id,
            desired_start: to_utc(e.desired.start),
            desired_end: to_utc(e.desired.end),
            priority: e.priority,
            status: e.status,
            requested_at: to_utc(e.requested_at),
            position,
            notified_at: e.notified_at.map(to_utc),
            offer_expires_at: e.offer_expires_at.map(to_utc),
            reservation_id: e.reservation_id,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RespondWaitlistResponse {
    pub entry: WaitlistEntryDto,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reservation: Option<ReservationDto>,
    /// Entries offered the slot after a decline.
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub notified: Vec<WaitlistEntryDto>,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn weekly_json() -> &'static str {
        r#"{"frequency":"WEEKLY","interval":1,"occurrences":4,"daysOfWeek":[1,3]}"#
    }

    #[test]
    fn weekly_pattern_from_json() {
        let dto: RecurrencePatternDto = serde_json::from_str(weekly_json()).unwrap();
        let pattern = RecurrencePattern::try_from(dto.clone()).unwrap();
        assert_eq!(pattern.end, RecurrenceEnd::Count(4));
        assert_eq!(
            pattern.frequency,
            Frequency::Weekly {
                days_of_week: [1, 3].into_iter().collect()
            }
        );
        assert_eq!(RecurrencePatternDto::from(&pattern), dto);
    }

    #[test]
    fn pattern_needs_exactly_one_end() {
        let both: RecurrencePatternDto = serde_json::from_str(
            r#"{"frequency":"DAILY","interval":1,"occurrences":4,"endDate":"2026-03-01"}"#,
        )
        .unwrap();
        assert!(matches!(
            RecurrencePattern::try_from(both),
            Err(SchedError::InvalidPattern(_))
        ));
        let neither: RecurrencePatternDto =
            serde_json::from_str(r#"{"frequency":"DAILY","interval":1}"#).unwrap();
        assert!(matches!(
            RecurrencePattern::try_from(neither),
            Err(SchedError::InvalidPattern(_))
        ));
    }

    #[test]
    fn monthly_requires_month_day() {
        let dto: RecurrencePatternDto =
            serde_json::from_str(r#"{"frequency":"MONTHLY","interval":1,"occurrences":3}"#).unwrap();
        assert!(matches!(
            RecurrencePattern::try_from(dto),
            Err(SchedError::InvalidPattern(_))
        ));
    }

    fn create_json(extra: &str) -> String {
        format!(
            r#"{{"resourceId":"{}","startDate":"2025-01-06T09:00:00Z","endDate":"2025-01-06T10:00:00Z",
                "purpose":"Algebra","recurrencePattern":{}{}}}"#,
            Ulid::new(),
            weekly_json(),
            extra
        )
    }

    #[test]
    fn create_request_defaults_to_partial() {
        let req: CreateRecurringReservationRequest = serde_json::from_str(&create_json("")).unwrap();
        let series = req.into_series_request().unwrap();
        assert!(!series.all_or_none);
        assert_eq!(series.status, ReservationStatus::Confirmed);
        assert_eq!(series.anchor.duration_ms(), HOUR_MS);
        assert_eq!(series.purpose.as_deref(), Some("Algebra"));
    }

    #[test]
    fn create_request_carries_notes_and_participants() {
        let req: CreateRecurringReservationRequest = serde_json::from_str(&create_json(
            r#","notes":"room key at desk","participants":["ana","li"]"#,
        ))
        .unwrap();
        let series = req.into_series_request().unwrap();
        assert_eq!(series.notes.as_deref(), Some("room key at desk"));
        assert_eq!(series.participants, vec!["ana".to_string(), "li".to_string()]);
    }

    #[test]
    fn all_or_none_with_skip_conflicts_rejected() {
        let req: CreateRecurringReservationRequest =
            serde_json::from_str(&create_json(r#","createAllOrNone":true,"skipConflicts":true"#)).unwrap();
        assert!(matches!(
            req.into_series_request(),
            Err(SchedError::InvalidRequest(_))
        ));

        let req: CreateRecurringReservationRequest =
            serde_json::from_str(&create_json(r#","createAllOrNone":true,"skipConflicts":false"#)).unwrap();
        assert!(req.into_series_request().unwrap().all_or_none);
    }

    #[test]
    fn resolve_request_conversion() {
        let id = Ulid::new();
        let req: ResolveConflictRequest = serde_json::from_str(&format!(
            r#"{{"conflictId":"{id}","resolution":"MANUAL",
                "newStartTime":"2026-02-01T10:00:00Z","newEndTime":"2026-02-01T11:00:00Z"}}"#
        ))
        .unwrap();
        let Resolution::Manual { resource_id, span } = Resolution::try_from(req).unwrap() else {
            panic!("expected manual");
        };
        assert_eq!(resource_id, None);
        assert_eq!(span.unwrap().duration_ms(), HOUR_MS);

        let half: ResolveConflictRequest = serde_json::from_str(&format!(
            r#"{{"conflictId":"{id}","resolution":"MANUAL","newStartTime":"2026-02-01T10:00:00Z"}}"#
        ))
        .unwrap();
        assert!(matches!(
            Resolution::try_from(half),
            Err(SchedError::InvalidRequest(_))
        ));

        let wl: ResolveConflictRequest = serde_json::from_str(&format!(
            r#"{{"conflictId":"{id}","resolution":"WAITLIST","priority":"URGENT"}}"#
        ))
        .unwrap();
        assert_eq!(
            Resolution::try_from(wl).unwrap(),
            Resolution::Waitlist {
                priority: Priority::Urgent
            }
        );
    }

    #[test]
    fn failed_instance_wire_shape() {
        let conflicting = Ulid::new();
        let start = 1_736_154_000_000; // 2025-01-06T09:00:00Z
        let dto = FailedInstanceDto::from(&FailedInstance {
            instance_number: 3,
            span: Span::new(start, start + HOUR_MS),
            reason: crate::engine::FailureReason::Conflict(ConflictType::DoubleBooking),
            conflicting_id: Some(conflicting),
            conflict_id: None,
        });
        let json = serde_json::to_value(&dto).unwrap();
        assert_eq!(json["date"], "2025-01-06");
        assert_eq!(json["reason"], "DOUBLE_BOOKING");
        assert_eq!(json["conflictingReservationId"], conflicting.to_string());
        assert!(json.get("conflictId").is_none());
    }
}
