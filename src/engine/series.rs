use std::sync::Arc;
use std::time::Instant;

use dashmap::DashMap;
use futures::StreamExt;
use serde::Serialize;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};
use ulid::Ulid;

use crate::model::*;
use crate::recurrence::{self, Expansion};

use super::availability::{Verdict, validate_span};
use super::ledger::Ledger;
use super::resolution::ConflictResolutionEngine;
use super::SchedError;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SeriesRequest {
    pub resource_id: Ulid,
    /// Window of the first occurrence; every occurrence keeps its time of
    /// day and duration.
    pub anchor: Span,
    pub pattern: RecurrencePattern,
    pub purpose: Option<String>,
    pub requester: Option<String>,
    /// Free text kept on the series and on conflicts raised for it.
    pub notes: Option<String>,
    pub participants: Vec<String>,
    pub status: ReservationStatus,
    pub all_or_none: bool,
}

impl SeriesRequest {
    pub fn new(resource_id: Ulid, anchor: Span, pattern: RecurrencePattern) -> Self {
        Self {
            resource_id,
            anchor,
            pattern,
            purpose: None,
            requester: None,
            notes: None,
            participants: Vec::new(),
            status: ReservationStatus::Confirmed,
            all_or_none: false,
        }
    }

    pub fn all_or_none(mut self) -> Self {
        self.all_or_none = true;
        self
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub enum FailureReason {
    Conflict(ConflictType),
    CommitFailed(String),
    /// Creation was cancelled before this occurrence was attempted.
    Cancelled,
}

impl FailureReason {
    pub fn label(&self) -> &str {
        match self {
            FailureReason::Conflict(t) => t.as_str(),
            FailureReason::CommitFailed(_) => "COMMIT_FAILED",
            FailureReason::Cancelled => "CANCELLED",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FailedInstance {
    pub instance_number: u32,
    pub span: Span,
    pub reason: FailureReason,
    /// Primary competing reservation or block.
    pub conflicting_id: Option<Ulid>,
    /// Conflict registered with the resolver (partial mode only).
    pub conflict_id: Option<Ulid>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SeriesOutcome {
    pub series_id: Ulid,
    pub master_reservation_id: Option<Ulid>,
    pub instances: Vec<ReservationInstance>,
    /// Occurrences the pattern expanded to, exceptions included.
    pub total_instances: u32,
    pub failed_instances: Vec<FailedInstance>,
    /// Occurrences on exception dates, never booked.
    pub exceptions: Vec<Occurrence>,
    pub pattern: RecurrencePattern,
    /// All-or-none creation refused because of conflicts.
    pub aborted: bool,
    pub cancelled: bool,
    pub execution_time_ms: u64,
}

impl SeriesOutcome {
    pub fn successful_instances(&self) -> u32 {
        self.instances.len() as u32
    }
}

/// A created series and the instances it still owns.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Series {
    pub id: Ulid,
    pub resource_id: Ulid,
    pub anchor: Span,
    pub pattern: RecurrencePattern,
    pub purpose: Option<String>,
    pub requester: Option<String>,
    pub notes: Option<String>,
    pub participants: Vec<String>,
    pub master_reservation_id: Option<Ulid>,
    pub instance_ids: Vec<Ulid>,
    pub cancelled: bool,
}

/// Turns a recurrence pattern into committed reservation instances.
///
/// All-or-none runs two phases under the resource lock: check every
/// occurrence (reporting every conflict at once), then commit in instance
/// order and roll everything back if a write fails or the caller cancels.
/// Partial mode commits each occurrence as its own transaction, a few at a
/// time, and hands conflicting ones to the resolver.
pub struct SeriesOrchestrator {
    ledger: Arc<Ledger>,
    resolver: Arc<ConflictResolutionEngine>,
    series: DashMap<Ulid, Series>,
    concurrency: usize,
}

impl SeriesOrchestrator {
    pub fn new(
        ledger: Arc<Ledger>,
        resolver: Arc<ConflictResolutionEngine>,
        concurrency: usize,
    ) -> Self {
        Self {
            ledger,
            resolver,
            series: DashMap::new(),
            concurrency: concurrency.max(1),
        }
    }

    /// One page of the occurrences `create_series` would attempt.
    pub async fn preview(
        &self,
        resource_id: Ulid,
        anchor: Span,
        pattern: &RecurrencePattern,
        page: u32,
        limit: u32,
    ) -> Result<Expansion, SchedError> {
        let expansion = recurrence::expand(pattern, anchor, page, limit)?;
        self.ledger.checker().resource(resource_id).await?;
        Ok(expansion)
    }

    pub fn series(&self, id: Ulid) -> Option<Series> {
        self.series.get(&id).map(|s| s.value().clone())
    }

    pub async fn create_series(
        &self,
        request: SeriesRequest,
        cancel: &CancellationToken,
    ) -> Result<SeriesOutcome, SchedError> {
        let started = Instant::now();
        recurrence::validate_pattern(&request.pattern)?;
        validate_span(&request.anchor)?;
        if request.status == ReservationStatus::Cancelled {
            return Err(SchedError::InvalidRequest("series cannot be created cancelled"));
        }
        self.ledger.checker().resource(request.resource_id).await?;

        let all: Vec<Occurrence> = recurrence::occurrences(&request.pattern, request.anchor).collect();
        if all.is_empty() {
            return Err(SchedError::InvalidPattern("pattern produces no occurrences"));
        }
        if all.windows(2).any(|w| w[0].span.overlaps(&w[1].span)) {
            return Err(SchedError::InvalidPattern("occurrences overlap each other"));
        }
        let (exceptions, bookable): (Vec<Occurrence>, Vec<Occurrence>) =
            all.iter().copied().partition(|o| o.is_exception);

        let series_id = Ulid::new();
        let mut outcome = SeriesOutcome {
            series_id,
            master_reservation_id: None,
            instances: Vec::new(),
            total_instances: all.len() as u32,
            failed_instances: Vec::new(),
            exceptions,
            pattern: request.pattern.clone(),
            aborted: false,
            cancelled: false,
            execution_time_ms: 0,
        };

        let mode = if request.all_or_none {
            self.commit_all_or_none(&request, series_id, &bookable, cancel, &mut outcome)
                .await?;
            "all_or_none"
        } else {
            self.commit_each(&request, series_id, &bookable, cancel, &mut outcome)
                .await;
            "partial"
        };

        outcome.master_reservation_id = outcome.instances.first().map(|r| r.id);
        if !outcome.instances.is_empty() {
            self.series.insert(
                series_id,
                Series {
                    id: series_id,
                    resource_id: request.resource_id,
                    anchor: request.anchor,
                    pattern: request.pattern,
                    purpose: request.purpose,
                    requester: request.requester,
                    notes: request.notes,
                    participants: request.participants,
                    master_reservation_id: outcome.master_reservation_id,
                    instance_ids: outcome.instances.iter().map(|r| r.id).collect(),
                    cancelled: false,
                },
            );
        }

        let elapsed = started.elapsed();
        outcome.execution_time_ms = elapsed.as_millis() as u64;
        metrics::histogram!(crate::observability::SERIES_DURATION_SECONDS, "mode" => mode)
            .record(elapsed.as_secs_f64());
        info!(
            %series_id,
            resource_id = %request.resource_id,
            mode,
            created = outcome.instances.len(),
            failed = outcome.failed_instances.len(),
            aborted = outcome.aborted,
            "series processed"
        );
        Ok(outcome)
    }

    fn request_for(request: &SeriesRequest, series_id: Option<Ulid>, span: Span) -> BookingRequest {
        BookingRequest {
            resource_id: request.resource_id,
            span,
            purpose: request.purpose.clone(),
            requester: request.requester.clone(),
            series_id,
            status: request.status,
        }
    }

    async fn commit_all_or_none(
        &self,
        request: &SeriesRequest,
        series_id: Ulid,
        bookable: &[Occurrence],
        cancel: &CancellationToken,
        outcome: &mut SeriesOutcome,
    ) -> Result<(), SchedError> {
        let guard = self.ledger.lock(request.resource_id).await;

        // Phase 1: check every occurrence so the caller sees all conflicts at once.
        for occ in bookable {
            let verdict = self.ledger.checker().check(request.resource_id, occ.span).await?;
            if let Verdict::Conflict {
                conflict_type,
                competing,
            } = verdict
            {
                outcome.failed_instances.push(FailedInstance {
                    instance_number: occ.instance_number,
                    span: occ.span,
                    reason: FailureReason::Conflict(conflict_type),
                    conflicting_id: competing.first().copied(),
                    conflict_id: None,
                });
            }
        }
        if !outcome.failed_instances.is_empty() {
            outcome.aborted = true;
            return Ok(());
        }

        // Phase 2: commit in instance order; any failure undoes the batch.
        let mut committed: Vec<ReservationInstance> = Vec::with_capacity(bookable.len());
        for occ in bookable {
            let failure = if cancel.is_cancelled() {
                Some("cancelled".to_string())
            } else {
                match self
                    .ledger
                    .commit_locked(&guard, Self::request_for(request, Some(series_id), occ.span), &[])
                    .await
                {
                    Ok(instance) => {
                        committed.push(instance);
                        None
                    }
                    Err(e) => Some(format!("occurrence {} failed: {e}", occ.instance_number)),
                }
            };
            if let Some(reason) = failure {
                let removed = self.ledger.rollback(&guard, &committed).await;
                warn!(%series_id, removed, "series rolled back: {reason}");
                return Err(SchedError::SeriesAborted(reason));
            }
        }
        outcome.instances = committed;
        Ok(())
    }

    async fn commit_each(
        &self,
        request: &SeriesRequest,
        series_id: Ulid,
        bookable: &[Occurrence],
        cancel: &CancellationToken,
        outcome: &mut SeriesOutcome,
    ) {
        let ledger = &self.ledger;
        let results: Vec<(Occurrence, Option<Result<ReservationInstance, SchedError>>)> =
            futures::stream::iter(bookable.iter().copied())
                .map(move |occ| async move {
                    if cancel.is_cancelled() {
                        return (occ, None);
                    }
                    let booking = Self::request_for(request, Some(series_id), occ.span);
                    (occ, Some(ledger.commit(booking).await))
                })
                .buffered(self.concurrency)
                .collect()
                .await;

        for (occ, result) in results {
            let failed = match result {
                Some(Ok(instance)) => {
                    outcome.instances.push(instance);
                    continue;
                }
                None => {
                    outcome.cancelled = true;
                    FailedInstance {
                        instance_number: occ.instance_number,
                        span: occ.span,
                        reason: FailureReason::Cancelled,
                        conflicting_id: None,
                        conflict_id: None,
                    }
                }
                Some(Err(SchedError::StillConflicting {
                    conflict_type,
                    competing,
                })) => {
                    let conflicting_id = competing.first().copied();
                    // A resolved occurrence becomes a standalone booking.
                    let conflict = self
                        .resolver
                        .record(
                            Self::request_for(request, None, occ.span),
                            conflict_type,
                            competing,
                            request.notes.clone(),
                        )
                        .await;
                    FailedInstance {
                        instance_number: occ.instance_number,
                        span: occ.span,
                        reason: FailureReason::Conflict(conflict_type),
                        conflicting_id,
                        conflict_id: Some(conflict.id),
                    }
                }
                Some(Err(e)) => {
                    warn!(%series_id, instance = occ.instance_number, "occurrence not committed: {e}");
                    FailedInstance {
                        instance_number: occ.instance_number,
                        span: occ.span,
                        reason: FailureReason::CommitFailed(e.to_string()),
                        conflicting_id: None,
                        conflict_id: None,
                    }
                }
            };
            outcome.failed_instances.push(failed);
        }
    }

    /// Cancel every instance the series still owns. Detached instances and
    /// ones already cancelled are left alone. Returns what was cancelled.
    pub async fn cancel_series(&self, series_id: Ulid) -> Result<Vec<ReservationInstance>, SchedError> {
        let instance_ids = self
            .series
            .get(&series_id)
            .map(|s| s.instance_ids.clone())
            .ok_or(SchedError::NotFound(series_id))?;

        let mut cancelled = Vec::new();
        for id in instance_ids {
            let r = match self.ledger.reservation(id).await {
                Ok(r) => r,
                Err(SchedError::NotFound(_)) => continue,
                Err(e) => return Err(e),
            };
            if r.series_id != Some(series_id) || !r.is_active() {
                continue;
            }
            match self.ledger.cancel(id).await {
                Ok(r) => cancelled.push(r),
                // Cancelled concurrently.
                Err(SchedError::InvalidReservationState { .. }) => {}
                Err(e) => return Err(e),
            }
        }

        if let Some(mut s) = self.series.get_mut(&series_id) {
            s.cancelled = true;
        }
        info!(%series_id, cancelled = cancelled.len(), "series cancelled");
        Ok(cancelled)
    }

    /// Turn one instance into a standalone booking that survives series
    /// cancellation.
    pub async fn detach_instance(
        &self,
        series_id: Ulid,
        instance_id: Ulid,
    ) -> Result<ReservationInstance, SchedError> {
        if !self.series.contains_key(&series_id) {
            return Err(SchedError::NotFound(series_id));
        }
        let r = self.ledger.reservation(instance_id).await?;
        if r.series_id != Some(series_id) {
            return Err(SchedError::InvalidRequest("instance does not belong to series"));
        }
        let detached = self.ledger.detach(instance_id).await?;
        if let Some(mut s) = self.series.get_mut(&series_id) {
            s.instance_ids.retain(|id| *id != instance_id);
        }
        info!(%series_id, reservation_id = %instance_id, "instance detached");
        Ok(detached)
    }
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeSet;

    use chrono::NaiveDate;

    use super::*;
    use crate::clock::ManualClock;
    use crate::engine::matcher::{ReassignmentMatcher, TieredLocation};
    use crate::engine::store::InMemoryStore;
    use crate::engine::waitlist::WaitlistQueue;
    use crate::notify::NotifyHub;

    /// 2026-01-05T09:00:00Z, a Monday.
    const MONDAY_9: Ms = 1_767_603_600_000;

    struct Fixture {
        orchestrator: SeriesOrchestrator,
        resolver: Arc<ConflictResolutionEngine>,
        ledger: Arc<Ledger>,
        store: Arc<InMemoryStore>,
        room: Ulid,
    }

    fn fixture() -> Fixture {
        let store = Arc::new(InMemoryStore::new());
        let room = Ulid::new();
        store.add_resource(ResourceProfile {
            id: room,
            name: Some("Lab 2".into()),
            capacity: 20,
            features: BTreeSet::new(),
            location: Location::new("A", "Main"),
        });
        let hub = Arc::new(NotifyHub::new());
        let clock = Arc::new(ManualClock::new(MONDAY_9 - DAY_MS));
        let ledger = Arc::new(Ledger::new(store.clone(), hub.clone()));
        let matcher = Arc::new(ReassignmentMatcher::new(
            store.clone(),
            Arc::new(TieredLocation::default()),
        ));
        let waitlist = Arc::new(WaitlistQueue::new(
            ledger.clone(),
            hub.clone(),
            clock.clone(),
            crate::limits::DEFAULT_OFFER_TIMEOUT_MS,
        ));
        let resolver = Arc::new(ConflictResolutionEngine::new(
            ledger.clone(),
            matcher,
            waitlist,
            hub,
            clock,
        ));
        Fixture {
            orchestrator: SeriesOrchestrator::new(ledger.clone(), resolver.clone(), 4),
            resolver,
            ledger,
            store,
            room,
        }
    }

    fn anchor() -> Span {
        Span::new(MONDAY_9, MONDAY_9 + HOUR_MS)
    }

    fn daily(count: u32) -> RecurrencePattern {
        RecurrencePattern {
            frequency: Frequency::Daily,
            interval: 1,
            end: RecurrenceEnd::Count(count),
            exceptions: BTreeSet::new(),
        }
    }

    fn nth_day(n: i64) -> Span {
        Span::new(MONDAY_9 + n * DAY_MS, MONDAY_9 + n * DAY_MS + HOUR_MS)
    }

    async fn block_third(f: &Fixture) -> ReservationInstance {
        f.ledger
            .commit(BookingRequest::new(f.room, nth_day(2)))
            .await
            .unwrap()
    }

    #[tokio::test]
    async fn weekly_series_created() {
        let f = fixture();
        let pattern = RecurrencePattern {
            frequency: Frequency::Weekly {
                days_of_week: [1, 3].into_iter().collect(),
            },
            interval: 1,
            end: RecurrenceEnd::Count(4),
            exceptions: BTreeSet::new(),
        };
        let out = f
            .orchestrator
            .create_series(
                SeriesRequest::new(f.room, anchor(), pattern),
                &CancellationToken::new(),
            )
            .await
            .unwrap();

        assert_eq!(out.successful_instances(), 4);
        assert_eq!(out.total_instances, 4);
        assert!(out.failed_instances.is_empty());
        let starts: Vec<Ms> = out.instances.iter().map(|r| r.span.start).collect();
        assert_eq!(
            starts,
            vec![nth_day(0).start, nth_day(2).start, nth_day(7).start, nth_day(9).start]
        );
        assert_eq!(out.master_reservation_id, Some(out.instances[0].id));
        assert!(out.instances.iter().all(|r| r.series_id == Some(out.series_id)));

        let series = f.orchestrator.series(out.series_id).unwrap();
        assert_eq!(series.instance_ids.len(), 4);
    }

    #[tokio::test]
    async fn all_or_none_conflict_persists_nothing() {
        let f = fixture();
        let blocker = block_third(&f).await;

        let out = f
            .orchestrator
            .create_series(
                SeriesRequest::new(f.room, anchor(), daily(5)).all_or_none(),
                &CancellationToken::new(),
            )
            .await
            .unwrap();

        assert!(out.aborted);
        assert_eq!(out.successful_instances(), 0);
        assert_eq!(out.master_reservation_id, None);
        assert_eq!(out.failed_instances.len(), 1);
        let failed = &out.failed_instances[0];
        assert_eq!(failed.instance_number, 3);
        assert_eq!(failed.reason, FailureReason::Conflict(ConflictType::DoubleBooking));
        assert_eq!(failed.conflicting_id, Some(blocker.id));
        assert_eq!(f.store.all_reservations(f.room).await, vec![blocker]);
        assert!(f.orchestrator.series(out.series_id).is_none());
        // No conflicts registered for an aborted batch.
        assert!(f.resolver.pending(None).await.is_empty());
    }

    #[tokio::test]
    async fn all_or_none_reports_every_conflict() {
        let f = fixture();
        block_third(&f).await;
        f.ledger
            .add_block(Block {
                id: Ulid::new(),
                resource_id: f.room,
                span: nth_day(4),
                kind: BlockKind::Maintenance,
                reason: None,
            })
            .await
            .unwrap();

        let out = f
            .orchestrator
            .create_series(
                SeriesRequest::new(f.room, anchor(), daily(5)).all_or_none(),
                &CancellationToken::new(),
            )
            .await
            .unwrap();
        let reasons: Vec<(u32, &str)> = out
            .failed_instances
            .iter()
            .map(|f| (f.instance_number, f.reason.label()))
            .collect();
        assert_eq!(reasons, vec![(3, "DOUBLE_BOOKING"), (5, "MAINTENANCE")]);
    }

    #[tokio::test]
    async fn partial_commits_the_rest() {
        let f = fixture();
        let blocker = block_third(&f).await;

        let out = f
            .orchestrator
            .create_series(
                SeriesRequest::new(f.room, anchor(), daily(5)),
                &CancellationToken::new(),
            )
            .await
            .unwrap();

        assert!(!out.aborted);
        assert_eq!(out.successful_instances(), 4);
        let numbers: Vec<Ms> = out.instances.iter().map(|r| r.span.start).collect();
        assert_eq!(
            numbers,
            vec![nth_day(0).start, nth_day(1).start, nth_day(3).start, nth_day(4).start]
        );
        assert_eq!(out.failed_instances.len(), 1);
        let failed = &out.failed_instances[0];
        assert_eq!(failed.span, nth_day(2));
        assert_eq!(failed.reason.label(), "DOUBLE_BOOKING");
        assert_eq!(failed.conflicting_id, Some(blocker.id));

        let conflict = f.resolver.conflict(failed.conflict_id.unwrap()).await.unwrap();
        assert_eq!(conflict.resolution, ResolutionState::Pending);
        assert_eq!(conflict.span, nth_day(2));
        assert_eq!(conflict.request.series_id, None);
    }

    #[tokio::test]
    async fn series_keeps_notes_and_participants() {
        let f = fixture();
        block_third(&f).await;
        let mut request = SeriesRequest::new(f.room, anchor(), daily(4));
        request.notes = Some("bring lab coats".into());
        request.participants = vec!["ana".into(), "li".into()];

        let out = f
            .orchestrator
            .create_series(request, &CancellationToken::new())
            .await
            .unwrap();

        let series = f.orchestrator.series(out.series_id).unwrap();
        assert_eq!(series.notes.as_deref(), Some("bring lab coats"));
        assert_eq!(series.participants, vec!["ana".to_string(), "li".to_string()]);

        let conflict_id = out.failed_instances[0].conflict_id.unwrap();
        let conflict = f.resolver.conflict(conflict_id).await.unwrap();
        assert_eq!(conflict.notes.as_deref(), Some("bring lab coats"));
    }

    #[tokio::test]
    async fn exception_dates_are_not_booked() {
        let f = fixture();
        let mut pattern = daily(3);
        pattern.exceptions.insert(NaiveDate::from_ymd_opt(2026, 1, 6).unwrap());

        let out = f
            .orchestrator
            .create_series(
                SeriesRequest::new(f.room, anchor(), pattern),
                &CancellationToken::new(),
            )
            .await
            .unwrap();
        assert_eq!(out.total_instances, 3);
        assert_eq!(out.successful_instances(), 2);
        assert_eq!(out.exceptions.len(), 1);
        assert_eq!(out.exceptions[0].instance_number, 2);
        assert!(out.failed_instances.is_empty());
    }

    #[tokio::test]
    async fn cancelled_before_start() {
        let f = fixture();
        let token = CancellationToken::new();
        token.cancel();

        let out = f
            .orchestrator
            .create_series(SeriesRequest::new(f.room, anchor(), daily(3)), &token)
            .await
            .unwrap();
        assert!(out.cancelled);
        assert_eq!(out.successful_instances(), 0);
        assert!(out
            .failed_instances
            .iter()
            .all(|f| f.reason == FailureReason::Cancelled));

        let err = f
            .orchestrator
            .create_series(SeriesRequest::new(f.room, anchor(), daily(3)).all_or_none(), &token)
            .await
            .unwrap_err();
        assert!(matches!(err, SchedError::SeriesAborted(_)));
        assert!(f.store.all_reservations(f.room).await.is_empty());
    }

    #[tokio::test]
    async fn invalid_patterns_have_no_side_effects() {
        let f = fixture();
        let mut bad = daily(3);
        bad.interval = 0;
        assert!(matches!(
            f.orchestrator
                .create_series(SeriesRequest::new(f.room, anchor(), bad), &CancellationToken::new())
                .await,
            Err(SchedError::InvalidPattern(_))
        ));

        // 30-hour occurrences every day overlap each other.
        let long = Span::new(MONDAY_9, MONDAY_9 + 30 * HOUR_MS);
        assert!(matches!(
            f.orchestrator
                .create_series(SeriesRequest::new(f.room, long, daily(3)), &CancellationToken::new())
                .await,
            Err(SchedError::InvalidPattern(_))
        ));
        assert!(f.store.all_reservations(f.room).await.is_empty());
    }

    #[tokio::test]
    async fn cancel_series_spares_detached() {
        let f = fixture();
        let out = f
            .orchestrator
            .create_series(
                SeriesRequest::new(f.room, anchor(), daily(3)),
                &CancellationToken::new(),
            )
            .await
            .unwrap();
        let keep = out.instances[1].id;

        let detached = f.orchestrator.detach_instance(out.series_id, keep).await.unwrap();
        assert_eq!(detached.series_id, None);

        let cancelled = f.orchestrator.cancel_series(out.series_id).await.unwrap();
        assert_eq!(cancelled.len(), 2);
        assert!(f.ledger.reservation(keep).await.unwrap().is_active());
        assert!(f.orchestrator.series(out.series_id).unwrap().cancelled);

        // Second cancel has nothing left to do.
        assert!(f.orchestrator.cancel_series(out.series_id).await.unwrap().is_empty());
        assert!(matches!(
            f.orchestrator.detach_instance(out.series_id, keep).await,
            Err(SchedError::InvalidRequest(_))
        ));
    }

    #[tokio::test]
    async fn preview_pages() {
        let f = fixture();
        let page = f
            .orchestrator
            .preview(f.room, anchor(), &daily(5), 2, 2)
            .await
            .unwrap();
        assert_eq!(page.total_instances, 5);
        assert_eq!(page.total_pages, 3);
        assert!(page.has_more);
        let numbers: Vec<u32> = page.occurrences.iter().map(|o| o.instance_number).collect();
        assert_eq!(numbers, vec![3, 4]);

        let missing = Ulid::new();
        assert_eq!(
            f.orchestrator.preview(missing, anchor(), &daily(5), 1, 2).await,
            Err(SchedError::ResourceNotFound(missing))
        );
    }
}
