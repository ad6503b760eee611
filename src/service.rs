use std::sync::Arc;

use tokio_util::sync::CancellationToken;
use tracing::info;
use ulid::Ulid;

use crate::dto::*;
use crate::engine::{Resolution, SchedError, Scheduler, WaitlistRequest, WaitlistResponse};
use crate::model::RecurrencePattern;

/// Executes caller-facing requests against a `Scheduler`, translating
/// between wire contracts and engine types.
#[derive(Clone)]
pub struct BookingService {
    scheduler: Arc<Scheduler>,
}

impl BookingService {
    pub fn new(scheduler: Arc<Scheduler>) -> Self {
        Self { scheduler }
    }

    pub fn scheduler(&self) -> &Arc<Scheduler> {
        &self.scheduler
    }

    pub async fn preview(
        &self,
        req: PreviewRecurringReservationRequest,
    ) -> Result<PreviewRecurringReservationResponse, SchedError> {
        let anchor = span_of(req.start_date, req.end_date)?;
        let (page, limit) = (req.page(), req.limit());
        let pattern = RecurrencePattern::try_from(req.recurrence_pattern)?;
        let expansion = self
            .scheduler
            .series()
            .preview(req.resource_id, anchor, &pattern, page, limit)
            .await?;
        Ok(PreviewRecurringReservationResponse::new(expansion, &pattern))
    }

    pub async fn create_recurring(
        &self,
        req: CreateRecurringReservationRequest,
        cancel: &CancellationToken,
    ) -> Result<CreateRecurringReservationResponse, SchedError> {
        let series = req.into_series_request()?;
        let outcome = self.scheduler.create_series(series, cancel).await?;
        Ok((&outcome).into())
    }

    pub async fn cancel_series(&self, series_id: Ulid) -> Result<Vec<ReservationDto>, SchedError> {
        let cancelled = self.scheduler.cancel_series(series_id).await?;
        Ok(cancelled.iter().map(ReservationDto::from).collect())
    }

    pub async fn resolve_conflict(
        &self,
        req: ResolveConflictRequest,
    ) -> Result<ResolveConflictResponse, SchedError> {
        let conflict_id = req.conflict_id;
        let notes = req.notes.clone();
        let resolution = Resolution::try_from(req)?;
        let outcome = self.scheduler.resolve(conflict_id, resolution, notes).await?;

        let waitlist_entry = match &outcome.waitlist_entry {
            Some(e) => {
                let position = self.scheduler.waitlist().position(e.id).await?;
                Some(WaitlistEntryDto::new(e, position))
            }
            None => None,
        };
        Ok(ResolveConflictResponse {
            conflict: (&outcome.conflict).into(),
            reservation: outcome.reservation.as_ref().map(ReservationDto::from),
            waitlist_entry,
            suggestions: outcome
                .suggestions
                .iter()
                .map(ReassignmentSuggestionDto::from)
                .collect(),
        })
    }

    pub async fn reassignment_suggestions(
        &self,
        reservation_id: Ulid,
    ) -> Result<Vec<ReassignmentSuggestionDto>, SchedError> {
        let ranked = self
            .scheduler
            .reassignment_suggestions(reservation_id)
            .await?;
        Ok(ranked.iter().map(ReassignmentSuggestionDto::from).collect())
    }

    pub async fn request_reassignment(
        &self,
        req: RequestReassignmentRequest,
    ) -> Result<ReassignmentResponse, SchedError> {
        let span = req.new_span()?;
        let (original, replacement) = self
            .scheduler
            .reassign(req.reservation_id, req.new_resource_id, span)
            .await?;
        info!(
            reservation_id = %original.id,
            replacement_id = %replacement.id,
            reason = %req.reason,
            details = req.reason_details.as_deref().unwrap_or(""),
            "reservation reassigned"
        );
        Ok(ReassignmentResponse {
            original: (&original).into(),
            replacement: (&replacement).into(),
            reason: req.reason,
            notify_user: req.notify_user,
        })
    }

    pub async fn join_waitlist(&self, req: JoinWaitlistRequest) -> Result<WaitlistEntryDto, SchedError> {
        let waitlist = self.scheduler.waitlist();
        let entry = waitlist.enqueue(WaitlistRequest::try_from(req)?).await?;
        let position = waitlist.position(entry.id).await?;
        Ok(WaitlistEntryDto::new(&entry, position))
    }

    pub async fn notify_waitlist(
        &self,
        req: NotifyWaitlistRequest,
    ) -> Result<Vec<WaitlistEntryDto>, SchedError> {
        let span = span_of(req.available_from, req.available_until)?;
        let top = req
            .notify_top
            .unwrap_or(self.scheduler.config().default_notify_top);
        let notified = self
            .scheduler
            .waitlist()
            .on_resource_released(req.resource_id, span, top)
            .await?;
        Ok(notified.iter().map(|e| WaitlistEntryDto::new(e, None)).collect())
    }

    pub async fn respond_waitlist(
        &self,
        req: RespondWaitlistRequest,
    ) -> Result<RespondWaitlistResponse, SchedError> {
        let response = self
            .scheduler
            .waitlist()
            .respond(req.entry_id, req.accepted, req.new_resource_id)
            .await?;
        Ok(match response {
            WaitlistResponse::Accepted { entry, reservation } => RespondWaitlistResponse {
                entry: WaitlistEntryDto::new(&entry, None),
                reservation: Some((&reservation).into()),
                notified: Vec::new(),
            },
            WaitlistResponse::Declined { entry, notified } => RespondWaitlistResponse {
                entry: WaitlistEntryDto::new(&entry, None),
                reservation: None,
                notified: notified.iter().map(|e| WaitlistEntryDto::new(e, None)).collect(),
            },
            WaitlistResponse::AlreadyExpired { entry } => RespondWaitlistResponse {
                entry: WaitlistEntryDto::new(&entry, None),
                reservation: None,
                notified: Vec::new(),
            },
        })
    }

    /// WAITING entries for a resource with their positions.
    pub async fn waitlist(&self, resource_id: Ulid) -> Vec<WaitlistEntryDto> {
        self.scheduler
            .waitlist()
            .entries(resource_id)
            .await
            .iter()
            .map(|(e, pos)| WaitlistEntryDto::new(e, Some(*pos)))
            .collect()
    }
}
