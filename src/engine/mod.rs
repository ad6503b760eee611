mod availability;
mod error;
mod ledger;
mod matcher;
mod resolution;
mod series;
mod store;
mod waitlist;

pub use availability::{AvailabilityChecker, Verdict, classify, merge_overlapping, subtract_intervals};
pub(crate) use availability::validate_span;
pub use error::{SchedError, StoreError};
pub use ledger::{Ledger, ResourceGuard};
pub use matcher::{LocationPolicy, ReassignmentMatcher, TieredLocation, capacity_score, feature_score, score};
pub use resolution::{ConflictResolutionEngine, Resolution, ResolutionOutcome};
pub use series::{FailedInstance, FailureReason, Series, SeriesOrchestrator, SeriesOutcome, SeriesRequest};
pub use store::{InMemoryStore, ReservationStore, ResourceState, SharedResourceState};
pub use waitlist::{WaitlistQueue, WaitlistRequest, WaitlistResponse};

use std::sync::Arc;

use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::warn;
use ulid::Ulid;

use crate::clock::Clock;
use crate::config::SchedulerConfig;
use crate::model::*;
use crate::notify::Notifier;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BookingOutcome {
    Committed(ReservationInstance),
    /// The window was taken; the attempt is now a PENDING conflict.
    Conflicted(Conflict),
}

/// Every component wired to one store, notifier, and clock.
///
/// Operations that free time on a resource (cancel, block removal, series
/// cancellation, reassignment) feed the released window to the waitlist
/// after the ledger has let go of the resource lock.
pub struct Scheduler {
    ledger: Arc<Ledger>,
    matcher: Arc<ReassignmentMatcher>,
    waitlist: Arc<WaitlistQueue>,
    resolver: Arc<ConflictResolutionEngine>,
    series: SeriesOrchestrator,
    config: SchedulerConfig,
}

impl Scheduler {
    pub fn new(
        store: Arc<dyn ReservationStore>,
        notifier: Arc<dyn Notifier>,
        clock: Arc<dyn Clock>,
        config: SchedulerConfig,
    ) -> Self {
        let location = Arc::new(config.location);
        Self::with_location_policy(store, notifier, clock, config, location)
    }

    pub fn with_location_policy(
        store: Arc<dyn ReservationStore>,
        notifier: Arc<dyn Notifier>,
        clock: Arc<dyn Clock>,
        config: SchedulerConfig,
        location: Arc<dyn LocationPolicy>,
    ) -> Self {
        let ledger = Arc::new(Ledger::new(store.clone(), notifier.clone()));
        let matcher = Arc::new(ReassignmentMatcher::new(store, location));
        let waitlist = Arc::new(WaitlistQueue::new(
            ledger.clone(),
            notifier.clone(),
            clock.clone(),
            config.offer_timeout_ms,
        ));
        let resolver = Arc::new(ConflictResolutionEngine::new(
            ledger.clone(),
            matcher.clone(),
            waitlist.clone(),
            notifier,
            clock,
        ));
        let series = SeriesOrchestrator::new(ledger.clone(), resolver.clone(), config.series_concurrency);
        Self {
            ledger,
            matcher,
            waitlist,
            resolver,
            series,
            config,
        }
    }

    pub fn config(&self) -> &SchedulerConfig {
        &self.config
    }

    pub fn ledger(&self) -> &Arc<Ledger> {
        &self.ledger
    }

    pub fn checker(&self) -> &AvailabilityChecker {
        self.ledger.checker()
    }

    pub fn matcher(&self) -> &Arc<ReassignmentMatcher> {
        &self.matcher
    }

    pub fn waitlist(&self) -> &Arc<WaitlistQueue> {
        &self.waitlist
    }

    pub fn resolver(&self) -> &Arc<ConflictResolutionEngine> {
        &self.resolver
    }

    pub fn series(&self) -> &SeriesOrchestrator {
        &self.series
    }

    /// Book a single window. Losing to an existing booking or block is not
    /// an error: the attempt is registered as a conflict and returned.
    pub async fn book(&self, request: BookingRequest) -> Result<BookingOutcome, SchedError> {
        match self.ledger.commit(request.clone()).await {
            Ok(r) => Ok(BookingOutcome::Committed(r)),
            Err(SchedError::StillConflicting {
                conflict_type,
                competing,
            }) => {
                let conflict = self.resolver.record(request, conflict_type, competing, None).await;
                Ok(BookingOutcome::Conflicted(conflict))
            }
            Err(e) => Err(e),
        }
    }

    pub async fn confirm(&self, reservation_id: Ulid) -> Result<ReservationInstance, SchedError> {
        self.ledger.confirm(reservation_id).await
    }

    pub async fn cancel(&self, reservation_id: Ulid) -> Result<ReservationInstance, SchedError> {
        let r = self.ledger.cancel(reservation_id).await?;
        self.release(r.resource_id, r.span).await;
        Ok(r)
    }

    pub async fn add_block(&self, block: Block) -> Result<Block, SchedError> {
        self.ledger.add_block(block.clone()).await?;
        Ok(block)
    }

    pub async fn remove_block(&self, block_id: Ulid) -> Result<Block, SchedError> {
        let block = self.ledger.remove_block(block_id).await?;
        self.release(block.resource_id, block.span).await;
        Ok(block)
    }

    pub async fn free_windows(
        &self,
        resource_id: Ulid,
        query: Span,
        min_duration_ms: Option<Ms>,
    ) -> Result<Vec<Span>, SchedError> {
        self.ledger
            .checker()
            .free_windows(resource_id, query, min_duration_ms)
            .await
    }

    /// Ranked substitutes for an existing reservation's window.
    pub async fn reassignment_suggestions(
        &self,
        reservation_id: Ulid,
    ) -> Result<Vec<ReassignmentSuggestion>, SchedError> {
        let r = self.ledger.reservation(reservation_id).await?;
        self.matcher.suggest(r.resource_id, r.span, &[r.id]).await
    }

    /// Move a reservation to `target`, optionally at a new window. Returns
    /// `(cancelled_original, replacement)`.
    pub async fn reassign(
        &self,
        reservation_id: Ulid,
        target: Ulid,
        span: Option<Span>,
    ) -> Result<(ReservationInstance, ReservationInstance), SchedError> {
        let current = self.ledger.reservation(reservation_id).await?;
        let span = span.unwrap_or(current.span);
        let (original, replacement) = self
            .ledger
            .move_reservation(reservation_id, target, span)
            .await?;
        self.release(original.resource_id, original.span).await;
        Ok((original, replacement))
    }

    pub async fn create_series(
        &self,
        request: SeriesRequest,
        cancel: &CancellationToken,
    ) -> Result<SeriesOutcome, SchedError> {
        self.series.create_series(request, cancel).await
    }

    pub async fn cancel_series(&self, series_id: Ulid) -> Result<Vec<ReservationInstance>, SchedError> {
        let cancelled = self.series.cancel_series(series_id).await?;
        for r in &cancelled {
            self.release(r.resource_id, r.span).await;
        }
        Ok(cancelled)
    }

    pub async fn resolve(
        &self,
        conflict_id: Ulid,
        resolution: Resolution,
        notes: Option<String>,
    ) -> Result<ResolutionOutcome, SchedError> {
        self.resolver.resolve(conflict_id, resolution, notes).await
    }

    /// Start the periodic waitlist expiry and retention sweep. Stops when
    /// `shutdown` fires.
    pub fn spawn_sweeper(&self, shutdown: CancellationToken) -> JoinHandle<()> {
        tokio::spawn(crate::sweeper::run_sweeper(
            self.waitlist.clone(),
            self.resolver.clone(),
            self.config.sweep_interval(),
            self.config.retention_ms,
            shutdown,
        ))
    }

    /// The freed window has already been committed; a failed cascade only
    /// delays offers until the next release or sweep.
    async fn release(&self, resource_id: Ulid, span: Span) {
        if let Err(e) = self
            .waitlist
            .on_resource_released(resource_id, span, self.config.default_notify_top)
            .await
        {
            warn!(%resource_id, "waitlist cascade failed: {e}");
        }
    }
}
