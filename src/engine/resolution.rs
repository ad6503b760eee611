use std::sync::Arc;

use dashmap::DashMap;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};
use ulid::Ulid;

use crate::clock::Clock;
use crate::model::*;
use crate::notify::Notifier;

use super::availability::validate_span;
use super::ledger::Ledger;
use super::matcher::ReassignmentMatcher;
use super::waitlist::{WaitlistQueue, WaitlistRequest};
use super::SchedError;

/// How a caller wants a pending conflict settled.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Resolution {
    /// Re-book on an explicit resource and/or window.
    Manual {
        resource_id: Option<Ulid>,
        span: Option<Span>,
    },
    /// Move to a substitute resource. With `auto_pick` the best available
    /// suggestion is taken; otherwise `resource_id` must name one from the
    /// ranked list, or the list is returned for the caller to choose from.
    AutoReassign {
        auto_pick: bool,
        resource_id: Option<Ulid>,
    },
    /// Queue the original request instead of satisfying it now.
    Waitlist { priority: Priority },
    Cancel,
}

impl Resolution {
    pub fn label(&self) -> &'static str {
        match self {
            Resolution::Manual { .. } => "MANUAL",
            Resolution::AutoReassign { .. } => "AUTO_REASSIGN",
            Resolution::Waitlist { .. } => "WAITLIST",
            Resolution::Cancel => "CANCEL",
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct ResolutionOutcome {
    pub conflict: Conflict,
    pub reservation: Option<ReservationInstance>,
    pub waitlist_entry: Option<WaitlistEntry>,
    /// Ranked alternatives when AUTO_REASSIGN is waiting on the caller's pick.
    pub suggestions: Vec<ReassignmentSuggestion>,
}

impl ResolutionOutcome {
    fn new(conflict: Conflict) -> Self {
        Self {
            conflict,
            reservation: None,
            waitlist_entry: None,
            suggestions: Vec::new(),
        }
    }
}

/// Registry of detected conflicts and the only place they change state.
///
/// Each conflict sits behind its own mutex: two callers resolving the same
/// conflict serialize, and the second one sees a terminal state.
pub struct ConflictResolutionEngine {
    conflicts: DashMap<Ulid, Arc<Mutex<Conflict>>>,
    ledger: Arc<Ledger>,
    matcher: Arc<ReassignmentMatcher>,
    waitlist: Arc<WaitlistQueue>,
    notifier: Arc<dyn Notifier>,
    clock: Arc<dyn Clock>,
}

impl ConflictResolutionEngine {
    pub fn new(
        ledger: Arc<Ledger>,
        matcher: Arc<ReassignmentMatcher>,
        waitlist: Arc<WaitlistQueue>,
        notifier: Arc<dyn Notifier>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            conflicts: DashMap::new(),
            ledger,
            matcher,
            waitlist,
            notifier,
            clock,
        }
    }

    /// Register a failed booking attempt as a PENDING conflict.
    pub async fn record(
        &self,
        request: BookingRequest,
        conflict_type: ConflictType,
        competing: Vec<Ulid>,
        notes: Option<String>,
    ) -> Conflict {
        let conflict = Conflict {
            id: Ulid::new(),
            resource_id: request.resource_id,
            span: request.span,
            conflict_type,
            severity: conflict_type.severity(),
            competing: competing.into_iter().collect(),
            resolution: ResolutionState::Pending,
            request,
            detected_at: self.clock.now_ms(),
            resolved_at: None,
            notes,
        };
        self.conflicts
            .insert(conflict.id, Arc::new(Mutex::new(conflict.clone())));

        metrics::counter!(crate::observability::CONFLICTS_DETECTED_TOTAL, "type" => conflict_type.as_str())
            .increment(1);
        warn!(
            conflict_id = %conflict.id,
            resource_id = %conflict.resource_id,
            conflict_type = conflict_type.as_str(),
            "conflict detected"
        );
        self.notifier
            .notify(Event::ConflictDetected {
                id: conflict.id,
                resource_id: conflict.resource_id,
                conflict_type,
            })
            .await;
        conflict
    }

    fn slot(&self, id: Ulid) -> Result<Arc<Mutex<Conflict>>, SchedError> {
        self.conflicts
            .get(&id)
            .map(|c| c.value().clone())
            .ok_or(SchedError::NotFound(id))
    }

    pub async fn conflict(&self, id: Ulid) -> Result<Conflict, SchedError> {
        let slot = self.slot(id)?;
        let conflict = slot.lock().await;
        Ok(conflict.clone())
    }

    /// PENDING conflicts, oldest first, optionally for one resource.
    pub async fn pending(&self, resource_id: Option<Ulid>) -> Vec<Conflict> {
        let slots: Vec<Arc<Mutex<Conflict>>> =
            self.conflicts.iter().map(|c| c.value().clone()).collect();
        let mut out = Vec::new();
        for slot in slots {
            let c = slot.lock().await;
            if c.resolution == ResolutionState::Pending
                && resource_id.is_none_or(|r| r == c.resource_id)
            {
                out.push(c.clone());
            }
        }
        out.sort_by(|a, b| a.detected_at.cmp(&b.detected_at).then(a.id.cmp(&b.id)));
        out
    }

    /// Forget conflicts that reached a terminal state more than `retain_ms`
    /// ago. A conflict being resolved right now is skipped. Returns how many
    /// were dropped.
    pub fn prune_resolved(&self, retain_ms: Ms) -> usize {
        let cutoff = self.clock.now_ms() - retain_ms;
        let mut pruned = 0;
        self.conflicts.retain(|_, slot| {
            let Ok(conflict) = slot.try_lock() else {
                return true;
            };
            let expired = conflict.resolved_at.is_some_and(|at| at <= cutoff);
            if expired {
                pruned += 1;
            }
            !expired
        });
        if pruned > 0 {
            debug!(pruned, "resolved conflicts pruned");
        }
        pruned
    }

    /// Ranked substitutes for the conflicting request.
    pub async fn suggestions(&self, id: Ulid) -> Result<Vec<ReassignmentSuggestion>, SchedError> {
        let request = self.conflict(id).await?.request;
        self.matcher
            .suggest(request.resource_id, request.span, &[])
            .await
    }

    /// Apply `resolution`. Every path that books re-validates availability
    /// through the ledger; a lost race leaves the conflict PENDING and
    /// returns `StillConflicting`.
    pub async fn resolve(
        &self,
        id: Ulid,
        resolution: Resolution,
        notes: Option<String>,
    ) -> Result<ResolutionOutcome, SchedError> {
        let slot = self.slot(id)?;
        let mut conflict = slot.lock().await;
        if conflict.resolution.is_terminal() {
            return Err(SchedError::ConflictAlreadyResolved(id));
        }

        let mut outcome = ResolutionOutcome::new(conflict.clone());
        let state = match &resolution {
            Resolution::Manual { resource_id, span } => {
                if resource_id.is_none() && span.is_none() {
                    return Err(SchedError::InvalidRequest(
                        "manual resolution needs a new resource or window",
                    ));
                }
                let mut request = conflict.request.clone();
                if let Some(r) = resource_id {
                    request.resource_id = *r;
                }
                if let Some(s) = span {
                    validate_span(s)?;
                    request.span = *s;
                }
                outcome.reservation = Some(self.ledger.commit(request).await?);
                ResolutionState::ManualResolved
            }
            Resolution::AutoReassign {
                auto_pick,
                resource_id,
            } => {
                let ranked = self
                    .matcher
                    .suggest(conflict.request.resource_id, conflict.request.span, &[])
                    .await?;
                let chosen = match (resource_id, auto_pick) {
                    (Some(r), _) => ranked
                        .iter()
                        .find(|s| s.resource_id == *r)
                        .ok_or(SchedError::NoAvailableCandidate)?
                        .resource_id,
                    (None, true) => ranked
                        .iter()
                        .find(|s| s.available)
                        .ok_or(SchedError::NoAvailableCandidate)?
                        .resource_id,
                    (None, false) => {
                        outcome.suggestions = ranked;
                        return Ok(outcome);
                    }
                };
                let mut request = conflict.request.clone();
                request.resource_id = chosen;
                outcome.reservation = Some(self.ledger.commit(request).await?);
                outcome.suggestions = ranked;
                ResolutionState::AutoResolved
            }
            Resolution::Waitlist { priority } => {
                let request = &conflict.request;
                let entry = self
                    .waitlist
                    .enqueue(WaitlistRequest {
                        resource_id: request.resource_id,
                        desired: request.span,
                        priority: *priority,
                        requester: request.requester.clone(),
                        purpose: request.purpose.clone(),
                    })
                    .await?;
                outcome.waitlist_entry = Some(entry);
                ResolutionState::ManualResolved
            }
            Resolution::Cancel => ResolutionState::Cancelled,
        };

        conflict.resolution = state;
        conflict.resolved_at = Some(self.clock.now_ms());
        if notes.is_some() {
            conflict.notes = notes;
        }
        outcome.conflict = conflict.clone();

        metrics::counter!(crate::observability::CONFLICTS_RESOLVED_TOTAL, "resolution" => state.as_str())
            .increment(1);
        info!(
            conflict_id = %id,
            resolution = resolution.label(),
            state = state.as_str(),
            "conflict resolved"
        );
        self.notifier
            .notify(Event::ConflictResolved {
                id,
                resource_id: conflict.resource_id,
                resolution: state,
            })
            .await;
        Ok(outcome)
    }
}
