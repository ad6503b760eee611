use std::sync::Arc;

use dashmap::DashMap;
use tokio::sync::{Mutex, OwnedMutexGuard};
use tracing::{info, warn};
use ulid::Ulid;

use crate::limits::MAX_LABEL_LEN;
use crate::model::*;
use crate::notify::Notifier;

use super::availability::{AvailabilityChecker, validate_span};
use super::store::ReservationStore;
use super::{SchedError, StoreError};

/// Proof that the holder has exclusive write access to one resource.
pub struct ResourceGuard {
    resource_id: Ulid,
    _lock: OwnedMutexGuard<()>,
}

impl ResourceGuard {
    pub fn resource_id(&self) -> Ulid {
        self.resource_id
    }
}

/// The single write path for reservation instances.
///
/// Every write re-validates availability while holding the resource's lock,
/// so two callers racing for the same window cannot both commit: the loser
/// sees the winner's instance and gets `StillConflicting`.
pub struct Ledger {
    store: Arc<dyn ReservationStore>,
    checker: AvailabilityChecker,
    notifier: Arc<dyn Notifier>,
    locks: DashMap<Ulid, Arc<Mutex<()>>>,
}

impl Ledger {
    pub fn new(store: Arc<dyn ReservationStore>, notifier: Arc<dyn Notifier>) -> Self {
        Self {
            checker: AvailabilityChecker::new(store.clone()),
            store,
            notifier,
            locks: DashMap::new(),
        }
    }

    pub fn checker(&self) -> &AvailabilityChecker {
        &self.checker
    }

    pub async fn lock(&self, resource_id: Ulid) -> ResourceGuard {
        let mutex = self.locks.entry(resource_id).or_default().value().clone();
        ResourceGuard {
            resource_id,
            _lock: mutex.lock_owned().await,
        }
    }

    /// Acquire locks in sorted order to prevent deadlocks.
    pub async fn lock_many(&self, resource_ids: &[Ulid]) -> Vec<ResourceGuard> {
        let mut ids = resource_ids.to_vec();
        ids.sort();
        ids.dedup();
        let mut guards = Vec::with_capacity(ids.len());
        for id in ids {
            guards.push(self.lock(id).await);
        }
        guards
    }

    pub async fn reservation(&self, id: Ulid) -> Result<ReservationInstance, SchedError> {
        self.store
            .reservation(id)
            .await?
            .ok_or(SchedError::NotFound(id))
    }

    pub async fn commit(&self, request: BookingRequest) -> Result<ReservationInstance, SchedError> {
        let guard = self.lock(request.resource_id).await;
        self.commit_locked(&guard, request, &[]).await
    }

    /// Check-then-write under a lock the caller already holds.
    pub async fn commit_locked(
        &self,
        guard: &ResourceGuard,
        request: BookingRequest,
        exclude: &[Ulid],
    ) -> Result<ReservationInstance, SchedError> {
        if guard.resource_id != request.resource_id {
            return Err(SchedError::InvalidRequest("lock held for a different resource"));
        }
        if request.status == ReservationStatus::Cancelled {
            return Err(SchedError::InvalidRequest("cannot commit a cancelled reservation"));
        }
        if let Some(ref p) = request.purpose
            && p.len() > MAX_LABEL_LEN
        {
            return Err(SchedError::InvalidRequest("purpose too long"));
        }

        self.checker
            .check_excluding(request.resource_id, request.span, exclude)
            .await?
            .into_result()?;

        let instance = request.into_instance(Ulid::new());
        self.insert_with_retry(&instance).await?;

        let status = match instance.status {
            ReservationStatus::Pending => "pending",
            _ => "confirmed",
        };
        metrics::counter!(crate::observability::RESERVATIONS_COMMITTED_TOTAL, "status" => status)
            .increment(1);
        info!(
            reservation_id = %instance.id,
            resource_id = %instance.resource_id,
            start = instance.span.start,
            end = instance.span.end,
            "reservation committed"
        );
        self.notifier
            .notify(Event::ReservationCommitted {
                id: instance.id,
                resource_id: instance.resource_id,
                span: instance.span,
                status: instance.status,
            })
            .await;
        Ok(instance)
    }

    /// One transparent retry on a transient storage failure; the second
    /// failure surfaces as `InstanceCommitFailed`.
    ///
    /// A transient error does not prove the write was lost, so before
    /// reporting failure the row is deleted by id. An instance that is
    /// reported as not committed never stays behind in the store.
    async fn insert_with_retry(&self, instance: &ReservationInstance) -> Result<(), SchedError> {
        match self.store.insert_reservation(instance.clone()).await {
            Ok(()) => Ok(()),
            Err(e) if e.is_transient() => {
                warn!(reservation_id = %instance.id, "insert failed, retrying: {e}");
                metrics::counter!(crate::observability::COMMIT_RETRIES_TOTAL).increment(1);
                match self.store.insert_reservation(instance.clone()).await {
                    Ok(()) => Ok(()),
                    // The first attempt landed after all.
                    Err(StoreError::Duplicate(id)) if id == instance.id => Ok(()),
                    Err(e) => {
                        self.discard_unacknowledged(instance.id).await;
                        Err(SchedError::InstanceCommitFailed(e.to_string()))
                    }
                }
            }
            Err(e) => Err(e.into()),
        }
    }

    async fn discard_unacknowledged(&self, id: Ulid) {
        match self.store.delete_reservation(id).await {
            Ok(()) => warn!(reservation_id = %id, "removed unacknowledged write"),
            Err(StoreError::NotFound(_)) => {}
            Err(e) => warn!(reservation_id = %id, "could not remove unacknowledged write: {e}"),
        }
    }

    /// Hard-delete instances written earlier in the same locked batch and
    /// announce each removal, so subscribers that saw the commit also see
    /// it go away. Returns how many were removed.
    pub async fn rollback(&self, guard: &ResourceGuard, instances: &[ReservationInstance]) -> usize {
        let mut removed = 0;
        for instance in instances {
            match self.store.delete_reservation(instance.id).await {
                Ok(()) => {
                    removed += 1;
                    self.notifier
                        .notify(Event::ReservationCancelled {
                            id: instance.id,
                            resource_id: instance.resource_id,
                            span: instance.span,
                        })
                        .await;
                }
                Err(e) => warn!(
                    reservation_id = %instance.id,
                    resource_id = %guard.resource_id,
                    "rollback delete failed: {e}"
                ),
            }
        }
        removed
    }

    pub async fn cancel(&self, id: Ulid) -> Result<ReservationInstance, SchedError> {
        let resource_id = self.reservation(id).await?.resource_id;
        let _guard = self.lock(resource_id).await;
        let mut r = self.reservation(id).await?;
        if !r.is_active() {
            return Err(SchedError::InvalidReservationState {
                id,
                status: r.status,
            });
        }
        r.status = ReservationStatus::Cancelled;
        self.store.update_reservation(r.clone()).await?;

        metrics::counter!(crate::observability::RESERVATIONS_CANCELLED_TOTAL).increment(1);
        info!(reservation_id = %id, %resource_id, "reservation cancelled");
        self.notifier
            .notify(Event::ReservationCancelled {
                id,
                resource_id,
                span: r.span,
            })
            .await;
        Ok(r)
    }

    /// PENDING → CONFIRMED, re-validated against everything else on the
    /// resource (a block may have landed since the hold was placed).
    pub async fn confirm(&self, id: Ulid) -> Result<ReservationInstance, SchedError> {
        let resource_id = self.reservation(id).await?.resource_id;
        let _guard = self.lock(resource_id).await;
        let mut r = self.reservation(id).await?;
        if r.status != ReservationStatus::Pending {
            return Err(SchedError::InvalidReservationState {
                id,
                status: r.status,
            });
        }
        self.checker
            .check_excluding(resource_id, r.span, &[id])
            .await?
            .into_result()?;

        r.status = ReservationStatus::Confirmed;
        self.store.update_reservation(r.clone()).await?;
        self.notifier
            .notify(Event::ReservationCommitted {
                id,
                resource_id,
                span: r.span,
                status: r.status,
            })
            .await;
        Ok(r)
    }

    /// Clear the series link so the instance lives on as a standalone booking.
    pub async fn detach(&self, id: Ulid) -> Result<ReservationInstance, SchedError> {
        let resource_id = self.reservation(id).await?.resource_id;
        let _guard = self.lock(resource_id).await;
        let mut r = self.reservation(id).await?;
        r.series_id = None;
        self.store.update_reservation(r.clone()).await?;
        Ok(r)
    }

    /// Move a reservation to `target` / `span`. The replacement is committed
    /// before the original is cancelled; both resources stay locked
    /// throughout. Returns `(cancelled_original, replacement)`.
    pub async fn move_reservation(
        &self,
        id: Ulid,
        target: Ulid,
        span: Span,
    ) -> Result<(ReservationInstance, ReservationInstance), SchedError> {
        let source = self.reservation(id).await?.resource_id;
        let guards = self.lock_many(&[source, target]).await;
        let target_guard = guards
            .iter()
            .find(|g| g.resource_id == target)
            .ok_or(SchedError::ResourceNotFound(target))?;

        let mut original = self.reservation(id).await?;
        if !original.is_active() {
            return Err(SchedError::InvalidReservationState {
                id,
                status: original.status,
            });
        }

        let request = BookingRequest {
            resource_id: target,
            span,
            purpose: original.purpose.clone(),
            requester: original.requester.clone(),
            series_id: original.series_id,
            status: original.status,
        };
        let replacement = self.commit_locked(target_guard, request, &[id]).await?;

        original.status = ReservationStatus::Cancelled;
        if let Err(e) = self.store.update_reservation(original.clone()).await {
            warn!(reservation_id = %id, "reassignment aborted, removing replacement: {e}");
            if let Err(e) = self.store.delete_reservation(replacement.id).await {
                warn!(reservation_id = %replacement.id, "replacement cleanup failed: {e}");
            }
            return Err(e.into());
        }
        self.notifier
            .notify(Event::ReservationCancelled {
                id,
                resource_id: source,
                span: original.span,
            })
            .await;
        Ok((original, replacement))
    }

    pub async fn add_block(&self, block: Block) -> Result<(), SchedError> {
        validate_span(&block.span)?;
        self.checker.resource(block.resource_id).await?;
        let _guard = self.lock(block.resource_id).await;
        info!(block_id = %block.id, resource_id = %block.resource_id, kind = ?block.kind, "block added");
        self.store.insert_block(block).await?;
        Ok(())
    }

    /// Removing a block only frees time, so it needs no lock.
    pub async fn remove_block(&self, id: Ulid) -> Result<Block, SchedError> {
        let block = self.store.delete_block(id).await?;
        info!(block_id = %id, resource_id = %block.resource_id, "block removed");
        Ok(block)
    }
}
