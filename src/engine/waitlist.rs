//! Priority waitlist with offer cascades.
//!
//! Entries queue per `(resource, day of the desired window)`. When a slot
//! frees up, the head entry whose desired window overlaps it (and is now
//! free) gets an offer with a deadline. Declines and lapsed offers pass the
//! slot to the next entry in line.
//!
//! Entry lifecycle:
//! ```text
//! WAITING ──offer──▶ NOTIFIED ──accept──▶ ACCEPTED
//!    │                  ├──decline/timeout──▶ EXPIRED
//!    └──cancel──▶ CANCELLED ◀──cancel──┘
//! ```
//! A failed accept (slot taken meanwhile) sends the entry back to WAITING
//! with its original place in line.
//!
//! All state lives in one arena behind one async mutex. Release events, user
//! responses, and the expiry sweep all go through it, so the same freed slot
//! is never offered twice concurrently.

use std::cmp::Ordering;
use std::collections::HashMap;
use std::sync::Arc;

use chrono::NaiveDate;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};
use ulid::Ulid;

use crate::clock::Clock;
use crate::model::*;
use crate::notify::Notifier;
use crate::recurrence::date_of;

use super::availability::validate_span;
use super::ledger::Ledger;
use super::SchedError;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WaitlistRequest {
    pub resource_id: Ulid,
    pub desired: Span,
    pub priority: Priority,
    pub requester: Option<String>,
    pub purpose: Option<String>,
}

impl WaitlistRequest {
    pub fn new(resource_id: Ulid, desired: Span, priority: Priority) -> Self {
        Self {
            resource_id,
            desired,
            priority,
            requester: None,
            purpose: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WaitlistResponse {
    Accepted {
        entry: WaitlistEntry,
        reservation: ReservationInstance,
    },
    Declined {
        entry: WaitlistEntry,
        /// Entries offered the slot next.
        notified: Vec<WaitlistEntry>,
    },
    /// Declining an offer that already lapsed changes nothing.
    AlreadyExpired { entry: WaitlistEntry },
}

/// URGENT first, then FIFO by request time.
fn queue_order(a: &WaitlistEntry, b: &WaitlistEntry) -> Ordering {
    b.priority
        .cmp(&a.priority)
        .then(a.requested_at.cmp(&b.requested_at))
        .then(a.id.cmp(&b.id))
}

fn day_of(entry: &WaitlistEntry) -> Option<NaiveDate> {
    date_of(entry.desired.start)
}

#[derive(Default)]
struct Arena {
    /// WAITING and NOTIFIED entries.
    active: HashMap<Ulid, WaitlistEntry>,
    /// Terminal entries with their retirement time, kept so late responses
    /// can be answered until the sweeper prunes them.
    retired: HashMap<Ulid, (Ms, WaitlistEntry)>,
}

impl Arena {
    fn get(&self, id: &Ulid) -> Option<&WaitlistEntry> {
        self.active
            .get(id)
            .or_else(|| self.retired.get(id).map(|(_, e)| e))
    }

    fn retired(&self, id: &Ulid) -> Option<&WaitlistEntry> {
        self.retired.get(id).map(|(_, e)| e)
    }

    fn retire(&mut self, id: Ulid, status: WaitlistStatus, now: Ms) -> Option<WaitlistEntry> {
        let mut entry = self.active.remove(&id)?;
        entry.status = status;
        self.retired.insert(id, (now, entry.clone()));
        Some(entry)
    }

    /// WAITING entries for one resource, in queue order.
    fn waiting(&self, resource_id: Ulid) -> Vec<&WaitlistEntry> {
        let mut queue: Vec<&WaitlistEntry> = self
            .active
            .values()
            .filter(|e| e.resource_id == resource_id && e.status == WaitlistStatus::Waiting)
            .collect();
        queue.sort_by(|a, b| queue_order(a, b));
        queue
    }

    /// Open offers on `resource_id` touching `span`.
    fn outstanding(&self, resource_id: Ulid, span: &Span) -> usize {
        self.active
            .values()
            .filter(|e| {
                e.resource_id == resource_id
                    && e.status == WaitlistStatus::Notified
                    && e.desired.overlaps(span)
            })
            .count()
    }
}

pub struct WaitlistQueue {
    arena: Mutex<Arena>,
    ledger: Arc<Ledger>,
    notifier: Arc<dyn Notifier>,
    clock: Arc<dyn Clock>,
    offer_timeout_ms: Ms,
}

impl WaitlistQueue {
    pub fn new(
        ledger: Arc<Ledger>,
        notifier: Arc<dyn Notifier>,
        clock: Arc<dyn Clock>,
        offer_timeout_ms: Ms,
    ) -> Self {
        Self {
            arena: Mutex::new(Arena::default()),
            ledger,
            notifier,
            clock,
            offer_timeout_ms,
        }
    }

    pub async fn enqueue(&self, request: WaitlistRequest) -> Result<WaitlistEntry, SchedError> {
        validate_span(&request.desired)?;
        self.ledger.checker().resource(request.resource_id).await?;

        let entry = WaitlistEntry {
            id: Ulid::new(),
            resource_id: request.resource_id,
            desired: request.desired,
            priority: request.priority,
            requested_at: self.clock.now_ms(),
            status: WaitlistStatus::Waiting,
            requester: request.requester,
            purpose: request.purpose,
            notified_at: None,
            offer_expires_at: None,
            reservation_id: None,
        };

        let mut arena = self.arena.lock().await;
        arena.active.insert(entry.id, entry.clone());
        metrics::gauge!(crate::observability::WAITLIST_ACTIVE).set(arena.active.len() as f64);
        info!(entry_id = %entry.id, resource_id = %entry.resource_id, priority = ?entry.priority, "waitlist entry queued");
        Ok(entry)
    }

    pub async fn entry(&self, id: Ulid) -> Option<WaitlistEntry> {
        self.arena.lock().await.get(&id).cloned()
    }

    /// 1-based rank among WAITING entries for the same resource and day.
    /// `None` once the entry is no longer waiting.
    pub async fn position(&self, id: Ulid) -> Result<Option<usize>, SchedError> {
        let arena = self.arena.lock().await;
        let entry = arena.get(&id).ok_or(SchedError::NotFound(id))?;
        if entry.status != WaitlistStatus::Waiting {
            return Ok(None);
        }
        let day = day_of(entry);
        Ok(arena
            .waiting(entry.resource_id)
            .into_iter()
            .filter(|e| day_of(e) == day)
            .position(|e| e.id == id)
            .map(|p| p + 1))
    }

    /// WAITING entries for a resource with their derived positions, grouped
    /// by day.
    pub async fn entries(&self, resource_id: Ulid) -> Vec<(WaitlistEntry, usize)> {
        let arena = self.arena.lock().await;
        let mut queue = arena.waiting(resource_id);
        queue.sort_by(|a, b| day_of(a).cmp(&day_of(b)).then(queue_order(a, b)));

        let mut out = Vec::with_capacity(queue.len());
        let mut current_day = None;
        let mut pos = 0;
        for e in queue {
            let day = day_of(e);
            if out.is_empty() || day != current_day {
                current_day = day;
                pos = 0;
            }
            pos += 1;
            out.push((e.clone(), pos));
        }
        out
    }

    /// A slot on `resource_id` opened up: offer it to the head entries whose
    /// desired window overlaps `span`, keeping at most `notify_top` offers
    /// open for it. Repeating the same release is a no-op while its offers
    /// are outstanding.
    pub async fn on_resource_released(
        &self,
        resource_id: Ulid,
        span: Span,
        notify_top: usize,
    ) -> Result<Vec<WaitlistEntry>, SchedError> {
        let mut arena = self.arena.lock().await;
        self.offer_locked(&mut arena, resource_id, span, notify_top.max(1))
            .await
    }

    /// Answer an offer. Accepting books the desired window (optionally on
    /// `new_resource_id` instead); declining passes the slot on.
    pub async fn respond(
        &self,
        entry_id: Ulid,
        accept: bool,
        new_resource_id: Option<Ulid>,
    ) -> Result<WaitlistResponse, SchedError> {
        let mut arena = self.arena.lock().await;

        if let Some(done) = arena.retired(&entry_id) {
            if !accept && done.status == WaitlistStatus::Expired {
                return Ok(WaitlistResponse::AlreadyExpired {
                    entry: done.clone(),
                });
            }
            return Err(SchedError::InvalidWaitlistTransition {
                entry_id,
                status: done.status,
            });
        }

        let entry = arena
            .active
            .get(&entry_id)
            .cloned()
            .ok_or(SchedError::NotFound(entry_id))?;
        if entry.status != WaitlistStatus::Notified {
            return Err(SchedError::InvalidWaitlistTransition {
                entry_id,
                status: entry.status,
            });
        }

        let now = self.clock.now_ms();
        if entry.offer_expires_at.is_some_and(|deadline| deadline <= now) {
            let (expired, _) = self.expire_locked(&mut arena, entry_id).await?;
            if accept {
                return Err(SchedError::InvalidWaitlistTransition {
                    entry_id,
                    status: WaitlistStatus::Expired,
                });
            }
            return Ok(WaitlistResponse::AlreadyExpired { entry: expired });
        }

        if !accept {
            let (declined, notified) = self.expire_locked(&mut arena, entry_id).await?;
            return Ok(WaitlistResponse::Declined {
                entry: declined,
                notified,
            });
        }

        let target = new_resource_id.unwrap_or(entry.resource_id);
        let request = BookingRequest {
            resource_id: target,
            span: entry.desired,
            purpose: entry.purpose.clone(),
            requester: entry.requester.clone(),
            series_id: None,
            status: ReservationStatus::Confirmed,
        };
        match self.ledger.commit(request).await {
            Ok(reservation) => {
                if let Some(e) = arena.active.get_mut(&entry_id) {
                    e.reservation_id = Some(reservation.id);
                }
                let accepted = arena
                    .retire(entry_id, WaitlistStatus::Accepted, self.clock.now_ms())
                    .ok_or(SchedError::NotFound(entry_id))?;
                metrics::gauge!(crate::observability::WAITLIST_ACTIVE).set(arena.active.len() as f64);
                info!(%entry_id, reservation_id = %reservation.id, "waitlist offer accepted");

                // Taken elsewhere: the original slot is still open for the next in line.
                if target != entry.resource_id {
                    self.cascade_locked(&mut arena, entry.resource_id, entry.desired)
                        .await;
                }
                Ok(WaitlistResponse::Accepted {
                    entry: accepted,
                    reservation,
                })
            }
            Err(e @ SchedError::StillConflicting { .. }) => {
                if let Some(back) = arena.active.get_mut(&entry_id) {
                    back.status = WaitlistStatus::Waiting;
                    back.notified_at = None;
                    back.offer_expires_at = None;
                }
                debug!(%entry_id, "offer accepted too late, entry back in line");
                Err(e)
            }
            Err(e) => Err(e),
        }
    }

    /// Withdraw an entry. Cancelling an open offer passes the slot on.
    pub async fn cancel(&self, entry_id: Ulid) -> Result<WaitlistEntry, SchedError> {
        let mut arena = self.arena.lock().await;
        if let Some(done) = arena.retired(&entry_id) {
            return Err(SchedError::InvalidWaitlistTransition {
                entry_id,
                status: done.status,
            });
        }
        let was_notified = arena
            .active
            .get(&entry_id)
            .ok_or(SchedError::NotFound(entry_id))?
            .status
            == WaitlistStatus::Notified;

        let cancelled = arena
            .retire(entry_id, WaitlistStatus::Cancelled, self.clock.now_ms())
            .ok_or(SchedError::NotFound(entry_id))?;
        metrics::gauge!(crate::observability::WAITLIST_ACTIVE).set(arena.active.len() as f64);
        info!(%entry_id, "waitlist entry cancelled");

        if was_notified {
            self.cascade_locked(&mut arena, cancelled.resource_id, cancelled.desired)
                .await;
        }
        Ok(cancelled)
    }

    /// Expire every offer past its deadline and cascade each freed slot.
    /// Driven periodically by the sweeper. Returns the expired entry ids.
    pub async fn expire_overdue(&self) -> Result<Vec<Ulid>, SchedError> {
        let mut arena = self.arena.lock().await;
        let now = self.clock.now_ms();

        let mut overdue: Vec<(Ms, Ulid)> = arena
            .active
            .values()
            .filter(|e| e.status == WaitlistStatus::Notified)
            .filter_map(|e| e.offer_expires_at.filter(|d| *d <= now).map(|d| (d, e.id)))
            .collect();
        overdue.sort();

        let mut expired = Vec::with_capacity(overdue.len());
        for (_, id) in overdue {
            self.expire_locked(&mut arena, id).await?;
            expired.push(id);
        }
        Ok(expired)
    }

    /// Drop terminal entries retired more than `retain_ms` ago. Once pruned,
    /// an entry id is reported as unknown. Returns how many were dropped.
    pub async fn prune_retired(&self, retain_ms: Ms) -> usize {
        let mut arena = self.arena.lock().await;
        let cutoff = self.clock.now_ms() - retain_ms;
        let before = arena.retired.len();
        arena.retired.retain(|_, (at, _)| *at > cutoff);
        let pruned = before - arena.retired.len();
        if pruned > 0 {
            debug!(pruned, "retired waitlist entries pruned");
        }
        pruned
    }

    /// NOTIFIED → EXPIRED, then offer the slot to the next entry.
    async fn expire_locked(
        &self,
        arena: &mut Arena,
        entry_id: Ulid,
    ) -> Result<(WaitlistEntry, Vec<WaitlistEntry>), SchedError> {
        let expired = arena
            .retire(entry_id, WaitlistStatus::Expired, self.clock.now_ms())
            .ok_or(SchedError::NotFound(entry_id))?;
        metrics::counter!(crate::observability::WAITLIST_EXPIRED_TOTAL).increment(1);
        metrics::gauge!(crate::observability::WAITLIST_ACTIVE).set(arena.active.len() as f64);
        info!(%entry_id, resource_id = %expired.resource_id, "waitlist offer expired");
        self.notifier
            .notify(Event::WaitlistExpired {
                entry_id,
                resource_id: expired.resource_id,
            })
            .await;

        let notified = self
            .cascade_locked(arena, expired.resource_id, expired.desired)
            .await;
        Ok((expired, notified))
    }

    /// Replace one closed offer with the next candidate.
    ///
    /// The closing transition has already happened when this runs, so a
    /// failure here is logged and yields no new offers; the slot is picked
    /// up again by the next release on the resource.
    async fn cascade_locked(
        &self,
        arena: &mut Arena,
        resource_id: Ulid,
        span: Span,
    ) -> Vec<WaitlistEntry> {
        let budget = arena.outstanding(resource_id, &span) + 1;
        match self.offer_locked(arena, resource_id, span, budget).await {
            Ok(notified) => notified,
            Err(e) => {
                warn!(%resource_id, "waitlist cascade failed: {e}");
                Vec::new()
            }
        }
    }

    /// Pick head entries, transition, notify. The only place offers are made.
    async fn offer_locked(
        &self,
        arena: &mut Arena,
        resource_id: Ulid,
        span: Span,
        max_outstanding: usize,
    ) -> Result<Vec<WaitlistEntry>, SchedError> {
        let mut slots = max_outstanding.saturating_sub(arena.outstanding(resource_id, &span));
        if slots == 0 {
            debug!(%resource_id, "release already has open offers");
            return Ok(Vec::new());
        }

        let candidates: Vec<(Ulid, Span)> = arena
            .waiting(resource_id)
            .into_iter()
            .filter(|e| e.desired.overlaps(&span))
            .map(|e| (e.id, e.desired))
            .collect();

        let mut notified = Vec::new();
        for (id, desired) in candidates {
            if slots == 0 {
                break;
            }
            // Only part of the desired window may have opened up.
            if !self.ledger.checker().check(resource_id, desired).await?.is_free() {
                continue;
            }
            let Some(entry) = arena.active.get_mut(&id) else {
                continue;
            };
            if entry.notified_at.is_some() {
                continue;
            }

            let now = self.clock.now_ms();
            let expires_at = now + self.offer_timeout_ms;
            entry.status = WaitlistStatus::Notified;
            entry.notified_at = Some(now);
            entry.offer_expires_at = Some(expires_at);
            let offered = entry.clone();

            self.notifier
                .notify(Event::WaitlistOffered {
                    entry_id: id,
                    resource_id,
                    span: desired,
                    expires_at,
                })
                .await;
            metrics::counter!(crate::observability::WAITLIST_NOTIFICATIONS_TOTAL).increment(1);
            info!(entry_id = %id, %resource_id, expires_at, "waitlist offer sent");

            notified.push(offered);
            slots -= 1;
        }
        Ok(notified)
    }
}
