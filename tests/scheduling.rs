use std::collections::BTreeSet;
use std::sync::Arc;

use serde_json::{Value, json};
use tokio::sync::broadcast;
use tokio_util::sync::CancellationToken;
use ulid::Ulid;

use slotkeeper::clock::ManualClock;
use slotkeeper::dto::*;
use slotkeeper::engine::InMemoryStore;
use slotkeeper::model::*;
use slotkeeper::notify::NotifyHub;
use slotkeeper::{BookingOutcome, BookingService, SchedError, Scheduler, SchedulerConfig};

// ── Test infrastructure ──────────────────────────────────────

/// 2024-12-01T00:00:00Z, well before every window booked below.
const NOW: Ms = 1_733_011_200_000;

struct Harness {
    service: BookingService,
    hub: Arc<NotifyHub>,
    store: Arc<InMemoryStore>,
}

fn harness() -> Harness {
    let store = Arc::new(InMemoryStore::new());
    let hub = Arc::new(NotifyHub::new());
    let scheduler = Scheduler::new(
        store.clone(),
        hub.clone(),
        Arc::new(ManualClock::new(NOW)),
        SchedulerConfig::default(),
    );
    Harness {
        service: BookingService::new(Arc::new(scheduler)),
        hub,
        store,
    }
}

fn add_room(h: &Harness, capacity: u32, features: &[&str], building: &str, campus: &str) -> Ulid {
    let id = Ulid::new();
    h.store.add_resource(ResourceProfile {
        id,
        name: Some(format!("room-{capacity}")),
        capacity,
        features: features.iter().map(|f| f.to_string()).collect::<BTreeSet<_>>(),
        location: Location::new(building, campus),
    });
    id
}

fn from_json<T: serde::de::DeserializeOwned>(v: Value) -> T {
    serde_json::from_value(v).unwrap()
}

fn drain(rx: &mut broadcast::Receiver<Event>) -> Vec<Event> {
    let mut out = Vec::new();
    while let Ok(ev) = rx.try_recv() {
        out.push(ev);
    }
    out
}

fn weekly_mon_wed(resource_id: Ulid, extra: Value) -> Value {
    let mut body = json!({
        "resourceId": resource_id,
        "startDate": "2025-01-06T10:00:00Z",
        "endDate": "2025-01-06T11:00:00Z",
        "purpose": "Seminar",
        "recurrencePattern": {
            "frequency": "WEEKLY",
            "interval": 1,
            "daysOfWeek": [1, 3],
            "occurrences": 4
        }
    });
    if let (Some(base), Some(more)) = (body.as_object_mut(), extra.as_object()) {
        for (k, v) in more {
            base.insert(k.clone(), v.clone());
        }
    }
    body
}

// ── Recurring reservations ───────────────────────────────────

#[tokio::test]
async fn preview_weekly_pattern() {
    let h = harness();
    let rid = add_room(&h, 20, &[], "A", "North");

    let resp = h
        .service
        .preview(from_json(json!({
            "resourceId": rid,
            "startDate": "2025-01-06T10:00:00Z",
            "endDate": "2025-01-06T11:00:00Z",
            "recurrencePattern": {
                "frequency": "WEEKLY",
                "interval": 1,
                "daysOfWeek": [1, 3],
                "occurrences": 4,
                "exceptions": ["2025-01-08"]
            },
            "limit": 3
        })))
        .await
        .unwrap();

    assert_eq!(resp.total_instances, 4);
    assert_eq!(resp.total_pages, 2);
    assert!(resp.has_more);
    let starts: Vec<String> = resp.occurrences.iter().map(|o| o.start_date.to_rfc3339()).collect();
    assert_eq!(
        starts,
        vec![
            "2025-01-06T10:00:00+00:00",
            "2025-01-08T10:00:00+00:00",
            "2025-01-13T10:00:00+00:00",
        ]
    );
    assert!(resp.occurrences[1].is_exception);

    let json = serde_json::to_value(&resp).unwrap();
    assert_eq!(json["pattern"]["frequency"], "WEEKLY");
    assert_eq!(json["occurrences"][0]["instanceNumber"], 1);
}

#[tokio::test]
async fn create_weekly_series_skips_exceptions() {
    let h = harness();
    let rid = add_room(&h, 20, &[], "A", "North");
    let mut rx = h.hub.subscribe(rid);

    let mut body = weekly_mon_wed(rid, json!({}));
    body["recurrencePattern"]["exceptions"] = json!(["2025-01-08"]);
    let resp = h
        .service
        .create_recurring(from_json(body), &CancellationToken::new())
        .await
        .unwrap();

    assert_eq!(resp.total_instances, 4);
    assert_eq!(resp.successful_instances, 3);
    assert!(resp.failed_instances.is_empty());
    assert_eq!(resp.skipped_exceptions.len(), 1);
    assert_eq!(resp.master_reservation_id, Some(resp.instances[0].id));
    assert!(resp.instances.iter().all(|r| r.series_id == Some(resp.series_id)));

    let committed = drain(&mut rx)
        .into_iter()
        .filter(|e| matches!(e, Event::ReservationCommitted { .. }))
        .count();
    assert_eq!(committed, 3);
}

#[tokio::test]
async fn all_or_none_reports_every_conflict() {
    let h = harness();
    let rid = add_room(&h, 20, &[], "A", "North");
    let scheduler = h.service.scheduler();
    let wed = Span::new(1_736_330_400_000, 1_736_334_000_000); // 2025-01-08 10:00-11:00Z
    let BookingOutcome::Committed(taken) = scheduler.book(BookingRequest::new(rid, wed)).await.unwrap() else {
        panic!("setup booking conflicted");
    };

    let resp = h
        .service
        .create_recurring(
            from_json(weekly_mon_wed(rid, json!({ "createAllOrNone": true }))),
            &CancellationToken::new(),
        )
        .await
        .unwrap();
    assert!(resp.aborted);
    assert_eq!(resp.successful_instances, 0);
    assert_eq!(resp.failed_instances.len(), 1);
    let failed = serde_json::to_value(&resp.failed_instances[0]).unwrap();
    assert_eq!(failed["reason"], "DOUBLE_BOOKING");
    assert_eq!(failed["instanceNumber"], 2);
    assert_eq!(failed["date"], "2025-01-08");
    assert_eq!(failed["conflictingReservationId"], json!(taken.id));

    // Nothing was left pending for an aborted batch.
    assert!(scheduler.resolver().pending(Some(rid)).await.is_empty());
}

#[tokio::test]
async fn contradictory_flags_rejected() {
    let h = harness();
    let rid = add_room(&h, 20, &[], "A", "North");
    let err = h
        .service
        .create_recurring(
            from_json(weekly_mon_wed(
                rid,
                json!({ "createAllOrNone": true, "skipConflicts": true }),
            )),
            &CancellationToken::new(),
        )
        .await
        .unwrap_err();
    assert!(matches!(err, SchedError::InvalidRequest(_)));
}

#[tokio::test]
async fn cancelled_token_stops_series() {
    let h = harness();
    let rid = add_room(&h, 20, &[], "A", "North");
    let token = CancellationToken::new();
    token.cancel();

    let resp = h
        .service
        .create_recurring(from_json(weekly_mon_wed(rid, json!({}))), &token)
        .await
        .unwrap();
    assert!(resp.cancelled);
    assert_eq!(resp.successful_instances, 0);
    assert!(resp.failed_instances.iter().all(|f| f.reason == "CANCELLED"));
}

#[tokio::test]
async fn cancel_series_is_idempotent() {
    let h = harness();
    let rid = add_room(&h, 20, &[], "A", "North");
    let resp = h
        .service
        .create_recurring(from_json(weekly_mon_wed(rid, json!({}))), &CancellationToken::new())
        .await
        .unwrap();

    let first = h.service.cancel_series(resp.series_id).await.unwrap();
    assert_eq!(first.len(), 4);
    assert!(first.iter().all(|r| r.status == ReservationStatus::Cancelled));
    assert!(h.service.cancel_series(resp.series_id).await.unwrap().is_empty());
}

// ── Conflicts and reassignment ───────────────────────────────

#[tokio::test]
async fn partial_series_conflict_auto_reassigned() {
    let h = harness();
    let rid = add_room(&h, 30, &["projector"], "A", "North");
    let near = add_room(&h, 32, &["projector"], "A", "North");
    let far = add_room(&h, 30, &["projector"], "Z", "South");
    let scheduler = h.service.scheduler();
    let wed = Span::new(1_736_330_400_000, 1_736_334_000_000);
    scheduler.book(BookingRequest::new(rid, wed)).await.unwrap();

    let resp = h
        .service
        .create_recurring(from_json(weekly_mon_wed(rid, json!({}))), &CancellationToken::new())
        .await
        .unwrap();
    assert_eq!(resp.successful_instances, 3);
    let conflict_id = resp.failed_instances[0].conflict_id.unwrap();

    let resolved = h
        .service
        .resolve_conflict(from_json(json!({
            "conflictId": conflict_id,
            "resolution": "AUTO_REASSIGN",
            "autoPick": true,
            "notes": "moved next door"
        })))
        .await
        .unwrap();
    assert_eq!(resolved.conflict.resolution, ResolutionState::AutoResolved);
    let booked = resolved.reservation.as_ref().unwrap();
    assert_eq!(booked.resource_id, near);
    assert_ne!(booked.resource_id, far);

    let json = serde_json::to_value(&resolved).unwrap();
    assert_eq!(json["conflict"]["type"], "DOUBLE_BOOKING");
    assert_eq!(json["conflict"]["severity"], "HIGH");
    assert_eq!(json["conflict"]["notes"], "moved next door");
}

#[tokio::test]
async fn resolve_twice_fails() {
    let h = harness();
    let rid = add_room(&h, 10, &[], "A", "North");
    let scheduler = h.service.scheduler();
    let span = Span::new(NOW + DAY_MS, NOW + DAY_MS + HOUR_MS);
    scheduler.book(BookingRequest::new(rid, span)).await.unwrap();
    let BookingOutcome::Conflicted(c) = scheduler.book(BookingRequest::new(rid, span)).await.unwrap() else {
        panic!("expected conflict");
    };

    let cancel: ResolveConflictRequest = from_json(json!({ "conflictId": c.id, "resolution": "CANCEL" }));
    h.service.resolve_conflict(cancel.clone()).await.unwrap();
    assert_eq!(
        h.service.resolve_conflict(cancel).await.unwrap_err(),
        SchedError::ConflictAlreadyResolved(c.id)
    );
}

#[tokio::test]
async fn reassignment_request_moves_booking() {
    let h = harness();
    let rid = add_room(&h, 40, &["lab"], "A", "North");
    let alt = add_room(&h, 40, &["lab"], "B", "North");
    let scheduler = h.service.scheduler();
    let span = Span::new(NOW + DAY_MS, NOW + DAY_MS + HOUR_MS);
    let BookingOutcome::Committed(r) = scheduler.book(BookingRequest::new(rid, span)).await.unwrap() else {
        panic!("setup booking conflicted");
    };

    let ranked = h.service.reassignment_suggestions(r.id).await.unwrap();
    assert_eq!(ranked.len(), 1);
    assert_eq!(ranked[0].resource_id, alt);
    assert_eq!(ranked[0].feature_score, 100.0);

    let resp = h
        .service
        .request_reassignment(from_json(json!({
            "reservationId": r.id,
            "newResourceId": alt,
            "reason": "MAINTENANCE",
            "notifyUser": true
        })))
        .await
        .unwrap();
    assert_eq!(resp.original.status, ReservationStatus::Cancelled);
    assert_eq!(resp.replacement.resource_id, alt);
    assert!(resp.notify_user);
}

// ── Waitlist ─────────────────────────────────────────────────

#[tokio::test]
async fn waitlist_offer_accept_flow() {
    let h = harness();
    let rid = add_room(&h, 10, &[], "A", "North");
    let mut rx = h.hub.subscribe(rid);
    let join = |priority: &str| {
        from_json::<JoinWaitlistRequest>(json!({
            "resourceId": rid,
            "desiredStart": "2025-02-03T09:00:00Z",
            "desiredEnd": "2025-02-03T10:00:00Z",
            "priority": priority
        }))
    };

    let normal = h.service.join_waitlist(join("NORMAL")).await.unwrap();
    let urgent = h.service.join_waitlist(join("URGENT")).await.unwrap();
    assert_eq!(normal.position, Some(1));
    assert_eq!(urgent.position, Some(1));

    let line = h.service.waitlist(rid).await;
    assert_eq!(
        line.iter().map(|e| (e.id, e.position)).collect::<Vec<_>>(),
        vec![(urgent.id, Some(1)), (normal.id, Some(2))]
    );

    let notified = h
        .service
        .notify_waitlist(from_json(json!({
            "resourceId": rid,
            "availableFrom": "2025-02-03T08:00:00Z",
            "availableUntil": "2025-02-03T12:00:00Z"
        })))
        .await
        .unwrap();
    assert_eq!(notified.len(), 1);
    assert_eq!(notified[0].id, urgent.id);
    assert!(notified[0].offer_expires_at.is_some());

    let resp = h
        .service
        .respond_waitlist(from_json(json!({ "entryId": urgent.id, "accepted": true })))
        .await
        .unwrap();
    assert_eq!(resp.entry.status, WaitlistStatus::Accepted);
    let reservation = resp.reservation.unwrap();
    assert_eq!(resp.entry.reservation_id, Some(reservation.id));

    let offered = drain(&mut rx)
        .into_iter()
        .filter(|e| matches!(e, Event::WaitlistOffered { .. }))
        .count();
    assert_eq!(offered, 1);
}

#[tokio::test]
async fn waitlist_decline_passes_offer_on() {
    let h = harness();
    let rid = add_room(&h, 10, &[], "A", "North");
    let body = json!({
        "resourceId": rid,
        "desiredStart": "2025-02-03T09:00:00Z",
        "desiredEnd": "2025-02-03T10:00:00Z"
    });
    let first = h.service.join_waitlist(from_json(body.clone())).await.unwrap();
    let second = h.service.join_waitlist(from_json(body)).await.unwrap();

    h.service
        .notify_waitlist(from_json(json!({
            "resourceId": rid,
            "availableFrom": "2025-02-03T09:00:00Z",
            "availableUntil": "2025-02-03T10:00:00Z",
            "notifyTop": 1
        })))
        .await
        .unwrap();

    let resp = h
        .service
        .respond_waitlist(from_json(json!({ "entryId": first.id, "accepted": false })))
        .await
        .unwrap();
    assert_eq!(resp.entry.status, WaitlistStatus::Expired);
    assert_eq!(resp.notified.len(), 1);
    assert_eq!(resp.notified[0].id, second.id);
    assert!(resp.reservation.is_none());
}

#[tokio::test]
async fn conflict_parked_on_waitlist_then_offered() {
    let h = harness();
    let rid = add_room(&h, 10, &[], "A", "North");
    let scheduler = h.service.scheduler();
    let span = Span::new(NOW + DAY_MS, NOW + DAY_MS + HOUR_MS);
    let BookingOutcome::Committed(holder) = scheduler.book(BookingRequest::new(rid, span)).await.unwrap() else {
        panic!("setup booking conflicted");
    };
    let BookingOutcome::Conflicted(c) = scheduler.book(BookingRequest::new(rid, span)).await.unwrap() else {
        panic!("expected conflict");
    };

    let resp = h
        .service
        .resolve_conflict(from_json(json!({
            "conflictId": c.id,
            "resolution": "WAITLIST",
            "priority": "HIGH"
        })))
        .await
        .unwrap();
    let entry = resp.waitlist_entry.unwrap();
    assert_eq!(entry.position, Some(1));
    assert_eq!(entry.priority, Priority::High);

    scheduler.cancel(holder.id).await.unwrap();
    let line = scheduler.waitlist().entry(entry.id).await.unwrap();
    assert_eq!(line.status, WaitlistStatus::Notified);
}

#[tokio::test]
async fn join_waitlist_rejects_bad_window() {
    let h = harness();
    let rid = add_room(&h, 10, &[], "A", "North");
    let err = h
        .service
        .join_waitlist(from_json(json!({
            "resourceId": rid,
            "desiredStart": "2025-02-03T10:00:00Z",
            "desiredEnd": "2025-02-03T09:00:00Z"
        })))
        .await
        .unwrap_err();
    assert!(matches!(err, SchedError::InvalidWindow(_)));
}
