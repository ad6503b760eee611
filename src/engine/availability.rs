use std::sync::Arc;

use tracing::debug;
use ulid::Ulid;

use crate::limits::*;
use crate::model::*;

use super::store::ReservationStore;
use super::SchedError;

/// Result of an availability check.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Verdict {
    Free,
    Conflict {
        /// Highest-precedence cause found.
        conflict_type: ConflictType,
        /// Every overlapping block/reservation, primary cause first.
        competing: Vec<Ulid>,
    },
}

impl Verdict {
    pub fn is_free(&self) -> bool {
        matches!(self, Verdict::Free)
    }

    /// Turn a conflict into the recoverable error the commit paths return.
    pub fn into_result(self) -> Result<(), SchedError> {
        match self {
            Verdict::Free => Ok(()),
            Verdict::Conflict {
                conflict_type,
                competing,
            } => Err(SchedError::StillConflicting {
                conflict_type,
                competing,
            }),
        }
    }
}

pub(crate) fn validate_span(span: &Span) -> Result<(), SchedError> {
    if span.start >= span.end {
        return Err(SchedError::InvalidWindow("start must be before end"));
    }
    if span.start < MIN_VALID_TIMESTAMP_MS || span.end > MAX_VALID_TIMESTAMP_MS {
        return Err(SchedError::InvalidWindow("timestamp out of range"));
    }
    if span.duration_ms() > MAX_SPAN_DURATION_MS {
        return Err(SchedError::InvalidWindow("span too wide"));
    }
    Ok(())
}

/// Classify `span` against what is already on the resource.
///
/// Precedence: institutional block > maintenance block > confirmed
/// reservation (double booking) > pending reservation (overlap). Cancelled
/// reservations and anything listed in `exclude` are ignored.
pub fn classify(
    span: &Span,
    reservations: &[ReservationInstance],
    blocks: &[Block],
    exclude: &[Ulid],
) -> Verdict {
    let mut causes: Vec<(ConflictType, Ulid)> = Vec::new();

    for b in blocks {
        if b.span.overlaps(span) && !exclude.contains(&b.id) {
            causes.push((b.kind.into(), b.id));
        }
    }
    for r in reservations {
        if !r.span.overlaps(span) || exclude.contains(&r.id) {
            continue;
        }
        match r.status {
            ReservationStatus::Confirmed => causes.push((ConflictType::DoubleBooking, r.id)),
            ReservationStatus::Pending => causes.push((ConflictType::Overlap, r.id)),
            ReservationStatus::Cancelled => {}
        }
    }

    if causes.is_empty() {
        return Verdict::Free;
    }
    // Stable sort keeps store order within the same cause.
    causes.sort_by(|a, b| b.0.cmp(&a.0));
    Verdict::Conflict {
        conflict_type: causes[0].0,
        competing: causes.into_iter().map(|(_, id)| id).collect(),
    }
}

/// Merge sorted overlapping/adjacent intervals into disjoint intervals.
pub fn merge_overlapping(sorted: &[Span]) -> Vec<Span> {
    let mut merged: Vec<Span> = Vec::new();
    for &span in sorted {
        if let Some(last) = merged.last_mut()
            && span.start <= last.end
        {
            last.end = last.end.max(span.end);
            continue;
        }
        merged.push(span);
    }
    merged
}

/// Remove sorted, disjoint `to_remove` spans from sorted `base` spans.
pub fn subtract_intervals(base: &[Span], to_remove: &[Span]) -> Vec<Span> {
    let mut result = Vec::new();
    let mut ri = 0;

    for &b in base {
        let mut current_start = b.start;
        let current_end = b.end;

        while ri < to_remove.len() && to_remove[ri].end <= current_start {
            ri += 1;
        }

        let mut j = ri;
        while j < to_remove.len() && to_remove[j].start < current_end {
            let r = &to_remove[j];
            if r.start > current_start {
                result.push(Span::new(current_start, r.start));
            }
            current_start = current_start.max(r.end);
            j += 1;
        }

        if current_start < current_end {
            result.push(Span::new(current_start, current_end));
        }
    }

    result
}

/// Read-only view over the store answering "is this resource free then?".
#[derive(Clone)]
pub struct AvailabilityChecker {
    store: Arc<dyn ReservationStore>,
}

impl AvailabilityChecker {
    pub fn new(store: Arc<dyn ReservationStore>) -> Self {
        Self { store }
    }

    pub async fn resource(&self, resource_id: Ulid) -> Result<ResourceProfile, SchedError> {
        self.store
            .resource(resource_id)
            .await?
            .ok_or(SchedError::ResourceNotFound(resource_id))
    }

    pub async fn check(&self, resource_id: Ulid, span: Span) -> Result<Verdict, SchedError> {
        self.check_excluding(resource_id, span, &[]).await
    }

    /// Same as `check`, ignoring the listed block/reservation ids (used when a
    /// reservation is re-validated against its own resource).
    pub async fn check_excluding(
        &self,
        resource_id: Ulid,
        span: Span,
        exclude: &[Ulid],
    ) -> Result<Verdict, SchedError> {
        validate_span(&span)?;
        self.resource(resource_id).await?;
        let reservations = self.store.reservations_overlapping(resource_id, span).await?;
        let blocks = self.store.blocks_overlapping(resource_id, span).await?;
        let verdict = classify(&span, &reservations, &blocks, exclude);
        debug!(%resource_id, start = span.start, end = span.end, ?verdict, "availability check");
        Ok(verdict)
    }

    /// Bookable sub-windows of `query`, sorted and disjoint.
    pub async fn free_windows(
        &self,
        resource_id: Ulid,
        query: Span,
        min_duration_ms: Option<Ms>,
    ) -> Result<Vec<Span>, SchedError> {
        if query.start >= query.end {
            return Err(SchedError::InvalidWindow("start must be before end"));
        }
        if query.duration_ms() > MAX_QUERY_WINDOW_MS {
            return Err(SchedError::InvalidWindow("query window too wide"));
        }
        self.resource(resource_id).await?;

        let reservations = self.store.reservations_overlapping(resource_id, query).await?;
        let blocks = self.store.blocks_overlapping(resource_id, query).await?;

        let mut busy: Vec<Span> = blocks
            .iter()
            .map(|b| b.span)
            .chain(reservations.iter().filter(|r| r.is_active()).map(|r| r.span))
            .map(|s| Span::new(s.start.max(query.start), s.end.min(query.end)))
            .collect();
        busy.sort_by_key(|s| s.start);
        let busy = merge_overlapping(&busy);

        let mut free = subtract_intervals(&[query], &busy);
        if let Some(min_dur) = min_duration_ms {
            free.retain(|span| span.duration_ms() >= min_dur);
        }
        Ok(free)
    }
}
