use std::cmp::Ordering;
use std::sync::Arc;

use serde::Deserialize;
use ulid::Ulid;

use crate::model::*;

use super::availability::AvailabilityChecker;
use super::store::ReservationStore;
use super::SchedError;

const CAPACITY_WEIGHT: f64 = 0.4;
const FEATURE_WEIGHT: f64 = 0.4;
const LOCATION_WEIGHT: f64 = 0.2;

/// How close a candidate's location is to the original's, `0..=100`.
pub trait LocationPolicy: Send + Sync {
    fn score(&self, original: &Location, candidate: &Location) -> f64;
}

/// Same building > same campus > anywhere else.
#[derive(Debug, Clone, Copy, PartialEq, Deserialize)]
#[serde(default)]
pub struct TieredLocation {
    pub same_building: f64,
    pub same_campus: f64,
    pub elsewhere: f64,
}

impl Default for TieredLocation {
    fn default() -> Self {
        Self {
            same_building: 100.0,
            same_campus: 60.0,
            elsewhere: 20.0,
        }
    }
}

impl LocationPolicy for TieredLocation {
    fn score(&self, original: &Location, candidate: &Location) -> f64 {
        if original.campus == candidate.campus && original.building == candidate.building {
            self.same_building
        } else if original.campus == candidate.campus {
            self.same_campus
        } else {
            self.elsewhere
        }
    }
}

/// 100 at or above the original's capacity, falling linearly to 0 at half of
/// it. `None` below half: the room cannot host the event.
pub fn capacity_score(original: u32, candidate: u32) -> Option<f64> {
    if candidate >= original {
        return Some(100.0);
    }
    let floor = original as f64 / 2.0;
    let cand = candidate as f64;
    if cand < floor {
        return None;
    }
    Some((cand - floor) / (original as f64 - floor) * 100.0)
}

/// Share of the original's features the candidate also has.
pub fn feature_score(original: &ResourceProfile, candidate: &ResourceProfile) -> f64 {
    if original.features.is_empty() {
        return 100.0;
    }
    let shared = original.features.intersection(&candidate.features).count();
    shared as f64 / original.features.len() as f64 * 100.0
}

/// Weighted match score, or `None` if the candidate is below the capacity floor.
pub fn score(
    original: &ResourceProfile,
    candidate: &ResourceProfile,
    location: &dyn LocationPolicy,
) -> Option<(f64, ScoreBreakdown)> {
    let breakdown = ScoreBreakdown {
        capacity: capacity_score(original.capacity, candidate.capacity)?,
        features: feature_score(original, candidate),
        location: location.score(&original.location, &candidate.location),
    };
    let total = CAPACITY_WEIGHT * breakdown.capacity
        + FEATURE_WEIGHT * breakdown.features
        + LOCATION_WEIGHT * breakdown.location;
    Some((total, breakdown))
}

/// Available first, then score descending, then resource id ascending.
fn suggestion_order(a: &ReassignmentSuggestion, b: &ReassignmentSuggestion) -> Ordering {
    b.available
        .cmp(&a.available)
        .then(b.match_score.total_cmp(&a.match_score))
        .then(a.resource_id.cmp(&b.resource_id))
}

/// Ranks substitute resources for a reservation that cannot stay where it is.
pub struct ReassignmentMatcher {
    store: Arc<dyn ReservationStore>,
    checker: AvailabilityChecker,
    location: Arc<dyn LocationPolicy>,
}

impl ReassignmentMatcher {
    pub fn new(store: Arc<dyn ReservationStore>, location: Arc<dyn LocationPolicy>) -> Self {
        Self {
            checker: AvailabilityChecker::new(store.clone()),
            store,
            location,
        }
    }

    /// Score `candidates` against `original` for the window `span`.
    ///
    /// Candidates under the capacity floor are dropped; unavailable ones stay
    /// in the list but sort after every available one. `exclude` ids are
    /// ignored by the availability checks (the reservation being moved).
    pub async fn rank(
        &self,
        original: &ResourceProfile,
        span: Span,
        candidates: &[ResourceProfile],
        exclude: &[Ulid],
    ) -> Result<Vec<ReassignmentSuggestion>, SchedError> {
        let mut ranked = Vec::new();
        for candidate in candidates.iter().filter(|c| c.id != original.id) {
            let Some((match_score, breakdown)) = score(original, candidate, self.location.as_ref())
            else {
                continue;
            };
            let available = self
                .checker
                .check_excluding(candidate.id, span, exclude)
                .await?
                .is_free();
            ranked.push(ReassignmentSuggestion {
                resource_id: candidate.id,
                match_score,
                breakdown,
                available,
            });
        }
        if ranked.is_empty() {
            return Err(SchedError::NoAvailableCandidate);
        }
        ranked.sort_by(suggestion_order);
        Ok(ranked)
    }

    /// Rank every other resource in the store as a substitute for `resource_id`.
    pub async fn suggest(
        &self,
        resource_id: Ulid,
        span: Span,
        exclude: &[Ulid],
    ) -> Result<Vec<ReassignmentSuggestion>, SchedError> {
        let original = self.checker.resource(resource_id).await?;
        let candidates = self.store.resources().await?;
        self.rank(&original, span, &candidates, exclude).await
    }
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeSet;

    use super::*;

    fn room(capacity: u32, features: &[&str], building: &str, campus: &str) -> ResourceProfile {
        ResourceProfile {
            id: Ulid::new(),
            name: None,
            capacity,
            features: features.iter().map(|f| f.to_string()).collect::<BTreeSet<_>>(),
            location: Location::new(building, campus),
        }
    }

    fn close(a: f64, b: f64) -> bool {
        (a - b).abs() < 1e-9
    }

    #[test]
    fn capacity_linear_between_half_and_full() {
        assert_eq!(capacity_score(30, 35), Some(100.0));
        assert_eq!(capacity_score(30, 30), Some(100.0));
        assert_eq!(capacity_score(30, 15), Some(0.0));
        assert!(close(capacity_score(30, 24).unwrap(), 60.0));
        assert_eq!(capacity_score(30, 14), None);
        assert_eq!(capacity_score(0, 0), Some(100.0));
    }

    #[test]
    fn feature_share() {
        let original = room(30, &["projector", "ac"], "A", "Main");
        assert!(close(feature_score(&original, &room(35, &["projector"], "A", "Main")), 50.0));
        assert!(close(
            feature_score(&original, &room(35, &["projector", "ac", "whiteboard"], "A", "Main")),
            100.0
        ));
        assert!(close(feature_score(&original, &room(35, &[], "A", "Main")), 0.0));
        let bare = room(30, &[], "A", "Main");
        assert!(close(feature_score(&bare, &room(35, &[], "A", "Main")), 100.0));
    }

    #[test]
    fn tiered_location_policy() {
        let p = TieredLocation::default();
        let here = Location::new("A", "Main");
        assert!(close(p.score(&here, &Location::new("A", "Main")), 100.0));
        assert!(close(p.score(&here, &Location::new("B", "Main")), 60.0));
        assert!(close(p.score(&here, &Location::new("A", "East")), 20.0));
    }

    #[test]
    fn weighted_score_projector_example() {
        let original = room(30, &["projector", "ac"], "A", "Main");
        let candidate = room(35, &["projector"], "A", "Main");
        let (total, breakdown) = score(&original, &candidate, &TieredLocation::default()).unwrap();
        assert!(close(breakdown.capacity, 100.0));
        assert!(close(breakdown.features, 50.0));
        assert!(close(total, 0.4 * 100.0 + 0.4 * 50.0 + 0.2 * breakdown.location));
        assert!(close(total, 80.0));
    }

    #[test]
    fn below_capacity_floor_excluded() {
        let original = room(30, &[], "A", "Main");
        assert!(score(&original, &room(10, &[], "A", "Main"), &TieredLocation::default()).is_none());
    }

    #[test]
    fn ordering_available_then_score_then_id() {
        let mut ids = [Ulid::new(), Ulid::new(), Ulid::new(), Ulid::new()];
        ids.sort();
        let s = |id, score, available| ReassignmentSuggestion {
            resource_id: id,
            match_score: score,
            breakdown: ScoreBreakdown {
                capacity: 0.0,
                features: 0.0,
                location: 0.0,
            },
            available,
        };
        let mut list = vec![
            s(ids[0], 99.0, false),
            s(ids[3], 70.0, true),
            s(ids[2], 80.0, true),
            s(ids[1], 80.0, true),
        ];
        list.sort_by(suggestion_order);
        let order: Vec<Ulid> = list.iter().map(|s| s.resource_id).collect();
        assert_eq!(order, vec![ids[1], ids[2], ids[3], ids[0]]);
    }
}
