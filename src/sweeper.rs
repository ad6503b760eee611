use std::sync::Arc;
use std::time::Duration;

use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::engine::{ConflictResolutionEngine, WaitlistQueue};
use crate::model::Ms;

/// Background task that expires lapsed waitlist offers and cascades them to
/// the next entry in line. Each tick also drops finished waitlist entries
/// and resolved conflicts older than `retention_ms`. Runs until `shutdown`
/// is cancelled.
pub async fn run_sweeper(
    queue: Arc<WaitlistQueue>,
    resolver: Arc<ConflictResolutionEngine>,
    period: Duration,
    retention_ms: Ms,
    shutdown: CancellationToken,
) {
    let mut interval = tokio::time::interval(period);
    interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
    loop {
        tokio::select! {
            _ = shutdown.cancelled() => {
                debug!("waitlist sweeper stopped");
                return;
            }
            _ = interval.tick() => {}
        }
        match queue.expire_overdue().await {
            Ok(expired) => {
                for entry_id in expired {
                    info!("expired waitlist offer {entry_id}");
                }
            }
            // Retried on the next tick.
            Err(e) => warn!("waitlist sweep failed: {e}"),
        }
        let entries = queue.prune_retired(retention_ms).await;
        let conflicts = resolver.prune_resolved(retention_ms);
        if entries + conflicts > 0 {
            debug!(entries, conflicts, "sweep pruned finished records");
        }
    }
}
