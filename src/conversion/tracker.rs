//! Processing status tracking.
//!
//! The tracker owns every status change after intake. Each change is a
//! conditional database update scoped to the item's current plan, so
//! concurrent reports for the same item serialize in SQLite: the first one
//! wins and later ones come back as [`Reported::Ignored`]. No lock is held
//! while a capability runs.

use std::time::Duration;

use chrono::{DateTime, Utc};
use mediagate_common::{
    ExecutionSite, MediaItemId, PlanId, ProcessingMetrics, ProcessingPath, ProcessingStatus,
};
use mediagate_db::models::{ConversionPlan, MediaItem};
use mediagate_db::pool::{get_conn, DbPool};
use mediagate_db::queries::{conversion_plans, media_items};
use mediagate_db::queries::media_items::{PlanEntry, SuccessRecord};
use thiserror::Error;
use tracing::{debug, info, warn};

use super::capability::{ProcessingOutcome, SuccessReport};
use crate::events::{EventBus, MediaEvent};

/// Failure reason recorded for local jobs cut short by a restart.
pub const INTERRUPTED_REASON: &str = "Interrupted by server restart";

#[derive(Debug, Error)]
pub enum TrackerError {
    #[error("Media item not found: {0}")]
    NotFound(MediaItemId),

    #[error("Plan {plan_id} was not issued for media item {item_id}")]
    UnknownPlan {
        item_id: MediaItemId,
        plan_id: PlanId,
    },

    #[error("Media item {item_id} is {status} and cannot take a new plan")]
    InvalidTransition {
        item_id: MediaItemId,
        status: ProcessingStatus,
    },

    #[error(transparent)]
    Database(#[from] mediagate_common::Error),
}

/// Result of applying a plan.
#[derive(Debug, Clone)]
pub enum PlanApplied {
    /// The item entered `processing`/`server_processing`; the job must be run.
    Started(MediaItem),
    /// Passthrough plan; the item is already `processed`.
    Completed(MediaItem),
    /// The item was already in flight; the plan was dropped.
    Ignored(MediaItem),
}

impl PlanApplied {
    pub fn item(&self) -> &MediaItem {
        match self {
            Self::Started(item) | Self::Completed(item) | Self::Ignored(item) => item,
        }
    }
}

/// Result of reporting an outcome.
#[derive(Debug, Clone)]
pub enum Reported {
    Applied(MediaItem),
    /// Stale or duplicate report; the item is unchanged.
    Ignored(MediaItem),
}

impl Reported {
    pub fn item(&self) -> &MediaItem {
        match self {
            Self::Applied(item) | Self::Ignored(item) => item,
        }
    }
}

/// Per-item processing state machine backed by the database.
pub struct ProcessingTracker {
    pool: DbPool,
    events: EventBus,
    /// How long a remote job may run before it is failed with `Timeout`.
    remote_timeout: Duration,
}

impl ProcessingTracker {
    pub fn new(pool: DbPool, events: EventBus, remote_timeout: Duration) -> Self {
        Self {
            pool,
            events,
            remote_timeout,
        }
    }

    pub fn get(&self, item_id: MediaItemId) -> Result<MediaItem, TrackerError> {
        let conn = get_conn(&self.pool)?;
        media_items::get_media_item(&conn, item_id)?.ok_or(TrackerError::NotFound(item_id))
    }

    /// Apply an issued plan to its item.
    ///
    /// A pending item enters the plan's entry status. An item already in
    /// flight ignores the plan, so a duplicate submission never starts a
    /// second job. Terminal items reject new plans.
    pub fn apply_plan(&self, plan: &ConversionPlan) -> Result<PlanApplied, TrackerError> {
        let conn = get_conn(&self.pool)?;
        let item = media_items::get_media_item(&conn, plan.item_id)?
            .ok_or(TrackerError::NotFound(plan.item_id))?;

        if let Some(outcome) = Self::check_plan_target(&item, plan)? {
            return Ok(outcome);
        }

        let entry = if plan.is_passthrough() {
            PlanEntry::Complete {
                processed_path: &item.source_path,
                metrics: ProcessingMetrics::passthrough(),
            }
        } else {
            let deadline_at = match plan.execution_site {
                ExecutionSite::Remote => Some(self.deadline_from(Utc::now())),
                ExecutionSite::Local => None,
            };
            PlanEntry::Start { deadline_at }
        };

        let applied = media_items::apply_plan(&conn, plan, entry)?;
        let item = media_items::get_media_item(&conn, plan.item_id)?
            .ok_or(TrackerError::NotFound(plan.item_id))?;
        drop(conn);

        if !applied {
            // Lost a race with another plan for the same item
            return match Self::check_plan_target(&item, plan)? {
                Some(outcome) => Ok(outcome),
                None => Ok(PlanApplied::Ignored(item)),
            };
        }

        info!(
            item_id = %item.id,
            plan_id = %plan.id,
            route = %plan.route,
            site = %plan.execution_site,
            status = %item.processing_status,
            "Applied conversion plan"
        );

        if plan.is_passthrough() {
            Ok(PlanApplied::Completed(item))
        } else {
            Ok(PlanApplied::Started(item))
        }
    }

    /// `None` when the plan may be applied to the item as it stands.
    fn check_plan_target(
        item: &MediaItem,
        plan: &ConversionPlan,
    ) -> Result<Option<PlanApplied>, TrackerError> {
        let status = item.processing_status;
        if status.can_transition_to(plan.entry_status()) {
            return Ok(None);
        }
        if status.is_in_flight() {
            debug!(item_id = %item.id, "Item already in flight; ignoring new plan");
            return Ok(Some(PlanApplied::Ignored(item.clone())));
        }
        Err(TrackerError::InvalidTransition {
            item_id: item.id,
            status,
        })
    }

    /// Record the outcome of a job.
    ///
    /// Idempotent: a report for a plan that is no longer current, or for an
    /// item that already reached a terminal state, changes nothing.
    pub fn report_outcome(
        &self,
        item_id: MediaItemId,
        plan_id: PlanId,
        outcome: ProcessingOutcome,
    ) -> Result<Reported, TrackerError> {
        let conn = get_conn(&self.pool)?;
        let item = media_items::get_media_item(&conn, item_id)?
            .ok_or(TrackerError::NotFound(item_id))?;
        let plan = conversion_plans::get_plan(&conn, plan_id)?
            .filter(|plan| plan.item_id == item_id)
            .ok_or(TrackerError::UnknownPlan { item_id, plan_id })?;

        if item.current_plan_id != Some(plan_id)
            || !item.processing_status.can_transition_to(outcome.status())
        {
            debug!(
                item_id = %item_id,
                plan_id = %plan_id,
                status = %item.processing_status,
                "Ignoring outcome the item's current plan and status do not allow"
            );
            return Ok(Reported::Ignored(item));
        }

        let changed = match &outcome {
            ProcessingOutcome::Success(report) => {
                let route = accepted_route(&plan, report);
                let variants: Vec<_> = report
                    .quality_variants
                    .iter()
                    .filter(|(label, _)| {
                        let requested = plan.requests(**label);
                        if !requested {
                            warn!(item_id = %item_id, label = %label, "Dropping unrequested variant");
                        }
                        requested
                    })
                    .map(|(label, path)| (*label, path.clone()))
                    .collect();

                media_items::record_success(
                    &conn,
                    item_id,
                    plan_id,
                    &SuccessRecord {
                        route,
                        processed_path: &report.processed_path,
                        thumbnail_path: report.thumbnail_path.as_deref(),
                        metrics: report.metrics,
                        variants: &variants,
                    },
                )?
            }
            ProcessingOutcome::Failure { cause } => {
                media_items::record_failure(&conn, item_id, plan_id, cause)?
            }
        };

        let item = media_items::get_media_item(&conn, item_id)?
            .ok_or(TrackerError::NotFound(item_id))?;
        drop(conn);

        if !changed {
            return Ok(Reported::Ignored(item));
        }

        match &outcome {
            ProcessingOutcome::Success(_) => info!(
                item_id = %item_id,
                route = ?item.processing_path,
                variants = item.quality_variants.len(),
                "Media item processed"
            ),
            ProcessingOutcome::Failure { cause } => {
                warn!(item_id = %item_id, cause = %cause, "Media item failed")
            }
        }

        self.events.publish(MediaEvent::StatusChanged { item: item.clone() });
        Ok(Reported::Applied(item))
    }

    /// Fail remote jobs whose callback deadline has passed.
    pub fn expire_overdue(&self, now: DateTime<Utc>) -> Result<usize, TrackerError> {
        let overdue = {
            let conn = get_conn(&self.pool)?;
            media_items::list_overdue_remote(&conn, now)?
        };

        let mut expired = 0;
        for (item_id, plan_id) in overdue {
            if let Reported::Applied(_) =
                self.report_outcome(item_id, plan_id, ProcessingOutcome::timeout())?
            {
                expired += 1;
            }
        }

        if expired > 0 {
            info!("Timed out {} remote processing jobs", expired);
        }
        Ok(expired)
    }

    /// Fail local jobs left over from a previous run.
    pub fn fail_interrupted(&self) -> Result<usize, TrackerError> {
        let conn = get_conn(&self.pool)?;
        Ok(media_items::fail_interrupted_local(&conn, INTERRUPTED_REASON)?)
    }

    pub fn events(&self) -> &EventBus {
        &self.events
    }

    fn deadline_from(&self, now: DateTime<Utc>) -> DateTime<Utc> {
        let timeout = chrono::Duration::from_std(self.remote_timeout)
            .unwrap_or_else(|_| chrono::Duration::days(365));
        now + timeout
    }
}

/// Route to record for a success report.
///
/// A local WebP plan may finish on the JPEG fallback; any other mismatch is
/// logged and the plan's route is kept.
fn accepted_route(plan: &ConversionPlan, report: &SuccessReport) -> ProcessingPath {
    match report.route {
        None => plan.route,
        Some(route) if route == plan.route => route,
        Some(ProcessingPath::JpegFallback) if plan.route == ProcessingPath::WebpLocal => {
            ProcessingPath::JpegFallback
        }
        Some(route) => {
            warn!(
                item_id = %plan.item_id,
                reported = %route,
                planned = %plan.route,
                "Outcome reported an unexpected route; keeping the planned route"
            );
            plan.route
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;
    use mediagate_common::{CallerId, MediaType, QualityLabel, TargetFormat};
    use mediagate_db::models::NewMediaItem;
    use mediagate_db::pool::init_memory_pool;
    use std::collections::BTreeMap;

    fn tracker() -> ProcessingTracker {
        let pool = init_memory_pool().unwrap();
        ProcessingTracker::new(pool, EventBus::new(), Duration::from_secs(600))
    }

    fn create_item(tracker: &ProcessingTracker, media_type: MediaType) -> MediaItem {
        let conn = get_conn(&tracker.pool).unwrap();
        media_items::create_media_item(
            &conn,
            &NewMediaItem {
                id: MediaItemId::new(),
                owner_id: CallerId::new("alice"),
                media_type,
                original_filename: "source".into(),
                mime_type: "application/octet-stream".into(),
                original_size_bytes: 3_000_000,
                source_path: "alice/source".into(),
                fingerprint: "feedfacecafebeef".into(),
                width: Some(1920),
                height: Some(1080),
            },
        )
        .unwrap()
    }

    fn plan_for(
        item: &MediaItem,
        route: ProcessingPath,
        site: ExecutionSite,
        variants: Vec<QualityLabel>,
    ) -> ConversionPlan {
        ConversionPlan {
            id: PlanId::new(),
            item_id: item.id,
            target_format: TargetFormat::Webp,
            requested_variants: variants,
            route,
            execution_site: site,
            issued_at: Utc::now(),
        }
    }

    fn success(route: Option<ProcessingPath>) -> ProcessingOutcome {
        ProcessingOutcome::Success(SuccessReport {
            route,
            processed_path: "processed/out.webp".into(),
            thumbnail_path: Some("processed/out.webp".into()),
            quality_variants: BTreeMap::new(),
            metrics: Some(ProcessingMetrics::from_sizes(3_000_000, 1_000_000, 420)),
        })
    }

    #[test]
    fn test_local_image_processing_then_processed() {
        let tracker = tracker();
        let item = create_item(&tracker, MediaType::Image);
        let plan = plan_for(&item, ProcessingPath::WebpLocal, ExecutionSite::Local, vec![]);

        let applied = tracker.apply_plan(&plan).unwrap();
        assert_matches!(&applied, PlanApplied::Started(i) if i.processing_status == ProcessingStatus::Processing);

        let reported = tracker.report_outcome(item.id, plan.id, success(None)).unwrap();
        assert_matches!(reported, Reported::Applied(_));
        let item = reported.item();
        assert_eq!(item.processing_status, ProcessingStatus::Processed);
        assert_eq!(item.processing_path, Some(ProcessingPath::WebpLocal));
        assert!(item.metrics.is_some());
    }

    #[test]
    fn test_passthrough_completes_immediately() {
        let tracker = tracker();
        let item = create_item(&tracker, MediaType::Image);
        let plan = plan_for(&item, ProcessingPath::JpegPassthrough, ExecutionSite::Local, vec![]);

        let applied = tracker.apply_plan(&plan).unwrap();
        assert_matches!(applied, PlanApplied::Completed(_));
        let item = applied.item();
        assert_eq!(item.processing_status, ProcessingStatus::Processed);
        assert_eq!(item.processed_path.as_deref(), Some("alice/source"));
        assert_eq!(item.metrics.unwrap().compression_ratio_percent, 0.0);
    }

    #[test]
    fn test_second_plan_while_in_flight_is_ignored() {
        let tracker = tracker();
        let item = create_item(&tracker, MediaType::Video);
        let first = plan_for(&item, ProcessingPath::None, ExecutionSite::Remote, vec![QualityLabel::P480]);
        let second = plan_for(&item, ProcessingPath::None, ExecutionSite::Remote, vec![QualityLabel::P480]);

        assert_matches!(tracker.apply_plan(&first).unwrap(), PlanApplied::Started(_));
        assert_matches!(tracker.apply_plan(&second).unwrap(), PlanApplied::Ignored(_));
        assert_eq!(tracker.get(item.id).unwrap().current_plan_id, Some(first.id));
    }

    #[test]
    fn test_terminal_item_rejects_new_plan() {
        let tracker = tracker();
        let item = create_item(&tracker, MediaType::Image);
        let plan = plan_for(&item, ProcessingPath::WebpLocal, ExecutionSite::Local, vec![]);
        tracker.apply_plan(&plan).unwrap();
        tracker
            .report_outcome(item.id, plan.id, ProcessingOutcome::failure("decoder crashed"))
            .unwrap();

        let again = plan_for(&item, ProcessingPath::WebpLocal, ExecutionSite::Local, vec![]);
        assert_matches!(
            tracker.apply_plan(&again),
            Err(TrackerError::InvalidTransition { status: ProcessingStatus::Failed, .. })
        );
    }

    #[test]
    fn test_passthrough_plan_cannot_reenter_processed_item() {
        let tracker = tracker();
        let item = create_item(&tracker, MediaType::Image);
        let plan = plan_for(&item, ProcessingPath::JpegPassthrough, ExecutionSite::Local, vec![]);
        assert_matches!(tracker.apply_plan(&plan).unwrap(), PlanApplied::Completed(_));

        let again = plan_for(&item, ProcessingPath::JpegPassthrough, ExecutionSite::Local, vec![]);
        assert_matches!(
            tracker.apply_plan(&again),
            Err(TrackerError::InvalidTransition { status: ProcessingStatus::Processed, .. })
        );
    }

    #[test]
    fn test_late_report_does_not_reopen_terminal_state() {
        let tracker = tracker();
        let item = create_item(&tracker, MediaType::Image);
        let plan = plan_for(&item, ProcessingPath::WebpServer, ExecutionSite::Remote, vec![]);
        tracker.apply_plan(&plan).unwrap();

        tracker
            .report_outcome(item.id, plan.id, ProcessingOutcome::failure("boom"))
            .unwrap();
        let late = tracker.report_outcome(item.id, plan.id, success(None)).unwrap();

        assert_matches!(late, Reported::Ignored(_));
        let item = tracker.get(item.id).unwrap();
        assert_eq!(item.processing_status, ProcessingStatus::Failed);
        assert_eq!(item.failure_reason.as_deref(), Some("boom"));
    }

    #[test]
    fn test_unrequested_variants_are_dropped() {
        let tracker = tracker();
        let item = create_item(&tracker, MediaType::Video);
        let plan = plan_for(
            &item,
            ProcessingPath::None,
            ExecutionSite::Remote,
            vec![QualityLabel::P480, QualityLabel::P720],
        );
        tracker.apply_plan(&plan).unwrap();

        let mut variants = BTreeMap::new();
        variants.insert(QualityLabel::P480, "v/480.mp4".to_string());
        variants.insert(QualityLabel::P720, "v/720.mp4".to_string());
        variants.insert(QualityLabel::P1080, "v/1080.mp4".to_string());
        let outcome = ProcessingOutcome::Success(SuccessReport {
            processed_path: "v/clip.mp4".into(),
            quality_variants: variants,
            ..SuccessReport::default()
        });

        let item = tracker.report_outcome(item.id, plan.id, outcome).unwrap();
        let labels: Vec<_> = item.item().quality_variants.keys().copied().collect();
        assert_eq!(labels, vec![QualityLabel::P480, QualityLabel::P720]);
    }

    #[test]
    fn test_jpeg_fallback_route_accepted_for_local_webp() {
        let tracker = tracker();
        let item = create_item(&tracker, MediaType::Image);
        let plan = plan_for(&item, ProcessingPath::WebpLocal, ExecutionSite::Local, vec![]);
        tracker.apply_plan(&plan).unwrap();

        let reported = tracker
            .report_outcome(item.id, plan.id, success(Some(ProcessingPath::JpegFallback)))
            .unwrap();
        assert_eq!(reported.item().processing_path, Some(ProcessingPath::JpegFallback));
    }

    #[test]
    fn test_unexpected_route_keeps_planned_route() {
        let tracker = tracker();
        let item = create_item(&tracker, MediaType::Image);
        let plan = plan_for(&item, ProcessingPath::WebpServer, ExecutionSite::Remote, vec![]);
        tracker.apply_plan(&plan).unwrap();

        let reported = tracker
            .report_outcome(item.id, plan.id, success(Some(ProcessingPath::JpegFallback)))
            .unwrap();
        assert_eq!(reported.item().processing_path, Some(ProcessingPath::WebpServer));
    }

    #[test]
    fn test_unknown_plan_rejected() {
        let tracker = tracker();
        let item = create_item(&tracker, MediaType::Image);
        assert_matches!(
            tracker.report_outcome(item.id, PlanId::new(), success(None)),
            Err(TrackerError::UnknownPlan { .. })
        );
        assert_matches!(
            tracker.report_outcome(MediaItemId::new(), PlanId::new(), success(None)),
            Err(TrackerError::NotFound(_))
        );
    }

    #[test]
    fn test_expire_overdue_marks_timeout() {
        let tracker = tracker();
        let item = create_item(&tracker, MediaType::Video);
        let plan = plan_for(&item, ProcessingPath::None, ExecutionSite::Remote, vec![QualityLabel::P480]);
        tracker.apply_plan(&plan).unwrap();

        assert_eq!(tracker.expire_overdue(Utc::now()).unwrap(), 0);
        let later = Utc::now() + chrono::Duration::seconds(601);
        assert_eq!(tracker.expire_overdue(later).unwrap(), 1);

        let item = tracker.get(item.id).unwrap();
        assert_eq!(item.processing_status, ProcessingStatus::Failed);
        assert_eq!(item.failure_reason.as_deref(), Some(ProcessingOutcome::TIMEOUT));
    }

    #[test]
    fn test_status_change_is_broadcast() {
        let tracker = tracker();
        let mut rx = tracker.events().subscribe();
        let item = create_item(&tracker, MediaType::Image);
        let plan = plan_for(&item, ProcessingPath::WebpLocal, ExecutionSite::Local, vec![]);
        tracker.apply_plan(&plan).unwrap();
        tracker.report_outcome(item.id, plan.id, success(None)).unwrap();

        let event = rx.try_recv().unwrap();
        assert_eq!(event.item().id, item.id);
        assert_eq!(event.item().processing_status, ProcessingStatus::Processed);
    }
}
