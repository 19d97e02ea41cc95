//! Two-phase remediation of idle resources.
//!
//! The flag pass stops idle resources and records a bookmark; the finalize
//! pass, on a later run, reconciles each bookmark against the live resource.
//! Every transition is keyed to a single resource and safe to repeat.

use std::collections::HashSet;
use std::fmt;

use chrono::{DateTime, Utc};
use tracing::{debug, error, info, warn};

use crate::cloud_watch_metrics_client::MetricSource;
use crate::config::{FinalizeAction, KindConfig};
use crate::controller::{ResourceController, ResourceKind, RuntimeState};
use crate::error::{ReaperError, ResourceError};
use crate::notifier::Finding;
use crate::time_range::TimeRange;
use crate::tracking::{TrackedKind, TrackedResource, TrackingStore};

#[derive(Debug, PartialEq, Clone, Copy)]
pub enum Outcome {
    /// Stopped and bookmarked.
    Flagged,
    /// Not idle; left alone.
    Active,
    /// Already bookmarked; the flag pass does not touch it.
    AlreadyTracked,
    /// Bookmark dropped because the resource is running again.
    Resumed,
    /// Resource deleted after its grace period.
    Destroyed,
    /// Bookmark dropped after the grace period, resource kept.
    Released,
    /// Bookmark dropped because the resource is gone.
    Vanished,
    /// Still inside the grace period.
    Pending,
    Failed,
}

#[derive(Debug, Default, PartialEq, Clone, Copy)]
pub struct Tally {
    pub flagged: usize,
    pub resumed: usize,
    pub destroyed: usize,
    pub released: usize,
    pub vanished: usize,
    pub pending: usize,
    pub failed: usize,
}

impl Tally {
    pub fn record(&mut self, outcome: Outcome) {
        match outcome {
            Outcome::Flagged => self.flagged += 1,
            Outcome::Resumed => self.resumed += 1,
            Outcome::Destroyed => self.destroyed += 1,
            Outcome::Released => self.released += 1,
            Outcome::Vanished => self.vanished += 1,
            Outcome::Pending => self.pending += 1,
            Outcome::Failed => self.failed += 1,
            Outcome::Active | Outcome::AlreadyTracked => {}
        }
    }

    pub fn merge(&mut self, other: &Tally) {
        self.flagged += other.flagged;
        self.resumed += other.resumed;
        self.destroyed += other.destroyed;
        self.released += other.released;
        self.vanished += other.vanished;
        self.pending += other.pending;
        self.failed += other.failed;
    }
}

impl fmt::Display for Tally {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(
            f,
            "{} flagged, {} destroyed, {} resumed, {} released, {} vanished, {} pending, {} failed",
            self.flagged,
            self.destroyed,
            self.resumed,
            self.released,
            self.vanished,
            self.pending,
            self.failed
        )
    }
}

#[derive(Debug, Default)]
pub struct PassReport {
    pub findings: Vec<Finding>,
    pub tally: Tally,
    /// Resources whose bookmark was dropped because they are running again.
    pub resumed_ids: HashSet<String>,
}

impl PassReport {
    fn record(&mut self, outcome: Outcome, finding: Option<Finding>) {
        self.tally.record(outcome);
        self.findings.extend(finding);
    }
}

pub struct Remediator<'a> {
    region: &'a str,
    config: &'a KindConfig,
    store: &'a dyn TrackingStore,
    controller: &'a dyn ResourceController,
    metrics: &'a dyn MetricSource,
}

impl<'a> Remediator<'a> {
    pub fn new(
        region: &'a str,
        config: &'a KindConfig,
        store: &'a dyn TrackingStore,
        controller: &'a dyn ResourceController,
        metrics: &'a dyn MetricSource,
    ) -> Self {
        Remediator {
            region,
            config,
            store,
            controller,
            metrics,
        }
    }

    fn kind(&self) -> ResourceKind {
        self.controller.kind()
    }

    fn label(&self) -> &'static str {
        match self.kind() {
            ResourceKind::ComputeInstance => "Instance",
            ResourceKind::DatabaseInstance => "RDS instance",
        }
    }

    fn grace_days(&self) -> i64 {
        self.config.grace_period.num_days()
    }

    fn finding(&self, message: String) -> Option<Finding> {
        Some(Finding::new(self.region, message))
    }

    /// Reconcile every bookmark of this kind against the live resource.
    ///
    /// Only a failed scan is an error; per-record failures are logged and
    /// left for the next run.
    pub async fn finalize_pass(&self, now: DateTime<Utc>) -> Result<PassReport, ReaperError> {
        let mut report = PassReport::default();
        let records = self.store.scan().await?;
        for record in records
            .iter()
            .filter(|record| record.resource_kind() == self.kind())
        {
            let (outcome, finding) = self.finalize_one(record, now).await;
            if outcome == Outcome::Resumed {
                report.resumed_ids.insert(record.resource_id.clone());
            }
            report.record(outcome, finding);
        }
        Ok(report)
    }

    async fn finalize_one(
        &self,
        record: &TrackedResource,
        now: DateTime<Utc>,
    ) -> (Outcome, Option<Finding>) {
        let resource_id = record.resource_id.as_str();
        let state = match self.controller.current_state(resource_id).await {
            Ok(state) => state,
            Err(error) if error.is_not_found() => RuntimeState::Terminated,
            Err(error) => {
                self.log_resource_error(resource_id, "describe", &error);
                return (Outcome::Failed, None);
            }
        };

        match state {
            RuntimeState::Running => {
                if !self.release(resource_id).await {
                    return (Outcome::Failed, None);
                }
                info!(region = self.region, resource_id, kind = %self.kind(), "resource resumed, tracking removed");
                (
                    Outcome::Resumed,
                    self.finding(format!(
                        "{} {} is running, removed from tracking.",
                        self.label(),
                        resource_id
                    )),
                )
            }
            RuntimeState::Stopped if now - record.flagged_at >= self.config.grace_period => {
                self.finalize_expired(record).await
            }
            RuntimeState::Stopped => {
                debug!(region = self.region, resource_id, flagged_at = %record.flagged_at, "grace period not elapsed");
                (Outcome::Pending, None)
            }
            RuntimeState::Terminated | RuntimeState::Unknown => {
                if !self.release(resource_id).await {
                    return (Outcome::Failed, None);
                }
                info!(region = self.region, resource_id, ?state, "resource gone, tracking removed");
                (
                    Outcome::Vanished,
                    self.finding(format!(
                        "{} {} no longer exists or is in an unexpected state, removed from tracking.",
                        self.label(),
                        resource_id
                    )),
                )
            }
        }
    }

    async fn finalize_expired(&self, record: &TrackedResource) -> (Outcome, Option<Finding>) {
        let resource_id = record.resource_id.as_str();
        match self.config.finalize_action {
            FinalizeAction::Destroy => {
                match self.controller.finalize_destructive(resource_id).await {
                    Ok(()) => {}
                    Err(error) if error.is_not_found() => {
                        if !self.release(resource_id).await {
                            return (Outcome::Failed, None);
                        }
                        return (
                            Outcome::Vanished,
                            self.finding(format!(
                                "{} {} no longer exists, removed from tracking.",
                                self.label(),
                                resource_id
                            )),
                        );
                    }
                    Err(error) => {
                        self.log_resource_error(resource_id, "destroy", &error);
                        return (Outcome::Failed, None);
                    }
                }
                // A failed delete here is cleaned up as vanished next run.
                if !self.release(resource_id).await {
                    return (Outcome::Failed, None);
                }
                info!(region = self.region, resource_id, kind = %self.kind(), "resource destroyed");
                (
                    Outcome::Destroyed,
                    self.finding(format!(
                        "{} {} stopped for over {} days, deleted and removed from tracking.",
                        self.label(),
                        resource_id,
                        self.grace_days()
                    )),
                )
            }
            FinalizeAction::Release => {
                if !self.release(resource_id).await {
                    return (Outcome::Failed, None);
                }
                info!(region = self.region, resource_id, kind = %self.kind(), "grace period elapsed, tracking released");
                let retained = record
                    .snapshot_id()
                    .map(|snapshot_id| format!(" Snapshot {} is retained.", snapshot_id))
                    .unwrap_or_default();
                (
                    Outcome::Released,
                    self.finding(format!(
                        "{} {} stopped for over {} days, removed from tracking and left stopped.{}",
                        self.label(),
                        resource_id,
                        self.grace_days(),
                        retained
                    )),
                )
            }
        }
    }

    async fn release(&self, resource_id: &str) -> bool {
        match self.store.delete(resource_id).await {
            Ok(()) => true,
            Err(error) => {
                error!(region = self.region, resource_id, %error, "failed to delete tracking record");
                false
            }
        }
    }

    /// Stop idle candidates that are not already tracked. `skip` holds
    /// resources this run has just seen resumed.
    pub async fn flag_pass(&self, now: DateTime<Utc>, skip: &HashSet<String>) -> PassReport {
        let mut report = PassReport::default();
        let candidates = match self.controller.list_candidates().await {
            Ok(candidates) => candidates,
            Err(error) => {
                self.log_resource_error("*", "list", &error);
                report.record(Outcome::Failed, None);
                return report;
            }
        };

        for resource_id in candidates {
            if skip.contains(&resource_id) {
                debug!(region = self.region, resource_id = %resource_id, "resumed this run, not re-flagging");
                continue;
            }
            let (outcome, finding) = self.flag_one(&resource_id, now).await;
            report.record(outcome, finding);
        }
        report
    }

    async fn flag_one(&self, resource_id: &str, now: DateTime<Utc>) -> (Outcome, Option<Finding>) {
        match self.store.get(resource_id).await {
            Ok(Some(record)) => {
                debug!(region = self.region, resource_id, flagged_at = %record.flagged_at, "already tracked");
                return (Outcome::AlreadyTracked, None);
            }
            Ok(None) => {}
            Err(error) => {
                error!(region = self.region, resource_id, %error, "failed to read tracking record");
                return (Outcome::Failed, None);
            }
        }

        let time_range = TimeRange::lookback(now, self.config.lookback_days);
        let mut observed = Vec::with_capacity(self.config.policy.rules.len());
        for rule in &self.config.policy.rules {
            let query = rule.query_for(resource_id, self.config.period_seconds);
            match self.metrics.aggregate_metrics(&query, &time_range).await {
                Ok(metrics) => observed.push((rule.clone(), metrics)),
                Err(error) => {
                    error!(region = self.region, resource_id, metric = rule.metric_name, %error, "failed to fetch metrics");
                    return (Outcome::Failed, None);
                }
            }
        }
        if !self.config.policy.is_underutilized(&observed) {
            return (Outcome::Active, None);
        }

        let snapshot_id = match self.controller.apply_protective_action(resource_id).await {
            Ok(snapshot_id) => snapshot_id,
            Err(error) => {
                self.log_resource_error(resource_id, "stop", &error);
                return (Outcome::Failed, None);
            }
        };

        let kind = match (self.kind(), snapshot_id) {
            (ResourceKind::ComputeInstance, _) => TrackedKind::Compute,
            (ResourceKind::DatabaseInstance, Some(snapshot_id)) => {
                TrackedKind::Database { snapshot_id }
            }
            (ResourceKind::DatabaseInstance, None) => {
                error!(region = self.region, resource_id, untracked = true, "stopped without a snapshot, not tracking");
                return (Outcome::Failed, None);
            }
        };
        let record = TrackedResource {
            resource_id: resource_id.to_string(),
            flagged_at: now,
            note: self.config.note.to_string(),
            kind,
        };
        if let Err(error) = self.store.put(&record).await {
            // No compensating restart: the resource stays stopped but untracked.
            error!(region = self.region, resource_id, untracked = true, %error, "stopped but failed to write tracking record");
            return (Outcome::Failed, None);
        }

        info!(region = self.region, resource_id, kind = %self.kind(), "flagged and stopped");
        (Outcome::Flagged, self.finding(self.flag_message(&record)))
    }

    fn flag_message(&self, record: &TrackedResource) -> String {
        let fate = match self.config.finalize_action {
            FinalizeAction::Destroy => "deleted",
            FinalizeAction::Release => "released from tracking",
        };
        match &record.kind {
            TrackedKind::Compute => format!(
                "{} {}: Stopped due to low utilization. It will be {} if not restarted within {} days. \
                 If this instance is no longer needed - leave it in stopped state.",
                self.label(),
                record.resource_id,
                fate,
                self.grace_days()
            ),
            TrackedKind::Database { snapshot_id } => format!(
                "{} {} has been stopped due to inactivity. Snapshot {} has been taken. \
                 It will be {} if not restarted within {} days.",
                self.label(),
                record.resource_id,
                snapshot_id,
                fate,
                self.grace_days()
            ),
        }
    }

    fn log_resource_error(&self, resource_id: &str, operation: &str, error: &ResourceError) {
        match error {
            ResourceError::Transient(_) => {
                warn!(region = self.region, resource_id, operation, %error, "transient failure, retrying next run")
            }
            _ => error!(region = self.region, resource_id, operation, %error, "resource operation failed"),
        }
    }
}
