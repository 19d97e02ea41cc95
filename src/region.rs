use std::collections::HashSet;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use rusoto_cloudwatch::CloudWatchClient;
use rusoto_core::Region;
use rusoto_dynamodb::DynamoDbClient;
use rusoto_ec2::{DescribeRegionsRequest, Ec2, Ec2Client};
use rusoto_rds::RdsClient;
use serde::Deserialize;
use serde_json::Value;
use tracing::{error, info};

use crate::cloud_watch_metrics_client::{CloudWatchMetricsClient, MetricSource};
use crate::config::Config;
use crate::controller::{ResourceController, ResourceKind};
use crate::ec2_instance_client::Ec2InstanceClient;
use crate::error::ReaperError;
use crate::notifier::Finding;
use crate::rds_instance_client::RdsInstanceClient;
use crate::remediation::{Remediator, Tally};
use crate::tracking::{DynamoDbTrackingStore, TrackingStore};

#[derive(Debug, Deserialize, PartialEq, Clone, Copy)]
#[serde(rename_all = "lowercase")]
pub enum Phase {
    Flag,
    Finalize,
    All,
}

impl Phase {
    /// The phase requested by a trigger payload. Payloads without a `phase`
    /// field (scheduled events, `null`) run everything; a `phase` that is not
    /// recognised is rejected so a typo never widens the run.
    pub fn from_event(event: &Value) -> Result<Self, ReaperError> {
        match event.get("phase") {
            None | Some(Value::Null) => Ok(Phase::All),
            Some(phase) => serde_json::from_value(phase.clone())
                .map_err(|error| ReaperError::InvalidEvent(format!("phase {}: {}", phase, error))),
        }
    }

    fn finalizes(self) -> bool {
        matches!(self, Phase::Finalize | Phase::All)
    }

    fn flags(self) -> bool {
        matches!(self, Phase::Flag | Phase::All)
    }
}

#[derive(Debug, Default)]
pub struct RegionReport {
    pub findings: Vec<Finding>,
    pub tally: Tally,
}

pub async fn list_regions(config: &Config) -> Result<Vec<String>, ReaperError> {
    if let Some(regions) = &config.regions {
        return Ok(regions.clone());
    }
    let client = Ec2Client::new(parse_region(&config.notification_region)?);
    let result = client
        .describe_regions(DescribeRegionsRequest::default())
        .await
        .map_err(|error| ReaperError::ListRegions(error.to_string()))?;
    Ok(result
        .regions
        .unwrap_or_default()
        .into_iter()
        .filter_map(|region| region.region_name)
        .collect())
}

pub fn parse_region(name: &str) -> Result<Region, ReaperError> {
    Region::from_str(name).map_err(|error| ReaperError::ListRegions(error.to_string()))
}

/// Run the requested phases for every configured kind in one region.
pub async fn run_region(
    region_name: String,
    config: &Config,
    phase: Phase,
    now: DateTime<Utc>,
) -> RegionReport {
    let mut report = RegionReport::default();
    let region = match parse_region(&region_name) {
        Ok(region) => region,
        Err(error) => {
            error!(region = %region_name, %error, "skipping region");
            report.tally.failed += 1;
            return report;
        }
    };

    let store = DynamoDbTrackingStore::new_with_client(
        DynamoDbClient::new(region.clone()),
        &config.table_name,
    );
    let metrics = CloudWatchMetricsClient::new_with_client(CloudWatchClient::new(region.clone()));

    for kind_config in &config.kinds {
        let controller: Box<dyn ResourceController> = match kind_config.kind {
            ResourceKind::ComputeInstance => {
                Box::new(Ec2InstanceClient::new_with_client(Ec2Client::new(region.clone())))
            }
            ResourceKind::DatabaseInstance => {
                Box::new(RdsInstanceClient::new_with_client(RdsClient::new(region.clone())))
            }
        };
        let remediator = Remediator::new(
            &region_name,
            kind_config,
            &store as &dyn TrackingStore,
            controller.as_ref(),
            &metrics as &dyn MetricSource,
        );

        let mut resumed = HashSet::new();
        if phase.finalizes() {
            match remediator.finalize_pass(now).await {
                Ok(pass) => {
                    resumed = pass.resumed_ids;
                    report.tally.merge(&pass.tally);
                    report.findings.extend(pass.findings);
                }
                Err(ReaperError::TrackingTableNotFound(table)) => {
                    info!(region = %region_name, %table, "tracking table not found, skipping region");
                    return report;
                }
                Err(error) => {
                    error!(region = %region_name, kind = %kind_config.kind, %error, "finalize pass failed");
                    report.tally.failed += 1;
                }
            }
        }
        if phase.flags() {
            let pass = remediator.flag_pass(now, &resumed).await;
            report.tally.merge(&pass.tally);
            report.findings.extend(pass.findings);
        }
    }

    info!(region = %region_name, tally = %report.tally, "region processed");
    report
}
