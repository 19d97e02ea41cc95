mod cloud_watch_metrics_client;
mod config;
mod controller;
mod ec2_instance_client;
mod error;
mod metric;
mod notifier;
mod policy;
mod rds_instance_client;
mod region;
mod remediation;
mod time_range;
mod tracking;

use anyhow::Context as _;
use chrono::Utc;
use lambda_runtime::{handler_fn, Context, Error};
use once_cell::sync::OnceCell;
use rusoto_sns::SnsClient;
use serde::Serialize;
use serde_json::Value;
use tokio::task::JoinSet;
use tracing::{error, info};

use crate::config::Config;
use crate::notifier::{Notifier, Report, SnsNotifier};
use crate::region::{list_regions, parse_region, run_region, Phase};
use crate::remediation::Tally;

static CONFIG: OnceCell<Config> = OnceCell::new();

#[derive(Serialize, Debug, PartialEq)]
pub struct ReaperHandlerOutput {
    #[serde(rename = "statusCode")]
    status_code: u16,
    body: String,
}

#[tokio::main]
async fn main() -> Result<(), Error> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive(tracing::Level::INFO.into()),
        )
        .with_target(false)
        .without_time()
        .init();

    lambda_runtime::run(handler_fn(reaper_handler)).await?;
    Ok(())
}

async fn reaper_handler(event: Value, _: Context) -> Result<Value, Error> {
    let phase = match requested_phase(&event) {
        Ok(phase) => phase,
        Err(rejected) => return Ok(serde_json::to_value(rejected)?),
    };
    let config = CONFIG
        .get_or_try_init(Config::from_env)
        .context("invalid reaper configuration")?;

    let output = match remediate_all_regions(config, phase).await {
        Ok(body) => ReaperHandlerOutput {
            status_code: 200,
            body,
        },
        Err(error) => {
            error!(%error, "remediation run failed");
            ReaperHandlerOutput {
                status_code: 500,
                body: error.to_string(),
            }
        }
    };
    Ok(serde_json::to_value(output)?)
}

/// A payload naming an unknown phase is answered with a failure before any
/// resource is touched.
fn requested_phase(event: &Value) -> Result<Phase, ReaperHandlerOutput> {
    Phase::from_event(event).map_err(|error| {
        error!(%error, "rejecting trigger event");
        ReaperHandlerOutput {
            status_code: 500,
            body: error.to_string(),
        }
    })
}

async fn remediate_all_regions(config: &'static Config, phase: Phase) -> anyhow::Result<String> {
    let now = Utc::now();
    let regions = list_regions(config).await?;
    info!(regions = regions.len(), ?phase, "starting remediation run");

    let mut tasks = JoinSet::new();
    for region in regions.iter().cloned() {
        tasks.spawn(run_region(region, config, phase, now));
    }

    let mut report = Report::default();
    let mut tally = Tally::default();
    while let Some(joined) = tasks.join_next().await {
        match joined {
            Ok(region_report) => {
                tally.merge(&region_report.tally);
                report.extend(region_report.findings);
            }
            Err(error) => {
                error!(%error, "region task panicked");
                tally.failed += 1;
            }
        }
    }

    if let Some(message) = report.render() {
        let notifier = SnsNotifier::new_with_client(
            SnsClient::new(parse_region(&config.notification_region)?),
            &config.topic_arn,
        );
        notifier
            .publish(&message)
            .await
            .context("findings were not delivered")?;
        info!(findings = report.len(), "notification published");
    }

    Ok(format!(
        "Idle resource remediation across {} regions completed: {}.",
        regions.len(),
        tally
    ))
}

#[cfg(test)]
mod tests {
    use crate::region::Phase;
    use crate::requested_phase;
    use serde_json::json;

    #[test]
    fn test_scheduled_event_runs_all_phases() {
        let event = json!({"source": "aws.events", "detail-type": "Scheduled Event"});

        assert_eq!(requested_phase(&event).unwrap(), Phase::All);
    }

    #[test]
    fn test_unknown_phase_fails_without_running() {
        let rejected = requested_phase(&json!({"phase": "finalise"})).unwrap_err();

        assert_eq!(rejected.status_code, 500);
        assert!(rejected.body.starts_with("Invalid trigger event: phase \"finalise\""));

        let output = serde_json::to_value(rejected).unwrap();
        assert_eq!(output["statusCode"], 500);
    }
}
