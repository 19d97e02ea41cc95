//! Run configuration, read once per container from the environment.

use std::str::FromStr;

use chrono::Duration;

use crate::controller::ResourceKind;
use crate::error::ConfigError;
use crate::policy::DetectionPolicy;

const SECONDS_PER_DAY: i64 = 86400;

/// What the finalize pass does with a resource still stopped after its
/// grace period.
#[derive(Debug, PartialEq, Clone, Copy)]
pub enum FinalizeAction {
    /// Delete the resource, then the record.
    Destroy,
    /// Delete only the record; the stopped resource and its snapshot remain.
    Release,
}

impl FromStr for FinalizeAction {
    type Err = ();

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim() {
            "destroy" => Ok(FinalizeAction::Destroy),
            "release" => Ok(FinalizeAction::Release),
            _ => Err(()),
        }
    }
}

#[derive(Debug, PartialEq, Clone)]
pub struct KindConfig {
    pub kind: ResourceKind,
    pub policy: DetectionPolicy,
    pub lookback_days: i64,
    pub period_seconds: i64,
    pub grace_period: Duration,
    pub finalize_action: FinalizeAction,
    pub note: &'static str,
}

#[derive(Debug, PartialEq, Clone)]
pub struct Config {
    pub table_name: String,
    pub topic_arn: String,
    pub notification_region: String,
    /// Explicit region list; `None` means every region the account sees.
    pub regions: Option<Vec<String>>,
    pub kinds: Vec<KindConfig>,
}

impl Config {
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let lookup = |name: &str| lookup(name).filter(|value| !value.trim().is_empty());

        let table_name = lookup("TRACKING_TABLE_NAME")
            .or_else(|| lookup("DYNAMODB_TABLE_NAME"))
            .ok_or(ConfigError::Missing("TRACKING_TABLE_NAME"))?;
        let topic_arn = lookup("SNS_TOPIC_ARN").ok_or(ConfigError::Missing("SNS_TOPIC_ARN"))?;
        let notification_region = lookup("NOTIFICATION_REGION")
            .or_else(|| lookup("AWS_REGION"))
            .unwrap_or_else(|| "us-east-1".to_string());
        let regions = lookup("REAPER_REGIONS").map(|value| split_list(&value));

        let mut kinds = Vec::new();
        let enabled = lookup("REAPER_KINDS").unwrap_or_else(|| "compute,database".to_string());
        for name in split_list(&enabled) {
            let kind = name.parse::<ResourceKind>().map_err(|value| ConfigError::Invalid {
                name: "REAPER_KINDS",
                value,
            })?;
            kinds.push(match kind {
                ResourceKind::ComputeInstance => KindConfig {
                    kind,
                    policy: DetectionPolicy::compute(
                        parse_or(&lookup, "COMPUTE_CPU_THRESHOLD_PERCENT", 10.0)?,
                        parse_or(&lookup, "COMPUTE_NETWORK_IN_THRESHOLD_BYTES", 5.0 * 1024.0 * 1024.0)?,
                    ),
                    lookback_days: positive_days(&lookup, "COMPUTE_LOOKBACK_DAYS", 14)?,
                    period_seconds: SECONDS_PER_DAY,
                    grace_period: Duration::days(positive_days(
                        &lookup,
                        "COMPUTE_GRACE_PERIOD_DAYS",
                        3,
                    )?),
                    finalize_action: parse_or(
                        &lookup,
                        "COMPUTE_FINALIZE_ACTION",
                        FinalizeAction::Destroy,
                    )?,
                    note: "Instance stopped due to low utilization.",
                },
                ResourceKind::DatabaseInstance => KindConfig {
                    kind,
                    policy: DetectionPolicy::database(parse_or(
                        &lookup,
                        "DATABASE_CONNECTIONS_THRESHOLD",
                        0.0,
                    )?),
                    lookback_days: positive_days(&lookup, "DATABASE_LOOKBACK_DAYS", 14)?,
                    period_seconds: SECONDS_PER_DAY,
                    grace_period: Duration::days(positive_days(
                        &lookup,
                        "DATABASE_GRACE_PERIOD_DAYS",
                        3,
                    )?),
                    finalize_action: parse_or(
                        &lookup,
                        "DATABASE_FINALIZE_ACTION",
                        FinalizeAction::Release,
                    )?,
                    note: "Instance stopped due to inactivity.",
                },
            });
        }

        Ok(Config {
            table_name,
            topic_arn,
            notification_region,
            regions,
            kinds,
        })
    }
}

fn split_list(value: &str) -> Vec<String> {
    value
        .split(',')
        .map(str::trim)
        .filter(|item| !item.is_empty())
        .map(str::to_string)
        .collect()
}

fn parse_or<T, F>(lookup: &F, name: &'static str, default: T) -> Result<T, ConfigError>
where
    T: FromStr,
    F: Fn(&str) -> Option<String>,
{
    match lookup(name) {
        Some(value) => value.trim().parse::<T>().map_err(|_| ConfigError::Invalid {
            name,
            value,
        }),
        None => Ok(default),
    }
}

fn positive_days<F>(lookup: &F, name: &'static str, default: i64) -> Result<i64, ConfigError>
where
    F: Fn(&str) -> Option<String>,
{
    let days = parse_or(lookup, name, default)?;
    if days <= 0 {
        return Err(ConfigError::Invalid {
            name,
            value: days.to_string(),
        });
    }
    Ok(days)
}
