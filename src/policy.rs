use crate::metric::{AggregatedMetrics, MetricQuery, Statistic};

/// An inclusive upper bound on one aggregated metric.
#[derive(Debug, PartialEq, Clone)]
pub struct MetricRule {
    pub namespace: &'static str,
    pub metric_name: &'static str,
    pub dimension_name: &'static str,
    pub statistic: Statistic,
    pub limit: f64,
}

impl MetricRule {
    pub fn query_for(&self, resource_id: &str, period_seconds: i64) -> MetricQuery {
        MetricQuery {
            namespace: self.namespace,
            metric_name: self.metric_name,
            dimension_name: self.dimension_name,
            dimension_value: resource_id.to_string(),
            period_seconds,
        }
    }

    pub fn is_satisfied_by(&self, metrics: &AggregatedMetrics) -> bool {
        metrics.value_of(self.statistic) <= self.limit
    }
}

#[derive(Debug, PartialEq, Clone)]
pub struct DetectionPolicy {
    pub rules: Vec<MetricRule>,
}

impl DetectionPolicy {
    pub fn compute(cpu_percent: f64, network_in_bytes: f64) -> Self {
        DetectionPolicy {
            rules: vec![
                MetricRule {
                    namespace: "AWS/EC2",
                    metric_name: "CPUUtilization",
                    dimension_name: "InstanceId",
                    statistic: Statistic::Average,
                    limit: cpu_percent,
                },
                MetricRule {
                    namespace: "AWS/EC2",
                    metric_name: "NetworkIn",
                    dimension_name: "InstanceId",
                    statistic: Statistic::Average,
                    limit: network_in_bytes,
                },
            ],
        }
    }

    pub fn database(connections: f64) -> Self {
        DetectionPolicy {
            rules: vec![MetricRule {
                namespace: "AWS/RDS",
                metric_name: "DatabaseConnections",
                dimension_name: "DBInstanceIdentifier",
                statistic: Statistic::Maximum,
                limit: connections,
            }],
        }
    }

    /// True iff every rule is at or below its limit. `observed` pairs each
    /// rule with the aggregate fetched for it; a rule with no aggregate is
    /// treated as an empty window.
    pub fn is_underutilized(&self, observed: &[(MetricRule, AggregatedMetrics)]) -> bool {
        self.rules.iter().all(|rule| {
            let metrics = observed
                .iter()
                .find(|(candidate, _)| candidate == rule)
                .map(|(_, metrics)| *metrics)
                .unwrap_or_default();
            rule.is_satisfied_by(&metrics)
        })
    }
}
