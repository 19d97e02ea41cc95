use crate::error::ReaperError;
use async_trait::async_trait;

use bigdecimal::{BigDecimal, FromPrimitive, ToPrimitive};
use rusoto_cloudwatch::{
    CloudWatch, CloudWatchClient, Datapoint, Dimension, GetMetricStatisticsInput,
};

use crate::metric::{AggregatedMetrics, MetricQuery};
use crate::time_range::TimeRange;
use std::convert::TryFrom;
use std::ops::{Add, Div};

const DEFAULT_STATISTICS: [&'static str; 3] = ["Average", "Minimum", "Maximum"];

#[async_trait]
pub trait MetricSource: Send + Sync {
    async fn aggregate_metrics(
        &self,
        query: &MetricQuery,
        time_range: &TimeRange,
    ) -> Result<AggregatedMetrics, ReaperError>;
}

pub struct CloudWatchMetricsClient {
    client: CloudWatchClient,
}

#[async_trait]
impl MetricSource for CloudWatchMetricsClient {
    async fn aggregate_metrics(
        &self,
        query: &MetricQuery,
        time_range: &TimeRange,
    ) -> Result<AggregatedMetrics, ReaperError> {
        let metrics = self
            .client
            .get_metric_statistics(GetMetricStatisticsInput {
                start_time: time_range.format_start(),
                end_time: time_range.format_end(),
                metric_name: query.metric_name.to_string(),
                namespace: query.namespace.to_string(),
                dimensions: Some(vec![Dimension {
                    name: query.dimension_name.to_string(),
                    value: query.dimension_value.clone(),
                }]),
                period: query.period_seconds,
                statistics: Some(
                    DEFAULT_STATISTICS
                        .iter()
                        .map(|statistic| statistic.to_string())
                        .collect(),
                ),
                ..Default::default()
            })
            .await?;
        self.aggregate_data_points(metrics.datapoints)
    }
}

impl CloudWatchMetricsClient {
    pub fn new_with_client(client: CloudWatchClient) -> Self {
        CloudWatchMetricsClient { client }
    }

    /// An empty window aggregates to zero: no data counts as idle.
    fn aggregate_data_points(
        &self,
        data_points: Option<Vec<Datapoint>>,
    ) -> Result<AggregatedMetrics, ReaperError> {
        let data_points = data_points.map_or(vec![], |points| points);
        if data_points.is_empty() {
            return Ok(AggregatedMetrics::default());
        }
        let mut total = BigDecimal::from(0);
        let mut minimum = f64::MAX;
        let mut maximum = f64::MIN;
        let length = u32::try_from(data_points.len())?;
        let count = BigDecimal::from(length);
        for data_point in data_points {
            let average = data_point
                .average
                .map(|average| {
                    BigDecimal::from_f64(average).map_or(BigDecimal::from(0), |average| average)
                })
                .ok_or(ReaperError::NoneValue)?;
            total = total.add(average);

            minimum = minimum.min(data_point.minimum.ok_or(ReaperError::NoneValue)?);
            maximum = maximum.max(data_point.maximum.ok_or(ReaperError::NoneValue)?);
        }

        let decimal_average = total.div(count);
        let average = decimal_average
            .to_f64()
            .ok_or(ReaperError::ToPrimitive)?;
        Ok(AggregatedMetrics {
            average,
            maximum,
            minimum,
        })
    }
}
