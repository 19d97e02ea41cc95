#[derive(Debug, PartialEq, Clone, Copy)]
pub struct AggregatedMetrics {
    pub average: f64,
    pub maximum: f64,
    pub minimum: f64,
}

impl Default for AggregatedMetrics {
    fn default() -> Self {
        Self {
            average: 0.0,
            maximum: 0.0,
            minimum: 0.0,
        }
    }
}

#[derive(Debug, PartialEq, Clone, Copy)]
pub enum Statistic {
    Average,
    Maximum,
}

impl AggregatedMetrics {
    pub fn value_of(&self, statistic: Statistic) -> f64 {
        match statistic {
            Statistic::Average => self.average,
            Statistic::Maximum => self.maximum,
        }
    }
}

/// One CloudWatch series for a single resource.
#[derive(Debug, PartialEq, Clone)]
pub struct MetricQuery {
    pub namespace: &'static str,
    pub metric_name: &'static str,
    pub dimension_name: &'static str,
    pub dimension_value: String,
    pub period_seconds: i64,
}
