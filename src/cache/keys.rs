//! Metric key generation and management

use std::fmt;

/// Identifies one computed metric: the subject it describes, the kind of metric and an
/// optional period sub-key (e.g. a quarter for filings-based scores).
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct MetricKey {
    pub subject: String,
    pub metric: String,
    /// Empty when the metric has no period dimension.
    pub period: String,
}

impl MetricKey {
    /// Create a key without a period
    pub fn new(subject: &str, metric: &str) -> Self {
        Self {
            subject: subject.to_string(),
            metric: metric.to_string(),
            period: String::new(),
        }
    }

    /// Create a key for a specific period
    pub fn with_period(subject: &str, metric: &str, period: &str) -> Self {
        Self {
            subject: subject.to_string(),
            metric: metric.to_string(),
            period: period.to_string(),
        }
    }

    pub fn has_period(&self) -> bool {
        !self.period.is_empty()
    }
}

impl fmt::Display for MetricKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.has_period() {
            write!(f, "{}:{}:{}", self.subject, self.metric, self.period)
        } else {
            write!(f, "{}:{}", self.subject, self.metric)
        }
    }
}
