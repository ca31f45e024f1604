use thiserror::Error;

const MAX_SUBJECT_LEN: usize = 64;
const MAX_METRIC_LEN: usize = 64;
const MAX_PERIOD_LEN: usize = 32;

#[derive(Error, Debug, PartialEq, Eq)]
pub enum ValidationError {
    #[error("Missing required parameter: {0}")]
    MissingParameter(String),

    #[error("Invalid subject: {0}")]
    InvalidSubject(String),

    #[error("Invalid metric name: {0}")]
    InvalidMetric(String),

    #[error("Invalid period: {0}")]
    InvalidPeriod(String),
}

// ':' separates key parts in logs and is never allowed inside one
fn is_key_char(c: char) -> bool {
    c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.')
}

/// Subjects are ticker-like identifiers: `AAPL`, `BRK.B`, `eth-usd`.
pub fn validate_subject(subject: &str) -> Result<(), ValidationError> {
    if subject.trim().is_empty() {
        return Err(ValidationError::MissingParameter("subject".to_string()));
    }
    if subject.len() > MAX_SUBJECT_LEN || !subject.chars().all(is_key_char) {
        return Err(ValidationError::InvalidSubject(subject.to_string()));
    }
    Ok(())
}

pub fn validate_metric(metric: &str) -> Result<(), ValidationError> {
    if metric.trim().is_empty() {
        return Err(ValidationError::MissingParameter("metric".to_string()));
    }
    let well_formed = metric
        .chars()
        .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || matches!(c, '-' | '_'));
    if metric.len() > MAX_METRIC_LEN || !well_formed {
        return Err(ValidationError::InvalidMetric(metric.to_string()));
    }
    Ok(())
}

/// An empty period means the metric has no period dimension.
pub fn validate_period(period: &str) -> Result<(), ValidationError> {
    if period.len() > MAX_PERIOD_LEN || !period.chars().all(is_key_char) {
        return Err(ValidationError::InvalidPeriod(period.to_string()));
    }
    Ok(())
}
