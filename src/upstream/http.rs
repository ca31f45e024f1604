use crate::cache::MetricKey;
use crate::upstream::engine::{ComputeEngine, ComputeError, Computed};
use crate::upstream::rate_limiter::UpstreamRateLimiter;
use async_trait::async_trait;
use reqwest::header::CACHE_CONTROL;
use reqwest::StatusCode;
use serde_json::Value;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info};

/// Fetches a metric payload as JSON from a templated URL.
///
/// The template may contain `{subject}`, `{metric}` and `{period}` placeholders. A
/// `Cache-Control: max-age=N` response header is passed on as a TTL hint.
pub struct HttpJsonEngine {
    client: reqwest::Client,
    url_template: String,
    limiter: Arc<UpstreamRateLimiter>,
}

impl HttpJsonEngine {
    pub fn new(
        url_template: &str,
        limiter: Arc<UpstreamRateLimiter>,
        timeout: Duration,
    ) -> Result<Self, ComputeError> {
        let client = reqwest::Client::builder().timeout(timeout).build()?;
        info!("Initializing HTTP compute engine for {}", url_template);

        Ok(Self {
            client,
            url_template: url_template.to_string(),
            limiter,
        })
    }

    pub fn url_for(&self, key: &MetricKey) -> String {
        self.url_template
            .replace("{subject}", &key.subject)
            .replace("{metric}", &key.metric)
            .replace("{period}", &key.period)
    }
}

/// Extract `max-age` seconds from a Cache-Control header value.
pub fn max_age_seconds(cache_control: &str) -> Option<u64> {
    cache_control
        .split(',')
        .filter_map(|directive| directive.trim().strip_prefix("max-age="))
        .find_map(|seconds| seconds.trim().parse().ok())
}

#[async_trait]
impl ComputeEngine for HttpJsonEngine {
    async fn compute(&self, key: &MetricKey) -> Result<Computed, ComputeError> {
        let url = self.url_for(key);

        self.limiter.acquire_slot().await;
        debug!(%key, url = %url, "fetching upstream payload");
        let response = self.client.get(&url).send().await?;

        let status = response.status();
        if status == StatusCode::TOO_MANY_REQUESTS {
            return Err(ComputeError::RateLimited);
        }
        if !status.is_success() {
            return Err(ComputeError::Status {
                status: status.as_u16(),
            });
        }

        let ttl_hint = response
            .headers()
            .get(CACHE_CONTROL)
            .and_then(|value| value.to_str().ok())
            .and_then(max_age_seconds)
            .filter(|ttl| *ttl > 0);

        let value: Value = response
            .json()
            .await
            .map_err(|e| ComputeError::Parse(e.to_string()))?;

        let mut computed = Computed::new(value).with_metadata("source_url", Value::String(url));
        if let Some(ttl) = ttl_hint {
            computed = computed.with_ttl_hint(ttl);
        }
        Ok(computed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::SystemClock;

    #[test]
    fn test_url_template_substitution() {
        let limiter = Arc::new(UpstreamRateLimiter::new(
            1,
            Duration::from_secs(1),
            Arc::new(SystemClock),
        ));
        let engine = HttpJsonEngine::new(
            "https://data.example/{metric}/{subject}?period={period}",
            limiter,
            Duration::from_secs(5),
        )
        .unwrap();

        let key = MetricKey::with_period("AAPL", "insider-sentiment", "2024Q1");
        assert_eq!(
            engine.url_for(&key),
            "https://data.example/insider-sentiment/AAPL?period=2024Q1"
        );
    }

    #[test]
    fn test_max_age_parsing() {
        assert_eq!(max_age_seconds("public, max-age=900"), Some(900));
        assert_eq!(max_age_seconds("no-cache"), None);
        assert_eq!(max_age_seconds("max-age=abc, s-maxage=10"), None);
    }
}
