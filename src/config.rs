// Configuration for:
// - Database connection string
// - Server listening address/port
// - Refresh coordinator tuning (TTL bounds, staleness, concurrency, timeouts)
// - Upstream rate limit and metric endpoints

use dotenv::dotenv;
use std::env;
use std::str::FromStr;
use std::time::Duration;
use thiserror::Error;

#[derive(Error, Debug, PartialEq)]
pub enum ConfigError {
    #[error("Invalid configuration: {0}")]
    Invalid(String),

    #[error("Malformed value for {name}: {value}")]
    Malformed { name: String, value: String },
}

/// Hours of the day (UTC, `[start, end)`) during which the upstream source is active.
/// Weekends are always inactive.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ActiveHours {
    pub start_hour: u32,
    pub end_hour: u32,
}

impl Default for ActiveHours {
    /// US equity session, padded to whole hours.
    fn default() -> Self {
        Self {
            start_hour: 13,
            end_hour: 21,
        }
    }
}

impl FromStr for ActiveHours {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let malformed = || ConfigError::Malformed {
            name: "ACTIVE_HOURS_UTC".to_string(),
            value: s.to_string(),
        };
        let (start, end) = s.split_once('-').ok_or_else(malformed)?;
        let start_hour: u32 = start.trim().parse().map_err(|_| malformed())?;
        let end_hour: u32 = end.trim().parse().map_err(|_| malformed())?;
        if start_hour >= end_hour || end_hour > 24 {
            return Err(malformed());
        }
        Ok(Self {
            start_hour,
            end_hour,
        })
    }
}

#[derive(Debug, Clone)]
pub struct CoordinatorConfig {
    pub min_ttl_seconds: u64,
    pub max_ttl_seconds: u64,
    /// Share of the TTL during which an entry is fresh; the remainder is served stale.
    pub stale_fraction: f64,
    pub max_concurrent_refreshes: usize,
    pub gate_acquire_timeout: Duration,
    /// Hard ceiling on entry age regardless of TTL.
    pub absolute_max_age_seconds: u64,
    /// How long a stale entry may be served from memory.
    pub stale_local_ttl: Duration,
    /// How long a caller waits on an in-flight refresh before falling back.
    pub request_timeout: Duration,
    pub max_background_refreshes: usize,
    pub memory_capacity: u64,
    /// Compute retries per call path, never more than one.
    pub compute_retries: usize,
    pub retry_delay: Duration,
    pub active_hours: ActiveHours,
}

impl Default for CoordinatorConfig {
    fn default() -> Self {
        Self {
            min_ttl_seconds: 300,
            max_ttl_seconds: 86_400,
            stale_fraction: 0.75,
            max_concurrent_refreshes: 2,
            gate_acquire_timeout: Duration::from_millis(500),
            absolute_max_age_seconds: 172_800,
            stale_local_ttl: Duration::from_secs(60),
            request_timeout: Duration::from_secs(10),
            max_background_refreshes: num_cpus::get().max(1) * 2,
            memory_capacity: 10_000,
            compute_retries: 1,
            retry_delay: Duration::from_millis(200),
            active_hours: ActiveHours::default(),
        }
    }
}

/// Upper bound for `absolute_max_age_seconds`, and through it for `max_ttl_seconds`.
pub const MAX_AGE_CEILING_SECONDS: u64 = 10 * 365 * 86_400;

impl CoordinatorConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.min_ttl_seconds == 0 {
            return Err(ConfigError::Invalid("min_ttl_seconds must be positive".into()));
        }
        if self.min_ttl_seconds > self.max_ttl_seconds {
            return Err(ConfigError::Invalid(format!(
                "min_ttl_seconds ({}) exceeds max_ttl_seconds ({})",
                self.min_ttl_seconds, self.max_ttl_seconds
            )));
        }
        if !(self.stale_fraction > 0.0 && self.stale_fraction <= 1.0) {
            return Err(ConfigError::Invalid(format!(
                "stale_fraction must be in (0, 1], got {}",
                self.stale_fraction
            )));
        }
        if self.absolute_max_age_seconds < self.max_ttl_seconds {
            return Err(ConfigError::Invalid(format!(
                "absolute_max_age_seconds ({}) must be at least max_ttl_seconds ({})",
                self.absolute_max_age_seconds, self.max_ttl_seconds
            )));
        }
        if self.absolute_max_age_seconds > MAX_AGE_CEILING_SECONDS {
            return Err(ConfigError::Invalid(format!(
                "absolute_max_age_seconds ({}) exceeds the {} second ceiling",
                self.absolute_max_age_seconds, MAX_AGE_CEILING_SECONDS
            )));
        }
        if self.max_concurrent_refreshes == 0 {
            return Err(ConfigError::Invalid("max_concurrent_refreshes must be positive".into()));
        }
        if self.compute_retries > 1 {
            return Err(ConfigError::Invalid("compute_retries may be at most 1".into()));
        }
        Ok(())
    }

    /// Clamp a TTL into `[min_ttl_seconds, max_ttl_seconds]`.
    pub fn clamp_ttl(&self, ttl_seconds: u64) -> u64 {
        ttl_seconds.clamp(self.min_ttl_seconds, self.max_ttl_seconds)
    }
}

#[derive(Debug, Clone)]
pub struct Config {
    pub database_url: String,
    pub server_host: String,
    pub server_port: u16,
    pub coordinator: CoordinatorConfig,
    pub upstream_max_requests: usize,
    pub upstream_window: Duration,
    pub upstream_timeout_secs: u64,
    /// metric name → URL template containing `{subject}`
    pub metric_endpoints: Vec<(String, String)>,
}

fn env_or<T: FromStr>(name: &str, default: T) -> T {
    env::var(name)
        .ok()
        .and_then(|v| v.trim().parse().ok())
        .unwrap_or(default)
}

/// Parse `metric=url,metric=url` pairs, skipping malformed items.
pub fn parse_metric_endpoints(raw: &str) -> Vec<(String, String)> {
    raw.split(',')
        .filter_map(|pair| {
            let (metric, url) = pair.split_once('=')?;
            let (metric, url) = (metric.trim(), url.trim());
            (!metric.is_empty() && !url.is_empty()).then(|| (metric.to_string(), url.to_string()))
        })
        .collect()
}

impl Config {
    pub fn from_env() -> Self {
        dotenv().ok();

        let defaults = CoordinatorConfig::default();
        let coordinator = CoordinatorConfig {
            min_ttl_seconds: env_or("MIN_TTL_SECONDS", defaults.min_ttl_seconds),
            max_ttl_seconds: env_or("MAX_TTL_SECONDS", defaults.max_ttl_seconds),
            stale_fraction: env_or("STALE_FRACTION", defaults.stale_fraction),
            max_concurrent_refreshes: env_or(
                "MAX_CONCURRENT_REFRESHES",
                defaults.max_concurrent_refreshes,
            ),
            gate_acquire_timeout: Duration::from_millis(env_or("GATE_ACQUIRE_TIMEOUT_MS", 500)),
            absolute_max_age_seconds: env_or(
                "ABSOLUTE_MAX_AGE_SECONDS",
                defaults.absolute_max_age_seconds,
            ),
            stale_local_ttl: Duration::from_secs(env_or("STALE_LOCAL_TTL_SECONDS", 60)),
            request_timeout: Duration::from_millis(env_or("REQUEST_TIMEOUT_MS", 10_000)),
            max_background_refreshes: env_or(
                "MAX_BACKGROUND_REFRESHES",
                defaults.max_background_refreshes,
            ),
            memory_capacity: env_or("MEMORY_CACHE_CAPACITY", defaults.memory_capacity),
            compute_retries: defaults.compute_retries,
            retry_delay: defaults.retry_delay,
            active_hours: env_or("ACTIVE_HOURS_UTC", defaults.active_hours),
        };

        Self {
            database_url: env::var("DATABASE_URL")
                .unwrap_or_else(|_| "sqlite:metrics.db".to_string()),
            server_host: env::var("SERVER_HOST").unwrap_or_else(|_| "127.0.0.1".to_string()),
            server_port: env_or("SERVER_PORT", 8080),
            coordinator,
            upstream_max_requests: env_or("UPSTREAM_MAX_REQUESTS", 5),
            upstream_window: Duration::from_secs(env_or("UPSTREAM_WINDOW_SECS", 1)),
            upstream_timeout_secs: env_or("UPSTREAM_TIMEOUT_SECS", 30),
            metric_endpoints: env::var("METRIC_ENDPOINTS")
                .map(|raw| parse_metric_endpoints(&raw))
                .unwrap_or_default(),
        }
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        self.coordinator.validate()?;
        if self.upstream_max_requests == 0 {
            return Err(ConfigError::Invalid("upstream_max_requests must be positive".into()));
        }
        if self.upstream_window.is_zero() {
            return Err(ConfigError::Invalid("upstream window must be positive".into()));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_coordinator_config_is_valid() {
        assert_eq!(CoordinatorConfig::default().validate(), Ok(()));
    }

    #[test]
    fn test_rejects_inconsistent_bounds() {
        let config = CoordinatorConfig {
            min_ttl_seconds: 600,
            max_ttl_seconds: 300,
            ..Default::default()
        };
        assert!(config.validate().is_err());

        let config = CoordinatorConfig {
            absolute_max_age_seconds: 100,
            ..Default::default()
        };
        assert!(config.validate().is_err());

        let config = CoordinatorConfig {
            stale_fraction: 1.5,
            ..Default::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_rejects_unbounded_ages() {
        let config = CoordinatorConfig {
            absolute_max_age_seconds: u64::MAX,
            ..Default::default()
        };
        assert!(matches!(config.validate(), Err(ConfigError::Invalid(_))));

        let config = CoordinatorConfig {
            max_ttl_seconds: u64::MAX,
            absolute_max_age_seconds: u64::MAX,
            ..Default::default()
        };
        assert!(config.validate().is_err());

        let config = CoordinatorConfig {
            max_ttl_seconds: MAX_AGE_CEILING_SECONDS,
            absolute_max_age_seconds: MAX_AGE_CEILING_SECONDS,
            ..Default::default()
        };
        assert_eq!(config.validate(), Ok(()));
    }

    #[test]
    fn test_active_hours_parsing() {
        assert_eq!(
            "9-17".parse::<ActiveHours>(),
            Ok(ActiveHours {
                start_hour: 9,
                end_hour: 17
            })
        );
        assert!("17-9".parse::<ActiveHours>().is_err());
        assert!("nine-5".parse::<ActiveHours>().is_err());
    }

    #[test]
    fn test_metric_endpoint_parsing_skips_garbage() {
        let endpoints =
            parse_metric_endpoints("quote=https://q.example/{subject}, broken ,=x,sentiment=https://s.example/{subject}");
        assert_eq!(
            endpoints,
            vec![
                ("quote".to_string(), "https://q.example/{subject}".to_string()),
                ("sentiment".to_string(), "https://s.example/{subject}".to_string()),
            ]
        );
    }
}
