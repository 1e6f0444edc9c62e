//! Configuration types.

use std::time::Duration;

use crate::error::ConfigError;

/// Onboarding workflow configuration, built from environment variables.
#[derive(Debug, Clone)]
pub struct OnboardingConfig {
    /// Base URL of the onboarding/auth REST API.
    pub api_base_url: String,
    /// Port the REST surface listens on.
    pub http_port: u16,
    /// Delay before the first verification poll after submission.
    pub poll_initial_delay: Duration,
    /// Fixed interval between verification polls.
    pub poll_interval: Duration,
    /// Upper bound on a guard's session check.
    pub guard_timeout: Duration,
    /// Whether the guard may attempt one session refresh on Unauthorized.
    pub guard_refresh: bool,
}

impl Default for OnboardingConfig {
    fn default() -> Self {
        Self {
            api_base_url: "http://localhost:3000/api".to_string(),
            http_port: 8080,
            poll_initial_delay: Duration::from_secs(2),
            poll_interval: Duration::from_secs(10),
            guard_timeout: Duration::from_secs(5),
            guard_refresh: true,
        }
    }
}

impl OnboardingConfig {
    /// Build config from environment variables, falling back to defaults for
    /// anything unset. Set-but-unparseable values are an error.
    pub fn from_env() -> Result<Self, ConfigError> {
        let defaults = Self::default();

        let api_base_url = std::env::var("ONBOARDING_API_URL")
            .map(|url| url.trim_end_matches('/').to_string())
            .unwrap_or(defaults.api_base_url);

        let http_port = parse_env("ONBOARDING_PORT")?.unwrap_or(defaults.http_port);

        let poll_initial_delay = parse_env("ONBOARDING_POLL_INITIAL_DELAY_MS")?
            .map(Duration::from_millis)
            .unwrap_or(defaults.poll_initial_delay);

        let poll_interval = parse_env("ONBOARDING_POLL_INTERVAL_SECS")?
            .map(Duration::from_secs)
            .unwrap_or(defaults.poll_interval);
        if poll_interval.is_zero() {
            return Err(ConfigError::InvalidValue {
                key: "ONBOARDING_POLL_INTERVAL_SECS".to_string(),
                message: "must be greater than zero".to_string(),
            });
        }

        let guard_timeout = parse_env("ONBOARDING_GUARD_TIMEOUT_MS")?
            .map(Duration::from_millis)
            .unwrap_or(defaults.guard_timeout);

        let guard_refresh = parse_env("ONBOARDING_GUARD_REFRESH")?.unwrap_or(defaults.guard_refresh);

        Ok(Self {
            api_base_url,
            http_port,
            poll_initial_delay,
            poll_interval,
            guard_timeout,
            guard_refresh,
        })
    }
}

fn parse_env<T>(key: &str) -> Result<Option<T>, ConfigError>
where
    T: std::str::FromStr,
    T::Err: std::fmt::Display,
{
    match std::env::var(key) {
        Ok(raw) => raw
            .trim()
            .parse()
            .map(Some)
            .map_err(|e: T::Err| ConfigError::InvalidValue {
                key: key.to_string(),
                message: e.to_string(),
            }),
        Err(_) => Ok(None),
    }
}
