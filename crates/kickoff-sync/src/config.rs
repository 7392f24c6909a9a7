use std::time::Duration;

use kickoff_adapters::generator::{DEFAULT_BASE_URL, DEFAULT_MODEL};
use kickoff_adapters::GeneratorConfig;
use kickoff_storage::{BackoffPolicy, HttpClientConfig};

/// Environment-sourced pipeline configuration.
#[derive(Debug, Clone)]
pub struct AnalysisConfig {
    pub enabled: bool,
    pub interval_minutes: u64,
    pub feed_base_url: String,
    pub feed_timezone: String,
    pub feed_timeout_secs: u64,
    pub generator_api_key: Option<String>,
    pub generator_base_url: String,
    pub generator_model: String,
    pub generator_timeout_secs: u64,
    pub pacing_ms: u64,
    pub max_attempts: usize,
    pub retry_base_ms: u64,
    pub startup_delay_secs: u64,
    pub database_url: Option<String>,
    pub user_agent: String,
}

impl AnalysisConfig {
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let text = |key: &str| lookup(key).map(|v| v.trim().to_string()).filter(|v| !v.is_empty());
        let number = |key: &str, default: u64| {
            text(key)
                .and_then(|v| v.parse::<u64>().ok())
                .unwrap_or(default)
        };

        Self {
            enabled: text("ENABLE_AUTO_ANALYSIS")
                .map(|v| matches!(v.as_str(), "1" | "true" | "TRUE" | "True"))
                .unwrap_or(false),
            interval_minutes: number("ANALYSIS_CHECK_INTERVAL", 10).max(1),
            feed_base_url: text("API_BASE_URL")
                .unwrap_or_else(|| "http://localhost:5000/api/matches".to_string()),
            feed_timezone: text("ANALYSIS_FEED_TIMEZONE")
                .unwrap_or_else(|| "Africa/Cairo".to_string()),
            feed_timeout_secs: number("ANALYSIS_FEED_TIMEOUT_SECS", 15),
            generator_api_key: text("GROQ_API_KEY"),
            generator_base_url: text("GROQ_BASE_URL")
                .unwrap_or_else(|| DEFAULT_BASE_URL.to_string()),
            generator_model: text("GROQ_MODEL").unwrap_or_else(|| DEFAULT_MODEL.to_string()),
            generator_timeout_secs: number("ANALYSIS_GENERATOR_TIMEOUT_SECS", 60),
            pacing_ms: number("ANALYSIS_PACING_MS", 3000),
            max_attempts: number("ANALYSIS_MAX_ATTEMPTS", 3).max(1) as usize,
            retry_base_ms: number("ANALYSIS_RETRY_BASE_MS", 1000),
            startup_delay_secs: number("ANALYSIS_STARTUP_DELAY_SECS", 10),
            database_url: text("DATABASE_URL"),
            user_agent: text("KICKOFF_USER_AGENT").unwrap_or_else(|| "kickoff-bot/0.1".to_string()),
        }
    }

    /// `None` when the generator cannot be reached for lack of credentials.
    pub fn generator_config(&self) -> Option<GeneratorConfig> {
        let api_key = self.generator_api_key.clone()?;
        let mut config = GeneratorConfig::new(api_key);
        config.base_url = self.generator_base_url.clone();
        config.model = self.generator_model.clone();
        config.timeout = Duration::from_secs(self.generator_timeout_secs);
        config.user_agent = Some(self.user_agent.clone());
        Some(config)
    }

    pub fn feed_http(&self) -> HttpClientConfig {
        HttpClientConfig {
            timeout: Duration::from_secs(self.feed_timeout_secs),
            user_agent: Some(self.user_agent.clone()),
        }
    }

    pub fn backoff(&self) -> BackoffPolicy {
        BackoffPolicy::new(self.max_attempts, Duration::from_millis(self.retry_base_ms))
    }

    pub fn interval(&self) -> Duration {
        Duration::from_secs(self.interval_minutes.saturating_mul(60))
    }

    pub fn pacing(&self) -> Duration {
        Duration::from_millis(self.pacing_ms)
    }

    pub fn startup_delay(&self) -> Duration {
        Duration::from_secs(self.startup_delay_secs)
    }

    /// Why the scheduled pipeline will not start, if it will not.
    pub fn disabled_reason(&self) -> Option<&'static str> {
        if !self.enabled {
            Some("ENABLE_AUTO_ANALYSIS is not true")
        } else if self.generator_api_key.is_none() {
            Some("GROQ_API_KEY is required for auto-analysis")
        } else {
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn config(pairs: &[(&str, &str)]) -> AnalysisConfig {
        let env = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect::<HashMap<_, _>>();
        AnalysisConfig::from_lookup(|key| env.get(key).cloned())
    }

    #[test]
    fn defaults_leave_pipeline_disabled() {
        let config = config(&[]);
        assert!(!config.enabled);
        assert_eq!(config.interval_minutes, 10);
        assert_eq!(config.pacing(), Duration::from_secs(3));
        assert_eq!(config.backoff(), BackoffPolicy::new(3, Duration::from_millis(1000)));
        assert_eq!(config.feed_timezone, "Africa/Cairo");
        assert!(config.generator_config().is_none());
        assert_eq!(config.disabled_reason(), Some("ENABLE_AUTO_ANALYSIS is not true"));
    }

    #[test]
    fn missing_credentials_disable_an_enabled_pipeline() {
        let config = config(&[("ENABLE_AUTO_ANALYSIS", "true"), ("GROQ_API_KEY", "  ")]);
        assert!(config.enabled);
        assert_eq!(
            config.disabled_reason(),
            Some("GROQ_API_KEY is required for auto-analysis")
        );
    }

    #[test]
    fn knobs_are_read_from_environment() {
        let config = config(&[
            ("ENABLE_AUTO_ANALYSIS", "1"),
            ("GROQ_API_KEY", "gsk_test"),
            ("GROQ_MODEL", "llama-3.1-8b-instant"),
            ("ANALYSIS_CHECK_INTERVAL", "5"),
            ("ANALYSIS_PACING_MS", "0"),
            ("ANALYSIS_MAX_ATTEMPTS", "5"),
            ("API_BASE_URL", "https://feed.example/api/matches"),
        ]);
        assert_eq!(config.disabled_reason(), None);
        assert_eq!(config.interval(), Duration::from_secs(300));
        assert!(config.pacing().is_zero());
        assert_eq!(config.backoff().max_attempts, 5);
        let generator = config.generator_config().expect("generator config");
        assert_eq!(generator.api_key, "gsk_test");
        assert_eq!(generator.model, "llama-3.1-8b-instant");
        assert_eq!(config.feed_base_url, "https://feed.example/api/matches");
    }

    #[test]
    fn invalid_numbers_fall_back_to_defaults() {
        let config = config(&[
            ("ANALYSIS_CHECK_INTERVAL", "0"),
            ("ANALYSIS_PACING_MS", "soon"),
        ]);
        assert_eq!(config.interval_minutes, 1);
        assert_eq!(config.pacing_ms, 3000);
    }

    #[test]
    fn absurd_interval_saturates() {
        let huge = u64::MAX.to_string();
        let config = config(&[("ANALYSIS_CHECK_INTERVAL", huge.as_str())]);
        assert_eq!(config.interval_minutes, u64::MAX);
        assert_eq!(config.interval(), Duration::from_secs(u64::MAX));
    }
}
