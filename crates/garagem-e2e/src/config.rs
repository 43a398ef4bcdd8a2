//! Harness configuration.
//!
//! Layering, lowest to highest precedence:
//!
//! 1. built-in defaults ([`HarnessConfig::default`])
//! 2. a YAML config file ([`HarnessConfig::load`])
//! 3. the suite's `base_url` and `defaults` block
//! 4. environment (`G40_BASE_URL`, `CHROMIUM_PATH`)
//! 5. command-line flags (applied by the CLI)

use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

use crate::result::{HarnessError, HarnessResult};
use crate::retry::RetryPolicy;

/// Environment variable overriding the base URL
pub const ENV_BASE_URL: &str = "G40_BASE_URL";
/// Environment variable pointing at a Chromium binary
pub const ENV_CHROMIUM_PATH: &str = "CHROMIUM_PATH";

/// Default application URL
pub const DEFAULT_BASE_URL: &str = "http://127.0.0.1:3000";

/// Durations as integer milliseconds in config and scenario files
pub mod duration_ms {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    /// Serialize as milliseconds
    pub fn serialize<S: Serializer>(value: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_u64(u64::try_from(value.as_millis()).unwrap_or(u64::MAX))
    }

    /// Deserialize from milliseconds
    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        u64::deserialize(deserializer).map(Duration::from_millis)
    }
}

/// Browser launch settings
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct BrowserSettings {
    /// Run in headless mode
    pub headless: bool,
    /// Viewport width
    pub viewport_width: u32,
    /// Viewport height
    pub viewport_height: u32,
    /// Path to chromium binary (None = auto-detect)
    pub chromium_path: Option<String>,
    /// Sandbox mode (disable for containers)
    pub sandbox: bool,
    /// Extra command-line switches
    pub args: Vec<String>,
}

impl Default for BrowserSettings {
    fn default() -> Self {
        Self {
            headless: true,
            viewport_width: 1280,
            viewport_height: 720,
            chromium_path: None,
            sandbox: true,
            args: vec!["--disable-dev-shm-usage".to_string()],
        }
    }
}

impl BrowserSettings {
    /// Set viewport dimensions
    #[must_use]
    pub const fn with_viewport(mut self, width: u32, height: u32) -> Self {
        self.viewport_width = width;
        self.viewport_height = height;
        self
    }

    /// Set headless mode
    #[must_use]
    pub const fn with_headless(mut self, headless: bool) -> Self {
        self.headless = headless;
        self
    }

    /// Set chromium path
    #[must_use]
    pub fn with_chromium_path(mut self, path: impl Into<String>) -> Self {
        self.chromium_path = Some(path.into());
        self
    }

    /// Disable sandbox (for containers/CI)
    #[must_use]
    pub const fn with_no_sandbox(mut self) -> Self {
        self.sandbox = false;
        self
    }
}

/// Harness-wide settings
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct HarnessConfig {
    /// Application base URL; relative navigation targets are joined to it
    pub base_url: String,
    /// Per-step timeout when a step does not set one
    #[serde(rename = "step_timeout_ms", with = "duration_ms")]
    pub step_timeout: Duration,
    /// Timeout for navigation steps
    #[serde(rename = "navigation_timeout_ms", with = "duration_ms")]
    pub navigation_timeout: Duration,
    /// Interval between resolution rounds
    #[serde(rename = "poll_interval_ms", with = "duration_ms")]
    pub poll_interval: Duration,
    /// Retry policy for interaction steps
    pub retry: RetryPolicy,
    /// Browser settings
    pub browser: BrowserSettings,
    /// Scenarios run at once, each in its own session
    pub concurrency: usize,
}

impl Default for HarnessConfig {
    fn default() -> Self {
        Self {
            base_url: DEFAULT_BASE_URL.to_string(),
            step_timeout: Duration::from_secs(10),
            navigation_timeout: Duration::from_secs(15),
            poll_interval: Duration::from_millis(50),
            retry: RetryPolicy::default(),
            browser: BrowserSettings::default(),
            concurrency: 1,
        }
    }
}

impl HarnessConfig {
    /// Load a YAML config file
    ///
    /// # Errors
    ///
    /// Returns error if the file cannot be read or parsed, or is invalid
    pub fn load(path: &Path) -> HarnessResult<Self> {
        let content = std::fs::read_to_string(path)?;
        let config: Self = serde_yaml_ng::from_str(&content)
            .map_err(|e| HarnessError::config(format!("{}: {e}", path.display())))?;
        config.validate()?;
        Ok(config)
    }

    /// Apply `G40_BASE_URL` and `CHROMIUM_PATH` from the process environment
    #[must_use]
    pub fn with_env_overrides(self) -> Self {
        self.with_overrides_from(|key| std::env::var(key).ok())
    }

    /// Apply environment-style overrides from a lookup function
    #[must_use]
    pub fn with_overrides_from<F>(mut self, lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(url) = lookup(ENV_BASE_URL).filter(|v| !v.trim().is_empty()) {
            self.base_url = url;
        }
        if let Some(path) = lookup(ENV_CHROMIUM_PATH).filter(|v| !v.trim().is_empty()) {
            self.browser.chromium_path = Some(path);
        }
        self
    }

    /// Set the base URL
    #[must_use]
    pub fn with_base_url(mut self, url: impl Into<String>) -> Self {
        self.base_url = url.into();
        self
    }

    /// Set the default step timeout
    #[must_use]
    pub const fn with_step_timeout(mut self, timeout: Duration) -> Self {
        self.step_timeout = timeout;
        self
    }

    /// Set the retry policy
    #[must_use]
    pub const fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    /// Set concurrency
    #[must_use]
    pub const fn with_concurrency(mut self, concurrency: usize) -> Self {
        self.concurrency = concurrency;
        self
    }

    /// Check the settings are usable
    ///
    /// # Errors
    ///
    /// Returns error for zero timeouts, zero concurrency, an empty attempt
    /// budget, or a base URL without a scheme
    pub fn validate(&self) -> HarnessResult<()> {
        if !(self.base_url.starts_with("http://") || self.base_url.starts_with("https://")) {
            return Err(HarnessError::config(format!(
                "base_url must be an http(s) URL, got '{}'",
                self.base_url
            )));
        }
        if self.step_timeout.is_zero() || self.navigation_timeout.is_zero() {
            return Err(HarnessError::config("timeouts must be greater than zero"));
        }
        if self.poll_interval.is_zero() {
            return Err(HarnessError::config("poll_interval_ms must be greater than zero"));
        }
        if self.retry.max_attempts == 0 {
            return Err(HarnessError::config("retry.max_attempts must be at least 1"));
        }
        if self.concurrency == 0 {
            return Err(HarnessError::config("concurrency must be at least 1"));
        }
        Ok(())
    }

    /// Join a navigation target to the base URL. Absolute URLs pass through.
    #[must_use]
    pub fn resolve_url(&self, target: &str) -> String {
        if target.starts_with("http://") || target.starts_with("https://") {
            return target.to_string();
        }
        format!(
            "{}/{}",
            self.base_url.trim_end_matches('/'),
            target.trim_start_matches('/')
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    mod defaults_tests {
        use super::*;

        #[test]
        fn test_defaults() {
            let config = HarnessConfig::default();
            assert_eq!(config.base_url, "http://127.0.0.1:3000");
            assert_eq!(config.step_timeout, Duration::from_secs(10));
            assert_eq!(config.retry.max_attempts, 3);
            assert_eq!(config.browser.viewport_width, 1280);
            assert!(config.browser.args.contains(&"--disable-dev-shm-usage".to_string()));
            assert!(config.validate().is_ok());
        }

        #[test]
        fn test_browser_builders() {
            let settings = BrowserSettings::default()
                .with_viewport(800, 600)
                .with_headless(false)
                .with_no_sandbox()
                .with_chromium_path("/usr/bin/chromium");
            assert_eq!(settings.viewport_height, 600);
            assert!(!settings.headless);
            assert!(!settings.sandbox);
            assert_eq!(settings.chromium_path.as_deref(), Some("/usr/bin/chromium"));
        }
    }

    mod layering_tests {
        use super::*;

        #[test]
        fn test_load_partial_yaml() {
            let mut file = tempfile::NamedTempFile::new().unwrap();
            writeln!(file, "base_url: http://staging:8080\nstep_timeout_ms: 2500").unwrap();
            let config = HarnessConfig::load(file.path()).unwrap();
            assert_eq!(config.base_url, "http://staging:8080");
            assert_eq!(config.step_timeout, Duration::from_millis(2500));
            assert_eq!(config.navigation_timeout, Duration::from_secs(15));
        }

        #[test]
        fn test_load_retry_block() {
            let mut file = tempfile::NamedTempFile::new().unwrap();
            writeln!(
                file,
                "retry:\n  max_attempts: 5\n  backoff:\n    fixed: {{ delay_ms: 300 }}"
            )
            .unwrap();
            let config = HarnessConfig::load(file.path()).unwrap();
            assert_eq!(config.retry.max_attempts, 5);
            assert_eq!(config.retry.backoff.delay(3), Duration::from_millis(300));
        }

        #[test]
        fn test_load_rejects_invalid() {
            let mut file = tempfile::NamedTempFile::new().unwrap();
            writeln!(file, "concurrency: 0").unwrap();
            assert!(HarnessConfig::load(file.path()).is_err());
        }

        #[test]
        fn test_env_overrides() {
            let config = HarnessConfig::default().with_overrides_from(|key| match key {
                ENV_BASE_URL => Some("http://10.0.0.5:3000".to_string()),
                ENV_CHROMIUM_PATH => Some("/opt/chrome".to_string()),
                _ => None,
            });
            assert_eq!(config.base_url, "http://10.0.0.5:3000");
            assert_eq!(config.browser.chromium_path.as_deref(), Some("/opt/chrome"));
        }

        #[test]
        fn test_blank_env_ignored() {
            let config = HarnessConfig::default().with_overrides_from(|_| Some("  ".to_string()));
            assert_eq!(config.base_url, DEFAULT_BASE_URL);
            assert!(config.browser.chromium_path.is_none());
        }
    }

    mod url_tests {
        use super::*;

        #[test]
        fn test_resolve_relative_and_absolute() {
            let config = HarnessConfig::default().with_base_url("http://127.0.0.1:3000/");
            assert_eq!(config.resolve_url("/login"), "http://127.0.0.1:3000/login");
            assert_eq!(config.resolve_url("estoque"), "http://127.0.0.1:3000/estoque");
            assert_eq!(config.resolve_url("https://other/x"), "https://other/x");
        }

        #[test]
        fn test_scheme_required() {
            let config = HarnessConfig::default().with_base_url("127.0.0.1:3000");
            assert!(config.validate().is_err());
        }
    }
}
