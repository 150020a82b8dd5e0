//! Atende Configuration
//!
//! TOML configuration loading with environment variable support

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

pub const BILLING_TOKEN_ENV: &str = "ATENDE_BILLING_TOKEN";
pub const BILLING_URL_ENV: &str = "ATENDE_BILLING_URL";

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct Config {
    #[serde(default)]
    pub core: CoreConfig,
    #[serde(default)]
    pub billing: BillingConfig,
    #[serde(default)]
    pub retry: RetryConfig,
    #[serde(default)]
    pub pipeline: PipelineConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CoreConfig {
    pub data_dir: Option<String>,
    pub log_level: Option<String>,
    #[serde(default = "default_company_name")]
    pub company_name: String,
}

impl Default for CoreConfig {
    fn default() -> Self {
        Self {
            data_dir: None,
            log_level: None,
            company_name: default_company_name(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BillingConfig {
    #[serde(default)]
    pub base_url: String,
    #[serde(default)]
    pub token: Option<String>,
    #[serde(default = "default_product_type")]
    pub product_type: String,
    #[serde(default = "default_request_timeout_secs")]
    pub request_timeout_secs: u64,
}

impl Default for BillingConfig {
    fn default() -> Self {
        Self {
            base_url: String::new(),
            token: None,
            product_type: default_product_type(),
            request_timeout_secs: default_request_timeout_secs(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetryConfig {
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    #[serde(default = "default_payment_max_retries")]
    pub payment_max_retries: u32,
    #[serde(default = "default_base_delay_ms")]
    pub base_delay_ms: u64,
    #[serde(default = "default_upstream_timeout_secs")]
    pub upstream_timeout_secs: u64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_retries: default_max_retries(),
            payment_max_retries: default_payment_max_retries(),
            base_delay_ms: default_base_delay_ms(),
            upstream_timeout_secs: default_upstream_timeout_secs(),
        }
    }
}

impl RetryConfig {
    pub fn base_delay(&self) -> Duration {
        Duration::from_millis(self.base_delay_ms)
    }

    pub fn upstream_timeout(&self) -> Duration {
        Duration::from_secs(self.upstream_timeout_secs)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PipelineConfig {
    #[serde(default = "default_max_message_age_secs")]
    pub max_message_age_secs: u64,
    #[serde(default = "default_dedup_window_ms")]
    pub dedup_window_ms: u64,
    #[serde(default = "default_dedup_retention_ms")]
    pub dedup_retention_ms: u64,
    #[serde(default = "default_min_response_interval_ms")]
    pub min_response_interval_ms: u64,
    #[serde(default = "default_context_idle_secs")]
    pub context_idle_secs: u64,
    #[serde(default = "default_payment_idle_secs")]
    pub payment_idle_secs: u64,
    #[serde(default = "default_rate_limit_idle_secs")]
    pub rate_limit_idle_secs: u64,
    #[serde(default = "default_sweep_interval_secs")]
    pub sweep_interval_secs: u64,
    #[serde(default = "default_aftercare_delay_ms")]
    pub aftercare_delay_ms: u64,
    #[serde(default = "default_worker_idle_secs")]
    pub worker_idle_secs: u64,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            max_message_age_secs: default_max_message_age_secs(),
            dedup_window_ms: default_dedup_window_ms(),
            dedup_retention_ms: default_dedup_retention_ms(),
            min_response_interval_ms: default_min_response_interval_ms(),
            context_idle_secs: default_context_idle_secs(),
            payment_idle_secs: default_payment_idle_secs(),
            rate_limit_idle_secs: default_rate_limit_idle_secs(),
            sweep_interval_secs: default_sweep_interval_secs(),
            aftercare_delay_ms: default_aftercare_delay_ms(),
            worker_idle_secs: default_worker_idle_secs(),
        }
    }
}

fn default_company_name() -> String {
    "Atende Internet".to_string()
}

fn default_product_type() -> String {
    "internet".to_string()
}

fn default_request_timeout_secs() -> u64 {
    30
}

fn default_max_retries() -> u32 {
    3
}

fn default_payment_max_retries() -> u32 {
    2
}

fn default_base_delay_ms() -> u64 {
    1000
}

fn default_upstream_timeout_secs() -> u64 {
    20
}

fn default_max_message_age_secs() -> u64 {
    300
}

fn default_dedup_window_ms() -> u64 {
    5_000
}

fn default_dedup_retention_ms() -> u64 {
    10_000
}

fn default_min_response_interval_ms() -> u64 {
    1_000
}

fn default_context_idle_secs() -> u64 {
    3600
}

fn default_payment_idle_secs() -> u64 {
    3600
}

fn default_rate_limit_idle_secs() -> u64 {
    300
}

fn default_sweep_interval_secs() -> u64 {
    60
}

fn default_aftercare_delay_ms() -> u64 {
    2_000
}

fn default_worker_idle_secs() -> u64 {
    600
}

impl Config {
    pub fn load<P: AsRef<Path>>(path: P) -> anyhow::Result<Self> {
        let content = std::fs::read_to_string(path.as_ref())?;
        let mut config: Config = toml::from_str(&content)?;
        config.apply_env_overrides();
        config.validate()?;
        Ok(config)
    }

    pub fn default_path() -> Option<PathBuf> {
        dirs::config_dir().map(|dir| dir.join("atende").join("config.toml"))
    }

    pub fn apply_env_overrides(&mut self) {
        self.apply_overrides_from(|key| std::env::var(key).ok());
    }

    fn apply_overrides_from<F>(&mut self, lookup: F)
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(token) = lookup(BILLING_TOKEN_ENV).filter(|v| !v.trim().is_empty()) {
            self.billing.token = Some(token);
        }
        if let Some(url) = lookup(BILLING_URL_ENV).filter(|v| !v.trim().is_empty()) {
            self.billing.base_url = url;
        }
    }

    pub fn validate(&self) -> anyhow::Result<()> {
        let base_url = self.billing.base_url.trim();
        if base_url.is_empty() {
            anyhow::bail!("billing.base_url cannot be empty");
        }
        if !base_url.starts_with("http://") && !base_url.starts_with("https://") {
            anyhow::bail!("billing.base_url must be http(s): '{}'", base_url);
        }
        if self.billing.product_type.trim().is_empty() {
            anyhow::bail!("billing.product_type cannot be empty");
        }
        if self.billing.request_timeout_secs == 0 {
            anyhow::bail!("billing.request_timeout_secs must be greater than zero");
        }
        if self.core.company_name.trim().is_empty() {
            anyhow::bail!("core.company_name cannot be empty");
        }

        if self.retry.upstream_timeout_secs == 0 {
            anyhow::bail!("retry.upstream_timeout_secs must be greater than zero");
        }

        let pipeline = &self.pipeline;
        if pipeline.dedup_window_ms > pipeline.dedup_retention_ms {
            anyhow::bail!(
                "pipeline.dedup_window_ms ({}) cannot exceed pipeline.dedup_retention_ms ({})",
                pipeline.dedup_window_ms,
                pipeline.dedup_retention_ms
            );
        }
        if pipeline.sweep_interval_secs == 0 {
            anyhow::bail!("pipeline.sweep_interval_secs must be greater than zero");
        }
        if pipeline.max_message_age_secs == 0 {
            anyhow::bail!("pipeline.max_message_age_secs must be greater than zero");
        }
        for (name, value) in [
            ("pipeline.context_idle_secs", pipeline.context_idle_secs),
            ("pipeline.payment_idle_secs", pipeline.payment_idle_secs),
            ("pipeline.rate_limit_idle_secs", pipeline.rate_limit_idle_secs),
            ("pipeline.worker_idle_secs", pipeline.worker_idle_secs),
        ] {
            if value == 0 {
                anyhow::bail!("{} must be greater than zero", name);
            }
        }

        Ok(())
    }

    /// Data directory with `~` expanded; defaults to `~/.atende`.
    pub fn data_dir(&self) -> anyhow::Result<PathBuf> {
        let home = || dirs::home_dir().ok_or_else(|| anyhow::anyhow!("Home directory not found"));
        match self.core.data_dir.as_deref() {
            Some("~") => home(),
            Some(dir) if dir.starts_with("~/") => Ok(home()?.join(dir.trim_start_matches("~/"))),
            Some(dir) => Ok(PathBuf::from(dir)),
            None => Ok(home()?.join(".atende")),
        }
    }

    pub fn log_level(&self) -> &str {
        self.core.log_level.as_deref().unwrap_or("info")
    }
}
