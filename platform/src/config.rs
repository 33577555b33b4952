use serde::{Deserialize, Serialize};
use std::time::Duration;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PlatformConfig {
    pub region: String,
    pub account: String,
    pub role_name: String,
    pub poll_interval: Duration,
    /// Overrides the framework image looked up from the region table.
    pub image_uri: Option<String>,
    pub volume_size_gb: u32,
    pub max_runtime: Duration,
}

impl Default for PlatformConfig {
    fn default() -> Self {
        Self {
            region: "us-east-2".to_string(),
            account: String::new(),
            role_name: "ml-sagemaker-execution-role".to_string(),
            poll_interval: Duration::from_secs(30),
            image_uri: None,
            volume_size_gb: 30,
            max_runtime: Duration::from_secs(24 * 60 * 60),
        }
    }
}

impl PlatformConfig {
    pub fn new(account: impl Into<String>) -> Self {
        Self {
            account: account.into(),
            ..Self::default()
        }
    }

    pub fn with_region(mut self, region: impl Into<String>) -> Self {
        self.region = region.into();
        self
    }

    pub fn with_role_name(mut self, role_name: impl Into<String>) -> Self {
        self.role_name = role_name.into();
        self
    }

    pub fn with_poll_interval(mut self, poll_interval: Duration) -> Self {
        self.poll_interval = poll_interval;
        self
    }

    pub fn with_image_uri(mut self, image_uri: impl Into<String>) -> Self {
        self.image_uri = Some(image_uri.into());
        self
    }

    pub fn role_arn(&self) -> String {
        format!("arn:aws:iam::{}:role/{}", self.account, self.role_name)
    }

    pub fn default_bucket(&self) -> String {
        format!("sagemaker-{}-{}", self.region, self.account)
    }

    pub fn validate(&self) -> Result<(), String> {
        if self.region.is_empty() {
            return Err("Region cannot be empty".to_string());
        }

        if self.account.is_empty() {
            return Err("Account cannot be empty".to_string());
        }

        if !self.account.chars().all(|c| c.is_ascii_digit()) {
            return Err(format!("Account must be numeric, got '{}'", self.account));
        }

        if self.role_name.is_empty() {
            return Err("Role name cannot be empty".to_string());
        }

        if self.poll_interval.is_zero() {
            return Err("Poll interval must be greater than 0".to_string());
        }

        if self.volume_size_gb == 0 {
            return Err("Volume size must be greater than 0".to_string());
        }

        if self.max_runtime.is_zero() {
            return Err("Max runtime must be greater than 0".to_string());
        }

        Ok(())
    }
}
