//! Run configuration: an optional TOML file plus the `AWS_ACCOUNT` environment variable.

use platform::{Framework, Hyperparameters, PlatformConfig, ResourceShape};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;

/// Environment variable holding the AWS account id.
pub const ACCOUNT_ENV: &str = "AWS_ACCOUNT";

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Required environment variable {name} is not set")]
    MissingEnv { name: &'static str },

    #[error("Failed to read config file '{path}': {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to parse config file: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("Failed to render config: {0}")]
    Render(#[from] toml::ser::Error),

    #[error("Invalid configuration: {message}")]
    Invalid { message: String },
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct DeployConfig {
    /// Read from `AWS_ACCOUNT`, never from the file.
    #[serde(skip)]
    pub account: String,
    pub region: String,
    pub role_name: String,
    /// Local CSV dataset, uploaded for training and sampled for the test prediction.
    pub data_path: PathBuf,
    pub key_prefix: String,
    pub poll_interval_secs: u64,
    pub image_uri: Option<String>,
    pub training: TrainingConfig,
    pub inference: InferenceConfig,
}

impl Default for DeployConfig {
    fn default() -> Self {
        Self {
            account: String::new(),
            region: "us-east-2".to_string(),
            role_name: "ml-sagemaker-execution-role".to_string(),
            data_path: PathBuf::from("./data/input/housing.csv"),
            key_prefix: "sklearn-boston-housing".to_string(),
            poll_interval_secs: 30,
            image_uri: None,
            training: TrainingConfig::default(),
            inference: InferenceConfig::default(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct TrainingConfig {
    pub entry_point: String,
    pub source_dir: PathBuf,
    pub framework_version: String,
    pub instance_count: u32,
    pub instance_type: String,
    pub hyperparameters: Hyperparameters,
}

impl Default for TrainingConfig {
    fn default() -> Self {
        let shape = ResourceShape::training();
        Self {
            entry_point: "sklearn-boston-housing.py".to_string(),
            source_dir: PathBuf::from("./src/train_serve/"),
            framework_version: Framework::default().version,
            instance_count: shape.instance_count,
            instance_type: shape.instance_type,
            hyperparameters: Hyperparameters::default(),
        }
    }
}

impl TrainingConfig {
    pub fn resources(&self) -> ResourceShape {
        ResourceShape::new(self.instance_count, self.instance_type.clone())
    }

    pub fn framework(&self) -> Framework {
        Framework {
            version: self.framework_version.clone(),
            ..Framework::default()
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct InferenceConfig {
    pub instance_count: u32,
    pub instance_type: String,
    /// Leading dataset rows sent in the test prediction.
    pub sample_rows: usize,
    /// Label column removed from the prediction payload.
    pub target_column: String,
}

impl Default for InferenceConfig {
    fn default() -> Self {
        let shape = ResourceShape::hosting();
        Self {
            instance_count: shape.instance_count,
            instance_type: shape.instance_type,
            sample_rows: 5,
            target_column: "medv".to_string(),
        }
    }
}

impl InferenceConfig {
    pub fn resources(&self) -> ResourceShape {
        ResourceShape::new(self.instance_count, self.instance_type.clone())
    }
}

impl DeployConfig {
    /// Resolve the run configuration once at startup.
    ///
    /// File values (or defaults) come first, `region` overrides the file, and
    /// the account always comes from `AWS_ACCOUNT`. The result is validated.
    pub fn load(path: Option<&Path>, region: Option<String>) -> Result<Self, ConfigError> {
        let mut config = match path {
            Some(path) => Self::from_file(path)?,
            None => Self::default(),
        };

        if let Some(region) = region {
            config.region = region;
        }

        config.account = std::env::var(ACCOUNT_ENV)
            .ok()
            .map(|value| value.trim().to_string())
            .filter(|value| !value.is_empty())
            .ok_or(ConfigError::MissingEnv { name: ACCOUNT_ENV })?;

        config.validate()?;
        Ok(config)
    }

    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.display().to_string(),
            source,
        })?;
        Self::from_toml_str(&content)
    }

    pub fn from_toml_str(content: &str) -> Result<Self, ConfigError> {
        Ok(toml::from_str(content)?)
    }

    pub fn to_toml_string(&self) -> Result<String, ConfigError> {
        Ok(toml::to_string_pretty(self)?)
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_secs(self.poll_interval_secs)
    }

    pub fn platform_config(&self) -> PlatformConfig {
        let config = PlatformConfig::new(self.account.clone())
            .with_region(self.region.clone())
            .with_role_name(self.role_name.clone())
            .with_poll_interval(self.poll_interval());

        match &self.image_uri {
            Some(image_uri) => config.with_image_uri(image_uri.clone()),
            None => config,
        }
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        let invalid = |message: String| ConfigError::Invalid { message };

        self.platform_config().validate().map_err(invalid)?;

        if self.key_prefix.trim_matches('/').is_empty() {
            return Err(invalid("Key prefix cannot be empty".to_string()));
        }

        if self.data_path.as_os_str().is_empty() {
            return Err(invalid("Data path cannot be empty".to_string()));
        }

        if self.training.entry_point.is_empty() {
            return Err(invalid("Training entry point cannot be empty".to_string()));
        }

        self.training
            .hyperparameters
            .validate()
            .map_err(invalid)?;
        self.training
            .resources()
            .validate()
            .map_err(|e| invalid(format!("training: {}", e)))?;
        self.inference
            .resources()
            .validate()
            .map_err(|e| invalid(format!("inference: {}", e)))?;

        if self.inference.sample_rows == 0 {
            return Err(invalid("Sample rows must be greater than 0".to_string()));
        }

        if self.inference.target_column.is_empty() {
            return Err(invalid("Target column cannot be empty".to_string()));
        }

        Ok(())
    }
}
