use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;

use crate::provider::PlatformError;

pub const CSV_CONTENT_TYPE: &str = "text/csv";

/// Location of an object (or key prefix) in S3.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct S3Uri {
    pub bucket: String,
    pub key: String,
}

impl S3Uri {
    pub fn new(bucket: impl Into<String>, key: impl Into<String>) -> Self {
        Self {
            bucket: bucket.into(),
            key: key.into(),
        }
    }

    /// Append a relative path below this key, inserting a `/` separator when needed.
    pub fn join(&self, path: &str) -> Self {
        let path = path.trim_start_matches('/');
        let key = if self.key.is_empty() || self.key.ends_with('/') {
            format!("{}{}", self.key, path)
        } else {
            format!("{}/{}", self.key, path)
        };
        Self::new(self.bucket.clone(), key)
    }
}

impl fmt::Display for S3Uri {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "s3://{}/{}", self.bucket, self.key)
    }
}

impl FromStr for S3Uri {
    type Err = PlatformError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let invalid = || PlatformError::InvalidUri { uri: s.to_string() };
        let rest = s.strip_prefix("s3://").ok_or_else(invalid)?;
        let (bucket, key) = rest.split_once('/').unwrap_or((rest, ""));
        if bucket.is_empty() {
            return Err(invalid());
        }
        Ok(Self::new(bucket, key))
    }
}

impl TryFrom<String> for S3Uri {
    type Error = PlatformError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<S3Uri> for String {
    fn from(uri: S3Uri) -> Self {
        uri.to_string()
    }
}

/// Account and region context every call runs against.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Session {
    pub region: String,
    pub account: String,
    pub default_bucket: String,
}

/// Training-time settings handed to the entry point script.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Hyperparameters {
    #[serde(default = "default_normalize")]
    pub normalize: bool,
    #[serde(rename = "test-size", default = "default_test_size")]
    pub test_size: f64,
}

fn default_normalize() -> bool {
    true
}

fn default_test_size() -> f64 {
    0.1
}

impl Default for Hyperparameters {
    fn default() -> Self {
        Self {
            normalize: default_normalize(),
            test_size: default_test_size(),
        }
    }
}

impl Hyperparameters {
    pub fn validate(&self) -> Result<(), String> {
        if !self.test_size.is_finite() || !(0.0..=1.0).contains(&self.test_size) {
            return Err(format!(
                "test-size must be between 0.0 and 1.0, got {}",
                self.test_size
            ));
        }
        Ok(())
    }

    /// The platform's hyperparameter map: every value is JSON-encoded.
    pub fn to_wire(&self) -> BTreeMap<String, String> {
        BTreeMap::from([
            (
                "normalize".to_string(),
                serde_json::Value::from(self.normalize).to_string(),
            ),
            (
                "test-size".to_string(),
                serde_json::Value::from(self.test_size).to_string(),
            ),
        ])
    }
}

/// Instance count and type for a training job or an endpoint variant.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResourceShape {
    pub instance_count: u32,
    pub instance_type: String,
}

impl ResourceShape {
    pub fn new(instance_count: u32, instance_type: impl Into<String>) -> Self {
        Self {
            instance_count,
            instance_type: instance_type.into(),
        }
    }

    pub fn training() -> Self {
        Self::new(1, "ml.m5.large")
    }

    pub fn hosting() -> Self {
        Self::new(1, "ml.t2.medium")
    }

    pub fn validate(&self) -> Result<(), String> {
        if self.instance_count == 0 {
            return Err("Instance count must be greater than 0".to_string());
        }
        if !self.instance_type.starts_with("ml.") {
            return Err(format!(
                "Instance type must start with 'ml.', got '{}'",
                self.instance_type
            ));
        }
        Ok(())
    }
}

/// Prebuilt framework container the entry point runs in.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Framework {
    pub name: String,
    pub version: String,
    pub py_version: String,
}

impl Default for Framework {
    fn default() -> Self {
        Self {
            name: "sagemaker-scikit-learn".to_string(),
            version: "0.20.0".to_string(),
            py_version: "py3".to_string(),
        }
    }
}

/// Unique resource name: `<base>-<YYYY-MM-DD-HH-MM-SS-mmm>`.
pub fn timestamped_name(base: &str, now: DateTime<Utc>) -> String {
    format!("{}-{}", base, now.format("%Y-%m-%d-%H-%M-%S-%3f"))
}

#[derive(Debug, Clone, PartialEq)]
pub struct TrainingJobSpec {
    pub job_name: String,
    pub entry_point: String,
    pub source_dir: PathBuf,
    pub role_arn: String,
    pub framework: Framework,
    pub resources: ResourceShape,
    pub output_path: S3Uri,
    pub hyperparameters: Hyperparameters,
    /// Input channels by name, e.g. `training`.
    pub inputs: BTreeMap<String, S3Uri>,
}

/// A completed training job and where its artifact landed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ModelHandle {
    pub job_name: String,
    pub model_data: S3Uri,
    pub image_uri: String,
    pub role_arn: String,
    pub entry_point: String,
    pub submit_directory: Option<S3Uri>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum EndpointState {
    Active,
    Deleted,
}

impl fmt::Display for EndpointState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EndpointState::Active => write!(f, "active"),
            EndpointState::Deleted => write!(f, "deleted"),
        }
    }
}

/// A live hosted endpoint. Billable until deleted.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EndpointHandle {
    pub endpoint_name: String,
    pub endpoint_config_name: String,
    pub model_name: String,
}

impl EndpointHandle {
    /// Endpoint, endpoint config and model all sharing one name.
    pub fn named(name: impl Into<String>) -> Self {
        let name = name.into();
        Self {
            endpoint_name: name.clone(),
            endpoint_config_name: name.clone(),
            model_name: name,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InvocationRequest {
    pub body: Vec<u8>,
    pub content_type: String,
    pub accept: String,
}

impl InvocationRequest {
    pub fn csv(body: impl Into<String>) -> Self {
        Self {
            body: body.into().into_bytes(),
            content_type: CSV_CONTENT_TYPE.to_string(),
            accept: CSV_CONTENT_TYPE.to_string(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InvocationResponse {
    pub body: Vec<u8>,
    pub content_type: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_s3_uri_parse() {
        let uri: S3Uri = "s3://bucket/some/key.csv".parse().unwrap();
        assert_eq!(uri.bucket, "bucket");
        assert_eq!(uri.key, "some/key.csv");
        assert_eq!(uri.to_string(), "s3://bucket/some/key.csv");

        let uri: S3Uri = "s3://bucket".parse().unwrap();
        assert_eq!(uri.key, "");

        assert!("https://bucket/key".parse::<S3Uri>().is_err());
        assert!("s3:///key".parse::<S3Uri>().is_err());
    }

    #[test]
    fn test_s3_uri_join() {
        let output = S3Uri::new("bucket", "prefix/output/");
        assert_eq!(
            output.join("job/output/model.tar.gz").to_string(),
            "s3://bucket/prefix/output/job/output/model.tar.gz"
        );

        let source = S3Uri::new("bucket", "job");
        assert_eq!(
            source.join("/source/sourcedir.tar.gz").key,
            "job/source/sourcedir.tar.gz"
        );

        let root = S3Uri::new("bucket", "");
        assert_eq!(root.join("key").key, "key");
    }

    #[test]
    fn test_s3_uri_serde_as_string() {
        let uri = S3Uri::new("bucket", "a/b");
        let json = serde_json::to_string(&uri).unwrap();
        assert_eq!(json, "\"s3://bucket/a/b\"");
        let back: S3Uri = serde_json::from_str(&json).unwrap();
        assert_eq!(back, uri);
        assert!(serde_json::from_str::<S3Uri>("\"gs://bucket/a\"").is_err());
    }

    #[test]
    fn test_hyperparameters_wire_encoding() {
        let wire = Hyperparameters::default().to_wire();
        assert_eq!(wire.len(), 2);
        assert_eq!(wire["normalize"], "true");
        assert_eq!(wire["test-size"], "0.1");
    }

    #[test]
    fn test_hyperparameters_validation() {
        assert!(Hyperparameters::default().validate().is_ok());

        let mut params = Hyperparameters::default();
        params.test_size = 0.0;
        assert!(params.validate().is_ok());
        params.test_size = 1.0;
        assert!(params.validate().is_ok());
        params.test_size = 1.5;
        assert!(params.validate().is_err());
        params.test_size = -0.1;
        assert!(params.validate().is_err());
        params.test_size = f64::NAN;
        assert!(params.validate().is_err());
    }

    #[test]
    fn test_hyperparameters_reject_unknown_keys() {
        let parsed: Hyperparameters = serde_json::from_str(r#"{"test-size": 0.3}"#).unwrap();
        assert_eq!(parsed.test_size, 0.3);
        assert!(parsed.normalize);

        assert!(serde_json::from_str::<Hyperparameters>(r#"{"test_size": 0.3}"#).is_err());
    }

    #[test]
    fn test_resource_shapes() {
        assert_eq!(ResourceShape::training(), ResourceShape::new(1, "ml.m5.large"));
        assert_eq!(ResourceShape::hosting(), ResourceShape::new(1, "ml.t2.medium"));
        assert!(ResourceShape::training().validate().is_ok());
        assert!(ResourceShape::new(0, "ml.m5.large").validate().is_err());
        assert!(ResourceShape::new(1, "m5.large").validate().is_err());
    }

    #[test]
    fn test_timestamped_name() {
        let now = DateTime::parse_from_rfc3339("2024-03-05T07:08:09.123Z")
            .unwrap()
            .with_timezone(&Utc);
        assert_eq!(
            timestamped_name("sagemaker-scikit-learn", now),
            "sagemaker-scikit-learn-2024-03-05-07-08-09-123"
        );
    }

    #[test]
    fn test_csv_request() {
        let request = InvocationRequest::csv("1,2\n");
        assert_eq!(request.body, b"1,2\n");
        assert_eq!(request.content_type, "text/csv");
        assert_eq!(request.accept, "text/csv");
    }
}
