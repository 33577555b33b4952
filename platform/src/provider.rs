use crate::types::{
    EndpointHandle, InvocationRequest, InvocationResponse, ModelHandle, ResourceShape, S3Uri,
    TrainingJobSpec,
};
use async_trait::async_trait;
use std::path::Path;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum PlatformError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),

    #[error("Invalid configuration: {message}")]
    InvalidConfig { message: String },

    #[error("Invalid S3 URI: {uri}")]
    InvalidUri { uri: String },

    #[error("{operation} failed: {message}")]
    Api {
        operation: &'static str,
        message: String,
    },

    #[error("Training job {job_name} ended with status {status}: {reason}")]
    JobFailed {
        job_name: String,
        status: String,
        reason: String,
    },

    #[error("Endpoint {endpoint} failed to provision: {reason}")]
    EndpointFailed { endpoint: String, reason: String },

    #[error("Endpoint {endpoint} is already deployed in this scope")]
    EndpointAlreadyDeployed { endpoint: String },
}

pub type PlatformResult<T> = Result<T, PlatformError>;

/// Object storage the training data is staged in.
#[async_trait]
pub trait ObjectStore: Send + Sync {
    /// Resolve the session's default bucket, creating it when it does not exist yet.
    async fn default_bucket(&self) -> PlatformResult<String>;

    /// Upload a local file to `s3://<bucket>/<key_prefix>/<file name>`.
    async fn upload_file(&self, path: &Path, bucket: &str, key_prefix: &str)
        -> PlatformResult<S3Uri>;

    fn store_name(&self) -> &'static str;
}

/// Training, hosting and invocation on the managed platform.
///
/// `fit` and `deploy` block until the platform reports a terminal state.
#[async_trait]
pub trait MlPlatform: Send + Sync {
    async fn fit(&self, job: &TrainingJobSpec) -> PlatformResult<ModelHandle>;

    async fn deploy(
        &self,
        model: &ModelHandle,
        shape: &ResourceShape,
    ) -> PlatformResult<EndpointHandle>;

    async fn predict(
        &self,
        endpoint: &EndpointHandle,
        request: &InvocationRequest,
    ) -> PlatformResult<InvocationResponse>;

    async fn delete_endpoint(&self, endpoint: &EndpointHandle) -> PlatformResult<()>;

    fn platform_name(&self) -> &'static str;
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{Framework, Hyperparameters};
    use std::collections::BTreeMap;
    use std::path::PathBuf;

    struct MockPlatform;

    #[async_trait]
    impl ObjectStore for MockPlatform {
        async fn default_bucket(&self) -> PlatformResult<String> {
            Ok("mock-bucket".to_string())
        }

        async fn upload_file(
            &self,
            path: &Path,
            bucket: &str,
            key_prefix: &str,
        ) -> PlatformResult<S3Uri> {
            let file_name = path
                .file_name()
                .map(|n| n.to_string_lossy().to_string())
                .unwrap_or_default();
            Ok(S3Uri::new(bucket, format!("{}/{}", key_prefix, file_name)))
        }

        fn store_name(&self) -> &'static str {
            "mock"
        }
    }

    #[async_trait]
    impl MlPlatform for MockPlatform {
        async fn fit(&self, job: &TrainingJobSpec) -> PlatformResult<ModelHandle> {
            Ok(ModelHandle {
                job_name: job.job_name.clone(),
                model_data: job.output_path.join(&format!("{}/output/model.tar.gz", job.job_name)),
                image_uri: "mock-image".to_string(),
                role_arn: job.role_arn.clone(),
                entry_point: job.entry_point.clone(),
                submit_directory: None,
            })
        }

        async fn deploy(
            &self,
            model: &ModelHandle,
            _shape: &ResourceShape,
        ) -> PlatformResult<EndpointHandle> {
            Ok(EndpointHandle::named(&model.job_name))
        }

        async fn predict(
            &self,
            _endpoint: &EndpointHandle,
            _request: &InvocationRequest,
        ) -> PlatformResult<InvocationResponse> {
            Ok(InvocationResponse {
                body: b"24.0\n".to_vec(),
                content_type: Some("text/csv".to_string()),
            })
        }

        async fn delete_endpoint(&self, _endpoint: &EndpointHandle) -> PlatformResult<()> {
            Ok(())
        }

        fn platform_name(&self) -> &'static str {
            "mock"
        }
    }

    #[tokio::test]
    async fn test_mock_platform() {
        let platform = MockPlatform;

        let bucket = platform.default_bucket().await.unwrap();
        let uri = platform
            .upload_file(Path::new("data/housing.csv"), &bucket, "prefix/training")
            .await
            .unwrap();
        assert_eq!(uri.to_string(), "s3://mock-bucket/prefix/training/housing.csv");

        let job = TrainingJobSpec {
            job_name: "job-1".to_string(),
            entry_point: "train.py".to_string(),
            source_dir: PathBuf::from("src"),
            role_arn: "arn:aws:iam::123:role/r".to_string(),
            framework: Framework::default(),
            resources: ResourceShape::training(),
            output_path: S3Uri::new("mock-bucket", "prefix/output/"),
            hyperparameters: Hyperparameters::default(),
            inputs: BTreeMap::from([("training".to_string(), uri)]),
        };
        let model = platform.fit(&job).await.unwrap();
        assert_eq!(
            model.model_data.to_string(),
            "s3://mock-bucket/prefix/output/job-1/output/model.tar.gz"
        );

        let endpoint = platform
            .deploy(&model, &ResourceShape::hosting())
            .await
            .unwrap();
        assert_eq!(endpoint.endpoint_name, "job-1");

        let response = platform
            .predict(&endpoint, &InvocationRequest::csv("1,2,3\n"))
            .await
            .unwrap();
        assert_eq!(response.body, b"24.0\n");

        platform.delete_endpoint(&endpoint).await.unwrap();
        assert_eq!(platform.platform_name(), "mock");
        assert_eq!(platform.store_name(), "mock");
    }

    #[test]
    fn test_error_display() {
        let error = PlatformError::JobFailed {
            job_name: "job-1".to_string(),
            status: "Failed".to_string(),
            reason: "AlgorithmError".to_string(),
        };
        assert_eq!(
            error.to_string(),
            "Training job job-1 ended with status Failed: AlgorithmError"
        );

        let error = PlatformError::Api {
            operation: "CreateEndpoint",
            message: "throttled".to_string(),
        };
        assert_eq!(error.to_string(), "CreateEndpoint failed: throttled");
    }
}
