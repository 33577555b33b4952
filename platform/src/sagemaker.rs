//! SageMaker training/hosting and S3 staging through the AWS SDK.

use crate::config::PlatformConfig;
use crate::provider::{MlPlatform, ObjectStore, PlatformError, PlatformResult};
use crate::types::{
    EndpointHandle, Framework, InvocationRequest, InvocationResponse, ModelHandle, ResourceShape,
    S3Uri, TrainingJobSpec,
};
use async_trait::async_trait;
use aws_sdk_s3::primitives::ByteStream;
use aws_sdk_s3::types::{BucketLocationConstraint, CreateBucketConfiguration};
use aws_sdk_sagemaker::error::DisplayErrorContext;
use aws_sdk_sagemaker::types::{
    AlgorithmSpecification, Channel, ContainerDefinition, DataSource, EndpointStatus,
    OutputDataConfig, ProductionVariant, ProductionVariantInstanceType, ResourceConfig,
    S3DataDistribution, S3DataSource, S3DataType, StoppingCondition, TrainingInputMode,
    TrainingInstanceType, TrainingJobStatus,
};
use aws_sdk_sagemakerruntime::primitives::Blob;
use flate2::write::GzEncoder;
use flate2::Compression;
use std::collections::BTreeMap;
use std::future::Future;
use std::io;
use std::path::Path;
use tokio::time::sleep;
use tracing::{debug, info, warn};

const CONTAINER_LOG_LEVEL: u32 = 20;
const NO_FAILURE_REASON: &str = "no failure reason reported";
const SOURCE_ARCHIVE: &str = "sourcedir.tar.gz";
const VARIANT_NAME: &str = "AllTraffic";

/// Registry accounts hosting the prebuilt scikit-learn images.
const SKLEARN_REGISTRIES: &[(&str, &str)] = &[
    ("ap-northeast-1", "354813040037"),
    ("ap-northeast-2", "366743142698"),
    ("ap-south-1", "720646828776"),
    ("ap-southeast-1", "121021644041"),
    ("ap-southeast-2", "783357654285"),
    ("ca-central-1", "341280168497"),
    ("eu-central-1", "492215442770"),
    ("eu-north-1", "662702820516"),
    ("eu-west-1", "141502667606"),
    ("eu-west-2", "764974769150"),
    ("eu-west-3", "659782779980"),
    ("sa-east-1", "737474898029"),
    ("us-east-1", "683313688378"),
    ("us-east-2", "257758044811"),
    ("us-west-1", "746614075791"),
    ("us-west-2", "246618743249"),
];

pub struct SageMakerSession {
    config: PlatformConfig,
    s3: aws_sdk_s3::Client,
    sagemaker: aws_sdk_sagemaker::Client,
    runtime: aws_sdk_sagemakerruntime::Client,
}

impl SageMakerSession {
    /// Load credentials from the default provider chain and bind all clients to the configured region.
    pub async fn connect(config: PlatformConfig) -> PlatformResult<Self> {
        config
            .validate()
            .map_err(|message| PlatformError::InvalidConfig { message })?;

        let sdk_config = aws_config::defaults(aws_config::BehaviorVersion::latest())
            .region(aws_sdk_s3::config::Region::new(config.region.clone()))
            .load()
            .await;

        info!(region = %config.region, account = %config.account, "Connected to SageMaker");

        Ok(Self {
            s3: aws_sdk_s3::Client::new(&sdk_config),
            sagemaker: aws_sdk_sagemaker::Client::new(&sdk_config),
            runtime: aws_sdk_sagemakerruntime::Client::new(&sdk_config),
            config,
        })
    }

    fn image_uri(&self, framework: &Framework) -> PlatformResult<String> {
        match &self.config.image_uri {
            Some(image_uri) => Ok(image_uri.clone()),
            None => framework_image_uri(framework, &self.config.region),
        }
    }

    async fn put_object(&self, bucket: &str, key: &str, body: ByteStream) -> PlatformResult<()> {
        debug!(bucket, key, "Uploading object");
        self.s3
            .put_object()
            .bucket(bucket)
            .key(key)
            .body(body)
            .send()
            .await
            .map_err(|e| api_error("PutObject", e))?;
        Ok(())
    }

    async fn create_bucket(&self, bucket: &str) -> PlatformResult<()> {
        info!(bucket, region = %self.config.region, "Creating default bucket");
        let mut request = self.s3.create_bucket().bucket(bucket);
        // us-east-1 rejects an explicit location constraint.
        if self.config.region != "us-east-1" {
            request = request.create_bucket_configuration(
                CreateBucketConfiguration::builder()
                    .location_constraint(BucketLocationConstraint::from(
                        self.config.region.as_str(),
                    ))
                    .build(),
            );
        }
        request
            .send()
            .await
            .map_err(|e| api_error("CreateBucket", e))?;
        Ok(())
    }

    async fn wait_for_training_job(&self, job_name: &str) -> PlatformResult<()> {
        let mut last_status: Option<TrainingJobStatus> = None;

        loop {
            let output = self
                .sagemaker
                .describe_training_job()
                .training_job_name(job_name)
                .send()
                .await
                .map_err(|e| api_error("DescribeTrainingJob", e))?;

            let status: Option<&TrainingJobStatus> = output.training_job_status().into();
            let status = status
                .cloned()
                .unwrap_or_else(|| TrainingJobStatus::from("Unknown"));

            if last_status.as_ref() != Some(&status) {
                info!(job_name, status = status.as_str(), "Training job status");
                last_status = Some(status.clone());
            }

            if let Some(outcome) = training_outcome(job_name, &status, output.failure_reason()) {
                return outcome;
            }
            sleep(self.config.poll_interval).await;
        }
    }

    async fn wait_for_endpoint(&self, endpoint_name: &str) -> PlatformResult<()> {
        let mut last_status: Option<EndpointStatus> = None;

        loop {
            let output = self
                .sagemaker
                .describe_endpoint()
                .endpoint_name(endpoint_name)
                .send()
                .await
                .map_err(|e| api_error("DescribeEndpoint", e))?;

            let status: Option<&EndpointStatus> = output.endpoint_status().into();
            let status = status
                .cloned()
                .unwrap_or_else(|| EndpointStatus::from("Unknown"));

            if last_status.as_ref() != Some(&status) {
                info!(endpoint_name, status = status.as_str(), "Endpoint status");
                last_status = Some(status.clone());
            }

            if let Some(outcome) = endpoint_outcome(endpoint_name, &status, output.failure_reason())
            {
                return outcome;
            }
            sleep(self.config.poll_interval).await;
        }
    }

    async fn delete_resource(
        &self,
        endpoint: &EndpointHandle,
        resource: Provisioned,
    ) -> PlatformResult<()> {
        match resource {
            Provisioned::Endpoint => self
                .sagemaker
                .delete_endpoint()
                .endpoint_name(&endpoint.endpoint_name)
                .send()
                .await
                .map(|_| ())
                .map_err(|e| api_error("DeleteEndpoint", e)),
            Provisioned::EndpointConfig => self
                .sagemaker
                .delete_endpoint_config()
                .endpoint_config_name(&endpoint.endpoint_config_name)
                .send()
                .await
                .map(|_| ())
                .map_err(|e| api_error("DeleteEndpointConfig", e)),
            Provisioned::Model => self
                .sagemaker
                .delete_model()
                .model_name(&endpoint.model_name)
                .send()
                .await
                .map(|_| ())
                .map_err(|e| api_error("DeleteModel", e)),
        }
    }

    /// Delete what a failed deployment created so far. Failures are logged, not returned.
    async fn rollback(&self, endpoint: &EndpointHandle, reached: Provisioned) {
        for &resource in rollback_plan(reached) {
            if let Err(err) = self.delete_resource(endpoint, resource).await {
                warn!(
                    endpoint = %endpoint.endpoint_name,
                    ?resource,
                    error = %err,
                    "Failed to roll back deployment resource"
                );
            }
        }
    }
}

#[async_trait]
impl ObjectStore for SageMakerSession {
    async fn default_bucket(&self) -> PlatformResult<String> {
        let bucket = self.config.default_bucket();

        match self.s3.head_bucket().bucket(&bucket).send().await {
            Ok(_) => {
                debug!(bucket = %bucket, "Default bucket exists");
            }
            Err(err) if err.as_service_error().is_some_and(|e| e.is_not_found()) => {
                self.create_bucket(&bucket).await?;
            }
            Err(err) => return Err(api_error("HeadBucket", err)),
        }

        Ok(bucket)
    }

    async fn upload_file(
        &self,
        path: &Path,
        bucket: &str,
        key_prefix: &str,
    ) -> PlatformResult<S3Uri> {
        let file_name = path
            .file_name()
            .and_then(|name| name.to_str())
            .ok_or_else(|| {
                io::Error::new(
                    io::ErrorKind::InvalidInput,
                    format!("{} does not name a file", path.display()),
                )
            })?;

        let body = file_body(path).await?;
        let key = format!("{}/{}", key_prefix.trim_end_matches('/'), file_name);
        self.put_object(bucket, &key, body).await?;

        let uri = S3Uri::new(bucket, key);
        info!(path = %path.display(), uri = %uri, "Uploaded training data");
        Ok(uri)
    }

    fn store_name(&self) -> &'static str {
        "s3"
    }
}

#[async_trait]
impl MlPlatform for SageMakerSession {
    async fn fit(&self, job: &TrainingJobSpec) -> PlatformResult<ModelHandle> {
        let image_uri = self.image_uri(&job.framework)?;

        let submit_directory = S3Uri::new(
            job.output_path.bucket.clone(),
            format!("{}/source/{}", job.job_name, SOURCE_ARCHIVE),
        );
        let archive = pack_source_dir(&job.source_dir)?;
        debug!(source_dir = %job.source_dir.display(), bytes = archive.len(), "Packed source directory");
        self.put_object(
            &submit_directory.bucket,
            &submit_directory.key,
            ByteStream::from(archive),
        )
        .await?;

        let hyperparameters =
            framework_hyperparameters(job, &submit_directory, &self.config.region);
        let channels = job
            .inputs
            .iter()
            .map(|(name, uri)| training_channel(name, uri))
            .collect::<PlatformResult<Vec<_>>>()?;

        let algorithm = AlgorithmSpecification::builder()
            .training_image(&image_uri)
            .training_input_mode(TrainingInputMode::File)
            .build();
        let output = OutputDataConfig::builder()
            .s3_output_path(job.output_path.to_string())
            .build();
        let resources = ResourceConfig::builder()
            .instance_type(TrainingInstanceType::from(
                job.resources.instance_type.as_str(),
            ))
            .instance_count(to_i32("instance count", job.resources.instance_count)?)
            .volume_size_in_gb(to_i32("volume size", self.config.volume_size_gb)?)
            .build();
        let stopping = StoppingCondition::builder()
            .max_runtime_in_seconds(to_i32(
                "max runtime",
                self.config.max_runtime.as_secs().min(i32::MAX as u64) as u32,
            )?)
            .build();

        debug!(job_name = %job.job_name, ?hyperparameters, "Submitting training job");

        self.sagemaker
            .create_training_job()
            .training_job_name(&job.job_name)
            .role_arn(&job.role_arn)
            .algorithm_specification(algorithm)
            .set_hyper_parameters(Some(hyperparameters.into_iter().collect()))
            .set_input_data_config(Some(channels))
            .output_data_config(output)
            .resource_config(resources)
            .stopping_condition(stopping)
            .send()
            .await
            .map_err(|e| api_error("CreateTrainingJob", e))?;

        info!(
            job_name = %job.job_name,
            instance_type = %job.resources.instance_type,
            instance_count = job.resources.instance_count,
            "Training job submitted"
        );

        self.wait_for_training_job(&job.job_name).await?;

        Ok(ModelHandle {
            job_name: job.job_name.clone(),
            model_data: job
                .output_path
                .join(&format!("{}/output/model.tar.gz", job.job_name)),
            image_uri,
            role_arn: job.role_arn.clone(),
            entry_point: job.entry_point.clone(),
            submit_directory: Some(submit_directory),
        })
    }

    async fn deploy(
        &self,
        model: &ModelHandle,
        shape: &ResourceShape,
    ) -> PlatformResult<EndpointHandle> {
        let endpoint = EndpointHandle::named(&model.job_name);

        let mut container = ContainerDefinition::builder()
            .image(&model.image_uri)
            .model_data_url(model.model_data.to_string());
        for (key, value) in serving_environment(model, &self.config.region) {
            container = container.environment(key, value);
        }
        let variant = ProductionVariant::builder()
            .variant_name(VARIANT_NAME)
            .model_name(&endpoint.model_name)
            .initial_instance_count(to_i32("instance count", shape.instance_count)?)
            .instance_type(ProductionVariantInstanceType::from(
                shape.instance_type.as_str(),
            ))
            .initial_variant_weight(1.0)
            .build();

        self.sagemaker
            .create_model()
            .model_name(&endpoint.model_name)
            .execution_role_arn(&model.role_arn)
            .primary_container(container.build())
            .send()
            .await
            .map_err(|e| api_error("CreateModel", e))?;

        or_rollback(
            async {
                self.sagemaker
                    .create_endpoint_config()
                    .endpoint_config_name(&endpoint.endpoint_config_name)
                    .production_variants(variant)
                    .send()
                    .await
                    .map(|_| ())
                    .map_err(|e| api_error("CreateEndpointConfig", e))
            },
            self.rollback(&endpoint, Provisioned::Model),
        )
        .await?;

        or_rollback(
            async {
                self.sagemaker
                    .create_endpoint()
                    .endpoint_name(&endpoint.endpoint_name)
                    .endpoint_config_name(&endpoint.endpoint_config_name)
                    .send()
                    .await
                    .map(|_| ())
                    .map_err(|e| api_error("CreateEndpoint", e))
            },
            self.rollback(&endpoint, Provisioned::EndpointConfig),
        )
        .await?;

        info!(
            endpoint = %endpoint.endpoint_name,
            instance_type = %shape.instance_type,
            instance_count = shape.instance_count,
            "Endpoint creation started"
        );

        // The handle never reaches the caller on this path, so tear down here.
        or_rollback(
            self.wait_for_endpoint(&endpoint.endpoint_name),
            self.rollback(&endpoint, Provisioned::Endpoint),
        )
        .await?;

        Ok(endpoint)
    }

    async fn predict(
        &self,
        endpoint: &EndpointHandle,
        request: &InvocationRequest,
    ) -> PlatformResult<InvocationResponse> {
        debug!(
            endpoint = %endpoint.endpoint_name,
            content_type = %request.content_type,
            bytes = request.body.len(),
            "Invoking endpoint"
        );

        let output = self
            .runtime
            .invoke_endpoint()
            .endpoint_name(&endpoint.endpoint_name)
            .content_type(&request.content_type)
            .accept(&request.accept)
            .body(Blob::new(request.body.clone()))
            .send()
            .await
            .map_err(|e| api_error("InvokeEndpoint", e))?;

        let body: Option<&Blob> = output.body().into();
        Ok(InvocationResponse {
            body: body.map(|b| b.as_ref().to_vec()).unwrap_or_default(),
            content_type: output.content_type().map(str::to_string),
        })
    }

    async fn delete_endpoint(&self, endpoint: &EndpointHandle) -> PlatformResult<()> {
        self.delete_resource(endpoint, Provisioned::Endpoint).await?;
        self.delete_resource(endpoint, Provisioned::EndpointConfig).await?;

        info!(endpoint = %endpoint.endpoint_name, "Endpoint deleted");
        Ok(())
    }

    fn platform_name(&self) -> &'static str {
        "sagemaker"
    }
}

/// Hosting resources in the order `deploy` creates them.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Provisioned {
    Model,
    EndpointConfig,
    Endpoint,
}

/// What to delete, newest first, when a deployment fails after creating `reached`.
fn rollback_plan(reached: Provisioned) -> &'static [Provisioned] {
    match reached {
        Provisioned::Model => &[Provisioned::Model],
        Provisioned::EndpointConfig => &[Provisioned::EndpointConfig, Provisioned::Model],
        Provisioned::Endpoint => &[
            Provisioned::Endpoint,
            Provisioned::EndpointConfig,
            Provisioned::Model,
        ],
    }
}

/// Await `work`; if it fails, run `rollback` before returning the error.
async fn or_rollback<T, W, R>(work: W, rollback: R) -> PlatformResult<T>
where
    W: Future<Output = PlatformResult<T>>,
    R: Future<Output = ()>,
{
    match work.await {
        Ok(value) => Ok(value),
        Err(err) => {
            rollback.await;
            Err(err)
        }
    }
}

/// Terminal result for a training job in `status`, `None` while it is still running.
fn training_outcome(
    job_name: &str,
    status: &TrainingJobStatus,
    failure_reason: Option<&str>,
) -> Option<PlatformResult<()>> {
    match status {
        TrainingJobStatus::Completed => Some(Ok(())),
        TrainingJobStatus::Failed | TrainingJobStatus::Stopped => {
            Some(Err(PlatformError::JobFailed {
                job_name: job_name.to_string(),
                status: status.as_str().to_string(),
                reason: failure_reason.unwrap_or(NO_FAILURE_REASON).to_string(),
            }))
        }
        _ => None,
    }
}

/// Terminal result for an endpoint being created, `None` while it is still coming up.
fn endpoint_outcome(
    endpoint_name: &str,
    status: &EndpointStatus,
    failure_reason: Option<&str>,
) -> Option<PlatformResult<()>> {
    match status {
        EndpointStatus::InService => Some(Ok(())),
        EndpointStatus::Failed | EndpointStatus::OutOfService | EndpointStatus::Deleting => {
            Some(Err(PlatformError::EndpointFailed {
                endpoint: endpoint_name.to_string(),
                reason: failure_reason
                    .map(str::to_string)
                    .unwrap_or_else(|| format!("endpoint is {}", status.as_str())),
            }))
        }
        _ => None,
    }
}

async fn file_body(path: &Path) -> PlatformResult<ByteStream> {
    ByteStream::from_path(path)
        .await
        .map_err(|err| PlatformError::Io(io::Error::other(err)))
}

/// Image URI of a prebuilt framework container in `region`.
pub fn framework_image_uri(framework: &Framework, region: &str) -> PlatformResult<String> {
    let registry = SKLEARN_REGISTRIES
        .iter()
        .find(|(r, _)| *r == region)
        .map(|(_, account)| *account)
        .ok_or_else(|| PlatformError::InvalidConfig {
            message: format!(
                "No {} image registry known for region {}; set image_uri explicitly",
                framework.name, region
            ),
        })?;

    Ok(format!(
        "{}.dkr.ecr.{}.amazonaws.com/{}:{}-cpu-{}",
        registry, region, framework.name, framework.version, framework.py_version
    ))
}

/// Gzipped tarball of `source_dir`, the layout the framework container unpacks before running the entry point.
pub fn pack_source_dir(source_dir: &Path) -> PlatformResult<Vec<u8>> {
    if !source_dir.is_dir() {
        return Err(PlatformError::Io(io::Error::new(
            io::ErrorKind::NotFound,
            format!("source directory {} does not exist", source_dir.display()),
        )));
    }

    let mut archive = tar::Builder::new(GzEncoder::new(Vec::new(), Compression::default()));
    archive.append_dir_all(".", source_dir)?;
    let encoder = archive.into_inner()?;
    Ok(encoder.finish()?)
}

/// User hyperparameters plus the framework's own keys, all JSON-encoded.
fn framework_hyperparameters(
    job: &TrainingJobSpec,
    submit_directory: &S3Uri,
    region: &str,
) -> BTreeMap<String, String> {
    let json = |value: &str| serde_json::Value::from(value).to_string();

    let mut params = job.hyperparameters.to_wire();
    params.insert("sagemaker_program".to_string(), json(&job.entry_point));
    params.insert(
        "sagemaker_submit_directory".to_string(),
        json(&submit_directory.to_string()),
    );
    params.insert(
        "sagemaker_container_log_level".to_string(),
        CONTAINER_LOG_LEVEL.to_string(),
    );
    params.insert("sagemaker_job_name".to_string(), json(&job.job_name));
    params.insert("sagemaker_region".to_string(), json(region));
    params
}

fn serving_environment(model: &ModelHandle, region: &str) -> BTreeMap<String, String> {
    let mut env = BTreeMap::from([
        ("SAGEMAKER_PROGRAM".to_string(), model.entry_point.clone()),
        (
            "SAGEMAKER_CONTAINER_LOG_LEVEL".to_string(),
            CONTAINER_LOG_LEVEL.to_string(),
        ),
        ("SAGEMAKER_REGION".to_string(), region.to_string()),
    ]);
    if let Some(submit_directory) = &model.submit_directory {
        env.insert(
            "SAGEMAKER_SUBMIT_DIRECTORY".to_string(),
            submit_directory.to_string(),
        );
    }
    env
}

fn training_channel(name: &str, uri: &S3Uri) -> PlatformResult<Channel> {
    let source = S3DataSource::builder()
        .s3_data_type(S3DataType::S3Prefix)
        .s3_uri(uri.to_string())
        .s3_data_distribution_type(S3DataDistribution::FullyReplicated)
        .build();

    Ok(Channel::builder()
        .channel_name(name)
        .data_source(DataSource::builder().s3_data_source(source).build())
        .build())
}

fn to_i32(what: &str, value: u32) -> PlatformResult<i32> {
    i32::try_from(value).map_err(|_| PlatformError::InvalidConfig {
        message: format!("{} {} is out of range", what, value),
    })
}

fn api_error<E>(operation: &'static str, err: E) -> PlatformError
where
    E: std::error::Error + 'static,
{
    PlatformError::Api {
        operation,
        message: DisplayErrorContext(&err).to_string(),
    }
}
