//! The run-once workflow: assemble parameters, train, then deploy, predict and tear down.
//!
//! Each step takes the previous step's output. Nothing is retried; the only
//! guarded operation is the endpoint deletion in [`predict_on_endpoint`].

use crate::config::{ConfigError, DeployConfig};
use crate::dataset::{self, DatasetError};
use crate::endpoint::ScopedEndpoint;
use chrono::{DateTime, Utc};
use platform::{
    timestamped_name, CsvDeserializer, CsvSerializer, Deserializer, InvocationRequest,
    MlPlatform, ModelHandle, ObjectStore, PlatformError, S3Uri, Serializer, Session,
    TrainingJobSpec,
};
use serde::Serialize;
use std::collections::BTreeMap;
use std::fmt;
use thiserror::Error;
use tracing::{error, info};

/// Input channel the entry point reads its training data from.
pub const TRAINING_CHANNEL: &str = "training";

#[derive(Error, Debug)]
pub enum DeployError {
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Dataset error: {0}")]
    Dataset(#[from] DatasetError),

    #[error("Platform error: {0}")]
    Platform(#[from] PlatformError),
}

pub type DeployResult<T> = Result<T, DeployError>;

/// Everything the training step needs from the assembly step.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TrainingParams {
    pub session: Session,
    pub training_path: S3Uri,
    pub output_path: S3Uri,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Prediction {
    pub endpoint_name: String,
    pub rows: Vec<Vec<String>>,
}

impl fmt::Display for Prediction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:?}", self.rows)
    }
}

/// Upload the local dataset and compute the training and output locations.
pub async fn assemble_params<S>(store: &S, config: &DeployConfig) -> DeployResult<TrainingParams>
where
    S: ObjectStore + ?Sized,
{
    dataset::ensure_exists(&config.data_path)?;

    let bucket = store.default_bucket().await?;
    let prefix = config.key_prefix.trim_matches('/');

    let training_path = store
        .upload_file(&config.data_path, &bucket, &format!("{}/training", prefix))
        .await?;
    let output_path = S3Uri::new(bucket.clone(), format!("{}/output/", prefix));

    info!(
        store = store.store_name(),
        training_path = %training_path,
        output_path = %output_path,
        "Assembled training parameters"
    );

    Ok(TrainingParams {
        session: Session {
            region: config.region.clone(),
            account: config.account.clone(),
            default_bucket: bucket,
        },
        training_path,
        output_path,
    })
}

/// The training job submitted for `params`, named after `now`.
pub fn training_job(
    params: &TrainingParams,
    config: &DeployConfig,
    now: DateTime<Utc>,
) -> TrainingJobSpec {
    let framework = config.training.framework();

    TrainingJobSpec {
        job_name: timestamped_name(&framework.name, now),
        entry_point: config.training.entry_point.clone(),
        source_dir: config.training.source_dir.clone(),
        role_arn: config.platform_config().role_arn(),
        framework,
        resources: config.training.resources(),
        output_path: params.output_path.clone(),
        hyperparameters: config.training.hyperparameters.clone(),
        inputs: BTreeMap::from([(
            TRAINING_CHANNEL.to_string(),
            params.training_path.clone(),
        )]),
    }
}

/// Submit the training job and block until the platform reports it finished.
pub async fn train<P>(
    platform: &P,
    params: TrainingParams,
    config: &DeployConfig,
) -> DeployResult<ModelHandle>
where
    P: MlPlatform + ?Sized,
{
    let job = training_job(&params, config, Utc::now());

    info!(
        platform = platform.platform_name(),
        job_name = %job.job_name,
        entry_point = %job.entry_point,
        "Starting training job"
    );

    let model = platform.fit(&job).await?;

    info!(job_name = %model.job_name, model_data = %model.model_data, "Training finished");
    Ok(model)
}

/// CSV body for the test prediction: the leading dataset rows without the label column.
pub fn build_payload(config: &DeployConfig) -> DeployResult<String> {
    let rows = dataset::sample_rows(
        &config.data_path,
        config.inference.sample_rows,
        &config.inference.target_column,
    )?;
    Ok(CsvSerializer.serialize(&rows)?)
}

/// Deploy `model`, send one prediction and delete the endpoint again.
///
/// The endpoint is deleted exactly once whenever deployment succeeded, whatever
/// happens afterwards. When both the prediction path and the deletion fail, the
/// prediction error is returned and the deletion error is logged.
pub async fn predict_on_endpoint<P>(
    platform: &P,
    model: &ModelHandle,
    config: &DeployConfig,
) -> DeployResult<Prediction>
where
    P: MlPlatform + ?Sized,
{
    let mut endpoint = ScopedEndpoint::new(platform);
    let outcome = invoke(&mut endpoint, model, config).await;
    let released = endpoint.release().await;

    match (outcome, released) {
        (Ok(prediction), Ok(())) => Ok(prediction),
        (Ok(_), Err(cleanup)) => Err(cleanup.into()),
        (Err(err), Ok(())) => Err(err),
        (Err(err), Err(cleanup)) => {
            error!(error = %cleanup, "Failed to delete endpoint after an earlier failure");
            Err(err)
        }
    }
}

async fn invoke<P>(
    endpoint: &mut ScopedEndpoint<'_, P>,
    model: &ModelHandle,
    config: &DeployConfig,
) -> DeployResult<Prediction>
where
    P: MlPlatform + ?Sized,
{
    let endpoint_name = endpoint
        .deploy(model, &config.inference.resources())
        .await?
        .endpoint_name
        .clone();

    let serializer = CsvSerializer;
    let deserializer = CsvDeserializer;

    let payload = build_payload(config)?;
    let request = InvocationRequest {
        body: payload.into_bytes(),
        content_type: serializer.content_type().to_string(),
        accept: deserializer.accept().to_string(),
    };

    let response = endpoint.predict(&request).await?;
    let rows = deserializer.deserialize(&response.body)?;

    info!(endpoint = %endpoint_name, rows = rows.len(), "Received prediction");
    Ok(Prediction {
        endpoint_name,
        rows,
    })
}

/// All three steps in order.
pub async fn run<S, P>(store: &S, platform: &P, config: &DeployConfig) -> DeployResult<Prediction>
where
    S: ObjectStore + ?Sized,
    P: MlPlatform + ?Sized,
{
    let params = assemble_params(store, config).await?;
    let model = train(platform, params, config).await?;
    predict_on_endpoint(platform, &model, config).await
}

#[cfg(test)]
mod tests {
    use super::*;

    fn params() -> TrainingParams {
        TrainingParams {
            session: Session {
                region: "us-east-2".to_string(),
                account: "123456789012".to_string(),
                default_bucket: "sagemaker-us-east-2-123456789012".to_string(),
            },
            training_path: S3Uri::new(
                "sagemaker-us-east-2-123456789012",
                "sklearn-boston-housing/training/housing.csv",
            ),
            output_path: S3Uri::new(
                "sagemaker-us-east-2-123456789012",
                "sklearn-boston-housing/output/",
            ),
        }
    }

    #[test]
    fn test_training_job() {
        let config = DeployConfig {
            account: "123456789012".to_string(),
            ..DeployConfig::default()
        };
        let now = DateTime::parse_from_rfc3339("2024-03-05T07:08:09.123Z")
            .unwrap()
            .with_timezone(&Utc);

        let job = training_job(&params(), &config, now);
        assert_eq!(job.job_name, "sagemaker-scikit-learn-2024-03-05-07-08-09-123");
        assert_eq!(job.entry_point, "sklearn-boston-housing.py");
        assert_eq!(job.source_dir, std::path::PathBuf::from("./src/train_serve/"));
        assert_eq!(
            job.role_arn,
            "arn:aws:iam::123456789012:role/ml-sagemaker-execution-role"
        );
        assert_eq!(job.framework.version, "0.20.0");
        assert_eq!(job.inputs.len(), 1);
        assert_eq!(job.inputs[TRAINING_CHANNEL], params().training_path);
        assert_eq!(job.output_path, params().output_path);
    }

    #[test]
    fn test_params_serialize_three_keys() {
        let value = serde_json::to_value(params()).unwrap();
        let keys: Vec<&String> = value.as_object().unwrap().keys().collect();
        assert_eq!(keys.len(), 3);
        assert_eq!(
            value["output_path"],
            "s3://sagemaker-us-east-2-123456789012/sklearn-boston-housing/output/"
        );
    }

    #[test]
    fn test_prediction_display() {
        let prediction = Prediction {
            endpoint_name: "ep".to_string(),
            rows: vec![vec!["24.1".to_string()], vec!["21.6".to_string()]],
        };
        assert_eq!(prediction.to_string(), r#"[["24.1"], ["21.6"]]"#);
    }
}
