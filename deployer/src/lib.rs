pub mod config;
pub mod dataset;
pub mod endpoint;
pub mod pipeline;

pub use config::{ConfigError, DeployConfig, InferenceConfig, TrainingConfig, ACCOUNT_ENV};
pub use dataset::DatasetError;
pub use endpoint::ScopedEndpoint;
pub use pipeline::{
    assemble_params, build_payload, predict_on_endpoint, run, train, training_job, DeployError,
    DeployResult, Prediction, TrainingParams,
};
