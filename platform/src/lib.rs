pub mod config;
pub mod provider;
#[cfg(feature = "sagemaker")]
pub mod sagemaker;
pub mod serializers;
pub mod types;

pub use config::PlatformConfig;
pub use provider::{MlPlatform, ObjectStore, PlatformError, PlatformResult};
pub use serializers::{CsvDeserializer, CsvSerializer, Deserializer, Serializer};
pub use types::{
    timestamped_name, EndpointHandle, EndpointState, Framework, Hyperparameters,
    InvocationRequest, InvocationResponse, ModelHandle, ResourceShape, S3Uri, Session,
    TrainingJobSpec,
};

#[cfg(feature = "sagemaker")]
pub use sagemaker::SageMakerSession;

pub mod prelude {
    pub use crate::config::*;
    pub use crate::provider::*;
    pub use crate::serializers::*;
    pub use crate::types::*;

    #[cfg(feature = "sagemaker")]
    pub use crate::sagemaker::*;
}
