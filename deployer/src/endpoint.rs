//! Scoped ownership of a hosted endpoint.

use platform::{
    EndpointHandle, EndpointState, InvocationRequest, InvocationResponse, MlPlatform,
    ModelHandle, PlatformError, PlatformResult, ResourceShape,
};
use tracing::{info, warn};

/// Holds at most one endpoint deployed through `platform` and deletes it on [`release`].
///
/// Starts out empty, so releasing a guard whose deployment never succeeded is a no-op.
///
/// [`release`]: ScopedEndpoint::release
pub struct ScopedEndpoint<'a, P: MlPlatform + ?Sized> {
    platform: &'a P,
    endpoint: Option<EndpointHandle>,
    state: Option<EndpointState>,
}

impl<'a, P: MlPlatform + ?Sized> ScopedEndpoint<'a, P> {
    pub fn new(platform: &'a P) -> Self {
        Self {
            platform,
            endpoint: None,
            state: None,
        }
    }

    pub fn handle(&self) -> Option<&EndpointHandle> {
        self.endpoint.as_ref()
    }

    /// `None` until an endpoint has been deployed.
    pub fn state(&self) -> Option<EndpointState> {
        self.state
    }

    pub async fn deploy(
        &mut self,
        model: &ModelHandle,
        shape: &ResourceShape,
    ) -> PlatformResult<&EndpointHandle> {
        if let Some(existing) = &self.endpoint {
            return Err(PlatformError::EndpointAlreadyDeployed {
                endpoint: existing.endpoint_name.clone(),
            });
        }

        info!(
            model = %model.job_name,
            instance_type = %shape.instance_type,
            instance_count = shape.instance_count,
            "Deploying endpoint"
        );
        let endpoint = self.platform.deploy(model, shape).await?;
        self.state = Some(EndpointState::Active);
        Ok(&*self.endpoint.insert(endpoint))
    }

    pub async fn predict(&self, request: &InvocationRequest) -> PlatformResult<InvocationResponse> {
        let endpoint = self
            .endpoint
            .as_ref()
            .ok_or_else(|| PlatformError::EndpointFailed {
                endpoint: "<none>".to_string(),
                reason: "no endpoint has been deployed".to_string(),
            })?;
        self.platform.predict(endpoint, request).await
    }

    /// Delete the held endpoint, if any. Never deletes twice.
    pub async fn release(&mut self) -> PlatformResult<()> {
        let Some(endpoint) = self.endpoint.take() else {
            return Ok(());
        };

        info!(endpoint = %endpoint.endpoint_name, "Deleting endpoint");
        let result = self.platform.delete_endpoint(&endpoint).await;
        if result.is_ok() {
            self.state = Some(EndpointState::Deleted);
        }
        result
    }
}

impl<P: MlPlatform + ?Sized> Drop for ScopedEndpoint<'_, P> {
    fn drop(&mut self) {
        if let Some(endpoint) = &self.endpoint {
            warn!(
                endpoint = %endpoint.endpoint_name,
                "Endpoint is still active and keeps billing; delete it manually"
            );
        }
    }
}
