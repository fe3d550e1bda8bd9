//! Operation contract backed by the simulated backend.

use async_trait::async_trait;
use operatify_reconciler::{
    ApplyResponse, DeleteResult, OperationResult, ResourceManager, ResourceSpec, StatusPayload,
    VerifyResponse,
};
use serde_json::json;

use crate::backend::SimulatedBackend;

/// Resource manager for any spec type, answering from a [`SimulatedBackend`].
///
/// Apply responses carry `externalId`; verify responses also carry the
/// `observed` sub-state.
#[derive(Debug, Clone)]
pub struct SimulatedResourceManager {
    backend: SimulatedBackend,
}

impl SimulatedResourceManager {
    #[must_use]
    pub const fn new(backend: SimulatedBackend) -> Self {
        Self { backend }
    }

    #[must_use]
    pub const fn backend(&self) -> &SimulatedBackend {
        &self.backend
    }
}

fn external_id(id: &str) -> StatusPayload {
    let mut payload = StatusPayload::new();
    payload.insert("externalId".to_string(), json!(id));
    payload
}

#[async_trait]
impl<S: ResourceSpec> ResourceManager<S> for SimulatedResourceManager {
    async fn create(&self, id: &str, _spec: &S) -> OperationResult<ApplyResponse> {
        let result = self.backend.create(id).await?;
        Ok(ApplyResponse::new(result).with_payload(external_id(id)))
    }

    async fn update(&self, id: &str, _spec: &S) -> OperationResult<ApplyResponse> {
        let result = self.backend.update(id).await?;
        Ok(ApplyResponse::new(result).with_payload(external_id(id)))
    }

    async fn verify(&self, id: &str, _spec: &S) -> OperationResult<VerifyResponse> {
        let result = self.backend.verify(id).await?;
        let mut payload = external_id(id);
        payload.insert("observed".to_string(), json!(result.to_string()));
        Ok(VerifyResponse::new(result).with_payload(payload))
    }

    async fn delete(&self, id: &str) -> OperationResult<DeleteResult> {
        self.backend.delete(id).await
    }
}
