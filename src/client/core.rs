use crate::client::signals::SignalsSnapshot;
use crate::config::ResilienceOptions;
use crate::resilience::PipelineRegistry;
use crate::telemetry::MetricsSnapshot;
use crate::transport::{Transport, TransportRequest, TransportResponse};
use crate::Result;
use serde::de::DeserializeOwned;
use std::future::Future;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

/// Client for the manuscript-review service.
///
/// Cheap to clone; clones share the transport and the registry.
#[derive(Clone)]
pub struct ReviewClient {
    pub(crate) transport: Arc<dyn Transport>,
    pub(crate) registry: Arc<PipelineRegistry>,
}

impl ReviewClient {
    pub fn builder() -> crate::client::ReviewClientBuilder {
        crate::client::ReviewClientBuilder::new()
    }

    /// Send `request` through the global pipeline.
    pub async fn send(&self, request: TransportRequest) -> Result<TransportResponse> {
        let transport = &self.transport;
        let request = &request;
        self.registry
            .execute(move |token| transport.send(request, token))
            .await
    }

    /// Send `request` through the pipeline of `endpoint`.
    pub async fn send_to(
        &self,
        endpoint: &str,
        request: TransportRequest,
    ) -> Result<TransportResponse> {
        let transport = &self.transport;
        let request = &request;
        self.registry
            .execute_endpoint(endpoint, move |token| transport.send(request, token))
            .await
    }

    /// [`send`](Self::send), decoding the body as JSON.
    pub async fn send_json<T: DeserializeOwned>(&self, request: TransportRequest) -> Result<T> {
        self.send(request).await?.json()
    }

    /// [`send_to`](Self::send_to), decoding the body as JSON.
    pub async fn send_json_to<T: DeserializeOwned>(
        &self,
        endpoint: &str,
        request: TransportRequest,
    ) -> Result<T> {
        self.send_to(endpoint, request).await?.json()
    }

    /// Run an arbitrary operation through the global pipeline.
    pub async fn execute<T, F, Fut>(&self, operation: F) -> Result<T>
    where
        F: Fn(CancellationToken) -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        self.registry.execute(operation).await
    }

    /// Run an arbitrary operation through the pipeline of `endpoint`.
    pub async fn execute_endpoint<T, F, Fut>(&self, endpoint: &str, operation: F) -> Result<T>
    where
        F: Fn(CancellationToken) -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        self.registry.execute_endpoint(endpoint, operation).await
    }

    pub fn metrics(&self) -> Result<MetricsSnapshot> {
        self.registry.metrics()
    }

    pub fn signals(&self) -> Result<SignalsSnapshot> {
        Ok(SignalsSnapshot::from_pipelines(self.registry.signals()?))
    }

    pub fn update_configuration(&self, options: ResilienceOptions) -> Result<()> {
        self.registry.update_configuration(options)
    }

    pub fn reset(&self) -> Result<()> {
        self.registry.reset()
    }

    pub fn dispose(&self) {
        self.registry.dispose()
    }

    pub fn registry(&self) -> &Arc<PipelineRegistry> {
        &self.registry
    }
}

impl std::fmt::Debug for ReviewClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ReviewClient")
            .field("registry", &self.registry)
            .finish_non_exhaustive()
    }
}
