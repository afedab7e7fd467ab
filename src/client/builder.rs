use crate::client::core::ReviewClient;
use crate::config::ResilienceOptions;
use crate::error::ErrorContext;
use crate::resilience::PipelineRegistry;
use crate::transport::{HttpTransport, Transport};
use crate::{Error, Result};
use std::path::Path;
use std::sync::Arc;

/// Builder for [`ReviewClient`].
///
/// Base URL and API key fall back to `REVIEW_BASE_URL` and `REVIEW_API_KEY`.
pub struct ReviewClientBuilder {
    options: ResilienceOptions,
    env_overrides: bool,
    endpoints: Vec<(String, Option<ResilienceOptions>)>,
    api_key: Option<String>,
    transport: Option<Arc<dyn Transport>>,
    /// Override base URL (primarily for testing with mock servers)
    base_url_override: Option<String>,
}

impl Default for ReviewClientBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl ReviewClientBuilder {
    pub fn new() -> Self {
        Self {
            options: ResilienceOptions::default(),
            env_overrides: false,
            endpoints: Vec::new(),
            api_key: None,
            transport: None,
            base_url_override: None,
        }
    }

    pub fn options(mut self, options: ResilienceOptions) -> Self {
        self.options = options;
        self
    }

    /// Load the default options from a YAML or JSON file.
    pub fn options_path(mut self, path: impl AsRef<Path>) -> Result<Self> {
        self.options = ResilienceOptions::from_path(path)?;
        Ok(self)
    }

    /// Apply `REVIEW_*` environment overrides on top of the options at build time.
    pub fn with_env_overrides(mut self, enable: bool) -> Self {
        self.env_overrides = enable;
        self
    }

    /// Pre-register an endpoint pipeline; `None` uses the default options.
    pub fn endpoint(mut self, name: impl Into<String>, options: Option<ResilienceOptions>) -> Self {
        self.endpoints.push((name.into(), options));
        self
    }

    pub fn api_key(mut self, key: impl Into<String>) -> Self {
        self.api_key = Some(key.into());
        self
    }

    /// Use a custom transport instead of HTTP.
    pub fn transport(mut self, transport: Arc<dyn Transport>) -> Self {
        self.transport = Some(transport);
        self
    }

    /// Override the service base URL.
    ///
    /// This is primarily for testing with mock servers.
    pub fn base_url_override(mut self, base_url: impl Into<String>) -> Self {
        self.base_url_override = Some(base_url.into());
        self
    }

    pub fn build(self) -> Result<ReviewClient> {
        let options = if self.env_overrides {
            self.options.with_env_overrides()
        } else {
            self.options
        };
        let registry = Arc::new(PipelineRegistry::new(options)?);
        for (name, endpoint_options) in self.endpoints {
            registry.create_endpoint_pipeline(&name, endpoint_options)?;
        }

        let transport: Arc<dyn Transport> = match self.transport {
            Some(t) => t,
            None => {
                let base_url = self
                    .base_url_override
                    .or_else(|| std::env::var("REVIEW_BASE_URL").ok())
                    .ok_or_else(|| {
                        Error::configuration_with_context(
                            "no base URL configured",
                            ErrorContext::new()
                                .with_field_path("base_url")
                                .with_details("set REVIEW_BASE_URL or call base_url_override")
                                .with_source("client_builder"),
                        )
                    })?;
                let api_key = self
                    .api_key
                    .or_else(|| std::env::var("REVIEW_API_KEY").ok());
                Arc::new(HttpTransport::new(&base_url, api_key)?)
            }
        };

        Ok(ReviewClient {
            transport,
            registry,
        })
    }
}
