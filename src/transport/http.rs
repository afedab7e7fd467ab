use crate::error::ErrorContext;
use crate::failure::FailureKind;
use crate::transport::{Method, Transport, TransportError, TransportRequest, TransportResponse};
use crate::{Error, Result};
use async_trait::async_trait;
use reqwest::Proxy;
use std::env;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::debug;
use url::Url;

/// Header carrying our per-attempt correlation id.
pub const REQUEST_ID_HEADER: &str = "x-review-request-id";

const MAX_ERROR_BODY: usize = 512;

/// [`Transport`] over HTTP(S).
///
/// There is no client-level request timeout: attempts are bounded by the
/// pipeline's timeout layer, which cancels the token passed to [`send`](Transport::send).
pub struct HttpTransport {
    client: reqwest::Client,
    base_url: Url,
    api_key: Option<String>,
}

impl HttpTransport {
    pub fn new(base_url: &str, api_key: Option<String>) -> Result<Self> {
        let base_url = Url::parse(base_url).map_err(|e| {
            Error::configuration_with_context(
                format!("invalid base URL '{}'", base_url),
                ErrorContext::new()
                    .with_field_path("base_url")
                    .with_details(e.to_string())
                    .with_source("http_transport"),
            )
        })?;
        if !matches!(base_url.scheme(), "http" | "https") {
            return Err(Error::configuration_with_context(
                format!("unsupported URL scheme '{}'", base_url.scheme()),
                ErrorContext::new()
                    .with_field_path("base_url")
                    .with_source("http_transport"),
            ));
        }

        let mut builder = reqwest::Client::builder()
            .connect_timeout(Duration::from_secs(
                env_parse("REVIEW_HTTP_CONNECT_TIMEOUT_SECS").unwrap_or(10),
            ))
            .pool_max_idle_per_host(env_parse("REVIEW_HTTP_POOL_MAX_IDLE_PER_HOST").unwrap_or(32))
            .pool_idle_timeout(Some(Duration::from_secs(
                env_parse("REVIEW_HTTP_POOL_IDLE_TIMEOUT_SECS").unwrap_or(90),
            )));

        if let Ok(proxy_url) = env::var("REVIEW_PROXY_URL") {
            if let Ok(proxy) = Proxy::all(&proxy_url) {
                builder = builder.proxy(proxy);
            }
        }

        let client = builder
            .build()
            .map_err(|e| Error::Transport(TransportError::Other(e.to_string())))?;

        Ok(Self {
            client,
            base_url,
            api_key,
        })
    }

    pub fn base_url(&self) -> &Url {
        &self.base_url
    }

    fn url_for(&self, path: &str) -> Result<Url> {
        // keep any path prefix on the base URL
        let joined = format!(
            "{}/{}",
            self.base_url.as_str().trim_end_matches('/'),
            path.trim_start_matches('/')
        );
        Url::parse(&joined).map_err(|e| {
            Error::validation_with_context(
                format!("invalid request path '{}'", path),
                ErrorContext::new()
                    .with_field_path("path")
                    .with_details(e.to_string())
                    .with_source("http_transport"),
            )
        })
    }

    async fn dispatch(&self, request: &TransportRequest) -> Result<TransportResponse> {
        let url = self.url_for(&request.path)?;
        let mut req = match request.method {
            Method::Get => self.client.get(url),
            Method::Post => self.client.post(url),
            Method::Put => self.client.put(url),
            Method::Delete => self.client.delete(url),
        };
        if let Some(body) = &request.body {
            req = req.json(body);
        }
        if let Some(key) = &self.api_key {
            req = req.bearer_auth(key);
        }
        for (k, v) in &request.headers {
            req = req.header(k, v);
        }
        let request_id = uuid::Uuid::new_v4().to_string();
        req = req.header(REQUEST_ID_HEADER, &request_id);

        let response = req.send().await.map_err(TransportError::Http)?;
        let status = response.status().as_u16();
        let body = response.bytes().await.map_err(TransportError::Http)?;
        debug!(
            method = request.method.as_str(),
            path = request.path.as_str(),
            status,
            request_id = request_id.as_str(),
            "review service responded"
        );

        if (200..300).contains(&status) {
            return Ok(TransportResponse { status, body });
        }

        let kind = FailureKind::from_http_status(status).unwrap_or(FailureKind::Server);
        let mut message = String::from_utf8_lossy(&body).into_owned();
        if message.len() > MAX_ERROR_BODY {
            let mut end = MAX_ERROR_BODY;
            while !message.is_char_boundary(end) {
                end -= 1;
            }
            message.truncate(end);
        }
        Err(Error::Remote {
            status,
            kind,
            message,
        })
    }
}

#[async_trait]
impl Transport for HttpTransport {
    async fn send(
        &self,
        request: &TransportRequest,
        cancel: CancellationToken,
    ) -> Result<TransportResponse> {
        tokio::select! {
            biased;
            _ = cancel.cancelled() => Err(TransportError::Cancelled.into()),
            result = self.dispatch(request) => result,
        }
    }
}

fn env_parse<T: std::str::FromStr>(name: &str) -> Option<T> {
    env::var(name).ok().and_then(|s| s.parse().ok())
}
