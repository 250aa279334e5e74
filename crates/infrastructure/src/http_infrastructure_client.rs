use async_trait::async_trait;
use reqwest::{Method, StatusCode, Url};
use serde::Serialize;
use serde_json::Value;
use tollgate_application::InfrastructureClient;
use tollgate_core::{AppError, AppResult};
use tollgate_domain::ResourceIdentity;
use tracing::debug;

/// HTTP adapter for the external infrastructure API.
///
/// Resources live under
/// `{base}/clusters/{cluster}/namespaces/{namespace}/resources/{name}`.
/// Every call carries the request event id as `Idempotency-Key`.
#[derive(Clone)]
pub struct HttpInfrastructureClient {
    http_client: reqwest::Client,
    base_url: Url,
    api_token: Option<String>,
}

#[derive(Debug, Serialize)]
struct CreateResourceBody<'a> {
    name: &'a str,
    spec: &'a Value,
}

impl HttpInfrastructureClient {
    /// Creates a client for the API rooted at `base_url`.
    pub fn new(
        http_client: reqwest::Client,
        base_url: &str,
        api_token: Option<String>,
    ) -> AppResult<Self> {
        let base_url = Url::parse(base_url).map_err(|error| {
            AppError::Validation(format!(
                "invalid infrastructure API base url '{base_url}': {error}"
            ))
        })?;

        if base_url.cannot_be_a_base() {
            return Err(AppError::Validation(format!(
                "infrastructure API base url '{base_url}' cannot carry a path"
            )));
        }

        Ok(Self {
            http_client,
            base_url,
            api_token: api_token.filter(|token| !token.trim().is_empty()),
        })
    }

    fn resource_url(&self, identity: &ResourceIdentity, tail: &[&str]) -> AppResult<Url> {
        let mut url = self.base_url.clone();
        {
            let mut segments = url.path_segments_mut().map_err(|()| {
                AppError::Internal(format!(
                    "infrastructure API base url '{}' cannot carry a path",
                    self.base_url
                ))
            })?;
            segments
                .pop_if_empty()
                .extend([
                    "clusters",
                    identity.cluster(),
                    "namespaces",
                    identity.namespace(),
                    "resources",
                ])
                .extend(tail);
        }
        Ok(url)
    }

    async fn send(
        &self,
        action: &str,
        identity: &ResourceIdentity,
        method: Method,
        url: Url,
        body: Option<CreateResourceBody<'_>>,
        idempotency_key: &str,
    ) -> AppResult<()> {
        let mut builder = self
            .http_client
            .request(method, url)
            .header("Idempotency-Key", idempotency_key);
        if let Some(token) = &self.api_token {
            builder = builder.bearer_auth(token);
        }
        if let Some(body) = body {
            builder = builder.json(&body);
        }

        let response = builder.send().await.map_err(|error| AppError::External {
            retryable: true,
            message: format!("{action} of '{identity}' transport error: {error}"),
        })?;

        let status = response.status();
        debug!(
            action,
            resource = %identity,
            idempotency_key,
            status = status.as_u16(),
            "infrastructure API responded"
        );
        if status.is_success() {
            return Ok(());
        }

        let body = response
            .text()
            .await
            .unwrap_or_else(|_| "<response body unavailable>".to_owned());
        Err(classify_failure(action, identity, status, body.as_str()))
    }
}

/// Maps a non-success response to the error contract of the client port.
fn classify_failure(
    action: &str,
    identity: &ResourceIdentity,
    status: StatusCode,
    body: &str,
) -> AppError {
    let message = format!("{action} of '{identity}' failed with status {status}: {body}");
    match status {
        StatusCode::CONFLICT => AppError::Conflict(message),
        StatusCode::NOT_FOUND => AppError::NotFound(message),
        StatusCode::TOO_MANY_REQUESTS => AppError::External {
            retryable: true,
            message,
        },
        status => AppError::External {
            retryable: status.is_server_error(),
            message,
        },
    }
}

#[async_trait]
impl InfrastructureClient for HttpInfrastructureClient {
    async fn create_resource(
        &self,
        identity: &ResourceIdentity,
        spec: &Value,
        idempotency_key: &str,
    ) -> AppResult<()> {
        let url = self.resource_url(identity, &[])?;
        let body = CreateResourceBody {
            name: identity.name(),
            spec,
        };
        self.send("create", identity, Method::POST, url, Some(body), idempotency_key)
            .await
    }

    async fn delete_resource(
        &self,
        identity: &ResourceIdentity,
        idempotency_key: &str,
    ) -> AppResult<()> {
        let url = self.resource_url(identity, &[identity.name()])?;
        self.send("delete", identity, Method::DELETE, url, None, idempotency_key)
            .await
    }

    async fn start_resource(
        &self,
        identity: &ResourceIdentity,
        idempotency_key: &str,
    ) -> AppResult<()> {
        let url = self.resource_url(identity, &[identity.name(), "start"])?;
        self.send("start", identity, Method::POST, url, None, idempotency_key)
            .await
    }

    async fn stop_resource(
        &self,
        identity: &ResourceIdentity,
        idempotency_key: &str,
    ) -> AppResult<()> {
        let url = self.resource_url(identity, &[identity.name(), "stop"])?;
        self.send("stop", identity, Method::POST, url, None, idempotency_key)
            .await
    }

    async fn restart_resource(
        &self,
        identity: &ResourceIdentity,
        idempotency_key: &str,
    ) -> AppResult<()> {
        let url = self.resource_url(identity, &[identity.name(), "restart"])?;
        self.send("restart", identity, Method::POST, url, None, idempotency_key)
            .await
    }
}
