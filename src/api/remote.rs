//! Purpose: Provide an HTTP transport for the Datastore JSON API (and its emulator).
//! Exports: `HttpRpcClient`.
//! Role: Reference `RpcClient` implementation; one blocking POST per RPC on tokio's blocking pool.
//! Invariants: Requests go to `{endpoint}/v1/projects/{project}:{method}`.
//! Invariants: Google error envelopes map to `ErrorKind` by status name, else by HTTP status.
//! Invariants: Transport failures are reported once; nothing here retries.
//! Invariants: Every POST is bounded by the call timeout, else the agent timeout.
//! Invariants: Aborting a call abandons its worker, which exits once that bound fires.
#![allow(clippy::result_large_err)]

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::Value as JsonValue;
use tracing::debug;
use url::Url;

use super::config::ClientConfig;
use super::rpc::{CallOptions, Method, RpcClient};
use crate::core::error::{Error, ErrorKind};

type ApiResult<T> = Result<T, Error>;

/// Agent-wide bound used when the config carries no default call timeout.
pub const DEFAULT_TRANSPORT_TIMEOUT: Duration = Duration::from_secs(60);

#[derive(Clone)]
pub struct HttpRpcClient {
    inner: Arc<HttpRpcClientInner>,
}

struct HttpRpcClientInner {
    base_url: Url,
    project_id: String,
    token: Option<String>,
    timeout: Duration,
    agent: ureq::Agent,
}

#[derive(Deserialize)]
struct ErrorEnvelope {
    error: GoogleError,
}

#[derive(Deserialize)]
struct GoogleError {
    code: Option<u16>,
    message: Option<String>,
    status: Option<String>,
}

impl HttpRpcClient {
    pub fn new(base_url: impl Into<String>, project_id: impl Into<String>) -> ApiResult<Self> {
        Self::with_timeout(base_url, project_id, DEFAULT_TRANSPORT_TIMEOUT)
    }

    /// Like `new`, but requests without a per-call timeout are cut off after `timeout`.
    pub fn with_timeout(
        base_url: impl Into<String>,
        project_id: impl Into<String>,
        timeout: Duration,
    ) -> ApiResult<Self> {
        let base_url = normalize_base_url(base_url.into())?;
        let project_id = project_id.into();
        if project_id.trim().is_empty() {
            return Err(Error::invalid_argument("project id must not be empty"));
        }
        if timeout.is_zero() {
            return Err(Error::invalid_argument("transport timeout must be positive"));
        }
        let agent = ureq::AgentBuilder::new().timeout(timeout).build();
        Ok(Self {
            inner: Arc::new(HttpRpcClientInner {
                base_url,
                project_id,
                token: None,
                timeout,
                agent,
            }),
        })
    }

    pub fn from_config(config: &ClientConfig) -> ApiResult<Self> {
        config.validate()?;
        Self::with_timeout(
            config.endpoint(),
            config.project_id.clone(),
            config.default_timeout.unwrap_or(DEFAULT_TRANSPORT_TIMEOUT),
        )
    }

    /// Send `Authorization: Bearer <token>` with every request.
    pub fn with_token(mut self, token: impl Into<String>) -> Self {
        if let Some(inner) = Arc::get_mut(&mut self.inner) {
            inner.token = Some(token.into());
        } else {
            self.inner = Arc::new(HttpRpcClientInner {
                base_url: self.inner.base_url.clone(),
                project_id: self.inner.project_id.clone(),
                token: Some(token.into()),
                timeout: self.inner.timeout,
                agent: self.inner.agent.clone(),
            });
        }
        self
    }

    pub fn base_url(&self) -> &Url {
        &self.inner.base_url
    }

    pub fn timeout(&self) -> Duration {
        self.inner.timeout
    }

    pub fn method_url(&self, method: Method) -> ApiResult<Url> {
        build_url(
            &self.inner.base_url,
            &[
                "v1",
                "projects",
                &format!("{}:{}", self.inner.project_id, method.as_str()),
            ],
        )
    }

    fn post_json(
        &self,
        method: Method,
        body: &JsonValue,
        options: &CallOptions,
    ) -> ApiResult<JsonValue> {
        let url = self.method_url(method)?;
        let payload = serde_json::to_string(body).map_err(|err| {
            Error::new(ErrorKind::Internal)
                .with_message("failed to encode request json")
                .with_method(method.as_str())
                .with_source(err)
        })?;

        let mut request = self
            .inner
            .agent
            .post(url.as_str())
            .set("Accept", "application/json")
            .set("Content-Type", "application/json");
        if let Some(token) = &self.inner.token {
            request = request.set("Authorization", &format!("Bearer {token}"));
        }
        if let Some(timeout) = options.timeout {
            request = request.timeout(timeout);
        }

        debug!(method = method.as_str(), url = %url, "posting rpc");
        match request.send_string(&payload) {
            Ok(resp) => read_json_response(resp).map_err(|err| err.with_method(method.as_str())),
            Err(ureq::Error::Status(code, resp)) => {
                Err(parse_error_response(code, resp).with_method(method.as_str()))
            }
            Err(ureq::Error::Transport(err)) => Err(Error::new(ErrorKind::Io)
                .with_message("request failed")
                .with_method(method.as_str())
                .with_source(err)),
        }
    }
}

#[async_trait]
impl RpcClient for HttpRpcClient {
    async fn invoke(
        &self,
        method: Method,
        request: JsonValue,
        options: &CallOptions,
    ) -> Result<JsonValue, Error> {
        let client = self.clone();
        let options = options.clone();
        tokio::task::spawn_blocking(move || client.post_json(method, &request, &options))
            .await
            .map_err(|err| {
                let kind = if err.is_cancelled() {
                    ErrorKind::Cancelled
                } else {
                    ErrorKind::Internal
                };
                Error::new(kind)
                    .with_message("rpc worker did not complete")
                    .with_method(method.as_str())
                    .with_source(err)
            })?
    }
}

fn normalize_base_url(raw: String) -> ApiResult<Url> {
    let url = Url::parse(raw.trim()).map_err(|err| {
        Error::invalid_argument("invalid api endpoint url").with_source(err)
    })?;
    if url.scheme() != "http" && url.scheme() != "https" {
        return Err(Error::invalid_argument(
            "api endpoint must use http or https scheme",
        ));
    }
    if url.path() != "/" && !url.path().is_empty() {
        return Err(Error::invalid_argument(
            "api endpoint must not include a path",
        ));
    }
    Ok(url)
}

fn build_url(base_url: &Url, segments: &[&str]) -> ApiResult<Url> {
    let mut url = base_url.clone();
    {
        let mut path = url
            .path_segments_mut()
            .map_err(|_| Error::invalid_argument("api endpoint cannot be a base"))?;
        path.clear();
        for segment in segments {
            path.push(segment);
        }
    }
    Ok(url)
}

fn read_json_response(response: ureq::Response) -> ApiResult<JsonValue> {
    let body = response.into_string().map_err(|err| {
        Error::new(ErrorKind::Io)
            .with_message("failed to read response body")
            .with_source(err)
    })?;
    if body.trim().is_empty() {
        return Ok(JsonValue::Object(serde_json::Map::new()));
    }
    serde_json::from_str(&body)
        .map_err(|err| Error::decode("invalid response json").with_source(err))
}

fn parse_error_response(status: u16, response: ureq::Response) -> Error {
    let body = response.into_string().unwrap_or_default();
    if let Ok(envelope) = serde_json::from_str::<ErrorEnvelope>(&body) {
        return error_from_remote(status, envelope.error);
    }
    Error::new(error_kind_from_status(status))
        .with_status(status)
        .with_message(format!("remote error status {status}"))
}

fn error_from_remote(status: u16, remote: GoogleError) -> Error {
    let kind = match remote.status.as_deref() {
        Some(name) => parse_error_kind(name),
        None => error_kind_from_status(remote.code.unwrap_or(status)),
    };
    let mut err = Error::new(kind).with_status(remote.code.unwrap_or(status));
    if let Some(message) = remote.message {
        err = err.with_message(message);
    }
    err
}

fn parse_error_kind(status: &str) -> ErrorKind {
    match status {
        "INVALID_ARGUMENT" | "FAILED_PRECONDITION" | "OUT_OF_RANGE" => {
            ErrorKind::InvalidArgument
        }
        "NOT_FOUND" => ErrorKind::NotFound,
        "ALREADY_EXISTS" => ErrorKind::AlreadyExists,
        "ABORTED" => ErrorKind::Aborted,
        "PERMISSION_DENIED" | "UNAUTHENTICATED" => ErrorKind::PermissionDenied,
        "UNAVAILABLE" | "RESOURCE_EXHAUSTED" => ErrorKind::Unavailable,
        "DEADLINE_EXCEEDED" => ErrorKind::DeadlineExceeded,
        "CANCELLED" => ErrorKind::Cancelled,
        _ => ErrorKind::Internal,
    }
}

fn error_kind_from_status(status: u16) -> ErrorKind {
    match status {
        400 => ErrorKind::InvalidArgument,
        401 | 403 => ErrorKind::PermissionDenied,
        404 => ErrorKind::NotFound,
        409 => ErrorKind::Aborted,
        429 | 503 => ErrorKind::Unavailable,
        499 => ErrorKind::Cancelled,
        504 => ErrorKind::DeadlineExceeded,
        500..=599 => ErrorKind::Internal,
        _ => ErrorKind::Io,
    }
}
