use crate::metrics::Metrics;
use crate::misc::Typename;
use crate::session::Session;
use async_trait::async_trait;
use reqwest::{Method, Url};
use serde::de::DeserializeOwned;
use serde_json::Value;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

/// Shown for anything where transport internals must not leak to the user
pub const GENERIC_NETWORK_MESSAGE: &str = "Unable to reach the AuthShield server. Please try again.";
pub const AUTH_EXPIRED_MESSAGE: &str = "Your session has expired. Please sign in again.";

#[derive(Debug, thiserror::Error, strum_macros::IntoStaticStr)]
pub enum Error {
    #[error("authentication expired")]
    AuthExpired,
    #[error("request failed with status {status}")]
    RequestFailed { status: u16, detail: Option<String> },
    #[error("network error: {0}")]
    Network(String),
    #[error(transparent)]
    Decode(#[from] serde_json::Error),
    #[error("invalid url: {0}")]
    InvalidUrl(String),
}

impl Typename for Error {
    fn typename(&self) -> &'static str {
        self.into()
    }
}

impl From<reqwest::Error> for Error {
    fn from(e: reqwest::Error) -> Self {
        Error::Network(e.to_string())
    }
}

impl Error {
    /// Text fit for an inline message next to the control that failed
    pub fn user_message(&self) -> String {
        match self {
            Error::AuthExpired => AUTH_EXPIRED_MESSAGE.to_string(),
            Error::RequestFailed { detail: Some(detail), .. } => detail.clone(),
            Error::RequestFailed { status, detail: None } if *status < 500 => {
                format!("Request failed with status {status}")
            }
            _ => GENERIC_NETWORK_MESSAGE.to_string(),
        }
    }
}

/// Outbound call, independent of the HTTP client used to send it
#[derive(Debug, Clone, PartialEq)]
pub struct ApiRequest {
    pub method: Method,
    pub segments: Vec<String>,
    pub query: Vec<(String, String)>,
    pub headers: Vec<(String, String)>,
    pub body: Option<Value>,
}

impl ApiRequest {
    /// Static path such as "/api/events", split into segments
    pub fn new(method: Method, path: &str) -> Self {
        let segments = path.split('/').filter(|s| !s.is_empty()).map(str::to_string).collect();
        Self { method, segments, query: Vec::new(), headers: Vec::new(), body: None }
    }

    pub fn get(path: &str) -> Self {
        Self::new(Method::GET, path)
    }

    pub fn post(path: &str) -> Self {
        Self::new(Method::POST, path)
    }

    /// Dynamic segment, percent-encoded when the url is built
    pub fn segment(mut self, value: impl Into<String>) -> Self {
        self.segments.push(value.into());
        self
    }

    pub fn query(mut self, key: &str, value: impl ToString) -> Self {
        self.query.push((key.to_string(), value.to_string()));
        self
    }

    pub fn header(mut self, name: &str, value: impl Into<String>) -> Self {
        self.headers.push((name.to_string(), value.into()));
        self
    }

    pub fn json(mut self, body: Value) -> Self {
        self.body = Some(body);
        self
    }

    /// Logical path, used for logging and metrics
    pub fn path(&self) -> String {
        format!("/{}", self.segments.join("/"))
    }

    pub fn header_value(&self, name: &str) -> Option<&str> {
        self.headers.iter().rev().find(|(n, _)| n.eq_ignore_ascii_case(name)).map(|(_, v)| v.as_str())
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct ApiResponse {
    pub status: u16,
    pub body: String,
}

impl ApiResponse {
    pub fn new(status: u16, body: impl Into<String>) -> Self {
        Self { status, body: body.into() }
    }

    pub fn is_ok(&self) -> bool {
        (200..300).contains(&self.status)
    }

    pub fn json<T: DeserializeOwned>(&self) -> Result<T, Error> {
        Ok(serde_json::from_str(&self.body)?)
    }

    /// Human readable error text from a `{detail}` body; validation errors
    /// carry a list of `{msg}` objects instead of a string
    pub fn detail(&self) -> Option<String> {
        let value: Value = serde_json::from_str(&self.body).ok()?;
        match value.get("detail")? {
            Value::String(s) if !s.is_empty() => Some(s.clone()),
            Value::Array(items) => items.iter().find_map(|i| i.get("msg")?.as_str().map(str::to_string)),
            _ => None,
        }
    }

    pub fn into_result(self) -> Result<Self, Error> {
        if self.is_ok() {
            return Ok(self);
        }
        Err(Error::RequestFailed { status: self.status, detail: self.detail() })
    }
}

/// Seam between the transport and the actual HTTP client
#[async_trait]
pub trait HttpBackend: Send + Sync {
    async fn send(&self, req: ApiRequest) -> Result<ApiResponse, Error>;
}

pub struct ReqwestBackend {
    client: reqwest::Client,
    base: Url,
}

impl ReqwestBackend {
    pub fn new(base: Url, timeout: Duration) -> Result<Self, Error> {
        let client = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(Self { client, base })
    }

    pub fn url_for(&self, req: &ApiRequest) -> Result<Url, Error> {
        let mut url = self.base.clone();
        {
            let mut segments = url.path_segments_mut().map_err(|_| Error::InvalidUrl(self.base.to_string()))?;
            segments.pop_if_empty().extend(req.segments.iter());
        }
        if !req.query.is_empty() {
            url.query_pairs_mut().extend_pairs(req.query.iter());
        }
        Ok(url)
    }
}

#[async_trait]
impl HttpBackend for ReqwestBackend {
    async fn send(&self, req: ApiRequest) -> Result<ApiResponse, Error> {
        let url = self.url_for(&req)?;
        let mut builder = self.client.request(req.method.clone(), url);
        for (name, value) in &req.headers {
            builder = builder.header(name.as_str(), value.as_str());
        }
        if let Some(body) = &req.body {
            builder = builder.body(serde_json::to_vec(body)?);
        }

        let response = builder.send().await?;
        let status = response.status().as_u16();
        let body = response.text().await?;
        Ok(ApiResponse { status, body })
    }
}

/// Injects credentials into every call and turns a 401 into a session teardown.
///
/// `request` yields `Ok(None)` when the call was aborted by authentication
/// failure; callers must stop without touching anything they render.
pub struct AuthTransport {
    backend: Arc<dyn HttpBackend>,
    session: Arc<Session>,
    metrics: Arc<Metrics>,
}

impl AuthTransport {
    pub fn new(backend: Arc<dyn HttpBackend>, session: Arc<Session>, metrics: Arc<Metrics>) -> Self {
        Self { backend, session, metrics }
    }

    pub fn session(&self) -> &Arc<Session> {
        &self.session
    }

    pub fn metrics(&self) -> &Arc<Metrics> {
        &self.metrics
    }

    fn prepare(&self, req: ApiRequest) -> ApiRequest {
        let mut headers = vec![("Content-Type".to_string(), "application/json".to_string())];
        for (name, value) in req.headers {
            headers.retain(|(n, _)| !n.eq_ignore_ascii_case(&name));
            headers.push((name, value));
        }
        if let Some(token) = self.session.token() {
            headers.retain(|(n, _)| !n.eq_ignore_ascii_case("Authorization"));
            headers.push(("Authorization".to_string(), format!("Bearer {token}")));
        }
        ApiRequest { headers, ..req }
    }

    async fn dispatch(&self, req: ApiRequest) -> Result<ApiResponse, Error> {
        let path = req.path();
        self.metrics.add_request(&path);
        debug!(method = %req.method, %path, "request");

        match self.backend.send(self.prepare(req)).await {
            Ok(resp) => {
                self.metrics.add_status(resp.status);
                Ok(resp)
            }
            Err(e) => {
                self.metrics.add_error(&e);
                Err(e)
            }
        }
    }

    pub async fn request(&self, req: ApiRequest) -> Result<Option<ApiResponse>, Error> {
        let epoch = self.session.epoch();
        let path = req.path();
        let resp = self.dispatch(req).await?;

        if resp.status == 401 {
            self.metrics.add_aborted();
            if self.session.teardown_if_current(epoch).await {
                warn!(%path, "authentication rejected, session torn down");
                self.metrics.add_teardown();
            }
            return Ok(None);
        }
        Ok(Some(resp))
    }

    /// Same as `request` but a 401 is an ordinary failure, for calls made
    /// without a session such as login
    pub async fn send_public(&self, req: ApiRequest) -> Result<ApiResponse, Error> {
        self.dispatch(req).await
    }

    /// `request`, then decode the body of a successful response
    pub async fn fetch_json<T: DeserializeOwned>(&self, req: ApiRequest) -> Result<Option<T>, Error> {
        match self.request(req).await? {
            Some(resp) => Ok(Some(resp.into_result()?.json()?)),
            None => Ok(None),
        }
    }
}
