use crate::loaders::Loaders;
use crate::metrics::Metrics;
use crate::render::Surface;
use crate::session::{CredentialStore, Identity, MemoryTier, Session};
use crate::transport::{ApiRequest, ApiResponse, AuthTransport, Error, HttpBackend};
use async_trait::async_trait;
use reqwest::Method;
use serde_json::{Value, json};
use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex};
use std::time::Duration;

#[derive(Debug, Clone)]
enum Reply {
    Json(u16, Value),
    Fail,
}

/// Backend answering from per-route scripts. Replies are consumed in order,
/// the last one sticks; unknown routes get a 404.
#[derive(Default)]
pub struct MockBackend {
    routes: Mutex<HashMap<(Method, String), VecDeque<Reply>>>,
    calls: Mutex<Vec<ApiRequest>>,
    delay: Option<Duration>,
}

impl MockBackend {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    fn push(&self, method: Method, path: &str, reply: Reply) {
        self.routes.lock().unwrap().entry((method, path.to_string())).or_default().push_back(reply);
    }

    pub fn reply(&self, method: Method, path: &str, status: u16, body: Value) {
        self.push(method, path, Reply::Json(status, body));
    }

    pub fn fail(&self, method: Method, path: &str) {
        self.push(method, path, Reply::Fail);
    }

    pub fn calls(&self) -> Vec<ApiRequest> {
        self.calls.lock().unwrap().clone()
    }

    pub fn count(&self, method: &Method, path: &str) -> usize {
        self.calls.lock().unwrap().iter().filter(|c| &c.method == method && c.path() == path).count()
    }
}

#[async_trait]
impl HttpBackend for MockBackend {
    async fn send(&self, req: ApiRequest) -> Result<ApiResponse, Error> {
        let key = (req.method.clone(), req.path());
        self.calls.lock().unwrap().push(req);
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }

        let reply = {
            let mut routes = self.routes.lock().unwrap();
            match routes.get_mut(&key) {
                Some(queue) if queue.len() > 1 => queue.pop_front(),
                Some(queue) => queue.front().cloned(),
                None => None,
            }
        };

        match reply {
            Some(Reply::Json(status, body)) => Ok(ApiResponse::new(status, body.to_string())),
            Some(Reply::Fail) => Err(Error::Network("connection refused".into())),
            None => Ok(ApiResponse::new(404, json!({"detail": "Not Found"}).to_string())),
        }
    }
}

pub struct Harness {
    pub backend: Arc<MockBackend>,
    pub session: Arc<Session>,
    pub transport: Arc<AuthTransport>,
    pub surface: Arc<Surface>,
    pub metrics: Arc<Metrics>,
}

impl Harness {
    pub fn new() -> Self {
        Self::with_backend(Arc::new(MockBackend::new()))
    }

    pub fn with_backend(backend: Arc<MockBackend>) -> Self {
        let store = CredentialStore::new(Arc::new(MemoryTier::default()), Arc::new(MemoryTier::default()));
        let session = Arc::new(Session::new(store));
        let metrics = Arc::new(Metrics::new());
        let transport = Arc::new(AuthTransport::new(backend.clone(), session.clone(), metrics.clone()));
        Self { backend, session, transport, surface: Arc::new(Surface::new()), metrics }
    }

    pub async fn login(&self) -> u64 {
        let identity = Identity { username: "analyst".into(), role: Some("analyst".into()), full_name: None };
        self.session.begin("test-token".into(), identity, false).await.unwrap()
    }

    pub fn loaders(&self) -> Arc<Loaders> {
        Arc::new(Loaders::new(self.transport.clone(), self.surface.clone(), 50))
    }
}
