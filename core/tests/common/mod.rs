#![allow(dead_code)]

use axum::body::Bytes;
use axum::extract::State;
use axum::http::{HeaderMap, Method, StatusCode, Uri};
use axum::response::{IntoResponse, Response};
use axum::{Json, Router};
use serde_json::{Value, json};
use std::any::type_name_of_val;
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::{Arc, Mutex};
use std::time::{SystemTime, UNIX_EPOCH};
use tokio::net::TcpListener;
use tokio::task::JoinHandle;

pub const USERNAME: &str = "analyst";
pub const PASSWORD: &str = "correct-horse";
pub const TOKEN: &str = "integration-token";

pub struct TmpTestDir {
    path: PathBuf,
}

impl TmpTestDir {
    /// Create a tmp directory named "/tmp/<fully-qualified-test-path><seconds-since-epoch>".
    /// Pass a reference to the test function item, e.g., `TmpTestDir::for_test(&my_test_fn)`.
    pub fn for_test<F: ?Sized>(f: &F) -> std::io::Result<Self> {
        let fq = type_name_of_val(f);
        let secs = SystemTime::now().duration_since(UNIX_EPOCH).unwrap().as_secs();
        let path = std::path::Path::new("/tmp").join(format!("{}{}", fq, secs));
        std::fs::create_dir_all(&path)?;
        Ok(Self { path })
    }

    pub fn to_str(&self) -> &str {
        self.path.to_str().unwrap_or("")
    }
}

impl Drop for TmpTestDir {
    fn drop(&mut self) {
        let _ = std::fs::remove_dir_all(&self.path);
    }
}

#[derive(Default)]
struct ApiState {
    // canned bodies for authenticated routes, keyed by "METHOD /path"
    routes: Mutex<HashMap<String, Value>>,
    hits: Mutex<Vec<String>>,
}

/// Backend stand-in on an ephemeral port. Accepts `USERNAME`/`PASSWORD`,
/// issues `TOKEN` and answers 401 to any other bearer.
pub struct MockApi {
    pub url: String,
    state: Arc<ApiState>,
    task: JoinHandle<()>,
}

impl MockApi {
    pub async fn start() -> Self {
        let state = Arc::new(ApiState::default());
        let app = Router::new().fallback(handle).with_state(state.clone());
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let url = format!("http://{}", listener.local_addr().unwrap());
        let task = tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });
        Self { url, state, task }
    }

    pub fn route(&self, method: Method, path: &str, body: Value) {
        self.state.routes.lock().unwrap().insert(format!("{method} {path}"), body);
    }

    pub fn hits(&self, method: Method, path: &str) -> usize {
        let key = format!("{method} {path}");
        self.state.hits.lock().unwrap().iter().filter(|h| **h == key).count()
    }
}

impl Drop for MockApi {
    fn drop(&mut self) {
        self.task.abort();
    }
}

fn reply(status: StatusCode, body: Value) -> Response {
    (status, Json(body)).into_response()
}

async fn handle(State(state): State<Arc<ApiState>>, method: Method, uri: Uri, headers: HeaderMap, body: Bytes) -> Response {
    let key = format!("{method} {}", uri.path());
    state.hits.lock().unwrap().push(key.clone());

    match key.as_str() {
        "POST /api/login" => {
            let creds: Value = serde_json::from_slice(&body).unwrap_or_default();
            if creds["username"] == USERNAME && creds["password"] == PASSWORD {
                reply(StatusCode::OK, json!({"token": TOKEN, "username": USERNAME, "role": "admin", "full_name": "Ann Analyst"}))
            } else {
                reply(StatusCode::UNAUTHORIZED, json!({"detail": "Invalid username or password"}))
            }
        }
        "GET /api/health" => reply(StatusCode::OK, json!({"status": "ok", "timestamp": "2026-01-05T10:00:00"})),
        _ => {
            let expected = format!("Bearer {TOKEN}");
            let bearer = headers.get("authorization").and_then(|v| v.to_str().ok());
            if bearer != Some(expected.as_str()) {
                return reply(StatusCode::UNAUTHORIZED, json!({"detail": "Invalid or expired token"}));
            }
            if key == "GET /api/me" {
                return reply(StatusCode::OK, json!({"username": USERNAME, "role": "admin", "full_name": "Ann Analyst"}));
            }
            match state.routes.lock().unwrap().get(&key) {
                Some(body) => reply(StatusCode::OK, body.clone()),
                None => reply(StatusCode::NOT_FOUND, json!({"detail": "Not Found"})),
            }
        }
    }
}
