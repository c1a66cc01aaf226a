use crate::misc::{Typename, format_duration, get_unix_secs_now};
use scc::HashIndex as SccHashIndex;
use scc::ebr::Guard;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap as StdHashMap;
use std::fmt::Debug;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use tracing::warn;

pub struct Metrics {
    requests: AtomicU64,  // requests handed to the backend
    aborted: AtomicU64,   // requests answered with 401
    teardowns: AtomicU64, // session teardowns actually executed
    poll_ticks: AtomicU64,

    // Requests by logical path (dynamic)
    paths: SccHashIndex<String, Arc<AtomicU64>>,

    // Responses by status class, "2xx", "4xx"...
    statuses: SccHashIndex<String, Arc<AtomicU64>>,

    // Error counters by type name (dynamic)
    errors: SccHashIndex<String, Arc<AtomicU64>>,

    start_time: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct MetricsSnapshot {
    pub requests: u64,
    pub aborted: u64,
    pub teardowns: u64,
    pub poll_ticks: u64,
    pub paths: StdHashMap<String, u64>,
    pub statuses: StdHashMap<String, u64>,
    pub errors: StdHashMap<String, u64>,
    pub uptime: u64,
}

impl Default for Metrics {
    fn default() -> Self {
        Self::new()
    }
}

impl Metrics {
    pub fn new() -> Self {
        Self {
            requests: AtomicU64::new(0),
            aborted: AtomicU64::new(0),
            teardowns: AtomicU64::new(0),
            poll_ticks: AtomicU64::new(0),
            paths: SccHashIndex::new(),
            statuses: SccHashIndex::new(),
            errors: SccHashIndex::new(),
            start_time: get_unix_secs_now(),
        }
    }

    pub fn add_request(&self, path: &str) {
        self.requests.fetch_add(1, Ordering::Relaxed);
        bump(&self.paths, path);
    }

    pub fn add_status(&self, status: u16) {
        bump(&self.statuses, &format!("{}xx", status / 100));
    }

    pub fn add_aborted(&self) {
        self.aborted.fetch_add(1, Ordering::Relaxed);
    }

    pub fn add_teardown(&self) {
        self.teardowns.fetch_add(1, Ordering::Relaxed);
    }

    pub fn add_poll_tick(&self) {
        self.poll_ticks.fetch_add(1, Ordering::Relaxed);
    }

    /// Count an error by its variant name
    pub fn add_error<E: Debug + Typename>(&self, error: &E) {
        warn!(target = "metrics", "error: {error:?}");
        bump(&self.errors, error.typename());
    }

    pub fn teardowns(&self) -> u64 {
        self.teardowns.load(Ordering::Relaxed)
    }

    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            requests: self.requests.load(Ordering::Relaxed),
            aborted: self.aborted.load(Ordering::Relaxed),
            teardowns: self.teardowns.load(Ordering::Relaxed),
            poll_ticks: self.poll_ticks.load(Ordering::Relaxed),
            paths: collect(&self.paths),
            statuses: collect(&self.statuses),
            errors: collect(&self.errors),
            uptime: get_unix_secs_now().saturating_sub(self.start_time),
        }
    }

    /// Get JSON-formatted metrics
    pub fn get_json(&self) -> Value {
        let snapshot = self.snapshot();
        let uptime_formatted = format_duration(snapshot.uptime);
        let mut value = serde_json::to_value(snapshot).unwrap_or_default();
        if let Some(obj) = value.as_object_mut() {
            obj.insert("uptime_formatted".to_string(), Value::String(uptime_formatted));
        }
        value
    }
}

fn bump(index: &SccHashIndex<String, Arc<AtomicU64>>, name: &str) {
    // correct way of handling ownership in scc HashIndex
    let mut owned = name.to_string();
    loop {
        if let Some(counter) = index.get(&owned) {
            counter.fetch_add(1, Ordering::Relaxed);
            return;
        }
        // another thread may insert the key between the miss and ours
        match index.insert(owned, Arc::new(AtomicU64::new(1))) {
            Ok(()) => return,
            Err((key, _)) => owned = key,
        }
    }
}

fn collect(index: &SccHashIndex<String, Arc<AtomicU64>>) -> StdHashMap<String, u64> {
    let guard = Guard::new();
    let mut out = StdHashMap::new();
    let mut iter = index.iter(&guard);
    while let Some((name, counter)) = iter.next() {
        out.insert(name.clone(), counter.load(Ordering::Relaxed));
    }
    out
}
