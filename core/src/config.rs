/// The only file where reading environment variables is allowed
/// Basically, the config for the whole the core library
use reqwest::Url;
use std::time::Duration;
use tokio::fs;
use tracing::debug;

pub const DEFAULT_API_URL: &str = "http://127.0.0.1:8000";
pub const TOKEN_STORAGE_KEY: &str = "as_token"; // same key for both storage tiers
pub const POLL_INTERVAL_MILLIS: u64 = 6000; // how often live data is re-synchronized
pub const REQUEST_TIMEOUT_SECS: u64 = 30;
pub const EVENTS_LIMIT: usize = 50;
pub const DEMO_BOT_DELAY_MILLIS: u64 = 400;
pub const DEMO_CLUSTER_DELAY_MILLIS: u64 = 800;
pub const DEMO_HINT_DELAY_MILLIS: u64 = 500;
pub const MIN_PASSWORD_LEN: usize = 8;
pub const DEFAULT_SIMILARITY: f64 = 0.5;

#[derive(Debug, thiserror::Error, strum_macros::IntoStaticStr)]
pub enum Error {
    #[error(transparent)]
    Io(#[from] std::io::Error),
    #[error("invalid api url {url}: {reason}")]
    InvalidUrl { url: String, reason: String },
}

/// Display pacing of the demo workflow, purely cosmetic
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DemoPacing {
    pub bot_delay: Duration,
    pub cluster_delay: Duration,
    pub hint_delay: Duration,
}

impl Default for DemoPacing {
    fn default() -> Self {
        Self {
            bot_delay: Duration::from_millis(DEMO_BOT_DELAY_MILLIS),
            cluster_delay: Duration::from_millis(DEMO_CLUSTER_DELAY_MILLIS),
            hint_delay: Duration::from_millis(DEMO_HINT_DELAY_MILLIS),
        }
    }
}

impl DemoPacing {
    pub fn instant() -> Self {
        Self { bot_delay: Duration::ZERO, cluster_delay: Duration::ZERO, hint_delay: Duration::ZERO }
    }
}

#[derive(Debug, Clone)]
pub struct Config {
    // filesystem paths
    pub work_folder: String,

    // backend
    pub api_url: Url,
    pub request_timeout: Duration,

    // synchronization
    pub poll_interval: Duration,
    pub events_limit: usize,

    // demo workflow
    pub demo_pacing: DemoPacing,
}

impl Config {
    /// Returns root work folder path, home of the durable token tier
    pub fn get_root(&self) -> &str {
        &self.work_folder
    }

    /// Create Config from the environment, creating the work folder if needed
    pub async fn from_env(root: Option<&str>) -> Result<Self, Error> {
        // work folder from env or default
        let work_folder = std::env::var("WORKFOLDER").unwrap_or_else(|_| {
            let home = std::env::var("HOME").unwrap_or_else(|_| "~".to_string());
            format!("{}/.authshield", home)
        });

        // override with provided root if given
        let work_folder = root.unwrap_or(&work_folder).to_string();
        fs::create_dir_all(&work_folder).await?;

        let api_url = parse_api_url(&std::env::var("SHIELD_API_URL").unwrap_or_else(|_| DEFAULT_API_URL.to_string()))?;
        let request_timeout = Duration::from_secs(env_parse("REQUEST_TIMEOUT_SECS", REQUEST_TIMEOUT_SECS));
        let poll_interval = Duration::from_millis(env_parse("POLL_INTERVAL_MS", POLL_INTERVAL_MILLIS).max(1));
        let events_limit = env_parse("EVENTS_LIMIT", EVENTS_LIMIT);

        let demo_pacing = DemoPacing {
            bot_delay: Duration::from_millis(env_parse("DEMO_BOT_DELAY_MS", DEMO_BOT_DELAY_MILLIS)),
            cluster_delay: Duration::from_millis(env_parse("DEMO_CLUSTER_DELAY_MS", DEMO_CLUSTER_DELAY_MILLIS)),
            hint_delay: Duration::from_millis(env_parse("DEMO_HINT_DELAY_MS", DEMO_HINT_DELAY_MILLIS)),
        };

        debug!("config loaded, api {api_url}, poll every {poll_interval:?}");

        Ok(Self { work_folder, api_url, request_timeout, poll_interval, events_limit, demo_pacing })
    }

    /// Config with defaults only, without touching env or disk
    pub fn new_ephemeral(api_url: &str) -> Result<Self, Error> {
        Ok(Self {
            work_folder: ".authshield".to_string(),
            api_url: parse_api_url(api_url)?,
            request_timeout: Duration::from_secs(REQUEST_TIMEOUT_SECS),
            poll_interval: Duration::from_millis(POLL_INTERVAL_MILLIS),
            events_limit: EVENTS_LIMIT,
            demo_pacing: DemoPacing::default(),
        })
    }

    pub fn with_api_url(mut self, api_url: &str) -> Result<Self, Error> {
        self.api_url = parse_api_url(api_url)?;
        Ok(self)
    }
}

fn parse_api_url(raw: &str) -> Result<Url, Error> {
    let url = Url::parse(raw).map_err(|e| Error::InvalidUrl { url: raw.to_string(), reason: e.to_string() })?;
    if url.cannot_be_a_base() {
        return Err(Error::InvalidUrl { url: raw.to_string(), reason: "not a base url".to_string() });
    }
    Ok(url)
}

fn env_parse<T: std::str::FromStr>(key: &str, default: T) -> T {
    std::env::var(key).ok().and_then(|s| s.trim().parse().ok()).unwrap_or(default)
}
