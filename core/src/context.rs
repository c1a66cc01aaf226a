use crate::actions::Actions;
use crate::auth::{self, Credentials, Registration};
use crate::config::Config;
use crate::demo::{self, DemoSummary, DemoWorkflow, FreezeSummary};
use crate::loaders::Loaders;
use crate::metrics::{Metrics, MetricsSnapshot};
use crate::poller::Poller;
use crate::render::{Render, Target, View};
use crate::router::{DEFAULT_TAB, ViewRouter};
use crate::session::{CredentialStore, Identity, Session};
use crate::transport::{AuthTransport, HttpBackend, ReqwestBackend};
use crate::Error;
use serde_json::Value;
use std::sync::Arc;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

/// Runtime container wiring the session, transport, loaders, router, poller
/// and demo workflow around one render target.
pub struct Dashboard {
    pub(crate) config: Config,
    pub(crate) session: Arc<Session>,
    pub(crate) transport: Arc<AuthTransport>,
    pub(crate) render: Arc<dyn Render>,
    pub(crate) loaders: Arc<Loaders>,
    pub(crate) router: ViewRouter,
    pub(crate) poller: Poller,
    pub(crate) demo: DemoWorkflow,
    pub(crate) actions: Actions,
    pub(crate) metrics: Arc<Metrics>,
}

impl Dashboard {
    pub fn new(
        config: Config,
        store: CredentialStore,
        backend: Arc<dyn HttpBackend>,
        render: Arc<dyn Render>,
    ) -> Arc<Self> {
        let metrics = Arc::new(Metrics::new());
        let session = Arc::new(Session::new(store));
        let transport = Arc::new(AuthTransport::new(backend, session.clone(), metrics.clone()));
        let loaders = Arc::new(Loaders::new(transport.clone(), render.clone(), config.events_limit));
        let router = ViewRouter::new(render.clone(), loaders.clone());
        let poller = Poller::new(config.poll_interval, loaders.clone());
        let demo = DemoWorkflow::new(transport.clone(), render.clone(), loaders.clone(), config.demo_pacing);
        let actions = Actions::new(transport.clone(), render.clone(), loaders.clone());

        let dash = Arc::new(Self { config, session, transport, render, loaders, router, poller, demo, actions, metrics });

        // the session outlives nothing it points to, hence the weak handle
        let weak = Arc::downgrade(&dash);
        dash.session.on_teardown(move || {
            if let Some(dash) = weak.upgrade() {
                dash.leave_dashboard();
            }
        });

        dash
    }

    /// Reqwest transport against `config.api_url`, durable token in the work folder
    pub fn with_reqwest(config: Config, render: Arc<dyn Render>) -> Result<Arc<Self>, Error> {
        let backend = ReqwestBackend::new(config.api_url.clone(), config.request_timeout)?;
        let store = CredentialStore::with_work_folder(config.get_root());
        Ok(Self::new(config, store, Arc::new(backend), render))
    }

    /// Cancels the timer, resets the demo controls and shows the auth screen
    fn leave_dashboard(&self) {
        self.poller.stop();
        self.demo.cancel();
        self.render.set_text(Target::LoggedUser, "");
        self.render.show_view(View::Auth);
    }

    async fn enter_dashboard(&self, identity: &Identity) {
        self.render.show_view(View::Dashboard);
        self.render.set_text(Target::LoggedUser, identity.display_name());

        if let Some(load) = self.router.switch_to(DEFAULT_TAB)
            && let Err(e) = load.await
        {
            warn!("initial load failed: {e}");
        }
        self.loaders.frozen_count().await;
        self.poller.start();
        info!(user = %identity.username, "dashboard ready");
    }

    /// Restores a stored token and validates it with the profile probe,
    /// without entering the dashboard
    pub async fn resume(&self) -> Result<Option<Identity>, Error> {
        if !self.session.init().await? {
            return Ok(None);
        }
        match auth::profile(&self.transport).await? {
            Some(identity) => Ok(Some(identity)),
            None => {
                debug!("stored token rejected");
                Ok(None)
            }
        }
    }

    /// Startup: dashboard when a stored token is still valid, auth screen otherwise
    pub async fn init(&self) -> Result<bool, Error> {
        match self.resume().await {
            Ok(Some(identity)) => {
                self.enter_dashboard(&identity).await;
                Ok(true)
            }
            Ok(None) => {
                self.render.show_view(View::Auth);
                Ok(false)
            }
            Err(e) => {
                // stored token kept for the next start, nothing live behind the auth screen
                self.session.forget();
                self.metrics.add_error(&e);
                self.render.show_view(View::Auth);
                Err(e)
            }
        }
    }

    pub async fn login(&self, creds: &Credentials) -> Result<Identity, Error> {
        self.render.set_text(Target::LoginError, "");
        match auth::login(&self.transport, creds).await {
            Ok(identity) => {
                self.enter_dashboard(&identity).await;
                Ok(identity)
            }
            Err(e) => {
                self.metrics.add_error(&e);
                self.render.set_text(Target::LoginError, &e.user_message());
                Err(e.into())
            }
        }
    }

    pub async fn register(&self, reg: &Registration) -> Result<Identity, Error> {
        self.render.set_text(Target::RegisterError, "");
        match auth::register(&self.transport, reg).await {
            Ok(identity) => {
                self.enter_dashboard(&identity).await;
                Ok(identity)
            }
            Err(e) => {
                self.metrics.add_error(&e);
                self.render.set_text(Target::RegisterError, &e.user_message());
                Err(e.into())
            }
        }
    }

    /// Safe to call when already logged out
    pub async fn logout(&self) {
        if !self.session.teardown().await {
            self.leave_dashboard();
        }
        info!("logged out");
    }

    pub fn switch_tab(&self, id: &str) -> Option<JoinHandle<()>> {
        self.router.switch_to(id)
    }

    pub async fn run_attack(&self) -> Result<DemoSummary, demo::Error> {
        self.demo.run_attack().await.inspect_err(|e| self.count_demo_error(e))
    }

    pub async fn freeze_all(&self) -> Result<FreezeSummary, demo::Error> {
        self.demo.freeze_all().await.inspect_err(|e| self.count_demo_error(e))
    }

    fn count_demo_error(&self, e: &demo::Error) {
        if !matches!(e, demo::Error::Superseded) {
            self.metrics.add_error(e);
        }
    }

    pub fn get_config(&self) -> &Config {
        &self.config
    }

    pub fn transport(&self) -> &Arc<AuthTransport> {
        &self.transport
    }

    pub fn session(&self) -> &Arc<Session> {
        &self.session
    }

    pub fn loaders(&self) -> &Arc<Loaders> {
        &self.loaders
    }

    pub fn router(&self) -> &ViewRouter {
        &self.router
    }

    pub fn poller(&self) -> &Poller {
        &self.poller
    }

    pub fn demo(&self) -> &DemoWorkflow {
        &self.demo
    }

    pub fn actions(&self) -> &Actions {
        &self.actions
    }

    pub fn get_metrics(&self) -> &Metrics {
        &self.metrics
    }

    pub fn get_metrics_snapshot(&self) -> MetricsSnapshot {
        self.metrics.snapshot()
    }

    pub fn get_json_metrics(&self) -> Value {
        self.metrics.get_json()
    }
}
