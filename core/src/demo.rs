use crate::config::DemoPacing;
use crate::format;
use crate::loaders::Loaders;
use crate::misc::Typename;
use crate::models::{Event, FreezeAllResponse, FreezeResult, RunAttackResponse};
use crate::render::{Button, Cell, FeedKind, FeedLine, Render, ResultCard, Row, StepState, DEMO_STEPS};
use crate::transport::{self, ApiRequest, AuthTransport};
use std::sync::{Arc, Mutex, PoisonError};
use tracing::{info, warn};

pub const STEP_SEED: usize = 1;
pub const STEP_LEGIT: usize = 2;
pub const STEP_BOTS: usize = 3;
pub const STEP_CLUSTER: usize = 4;

#[derive(Debug, Clone, Copy, PartialEq, Eq, strum_macros::IntoStaticStr)]
pub enum DemoPhase {
    Idle,
    Seeding,
    LegitTraffic,
    BotTraffic,
    ClusterDetection,
    Freezing,
    Done,
    Error,
}

#[derive(Debug, thiserror::Error, strum_macros::IntoStaticStr)]
pub enum Error {
    #[error("freeze is only possible after a completed attack run")]
    FreezeNotArmed,
    #[error("aborted by session teardown")]
    Aborted,
    #[error("superseded by a newer run")]
    Superseded,
    #[error(transparent)]
    Transport(#[from] transport::Error),
}

impl Typename for Error {
    fn typename(&self) -> &'static str {
        self.into()
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct DemoSummary {
    pub legit: usize,
    pub bots: usize,
    pub avg_legit: f64,
    pub avg_bot: f64,
}

#[derive(Debug, Clone, PartialEq)]
pub struct FreezeSummary {
    pub frozen_count: usize,
    /// identity provider blocks and ledger records are counted independently
    pub auth0_blocked: usize,
    pub chain_logged: usize,
    pub users: Vec<FreezeResult>,
}

#[derive(Debug, Clone, Copy)]
struct DemoRun {
    id: u64,
    phase: DemoPhase,
    /// freeze allowed, cleared by the freeze itself
    armed: bool,
}

pub struct DemoWorkflow {
    transport: Arc<AuthTransport>,
    render: Arc<dyn Render>,
    loaders: Arc<Loaders>,
    pacing: DemoPacing,
    run: Mutex<DemoRun>,
}

fn event_line(e: &Event, verdict: &str) -> String {
    let ts = chrono::Local::now().format("%H:%M:%S");
    let user = e.user_id.as_deref().unwrap_or("?");
    let ip = e.ip_address.as_deref().unwrap_or("?");
    format!("  {ts}  {user:<20} IP:{ip:<16} Risk:{}  {verdict}", format::score(e.risk()))
}

fn freeze_line(u: &FreezeResult) -> String {
    let auth0 = if u.auth0 { "✔ Auth0" } else { "✗ Auth0(mock)" };
    let chain = match (u.blockchain, u.txid.as_deref()) {
        (true, Some(txid)) => format!("✔ Chain: {}", format::short(txid, 12)),
        (true, None) => "✔ Chain: logged".to_string(),
        (false, _) => "— Algorand(no ALGO)".to_string(),
    };
    format!("  ❄ {:<22} Risk:{}  {auth0}  {chain}", u.user_id, format::score(u.risk_score.unwrap_or(0.0)))
}

impl DemoWorkflow {
    pub fn new(transport: Arc<AuthTransport>, render: Arc<dyn Render>, loaders: Arc<Loaders>, pacing: DemoPacing) -> Self {
        Self {
            transport,
            render,
            loaders,
            pacing,
            run: Mutex::new(DemoRun { id: 0, phase: DemoPhase::Idle, armed: false }),
        }
    }

    pub fn phase(&self) -> DemoPhase {
        self.lock().phase
    }

    pub fn is_armed(&self) -> bool {
        self.lock().armed
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, DemoRun> {
        self.run.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn feed(&self, kind: FeedKind, text: impl Into<String>) {
        self.render.push_feed(FeedLine::new(kind, text));
    }

    fn blank(&self) {
        self.render.push_feed(FeedLine::blank());
    }

    /// Stops whatever run is pending and puts the controls back to idle,
    /// used when the session goes away
    pub fn cancel(&self) {
        {
            let mut run = self.lock();
            *run = DemoRun { id: run.id + 1, phase: DemoPhase::Idle, armed: false };
        }
        self.render.set_button(Button::RunAttack, true);
        self.render.set_button(Button::FreezeAll, false);
    }

    /// A 401 tore down the call. Teardown already reset the controls unless no
    /// session was live to tear down, in which case the run resets them itself.
    fn abort(&self, id: u64) -> Error {
        if self.lock().id == id {
            self.cancel();
        }
        Error::Aborted
    }

    /// Leaves the step only if `id` is still the live run
    fn advance(&self, id: u64, phase: DemoPhase) -> Result<(), Error> {
        let mut run = self.lock();
        if run.id != id {
            return Err(Error::Superseded);
        }
        run.phase = phase;
        Ok(())
    }

    /// Checked after every suspension point, before rendering
    fn guard(&self, id: u64, epoch: u64) -> Result<(), Error> {
        if !self.transport.session().is_current(epoch) {
            return Err(Error::Aborted);
        }
        if self.lock().id != id {
            return Err(Error::Superseded);
        }
        Ok(())
    }

    pub async fn run_attack(&self) -> Result<DemoSummary, Error> {
        if !self.transport.session().is_authenticated() {
            return Err(Error::Aborted);
        }
        let epoch = self.transport.session().epoch();
        let id = {
            let mut run = self.lock();
            *run = DemoRun { id: run.id + 1, phase: DemoPhase::Idle, armed: false };
            run.id
        };
        info!(run = id, "attack demo started");

        // idle: fresh feed, no carry-over from a previous run
        self.render.set_button(Button::RunAttack, false);
        self.render.set_button(Button::FreezeAll, false);
        self.render.show_result(None);
        self.render.clear_feed();
        for step in 1..=DEMO_STEPS {
            self.render.set_step(step, StepState::Pending);
        }

        self.advance(id, DemoPhase::Seeding)?;
        self.render.set_step(STEP_SEED, StepState::Active);
        self.feed(FeedKind::Head, "━━━ PHASE 0: Seeding ML Model ━━━");
        self.feed(FeedKind::Plain, "  Training Isolation Forest on 400 synthetic legit fingerprints...");
        self.feed(FeedKind::Legit, "  ✔ Model trained — isolation_forest.pkl ready");
        self.render.set_step(STEP_SEED, StepState::Done);

        self.advance(id, DemoPhase::LegitTraffic)?;
        self.render.set_step(STEP_LEGIT, StepState::Active);
        self.blank();
        self.feed(FeedKind::Head, "━━━ PHASE 1: Legitimate Users Logging In ━━━");

        let result = match self.transport.request(ApiRequest::post("/api/demo/run-attack")).await {
            Ok(None) => return Err(self.abort(id)),
            Ok(Some(resp)) => resp.into_result().and_then(|r| r.json::<RunAttackResponse>()),
            Err(e) => Err(e),
        };
        self.guard(id, epoch)?;

        let events = match result {
            Ok(data) => data.events,
            Err(e) => {
                warn!(run = id, "attack request failed: {e}");
                self.advance(id, DemoPhase::Error)?;
                self.feed(FeedKind::Warn, "  ✗ Attack API error");
                self.render.set_step(STEP_LEGIT, StepState::Error);
                self.render.set_step(STEP_BOTS, StepState::Error);
                self.render.set_button(Button::RunAttack, true);
                return Err(e.into());
            }
        };

        for e in &events.legit {
            self.feed(FeedKind::Legit, event_line(e, "✔ OK"));
        }
        self.render.set_step(STEP_LEGIT, StepState::Done);

        self.advance(id, DemoPhase::BotTraffic)?;
        tokio::time::sleep(self.pacing.bot_delay).await;
        self.guard(id, epoch)?;

        self.render.set_step(STEP_BOTS, StepState::Active);
        self.blank();
        self.feed(FeedKind::Head, "━━━ PHASE 2: 🤖 BOTNET ATTACK INCOMING ━━━");
        self.feed(FeedKind::Warn, "  Source: 45.152.66.x/24 · Same Chrome 88 UA · Robotic typing (50ms)");
        self.blank();
        for e in &events.bots {
            self.feed(FeedKind::Bot, event_line(e, "🤖 BOT"));
        }

        let summary = DemoSummary {
            legit: events.legit.len(),
            bots: events.bots.len(),
            avg_legit: format::mean(events.legit.iter().map(Event::risk)),
            avg_bot: format::mean(events.bots.iter().map(Event::risk)),
        };
        self.blank();
        self.feed(FeedKind::Legit, format!("  Avg risk (legit): {}", format::score(summary.avg_legit)));
        self.feed(
            FeedKind::Bot,
            format!("  Avg risk (botnet): {}  ← higher entropy & uniform patterns", format::score(summary.avg_bot)),
        );
        self.render.set_step(STEP_BOTS, StepState::Done);

        self.advance(id, DemoPhase::ClusterDetection)?;
        self.render.set_step(STEP_CLUSTER, StepState::Active);
        self.blank();
        self.feed(FeedKind::Head, "━━━ PHASE 3: Graph Cluster Detection Running… ━━━");
        self.feed(FeedKind::Info, "  Neo4j scanning for coordinated login clusters...");

        tokio::time::sleep(self.pacing.cluster_delay).await;
        self.guard(id, epoch)?;

        self.feed(FeedKind::Legit, "  ✔ Cluster analysis complete — bots share behavior hash");
        self.blank();
        self.feed(FeedKind::Info, "  Ready to freeze. Click \"❄️ Freeze All Bots\" to neutralise the attack.");
        {
            let mut run = self.lock();
            if run.id != id {
                return Err(Error::Superseded);
            }
            run.armed = true;
        }
        self.render.set_button(Button::FreezeAll, true);
        self.render.set_button(Button::RunAttack, true);

        info!(run = id, legit = summary.legit, bots = summary.bots, "attack demo ready to freeze");
        Ok(summary)
    }

    pub async fn freeze_all(&self) -> Result<FreezeSummary, Error> {
        let epoch = self.transport.session().epoch();
        let id = {
            let mut run = self.lock();
            if run.phase != DemoPhase::ClusterDetection || !run.armed {
                return Err(Error::FreezeNotArmed);
            }
            run.armed = false;
            run.phase = DemoPhase::Freezing;
            run.id
        };

        self.render.set_button(Button::FreezeAll, false);
        self.blank();
        self.feed(FeedKind::Head, "━━━ PHASE 4: ❄️ Freezing All Bot Accounts ━━━");
        self.feed(FeedKind::Info, "  Detecting clusters → Auth0 block → Algorand audit...");

        let result = match self.transport.request(ApiRequest::post("/api/demo/freeze-all")).await {
            Ok(None) => return Err(self.abort(id)),
            Ok(Some(resp)) => resp.into_result().and_then(|r| r.json::<FreezeAllResponse>()),
            Err(e) => Err(e),
        };
        self.guard(id, epoch)?;

        let data = match result {
            Ok(data) => data,
            Err(e) => {
                warn!(run = id, "freeze request failed: {e}");
                {
                    // re-arm so the freeze can be retried within this run
                    let mut run = self.lock();
                    run.phase = DemoPhase::ClusterDetection;
                    run.armed = true;
                }
                self.feed(FeedKind::Warn, "  ✗ Freeze API error");
                self.render.set_step(STEP_CLUSTER, StepState::Error);
                self.render.set_button(Button::FreezeAll, true);
                return Err(e.into());
            }
        };

        let summary = FreezeSummary {
            frozen_count: data.frozen_count.unwrap_or(data.frozen_users.len()),
            auth0_blocked: data.frozen_users.iter().filter(|u| u.auth0).count(),
            chain_logged: data.frozen_users.iter().filter(|u| u.blockchain).count(),
            users: data.frozen_users,
        };

        for u in &summary.users {
            self.feed(FeedKind::Frozen, freeze_line(u));
        }
        self.blank();
        self.feed(FeedKind::Head, format!("  ━━ {} account(s) frozen. Attack neutralised! ━━", summary.frozen_count));
        self.render.set_step(STEP_CLUSTER, StepState::Done);

        let rows = summary
            .users
            .iter()
            .map(|u| {
                Row::new(vec![
                    Cell::text(format!("❄️ {}", u.user_id)),
                    Cell::text(format::or_missing(u.ip_address.as_deref())),
                    Cell::score(u.risk_score.unwrap_or(0.0)),
                    Cell::text(if u.auth0 { "✔ Auth0" } else { "✗ Auth0" }),
                    Cell::text(if u.blockchain { "⛓ Logged" } else { "— Chain" }),
                ])
            })
            .collect();
        self.render.show_result(Some(ResultCard {
            title: format!("{} Bot Account(s) Frozen!", summary.frozen_count),
            subtitle: format!(
                "{} blocked via Auth0, {} logged to the Algorand blockchain.",
                summary.auth0_blocked, summary.chain_logged
            ),
            rows,
        }));

        self.loaders.frozen_count().await;
        self.guard(id, epoch)?;
        self.advance(id, DemoPhase::Done)?;
        self.render.set_button(Button::RunAttack, true);
        info!(run = id, frozen = summary.frozen_count, "attack demo finished");

        tokio::time::sleep(self.pacing.hint_delay).await;
        if self.guard(id, epoch).is_ok() {
            self.feed(FeedKind::Info, "  → Switch to \"Frozen Users\" tab to see full details.");
        }

        Ok(summary)
    }
}
