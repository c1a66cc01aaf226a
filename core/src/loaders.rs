use crate::format::{self, MISSING, Severity};
use crate::models::{
    Balance, BlockchainStatus, Cluster, ClustersPayload, Event, FreezeAction, FreezeLogEntry, FrozenUser, TeamMember,
    Thresholds, frozen_count_of, list_from,
};
use crate::poller::PollTarget;
use crate::render::{Cell, Content, Render, Row, Target};
use crate::session::Session;
use crate::transport::{ApiRequest, AuthTransport, Error};
use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde_json::Value;
use std::sync::Arc;
use tracing::{debug, warn};

pub const EMPTY_EVENTS: &str = "No events yet. Run the Attack Demo to generate traffic.";
pub const EMPTY_CLUSTERS: &str = "No clusters detected yet. Run the Attack Demo first.";
pub const EMPTY_FROZEN: &str = "No frozen users yet. Run the Attack Demo and click \"Freeze All Bots\".";
pub const EMPTY_FREEZE_LOG: &str = "No freeze actions recorded yet.";
pub const EMPTY_TEAM: &str = "No team members yet.";
pub const NO_MEMBERS: &str = "No members data";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoadMode {
    /// Shows the loading indicator of the target while fetching
    Visible,
    /// Background refresh, no loading indicator
    Silent,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, strum_macros::IntoStaticStr)]
#[strum(serialize_all = "snake_case")]
pub enum Resource {
    Events,
    Clusters,
    FrozenUsers,
    FreezeLog,
    Team,
    Blockchain,
    Thresholds,
}

impl Resource {
    pub fn target(&self) -> Target {
        match self {
            Resource::Events => Target::EventsTable,
            Resource::Clusters => Target::ClustersPanel,
            Resource::FrozenUsers => Target::FrozenTable,
            Resource::FreezeLog => Target::FreezeLogTable,
            Resource::Team => Target::TeamTable,
            Resource::Blockchain => Target::BlockchainInfo,
            Resource::Thresholds => Target::ThresholdsPanel,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct EventsView {
    pub content: Content,
    pub total: usize,
    pub legit: usize,
    pub suspicious: usize,
}

pub fn shape_events(mut events: Vec<Event>) -> EventsView {
    if events.is_empty() {
        return EventsView { content: Content::Empty(EMPTY_EVENTS.to_string()), total: 0, legit: 0, suspicious: 0 };
    }

    // newest first, undated events last
    events.sort_by_key(|e| std::cmp::Reverse(e.created_at.as_deref().and_then(format::parse_timestamp)));

    let suspicious = events.iter().filter(|e| e.is_suspicious).count();
    let rows = events
        .iter()
        .map(|e| {
            Row::new(vec![
                Cell::text(format::or_missing(e.user_id.as_deref())),
                Cell::text(format::or_missing(e.ip_address.as_deref())),
                Cell::score(e.risk()),
                Cell::text(format::score(e.entropy())),
                Cell::text(if e.is_suspicious { "⚠ Suspicious" } else { "✔ OK" }),
                Cell::text(format::time_of_day(e.created_at.as_deref())),
            ])
        })
        .collect();

    EventsView { content: Content::Rows(rows), total: events.len(), legit: events.len() - suspicious, suspicious }
}

pub fn shape_clusters(clusters: &[Cluster]) -> Content {
    if clusters.is_empty() {
        return Content::Empty(EMPTY_CLUSTERS.to_string());
    }
    let rows = clusters
        .iter()
        .enumerate()
        .map(|(i, c)| {
            let members = if c.members.is_empty() { NO_MEMBERS.to_string() } else { c.members.join(", ") };
            Row::new(vec![
                Cell::text(format!("Cluster #{}", i + 1)),
                Cell::text(format!("{} members", c.size)),
                Cell::score(c.avg_risk_score),
                Cell::text(c.behavior_hash.as_deref().map(|h| format::short(h, 32)).unwrap_or_else(|| "N/A".into())),
                Cell::text(members),
            ])
        })
        .collect();
    Content::Rows(rows)
}

pub fn shape_frozen_users(users: &[FrozenUser]) -> Content {
    if users.is_empty() {
        return Content::Empty(EMPTY_FROZEN.to_string());
    }
    let rows = users
        .iter()
        .map(|u| {
            Row::new(vec![
                Cell::text(&u.user_id),
                Cell::text(format::or_missing(u.ip_address.as_deref())),
                Cell::score(u.risk_score.unwrap_or(0.0)),
                Cell::text(format::humanize(u.reason.as_deref())),
                Cell::text(if u.auth0_frozen { "✔ Auth0" } else { "✗ Auth0" }),
                Cell::text(if u.blockchain_logged { "✔ Chain" } else { MISSING }),
                Cell::text(format::date_time(u.frozen_at.as_deref())),
            ])
        })
        .collect();
    Content::Rows(rows)
}

pub fn shape_freeze_log(entries: &[FreezeLogEntry]) -> Content {
    if entries.is_empty() {
        return Content::Empty(EMPTY_FREEZE_LOG.to_string());
    }
    let rows = entries
        .iter()
        .map(|l| {
            let action = match l.action {
                FreezeAction::Freeze => "❄ Freeze",
                FreezeAction::Unfreeze => "↩ Unfreeze",
                FreezeAction::Unknown => MISSING,
            };
            let risk = match l.risk_score {
                Some(r) => Cell::score(r),
                None => Cell::text(MISSING),
            };
            Row::new(vec![
                Cell::text(format::or_missing(l.user_id.as_deref())),
                Cell::text(action),
                Cell::text(format::humanize(l.reason.as_deref())),
                risk,
                Cell::text(format::or_missing(l.cluster_id.as_deref())),
                Cell::text(format::date_time(l.timestamp.as_deref())),
            ])
        })
        .collect();
    Content::Rows(rows)
}

pub fn shape_team(members: &[TeamMember]) -> Content {
    if members.is_empty() {
        return Content::Empty(EMPTY_TEAM.to_string());
    }
    let rows = members
        .iter()
        .map(|m| {
            Row::new(vec![
                Cell::text(&m.username),
                Cell::text(format::or_missing(m.full_name.as_deref())),
                Cell::text(format::or_missing(m.email.as_deref())),
                Cell::text(format::or_missing(m.role.as_deref())),
                Cell::text(format::date_time(m.created_at.as_deref())),
            ])
        })
        .collect();
    Content::Rows(rows)
}

pub fn shape_blockchain(status: &BlockchainStatus, balance_algo: f64) -> Content {
    let pair = |k: &str, v: String| Row::new(vec![Cell::text(k), Cell::text(v)]);
    Content::Rows(vec![
        pair("Network", format::or_missing(status.network.as_deref())),
        pair("Configured", if status.configured { "Yes" } else { "No" }.to_string()),
        pair("Address", status.address.as_deref().map(|a| format::short(a, 12)).unwrap_or_else(|| "Not set".into())),
        pair("Balance", format!("{balance_algo:.4} ALGO")),
    ])
}

pub fn shape_thresholds(t: &Thresholds) -> Content {
    Content::Rows(vec![
        Row::new(vec![Cell::text("Cluster size"), Cell::text(t.cluster_size.to_string())]),
        Row::new(vec![Cell::text("Similarity"), Cell::text(format::score(t.similarity))]),
        Row::new(vec![Cell::text("Risk score"), Cell::score(t.risk_score)]),
    ])
}

pub struct Loaders {
    transport: Arc<AuthTransport>,
    render: Arc<dyn Render>,
    events_limit: usize,
}

impl Loaders {
    pub fn new(transport: Arc<AuthTransport>, render: Arc<dyn Render>, events_limit: usize) -> Self {
        Self { transport, render, events_limit }
    }

    fn session(&self) -> &Arc<Session> {
        self.transport.session()
    }

    pub async fn load(&self, resource: Resource, mode: LoadMode) {
        match resource {
            Resource::Events => self.events(mode).await,
            Resource::Clusters => self.clusters(mode).await,
            Resource::FrozenUsers => self.frozen_users(mode).await,
            Resource::FreezeLog => self.freeze_log(mode).await,
            Resource::Team => self.team(mode).await,
            Resource::Blockchain => self.blockchain(mode).await,
            Resource::Thresholds => self.thresholds(mode).await,
        }
    }

    /// `None` means stop without rendering: the call was aborted by a 401 or
    /// the session changed while it was in flight
    async fn fetch<T: DeserializeOwned>(&self, target: Target, mode: LoadMode, req: ApiRequest) -> Option<Result<T, Error>> {
        let epoch = self.session().epoch();
        if !self.session().is_current(epoch) {
            debug!(target = target.name(), "skipping load without session");
            return None;
        }
        if mode == LoadMode::Visible {
            self.render.set_loading(target, true);
        }

        let result = self.transport.fetch_json::<T>(req).await;
        if !self.session().is_current(epoch) {
            // replaced rather than torn down: the new session still sees this target
            if mode == LoadMode::Visible && self.session().is_authenticated() {
                self.render.set_loading(target, false);
            }
            return None;
        }
        result.transpose()
    }

    fn fail(&self, target: Target, error: &Error) {
        warn!(target = target.name(), "load failed: {error}");
        self.render.set_content(target, Content::Error(error.user_message()));
    }

    pub async fn events(&self, mode: LoadMode) {
        let target = Target::EventsTable;
        let req = ApiRequest::get("/api/events").query("limit", self.events_limit);
        let Some(result) = self.fetch::<Value>(target, mode, req).await else {
            return;
        };

        match result.and_then(|v| Ok(list_from::<Event>(v)?)) {
            Ok(events) => {
                let view = shape_events(events);
                self.render.set_text(Target::StatTotal, &view.total.to_string());
                self.render.set_text(Target::StatLegit, &view.legit.to_string());
                self.render.set_text(Target::StatSuspicious, &view.suspicious.to_string());
                self.render.set_content(target, view.content);
            }
            Err(e) => self.fail(target, &e),
        }
    }

    pub async fn clusters(&self, mode: LoadMode) {
        let target = Target::ClustersPanel;
        let Some(result) = self.fetch::<ClustersPayload>(target, mode, ApiRequest::get("/api/clusters")).await else {
            return;
        };

        match result {
            Ok(payload) => {
                let (clusters, error) = payload.into_clusters();
                if let Some(error) = error {
                    warn!("cluster backend reported: {error}");
                }
                self.render.set_content(target, shape_clusters(&clusters));
            }
            Err(e) => self.fail(target, &e),
        }
    }

    pub async fn frozen_users(&self, mode: LoadMode) {
        let target = Target::FrozenTable;
        let Some(result) = self.fetch::<Value>(target, mode, ApiRequest::get("/api/frozen-users")).await else {
            return;
        };

        match result.and_then(|v| Ok(list_from::<FrozenUser>(v)?)) {
            Ok(users) => {
                self.set_frozen_count(users.len());
                self.render.set_content(target, shape_frozen_users(&users));
            }
            Err(e) => self.fail(target, &e),
        }
    }

    /// Badge and stat tile always come from the same fetched count
    pub async fn frozen_count(&self) {
        let req = ApiRequest::get("/api/frozen-users");
        let Some(result) = self.fetch::<Value>(Target::FrozenBadge, LoadMode::Silent, req).await else {
            return;
        };

        match result {
            Ok(value) => self.set_frozen_count(frozen_count_of(&value)),
            Err(e) => warn!("frozen count refresh failed: {e}"),
        }
    }

    fn set_frozen_count(&self, count: usize) {
        let count = count.to_string();
        self.render.set_text(Target::FrozenBadge, &count);
        self.render.set_text(Target::StatFrozen, &count);
    }

    pub async fn freeze_log(&self, mode: LoadMode) {
        let target = Target::FreezeLogTable;
        let Some(result) = self.fetch::<Value>(target, mode, ApiRequest::get("/api/freeze-log")).await else {
            return;
        };

        match result.and_then(|v| Ok(list_from::<FreezeLogEntry>(v)?)) {
            Ok(entries) => self.render.set_content(target, shape_freeze_log(&entries)),
            Err(e) => self.fail(target, &e),
        }
    }

    pub async fn team(&self, mode: LoadMode) {
        let target = Target::TeamTable;
        let Some(result) = self.fetch::<Value>(target, mode, ApiRequest::get("/api/users")).await else {
            return;
        };

        match result.and_then(|v| Ok(list_from::<TeamMember>(v)?)) {
            Ok(members) => self.render.set_content(target, shape_team(&members)),
            Err(e) => self.fail(target, &e),
        }
    }

    pub async fn blockchain(&self, mode: LoadMode) {
        let target = Target::BlockchainInfo;
        let epoch = self.session().epoch();
        let req = ApiRequest::get("/api/blockchain/status");
        let status = match self.fetch::<BlockchainStatus>(target, mode, req).await {
            None => return,
            Some(Ok(status)) => status,
            Some(Err(e)) => return self.fail(target, &e),
        };

        // an unfunded or unconfigured wallet is not an error here
        let balance = match self.transport.request(ApiRequest::get("/api/blockchain/balance")).await {
            Ok(None) => return,
            Ok(Some(resp)) if resp.is_ok() => resp.json::<Balance>().ok().and_then(|b| b.balance_algo).unwrap_or(0.0),
            Ok(Some(resp)) => {
                debug!(status = resp.status, "balance unavailable");
                0.0
            }
            Err(e) => {
                debug!("balance unavailable: {e}");
                0.0
            }
        };

        if self.session().is_current(epoch) {
            self.render.set_content(target, shape_blockchain(&status, balance));
        }
    }

    pub async fn thresholds(&self, mode: LoadMode) {
        let target = Target::ThresholdsPanel;
        let Some(result) = self.fetch::<Thresholds>(target, mode, ApiRequest::get("/api/thresholds")).await else {
            return;
        };

        match result {
            Ok(t) => self.render.set_content(target, shape_thresholds(&t)),
            Err(e) => self.fail(target, &e),
        }
    }
}

/// Highest severity among rendered rows, for summaries
pub fn peak_severity(content: &Content) -> Option<Severity> {
    content.rows().iter().flat_map(|r| r.cells.iter()).filter_map(Cell::severity).max()
}

#[async_trait]
impl PollTarget for Loaders {
    async fn tick(&self) {
        self.transport.metrics().add_poll_tick();
        tokio::join!(self.events(LoadMode::Silent), self.frozen_count());
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::render::View;
    use crate::session::Identity;
    use crate::testkit::{Harness, MockBackend};
    use reqwest::Method;
    use serde_json::json;
    use std::time::Duration;

    fn ev(user: &str, risk: f64, suspicious: bool, at: Option<&str>) -> Event {
        Event {
            user_id: Some(user.into()),
            ip_address: Some("10.0.0.1".into()),
            risk_score: Some(risk),
            entropy_score: Some(0.5),
            is_suspicious: suspicious,
            created_at: at.map(str::to_string),
        }
    }

    #[test]
    fn test_shape_events_orders_and_counts() {
        let view = shape_events(vec![
            ev("old", 0.1, false, Some("2024-01-01T10:00:00")),
            ev("undated", 0.2, false, None),
            ev("new", 0.9, true, Some("2024-01-02T10:00:00")),
        ]);
        let rows = view.content.rows();
        let users: Vec<&str> = rows.iter().map(|r| r.cells[0].text.as_str()).collect();
        assert_eq!(users, ["new", "old", "undated"]);
        assert_eq!((view.total, view.legit, view.suspicious), (3, 2, 1));
        assert_eq!(rows[0].cells[2].text, "0.900");
        assert_eq!(rows[0].cells[2].severity(), Some(Severity::High));
        assert_eq!(rows[2].cells[5].text, MISSING);
        assert_eq!(peak_severity(&view.content), Some(Severity::High));
    }

    #[test]
    fn test_empty_states_are_human_readable() {
        assert_eq!(shape_events(vec![]).content, Content::Empty(EMPTY_EVENTS.into()));
        assert_eq!(shape_clusters(&[]), Content::Empty(EMPTY_CLUSTERS.into()));
        assert_eq!(shape_frozen_users(&[]), Content::Empty(EMPTY_FROZEN.into()));
        assert_eq!(shape_freeze_log(&[]), Content::Empty(EMPTY_FREEZE_LOG.into()));
        assert_eq!(shape_team(&[]), Content::Empty(EMPTY_TEAM.into()));
    }

    #[test]
    fn test_shape_frozen_users_statuses_are_independent() {
        let users = vec![
            FrozenUser { user_id: "bot1".into(), auth0_frozen: true, blockchain_logged: false, ..Default::default() },
            FrozenUser { user_id: "bot2".into(), auth0_frozen: false, blockchain_logged: true, ..Default::default() },
        ];
        let content = shape_frozen_users(&users);
        let rows = content.rows();
        assert_eq!(rows[0].texts()[4..6], ["✔ Auth0", MISSING]);
        assert_eq!(rows[1].texts()[4..6], ["✗ Auth0", "✔ Chain"]);
    }

    #[test]
    fn test_shape_clusters_fallbacks() {
        let clusters = vec![Cluster { members: vec![], size: 3, avg_risk_score: 0.5, behavior_hash: None }];
        let content = shape_clusters(&clusters);
        assert_eq!(content.rows()[0].texts(), ["Cluster #1", "3 members", "0.500", "N/A", NO_MEMBERS]);
    }

    #[tokio::test]
    async fn test_loader_is_idempotent() {
        let h = Harness::new();
        h.login().await;
        h.backend.reply(
            Method::GET,
            "/api/events",
            200,
            json!([{"user_id": "alice", "risk_score": 0.12, "created_at": "2024-01-01T10:00:00"}]),
        );
        let loaders = h.loaders();

        loaders.events(LoadMode::Visible).await;
        let first = h.surface.snapshot();
        let revision = h.surface.revision();
        loaders.events(LoadMode::Visible).await;
        let second = h.surface.snapshot();

        assert_eq!(first, second);
        assert_eq!(second.content(Target::EventsTable).unwrap().rows().len(), 1);
        assert_eq!(second.text(Target::StatTotal), Some("1"));
        assert!(!second.is_loading(Target::EventsTable));
        // the loading flag went up and down once more, nothing else moved
        assert_eq!(h.surface.revision(), revision + 2);
        assert_eq!(h.backend.calls()[0].query, [("limit".to_string(), "50".to_string())]);
    }

    #[tokio::test]
    async fn test_401_aborts_without_rendering() {
        let h = Harness::new();
        h.login().await;
        h.backend.reply(Method::GET, "/api/clusters", 401, json!({"detail": "expired"}));
        let loaders = h.loaders();

        loaders.clusters(LoadMode::Silent).await;
        let s = h.surface.snapshot();
        assert_eq!(s.content(Target::ClustersPanel), None);
        assert!(!h.session.is_authenticated());
    }

    #[tokio::test]
    async fn test_no_render_after_session_changes_mid_flight() {
        let backend = Arc::new(MockBackend::new().with_delay(Duration::from_millis(50)));
        let h = Harness::with_backend(backend);
        h.login().await;
        h.backend.reply(Method::GET, "/api/freeze-log", 200, json!([{"user_id": "u", "action": "freeze"}]));
        let loaders = h.loaders();

        let task = tokio::spawn({
            let loaders = loaders.clone();
            async move { loaders.freeze_log(LoadMode::Silent).await }
        });
        tokio::time::sleep(Duration::from_millis(10)).await;
        h.session.teardown().await;
        task.await.unwrap();

        assert_eq!(h.surface.snapshot().content(Target::FreezeLogTable), None);
    }

    #[tokio::test]
    async fn test_replaced_session_drops_result_and_spinner() {
        let backend = Arc::new(MockBackend::new().with_delay(Duration::from_millis(50)));
        let h = Harness::with_backend(backend);
        h.login().await;
        h.backend.reply(Method::GET, "/api/clusters", 200, json!([{"members": ["bot1"], "avg_risk_score": 0.9}]));
        let loaders = h.loaders();

        let task = tokio::spawn({
            let loaders = loaders.clone();
            async move { loaders.clusters(LoadMode::Visible).await }
        });
        tokio::time::sleep(Duration::from_millis(10)).await;
        assert!(h.surface.snapshot().is_loading(Target::ClustersPanel));

        let identity = Identity { username: "other".into(), role: None, full_name: None };
        h.session.begin("t2".into(), identity, false).await.unwrap();
        task.await.unwrap();

        let s = h.surface.snapshot();
        assert!(!s.is_loading(Target::ClustersPanel));
        assert_eq!(s.content(Target::ClustersPanel), None);
    }

    #[tokio::test]
    async fn test_no_session_no_request() {
        let h = Harness::new();
        h.loaders().team(LoadMode::Visible).await;
        assert!(h.backend.calls().is_empty());
        assert_eq!(h.surface.snapshot().view, View::Auth);
    }

    #[tokio::test]
    async fn test_failures_render_inline() {
        let h = Harness::new();
        h.login().await;
        h.backend.reply(Method::GET, "/api/users", 403, json!({"detail": "Admins only"}));
        h.backend.fail(Method::GET, "/api/freeze-log");
        let loaders = h.loaders();

        loaders.team(LoadMode::Visible).await;
        loaders.freeze_log(LoadMode::Visible).await;
        let s = h.surface.snapshot();
        assert_eq!(s.content(Target::TeamTable), Some(&Content::Error("Admins only".into())));
        assert_eq!(
            s.content(Target::FreezeLogTable),
            Some(&Content::Error(crate::transport::GENERIC_NETWORK_MESSAGE.into()))
        );
        assert!(h.session.is_authenticated());
    }

    #[tokio::test]
    async fn test_frozen_count_targets_agree() {
        let h = Harness::new();
        h.login().await;
        h.backend.reply(Method::GET, "/api/frozen-users", 200, json!([{"user_id": "a"}, {"user_id": "b"}]));
        h.backend.reply(Method::GET, "/api/frozen-users", 200, json!({"error": "db offline"}));
        let loaders = h.loaders();

        loaders.frozen_count().await;
        let s = h.surface.snapshot();
        assert_eq!(s.text(Target::FrozenBadge), Some("2"));
        assert_eq!(s.text(Target::StatFrozen), Some("2"));

        loaders.frozen_users(LoadMode::Visible).await;
        let s = h.surface.snapshot();
        assert_eq!(s.text(Target::FrozenBadge), Some("0"));
        assert_eq!(s.text(Target::StatFrozen), Some("0"));
        assert_eq!(s.content(Target::FrozenTable), Some(&Content::Empty(EMPTY_FROZEN.into())));
    }

    #[tokio::test]
    async fn test_blockchain_tolerates_missing_balance() {
        let h = Harness::new();
        h.login().await;
        h.backend.reply(
            Method::GET,
            "/api/blockchain/status",
            200,
            json!({"configured": false, "network": "testnet", "address": null}),
        );
        h.backend.reply(Method::GET, "/api/blockchain/balance", 500, json!({"detail": "node down"}));
        let loaders = h.loaders();

        loaders.load(Resource::Blockchain, LoadMode::Visible).await;
        let s = h.surface.snapshot();
        let rows = s.content(Target::BlockchainInfo).unwrap().rows().to_vec();
        assert_eq!(rows[0].texts(), ["Network", "testnet"]);
        assert_eq!(rows[1].texts(), ["Configured", "No"]);
        assert_eq!(rows[2].texts(), ["Address", "Not set"]);
        assert_eq!(rows[3].texts(), ["Balance", "0.0000 ALGO"]);
    }

    #[tokio::test]
    async fn test_poll_tick_refreshes_events_and_count() {
        let h = Harness::new();
        h.login().await;
        h.backend.reply(Method::GET, "/api/events", 200, json!([]));
        h.backend.reply(Method::GET, "/api/frozen-users", 200, json!([]));
        let loaders = h.loaders();

        loaders.tick().await;
        let s = h.surface.snapshot();
        assert_eq!(s.content(Target::EventsTable), Some(&Content::Empty(EMPTY_EVENTS.into())));
        assert_eq!(s.text(Target::StatFrozen), Some("0"));
        assert!(s.loading.is_empty());
        assert_eq!(h.metrics.snapshot().poll_ticks, 1);
    }
}
