use crate::config::DEFAULT_SIMILARITY;
use crate::loaders::{LoadMode, Loaders, shape_thresholds};
use crate::misc::Typename;
use crate::models::{ClusterCheck, Health, Thresholds};
use crate::render::{Render, Target};
use crate::transport::{self, ApiRequest, ApiResponse, AuthTransport};
use serde_json::Value;
use std::sync::Arc;
use tracing::{info, warn};

#[derive(Debug, thiserror::Error, strum_macros::IntoStaticStr)]
pub enum Error {
    #[error("{0}")]
    Validation(String),
    /// 2xx answer whose body reports a failure
    #[error("rejected by server: {0}")]
    Rejected(String),
    #[error("aborted by session teardown")]
    Aborted,
    #[error(transparent)]
    Transport(#[from] transport::Error),
}

impl Typename for Error {
    fn typename(&self) -> &'static str {
        self.into()
    }
}

impl Error {
    pub fn user_message(&self) -> String {
        match self {
            Error::Validation(msg) => msg.clone(),
            Error::Rejected(_) => "The server could not complete the action.".to_string(),
            Error::Aborted => transport::AUTH_EXPIRED_MESSAGE.to_string(),
            Error::Transport(e) => e.user_message(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, strum_macros::IntoStaticStr)]
#[strum(serialize_all = "kebab-case")]
pub enum ChainAction {
    LogFreeze,
    MintBadge,
    UpdateReputation,
    FreezeAndLog,
}

impl ChainAction {
    pub fn path(&self) -> &'static str {
        match self {
            ChainAction::LogFreeze => "/api/blockchain/log-freeze",
            ChainAction::MintBadge => "/api/blockchain/mint-badge",
            ChainAction::UpdateReputation => "/api/blockchain/update-reputation",
            ChainAction::FreezeAndLog => "/api/freeze-blockchain",
        }
    }

    fn takes_risk(&self) -> bool {
        !matches!(self, ChainAction::FreezeAndLog)
    }
}

pub fn validate_thresholds(t: &Thresholds) -> Result<(), Error> {
    if t.cluster_size < 1 {
        return Err(Error::Validation("Cluster size must be at least 1.".into()));
    }
    for (name, value) in [("Similarity", t.similarity), ("Risk score", t.risk_score)] {
        if !(0.0..=1.0).contains(&value) {
            return Err(Error::Validation(format!("{name} must be between 0 and 1.")));
        }
    }
    Ok(())
}

pub struct Actions {
    transport: Arc<AuthTransport>,
    render: Arc<dyn Render>,
    loaders: Arc<Loaders>,
}

impl Actions {
    pub fn new(transport: Arc<AuthTransport>, render: Arc<dyn Render>, loaders: Arc<Loaders>) -> Self {
        Self { transport, render, loaders }
    }

    /// Sends and checks status; `Aborted` when the transport tore down the session
    async fn call(&self, req: ApiRequest) -> Result<ApiResponse, Error> {
        match self.transport.request(req).await? {
            Some(resp) => Ok(resp.into_result()?),
            None => Err(Error::Aborted),
        }
    }

    /// Renders the outcome into `target`, the error message on failure
    fn report<T>(&self, target: Target, result: Result<T, Error>, ok_text: impl FnOnce(&T) -> String) -> Result<T, Error> {
        match &result {
            Ok(value) => self.render.set_text(target, &ok_text(value)),
            // the auth screen takes over, nothing to show inline
            Err(Error::Aborted) => {}
            Err(e) => {
                warn!(target = target.name(), "action failed: {e}");
                self.transport.metrics().add_error(e);
                self.render.set_text(target, &e.user_message());
            }
        }
        result
    }

    pub async fn unfreeze(&self, user_id: &str) -> Result<(), Error> {
        let user_id = user_id.trim();
        let result = if user_id.is_empty() {
            Err(Error::Validation("User id is required.".into()))
        } else {
            self.call(ApiRequest::post("/api/unfreeze").segment(user_id)).await.map(|_| ())
        };
        self.report(Target::UnfreezeError, result, |_| String::new())?;

        info!(user = user_id, "unfrozen");
        tokio::join!(self.loaders.frozen_users(LoadMode::Visible), self.loaders.frozen_count());
        Ok(())
    }

    /// Missing similarity falls back to the default
    pub async fn save_thresholds(
        &self,
        cluster_size: u32,
        similarity: Option<f64>,
        risk_score: f64,
    ) -> Result<Thresholds, Error> {
        let thresholds = Thresholds { cluster_size, similarity: similarity.unwrap_or(DEFAULT_SIMILARITY), risk_score };
        let result = match validate_thresholds(&thresholds) {
            Ok(()) => {
                let body = serde_json::to_value(thresholds).map_err(transport::Error::from)?;
                self.call(ApiRequest::post("/api/thresholds").json(body)).await.map(|_| thresholds)
            }
            Err(e) => Err(e),
        };
        let thresholds = self.report(Target::ThresholdsStatus, result, |_| "Thresholds saved.".to_string())?;
        self.render.set_content(Target::ThresholdsPanel, shape_thresholds(&thresholds));
        Ok(thresholds)
    }

    pub async fn check_clusters(&self) -> Result<ClusterCheck, Error> {
        let result: Result<ClusterCheck, Error> = async {
            let check: ClusterCheck = self.call(ApiRequest::post("/api/check-clusters")).await?.json()?;
            match &check.error {
                Some(error) => Err(Error::Rejected(error.clone())),
                None => Ok(check),
            }
        }
        .await;
        let check = self.report(Target::ClusterCheckResult, result, |c| {
            format!("Flagged {} user(s), froze {}.", c.flagged_count, c.frozen_count)
        })?;

        if check.frozen_count > 0 {
            self.loaders.frozen_count().await;
        }
        Ok(check)
    }

    /// Unauthenticated liveness probe
    pub async fn health(&self) -> Result<Health, Error> {
        let resp = self.transport.send_public(ApiRequest::get("/api/health")).await?;
        Ok(resp.into_result()?.json()?)
    }

    pub async fn generate_wallet(&self) -> Result<Value, Error> {
        let req = ApiRequest::post("/api/blockchain/generate-wallet");
        let result = async { Ok::<Value, Error>(self.call(req).await?.json()?) }.await;
        self.report(Target::WalletResult, result, |w: &Value| {
            let field = |k: &str| w.get(k).and_then(Value::as_str).unwrap_or_default().to_string();
            format!("Address: {}\nMnemonic: {}\nFund URL: {}", field("address"), field("mnemonic"), field("fund_url"))
        })
    }

    pub async fn chain_action(&self, action: ChainAction, user_id: &str, risk_score: f64) -> Result<Value, Error> {
        let user_id = user_id.trim();
        let result = if user_id.is_empty() {
            Err(Error::Validation("User id is required.".into()))
        } else if action.takes_risk() && !risk_score.is_finite() {
            Err(Error::Validation("Risk score must be a number.".into()))
        } else {
            let mut req = ApiRequest::post(action.path()).segment(user_id);
            if action.takes_risk() {
                req = req.query("risk_score", risk_score);
            }
            async { Ok::<Value, Error>(self.call(req).await?.json()?) }.await
        };

        let name: &'static str = action.into();
        info!(action = name, user = user_id, ok = result.is_ok(), "chain action");
        self.report(Target::ChainActionResult, result, |v| {
            serde_json::to_string_pretty(v).unwrap_or_else(|_| v.to_string())
        })
    }
}
