pub mod actions;
pub mod auth;
pub mod config;
pub mod context;
pub mod demo;
pub mod format;
pub mod loaders;
pub mod metrics;
pub mod misc;
pub mod models;
pub mod poller;
pub mod render;
pub mod router;
pub mod session;
pub mod transport;

#[cfg(test)]
pub(crate) mod testkit;

pub use config::Config;
pub use context::Dashboard;
pub use metrics::{Metrics, MetricsSnapshot};
pub use render::{Render, Surface, SurfaceState};
pub use session::{CredentialStore, Identity, Session};
pub use transport::{AuthTransport, HttpBackend, ReqwestBackend};

#[derive(Debug, thiserror::Error, strum_macros::IntoStaticStr)]
pub enum Error {
    #[error(transparent)]
    Config(#[from] config::Error),
    #[error(transparent)]
    Session(#[from] session::Error),
    #[error(transparent)]
    Transport(#[from] transport::Error),
    #[error(transparent)]
    Auth(#[from] auth::Error),
    #[error(transparent)]
    Actions(#[from] actions::Error),
    #[error(transparent)]
    Demo(#[from] demo::Error),
}

impl misc::Typename for Error {
    fn typename(&self) -> &'static str {
        self.into()
    }
}
