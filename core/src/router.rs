use crate::loaders::{LoadMode, Loaders, Resource};
use crate::render::Render;
use std::sync::{Arc, Mutex, PoisonError};
use tokio::task::JoinHandle;
use tracing::debug;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Tab {
    pub id: &'static str,
    pub title: &'static str,
    pub subtitle: &'static str,
    /// Loader run on every switch, none for pure display tabs
    pub resource: Option<Resource>,
}

pub const DEFAULT_TAB: &str = "events";

pub const TABS: &[Tab] = &[
    Tab { id: "events", title: "Live Events", subtitle: "Real-time login activity feed", resource: Some(Resource::Events) },
    Tab { id: "demo", title: "Attack Demo", subtitle: "Simulate a botnet attack end-to-end", resource: None },
    Tab {
        id: "clusters",
        title: "Cluster View",
        subtitle: "Botnet graph clusters detected by Neo4j",
        resource: Some(Resource::Clusters),
    },
    Tab {
        id: "frozen",
        title: "Frozen Users",
        subtitle: "All accounts currently frozen by AuthShield",
        resource: Some(Resource::FrozenUsers),
    },
    Tab {
        id: "freezelog",
        title: "Freeze Log",
        subtitle: "Complete audit trail of all freeze / unfreeze actions",
        resource: Some(Resource::FreezeLog),
    },
    Tab { id: "team", title: "Team", subtitle: "Analysts with access to AuthShield", resource: Some(Resource::Team) },
    Tab {
        id: "blockchain",
        title: "Blockchain",
        subtitle: "Algorand audit trail & wallet actions",
        resource: Some(Resource::Blockchain),
    },
    Tab {
        id: "settings",
        title: "Settings",
        subtitle: "Cluster and risk detection thresholds",
        resource: Some(Resource::Thresholds),
    },
];

pub fn find_tab(id: &str) -> Option<&'static Tab> {
    TABS.iter().find(|t| t.id == id)
}

/// Keeps exactly one tab active and fires its loader once per switch
pub struct ViewRouter {
    render: Arc<dyn Render>,
    loaders: Arc<Loaders>,
    current: Mutex<Option<String>>,
}

impl ViewRouter {
    pub fn new(render: Arc<dyn Render>, loaders: Arc<Loaders>) -> Self {
        Self { render, loaders, current: Mutex::new(None) }
    }

    /// Never fails: an unknown id deactivates every panel and shows the raw
    /// id as title. Returns the spawned load, if the tab has one.
    pub fn switch_to(&self, id: &str) -> Option<JoinHandle<()>> {
        let tab = find_tab(id);
        *self.current.lock().unwrap_or_else(PoisonError::into_inner) = Some(id.to_string());

        self.render.activate_tab(tab.map(|t| t.id));
        match tab {
            Some(t) => self.render.set_title(t.title, t.subtitle),
            None => {
                debug!(tab = id, "unknown tab");
                self.render.set_title(id, "");
            }
        }

        let resource = tab.and_then(|t| t.resource)?;
        let loaders = self.loaders.clone();
        Some(tokio::spawn(async move { loaders.load(resource, LoadMode::Visible).await }))
    }

    pub fn current(&self) -> Option<String> {
        self.current.lock().unwrap_or_else(PoisonError::into_inner).clone()
    }
}
