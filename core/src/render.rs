use serde::Serialize;
use std::collections::{BTreeMap, BTreeSet};
use std::sync::{Mutex, PoisonError};
use tokio::sync::watch;

use crate::format::Severity;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum View {
    Auth,
    Dashboard,
}

/// Every independently rendered region of the dashboard
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, strum_macros::IntoStaticStr)]
#[strum(serialize_all = "snake_case")]
pub enum Target {
    EventsTable,
    ClustersPanel,
    FrozenTable,
    FreezeLogTable,
    TeamTable,
    BlockchainInfo,
    ThresholdsPanel,
    StatTotal,
    StatLegit,
    StatSuspicious,
    StatFrozen,
    FrozenBadge,
    LoggedUser,
    LoginError,
    RegisterError,
    ThresholdsStatus,
    WalletResult,
    ChainActionResult,
    ClusterCheckResult,
    UnfreezeError,
}

impl Target {
    pub fn name(&self) -> &'static str {
        self.into()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Cell {
    pub text: String,
    /// Set for risk-like cells, drives the severity tint
    pub score: Option<f64>,
}

impl Cell {
    pub fn text(text: impl Into<String>) -> Self {
        Self { text: text.into(), score: None }
    }

    pub fn score(value: f64) -> Self {
        Self { text: crate::format::score(value), score: Some(value) }
    }

    pub fn severity(&self) -> Option<Severity> {
        self.score.map(Severity::classify)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Row {
    pub cells: Vec<Cell>,
}

impl Row {
    pub fn new(cells: Vec<Cell>) -> Self {
        Self { cells }
    }

    pub fn texts(&self) -> Vec<&str> {
        self.cells.iter().map(|c| c.text.as_str()).collect()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub enum Content {
    /// Resource has no items, carries the placeholder text
    Empty(String),
    Rows(Vec<Row>),
    /// Inline failure message, never transport internals
    Error(String),
}

impl Content {
    pub fn rows(&self) -> &[Row] {
        match self {
            Content::Rows(rows) => rows,
            _ => &[],
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum FeedKind {
    Plain,
    Head,
    Info,
    Legit,
    Bot,
    Warn,
    Frozen,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FeedLine {
    pub kind: FeedKind,
    pub text: String,
}

impl FeedLine {
    pub fn new(kind: FeedKind, text: impl Into<String>) -> Self {
        Self { kind, text: text.into() }
    }

    pub fn blank() -> Self {
        Self::new(FeedKind::Plain, "")
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
pub enum StepState {
    #[default]
    Pending,
    Active,
    Done,
    Error,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum Button {
    RunAttack,
    FreezeAll,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ResultCard {
    pub title: String,
    pub subtitle: String,
    pub rows: Vec<Row>,
}

/// What the core needs from whatever draws the dashboard
pub trait Render: Send + Sync {
    fn show_view(&self, view: View);
    /// Makes `tab` the only active tab, `None` deactivates all of them
    fn activate_tab(&self, tab: Option<&str>);
    fn set_title(&self, title: &str, subtitle: &str);
    /// Empty text hides the target
    fn set_text(&self, target: Target, text: &str);
    fn set_content(&self, target: Target, content: Content);
    fn set_loading(&self, target: Target, loading: bool);
    fn clear_feed(&self);
    fn push_feed(&self, line: FeedLine);
    /// Demo step indicator, 1-based
    fn set_step(&self, step: usize, state: StepState);
    fn set_button(&self, button: Button, enabled: bool);
    fn show_result(&self, card: Option<ResultCard>);
}

pub const DEMO_STEPS: usize = 4;

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SurfaceState {
    pub view: View,
    pub active_tab: Option<String>,
    pub title: String,
    pub subtitle: String,
    pub texts: BTreeMap<Target, String>,
    pub contents: BTreeMap<Target, Content>,
    pub loading: BTreeSet<Target>,
    pub feed: Vec<FeedLine>,
    pub steps: [StepState; DEMO_STEPS],
    pub run_enabled: bool,
    pub freeze_enabled: bool,
    pub result: Option<ResultCard>,
}

impl Default for SurfaceState {
    fn default() -> Self {
        Self {
            view: View::Auth,
            active_tab: None,
            title: String::new(),
            subtitle: String::new(),
            texts: BTreeMap::new(),
            contents: BTreeMap::new(),
            loading: BTreeSet::new(),
            feed: Vec::new(),
            steps: [StepState::Pending; DEMO_STEPS],
            run_enabled: true,
            freeze_enabled: false,
            result: None,
        }
    }
}

impl SurfaceState {
    pub fn text(&self, target: Target) -> Option<&str> {
        self.texts.get(&target).map(String::as_str)
    }

    pub fn content(&self, target: Target) -> Option<&Content> {
        self.contents.get(&target)
    }

    pub fn is_loading(&self, target: Target) -> bool {
        self.loading.contains(&target)
    }

    pub fn feed_text(&self) -> Vec<&str> {
        self.feed.iter().map(|l| l.text.as_str()).collect()
    }
}

/// Render target kept in memory. Every actual change bumps a revision that
/// observers can wait on through `subscribe`.
pub struct Surface {
    state: Mutex<SurfaceState>,
    revision: watch::Sender<u64>,
}

impl Default for Surface {
    fn default() -> Self {
        Self::new()
    }
}

impl Surface {
    pub fn new() -> Self {
        let (revision, _) = watch::channel(0);
        Self { state: Mutex::new(SurfaceState::default()), revision }
    }

    pub fn snapshot(&self) -> SurfaceState {
        self.state.lock().unwrap_or_else(PoisonError::into_inner).clone()
    }

    pub fn subscribe(&self) -> watch::Receiver<u64> {
        self.revision.subscribe()
    }

    pub fn revision(&self) -> u64 {
        *self.revision.borrow()
    }

    fn update(&self, f: impl FnOnce(&mut SurfaceState) -> bool) {
        let changed = {
            let mut state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
            f(&mut state)
        };
        if changed {
            self.revision.send_modify(|r| *r += 1);
        }
    }
}

fn replace<T: PartialEq>(slot: &mut T, value: T) -> bool {
    if *slot == value {
        return false;
    }
    *slot = value;
    true
}

impl Render for Surface {
    fn show_view(&self, view: View) {
        self.update(|s| {
            let mut changed = replace(&mut s.view, view);
            if view == View::Auth && !s.loading.is_empty() {
                s.loading.clear();
                changed = true;
            }
            changed
        });
    }

    fn activate_tab(&self, tab: Option<&str>) {
        self.update(|s| replace(&mut s.active_tab, tab.map(str::to_string)));
    }

    fn set_title(&self, title: &str, subtitle: &str) {
        self.update(|s| replace(&mut s.title, title.to_string()) | replace(&mut s.subtitle, subtitle.to_string()));
    }

    fn set_text(&self, target: Target, text: &str) {
        self.update(|s| {
            if text.is_empty() {
                return s.texts.remove(&target).is_some();
            }
            s.texts.insert(target, text.to_string()).as_deref() != Some(text)
        });
    }

    fn set_content(&self, target: Target, content: Content) {
        self.update(|s| {
            let was_loading = s.loading.remove(&target);
            if s.contents.get(&target) == Some(&content) {
                return was_loading;
            }
            s.contents.insert(target, content);
            true
        });
    }

    fn set_loading(&self, target: Target, loading: bool) {
        self.update(|s| if loading { s.loading.insert(target) } else { s.loading.remove(&target) });
    }

    fn clear_feed(&self) {
        self.update(|s| {
            let changed = !s.feed.is_empty();
            s.feed.clear();
            changed
        });
    }

    fn push_feed(&self, line: FeedLine) {
        self.update(|s| {
            s.feed.push(line);
            true
        });
    }

    fn set_step(&self, step: usize, state: StepState) {
        self.update(|s| match step.checked_sub(1).and_then(|i| s.steps.get_mut(i)) {
            Some(slot) => replace(slot, state),
            None => false,
        });
    }

    fn set_button(&self, button: Button, enabled: bool) {
        self.update(|s| match button {
            Button::RunAttack => replace(&mut s.run_enabled, enabled),
            Button::FreezeAll => replace(&mut s.freeze_enabled, enabled),
        });
    }

    fn show_result(&self, card: Option<ResultCard>) {
        self.update(|s| replace(&mut s.result, card));
    }
}
