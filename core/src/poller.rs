use async_trait::async_trait;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tokio::time::{MissedTickBehavior, interval};
use tracing::{debug, instrument};

/// Work re-run on every tick of the poller
#[async_trait]
pub trait PollTarget: Send + Sync {
    async fn tick(&self);
}

struct Running {
    stop: oneshot::Sender<()>,
    handle: JoinHandle<()>,
}

/// Owns the single repeating re-synchronization task.
///
/// `start` always replaces the previous task, so at most one is ever live.
/// `stop` cancels future ticks only; a tick already running finishes.
pub struct Poller {
    period: Duration,
    target: Arc<dyn PollTarget>,
    running: Mutex<Option<Running>>,
    ticks: Arc<AtomicU64>,
}

impl Poller {
    pub fn new(period: Duration, target: Arc<dyn PollTarget>) -> Self {
        Self { period, target, running: Mutex::new(None), ticks: Arc::new(AtomicU64::new(0)) }
    }

    pub fn period(&self) -> Duration {
        self.period
    }

    pub fn start(&self) {
        let mut running = self.running.lock().unwrap_or_else(PoisonError::into_inner);
        if let Some(previous) = running.take() {
            let _ = previous.stop.send(());
            debug!("poller restarted");
        }

        let (stop, stopped) = oneshot::channel();
        let handle = tokio::spawn(poll_loop(self.period, self.target.clone(), self.ticks.clone(), stopped));
        *running = Some(Running { stop, handle });
    }

    /// No-op when nothing is armed
    pub fn stop(&self) {
        if let Some(previous) = self.running.lock().unwrap_or_else(PoisonError::into_inner).take() {
            let _ = previous.stop.send(());
            debug!("poller stopped");
        }
    }

    pub fn is_running(&self) -> bool {
        self.running
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .as_ref()
            .is_some_and(|r| !r.handle.is_finished())
    }

    /// Ticks executed since creation, across restarts
    pub fn ticks(&self) -> u64 {
        self.ticks.load(Ordering::Relaxed)
    }
}

impl Drop for Poller {
    fn drop(&mut self) {
        self.stop();
    }
}

#[instrument(skip_all, fields(period = ?period), name = "poll_task")]
async fn poll_loop(
    period: Duration,
    target: Arc<dyn PollTarget>,
    ticks: Arc<AtomicU64>,
    mut stopped: oneshot::Receiver<()>,
) {
    let mut ticker = interval(period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    ticker.tick().await; // first tick completes immediately

    loop {
        tokio::select! {
            biased;
            _ = &mut stopped => break,
            _ = ticker.tick() => {}
        }
        target.tick().await;
        ticks.fetch_add(1, Ordering::Relaxed);
    }
}
