//! Periodic task scheduling.
//!
//! Every background concern (metric cleanup, rule evaluation, health probing,
//! disaster detection) implements [`Tickable`]. Production code hands them to a
//! [`Scheduler`]; tests call `tick()` directly.

use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use futures::FutureExt;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

/// A unit of periodic work.
#[async_trait]
pub trait Tickable: Send + Sync {
    /// Task name for logs.
    fn name(&self) -> &str;

    /// Run one iteration. Must leave state consistent; a panic is logged and
    /// the task keeps its schedule.
    async fn tick(&self);
}

/// Run `task` every `interval` until `token` is cancelled.
///
/// Cancellation is only observed between ticks, so a tick in flight always
/// completes.
pub fn spawn_periodic(
    task: Arc<dyn Tickable>,
    interval: Duration,
    token: CancellationToken,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        // The first tick of a tokio interval completes immediately.
        ticker.tick().await;
        info!("Starting periodic task {} (interval: {:?})", task.name(), interval);

        loop {
            tokio::select! {
                biased;
                _ = token.cancelled() => {
                    info!("Periodic task {} shutting down", task.name());
                    break;
                }
                _ = ticker.tick() => {
                    debug!("Tick: {}", task.name());
                    if AssertUnwindSafe(task.tick()).catch_unwind().await.is_err() {
                        error!("Periodic task {} panicked during tick", task.name());
                    }
                }
            }
        }
    })
}

struct ScheduledTask {
    name: String,
    handle: JoinHandle<()>,
}

/// Owns a set of periodic tasks sharing one cancellation token.
pub struct Scheduler {
    token: CancellationToken,
    tasks: Vec<ScheduledTask>,
}

impl Scheduler {
    /// Create a scheduler with its own root token.
    pub fn new() -> Self {
        Self::with_token(CancellationToken::new())
    }

    /// Create a scheduler whose tasks stop when `parent` is cancelled.
    pub fn with_token(parent: CancellationToken) -> Self {
        Self {
            token: parent.child_token(),
            tasks: Vec::new(),
        }
    }

    /// Start a task.
    pub fn spawn(&mut self, task: Arc<dyn Tickable>, interval: Duration) {
        let name = task.name().to_string();
        let handle = spawn_periodic(task, interval, self.token.clone());
        self.tasks.push(ScheduledTask { name, handle });
    }

    /// Names of the running tasks.
    pub fn task_names(&self) -> Vec<&str> {
        self.tasks.iter().map(|t| t.name.as_str()).collect()
    }

    /// Token shared by all tasks.
    pub fn token(&self) -> &CancellationToken {
        &self.token
    }

    /// Cancel every task and wait for in-flight ticks to finish.
    pub async fn shutdown(self) {
        self.token.cancel();
        for task in self.tasks {
            if let Err(e) = task.handle.await {
                warn!("Periodic task {} ended abnormally: {}", task.name, e);
            }
        }
    }
}

impl Default for Scheduler {
    fn default() -> Self {
        Self::new()
    }
}
