//! Restart requests from the recovery orchestrator.
//!
//! Vigil cannot replace its own process image. A restart request shuts the
//! runtime down and the process exits with a status the supervisor treats as
//! "start me again".

use std::sync::atomic::{AtomicBool, Ordering};

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;
use tracing::warn;
use vigil_recovery::{RecoveryError, RestartSignal};

pub(crate) struct ProcessRestart {
    shutdown: CancellationToken,
    requested: AtomicBool,
}

impl ProcessRestart {
    pub(crate) fn new(shutdown: CancellationToken) -> Self {
        Self {
            shutdown,
            requested: AtomicBool::new(false),
        }
    }

    /// Whether a restart was requested.
    pub(crate) fn is_requested(&self) -> bool {
        self.requested.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl RestartSignal for ProcessRestart {
    async fn request_restart(&self, reason: &str) -> Result<(), RecoveryError> {
        if self.shutdown.is_cancelled() {
            return Err(RecoveryError::action("restart_service", "shutdown already in progress"));
        }
        warn!("Restart requested: {}", reason);
        self.requested.store(true, Ordering::SeqCst);
        self.shutdown.cancel();
        Ok(())
    }
}
