//! # Vigil Recovery
//!
//! Disaster detection and automated recovery on top of `vigil-monitor`.
//!
//! ## Features
//!
//! - Disaster events opened from sustained or critical health degradation
//! - Backup restore, rate-limited restarts and admin notification
//! - Time-based escalation of unresolved events

pub mod backup;
pub mod config;
pub mod error;
pub mod event;
pub mod orchestrator;
pub mod restart;

pub use backup::{BackupFilter, BackupMetadata, BackupProvider, BackupStatus, MemoryBackupProvider, RestoreRequest};
pub use config::{HealthCheckSettings, RecoveryActions, RecoveryConfig, RecoveryThresholds, RestartLimit};
pub use error::RecoveryError;
pub use event::{ActionOutcome, DisasterEvent, DisasterType, EventFilter, RecoveryAction, RecoveryActionKind};
pub use orchestrator::{DisasterRecoveryOrchestrator, RecoveryStatus};
pub use restart::{RestartLimiter, RestartSignal};
