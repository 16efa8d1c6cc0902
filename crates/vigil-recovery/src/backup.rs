//! Backup collaborator contract.
//!
//! Vigil does not create or store backups itself; it lists them and asks the
//! provider to restore one.

use std::collections::HashMap;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::RwLock;
use tracing::info;

use crate::error::RecoveryError;

/// Backup state as reported by the provider.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BackupStatus {
    Completed,
    Failed,
    InProgress,
}

/// Backup listing entry.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BackupMetadata {
    pub id: String,
    pub created_at: DateTime<Utc>,
    pub status: BackupStatus,
    pub size_bytes: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub label: Option<String>,
}

/// Listing filter; absent fields do not filter.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct BackupFilter {
    pub status: Option<BackupStatus>,
    pub created_after: Option<DateTime<Utc>>,
    pub limit: Option<usize>,
}

impl BackupFilter {
    /// Completed backups only.
    pub fn completed() -> Self {
        Self {
            status: Some(BackupStatus::Completed),
            ..Default::default()
        }
    }

    /// Whether `backup` passes the status and date filters.
    pub fn matches(&self, backup: &BackupMetadata) -> bool {
        self.status.is_none_or(|s| backup.status == s)
            && self.created_after.is_none_or(|after| backup.created_at > after)
    }
}

/// Restore request.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RestoreRequest {
    pub backup_id: String,
    pub overwrite: bool,
}

/// Backup storage collaborator.
#[async_trait]
pub trait BackupProvider: Send + Sync {
    /// List backups, newest first.
    async fn list_backups(&self, filter: &BackupFilter) -> Result<Vec<BackupMetadata>, RecoveryError>;

    /// Restore a backup.
    async fn restore_backup(&self, request: &RestoreRequest) -> Result<(), RecoveryError>;
}

/// In-memory backup provider for tests and local runs.
pub struct MemoryBackupProvider {
    backups: RwLock<HashMap<String, BackupMetadata>>,
    restores: RwLock<Vec<RestoreRequest>>,
}

impl MemoryBackupProvider {
    /// Create an empty provider.
    pub fn new() -> Self {
        Self {
            backups: RwLock::new(HashMap::new()),
            restores: RwLock::new(Vec::new()),
        }
    }

    /// Register a backup.
    pub async fn add(&self, backup: BackupMetadata) {
        self.backups.write().await.insert(backup.id.clone(), backup);
    }

    /// Restore requests received so far.
    pub async fn restores(&self) -> Vec<RestoreRequest> {
        self.restores.read().await.clone()
    }
}

impl Default for MemoryBackupProvider {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl BackupProvider for MemoryBackupProvider {
    async fn list_backups(&self, filter: &BackupFilter) -> Result<Vec<BackupMetadata>, RecoveryError> {
        let backups = self.backups.read().await;
        let mut listed: Vec<_> = backups.values().filter(|b| filter.matches(b)).cloned().collect();
        listed.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        if let Some(limit) = filter.limit {
            listed.truncate(limit);
        }
        Ok(listed)
    }

    async fn restore_backup(&self, request: &RestoreRequest) -> Result<(), RecoveryError> {
        let backups = self.backups.read().await;
        let backup = backups.get(&request.backup_id).ok_or_else(|| RecoveryError::NotFound {
            kind: "backup",
            id: request.backup_id.clone(),
        })?;
        if backup.status != BackupStatus::Completed {
            return Err(RecoveryError::Backup(format!(
                "backup {} is not completed",
                request.backup_id
            )));
        }
        drop(backups);

        info!("Restoring backup {} (overwrite: {})", request.backup_id, request.overwrite);
        self.restores.write().await.push(request.clone());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn backup(id: &str, minutes_ago: i64, status: BackupStatus) -> BackupMetadata {
        BackupMetadata {
            id: id.to_string(),
            created_at: Utc::now() - chrono::Duration::minutes(minutes_ago),
            status,
            size_bytes: 1024,
            label: None,
        }
    }

    #[tokio::test]
    async fn test_list_newest_first_with_filter() {
        let provider = MemoryBackupProvider::new();
        provider.add(backup("old", 60, BackupStatus::Completed)).await;
        provider.add(backup("new", 5, BackupStatus::Completed)).await;
        provider.add(backup("broken", 1, BackupStatus::Failed)).await;

        let all = provider.list_backups(&BackupFilter::default()).await.unwrap();
        assert_eq!(all.len(), 3);
        assert_eq!(all[0].id, "broken");

        let completed = provider.list_backups(&BackupFilter::completed()).await.unwrap();
        let ids: Vec<&str> = completed.iter().map(|b| b.id.as_str()).collect();
        assert_eq!(ids, vec!["new", "old"]);

        let limited = provider
            .list_backups(&BackupFilter {
                limit: Some(1),
                ..BackupFilter::completed()
            })
            .await
            .unwrap();
        assert_eq!(limited.len(), 1);
    }

    #[tokio::test]
    async fn test_restore() {
        let provider = MemoryBackupProvider::new();
        provider.add(backup("b-1", 5, BackupStatus::Completed)).await;
        provider.add(backup("b-2", 5, BackupStatus::InProgress)).await;

        let request = RestoreRequest {
            backup_id: "b-1".to_string(),
            overwrite: true,
        };
        provider.restore_backup(&request).await.unwrap();
        assert_eq!(provider.restores().await, vec![request]);

        let err = provider
            .restore_backup(&RestoreRequest {
                backup_id: "b-2".to_string(),
                overwrite: true,
            })
            .await
            .unwrap_err();
        assert!(matches!(err, RecoveryError::Backup(_)));

        let err = provider
            .restore_backup(&RestoreRequest {
                backup_id: "missing".to_string(),
                overwrite: true,
            })
            .await
            .unwrap_err();
        assert!(matches!(err, RecoveryError::NotFound { .. }));
    }
}
