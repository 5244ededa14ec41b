// =====================================================================================
// ACCESS AUDIT LOG
// =====================================================================================

use std::collections::VecDeque;

use tokio::sync::RwLock;
use tracing::{info, warn, instrument};

use crate::models::{AuditEntry, AuditOutcome};

/// Bounded, in-memory audit trail. Oldest entries are evicted first.
pub struct AccessAuditLog {
    capacity: usize,
    entries: RwLock<VecDeque<AuditEntry>>,
}

impl AccessAuditLog {
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity: capacity.max(1),
            entries: RwLock::new(VecDeque::with_capacity(capacity.max(1))),
        }
    }

    #[instrument(skip(self, entry), fields(event_id = %entry.event_id))]
    pub async fn record(&self, entry: AuditEntry) {
        match entry.outcome {
            AuditOutcome::Allowed => {
                info!(
                    actor_id = %entry.actor_id,
                    actor_role = %entry.actor_role,
                    operation = ?entry.operation,
                    entity_id = ?entry.entity_id,
                    "AUDIT: privileged {} allowed", entry.operation
                );
            }
            AuditOutcome::Denied => {
                warn!(
                    actor_id = %entry.actor_id,
                    actor_role = %entry.actor_role,
                    operation = ?entry.operation,
                    entity_id = ?entry.entity_id,
                    detail = ?entry.detail,
                    "AUDIT DENIED: {}", entry.operation
                );
            }
        }

        let mut entries = self.entries.write().await;
        if entries.len() == self.capacity {
            entries.pop_back();
        }
        entries.push_front(entry);
    }

    /// Most recent first.
    pub async fn recent(&self, limit: usize) -> Vec<AuditEntry> {
        self.entries.read().await.iter().take(limit).cloned().collect()
    }

    pub async fn denial_count(&self) -> usize {
        self.entries
            .read()
            .await
            .iter()
            .filter(|entry| entry.outcome == AuditOutcome::Denied)
            .count()
    }
}

impl Default for AccessAuditLog {
    fn default() -> Self {
        Self::new(1_000)
    }
}
