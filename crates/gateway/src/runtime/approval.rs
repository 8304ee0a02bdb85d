//! Human-in-the-loop approvals.
//!
//! A gated action persists a pending [`ApprovalRequest`] and parks the
//! conversation in `awaiting_approval`. Transitions are monotonic:
//! pending resolves to approved or denied exactly once; resolved records
//! never change again.

use std::collections::HashSet;

use parking_lot::Mutex;
use uuid::Uuid;

use orch_domain::convo::{ApprovalRequest, ApprovalStatus};
use orch_domain::{Error, Result};
use orch_statestore::{keys, StateStore};

pub struct ApprovalGate {
    store: std::sync::Arc<StateStore>,
    /// Pending ids, for dashboard listing without scanning the keyspace.
    pending: Mutex<HashSet<Uuid>>,
}

impl ApprovalGate {
    pub fn new(store: std::sync::Arc<StateStore>) -> Self {
        Self { store, pending: Mutex::new(HashSet::new()) }
    }

    /// Persist a new pending request.
    pub async fn create(
        &self,
        conversation_id: Uuid,
        user_id: &str,
        action: &str,
    ) -> Result<ApprovalRequest> {
        let request = ApprovalRequest::pending(conversation_id, user_id, action);
        self.persist(&request).await?;
        self.pending.lock().insert(request.id);
        Ok(request)
    }

    pub async fn get(&self, id: Uuid) -> Result<Option<ApprovalRequest>> {
        let raw = self.store.get_raw(&keys::approval(id)).await?;
        Ok(match raw {
            Some(json) => Some(serde_json::from_str(&json)?),
            None => None,
        })
    }

    /// Resolve a pending request. Re-resolving is a conflict.
    pub async fn resolve(&self, id: Uuid, approve: bool) -> Result<ApprovalRequest> {
        let mut request = self
            .get(id)
            .await?
            .ok_or_else(|| Error::InvalidInput(format!("approval {id} not found")))?;

        let next = if approve { ApprovalStatus::Approved } else { ApprovalStatus::Denied };
        if !request.status.can_transition_to(next) {
            return Err(Error::Conflict(format!(
                "approval {id} already resolved as {:?}",
                request.status
            )));
        }
        request.status = next;
        request.updated_at = chrono::Utc::now();
        self.persist(&request).await?;
        self.pending.lock().remove(&id);
        Ok(request)
    }

    pub fn list_pending(&self) -> Vec<Uuid> {
        let mut ids: Vec<Uuid> = self.pending.lock().iter().copied().collect();
        ids.sort();
        ids
    }

    async fn persist(&self, request: &ApprovalRequest) -> Result<()> {
        let ttl = self.store.ttls().conversation;
        self.store
            .set_with_ttl(&keys::approval(request.id), &serde_json::to_string(request)?, ttl)
            .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use orch_statestore::{MemoryBackend, StoreTtls};
    use std::sync::Arc;

    fn gate() -> ApprovalGate {
        let store = Arc::new(StateStore::new(Arc::new(MemoryBackend::new()), StoreTtls::default()));
        ApprovalGate::new(store)
    }

    #[tokio::test]
    async fn create_persists_pending() {
        let gate = gate();
        let conv = Uuid::new_v4();
        let request = gate.create(conv, "u1", "wire $50k").await.unwrap();

        let fetched = gate.get(request.id).await.unwrap().unwrap();
        assert_eq!(fetched.status, ApprovalStatus::Pending);
        assert_eq!(fetched.conversation_id, conv);
        assert_eq!(fetched.action, "wire $50k");
        assert_eq!(gate.list_pending(), vec![request.id]);
    }

    #[tokio::test]
    async fn approve_is_terminal() {
        let gate = gate();
        let request = gate.create(Uuid::new_v4(), "u1", "act").await.unwrap();

        let resolved = gate.resolve(request.id, true).await.unwrap();
        assert_eq!(resolved.status, ApprovalStatus::Approved);
        assert!(gate.list_pending().is_empty());

        // Second resolution conflicts, either direction.
        assert_eq!(gate.resolve(request.id, true).await.unwrap_err().kind(), "conflict");
        assert_eq!(gate.resolve(request.id, false).await.unwrap_err().kind(), "conflict");
    }

    #[tokio::test]
    async fn deny_is_terminal() {
        let gate = gate();
        let request = gate.create(Uuid::new_v4(), "u1", "act").await.unwrap();
        let resolved = gate.resolve(request.id, false).await.unwrap();
        assert_eq!(resolved.status, ApprovalStatus::Denied);
        assert!(resolved.updated_at >= resolved.created_at);
    }

    #[tokio::test]
    async fn resolving_unknown_id_is_invalid_input() {
        let gate = gate();
        let err = gate.resolve(Uuid::new_v4(), true).await.unwrap_err();
        assert_eq!(err.kind(), "invalid_input");
    }
}
