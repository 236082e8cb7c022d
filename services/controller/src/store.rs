//! Rule set storage.
//!
//! The declarative substrate that owns rule sets is abstracted behind
//! [`RuleSetStore`]. Status is always written as one whole replacement, so a
//! pass either persists its full status or nothing.

use std::collections::BTreeMap;
use std::path::Path;
use std::sync::RwLock;

use async_trait::async_trait;
use gamescale_reconcile::{ReconcileError, ReconcileState, RuleSet, RuleSetKey};
use thiserror::Error;
use tracing::info;

/// Rule set store errors.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("rule set {0} not found")]
    NotFound(RuleSetKey),

    #[error("failed to read manifest: {0}")]
    Io(#[from] std::io::Error),

    #[error("invalid manifest: {0}")]
    Manifest(#[from] serde_json::Error),

    #[error("duplicate rule set {0} in manifest")]
    Duplicate(RuleSetKey),
}

impl From<StoreError> for ReconcileError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::NotFound(key) => ReconcileError::NotFound(key.to_string()),
            other => ReconcileError::Store(other.to_string()),
        }
    }
}

/// Access to rule set resources.
#[async_trait]
pub trait RuleSetStore: Send + Sync {
    /// Fetch a rule set. `None` means it was deleted.
    async fn get(&self, key: &RuleSetKey) -> Result<Option<RuleSet>, StoreError>;

    /// Keys of all existing rule sets.
    async fn list(&self) -> Result<Vec<RuleSetKey>, StoreError>;

    /// Replace the status of a rule set.
    async fn update_status(&self, key: &RuleSetKey, status: ReconcileState)
        -> Result<(), StoreError>;
}

/// Rule sets held in memory, optionally seeded from a JSON manifest.
#[derive(Debug, Default)]
pub struct InMemoryRuleSetStore {
    rule_sets: RwLock<BTreeMap<RuleSetKey, RuleSet>>,
}

impl InMemoryRuleSetStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Load a manifest: a JSON array of rule sets.
    pub fn from_manifest(path: impl AsRef<Path>) -> Result<Self, StoreError> {
        let raw = std::fs::read_to_string(path.as_ref())?;
        let store = Self::from_json(&raw)?;
        info!(
            path = %path.as_ref().display(),
            rule_sets = store.read().len(),
            "Loaded rule set manifest"
        );
        Ok(store)
    }

    pub fn from_json(raw: &str) -> Result<Self, StoreError> {
        let rule_sets: Vec<RuleSet> = serde_json::from_str(raw)?;
        let store = Self::new();
        {
            let mut map = store.write();
            for rule_set in rule_sets {
                if map.contains_key(&rule_set.key) {
                    return Err(StoreError::Duplicate(rule_set.key));
                }
                map.insert(rule_set.key.clone(), rule_set);
            }
        }
        Ok(store)
    }

    /// Create or replace a rule set's spec. Existing status is kept.
    pub fn upsert(&self, mut rule_set: RuleSet) {
        let mut map = self.write();
        if let Some(existing) = map.get(&rule_set.key) {
            rule_set.status = existing.status.clone();
        }
        map.insert(rule_set.key.clone(), rule_set);
    }

    pub fn remove(&self, key: &RuleSetKey) -> Option<RuleSet> {
        self.write().remove(key)
    }

    /// Current status of a rule set, for inspection.
    pub fn status(&self, key: &RuleSetKey) -> Option<ReconcileState> {
        self.read().get(key).map(|r| r.status.clone())
    }

    fn read(&self) -> std::sync::RwLockReadGuard<'_, BTreeMap<RuleSetKey, RuleSet>> {
        self.rule_sets.read().unwrap_or_else(|e| e.into_inner())
    }

    fn write(&self) -> std::sync::RwLockWriteGuard<'_, BTreeMap<RuleSetKey, RuleSet>> {
        self.rule_sets.write().unwrap_or_else(|e| e.into_inner())
    }
}

#[async_trait]
impl RuleSetStore for InMemoryRuleSetStore {
    async fn get(&self, key: &RuleSetKey) -> Result<Option<RuleSet>, StoreError> {
        Ok(self.read().get(key).cloned())
    }

    async fn list(&self) -> Result<Vec<RuleSetKey>, StoreError> {
        Ok(self.read().keys().cloned().collect())
    }

    async fn update_status(
        &self,
        key: &RuleSetKey,
        status: ReconcileState,
    ) -> Result<(), StoreError> {
        let mut map = self.write();
        let rule_set = map
            .get_mut(key)
            .ok_or_else(|| StoreError::NotFound(key.clone()))?;
        rule_set.status = status;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    const MANIFEST: &str = r#"[
        {
            "metadata": {"namespace": "games", "name": "raid-rules"},
            "spec": {
                "eventEndpointURL": "http://events.local/api/events",
                "pollingInterval": "1m",
                "rules": []
            }
        },
        {
            "metadata": {"namespace": "games", "name": "pvp-rules"},
            "spec": {
                "eventEndpointURL": "http://events.local/api/events",
                "pollingInterval": "30s"
            }
        }
    ]"#;

    #[tokio::test]
    async fn test_manifest_round_trip() {
        let store = InMemoryRuleSetStore::from_json(MANIFEST).unwrap();
        let keys = store.list().await.unwrap();
        assert_eq!(keys.len(), 2);

        let key = RuleSetKey::new("games", "raid-rules");
        let status = ReconcileState {
            last_event_check_time: Some(Utc::now()),
            active_scales: vec![],
        };
        store.update_status(&key, status.clone()).await.unwrap();
        assert_eq!(store.get(&key).await.unwrap().unwrap().status, status);
    }

    #[tokio::test]
    async fn test_update_status_of_deleted_rule_set() {
        let store = InMemoryRuleSetStore::from_json(MANIFEST).unwrap();
        let key = RuleSetKey::new("games", "raid-rules");
        store.remove(&key);

        assert!(store.get(&key).await.unwrap().is_none());
        let err = store
            .update_status(&key, ReconcileState::default())
            .await
            .unwrap_err();
        assert!(matches!(err, StoreError::NotFound(_)));
    }

    #[tokio::test]
    async fn test_upsert_keeps_status() {
        let store = InMemoryRuleSetStore::from_json(MANIFEST).unwrap();
        let key = RuleSetKey::new("games", "raid-rules");
        let status = ReconcileState {
            last_event_check_time: Some(Utc::now()),
            active_scales: vec![],
        };
        store.update_status(&key, status.clone()).await.unwrap();

        let mut rule_set = store.get(&key).await.unwrap().unwrap();
        rule_set.spec.polling_interval = "5m".to_string();
        rule_set.status = ReconcileState::default();
        store.upsert(rule_set);

        let stored = store.get(&key).await.unwrap().unwrap();
        assert_eq!(stored.spec.polling_interval, "5m");
        assert_eq!(stored.status, status);
    }

    #[test]
    fn test_duplicate_manifest_entries() {
        let manifest = format!(
            "[{}, {}]",
            r#"{"metadata": {"namespace": "games", "name": "a"}, "spec": {"eventEndpointURL": "http://x", "pollingInterval": "1m"}}"#,
            r#"{"metadata": {"namespace": "games", "name": "a"}, "spec": {"eventEndpointURL": "http://y", "pollingInterval": "1m"}}"#,
        );
        let err = InMemoryRuleSetStore::from_json(&manifest).unwrap_err();
        assert!(matches!(err, StoreError::Duplicate(_)));
    }

    #[test]
    fn test_shipped_manifest_loads() {
        let store =
            InMemoryRuleSetStore::from_json(include_str!("../../../deploy/rules.json")).unwrap();
        let key = RuleSetKey::new("games", "event-rules");
        let rules = store.read().get(&key).map(|r| r.spec.rules.len());
        assert_eq!(rules, Some(2));
    }
}
