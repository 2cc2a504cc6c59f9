//! Hands a finished job's manifest to the display layer.
//!
//! The display collaborator is external to this crate: it reads the manifest
//! from the session store under one well-known key and re-renders when the
//! navigation signal fires. Absence of a stored manifest is a normal
//! "no results yet" state, not an error.

use crate::transport::Manifest;
use parking_lot::RwLock;
use std::collections::HashMap;
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::watch;
use tracing::{info, instrument};

/// Session store key under which the latest manifest lives
pub const MANIFEST_KEY: &str = "manifest";

/// Errors crossing the handoff boundary
#[derive(Error, Debug)]
pub enum HandoffError {
    #[error("failed to serialize manifest: {0}")]
    Serialize(#[source] serde_json::Error),

    #[error("stored manifest is corrupt: {0}")]
    Deserialize(#[source] serde_json::Error),
}

/// In-process key/value store scoped to the client session. Contents are
/// discarded with the session.
#[derive(Default)]
pub struct SessionStore {
    entries: RwLock<HashMap<String, String>>,
}

impl SessionStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set(&self, key: &str, value: String) {
        self.entries.write().insert(key.to_string(), value);
    }

    pub fn get(&self, key: &str) -> Option<String> {
        self.entries.read().get(key).cloned()
    }

    pub fn remove(&self, key: &str) {
        self.entries.write().remove(key);
    }
}

/// Write side and read contract for the finished-job manifest
pub struct ResultHandoff {
    store: Arc<SessionStore>,
    navigate_tx: watch::Sender<u64>,
}

impl ResultHandoff {
    pub fn new(store: Arc<SessionStore>) -> Self {
        let (navigate_tx, _) = watch::channel(0);
        Self { store, navigate_tx }
    }

    /// Persist a finished job's manifest, overwriting any previous value,
    /// then signal the display collaborator to navigate. Called exactly once
    /// per completed job.
    #[instrument(skip(self, manifest), fields(job_id = %manifest.job_id))]
    pub fn commit(&self, manifest: &Manifest) -> Result<(), HandoffError> {
        let serialized = serde_json::to_string(manifest).map_err(HandoffError::Serialize)?;
        self.store.set(MANIFEST_KEY, serialized);
        self.navigate_tx.send_modify(|generation| *generation += 1);

        info!("Result manifest committed");
        Ok(())
    }

    /// The display collaborator's read side. `None` means no job has
    /// finished yet.
    pub fn load(&self) -> Result<Option<Manifest>, HandoffError> {
        match self.store.get(MANIFEST_KEY) {
            None => Ok(None),
            Some(serialized) => serde_json::from_str(&serialized)
                .map(Some)
                .map_err(HandoffError::Deserialize),
        }
    }

    /// Navigation signal: the value increments once per committed manifest
    pub fn subscribe(&self) -> watch::Receiver<u64> {
        self.navigate_tx.subscribe()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::Artifact;
    use serde_json::json;

    fn manifest(job_id: &str, summary: &str) -> Manifest {
        let mut artifacts = HashMap::new();
        artifacts.insert(
            "metrics.csv".to_string(),
            Artifact {
                url: format!("https://cdn.example.com/{job_id}/metrics.csv"),
                extra: serde_json::Map::new(),
            },
        );
        Manifest {
            job_id: job_id.to_string(),
            summary: summary.to_string(),
            artifacts,
            extra: serde_json::Map::new(),
        }
    }

    #[test]
    fn test_load_before_any_commit_is_none() {
        let handoff = ResultHandoff::new(Arc::new(SessionStore::new()));
        assert!(handoff.load().unwrap().is_none());
    }

    #[test]
    fn test_commit_then_load_round_trips() {
        let handoff = ResultHandoff::new(Arc::new(SessionStore::new()));
        let committed = manifest("j-1", "Analysis complete");

        handoff.commit(&committed).unwrap();
        let loaded = handoff.load().unwrap().unwrap();
        assert_eq!(loaded, committed);
    }

    #[test]
    fn test_commit_overwrites_previous_manifest() {
        let handoff = ResultHandoff::new(Arc::new(SessionStore::new()));

        handoff.commit(&manifest("j-1", "first")).unwrap();
        handoff.commit(&manifest("j-2", "second")).unwrap();

        let loaded = handoff.load().unwrap().unwrap();
        assert_eq!(loaded.job_id, "j-2");
    }

    #[test]
    fn test_extra_fields_survive_the_round_trip() {
        let handoff = ResultHandoff::new(Arc::new(SessionStore::new()));

        let mut committed = manifest("j-3", "Analysis complete");
        committed
            .extra
            .insert("manifest_key".to_string(), json!("results/j-3/manifest.json"));

        handoff.commit(&committed).unwrap();
        let loaded = handoff.load().unwrap().unwrap();
        assert_eq!(loaded.extra["manifest_key"], json!("results/j-3/manifest.json"));
    }

    #[test]
    fn test_corrupt_stored_value_is_a_typed_error() {
        let store = Arc::new(SessionStore::new());
        store.set(MANIFEST_KEY, "not json".to_string());

        let handoff = ResultHandoff::new(store);
        assert!(matches!(
            handoff.load(),
            Err(HandoffError::Deserialize(_))
        ));
    }

    #[test]
    fn test_navigation_signal_fires_per_commit() {
        let handoff = ResultHandoff::new(Arc::new(SessionStore::new()));
        let mut navigations = handoff.subscribe();
        assert_eq!(*navigations.borrow_and_update(), 0);

        handoff.commit(&manifest("j-1", "first")).unwrap();
        assert!(navigations.has_changed().unwrap());
        assert_eq!(*navigations.borrow_and_update(), 1);

        handoff.commit(&manifest("j-2", "second")).unwrap();
        assert_eq!(*navigations.borrow_and_update(), 2);
    }
}
