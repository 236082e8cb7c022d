//! Workload scaling.
//!
//! The [`WorkloadApi`] trait is the seam to whatever owns the workloads. The
//! [`WorkloadScaler`] layers idempotency and optimistic concurrency on top:
//! read the current count and version, skip if already there, patch with
//! the version as a precondition, and retry once on conflict.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use gamescale_reconcile::{ReconcileError, WorkloadRef};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, info, warn};

/// Conflicting writes are retried this many times before giving up.
const MAX_CONFLICT_RETRIES: u32 = 1;

/// Replica count and version token of a workload.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WorkloadState {
    pub replicas: u32,
    pub version: String,
}

/// Workload errors, scoped to a single target.
#[derive(Debug, Error)]
pub enum WorkloadError {
    #[error("workload {0} not found")]
    NotFound(WorkloadRef),

    #[error("workload {target} was modified concurrently (expected version {expected_version})")]
    Conflict {
        target: WorkloadRef,
        expected_version: String,
    },

    #[error("workload call for {target} timed out after {timeout:?}")]
    Timeout {
        target: WorkloadRef,
        timeout: Duration,
    },

    #[error("workload API error: {0}")]
    Transport(String),
}

impl From<WorkloadError> for ReconcileError {
    fn from(err: WorkloadError) -> Self {
        match err {
            WorkloadError::NotFound(target) => ReconcileError::NotFound(target.to_string()),
            WorkloadError::Conflict { target, .. } => ReconcileError::Conflict(target.to_string()),
            WorkloadError::Timeout { target, timeout } => ReconcileError::Timeout {
                resource: target.to_string(),
                elapsed: timeout,
            },
            WorkloadError::Transport(message) => ReconcileError::TransientIo(message),
        }
    }
}

/// Access to workload replica counts.
#[async_trait]
pub trait WorkloadApi: Send + Sync {
    /// Read the current replica count and version.
    async fn get(&self, target: &WorkloadRef) -> Result<WorkloadState, WorkloadError>;

    /// Set the replica count if the workload is still at `expected_version`.
    /// Only the replica count is changed.
    async fn patch_replicas(
        &self,
        target: &WorkloadRef,
        replicas: u32,
        expected_version: &str,
    ) -> Result<WorkloadState, WorkloadError>;
}

/// Result of a successful `set_replicas`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScaleOutcome {
    /// Nothing written; the workload already had this count.
    AlreadyAt(u32),
    Scaled { from: u32, to: u32 },
}

/// Idempotent, conflict-aware replica updates.
#[derive(Clone)]
pub struct WorkloadScaler {
    api: Arc<dyn WorkloadApi>,
    timeout: Duration,
}

impl WorkloadScaler {
    /// Create a scaler whose API calls are each bounded by `timeout`.
    pub fn new(api: Arc<dyn WorkloadApi>, timeout: Duration) -> Self {
        Self { api, timeout }
    }

    pub async fn current_replicas(&self, target: &WorkloadRef) -> Result<u32, WorkloadError> {
        Ok(self.read(target).await?.replicas)
    }

    /// Bring `target` to `replicas`.
    pub async fn set_replicas(
        &self,
        target: &WorkloadRef,
        replicas: u32,
    ) -> Result<ScaleOutcome, WorkloadError> {
        let mut state = self.read(target).await?;
        let mut retries = 0;

        loop {
            if state.replicas == replicas {
                debug!(target = %target, replicas, "Workload already at requested replicas");
                return Ok(ScaleOutcome::AlreadyAt(replicas));
            }

            let patch = self.api.patch_replicas(target, replicas, &state.version);
            match self.bounded(target, patch).await {
                Ok(_) => {
                    info!(target = %target, from = state.replicas, to = replicas, "Scaled workload");
                    return Ok(ScaleOutcome::Scaled {
                        from: state.replicas,
                        to: replicas,
                    });
                }
                Err(WorkloadError::Conflict { .. }) if retries < MAX_CONFLICT_RETRIES => {
                    retries += 1;
                    warn!(target = %target, "Workload changed underneath us, re-reading");
                    state = self.read(target).await?;
                }
                Err(e) => return Err(e),
            }
        }
    }

    async fn read(&self, target: &WorkloadRef) -> Result<WorkloadState, WorkloadError> {
        self.bounded(target, self.api.get(target)).await
    }

    async fn bounded<T>(
        &self,
        target: &WorkloadRef,
        call: impl std::future::Future<Output = Result<T, WorkloadError>>,
    ) -> Result<T, WorkloadError> {
        tokio::time::timeout(self.timeout, call)
            .await
            .map_err(|_| WorkloadError::Timeout {
                target: target.clone(),
                timeout: self.timeout,
            })?
    }
}

#[derive(Debug, Serialize)]
struct ReplicaPatch {
    replicas: u32,
}

/// Workload API over HTTP.
///
/// `GET {base}/v1/namespaces/{ns}/workloads/{name}` returns the workload
/// state; `PATCH` on the same path with a merge body and `If-Match` changes
/// the replica count.
pub struct HttpWorkloadApi {
    client: reqwest::Client,
    base_url: String,
}

impl HttpWorkloadApi {
    pub fn new(base_url: impl Into<String>, timeout: Duration) -> Result<Self, WorkloadError> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| WorkloadError::Transport(format!("failed to build HTTP client: {e}")))?;

        Ok(Self {
            client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
        })
    }

    fn url(&self, target: &WorkloadRef) -> String {
        format!(
            "{}/v1/namespaces/{}/workloads/{}",
            self.base_url, target.namespace, target.name
        )
    }

    /// Map error statuses; on success return the raw body, which may be empty.
    async fn body(
        target: &WorkloadRef,
        expected_version: Option<&str>,
        response: reqwest::Response,
    ) -> Result<Vec<u8>, WorkloadError> {
        let status = response.status();
        match status {
            reqwest::StatusCode::NOT_FOUND => Err(WorkloadError::NotFound(target.clone())),
            reqwest::StatusCode::CONFLICT | reqwest::StatusCode::PRECONDITION_FAILED => {
                Err(WorkloadError::Conflict {
                    target: target.clone(),
                    expected_version: expected_version.unwrap_or_default().to_string(),
                })
            }
            s if s.is_success() => response
                .bytes()
                .await
                .map(|body| body.to_vec())
                .map_err(|e| WorkloadError::Transport(e.to_string())),
            s => {
                let body = response.text().await.unwrap_or_default();
                Err(WorkloadError::Transport(format!(
                    "workload API returned {s} for {target}: {body}"
                )))
            }
        }
    }

    fn decode(body: &[u8]) -> Result<WorkloadState, WorkloadError> {
        serde_json::from_slice(body)
            .map_err(|e| WorkloadError::Transport(format!("invalid workload payload: {e}")))
    }
}

#[async_trait]
impl WorkloadApi for HttpWorkloadApi {
    async fn get(&self, target: &WorkloadRef) -> Result<WorkloadState, WorkloadError> {
        let response = self
            .client
            .get(self.url(target))
            .send()
            .await
            .map_err(|e| WorkloadError::Transport(e.to_string()))?;

        Self::decode(&Self::body(target, None, response).await?)
    }

    async fn patch_replicas(
        &self,
        target: &WorkloadRef,
        replicas: u32,
        expected_version: &str,
    ) -> Result<WorkloadState, WorkloadError> {
        let body = serde_json::to_vec(&ReplicaPatch { replicas })
            .map_err(|e| WorkloadError::Transport(e.to_string()))?;

        let response = self
            .client
            .patch(self.url(target))
            .header(reqwest::header::CONTENT_TYPE, "application/merge-patch+json")
            .header(reqwest::header::IF_MATCH, expected_version)
            .body(body)
            .send()
            .await
            .map_err(|e| WorkloadError::Transport(e.to_string()))?;

        let body = Self::body(target, Some(expected_version), response).await?;
        if body.is_empty() {
            // Write accepted without echoing the workload back.
            debug!(target = %target, "Empty patch response, re-reading workload");
            return self.get(target).await;
        }
        Self::decode(&body)
    }
}

#[derive(Debug, Clone, Copy)]
struct StoredWorkload {
    replicas: u32,
    version: u64,
}

impl StoredWorkload {
    fn state(&self) -> WorkloadState {
        WorkloadState {
            replicas: self.replicas,
            version: self.version.to_string(),
        }
    }
}

/// In-process workloads with version counters.
///
/// Used by the development mode and tests. `inject_conflicts` makes the next
/// patches lose a race against a simulated concurrent writer.
#[derive(Debug, Default)]
pub struct InMemoryWorkloads {
    workloads: Mutex<HashMap<WorkloadRef, StoredWorkload>>,
    pending_conflicts: AtomicU32,
    patch_count: AtomicU32,
}

impl InMemoryWorkloads {
    pub fn new() -> Self {
        Self::default()
    }

    /// Create or overwrite a workload, as another actor would.
    pub fn set(&self, target: WorkloadRef, replicas: u32) {
        let mut workloads = self.lock();
        let entry = workloads.entry(target).or_insert(StoredWorkload {
            replicas,
            version: 0,
        });
        entry.replicas = replicas;
        entry.version += 1;
    }

    pub fn remove(&self, target: &WorkloadRef) {
        self.lock().remove(target);
    }

    pub fn replicas(&self, target: &WorkloadRef) -> Option<u32> {
        self.lock().get(target).map(|w| w.replicas)
    }

    /// Make the next `count` patches fail with a conflict.
    pub fn inject_conflicts(&self, count: u32) {
        self.pending_conflicts.store(count, Ordering::SeqCst);
    }

    /// Number of patches that changed a workload.
    pub fn patch_count(&self) -> u32 {
        self.patch_count.load(Ordering::SeqCst)
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, HashMap<WorkloadRef, StoredWorkload>> {
        self.workloads.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn take_conflict(&self) -> bool {
        self.pending_conflicts
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok()
    }
}

#[async_trait]
impl WorkloadApi for InMemoryWorkloads {
    async fn get(&self, target: &WorkloadRef) -> Result<WorkloadState, WorkloadError> {
        self.lock()
            .get(target)
            .map(StoredWorkload::state)
            .ok_or_else(|| WorkloadError::NotFound(target.clone()))
    }

    async fn patch_replicas(
        &self,
        target: &WorkloadRef,
        replicas: u32,
        expected_version: &str,
    ) -> Result<WorkloadState, WorkloadError> {
        let simulate_race = self.take_conflict();
        let mut workloads = self.lock();
        let workload = workloads
            .get_mut(target)
            .ok_or_else(|| WorkloadError::NotFound(target.clone()))?;

        if simulate_race {
            workload.version += 1;
        }
        if workload.version.to_string() != expected_version {
            return Err(WorkloadError::Conflict {
                target: target.clone(),
                expected_version: expected_version.to_string(),
            });
        }

        workload.replicas = replicas;
        workload.version += 1;
        self.patch_count.fetch_add(1, Ordering::SeqCst);
        Ok(workload.state())
    }
}
