//! Execution backend for pipeline and canary constraints
//!
//! The backend runs pipelines and canary analyses; Keel only launches,
//! polls and cancels them.

use crate::error::TriggerError;
use async_trait::async_trait;
use dashmap::{DashMap, DashSet};
use keel_types::ExecutionStatus;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::{BTreeMap, VecDeque};
use std::sync::atomic::{AtomicU64, Ordering};
use tokio::sync::Mutex;

/// What an execution runs
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ExecutionKind {
    Pipeline,
    Canary,
}

/// Launch request for one execution
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TriggerRequest {
    pub kind: ExecutionKind,
    /// Pipeline id or canary config id
    pub target_id: String,
    pub application: String,
    pub service_account: String,
    pub correlation_id: String,
    #[serde(default)]
    pub parameters: BTreeMap<String, Value>,
}

/// Polled state of an execution
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ExecutionSummary {
    pub status: ExecutionStatus,
    /// Canary score, 0..=100
    pub score: Option<f64>,
}

/// Launches, polls and cancels executions
#[async_trait]
pub trait ExecutionTrigger: Send + Sync {
    /// Launch an execution and return its id
    async fn trigger(&self, request: TriggerRequest) -> Result<String, TriggerError>;

    /// Current state of an execution
    async fn status(&self, execution_id: &str) -> Result<ExecutionSummary, TriggerError>;

    /// Cancel a running execution
    async fn cancel(&self, execution_id: &str) -> Result<(), TriggerError>;
}

/// Scriptable in-memory execution backend
///
/// Every launched execution starts RUNNING until a test moves it on.
pub struct InMemoryExecutionTrigger {
    executions: DashMap<String, ExecutionSummary>,
    requests: DashMap<String, TriggerRequest>,
    cancelled: DashSet<String>,
    failures: Mutex<VecDeque<TriggerError>>,
    sequence: AtomicU64,
}

impl InMemoryExecutionTrigger {
    pub fn new() -> Self {
        Self {
            executions: DashMap::new(),
            requests: DashMap::new(),
            cancelled: DashSet::new(),
            failures: Mutex::new(VecDeque::new()),
            sequence: AtomicU64::new(0),
        }
    }

    /// Make the next launch fail with `error`
    pub async fn fail_next_trigger(&self, error: TriggerError) {
        self.failures.lock().await.push_back(error);
    }

    pub fn set_status(&self, execution_id: &str, status: ExecutionStatus, score: Option<f64>) {
        self.executions
            .insert(execution_id.to_string(), ExecutionSummary { status, score });
    }

    /// Launched requests keyed by execution id
    pub fn requests(&self) -> Vec<(String, TriggerRequest)> {
        let mut requests: Vec<(String, TriggerRequest)> = self
            .requests
            .iter()
            .map(|r| (r.key().clone(), r.value().clone()))
            .collect();
        requests.sort_by(|a, b| a.0.cmp(&b.0));
        requests
    }

    pub fn launched(&self) -> usize {
        self.requests.len()
    }

    pub fn is_cancelled(&self, execution_id: &str) -> bool {
        self.cancelled.contains(execution_id)
    }
}

impl Default for InMemoryExecutionTrigger {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl ExecutionTrigger for InMemoryExecutionTrigger {
    async fn trigger(&self, request: TriggerRequest) -> Result<String, TriggerError> {
        if let Some(error) = self.failures.lock().await.pop_front() {
            return Err(error);
        }

        let sequence = self.sequence.fetch_add(1, Ordering::SeqCst) + 1;
        let execution_id = format!("exec-{:04}", sequence);
        self.set_status(&execution_id, ExecutionStatus::Running, None);
        self.requests.insert(execution_id.clone(), request);
        Ok(execution_id)
    }

    async fn status(&self, execution_id: &str) -> Result<ExecutionSummary, TriggerError> {
        self.executions
            .get(execution_id)
            .map(|e| *e)
            .ok_or_else(|| TriggerError::Permanent(format!("Unknown execution {}", execution_id)))
    }

    async fn cancel(&self, execution_id: &str) -> Result<(), TriggerError> {
        if let Some(mut execution) = self.executions.get_mut(execution_id) {
            if !execution.status.is_complete() {
                execution.status = ExecutionStatus::Canceled;
            }
        }
        self.cancelled.insert(execution_id.to_string());
        Ok(())
    }
}
