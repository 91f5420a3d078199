//! In-memory generation job registry. Each request runs as an independent
//! task with its own cancellation flag; no state is shared between jobs.

use parking_lot::RwLock;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::error;
use tt_core::{CancelFlag, EngineError, Solver};
use types::{GenerateRequest, GenerateResponse};
use uuid::Uuid;

#[derive(Clone, Debug, serde::Serialize, serde::Deserialize, Eq, PartialEq, Hash)]
pub struct JobId(pub String);

#[derive(Clone, Debug, serde::Serialize, serde::Deserialize)]
#[serde(tag = "status")]
pub enum JobStatus {
    Queued,
    Running,
    Completed {
        response: GenerateResponse,
    },
    Infeasible {
        conflicts: Vec<String>,
        suggestions: Vec<String>,
    },
    Cancelled,
    Failed {
        message: String,
    },
}

struct JobEntry {
    status: JobStatus,
    cancel: CancelFlag,
}

#[derive(Clone)]
pub struct InMemJobs<S: Solver> {
    inner: Arc<RwLock<HashMap<JobId, JobEntry>>>,
    solver: Arc<S>,
}

impl<S: Solver> InMemJobs<S> {
    pub fn new(solver: S) -> Self {
        Self {
            inner: Default::default(),
            solver: Arc::new(solver),
        }
    }

    pub fn enqueue(&self, req: GenerateRequest) -> JobId {
        let id = JobId(Uuid::new_v4().to_string());
        let cancel = CancelFlag::new();
        self.inner.write().insert(
            id.clone(),
            JobEntry {
                status: JobStatus::Queued,
                cancel: cancel.clone(),
            },
        );

        let map = self.inner.clone();
        let solver = self.solver.clone();
        let id_for_task = id.clone();

        tokio::spawn(async move {
            if let Some(entry) = map.write().get_mut(&id_for_task) {
                entry.status = JobStatus::Running;
            }
            let status = match solver.solve_cancellable(req, cancel).await {
                Ok(response) => JobStatus::Completed { response },
                Err(e) => match e.downcast_ref::<EngineError>() {
                    Some(EngineError::InfeasibleConstraints {
                        conflicts,
                        suggestions,
                    }) => JobStatus::Infeasible {
                        conflicts: conflicts.clone(),
                        suggestions: suggestions.clone(),
                    },
                    Some(EngineError::Cancelled) => JobStatus::Cancelled,
                    _ => {
                        error!(?e, "job failed");
                        JobStatus::Failed {
                            message: e.to_string(),
                        }
                    }
                },
            };
            if let Some(entry) = map.write().get_mut(&id_for_task) {
                entry.status = status;
            }
        });

        id
    }

    pub fn get(&self, id: &JobId) -> Option<JobStatus> {
        self.inner.read().get(id).map(|e| e.status.clone())
    }

    /// Trip the job's cancellation flag. The running solver observes it at
    /// its next checkpoint; the final status becomes `Cancelled`.
    pub fn cancel(&self, id: &JobId) -> bool {
        match self.inner.read().get(id) {
            Some(entry) => {
                entry.cancel.cancel();
                true
            }
            None => false,
        }
    }
}
