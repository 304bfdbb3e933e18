use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

pub type JobId = String;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    ToStart,
    Running,
    Finished,
}

impl fmt::Display for JobStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            JobStatus::ToStart => "to_start",
            JobStatus::Running => "running",
            JobStatus::Finished => "finished",
        })
    }
}

/// What to evaluate and where to report the outcome.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct EvalSpec {
    pub problem: String,
    pub seed: u64,
    pub docker_tag: String,
    pub results_callback: String,
    pub pull_request: Option<String>,
}

/// One evaluation request, stored under its id.
///
/// Created through [`JobStore::admit`](crate::store::JobStore::admit); the
/// scheduler fills in `instance_id`, the worker running on that instance
/// moves `status` to its terminal value.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Job {
    pub id: JobId,
    pub status: JobStatus,
    pub eval_spec: EvalSpec,
    pub instance_id: Option<String>,
    pub created_at: DateTime<Utc>,
}

impl Job {
    pub fn new(id: JobId, eval_spec: EvalSpec) -> Self {
        Self {
            id,
            status: JobStatus::ToStart,
            eval_spec,
            instance_id: None,
            created_at: Utc::now(),
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InstanceStatus {
    Available,
    Used,
}

impl fmt::Display for InstanceStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            InstanceStatus::Available => "available",
            InstanceStatus::Used => "used",
        })
    }
}

/// Scheduler view of a fleet instance, distinct from its fleet power state.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct InstanceMeta {
    pub status: InstanceStatus,
    /// Job currently claiming the instance.
    pub job_id: Option<JobId>,
}

impl InstanceMeta {
    pub fn available() -> Self {
        Self {
            status: InstanceStatus::Available,
            job_id: None,
        }
    }

    pub fn used_by(job_id: JobId) -> Self {
        Self {
            status: InstanceStatus::Used,
            job_id: Some(job_id),
        }
    }
}
