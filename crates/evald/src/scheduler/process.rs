use std::fmt;
use std::rc::Rc;

use crate::common::error::EvaldError;
use crate::fleet::{Fleet, OperationHandle, OperationStatus, PowerState, Resource};
use crate::store::{InstanceMeta, InstanceStatus, InstanceStore, Job, JobStatus, JobStore};

/// Static configuration of a scheduler deployment.
#[derive(Clone, Debug)]
pub struct SchedulerParams {
    /// Fleet label selecting the instances this scheduler may use.
    pub label: String,
    /// Name stem of the first instance created into an empty fleet.
    pub instance_prefix: String,
    /// Problems this deployment is able to evaluate.
    pub supported_problems: Vec<String>,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum OperationKind {
    /// Creation of a new instance.
    Insert,
    /// Boot of an existing terminated instance.
    Start,
}

impl fmt::Display for OperationKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            OperationKind::Insert => "insert",
            OperationKind::Start => "start",
        })
    }
}

/// Fleet operation issued earlier and not yet observed in a terminal state.
#[derive(Debug)]
struct TrackedOperation {
    handle: OperationHandle,
    kind: OperationKind,
    instance_name: String,
    job_id: Option<String>,
}

impl fmt::Display for TrackedOperation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} operation {} (instance {})",
            self.kind, self.handle, self.instance_name
        )?;
        if let Some(job_id) = &self.job_id {
            write!(f, " for job {job_id}")?;
        }
        Ok(())
    }
}

/// Matches pending evaluation jobs to fleet instances, one tick at a time.
///
/// Every tick triggers each pending job and then reconciles the fleet
/// operations issued earlier. A job goes to an already running free instance
/// when there is one; otherwise a free terminated instance is booted for it;
/// otherwise a new instance is created. Instance boots and creations are
/// asynchronous on the fleet side, so they are tracked as operations and
/// polled until they reach a terminal state.
pub struct EvaluationScheduler {
    jobs: Rc<dyn JobStore>,
    instances: Rc<dyn InstanceStore>,
    fleet: Box<dyn Fleet>,
    params: SchedulerParams,
    operations_in_progress: Vec<TrackedOperation>,
}

impl EvaluationScheduler {
    pub fn new(
        jobs: Rc<dyn JobStore>,
        instances: Rc<dyn InstanceStore>,
        fleet: Box<dyn Fleet>,
        params: SchedulerParams,
    ) -> Self {
        Self {
            jobs,
            instances,
            fleet,
            params,
            operations_in_progress: Vec::new(),
        }
    }

    /// Runs a single scheduling pass.
    pub async fn tick(&mut self) -> crate::Result<()> {
        let pending = self.jobs.jobs_with_status(JobStatus::ToStart)?;
        for job in pending {
            if let Some(instance_id) = &job.instance_id {
                log::debug!(
                    "Job {} is already assigned to instance {instance_id}, waiting for pickup",
                    job.id
                );
                continue;
            }
            self.trigger_job(job).await?;
        }
        self.reconcile_operations().await?;
        Ok(())
    }

    /// Finds an instance for `job`, booting or creating one when no running
    /// instance is free. At most one instance creation is in flight at a
    /// time; a job that would need another one stays pending until the next
    /// tick.
    async fn trigger_job(&mut self, mut job: Job) -> crate::Result<()> {
        let problem = &job.eval_spec.problem;
        if !self.params.supported_problems.contains(problem) {
            return Err(EvaldError::UnsupportedProblem(problem.clone()));
        }

        let resources = self.fleet.list(&self.params.label).await?;

        for resource in &resources {
            if resource.power_state != PowerState::Running
                || !self.instance_available(&resource.id)?
            {
                continue;
            }
            job.instance_id = Some(resource.id.clone());
            self.jobs.set(&job)?;
            self.instances
                .set(&resource.id, &InstanceMeta::used_by(job.id.clone()))?;
            log::info!("Assigned job {} to running instance {}", job.id, resource.name);
            return Ok(());
        }

        for resource in &resources {
            if resource.power_state != PowerState::Terminated
                || !self.instance_available(&resource.id)?
            {
                // A used terminated instance was claimed by an earlier job
                // and has not come up yet; do not double-book it.
                continue;
            }
            job.instance_id = Some(resource.id.clone());
            self.jobs.set(&job)?;
            self.instances
                .set(&resource.id, &InstanceMeta::used_by(job.id.clone()))?;
            let handle = self.fleet.start(resource).await?;
            log::info!(
                "Starting terminated instance {} for job {}",
                resource.name,
                job.id
            );
            self.operations_in_progress.push(TrackedOperation {
                handle,
                kind: OperationKind::Start,
                instance_name: resource.name.clone(),
                job_id: Some(job.id),
            });
            return Ok(());
        }

        if self
            .operations_in_progress
            .iter()
            .any(|operation| operation.kind == OperationKind::Insert)
        {
            log::debug!("An instance is already being created; deferring job {}", job.id);
            return Ok(());
        }
        let name = next_instance_name(&resources, &self.params.instance_prefix)?;
        let handle = self.fleet.create(&name).await?;
        log::info!("Creating instance {name} for job {}", job.id);
        self.operations_in_progress.push(TrackedOperation {
            handle,
            kind: OperationKind::Insert,
            instance_name: name,
            job_id: None,
        });
        // The job stays untouched; it is matched against the new instance
        // once that lists as running.
        Ok(())
    }

    /// Polls every tracked operation, dropping the ones that reached a
    /// terminal state. A poll transport error aborts the pass but keeps the
    /// unpolled operations for the next tick.
    async fn reconcile_operations(&mut self) -> crate::Result<()> {
        if self.operations_in_progress.is_empty() {
            return Ok(());
        }
        let operations = std::mem::take(&mut self.operations_in_progress);
        let mut iter = operations.into_iter();
        let mut remaining = Vec::new();
        while let Some(operation) = iter.next() {
            let status = match self.fleet.poll(&operation.handle).await {
                Ok(status) => status,
                Err(error) => {
                    remaining.push(operation);
                    remaining.extend(iter);
                    self.operations_in_progress = remaining;
                    return Err(error.into());
                }
            };
            match status {
                OperationStatus::Pending => remaining.push(operation),
                OperationStatus::Done { error: None } => {
                    log::info!("Finished {operation}");
                }
                OperationStatus::Done { error: Some(error) } => {
                    log::error!("Failed {operation}: {error}; it will not be retried");
                }
            }
        }
        self.operations_in_progress = remaining;
        Ok(())
    }

    /// An instance is free for scheduling when it has no metadata yet or its
    /// metadata says available.
    fn instance_available(&self, id: &str) -> crate::Result<bool> {
        Ok(match self.instances.get(id)? {
            Some(meta) => meta.status == InstanceStatus::Available,
            None => true,
        })
    }
}

/// Derives the name of the next instance: the stem of the highest-numbered
/// existing name with its suffix incremented, or `<prefix>-1` into an empty
/// fleet. Names without a numeric `-<n>` suffix are ignored; if no name has
/// one, the fleet naming is considered foreign and nothing is derived.
fn next_instance_name(resources: &[Resource], prefix: &str) -> crate::Result<String> {
    if resources.is_empty() {
        return Ok(format!("{prefix}-1"));
    }
    let mut best: Option<(u64, &str)> = None;
    for resource in resources {
        if let Some((stem, suffix)) = split_numeric_suffix(&resource.name) {
            if best.is_none_or(|(highest, _)| suffix > highest) {
                best = Some((suffix, stem));
            }
        }
    }
    match best {
        Some((suffix, stem)) => Ok(format!("{stem}-{}", suffix + 1)),
        None => {
            let names: Vec<&str> = resources
                .iter()
                .map(|resource| resource.name.as_str())
                .collect();
            Err(EvaldError::MalformedResourceNames(format!(
                "no numeric suffix in any of {names:?}"
            )))
        }
    }
}

fn split_numeric_suffix(name: &str) -> Option<(&str, u64)> {
    let (stem, suffix) = name.rsplit_once('-')?;
    if stem.is_empty() {
        return None;
    }
    let suffix = suffix.parse().ok()?;
    Some((stem, suffix))
}
