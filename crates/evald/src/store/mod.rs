pub mod file;
mod record;

pub use record::{EvalSpec, InstanceMeta, InstanceStatus, Job, JobId, JobStatus};

pub type StoreResult<T> = anyhow::Result<T>;

/// Shared mutable key-value slot used by exclusive runners for coordination.
///
/// Per-key operations are atomic; there is no ordering guarantee across keys
/// or across the observations of competing processes.
pub trait CoordinationStore {
    fn get(&self, key: &str) -> StoreResult<Option<String>>;

    fn set(&self, key: &str, value: &str) -> StoreResult<()>;

    /// Atomically replaces the value of `key` with `new` if it currently
    /// equals `expected` (`None` meaning the key must not exist).
    /// Returns true iff the swap occurred.
    fn compare_and_swap(&self, key: &str, expected: Option<&str>, new: &str)
    -> StoreResult<bool>;
}

/// Keyed record store of evaluation jobs.
pub trait JobStore {
    /// At-most-once admission: stores `job` only if its id is not yet taken.
    /// Returns true iff the record was stored.
    fn admit(&self, job: &Job) -> StoreResult<bool>;

    fn get(&self, id: &str) -> StoreResult<Option<Job>>;

    fn set(&self, job: &Job) -> StoreResult<()>;

    /// Jobs with the given status, oldest first.
    fn jobs_with_status(&self, status: JobStatus) -> StoreResult<Vec<Job>>;
}

/// Scheduler-tracked metadata of fleet instances.
pub trait InstanceStore {
    fn get(&self, id: &str) -> StoreResult<Option<InstanceMeta>>;

    fn set(&self, id: &str, meta: &InstanceMeta) -> StoreResult<()>;
}
