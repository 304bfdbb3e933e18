use std::path::Path;

use crate::common::cli::StatusOpts;
use crate::runner::coordination_key;
use crate::store::file::FileStore;
use crate::store::{CoordinationStore, JobStatus, JobStore};

/// Prints the semaphore record, job counts per status and the tracked
/// instance metadata.
pub fn command_status(data_dir: &Path, opts: StatusOpts) -> anyhow::Result<()> {
    let store = FileStore::open(data_dir)?;

    let record = CoordinationStore::get(&store, &coordination_key(&opts.name))?;
    match record {
        Some(value) => println!("Semaphore: {value}"),
        None => println!("Semaphore: <not initialized>"),
    }

    for status in [JobStatus::ToStart, JobStatus::Running, JobStatus::Finished] {
        let count = store.jobs_with_status(status)?.len();
        println!("Jobs {status}: {count}");
    }

    let instances = store.all_instances()?;
    if instances.is_empty() {
        println!("No instances tracked");
    } else {
        println!("Instances:");
        for (id, meta) in instances {
            match &meta.job_id {
                Some(job_id) => println!("  {id}: {} (job {job_id})", meta.status),
                None => println!("  {id}: {}", meta.status),
            }
        }
    }
    Ok(())
}
