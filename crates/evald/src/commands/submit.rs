use std::path::Path;

use anyhow::bail;
use rand::Rng;
use rand::distr::Alphanumeric;

use crate::common::cli::SubmitOpts;
use crate::store::file::FileStore;
use crate::store::{EvalSpec, Job, JobStore};

fn generate_job_id() -> String {
    let suffix: String = rand::rng()
        .sample_iter(&Alphanumeric)
        .take(10)
        .map(char::from)
        .collect();
    format!("eval-{suffix}")
}

/// Admits a new evaluation job. Admission is at most once per id; a second
/// submission under the same id fails instead of overwriting the record.
pub fn command_submit(data_dir: &Path, opts: SubmitOpts) -> anyhow::Result<()> {
    let store = FileStore::open(data_dir)?;
    let id = opts.id.unwrap_or_else(generate_job_id);
    let job = Job::new(
        id.clone(),
        EvalSpec {
            problem: opts.problem,
            seed: opts.seed,
            docker_tag: opts.docker_tag,
            results_callback: opts.results_callback,
            pull_request: opts.pull_request,
        },
    );
    if !store.admit(&job)? {
        bail!("A job with id {id} was already submitted");
    }
    println!("Submitted job {id}");
    Ok(())
}
