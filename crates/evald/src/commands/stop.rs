use std::path::Path;

use crate::common::cli::StopOpts;
use crate::runner::{SemaphoreRecord, coordination_key};
use crate::store::CoordinationStore;
use crate::store::file::FileStore;

/// Writes the stop sentinel; the active loop notices it on its next tick and
/// shuts down without handing over.
pub fn command_stop(data_dir: &Path, opts: StopOpts) -> anyhow::Result<()> {
    let store = FileStore::open(data_dir)?;
    let key = coordination_key(&opts.name);
    match store.get(&key)? {
        Some(record) => log::debug!("Replacing semaphore record {record:?}"),
        None => log::debug!("No semaphore record exists yet"),
    }
    store.set(&key, &SemaphoreRecord::Stopped.to_string())?;
    println!(
        "Requested stop of loop {}; the active runner will finish its current tick first",
        opts.name
    );
    Ok(())
}
