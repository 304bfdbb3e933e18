use std::path::Path;
use std::rc::Rc;

use tokio_util::sync::CancellationToken;

use crate::common::cli::{ArgDuration, RunOpts};
use crate::fleet::gcloud::{GcloudConfig, GcloudFleet};
use crate::runner::{ExclusiveRunner, coordination_key};
use crate::scheduler::{EvaluationScheduler, SchedulerParams};
use crate::store::file::FileStore;

/// Runs the controller loop until it yields exclusivity, is stopped or a
/// tick fails.
pub async fn command_run(data_dir: &Path, opts: RunOpts) -> anyhow::Result<()> {
    let RunOpts {
        name,
        label,
        project,
        zone,
        machine_type,
        image_family,
        instance_prefix,
        problems,
        tick_interval,
        acquire_timeout,
    } = opts;

    let store = Rc::new(FileStore::open(data_dir)?);
    let fleet = GcloudFleet::new(GcloudConfig {
        project,
        zone,
        machine_type,
        image_family,
        label: label.clone(),
    })?;
    let mut scheduler = EvaluationScheduler::new(
        store.clone(),
        store.clone(),
        Box::new(fleet),
        SchedulerParams {
            label,
            instance_prefix,
            supported_problems: problems,
        },
    );

    let cancel = CancellationToken::new();
    let signal_cancel = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            log::info!("Received SIGINT, attempting to stop");
            signal_cancel.cancel();
        }
    });

    let runner = ExclusiveRunner::new(
        store,
        coordination_key(&name),
        tick_interval.unpack(),
        acquire_timeout.map(ArgDuration::unpack),
        cancel,
    );
    log::info!("Controller loop {name} starting as runner {}", runner.id());
    runner.run(async || scheduler.tick().await).await?;
    Ok(())
}
