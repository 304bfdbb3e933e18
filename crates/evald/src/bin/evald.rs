use clap::Parser;

use evald::commands::run::command_run;
use evald::commands::status::command_status;
use evald::commands::stop::command_stop;
use evald::commands::submit::command_submit;
use evald::common::cli::{RootOptions, SubCommand};
use evald::common::setup::setup_logging;
use evald::store::file::default_data_dir;

#[tokio::main(flavor = "current_thread")]
async fn main() -> evald::Result<()> {
    let top_opts = RootOptions::parse();

    setup_logging(top_opts.common.debug);

    let data_dir = top_opts.common.data_dir.unwrap_or_else(default_data_dir);

    let result = match top_opts.subcmd {
        SubCommand::Run(opts) => command_run(&data_dir, opts).await,
        SubCommand::Submit(opts) => command_submit(&data_dir, opts),
        SubCommand::Stop(opts) => command_stop(&data_dir, opts),
        SubCommand::Status(opts) => command_status(&data_dir, opts),
    };

    if let Err(error) = result {
        log::error!("{error:?}");
        std::process::exit(1);
    }

    Ok(())
}
