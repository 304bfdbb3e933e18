use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use clap::Parser;

/// Duration argument parsed with humantime (`1s`, `5m`, `2h30m`, ...).
#[derive(Clone)]
pub struct ArgDuration(Duration);

impl FromStr for ArgDuration {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(Self(humantime::parse_duration(s)?))
    }
}

impl ArgDuration {
    pub fn unpack(self) -> Duration {
        self.0
    }
}

// Common CLI options
#[derive(Parser)]
pub struct CommonOpts {
    /// The path where job, instance and coordination records are stored
    #[arg(
        long,
        value_hint = clap::ValueHint::DirPath,
        global = true,
        env = "EVALD_DATA_DIR",
        help_heading("GLOBAL OPTIONS"),
        hide_short_help(true)
    )]
    pub data_dir: Option<PathBuf>,

    /// Enables more detailed log output
    #[arg(
        long,
        env = "EVALD_DEBUG",
        global = true,
        help_heading("GLOBAL OPTIONS"),
        hide_short_help(true)
    )]
    pub debug: bool,
}

// Root CLI options
#[derive(Parser)]
#[command(
    about,
    version(crate::EVALD_VERSION),
    disable_help_subcommand(true),
    help_expected(true)
)]
pub struct RootOptions {
    #[clap(flatten)]
    pub common: CommonOpts,

    #[clap(subcommand)]
    pub subcmd: SubCommand,
}

#[derive(Parser)]
pub enum SubCommand {
    /// Run the controller loop (waits for exclusivity first)
    Run(RunOpts),
    /// Admit a new evaluation job
    Submit(SubmitOpts),
    /// Ask the active controller loop to shut down
    Stop(StopOpts),
    /// Show the semaphore record, job counts and instance metadata
    Status(StatusOpts),
}

#[derive(Parser)]
pub struct RunOpts {
    /// Logical name of the controller loop. The coordination key is derived
    /// from it, so redundant deployments must share the same name.
    #[arg(long, default_value = "eval-loop")]
    pub name: String,

    /// Label carried by the fleet instances managed by this loop
    #[arg(long, default_value = "deepdrive-eval")]
    pub label: String,

    /// Google Cloud project that owns the fleet
    #[arg(long, env = "EVALD_GCP_PROJECT")]
    pub project: String,

    /// Google Cloud zone of the fleet
    #[arg(long, env = "EVALD_GCP_ZONE", default_value = "us-west1-b")]
    pub zone: String,

    /// Machine type used when creating new instances
    #[arg(long, default_value = "n1-standard-8")]
    pub machine_type: String,

    /// Image family used when creating new instances
    #[arg(long, default_value = "deepdrive-eval")]
    pub image_family: String,

    /// Name stem of created instances when the fleet is empty
    #[arg(long, default_value = "deepdrive-eval")]
    pub instance_prefix: String,

    /// Problem identifiers this deployment is able to evaluate
    #[arg(long, value_delimiter(','), default_value = "domain_randomization")]
    pub problems: Vec<String>,

    /// Delay between two controller ticks
    #[arg(long, default_value = "1s")]
    pub tick_interval: ArgDuration,

    /// Give up when exclusivity cannot be obtained within this duration
    #[arg(long)]
    pub acquire_timeout: Option<ArgDuration>,
}

#[derive(Parser)]
pub struct SubmitOpts {
    /// Identifier of the job. A random one is generated when omitted.
    #[arg(long)]
    pub id: Option<String>,

    /// Problem identifier to evaluate
    #[arg(long)]
    pub problem: String,

    /// Seed forwarded to the evaluation
    #[arg(long, default_value_t = 0)]
    pub seed: u64,

    /// Container image tag of the bot under evaluation
    #[arg(long)]
    pub docker_tag: String,

    /// Endpoint notified once the evaluation finishes
    #[arg(long)]
    pub results_callback: String,

    /// Pull-request context of the evaluated change, if any
    #[arg(long)]
    pub pull_request: Option<String>,
}

#[derive(Parser)]
pub struct StopOpts {
    /// Logical name of the controller loop to stop
    #[arg(long, default_value = "eval-loop")]
    pub name: String,
}

#[derive(Parser)]
pub struct StatusOpts {
    /// Logical name of the controller loop
    #[arg(long, default_value = "eval-loop")]
    pub name: String,
}
