pub mod process;

pub use process::{EvaluationScheduler, SchedulerParams};
