pub mod process;
pub mod semaphore;

pub use process::{ExclusiveRunner, generate_runner_id};
pub use semaphore::SemaphoreRecord;

/// Key under which the semaphore record of the loop `name` is stored.
/// Redundant deployments contending for the same duty must agree on it.
pub fn coordination_key(name: &str) -> String {
    format!("{name}-semaphore")
}
