pub mod gcloud;

use std::fmt;
use std::future::Future;
use std::pin::Pin;

pub type FleetResult<T> = anyhow::Result<T>;

/// Power state of a fleet resource, as reported by the fleet itself.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum PowerState {
    Running,
    Terminated,
    /// Transient states (staging, stopping, ...) take no part in scheduling.
    Other,
}

/// One reusable compute unit carrying the evaluation label.
#[derive(Clone, Debug)]
pub struct Resource {
    pub id: String,
    pub name: String,
    pub power_state: PowerState,
}

/// Handle of an asynchronous fleet action, opaque outside the backend.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct OperationHandle(pub String);

impl fmt::Display for OperationHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum OperationStatus {
    Pending,
    Done { error: Option<String> },
}

/// Compute fleet driver.
///
/// `start` and `create` only launch the underlying action; completion is
/// observed by polling the returned handle until it reports a terminal
/// status.
pub trait Fleet {
    /// Resources carrying the given label, in any power state.
    fn list(&self, label: &str) -> Pin<Box<dyn Future<Output = FleetResult<Vec<Resource>>>>>;

    fn start(
        &mut self,
        resource: &Resource,
    ) -> Pin<Box<dyn Future<Output = FleetResult<OperationHandle>>>>;

    fn create(
        &mut self,
        name: &str,
    ) -> Pin<Box<dyn Future<Output = FleetResult<OperationHandle>>>>;

    fn poll(
        &self,
        handle: &OperationHandle,
    ) -> Pin<Box<dyn Future<Output = FleetResult<OperationStatus>>>>;
}
