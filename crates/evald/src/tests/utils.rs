use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;
use std::time::Duration;

use derive_builder::Builder;
use tokio::task::{JoinHandle, LocalSet};

use crate::common::wrapped::WrappedRcRefCell;
use crate::fleet::{Fleet, FleetResult, OperationHandle, OperationStatus, PowerState, Resource};
use crate::store::{
    CoordinationStore, EvalSpec, InstanceMeta, InstanceStore, Job, JobStatus, JobStore,
    StoreResult,
};

pub async fn run_concurrent<
    R: 'static,
    Fut1: 'static + Future<Output = R>,
    Fut2: Future<Output = ()>,
>(
    background_fut: Fut1,
    fut: Fut2,
) -> (LocalSet, JoinHandle<R>) {
    let set = tokio::task::LocalSet::new();
    let handle = set.spawn_local(background_fut);
    set.run_until(fut).await;
    (set, handle)
}

/// Polls `condition` once per millisecond until it holds.
pub async fn wait_until(mut condition: impl FnMut() -> bool) {
    for _ in 0..5000 {
        if condition() {
            return;
        }
        tokio::time::sleep(Duration::from_millis(1)).await;
    }
    panic!("condition not reached within the wait budget");
}

#[derive(Default)]
struct MemoryStoreState {
    values: HashMap<String, String>,
    jobs: HashMap<String, Job>,
    instances: HashMap<String, InstanceMeta>,
}

/// In-memory counterpart of the file store.
#[derive(Clone, Default)]
pub struct MemoryStore {
    state: WrappedRcRefCell<MemoryStoreState>,
}

impl CoordinationStore for MemoryStore {
    fn get(&self, key: &str) -> StoreResult<Option<String>> {
        Ok(self.state.get().values.get(key).cloned())
    }

    fn set(&self, key: &str, value: &str) -> StoreResult<()> {
        self.state
            .get_mut()
            .values
            .insert(key.to_string(), value.to_string());
        Ok(())
    }

    fn compare_and_swap(
        &self,
        key: &str,
        expected: Option<&str>,
        new: &str,
    ) -> StoreResult<bool> {
        let mut state = self.state.get_mut();
        if state.values.get(key).map(|value| value.as_str()) != expected {
            return Ok(false);
        }
        state.values.insert(key.to_string(), new.to_string());
        Ok(true)
    }
}

impl JobStore for MemoryStore {
    fn admit(&self, job: &Job) -> StoreResult<bool> {
        let mut state = self.state.get_mut();
        if state.jobs.contains_key(&job.id) {
            return Ok(false);
        }
        state.jobs.insert(job.id.clone(), job.clone());
        Ok(true)
    }

    fn get(&self, id: &str) -> StoreResult<Option<Job>> {
        Ok(self.state.get().jobs.get(id).cloned())
    }

    fn set(&self, job: &Job) -> StoreResult<()> {
        self.state.get_mut().jobs.insert(job.id.clone(), job.clone());
        Ok(())
    }

    fn jobs_with_status(&self, status: JobStatus) -> StoreResult<Vec<Job>> {
        let mut jobs: Vec<Job> = self
            .state
            .get()
            .jobs
            .values()
            .filter(|job| job.status == status)
            .cloned()
            .collect();
        jobs.sort_by(|a, b| {
            a.created_at
                .cmp(&b.created_at)
                .then_with(|| a.id.cmp(&b.id))
        });
        Ok(jobs)
    }
}

impl InstanceStore for MemoryStore {
    fn get(&self, id: &str) -> StoreResult<Option<InstanceMeta>> {
        Ok(self.state.get().instances.get(id).cloned())
    }

    fn set(&self, id: &str, meta: &InstanceMeta) -> StoreResult<()> {
        self.state
            .get_mut()
            .instances
            .insert(id.to_string(), meta.clone());
        Ok(())
    }
}

pub fn resource(id: &str, name: &str, power_state: PowerState) -> Resource {
    Resource {
        id: id.to_string(),
        name: name.to_string(),
        power_state,
    }
}

pub struct FleetMock<ListFn, StartFn, CreateFn, PollFn, State> {
    list_fn: WrappedRcRefCell<ListFn>,
    start_fn: WrappedRcRefCell<StartFn>,
    create_fn: WrappedRcRefCell<CreateFn>,
    poll_fn: WrappedRcRefCell<PollFn>,
    state: WrappedRcRefCell<State>,
}

impl<
    State: 'static,
    ListFn: 'static + Fn(WrappedRcRefCell<State>, String) -> ListFut,
    ListFut: Future<Output = FleetResult<Vec<Resource>>>,
    StartFn: 'static + Fn(WrappedRcRefCell<State>, Resource) -> StartFut,
    StartFut: Future<Output = FleetResult<OperationHandle>>,
    CreateFn: 'static + Fn(WrappedRcRefCell<State>, String) -> CreateFut,
    CreateFut: Future<Output = FleetResult<OperationHandle>>,
    PollFn: 'static + Fn(WrappedRcRefCell<State>, OperationHandle) -> PollFut,
    PollFut: Future<Output = FleetResult<OperationStatus>>,
> FleetMock<ListFn, StartFn, CreateFn, PollFn, State>
{
    pub fn new(
        state: WrappedRcRefCell<State>,
        list_fn: ListFn,
        start_fn: StartFn,
        create_fn: CreateFn,
        poll_fn: PollFn,
    ) -> Box<dyn Fleet> {
        Box::new(Self {
            list_fn: WrappedRcRefCell::wrap(list_fn),
            start_fn: WrappedRcRefCell::wrap(start_fn),
            create_fn: WrappedRcRefCell::wrap(create_fn),
            poll_fn: WrappedRcRefCell::wrap(poll_fn),
            state,
        })
    }
}

impl<
    State: 'static,
    ListFn: 'static + Fn(WrappedRcRefCell<State>, String) -> ListFut,
    ListFut: Future<Output = FleetResult<Vec<Resource>>>,
    StartFn: 'static + Fn(WrappedRcRefCell<State>, Resource) -> StartFut,
    StartFut: Future<Output = FleetResult<OperationHandle>>,
    CreateFn: 'static + Fn(WrappedRcRefCell<State>, String) -> CreateFut,
    CreateFut: Future<Output = FleetResult<OperationHandle>>,
    PollFn: 'static + Fn(WrappedRcRefCell<State>, OperationHandle) -> PollFut,
    PollFut: Future<Output = FleetResult<OperationStatus>>,
> Fleet for FleetMock<ListFn, StartFn, CreateFn, PollFn, State>
{
    fn list(&self, label: &str) -> Pin<Box<dyn Future<Output = FleetResult<Vec<Resource>>>>> {
        let list_fn = self.list_fn.clone();
        let state = self.state.clone();
        let label = label.to_string();

        Box::pin(async move { (list_fn.get())(state, label).await })
    }

    fn start(
        &mut self,
        resource: &Resource,
    ) -> Pin<Box<dyn Future<Output = FleetResult<OperationHandle>>>> {
        let start_fn = self.start_fn.clone();
        let state = self.state.clone();
        let resource = resource.clone();

        Box::pin(async move { (start_fn.get())(state, resource).await })
    }

    fn create(
        &mut self,
        name: &str,
    ) -> Pin<Box<dyn Future<Output = FleetResult<OperationHandle>>>> {
        let create_fn = self.create_fn.clone();
        let state = self.state.clone();
        let name = name.to_string();

        Box::pin(async move { (create_fn.get())(state, name).await })
    }

    fn poll(
        &self,
        handle: &OperationHandle,
    ) -> Pin<Box<dyn Future<Output = FleetResult<OperationStatus>>>> {
        let poll_fn = self.poll_fn.clone();
        let state = self.state.clone();
        let handle = handle.clone();

        Box::pin(async move { (poll_fn.get())(state, handle).await })
    }
}

#[derive(Default)]
pub struct FleetState {
    pub resources: Vec<Resource>,
    pub started: Vec<String>,
    pub created: Vec<String>,
    pub poll_results: HashMap<String, OperationStatus>,
    operation_counter: u64,
}

impl FleetState {
    pub fn with_resources(resources: Vec<Resource>) -> WrappedRcRefCell<FleetState> {
        WrappedRcRefCell::wrap(FleetState {
            resources,
            ..Default::default()
        })
    }

    pub fn next_operation(&mut self) -> OperationHandle {
        self.operation_counter += 1;
        OperationHandle(format!("operation-{}", self.operation_counter))
    }
}

/// Fleet that records starts and creations in [`FleetState`] and answers
/// polls from `poll_results` (pending when a handle has no entry).
pub fn stateful_fleet(state: WrappedRcRefCell<FleetState>) -> Box<dyn Fleet> {
    FleetMock::new(
        state,
        move |state, _label| async move { Ok(state.get().resources.clone()) },
        move |state, resource| async move {
            let mut state = state.get_mut();
            state.started.push(resource.name);
            Ok(state.next_operation())
        },
        move |state, name| async move {
            let mut state = state.get_mut();
            state.created.push(name);
            Ok(state.next_operation())
        },
        move |state, handle| async move {
            let status = state
                .get()
                .poll_results
                .get(&handle.0)
                .cloned()
                .unwrap_or(OperationStatus::Pending);
            Ok(status)
        },
    )
}

// Job definitions
#[derive(Builder)]
#[builder(pattern = "owned", build_fn(name = "finish"))]
pub struct EvalJob {
    #[builder(default = "\"eval-1\".to_string()")]
    id: String,
    #[builder(default = "\"domain_randomization\".to_string()")]
    problem: String,
    #[builder(default = "7")]
    seed: u64,
    #[builder(default = "\"deepdriveio/deepdrive:bot_latest\".to_string()")]
    docker_tag: String,
    #[builder(default = "\"https://liaison.example.com/results\".to_string()")]
    results_callback: String,
    #[builder(default)]
    pull_request: Option<String>,
    #[builder(default = "JobStatus::ToStart")]
    status: JobStatus,
    #[builder(default)]
    instance_id: Option<String>,
}

impl EvalJobBuilder {
    pub fn build(self) -> Job {
        let EvalJob {
            id,
            problem,
            seed,
            docker_tag,
            results_callback,
            pull_request,
            status,
            instance_id,
        } = self.finish().unwrap();
        let mut job = Job::new(
            id,
            EvalSpec {
                problem,
                seed,
                docker_tag,
                results_callback,
                pull_request,
            },
        );
        job.status = status;
        job.instance_id = instance_id;
        job
    }
}
