use std::rc::Rc;
use std::time::Duration;

use rand::Rng;
use rand::distr::Alphanumeric;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

use crate::common::error::EvaldError;
use crate::runner::semaphore::{RunnerId, SemaphoreRecord};
use crate::store::CoordinationStore;

/// Generates the identity under which a runner process competes for
/// exclusivity. A fresh one is drawn on every process start.
pub fn generate_runner_id() -> RunnerId {
    rand::rng()
        .sample_iter(&Alphanumeric)
        .take(10)
        .map(char::from)
        .collect()
}

/// Runs a controller loop under a cluster-wide exclusivity semaphore.
///
/// At most one runner per coordination key executes ticks at a time. The
/// semaphore is a single [`SemaphoreRecord`] in the coordination store and
/// every ownership transition goes through compare-and-swap, so two runners
/// racing for the same key cannot both win. A runner that loses exclusivity
/// stops itself rather than risking two concurrent active loops.
pub struct ExclusiveRunner {
    store: Rc<dyn CoordinationStore>,
    key: String,
    id: RunnerId,
    tick_interval: Duration,
    acquire_timeout: Option<Duration>,
    cancel: CancellationToken,
}

impl ExclusiveRunner {
    pub fn new(
        store: Rc<dyn CoordinationStore>,
        key: String,
        tick_interval: Duration,
        acquire_timeout: Option<Duration>,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            store,
            key,
            id: generate_runner_id(),
            tick_interval,
            acquire_timeout,
            cancel,
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    /// Acquires exclusivity, then invokes `tick` once per tick interval until
    /// another runner requests a handover, the record is set to `stopped`,
    /// the runner is cancelled or a tick fails.
    ///
    /// Cancellation drains at most one in-flight tick and releases the
    /// semaphore. A failing tick propagates its error after a best-effort
    /// release.
    pub async fn run(
        &self,
        mut tick: impl AsyncFnMut() -> crate::Result<()>,
    ) -> crate::Result<()> {
        if !self.acquire().await? {
            return Ok(());
        }
        log::info!("Obtained exclusivity under key {}", self.key);
        loop {
            if self.cancel.is_cancelled() {
                log::info!("Termination requested, releasing exclusivity");
                self.release()?;
                return Ok(());
            }
            if !self.confirm_exclusivity()? {
                return Ok(());
            }
            if let Err(error) = tick().await {
                if let Err(release_error) = self.release() {
                    log::warn!("Could not release exclusivity: {release_error:?}");
                }
                return Err(error);
            }
            self.wait_tick().await;
        }
    }

    /// Waits until this runner owns the semaphore.
    ///
    /// The protocol over the single record:
    /// * `stopped` (or a missing record) means the slot is free and is taken
    ///   directly with a CAS;
    /// * any other record is displaced by `requested(self)`; the active loop
    ///   notices the request on its next tick and rewrites it to
    ///   `granted(self)`, which this runner promotes to `running(self)`;
    /// * a later requester may displace our request the same way (the last
    ///   requester wins); we re-request once the winner establishes
    ///   `running`;
    /// * `stopped` observed while our request is pending means the active
    ///   loop exited without granting, and the slot is taken directly.
    ///
    /// Returns false when cancelled before exclusivity was obtained. A
    /// configured acquire timeout turns into [`EvaldError::AcquireTimeout`];
    /// both outcomes withdraw the pending request first. The timeout is
    /// checked only between attempts, so a zero timeout degrades to a
    /// single try.
    async fn acquire(&self) -> crate::Result<bool> {
        let deadline = self
            .acquire_timeout
            .map(|timeout| (Instant::now() + timeout, timeout));
        // Wire value our pending request overwrote; restored if we give up.
        let mut displaced: Option<String> = None;
        let mut waiting_logged = false;
        let mut first_attempt = true;
        loop {
            if self.cancel.is_cancelled() {
                log::info!("Cancelled while waiting for exclusivity");
                self.withdraw_request(displaced.as_deref())?;
                return Ok(false);
            }
            if !first_attempt {
                if let Some((deadline, timeout)) = deadline {
                    if Instant::now() >= deadline {
                        self.withdraw_request(displaced.as_deref())?;
                        return Err(EvaldError::AcquireTimeout(timeout));
                    }
                }
            }
            first_attempt = false;

            let observed = self.store.get(&self.key)?;
            let parsed = observed.as_deref().map(SemaphoreRecord::parse);
            match parsed {
                // The slot is free, or the previous loop stopped without
                // granting our pending request.
                None | Some(Some(SemaphoreRecord::Stopped)) => {
                    let recovering = displaced.is_some();
                    if self.swap_to_running(observed.as_deref())? {
                        if recovering {
                            log::warn!(
                                "The previous loop stopped without granting; taking over"
                            );
                        }
                        return Ok(true);
                    }
                }
                Some(Some(SemaphoreRecord::Granted(id))) if id == self.id => {
                    if self.swap_to_running(observed.as_deref())? {
                        log::info!("Handover received, taking over the controller duty");
                        return Ok(true);
                    }
                }
                Some(Some(SemaphoreRecord::Requested(id))) if id == self.id => {
                    if !waiting_logged {
                        log::info!("Another loop holds {}; waiting for a handover", self.key);
                        waiting_logged = true;
                    }
                    self.wait_tick().await;
                }
                // A handover to another runner is in flight. Writing now
                // could strand the grantee, so wait until it runs.
                Some(Some(SemaphoreRecord::Granted(_))) => {
                    self.wait_tick().await;
                }
                // running(other), requested(other) or an unrecognized value:
                // displace it with our own request.
                Some(record) => {
                    if record.is_none() {
                        if let Some(value) = observed.as_deref() {
                            log::warn!("Displacing an unrecognized semaphore value {value:?}");
                        }
                    }
                    let requested = SemaphoreRecord::Requested(self.id.clone()).to_string();
                    if self
                        .store
                        .compare_and_swap(&self.key, observed.as_deref(), &requested)?
                    {
                        log::debug!("Requested a handover, displacing {observed:?}");
                        displaced = observed;
                    }
                }
            }
        }
    }

    /// Checks that the record still names this runner. If it does not, the
    /// runner yields: a pending request is granted, an external `stopped` is
    /// honoured without further writes and anything else stops the runner
    /// defensively. Returns false when the runner must stop.
    fn confirm_exclusivity(&self) -> crate::Result<bool> {
        loop {
            let observed = self.store.get(&self.key)?;
            let parsed = observed.as_deref().map(SemaphoreRecord::parse);
            match parsed {
                Some(Some(SemaphoreRecord::Running(id))) if id == self.id => return Ok(true),
                Some(Some(SemaphoreRecord::Requested(id))) => {
                    let granted = SemaphoreRecord::Granted(id.clone()).to_string();
                    if self
                        .store
                        .compare_and_swap(&self.key, observed.as_deref(), &granted)?
                    {
                        log::info!("Handing the controller duty over to runner {id}");
                        return Ok(false);
                    }
                    // The record changed under us; look again.
                }
                Some(Some(SemaphoreRecord::Stopped)) => {
                    log::info!("Stop requested through the coordination store");
                    return Ok(false);
                }
                None => {
                    log::warn!("The semaphore record disappeared; stopping defensively");
                    return Ok(false);
                }
                _ => {
                    log::warn!("Unexpected semaphore record {observed:?}; stopping defensively");
                    return Ok(false);
                }
            }
        }
    }

    /// Gives exclusivity up voluntarily. A pending request is granted instead
    /// of writing `stopped`, so a waiting runner takes over without another
    /// round-trip. A record this runner does not own is left alone.
    fn release(&self) -> crate::Result<()> {
        loop {
            let observed = self.store.get(&self.key)?;
            let parsed = observed.as_deref().map(SemaphoreRecord::parse);
            match parsed {
                Some(Some(SemaphoreRecord::Running(id))) if id == self.id => {
                    let stopped = SemaphoreRecord::Stopped.to_string();
                    if self
                        .store
                        .compare_and_swap(&self.key, observed.as_deref(), &stopped)?
                    {
                        log::info!("Marked the controller duty stopped");
                        return Ok(());
                    }
                }
                Some(Some(SemaphoreRecord::Requested(id))) => {
                    let granted = SemaphoreRecord::Granted(id.clone()).to_string();
                    if self
                        .store
                        .compare_and_swap(&self.key, observed.as_deref(), &granted)?
                    {
                        log::info!(
                            "Handing the controller duty over to runner {id} while shutting down"
                        );
                        return Ok(());
                    }
                }
                _ => {
                    log::debug!("Leaving semaphore record {observed:?} in place");
                    return Ok(());
                }
            }
        }
    }

    /// Best-effort withdrawal of a pending request, restoring whatever value
    /// the request displaced. Failure means the record moved on; the new
    /// writer is left undisturbed.
    fn withdraw_request(&self, displaced: Option<&str>) -> crate::Result<()> {
        let Some(previous) = displaced else {
            return Ok(());
        };
        let requested = SemaphoreRecord::Requested(self.id.clone()).to_string();
        if self
            .store
            .compare_and_swap(&self.key, Some(requested.as_str()), previous)?
        {
            log::info!("Withdrew the pending handover request");
        } else {
            log::warn!("Could not withdraw the handover request; the record moved on");
        }
        Ok(())
    }

    fn swap_to_running(&self, expected: Option<&str>) -> crate::Result<bool> {
        let running = SemaphoreRecord::Running(self.id.clone()).to_string();
        Ok(self.store.compare_and_swap(&self.key, expected, &running)?)
    }

    async fn wait_tick(&self) {
        tokio::select! {
            _ = tokio::time::sleep(self.tick_interval) => {}
            _ = self.cancel.cancelled() => {}
        }
    }
}
