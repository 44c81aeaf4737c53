//! Create, wait, delete and verify orchestration over a [`Transport`].
//!
//! Every handle returned by [`Lifecycle::create`] is registered for cleanup
//! before the first status poll, so a failed wait still leaves the object
//! scheduled for deletion. [`Lifecycle::teardown`] (also run on drop) deletes
//! the remaining registrations newest first, each at most once.

use std::cell::RefCell;
use std::fmt;
use std::thread;
use std::time::{Duration, Instant};

use thiserror::Error;
use tracing::{debug, info, trace, warn};

use crate::resource::{CreateRequest, ResourceHandle, ResourceKind, STATUS_AVAILABLE};
use crate::transport::{Transport, TransportError};

/// Default deadline for status and deletion waits.
pub const DEFAULT_WAIT_TIMEOUT: Duration = Duration::from_secs(60);
/// Default pause between polls.
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_secs(1);

/// Deadline and pause used by the polling loops.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct PollPolicy {
    /// How long a wait may last before it fails.
    pub timeout: Duration,
    /// Pause between observations.
    pub interval: Duration,
}

impl PollPolicy {
    /// Builds a policy.
    #[must_use]
    pub const fn new(timeout: Duration, interval: Duration) -> Self {
        Self { timeout, interval }
    }
}

impl Default for PollPolicy {
    fn default() -> Self {
        Self::new(DEFAULT_WAIT_TIMEOUT, DEFAULT_POLL_INTERVAL)
    }
}

fn format_waited(waited: &Duration) -> humantime::FormattedDuration {
    humantime::format_duration(Duration::from_millis(
        u64::try_from(waited.as_millis()).unwrap_or(u64::MAX),
    ))
}

/// Errors raised by the orchestrator.
#[derive(Clone, Debug, Error, Eq, PartialEq)]
pub enum LifecycleError {
    /// Raised when the transport fails.
    #[error(transparent)]
    Transport(#[from] TransportError),
    /// Raised when a resource does not reach the wanted status in time.
    #[error("{kind} {id} did not reach status {target} after {} (last status: {status})", format_waited(.waited))]
    Timeout {
        /// Kind being waited on.
        kind: ResourceKind,
        /// Identifier being waited on.
        id: String,
        /// Wanted status.
        target: String,
        /// Last status observed.
        status: String,
        /// Time spent waiting.
        waited: Duration,
    },
    /// Raised when a deleted resource is still visible at the deadline.
    #[error("{kind} {id} not deleted after {}", format_waited(.waited))]
    DeleteTimeout {
        /// Kind being deleted.
        kind: ResourceKind,
        /// Identifier being deleted.
        id: String,
        /// Time spent waiting.
        waited: Duration,
    },
}

/// One cleanup that did not complete.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct TeardownFailure {
    /// Kind of the leftover resource.
    pub kind: ResourceKind,
    /// Identifier of the leftover resource.
    pub id: String,
    /// Why cleanup failed.
    pub error: LifecycleError,
}

/// Outcome of [`Lifecycle::teardown`].
#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct TeardownSummary {
    /// Number of resources confirmed deleted.
    pub deleted: usize,
    /// Resources that could not be deleted.
    pub failures: Vec<TeardownFailure>,
}

impl TeardownSummary {
    /// Returns `true` when nothing failed.
    #[must_use]
    pub const fn is_clean(&self) -> bool {
        self.failures.is_empty()
    }
}

/// Resource orchestrator bound to one transport.
pub struct Lifecycle<T: Transport> {
    transport: T,
    policy: PollPolicy,
    cleanup: RefCell<Vec<(ResourceKind, String)>>,
}

impl<T: Transport> fmt::Debug for Lifecycle<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Lifecycle")
            .field("transport", &self.transport.label())
            .field("policy", &self.policy)
            .field("cleanup", &self.cleanup.borrow())
            .finish()
    }
}

impl<T: Transport> Lifecycle<T> {
    /// Creates an orchestrator with the default poll policy.
    #[must_use]
    pub fn new(transport: T) -> Self {
        Self {
            transport,
            policy: PollPolicy::default(),
            cleanup: RefCell::new(Vec::new()),
        }
    }

    /// Replaces the poll policy.
    #[must_use]
    pub fn with_poll_policy(mut self, policy: PollPolicy) -> Self {
        self.policy = policy;
        self
    }

    /// Transport in use.
    #[must_use]
    pub const fn transport(&self) -> &T {
        &self.transport
    }

    /// Poll policy in use.
    #[must_use]
    pub const fn policy(&self) -> PollPolicy {
        self.policy
    }

    /// Resources still scheduled for cleanup, oldest first.
    #[must_use]
    pub fn registered(&self) -> Vec<(ResourceKind, String)> {
        self.cleanup.borrow().clone()
    }

    /// Creates a resource, registers it for cleanup, and waits until it is
    /// available.
    ///
    /// # Errors
    ///
    /// Returns [`LifecycleError::Transport`] when creation or polling fails
    /// and [`LifecycleError::Timeout`] when the resource never becomes
    /// available. The resource stays registered in both cases.
    pub fn create(
        &self,
        kind: ResourceKind,
        request: &CreateRequest,
    ) -> Result<ResourceHandle, LifecycleError> {
        debug!(%kind, transport = self.transport.label(), ?request, "creating resource");
        let mut handle = self.transport.create(kind, request)?;
        self.register(&handle);
        info!(%kind, id = %handle.id(), "resource created");
        self.wait_for_status(&mut handle, STATUS_AVAILABLE, self.policy.timeout)?;
        Ok(handle)
    }

    /// Adds a resource to the cleanup registry.
    pub fn register(&self, handle: &ResourceHandle) {
        let entry = (handle.kind(), handle.id().to_owned());
        let mut cleanup = self.cleanup.borrow_mut();
        if !cleanup.contains(&entry) {
            cleanup.push(entry);
        }
    }

    fn unregister(&self, kind: ResourceKind, id: &str) {
        self.cleanup
            .borrow_mut()
            .retain(|(registered_kind, registered_id)| {
                !(*registered_kind == kind && registered_id == id)
            });
    }

    /// Polls until the resource reports `target`, merging each observation
    /// into `handle`.
    ///
    /// # Errors
    ///
    /// Returns [`LifecycleError::Timeout`] once `timeout` elapses without a
    /// match and propagates transport failures unchanged.
    pub fn wait_for_status(
        &self,
        handle: &mut ResourceHandle,
        target: &str,
        timeout: Duration,
    ) -> Result<(), LifecycleError> {
        let started = Instant::now();
        let deadline = started + timeout;
        loop {
            let observed = self.transport.get(handle.kind(), handle.id())?;
            handle.observe(observed.into_properties());
            if handle.status() == Some(target) {
                info!(kind = %handle.kind(), id = %handle.id(), status = target, "status reached");
                return Ok(());
            }
            trace!(
                kind = %handle.kind(),
                id = %handle.id(),
                status = handle.status().unwrap_or_default(),
                wanted = target,
                "waiting for status"
            );
            if !self.pause_until(deadline) {
                let waited = started.elapsed();
                warn!(kind = %handle.kind(), id = %handle.id(), wanted = target, ?waited, "status wait timed out");
                return Err(LifecycleError::Timeout {
                    kind: handle.kind(),
                    id: handle.id().to_owned(),
                    target: target.to_owned(),
                    status: handle.status().unwrap_or("unknown").to_owned(),
                    waited,
                });
            }
        }
    }

    /// Polls until the resource is gone.
    ///
    /// # Errors
    ///
    /// Returns [`LifecycleError::DeleteTimeout`] once `timeout` elapses with
    /// the resource still present.
    pub fn check_deleted(
        &self,
        kind: ResourceKind,
        id: &str,
        timeout: Duration,
    ) -> Result<(), LifecycleError> {
        let started = Instant::now();
        let deadline = started + timeout;
        loop {
            if !self.transport.exists(kind, id)? {
                debug!(%kind, %id, "resource deleted");
                return Ok(());
            }
            if !self.pause_until(deadline) {
                let waited = started.elapsed();
                warn!(%kind, %id, ?waited, "deletion wait timed out");
                return Err(LifecycleError::DeleteTimeout {
                    kind,
                    id: id.to_owned(),
                    waited,
                });
            }
        }
    }

    /// Deletes a resource if it still exists and waits until it is gone.
    /// Deleting an absent resource succeeds.
    ///
    /// # Errors
    ///
    /// Returns [`LifecycleError`] when the service refuses the deletion or
    /// the resource is still present at the deadline.
    pub fn delete(&self, handle: &ResourceHandle) -> Result<(), LifecycleError> {
        self.delete_id(handle.kind(), handle.id())
    }

    fn delete_id(&self, kind: ResourceKind, id: &str) -> Result<(), LifecycleError> {
        match self.transport.delete(kind, id) {
            Ok(()) => debug!(%kind, %id, "delete requested"),
            Err(err) if err.is_not_found() => debug!(%kind, %id, "already absent"),
            Err(err) => return Err(err.into()),
        }
        self.check_deleted(kind, id, self.policy.timeout)?;
        self.unregister(kind, id);
        Ok(())
    }

    /// Requests a size change. Callers poll for `available` afterwards.
    ///
    /// # Errors
    ///
    /// Propagates the transport failure.
    pub fn extend(
        &self,
        handle: &ResourceHandle,
        new_size: impl fmt::Display,
    ) -> Result<(), LifecycleError> {
        let size = new_size.to_string();
        debug!(id = %handle.id(), new_size = %size, "extending volume");
        self.transport.extend(handle, &size)?;
        Ok(())
    }

    /// Re-reads the resource into `handle`.
    ///
    /// # Errors
    ///
    /// Propagates the transport failure.
    pub fn refresh(&self, handle: &mut ResourceHandle) -> Result<(), LifecycleError> {
        let observed = self.transport.get(handle.kind(), handle.id())?;
        handle.observe(observed.into_properties());
        Ok(())
    }

    /// Deletes every registered resource, newest first.
    pub fn teardown(&self) -> TeardownSummary {
        let pending = std::mem::take(&mut *self.cleanup.borrow_mut());
        let mut summary = TeardownSummary::default();
        for (kind, id) in pending.into_iter().rev() {
            match self.delete_id(kind, &id) {
                Ok(()) => summary.deleted += 1,
                Err(error) => summary.failures.push(TeardownFailure { kind, id, error }),
            }
        }
        summary
    }

    /// Sleeps towards `deadline`. Returns `false` when the deadline has
    /// already passed.
    fn pause_until(&self, deadline: Instant) -> bool {
        let now = Instant::now();
        if now >= deadline {
            return false;
        }
        thread::sleep(self.policy.interval.min(deadline - now));
        true
    }
}

impl<T: Transport> Drop for Lifecycle<T> {
    fn drop(&mut self) {
        if self.cleanup.borrow().is_empty() {
            return;
        }
        let summary = self.teardown();
        for failure in &summary.failures {
            warn!(
                kind = %failure.kind,
                id = %failure.id,
                error = %failure.error,
                "cleanup failed; resource left behind"
            );
        }
    }
}

#[cfg(test)]
mod tests;
