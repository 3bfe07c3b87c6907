//! Supervision of faults that nobody is around to observe.
//!
//! A background operation may fail before anyone attaches to its outcome. That is not necessarily
//! a bug: the handler may show up a moment later. So a fault is first recorded as pending and only
//! reported once it has stayed unhandled for the whole grace period. A handler showing up within
//! the grace period retracts the fault silently.
//!
//! Panics are different. They can not be handled after the fact, so they are reported right away.

use std::{
    collections::HashMap,
    fmt,
    future::Future,
    sync::{
        atomic::{AtomicBool, AtomicU64, Ordering},
        Arc,
    },
    time::Duration,
};

use anyhow::{bail, Result};
use parking_lot::Mutex;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{error, warn};

/// Identifies a single fallible background operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct FaultHandle(u64);

impl fmt::Display for FaultHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// The sink for everything the supervisor decides to report.
pub trait FaultReport: Send + Sync + 'static {
    /// A fault stayed unhandled for the whole grace period.
    fn escalated(&self, handle: FaultHandle, delay: Duration, reason: &str);
    /// A failure escaped all handling.
    fn uncaught(&self, message: &str);
}

/// Reports through the log.
pub struct LogReport;

impl FaultReport for LogReport {
    fn escalated(&self, handle: FaultHandle, delay: Duration, reason: &str) {
        warn!(
            %handle,
            "failed operation not handled within {}ms: {}",
            delay.as_millis(),
            reason
        );
    }

    fn uncaught(&self, message: &str) {
        error!("uncaught failure: {}", message);
    }
}

struct PendingFault {
    /// Distinguishes this record from a later one registered under the same handle.
    seqn: u64,
    reason: String,
    /// Cancelling it disarms the escalation timer.
    timer: CancellationToken,
}

struct Shared {
    delay: Duration,
    next_id: AtomicU64,
    pending: Mutex<HashMap<FaultHandle, PendingFault>>,
    report: Arc<dyn FaultReport>,
}

/// Keeps track of pending faults and escalates the ones which are not handled in time.
///
/// Cheaply cloneable, all clones share the same registry.
#[derive(Clone)]
pub struct FaultSupervisor {
    shared: Arc<Shared>,
}

impl FaultSupervisor {
    /// Creates a supervisor that reports to the log.
    pub fn new(delay: Duration) -> Self {
        Self::with_report(delay, Arc::new(LogReport))
    }

    pub fn with_report(delay: Duration, report: Arc<dyn FaultReport>) -> Self {
        Self {
            shared: Arc::new(Shared {
                delay,
                next_id: AtomicU64::new(0),
                pending: Mutex::new(HashMap::new()),
                report,
            }),
        }
    }

    /// The grace period a fault gets before it is escalated.
    pub fn delay(&self) -> Duration {
        self.shared.delay
    }

    /// Allocates a fresh handle, unique within this supervisor.
    pub fn new_handle(&self) -> FaultHandle {
        FaultHandle(self.next_id())
    }

    fn next_id(&self) -> u64 {
        self.shared.next_id.fetch_add(1, Ordering::Relaxed)
    }

    /// Records that the operation identified by `handle` failed with no handler attached.
    ///
    /// Unless [`Self::fault_retracted`] is called for the same handle within [`Self::delay`], the
    /// fault is reported once and then forgotten. Recording a handle that is still pending
    /// replaces the previous record.
    ///
    /// Must be called within a tokio runtime.
    pub fn fault_occurred(&self, handle: FaultHandle, reason: impl Into<String>) {
        let seqn = self.next_id();
        let timer = CancellationToken::new();
        let replaced = self.shared.pending.lock().insert(
            handle,
            PendingFault {
                seqn,
                reason: reason.into(),
                timer: timer.clone(),
            },
        );
        if let Some(replaced) = replaced {
            replaced.timer.cancel();
        }

        let supervisor = self.clone();
        let delay = self.shared.delay;
        tokio::spawn(async move {
            tokio::select! {
                biased;
                _ = timer.cancelled() => {}
                _ = tokio::time::sleep(delay) => supervisor.escalate(handle, seqn),
            }
        });
    }

    /// Records that a handler was attached to the operation identified by `handle` after all.
    ///
    /// Returns `true` if a pending fault was retracted. Retracting a handle that is not pending,
    /// because it was never recorded, already escalated or already retracted, does nothing.
    pub fn fault_retracted(&self, handle: FaultHandle) -> bool {
        let removed = self.shared.pending.lock().remove(&handle);
        match removed {
            Some(fault) => {
                fault.timer.cancel();
                true
            }
            None => false,
        }
    }

    fn escalate(&self, handle: FaultHandle, seqn: u64) {
        let fault = {
            let mut pending = self.shared.pending.lock();
            match pending.get(&handle) {
                Some(fault) if fault.seqn == seqn => pending.remove(&handle),
                _ => None,
            }
        };
        if let Some(fault) = fault {
            self.shared
                .report
                .escalated(handle, self.shared.delay, &fault.reason);
        }
    }

    /// Reports a failure that escaped all handling. There is no grace period.
    pub fn report_uncaught(&self, message: &str) {
        self.shared.report.uncaught(message);
    }

    /// The number of faults waiting for either a handler or their escalation.
    pub fn pending(&self) -> usize {
        self.shared.pending.lock().len()
    }

    /// Routes every panic in the process through [`Self::report_uncaught`].
    ///
    /// Replaces whatever panic hook was installed before.
    pub fn install(&self) {
        let supervisor = self.clone();
        std::panic::set_hook(Box::new(move |info| {
            let context = match info.location() {
                Some(location) => format!("panicked at {}", location),
                None => "panicked".to_string(),
            };
            let message = crate::panic::panic_to_string(&context, info.payload());
            supervisor.report_uncaught(&message);
        }));
    }

    /// Spawns a fallible operation on the runtime and keeps an eye on its outcome.
    ///
    /// If the operation fails while nobody is joining the returned [`TrackedTask`], the failure is
    /// recorded as a fault. Joining later retracts it. Dropping the task without joining it leaves
    /// any failure to be escalated.
    pub fn spawn<F, T>(&self, fut: F) -> TrackedTask<T>
    where
        F: Future<Output = Result<T>> + Send + 'static,
        T: Send + 'static,
    {
        let handle = self.new_handle();
        let joining = Arc::new(AtomicBool::new(false));
        let task = tokio::spawn({
            let supervisor = self.clone();
            let joining = joining.clone();
            async move {
                let result = fut.await;
                if let Err(ref err) = result {
                    if !joining.load(Ordering::Acquire) {
                        supervisor.fault_occurred(handle, format!("{:#}", err));
                    }
                }
                result
            }
        });
        TrackedTask {
            handle,
            joining,
            task,
            supervisor: self.clone(),
        }
    }
}

/// A background operation spawned through [`FaultSupervisor::spawn`].
pub struct TrackedTask<T> {
    handle: FaultHandle,
    joining: Arc<AtomicBool>,
    task: JoinHandle<Result<T>>,
    supervisor: FaultSupervisor,
}

impl<T> TrackedTask<T> {
    pub fn handle(&self) -> FaultHandle {
        self.handle
    }

    pub fn is_finished(&self) -> bool {
        self.task.is_finished()
    }

    /// Cancels the operation. A cancelled operation never counts as a fault.
    pub fn abort(&self) {
        self.task.abort();
    }

    /// Waits for the operation and takes over the handling of its outcome.
    pub async fn join(self) -> Result<T> {
        self.joining.store(true, Ordering::Release);
        let outcome = self.task.await;
        // The operation may have failed before we started joining.
        self.supervisor.fault_retracted(self.handle);
        match outcome {
            Ok(result) => result,
            Err(join_err) if join_err.is_panic() => {
                crate::panic::panic_to_err("background operation panicked", join_err.into_panic())
            }
            Err(_) => bail!("background operation was cancelled"),
        }
    }
}
