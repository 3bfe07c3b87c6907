use std::{io::Write as _, sync::Arc};

use tokio::task::JoinHandle;

/// The final step of an exit.
pub trait Terminate: Send + Sync + 'static {
    fn terminate(&self, code: i32);
}

/// Ends the process.
pub struct ProcessExit;

impl Terminate for ProcessExit {
    fn terminate(&self, code: i32) {
        std::process::exit(code);
    }
}

/// Ends the process without cutting off output that is already on its way out.
pub struct ExitCoordinator<T = ProcessExit> {
    terminate: Arc<T>,
}

impl ExitCoordinator<ProcessExit> {
    pub fn new() -> Self {
        Self::with_terminate(ProcessExit)
    }
}

impl Default for ExitCoordinator<ProcessExit> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T: Terminate> ExitCoordinator<T> {
    pub fn with_terminate(terminate: T) -> Self {
        Self {
            terminate: Arc::new(terminate),
        }
    }

    /// Requests termination with the given exit code.
    ///
    /// Returns immediately. The termination happens on a separate task, after the caller's task
    /// got a chance to finish its current turn and stdout and stderr were flushed.
    ///
    /// Must be called within a tokio runtime.
    pub fn schedule_exit(&self, code: i32) -> JoinHandle<()> {
        let terminate = self.terminate.clone();
        tokio::spawn(async move {
            tokio::task::yield_now().await;
            let _ = std::io::stdout().flush();
            let _ = std::io::stderr().flush();
            terminate.terminate(code);
        })
    }
}
