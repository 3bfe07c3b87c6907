//! Startup orchestration: provision the data folder, then either run a one-shot command or serve.

use std::{
    backtrace::BacktraceStatus,
    future::Future,
    panic::{self, AssertUnwindSafe},
    path::PathBuf,
    sync::Arc,
    time::Duration,
};

use anyhow::Result;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

use crate::{
    cli::Args,
    config::{DataLayout, EnvironmentContext},
    exit::{ExitCoordinator, ProcessExit, Terminate},
    fault::{FaultReport, FaultSupervisor},
    provision,
};

/// A command that runs to completion, after which the process exits.
pub trait OneShotCommand {
    /// Whether the arguments ask for this command rather than for the server.
    fn should_run(args: &Args) -> bool;

    fn run(&self, args: &Args) -> impl Future<Output = Result<()>>;
}

/// A long running server.
pub trait Server {
    /// Starts serving on the given port and returns right away.
    ///
    /// Failures while starting are expected to surface through the [`FaultSupervisor`] the server
    /// was constructed with.
    fn start(&self, port: u16);

    fn stop(&self);
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Mode {
    OneShot,
    Server,
}

/// Decides how the process runs. Exactly one of the modes is picked for any arguments.
pub fn select_mode<C: OneShotCommand>(args: &Args) -> Mode {
    if C::should_run(args) {
        Mode::OneShot
    } else {
        Mode::Server
    }
}

/// Renders a failure for the log: the message chain if there is one, otherwise the backtrace,
/// otherwise whatever the debug representation gives.
pub fn describe_failure(err: &anyhow::Error) -> String {
    let message = format!("{:#}", err);
    if !message.is_empty() {
        return message;
    }
    let backtrace = err.backtrace();
    if backtrace.status() == BacktraceStatus::Captured {
        return backtrace.to_string();
    }
    format!("{:?}", err)
}

pub struct Launcher<T = ProcessExit> {
    env: Arc<EnvironmentContext>,
    faults: FaultSupervisor,
    exit: ExitCoordinator<T>,
    shutdown: CancellationToken,
}

impl<T: Terminate> Launcher<T> {
    /// Makes sure the data folder exists and builds the environment for the run modes.
    ///
    /// `shutdown` ends the server mode once cancelled.
    pub fn prepare(
        args: Args,
        layout: DataLayout,
        exec_path: PathBuf,
        exit: ExitCoordinator<T>,
        shutdown: CancellationToken,
    ) -> Self {
        provision::ensure_directories(&layout.directories());
        info!(
            "Remote configuration data at {}",
            layout.remote_data_folder.display()
        );

        let faults = FaultSupervisor::new(Duration::from_millis(args.unhandled_fault_delay_ms));
        let env = EnvironmentContext::new(args, layout, exec_path);
        Self {
            env,
            faults,
            exit,
            shutdown,
        }
    }

    /// Sends fault reports somewhere else than the log.
    pub fn with_fault_report(mut self, report: Arc<dyn FaultReport>) -> Self {
        self.faults = FaultSupervisor::with_report(self.faults.delay(), report);
        self
    }

    pub fn env(&self) -> &Arc<EnvironmentContext> {
        &self.env
    }

    /// Runs the mode selected by the arguments.
    ///
    /// In the one-shot mode this schedules the exit of the process once the command is done. In the
    /// server mode this returns once the server was stopped by cancelling the shutdown token.
    pub async fn run<C, S>(
        self,
        make_command: impl FnOnce(Arc<EnvironmentContext>) -> C,
        make_server: impl FnOnce(Arc<EnvironmentContext>, FaultSupervisor) -> S,
    ) -> Result<Mode>
    where
        C: OneShotCommand,
        S: Server,
    {
        let mode = select_mode::<C>(&self.env.args);
        match mode {
            Mode::OneShot => {
                let command = make_command(self.env.clone());
                let code = match command.run(&self.env.args).await {
                    Ok(()) => 0,
                    Err(err) => {
                        error!("{}", describe_failure(&err));
                        1
                    }
                };
                self.exit.schedule_exit(code).await?;
            }
            Mode::Server => {
                // Before the server exists, so that nothing it does goes unnoticed.
                self.faults.install();

                // A panic here was already reported by the hook. The process stays up regardless.
                let started = panic::catch_unwind(AssertUnwindSafe(|| {
                    let server = make_server(self.env.clone(), self.faults.clone());
                    server.start(self.env.args.port);
                    server
                }));
                let server = match started {
                    Ok(server) => Some(server),
                    Err(_) => {
                        error!("The server failed to start");
                        None
                    }
                };

                self.shutdown.cancelled().await;
                if let Some(server) = server {
                    info!("Stopping the server");
                    server.stop();
                }
            }
        }
        Ok(mode)
    }
}
