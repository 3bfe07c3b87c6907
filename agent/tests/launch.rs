//! Tests the mode dispatch of the launcher with stand-in collaborators.

use std::{path::Path, sync::Arc, time::Duration};

use anyhow::{bail, Result};
use clap::Parser as _;
use parking_lot::{Mutex, MutexGuard};
use remote_agent::{
    cli::Args,
    config::DataLayout,
    exit::{ExitCoordinator, Terminate},
    fault::{FaultHandle, FaultReport, FaultSupervisor},
    launch::{Launcher, Mode, OneShotCommand, Server},
};
use tokio_util::sync::CancellationToken;

/// Everything the stand-ins observed.
#[derive(Default)]
struct Observed {
    commands_run: usize,
    servers_started: Vec<u16>,
    servers_stopped: usize,
    exit_codes: Vec<i32>,
    escalated: Vec<String>,
    uncaught: Vec<String>,
}

type Shared = Arc<Mutex<Observed>>;

struct RecordingExit(Shared);

impl Terminate for RecordingExit {
    fn terminate(&self, code: i32) {
        self.0.lock().exit_codes.push(code);
    }
}

struct RecordingReport(Shared);

impl FaultReport for RecordingReport {
    fn escalated(&self, _handle: FaultHandle, _delay: Duration, reason: &str) {
        self.0.lock().escalated.push(reason.to_string());
    }

    fn uncaught(&self, message: &str) {
        // Still printed, so that a failing assertion elsewhere keeps its message.
        eprintln!("{}", message);
        // The panicking thread may hold the lock already.
        if let Some(mut observed) = self.0.try_lock() {
            observed.uncaught.push(message.to_string());
        }
    }
}

/// Tests in this file install the supervisor's process-wide panic hook, one at a time.
static PANIC_HOOK: Mutex<()> = Mutex::new(());

/// Puts the default panic hook back once the test is over.
///
/// The hook can not be replaced while unwinding, so after a failed test it stays until the next
/// test takes over. It keeps printing in the meantime.
struct RestoreHook<'a> {
    _serial: MutexGuard<'a, ()>,
}

impl Drop for RestoreHook<'_> {
    fn drop(&mut self) {
        if !std::thread::panicking() {
            let _ = std::panic::take_hook();
        }
    }
}

fn own_panic_hook() -> RestoreHook<'static> {
    RestoreHook {
        _serial: PANIC_HOOK.lock(),
    }
}

/// Runs when `--list-extensions` is given, fails when `--uninstall-extension` is given too.
struct StubCommand(Shared);

impl OneShotCommand for StubCommand {
    fn should_run(args: &Args) -> bool {
        args.list_extensions
    }

    async fn run(&self, args: &Args) -> Result<()> {
        self.0.lock().commands_run += 1;
        if let Some(id) = &args.uninstall_extension {
            bail!("Extension '{}' is not installed.", id);
        }
        Ok(())
    }
}

struct StubServer {
    observed: Shared,
    faults: FaultSupervisor,
}

impl Server for StubServer {
    fn start(&self, port: u16) {
        self.observed.lock().servers_started.push(port);
        if port == 2 {
            panic!("port 2 blew up");
        }
        if port == 1 {
            drop(
                self.faults
                    .spawn(async { Err::<(), _>(anyhow::anyhow!("port 1 is reserved")) }),
            );
        }
    }

    fn stop(&self) {
        self.observed.lock().servers_stopped += 1;
    }
}

fn launcher(
    home: &Path,
    argv: &[&str],
    observed: &Shared,
    shutdown: CancellationToken,
) -> Launcher<RecordingExit> {
    let args = Args::parse_from(argv);
    let layout = DataLayout::resolve(None, Some(home.to_path_buf())).unwrap();
    Launcher::prepare(
        args,
        layout,
        home.join("opt/remote-agent"),
        ExitCoordinator::with_terminate(RecordingExit(observed.clone())),
        shutdown,
    )
    .with_fault_report(Arc::new(RecordingReport(observed.clone())))
}

async fn run(launcher: Launcher<RecordingExit>, observed: &Shared) -> Result<Mode> {
    launcher
        .run(
            |_env| StubCommand(observed.clone()),
            |_env, faults| StubServer {
                observed: observed.clone(),
                faults,
            },
        )
        .await
}

#[tokio::test]
async fn provisions_before_running() {
    let home = tempfile::tempdir().unwrap();
    let observed = Shared::default();
    let launcher = launcher(
        home.path(),
        &["remote-agent", "--list-extensions"],
        &observed,
        CancellationToken::new(),
    );

    let root = home.path().join(".vscode-remote");
    assert_eq!(launcher.env().remote_data_folder(), root);
    assert!(root.join("data/User/globalStorage").is_dir());
    assert!(root.join("data/Machine").is_dir());
    assert!(root.join("extensions").is_dir());
}

#[tokio::test]
async fn one_shot_success_exits_zero() {
    let home = tempfile::tempdir().unwrap();
    let observed = Shared::default();
    let launcher = launcher(
        home.path(),
        &["remote-agent", "--list-extensions"],
        &observed,
        CancellationToken::new(),
    );

    let mode = run(launcher, &observed).await.unwrap();
    assert_eq!(mode, Mode::OneShot);

    let observed = observed.lock();
    assert_eq!(observed.commands_run, 1);
    assert_eq!(observed.exit_codes, vec![0]);
    assert!(observed.servers_started.is_empty());
}

#[tokio::test]
async fn one_shot_failure_exits_one() {
    let home = tempfile::tempdir().unwrap();
    let observed = Shared::default();
    let launcher = launcher(
        home.path(),
        &[
            "remote-agent",
            "--list-extensions",
            "--uninstall-extension",
            "a.b",
        ],
        &observed,
        CancellationToken::new(),
    );

    run(launcher, &observed).await.unwrap();

    let observed = observed.lock();
    assert_eq!(observed.exit_codes, vec![1]);
    assert!(observed.servers_started.is_empty());
}

#[tokio::test]
async fn server_mode_uses_default_port() {
    let _hook = own_panic_hook();
    let home = tempfile::tempdir().unwrap();
    let observed = Shared::default();
    let shutdown = CancellationToken::new();
    let launcher = launcher(home.path(), &["remote-agent"], &observed, shutdown.clone());

    let running = tokio::spawn({
        let observed = observed.clone();
        async move { run(launcher, &observed).await }
    });

    tokio::time::sleep(Duration::from_millis(50)).await;
    {
        let observed = observed.lock();
        assert_eq!(observed.servers_started, vec![8000]);
        assert_eq!(observed.servers_stopped, 0);
        assert_eq!(observed.commands_run, 0);
    }
    assert!(!running.is_finished());

    shutdown.cancel();
    assert_eq!(running.await.unwrap().unwrap(), Mode::Server);

    let observed = observed.lock();
    assert_eq!(observed.servers_stopped, 1);
    assert!(observed.exit_codes.is_empty());
}

#[tokio::test]
async fn startup_fault_is_escalated() {
    let _hook = own_panic_hook();
    let home = tempfile::tempdir().unwrap();
    let observed = Shared::default();
    let shutdown = CancellationToken::new();
    let launcher = launcher(
        home.path(),
        &[
            "remote-agent",
            "--port",
            "1",
            "--unhandled-fault-delay-ms",
            "20",
        ],
        &observed,
        shutdown.clone(),
    );

    let running = tokio::spawn({
        let observed = observed.clone();
        async move { run(launcher, &observed).await }
    });

    tokio::time::sleep(Duration::from_millis(300)).await;
    assert_eq!(
        observed.lock().escalated,
        vec!["port 1 is reserved".to_string()]
    );

    shutdown.cancel();
    running.await.unwrap().unwrap();
}

#[tokio::test]
async fn startup_panic_keeps_serving() {
    let _hook = own_panic_hook();
    let home = tempfile::tempdir().unwrap();
    let observed = Shared::default();
    let shutdown = CancellationToken::new();
    let launcher = launcher(
        home.path(),
        &["remote-agent", "--port", "2"],
        &observed,
        shutdown.clone(),
    );

    let running = tokio::spawn({
        let observed = observed.clone();
        async move { run(launcher, &observed).await }
    });

    tokio::time::sleep(Duration::from_millis(50)).await;
    assert!(!running.is_finished());
    {
        let observed = observed.lock();
        assert_eq!(observed.servers_started, vec![2]);
        assert_eq!(observed.uncaught.len(), 1);
        assert!(observed.uncaught[0].starts_with("panicked at "));
        assert!(observed.uncaught[0].ends_with("port 2 blew up"));
    }

    shutdown.cancel();
    assert_eq!(running.await.unwrap().unwrap(), Mode::Server);
    let observed = observed.lock();
    assert_eq!(observed.servers_stopped, 0);
    assert!(observed.exit_codes.is_empty());
}
