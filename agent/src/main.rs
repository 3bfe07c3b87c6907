use anyhow::Result;
use clap::Parser;
use remote_agent::{
    cli::Args,
    command::ExtensionCli,
    config::DataLayout,
    exit::ExitCoordinator,
    launch::{self, Launcher, Mode},
    logging,
    server::AgentServer,
};
use tokio::signal::unix::{signal, SignalKind};
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();
    let mode = launch::select_mode::<ExtensionCli>(&args);
    logging::init(mode);

    let layout = DataLayout::from_env()?;
    let exec_path = std::env::current_exe()?;

    let shutdown = CancellationToken::new();
    if mode == Mode::Server {
        tokio::spawn(shutdown_on_signal(shutdown.clone()));
    }

    Launcher::prepare(args, layout, exec_path, ExitCoordinator::new(), shutdown)
        .run(ExtensionCli::new, AgentServer::new)
        .await?;
    Ok(())
}

/// Cancels `shutdown` on the first SIGINT or SIGTERM.
async fn shutdown_on_signal(shutdown: CancellationToken) {
    let (mut sigint, mut sigterm) = match (
        signal(SignalKind::interrupt()),
        signal(SignalKind::terminate()),
    ) {
        (Ok(sigint), Ok(sigterm)) => (sigint, sigterm),
        (Err(err), _) | (_, Err(err)) => {
            error!("Failed to install signal handlers: {}", err);
            return;
        }
    };
    tokio::select! {
        _ = sigint.recv() => info!("Received ^C..."),
        _ = sigterm.recv() => info!("Received SIGTERM..."),
    }
    shutdown.cancel();
}
