//! The persistent agent server.
//!
//! Accepts connections and keeps them open until the peer hangs up or the server stops. What is
//! spoken over a connection is up to the extension host and not interpreted here.

use std::{net::SocketAddr, sync::Arc, time::Duration};

use anyhow::{Context as _, Result};
use tokio::{
    io::AsyncReadExt as _,
    net::{TcpListener, TcpStream},
    sync::watch,
};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::{config::EnvironmentContext, fault::FaultSupervisor, launch::Server};

const READ_BUF_SIZE: usize = 8 * 1024;

/// Pause after a failed accept, so that a persistent error such as running out of file
/// descriptors does not spin the loop.
const ACCEPT_BACKOFF: Duration = Duration::from_millis(100);

pub struct AgentServer {
    env: Arc<EnvironmentContext>,
    faults: FaultSupervisor,
    shutdown: CancellationToken,
    bound_tx: watch::Sender<Option<SocketAddr>>,
}

impl AgentServer {
    pub fn new(env: Arc<EnvironmentContext>, faults: FaultSupervisor) -> Self {
        let (bound_tx, _) = watch::channel(None);
        Self {
            env,
            faults,
            shutdown: CancellationToken::new(),
            bound_tx,
        }
    }

    /// Resolves with the address the server listens on once it is bound.
    ///
    /// Returns `None` if the server stopped without ever binding.
    pub async fn bound(&self) -> Option<SocketAddr> {
        let mut bound_rx = self.bound_tx.subscribe();
        tokio::select! {
            biased;
            addr = bound_rx.wait_for(Option::is_some) => addr.ok().and_then(|addr| *addr),
            _ = self.shutdown.cancelled() => None,
        }
    }
}

impl Server for AgentServer {
    fn start(&self, port: u16) {
        let addr = format!("{}:{}", self.env.args.host, port);
        // Not joined. A failure is picked up by the fault supervisor.
        drop(self.faults.spawn(accept_loop(
            addr,
            self.faults.clone(),
            self.shutdown.clone(),
            self.bound_tx.clone(),
        )));
    }

    fn stop(&self) {
        self.shutdown.cancel();
    }
}

async fn accept_loop(
    addr: String,
    faults: FaultSupervisor,
    shutdown: CancellationToken,
    bound_tx: watch::Sender<Option<SocketAddr>>,
) -> Result<()> {
    let listener = TcpListener::bind(&addr)
        .await
        .with_context(|| format!("failed to listen on {}", addr))?;
    let local_addr = listener.local_addr()?;
    info!("Agent server listening on {}", local_addr);
    bound_tx.send_replace(Some(local_addr));

    loop {
        tokio::select! {
            _ = shutdown.cancelled() => break,
            accepted = listener.accept() => {
                let (stream, peer) = match accepted {
                    Ok(accepted) => accepted,
                    Err(err) => {
                        warn!("failed to accept a connection: {}", err);
                        if !backoff(&shutdown).await {
                            break;
                        }
                        continue;
                    }
                };
                drop(faults.spawn(serve_connection(stream, peer, shutdown.clone())));
            }
        }
    }
    info!("Agent server on {} stopped", local_addr);
    Ok(())
}

/// Waits out [`ACCEPT_BACKOFF`]. Returns `false` if the server was stopped in the meantime.
async fn backoff(shutdown: &CancellationToken) -> bool {
    tokio::select! {
        _ = shutdown.cancelled() => false,
        _ = tokio::time::sleep(ACCEPT_BACKOFF) => true,
    }
}

async fn serve_connection(
    mut stream: TcpStream,
    peer: SocketAddr,
    shutdown: CancellationToken,
) -> Result<()> {
    debug!(%peer, "connection accepted");
    let mut buf = vec![0u8; READ_BUF_SIZE];
    let mut received = 0u64;
    loop {
        tokio::select! {
            _ = shutdown.cancelled() => break,
            read = stream.read(&mut buf) => {
                let n = read.with_context(|| format!("reading from {}", peer))?;
                if n == 0 {
                    break;
                }
                received += n as u64;
            }
        }
    }
    debug!(%peer, received, "connection closed");
    Ok(())
}
