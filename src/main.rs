#![forbid(unsafe_code)]

use anyhow::Result;
use clap::Parser;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use vagrant_mcp::cli::{Cli, Transport};
use vagrant_mcp::config::Settings;
use vagrant_mcp::error::VagrantMcpError;
use vagrant_mcp::exec::Executor;
use vagrant_mcp::logging;
use vagrant_mcp::server::{self, McpServer, Services};
use vagrant_mcp::sync::SyncEngine;
use vagrant_mcp::vm::ssh::RemoteShell;
use vagrant_mcp::vm::VmManager;

fn main() -> Result<()> {
    let cli = Cli::parse();
    logging::init(&cli.log_level);

    let runtime = tokio::runtime::Runtime::new()?;
    let result = runtime.block_on(run(cli));
    // A pending stdin read lives on a blocking thread and would hold up a
    // plain runtime drop.
    runtime.shutdown_timeout(Duration::from_secs(1));
    result
}

async fn run(cli: Cli) -> Result<()> {
    let settings = Settings::from_cli(&cli)?;
    let vms = Arc::new(VmManager::new(&settings)?);
    if !vms.vagrant().is_installed() {
        let err = VagrantMcpError::DependencyMissing(format!(
            "{} not found; install Vagrant and make sure it is on PATH",
            settings.vagrant_bin.display()
        ));
        error!(error = %err, "cannot start");
        return Err(err.into());
    }

    let sync = SyncEngine::new(vms.clone());
    let executor = Arc::new(Executor::new(
        vms.clone(),
        sync.clone(),
        RemoteShell::new(&settings.ssh_bin),
    ));
    let services = Arc::new(Services {
        vms,
        sync: sync.clone(),
        executor,
    });

    let shutdown = CancellationToken::new();
    let server = Arc::new(McpServer::new(services, shutdown.clone())?);

    tokio::spawn({
        let shutdown = shutdown.clone();
        async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                warn!("interrupted, shutting down");
                shutdown.cancel();
            }
        }
    });

    info!(
        transport = ?settings.transport,
        base_dir = %settings.base_dir.display(),
        "vagrant-mcp {} starting",
        env!("VAGRANT_MCP_VERSION")
    );

    let served = match settings.transport {
        Transport::Stdio => {
            let stdin = tokio::io::BufReader::new(tokio::io::stdin());
            server::stdio::serve(server, stdin, tokio::io::stdout()).await
        }
        Transport::Sse => server::sse::serve(server, settings.port).await,
    };

    sync.shutdown().await;
    served?;
    info!("shut down cleanly");
    Ok(())
}
