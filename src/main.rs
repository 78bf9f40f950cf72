use std::{sync::Arc, time::Duration};

use anyhow::{Context, Result};
use tokio::{
    signal::unix::{SignalKind, signal},
    time::timeout,
};
use tokio_util::sync::CancellationToken;

use eipkeeper::{
    acquisition::AcquisitionSettings,
    cli::config_path_from_args,
    config::{Config, StoreKind},
    logging::init_tracing,
    provider::Ec2ProviderFactory,
    server::UnixSocketServer,
    service::AcquisitionService,
    session::{FileSessionStore, InMemorySessionStore, SessionStore},
};

const DRAIN_TIMEOUT: Duration = Duration::from_secs(30);

#[tokio::main]
async fn main() -> Result<()> {
    let config_path = config_path_from_args()?;
    let config = Config::load(&config_path)
        .with_context(|| format!("failed to load config from {}", config_path.display()))?;
    let logging = init_tracing(&config.logging).context("failed to initialize logging")?;

    let store: Arc<dyn SessionStore> = match config.store.kind {
        StoreKind::File => Arc::new(
            FileSessionStore::new(&config.store.dir).context("failed to open session store")?,
        ),
        StoreKind::Memory => Arc::new(InMemorySessionStore::new()),
    };
    let service = Arc::new(AcquisitionService::new(
        AcquisitionSettings::from_config(&config.acquisition),
        store,
        Arc::new(Ec2ProviderFactory::new(config.provider.clone())),
    ));

    let shutdown = CancellationToken::new();
    let server = UnixSocketServer::new(config.server.socket_path.clone());
    let server_task = {
        let service = Arc::clone(&service);
        let shutdown = shutdown.clone();
        tokio::spawn(async move { server.run(service, shutdown).await })
    };
    tracing::info!(
        target: "eipkeeper",
        run_id = logging.run_id(),
        config = %config_path.display(),
        store = ?config.store.kind,
        quota = config.acquisition.quota,
        stranded_ledger = %logging.stranded_ledger_path().display(),
        "started"
    );

    let mut sigint =
        signal(SignalKind::interrupt()).context("unable to listen for SIGINT (Ctrl+C)")?;
    let mut sigterm = signal(SignalKind::terminate()).context("unable to listen for SIGTERM")?;

    let signal_name = tokio::select! {
        _ = sigint.recv() => "SIGINT",
        _ = sigterm.recv() => "SIGTERM",
    };
    tracing::info!(
        target: "eipkeeper",
        signal = signal_name,
        active_runs = service.active_runs(),
        "shutdown_requested"
    );

    shutdown.cancel();
    service.shutdown();
    if timeout(DRAIN_TIMEOUT, service.wait_idle()).await.is_err() {
        tracing::warn!(
            target: "eipkeeper",
            active_runs = service.active_runs(),
            "drain_timed_out"
        );
    }
    server_task.await.context("server task join failed")??;

    tracing::info!(target: "eipkeeper", signal = signal_name, "stopped");
    Ok(())
}
