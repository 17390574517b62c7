use anyhow::Result;
use clap::Parser;
use scheduler::config::Cli;
use scheduler::caretaker::cluster::ClusterCaretaker;
use scheduler::caretaker::standalone::StandaloneCaretaker;
use scheduler::caretaker::Caretaker;
use scheduler::driver::{InMemoryDriver, SchedulerDriver};
use scheduler::http;
use scheduler::ingress::EventIngress;
use scheduler::manager::{Manager, ManagerConfig, NoServerIdLookup, TargetUpdates};
use scheduler::metrics::SchedulerMetrics;
use scheduler::signals;
use scheduler::store::{InMemoryStore, Store};
use scheduler_types::{Document, Mode};
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

#[tokio::main]
async fn main() -> Result<()> {
    scheduler_common::init();
    tracing_subscriber::fmt::init();

    let cli = Cli::parse();
    let path = format!("/{}", cli.framework_name);
    let target = cli.target();
    let mode = target.mode;

    // The cluster-manager client library and the networked coordination
    // store are external collaborators contracted only at their interfaces
    // (C1/C3); this binary wires the in-process implementations suitable
    // for a single-node deployment or a dry run.
    let store: Arc<dyn Store> = Arc::new(InMemoryStore::new());
    if cli.reset_state {
        store.destroy(&path).await.ok();
    }
    store.init(&path, Document::new(target)).await?;

    let driver: Arc<dyn SchedulerDriver> = Arc::new(InMemoryDriver::new());
    let ingress = Arc::new(EventIngress::new());
    let target_updates = Arc::new(TargetUpdates::new());
    let metrics = Arc::new(SchedulerMetrics::new());

    let caretaker: Arc<dyn Caretaker> = match mode {
        Mode::Cluster => Arc::new(ClusterCaretaker { refuse_seconds: cli.refuse_seconds }),
        Mode::Standalone => Arc::new(StandaloneCaretaker { refuse_seconds: cli.refuse_seconds }),
    };

    let manager_config = ManagerConfig {
        path: path.clone(),
        offer_limit: cli.offer_limit,
        refuse_seconds: cli.refuse_seconds,
        phase_timeout: Duration::from_secs(30),
        reconcile_base: Duration::from_secs(1),
        reconcile_cap: Duration::from_secs(60),
        implicit_reconcile_interval: Duration::from_secs(300),
        endpoint_scheme: "http".to_string(),
        launch: cli.launch_config(),
    };

    let mut manager = Manager::new(
        store.clone(),
        driver.clone(),
        ingress.clone(),
        caretaker,
        Arc::new(NoServerIdLookup),
        target_updates.clone(),
        metrics.clone(),
        manager_config,
    );

    let cancel = CancellationToken::new();

    let dispatcher_cancel = cancel.clone();
    let dispatcher = tokio::spawn(async move {
        loop {
            if dispatcher_cancel.is_cancelled() {
                break;
            }
            match manager.tick().await {
                Ok(true) => tokio::time::sleep(Duration::from_millis(100)).await,
                Ok(false) => continue,
                Err(e) => {
                    tracing::error!(error = %e, "tick failed, backing off");
                    tokio::time::sleep(Duration::from_secs(1)).await;
                }
            }
        }
    });

    signals::spawn_sigchld_handler(store.clone(), path.clone(), cancel.clone());

    let http_state = http::AppState { store: store.clone(), driver: driver.clone(), target_updates, metrics, path };
    let addr = format!("0.0.0.0:{}", cli.framework_port);
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    tracing::info!(%addr, "admin HTTP surface listening");
    let http_cancel = cancel.clone();
    let http_server = tokio::spawn(async move {
        axum::serve(listener, http::router(http_state))
            .with_graceful_shutdown(async move { http_cancel.cancelled().await })
            .await
    });

    signals::graceful_shutdown(cancel, driver).await;
    dispatcher.await.ok();
    http_server.await.ok();

    tracing::info!("scheduler stopped gracefully");
    Ok(())
}
