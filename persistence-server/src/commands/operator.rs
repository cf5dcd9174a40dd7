use anyhow::{Context, Result};
use persistence_operator::bootstrap::{
    ensure_resource_kinds_registered, persistence_kinds, BootstrapWait, KubeKindRegistry,
};
use persistence_operator::informer::InformerConfig;
use persistence_operator::jobs::{CronJobSettings, KubeJobs};
use persistence_operator::k8s_client::{get_k8s_client, server_version, PersistenceActions};
use persistence_operator::operator::{Operator, OperatorConfig};
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;

use crate::api::{self, AppState};

/// Effective settings of `run`, CLI flags merged over the environment
#[derive(Debug, Clone)]
pub struct RunSettings {
    pub apiserver: Option<String>,
    pub tls_insecure: bool,
    pub port: u16,
    pub workers: usize,
    pub job_image: String,
    pub resync_period: Duration,
}

pub async fn run(settings: RunSettings) -> Result<()> {
    tracing::info!("Starting persistence operator");

    let client = get_k8s_client(settings.apiserver.as_deref(), settings.tls_insecure)
        .await
        .context("Failed to create Kubernetes client")?;
    let version = server_version(&client)
        .await
        .context("Failed to communicate with the Kubernetes API server")?;
    tracing::info!("Connected to Kubernetes API server {}", version);

    let cancel = CancellationToken::new();
    tokio::spawn(shutdown_on_signal(cancel.clone()));

    let registered = ensure_resource_kinds_registered(
        &KubeKindRegistry::new(client.clone()),
        &persistence_kinds(),
        BootstrapWait::default(),
        &cancel,
    )
    .await;
    if !proceed_after_bootstrap(registered)? {
        tracing::info!("Shutdown requested during startup");
        return Ok(());
    }

    let jobs = Arc::new(KubeJobs::new(client.clone()));
    let operator = Operator::new(
        PersistenceActions::all(client),
        jobs.clone(),
        OperatorConfig {
            workers: settings.workers,
            informer: InformerConfig {
                resync_period: settings.resync_period,
                ..Default::default()
            },
            cron_jobs: CronJobSettings {
                image: settings.job_image,
                ..Default::default()
            },
        },
    )?;

    let state = AppState {
        store: operator.store(),
        job_runs: jobs,
    };
    let addr = format!("0.0.0.0:{}", settings.port);
    let listener = TcpListener::bind(&addr)
        .await
        .with_context(|| format!("Failed to bind {}", addr))?;
    let api_handle = tokio::spawn(api::serve(listener, state, cancel.clone()));

    tracing::info!("✓ Persistence operator ready");
    tracing::info!("  Workers: {}", settings.workers);
    tracing::info!("  API: http://0.0.0.0:{}", settings.port);

    operator.run(cancel.clone()).await;

    // the operator only returns once cancelled; make sure the API follows
    cancel.cancel();
    api_handle.await??;

    tracing::info!("Shutdown complete");
    Ok(())
}

/// Whether startup goes on; a shutdown signal during bootstrap is a clean exit
fn proceed_after_bootstrap(registered: persistence_operator::Result<()>) -> Result<bool> {
    match registered {
        Ok(()) => Ok(true),
        Err(persistence_operator::Error::Cancelled) => Ok(false),
        Err(e) => Err(e).context("Failed to register custom resource kinds"),
    }
}

async fn shutdown_on_signal(cancel: CancellationToken) {
    wait_for_signal().await;
    tracing::info!("Shutting down...");
    cancel.cancel();
}

#[cfg(unix)]
async fn wait_for_signal() {
    use tokio::signal::unix::{signal, SignalKind};

    match signal(SignalKind::terminate()) {
        Ok(mut terminate) => {
            tokio::select! {
                _ = tokio::signal::ctrl_c() => {}
                _ = terminate.recv() => {}
            }
        }
        Err(e) => {
            tracing::warn!("Failed to listen for SIGTERM: {}", e);
            if let Err(e) = tokio::signal::ctrl_c().await {
                tracing::error!("Failed to listen for Ctrl+C: {}", e);
                std::future::pending::<()>().await;
            }
        }
    }
}

#[cfg(not(unix))]
async fn wait_for_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!("Failed to listen for Ctrl+C: {}", e);
        std::future::pending::<()>().await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use persistence_operator::Error;

    #[test]
    fn test_signal_during_bootstrap_is_clean_exit() {
        assert!(proceed_after_bootstrap(Ok(())).unwrap());
        assert!(!proceed_after_bootstrap(Err(Error::Cancelled)).unwrap());

        let err = proceed_after_bootstrap(Err(Error::NotReady {
            kind: "persistenceactions.persistence.mmerrill3.com".to_string(),
            timeout: Duration::from_secs(30),
        }))
        .unwrap_err();
        assert!(err.to_string().contains("Failed to register custom resource kinds"));
    }
}
