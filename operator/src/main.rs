//! Binary launcher (§1: explicitly out of core scope, but still owned by
//! this crate): command-line flags, logging setup, client construction, CRD
//! installation, and leader election wiring the Cluster and Pod controllers
//! under one shared elected-leader guard.
//!
//! The teacher (`storage-operator`'s `shards::reconcile::run`) duplicates a
//! whole leader-election loop per controller; this generalizes that into a
//! single shared loop that starts/stops both controllers together, since
//! there is exactly one admin-protocol-aware writer per cluster this crate
//! ever needs (§5: single-writer semantics per cluster).

mod admin;
mod clusters;
mod identity;
mod platform;
mod pods;
mod util;

use std::sync::Arc;

use clap::Parser;
use kube::{
    Client, Config,
    config::KubeConfigOptions,
};
use kube_leader_election::{LeaseLock, LeaseLockParams, LeaseLockResult};
use owo_colors::OwoColorize;
use tokio::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

use admin::AdminRegistry;

/// Command-line surface (§6): log level, kubeconfig, worker count, and the
/// `--kubectl-proxy` admin-target override.
#[derive(Parser, Debug)]
#[command(
    name = "tsdb-operator",
    about = "Reconciles Cluster resources toward the DB's live shard placement"
)]
struct Cli {
    /// Log level for the tracing subscriber (error, warn, info, debug, trace).
    /// Ignored if `RUST_LOG` is set.
    #[arg(long, env = "LOG_LEVEL", default_value = "info")]
    log_level: String,

    /// Path to a kubeconfig file. Falls back to in-cluster config, then
    /// `$KUBECONFIG`, then `~/.kube/config`.
    #[arg(long, env = "KUBECONFIG")]
    kubeconfig: Option<String>,

    /// Namespace the operator watches Clusters, StatefulGroups, and Pods in.
    #[arg(long, env = "NAMESPACE", default_value = "default")]
    namespace: String,

    /// Concurrent reconciles allowed per controller.
    #[arg(long, env = "WORKERS", default_value_t = 4)]
    workers: u16,

    /// Reach the DB admin HTTP protocol through a local `kubectl proxy`
    /// session instead of in-cluster coordinator-service DNS. Intended for
    /// development against a cluster reached without a direct network path.
    #[arg(long, env = "KUBECTL_PROXY", default_value_t = false)]
    kubectl_proxy: bool,
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(cli.log_level.clone()));
    tracing_subscriber::fmt().with_env_filter(filter).init();

    if let Err(err) = run(cli).await {
        error!(error = ?err, "fatal startup error");
        std::process::exit(1);
    }
}

async fn run(cli: Cli) -> anyhow::Result<()> {
    let client = build_client(cli.kubeconfig.as_deref()).await?;

    info!("{}", "installing Cluster CRD".green());
    util::crd::install(client.clone()).await?;

    let admin = Arc::new(AdminRegistry::new(cli.kubectl_proxy));

    let shutdown = CancellationToken::new();
    let shutdown_for_signal = shutdown.clone();
    tokio::spawn(async move {
        shutdown_signal().await;
        shutdown_for_signal.cancel();
    });

    run_under_leader_election(client, cli.namespace, cli.workers, admin, shutdown).await
}

async fn build_client(kubeconfig: Option<&str>) -> anyhow::Result<Client> {
    match kubeconfig {
        Some(path) => {
            let config = Config::from_kubeconfig(&KubeConfigOptions {
                path: Some(path.into()),
                ..Default::default()
            })
            .await?;
            Ok(Client::try_from(config)?)
        }
        None => Ok(Client::try_default().await?),
    }
}

/// One shared leader-election loop (§5: per-cluster admin writes must be
/// single-writer; running two operator replicas as simultaneous active
/// controllers would race their placement and namespace mutations). The
/// non-leader stands by, ready to take over the moment the lease frees up.
async fn run_under_leader_election(
    client: Client,
    namespace: String,
    workers: u16,
    admin: Arc<AdminRegistry>,
    shutdown: CancellationToken,
) -> anyhow::Result<()> {
    let holder_id = std::env::var("POD_NAME")
        .or_else(|_| std::env::var("HOSTNAME"))
        .unwrap_or_else(|_| format!("tsdb-operator-{}", uuid::Uuid::new_v4()));
    let lease_ttl = Duration::from_secs(15);
    let renew_every = Duration::from_secs(5);
    let leadership = LeaseLock::new(
        client.clone(),
        &namespace,
        LeaseLockParams {
            holder_id,
            lease_name: "tsdb-operator-lock".to_string(),
            lease_ttl,
        },
    );

    let mut controllers: Option<tokio::task::JoinHandle<()>> = None;
    let mut tick = tokio::time::interval(renew_every);

    loop {
        tokio::select! {
            _ = shutdown.cancelled() => {
                if let Some(task) = controllers.take() {
                    task.abort();
                    task.await.ok();
                }
                info!("{}", "shutdown complete".green());
                return Ok(());
            }
            _ = tick.tick() => {}
        }

        let lease = match leadership.try_acquire_or_renew().await {
            Ok(lease) => lease,
            Err(err) => {
                warn!(error = ?err, "leader election renew/acquire failed");
                if let Some(task) = controllers.take() {
                    task.abort();
                    warn!("stopped controllers: lost ability to confirm leadership");
                }
                continue;
            }
        };

        if matches!(lease, LeaseLockResult::Acquired(_)) {
            if controllers.is_none() {
                info!("{}", "acquired leadership; starting controllers".green());
                controllers = Some(spawn_controllers(
                    client.clone(),
                    namespace.clone(),
                    workers,
                    admin.clone(),
                ));
            }
        } else if let Some(task) = controllers.take() {
            warn!("lost leadership; stopping controllers");
            task.abort();
        }
    }
}

/// Runs the Cluster and Pod controllers concurrently for as long as this
/// replica holds the lease.
fn spawn_controllers(
    client: Client,
    namespace: String,
    workers: u16,
    admin: Arc<AdminRegistry>,
) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        tokio::join!(
            clusters::reconcile::run(client.clone(), namespace.clone(), workers, admin),
            pods::reconcile::run(client, namespace, workers),
        );
    })
}

async fn shutdown_signal() {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{SignalKind, signal};

        let mut sigint = signal(SignalKind::interrupt()).expect("install SIGINT handler");
        let mut sigterm = signal(SignalKind::terminate()).expect("install SIGTERM handler");

        tokio::select! {
            _ = sigint.recv() => warn!("{}", "received SIGINT".red()),
            _ = sigterm.recv() => warn!("{}", "received SIGTERM".red()),
        }
    }

    #[cfg(not(unix))]
    {
        tokio::signal::ctrl_c()
            .await
            .expect("install Ctrl+C handler");
    }
}
