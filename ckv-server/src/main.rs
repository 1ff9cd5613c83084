//! # Process Entry Point
//!
//! Wire the keyspace, dispatcher, durability engines, and replication
//! mode from the CLI flags, restore persisted state, then serve until
//! shutdown. Exit code 0 on clean shutdown; non-zero on fatal
//! configuration or listener failures.

use std::process::ExitCode;
use std::sync::Arc;
use std::time::Duration;

use clap::Parser;
use tokio::net::TcpListener;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

use ckv_engine::{start_reaper, EvictionPolicy, Keyspace, KeyspaceConfig};
use ckv_server::aof::{AofConfig, AofEngine};
use ckv_server::cluster::{Fsm, LocalReplicator};
use ckv_server::config::Config;
use ckv_server::dispatch::{Dispatcher, Replication, ServerContext};
use ckv_server::server::{build_tls_acceptor, serve};
use ckv_server::snapshot::{start_snapshotter, SnapshotEngine};

fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let config = Config::parse();
    match run(config) {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            error!(%err, "fatal error");
            ExitCode::FAILURE
        }
    }
}

fn run(config: Config) -> anyhow::Result<()> {
    config.validate()?;

    if config.eviction_policy != EvictionPolicy::NoEviction && config.max_keys == 0 {
        info!(
            policy = %config.eviction_policy,
            "eviction policy set without --max-keys; the budget is unlimited"
        );
    }

    let keyspace = Arc::new(Keyspace::new(KeyspaceConfig {
        policy: config.eviction_policy,
        max_keys: config.max_keys,
    }));
    let ctx = Arc::new(ServerContext::new(Arc::clone(&keyspace)));
    let dispatcher = Arc::new(Dispatcher::new(Arc::clone(&ctx)));

    // Durability: AOF restore wins when both engines are enabled, since
    // the append log carries everything after its own preamble.
    let mut aof_handle = None;
    if config.aof {
        let (engine, handle) = AofEngine::start(
            Arc::clone(&keyspace),
            Arc::clone(&dispatcher),
            AofConfig {
                dir: config.data_dir.clone(),
                strategy: config.aof_sync,
            },
        )?;
        engine.restore()?;
        let _ = ctx.aof.set(Arc::clone(&engine));
        aof_handle = Some(handle);
    }

    let mut snapshot_handle = None;
    if config.snapshot {
        let engine = SnapshotEngine::new(Arc::clone(&keyspace), config.data_dir.clone())?;
        if !config.aof {
            engine.restore_latest()?;
        }
        snapshot_handle = Some(start_snapshotter(
            &engine,
            Duration::from_secs(config.snapshot_interval_secs),
        ));
        let _ = ctx.snapshot.set(engine);
    }

    if config.cluster {
        let fsm = Fsm::new(Arc::clone(&keyspace), Arc::clone(&dispatcher));
        dispatcher.install_replication(Replication::Cluster(Arc::new(LocalReplicator::new(fsm))));
        info!(server_id = %config.server_id, peers = ?config.peers, "cluster mode enabled");
    } else {
        dispatcher.install_replication(Replication::Standalone);
    }

    let tls = if config.tls {
        match (&config.cert_file, &config.key_file) {
            (Some(cert), Some(key)) => {
                Some(build_tls_acceptor(cert, key, config.client_ca_file.as_deref())?)
            }
            _ => anyhow::bail!("--tls requires --cert-file and --key-file"),
        }
    } else {
        None
    };

    let reaper = start_reaper(
        &keyspace,
        Duration::from_millis(config.eviction_interval_ms),
    );

    let runtime = tokio::runtime::Runtime::new()?;
    let served: anyhow::Result<()> = runtime.block_on(async {
        let listener = TcpListener::bind(config.listen_addr()).await?;
        info!(addr = %config.listen_addr(), tls = config.tls, "listening");
        tokio::select! {
            result = serve(listener, Arc::clone(&dispatcher), tls, config.server_id.clone()) => {
                result.map_err(Into::into)
            }
            _ = tokio::signal::ctrl_c() => {
                info!("shutting down");
                Ok(())
            }
        }
    });

    reaper.stop();
    if let Some(handle) = snapshot_handle {
        handle.stop();
    }
    if let Some(handle) = aof_handle {
        handle.stop();
    }
    served
}
