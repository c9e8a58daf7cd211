use crate::config::Config;
use anyhow::Context as _;
use plugin::{Dispatcher, Registry};
use std::path::PathBuf;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

#[derive(Debug, clap::Args)]
pub struct ServerArgs {
    /// Where the filesystem view of the tree gets mounted. The daemon
    /// itself serves the API socket; mounting is handled by the
    /// external mount helper pointed at it.
    pub mountpoint: PathBuf,
}

pub async fn run(args: ServerArgs, config: Config) -> anyhow::Result<()> {
    let mountpoint = args
        .mountpoint
        .canonicalize()
        .with_context(|| format!("could not resolve the mountpoint {}", args.mountpoint.display()))?;

    let mut registry = Registry::new();
    for plugin_config in &config.plugins {
        tracing::info!(plugin = plugin_config.name, "loading plugin");
        let loaded = registry
            .register_external(
                &plugin_config.name,
                &plugin_config.script,
                &plugin_config.config,
            )
            .await;
        // A broken plugin shouldn't take the whole mount down.
        if let Err(err) = loaded {
            tracing::error!(plugin = plugin_config.name, error = %err, "failed to load plugin");
        }
    }
    if registry.plugins().is_empty() {
        tracing::warn!("no plugins loaded; the tree is empty");
    }

    let socket = config.socket_path();
    if let Some(parent) = socket.parent() {
        std::fs::create_dir_all(parent)
            .with_context(|| format!("could not create {}", parent.display()))?;
    }
    // A stale socket from an unclean shutdown would fail the bind.
    match std::fs::remove_file(&socket) {
        Ok(()) => {}
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => {}
        Err(err) => {
            return Err(err).with_context(|| format!("could not remove {}", socket.display()))
        }
    }
    let listener = tokio::net::UnixListener::bind(&socket)
        .with_context(|| format!("could not bind {}", socket.display()))?;
    tracing::info!(
        socket = %socket.display(),
        mountpoint = %mountpoint.display(),
        "serving the wash API"
    );

    let state = api::AppState::new(Arc::new(registry), Arc::new(Dispatcher::new()));
    let shutdown = CancellationToken::new();
    {
        let shutdown = shutdown.clone();
        tokio::spawn(async move {
            shutdown_signal().await;
            tracing::info!("shutting down");
            shutdown.cancel();
        });
    }
    api::serve(listener, state, shutdown).await?;

    std::fs::remove_file(&socket).ok();
    Ok(())
}

async fn shutdown_signal() {
    let mut terminate = tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
        .expect("installing the SIGTERM handler never fails");
    tokio::select! {
        _ = tokio::signal::ctrl_c() => {}
        _ = terminate.recv() => {}
    }
}
