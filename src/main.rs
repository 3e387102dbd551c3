//! NimbusKV - A Redis-compatible in-memory key-value server.
//!
//! This is the main entry point: it parses configuration, wires up the
//! storage engine, AOF (if enabled), cluster router (if peers are
//! configured), and the TCP accept loop, then waits for a shutdown signal.

use nimbuskv::cluster::ClusterRouter;
use nimbuskv::commands::CommandHandler;
use nimbuskv::config::Config;
use nimbuskv::connection::{handle_connection, ConnectionStats};
use nimbuskv::store::StorageEngine;
use nimbuskv::{Aof, AofHandle};
use std::sync::Arc;
use tokio::net::TcpListener;
use tokio::signal::unix::{signal, SignalKind};
use tracing::{error, info, Level};
use tracing_subscriber::FmtSubscriber;

fn print_banner(config: &Config) {
    println!(
        r#"
  _   _ _           _                 _  ___     __
 | \ | (_)         | |               | |/ / |   / /
 |  \| |_ _ __ ___ | |__  _   _ ___  | ' /| |  / /
 | . ` | | '_ ` _ \| '_ \| | | / __| |  < | | / /
 | |\  | | | | | | | |_) | |_| \__ \ | . \| |/ /
 |_| \_|_|_| |_| |_|_.__/ \__,_|___/ |_|\_\_/_/

NimbusKV v{} - Redis-compatible in-memory key-value server
──────────────────────────────────────────────────────────────
Server started on {}
Databases: {}   AOF: {}   Cluster: {}
Ready to accept connections.

Use Ctrl+C to shutdown gracefully.
"#,
        nimbuskv::VERSION,
        config.bind_address(),
        config.databases,
        if config.append_only { "on" } else { "off" },
        if config.cluster_enabled() { "on" } else { "off" },
    );
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config = Config::from_args();

    let _subscriber = FmtSubscriber::builder()
        .with_max_level(Level::INFO)
        .with_target(false)
        .with_thread_ids(false)
        .with_file(false)
        .with_line_number(false)
        .init();

    print_banner(&config);

    let storage = Arc::new(StorageEngine::new(config.databases));
    info!(databases = config.databases, "Storage engine initialized");

    let aof = if config.append_only {
        // No AOF handle here: replay re-executes commands against the same
        // storage engine, and must not re-append what it's replaying.
        let replay_handler = CommandHandler::new(Arc::clone(&storage), None);
        let aof = Aof::open(&config.append_filename, move |db_index, command| {
            let _ = replay_handler.execute(db_index, command);
        })?;
        info!(path = %config.append_filename, "AOF enabled and replayed");
        Some(aof)
    } else {
        None
    };
    let aof_handle: Option<AofHandle> = aof.as_ref().map(Aof::handle);

    let command_handler = Arc::new(CommandHandler::new(Arc::clone(&storage), aof_handle));

    let router = if config.cluster_enabled() {
        info!(self_addr = %config.node_self, peers = config.peers.len(), "Cluster mode engaged");
        Some(Arc::new(ClusterRouter::new(
            config.node_self.clone(),
            config.peers.clone(),
            Arc::clone(&command_handler),
        )))
    } else {
        None
    };

    let stats = Arc::new(ConnectionStats::new());

    let listener = TcpListener::bind(config.bind_address()).await?;
    info!(addr = %config.bind_address(), "Listening");

    let shutdown = wait_for_shutdown_signal();

    tokio::select! {
        _ = accept_loop(listener, command_handler, router, stats) => {}
        _ = shutdown => { info!("Shutdown signal received, stopping server..."); }
    }

    if let Some(aof) = aof {
        aof.shutdown();
        info!("AOF writer flushed and stopped");
    }

    info!("Server shutdown complete");
    Ok(())
}

/// Waits for any of SIGINT, SIGTERM, SIGHUP, or SIGQUIT.
async fn wait_for_shutdown_signal() {
    let ctrl_c = tokio::signal::ctrl_c();
    let mut term = signal(SignalKind::terminate()).expect("failed to install SIGTERM handler");
    let mut hup = signal(SignalKind::hangup()).expect("failed to install SIGHUP handler");
    let mut quit = signal(SignalKind::quit()).expect("failed to install SIGQUIT handler");

    tokio::select! {
        _ = ctrl_c => {}
        _ = term.recv() => {}
        _ = hup.recv() => {}
        _ = quit.recv() => {}
    }
}

/// Main loop that accepts incoming connections.
async fn accept_loop(
    listener: TcpListener,
    command_handler: Arc<CommandHandler>,
    router: Option<Arc<ClusterRouter>>,
    stats: Arc<ConnectionStats>,
) {
    loop {
        match listener.accept().await {
            Ok((stream, addr)) => {
                let handler = (*command_handler).clone();
                let router = router.clone();
                let stats = Arc::clone(&stats);

                tokio::spawn(async move {
                    handle_connection(stream, addr, handler, router, stats).await;
                });
            }
            Err(e) => {
                error!(error = %e, "Failed to accept connection");
            }
        }
    }
}
