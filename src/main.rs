mod cli;

use clap::Parser;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tracing::info;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use crate::cli::{Cli, Commands};
use rollcall_core::{Config, ConfigValidator, InfraError, PublisherMode, RollcallError, StoreConfig};
use rollcall_gateway::admin::{self, AdminState};
use rollcall_gateway::{
    DisplayServer, GatewayServer, HttpSnapshotSink, PresenceManager, Shutdown, SnapshotPublisher,
    SnapshotSink, ViewerFanout,
};
use rollcall_store::{MemoryUserStore, SqliteUserStore, UserStore};
use tokio::net::TcpListener;

#[tokio::main]
async fn main() -> Result<(), RollcallError> {
    let cli = Cli::parse();

    // Initialize tracing
    let env_filter = if cli.dev {
        EnvFilter::new("rollcall=debug,rollcall_gateway=debug,rollcall_store=debug,warn")
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| {
            EnvFilter::new("rollcall=info,rollcall_gateway=info,rollcall_store=info,warn")
        })
    };
    tracing_subscriber::registry()
        .with(env_filter)
        .with(fmt::layer())
        .init();

    info!("Rollcall v{}", env!("CARGO_PKG_VERSION"));

    // Handle ConfigSample immediately without loading config
    if let Commands::ConfigSample { output } = &cli.command {
        let path = output
            .clone()
            .unwrap_or_else(|| PathBuf::from("./rollcall.sample.yaml"));
        Config::sample().save(&path)?;
        println!("Sample config written to {}", path.display());
        return Ok(());
    }

    let mut config = Config::load(&cli.config_path)?;

    match cli.command {
        Commands::Serve {
            host,
            port,
            viewer_port,
            admin_port,
        } => {
            if let Some(host) = host {
                config.gateway.host = host.clone();
                config.display.host = host;
            }
            if let Some(port) = port {
                config.gateway.port = port;
            }
            if let Some(port) = viewer_port {
                config.display.viewer_port = port;
            }
            if let Some(port) = admin_port {
                config.display.admin_port = port;
            }
            ConfigValidator::validate(&config)?;
            handle_serve(config).await
        }
        Commands::Login {
            host,
            port,
            display_url,
        } => {
            if let Some(host) = host {
                config.gateway.host = host;
            }
            if let Some(port) = port {
                config.gateway.port = port;
            }
            if let Some(url) = display_url {
                config.publisher.display_url = url;
            }
            config.publisher.mode = PublisherMode::Http;
            ConfigValidator::validate(&config)?;
            handle_login(config).await
        }
        Commands::Display {
            host,
            viewer_port,
            admin_port,
        } => {
            if let Some(host) = host {
                config.display.host = host;
            }
            if let Some(port) = viewer_port {
                config.display.viewer_port = port;
            }
            if let Some(port) = admin_port {
                config.display.admin_port = port;
            }
            ConfigValidator::validate(&config)?;
            handle_display(config).await
        }
        Commands::Users => handle_users(&config).await,
        Commands::ConfigSample { .. } => Ok(()),
    }
}

async fn open_store(
    config: &StoreConfig,
    purge: bool,
) -> Result<Arc<dyn UserStore>, RollcallError> {
    let store: Arc<dyn UserStore> = if config.in_memory {
        info!("Using in-memory user store");
        Arc::new(MemoryUserStore::new())
    } else {
        let store = SqliteUserStore::open(&config.db_path)
            .map_err(|e| RollcallError::service_failed("user store", e.to_string()))?;
        Arc::new(store)
    };

    if purge && config.purge_on_start {
        let removed = store
            .clear()
            .await
            .map_err(|e| RollcallError::service_failed("user store", e.to_string()))?;
        if removed > 0 {
            info!("Purged {} stale user(s) from a previous run", removed);
        }
    }
    Ok(store)
}

async fn bind(addr: String) -> Result<TcpListener, RollcallError> {
    TcpListener::bind(&addr)
        .await
        .map_err(|e| network_error(addr.clone(), e))
}

fn network_error(addr: String, err: impl std::fmt::Display) -> RollcallError {
    InfraError::Network {
        addr,
        reason: err.to_string(),
    }
    .into()
}

fn http_sink(config: &Config) -> Result<Arc<dyn SnapshotSink>, RollcallError> {
    let sink = HttpSnapshotSink::new(
        config.publisher.display_url.clone(),
        Duration::from_secs(config.publisher.request_timeout_secs),
    )
    .map_err(|e| RollcallError::service_failed("publisher", e.to_string()))?;
    info!("Publishing snapshots to {}", sink.url());
    let sink: Arc<dyn SnapshotSink> = Arc::new(sink);
    Ok(sink)
}

fn build_sink(
    config: &Config,
    fanout: &Arc<ViewerFanout>,
) -> Result<Arc<dyn SnapshotSink>, RollcallError> {
    match config.publisher.mode {
        PublisherMode::Local => {
            let sink: Arc<dyn SnapshotSink> = fanout.clone();
            Ok(sink)
        }
        PublisherMode::Http => http_sink(config),
    }
}

/// Trigger shutdown on Ctrl-C.
fn spawn_signal_handler(shutdown: Arc<Shutdown>) {
    tokio::spawn(async move {
        match tokio::signal::ctrl_c().await {
            Ok(()) => info!("Shutdown requested"),
            Err(e) => tracing::error!("Failed to listen for Ctrl-C: {}", e),
        }
        shutdown.trigger();
    });
}

fn print_banner(mode: &str, lines: &[(&str, String)]) {
    println!("Rollcall {} starting...", mode);
    println!("━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━");
    for (label, value) in lines {
        println!("  {:<10} {}", label, value);
    }
    println!("━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━");
    println!();
}

fn build_presence(
    config: &Config,
    store: Arc<dyn UserStore>,
    sink: Arc<dyn SnapshotSink>,
) -> (Arc<PresenceManager>, Arc<SnapshotPublisher>) {
    let publisher = Arc::new(SnapshotPublisher::new(Arc::clone(&store), sink));
    let presence = Arc::new(PresenceManager::new(
        store,
        Arc::clone(&publisher),
        config.gateway.duplicate_policy,
    ));
    (presence, publisher)
}

async fn handle_serve(config: Config) -> Result<(), RollcallError> {
    let store = open_store(&config.store, true).await?;
    let fanout = Arc::new(ViewerFanout::new());
    let sink = build_sink(&config, &fanout)?;
    let (presence, publisher) = build_presence(&config, store, sink);

    let gateway = GatewayServer::new(config.gateway.clone(), presence);
    let display = DisplayServer::new(config.display.clone(), Arc::clone(&fanout));
    let admin_state = AdminState::new(Arc::clone(&fanout)).with_publisher(Arc::clone(&publisher));

    let gateway_listener = gateway
        .bind()
        .await
        .map_err(|e| network_error(config.gateway.listen_addr(), format!("{:#}", e)))?;
    let viewer_listener = display
        .bind()
        .await
        .map_err(|e| network_error(config.display.viewer_addr(), format!("{:#}", e)))?;
    let admin_listener = bind(config.display.admin_addr()).await?;

    print_banner(
        "server",
        &[
            ("gateway", config.gateway.listen_addr()),
            ("viewers", config.display.viewer_addr()),
            ("admin", config.display.admin_addr()),
            ("policy", format!("{:?}", config.gateway.duplicate_policy)),
        ],
    );

    let shutdown = Arc::new(Shutdown::new());
    spawn_signal_handler(Arc::clone(&shutdown));

    publisher.publish();
    let interval = config.publisher.interval_secs.map(|secs| {
        Arc::clone(&publisher).spawn_interval(Duration::from_secs(secs), shutdown.signal())
    });

    let (_, _, admin_result) = tokio::join!(
        gateway.serve(gateway_listener, shutdown.signal()),
        display.serve(viewer_listener, shutdown.signal()),
        admin::serve(admin_listener, admin_state, shutdown.signal()),
    );
    if let Some(task) = interval {
        let _ = task.await;
    }
    admin_result
        .map_err(|e| RollcallError::service_failed("admin endpoint", format!("{:#}", e)))?;

    info!("Rollcall stopped");
    Ok(())
}

async fn handle_login(config: Config) -> Result<(), RollcallError> {
    let store = open_store(&config.store, true).await?;
    let sink = http_sink(&config)?;
    let (presence, publisher) = build_presence(&config, store, sink);

    let gateway = GatewayServer::new(config.gateway.clone(), presence);
    let gateway_listener = gateway
        .bind()
        .await
        .map_err(|e| network_error(config.gateway.listen_addr(), format!("{:#}", e)))?;

    print_banner(
        "login server",
        &[
            ("gateway", config.gateway.listen_addr()),
            ("display", config.publisher.display_url.clone()),
        ],
    );

    let shutdown = Arc::new(Shutdown::new());
    spawn_signal_handler(Arc::clone(&shutdown));

    publisher.publish();
    let interval = config.publisher.interval_secs.map(|secs| {
        Arc::clone(&publisher).spawn_interval(Duration::from_secs(secs), shutdown.signal())
    });

    gateway.serve(gateway_listener, shutdown.signal()).await;
    if let Some(task) = interval {
        let _ = task.await;
    }

    info!("Rollcall login server stopped");
    Ok(())
}

async fn handle_display(config: Config) -> Result<(), RollcallError> {
    let fanout = Arc::new(ViewerFanout::new());
    let display = DisplayServer::new(config.display.clone(), Arc::clone(&fanout));
    let admin_state = AdminState::new(Arc::clone(&fanout));

    let viewer_listener = display
        .bind()
        .await
        .map_err(|e| network_error(config.display.viewer_addr(), format!("{:#}", e)))?;
    let admin_listener = bind(config.display.admin_addr()).await?;

    print_banner(
        "display server",
        &[
            ("viewers", config.display.viewer_addr()),
            ("admin", config.display.admin_addr()),
        ],
    );

    let shutdown = Arc::new(Shutdown::new());
    spawn_signal_handler(Arc::clone(&shutdown));

    let (_, admin_result) = tokio::join!(
        display.serve(viewer_listener, shutdown.signal()),
        admin::serve(admin_listener, admin_state, shutdown.signal()),
    );
    admin_result
        .map_err(|e| RollcallError::service_failed("admin endpoint", format!("{:#}", e)))?;

    info!("Rollcall display server stopped");
    Ok(())
}

async fn handle_users(config: &Config) -> Result<(), RollcallError> {
    if config.store.in_memory {
        println!("The store is in-memory; nothing persists between runs");
        return Ok(());
    }
    let store = open_store(&config.store, false).await?;
    let users = store
        .list()
        .await
        .map_err(|e| RollcallError::service_failed("user store", e.to_string()))?;

    if users.is_empty() {
        println!("No users online");
    } else {
        println!("Online users:");
        for user in users {
            println!("  • {}", user);
        }
    }
    Ok(())
}
