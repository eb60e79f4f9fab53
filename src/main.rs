#![deny(clippy::all)]
#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]

//! # smsgated
//!
//! SMS/USSD gateway daemon: orchestrates a pool of GSM modems over serial AT
//! commands, exposes an mTLS-terminated JSON RPC surface for sending and
//! retrieving SMS/USSD, and forwards delivered messages as e-mail over SMTP.
//!
//! ## Subcommands
//!
//! - `smsgated serve` (default) — run the gateway
//! - `smsgated supervise` — run as supervisor: starts the gateway and
//!   restarts it on crash

mod supervisor;

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use clap::{Parser, Subcommand};
use tracing::{error, info, warn};

use smsgated::config::{self, SupervisorConfig};
use smsgated::error::SmtpError;
use smsgated::gateway::Gateway;
use smsgated::pool::{init_pool, ModemPool};
use smsgated::rpc::{self, RpcState};
use smsgated::smtp::{MailRelay, SmtpRelay};
use smsgated::tls::build_rustls_config;

/// SMS/USSD gateway daemon.
#[derive(Parser)]
#[command(name = "smsgated", version)]
struct Cli {
    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the gateway (default when no subcommand given).
    Serve {
        #[arg(long, default_value = "/etc/smsgated/smsgated.ini")]
        config: String,
        #[arg(long, default_value = "/etc/smsgated/sims.ini")]
        sim_config: String,
    },
    /// Run as supervisor: starts the gateway and restarts it on crash.
    Supervise {
        #[arg(long, default_value = "/etc/smsgated/smsgated.ini")]
        config: String,
        #[arg(long, default_value = "/etc/smsgated/sims.ini")]
        sim_config: String,
    },
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    match cli.command {
        Some(Commands::Supervise { config, sim_config }) => {
            run_supervisor_mode(&config, &sim_config).await;
        }
        Some(Commands::Serve { config, sim_config }) => {
            run_server(&config, &sim_config).await;
        }
        None => {
            run_server("/etc/smsgated/smsgated.ini", "/etc/smsgated/sims.ini").await;
        }
    }
}

async fn run_supervisor_mode(config_path: &str, sim_config_path: &str) -> ! {
    // umask(0o007) before anything else touches the filesystem, matching the
    // original's main() — group-writable, world-nothing.
    unsafe {
        libc::umask(0o007);
    }

    let log_filter = std::env::var("RUST_LOG").unwrap_or_else(|_| "info".to_string());
    tracing_subscriber::fmt().with_env_filter(log_filter).init();

    info!("smsgated supervisor starting");
    let sup_config = SupervisorConfig::default();
    supervisor::run_supervisor(config_path, sim_config_path, &sup_config).await
}

async fn run_server(config_path: &str, sim_config_path: &str) {
    unsafe {
        libc::umask(0o007);
    }

    let config = match config::load_main_config(Path::new(config_path)) {
        Ok(c) => c,
        Err(e) => {
            eprintln!("failed to load {config_path}: {e}");
            std::process::exit(1);
        }
    };

    let log_filter = std::env::var("RUST_LOG").unwrap_or_else(|_| config.logging.level.clone());
    tracing_subscriber::fmt().with_env_filter(log_filter).init();

    if !config.seccomp.enabled {
        warn!("seccomp sandboxing is disabled in configuration");
    }

    info!("smsgated v{} starting", env!("CARGO_PKG_VERSION"));
    info!("listening on {}", config.server.listen);

    let mut modem_configs = match config::load_sim_config(
        Path::new(sim_config_path),
        &config.modempool.sms_self_test_interval,
    ) {
        Ok(c) => c,
        Err(e) => {
            error!("failed to load {sim_config_path}: {e}");
            std::process::exit(1);
        }
    };
    modem_configs.retain(|m| {
        let valid = m.verify();
        if !valid {
            error!(modem = %m.identifier, "modem configuration failed validation, dropping");
        }
        valid
    });

    let identifiers: Vec<String> = modem_configs.iter().map(|m| m.identifier.clone()).collect();
    let get_sms_tokens = config::read_get_sms_tokens(Path::new(config_path), &identifiers)
        .unwrap_or_default();
    let mut tokens = config.tokens.clone();
    tokens.get_sms = get_sms_tokens;

    let port_mapper = Arc::new(smsgated::serialportmapper::SerialPortMapper::new(
        config.modempool.serial_ports_hint_file.clone(),
    ));
    let _flusher = port_mapper.clone().spawn_flusher();

    let mut pool = ModemPool::new();
    for modem_config in modem_configs {
        pool.add_modem(modem_config, port_mapper.clone());
    }
    let pool = Arc::new(pool);

    init_pool(&pool, 3, Duration::from_secs(10)).await;

    let mail = match &config.mail {
        Some(smtp_config) => match SmtpRelay::new(smtp_config.clone()) {
            Ok(relay) => Arc::new(MailRelay::Connected(relay)),
            Err(SmtpError::PlaintextPortUnsupported) => {
                error!("mail.port = 25 is not supported (no STARTTLS); disabling mail forwarding");
                Arc::new(MailRelay::Disabled(SmtpRelay::disabled(
                    "configured SMTP port does not support implicit TLS",
                )))
            }
            Err(e) => {
                error!(error = %e, "failed to construct SMTP relay; disabling mail forwarding");
                Arc::new(MailRelay::Disabled(SmtpRelay::disabled(e.to_string())))
            }
        },
        None => Arc::new(MailRelay::Disabled(SmtpRelay::disabled(
            "mail forwarding is disabled in configuration",
        ))),
    };

    let rpc_state = Arc::new(RpcState {
        pool: pool.clone(),
        mail: mail.clone(),
        tokens,
        sms_enabled: config.api.enable_send_sms,
        ussd_enabled: config.api.enable_send_ussd,
    });
    let app = rpc::router(rpc_state, config.server.max_connections);

    let gateway = Arc::new(Gateway::new(
        pool.clone(),
        mail.clone(),
        Duration::from_secs(config.modempool.health_check_interval),
    ));
    let gateway_loop = tokio::spawn(gateway.clone().run());
    let delivery_task = gateway.spawn_smtp_delivery_task();

    let handle = axum_server::Handle::new();

    let shutdown_handle = handle.clone();
    let shutdown = async move {
        let ctrl_c = tokio::signal::ctrl_c();
        #[cfg(unix)]
        {
            let mut sigterm =
                tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
                    .expect("failed to register SIGTERM");
            tokio::select! {
                _ = ctrl_c => info!("received SIGINT"),
                _ = sigterm.recv() => info!("received SIGTERM"),
            }
        }
        #[cfg(not(unix))]
        {
            ctrl_c.await.ok();
            info!("received SIGINT");
        }
        shutdown_handle.graceful_shutdown(Some(Duration::from_secs(10)));
    };
    tokio::spawn(shutdown);

    let tls_config = match build_rustls_config(&config.server).await {
        Ok(c) => c,
        Err(e) => {
            error!(error = %e, "failed to build TLS configuration");
            std::process::exit(1);
        }
    };

    let addr: std::net::SocketAddr = config
        .server
        .listen
        .parse()
        .unwrap_or_else(|_| panic!("invalid listen address: {}", config.server.listen));

    info!("RPC endpoint ready");
    axum_server::bind_rustls(addr, tls_config)
        .handle(handle)
        .serve(app.into_make_service())
        .await
        .expect("RPC server error");

    info!("shutting down...");
    gateway_loop.abort();
    delivery_task.abort();
    info!("goodbye");
}
