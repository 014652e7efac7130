//! Gatekeeper server binary

use anyhow::{Context, Result};
use clap::Parser;
use gatekeeper::api::{self, AdminAllowList, ApiState};
use gatekeeper::notify::local_hostname;
use gatekeeper::{
    AllowList, ConnectionRegistry, LogNotifier, Notifier, ProxyConfig, ProxyServer, Settings,
    SmtpNotifier, StepUpAuthenticator,
};
use gatekeeper_core::{InstrumentationConfig, LogSink, init_tracing};
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpListener;
use tokio::sync::watch;
use tracing::{error, info, warn};

/// Access-gated TCP relay with email step-up authentication
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Configuration file path
    #[arg(short = 'c', long = "config", default_value = "config.json")]
    config: String,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let settings = Settings::load_from_file(&cli.config)
        .with_context(|| format!("failed to load configuration from {}", cli.config))?;

    let log = LogSink::open(&settings.logger_path)?;
    let instrumentation = InstrumentationConfig::for_service("gatekeeper", &settings.log_level);
    init_tracing(&instrumentation, log.clone())?;

    info!("Starting gatekeeper");
    info!("Configuration loaded from {}", cli.config);

    let allowlist = Arc::new(AllowList::load(&settings.whitelist_path).await?);

    let notifier: Arc<dyn Notifier> = match &settings.smtp {
        Some(smtp) => Arc::new(SmtpNotifier::new(smtp)?),
        None => {
            warn!("no smtp section configured, confirmation links will only be logged");
            Arc::new(LogNotifier)
        }
    };

    let auth = Arc::new(StepUpAuthenticator::new(
        allowlist,
        notifier,
        settings.emails.clone(),
        settings.default_api_url.clone(),
        local_hostname(),
    ));
    let registry = ConnectionRegistry::new();

    let proxy_listener = TcpListener::bind(&settings.proxy_address)
        .await
        .with_context(|| format!("failed to bind proxy address {}", settings.proxy_address))?;
    let api_listener = TcpListener::bind(&settings.api_address)
        .await
        .with_context(|| format!("failed to bind API address {}", settings.api_address))?;

    let proxy = Arc::new(ProxyServer::new(
        ProxyConfig {
            backend_addr: settings.redirect_address.clone(),
            connect_timeout: settings.connect_timeout(),
        },
        auth.clone(),
        registry.clone(),
    ));
    let proxy_handle = tokio::spawn(proxy.run(proxy_listener));

    let api_state = ApiState {
        auth,
        log,
        registry: registry.clone(),
        admin_ips: Arc::new(AdminAllowList::new(settings.api_whitelist.clone())),
    };
    let (shutdown_tx, mut shutdown_rx) = watch::channel(false);
    let mut api_handle = tokio::spawn(async move {
        let shutdown = async move {
            let _ = shutdown_rx.changed().await;
        };
        if let Err(e) = api::serve(api_listener, api_state, shutdown).await {
            error!("control surface error: {}", e);
        }
    });

    tokio::select! {
        _ = shutdown_signal() => info!("Shutting down..."),
        _ = &mut api_handle => warn!("control surface stopped unexpectedly, shutting down"),
    }

    proxy_handle.abort();
    registry.stop_all().await;
    let _ = shutdown_tx.send(true);

    if !api_handle.is_finished()
        && tokio::time::timeout(Duration::from_secs(5), api_handle)
            .await
            .is_err()
    {
        warn!("control surface did not stop within 5s");
    }

    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!("failed to listen for ctrl-c: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        use tokio::signal::unix::{SignalKind, signal};
        match signal(SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                error!("failed to listen for SIGTERM: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
}
