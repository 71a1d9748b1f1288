use anyhow::Context;
use clap::Parser;
use downpour_discovery::{EtcdOptions, EtcdStore, EtcdTlsOptions, Finder};
use downpour_router::auth::AllowAll;
use downpour_router::config::Config;
use downpour_router::fanin::FanIn;
use downpour_router::metrics::RouterMetrics;
use downpour_router::server::{self, AppState};
use downpour_router::system_metrics;
use downpour_stream::Connector;
use prometheus_client::registry::Registry;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::signal::unix::{signal, SignalKind};
use tokio_util::sync::CancellationToken;
use tracing::info;

#[derive(Parser)]
#[command(name = "downpour-router", about = "Subscriber-facing routing proxy")]
struct Args {
    /// Location of the router config json file.
    #[arg(long, default_value = "config/router.json")]
    config: PathBuf,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt().json().init();
    let args = Args::parse();
    let config = Config::from_file(&args.config).context("load config")?;

    let store = Arc::new(
        EtcdStore::connect(EtcdOptions {
            urls: config.etcd_urls.clone(),
            tls: match (config.etcd_require_tls, &config.etcd_tls_client_config) {
                (true, Some(tls)) => Some(EtcdTlsOptions {
                    cert_file: tls.cert_file.clone(),
                    key_file: tls.key_file.clone(),
                    ca_file: tls.ca_file.clone(),
                }),
                _ => None,
            },
            max_concurrent_requests: config.etcd_max_concurrent_requests,
        })
        .await
        .context("connect discovery store")?,
    );
    let finder = Finder::start(store, "/meta/doppler");

    let connector = match &config.grpc {
        Some(tls) => {
            Connector::mutual_tls(&tls.cert_file, &tls.key_file, &tls.ca_file, "doppler")
                .await
                .context("load streaming TLS material")?
        }
        None => Connector::Plain,
    };

    let shutdown = CancellationToken::new();
    let mut registry = Registry::default();
    let metrics = RouterMetrics::register(&mut registry);
    system_metrics::spawn_process_metrics(&mut registry, shutdown.clone());

    let fanin = FanIn::new(
        connector,
        finder.snapshots(),
        Duration::from_secs(config.sink_dial_timeout_seconds),
        metrics,
    );
    let state = Arc::new(AppState {
        fanin,
        authorizer: Arc::new(AllowAll),
        registry,
        ws_write_timeout: Duration::from_secs(config.websocket_write_timeout_seconds),
    });

    let listener = tokio::net::TcpListener::bind(("0.0.0.0", config.outgoing_port))
        .await
        .with_context(|| format!("listen on 0.0.0.0:{}", config.outgoing_port))?;
    info!(port = config.outgoing_port, "router listening");

    let server = axum::serve(listener, server::router(state));
    let stop = shutdown.clone();
    tokio::spawn(async move {
        if let Err(err) = wait_for_signals().await {
            info!(error = %err, "signal handling ended");
        }
        stop.cancel();
    });
    server
        .with_graceful_shutdown(shutdown.clone().cancelled_owned())
        .await
        .context("serve subscribers")?;
    info!("shutting down");
    Ok(())
}

async fn wait_for_signals() -> anyhow::Result<()> {
    let mut dump = signal(SignalKind::user_defined1())?;
    let mut terminate = signal(SignalKind::terminate())?;
    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => return Ok(()),
            _ = terminate.recv() => return Ok(()),
            _ = dump.recv() => {
                info!(
                    tasks = tokio::runtime::Handle::current().metrics().num_alive_tasks(),
                    "diagnostic dump"
                );
            }
        }
    }
}
