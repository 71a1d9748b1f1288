use anyhow::Context;
use clap::Parser;
use downpour_agent::config::Config;
use downpour_agent::legacy::LegacyPool;
use downpour_agent::metrics::AgentMetrics;
use downpour_agent::pipeline::{self, tag::Tagger};
use downpour_agent::pool::{Pool, PoolConfig};
use downpour_discovery::{EtcdOptions, EtcdStore, EtcdTlsOptions, Finder};
use downpour_stream::Connector;
use prometheus_client::registry::Registry;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::net::UdpSocket;
use tokio::signal::unix::{signal, SignalKind};
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

/// Sockets kept for the legacy datagram path.
const LEGACY_POOL_SIZE: usize = 20;

#[derive(Parser)]
#[command(name = "downpour-agent", about = "Per-host envelope forwarder")]
struct Args {
    /// Location of the agent config json file.
    #[arg(long, default_value = "config/agent.json")]
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
    let pool = Pool::start(
        connector,
        finder.snapshots(),
        PoolConfig {
            zone: config.zone.clone(),
            static_target: (!config.doppler_addr.is_empty()).then(|| config.doppler_addr.clone()),
            ..PoolConfig::default()
        },
        shutdown.clone(),
    );
    let legacy = LegacyPool::new(
        config.doppler_addr_udp.clone(),
        config.shared_secret.clone().into_bytes(),
        LEGACY_POOL_SIZE,
    )
    .await
    .context("bind legacy datagram pool")?;

    let socket = UdpSocket::bind(("127.0.0.1", config.incoming_udp_port))
        .await
        .with_context(|| format!("listen on 127.0.0.1:{}", config.incoming_udp_port))?;
    info!(port = config.incoming_udp_port, "agent listening");

    let mut registry = Registry::default();
    let metrics = AgentMetrics::register(&mut registry);
    let tagger = Tagger {
        deployment: config.deployment.clone(),
        job: config.job.clone(),
        index: config.index.clone(),
        ip: local_ip(),
    };
    pipeline::start(socket, tagger, pool, legacy, metrics, shutdown.clone());

    wait_for_signals(&registry).await?;
    info!("shutting down");
    shutdown.cancel();
    Ok(())
}

/// Blocks until a termination signal arrives; SIGUSR1 logs a diagnostic dump
/// instead of exiting.
async fn wait_for_signals(registry: &Registry) -> anyhow::Result<()> {
    let mut dump = signal(SignalKind::user_defined1())?;
    let mut terminate = signal(SignalKind::terminate())?;
    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => return Ok(()),
            _ = terminate.recv() => return Ok(()),
            _ = dump.recv() => {
                let mut text = String::new();
                if prometheus_client::encoding::text::encode(&mut text, registry).is_ok() {
                    info!(
                        tasks = tokio::runtime::Handle::current().metrics().num_alive_tasks(),
                        metrics = %text,
                        "diagnostic dump"
                    );
                }
            }
        }
    }
}

/// Source address the host would use for egress; identity tag of last resort.
fn local_ip() -> String {
    let probe = || -> std::io::Result<String> {
        let socket = std::net::UdpSocket::bind("0.0.0.0:0")?;
        // connect() only selects a route, nothing is sent.
        socket.connect("10.255.255.255:1")?;
        Ok(socket.local_addr()?.ip().to_string())
    };
    probe().unwrap_or_else(|err| {
        warn!(error = %err, "could not determine local ip");
        "127.0.0.1".to_string()
    })
}
