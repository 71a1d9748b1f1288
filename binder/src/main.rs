use anyhow::Context;
use clap::Parser;
use downpour_binder::config::Config;
use downpour_binder::drain_store::DrainStore;
use downpour_binder::emitter::MetricEmitter;
use downpour_binder::poller::{Poller, DEFAULT_TIMEOUT};
use downpour_binder::sync;
use downpour_discovery::{Elector, EtcdOptions, EtcdStore, EtcdTlsOptions};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::signal::unix::{signal, SignalKind};
use tracing::info;

#[derive(Parser)]
#[command(name = "downpour-binder", about = "Tenant drain binder")]
struct Args {
    /// Location of the binder config json file.
    #[arg(long, default_value = "config/binder.json")]
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

    let update_interval = Duration::from_secs(config.update_interval_seconds);
    let mut elector = Elector::new(config.instance_name.clone(), store.clone(), update_interval);
    let drains = DrainStore::new(
        store,
        Duration::from_secs(config.drain_url_ttl_seconds),
    );
    let poller = Poller::new(
        &config.cloud_controller_address,
        config.bulk_api_username.clone(),
        config.bulk_api_password.clone(),
        config.polling_batch_size,
        config.skip_cert_verify,
        DEFAULT_TIMEOUT,
    )
    .context("build control plane client")?;
    let emitter = MetricEmitter::new(config.metron_address.clone())
        .await
        .context("bind metric emitter")?;

    info!(instance = %config.instance_name, "binder started");

    let mut dump = signal(SignalKind::user_defined1())?;
    let mut terminate = signal(SignalKind::terminate())?;
    let mut ticker = tokio::time::interval(update_interval);
    ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
    loop {
        tokio::select! {
            _ = ticker.tick() => {
                sync::run_tick(&mut elector, &poller, &drains, &emitter).await;
            }
            _ = dump.recv() => {
                info!(
                    tasks = tokio::runtime::Handle::current().metrics().num_alive_tasks(),
                    leader = elector.is_leader(),
                    "diagnostic dump"
                );
            }
            _ = tokio::signal::ctrl_c() => break,
            _ = terminate.recv() => break,
        }
    }

    info!("shutting down");
    if elector.is_leader() {
        elector.vacate().await;
    }
    Ok(())
}
