use prometheus_client::metrics::gauge::Gauge;
use prometheus_client::registry::Registry;
use std::sync::atomic::{AtomicI64, AtomicU64};
use std::time::Duration;
use sysinfo::{Pid, ProcessesToUpdate, System};
use tokio_util::sync::CancellationToken;

const UPDATE_INTERVAL: Duration = Duration::from_secs(5);

/// Samples process gauges on an interval until shutdown.
pub fn spawn_process_metrics(registry: &mut Registry, shutdown: CancellationToken) {
    // Use i64 since prometheus-client doesn't implement EncodeGaugeValue for u64.
    let rss_bytes: Gauge<i64, AtomicI64> = Gauge::default();
    let virtual_bytes: Gauge<i64, AtomicI64> = Gauge::default();
    let cpu_percent: Gauge<f64, AtomicU64> = Gauge::default();

    registry.register(
        "process_rss_bytes",
        "Resident set size in bytes.",
        rss_bytes.clone(),
    );
    registry.register(
        "process_virtual_bytes",
        "Virtual memory size in bytes.",
        virtual_bytes.clone(),
    );
    registry.register(
        "process_cpu_percent",
        "Process CPU usage percentage.",
        cpu_percent.clone(),
    );

    tokio::spawn(async move {
        let pid = Pid::from_u32(std::process::id());
        let mut system = System::new();
        loop {
            system.refresh_cpu_all();
            system.refresh_processes(ProcessesToUpdate::Some(&[pid]), true);
            if let Some(process) = system.process(pid) {
                rss_bytes.set(process.memory() as i64);
                virtual_bytes.set(process.virtual_memory() as i64);
                cpu_percent.set(process.cpu_usage() as f64);
            }
            tokio::select! {
                _ = shutdown.cancelled() => return,
                _ = tokio::time::sleep(UPDATE_INTERVAL) => {}
            }
        }
    });
}
