//! One tick of the binder loop.
//!
//! The leader refreshes its claim, fetches the drain mapping, publishes it,
//! and emits poll metrics; followers do nothing. Any failure vacates
//! leadership so another instance can take over at the next tick. A partial
//! fetch is still published (the TTL reconciles eventually), but costs
//! leadership like any other failure.

use crate::drain_store::DrainStore;
use crate::emitter::MetricEmitter;
use crate::poller::Poller;
use downpour_discovery::Elector;
use tracing::{info, warn};

pub async fn run_tick(
    elector: &mut Elector,
    poller: &Poller,
    drains: &DrainStore,
    emitter: &MetricEmitter,
) {
    if elector.is_leader() {
        if let Err(err) = elector.stay_as_leader().await {
            warn!(error = %err, "error staying leader");
            elector.vacate().await;
            return;
        }
    } else {
        if let Err(err) = elector.run_for_election().await {
            warn!(error = %err, "error running for election");
            elector.vacate().await;
            return;
        }
        if !elector.is_leader() {
            return;
        }
    }

    let outcome = poller.poll().await;
    if let Err(err) = drains.update(&outcome.drains).await {
        warn!(error = %err, "error updating the drain store");
        elector.vacate().await;
        return;
    }
    if let Some(err) = outcome.error {
        warn!(error = %err, published = outcome.drains.len(), "poll ended early; published the partial mapping");
        elector.vacate().await;
        return;
    }

    let total_drains: usize = outcome.drains.values().map(Vec::len).sum();
    emitter.emit_counter("pollCount", 1).await;
    emitter
        .emit_value("totalDrains", total_drains as f64, "drains")
        .await;
    info!(apps = outcome.drains.len(), drains = total_drains, "drains published");
}
