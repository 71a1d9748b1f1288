use prometheus_client::metrics::counter::Counter;
use prometheus_client::registry::Registry;

#[derive(Clone)]
pub struct RouterMetrics {
    pub subscriptions: Counter,
    pub upstreams_opened: Counter,
    pub upstreams_closed: Counter,
    pub dial_failures: Counter,
    pub slow_consumer_drops: Counter,
}

impl RouterMetrics {
    pub fn register(registry: &mut Registry) -> Self {
        let metrics = Self {
            subscriptions: Counter::default(),
            upstreams_opened: Counter::default(),
            upstreams_closed: Counter::default(),
            dial_failures: Counter::default(),
            slow_consumer_drops: Counter::default(),
        };
        registry.register(
            "subscriptions",
            "Subscriber sessions opened.",
            metrics.subscriptions.clone(),
        );
        registry.register(
            "upstreams_opened",
            "Aggregator streams joined into sessions.",
            metrics.upstreams_opened.clone(),
        );
        registry.register(
            "upstreams_closed",
            "Aggregator streams torn down, for any reason.",
            metrics.upstreams_closed.clone(),
        );
        registry.register(
            "upstream_dial_failures",
            "Aggregators absent from a fan-in because the dial failed.",
            metrics.dial_failures.clone(),
        );
        registry.register(
            "slow_consumer_drops",
            "Envelopes dropped because a subscriber could not keep up.",
            metrics.slow_consumer_drops.clone(),
        );
        metrics
    }
}

impl Default for RouterMetrics {
    fn default() -> Self {
        Self::register(&mut Registry::default())
    }
}
