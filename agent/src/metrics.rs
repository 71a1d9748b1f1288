use prometheus_client::encoding::EncodeLabelSet;
use prometheus_client::metrics::counter::Counter;
use prometheus_client::metrics::family::Family;
use prometheus_client::registry::Registry;

#[derive(Clone, Debug, Hash, PartialEq, Eq, EncodeLabelSet)]
pub struct StageLabels {
    pub stage: String,
}

/// Counters for every loss point in the forwarder; the pipeline never
/// surfaces an error past a stage, it counts instead.
#[derive(Clone)]
pub struct AgentMetrics {
    pub received: Counter,
    pub unmarshal_errors: Counter,
    pub channel_drops: Family<StageLabels, Counter>,
    pub unmatched_stops: Counter,
    pub evicted_starts: Counter,
    pub sent_streaming: Counter,
    pub sent_datagram: Counter,
    pub egress_dropped: Counter,
}

impl AgentMetrics {
    pub fn register(registry: &mut Registry) -> Self {
        let metrics = Self {
            received: Counter::default(),
            unmarshal_errors: Counter::default(),
            channel_drops: Family::default(),
            unmatched_stops: Counter::default(),
            evicted_starts: Counter::default(),
            sent_streaming: Counter::default(),
            sent_datagram: Counter::default(),
            egress_dropped: Counter::default(),
        };
        registry.register(
            "ingress_received",
            "Datagrams read off the local socket.",
            metrics.received.clone(),
        );
        registry.register(
            "unmarshal_errors",
            "Datagrams that failed to decode into an envelope.",
            metrics.unmarshal_errors.clone(),
        );
        registry.register(
            "channel_drops",
            "Envelopes dropped because a stage channel was full.",
            metrics.channel_drops.clone(),
        );
        registry.register(
            "unmatched_stops",
            "Http stop events without a pending start.",
            metrics.unmatched_stops.clone(),
        );
        registry.register(
            "evicted_starts",
            "Pending http starts evicted by capacity or age.",
            metrics.evicted_starts.clone(),
        );
        registry.register(
            "egress_sent_streaming",
            "Envelopes written to the streaming pool.",
            metrics.sent_streaming.clone(),
        );
        registry.register(
            "egress_sent_datagram",
            "Envelopes that fell back to the legacy datagram pool.",
            metrics.sent_datagram.clone(),
        );
        registry.register(
            "egress_dropped",
            "Envelopes lost after both egress paths failed.",
            metrics.egress_dropped.clone(),
        );
        metrics
    }

    pub fn drop_for(&self, stage: &'static str) {
        self.channel_drops
            .get_or_create(&StageLabels {
                stage: stage.to_string(),
            })
            .inc();
    }
}

impl Default for AgentMetrics {
    fn default() -> Self {
        Self::register(&mut Registry::default())
    }
}
