//! Pairs http start and stop events by request id.
//!
//! Unpaired starts wait in a bounded table: the oldest entry is evicted on
//! overflow, and entries past their TTL expire on the next apply. Unmatched
//! stops are dropped. Everything else passes straight through.

use downpour_types::v1;
use prometheus_client::metrics::counter::Counter;
use std::collections::{HashMap, VecDeque};
use std::time::Duration;
use tokio::time::Instant;
use uuid::Uuid;

struct Pending {
    start: v1::HttpStart,
    at: Instant,
}

pub struct Aggregator {
    pending: HashMap<Uuid, Pending>,
    /// Insertion order; ids already matched linger here until popped.
    order: VecDeque<Uuid>,
    capacity: usize,
    ttl: Duration,
    unmatched_stops: Counter,
    evicted_starts: Counter,
}

impl Aggregator {
    pub fn new(
        capacity: usize,
        ttl: Duration,
        unmatched_stops: Counter,
        evicted_starts: Counter,
    ) -> Self {
        Self {
            pending: HashMap::new(),
            order: VecDeque::new(),
            capacity: capacity.max(1),
            ttl,
            unmatched_stops,
            evicted_starts,
        }
    }

    pub fn apply(&mut self, envelope: v1::Envelope) -> Option<v1::Envelope> {
        self.expire();
        let v1::Envelope {
            origin,
            deployment,
            job,
            index,
            ip,
            timestamp,
            event,
        } = envelope;
        match event {
            v1::Event::HttpStart(start) => {
                if self.pending.len() >= self.capacity {
                    self.evict_oldest();
                }
                let id = start.request_id;
                let pending = Pending {
                    start,
                    at: Instant::now(),
                };
                if self.pending.insert(id, pending).is_none() {
                    self.order.push_back(id);
                }
                None
            }
            v1::Event::HttpStop(stop) => match self.pending.remove(&stop.request_id) {
                Some(pending) => Some(v1::Envelope {
                    origin,
                    deployment,
                    job,
                    index,
                    ip,
                    timestamp,
                    event: v1::Event::HttpStartStop(combine(pending.start, stop)),
                }),
                None => {
                    self.unmatched_stops.inc();
                    None
                }
            },
            event => Some(v1::Envelope {
                origin,
                deployment,
                job,
                index,
                ip,
                timestamp,
                event,
            }),
        }
    }

    fn evict_oldest(&mut self) {
        while let Some(id) = self.order.pop_front() {
            if self.pending.remove(&id).is_some() {
                self.evicted_starts.inc();
                return;
            }
        }
    }

    fn expire(&mut self) {
        let now = Instant::now();
        while let Some(id) = self.order.front().copied() {
            match self.pending.get(&id) {
                Some(pending) if now.duration_since(pending.at) >= self.ttl => {
                    self.pending.remove(&id);
                    self.order.pop_front();
                    self.evicted_starts.inc();
                }
                Some(_) => return,
                None => {
                    // Already matched; discard the stale order entry.
                    self.order.pop_front();
                }
            }
        }
    }
}

fn combine(start: v1::HttpStart, stop: v1::HttpStop) -> v1::HttpStartStop {
    v1::HttpStartStop {
        start_timestamp: start.timestamp,
        stop_timestamp: stop.timestamp,
        request_id: stop.request_id,
        method: start.method,
        uri: if start.uri.is_empty() { stop.uri } else { start.uri },
        remote_address: start.remote_address,
        user_agent: start.user_agent,
        status_code: stop.status_code,
        content_length: stop.content_length,
        instance_index: start.instance_index,
    }
}
