//! Bidirectional translation between the v1 and v2 envelope schemas.
//!
//! Conversion is total on well-formed input and yields nothing on input that
//! cannot be represented on the other side. For every v1 envelope whose
//! variant is representable in v2, `to_v1(&to_v2(e))` reproduces `e` on its
//! observable fields.

use crate::{v1, v2};
use std::collections::HashMap;
use uuid::Uuid;

const TAG_SOURCE_TYPE: &str = "source_type";
const TAG_REQUEST_ID: &str = "request_id";
const TAG_METHOD: &str = "method";
const TAG_URI: &str = "uri";
const TAG_REMOTE_ADDRESS: &str = "remote_address";
const TAG_USER_AGENT: &str = "user_agent";
const TAG_STATUS_CODE: &str = "status_code";
const TAG_CONTENT_LENGTH: &str = "content_length";
const TAG_INSTANCE_INDEX: &str = "instance_index";

/// Gauge names that together form a container metric, and their unit tags.
const CONTAINER_METRIC_FIELDS: [(&str, &str); 6] = [
    ("instance_index", "index"),
    ("cpu", "percentage"),
    ("memory", "bytes"),
    ("disk", "bytes"),
    ("memory_quota", "bytes"),
    ("disk_quota", "bytes"),
];

/// Translates a v1 envelope into v2.
///
/// `HttpStart`, `HttpStop` and `Error` have no v2 counterpart (starts and
/// stops only cross the tier once paired) and yield `None`.
pub fn to_v2(envelope: &v1::Envelope) -> Option<v2::Envelope> {
    let mut tags = HashMap::new();
    tags.insert(v2::TAG_ORIGIN.to_string(), envelope.origin.clone());
    tags.insert(v2::TAG_DEPLOYMENT.to_string(), envelope.deployment.clone());
    tags.insert(v2::TAG_JOB.to_string(), envelope.job.clone());
    tags.insert(v2::TAG_INDEX.to_string(), envelope.index.clone());
    tags.insert(v2::TAG_IP.to_string(), envelope.ip.clone());

    let source_id = envelope
        .app_id()
        .unwrap_or(&envelope.origin)
        .to_string();
    let mut instance_id = String::new();

    let message = match &envelope.event {
        v1::Event::LogMessage(log) => {
            instance_id = log.source_instance.clone();
            tags.insert(TAG_SOURCE_TYPE.to_string(), log.source_type.clone());
            v2::Message::Log(v2::Log {
                payload: log.message.clone(),
                log_type: match log.message_type {
                    v1::MessageType::Out => v2::LogType::Out,
                    v1::MessageType::Err => v2::LogType::Err,
                },
            })
        }
        v1::Event::CounterEvent(counter) => v2::Message::Counter(v2::Counter {
            name: counter.name.clone(),
            delta: counter.delta,
            total: counter.total,
        }),
        v1::Event::ValueMetric(metric) => {
            let mut metrics = HashMap::new();
            metrics.insert(
                metric.name.clone(),
                v2::GaugeValue {
                    unit: metric.unit.clone(),
                    value: metric.value,
                },
            );
            v2::Message::Gauge(v2::Gauge { metrics })
        }
        v1::Event::ContainerMetric(metric) => {
            let values = [
                f64::from(metric.instance_index),
                metric.cpu_percentage,
                metric.memory_bytes as f64,
                metric.disk_bytes as f64,
                metric.memory_bytes_quota as f64,
                metric.disk_bytes_quota as f64,
            ];
            let metrics = CONTAINER_METRIC_FIELDS
                .iter()
                .zip(values)
                .map(|((name, unit), value)| {
                    (
                        name.to_string(),
                        v2::GaugeValue {
                            unit: unit.to_string(),
                            value,
                        },
                    )
                })
                .collect();
            v2::Message::Gauge(v2::Gauge { metrics })
        }
        v1::Event::HttpStartStop(http) => {
            tags.insert(TAG_REQUEST_ID.to_string(), http.request_id.to_string());
            tags.insert(TAG_METHOD.to_string(), http.method.clone());
            tags.insert(TAG_URI.to_string(), http.uri.clone());
            tags.insert(TAG_REMOTE_ADDRESS.to_string(), http.remote_address.clone());
            tags.insert(TAG_USER_AGENT.to_string(), http.user_agent.clone());
            tags.insert(TAG_STATUS_CODE.to_string(), http.status_code.to_string());
            tags.insert(
                TAG_CONTENT_LENGTH.to_string(),
                http.content_length.to_string(),
            );
            tags.insert(
                TAG_INSTANCE_INDEX.to_string(),
                http.instance_index.to_string(),
            );
            v2::Message::Timer(v2::Timer {
                name: "http".to_string(),
                start: http.start_timestamp,
                stop: http.stop_timestamp,
            })
        }
        v1::Event::HttpStart(_) | v1::Event::HttpStop(_) | v1::Event::Error(_) => return None,
    };

    Some(v2::Envelope {
        timestamp: envelope.timestamp,
        source_id,
        instance_id,
        tags,
        message,
    })
}

/// Translates a v2 envelope into its v1 representation.
///
/// A gauge whose metric names are exactly the container-metric set becomes a
/// single `ContainerMetric`; any other gauge fans out into one `ValueMetric`
/// per entry carrying a unit. An empty vec means nothing was convertible.
pub fn to_v1(envelope: &v2::Envelope) -> Vec<v1::Envelope> {
    let base = |event| v1::Envelope {
        origin: envelope.tag(v2::TAG_ORIGIN).to_string(),
        deployment: envelope.tag(v2::TAG_DEPLOYMENT).to_string(),
        job: envelope.tag(v2::TAG_JOB).to_string(),
        index: envelope.tag(v2::TAG_INDEX).to_string(),
        ip: envelope.tag(v2::TAG_IP).to_string(),
        timestamp: envelope.timestamp,
        event,
    };

    match &envelope.message {
        v2::Message::Log(log) => vec![base(v1::Event::LogMessage(v1::LogMessage {
            message: log.payload.clone(),
            message_type: match log.log_type {
                v2::LogType::Out => v1::MessageType::Out,
                v2::LogType::Err => v1::MessageType::Err,
            },
            timestamp: envelope.timestamp,
            app_id: envelope.source_id.clone(),
            source_type: envelope.tag(TAG_SOURCE_TYPE).to_string(),
            source_instance: envelope.instance_id.clone(),
        }))],
        v2::Message::Counter(counter) => {
            vec![base(v1::Event::CounterEvent(v1::CounterEvent {
                name: counter.name.clone(),
                delta: counter.delta,
                total: counter.total,
            }))]
        }
        v2::Message::Timer(timer) => {
            let request_id = match Uuid::parse_str(envelope.tag(TAG_REQUEST_ID)) {
                Ok(id) => id,
                Err(_) => return Vec::new(),
            };
            vec![base(v1::Event::HttpStartStop(v1::HttpStartStop {
                start_timestamp: timer.start,
                stop_timestamp: timer.stop,
                request_id,
                method: envelope.tag(TAG_METHOD).to_string(),
                uri: envelope.tag(TAG_URI).to_string(),
                remote_address: envelope.tag(TAG_REMOTE_ADDRESS).to_string(),
                user_agent: envelope.tag(TAG_USER_AGENT).to_string(),
                status_code: envelope.tag(TAG_STATUS_CODE).parse().unwrap_or_default(),
                content_length: envelope
                    .tag(TAG_CONTENT_LENGTH)
                    .parse()
                    .unwrap_or_default(),
                instance_index: envelope
                    .tag(TAG_INSTANCE_INDEX)
                    .parse()
                    .unwrap_or_default(),
            }))]
        }
        v2::Message::Gauge(gauge) => {
            if let Some(metric) = container_metric(envelope, gauge) {
                return vec![base(v1::Event::ContainerMetric(metric))];
            }
            let mut names: Vec<&String> = gauge.metrics.keys().collect();
            names.sort();
            names
                .into_iter()
                .filter_map(|name| {
                    let value = &gauge.metrics[name];
                    if value.unit.is_empty() {
                        return None;
                    }
                    Some(base(v1::Event::ValueMetric(v1::ValueMetric {
                        name: name.clone(),
                        value: value.value,
                        unit: value.unit.clone(),
                    })))
                })
                .collect()
        }
    }
}

fn container_metric(envelope: &v2::Envelope, gauge: &v2::Gauge) -> Option<v1::ContainerMetric> {
    if gauge.metrics.len() != CONTAINER_METRIC_FIELDS.len() {
        return None;
    }
    let field = |name: &str| gauge.metrics.get(name).map(|v| v.value);
    Some(v1::ContainerMetric {
        application_id: envelope.source_id.clone(),
        instance_index: field("instance_index")? as i32,
        cpu_percentage: field("cpu")?,
        memory_bytes: field("memory")? as u64,
        disk_bytes: field("disk")? as u64,
        memory_bytes_quota: field("memory_quota")? as u64,
        disk_bytes_quota: field("disk_quota")? as u64,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{v1, v2};
    use std::collections::HashMap;

    fn gauge_envelope(metrics: HashMap<String, v2::GaugeValue>) -> v2::Envelope {
        v2::Envelope {
            timestamp: 1_000,
            source_id: "some-id".to_string(),
            instance_id: String::new(),
            tags: HashMap::new(),
            message: v2::Message::Gauge(v2::Gauge { metrics }),
        }
    }

    fn gauge_value(unit: &str, value: f64) -> v2::GaugeValue {
        v2::GaugeValue {
            unit: unit.to_string(),
            value,
        }
    }

    #[test]
    fn container_metric_gauge_converts_to_v1_container_metric() {
        let metrics = HashMap::from([
            ("instance_index".to_string(), gauge_value("index", 123.0)),
            ("cpu".to_string(), gauge_value("percentage", 11.0)),
            ("memory".to_string(), gauge_value("bytes", 13.0)),
            ("disk".to_string(), gauge_value("bytes", 15.0)),
            ("memory_quota".to_string(), gauge_value("bytes", 17.0)),
            ("disk_quota".to_string(), gauge_value("bytes", 19.0)),
        ]);

        let converted = to_v1(&gauge_envelope(metrics));

        assert_eq!(converted.len(), 1);
        assert_eq!(
            converted[0].event,
            v1::Event::ContainerMetric(v1::ContainerMetric {
                application_id: "some-id".to_string(),
                instance_index: 123,
                cpu_percentage: 11.0,
                memory_bytes: 13,
                disk_bytes: 15,
                memory_bytes_quota: 17,
                disk_bytes_quota: 19,
            })
        );
    }

    #[test]
    fn partial_gauge_yields_nothing() {
        let metrics = HashMap::from([
            ("cpu".to_string(), gauge_value("", 99.0)),
            ("memory".to_string(), gauge_value("", 101.0)),
        ]);

        assert!(to_v1(&gauge_envelope(metrics)).is_empty());
    }

    #[test]
    fn other_gauge_compositions_fan_out_per_entry() {
        let metrics = HashMap::from([
            ("latency".to_string(), gauge_value("ms", 42.0)),
            ("queue_depth".to_string(), gauge_value("entries", 7.0)),
            ("broken".to_string(), gauge_value("", 1.0)),
        ]);

        let converted = to_v1(&gauge_envelope(metrics));

        let names: Vec<_> = converted
            .iter()
            .map(|e| match &e.event {
                v1::Event::ValueMetric(m) => m.name.as_str(),
                other => panic!("unexpected event: {other:?}"),
            })
            .collect();
        assert_eq!(names, vec!["latency", "queue_depth"]);
    }

    #[test]
    fn timer_with_malformed_request_id_yields_nothing() {
        let envelope = v2::Envelope {
            timestamp: 5,
            source_id: "origin".to_string(),
            instance_id: String::new(),
            tags: HashMap::from([("request_id".to_string(), "not-a-uuid".to_string())]),
            message: v2::Message::Timer(v2::Timer {
                name: "http".to_string(),
                start: 1,
                stop: 2,
            }),
        };

        assert!(to_v1(&envelope).is_empty());
    }

    #[test]
    fn unpaired_http_events_have_no_v2_representation() {
        let envelope = base_v1(v1::Event::HttpStart(v1::HttpStart {
            timestamp: 1,
            request_id: uuid::Uuid::new_v4(),
            method: "GET".to_string(),
            uri: "/".to_string(),
            remote_address: String::new(),
            user_agent: String::new(),
            instance_index: 0,
        }));

        assert!(to_v2(&envelope).is_none());
    }

    fn base_v1(event: v1::Event) -> v1::Envelope {
        v1::Envelope {
            origin: "router".to_string(),
            deployment: "cf".to_string(),
            job: "router".to_string(),
            index: "0".to_string(),
            ip: "10.0.0.1".to_string(),
            timestamp: 1_000,
            event,
        }
    }

    fn assert_round_trip(event: v1::Event) {
        let envelope = base_v1(event);
        let v2 = to_v2(&envelope).expect("representable variant");
        assert_eq!(to_v1(&v2), vec![envelope]);
    }

    #[test]
    fn round_trips_log_messages() {
        assert_round_trip(v1::Event::LogMessage(v1::LogMessage {
            message: b"out of memory".to_vec(),
            message_type: v1::MessageType::Err,
            timestamp: 1_000,
            app_id: "app-1".to_string(),
            source_type: "APP".to_string(),
            source_instance: "2".to_string(),
        }));
    }

    #[test]
    fn round_trips_counters() {
        assert_round_trip(v1::Event::CounterEvent(v1::CounterEvent {
            name: "ingress".to_string(),
            delta: 10,
            total: 100,
        }));
    }

    #[test]
    fn round_trips_value_metrics() {
        assert_round_trip(v1::Event::ValueMetric(v1::ValueMetric {
            name: "latency".to_string(),
            value: 1.5,
            unit: "ms".to_string(),
        }));
    }

    #[test]
    fn round_trips_container_metrics() {
        assert_round_trip(v1::Event::ContainerMetric(v1::ContainerMetric {
            application_id: "app-1".to_string(),
            instance_index: 3,
            cpu_percentage: 2.5,
            memory_bytes: 1024,
            disk_bytes: 2048,
            memory_bytes_quota: 4096,
            disk_bytes_quota: 8192,
        }));
    }

    #[test]
    fn round_trips_paired_http_traces() {
        assert_round_trip(v1::Event::HttpStartStop(v1::HttpStartStop {
            start_timestamp: 900,
            stop_timestamp: 1_000,
            request_id: uuid::Uuid::new_v4(),
            method: "GET".to_string(),
            uri: "/v2/apps".to_string(),
            remote_address: "10.0.0.2:4443".to_string(),
            user_agent: "curl".to_string(),
            status_code: 200,
            content_length: 42,
            instance_index: 1,
        }));
    }
}
