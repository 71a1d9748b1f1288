//! End-to-end proxy test: discovered aggregators in, WebSocket frames out.

use bytes::Bytes;
use downpour_discovery::{Endpoint, Finder, MemoryStore, Store};
use downpour_router::auth::AllowAll;
use downpour_router::fanin::FanIn;
use downpour_router::metrics::RouterMetrics;
use downpour_router::server::{self, AppState};
use downpour_stream::{Connector, SubscribeRequest};
use downpour_types::{codec, v1};
use futures::{SinkExt, StreamExt};
use prometheus_client::registry::Registry;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpListener;
use tokio_tungstenite::connect_async;
use tokio_tungstenite::tungstenite::Message;

fn counter_envelope() -> v1::Envelope {
    v1::Envelope {
        origin: "doppler".to_string(),
        deployment: "cf".to_string(),
        job: "doppler".to_string(),
        index: "0".to_string(),
        ip: "10.0.0.1".to_string(),
        timestamp: 42,
        event: v1::Event::CounterEvent(v1::CounterEvent {
            name: "ingress".to_string(),
            delta: 1,
            total: 10,
        }),
    }
}

/// Accepts subscribers and streams the same marshaled envelope to each.
async fn fake_aggregator(payload: Vec<u8>) -> String {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap().to_string();
    tokio::spawn(async move {
        loop {
            let Ok((socket, _)) = listener.accept().await else { return };
            let payload = payload.clone();
            tokio::spawn(async move {
                let mut stream = downpour_stream::framed(socket);
                let Some(Ok(subscribe)) = stream.next().await else { return };
                assert!(SubscribeRequest::decode(&subscribe).is_some());
                let mut ticker = tokio::time::interval(Duration::from_millis(20));
                loop {
                    ticker.tick().await;
                    if stream.send(Bytes::from(payload.clone())).await.is_err() {
                        return;
                    }
                }
            });
        }
    });
    addr
}

#[tokio::test]
async fn streams_discovered_aggregators_to_a_websocket_subscriber() {
    let payload = codec::marshal(&counter_envelope()).unwrap();
    let aggregator_addr = fake_aggregator(payload.clone()).await;

    let store = Arc::new(MemoryStore::new());
    let (host, port) = aggregator_addr.rsplit_once(':').unwrap();
    let endpoint = Endpoint {
        id: "doppler-0".to_string(),
        host: host.to_string(),
        ws_port: 0,
        grpc_port: port.parse().unwrap(),
        zone: "z1".to_string(),
        protocols: vec![],
    };
    store
        .put(
            "/meta/doppler/z1/doppler-0/0",
            Bytes::from(serde_json::to_vec(&endpoint).unwrap()),
            None,
        )
        .await
        .unwrap();

    let finder = Finder::start(store.clone(), "/meta/doppler");
    let mut snapshots = finder.snapshots();
    tokio::time::timeout(Duration::from_secs(5), async {
        while snapshots.borrow_and_update().is_empty() {
            snapshots.changed().await.unwrap();
        }
    })
    .await
    .expect("aggregator discovered");

    let fanin = FanIn::new(
        Connector::Plain,
        finder.snapshots(),
        Duration::from_secs(5),
        RouterMetrics::default(),
    );
    let app = server::router(Arc::new(AppState {
        fanin,
        authorizer: Arc::new(AllowAll),
        registry: Registry::default(),
        ws_write_timeout: Duration::from_secs(5),
    }));

    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let proxy_addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });

    let (mut socket, _) = connect_async(format!("ws://{proxy_addr}/firehose/operator"))
        .await
        .expect("websocket upgrade");
    let message = tokio::time::timeout(Duration::from_secs(5), socket.next())
        .await
        .expect("an envelope frame")
        .unwrap()
        .unwrap();

    match message {
        Message::Binary(bytes) => {
            assert_eq!(bytes, payload);
            assert_eq!(codec::unmarshal(&bytes).unwrap(), counter_envelope());
        }
        other => panic!("unexpected message: {other:?}"),
    }
}
