//! Subscriber-facing HTTP surface.
//!
//! Session setup is the only place errors surface as status codes: 401 when
//! the authorizer refuses, 404 for an unknown tenant, 503 while discovery is
//! empty, otherwise the connection upgrades and streams.

use crate::auth::{Access, Authorizer};
use crate::fanin::{FanIn, Session, SubscribeError};
use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::extract::{Path, State};
use axum::http::{header, HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use axum::Router;
use prometheus_client::registry::Registry;
use std::sync::Arc;
use std::time::Duration;
use tracing::debug;

pub struct AppState {
    pub fanin: FanIn,
    pub authorizer: Arc<dyn Authorizer>,
    pub registry: Registry,
    pub ws_write_timeout: Duration,
}

pub fn router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/apps/:app_id/stream", get(stream_app))
        .route("/firehose/:subscriber_id", get(firehose))
        .route("/metrics", get(metrics))
        .with_state(state)
}

async fn stream_app(
    ws: Option<WebSocketUpgrade>,
    Path(app_id): Path<String>,
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
) -> Response {
    let subscriber_id = format!("app-{app_id}");
    open_stream(ws, state, headers, subscriber_id, Some(app_id)).await
}

async fn firehose(
    ws: Option<WebSocketUpgrade>,
    Path(subscriber_id): Path<String>,
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
) -> Response {
    open_stream(ws, state, headers, subscriber_id, None).await
}

async fn open_stream(
    ws: Option<WebSocketUpgrade>,
    state: Arc<AppState>,
    headers: HeaderMap,
    subscriber_id: String,
    app_id: Option<String>,
) -> Response {
    let token = headers
        .get(header::AUTHORIZATION)
        .and_then(|value| value.to_str().ok())
        .unwrap_or_default();
    match state.authorizer.authorize(token, app_id.as_deref()).await {
        Access::Granted => {}
        Access::Denied => return StatusCode::UNAUTHORIZED.into_response(),
        Access::UnknownApp => return StatusCode::NOT_FOUND.into_response(),
    }

    let session = match state.fanin.subscribe(&subscriber_id, app_id) {
        Ok(session) => session,
        Err(SubscribeError::NoAggregators) => {
            return StatusCode::SERVICE_UNAVAILABLE.into_response()
        }
    };

    match ws {
        Some(upgrade) => {
            let timeout = state.ws_write_timeout;
            upgrade.on_upgrade(move |socket| pump(socket, session, timeout))
        }
        None => StatusCode::UPGRADE_REQUIRED.into_response(),
    }
}

async fn pump(mut socket: WebSocket, mut session: Session, write_timeout: Duration) {
    loop {
        tokio::select! {
            envelope = session.next() => {
                let Some(envelope) = envelope else {
                    let _ = socket.send(Message::Close(None)).await;
                    break;
                };
                let write = socket.send(Message::Binary(envelope.to_vec()));
                match tokio::time::timeout(write_timeout, write).await {
                    Ok(Ok(())) => {}
                    Ok(Err(_)) | Err(_) => break,
                }
            }
            incoming = socket.recv() => {
                match incoming {
                    Some(Ok(_)) => {}
                    // Client went away; dropping the session cancels upstreams.
                    Some(Err(_)) | None => break,
                }
            }
        }
    }
    debug!("subscriber session ended");
}

async fn metrics(State(state): State<Arc<AppState>>) -> Response {
    let mut body = String::new();
    match prometheus_client::encoding::text::encode(&mut body, &state.registry) {
        Ok(()) => (StatusCode::OK, body).into_response(),
        Err(_) => StatusCode::INTERNAL_SERVER_ERROR.into_response(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::AllowAll;
    use crate::metrics::RouterMetrics;
    use async_trait::async_trait;
    use axum::body::Body;
    use axum::http::Request;
    use downpour_discovery::finder::Snapshot;
    use downpour_discovery::Endpoint;
    use downpour_stream::Connector;
    use std::collections::HashMap;
    use tokio::sync::watch;
    use tower::ServiceExt;

    struct Deny;

    #[async_trait]
    impl Authorizer for Deny {
        async fn authorize(&self, _token: &str, _app_id: Option<&str>) -> Access {
            Access::Denied
        }
    }

    struct NoSuchApp;

    #[async_trait]
    impl Authorizer for NoSuchApp {
        async fn authorize(&self, _token: &str, _app_id: Option<&str>) -> Access {
            Access::UnknownApp
        }
    }

    fn app(authorizer: Arc<dyn Authorizer>, snapshot: Snapshot) -> Router {
        let (_, snapshots) = watch::channel(snapshot);
        let fanin = FanIn::new(
            Connector::Plain,
            snapshots,
            Duration::from_secs(5),
            RouterMetrics::default(),
        );
        router(Arc::new(AppState {
            fanin,
            authorizer,
            registry: Registry::default(),
            ws_write_timeout: Duration::from_secs(30),
        }))
    }

    fn one_endpoint() -> Snapshot {
        let endpoint = Endpoint {
            id: "doppler-0".to_string(),
            host: "127.0.0.1".to_string(),
            ws_port: 0,
            grpc_port: 1,
            zone: "z1".to_string(),
            protocols: vec![],
        };
        Arc::new(HashMap::from([(endpoint.id.clone(), endpoint)]))
    }

    async fn get_status(app: Router, uri: &str) -> StatusCode {
        app.oneshot(Request::builder().uri(uri).body(Body::empty()).unwrap())
            .await
            .unwrap()
            .status()
    }

    #[tokio::test]
    async fn refusing_the_authorizer_yields_401() {
        let app = app(Arc::new(Deny), one_endpoint());
        assert_eq!(
            get_status(app, "/apps/app-1/stream").await,
            StatusCode::UNAUTHORIZED
        );
    }

    #[tokio::test]
    async fn an_unknown_tenant_yields_404() {
        let app = app(Arc::new(NoSuchApp), one_endpoint());
        assert_eq!(
            get_status(app, "/apps/missing/stream").await,
            StatusCode::NOT_FOUND
        );
    }

    #[tokio::test]
    async fn no_discovered_aggregators_yields_503() {
        let app = app(Arc::new(AllowAll), Snapshot::default());
        assert_eq!(
            get_status(app, "/firehose/operator").await,
            StatusCode::SERVICE_UNAVAILABLE
        );
    }

    #[tokio::test]
    async fn a_plain_request_on_a_healthy_route_must_upgrade() {
        let app = app(Arc::new(AllowAll), one_endpoint());
        assert_eq!(
            get_status(app, "/firehose/operator").await,
            StatusCode::UPGRADE_REQUIRED
        );
    }

    #[tokio::test]
    async fn metrics_are_served_as_text() {
        let app = app(Arc::new(AllowAll), Snapshot::default());
        assert_eq!(get_status(app, "/metrics").await, StatusCode::OK);
    }
}
