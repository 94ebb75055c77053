// wx_datadog - Forward weather station observations to Datadog as metrics
//
// Copyright 2024 Nick Pillitteri
//
// This program is free software: you can redistribute it and/or modify
// it under the terms of the GNU General Public License as published by
// the Free Software Foundation, either version 3 of the License, or
// (at your option) any later version.
//
// This program is distributed in the hope that it will be useful,
// but WITHOUT ANY WARRANTY; without even the implied warranty of
// MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE.  See the
// GNU General Public License for more details.
//
// You should have received a copy of the GNU General Public License
// along with this program.  If not, see <http://www.gnu.org/licenses/>.
//

use crate::bridge::EventBridge;
use crate::record::Fields;
use axum::extract::State;
use axum::http::header::CONTENT_TYPE;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use prometheus_client::encoding::text::encode;
use prometheus_client::registry::Registry;
use std::sync::Arc;
use tower_http::trace::TraceLayer;

const TEXT_FORMAT: &str = "application/openmetrics-text; version=1.0.0; charset=utf-8";

/// Shared state for HTTP handlers: the registry to expose and the bridge
/// that receives events from the host.
pub struct RequestContext {
    registry: Registry,
    bridge: EventBridge,
}

impl RequestContext {
    pub fn new(registry: Registry, bridge: EventBridge) -> Self {
        Self { registry, bridge }
    }

    pub fn bridge(&self) -> &EventBridge {
        &self.bridge
    }
}

/// Routes for host events (`POST /loop`, `POST /archive`) and self metrics (`GET /metrics`).
pub fn app(context: Arc<RequestContext>) -> Router {
    Router::new()
        .route("/loop", post(new_loop_packet))
        .route("/archive", post(new_archive_record))
        .route("/metrics", get(text_metrics))
        .layer(TraceLayer::new_for_http())
        .with_state(context)
}

async fn new_loop_packet(State(context): State<Arc<RequestContext>>, Json(packet): Json<Fields>) -> StatusCode {
    queued_status(context.bridge.new_loop_packet(&packet))
}

async fn new_archive_record(State(context): State<Arc<RequestContext>>, Json(record): Json<Fields>) -> StatusCode {
    queued_status(context.bridge.new_archive_record(&record))
}

fn queued_status(queued: bool) -> StatusCode {
    if queued {
        StatusCode::ACCEPTED
    } else {
        StatusCode::NO_CONTENT
    }
}

async fn text_metrics(State(context): State<Arc<RequestContext>>) -> Response {
    let mut buf = String::new();

    match encode(&mut buf, &context.registry) {
        Ok(_) => {
            tracing::debug!(message = "encoded prometheus metrics to text format", num_bytes = buf.len());
            ([(CONTENT_TYPE, TEXT_FORMAT)], buf).into_response()
        }
        Err(e) => {
            tracing::error!(message = "error encoding metrics", error = %e);
            StatusCode::SERVICE_UNAVAILABLE.into_response()
        }
    }
}

#[cfg(test)]
mod test {
    use super::{app, RequestContext};
    use crate::bridge::EventBridge;
    use crate::config::Bindings;
    use crate::metrics::UploaderMetrics;
    use crate::queue::{queue, Envelope, QueueReceiver};
    use crate::record::Binding;
    use axum::body::Body;
    use axum::http::{Method, Request, StatusCode};
    use prometheus_client::registry::Registry;
    use std::sync::Arc;
    use tower::ServiceExt;

    fn context(bindings: Bindings) -> (Arc<RequestContext>, QueueReceiver) {
        let mut registry = Registry::default();
        let metrics = UploaderMetrics::new(&mut registry);
        let (tx, rx) = queue();
        let bridge = EventBridge::new(tx, bindings, metrics);

        (Arc::new(RequestContext::new(registry, bridge)), rx)
    }

    fn post(uri: &str, body: &'static str) -> Request<Body> {
        Request::builder()
            .method(Method::POST)
            .uri(uri)
            .header("content-type", "application/json")
            .body(Body::from(body))
            .unwrap()
    }

    #[tokio::test]
    async fn test_archive_queued() {
        let (context, mut rx) = context(Bindings::archive());
        let res = app(context)
            .oneshot(post("/archive", r#"{"dateTime": 1000, "usUnits": 1, "outTemp": 32.5, "windDir": null}"#))
            .await
            .unwrap();

        assert_eq!(StatusCode::ACCEPTED, res.status());
        match rx.get().await {
            Some(Envelope::Record(r)) => {
                assert_eq!(Some(Binding::Archive), r.binding());
                assert_eq!(Some(1000), r.timestamp());
                assert_eq!(5, r.len());
            }
            other => panic!("unexpected entry {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_unbound_loop_ignored() {
        let (context, _rx) = context(Bindings::archive());
        let res = app(context)
            .oneshot(post("/loop", r#"{"dateTime": 1000, "outTemp": 32.5}"#))
            .await
            .unwrap();

        assert_eq!(StatusCode::NO_CONTENT, res.status());
    }

    #[tokio::test]
    async fn test_malformed_body() {
        let (context, _rx) = context(Bindings::all());
        let res = app(context).oneshot(post("/loop", "[1, 2, 3]")).await.unwrap();

        assert!(res.status().is_client_error());
    }

    #[tokio::test]
    async fn test_metrics() {
        let (context, _rx) = context(Bindings::all());
        let req = Request::builder()
            .method(Method::GET)
            .uri("/metrics")
            .body(Body::empty())
            .unwrap();
        let res = app(context).oneshot(req).await.unwrap();

        assert_eq!(StatusCode::OK, res.status());
    }
}
