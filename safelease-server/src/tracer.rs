use axum::{body::Body, http::Request};
use http::header::UPGRADE;
use std::time::Duration;
use tower_http::classify::{ServerErrorsAsFailures, ServerErrorsFailureClass, SharedClassifier};
use tower_http::trace::{
    DefaultOnBodyChunk, DefaultOnEos, DefaultOnResponse, MakeSpan, TraceLayer,
};
use tracing::{Level, Span, error, info};

use crate::middleware::request_context::RequestContext;

type TraceLayerType = TraceLayer<
    SharedClassifier<ServerErrorsAsFailures>,
    HttpMakeSpan,
    fn(&Request<Body>, &Span),
    DefaultOnResponse,
    DefaultOnBodyChunk,
    DefaultOnEos,
    fn(ServerErrorsFailureClass, Duration, &Span),
>;

/// Span per request, tagged with the request id and whether the request is
/// a realtime socket upgrade.
#[derive(Clone, Debug, Default)]
pub(crate) struct HttpMakeSpan;

impl<B> MakeSpan<B> for HttpMakeSpan {
    fn make_span(&mut self, request: &Request<B>) -> Span {
        let request_id = request
            .extensions()
            .get::<RequestContext>()
            .map_or_else(|| "n/a".to_string(), |ctx| ctx.request_id.clone());
        let upgrade = request
            .headers()
            .get(UPGRADE)
            .and_then(|value| value.to_str().ok())
            .unwrap_or("none");

        tracing::info_span!(
            "http_request",
            method = %request.method(),
            path = %request.uri().path(),
            request_id = %request_id,
            upgrade = %upgrade,
            status_code = tracing::field::Empty
        )
    }
}

fn on_request(req: &Request<Body>, span: &Span) {
    span.in_scope(|| {
        info!(version = ?req.version(), "started processing request");
    });
}

fn on_failure(error: ServerErrorsFailureClass, latency: Duration, span: &Span) {
    span.in_scope(|| {
        error!(error = %error, latency = ?latency, "error processing request");
    });
}

pub fn create_trace_layer() -> TraceLayerType {
    TraceLayer::new_for_http()
        .make_span_with(HttpMakeSpan)
        .on_request(on_request as fn(&Request<Body>, &Span))
        .on_response(DefaultOnResponse::new().level(Level::INFO))
        .on_failure(on_failure as fn(ServerErrorsFailureClass, Duration, &Span))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn span_is_created_for_upgrade_requests_without_context() {
        let request = Request::builder()
            .uri("/ws?token=abc")
            .header(UPGRADE, "websocket")
            .body(Body::empty())
            .unwrap();

        let span = HttpMakeSpan.make_span(&request);
        // Without a subscriber the span is disabled; building it must not panic.
        let _ = span.id();
    }

    #[tokio::test]
    async fn trace_layer_wraps_router() {
        use axum::{Router, routing::get};
        use tower::ServiceExt;

        let app = Router::new()
            .route("/", get(|| async { "ok" }))
            .layer(create_trace_layer());
        let response = app
            .oneshot(Request::builder().uri("/").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert!(response.status().is_success());
    }
}
