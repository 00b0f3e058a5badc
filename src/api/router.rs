use std::time::Duration;

use axum::extract::MatchedPath;
use axum::http::header::{HeaderValue, ACCEPT, CONTENT_TYPE, ORIGIN};
use axum::http::{HeaderName, Method, Request, Response};
use axum::routing::get;
use axum::Router;
use tower_http::cors::{AllowOrigin, Any, CorsLayer};
use tower_http::normalize_path::NormalizePathLayer;
use tower_http::request_id::{MakeRequestUuid, PropagateRequestIdLayer, SetRequestIdLayer};
use tower_http::trace::{MakeSpan, OnResponse, TraceLayer};
use tracing::Span;

use crate::api::handlers;
use crate::api::sessions;
use crate::core::{config::Settings, state::AppState};

const REQUEST_ID: &str = "x-request-id";
const HTTP_REQUESTS: &str = "examflow_http_requests_total";
const HTTP_LATENCY: &str = "examflow_http_request_duration_seconds";

pub(crate) fn router(state: AppState) -> Router {
    let settings = state.settings();
    let api_v1 = Router::new().nest("/sessions", sessions::router());

    let mut router: Router<AppState> = Router::new()
        .route("/", get(handlers::root))
        .route("/healthz", get(handlers::healthz).head(handlers::healthz));
    if settings.telemetry().prometheus_enabled {
        router = router.route("/metrics", get(handlers::metrics));
    }

    router
        .nest(&settings.api().api_v1_str, api_v1)
        .layer(NormalizePathLayer::trim_trailing_slash())
        .layer(PropagateRequestIdLayer::new(HeaderName::from_static(REQUEST_ID)))
        .layer(SetRequestIdLayer::new(HeaderName::from_static(REQUEST_ID), MakeRequestUuid))
        .layer(TraceLayer::new_for_http().make_span_with(RequestSpan).on_response(RecordResponse))
        .layer(cors_layer(settings))
        .with_state(state)
}

/// Span per request, keyed by the matched route so session ids do not explode cardinality.
#[derive(Debug, Clone, Copy)]
struct RequestSpan;

impl<B> MakeSpan<B> for RequestSpan {
    fn make_span(&mut self, request: &Request<B>) -> Span {
        let request_id = request
            .headers()
            .get(REQUEST_ID)
            .and_then(|value| value.to_str().ok())
            .unwrap_or("-");
        let route = request
            .extensions()
            .get::<MatchedPath>()
            .map(MatchedPath::as_str)
            .unwrap_or("unmatched");
        tracing::info_span!(
            "request",
            method = %request.method(),
            route,
            uri = %request.uri(),
            request_id = %request_id
        )
    }
}

#[derive(Debug, Clone, Copy)]
struct RecordResponse;

impl<B> OnResponse<B> for RecordResponse {
    fn on_response(self, response: &Response<B>, latency: Duration, _span: &Span) {
        let status = response.status().as_u16().to_string();
        metrics::counter!(HTTP_REQUESTS, "status" => status.clone()).increment(1);
        metrics::histogram!(HTTP_LATENCY, "status" => status).record(latency.as_secs_f64());
        if response.status().is_server_error() {
            tracing::warn!(status = response.status().as_u16(), ?latency, "Request failed");
        }
    }
}

fn cors_layer(settings: &Settings) -> CorsLayer {
    let origins: Vec<HeaderValue> = settings
        .cors()
        .origins
        .iter()
        .filter_map(|origin| HeaderValue::from_str(origin).ok())
        .collect();

    let base = CorsLayer::new()
        .allow_methods([Method::GET, Method::POST, Method::PUT, Method::DELETE, Method::OPTIONS])
        .allow_headers([CONTENT_TYPE, ACCEPT, ORIGIN, HeaderName::from_static(REQUEST_ID)])
        .expose_headers([HeaderName::from_static(REQUEST_ID)])
        .max_age(Duration::from_secs(3600));

    if origins.is_empty() {
        // Browsers reject a wildcard origin on credentialed requests.
        base.allow_origin(Any)
    } else {
        base.allow_credentials(true).allow_origin(AllowOrigin::list(origins))
    }
}

#[cfg(test)]
mod tests {
    use axum::{body::Body, http::Request, http::StatusCode};
    use tower::ServiceExt;

    use crate::core::metrics;
    use crate::test_support::{self, read_json, sample_exam};

    #[tokio::test]
    async fn root_returns_message() {
        let app = test_support::test_app(sample_exam()).await;

        let response = app
            .router
            .oneshot(Request::builder().uri("/").body(Body::empty()).unwrap())
            .await
            .expect("response");

        assert_eq!(response.status(), StatusCode::OK);
        let json = read_json(response).await;
        assert_eq!(json["message"], "Examflow API");
    }

    #[tokio::test]
    async fn metrics_disabled_returns_404() {
        let app = test_support::test_app(sample_exam()).await;

        let response = app
            .router
            .oneshot(Request::builder().uri("/metrics").body(Body::empty()).unwrap())
            .await
            .expect("response");

        assert_eq!(response.status(), StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn metrics_enabled_returns_200() {
        let app =
            test_support::test_app_with_env(sample_exam(), &[("PROMETHEUS_ENABLED", "1")]).await;
        metrics::init(app.state.settings()).expect("metrics init");

        let response = app
            .router
            .oneshot(Request::builder().uri("/metrics").body(Body::empty()).unwrap())
            .await
            .expect("response");

        assert_eq!(response.status(), StatusCode::OK);
    }
}
