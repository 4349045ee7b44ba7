//! HTTP surface: introduction page, bookmarklet landing, conversion.

use axum::Router;
use axum::extract::Path;
use axum::extract::RawQuery;
use axum::extract::State;
use axum::http::HeaderMap;
use axum::http::StatusCode;
use axum::http::header;
use axum::response::Html;
use axum::response::IntoResponse;
use axum::response::Response;
use axum::routing::get;
use gk_core::RelayError;
use gk_relay::ConvertOutcome;
use gk_relay::Relay;
use gk_relay::TargetAddress;
use gk_relay::forwarding_path;
use tower_http::trace::TraceLayer;
use url::form_urlencoded;

const INDEX_TEMPLATE: &str = include_str!("../static/index.html");

#[derive(Clone)]
pub struct AppState {
    relay: Relay,
    /// Used when a request carries no usable `Host` header.
    public_host: String,
}

impl AppState {
    pub fn new(relay: Relay, public_host: String) -> Self {
        Self { relay, public_host }
    }

    fn service_host(&self, headers: &HeaderMap) -> String {
        headers
            .get(header::HOST)
            .and_then(|value| value.to_str().ok())
            .filter(|host| is_plain_host(host))
            .unwrap_or(&self.public_host)
            .to_owned()
    }
}

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/", get(index))
        .route("/soup", get(land))
        .route("/soup/{protocol}/{domain}", get(soup_root))
        .route("/soup/{protocol}/{domain}/", get(soup_root))
        .route("/soup/{protocol}/{domain}/{*path}", get(soup))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

async fn index(State(state): State<AppState>, headers: HeaderMap) -> Html<String> {
    Html(INDEX_TEMPLATE.replace("{{service_host}}", &state.service_host(&headers)))
}

async fn land(RawQuery(query): RawQuery) -> Response {
    let source = query.as_deref().and_then(|raw| {
        form_urlencoded::parse(raw.as_bytes())
            .find(|(key, _)| key == "source")
            .map(|(_, value)| value.into_owned())
    });

    let Some(source) = source else {
        return found("/");
    };

    match forwarding_path(&source) {
        Ok(endpoint) => found(&endpoint),
        Err(error) => {
            tracing::info!(%source, %error, "rejected landing source");
            error_page("invalid source URL")
        }
    }
}

async fn soup_root(
    State(state): State<AppState>,
    Path((protocol, domain)): Path<(String, String)>,
    RawQuery(query): RawQuery,
    headers: HeaderMap,
) -> Response {
    convert(state, &headers, TargetAddress::from_route(&protocol, &domain, "/", query_pairs(query)))
        .await
}

async fn soup(
    State(state): State<AppState>,
    Path((protocol, domain, path)): Path<(String, String, String)>,
    RawQuery(query): RawQuery,
    headers: HeaderMap,
) -> Response {
    convert(state, &headers, TargetAddress::from_route(&protocol, &domain, &path, query_pairs(query)))
        .await
}

async fn convert(state: AppState, headers: &HeaderMap, target: TargetAddress) -> Response {
    let service_host = state.service_host(headers);
    let relay = state.relay.clone();

    // Fetching blocks on the origin.
    let outcome =
        tokio::task::spawn_blocking(move || relay.convert(&service_host, &target)).await;

    match outcome {
        Ok(Ok(ConvertOutcome::Document(body))) => (
            [(header::CONTENT_TYPE, "text/html; charset=utf-8")],
            body,
        )
            .into_response(),
        Ok(Ok(ConvertOutcome::Redirect(location))) => found(&location),
        Ok(Err(error)) => conversion_error(&error),
        Err(error) => {
            tracing::error!(%error, "conversion task failed");
            StatusCode::INTERNAL_SERVER_ERROR.into_response()
        }
    }
}

fn query_pairs(query: Option<String>) -> Vec<(String, String)> {
    query
        .map(|raw| form_urlencoded::parse(raw.as_bytes()).into_owned().collect())
        .unwrap_or_default()
}

fn found(location: &str) -> Response {
    (StatusCode::FOUND, [(header::LOCATION, location.to_owned())]).into_response()
}

fn conversion_error(error: &RelayError) -> Response {
    tracing::debug!(kind = error.kind.as_str(), code = error.code, "conversion failed");
    error_page(&error.message)
}

fn error_page(message: &str) -> Response {
    (
        [(header::CONTENT_TYPE, "text/plain; charset=utf-8")],
        format!("Error: {message}."),
    )
        .into_response()
}

/// `host[:port]` characters only; anything else is not echoed into pages.
fn is_plain_host(host: &str) -> bool {
    !host.is_empty()
        && host
            .chars()
            .all(|ch| ch.is_ascii_alphanumeric() || matches!(ch, '.' | '-' | ':' | '[' | ']'))
}
