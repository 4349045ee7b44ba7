use crate::routes::AppState;
use crate::routes::router;
use axum::Router;
use axum::body::Body;
use axum::http::Request;
use axum::http::StatusCode;
use axum::http::header;
use axum::response::Response;
use gk_core::RelayResult;
use gk_encoding::DetectionResult;
use gk_encoding::EncodingDetector;
use gk_net::FetchResult;
use gk_net::Fetcher;
use gk_relay::Relay;
use std::sync::Arc;
use std::sync::Mutex;
use tower::ServiceExt;

struct FakeOrigin {
    content_type: &'static str,
    body: &'static [u8],
    requested: Mutex<Vec<String>>,
}

impl Fetcher for FakeOrigin {
    fn fetch(&self, url: &str) -> RelayResult<FetchResult> {
        if let Ok(mut requested) = self.requested.lock() {
            requested.push(url.to_owned());
        }
        Ok(FetchResult {
            status: 200,
            resolved_url: url.to_owned(),
            content_type: self.content_type.to_owned(),
            headers: Vec::new(),
            body: self.body.to_vec(),
        })
    }
}

struct Latin1;

impl EncodingDetector for Latin1 {
    fn detect(&self, _bytes: &[u8]) -> DetectionResult {
        DetectionResult::new("iso-8859-1", 0.9)
    }
}

fn app(content_type: &'static str, body: &'static [u8]) -> (Router, Arc<FakeOrigin>) {
    let origin = Arc::new(FakeOrigin {
        content_type,
        body,
        requested: Mutex::new(Vec::new()),
    });
    let relay = Relay::new(origin.clone(), Arc::new(Latin1));
    (router(AppState::new(relay, "gknot.test".to_owned())), origin)
}

fn html_app() -> (Router, Arc<FakeOrigin>) {
    app(
        "text/html; charset=iso-8859-1",
        b"<html><head><meta http-equiv=\"content-type\" content=\"text/html; charset=iso-8859-1\"><title>t</title></head><body><a href=\"/about\">caf\xe9</a></body></html>",
    )
}

async fn get(app: Router, uri: &str, host: Option<&str>) -> Response {
    let mut builder = Request::builder().uri(uri);
    if let Some(host) = host {
        builder = builder.header(header::HOST, host);
    }
    let request = match builder.body(Body::empty()) {
        Ok(request) => request,
        Err(error) => panic!("{error}"),
    };
    match app.oneshot(request).await {
        Ok(response) => response,
        Err(error) => panic!("{error}"),
    }
}

async fn body_text(response: Response) -> String {
    let bytes = match axum::body::to_bytes(response.into_body(), usize::MAX).await {
        Ok(bytes) => bytes,
        Err(error) => panic!("{error}"),
    };
    match String::from_utf8(bytes.to_vec()) {
        Ok(text) => text,
        Err(error) => panic!("{error}"),
    }
}

fn header_of<'a>(response: &'a Response, name: header::HeaderName) -> &'a str {
    response
        .headers()
        .get(name)
        .and_then(|value| value.to_str().ok())
        .unwrap_or_default()
}

fn requested(origin: &FakeOrigin) -> Vec<String> {
    match origin.requested.lock() {
        Ok(requested) => requested.clone(),
        Err(error) => panic!("{error}"),
    }
}

#[tokio::test]
async fn index_page_carries_bookmarklet_for_request_host() {
    let (app, _) = html_app();
    let response = get(app, "/", Some("relay.example:8080")).await;
    assert_eq!(response.status(), StatusCode::OK);

    let page = body_text(response).await;
    assert!(page.contains("//relay.example:8080/soup?source="));
    assert!(!page.contains("{{service_host}}"));
}

#[tokio::test]
async fn landing_without_source_goes_home() {
    let (app, _) = html_app();
    let response = get(app, "/soup", None).await;
    assert_eq!(response.status(), StatusCode::FOUND);
    assert_eq!(header_of(&response, header::LOCATION), "/");
}

#[tokio::test]
async fn landing_redirects_to_forwarding_path() {
    let (app, _) = html_app();
    let response = get(
        app,
        "/soup?source=http%3A%2F%2Fexample.com%2F%2Fdocs%2F%2Fa.html%3Fq%3D1",
        None,
    )
    .await;
    assert_eq!(response.status(), StatusCode::FOUND);
    assert_eq!(
        header_of(&response, header::LOCATION),
        "/soup/http/example.com/docs/a.html?q=1"
    );
}

#[tokio::test]
async fn landing_reports_invalid_source() {
    let (app, _) = html_app();
    let response = get(app, "/soup?source=nonsense", None).await;
    assert_eq!(header_of(&response, header::CONTENT_TYPE), "text/plain; charset=utf-8");
    assert_eq!(body_text(response).await, "Error: invalid source URL.");
}

#[tokio::test]
async fn converts_page_to_utf8() {
    let (app, origin) = html_app();
    let response = get(app, "/soup/http/example.com/index.html", Some("gknot.test")).await;
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(header_of(&response, header::CONTENT_TYPE), "text/html; charset=utf-8");

    let page = body_text(response).await;
    assert!(page.contains("<a href=\"http://example.com/about\">caf\u{e9}</a>"));
    assert!(page.contains("<meta charset=\"utf-8\">"));
    assert!(!page.contains("http-equiv"));
    assert_eq!(requested(&origin), vec!["http://example.com/index.html".to_owned()]);
}

#[tokio::test]
async fn forwards_query_pairs_in_order() {
    let (app, origin) = html_app();
    let response = get(app, "/soup/http/example.com/search?q=a+b&lang=th&q=2", None).await;
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(
        requested(&origin),
        vec!["http://example.com/search?q=a+b&lang=th&q=2".to_owned()]
    );
}

#[tokio::test]
async fn domain_root_routes_fetch_slash() {
    for uri in ["/soup/http/example.com", "/soup/http/example.com/"] {
        let (app, origin) = html_app();
        let response = get(app, uri, None).await;
        assert_eq!(response.status(), StatusCode::OK, "{uri}");
        assert_eq!(requested(&origin), vec!["http://example.com/".to_owned()]);
    }
}

#[tokio::test]
async fn self_reference_is_refused() {
    let (app, origin) = html_app();
    let response = get(app, "/soup/http/GKNOT.test:80/", Some("gknot.test")).await;
    assert_eq!(
        body_text(response).await,
        "Error: space-time continuum interruption."
    );
    assert!(requested(&origin).is_empty());
}

#[tokio::test]
async fn public_host_guards_requests_without_host() {
    let (app, origin) = html_app();
    let response = get(app, "/soup/http/gknot.test/", None).await;
    assert_eq!(
        body_text(response).await,
        "Error: space-time continuum interruption."
    );
    assert!(requested(&origin).is_empty());
}

#[tokio::test]
async fn unsupported_scheme_is_refused() {
    let (app, _) = html_app();
    let response = get(app, "/soup/ftp/example.com/file.txt", None).await;
    assert_eq!(
        body_text(response).await,
        "Error: only HTTP and HTTPS are supported."
    );
}

#[tokio::test]
async fn non_html_redirects_to_origin() {
    let (app, _) = app("image/png", b"\x89PNG");
    let response = get(app, "/soup/http/example.com/logo.png", None).await;
    assert_eq!(response.status(), StatusCode::FOUND);
    assert_eq!(
        header_of(&response, header::LOCATION),
        "http://example.com/logo.png"
    );
}
