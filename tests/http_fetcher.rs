// tests/http_fetcher.rs
//
// The real HttpFetcher against a local axum server: retry on 5xx, no retry
// on 4xx, charset decoding, and the SSRF guard refusing loopback by default,
// including when a loopback target is reached through a redirect.

use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use axum::{
    extract::Query,
    http::{header, StatusCode},
    response::{IntoResponse, Redirect},
    routing::get,
    Router,
};

use industry_digest::ingest::fetch::{FetchError, PageFetcher};
use industry_digest::ingest::fetch::MAX_REDIRECTS;
use industry_digest::ingest::{HttpFetcher, RetryPolicy};
use industry_digest::security::{UnsafeTarget, UrlGuard};

async fn serve(app: Router) -> SocketAddr {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });
    addr
}

fn local_fetcher() -> HttpFetcher {
    HttpFetcher::new(UrlGuard::new().allow_host("127.0.0.1"), Duration::from_secs(5))
        .unwrap()
        .with_retry(RetryPolicy {
            attempts: 3,
            base_delay: Duration::from_millis(10),
        })
}

#[tokio::test]
async fn retries_server_errors_then_succeeds() {
    let hits = Arc::new(AtomicUsize::new(0));
    let counter = hits.clone();
    let app = Router::new().route(
        "/flaky",
        get(move || {
            let counter = counter.clone();
            async move {
                if counter.fetch_add(1, Ordering::SeqCst) < 2 {
                    (StatusCode::SERVICE_UNAVAILABLE, "busy").into_response()
                } else {
                    "<a href='/news/1234'>Recovered headline</a>".into_response()
                }
            }
        }),
    );
    let addr = serve(app).await;

    let page = local_fetcher()
        .fetch(&format!("http://{addr}/flaky"))
        .await
        .expect("third attempt succeeds");
    assert!(page.body.contains("Recovered headline"));
    assert_eq!(hits.load(Ordering::SeqCst), 3);
}

#[tokio::test]
async fn gives_up_after_the_last_attempt() {
    let hits = Arc::new(AtomicUsize::new(0));
    let counter = hits.clone();
    let app = Router::new().route(
        "/down",
        get(move || {
            let counter = counter.clone();
            async move {
                counter.fetch_add(1, Ordering::SeqCst);
                StatusCode::BAD_GATEWAY
            }
        }),
    );
    let addr = serve(app).await;

    let err = local_fetcher()
        .fetch(&format!("http://{addr}/down"))
        .await
        .unwrap_err();
    assert!(matches!(err, FetchError::Status(502)), "{err}");
    assert_eq!(hits.load(Ordering::SeqCst), 3);
}

#[tokio::test]
async fn client_errors_are_not_retried() {
    let hits = Arc::new(AtomicUsize::new(0));
    let counter = hits.clone();
    let app = Router::new().route(
        "/missing",
        get(move || {
            let counter = counter.clone();
            async move {
                counter.fetch_add(1, Ordering::SeqCst);
                StatusCode::NOT_FOUND
            }
        }),
    );
    let addr = serve(app).await;

    let err = local_fetcher()
        .fetch(&format!("http://{addr}/missing"))
        .await
        .unwrap_err();
    assert!(matches!(err, FetchError::Status(404)), "{err}");
    assert_eq!(hits.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn decodes_declared_gbk() {
    let (bytes, _, _) = encoding_rs::GBK.encode("<p>半导体行业新闻</p>");
    let body = bytes.into_owned();
    let app = Router::new().route(
        "/gbk",
        get(move || {
            let body = body.clone();
            async move { ([(header::CONTENT_TYPE, "text/html; charset=gbk")], body) }
        }),
    );
    let addr = serve(app).await;

    let page = local_fetcher()
        .fetch(&format!("http://{addr}/gbk"))
        .await
        .unwrap();
    assert!(page.body.contains("半导体行业新闻"), "{}", page.body);
}

#[tokio::test]
async fn default_guard_refuses_loopback() {
    let app = Router::new().route("/", get(|| async { "should not be reached" }));
    let addr = serve(app).await;

    let fetcher = HttpFetcher::new(UrlGuard::new(), Duration::from_secs(5)).unwrap();
    let err = fetcher.fetch(&format!("http://{addr}/")).await.unwrap_err();
    assert!(matches!(err, FetchError::Unsafe(_)), "{err}");

    let err = fetcher.fetch("file:///etc/passwd").await.unwrap_err();
    assert!(matches!(err, FetchError::Unsafe(_)), "{err}");
}

/// `/hop?to=<url>` answers 307 to `to`; `/loop` redirects to itself.
fn redirecting_app() -> Router {
    Router::new()
        .route(
            "/hop",
            get(|Query(q): Query<HashMap<String, String>>| async move {
                Redirect::temporary(q.get("to").map(String::as_str).unwrap_or("/"))
            }),
        )
        .route("/loop", get(|| async { Redirect::temporary("/loop") }))
        .route("/moved", get(|| async { Redirect::permanent("/landing") }))
        .route("/landing", get(|| async { "<a href='/news/77'>Landing headline</a>" }))
        .route("/internal-secret", get(|| async { "INTERNAL-ADMIN-DATA" }))
}

fn hop_url(addr: SocketAddr, to: &str) -> String {
    let mut u = url::Url::parse(&format!("http://{addr}/hop")).unwrap();
    u.query_pairs_mut().append_pair("to", to);
    u.to_string()
}

#[tokio::test]
async fn same_host_redirects_are_followed() {
    let addr = serve(redirecting_app()).await;
    let page = local_fetcher()
        .fetch(&format!("http://{addr}/moved"))
        .await
        .unwrap();
    assert!(page.body.contains("Landing headline"));
    assert!(page.url.ends_with("/landing"), "{}", page.url);
}

#[tokio::test]
async fn redirect_loops_stop() {
    let addr = serve(redirecting_app()).await;
    let err = local_fetcher()
        .fetch(&format!("http://{addr}/loop"))
        .await
        .unwrap_err();
    assert!(matches!(err, FetchError::TooManyRedirects(n) if n == MAX_REDIRECTS), "{err}");
}

#[tokio::test]
async fn redirect_to_loopback_literal_is_refused() {
    let addr = serve(redirecting_app()).await;
    let target = format!("http://127.0.0.2:{}/internal-secret", addr.port());
    let err = local_fetcher().fetch(&hop_url(addr, &target)).await.unwrap_err();
    assert!(
        matches!(err, FetchError::Unsafe(UnsafeTarget::BlockedAddress(ip)) if ip.is_loopback()),
        "{err}"
    );
}

#[tokio::test]
async fn redirect_hops_are_resolved_before_following() {
    let addr = serve(redirecting_app()).await;
    // `.invalid` never resolves, so only a resolving check can refuse it here.
    let target = format!("http://digest-hop.invalid:{}/internal-secret", addr.port());
    let err = local_fetcher().fetch(&hop_url(addr, &target)).await.unwrap_err();
    assert!(
        matches!(err, FetchError::Unsafe(UnsafeTarget::DnsResolution { .. })),
        "{err}"
    );
}

#[tokio::test]
async fn redirect_to_name_resolving_to_loopback_is_refused() {
    // Common /etc/hosts aliases for loopback; skip when none is configured.
    let mut name = None;
    for candidate in ["ip6-localhost", "ip6-loopback", "localhost6"] {
        if let Ok(mut addrs) = tokio::net::lookup_host((candidate, 80)).await {
            if addrs.any(|a| a.ip().is_loopback()) {
                name = Some(candidate);
                break;
            }
        }
    }
    let Some(name) = name else {
        eprintln!("no loopback alias in /etc/hosts, skipping");
        return;
    };

    let addr = serve(redirecting_app()).await;
    let target = format!("http://{name}:{}/internal-secret", addr.port());
    let err = local_fetcher().fetch(&hop_url(addr, &target)).await.unwrap_err();
    assert!(
        matches!(err, FetchError::Unsafe(UnsafeTarget::BlockedAddress(ip)) if ip.is_loopback()),
        "{err}"
    );
}
