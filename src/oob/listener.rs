use std::net::SocketAddr;
use std::sync::Arc;
use axum::extract::{ConnectInfo, State};
use axum::http::{HeaderMap, Method, Uri};
use axum::Router;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tower_http::trace::TraceLayer;
use tracing::{debug, error, info};
use crate::errors::PocScanError;
use super::correlator::{OobCorrelator, OobInteraction};

/// Callback router: every request on any path is checked for outstanding
/// tokens in its `Host` header and path.
pub fn build_router(correlator: Arc<OobCorrelator>) -> Router {
    Router::new()
        .fallback(callback)
        .with_state(correlator)
        .layer(TraceLayer::new_for_http())
}

async fn callback(
    State(correlator): State<Arc<OobCorrelator>>,
    remote: Option<ConnectInfo<SocketAddr>>,
    method: Method,
    uri: Uri,
    headers: HeaderMap,
) -> &'static str {
    let host = headers
        .get(axum::http::header::HOST)
        .and_then(|v| v.to_str().ok())
        .unwrap_or("");
    let haystack = format!("{} {}", host, uri).to_lowercase();
    let request_line = format!("{} {} Host: {}", method, uri, host);

    for token in correlator.pending_tokens() {
        if haystack.contains(&token) {
            let mut interaction = OobInteraction::new(&token, "http", request_line.clone());
            interaction.remote = remote.as_ref().map(|ConnectInfo(addr)| addr.to_string());
            if correlator.deliver(&token, interaction) {
                debug!(token = %token, "Callback matched OOB token");
            }
        }
    }
    "ok"
}

/// Bind `addr` and serve callbacks until `cancel` fires.
pub async fn serve(
    addr: &str,
    correlator: Arc<OobCorrelator>,
    cancel: CancellationToken,
) -> Result<JoinHandle<()>, PocScanError> {
    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .map_err(|e| PocScanError::Oob(format!("cannot bind OOB listener on {}: {}", addr, e)))?;
    Ok(serve_on(listener, correlator, cancel))
}

/// Serve callbacks on an already bound listener until `cancel` fires.
pub fn serve_on(
    listener: tokio::net::TcpListener,
    correlator: Arc<OobCorrelator>,
    cancel: CancellationToken,
) -> JoinHandle<()> {
    if let Ok(local) = listener.local_addr() {
        info!(addr = %local, "OOB callback listener started");
    }

    let app = build_router(correlator).into_make_service_with_connect_info::<SocketAddr>();
    tokio::spawn(async move {
        let result = axum::serve(listener, app)
            .with_graceful_shutdown(async move { cancel.cancelled().await })
            .await;
        if let Err(e) = result {
            error!(error = %e, "OOB listener failed");
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;
    use axum::body::Body;
    use axum::http::{Request, StatusCode};
    use tower::ServiceExt;

    #[tokio::test]
    async fn test_host_header_delivers_token() {
        let correlator = Arc::new(OobCorrelator::new(Some("oob.test".into())));
        let token = correlator.new_token();

        let req = Request::builder()
            .uri("/anything")
            .header("host", token.host())
            .body(Body::empty())
            .unwrap();
        let resp = build_router(correlator.clone()).oneshot(req).await.unwrap();
        assert_eq!(resp.status(), StatusCode::OK);

        let got = correlator
            .wait_for(&token, Duration::from_millis(50), &CancellationToken::new())
            .await
            .unwrap()
            .unwrap();
        assert!(got.raw.contains("GET /anything"));
    }

    #[tokio::test]
    async fn test_path_delivers_token_and_strangers_ignored() {
        let correlator = Arc::new(OobCorrelator::new(None));
        let token = correlator.new_token();
        let other = correlator.new_token();

        let req = Request::builder()
            .uri(format!("/cb/{}", token.id))
            .body(Body::empty())
            .unwrap();
        build_router(correlator.clone()).oneshot(req).await.unwrap();

        let cancel = CancellationToken::new();
        assert!(correlator.wait(&token, Duration::from_millis(50), &cancel).await.unwrap());
        assert!(!correlator.wait(&other, Duration::from_millis(50), &cancel).await.unwrap());
    }

    #[tokio::test]
    async fn test_serve_binds_and_stops() {
        let correlator = Arc::new(OobCorrelator::new(None));
        let cancel = CancellationToken::new();
        let handle = serve("127.0.0.1:0", correlator, cancel.clone()).await.unwrap();
        cancel.cancel();
        handle.await.unwrap();
    }
}
