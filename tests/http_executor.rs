use axum::http::StatusCode;
use axum::response::Redirect;
use axum::routing::{get, post};
use axum::Router;
use pocscan::config::HttpConfig;
use pocscan::http::{HttpStepExecutor, RenderedRequest, StepExecutor};

async fn spawn_server(router: Router) -> String {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, router).await.unwrap();
    });
    format!("http://{}", addr)
}

fn request(method: &str, url: String, follow_redirects: bool) -> RenderedRequest {
    RenderedRequest {
        method: method.into(),
        url,
        headers: vec![("X-Probe".into(), "pocscan".into())],
        body: String::new(),
        follow_redirects,
    }
}

fn router() -> Router {
    Router::new()
        .route("/big", get(|| async { "A".repeat(5000) }))
        .route("/moved", get(|| async { Redirect::temporary("/final") }))
        .route("/final", get(|| async { "landed" }))
        .route("/loop", get(|| async { Redirect::temporary("/loop") }))
        .route("/echo", post(|body: String| async move { (StatusCode::CREATED, body) }))
        .route(
            "/header",
            get(|headers: axum::http::HeaderMap| async move {
                headers.get("x-probe").and_then(|v| v.to_str().ok()).unwrap_or("").to_string()
            }),
        )
}

#[tokio::test]
async fn test_body_is_capped() {
    let base = spawn_server(router()).await;
    let exec = HttpStepExecutor::new(&HttpConfig { max_response_body_size: 1000, ..Default::default() }).unwrap();
    let resp = exec.send(&request("GET", format!("{}/big", base), false)).await.unwrap();
    assert_eq!(resp.status, 200);
    assert_eq!(resp.body.len(), 1000);
    assert!(resp.truncated);
}

#[tokio::test]
async fn test_redirect_policy_per_step() {
    let base = spawn_server(router()).await;
    let exec = HttpStepExecutor::new(&HttpConfig::default()).unwrap();

    let stay = exec.send(&request("GET", format!("{}/moved", base), false)).await.unwrap();
    assert_eq!(stay.status, 307);
    assert_eq!(stay.header("location"), Some("/final"));

    let follow = exec.send(&request("GET", format!("{}/moved", base), true)).await.unwrap();
    assert_eq!(follow.status, 200);
    assert_eq!(follow.body, "landed");
}

#[tokio::test]
async fn test_redirect_loop_is_bounded() {
    let base = spawn_server(router()).await;
    let exec = HttpStepExecutor::new(&HttpConfig { max_redirects: 2, retries: 0, ..Default::default() }).unwrap();
    assert!(exec.send(&request("GET", format!("{}/loop", base), true)).await.is_err());
}

#[tokio::test]
async fn test_method_body_and_headers_are_sent() {
    let base = spawn_server(router()).await;
    let exec = HttpStepExecutor::new(&HttpConfig::default()).unwrap();

    let mut post_req = request("POST", format!("{}/echo", base), false);
    post_req.body = "user=admin".into();
    let resp = exec.send(&post_req).await.unwrap();
    assert_eq!(resp.status, 201);
    assert_eq!(resp.body, "user=admin");

    let resp = exec.send(&request("GET", format!("{}/header", base), false)).await.unwrap();
    assert_eq!(resp.body, "pocscan");
}
