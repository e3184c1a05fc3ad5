use std::net::SocketAddr;
use std::sync::Arc;

use greeting_service::config::ProcessMetricsConfig;
use greeting_service::{app, Metrics};
use tokio::net::TcpListener;

async fn spawn_server() -> SocketAddr {
    let metrics = Arc::new(Metrics::new(&ProcessMetricsConfig::default()).unwrap());
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app(metrics)).await.unwrap();
    });
    addr
}

#[tokio::test]
async fn greeting_then_scrape_then_not_found() {
    let addr = spawn_server().await;
    let client = reqwest::Client::new();
    let base = format!("http://{addr}");

    let res = client.get(format!("{base}/")).send().await.unwrap();
    assert_eq!(res.status(), 200);
    assert!(res.headers()["content-type"]
        .to_str()
        .unwrap()
        .starts_with("text/html"));
    assert_eq!(res.text().await.unwrap(), "<p>Hello, World!</p>");

    let res = client.get(format!("{base}/metrics")).send().await.unwrap();
    assert_eq!(res.status(), 200);
    let body = res.text().await.unwrap();
    let count: f64 = body
        .lines()
        .filter(|l| l.starts_with("http_server_requests") && !l.contains("in_flight"))
        .filter(|l| l.contains("path=\"/\"") && l.contains("status=\"200\""))
        .filter_map(|l| l.rsplit(' ').next()?.parse::<f64>().ok())
        .sum();
    assert!(count >= 1.0, "no request-count line in:\n{body}");

    let res = client.get(format!("{base}/nope")).send().await.unwrap();
    assert_eq!(res.status(), 404);
}

#[tokio::test]
async fn concurrent_clients_get_identical_greetings() {
    let addr = spawn_server().await;
    let client = reqwest::Client::new();
    let url = format!("http://{addr}/");

    let requests = (0..32).map(|_| {
        let client = client.clone();
        let url = url.clone();
        async move {
            let res = client.get(url).send().await.unwrap();
            (res.status().as_u16(), res.text().await.unwrap())
        }
    });
    let responses = futures::future::join_all(requests).await;

    assert_eq!(responses.len(), 32);
    for (status, body) in responses {
        assert_eq!(status, 200);
        assert_eq!(body, "<p>Hello, World!</p>");
    }
}
