use std::convert::Infallible;
use std::net::SocketAddr;
use std::sync::{Arc, Mutex};

use execution::{AcceptExecutor, PageBridgeExecutor};
use hyper::service::{make_service_fn, service_fn};
use hyper::{Body, Request, Response, Server, StatusCode};

async fn spawn_bridge(status: StatusCode, reply: &'static str) -> (SocketAddr, Arc<Mutex<Vec<String>>>) {
    let seen = Arc::new(Mutex::new(Vec::new()));
    let seen_svc = seen.clone();
    let make_svc = make_service_fn(move |_| {
        let seen = seen_svc.clone();
        async move {
            Ok::<_, Infallible>(service_fn(move |req: Request<Body>| {
                let seen = seen.clone();
                async move {
                    let path = req.uri().path().to_string();
                    let body = hyper::body::to_bytes(req.into_body())
                        .await
                        .expect("request body should be readable");
                    seen.lock()
                        .unwrap()
                        .push(format!("{path} {}", String::from_utf8_lossy(&body)));
                    Ok::<_, Infallible>(
                        Response::builder()
                            .status(status)
                            .header("Content-Type", "application/json")
                            .body(Body::from(reply))
                            .unwrap(),
                    )
                }
            }))
        }
    });
    let server = Server::bind(&"127.0.0.1:0".parse().unwrap()).serve(make_svc);
    let addr = server.local_addr();
    tokio::spawn(server);
    (addr, seen)
}

#[tokio::test]
async fn forwards_accept_instruction_and_reads_result() {
    let (addr, seen) = spawn_bridge(StatusCode::OK, r#"{"success":true,"detail":"clicked"}"#).await;
    let executor = PageBridgeExecutor::new(reqwest::Client::new(), &format!("http://{addr}"));

    let result = executor.execute("offer-42").await;

    assert!(result.success);
    assert_eq!(result.detail, "clicked");
    let requests = seen.lock().unwrap().clone();
    assert_eq!(requests.len(), 1);
    assert!(requests[0].starts_with("/accept "));
    assert!(requests[0].contains(r#""offerId":"offer-42""#));
    assert!(requests[0].contains(r#""action":"ACCEPT_OFFER""#));
}

#[tokio::test]
async fn non_success_status_is_a_failed_accept() {
    let (addr, _) = spawn_bridge(StatusCode::SERVICE_UNAVAILABLE, "{}").await;
    let executor = PageBridgeExecutor::new(reqwest::Client::new(), &format!("http://{addr}"));

    let result = executor.execute("offer-42").await;

    assert!(!result.success);
    assert!(result.detail.contains("503"));
}

#[tokio::test]
async fn unreachable_bridge_is_a_failed_accept() {
    let executor = PageBridgeExecutor::new(reqwest::Client::new(), "http://127.0.0.1:1");
    let result = executor.execute("offer-42").await;
    assert!(!result.success);
    assert!(result.detail.contains("unreachable"));
}
