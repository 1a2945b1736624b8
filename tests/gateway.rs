//! The standalone gateway router in front of a separate upstream.

mod common;

use serde_json::Value;
use uuid::Uuid;

use batch_requests::BatchItem;
use common::{batch_config, connect, http_client, start_app, start_gateway};

#[tokio::test]
async fn batches_are_forwarded_to_the_upstream() {
    let upstream = start_app(batch_config(0), 0).await;
    let gateway = start_gateway(upstream.addr).await;
    let connection = connect(gateway);

    let pending = connection.send(BatchItem::new("GET", "/echo/via-gateway")).unwrap();
    connection.close();
    let reply = pending.await.unwrap();

    assert_eq!(reply.status, 200);
    let echoed: Value = reply.json().unwrap();
    assert_eq!(echoed["path"], "/echo/via-gateway");
    assert_eq!(echoed["headers"]["host"], upstream.addr.to_string());
}

#[tokio::test]
async fn batch_path_only_accepts_post() {
    let upstream = start_app(batch_config(0), 0).await;
    let gateway = start_gateway(upstream.addr).await;

    let response = http_client()
        .get(format!("http://{}/batch", gateway))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), 405);
    assert_eq!(response.headers()["allow"], "POST");

    let request_id = response.headers()["x-request-id"].to_str().unwrap();
    assert!(Uuid::parse_str(request_id).is_ok());
}

#[tokio::test]
async fn caller_request_id_is_kept() {
    let upstream = start_app(batch_config(0), 0).await;
    let gateway = start_gateway(upstream.addr).await;

    let response = http_client()
        .get(format!("http://{}/elsewhere", gateway))
        .header("x-request-id", "caller-id")
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), 404);
    assert_eq!(response.headers()["x-request-id"], "caller-id");
}
