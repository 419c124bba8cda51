//! Request helpers for driving the router in-process.

#![allow(dead_code)]

use axum::body::{Body, Bytes};
use axum::http::{header, Method, Request, Response, StatusCode};
use axum::Router;
use serde_json::Value;
use std::time::Duration;
use tower::ServiceExt;

pub const BOUNDARY: &str = "----image-upscaler-test-boundary";
pub const SUBMIT_URI: &str = "/api/v1/upscale/job";

/// Encode a multipart/form-data body with an optional `file` part and text fields.
pub fn multipart_body(file: Option<&[u8]>, fields: &[(&str, &str)]) -> Vec<u8> {
    let mut body = Vec::new();
    for (name, value) in fields {
        body.extend_from_slice(format!("--{BOUNDARY}\r\n").as_bytes());
        body.extend_from_slice(
            format!("Content-Disposition: form-data; name=\"{name}\"\r\n\r\n").as_bytes(),
        );
        body.extend_from_slice(value.as_bytes());
        body.extend_from_slice(b"\r\n");
    }
    if let Some(bytes) = file {
        body.extend_from_slice(format!("--{BOUNDARY}\r\n").as_bytes());
        body.extend_from_slice(
            b"Content-Disposition: form-data; name=\"file\"; filename=\"upload.bin\"\r\n",
        );
        body.extend_from_slice(b"Content-Type: application/octet-stream\r\n\r\n");
        body.extend_from_slice(bytes);
        body.extend_from_slice(b"\r\n");
    }
    body.extend_from_slice(format!("--{BOUNDARY}--\r\n").as_bytes());
    body
}

pub fn submit_request(uri: &str, body: Vec<u8>) -> Request<Body> {
    Request::builder()
        .method(Method::POST)
        .uri(uri)
        .header(
            header::CONTENT_TYPE,
            format!("multipart/form-data; boundary={BOUNDARY}"),
        )
        .header(header::CONTENT_LENGTH, body.len())
        .body(Body::from(body))
        .unwrap()
}

pub async fn send(app: &Router, request: Request<Body>) -> Response<Body> {
    app.clone().oneshot(request).await.unwrap()
}

pub async fn get(app: &Router, uri: &str) -> Response<Body> {
    let request = Request::builder().uri(uri).body(Body::empty()).unwrap();
    send(app, request).await
}

pub async fn body_bytes(response: Response<Body>) -> Bytes {
    axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap()
}

pub async fn body_json(response: Response<Body>) -> Value {
    serde_json::from_slice(&body_bytes(response).await).unwrap()
}

/// Submit `file` with form `fields`; returns the status code and JSON body.
pub async fn submit(app: &Router, file: Option<&[u8]>, fields: &[(&str, &str)]) -> (StatusCode, Value) {
    submit_to(app, SUBMIT_URI, file, fields).await
}

pub async fn submit_to(
    app: &Router,
    uri: &str,
    file: Option<&[u8]>,
    fields: &[(&str, &str)],
) -> (StatusCode, Value) {
    let response = send(app, submit_request(uri, multipart_body(file, fields))).await;
    let status = response.status();
    (status, body_json(response).await)
}

/// Submit and return the job id, asserting the submit was accepted.
pub async fn submit_ok(app: &Router, file: &[u8], fields: &[(&str, &str)]) -> String {
    let (status, body) = submit(app, Some(file), fields).await;
    assert_eq!(status, StatusCode::ACCEPTED, "submit rejected: {body}");
    body["id"].as_str().expect("id in submit response").to_string()
}

pub async fn job_status(app: &Router, id: &str) -> (StatusCode, Value) {
    let response = get(app, &format!("/api/v1/upscale/job/{id}")).await;
    let status = response.status();
    (status, body_json(response).await)
}

/// Poll status every 20ms until terminal, returning every observed status
/// document in order.
pub async fn poll_until_terminal(app: &Router, id: &str) -> Vec<Value> {
    let mut observed = Vec::new();
    for _ in 0..1500 {
        let (code, body) = job_status(app, id).await;
        assert_eq!(code, StatusCode::OK, "status poll failed: {body}");
        let status = body["status"].as_str().unwrap_or_default().to_string();
        observed.push(body);
        if status == "done" || status == "error" {
            return observed;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    panic!("job {id} did not reach a terminal state");
}

pub async fn final_status(app: &Router, id: &str) -> Value {
    poll_until_terminal(app, id)
        .await
        .pop()
        .expect("at least one status")
}

/// Serve `app` on an ephemeral local port; returns the bound address.
pub async fn serve(app: Router) -> std::net::SocketAddr {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });
    addr
}
