//! HTTP control surface tests
//!
//! Requests go through the full router via `tower::ServiceExt::oneshot`.

#![cfg(unix)]

mod helpers;

use axum::{
    body::Body,
    http::{header, Method, Request, StatusCode},
    Router,
};
use helpers::{setup, TestEnv, EXITS_CLEANLY, LONG_RUNNING};
use http_body_util::BodyExt;
use loopcast::api::{build_router, AppState};
use serde_json::{json, Value};
use serial_test::serial;
use tower::util::ServiceExt;

const BOUNDARY: &str = "loopcast-test-boundary";

fn app(env: &TestEnv) -> Router {
    build_router(AppState::new(env.supervisor.clone(), env.bus.clone()))
}

async fn send(app: Router, request: Request<Body>) -> (StatusCode, Value) {
    let response = app.oneshot(request).await.unwrap();
    let status = response.status();
    let bytes = response.into_body().collect().await.unwrap().to_bytes();
    let body = if bytes.is_empty() {
        Value::Null
    } else {
        serde_json::from_slice(&bytes).unwrap()
    };
    (status, body)
}

fn get(uri: &str) -> Request<Body> {
    Request::builder().uri(uri).body(Body::empty()).unwrap()
}

fn post_json(uri: &str, body: Value) -> Request<Body> {
    Request::builder()
        .method(Method::POST)
        .uri(uri)
        .header(header::CONTENT_TYPE, "application/json")
        .body(Body::from(body.to_string()))
        .unwrap()
}

fn delete(uri: &str) -> Request<Body> {
    Request::builder()
        .method(Method::DELETE)
        .uri(uri)
        .body(Body::empty())
        .unwrap()
}

fn upload(uri: &str, files: &[(&str, &[u8])]) -> Request<Body> {
    let mut body = Vec::new();
    for (name, bytes) in files {
        body.extend_from_slice(
            format!(
                "--{}\r\nContent-Disposition: form-data; name=\"file\"; filename=\"{}\"\r\nContent-Type: application/octet-stream\r\n\r\n",
                BOUNDARY, name
            )
            .as_bytes(),
        );
        body.extend_from_slice(bytes);
        body.extend_from_slice(b"\r\n");
    }
    body.extend_from_slice(format!("--{}--\r\n", BOUNDARY).as_bytes());

    Request::builder()
        .method(Method::POST)
        .uri(uri)
        .header(
            header::CONTENT_TYPE,
            format!("multipart/form-data; boundary={}", BOUNDARY),
        )
        .body(Body::from(body))
        .unwrap()
}

#[tokio::test]
#[serial]
async fn test_health() {
    let env = setup(LONG_RUNNING).await;
    let (status, body) = send(app(&env), get("/health")).await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "healthy");
    assert_eq!(body["module"], "loopcast");
}

#[tokio::test]
#[serial]
async fn test_upload_list_and_delete_media() {
    let env = setup(LONG_RUNNING).await;

    let (status, body) = send(
        app(&env),
        upload(
            "/api/media/videos",
            &[("b.mp4", &b"bbb"[..]), ("a.mp4", &b"aaaa"[..])],
        ),
    )
    .await;
    assert_eq!(status, StatusCode::CREATED);
    assert_eq!(body["uploaded"].as_array().unwrap().len(), 2);

    let (status, body) = send(app(&env), get("/api/media/video")).await;
    assert_eq!(status, StatusCode::OK);
    let names: Vec<&str> = body["assets"]
        .as_array()
        .unwrap()
        .iter()
        .map(|a| a["name"].as_str().unwrap())
        .collect();
    assert_eq!(names, vec!["a.mp4", "b.mp4"]);
    assert_eq!(body["assets"][0]["size_bytes"], 4);

    let (status, _) = send(app(&env), delete("/api/media/video/a.mp4")).await;
    assert_eq!(status, StatusCode::NO_CONTENT);

    let (status, body) = send(app(&env), delete("/api/media/video/a.mp4")).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(body["error"]["code"], "NOT_FOUND");
}

#[tokio::test]
#[serial]
async fn test_upload_rejects_bad_names() {
    let env = setup(LONG_RUNNING).await;

    let (status, body) = send(
        app(&env),
        upload("/api/media/audio", &[("notes.txt", &b"hello"[..])]),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["error"]["code"], "BAD_REQUEST");

    let (status, _) = send(app(&env), get("/api/media/pictures")).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
}

#[tokio::test]
#[serial]
async fn test_erase_all_media() {
    let env = setup(LONG_RUNNING).await;
    env.add_video("a.mp4").await;
    env.add_audio("song.mp3").await;

    let (status, body) = send(app(&env), delete("/api/media")).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["removed"].as_array().unwrap().len(), 2);
    assert!(body["failures"].as_array().unwrap().is_empty());

    let (_, body) = send(app(&env), get("/api/media/audio")).await;
    assert!(body["assets"].as_array().unwrap().is_empty());
}

#[tokio::test]
#[serial]
async fn test_start_status_stop_flow() {
    let env = setup(LONG_RUNNING).await;
    env.add_video("a.mp4").await;

    let (status, body) = send(
        app(&env),
        post_json("/api/stream/start", json!({"stream_key": "live-key-42"})),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["state"], "live");
    assert_eq!(body["target"], format!("{}/****", helpers::INGEST_ENDPOINT));
    let session_id = body["session_id"].as_str().unwrap().to_string();
    env.wait_for_spawns(1).await;

    let (status, body) = send(
        app(&env),
        post_json("/api/stream/start", json!({"stream_key": "live-key-42"})),
    )
    .await;
    assert_eq!(status, StatusCode::CONFLICT);
    assert_eq!(body["error"]["code"], "ALREADY_ACTIVE");

    let (status, body) = send(app(&env), get("/api/stream/status")).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["state"], "live");
    assert_eq!(body["session"]["session_id"], session_id.as_str());
    assert!(!body.to_string().contains("live-key-42"));

    let stop = Request::builder()
        .method(Method::POST)
        .uri("/api/stream/stop")
        .body(Body::empty())
        .unwrap();
    let (status, body) = send(app(&env), stop).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["state"], "stopping");
    env.wait_settled().await;

    let (status, body) = send(
        app(&env),
        get(&format!("/api/sessions/{}/logs?limit=1", session_id)),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["events"].as_array().unwrap().len(), 1);
    assert_eq!(body["events"][0]["category"], "INFO");
    assert_eq!(body["events"][0]["message"], "Streaming session ended");
}

#[tokio::test]
#[serial]
async fn test_start_errors_map_to_status_codes() {
    let env = setup(EXITS_CLEANLY).await;

    let (status, body) = send(
        app(&env),
        post_json("/api/stream/start", json!({"stream_key": "XYZ"})),
    )
    .await;
    assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);
    assert_eq!(body["error"]["code"], "NO_MEDIA");

    env.add_video("a.mp4").await;
    let (status, body) = send(
        app(&env),
        post_json("/api/stream/start", json!({"stream_key": ""})),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["error"]["code"], "VALIDATION_ERROR");

    let stop = Request::builder()
        .method(Method::POST)
        .uri("/api/stream/stop")
        .body(Body::empty())
        .unwrap();
    let (status, body) = send(app(&env), stop).await;
    assert_eq!(status, StatusCode::CONFLICT);
    assert_eq!(body["error"]["code"], "NOT_ACTIVE");
    assert!(env.spawns().is_empty());
}

#[tokio::test]
#[serial]
async fn test_logs_for_unknown_session_are_empty() {
    let env = setup(LONG_RUNNING).await;
    let (status, body) = send(app(&env), get("/api/sessions/session-none/logs")).await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["session_id"], "session-none");
    assert!(body["events"].as_array().unwrap().is_empty());
}
