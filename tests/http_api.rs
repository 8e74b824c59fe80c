use std::{net::SocketAddr, sync::Arc, time::Duration};

use quiz_live_back::{
    config::AppConfig,
    dao::session_store::{MemorySessionStore, NotifyingStore},
    routes,
    state::{AppState, SharedState},
};
use reqwest::{Client, StatusCode};
use serde_json::{Value, json};
use tokio::{net::TcpListener, time::timeout};
use uuid::Uuid;

async fn spawn_server(with_store: bool) -> (String, SharedState) {
    let state = AppState::new(AppConfig::default());
    if with_store {
        let store = NotifyingStore::new(Arc::new(MemorySessionStore::new()), state.event_channel());
        state.install_session_store(Arc::new(store)).await;
    }

    let listener = TcpListener::bind(SocketAddr::from(([127, 0, 0, 1], 0)))
        .await
        .unwrap();
    let addr = listener.local_addr().unwrap();
    let app = routes::router(state.clone());
    tokio::spawn(async move {
        axum::serve(listener, app.into_make_service()).await.unwrap();
    });
    (format!("http://{addr}"), state)
}

async fn create_session(client: &Client, base: &str) -> (String, String) {
    let response = client
        .post(format!("{base}/sessions"))
        .json(&json!({
            "quiz_id": Uuid::new_v4(),
            "time_limit_secs": 60,
            "question_count": 2,
            "available_questions": 5,
        }))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::CREATED);
    let body: Value = response.json().await.unwrap();
    let code = body["session"]["join_code"].as_str().unwrap().to_owned();
    let token = body["host_token"].as_str().unwrap().to_owned();
    (code, token)
}

async fn join(client: &Client, base: &str, code: &str, name: &str) -> String {
    let response = client
        .post(format!("{base}/sessions/{code}/players"))
        .json(&json!({ "name": name, "avatar_url": "https://avatars.example/a.png" }))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let body: Value = response.json().await.unwrap();
    body["id"].as_str().unwrap().to_owned()
}

#[tokio::test]
async fn healthcheck_reports_degraded_without_store() {
    let (base, state) = spawn_server(false).await;
    let client = Client::new();

    let body: Value = client
        .get(format!("{base}/healthcheck"))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(body["status"], "degraded");

    let response = client
        .get(format!("{base}/sessions/ABC123"))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::SERVICE_UNAVAILABLE);

    state
        .install_session_store(Arc::new(MemorySessionStore::new()))
        .await;
    let body: Value = client
        .get(format!("{base}/healthcheck"))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(body["status"], "ok");
}

#[tokio::test]
async fn host_runs_a_session_over_rest() {
    let (base, _state) = spawn_server(true).await;
    let client = Client::new();
    let (code, token) = create_session(&client, &base).await;

    let body: Value = client
        .get(format!("{base}/sessions/{}", code.to_lowercase()))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(body["phase"], "waiting");

    let player_id = join(&client, &base, &code, "ada").await;

    let missing = client
        .post(format!("{base}/sessions/{code}/start"))
        .send()
        .await
        .unwrap();
    assert_eq!(missing.status(), StatusCode::UNAUTHORIZED);

    let wrong = client
        .post(format!("{base}/sessions/{code}/start"))
        .header("X-Host-Token", Uuid::new_v4().to_string())
        .send()
        .await
        .unwrap();
    assert_eq!(wrong.status(), StatusCode::CONFLICT);

    let started: Value = client
        .post(format!("{base}/sessions/{code}/start"))
        .header("X-Host-Token", &token)
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(started["phase"], "started");

    let answer = client
        .post(format!("{base}/sessions/{code}/answers"))
        .json(&json!({ "player_id": player_id, "question_index": 0, "points": 40 }))
        .send()
        .await
        .unwrap();
    assert_eq!(answer.status(), StatusCode::OK);

    let view: Value = client
        .get(format!("{base}/sessions/{code}/view"))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(view["leaderboard"][0]["answered_count"], 1);
    assert_eq!(view["leaderboard"][0]["score"], 40);
    assert!(view["time_remaining"].as_u64().unwrap() <= 60);
    assert!(view.get("podium").is_none());

    let ended: Value = client
        .post(format!("{base}/sessions/{code}/end"))
        .header("X-Host-Token", &token)
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(ended["phase"], "finished");

    let late = client
        .post(format!("{base}/sessions/{code}/answers"))
        .json(&json!({ "player_id": player_id, "question_index": 1, "points": 40 }))
        .send()
        .await
        .unwrap();
    assert_eq!(late.status(), StatusCode::CONFLICT);
}

#[tokio::test]
async fn rejects_invalid_payloads_and_unknown_codes() {
    let (base, _state) = spawn_server(true).await;
    let client = Client::new();

    let invalid = client
        .post(format!("{base}/sessions"))
        .json(&json!({
            "quiz_id": Uuid::new_v4(),
            "time_limit_secs": 0,
            "question_count": 2,
            "available_questions": 5,
        }))
        .send()
        .await
        .unwrap();
    assert_eq!(invalid.status(), StatusCode::BAD_REQUEST);

    let unknown = client
        .get(format!("{base}/sessions/ZZZZZZ/view"))
        .send()
        .await
        .unwrap();
    assert_eq!(unknown.status(), StatusCode::NOT_FOUND);

    let (code, _) = create_session(&client, &base).await;
    let blank_name = client
        .post(format!("{base}/sessions/{code}/players"))
        .json(&json!({ "name": "  ", "avatar_url": "https://avatars.example/a.png" }))
        .send()
        .await
        .unwrap();
    assert_eq!(blank_name.status(), StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn stream_opens_with_a_handshake_and_a_view() {
    let (base, state) = spawn_server(true).await;
    let client = Client::new();
    let (code, _) = create_session(&client, &base).await;

    let mut response = client
        .get(format!("{base}/sessions/{code}/stream"))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    let mut received = String::new();
    timeout(Duration::from_secs(5), async {
        while !(received.contains("event: handshake") && received.contains("\"status\":\"live\"")) {
            let chunk = response.chunk().await.unwrap().unwrap();
            received.push_str(&String::from_utf8_lossy(&chunk));
        }
    })
    .await
    .expect("stream never delivered a live view");

    let sessions = state.session_service().await.unwrap();
    let session = sessions.find_session(&code).await.unwrap();
    assert!(state.channel().subscription_count() > 0);
    assert!(received.contains(&session.id.to_string()));
}
