//! Integration tests for the intake REST surface.
//!
//! Each test spins up an Axum server on a random port and talks to it over
//! HTTP.

use std::sync::Arc;
use std::time::Duration;

use serde_json::Value;
use tokio::net::TcpListener;
use tokio::time::timeout;

use cvilo_intake::intake::{ConversationDriver, IntakeRouteState, intake_routes};
use cvilo_intake::store::LibSqlBackend;

/// Maximum time any test is allowed to run before we consider it hung.
const TEST_TIMEOUT: Duration = Duration::from_secs(5);

const ANSWERS: [&str; 8] = [
    "Jane Doe",
    "jane@example.com",
    "+1 555 0100",
    "Backend engineer who likes state machines.",
    "BSc Computer Science, 2015",
    "8 years building APIs",
    "Rust, SQL, Go",
    "English, Persian",
];

/// Start an Axum server on a random port, return (port, driver).
async fn start_server() -> (u16, ConversationDriver) {
    let db = Arc::new(LibSqlBackend::new_memory().await.unwrap());
    let app = intake_routes(IntakeRouteState {
        store: db.clone(),
        resumes: db.clone(),
    });
    let driver = ConversationDriver::new(db.clone(), db);

    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let port = listener.local_addr().unwrap().port();

    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });

    // Give the server a moment to start accepting connections.
    tokio::time::sleep(Duration::from_millis(50)).await;

    (port, driver)
}

#[tokio::test]
async fn rest_health_endpoint() {
    timeout(TEST_TIMEOUT, async {
        let (port, _driver) = start_server().await;

        let resp = reqwest::get(format!("http://127.0.0.1:{port}/health"))
            .await
            .unwrap();
        assert_eq!(resp.status(), 200);

        let body: Value = resp.json().await.unwrap();
        assert_eq!(body["status"], "ok");
        assert_eq!(body["service"], "cvilo-intake");
    })
    .await
    .expect("test timed out");
}

#[tokio::test]
async fn rest_intake_progress_follows_conversation() {
    timeout(TEST_TIMEOUT, async {
        let (port, driver) = start_server().await;
        let url = format!("http://127.0.0.1:{port}/api/intake/42");

        let resp = reqwest::get(&url).await.unwrap();
        assert_eq!(resp.status(), 404);

        driver.handle_message("42", "Jane Doe").await.unwrap();

        let body: Value = reqwest::get(&url).await.unwrap().json().await.unwrap();
        assert_eq!(body["identity"], "42");
        assert_eq!(body["current_step"], "email");
        assert_eq!(body["answered"], 1);
        assert_eq!(body["fields"]["name"], "Jane Doe");
        assert!(body["completed_at"].is_null());
    })
    .await
    .expect("test timed out");
}

#[tokio::test]
async fn rest_resume_after_completion() {
    timeout(TEST_TIMEOUT, async {
        let (port, driver) = start_server().await;
        let base = format!("http://127.0.0.1:{port}/api/resumes/42");

        let resp = reqwest::get(&base).await.unwrap();
        assert_eq!(resp.status(), 404);

        for answer in ANSWERS {
            driver.handle_message("42", answer).await.unwrap();
        }

        let body: Value = reqwest::get(&base).await.unwrap().json().await.unwrap();
        assert_eq!(body["full_name"], "Jane Doe");
        assert_eq!(body["title"], "Jane Doe Resume");
        assert_eq!(body["is_active"], true);

        let resp = reqwest::get(format!("{base}/markdown")).await.unwrap();
        assert_eq!(resp.status(), 200);
        let text = resp.text().await.unwrap();
        assert!(text.starts_with("# Jane Doe"));
        assert!(text.contains("## Skills"));

        let progress: Value = reqwest::get(format!("http://127.0.0.1:{port}/api/intake/42"))
            .await
            .unwrap()
            .json()
            .await
            .unwrap();
        assert_eq!(progress["complete"], true);
        assert_eq!(progress["current_step"], "done");
    })
    .await
    .expect("test timed out");
}
