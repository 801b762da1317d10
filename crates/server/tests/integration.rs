//! Integration tests for the intake server.
//!
//! The router is driven in-process through `oneshot` with a scripted LLM and
//! a log file in a temporary directory.

use std::collections::VecDeque;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use axum::{
    Router,
    body::Body,
    http::{Request, StatusCode, header},
};
use http_body_util::BodyExt;
use serde_json::{Value as JsonValue, json};
use tempfile::TempDir;
use tokio::sync::Notify;
use tower::ServiceExt;

use intake_core::{IntakeError, InterviewLlm, InterviewTurn, LlmMessage, TurnAction, TurnRequest};
use intake_server::config::Config;
use intake_server::store::FileLogStore;

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

/// Lets a test pause an interview turn
#[derive(Default)]
struct Hold {
    entered: Notify,
    release: Notify,
}

/// LLM double: pops scripted turns, echoes a fixed reply, structures every
/// transcript into a one-item QuestionnaireResponse
#[derive(Default)]
struct FakeLlm {
    turns: Mutex<VecDeque<InterviewTurn>>,
    hold: Option<Arc<Hold>>,
}

impl FakeLlm {
    fn with_turns(turns: Vec<InterviewTurn>) -> Self {
        Self {
            turns: Mutex::new(turns.into()),
            ..Default::default()
        }
    }
}

#[async_trait]
impl InterviewLlm for FakeLlm {
    async fn interpret_free_text(&self, _messages: Vec<LlmMessage>) -> Result<String, IntakeError> {
        Ok("Thanks, noted.".to_string())
    }

    async fn run_interview_turn(&self, _request: &TurnRequest) -> Result<InterviewTurn, IntakeError> {
        if let Some(hold) = &self.hold {
            hold.entered.notify_one();
            hold.release.notified().await;
        }
        self.turns
            .lock()
            .unwrap()
            .pop_front()
            .ok_or_else(|| IntakeError::Llm("script exhausted".into()))
    }

    async fn structure_transcript(&self, _markdown: &str) -> Result<JsonValue, IntakeError> {
        Ok(json!({
            "resourceType": "QuestionnaireResponse",
            "status": "completed",
            "item": [{"linkId": "q1", "answer": [{"valueInteger": 2}]}]
        }))
    }
}

fn turn(action: TurnAction, text: &str, asked: Option<&str>) -> InterviewTurn {
    InterviewTurn {
        action,
        text_response: text.to_string(),
        link_id_asked: asked.map(str::to_string),
        link_id_clarify: None,
        requires_answer_options: false,
    }
}

struct TestApp {
    router: Router,
    _dir: TempDir,
}

fn test_app(llm: FakeLlm) -> TestApp {
    test_app_with(llm, |_| {})
}

fn test_app_with(llm: FakeLlm, tweak: impl FnOnce(&mut Config)) -> TestApp {
    let dir = TempDir::new().unwrap();
    let mut config = Config {
        bind_address: "0.0.0.0:0".to_string(),
        log_dir: dir.path().to_path_buf(),
        rate_limit_rps: 1000,
        advance_delay_ms: 0,
        ..Config::default()
    };
    tweak(&mut config);
    let store = FileLogStore::new(config.log_file());
    let router = intake_server::build_app(Arc::new(llm), Arc::new(store), &config);
    TestApp { router, _dir: dir }
}

/// Send a request to the app and return (status, body as JSON).
async fn request(app: &TestApp, req: Request<Body>) -> (StatusCode, JsonValue) {
    let response = app.router.clone().oneshot(req).await.expect("Request failed");
    let status = response.status();
    let bytes = response
        .into_body()
        .collect()
        .await
        .expect("Failed to read body")
        .to_bytes();

    let body = if bytes.is_empty() {
        JsonValue::Null
    } else {
        serde_json::from_slice(&bytes).unwrap_or(JsonValue::Null)
    };

    (status, body)
}

fn get(uri: &str) -> Request<Body> {
    Request::builder()
        .method("GET")
        .uri(uri)
        .body(Body::empty())
        .unwrap()
}

fn post(uri: &str, body: JsonValue) -> Request<Body> {
    Request::builder()
        .method("POST")
        .uri(uri)
        .header("Content-Type", "application/json")
        .body(Body::from(serde_json::to_vec(&body).unwrap()))
        .unwrap()
}

fn delete(uri: &str) -> Request<Body> {
    Request::builder()
        .method("DELETE")
        .uri(uri)
        .body(Body::empty())
        .unwrap()
}

fn mood_questionnaire() -> JsonValue {
    json!({
        "resourceType": "Questionnaire",
        "title": "Mood (Short)",
        "item": [{
            "linkId": "q1",
            "text": "Feeling down",
            "type": "choice",
            "answerOption": [
                {"valueCoding": {"code": "a", "display": "Not at all"}},
                {"valueCoding": {"code": "b", "display": "Several days"}},
                {"valueCoding": {"code": "c", "display": "Most days"}}
            ]
        }]
    })
}

/// Start a session and return its id along with the creation body
async fn create_session(app: &TestApp, mode: &str) -> (String, JsonValue) {
    let response = app
        .router
        .clone()
        .oneshot(post(
            "/sessions",
            json!({"questionnaire": mood_questionnaire(), "mode": mode}),
        ))
        .await
        .expect("Create request failed");

    assert_eq!(response.status(), StatusCode::CREATED);
    let location = response
        .headers()
        .get(header::LOCATION)
        .expect("Missing Location header")
        .to_str()
        .unwrap()
        .to_string();
    let bytes = response.into_body().collect().await.unwrap().to_bytes();
    let body: JsonValue = serde_json::from_slice(&bytes).unwrap();

    let id = location.rsplit('/').next().unwrap().to_string();
    assert_eq!(body["id"], id.as_str());
    (id, body)
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[tokio::test]
async fn health_reports_unconfigured_llm() {
    let app = test_app(FakeLlm::default());
    let (status, body) = request(&app, get("/health")).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "healthy");
    assert_eq!(body["llm"], "unconfigured");
    assert_eq!(body["activeSessions"], 0);
}

#[tokio::test]
async fn metrics_endpoint_renders_text() {
    let app = test_app(FakeLlm::default());
    let response = app.router.clone().oneshot(get("/metrics")).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);
}

#[tokio::test]
async fn responses_carry_a_request_id() {
    let app = test_app(FakeLlm::default());
    let req = Request::builder()
        .uri("/health")
        .header("X-Request-ID", "abc-123")
        .body(Body::empty())
        .unwrap();
    let response = app.router.clone().oneshot(req).await.unwrap();
    assert_eq!(response.headers()["X-Request-ID"], "abc-123");

    let response = app.router.clone().oneshot(get("/health")).await.unwrap();
    assert!(response.headers().contains_key("X-Request-ID"));
}

#[tokio::test]
async fn step_session_greets_and_asks() {
    let app = test_app(FakeLlm::default());
    let (_, body) = create_session(&app, "step").await;

    assert_eq!(body["mode"], "step");
    assert_eq!(body["phase"], "collecting");
    assert_eq!(body["stepPhase"], "awaiting_score");
    assert_eq!(body["questionnaireTitle"], "Mood (Short)");
    assert_eq!(body["currentQuestion"]["linkId"], "q1");

    let messages = body["messages"].as_array().unwrap();
    assert_eq!(messages.len(), 2);
    assert_eq!(messages[0]["sender"], "bot");
    assert_eq!(messages[1]["text"], "Have you been feeling down?");
}

#[tokio::test]
async fn typed_answer_completes_and_is_logged() {
    let app = test_app(FakeLlm::default());
    let (id, _) = create_session(&app, "step").await;

    let (status, body) = request(
        &app,
        post(&format!("/sessions/{id}/messages"), json!({"text": "b"})),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["phase"], "completed");
    assert_eq!(body["answers"][0]["answerText"], "Several days");
    assert_eq!(body["finalization"]["status"], "saved");

    let (status, logs) = request(&app, get("/logs")).await;
    assert_eq!(status, StatusCode::OK);
    let logs = logs.as_array().unwrap();
    assert_eq!(logs.len(), 1);
    assert_eq!(logs[0]["questionnaireTitle"], "Mood (Short)");
    assert_eq!(logs[0]["hasStructuredResponse"], true);
    assert_eq!(logs[0]["grandTotal"], 2.0);

    let day = body["finalization"]["day"].as_str().unwrap();
    let time = body["finalization"]["time"].as_str().unwrap();
    assert_eq!(logs[0]["day"], day);
    assert_eq!(logs[0]["time"], time);

    let (status, record) = request(&app, get(&format!("/logs/{day}/{time}"))).await;
    assert_eq!(status, StatusCode::OK);
    assert!(record["markdown"].as_str().unwrap().contains("**Patient:** Several days"));
    assert_eq!(record["structuredResponse"]["resourceType"], "QuestionnaireResponse");
}

#[tokio::test]
async fn completed_session_rejects_input() {
    let app = test_app(FakeLlm::default());
    let (id, _) = create_session(&app, "step").await;

    let (status, body) = request(&app, post(&format!("/sessions/{id}/end"), json!({}))).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["phase"], "completed");

    let (status, body) = request(
        &app,
        post(&format!("/sessions/{id}/messages"), json!({"text": "a"})),
    )
    .await;
    assert_eq!(status, StatusCode::CONFLICT);
    assert_eq!(body["resourceType"], "OperationOutcome");

    // Ending twice saves once
    let (status, _) = request(&app, post(&format!("/sessions/{id}/end"), json!({}))).await;
    assert_eq!(status, StatusCode::OK);
    let (_, logs) = request(&app, get("/logs")).await;
    assert_eq!(logs.as_array().unwrap().len(), 1);
}

#[tokio::test]
async fn unmatched_answer_offers_options_then_selection_records() {
    let app = test_app(FakeLlm::default());
    let (id, _) = create_session(&app, "step").await;

    let (_, body) = request(
        &app,
        post(&format!("/sessions/{id}/messages"), json!({"text": "hmm"})),
    )
    .await;
    assert_eq!(body["stepPhase"], "awaiting_score");
    assert_eq!(body["answers"].as_array().unwrap().len(), 0);

    let (status, body) = request(
        &app,
        post(&format!("/sessions/{id}/select"), json!({"code": "c"})),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["phase"], "completed");
    assert_eq!(body["answers"][0]["code"], "c");
}

#[tokio::test]
async fn transcript_downloads_as_markdown() {
    let app = test_app(FakeLlm::default());
    let (id, _) = create_session(&app, "step").await;
    let (_, body) = request(
        &app,
        post(&format!("/sessions/{id}/messages"), json!({"text": "a"})),
    )
    .await;
    let day = body["finalization"]["day"].as_str().unwrap().to_string();
    let time = body["finalization"]["time"].as_str().unwrap().to_string();

    let response = app
        .router
        .clone()
        .oneshot(get(&format!("/logs/{day}/{time}/transcript")))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(
        response.headers()[header::CONTENT_TYPE],
        "text/markdown; charset=utf-8"
    );
    let disposition = response.headers()[header::CONTENT_DISPOSITION].to_str().unwrap();
    assert_eq!(
        disposition,
        format!("attachment; filename=\"intake-log_{day}_{time}_Mood-Short.md\"")
    );
    let bytes = response.into_body().collect().await.unwrap().to_bytes();
    assert!(String::from_utf8_lossy(&bytes).contains("Have you been feeling down?"));
}

#[tokio::test]
async fn deleting_a_log_removes_it() {
    let app = test_app(FakeLlm::default());
    let (id, _) = create_session(&app, "step").await;
    let (_, body) = request(&app, post(&format!("/sessions/{id}/end"), json!({}))).await;
    let day = body["finalization"]["day"].as_str().unwrap().to_string();
    let time = body["finalization"]["time"].as_str().unwrap().to_string();

    let (status, _) = request(&app, delete(&format!("/logs/{day}/{time}"))).await;
    assert_eq!(status, StatusCode::NO_CONTENT);

    let (status, _) = request(&app, get(&format!("/logs/{day}/{time}"))).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    let (status, _) = request(&app, delete(&format!("/logs/{day}/{time}"))).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn full_mode_runs_turns_and_refuses_selection() {
    let app = test_app(FakeLlm::with_turns(vec![
        turn(TurnAction::Ask, "How often have you felt down?", Some("q1")),
        turn(TurnAction::Complete, "Thank you, that's everything.", None),
    ]));
    let (id, body) = create_session(&app, "llm-full").await;
    assert_eq!(body["interviewActive"], true);
    assert_eq!(body["messages"][0]["text"], "How often have you felt down?");

    let (status, body) = request(
        &app,
        post(&format!("/sessions/{id}/select"), json!({"code": "a"})),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["resourceType"], "OperationOutcome");

    let (status, body) = request(
        &app,
        post(&format!("/sessions/{id}/messages"), json!({"text": "several days"})),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["phase"], "completed");
    assert_eq!(body["answers"][0]["linkId"], "q1");
    assert_eq!(body["answers"][0]["answerText"], "several days");
}

#[tokio::test]
async fn invalid_questionnaire_is_rejected() {
    let app = test_app(FakeLlm::default());
    let (status, body) = request(
        &app,
        post("/sessions", json!({"questionnaire": {"resourceType": "Patient"}})),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["resourceType"], "OperationOutcome");
}

#[tokio::test]
async fn unknown_sessions_are_not_found() {
    let app = test_app(FakeLlm::default());
    let missing = "67e55044-10b1-426f-9247-bb680e5fe0c8";

    let (status, _) = request(&app, get(&format!("/sessions/{missing}"))).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    let (status, _) = request(
        &app,
        post(&format!("/sessions/{missing}/messages"), json!({"text": "hi"})),
    )
    .await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    let (status, _) = request(&app, delete(&format!("/sessions/{missing}"))).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn discarded_sessions_disappear() {
    let app = test_app(FakeLlm::default());
    let (id, _) = create_session(&app, "step").await;

    let (_, health) = request(&app, get("/health")).await;
    assert_eq!(health["activeSessions"], 1);

    let (status, _) = request(&app, delete(&format!("/sessions/{id}"))).await;
    assert_eq!(status, StatusCode::NO_CONTENT);
    let (status, _) = request(&app, get(&format!("/sessions/{id}"))).await;
    assert_eq!(status, StatusCode::NOT_FOUND);

    // Nothing was finalized
    let (_, logs) = request(&app, get("/logs")).await;
    assert!(logs.as_array().unwrap().is_empty());
}

#[tokio::test]
async fn session_is_reachable_only_once_started() {
    let hold = Arc::new(Hold::default());
    let llm = FakeLlm {
        hold: Some(hold.clone()),
        ..FakeLlm::with_turns(vec![turn(TurnAction::Ask, "What is your name?", Some("q1"))])
    };
    let app = test_app(llm);

    let creating = {
        let router = app.router.clone();
        tokio::spawn(async move {
            router
                .oneshot(post(
                    "/sessions",
                    json!({"questionnaire": mood_questionnaire(), "mode": "llm-full"}),
                ))
                .await
                .unwrap()
        })
    };
    hold.entered.notified().await;

    let (_, health) = request(&app, get("/health")).await;
    assert_eq!(health["activeSessions"], 0);

    hold.release.notify_one();
    let response = creating.await.unwrap();
    assert_eq!(response.status(), StatusCode::CREATED);

    let (_, health) = request(&app, get("/health")).await;
    assert_eq!(health["activeSessions"], 1);
}

#[tokio::test]
async fn idle_sessions_are_evicted() {
    let app = test_app_with(FakeLlm::default(), |config| config.session_ttl_secs = 0);

    let (first, _) = create_session(&app, "step").await;
    let (second, _) = create_session(&app, "step").await;

    let (status, _) = request(&app, get(&format!("/sessions/{first}"))).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    let (status, _) = request(&app, get(&format!("/sessions/{second}"))).await;
    assert_eq!(status, StatusCode::OK);

    let (_, health) = request(&app, get("/health")).await;
    assert_eq!(health["activeSessions"], 1);
}

#[tokio::test]
async fn sessions_within_the_ttl_are_kept() {
    let app = test_app(FakeLlm::default());

    let (first, _) = create_session(&app, "step").await;
    create_session(&app, "step").await;

    let (status, _) = request(&app, get(&format!("/sessions/{first}"))).await;
    assert_eq!(status, StatusCode::OK);
}
