use std::sync::Arc;

use axum_test::TestServer;
use chrono::{DateTime, Duration, NaiveTime, Utc};
use serde_json::json;
use uuid::Uuid;

use tutorhub_common::ApiResponse;
use tutorhub_marketplace::config::AppConfig;
use tutorhub_marketplace::models::{AuthResponse, Lesson, TimeRange};
use tutorhub_marketplace::realtime::NullEmitter;
use tutorhub_marketplace::repository::InMemoryStore;
use tutorhub_marketplace::{routes, AppState};

fn create_test_server() -> TestServer {
    let state = AppState {
        store: Arc::new(InMemoryStore::new()),
        emitter: Arc::new(NullEmitter),
        config: AppConfig::from_env(),
    };
    TestServer::new(routes::create_router(state)).unwrap()
}

fn bearer(token: Uuid) -> (axum::http::HeaderName, axum::http::HeaderValue) {
    (
        axum::http::header::AUTHORIZATION,
        axum::http::HeaderValue::from_str(&format!("Bearer {}", token)).unwrap(),
    )
}

async fn register(server: &TestServer, email: &str, role: &str) -> AuthResponse {
    let response = server
        .post("/auth/register")
        .json(&json!({
            "email": email,
            "username": email.split('@').next().unwrap(),
            "password": "CorrectHorse9!",
            "role": role,
        }))
        .await;
    response.assert_status_ok();
    let body: ApiResponse<AuthResponse> = response.json();
    body.data.unwrap()
}

/// Registers a teacher, publishes a profile, and opens every weekday from
/// 08:00 to 18:00 UTC.
async fn register_available_teacher(server: &TestServer, email: &str) -> AuthResponse {
    let auth = register(server, email, "teacher").await;
    let (name, value) = bearer(auth.token);

    server
        .post("/teachers/me/profile")
        .add_header(name.clone(), value.clone())
        .json(&json!({
            "subjects": ["math", "physics"],
            "hourly_rate_cents": 6000,
            "currency": "usd",
            "bio": "Ten years of teaching",
            "timezone": "UTC",
            "tz_offset_minutes": 0,
            "auto_accept": true,
            "min_notice_hours": 24,
            "commission_percent": null,
        }))
        .await
        .assert_status_ok();

    let open = TimeRange {
        start: NaiveTime::from_hms_opt(8, 0, 0).unwrap(),
        end: NaiveTime::from_hms_opt(18, 0, 0).unwrap(),
    };
    server
        .put("/teachers/me/availability")
        .add_header(name, value)
        .json(&json!({ "weekly": { "days": [[open], [open], [open], [open], [open], [open], [open]] } }))
        .await
        .assert_status_ok();

    auth
}

fn next_week_at(hour: u32) -> DateTime<Utc> {
    (Utc::now() + Duration::days(7))
        .date_naive()
        .and_hms_opt(hour, 0, 0)
        .unwrap()
        .and_utc()
}

#[tokio::test]
async fn health_reports_ok() {
    let server = create_test_server();
    let response = server.get("/health").await;
    response.assert_status_ok();

    let body: ApiResponse<serde_json::Value> = response.json();
    assert!(body.success);
}

#[tokio::test]
async fn register_and_fetch_current_user() {
    let server = create_test_server();
    let auth = register(&server, "anna@example.com", "student").await;
    assert_eq!(auth.user.email, "anna@example.com");

    let (name, value) = bearer(auth.token);
    let response = server.get("/auth/me").add_header(name, value).await;
    response.assert_status_ok();
}

#[tokio::test]
async fn duplicate_email_is_rejected() {
    let server = create_test_server();
    register(&server, "taken@example.com", "student").await;

    let response = server
        .post("/auth/register")
        .json(&json!({
            "email": "taken@example.com",
            "username": "someone",
            "password": "CorrectHorse9!",
            "role": "student",
        }))
        .await;
    response.assert_status_conflict();
}

#[tokio::test]
async fn short_password_is_rejected() {
    let server = create_test_server();
    let response = server
        .post("/auth/register")
        .json(&json!({
            "email": "weak@example.com",
            "username": "weak",
            "password": "short",
            "role": "student",
        }))
        .await;
    response.assert_status_bad_request();
}

#[tokio::test]
async fn admin_self_registration_is_rejected() {
    let server = create_test_server();
    let response = server
        .post("/auth/register")
        .json(&json!({
            "email": "admin@example.com",
            "username": "admin",
            "password": "CorrectHorse9!",
            "role": "admin",
        }))
        .await;
    response.assert_status_bad_request();
}

#[tokio::test]
async fn wrong_password_is_unauthorized() {
    let server = create_test_server();
    register(&server, "login@example.com", "student").await;

    let response = server
        .post("/auth/login")
        .json(&json!({
            "email": "login@example.com",
            "password": "NotThePassword1!",
        }))
        .await;
    response.assert_status_unauthorized();
}

#[tokio::test]
async fn logout_invalidates_the_session() {
    let server = create_test_server();
    let auth = register(&server, "bye@example.com", "student").await;
    let (name, value) = bearer(auth.token);

    server
        .post("/auth/logout")
        .add_header(name.clone(), value.clone())
        .await
        .assert_status_ok();

    let response = server.get("/auth/me").add_header(name, value).await;
    response.assert_status_unauthorized();
}

#[tokio::test]
async fn protected_routes_require_a_token() {
    let server = create_test_server();
    server.get("/auth/me").await.assert_status_unauthorized();
    server.get("/lessons").await.assert_status_unauthorized();
    server
        .get("/conversations")
        .await
        .assert_status_unauthorized();
}

#[tokio::test]
async fn student_cannot_publish_a_teacher_profile() {
    let server = create_test_server();
    let auth = register(&server, "student@example.com", "student").await;
    let (name, value) = bearer(auth.token);

    let response = server
        .post("/teachers/me/profile")
        .add_header(name, value)
        .json(&json!({
            "subjects": ["math"],
            "hourly_rate_cents": 5000,
            "currency": "USD",
            "bio": null,
            "timezone": "UTC",
            "tz_offset_minutes": 0,
            "auto_accept": true,
            "min_notice_hours": 12,
            "commission_percent": null,
        }))
        .await;
    response.assert_status_forbidden();
}

#[tokio::test]
async fn teacher_search_filters_by_subject_and_rate() {
    let server = create_test_server();
    let teacher = register_available_teacher(&server, "maria@example.com").await;

    let response = server.get("/teachers/search?subject=MATH").await;
    response.assert_status_ok();
    let body: ApiResponse<Vec<serde_json::Value>> = response.json();
    let found = body.data.unwrap();
    assert_eq!(found.len(), 1);
    assert_eq!(found[0]["user_id"], json!(teacher.user.user_id));

    let response = server.get("/teachers/search?subject=math&max_rate_cents=5000").await;
    let body: ApiResponse<Vec<serde_json::Value>> = response.json();
    assert!(body.data.unwrap().is_empty());
}

#[tokio::test]
async fn slot_listing_excludes_booked_intervals() {
    let server = create_test_server();
    let teacher = register_available_teacher(&server, "slots@example.com").await;
    let student = register(&server, "booker@example.com", "student").await;

    let scheduled_at = next_week_at(10);
    let date = scheduled_at.date_naive();

    let (name, value) = bearer(student.token);
    server
        .post("/lessons")
        .add_header(name, value)
        .json(&json!({
            "teacher_id": teacher.user.user_id,
            "subject": "math",
            "scheduled_at": scheduled_at,
            "duration_minutes": 60,
        }))
        .await
        .assert_status_ok();

    let response = server
        .get(&format!(
            "/teachers/{}/slots?from={}&to={}&duration=60",
            teacher.user.user_id, date, date
        ))
        .await;
    response.assert_status_ok();
    let body: ApiResponse<Vec<serde_json::Value>> = response.json();
    let slots = body.data.unwrap();

    // Ten hourly slots in the 08:00-18:00 window, minus the booked one.
    assert_eq!(slots.len(), 9);
    let starts: Vec<DateTime<Utc>> = slots
        .iter()
        .map(|s| {
            s["start"]
                .as_str()
                .unwrap()
                .parse::<DateTime<Utc>>()
                .unwrap()
        })
        .collect();
    assert!(!starts.contains(&scheduled_at));
}

#[tokio::test]
async fn double_booking_is_a_conflict() {
    let server = create_test_server();
    let teacher = register_available_teacher(&server, "busy@example.com").await;
    let first = register(&server, "first@example.com", "student").await;
    let second = register(&server, "second@example.com", "student").await;

    let scheduled_at = next_week_at(9);
    let booking = json!({
        "teacher_id": teacher.user.user_id,
        "subject": "math",
        "scheduled_at": scheduled_at,
        "duration_minutes": 60,
    });

    let (name, value) = bearer(first.token);
    server
        .post("/lessons")
        .add_header(name, value)
        .json(&booking)
        .await
        .assert_status_ok();

    let (name, value) = bearer(second.token);
    let response = server
        .post("/lessons")
        .add_header(name, value)
        .json(&booking)
        .await;
    response.assert_status_conflict();
}

#[tokio::test]
async fn booking_outside_the_template_is_rejected() {
    let server = create_test_server();
    let teacher = register_available_teacher(&server, "hours@example.com").await;
    let student = register(&server, "early@example.com", "student").await;

    let (name, value) = bearer(student.token);
    let response = server
        .post("/lessons")
        .add_header(name, value)
        .json(&json!({
            "teacher_id": teacher.user.user_id,
            "subject": "math",
            "scheduled_at": next_week_at(6),
            "duration_minutes": 60,
        }))
        .await;
    response.assert_status_bad_request();
}

#[tokio::test]
async fn booking_creates_a_held_payment_with_commission() {
    let server = create_test_server();
    let teacher = register_available_teacher(&server, "paid@example.com").await;
    let student = register(&server, "payer@example.com", "student").await;

    let (name, value) = bearer(student.token);
    let response = server
        .post("/lessons")
        .add_header(name.clone(), value.clone())
        .json(&json!({
            "teacher_id": teacher.user.user_id,
            "subject": "physics",
            "scheduled_at": next_week_at(11),
            "duration_minutes": 60,
        }))
        .await;
    response.assert_status_ok();
    let body: ApiResponse<Lesson> = response.json();
    let lesson = body.data.unwrap();
    assert_eq!(lesson.price_cents, 6000);

    let response = server
        .get(&format!("/lessons/{}/payment", lesson.lesson_id))
        .add_header(name, value)
        .await;
    response.assert_status_ok();
    let body: ApiResponse<serde_json::Value> = response.json();
    let payment = body.data.unwrap();
    assert_eq!(payment["status"], "held");
    assert_eq!(payment["amount_cents"], 6000);
    // Default 15% commission.
    assert_eq!(payment["platform_fee_cents"], 900);
    assert_eq!(payment["teacher_net_cents"], 5100);
}

#[tokio::test]
async fn early_cancellation_refunds_in_full() {
    let server = create_test_server();
    let teacher = register_available_teacher(&server, "refund@example.com").await;
    let student = register(&server, "refunded@example.com", "student").await;

    let (name, value) = bearer(student.token);
    let response = server
        .post("/lessons")
        .add_header(name.clone(), value.clone())
        .json(&json!({
            "teacher_id": teacher.user.user_id,
            "subject": "math",
            "scheduled_at": next_week_at(14),
            "duration_minutes": 60,
        }))
        .await;
    let body: ApiResponse<Lesson> = response.json();
    let lesson = body.data.unwrap();

    // A week of notice against a 24 hour minimum.
    server
        .post(&format!("/lessons/{}/cancel", lesson.lesson_id))
        .add_header(name.clone(), value.clone())
        .json(&json!({ "reason": "schedule change" }))
        .await
        .assert_status_ok();

    let response = server
        .get(&format!("/lessons/{}/payment", lesson.lesson_id))
        .add_header(name, value)
        .await;
    let body: ApiResponse<serde_json::Value> = response.json();
    let payment = body.data.unwrap();
    assert_eq!(payment["status"], "refunded");
    assert_eq!(payment["refunded_cents"], 6000);
    assert_eq!(payment["teacher_net_cents"], 0);
}

#[tokio::test]
async fn strangers_cannot_read_someone_elses_lesson() {
    let server = create_test_server();
    let teacher = register_available_teacher(&server, "private@example.com").await;
    let student = register(&server, "owner@example.com", "student").await;
    let stranger = register(&server, "stranger@example.com", "student").await;

    let (name, value) = bearer(student.token);
    let response = server
        .post("/lessons")
        .add_header(name, value)
        .json(&json!({
            "teacher_id": teacher.user.user_id,
            "subject": "math",
            "scheduled_at": next_week_at(15),
            "duration_minutes": 30,
        }))
        .await;
    let body: ApiResponse<Lesson> = response.json();
    let lesson = body.data.unwrap();

    let (name, value) = bearer(stranger.token);
    let response = server
        .get(&format!("/lessons/{}", lesson.lesson_id))
        .add_header(name, value)
        .await;
    response.assert_status_forbidden();
}

#[tokio::test]
async fn messaging_round_trip_with_unread_counts() {
    let server = create_test_server();
    let teacher = register(&server, "chat-teacher@example.com", "teacher").await;
    let student = register(&server, "chat-student@example.com", "student").await;

    let (s_name, s_value) = bearer(student.token);
    let response = server
        .post("/conversations")
        .add_header(s_name.clone(), s_value.clone())
        .json(&json!({ "participant_id": teacher.user.user_id }))
        .await;
    response.assert_status_ok();
    let body: ApiResponse<serde_json::Value> = response.json();
    let conversation_id = body.data.unwrap()["conversation_id"]
        .as_str()
        .unwrap()
        .to_string();

    let response = server
        .post(&format!("/conversations/{}/messages", conversation_id))
        .add_header(s_name.clone(), s_value.clone())
        .json(&json!({ "content": "Hi, are you free on Monday?" }))
        .await;
    response.assert_status_ok();
    let body: ApiResponse<serde_json::Value> = response.json();
    let message_id = body.data.unwrap()["message_id"]
        .as_str()
        .unwrap()
        .to_string();

    // The teacher sees one unread conversation.
    let (t_name, t_value) = bearer(teacher.token);
    let response = server
        .get("/conversations")
        .add_header(t_name.clone(), t_value.clone())
        .await;
    let body: ApiResponse<Vec<serde_json::Value>> = response.json();
    let list = body.data.unwrap();
    assert_eq!(list.len(), 1);
    assert_eq!(list[0]["unread"], 1);

    server
        .post(&format!("/conversations/{}/read", conversation_id))
        .add_header(t_name.clone(), t_value.clone())
        .await
        .assert_status_ok();

    let response = server
        .get("/conversations")
        .add_header(t_name.clone(), t_value.clone())
        .await;
    let body: ApiResponse<Vec<serde_json::Value>> = response.json();
    assert_eq!(body.data.unwrap()[0]["unread"], 0);

    // Only the sender can edit, and deletion blanks the content.
    let response = server
        .put(&format!("/messages/{}", message_id))
        .add_header(t_name, t_value)
        .json(&json!({ "content": "hijacked" }))
        .await;
    response.assert_status_forbidden();

    server
        .put(&format!("/messages/{}", message_id))
        .add_header(s_name.clone(), s_value.clone())
        .json(&json!({ "content": "Hi, are you free on Tuesday?" }))
        .await
        .assert_status_ok();

    let response = server
        .delete(&format!("/messages/{}", message_id))
        .add_header(s_name.clone(), s_value.clone())
        .await;
    response.assert_status_ok();
    let body: ApiResponse<serde_json::Value> = response.json();
    let deleted = body.data.unwrap();
    assert_eq!(deleted["deleted"], true);
    assert_eq!(deleted["content"], "");
}

#[tokio::test]
async fn message_history_pages_newest_first() {
    let server = create_test_server();
    let teacher = register(&server, "history-teacher@example.com", "teacher").await;
    let student = register(&server, "history-student@example.com", "student").await;

    let (name, value) = bearer(student.token);
    let response = server
        .post("/conversations")
        .add_header(name.clone(), value.clone())
        .json(&json!({ "participant_id": teacher.user.user_id }))
        .await;
    response.assert_status_ok();
    let body: ApiResponse<serde_json::Value> = response.json();
    let conversation_id = body.data.unwrap()["conversation_id"]
        .as_str()
        .unwrap()
        .to_string();

    let mut sent = Vec::new();
    for content in ["first", "second", "third"] {
        let response = server
            .post(&format!("/conversations/{}/messages", conversation_id))
            .add_header(name.clone(), value.clone())
            .json(&json!({ "content": content }))
            .await;
        response.assert_status_ok();
        let body: ApiResponse<serde_json::Value> = response.json();
        sent.push(
            body.data.unwrap()["message_id"]
                .as_str()
                .unwrap()
                .to_string(),
        );
    }

    let response = server
        .get(&format!("/conversations/{}/messages", conversation_id))
        .add_header(name.clone(), value.clone())
        .await;
    response.assert_status_ok();
    let body: ApiResponse<Vec<serde_json::Value>> = response.json();
    let page = body.data.unwrap();
    let contents: Vec<&str> = page
        .iter()
        .map(|m| m["content"].as_str().unwrap())
        .collect();
    assert_eq!(contents, ["third", "second", "first"]);

    // A limit trims from the old end of the page.
    let response = server
        .get(&format!(
            "/conversations/{}/messages?limit=2",
            conversation_id
        ))
        .add_header(name.clone(), value.clone())
        .await;
    let body: ApiResponse<Vec<serde_json::Value>> = response.json();
    let page = body.data.unwrap();
    let contents: Vec<&str> = page
        .iter()
        .map(|m| m["content"].as_str().unwrap())
        .collect();
    assert_eq!(contents, ["third", "second"]);

    // The cursor message and everything newer are excluded.
    let response = server
        .get(&format!(
            "/conversations/{}/messages?before={}",
            conversation_id, sent[1]
        ))
        .add_header(name, value)
        .await;
    let body: ApiResponse<Vec<serde_json::Value>> = response.json();
    let page = body.data.unwrap();
    assert_eq!(page.len(), 1);
    assert_eq!(page[0]["content"], "first");
}

#[tokio::test]
async fn booking_notifies_the_teacher() {
    let server = create_test_server();
    let teacher = register_available_teacher(&server, "notify@example.com").await;
    let student = register(&server, "notifier@example.com", "student").await;

    let (name, value) = bearer(student.token);
    server
        .post("/lessons")
        .add_header(name, value)
        .json(&json!({
            "teacher_id": teacher.user.user_id,
            "subject": "math",
            "scheduled_at": next_week_at(16),
            "duration_minutes": 60,
        }))
        .await
        .assert_status_ok();

    let (name, value) = bearer(teacher.token);
    let response = server
        .get("/notifications?unread=true")
        .add_header(name.clone(), value.clone())
        .await;
    response.assert_status_ok();
    let body: ApiResponse<Vec<serde_json::Value>> = response.json();
    let notifications = body.data.unwrap();
    assert_eq!(notifications.len(), 1);
    // auto_accept teachers get a confirmation straight away
    assert_eq!(notifications[0]["kind"], "booking_confirmed");

    let id = notifications[0]["notification_id"].as_str().unwrap();
    server
        .post(&format!("/notifications/{}/read", id))
        .add_header(name.clone(), value.clone())
        .await
        .assert_status_ok();

    let response = server
        .get("/notifications?unread=true")
        .add_header(name, value)
        .await;
    let body: ApiResponse<Vec<serde_json::Value>> = response.json();
    assert!(body.data.unwrap().is_empty());
}

#[tokio::test]
async fn teacher_lookup_rejects_bad_ids() {
    let server = create_test_server();
    let response = server.get("/teachers/not-a-uuid").await;
    response.assert_status_bad_request();

    let response = server
        .get(&format!("/teachers/{}", Uuid::new_v4()))
        .await;
    response.assert_status_not_found();
}
