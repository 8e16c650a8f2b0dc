use axum::{
    middleware,
    routing::{get, post, put},
    Router,
};

use crate::handlers;
use crate::middleware::auth_middleware;
use crate::AppState;

pub fn create_router(state: AppState) -> Router {
    let public = Router::new()
        .route("/health", get(handlers::health))
        .route("/auth/register", post(handlers::register))
        .route("/auth/login", post(handlers::login))
        .route("/teachers/search", get(handlers::search_teachers))
        .route("/teachers/:user_id", get(handlers::get_teacher))
        .route(
            "/teachers/:user_id/availability",
            get(handlers::get_availability),
        )
        .route("/teachers/:user_id/slots", get(handlers::teacher_slots))
        .route("/teachers/:user_id/reviews", get(handlers::teacher_reviews));

    let authenticated = Router::new()
        .route("/auth/logout", post(handlers::logout))
        .route("/auth/me", get(handlers::me))
        .route(
            "/teachers/me/profile",
            get(handlers::my_teacher_profile)
                .post(handlers::upsert_teacher_profile)
                .put(handlers::upsert_teacher_profile),
        )
        .route(
            "/teachers/me/availability",
            put(handlers::update_availability),
        )
        .route(
            "/teachers/me/availability/exceptions",
            post(handlers::add_exception),
        )
        .route(
            "/students/me/profile",
            get(handlers::my_student_profile)
                .post(handlers::upsert_student_profile)
                .put(handlers::upsert_student_profile),
        )
        .route(
            "/lessons",
            post(handlers::create_lesson).get(handlers::list_lessons),
        )
        .route("/lessons/:id", get(handlers::get_lesson))
        .route("/lessons/:id/accept", post(handlers::accept_lesson))
        .route("/lessons/:id/cancel", post(handlers::cancel_lesson))
        .route("/lessons/:id/reschedule", post(handlers::reschedule_lesson))
        .route(
            "/lessons/:id/reschedule/respond",
            post(handlers::respond_reschedule),
        )
        .route("/lessons/:id/attendance", post(handlers::record_attendance))
        .route("/lessons/:id/complete", post(handlers::complete_lesson))
        .route("/lessons/:id/no-show", post(handlers::mark_no_show))
        .route("/lessons/:id/payment", get(handlers::lesson_payment))
        .route("/lessons/:id/reviews", post(handlers::create_review))
        .route("/reviews/:id/response", post(handlers::respond_review))
        .route(
            "/conversations",
            post(handlers::create_conversation).get(handlers::list_conversations),
        )
        .route(
            "/conversations/:id/messages",
            post(handlers::send_message).get(handlers::message_history),
        )
        .route(
            "/conversations/:id/read",
            post(handlers::mark_conversation_read),
        )
        .route(
            "/messages/:id",
            put(handlers::edit_message).delete(handlers::delete_message),
        )
        .route("/notifications", get(handlers::list_notifications))
        .route(
            "/notifications/:id/read",
            post(handlers::mark_notification_read),
        )
        .layer(middleware::from_fn_with_state(
            state.clone(),
            auth_middleware,
        ));

    public.merge(authenticated).with_state(state)
}
