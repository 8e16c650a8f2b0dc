use axum::{
    extract::{Path, Query, State},
    http::HeaderMap,
    Extension, Json,
};
use chrono::Utc;
use serde_json::json;
use uuid::Uuid;
use validator::Validate;

use tutorhub_common::{ApiResponse, AppError, UserRole};

use crate::availability::Slot;
use crate::booking::BookingService;
use crate::messaging::MessagingService;
use crate::middleware::AuthUser;
use crate::models::{
    AuthResponse, AvailabilityUpdateRequest, BlockedRange, CancelLessonRequest, Conversation,
    ConversationSummary, CreateConversationRequest, CreateLessonRequest, CreateReviewRequest,
    EditMessageRequest, ExceptionRequest, Lesson, LoginRequest, Message, MessageHistoryQuery,
    Notification, NotificationQuery, Payment, RegisterRequest, RescheduleDecisionRequest,
    RescheduleRequest, Review, ReviewResponseRequest, SendMessageRequest, SlotQuery,
    StudentProfile, TeacherProfile, TeacherSearchQuery, UpsertStudentProfileRequest,
    UpsertTeacherProfileRequest, User, UserInfo, WeeklyAvailability,
};
use crate::reviews::ReviewService;
use crate::AppState;

type ApiResult<T> = Result<Json<ApiResponse<T>>, AppError>;

/// Runs the derive-based validators and folds failures into a single
/// field -> messages map.
fn validated<T: Validate>(value: &T) -> Result<(), AppError> {
    value.validate().map_err(|errors| {
        let fields: serde_json::Map<String, serde_json::Value> = errors
            .field_errors()
            .iter()
            .map(|(field, errs)| {
                let messages: Vec<String> = errs
                    .iter()
                    .map(|e| {
                        e.message
                            .as_ref()
                            .map(|m| m.to_string())
                            .unwrap_or_else(|| e.code.to_string())
                    })
                    .collect();
                (field.to_string(), json!(messages))
            })
            .collect();
        AppError::validation_fields("Request validation failed", fields.into())
    })
}

fn require_role(auth: &AuthUser, role: UserRole) -> Result<(), AppError> {
    if auth.role == role || auth.role == UserRole::Admin {
        Ok(())
    } else {
        Err(AppError::Authorization(format!(
            "This operation requires the {} role",
            role
        )))
    }
}

fn booking_service(state: &AppState) -> BookingService {
    BookingService::new(
        state.store.clone(),
        state.emitter.clone(),
        state.config.marketplace.clone(),
    )
}

fn messaging_service(state: &AppState) -> MessagingService {
    MessagingService::new(state.store.clone(), state.emitter.clone())
}

// Health

pub async fn health() -> Json<ApiResponse<serde_json::Value>> {
    Json(ApiResponse::success(json!({
        "service": "marketplace",
        "status": "healthy",
    })))
}

// Auth

pub async fn register(
    State(state): State<AppState>,
    Json(request): Json<RegisterRequest>,
) -> ApiResult<AuthResponse> {
    validated(&request)?;
    if request.role == UserRole::Admin {
        return Err(AppError::validation(
            "Accounts cannot self-register as admin",
        ));
    }

    let password_hash = bcrypt::hash(&request.password, bcrypt::DEFAULT_COST)
        .map_err(|e| AppError::Internal(format!("Password hashing failed: {}", e)))?;

    let now = Utc::now();
    let user = state
        .store
        .create_user(User {
            user_id: Uuid::new_v4(),
            email: request.email,
            username: request.username,
            display_name: request.display_name,
            password_hash,
            role: request.role,
            created_at: now,
            updated_at: now,
        })
        .await?;

    let token = Uuid::new_v4();
    state.store.create_session(token, user.user_id).await?;

    tracing::info!(user_id = %user.user_id, role = %user.role, "user registered");
    Ok(Json(ApiResponse::success(AuthResponse {
        token,
        user: UserInfo::from(&user),
    })))
}

pub async fn login(
    State(state): State<AppState>,
    Json(request): Json<LoginRequest>,
) -> ApiResult<AuthResponse> {
    validated(&request)?;

    let user = state
        .store
        .user_by_email(&request.email)
        .await?
        .ok_or_else(|| AppError::Authentication("Invalid email or password".to_string()))?;

    let matches = bcrypt::verify(&request.password, &user.password_hash)
        .map_err(|e| AppError::Internal(format!("Password verification failed: {}", e)))?;
    if !matches {
        return Err(AppError::Authentication(
            "Invalid email or password".to_string(),
        ));
    }

    let token = Uuid::new_v4();
    state.store.create_session(token, user.user_id).await?;

    Ok(Json(ApiResponse::success(AuthResponse {
        token,
        user: UserInfo::from(&user),
    })))
}

pub async fn logout(State(state): State<AppState>, headers: HeaderMap) -> ApiResult<()> {
    let token = headers
        .get("Authorization")
        .and_then(|header| header.to_str().ok())
        .and_then(|header| header.strip_prefix("Bearer "))
        .and_then(|token| Uuid::parse_str(token).ok());

    if let Some(token) = token {
        state.store.delete_session(token).await?;
    }
    Ok(Json(ApiResponse::success(())))
}

pub async fn me(
    State(state): State<AppState>,
    Extension(auth): Extension<AuthUser>,
) -> ApiResult<UserInfo> {
    let user = state
        .store
        .user_by_id(auth.user_id)
        .await?
        .ok_or_else(|| AppError::NotFound("User not found".to_string()))?;
    Ok(Json(ApiResponse::success(UserInfo::from(&user))))
}

// Teacher profiles

pub async fn upsert_teacher_profile(
    State(state): State<AppState>,
    Extension(auth): Extension<AuthUser>,
    Json(request): Json<UpsertTeacherProfileRequest>,
) -> ApiResult<TeacherProfile> {
    require_role(&auth, UserRole::Teacher)?;
    validated(&request)?;

    let now = Utc::now();
    let existing = state.store.teacher_profile(auth.user_id).await?;
    // Availability, exceptions, and earned stats survive profile edits.
    let profile = TeacherProfile {
        user_id: auth.user_id,
        subjects: request.subjects,
        hourly_rate_cents: request.hourly_rate_cents,
        currency: request.currency.to_uppercase(),
        bio: request.bio,
        timezone: request.timezone,
        tz_offset_minutes: request.tz_offset_minutes,
        weekly_availability: existing
            .as_ref()
            .map(|p| p.weekly_availability.clone())
            .unwrap_or_default(),
        exceptions: existing
            .as_ref()
            .map(|p| p.exceptions.clone())
            .unwrap_or_default(),
        auto_accept: request.auto_accept,
        min_notice_hours: request.min_notice_hours,
        commission_percent: request.commission_percent,
        verified: existing.as_ref().map(|p| p.verified).unwrap_or(false),
        lessons_completed: existing
            .as_ref()
            .map(|p| p.lessons_completed)
            .unwrap_or(0),
        rating_avg: existing.as_ref().map(|p| p.rating_avg).unwrap_or(0.0),
        rating_count: existing.as_ref().map(|p| p.rating_count).unwrap_or(0),
        created_at: existing.as_ref().map(|p| p.created_at).unwrap_or(now),
        updated_at: now,
    };

    let profile = state.store.upsert_teacher_profile(profile).await?;
    Ok(Json(ApiResponse::success(profile)))
}

pub async fn my_teacher_profile(
    State(state): State<AppState>,
    Extension(auth): Extension<AuthUser>,
) -> ApiResult<TeacherProfile> {
    let profile = state
        .store
        .teacher_profile(auth.user_id)
        .await?
        .ok_or_else(|| AppError::NotFound("Teacher profile not found".to_string()))?;
    Ok(Json(ApiResponse::success(profile)))
}

pub async fn get_teacher(
    State(state): State<AppState>,
    Path(user_id): Path<Uuid>,
) -> ApiResult<TeacherProfile> {
    let profile = state
        .store
        .teacher_profile(user_id)
        .await?
        .ok_or_else(|| AppError::NotFound("Teacher profile not found".to_string()))?;
    Ok(Json(ApiResponse::success(profile)))
}

pub async fn search_teachers(
    State(state): State<AppState>,
    Query(query): Query<TeacherSearchQuery>,
) -> ApiResult<Vec<TeacherProfile>> {
    let teachers = state.store.search_teachers(&query).await?;
    Ok(Json(ApiResponse::success(teachers)))
}

// Student profiles

pub async fn upsert_student_profile(
    State(state): State<AppState>,
    Extension(auth): Extension<AuthUser>,
    Json(request): Json<UpsertStudentProfileRequest>,
) -> ApiResult<StudentProfile> {
    require_role(&auth, UserRole::Student)?;
    validated(&request)?;

    let now = Utc::now();
    let existing = state.store.student_profile(auth.user_id).await?;
    let profile = state
        .store
        .upsert_student_profile(StudentProfile {
            user_id: auth.user_id,
            goals: request.goals,
            preferred_subjects: request.preferred_subjects,
            budget_cents_per_hour: request.budget_cents_per_hour,
            created_at: existing.as_ref().map(|p| p.created_at).unwrap_or(now),
            updated_at: now,
        })
        .await?;
    Ok(Json(ApiResponse::success(profile)))
}

pub async fn my_student_profile(
    State(state): State<AppState>,
    Extension(auth): Extension<AuthUser>,
) -> ApiResult<StudentProfile> {
    let profile = state
        .store
        .student_profile(auth.user_id)
        .await?
        .ok_or_else(|| AppError::NotFound("Student profile not found".to_string()))?;
    Ok(Json(ApiResponse::success(profile)))
}

// Availability

fn template_is_wellformed(weekly: &WeeklyAvailability) -> Result<(), AppError> {
    for day in &weekly.days {
        for range in day {
            if range.start >= range.end {
                return Err(AppError::validation(
                    "Availability ranges must start before they end",
                ));
            }
        }
    }
    Ok(())
}

pub async fn update_availability(
    State(state): State<AppState>,
    Extension(auth): Extension<AuthUser>,
    Json(request): Json<AvailabilityUpdateRequest>,
) -> ApiResult<WeeklyAvailability> {
    require_role(&auth, UserRole::Teacher)?;
    template_is_wellformed(&request.weekly)?;

    let mut profile = state
        .store
        .teacher_profile(auth.user_id)
        .await?
        .ok_or_else(|| AppError::NotFound("Teacher profile not found".to_string()))?;
    profile.weekly_availability = request.weekly;
    profile.updated_at = Utc::now();
    let profile = state.store.upsert_teacher_profile(profile).await?;
    Ok(Json(ApiResponse::success(profile.weekly_availability)))
}

pub async fn get_availability(
    State(state): State<AppState>,
    Path(user_id): Path<Uuid>,
) -> ApiResult<WeeklyAvailability> {
    let profile = state
        .store
        .teacher_profile(user_id)
        .await?
        .ok_or_else(|| AppError::NotFound("Teacher profile not found".to_string()))?;
    Ok(Json(ApiResponse::success(profile.weekly_availability)))
}

pub async fn add_exception(
    State(state): State<AppState>,
    Extension(auth): Extension<AuthUser>,
    Json(request): Json<ExceptionRequest>,
) -> ApiResult<Vec<BlockedRange>> {
    require_role(&auth, UserRole::Teacher)?;
    if request.start >= request.end {
        return Err(AppError::validation(
            "Exception ranges must start before they end",
        ));
    }

    let mut profile = state
        .store
        .teacher_profile(auth.user_id)
        .await?
        .ok_or_else(|| AppError::NotFound("Teacher profile not found".to_string()))?;
    profile.exceptions.push(BlockedRange {
        start: request.start,
        end: request.end,
        reason: request.reason,
    });
    profile.updated_at = Utc::now();
    let profile = state.store.upsert_teacher_profile(profile).await?;
    Ok(Json(ApiResponse::success(profile.exceptions)))
}

pub async fn teacher_slots(
    State(state): State<AppState>,
    Path(user_id): Path<Uuid>,
    Query(query): Query<SlotQuery>,
) -> ApiResult<Vec<Slot>> {
    let slots = booking_service(&state).available_slots(user_id, query).await?;
    Ok(Json(ApiResponse::success(slots)))
}

// Lessons

pub async fn create_lesson(
    State(state): State<AppState>,
    Extension(auth): Extension<AuthUser>,
    Json(request): Json<CreateLessonRequest>,
) -> ApiResult<Lesson> {
    require_role(&auth, UserRole::Student)?;
    validated(&request)?;
    let lesson = booking_service(&state)
        .create_booking(auth.user_id, request)
        .await?;
    Ok(Json(ApiResponse::success(lesson)))
}

pub async fn list_lessons(
    State(state): State<AppState>,
    Extension(auth): Extension<AuthUser>,
) -> ApiResult<Vec<Lesson>> {
    let lessons = booking_service(&state).list_for(auth.user_id).await?;
    Ok(Json(ApiResponse::success(lessons)))
}

pub async fn get_lesson(
    State(state): State<AppState>,
    Extension(auth): Extension<AuthUser>,
    Path(lesson_id): Path<Uuid>,
) -> ApiResult<Lesson> {
    let lesson = booking_service(&state).get(auth.user_id, lesson_id).await?;
    Ok(Json(ApiResponse::success(lesson)))
}

pub async fn accept_lesson(
    State(state): State<AppState>,
    Extension(auth): Extension<AuthUser>,
    Path(lesson_id): Path<Uuid>,
) -> ApiResult<Lesson> {
    let lesson = booking_service(&state)
        .accept(auth.user_id, lesson_id)
        .await?;
    Ok(Json(ApiResponse::success(lesson)))
}

pub async fn cancel_lesson(
    State(state): State<AppState>,
    Extension(auth): Extension<AuthUser>,
    Path(lesson_id): Path<Uuid>,
    Json(request): Json<CancelLessonRequest>,
) -> ApiResult<Lesson> {
    let lesson = booking_service(&state)
        .cancel(auth.user_id, lesson_id, request)
        .await?;
    Ok(Json(ApiResponse::success(lesson)))
}

pub async fn reschedule_lesson(
    State(state): State<AppState>,
    Extension(auth): Extension<AuthUser>,
    Path(lesson_id): Path<Uuid>,
    Json(request): Json<RescheduleRequest>,
) -> ApiResult<Lesson> {
    validated(&request)?;
    let lesson = booking_service(&state)
        .propose_reschedule(auth.user_id, lesson_id, request)
        .await?;
    Ok(Json(ApiResponse::success(lesson)))
}

pub async fn respond_reschedule(
    State(state): State<AppState>,
    Extension(auth): Extension<AuthUser>,
    Path(lesson_id): Path<Uuid>,
    Json(request): Json<RescheduleDecisionRequest>,
) -> ApiResult<Lesson> {
    let lesson = booking_service(&state)
        .respond_reschedule(auth.user_id, lesson_id, request.approve)
        .await?;
    Ok(Json(ApiResponse::success(lesson)))
}

pub async fn record_attendance(
    State(state): State<AppState>,
    Extension(auth): Extension<AuthUser>,
    Path(lesson_id): Path<Uuid>,
) -> ApiResult<Lesson> {
    let lesson = booking_service(&state)
        .record_attendance(auth.user_id, lesson_id)
        .await?;
    Ok(Json(ApiResponse::success(lesson)))
}

pub async fn complete_lesson(
    State(state): State<AppState>,
    Extension(auth): Extension<AuthUser>,
    Path(lesson_id): Path<Uuid>,
) -> ApiResult<Lesson> {
    let lesson = booking_service(&state)
        .complete(auth.user_id, lesson_id)
        .await?;
    Ok(Json(ApiResponse::success(lesson)))
}

pub async fn mark_no_show(
    State(state): State<AppState>,
    Extension(auth): Extension<AuthUser>,
    Path(lesson_id): Path<Uuid>,
) -> ApiResult<Lesson> {
    let lesson = booking_service(&state)
        .mark_no_show(auth.user_id, lesson_id)
        .await?;
    Ok(Json(ApiResponse::success(lesson)))
}

pub async fn lesson_payment(
    State(state): State<AppState>,
    Extension(auth): Extension<AuthUser>,
    Path(lesson_id): Path<Uuid>,
) -> ApiResult<Payment> {
    let payment = booking_service(&state)
        .payment_for(auth.user_id, lesson_id)
        .await?;
    Ok(Json(ApiResponse::success(payment)))
}

// Reviews

pub async fn create_review(
    State(state): State<AppState>,
    Extension(auth): Extension<AuthUser>,
    Path(lesson_id): Path<Uuid>,
    Json(request): Json<CreateReviewRequest>,
) -> ApiResult<Review> {
    require_role(&auth, UserRole::Student)?;
    validated(&request)?;
    let review = ReviewService::new(state.store.clone())
        .create(auth.user_id, lesson_id, request)
        .await?;
    Ok(Json(ApiResponse::success(review)))
}

pub async fn teacher_reviews(
    State(state): State<AppState>,
    Path(user_id): Path<Uuid>,
) -> ApiResult<Vec<Review>> {
    let reviews = ReviewService::new(state.store.clone())
        .for_teacher(user_id)
        .await?;
    Ok(Json(ApiResponse::success(reviews)))
}

pub async fn respond_review(
    State(state): State<AppState>,
    Extension(auth): Extension<AuthUser>,
    Path(review_id): Path<Uuid>,
    Json(request): Json<ReviewResponseRequest>,
) -> ApiResult<Review> {
    validated(&request)?;
    let review = ReviewService::new(state.store.clone())
        .respond(auth.user_id, review_id, request)
        .await?;
    Ok(Json(ApiResponse::success(review)))
}

// Conversations and messages

pub async fn create_conversation(
    State(state): State<AppState>,
    Extension(auth): Extension<AuthUser>,
    Json(request): Json<CreateConversationRequest>,
) -> ApiResult<Conversation> {
    let conversation = messaging_service(&state)
        .open_conversation(auth.user_id, request)
        .await?;
    Ok(Json(ApiResponse::success(conversation)))
}

pub async fn list_conversations(
    State(state): State<AppState>,
    Extension(auth): Extension<AuthUser>,
) -> ApiResult<Vec<ConversationSummary>> {
    let conversations = messaging_service(&state).conversations(auth.user_id).await?;
    Ok(Json(ApiResponse::success(conversations)))
}

pub async fn send_message(
    State(state): State<AppState>,
    Extension(auth): Extension<AuthUser>,
    Path(conversation_id): Path<Uuid>,
    Json(request): Json<SendMessageRequest>,
) -> ApiResult<Message> {
    validated(&request)?;
    let message = messaging_service(&state)
        .send(auth.user_id, conversation_id, request)
        .await?;
    Ok(Json(ApiResponse::success(message)))
}

pub async fn message_history(
    State(state): State<AppState>,
    Extension(auth): Extension<AuthUser>,
    Path(conversation_id): Path<Uuid>,
    Query(query): Query<MessageHistoryQuery>,
) -> ApiResult<Vec<Message>> {
    let messages = messaging_service(&state)
        .history(auth.user_id, conversation_id, query)
        .await?;
    Ok(Json(ApiResponse::success(messages)))
}

pub async fn mark_conversation_read(
    State(state): State<AppState>,
    Extension(auth): Extension<AuthUser>,
    Path(conversation_id): Path<Uuid>,
) -> ApiResult<Conversation> {
    let conversation = messaging_service(&state)
        .mark_read(auth.user_id, conversation_id)
        .await?;
    Ok(Json(ApiResponse::success(conversation)))
}

pub async fn edit_message(
    State(state): State<AppState>,
    Extension(auth): Extension<AuthUser>,
    Path(message_id): Path<Uuid>,
    Json(request): Json<EditMessageRequest>,
) -> ApiResult<Message> {
    validated(&request)?;
    let message = messaging_service(&state)
        .edit(auth.user_id, message_id, request)
        .await?;
    Ok(Json(ApiResponse::success(message)))
}

pub async fn delete_message(
    State(state): State<AppState>,
    Extension(auth): Extension<AuthUser>,
    Path(message_id): Path<Uuid>,
) -> ApiResult<Message> {
    let message = messaging_service(&state)
        .delete(auth.user_id, message_id)
        .await?;
    Ok(Json(ApiResponse::success(message)))
}

// Notifications

pub async fn list_notifications(
    State(state): State<AppState>,
    Extension(auth): Extension<AuthUser>,
    Query(query): Query<NotificationQuery>,
) -> ApiResult<Vec<Notification>> {
    let notifications = state
        .store
        .notifications(auth.user_id, query.unread.unwrap_or(false))
        .await?;
    Ok(Json(ApiResponse::success(notifications)))
}

pub async fn mark_notification_read(
    State(state): State<AppState>,
    Extension(auth): Extension<AuthUser>,
    Path(notification_id): Path<Uuid>,
) -> ApiResult<()> {
    state
        .store
        .mark_notification_read(notification_id, auth.user_id)
        .await?;
    Ok(Json(ApiResponse::success(())))
}
