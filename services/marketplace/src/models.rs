use chrono::{DateTime, Duration, FixedOffset, NaiveTime, Offset, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;
use validator::Validate;

use tutorhub_common::{LessonStatus, ModerationStatus, PaymentStatus, UserRole};

// Users and sessions

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct User {
    pub user_id: Uuid,
    pub email: String,
    pub username: String,
    pub display_name: Option<String>,
    #[serde(skip_serializing)]
    pub password_hash: String,
    pub role: UserRole,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UserInfo {
    pub user_id: Uuid,
    pub email: String,
    pub username: String,
    pub display_name: Option<String>,
    pub role: UserRole,
    pub created_at: DateTime<Utc>,
}

impl From<&User> for UserInfo {
    fn from(user: &User) -> Self {
        Self {
            user_id: user.user_id,
            email: user.email.clone(),
            username: user.username.clone(),
            display_name: user.display_name.clone(),
            role: user.role,
            created_at: user.created_at,
        }
    }
}

// Availability template

/// Open interval of local wall-clock time, `[start, end)`.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub struct TimeRange {
    pub start: NaiveTime,
    pub end: NaiveTime,
}

/// Recurring weekly template, one entry per weekday indexed from Monday.
/// A fixed-size array rather than a day-name map keeps weekday handling
/// exhaustive and free of string keys.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct WeeklyAvailability {
    pub days: [Vec<TimeRange>; 7],
}

impl WeeklyAvailability {
    pub fn for_weekday(&self, weekday: chrono::Weekday) -> &[TimeRange] {
        &self.days[weekday.num_days_from_monday() as usize]
    }
}

/// One-off block overriding the weekly template, stored in UTC.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BlockedRange {
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
    pub reason: Option<String>,
}

// Profiles

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TeacherProfile {
    pub user_id: Uuid,
    pub subjects: Vec<String>,
    pub hourly_rate_cents: i64,
    pub currency: String,
    pub bio: Option<String>,
    pub timezone: String,
    pub tz_offset_minutes: i32,
    pub weekly_availability: WeeklyAvailability,
    pub exceptions: Vec<BlockedRange>,
    pub auto_accept: bool,
    pub min_notice_hours: i64,
    pub commission_percent: Option<Decimal>,
    pub verified: bool,
    pub lessons_completed: i64,
    pub rating_avg: f64,
    pub rating_count: i64,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl TeacherProfile {
    pub fn utc_offset(&self) -> FixedOffset {
        FixedOffset::east_opt(self.tz_offset_minutes * 60).unwrap_or_else(|| Utc.fix())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StudentProfile {
    pub user_id: Uuid,
    pub goals: Option<String>,
    pub preferred_subjects: Vec<String>,
    pub budget_cents_per_hour: Option<i64>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

// Lessons

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Lesson {
    pub lesson_id: Uuid,
    pub teacher_id: Uuid,
    pub student_id: Uuid,
    pub subject: String,
    pub scheduled_at: DateTime<Utc>,
    pub duration_minutes: i64,
    pub price_cents: i64,
    pub status: LessonStatus,
    pub teacher_joined_at: Option<DateTime<Utc>>,
    pub student_joined_at: Option<DateTime<Utc>>,
    pub cancellation: Option<CancellationRecord>,
    pub reschedule: Option<RescheduleProposal>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Lesson {
    pub fn end_at(&self) -> DateTime<Utc> {
        self.scheduled_at + Duration::minutes(self.duration_minutes)
    }

    pub fn involves(&self, user_id: Uuid) -> bool {
        self.teacher_id == user_id || self.student_id == user_id
    }

    pub fn attendance_recorded(&self) -> bool {
        self.teacher_joined_at.is_some() || self.student_joined_at.is_some()
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CancellationRecord {
    pub cancelled_by: Uuid,
    pub reason: Option<String>,
    pub cancelled_at: DateTime<Utc>,
    pub refund_cents: i64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RescheduleProposal {
    pub proposed_by: Uuid,
    pub scheduled_at: DateTime<Utc>,
    pub duration_minutes: i64,
    pub proposed_at: DateTime<Utc>,
}

// Payments

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Payment {
    pub payment_id: Uuid,
    pub lesson_id: Uuid,
    pub amount_cents: i64,
    pub commission_percent: Decimal,
    pub platform_fee_cents: i64,
    pub teacher_net_cents: i64,
    pub refunded_cents: i64,
    pub status: PaymentStatus,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

// Reviews

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Review {
    pub review_id: Uuid,
    pub lesson_id: Uuid,
    pub teacher_id: Uuid,
    pub student_id: Uuid,
    pub rating_overall: i16,
    pub rating_quality: i16,
    pub rating_communication: i16,
    pub rating_punctuality: i16,
    pub rating_preparation: i16,
    pub comment: Option<String>,
    pub teacher_response: Option<String>,
    pub moderation_status: ModerationStatus,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

// Conversations and messages

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Conversation {
    pub conversation_id: Uuid,
    pub participant_a: Uuid,
    pub participant_b: Uuid,
    pub lesson_id: Option<Uuid>,
    pub unread_a: i64,
    pub unread_b: i64,
    pub last_message_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
}

impl Conversation {
    pub fn involves(&self, user_id: Uuid) -> bool {
        self.participant_a == user_id || self.participant_b == user_id
    }

    pub fn other_participant(&self, user_id: Uuid) -> Uuid {
        if self.participant_a == user_id {
            self.participant_b
        } else {
            self.participant_a
        }
    }

    pub fn unread_for(&self, user_id: Uuid) -> i64 {
        if self.participant_a == user_id {
            self.unread_a
        } else {
            self.unread_b
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Message {
    pub message_id: Uuid,
    pub conversation_id: Uuid,
    pub sender_id: Uuid,
    pub content: String,
    pub edited_at: Option<DateTime<Utc>>,
    pub deleted: bool,
    pub created_at: DateTime<Utc>,
}

// Notifications

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum NotificationKind {
    BookingRequested,
    BookingConfirmed,
    BookingCancelled,
    BookingRescheduled,
    LessonCompleted,
    NewMessage,
    ReviewReceived,
}

impl NotificationKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            NotificationKind::BookingRequested => "booking_requested",
            NotificationKind::BookingConfirmed => "booking_confirmed",
            NotificationKind::BookingCancelled => "booking_cancelled",
            NotificationKind::BookingRescheduled => "booking_rescheduled",
            NotificationKind::LessonCompleted => "lesson_completed",
            NotificationKind::NewMessage => "new_message",
            NotificationKind::ReviewReceived => "review_received",
        }
    }
}

impl fmt::Display for NotificationKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for NotificationKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "booking_requested" => Ok(NotificationKind::BookingRequested),
            "booking_confirmed" => Ok(NotificationKind::BookingConfirmed),
            "booking_cancelled" => Ok(NotificationKind::BookingCancelled),
            "booking_rescheduled" => Ok(NotificationKind::BookingRescheduled),
            "lesson_completed" => Ok(NotificationKind::LessonCompleted),
            "new_message" => Ok(NotificationKind::NewMessage),
            "review_received" => Ok(NotificationKind::ReviewReceived),
            other => Err(format!("unknown notification kind: {}", other)),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Notification {
    pub notification_id: Uuid,
    pub recipient_id: Uuid,
    pub kind: NotificationKind,
    pub payload: serde_json::Value,
    pub read: bool,
    pub created_at: DateTime<Utc>,
}

// Request DTOs

#[derive(Debug, Clone, Deserialize, Validate)]
pub struct RegisterRequest {
    #[validate(email)]
    pub email: String,
    #[validate(length(min = 3, max = 32))]
    pub username: String,
    #[validate(length(min = 8, max = 72))]
    pub password: String,
    pub display_name: Option<String>,
    pub role: UserRole,
}

#[derive(Debug, Clone, Deserialize, Validate)]
pub struct LoginRequest {
    #[validate(email)]
    pub email: String,
    #[validate(length(min = 1))]
    pub password: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuthResponse {
    pub token: Uuid,
    pub user: UserInfo,
}

#[derive(Debug, Clone, Deserialize, Validate)]
pub struct UpsertTeacherProfileRequest {
    #[validate(length(min = 1, max = 20))]
    pub subjects: Vec<String>,
    #[validate(range(min = 0))]
    pub hourly_rate_cents: i64,
    #[validate(length(equal = 3))]
    pub currency: String,
    #[validate(length(max = 4000))]
    pub bio: Option<String>,
    #[validate(length(min = 1, max = 64))]
    pub timezone: String,
    #[validate(range(min = -840, max = 840))]
    pub tz_offset_minutes: i32,
    pub auto_accept: bool,
    #[validate(range(min = 0, max = 720))]
    pub min_notice_hours: i64,
    pub commission_percent: Option<Decimal>,
}

#[derive(Debug, Clone, Deserialize, Validate)]
pub struct UpsertStudentProfileRequest {
    #[validate(length(max = 4000))]
    pub goals: Option<String>,
    #[validate(length(max = 20))]
    pub preferred_subjects: Vec<String>,
    #[validate(range(min = 0))]
    pub budget_cents_per_hour: Option<i64>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct AvailabilityUpdateRequest {
    pub weekly: WeeklyAvailability,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ExceptionRequest {
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
    pub reason: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct SlotQuery {
    pub from: chrono::NaiveDate,
    pub to: chrono::NaiveDate,
    pub duration: i64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct TeacherSearchQuery {
    pub subject: Option<String>,
    pub max_rate_cents: Option<i64>,
    pub verified: Option<bool>,
}

#[derive(Debug, Clone, Deserialize, Validate)]
pub struct CreateLessonRequest {
    pub teacher_id: Uuid,
    #[validate(length(min = 1, max = 100))]
    pub subject: String,
    pub scheduled_at: DateTime<Utc>,
    #[validate(range(min = 15, max = 240))]
    pub duration_minutes: i64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct CancelLessonRequest {
    pub reason: Option<String>,
}

#[derive(Debug, Clone, Deserialize, Validate)]
pub struct RescheduleRequest {
    pub scheduled_at: DateTime<Utc>,
    #[validate(range(min = 15, max = 240))]
    pub duration_minutes: Option<i64>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct RescheduleDecisionRequest {
    pub approve: bool,
}

#[derive(Debug, Clone, Deserialize, Validate)]
pub struct CreateReviewRequest {
    #[validate(range(min = 1, max = 5))]
    pub rating_overall: i16,
    #[validate(range(min = 1, max = 5))]
    pub rating_quality: i16,
    #[validate(range(min = 1, max = 5))]
    pub rating_communication: i16,
    #[validate(range(min = 1, max = 5))]
    pub rating_punctuality: i16,
    #[validate(range(min = 1, max = 5))]
    pub rating_preparation: i16,
    #[validate(length(max = 2000))]
    pub comment: Option<String>,
}

#[derive(Debug, Clone, Deserialize, Validate)]
pub struct ReviewResponseRequest {
    #[validate(length(min = 1, max = 2000))]
    pub response: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct CreateConversationRequest {
    pub participant_id: Uuid,
    pub lesson_id: Option<Uuid>,
}

#[derive(Debug, Clone, Deserialize, Validate)]
pub struct SendMessageRequest {
    #[validate(length(min = 1, max = 4000))]
    pub content: String,
}

#[derive(Debug, Clone, Deserialize, Validate)]
pub struct EditMessageRequest {
    #[validate(length(min = 1, max = 4000))]
    pub content: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct NotificationQuery {
    pub unread: Option<bool>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct MessageHistoryQuery {
    pub limit: Option<u32>,
    pub before: Option<Uuid>,
}

#[derive(Debug, Clone, Serialize)]
pub struct ConversationSummary {
    pub conversation_id: Uuid,
    pub other_participant: Uuid,
    pub lesson_id: Option<Uuid>,
    pub unread: i64,
    pub last_message_at: Option<DateTime<Utc>>,
}
