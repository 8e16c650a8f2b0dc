use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use tokio::sync::Mutex;
use uuid::Uuid;

use tutorhub_common::AppError;

use crate::availability::overlaps;
use crate::models::{
    Conversation, Lesson, Message, Notification, Payment, Review, StudentProfile, TeacherProfile,
    TeacherSearchQuery, User,
};

pub fn scheduling_conflict() -> AppError {
    AppError::Conflict("The requested time is no longer available for this teacher".to_string())
}

/// Persistence seam for every entity the marketplace owns. Handlers and
/// services only ever see this trait, so tests run against the in-memory
/// implementation and production against Postgres.
///
/// The `*_if_free` lesson operations are the double-booking guard: the
/// check for an overlapping occupying lesson and the write happen under a
/// single store-side atomicity boundary, and the loser of a race gets a
/// conflict error.
#[async_trait]
pub trait MarketplaceStore: Send + Sync {
    // Users and sessions
    async fn create_user(&self, user: User) -> Result<User, AppError>;
    async fn user_by_email(&self, email: &str) -> Result<Option<User>, AppError>;
    async fn user_by_id(&self, user_id: Uuid) -> Result<Option<User>, AppError>;
    async fn create_session(&self, token: Uuid, user_id: Uuid) -> Result<(), AppError>;
    async fn session_user(&self, token: Uuid) -> Result<Option<Uuid>, AppError>;
    async fn delete_session(&self, token: Uuid) -> Result<(), AppError>;

    // Profiles
    async fn upsert_teacher_profile(
        &self,
        profile: TeacherProfile,
    ) -> Result<TeacherProfile, AppError>;
    async fn teacher_profile(&self, user_id: Uuid) -> Result<Option<TeacherProfile>, AppError>;
    async fn search_teachers(
        &self,
        query: &TeacherSearchQuery,
    ) -> Result<Vec<TeacherProfile>, AppError>;
    async fn upsert_student_profile(
        &self,
        profile: StudentProfile,
    ) -> Result<StudentProfile, AppError>;
    async fn student_profile(&self, user_id: Uuid) -> Result<Option<StudentProfile>, AppError>;

    // Lessons
    async fn insert_lesson_if_free(&self, lesson: Lesson) -> Result<Lesson, AppError>;
    async fn update_lesson_if_free(&self, lesson: Lesson) -> Result<Lesson, AppError>;
    async fn update_lesson(&self, lesson: Lesson) -> Result<Lesson, AppError>;
    async fn lesson(&self, lesson_id: Uuid) -> Result<Option<Lesson>, AppError>;
    /// Occupying lessons for a teacher intersecting `[from, to)`.
    async fn teacher_lessons_between(
        &self,
        teacher_id: Uuid,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
    ) -> Result<Vec<Lesson>, AppError>;
    async fn lessons_for_user(&self, user_id: Uuid) -> Result<Vec<Lesson>, AppError>;

    // Payments
    async fn upsert_payment(&self, payment: Payment) -> Result<Payment, AppError>;
    async fn payment_by_lesson(&self, lesson_id: Uuid) -> Result<Option<Payment>, AppError>;

    // Reviews
    async fn insert_review(&self, review: Review) -> Result<Review, AppError>;
    async fn review(&self, review_id: Uuid) -> Result<Option<Review>, AppError>;
    async fn update_review(&self, review: Review) -> Result<Review, AppError>;
    async fn reviews_for_teacher(&self, teacher_id: Uuid) -> Result<Vec<Review>, AppError>;

    // Conversations and messages
    async fn find_or_create_conversation(
        &self,
        conversation: Conversation,
    ) -> Result<Conversation, AppError>;
    async fn conversation(&self, conversation_id: Uuid) -> Result<Option<Conversation>, AppError>;
    async fn conversations_for_user(&self, user_id: Uuid) -> Result<Vec<Conversation>, AppError>;
    async fn update_conversation(
        &self,
        conversation: Conversation,
    ) -> Result<Conversation, AppError>;
    /// Bumps the recipient's unread counter and stamps the last message
    /// time in one store-side write, so concurrent sends never lose an
    /// increment.
    async fn bump_unread(
        &self,
        conversation_id: Uuid,
        recipient_id: Uuid,
        at: DateTime<Utc>,
    ) -> Result<Conversation, AppError>;
    async fn insert_message(&self, message: Message) -> Result<Message, AppError>;
    async fn message(&self, message_id: Uuid) -> Result<Option<Message>, AppError>;
    async fn update_message(&self, message: Message) -> Result<Message, AppError>;
    /// Newest-first page of a conversation's messages.
    async fn messages(
        &self,
        conversation_id: Uuid,
        limit: i64,
        before: Option<Uuid>,
    ) -> Result<Vec<Message>, AppError>;

    // Notifications
    async fn insert_notification(&self, notification: Notification) -> Result<(), AppError>;
    async fn notifications(
        &self,
        recipient_id: Uuid,
        unread_only: bool,
    ) -> Result<Vec<Notification>, AppError>;
    async fn mark_notification_read(
        &self,
        notification_id: Uuid,
        recipient_id: Uuid,
    ) -> Result<(), AppError>;
}

#[derive(Default)]
struct InMemoryInner {
    users: HashMap<Uuid, User>,
    sessions: HashMap<Uuid, Uuid>,
    teacher_profiles: HashMap<Uuid, TeacherProfile>,
    student_profiles: HashMap<Uuid, StudentProfile>,
    lessons: HashMap<Uuid, Lesson>,
    payments: HashMap<Uuid, Payment>,
    reviews: HashMap<Uuid, Review>,
    conversations: HashMap<Uuid, Conversation>,
    messages: Vec<Message>,
    notifications: Vec<Notification>,
}

impl InMemoryInner {
    fn lesson_conflicts(&self, candidate: &Lesson, exclude: Option<Uuid>) -> bool {
        self.lessons.values().any(|existing| {
            existing.teacher_id == candidate.teacher_id
                && Some(existing.lesson_id) != exclude
                && existing.status.occupies_slot()
                && overlaps(
                    candidate.scheduled_at,
                    candidate.end_at(),
                    existing.scheduled_at,
                    existing.end_at(),
                )
        })
    }
}

/// Store backed by process memory. One mutex guards the whole state, which
/// makes the check-and-insert lesson operations atomic the same way a
/// conditional write is in Postgres.
#[derive(Default)]
pub struct InMemoryStore {
    inner: Mutex<InMemoryInner>,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl MarketplaceStore for InMemoryStore {
    async fn create_user(&self, user: User) -> Result<User, AppError> {
        let mut inner = self.inner.lock().await;
        if inner
            .users
            .values()
            .any(|u| u.email.eq_ignore_ascii_case(&user.email))
        {
            return Err(AppError::Conflict("Email is already registered".to_string()));
        }
        inner.users.insert(user.user_id, user.clone());
        Ok(user)
    }

    async fn user_by_email(&self, email: &str) -> Result<Option<User>, AppError> {
        let inner = self.inner.lock().await;
        Ok(inner
            .users
            .values()
            .find(|u| u.email.eq_ignore_ascii_case(email))
            .cloned())
    }

    async fn user_by_id(&self, user_id: Uuid) -> Result<Option<User>, AppError> {
        let inner = self.inner.lock().await;
        Ok(inner.users.get(&user_id).cloned())
    }

    async fn create_session(&self, token: Uuid, user_id: Uuid) -> Result<(), AppError> {
        let mut inner = self.inner.lock().await;
        inner.sessions.insert(token, user_id);
        Ok(())
    }

    async fn session_user(&self, token: Uuid) -> Result<Option<Uuid>, AppError> {
        let inner = self.inner.lock().await;
        Ok(inner.sessions.get(&token).copied())
    }

    async fn delete_session(&self, token: Uuid) -> Result<(), AppError> {
        let mut inner = self.inner.lock().await;
        inner.sessions.remove(&token);
        Ok(())
    }

    async fn upsert_teacher_profile(
        &self,
        profile: TeacherProfile,
    ) -> Result<TeacherProfile, AppError> {
        let mut inner = self.inner.lock().await;
        inner.teacher_profiles.insert(profile.user_id, profile.clone());
        Ok(profile)
    }

    async fn teacher_profile(&self, user_id: Uuid) -> Result<Option<TeacherProfile>, AppError> {
        let inner = self.inner.lock().await;
        Ok(inner.teacher_profiles.get(&user_id).cloned())
    }

    async fn search_teachers(
        &self,
        query: &TeacherSearchQuery,
    ) -> Result<Vec<TeacherProfile>, AppError> {
        let inner = self.inner.lock().await;
        let mut matches: Vec<TeacherProfile> = inner
            .teacher_profiles
            .values()
            .filter(|p| {
                query.subject.as_ref().map_or(true, |subject| {
                    p.subjects
                        .iter()
                        .any(|s| s.eq_ignore_ascii_case(subject))
                }) && query
                    .max_rate_cents
                    .map_or(true, |max| p.hourly_rate_cents <= max)
                    && query.verified.map_or(true, |v| p.verified == v)
            })
            .cloned()
            .collect();
        matches.sort_by(|a, b| {
            b.rating_avg
                .partial_cmp(&a.rating_avg)
                .unwrap_or(std::cmp::Ordering::Equal)
        });
        Ok(matches)
    }

    async fn upsert_student_profile(
        &self,
        profile: StudentProfile,
    ) -> Result<StudentProfile, AppError> {
        let mut inner = self.inner.lock().await;
        inner.student_profiles.insert(profile.user_id, profile.clone());
        Ok(profile)
    }

    async fn student_profile(&self, user_id: Uuid) -> Result<Option<StudentProfile>, AppError> {
        let inner = self.inner.lock().await;
        Ok(inner.student_profiles.get(&user_id).cloned())
    }

    async fn insert_lesson_if_free(&self, lesson: Lesson) -> Result<Lesson, AppError> {
        let mut inner = self.inner.lock().await;
        if inner.lesson_conflicts(&lesson, None) {
            return Err(scheduling_conflict());
        }
        inner.lessons.insert(lesson.lesson_id, lesson.clone());
        Ok(lesson)
    }

    async fn update_lesson_if_free(&self, lesson: Lesson) -> Result<Lesson, AppError> {
        let mut inner = self.inner.lock().await;
        if !inner.lessons.contains_key(&lesson.lesson_id) {
            return Err(AppError::NotFound("Lesson not found".to_string()));
        }
        if inner.lesson_conflicts(&lesson, Some(lesson.lesson_id)) {
            return Err(scheduling_conflict());
        }
        inner.lessons.insert(lesson.lesson_id, lesson.clone());
        Ok(lesson)
    }

    async fn update_lesson(&self, lesson: Lesson) -> Result<Lesson, AppError> {
        let mut inner = self.inner.lock().await;
        if !inner.lessons.contains_key(&lesson.lesson_id) {
            return Err(AppError::NotFound("Lesson not found".to_string()));
        }
        inner.lessons.insert(lesson.lesson_id, lesson.clone());
        Ok(lesson)
    }

    async fn lesson(&self, lesson_id: Uuid) -> Result<Option<Lesson>, AppError> {
        let inner = self.inner.lock().await;
        Ok(inner.lessons.get(&lesson_id).cloned())
    }

    async fn teacher_lessons_between(
        &self,
        teacher_id: Uuid,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
    ) -> Result<Vec<Lesson>, AppError> {
        let inner = self.inner.lock().await;
        let mut lessons: Vec<Lesson> = inner
            .lessons
            .values()
            .filter(|l| {
                l.teacher_id == teacher_id
                    && l.status.occupies_slot()
                    && overlaps(l.scheduled_at, l.end_at(), from, to)
            })
            .cloned()
            .collect();
        lessons.sort_by_key(|l| l.scheduled_at);
        Ok(lessons)
    }

    async fn lessons_for_user(&self, user_id: Uuid) -> Result<Vec<Lesson>, AppError> {
        let inner = self.inner.lock().await;
        let mut lessons: Vec<Lesson> = inner
            .lessons
            .values()
            .filter(|l| l.involves(user_id))
            .cloned()
            .collect();
        lessons.sort_by_key(|l| l.scheduled_at);
        Ok(lessons)
    }

    async fn upsert_payment(&self, payment: Payment) -> Result<Payment, AppError> {
        let mut inner = self.inner.lock().await;
        inner.payments.insert(payment.lesson_id, payment.clone());
        Ok(payment)
    }

    async fn payment_by_lesson(&self, lesson_id: Uuid) -> Result<Option<Payment>, AppError> {
        let inner = self.inner.lock().await;
        Ok(inner.payments.get(&lesson_id).cloned())
    }

    async fn insert_review(&self, review: Review) -> Result<Review, AppError> {
        let mut inner = self.inner.lock().await;
        if inner
            .reviews
            .values()
            .any(|r| r.lesson_id == review.lesson_id)
        {
            return Err(AppError::Conflict(
                "This lesson has already been reviewed".to_string(),
            ));
        }
        inner.reviews.insert(review.review_id, review.clone());
        Ok(review)
    }

    async fn review(&self, review_id: Uuid) -> Result<Option<Review>, AppError> {
        let inner = self.inner.lock().await;
        Ok(inner.reviews.get(&review_id).cloned())
    }

    async fn update_review(&self, review: Review) -> Result<Review, AppError> {
        let mut inner = self.inner.lock().await;
        if !inner.reviews.contains_key(&review.review_id) {
            return Err(AppError::NotFound("Review not found".to_string()));
        }
        inner.reviews.insert(review.review_id, review.clone());
        Ok(review)
    }

    async fn reviews_for_teacher(&self, teacher_id: Uuid) -> Result<Vec<Review>, AppError> {
        let inner = self.inner.lock().await;
        let mut reviews: Vec<Review> = inner
            .reviews
            .values()
            .filter(|r| r.teacher_id == teacher_id)
            .cloned()
            .collect();
        reviews.sort_by_key(|r| std::cmp::Reverse(r.created_at));
        Ok(reviews)
    }

    async fn find_or_create_conversation(
        &self,
        conversation: Conversation,
    ) -> Result<Conversation, AppError> {
        let mut inner = self.inner.lock().await;
        if let Some(existing) = inner.conversations.values().find(|c| {
            c.involves(conversation.participant_a) && c.involves(conversation.participant_b)
        }) {
            return Ok(existing.clone());
        }
        inner
            .conversations
            .insert(conversation.conversation_id, conversation.clone());
        Ok(conversation)
    }

    async fn conversation(&self, conversation_id: Uuid) -> Result<Option<Conversation>, AppError> {
        let inner = self.inner.lock().await;
        Ok(inner.conversations.get(&conversation_id).cloned())
    }

    async fn conversations_for_user(&self, user_id: Uuid) -> Result<Vec<Conversation>, AppError> {
        let inner = self.inner.lock().await;
        let mut conversations: Vec<Conversation> = inner
            .conversations
            .values()
            .filter(|c| c.involves(user_id))
            .cloned()
            .collect();
        conversations.sort_by_key(|c| std::cmp::Reverse(c.last_message_at.unwrap_or(c.created_at)));
        Ok(conversations)
    }

    async fn update_conversation(
        &self,
        conversation: Conversation,
    ) -> Result<Conversation, AppError> {
        let mut inner = self.inner.lock().await;
        if !inner.conversations.contains_key(&conversation.conversation_id) {
            return Err(AppError::NotFound("Conversation not found".to_string()));
        }
        inner
            .conversations
            .insert(conversation.conversation_id, conversation.clone());
        Ok(conversation)
    }

    async fn bump_unread(
        &self,
        conversation_id: Uuid,
        recipient_id: Uuid,
        at: DateTime<Utc>,
    ) -> Result<Conversation, AppError> {
        let mut inner = self.inner.lock().await;
        match inner.conversations.get_mut(&conversation_id) {
            Some(conversation) => {
                if conversation.participant_a == recipient_id {
                    conversation.unread_a += 1;
                } else {
                    conversation.unread_b += 1;
                }
                conversation.last_message_at = Some(at);
                Ok(conversation.clone())
            }
            None => Err(AppError::NotFound("Conversation not found".to_string())),
        }
    }

    async fn insert_message(&self, message: Message) -> Result<Message, AppError> {
        let mut inner = self.inner.lock().await;
        inner.messages.push(message.clone());
        Ok(message)
    }

    async fn message(&self, message_id: Uuid) -> Result<Option<Message>, AppError> {
        let inner = self.inner.lock().await;
        Ok(inner
            .messages
            .iter()
            .find(|m| m.message_id == message_id)
            .cloned())
    }

    async fn update_message(&self, message: Message) -> Result<Message, AppError> {
        let mut inner = self.inner.lock().await;
        match inner
            .messages
            .iter_mut()
            .find(|m| m.message_id == message.message_id)
        {
            Some(slot) => {
                *slot = message.clone();
                Ok(message)
            }
            None => Err(AppError::NotFound("Message not found".to_string())),
        }
    }

    async fn messages(
        &self,
        conversation_id: Uuid,
        limit: i64,
        before: Option<Uuid>,
    ) -> Result<Vec<Message>, AppError> {
        let inner = self.inner.lock().await;
        let cutoff = before.and_then(|id| {
            inner
                .messages
                .iter()
                .find(|m| m.message_id == id)
                .map(|m| m.created_at)
        });
        let mut page: Vec<Message> = inner
            .messages
            .iter()
            .filter(|m| m.conversation_id == conversation_id)
            .filter(|m| cutoff.map_or(true, |at| m.created_at < at))
            .cloned()
            .collect();
        page.sort_by_key(|m| std::cmp::Reverse(m.created_at));
        page.truncate(limit.max(0) as usize);
        Ok(page)
    }

    async fn insert_notification(&self, notification: Notification) -> Result<(), AppError> {
        let mut inner = self.inner.lock().await;
        inner.notifications.push(notification);
        Ok(())
    }

    async fn notifications(
        &self,
        recipient_id: Uuid,
        unread_only: bool,
    ) -> Result<Vec<Notification>, AppError> {
        let inner = self.inner.lock().await;
        let mut result: Vec<Notification> = inner
            .notifications
            .iter()
            .filter(|n| n.recipient_id == recipient_id && (!unread_only || !n.read))
            .cloned()
            .collect();
        result.sort_by_key(|n| std::cmp::Reverse(n.created_at));
        Ok(result)
    }

    async fn mark_notification_read(
        &self,
        notification_id: Uuid,
        recipient_id: Uuid,
    ) -> Result<(), AppError> {
        let mut inner = self.inner.lock().await;
        match inner
            .notifications
            .iter_mut()
            .find(|n| n.notification_id == notification_id && n.recipient_id == recipient_id)
        {
            Some(notification) => {
                notification.read = true;
                Ok(())
            }
            None => Err(AppError::NotFound("Notification not found".to_string())),
        }
    }
}
