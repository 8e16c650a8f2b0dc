use chrono::Utc;
use std::sync::Arc;
use uuid::Uuid;

use tutorhub_common::{AppError, LessonStatus, ModerationStatus};

use crate::models::{
    CreateReviewRequest, Notification, NotificationKind, Review, ReviewResponseRequest,
};
use crate::repository::MarketplaceStore;

pub struct ReviewService {
    store: Arc<dyn MarketplaceStore>,
}

impl ReviewService {
    pub fn new(store: Arc<dyn MarketplaceStore>) -> Self {
        Self { store }
    }

    /// A review requires a completed lesson, comes from its student, and a
    /// lesson can be reviewed once.
    pub async fn create(
        &self,
        student_id: Uuid,
        lesson_id: Uuid,
        request: CreateReviewRequest,
    ) -> Result<Review, AppError> {
        let lesson = self
            .store
            .lesson(lesson_id)
            .await?
            .ok_or_else(|| AppError::NotFound("Lesson not found".to_string()))?;

        if lesson.student_id != student_id {
            return Err(AppError::Authorization(
                "Only the student of the lesson can review it".to_string(),
            ));
        }
        if lesson.status != LessonStatus::Completed {
            return Err(AppError::Conflict(
                "Only completed lessons can be reviewed".to_string(),
            ));
        }

        let now = Utc::now();
        let review = self
            .store
            .insert_review(Review {
                review_id: Uuid::new_v4(),
                lesson_id,
                teacher_id: lesson.teacher_id,
                student_id,
                rating_overall: request.rating_overall,
                rating_quality: request.rating_quality,
                rating_communication: request.rating_communication,
                rating_punctuality: request.rating_punctuality,
                rating_preparation: request.rating_preparation,
                comment: request.comment,
                teacher_response: None,
                moderation_status: ModerationStatus::Approved,
                created_at: now,
                updated_at: now,
            })
            .await?;

        if let Some(mut profile) = self.store.teacher_profile(lesson.teacher_id).await? {
            // Running average over the overall rating only.
            let total = profile.rating_avg * profile.rating_count as f64
                + f64::from(review.rating_overall);
            profile.rating_count += 1;
            profile.rating_avg = total / profile.rating_count as f64;
            profile.updated_at = now;
            self.store.upsert_teacher_profile(profile).await?;
        }

        self.store
            .insert_notification(Notification {
                notification_id: Uuid::new_v4(),
                recipient_id: lesson.teacher_id,
                kind: NotificationKind::ReviewReceived,
                payload: serde_json::json!({
                    "review_id": review.review_id,
                    "lesson_id": lesson_id,
                    "rating_overall": review.rating_overall,
                }),
                read: false,
                created_at: now,
            })
            .await?;

        Ok(review)
    }

    /// One public reply per review, by the reviewed teacher.
    pub async fn respond(
        &self,
        teacher_id: Uuid,
        review_id: Uuid,
        request: ReviewResponseRequest,
    ) -> Result<Review, AppError> {
        let mut review = self
            .store
            .review(review_id)
            .await?
            .ok_or_else(|| AppError::NotFound("Review not found".to_string()))?;

        if review.teacher_id != teacher_id {
            return Err(AppError::Authorization(
                "Only the reviewed teacher can respond".to_string(),
            ));
        }
        if review.teacher_response.is_some() {
            return Err(AppError::Conflict(
                "This review already has a response".to_string(),
            ));
        }

        review.teacher_response = Some(request.response);
        review.updated_at = Utc::now();
        self.store.update_review(review).await
    }

    pub async fn for_teacher(&self, teacher_id: Uuid) -> Result<Vec<Review>, AppError> {
        self.store.reviews_for_teacher(teacher_id).await
    }
}
