use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::de::DeserializeOwned;
use serde::Serialize;
use sqlx::postgres::{PgPool, PgPoolOptions, PgRow};
use sqlx::Row;
use std::str::FromStr;
use uuid::Uuid;

use tutorhub_common::{AppError, DatabaseConfig};

use crate::models::{
    Conversation, Lesson, Message, Notification, NotificationKind, Payment, Review,
    StudentProfile, TeacherProfile, TeacherSearchQuery, User,
};
use crate::repository::{scheduling_conflict, MarketplaceStore};

/// Lesson statuses that keep a teacher's interval occupied, as stored.
const OCCUPYING: [&str; 3] = ["pending", "confirmed", "in_progress"];

pub struct PgStore {
    pool: PgPool,
}

impl PgStore {
    pub async fn connect(config: &DatabaseConfig) -> Result<Self, AppError> {
        let pool = PgPoolOptions::new()
            .max_connections(config.max_connections)
            .connect(&config.connection_string())
            .await?;

        tracing::info!("Database connection established");
        Ok(Self { pool })
    }

    pub async fn run_migrations(&self) -> Result<(), AppError> {
        sqlx::migrate!("./migrations")
            .run(&self.pool)
            .await
            .map_err(|e| AppError::Internal(format!("Migration failed: {}", e)))?;
        tracing::info!("Database migrations applied");
        Ok(())
    }
}

fn parse_text<T: FromStr<Err = String>>(raw: &str) -> Result<T, AppError> {
    raw.parse().map_err(AppError::Internal)
}

fn from_json<T: DeserializeOwned>(value: serde_json::Value) -> Result<T, AppError> {
    serde_json::from_value(value)
        .map_err(|e| AppError::Internal(format!("Stored JSON decode failed: {}", e)))
}

fn to_json<T: Serialize>(value: &T) -> Result<serde_json::Value, AppError> {
    serde_json::to_value(value)
        .map_err(|e| AppError::Internal(format!("JSON encode failed: {}", e)))
}

fn user_from_row(row: &PgRow) -> Result<User, AppError> {
    Ok(User {
        user_id: row.try_get("user_id")?,
        email: row.try_get("email")?,
        username: row.try_get("username")?,
        display_name: row.try_get("display_name")?,
        password_hash: row.try_get("password_hash")?,
        role: parse_text(row.try_get::<String, _>("role")?.as_str())?,
        created_at: row.try_get("created_at")?,
        updated_at: row.try_get("updated_at")?,
    })
}

fn teacher_profile_from_row(row: &PgRow) -> Result<TeacherProfile, AppError> {
    Ok(TeacherProfile {
        user_id: row.try_get("user_id")?,
        subjects: from_json(row.try_get("subjects")?)?,
        hourly_rate_cents: row.try_get("hourly_rate_cents")?,
        currency: row.try_get("currency")?,
        bio: row.try_get("bio")?,
        timezone: row.try_get("timezone")?,
        tz_offset_minutes: row.try_get("tz_offset_minutes")?,
        weekly_availability: from_json(row.try_get("weekly_availability")?)?,
        exceptions: from_json(row.try_get("exceptions")?)?,
        auto_accept: row.try_get("auto_accept")?,
        min_notice_hours: row.try_get("min_notice_hours")?,
        commission_percent: row.try_get("commission_percent")?,
        verified: row.try_get("verified")?,
        lessons_completed: row.try_get("lessons_completed")?,
        rating_avg: row.try_get("rating_avg")?,
        rating_count: row.try_get("rating_count")?,
        created_at: row.try_get("created_at")?,
        updated_at: row.try_get("updated_at")?,
    })
}

fn student_profile_from_row(row: &PgRow) -> Result<StudentProfile, AppError> {
    Ok(StudentProfile {
        user_id: row.try_get("user_id")?,
        goals: row.try_get("goals")?,
        preferred_subjects: from_json(row.try_get("preferred_subjects")?)?,
        budget_cents_per_hour: row.try_get("budget_cents_per_hour")?,
        created_at: row.try_get("created_at")?,
        updated_at: row.try_get("updated_at")?,
    })
}

fn lesson_from_row(row: &PgRow) -> Result<Lesson, AppError> {
    Ok(Lesson {
        lesson_id: row.try_get("lesson_id")?,
        teacher_id: row.try_get("teacher_id")?,
        student_id: row.try_get("student_id")?,
        subject: row.try_get("subject")?,
        scheduled_at: row.try_get("scheduled_at")?,
        duration_minutes: row.try_get("duration_minutes")?,
        price_cents: row.try_get("price_cents")?,
        status: parse_text(row.try_get::<String, _>("status")?.as_str())?,
        teacher_joined_at: row.try_get("teacher_joined_at")?,
        student_joined_at: row.try_get("student_joined_at")?,
        cancellation: row
            .try_get::<Option<serde_json::Value>, _>("cancellation")?
            .map(from_json)
            .transpose()?,
        reschedule: row
            .try_get::<Option<serde_json::Value>, _>("reschedule")?
            .map(from_json)
            .transpose()?,
        created_at: row.try_get("created_at")?,
        updated_at: row.try_get("updated_at")?,
    })
}

fn payment_from_row(row: &PgRow) -> Result<Payment, AppError> {
    Ok(Payment {
        payment_id: row.try_get("payment_id")?,
        lesson_id: row.try_get("lesson_id")?,
        amount_cents: row.try_get("amount_cents")?,
        commission_percent: row.try_get("commission_percent")?,
        platform_fee_cents: row.try_get("platform_fee_cents")?,
        teacher_net_cents: row.try_get("teacher_net_cents")?,
        refunded_cents: row.try_get("refunded_cents")?,
        status: parse_text(row.try_get::<String, _>("status")?.as_str())?,
        created_at: row.try_get("created_at")?,
        updated_at: row.try_get("updated_at")?,
    })
}

fn review_from_row(row: &PgRow) -> Result<Review, AppError> {
    Ok(Review {
        review_id: row.try_get("review_id")?,
        lesson_id: row.try_get("lesson_id")?,
        teacher_id: row.try_get("teacher_id")?,
        student_id: row.try_get("student_id")?,
        rating_overall: row.try_get("rating_overall")?,
        rating_quality: row.try_get("rating_quality")?,
        rating_communication: row.try_get("rating_communication")?,
        rating_punctuality: row.try_get("rating_punctuality")?,
        rating_preparation: row.try_get("rating_preparation")?,
        comment: row.try_get("comment")?,
        teacher_response: row.try_get("teacher_response")?,
        moderation_status: parse_text(row.try_get::<String, _>("moderation_status")?.as_str())?,
        created_at: row.try_get("created_at")?,
        updated_at: row.try_get("updated_at")?,
    })
}

fn conversation_from_row(row: &PgRow) -> Result<Conversation, AppError> {
    Ok(Conversation {
        conversation_id: row.try_get("conversation_id")?,
        participant_a: row.try_get("participant_a")?,
        participant_b: row.try_get("participant_b")?,
        lesson_id: row.try_get("lesson_id")?,
        unread_a: row.try_get("unread_a")?,
        unread_b: row.try_get("unread_b")?,
        last_message_at: row.try_get("last_message_at")?,
        created_at: row.try_get("created_at")?,
    })
}

fn message_from_row(row: &PgRow) -> Result<Message, AppError> {
    Ok(Message {
        message_id: row.try_get("message_id")?,
        conversation_id: row.try_get("conversation_id")?,
        sender_id: row.try_get("sender_id")?,
        content: row.try_get("content")?,
        edited_at: row.try_get("edited_at")?,
        deleted: row.try_get("deleted")?,
        created_at: row.try_get("created_at")?,
    })
}

fn notification_from_row(row: &PgRow) -> Result<Notification, AppError> {
    Ok(Notification {
        notification_id: row.try_get("notification_id")?,
        recipient_id: row.try_get("recipient_id")?,
        kind: parse_text::<NotificationKind>(row.try_get::<String, _>("kind")?.as_str())?,
        payload: row.try_get("payload")?,
        read: row.try_get("read")?,
        created_at: row.try_get("created_at")?,
    })
}

fn is_unique_violation(error: &sqlx::Error) -> bool {
    matches!(error, sqlx::Error::Database(db) if db.is_unique_violation())
}

#[async_trait]
impl MarketplaceStore for PgStore {
    async fn create_user(&self, user: User) -> Result<User, AppError> {
        let result = sqlx::query(
            r#"
            INSERT INTO users (user_id, email, username, display_name, password_hash, role,
                               created_at, updated_at)
            VALUES ($1, lower($2), $3, $4, $5, $6, $7, $8)
            "#,
        )
        .bind(user.user_id)
        .bind(&user.email)
        .bind(&user.username)
        .bind(&user.display_name)
        .bind(&user.password_hash)
        .bind(user.role.as_str())
        .bind(user.created_at)
        .bind(user.updated_at)
        .execute(&self.pool)
        .await;

        match result {
            Ok(_) => Ok(user),
            Err(e) if is_unique_violation(&e) => {
                Err(AppError::Conflict("Email is already registered".to_string()))
            }
            Err(e) => Err(e.into()),
        }
    }

    async fn user_by_email(&self, email: &str) -> Result<Option<User>, AppError> {
        sqlx::query("SELECT * FROM users WHERE email = lower($1)")
            .bind(email)
            .fetch_optional(&self.pool)
            .await?
            .map(|row| user_from_row(&row))
            .transpose()
    }

    async fn user_by_id(&self, user_id: Uuid) -> Result<Option<User>, AppError> {
        sqlx::query("SELECT * FROM users WHERE user_id = $1")
            .bind(user_id)
            .fetch_optional(&self.pool)
            .await?
            .map(|row| user_from_row(&row))
            .transpose()
    }

    async fn create_session(&self, token: Uuid, user_id: Uuid) -> Result<(), AppError> {
        sqlx::query("INSERT INTO sessions (token, user_id, created_at) VALUES ($1, $2, $3)")
            .bind(token)
            .bind(user_id)
            .bind(Utc::now())
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn session_user(&self, token: Uuid) -> Result<Option<Uuid>, AppError> {
        let row = sqlx::query("SELECT user_id FROM sessions WHERE token = $1")
            .bind(token)
            .fetch_optional(&self.pool)
            .await?;
        row.map(|r| r.try_get("user_id").map_err(AppError::from))
            .transpose()
    }

    async fn delete_session(&self, token: Uuid) -> Result<(), AppError> {
        sqlx::query("DELETE FROM sessions WHERE token = $1")
            .bind(token)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn upsert_teacher_profile(
        &self,
        profile: TeacherProfile,
    ) -> Result<TeacherProfile, AppError> {
        sqlx::query(
            r#"
            INSERT INTO teacher_profiles (user_id, subjects, hourly_rate_cents, currency, bio,
                timezone, tz_offset_minutes, weekly_availability, exceptions, auto_accept,
                min_notice_hours, commission_percent, verified, lessons_completed, rating_avg,
                rating_count, created_at, updated_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, $15, $16, $17, $18)
            ON CONFLICT (user_id) DO UPDATE SET
                subjects = EXCLUDED.subjects,
                hourly_rate_cents = EXCLUDED.hourly_rate_cents,
                currency = EXCLUDED.currency,
                bio = EXCLUDED.bio,
                timezone = EXCLUDED.timezone,
                tz_offset_minutes = EXCLUDED.tz_offset_minutes,
                weekly_availability = EXCLUDED.weekly_availability,
                exceptions = EXCLUDED.exceptions,
                auto_accept = EXCLUDED.auto_accept,
                min_notice_hours = EXCLUDED.min_notice_hours,
                commission_percent = EXCLUDED.commission_percent,
                verified = EXCLUDED.verified,
                lessons_completed = EXCLUDED.lessons_completed,
                rating_avg = EXCLUDED.rating_avg,
                rating_count = EXCLUDED.rating_count,
                updated_at = EXCLUDED.updated_at
            "#,
        )
        .bind(profile.user_id)
        .bind(to_json(&profile.subjects)?)
        .bind(profile.hourly_rate_cents)
        .bind(&profile.currency)
        .bind(&profile.bio)
        .bind(&profile.timezone)
        .bind(profile.tz_offset_minutes)
        .bind(to_json(&profile.weekly_availability)?)
        .bind(to_json(&profile.exceptions)?)
        .bind(profile.auto_accept)
        .bind(profile.min_notice_hours)
        .bind(profile.commission_percent)
        .bind(profile.verified)
        .bind(profile.lessons_completed)
        .bind(profile.rating_avg)
        .bind(profile.rating_count)
        .bind(profile.created_at)
        .bind(profile.updated_at)
        .execute(&self.pool)
        .await?;
        Ok(profile)
    }

    async fn teacher_profile(&self, user_id: Uuid) -> Result<Option<TeacherProfile>, AppError> {
        sqlx::query("SELECT * FROM teacher_profiles WHERE user_id = $1")
            .bind(user_id)
            .fetch_optional(&self.pool)
            .await?
            .map(|row| teacher_profile_from_row(&row))
            .transpose()
    }

    async fn search_teachers(
        &self,
        query: &TeacherSearchQuery,
    ) -> Result<Vec<TeacherProfile>, AppError> {
        let rows = sqlx::query(
            r#"
            SELECT * FROM teacher_profiles
            WHERE ($1::text IS NULL OR EXISTS (
                    SELECT 1 FROM jsonb_array_elements_text(subjects) s
                    WHERE lower(s) = lower($1)))
              AND ($2::bigint IS NULL OR hourly_rate_cents <= $2)
              AND ($3::boolean IS NULL OR verified = $3)
            ORDER BY rating_avg DESC
            "#,
        )
        .bind(&query.subject)
        .bind(query.max_rate_cents)
        .bind(query.verified)
        .fetch_all(&self.pool)
        .await?;
        rows.iter().map(teacher_profile_from_row).collect()
    }

    async fn upsert_student_profile(
        &self,
        profile: StudentProfile,
    ) -> Result<StudentProfile, AppError> {
        sqlx::query(
            r#"
            INSERT INTO student_profiles (user_id, goals, preferred_subjects,
                budget_cents_per_hour, created_at, updated_at)
            VALUES ($1, $2, $3, $4, $5, $6)
            ON CONFLICT (user_id) DO UPDATE SET
                goals = EXCLUDED.goals,
                preferred_subjects = EXCLUDED.preferred_subjects,
                budget_cents_per_hour = EXCLUDED.budget_cents_per_hour,
                updated_at = EXCLUDED.updated_at
            "#,
        )
        .bind(profile.user_id)
        .bind(&profile.goals)
        .bind(to_json(&profile.preferred_subjects)?)
        .bind(profile.budget_cents_per_hour)
        .bind(profile.created_at)
        .bind(profile.updated_at)
        .execute(&self.pool)
        .await?;
        Ok(profile)
    }

    async fn student_profile(&self, user_id: Uuid) -> Result<Option<StudentProfile>, AppError> {
        sqlx::query("SELECT * FROM student_profiles WHERE user_id = $1")
            .bind(user_id)
            .fetch_optional(&self.pool)
            .await?
            .map(|row| student_profile_from_row(&row))
            .transpose()
    }

    async fn insert_lesson_if_free(&self, lesson: Lesson) -> Result<Lesson, AppError> {
        // Check and insert in one statement so two racing bookings cannot
        // both land on the same interval.
        let result = sqlx::query(
            r#"
            INSERT INTO lessons (lesson_id, teacher_id, student_id, subject, scheduled_at,
                duration_minutes, price_cents, status, teacher_joined_at, student_joined_at,
                cancellation, reschedule, created_at, updated_at)
            SELECT $1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14
            WHERE NOT EXISTS (
                SELECT 1 FROM lessons
                WHERE teacher_id = $2
                  AND status = ANY($15)
                  AND scheduled_at < $16
                  AND scheduled_at + make_interval(mins => duration_minutes::int) > $5
            )
            "#,
        )
        .bind(lesson.lesson_id)
        .bind(lesson.teacher_id)
        .bind(lesson.student_id)
        .bind(&lesson.subject)
        .bind(lesson.scheduled_at)
        .bind(lesson.duration_minutes)
        .bind(lesson.price_cents)
        .bind(lesson.status.as_str())
        .bind(lesson.teacher_joined_at)
        .bind(lesson.student_joined_at)
        .bind(lesson.cancellation.as_ref().map(to_json).transpose()?)
        .bind(lesson.reschedule.as_ref().map(to_json).transpose()?)
        .bind(lesson.created_at)
        .bind(lesson.updated_at)
        .bind(&OCCUPYING[..])
        .bind(lesson.end_at())
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            return Err(scheduling_conflict());
        }
        Ok(lesson)
    }

    async fn update_lesson_if_free(&self, lesson: Lesson) -> Result<Lesson, AppError> {
        let result = sqlx::query(
            r#"
            UPDATE lessons SET
                subject = $2, scheduled_at = $3, duration_minutes = $4, price_cents = $5,
                status = $6, teacher_joined_at = $7, student_joined_at = $8,
                cancellation = $9, reschedule = $10, updated_at = $11
            WHERE lesson_id = $1
              AND NOT EXISTS (
                SELECT 1 FROM lessons other
                WHERE other.teacher_id = $12
                  AND other.lesson_id <> $1
                  AND other.status = ANY($13)
                  AND other.scheduled_at < $14
                  AND other.scheduled_at
                      + make_interval(mins => other.duration_minutes::int) > $3
              )
            "#,
        )
        .bind(lesson.lesson_id)
        .bind(&lesson.subject)
        .bind(lesson.scheduled_at)
        .bind(lesson.duration_minutes)
        .bind(lesson.price_cents)
        .bind(lesson.status.as_str())
        .bind(lesson.teacher_joined_at)
        .bind(lesson.student_joined_at)
        .bind(lesson.cancellation.as_ref().map(to_json).transpose()?)
        .bind(lesson.reschedule.as_ref().map(to_json).transpose()?)
        .bind(lesson.updated_at)
        .bind(lesson.teacher_id)
        .bind(&OCCUPYING[..])
        .bind(lesson.end_at())
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            if self.lesson(lesson.lesson_id).await?.is_none() {
                return Err(AppError::NotFound("Lesson not found".to_string()));
            }
            return Err(scheduling_conflict());
        }
        Ok(lesson)
    }

    async fn update_lesson(&self, lesson: Lesson) -> Result<Lesson, AppError> {
        let result = sqlx::query(
            r#"
            UPDATE lessons SET
                subject = $2, scheduled_at = $3, duration_minutes = $4, price_cents = $5,
                status = $6, teacher_joined_at = $7, student_joined_at = $8,
                cancellation = $9, reschedule = $10, updated_at = $11
            WHERE lesson_id = $1
            "#,
        )
        .bind(lesson.lesson_id)
        .bind(&lesson.subject)
        .bind(lesson.scheduled_at)
        .bind(lesson.duration_minutes)
        .bind(lesson.price_cents)
        .bind(lesson.status.as_str())
        .bind(lesson.teacher_joined_at)
        .bind(lesson.student_joined_at)
        .bind(lesson.cancellation.as_ref().map(to_json).transpose()?)
        .bind(lesson.reschedule.as_ref().map(to_json).transpose()?)
        .bind(lesson.updated_at)
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            return Err(AppError::NotFound("Lesson not found".to_string()));
        }
        Ok(lesson)
    }

    async fn lesson(&self, lesson_id: Uuid) -> Result<Option<Lesson>, AppError> {
        sqlx::query("SELECT * FROM lessons WHERE lesson_id = $1")
            .bind(lesson_id)
            .fetch_optional(&self.pool)
            .await?
            .map(|row| lesson_from_row(&row))
            .transpose()
    }

    async fn teacher_lessons_between(
        &self,
        teacher_id: Uuid,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
    ) -> Result<Vec<Lesson>, AppError> {
        let rows = sqlx::query(
            r#"
            SELECT * FROM lessons
            WHERE teacher_id = $1
              AND status = ANY($2)
              AND scheduled_at < $4
              AND scheduled_at + make_interval(mins => duration_minutes::int) > $3
            ORDER BY scheduled_at
            "#,
        )
        .bind(teacher_id)
        .bind(&OCCUPYING[..])
        .bind(from)
        .bind(to)
        .fetch_all(&self.pool)
        .await?;
        rows.iter().map(lesson_from_row).collect()
    }

    async fn lessons_for_user(&self, user_id: Uuid) -> Result<Vec<Lesson>, AppError> {
        let rows = sqlx::query(
            r#"
            SELECT * FROM lessons
            WHERE teacher_id = $1 OR student_id = $1
            ORDER BY scheduled_at
            "#,
        )
        .bind(user_id)
        .fetch_all(&self.pool)
        .await?;
        rows.iter().map(lesson_from_row).collect()
    }

    async fn upsert_payment(&self, payment: Payment) -> Result<Payment, AppError> {
        sqlx::query(
            r#"
            INSERT INTO payments (payment_id, lesson_id, amount_cents, commission_percent,
                platform_fee_cents, teacher_net_cents, refunded_cents, status,
                created_at, updated_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10)
            ON CONFLICT (lesson_id) DO UPDATE SET
                amount_cents = EXCLUDED.amount_cents,
                commission_percent = EXCLUDED.commission_percent,
                platform_fee_cents = EXCLUDED.platform_fee_cents,
                teacher_net_cents = EXCLUDED.teacher_net_cents,
                refunded_cents = EXCLUDED.refunded_cents,
                status = EXCLUDED.status,
                updated_at = EXCLUDED.updated_at
            "#,
        )
        .bind(payment.payment_id)
        .bind(payment.lesson_id)
        .bind(payment.amount_cents)
        .bind(payment.commission_percent)
        .bind(payment.platform_fee_cents)
        .bind(payment.teacher_net_cents)
        .bind(payment.refunded_cents)
        .bind(payment.status.as_str())
        .bind(payment.created_at)
        .bind(payment.updated_at)
        .execute(&self.pool)
        .await?;
        Ok(payment)
    }

    async fn payment_by_lesson(&self, lesson_id: Uuid) -> Result<Option<Payment>, AppError> {
        sqlx::query("SELECT * FROM payments WHERE lesson_id = $1")
            .bind(lesson_id)
            .fetch_optional(&self.pool)
            .await?
            .map(|row| payment_from_row(&row))
            .transpose()
    }

    async fn insert_review(&self, review: Review) -> Result<Review, AppError> {
        let result = sqlx::query(
            r#"
            INSERT INTO reviews (review_id, lesson_id, teacher_id, student_id, rating_overall,
                rating_quality, rating_communication, rating_punctuality, rating_preparation,
                comment, teacher_response, moderation_status, created_at, updated_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14)
            "#,
        )
        .bind(review.review_id)
        .bind(review.lesson_id)
        .bind(review.teacher_id)
        .bind(review.student_id)
        .bind(review.rating_overall)
        .bind(review.rating_quality)
        .bind(review.rating_communication)
        .bind(review.rating_punctuality)
        .bind(review.rating_preparation)
        .bind(&review.comment)
        .bind(&review.teacher_response)
        .bind(review.moderation_status.as_str())
        .bind(review.created_at)
        .bind(review.updated_at)
        .execute(&self.pool)
        .await;

        match result {
            Ok(_) => Ok(review),
            Err(e) if is_unique_violation(&e) => Err(AppError::Conflict(
                "This lesson has already been reviewed".to_string(),
            )),
            Err(e) => Err(e.into()),
        }
    }

    async fn review(&self, review_id: Uuid) -> Result<Option<Review>, AppError> {
        sqlx::query("SELECT * FROM reviews WHERE review_id = $1")
            .bind(review_id)
            .fetch_optional(&self.pool)
            .await?
            .map(|row| review_from_row(&row))
            .transpose()
    }

    async fn update_review(&self, review: Review) -> Result<Review, AppError> {
        let result = sqlx::query(
            r#"
            UPDATE reviews SET
                teacher_response = $2, moderation_status = $3, updated_at = $4
            WHERE review_id = $1
            "#,
        )
        .bind(review.review_id)
        .bind(&review.teacher_response)
        .bind(review.moderation_status.as_str())
        .bind(review.updated_at)
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            return Err(AppError::NotFound("Review not found".to_string()));
        }
        Ok(review)
    }

    async fn reviews_for_teacher(&self, teacher_id: Uuid) -> Result<Vec<Review>, AppError> {
        let rows = sqlx::query(
            "SELECT * FROM reviews WHERE teacher_id = $1 ORDER BY created_at DESC",
        )
        .bind(teacher_id)
        .fetch_all(&self.pool)
        .await?;
        rows.iter().map(review_from_row).collect()
    }

    async fn find_or_create_conversation(
        &self,
        conversation: Conversation,
    ) -> Result<Conversation, AppError> {
        let existing = sqlx::query(
            r#"
            SELECT * FROM conversations
            WHERE (participant_a = $1 AND participant_b = $2)
               OR (participant_a = $2 AND participant_b = $1)
            "#,
        )
        .bind(conversation.participant_a)
        .bind(conversation.participant_b)
        .fetch_optional(&self.pool)
        .await?;

        if let Some(row) = existing {
            return conversation_from_row(&row);
        }

        sqlx::query(
            r#"
            INSERT INTO conversations (conversation_id, participant_a, participant_b, lesson_id,
                unread_a, unread_b, last_message_at, created_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
            "#,
        )
        .bind(conversation.conversation_id)
        .bind(conversation.participant_a)
        .bind(conversation.participant_b)
        .bind(conversation.lesson_id)
        .bind(conversation.unread_a)
        .bind(conversation.unread_b)
        .bind(conversation.last_message_at)
        .bind(conversation.created_at)
        .execute(&self.pool)
        .await?;
        Ok(conversation)
    }

    async fn conversation(&self, conversation_id: Uuid) -> Result<Option<Conversation>, AppError> {
        sqlx::query("SELECT * FROM conversations WHERE conversation_id = $1")
            .bind(conversation_id)
            .fetch_optional(&self.pool)
            .await?
            .map(|row| conversation_from_row(&row))
            .transpose()
    }

    async fn conversations_for_user(&self, user_id: Uuid) -> Result<Vec<Conversation>, AppError> {
        let rows = sqlx::query(
            r#"
            SELECT * FROM conversations
            WHERE participant_a = $1 OR participant_b = $1
            ORDER BY COALESCE(last_message_at, created_at) DESC
            "#,
        )
        .bind(user_id)
        .fetch_all(&self.pool)
        .await?;
        rows.iter().map(conversation_from_row).collect()
    }

    async fn update_conversation(
        &self,
        conversation: Conversation,
    ) -> Result<Conversation, AppError> {
        let result = sqlx::query(
            r#"
            UPDATE conversations SET
                unread_a = $2, unread_b = $3, last_message_at = $4
            WHERE conversation_id = $1
            "#,
        )
        .bind(conversation.conversation_id)
        .bind(conversation.unread_a)
        .bind(conversation.unread_b)
        .bind(conversation.last_message_at)
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            return Err(AppError::NotFound("Conversation not found".to_string()));
        }
        Ok(conversation)
    }

    async fn bump_unread(
        &self,
        conversation_id: Uuid,
        recipient_id: Uuid,
        at: DateTime<Utc>,
    ) -> Result<Conversation, AppError> {
        sqlx::query(
            r#"
            UPDATE conversations SET
                unread_a = unread_a + CASE WHEN participant_a = $2 THEN 1 ELSE 0 END,
                unread_b = unread_b + CASE WHEN participant_b = $2 THEN 1 ELSE 0 END,
                last_message_at = $3
            WHERE conversation_id = $1
            RETURNING *
            "#,
        )
        .bind(conversation_id)
        .bind(recipient_id)
        .bind(at)
        .fetch_optional(&self.pool)
        .await?
        .map(|row| conversation_from_row(&row))
        .transpose()?
        .ok_or_else(|| AppError::NotFound("Conversation not found".to_string()))
    }

    async fn insert_message(&self, message: Message) -> Result<Message, AppError> {
        sqlx::query(
            r#"
            INSERT INTO messages (message_id, conversation_id, sender_id, content, edited_at,
                deleted, created_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7)
            "#,
        )
        .bind(message.message_id)
        .bind(message.conversation_id)
        .bind(message.sender_id)
        .bind(&message.content)
        .bind(message.edited_at)
        .bind(message.deleted)
        .bind(message.created_at)
        .execute(&self.pool)
        .await?;
        Ok(message)
    }

    async fn message(&self, message_id: Uuid) -> Result<Option<Message>, AppError> {
        sqlx::query("SELECT * FROM messages WHERE message_id = $1")
            .bind(message_id)
            .fetch_optional(&self.pool)
            .await?
            .map(|row| message_from_row(&row))
            .transpose()
    }

    async fn update_message(&self, message: Message) -> Result<Message, AppError> {
        let result = sqlx::query(
            r#"
            UPDATE messages SET content = $2, edited_at = $3, deleted = $4
            WHERE message_id = $1
            "#,
        )
        .bind(message.message_id)
        .bind(&message.content)
        .bind(message.edited_at)
        .bind(message.deleted)
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            return Err(AppError::NotFound("Message not found".to_string()));
        }
        Ok(message)
    }

    async fn messages(
        &self,
        conversation_id: Uuid,
        limit: i64,
        before: Option<Uuid>,
    ) -> Result<Vec<Message>, AppError> {
        let rows = sqlx::query(
            r#"
            SELECT * FROM messages
            WHERE conversation_id = $1
              AND ($2::uuid IS NULL OR created_at < (
                    SELECT created_at FROM messages WHERE message_id = $2))
            ORDER BY created_at DESC
            LIMIT $3
            "#,
        )
        .bind(conversation_id)
        .bind(before)
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;
        rows.iter().map(message_from_row).collect()
    }

    async fn insert_notification(&self, notification: Notification) -> Result<(), AppError> {
        sqlx::query(
            r#"
            INSERT INTO notifications (notification_id, recipient_id, kind, payload, read,
                created_at)
            VALUES ($1, $2, $3, $4, $5, $6)
            "#,
        )
        .bind(notification.notification_id)
        .bind(notification.recipient_id)
        .bind(notification.kind.as_str())
        .bind(&notification.payload)
        .bind(notification.read)
        .bind(notification.created_at)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn notifications(
        &self,
        recipient_id: Uuid,
        unread_only: bool,
    ) -> Result<Vec<Notification>, AppError> {
        let rows = sqlx::query(
            r#"
            SELECT * FROM notifications
            WHERE recipient_id = $1 AND (NOT $2 OR NOT read)
            ORDER BY created_at DESC
            "#,
        )
        .bind(recipient_id)
        .bind(unread_only)
        .fetch_all(&self.pool)
        .await?;
        rows.iter().map(notification_from_row).collect()
    }

    async fn mark_notification_read(
        &self,
        notification_id: Uuid,
        recipient_id: Uuid,
    ) -> Result<(), AppError> {
        let result = sqlx::query(
            "UPDATE notifications SET read = TRUE WHERE notification_id = $1 AND recipient_id = $2",
        )
        .bind(notification_id)
        .bind(recipient_id)
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            return Err(AppError::NotFound("Notification not found".to_string()));
        }
        Ok(())
    }
}
