use chrono::{DateTime, Duration, Utc};
use rust_decimal::prelude::ToPrimitive;
use rust_decimal::{Decimal, RoundingStrategy};
use std::sync::Arc;
use uuid::Uuid;

use tutorhub_common::{AppError, LessonStatus, PaymentStatus};

use crate::availability::{self, Slot};
use crate::config::MarketplaceConfig;
use crate::models::{
    CancelLessonRequest, CancellationRecord, CreateLessonRequest, Lesson, Notification,
    NotificationKind, Payment, RescheduleProposal, RescheduleRequest, SlotQuery, TeacherProfile,
};
use crate::realtime::{RealtimeEmitter, RealtimeEvent};
use crate::repository::{scheduling_conflict, MarketplaceStore};
use crate::settlement;

/// Legal lifecycle moves. Everything not listed here is a conflict, never
/// a silent no-op.
pub fn transition_allowed(from: LessonStatus, to: LessonStatus) -> bool {
    matches!(
        (from, to),
        (LessonStatus::Pending, LessonStatus::Confirmed)
            | (LessonStatus::Pending, LessonStatus::Cancelled)
            | (LessonStatus::Confirmed, LessonStatus::InProgress)
            | (LessonStatus::Confirmed, LessonStatus::Cancelled)
            | (LessonStatus::Confirmed, LessonStatus::NoShow)
            | (LessonStatus::InProgress, LessonStatus::Completed)
    )
}

fn ensure_transition(from: LessonStatus, to: LessonStatus) -> Result<(), AppError> {
    if transition_allowed(from, to) {
        Ok(())
    } else {
        Err(AppError::Conflict(format!(
            "Cannot move a {} lesson to {}",
            from, to
        )))
    }
}

pub struct BookingService {
    store: Arc<dyn MarketplaceStore>,
    emitter: Arc<dyn RealtimeEmitter>,
    config: MarketplaceConfig,
}

impl BookingService {
    pub fn new(
        store: Arc<dyn MarketplaceStore>,
        emitter: Arc<dyn RealtimeEmitter>,
        config: MarketplaceConfig,
    ) -> Self {
        Self {
            store,
            emitter,
            config,
        }
    }

    pub async fn create_booking(
        &self,
        student_id: Uuid,
        request: CreateLessonRequest,
    ) -> Result<Lesson, AppError> {
        if request.teacher_id == student_id {
            return Err(AppError::validation("Cannot book a lesson with yourself"));
        }

        let now = Utc::now();
        if request.scheduled_at <= now {
            return Err(AppError::validation(
                "Lessons must be scheduled in the future",
            ));
        }
        if request.scheduled_at > now + Duration::days(self.config.max_advance_days) {
            return Err(AppError::validation(format!(
                "Lessons cannot be booked more than {} days in advance",
                self.config.max_advance_days
            )));
        }

        let profile = self
            .store
            .teacher_profile(request.teacher_id)
            .await?
            .ok_or_else(|| AppError::NotFound("Teacher profile not found".to_string()))?;

        if !availability::template_covers(
            &profile.weekly_availability,
            &profile.exceptions,
            request.scheduled_at,
            request.duration_minutes,
            profile.utc_offset(),
        ) {
            return Err(AppError::validation(
                "Teacher is not available at the requested time",
            ));
        }

        let status = if profile.auto_accept {
            LessonStatus::Confirmed
        } else {
            LessonStatus::Pending
        };

        let lesson = Lesson {
            lesson_id: Uuid::new_v4(),
            teacher_id: request.teacher_id,
            student_id,
            subject: request.subject,
            scheduled_at: request.scheduled_at,
            duration_minutes: request.duration_minutes,
            price_cents: lesson_price(&profile, request.duration_minutes),
            status,
            teacher_joined_at: None,
            student_joined_at: None,
            cancellation: None,
            reschedule: None,
            created_at: now,
            updated_at: now,
        };

        // Atomic check-and-write: the store rejects any interval overlap with
        // an occupying lesson, so one of two racing requests loses here.
        let lesson = self.store.insert_lesson_if_free(lesson).await?;

        let commission = profile
            .commission_percent
            .unwrap_or(self.config.commission_percent);
        let split = settlement::derive(lesson.price_cents, commission);
        self.store
            .upsert_payment(Payment {
                payment_id: Uuid::new_v4(),
                lesson_id: lesson.lesson_id,
                amount_cents: lesson.price_cents,
                commission_percent: commission,
                platform_fee_cents: split.platform_fee_cents,
                teacher_net_cents: split.teacher_net_cents,
                refunded_cents: 0,
                status: PaymentStatus::Held,
                created_at: now,
                updated_at: now,
            })
            .await?;

        let kind = match status {
            LessonStatus::Confirmed => NotificationKind::BookingConfirmed,
            _ => NotificationKind::BookingRequested,
        };
        self.notify(lesson.teacher_id, kind, &lesson).await;
        self.emit_status(&lesson).await;

        tracing::info!(lesson_id = %lesson.lesson_id, status = %lesson.status, "booking created");
        Ok(lesson)
    }

    pub async fn accept(&self, teacher_id: Uuid, lesson_id: Uuid) -> Result<Lesson, AppError> {
        let mut lesson = self.load(lesson_id).await?;
        if lesson.teacher_id != teacher_id {
            return Err(AppError::Authorization(
                "Only the teacher can accept a booking".to_string(),
            ));
        }
        ensure_transition(lesson.status, LessonStatus::Confirmed)?;

        lesson.status = LessonStatus::Confirmed;
        lesson.updated_at = Utc::now();
        // Guarded write: if the interval was taken since the request was
        // made, the caller gets a scheduling conflict and must re-query.
        let lesson = self.store.update_lesson_if_free(lesson).await?;

        self.notify(lesson.student_id, NotificationKind::BookingConfirmed, &lesson)
            .await;
        self.emit_status(&lesson).await;
        Ok(lesson)
    }

    pub async fn cancel(
        &self,
        actor_id: Uuid,
        lesson_id: Uuid,
        request: CancelLessonRequest,
    ) -> Result<Lesson, AppError> {
        let mut lesson = self.load(lesson_id).await?;
        if !lesson.involves(actor_id) {
            return Err(AppError::Authorization(
                "Only a participant can cancel a booking".to_string(),
            ));
        }
        ensure_transition(lesson.status, LessonStatus::Cancelled)?;

        let profile = self
            .store
            .teacher_profile(lesson.teacher_id)
            .await?
            .ok_or_else(|| AppError::NotFound("Teacher profile not found".to_string()))?;

        let now = Utc::now();
        let refund_cents = compute_refund(&lesson, profile.min_notice_hours, now);

        lesson.status = LessonStatus::Cancelled;
        lesson.cancellation = Some(CancellationRecord {
            cancelled_by: actor_id,
            reason: request.reason,
            cancelled_at: now,
            refund_cents,
        });
        lesson.reschedule = None;
        lesson.updated_at = now;
        let lesson = self.store.update_lesson(lesson).await?;

        if let Some(mut payment) = self.store.payment_by_lesson(lesson.lesson_id).await? {
            settlement::apply_refund(&mut payment, refund_cents);
            if refund_cents == 0 {
                // Late cancellation: the held amount settles to the teacher.
                payment.status = PaymentStatus::Settled;
            }
            self.store.upsert_payment(payment).await?;
        }

        let counterparty = if actor_id == lesson.teacher_id {
            lesson.student_id
        } else {
            lesson.teacher_id
        };
        self.notify(counterparty, NotificationKind::BookingCancelled, &lesson)
            .await;
        self.emit_status(&lesson).await;

        tracing::info!(lesson_id = %lesson.lesson_id, refund_cents, "booking cancelled");
        Ok(lesson)
    }

    pub async fn propose_reschedule(
        &self,
        actor_id: Uuid,
        lesson_id: Uuid,
        request: RescheduleRequest,
    ) -> Result<Lesson, AppError> {
        let mut lesson = self.load(lesson_id).await?;
        if !lesson.involves(actor_id) {
            return Err(AppError::Authorization(
                "Only a participant can reschedule a booking".to_string(),
            ));
        }
        if !matches!(
            lesson.status,
            LessonStatus::Pending | LessonStatus::Confirmed
        ) {
            return Err(AppError::Conflict(format!(
                "Cannot reschedule a {} lesson",
                lesson.status
            )));
        }
        if lesson.reschedule.is_some() {
            return Err(AppError::Conflict(
                "A reschedule proposal is already awaiting a response".to_string(),
            ));
        }
        if request.scheduled_at <= Utc::now() {
            return Err(AppError::validation(
                "Lessons must be scheduled in the future",
            ));
        }

        lesson.reschedule = Some(RescheduleProposal {
            proposed_by: actor_id,
            scheduled_at: request.scheduled_at,
            duration_minutes: request.duration_minutes.unwrap_or(lesson.duration_minutes),
            proposed_at: Utc::now(),
        });
        lesson.updated_at = Utc::now();
        let lesson = self.store.update_lesson(lesson).await?;

        let counterparty = if actor_id == lesson.teacher_id {
            lesson.student_id
        } else {
            lesson.teacher_id
        };
        self.notify(counterparty, NotificationKind::BookingRescheduled, &lesson)
            .await;
        Ok(lesson)
    }

    pub async fn respond_reschedule(
        &self,
        actor_id: Uuid,
        lesson_id: Uuid,
        approve: bool,
    ) -> Result<Lesson, AppError> {
        let mut lesson = self.load(lesson_id).await?;
        if !lesson.involves(actor_id) {
            return Err(AppError::Authorization(
                "Only a participant can respond to a reschedule".to_string(),
            ));
        }
        // The lesson may have moved on since the proposal was made.
        if !matches!(
            lesson.status,
            LessonStatus::Pending | LessonStatus::Confirmed
        ) {
            return Err(AppError::Conflict(format!(
                "Cannot reschedule a {} lesson",
                lesson.status
            )));
        }
        let proposal = lesson
            .reschedule
            .clone()
            .ok_or_else(|| AppError::Conflict("No reschedule proposal is pending".to_string()))?;
        if proposal.proposed_by == actor_id {
            return Err(AppError::Authorization(
                "The counterparty must respond to the proposal".to_string(),
            ));
        }

        if !approve {
            lesson.reschedule = None;
            lesson.updated_at = Utc::now();
            return self.store.update_lesson(lesson).await;
        }

        let profile = self
            .store
            .teacher_profile(lesson.teacher_id)
            .await?
            .ok_or_else(|| AppError::NotFound("Teacher profile not found".to_string()))?;

        // Approval re-validates against current state: a third booking may
        // have landed between proposal and approval.
        if !availability::template_covers(
            &profile.weekly_availability,
            &profile.exceptions,
            proposal.scheduled_at,
            proposal.duration_minutes,
            profile.utc_offset(),
        ) {
            return Err(scheduling_conflict());
        }

        lesson.scheduled_at = proposal.scheduled_at;
        lesson.duration_minutes = proposal.duration_minutes;
        lesson.price_cents = lesson_price(&profile, proposal.duration_minutes);
        lesson.reschedule = None;
        lesson.updated_at = Utc::now();
        let lesson = self.store.update_lesson_if_free(lesson).await?;

        if let Some(mut payment) = self.store.payment_by_lesson(lesson.lesson_id).await? {
            payment.amount_cents = lesson.price_cents;
            settlement::recompute(&mut payment);
            self.store.upsert_payment(payment).await?;
        }

        let counterparty = if actor_id == lesson.teacher_id {
            lesson.student_id
        } else {
            lesson.teacher_id
        };
        self.notify(counterparty, NotificationKind::BookingRescheduled, &lesson)
            .await;
        self.emit_status(&lesson).await;
        Ok(lesson)
    }

    pub async fn record_attendance(
        &self,
        actor_id: Uuid,
        lesson_id: Uuid,
    ) -> Result<Lesson, AppError> {
        let mut lesson = self.load(lesson_id).await?;
        if !lesson.involves(actor_id) {
            return Err(AppError::Authorization(
                "Only a participant can join a lesson".to_string(),
            ));
        }
        if !matches!(
            lesson.status,
            LessonStatus::Confirmed | LessonStatus::InProgress
        ) {
            return Err(AppError::Conflict(format!(
                "Cannot join a {} lesson",
                lesson.status
            )));
        }

        let now = Utc::now();
        if now >= lesson.end_at() {
            return Err(AppError::Conflict(
                "The scheduled time has already passed".to_string(),
            ));
        }

        if actor_id == lesson.teacher_id {
            lesson.teacher_joined_at.get_or_insert(now);
        } else {
            lesson.student_joined_at.get_or_insert(now);
        }
        // The lesson is underway once both parties have joined.
        if lesson.status == LessonStatus::Confirmed
            && lesson.teacher_joined_at.is_some()
            && lesson.student_joined_at.is_some()
            && now >= lesson.scheduled_at
        {
            lesson.status = LessonStatus::InProgress;
        }
        lesson.updated_at = now;
        let lesson = self.store.update_lesson(lesson).await?;
        self.emit_status(&lesson).await;
        Ok(lesson)
    }

    pub async fn complete(&self, actor_id: Uuid, lesson_id: Uuid) -> Result<Lesson, AppError> {
        let mut lesson = self.load(lesson_id).await?;
        if lesson.teacher_id != actor_id {
            return Err(AppError::Authorization(
                "Only the teacher can complete a lesson".to_string(),
            ));
        }
        ensure_transition(lesson.status, LessonStatus::Completed)?;
        if Utc::now() < lesson.end_at() {
            return Err(AppError::Conflict(
                "The lesson has not reached its scheduled end yet".to_string(),
            ));
        }
        if !lesson.attendance_recorded() {
            return Err(AppError::Conflict(
                "Cannot complete a lesson with no recorded attendance".to_string(),
            ));
        }

        lesson.status = LessonStatus::Completed;
        lesson.updated_at = Utc::now();
        let lesson = self.store.update_lesson(lesson).await?;

        if let Some(mut payment) = self.store.payment_by_lesson(lesson.lesson_id).await? {
            payment.status = PaymentStatus::Settled;
            settlement::recompute(&mut payment);
            self.store.upsert_payment(payment).await?;
        }

        if let Some(mut profile) = self.store.teacher_profile(lesson.teacher_id).await? {
            profile.lessons_completed += 1;
            profile.updated_at = Utc::now();
            self.store.upsert_teacher_profile(profile).await?;
        }

        self.notify(lesson.student_id, NotificationKind::LessonCompleted, &lesson)
            .await;
        self.emit_status(&lesson).await;
        Ok(lesson)
    }

    pub async fn mark_no_show(&self, actor_id: Uuid, lesson_id: Uuid) -> Result<Lesson, AppError> {
        let mut lesson = self.load(lesson_id).await?;
        if !lesson.involves(actor_id) {
            return Err(AppError::Authorization(
                "Only a participant can flag a no-show".to_string(),
            ));
        }
        ensure_transition(lesson.status, LessonStatus::NoShow)?;

        let deadline =
            lesson.scheduled_at + Duration::minutes(self.config.no_show_grace_minutes);
        if Utc::now() < deadline {
            return Err(AppError::Conflict(
                "The no-show grace period has not elapsed".to_string(),
            ));
        }
        if lesson.attendance_recorded() {
            return Err(AppError::Conflict(
                "Attendance was recorded for this lesson".to_string(),
            ));
        }

        lesson.status = LessonStatus::NoShow;
        lesson.updated_at = Utc::now();
        let lesson = self.store.update_lesson(lesson).await?;

        // Nobody was served, so the full amount flows back to the student.
        if let Some(mut payment) = self.store.payment_by_lesson(lesson.lesson_id).await? {
            let remaining = payment.amount_cents - payment.refunded_cents;
            settlement::apply_refund(&mut payment, remaining);
            self.store.upsert_payment(payment).await?;
        }

        self.emit_status(&lesson).await;
        Ok(lesson)
    }

    pub async fn get(&self, actor_id: Uuid, lesson_id: Uuid) -> Result<Lesson, AppError> {
        let lesson = self.load(lesson_id).await?;
        if !lesson.involves(actor_id) {
            return Err(AppError::Authorization(
                "Not a participant of this lesson".to_string(),
            ));
        }
        Ok(lesson)
    }

    pub async fn list_for(&self, actor_id: Uuid) -> Result<Vec<Lesson>, AppError> {
        self.store.lessons_for_user(actor_id).await
    }

    pub async fn payment_for(
        &self,
        actor_id: Uuid,
        lesson_id: Uuid,
    ) -> Result<Payment, AppError> {
        let lesson = self.get(actor_id, lesson_id).await?;
        self.store
            .payment_by_lesson(lesson.lesson_id)
            .await?
            .ok_or_else(|| AppError::NotFound("Payment not found".to_string()))
    }

    /// Open slots for a teacher over a date range, per the weekly template
    /// minus occupying lessons and exception blocks.
    pub async fn available_slots(
        &self,
        teacher_id: Uuid,
        query: SlotQuery,
    ) -> Result<Vec<Slot>, AppError> {
        if !(15..=240).contains(&query.duration) {
            return Err(AppError::validation(
                "Slot duration must be between 15 and 240 minutes",
            ));
        }
        if query.from > query.to {
            return Err(AppError::validation("Date range start is after its end"));
        }
        if (query.to - query.from).num_days() > self.config.max_advance_days {
            return Err(AppError::validation(format!(
                "Date range cannot exceed {} days",
                self.config.max_advance_days
            )));
        }

        let profile = self
            .store
            .teacher_profile(teacher_id)
            .await?
            .ok_or_else(|| AppError::NotFound("Teacher profile not found".to_string()))?;

        let offset = profile.utc_offset();
        let range_start = availability::local_to_utc(
            query.from.and_hms_opt(0, 0, 0).unwrap_or_default(),
            offset,
        );
        let range_end = availability::local_to_utc(
            query
                .to
                .succ_opt()
                .unwrap_or(query.to)
                .and_hms_opt(0, 0, 0)
                .unwrap_or_default(),
            offset,
        );

        let booked: Vec<(DateTime<Utc>, DateTime<Utc>)> = self
            .store
            .teacher_lessons_between(teacher_id, range_start, range_end)
            .await?
            .iter()
            .map(|l| (l.scheduled_at, l.end_at()))
            .collect();

        Ok(availability::generate_slots(
            &profile.weekly_availability,
            &profile.exceptions,
            &booked,
            query.from,
            query.to,
            query.duration,
            offset,
        ))
    }

    async fn load(&self, lesson_id: Uuid) -> Result<Lesson, AppError> {
        self.store
            .lesson(lesson_id)
            .await?
            .ok_or_else(|| AppError::NotFound("Lesson not found".to_string()))
    }

    /// Best effort: the lesson and payment writes are already committed by
    /// the time a notification is recorded, so a failure here is logged
    /// rather than surfaced to the caller.
    async fn notify(&self, recipient_id: Uuid, kind: NotificationKind, lesson: &Lesson) {
        let result = self
            .store
            .insert_notification(Notification {
                notification_id: Uuid::new_v4(),
                recipient_id,
                kind,
                payload: serde_json::json!({
                    "lesson_id": lesson.lesson_id,
                    "status": lesson.status,
                    "scheduled_at": lesson.scheduled_at,
                }),
                read: false,
                created_at: Utc::now(),
            })
            .await;
        if let Err(error) = result {
            tracing::warn!(lesson_id = %lesson.lesson_id, %error, "failed to record notification");
        }
    }

    async fn emit_status(&self, lesson: &Lesson) {
        self.emitter
            .emit(RealtimeEvent::BookingUpdated {
                lesson_id: lesson.lesson_id,
                teacher_id: lesson.teacher_id,
                student_id: lesson.student_id,
                status: lesson.status,
            })
            .await;
    }
}

fn lesson_price(profile: &TeacherProfile, duration_minutes: i64) -> i64 {
    (Decimal::from(profile.hourly_rate_cents) * Decimal::from(duration_minutes)
        / Decimal::from(60))
    .round_dp_with_strategy(0, RoundingStrategy::MidpointAwayFromZero)
    .to_i64()
    .unwrap_or(0)
}

/// Single-threshold refund policy: full refund with enough notice before
/// the start, nothing otherwise.
pub fn compute_refund(lesson: &Lesson, min_notice_hours: i64, now: DateTime<Utc>) -> i64 {
    if lesson.scheduled_at - now >= Duration::hours(min_notice_hours) {
        lesson.price_cents
    } else {
        0
    }
}
