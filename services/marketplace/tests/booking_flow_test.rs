use std::sync::Arc;

use chrono::{DateTime, Duration, NaiveDate, NaiveTime, Utc};
use uuid::Uuid;

use tutorhub_common::{AppError, LessonStatus, PaymentStatus};
use tutorhub_marketplace::booking::BookingService;
use tutorhub_marketplace::config::MarketplaceConfig;
use tutorhub_marketplace::models::{
    CancelLessonRequest, Conversation, CreateLessonRequest, CreateReviewRequest, Lesson, Message,
    Notification, Payment, RescheduleRequest, Review, ReviewResponseRequest, SlotQuery,
    StudentProfile, TeacherProfile, TeacherSearchQuery, TimeRange, User, WeeklyAvailability,
};
use tutorhub_marketplace::realtime::{RealtimeEvent, RecordingEmitter};
use tutorhub_marketplace::repository::{InMemoryStore, MarketplaceStore};
use tutorhub_marketplace::reviews::ReviewService;
use tutorhub_marketplace::settlement;

struct Harness {
    store: Arc<InMemoryStore>,
    emitter: Arc<RecordingEmitter>,
    booking: BookingService,
    reviews: ReviewService,
}

fn harness() -> Harness {
    let store: Arc<InMemoryStore> = Arc::new(InMemoryStore::new());
    let emitter = Arc::new(RecordingEmitter::new());
    let booking = BookingService::new(
        store.clone(),
        emitter.clone(),
        MarketplaceConfig::default(),
    );
    let reviews = ReviewService::new(store.clone());
    Harness {
        store,
        emitter,
        booking,
        reviews,
    }
}

fn range(start: (u32, u32), end: (u32, u32)) -> TimeRange {
    TimeRange {
        start: NaiveTime::from_hms_opt(start.0, start.1, 0).unwrap(),
        end: NaiveTime::from_hms_opt(end.0, end.1, 0).unwrap(),
    }
}

fn all_week(ranges: Vec<TimeRange>) -> WeeklyAvailability {
    WeeklyAvailability {
        days: std::array::from_fn(|_| ranges.clone()),
    }
}

async fn seed_teacher(
    store: &InMemoryStore,
    auto_accept: bool,
    weekly: WeeklyAvailability,
) -> Uuid {
    let user_id = Uuid::new_v4();
    let now = Utc::now();
    store
        .upsert_teacher_profile(TeacherProfile {
            user_id,
            subjects: vec!["math".to_string()],
            hourly_rate_cents: 6_000,
            currency: "USD".to_string(),
            bio: None,
            timezone: "UTC".to_string(),
            tz_offset_minutes: 0,
            weekly_availability: weekly,
            exceptions: Vec::new(),
            auto_accept,
            min_notice_hours: 24,
            commission_percent: None,
            verified: true,
            lessons_completed: 0,
            rating_avg: 0.0,
            rating_count: 0,
            created_at: now,
            updated_at: now,
        })
        .await
        .unwrap();
    user_id
}

/// Bookings are placed through the service; past-dated lifecycle states are
/// seeded straight into the store.
async fn seed_lesson(
    store: &InMemoryStore,
    teacher_id: Uuid,
    student_id: Uuid,
    scheduled_at: DateTime<Utc>,
    status: LessonStatus,
    teacher_joined: bool,
) -> Lesson {
    let now = Utc::now();
    let lesson = Lesson {
        lesson_id: Uuid::new_v4(),
        teacher_id,
        student_id,
        subject: "math".to_string(),
        scheduled_at,
        duration_minutes: 60,
        price_cents: 6_000,
        status,
        teacher_joined_at: teacher_joined.then(|| scheduled_at),
        student_joined_at: None,
        cancellation: None,
        reschedule: None,
        created_at: now,
        updated_at: now,
    };
    let lesson = store.insert_lesson_if_free(lesson).await.unwrap();

    let split = settlement::derive(lesson.price_cents, rust_decimal::Decimal::new(15, 0));
    store
        .upsert_payment(Payment {
            payment_id: Uuid::new_v4(),
            lesson_id: lesson.lesson_id,
            amount_cents: lesson.price_cents,
            commission_percent: rust_decimal::Decimal::new(15, 0),
            platform_fee_cents: split.platform_fee_cents,
            teacher_net_cents: split.teacher_net_cents,
            refunded_cents: 0,
            status: PaymentStatus::Held,
            created_at: now,
            updated_at: now,
        })
        .await
        .unwrap();
    lesson
}

fn booking_request(teacher_id: Uuid, scheduled_at: DateTime<Utc>) -> CreateLessonRequest {
    CreateLessonRequest {
        teacher_id,
        subject: "math".to_string(),
        scheduled_at,
        duration_minutes: 60,
    }
}

fn next_week_at(hour: u32) -> DateTime<Utc> {
    (Utc::now() + Duration::days(7))
        .date_naive()
        .and_hms_opt(hour, 0, 0)
        .unwrap()
        .and_utc()
}

#[tokio::test]
async fn two_hour_template_yields_two_hourly_slots() {
    let h = harness();
    // Monday only, 09:00-11:00.
    let mut weekly = WeeklyAvailability::default();
    weekly.days[0] = vec![range((9, 0), (11, 0))];
    let teacher = seed_teacher(&h.store, true, weekly).await;

    let monday = NaiveDate::from_ymd_opt(2026, 9, 7).unwrap();
    let slots = h
        .booking
        .available_slots(
            teacher,
            SlotQuery {
                from: monday,
                to: monday,
                duration: 60,
            },
        )
        .await
        .unwrap();

    assert_eq!(slots.len(), 2);
    assert_eq!(slots[0].start.time(), NaiveTime::from_hms_opt(9, 0, 0).unwrap());
    assert_eq!(slots[1].start.time(), NaiveTime::from_hms_opt(10, 0, 0).unwrap());
}

#[tokio::test]
async fn concurrent_bookings_have_exactly_one_winner() {
    let h = harness();
    let teacher = seed_teacher(&h.store, true, all_week(vec![range((8, 0), (18, 0))])).await;
    let scheduled_at = next_week_at(10);

    let (a, b) = tokio::join!(
        h.booking
            .create_booking(Uuid::new_v4(), booking_request(teacher, scheduled_at)),
        h.booking
            .create_booking(Uuid::new_v4(), booking_request(teacher, scheduled_at)),
    );

    let outcomes = [a, b];
    assert_eq!(outcomes.iter().filter(|r| r.is_ok()).count(), 1);
    assert!(outcomes
        .iter()
        .any(|r| matches!(r, Err(AppError::Conflict(_)))));
}

#[tokio::test]
async fn manual_approval_flow_moves_pending_to_confirmed() {
    let h = harness();
    let teacher = seed_teacher(&h.store, false, all_week(vec![range((8, 0), (18, 0))])).await;
    let student = Uuid::new_v4();

    let lesson = h
        .booking
        .create_booking(student, booking_request(teacher, next_week_at(9)))
        .await
        .unwrap();
    assert_eq!(lesson.status, LessonStatus::Pending);

    // Only the teacher may accept.
    let err = h.booking.accept(student, lesson.lesson_id).await.unwrap_err();
    assert!(matches!(err, AppError::Authorization(_)));

    let lesson = h.booking.accept(teacher, lesson.lesson_id).await.unwrap();
    assert_eq!(lesson.status, LessonStatus::Confirmed);

    // Accepting twice is an invalid transition, not a no-op.
    let err = h.booking.accept(teacher, lesson.lesson_id).await.unwrap_err();
    assert!(matches!(err, AppError::Conflict(_)));
}

#[tokio::test]
async fn late_cancellation_settles_to_the_teacher() {
    let h = harness();
    let teacher = seed_teacher(&h.store, true, all_week(vec![range((8, 0), (18, 0))])).await;
    let student = Uuid::new_v4();

    // Two hours of notice against the profile's 24 hour minimum.
    let lesson = seed_lesson(
        &h.store,
        teacher,
        student,
        Utc::now() + Duration::hours(2),
        LessonStatus::Confirmed,
        false,
    )
    .await;

    let cancelled = h
        .booking
        .cancel(
            student,
            lesson.lesson_id,
            CancelLessonRequest { reason: None },
        )
        .await
        .unwrap();
    assert_eq!(cancelled.status, LessonStatus::Cancelled);
    assert_eq!(cancelled.cancellation.unwrap().refund_cents, 0);

    let payment = h
        .store
        .payment_by_lesson(lesson.lesson_id)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(payment.status, PaymentStatus::Settled);
    assert_eq!(payment.refunded_cents, 0);
    assert_eq!(payment.teacher_net_cents, 5_100);
}

#[tokio::test]
async fn reschedule_needs_counterparty_approval_and_revalidates() {
    let h = harness();
    let teacher = seed_teacher(&h.store, true, all_week(vec![range((8, 0), (18, 0))])).await;
    let student = Uuid::new_v4();

    let lesson = h
        .booking
        .create_booking(student, booking_request(teacher, next_week_at(9)))
        .await
        .unwrap();

    let proposal = RescheduleRequest {
        scheduled_at: next_week_at(14),
        duration_minutes: Some(30),
    };
    let lesson = h
        .booking
        .propose_reschedule(student, lesson.lesson_id, proposal.clone())
        .await
        .unwrap();
    assert!(lesson.reschedule.is_some());

    // A second proposal while one is pending is rejected.
    let err = h
        .booking
        .propose_reschedule(teacher, lesson.lesson_id, proposal)
        .await
        .unwrap_err();
    assert!(matches!(err, AppError::Conflict(_)));

    // The proposer cannot approve their own proposal.
    let err = h
        .booking
        .respond_reschedule(student, lesson.lesson_id, true)
        .await
        .unwrap_err();
    assert!(matches!(err, AppError::Authorization(_)));

    let lesson = h
        .booking
        .respond_reschedule(teacher, lesson.lesson_id, true)
        .await
        .unwrap();
    assert_eq!(lesson.scheduled_at, next_week_at(14));
    assert_eq!(lesson.duration_minutes, 30);
    assert_eq!(lesson.price_cents, 3_000);
    assert!(lesson.reschedule.is_none());

    // The payment follows the new price.
    let payment = h
        .store
        .payment_by_lesson(lesson.lesson_id)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(payment.amount_cents, 3_000);
    assert_eq!(payment.platform_fee_cents, 450);
}

#[tokio::test]
async fn reschedule_approval_loses_to_an_intervening_booking() {
    let h = harness();
    let teacher = seed_teacher(&h.store, true, all_week(vec![range((8, 0), (18, 0))])).await;
    let student = Uuid::new_v4();

    let lesson = h
        .booking
        .create_booking(student, booking_request(teacher, next_week_at(9)))
        .await
        .unwrap();
    h.booking
        .propose_reschedule(
            student,
            lesson.lesson_id,
            RescheduleRequest {
                scheduled_at: next_week_at(15),
                duration_minutes: None,
            },
        )
        .await
        .unwrap();

    // Someone else takes 15:00 before the teacher approves.
    h.booking
        .create_booking(Uuid::new_v4(), booking_request(teacher, next_week_at(15)))
        .await
        .unwrap();

    let err = h
        .booking
        .respond_reschedule(teacher, lesson.lesson_id, true)
        .await
        .unwrap_err();
    assert!(matches!(err, AppError::Conflict(_)));
}

#[tokio::test]
async fn reschedule_approval_is_rejected_once_the_lesson_is_terminal() {
    let h = harness();
    let teacher = seed_teacher(&h.store, true, all_week(vec![range((8, 0), (18, 0))])).await;
    let student = Uuid::new_v4();

    // A lesson already underway, with ten minutes left on the clock.
    let lesson = seed_lesson(
        &h.store,
        teacher,
        student,
        Utc::now() - Duration::minutes(50),
        LessonStatus::Confirmed,
        false,
    )
    .await;
    let lesson = h
        .booking
        .propose_reschedule(
            student,
            lesson.lesson_id,
            RescheduleRequest {
                scheduled_at: next_week_at(10),
                duration_minutes: Some(30),
            },
        )
        .await
        .unwrap();

    h.booking
        .record_attendance(teacher, lesson.lesson_id)
        .await
        .unwrap();
    h.booking
        .record_attendance(student, lesson.lesson_id)
        .await
        .unwrap();

    // Push the lesson past its end so the teacher can complete it. The
    // proposal raised while it was confirmed is still attached.
    let mut running = h.store.lesson(lesson.lesson_id).await.unwrap().unwrap();
    running.scheduled_at = Utc::now() - Duration::hours(2);
    h.store.update_lesson(running).await.unwrap();
    let completed = h.booking.complete(teacher, lesson.lesson_id).await.unwrap();
    assert_eq!(completed.status, LessonStatus::Completed);
    assert!(completed.reschedule.is_some());

    // Approving the leftover proposal must not rewrite a completed lesson.
    let err = h
        .booking
        .respond_reschedule(teacher, lesson.lesson_id, true)
        .await
        .unwrap_err();
    assert!(matches!(err, AppError::Conflict(_)));

    let lesson = h.store.lesson(lesson.lesson_id).await.unwrap().unwrap();
    assert_eq!(lesson.status, LessonStatus::Completed);
    assert_eq!(lesson.price_cents, 6_000);
}

#[tokio::test]
async fn completion_settles_payment_and_opens_review_gate() {
    let h = harness();
    let teacher = seed_teacher(&h.store, true, all_week(vec![range((8, 0), (18, 0))])).await;
    let student = Uuid::new_v4();

    let lesson = seed_lesson(
        &h.store,
        teacher,
        student,
        Utc::now() - Duration::hours(2),
        LessonStatus::InProgress,
        true,
    )
    .await;

    let review_request = CreateReviewRequest {
        rating_overall: 4,
        rating_quality: 5,
        rating_communication: 4,
        rating_punctuality: 3,
        rating_preparation: 5,
        comment: Some("Clear explanations".to_string()),
    };

    // Not reviewable until completed.
    let err = h
        .reviews
        .create(student, lesson.lesson_id, review_request.clone())
        .await
        .unwrap_err();
    assert!(matches!(err, AppError::Conflict(_)));

    // Only the teacher completes.
    let err = h
        .booking
        .complete(student, lesson.lesson_id)
        .await
        .unwrap_err();
    assert!(matches!(err, AppError::Authorization(_)));

    let completed = h.booking.complete(teacher, lesson.lesson_id).await.unwrap();
    assert_eq!(completed.status, LessonStatus::Completed);

    let payment = h
        .store
        .payment_by_lesson(lesson.lesson_id)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(payment.status, PaymentStatus::Settled);

    let profile = h.store.teacher_profile(teacher).await.unwrap().unwrap();
    assert_eq!(profile.lessons_completed, 1);

    // Review from a stranger is rejected, from the student accepted once.
    let err = h
        .reviews
        .create(Uuid::new_v4(), lesson.lesson_id, review_request.clone())
        .await
        .unwrap_err();
    assert!(matches!(err, AppError::Authorization(_)));

    let review = h
        .reviews
        .create(student, lesson.lesson_id, review_request.clone())
        .await
        .unwrap();

    let err = h
        .reviews
        .create(student, lesson.lesson_id, review_request)
        .await
        .unwrap_err();
    assert!(matches!(err, AppError::Conflict(_)));

    let profile = h.store.teacher_profile(teacher).await.unwrap().unwrap();
    assert_eq!(profile.rating_count, 1);
    assert!((profile.rating_avg - 4.0).abs() < f64::EPSILON);

    // One teacher response, by the teacher only.
    let err = h
        .reviews
        .respond(
            student,
            review.review_id,
            ReviewResponseRequest {
                response: "Thanks".to_string(),
            },
        )
        .await
        .unwrap_err();
    assert!(matches!(err, AppError::Authorization(_)));

    let review = h
        .reviews
        .respond(
            teacher,
            review.review_id,
            ReviewResponseRequest {
                response: "Thanks for the feedback".to_string(),
            },
        )
        .await
        .unwrap();
    assert!(review.teacher_response.is_some());

    let err = h
        .reviews
        .respond(
            teacher,
            review.review_id,
            ReviewResponseRequest {
                response: "Again".to_string(),
            },
        )
        .await
        .unwrap_err();
    assert!(matches!(err, AppError::Conflict(_)));
}

#[tokio::test]
async fn no_show_refunds_the_student_in_full() {
    let h = harness();
    let teacher = seed_teacher(&h.store, true, all_week(vec![range((8, 0), (18, 0))])).await;
    let student = Uuid::new_v4();

    let lesson = seed_lesson(
        &h.store,
        teacher,
        student,
        Utc::now() - Duration::hours(3),
        LessonStatus::Confirmed,
        false,
    )
    .await;

    let flagged = h
        .booking
        .mark_no_show(student, lesson.lesson_id)
        .await
        .unwrap();
    assert_eq!(flagged.status, LessonStatus::NoShow);

    let payment = h
        .store
        .payment_by_lesson(lesson.lesson_id)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(payment.status, PaymentStatus::Refunded);
    assert_eq!(payment.refunded_cents, 6_000);
    assert_eq!(payment.teacher_net_cents, 0);
}

#[tokio::test]
async fn no_show_is_blocked_by_recorded_attendance() {
    let h = harness();
    let teacher = seed_teacher(&h.store, true, all_week(vec![range((8, 0), (18, 0))])).await;
    let student = Uuid::new_v4();

    let lesson = seed_lesson(
        &h.store,
        teacher,
        student,
        Utc::now() - Duration::hours(3),
        LessonStatus::Confirmed,
        true,
    )
    .await;

    let err = h
        .booking
        .mark_no_show(student, lesson.lesson_id)
        .await
        .unwrap_err();
    assert!(matches!(err, AppError::Conflict(_)));
}

#[tokio::test]
async fn no_show_waits_for_the_grace_period() {
    let h = harness();
    let teacher = seed_teacher(&h.store, true, all_week(vec![range((8, 0), (18, 0))])).await;
    let student = Uuid::new_v4();

    let lesson = seed_lesson(
        &h.store,
        teacher,
        student,
        Utc::now() - Duration::minutes(5),
        LessonStatus::Confirmed,
        false,
    )
    .await;

    // Five minutes in, fifteen required.
    let err = h
        .booking
        .mark_no_show(student, lesson.lesson_id)
        .await
        .unwrap_err();
    assert!(matches!(err, AppError::Conflict(_)));
}

#[tokio::test]
async fn attendance_moves_a_confirmed_lesson_in_progress() {
    let h = harness();
    let teacher = seed_teacher(&h.store, true, all_week(vec![range((8, 0), (18, 0))])).await;
    let student = Uuid::new_v4();

    let lesson = seed_lesson(
        &h.store,
        teacher,
        student,
        Utc::now() - Duration::minutes(10),
        LessonStatus::Confirmed,
        false,
    )
    .await;

    // One side joining is not enough to start the lesson.
    let lesson = h
        .booking
        .record_attendance(teacher, lesson.lesson_id)
        .await
        .unwrap();
    assert_eq!(lesson.status, LessonStatus::Confirmed);
    assert!(lesson.teacher_joined_at.is_some());

    let lesson = h
        .booking
        .record_attendance(student, lesson.lesson_id)
        .await
        .unwrap();
    assert_eq!(lesson.status, LessonStatus::InProgress);
    assert!(lesson.student_joined_at.is_some());
}

#[tokio::test]
async fn booking_lifecycle_emits_status_events() {
    let h = harness();
    let teacher = seed_teacher(&h.store, true, all_week(vec![range((8, 0), (18, 0))])).await;
    let student = Uuid::new_v4();

    let lesson = h
        .booking
        .create_booking(student, booking_request(teacher, next_week_at(11)))
        .await
        .unwrap();
    h.booking
        .cancel(
            teacher,
            lesson.lesson_id,
            CancelLessonRequest { reason: None },
        )
        .await
        .unwrap();

    let events = h.emitter.events().await;
    assert_eq!(events.len(), 2);
    assert!(matches!(
        &events[0],
        RealtimeEvent::BookingUpdated { status: LessonStatus::Confirmed, .. }
    ));
    assert!(matches!(
        &events[1],
        RealtimeEvent::BookingUpdated { status: LessonStatus::Cancelled, .. }
    ));
}

/// Delegates to the in-memory store but refuses every notification write.
struct NotificationOutage {
    inner: InMemoryStore,
}

#[async_trait::async_trait]
impl MarketplaceStore for NotificationOutage {
    async fn create_user(&self, user: User) -> Result<User, AppError> {
        self.inner.create_user(user).await
    }

    async fn user_by_email(&self, email: &str) -> Result<Option<User>, AppError> {
        self.inner.user_by_email(email).await
    }

    async fn user_by_id(&self, user_id: Uuid) -> Result<Option<User>, AppError> {
        self.inner.user_by_id(user_id).await
    }

    async fn create_session(&self, token: Uuid, user_id: Uuid) -> Result<(), AppError> {
        self.inner.create_session(token, user_id).await
    }

    async fn session_user(&self, token: Uuid) -> Result<Option<Uuid>, AppError> {
        self.inner.session_user(token).await
    }

    async fn delete_session(&self, token: Uuid) -> Result<(), AppError> {
        self.inner.delete_session(token).await
    }

    async fn upsert_teacher_profile(
        &self,
        profile: TeacherProfile,
    ) -> Result<TeacherProfile, AppError> {
        self.inner.upsert_teacher_profile(profile).await
    }

    async fn teacher_profile(&self, user_id: Uuid) -> Result<Option<TeacherProfile>, AppError> {
        self.inner.teacher_profile(user_id).await
    }

    async fn search_teachers(
        &self,
        query: &TeacherSearchQuery,
    ) -> Result<Vec<TeacherProfile>, AppError> {
        self.inner.search_teachers(query).await
    }

    async fn upsert_student_profile(
        &self,
        profile: StudentProfile,
    ) -> Result<StudentProfile, AppError> {
        self.inner.upsert_student_profile(profile).await
    }

    async fn student_profile(&self, user_id: Uuid) -> Result<Option<StudentProfile>, AppError> {
        self.inner.student_profile(user_id).await
    }

    async fn insert_lesson_if_free(&self, lesson: Lesson) -> Result<Lesson, AppError> {
        self.inner.insert_lesson_if_free(lesson).await
    }

    async fn update_lesson_if_free(&self, lesson: Lesson) -> Result<Lesson, AppError> {
        self.inner.update_lesson_if_free(lesson).await
    }

    async fn update_lesson(&self, lesson: Lesson) -> Result<Lesson, AppError> {
        self.inner.update_lesson(lesson).await
    }

    async fn lesson(&self, lesson_id: Uuid) -> Result<Option<Lesson>, AppError> {
        self.inner.lesson(lesson_id).await
    }

    async fn teacher_lessons_between(
        &self,
        teacher_id: Uuid,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
    ) -> Result<Vec<Lesson>, AppError> {
        self.inner.teacher_lessons_between(teacher_id, from, to).await
    }

    async fn lessons_for_user(&self, user_id: Uuid) -> Result<Vec<Lesson>, AppError> {
        self.inner.lessons_for_user(user_id).await
    }

    async fn upsert_payment(&self, payment: Payment) -> Result<Payment, AppError> {
        self.inner.upsert_payment(payment).await
    }

    async fn payment_by_lesson(&self, lesson_id: Uuid) -> Result<Option<Payment>, AppError> {
        self.inner.payment_by_lesson(lesson_id).await
    }

    async fn insert_review(&self, review: Review) -> Result<Review, AppError> {
        self.inner.insert_review(review).await
    }

    async fn review(&self, review_id: Uuid) -> Result<Option<Review>, AppError> {
        self.inner.review(review_id).await
    }

    async fn update_review(&self, review: Review) -> Result<Review, AppError> {
        self.inner.update_review(review).await
    }

    async fn reviews_for_teacher(&self, teacher_id: Uuid) -> Result<Vec<Review>, AppError> {
        self.inner.reviews_for_teacher(teacher_id).await
    }

    async fn find_or_create_conversation(
        &self,
        conversation: Conversation,
    ) -> Result<Conversation, AppError> {
        self.inner.find_or_create_conversation(conversation).await
    }

    async fn conversation(&self, conversation_id: Uuid) -> Result<Option<Conversation>, AppError> {
        self.inner.conversation(conversation_id).await
    }

    async fn conversations_for_user(&self, user_id: Uuid) -> Result<Vec<Conversation>, AppError> {
        self.inner.conversations_for_user(user_id).await
    }

    async fn update_conversation(
        &self,
        conversation: Conversation,
    ) -> Result<Conversation, AppError> {
        self.inner.update_conversation(conversation).await
    }

    async fn bump_unread(
        &self,
        conversation_id: Uuid,
        recipient_id: Uuid,
        at: DateTime<Utc>,
    ) -> Result<Conversation, AppError> {
        self.inner.bump_unread(conversation_id, recipient_id, at).await
    }

    async fn insert_message(&self, message: Message) -> Result<Message, AppError> {
        self.inner.insert_message(message).await
    }

    async fn message(&self, message_id: Uuid) -> Result<Option<Message>, AppError> {
        self.inner.message(message_id).await
    }

    async fn update_message(&self, message: Message) -> Result<Message, AppError> {
        self.inner.update_message(message).await
    }

    async fn messages(
        &self,
        conversation_id: Uuid,
        limit: i64,
        before: Option<Uuid>,
    ) -> Result<Vec<Message>, AppError> {
        self.inner.messages(conversation_id, limit, before).await
    }

    async fn insert_notification(&self, _notification: Notification) -> Result<(), AppError> {
        Err(AppError::Internal("notifications are down".to_string()))
    }

    async fn notifications(
        &self,
        recipient_id: Uuid,
        unread_only: bool,
    ) -> Result<Vec<Notification>, AppError> {
        self.inner.notifications(recipient_id, unread_only).await
    }

    async fn mark_notification_read(
        &self,
        notification_id: Uuid,
        recipient_id: Uuid,
    ) -> Result<(), AppError> {
        self.inner
            .mark_notification_read(notification_id, recipient_id)
            .await
    }
}

#[tokio::test]
async fn booking_survives_a_notification_outage() {
    let store = Arc::new(NotificationOutage {
        inner: InMemoryStore::new(),
    });
    let emitter = Arc::new(RecordingEmitter::new());
    let booking = BookingService::new(
        store.clone(),
        emitter,
        MarketplaceConfig::default(),
    );

    let teacher = seed_teacher(&store.inner, true, all_week(vec![range((8, 0), (18, 0))])).await;
    let lesson = booking
        .create_booking(Uuid::new_v4(), booking_request(teacher, next_week_at(10)))
        .await
        .unwrap();

    // The lesson and its payment committed even though no notification landed.
    assert_eq!(lesson.status, LessonStatus::Confirmed);
    assert!(store
        .inner
        .payment_by_lesson(lesson.lesson_id)
        .await
        .unwrap()
        .is_some());
    assert!(store
        .inner
        .notifications(teacher, false)
        .await
        .unwrap()
        .is_empty());
}
