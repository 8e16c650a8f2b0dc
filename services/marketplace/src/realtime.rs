use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use tutorhub_common::{LessonStatus, RedisService};

/// Events pushed to connected clients over the pub/sub channel.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum RealtimeEvent {
    NewMessage {
        conversation_id: Uuid,
        message_id: Uuid,
        sender_id: Uuid,
        recipient_id: Uuid,
    },
    MessagesRead {
        conversation_id: Uuid,
        reader_id: Uuid,
    },
    BookingUpdated {
        lesson_id: Uuid,
        teacher_id: Uuid,
        student_id: Uuid,
        status: LessonStatus,
    },
}

/// At-most-once delivery: emitting never fails the request that caused the
/// event, a broker outage is logged and the write that already happened
/// stands.
#[async_trait]
pub trait RealtimeEmitter: Send + Sync {
    async fn emit(&self, event: RealtimeEvent);
}

pub struct RedisEmitter {
    redis: RedisService,
    channel: String,
}

impl RedisEmitter {
    pub fn new(redis: RedisService, channel: impl Into<String>) -> Self {
        Self {
            redis,
            channel: channel.into(),
        }
    }
}

#[async_trait]
impl RealtimeEmitter for RedisEmitter {
    async fn emit(&self, event: RealtimeEvent) {
        if let Err(e) = self.redis.publish_json(&self.channel, &event).await {
            tracing::warn!(error = %e, channel = %self.channel, "failed to publish realtime event");
        }
    }
}

/// Emitter for deployments running without Redis.
pub struct NullEmitter;

#[async_trait]
impl RealtimeEmitter for NullEmitter {
    async fn emit(&self, _event: RealtimeEvent) {}
}

/// Captures events instead of publishing them, for assertions in tests.
#[derive(Default)]
pub struct RecordingEmitter {
    events: tokio::sync::Mutex<Vec<RealtimeEvent>>,
}

impl RecordingEmitter {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn events(&self) -> Vec<RealtimeEvent> {
        self.events.lock().await.clone()
    }
}

#[async_trait]
impl RealtimeEmitter for RecordingEmitter {
    async fn emit(&self, event: RealtimeEvent) {
        self.events.lock().await.push(event);
    }
}
