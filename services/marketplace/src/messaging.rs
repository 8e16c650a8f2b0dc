use chrono::Utc;
use std::sync::Arc;
use uuid::Uuid;

use tutorhub_common::AppError;

use crate::models::{
    Conversation, ConversationSummary, CreateConversationRequest, EditMessageRequest, Message,
    MessageHistoryQuery, Notification, NotificationKind, SendMessageRequest,
};
use crate::realtime::{RealtimeEmitter, RealtimeEvent};
use crate::repository::MarketplaceStore;

const DEFAULT_PAGE: i64 = 50;
const MAX_PAGE: i64 = 200;

pub struct MessagingService {
    store: Arc<dyn MarketplaceStore>,
    emitter: Arc<dyn RealtimeEmitter>,
}

impl MessagingService {
    pub fn new(store: Arc<dyn MarketplaceStore>, emitter: Arc<dyn RealtimeEmitter>) -> Self {
        Self { store, emitter }
    }

    /// Returns the existing conversation between the pair if one exists,
    /// otherwise creates it.
    pub async fn open_conversation(
        &self,
        actor_id: Uuid,
        request: CreateConversationRequest,
    ) -> Result<Conversation, AppError> {
        if request.participant_id == actor_id {
            return Err(AppError::validation(
                "Cannot open a conversation with yourself",
            ));
        }
        if self
            .store
            .user_by_id(request.participant_id)
            .await?
            .is_none()
        {
            return Err(AppError::NotFound("User not found".to_string()));
        }

        self.store
            .find_or_create_conversation(Conversation {
                conversation_id: Uuid::new_v4(),
                participant_a: actor_id,
                participant_b: request.participant_id,
                lesson_id: request.lesson_id,
                unread_a: 0,
                unread_b: 0,
                last_message_at: None,
                created_at: Utc::now(),
            })
            .await
    }

    pub async fn send(
        &self,
        sender_id: Uuid,
        conversation_id: Uuid,
        request: SendMessageRequest,
    ) -> Result<Message, AppError> {
        let conversation = self.load_for(sender_id, conversation_id).await?;
        let recipient_id = conversation.other_participant(sender_id);
        let now = Utc::now();

        let message = self
            .store
            .insert_message(Message {
                message_id: Uuid::new_v4(),
                conversation_id,
                sender_id,
                content: request.content,
                edited_at: None,
                deleted: false,
                created_at: now,
            })
            .await?;

        self.store
            .bump_unread(conversation_id, recipient_id, now)
            .await?;

        // The message is committed at this point, so a missing notification
        // row is logged rather than surfaced.
        let notified = self
            .store
            .insert_notification(Notification {
                notification_id: Uuid::new_v4(),
                recipient_id,
                kind: NotificationKind::NewMessage,
                payload: serde_json::json!({
                    "conversation_id": conversation_id,
                    "message_id": message.message_id,
                }),
                read: false,
                created_at: now,
            })
            .await;
        if let Err(error) = notified {
            tracing::warn!(%conversation_id, %error, "failed to record notification");
        }

        self.emitter
            .emit(RealtimeEvent::NewMessage {
                conversation_id,
                message_id: message.message_id,
                sender_id,
                recipient_id,
            })
            .await;

        Ok(message)
    }

    pub async fn history(
        &self,
        actor_id: Uuid,
        conversation_id: Uuid,
        query: MessageHistoryQuery,
    ) -> Result<Vec<Message>, AppError> {
        self.load_for(actor_id, conversation_id).await?;
        let limit = i64::from(query.limit.unwrap_or(DEFAULT_PAGE as u32)).min(MAX_PAGE);
        self.store
            .messages(conversation_id, limit, query.before)
            .await
    }

    pub async fn mark_read(
        &self,
        actor_id: Uuid,
        conversation_id: Uuid,
    ) -> Result<Conversation, AppError> {
        let mut conversation = self.load_for(actor_id, conversation_id).await?;
        if conversation.participant_a == actor_id {
            conversation.unread_a = 0;
        } else {
            conversation.unread_b = 0;
        }
        let conversation = self.store.update_conversation(conversation).await?;

        self.emitter
            .emit(RealtimeEvent::MessagesRead {
                conversation_id,
                reader_id: actor_id,
            })
            .await;

        Ok(conversation)
    }

    pub async fn edit(
        &self,
        actor_id: Uuid,
        message_id: Uuid,
        request: EditMessageRequest,
    ) -> Result<Message, AppError> {
        let mut message = self.load_message(message_id).await?;
        if message.sender_id != actor_id {
            return Err(AppError::Authorization(
                "Only the sender can edit a message".to_string(),
            ));
        }
        if message.deleted {
            return Err(AppError::Conflict(
                "Deleted messages cannot be edited".to_string(),
            ));
        }

        message.content = request.content;
        message.edited_at = Some(Utc::now());
        self.store.update_message(message).await
    }

    /// Soft delete: the row stays for conversation ordering, the content
    /// goes.
    pub async fn delete(&self, actor_id: Uuid, message_id: Uuid) -> Result<Message, AppError> {
        let mut message = self.load_message(message_id).await?;
        if message.sender_id != actor_id {
            return Err(AppError::Authorization(
                "Only the sender can delete a message".to_string(),
            ));
        }
        if message.deleted {
            return Err(AppError::Conflict(
                "Message is already deleted".to_string(),
            ));
        }

        message.deleted = true;
        message.content = String::new();
        self.store.update_message(message).await
    }

    pub async fn conversations(
        &self,
        actor_id: Uuid,
    ) -> Result<Vec<ConversationSummary>, AppError> {
        let conversations = self.store.conversations_for_user(actor_id).await?;
        Ok(conversations
            .iter()
            .map(|c| ConversationSummary {
                conversation_id: c.conversation_id,
                other_participant: c.other_participant(actor_id),
                lesson_id: c.lesson_id,
                unread: c.unread_for(actor_id),
                last_message_at: c.last_message_at,
            })
            .collect())
    }

    async fn load_for(
        &self,
        actor_id: Uuid,
        conversation_id: Uuid,
    ) -> Result<Conversation, AppError> {
        let conversation = self
            .store
            .conversation(conversation_id)
            .await?
            .ok_or_else(|| AppError::NotFound("Conversation not found".to_string()))?;
        if !conversation.involves(actor_id) {
            return Err(AppError::Authorization(
                "Not a participant of this conversation".to_string(),
            ));
        }
        Ok(conversation)
    }

    async fn load_message(&self, message_id: Uuid) -> Result<Message, AppError> {
        self.store
            .message(message_id)
            .await?
            .ok_or_else(|| AppError::NotFound("Message not found".to_string()))
    }
}
