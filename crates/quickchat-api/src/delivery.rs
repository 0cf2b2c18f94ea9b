use std::sync::Arc;

use tracing::{debug, warn};
use uuid::Uuid;

use quickchat_db::{ChatError, ChatResult, ConnectionRegistry, MessageStore};
use quickchat_gateway::Presence;
use quickchat_types::api::SendMessageBody;
use quickchat_types::events::GatewayEvent;
use quickchat_types::models::Message;

use crate::media::{MediaStore, decode_image};
use crate::state::run_blocking;

/// Persists new messages and pushes them to the receiver when online.
///
/// The push is fire-and-forget. The persisted row is the only delivery
/// guarantee: an offline receiver sees the message on their next fetch.
#[derive(Clone)]
pub struct DeliveryDispatcher {
    registry: Arc<ConnectionRegistry>,
    store: Arc<MessageStore>,
    presence: Arc<dyn Presence>,
    media: Arc<dyn MediaStore>,
    max_image_bytes: usize,
}

impl DeliveryDispatcher {
    pub fn new(
        registry: Arc<ConnectionRegistry>,
        store: Arc<MessageStore>,
        presence: Arc<dyn Presence>,
        media: Arc<dyn MediaStore>,
        max_image_bytes: usize,
    ) -> Self {
        Self {
            registry,
            store,
            presence,
            media,
            max_image_bytes,
        }
    }

    pub async fn send_message(
        &self,
        sender_id: Uuid,
        receiver_id: Uuid,
        payload: SendMessageBody,
    ) -> ChatResult<Message> {
        let text = payload.text.filter(|t| !t.trim().is_empty());
        if text.is_none() && payload.image.is_none() {
            return Err(ChatError::validation("Message must contain text or an image."));
        }

        let registry = self.registry.clone();
        if !run_blocking(move || registry.is_connected(sender_id, receiver_id)).await? {
            return Err(ChatError::NotConnected);
        }

        let image = match payload.image {
            Some(raw) => {
                let (bytes, extension) = decode_image(&raw, self.max_image_bytes)?;
                let url = self
                    .media
                    .store(bytes, extension)
                    .await
                    .map_err(|e| ChatError::Upstream(e.to_string()))?;
                Some(url)
            }
            None => None,
        };

        let store = self.store.clone();
        let message =
            run_blocking(move || store.append(sender_id, receiver_id, text, image)).await?;

        match self.presence.is_online(receiver_id) {
            Some(channel) => {
                if channel.push(GatewayEvent::NewMessage(message.clone())) {
                    debug!("Pushed message {} to {}", message.id, receiver_id);
                } else {
                    warn!("Session of {} closed before message {} was pushed", receiver_id, message.id);
                }
            }
            None => debug!("{} offline, message {} waits for fetch", receiver_id, message.id),
        }

        Ok(message)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use anyhow::anyhow;
    use base64::Engine;
    use futures_util::future::BoxFuture;
    use quickchat_db::{Database, SendOutcome};
    use quickchat_gateway::{PresenceChannel, PresenceTracker};

    struct FailingMedia;

    impl MediaStore for FailingMedia {
        fn store<'a>(&'a self, _bytes: Vec<u8>, _ext: &'a str) -> BoxFuture<'a, anyhow::Result<String>> {
            Box::pin(async { Err(anyhow!("object store unreachable")) })
        }
    }

    struct FixedMedia;

    impl MediaStore for FixedMedia {
        fn store<'a>(&'a self, _bytes: Vec<u8>, ext: &'a str) -> BoxFuture<'a, anyhow::Result<String>> {
            Box::pin(async move { Ok(format!("/media/fixed.{}", ext)) })
        }
    }

    struct Fixture {
        db: Arc<Database>,
        registry: Arc<ConnectionRegistry>,
        store: Arc<MessageStore>,
        presence: PresenceTracker,
    }

    impl Fixture {
        fn new() -> Self {
            let db = Arc::new(Database::open_in_memory().unwrap());
            Self {
                registry: Arc::new(ConnectionRegistry::new(db.clone())),
                store: Arc::new(MessageStore::new(db.clone())),
                presence: PresenceTracker::new(),
                db,
            }
        }

        fn dispatcher(&self, media: Arc<dyn MediaStore>) -> DeliveryDispatcher {
            DeliveryDispatcher::new(
                self.registry.clone(),
                self.store.clone(),
                Arc::new(self.presence.clone()),
                media,
                1024,
            )
        }

        fn user(&self, name: &str) -> Uuid {
            let id = Uuid::new_v4();
            self.db.create_user(&id.to_string(), name, "hash", name, "").unwrap();
            id
        }

        fn connected_pair(&self) -> (Uuid, Uuid) {
            let (a, b) = (self.user("alice"), self.user("bob"));
            match self.registry.send_request(a, b).unwrap() {
                SendOutcome::Created(r) => self.registry.accept(r.id).unwrap(),
                other => panic!("unexpected {:?}", other),
            };
            (a, b)
        }
    }

    fn text(s: &str) -> SendMessageBody {
        SendMessageBody {
            text: Some(s.into()),
            image: None,
        }
    }

    #[tokio::test]
    async fn online_receiver_gets_push() {
        let fx = Fixture::new();
        let (a, b) = fx.connected_pair();
        let (channel, mut rx) = PresenceChannel::open();
        fx.presence.mark_online(b, channel);

        let sent = fx.dispatcher(Arc::new(FixedMedia)).send_message(a, b, text("hi")).await.unwrap();

        match rx.try_recv().unwrap() {
            GatewayEvent::NewMessage(pushed) => {
                assert_eq!(pushed, sent);
                assert_eq!(pushed.text.as_deref(), Some("hi"));
            }
            other => panic!("unexpected {:?}", other),
        }
    }

    #[tokio::test]
    async fn offline_receiver_finds_message_on_fetch() {
        let fx = Fixture::new();
        let (a, b) = fx.connected_pair();
        let (channel, mut rx) = PresenceChannel::open();
        let channel_id = channel.id();
        fx.presence.mark_online(b, channel);
        fx.presence.mark_offline(b, channel_id);

        let sent = fx.dispatcher(Arc::new(FixedMedia)).send_message(a, b, text("hi")).await.unwrap();
        assert!(rx.try_recv().is_err());

        let conversation = fx.store.conversation(b, a).unwrap();
        assert_eq!(conversation, vec![sent.clone()]);
        assert!(!conversation[0].seen);

        fx.store.mark_conversation_read(b, a).unwrap();
        assert!(fx.store.get(sent.id).unwrap().seen);
    }

    #[tokio::test]
    async fn closed_session_does_not_fail_send() {
        let fx = Fixture::new();
        let (a, b) = fx.connected_pair();
        let (channel, rx) = PresenceChannel::open();
        fx.presence.mark_online(b, channel);
        drop(rx);

        let sent = fx.dispatcher(Arc::new(FixedMedia)).send_message(a, b, text("still here")).await;
        assert!(sent.is_ok());
        assert_eq!(fx.store.conversation(a, b).unwrap().len(), 1);
    }

    #[tokio::test]
    async fn unconnected_peers_cannot_message() {
        let fx = Fixture::new();
        let (a, b) = (fx.user("alice"), fx.user("bob"));
        fx.registry.send_request(a, b).unwrap();

        let err = fx.dispatcher(Arc::new(FixedMedia)).send_message(a, b, text("hi")).await.unwrap_err();
        assert!(matches!(err, ChatError::NotConnected));
        assert!(fx.store.conversation(a, b).unwrap().is_empty());
    }

    #[tokio::test]
    async fn upload_failure_persists_nothing() {
        let fx = Fixture::new();
        let (a, b) = fx.connected_pair();
        let payload = SendMessageBody {
            text: Some("look".into()),
            image: Some(base64::engine::general_purpose::STANDARD.encode(b"img")),
        };

        let err = fx.dispatcher(Arc::new(FailingMedia)).send_message(a, b, payload).await.unwrap_err();
        assert!(matches!(err, ChatError::Upstream(_)));
        assert!(fx.store.conversation(a, b).unwrap().is_empty());
    }

    #[tokio::test]
    async fn image_reference_is_stored() {
        let fx = Fixture::new();
        let (a, b) = fx.connected_pair();
        let payload = SendMessageBody {
            text: None,
            image: Some(format!(
                "data:image/png;base64,{}",
                base64::engine::general_purpose::STANDARD.encode(b"img")
            )),
        };

        let sent = fx.dispatcher(Arc::new(FixedMedia)).send_message(a, b, payload).await.unwrap();
        assert_eq!(sent.image.as_deref(), Some("/media/fixed.png"));
        assert_eq!(sent.text, None);
    }

    #[tokio::test]
    async fn empty_payload_is_rejected_before_anything_else() {
        let fx = Fixture::new();
        let (a, b) = (fx.user("alice"), fx.user("bob"));
        let err = fx
            .dispatcher(Arc::new(FixedMedia))
            .send_message(a, b, SendMessageBody::default())
            .await
            .unwrap_err();
        assert!(matches!(err, ChatError::Validation(_)));
    }
}
