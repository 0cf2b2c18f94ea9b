use std::sync::Arc;

use quickchat_db::{ChatError, ChatResult, ConnectionRegistry, Database, MessageStore};
use quickchat_gateway::{Presence, PresenceTracker};

use crate::delivery::DeliveryDispatcher;
use crate::media::MediaStore;
use crate::projection::ClientProjection;

pub type AppState = Arc<AppStateInner>;

pub struct AppStateInner {
    pub db: Arc<Database>,
    pub registry: Arc<ConnectionRegistry>,
    pub store: Arc<MessageStore>,
    pub presence: PresenceTracker,
    pub dispatcher: DeliveryDispatcher,
    pub projection: Arc<ClientProjection>,
    pub jwt_secret: String,
    pub max_image_bytes: usize,
}

impl AppStateInner {
    /// Wire every component around one database and one presence tracker.
    pub fn build(
        db: Database,
        presence: PresenceTracker,
        media: Arc<dyn MediaStore>,
        jwt_secret: String,
        max_image_bytes: usize,
    ) -> AppState {
        let db = Arc::new(db);
        let registry = Arc::new(ConnectionRegistry::new(db.clone()));
        let store = Arc::new(MessageStore::new(db.clone()));
        let presence_dyn: Arc<dyn Presence> = Arc::new(presence.clone());

        let dispatcher = DeliveryDispatcher::new(
            registry.clone(),
            store.clone(),
            presence_dyn.clone(),
            media,
            max_image_bytes,
        );
        let projection = Arc::new(ClientProjection::new(
            db.clone(),
            registry.clone(),
            store.clone(),
            presence_dyn,
        ));

        Arc::new(Self {
            db,
            registry,
            store,
            presence,
            dispatcher,
            projection,
            jwt_secret,
            max_image_bytes,
        })
    }
}

/// Run blocking store work off the async runtime.
pub async fn run_blocking<F, T>(f: F) -> ChatResult<T>
where
    F: FnOnce() -> ChatResult<T> + Send + 'static,
    T: Send + 'static,
{
    tokio::task::spawn_blocking(f)
        .await
        .map_err(|e| ChatError::Persistence(anyhow::anyhow!("spawn_blocking join error: {}", e)))?
}
