//! Read-side views for the client: request inbox, people search, sidebar.
//! Recomputed on every call.

use std::collections::HashSet;
use std::sync::Arc;

use tracing::warn;
use uuid::Uuid;

use quickchat_db::{ChatResult, ConnectionRegistry, Database, MessageStore, RequestLists};
use quickchat_gateway::Presence;
use quickchat_types::api::{FindableUser, RequestEntry, RequestInbox, SidebarEntry, SidebarUsersResponse};
use quickchat_types::models::{ChatRequest, RelationStatus, RequestStatus, UserProfile};

pub struct ClientProjection {
    db: Arc<Database>,
    registry: Arc<ConnectionRegistry>,
    store: Arc<MessageStore>,
    presence: Arc<dyn Presence>,
}

impl ClientProjection {
    pub fn new(
        db: Arc<Database>,
        registry: Arc<ConnectionRegistry>,
        store: Arc<MessageStore>,
        presence: Arc<dyn Presence>,
    ) -> Self {
        Self {
            db,
            registry,
            store,
            presence,
        }
    }

    pub fn connected_peers(&self, user_id: Uuid) -> ChatResult<Vec<UserProfile>> {
        let ids: Vec<Uuid> = self.registry.connected_peer_ids(user_id)?.into_iter().collect();
        let mut peers: Vec<UserProfile> = self.db.get_profiles(&ids)?.into_values().collect();
        sort_by_name(&mut peers);
        Ok(peers)
    }

    /// Other users whose display name contains `query` (case-insensitive),
    /// each tagged with where the viewer stands with them.
    pub fn findable_users(&self, user_id: Uuid, query: &str) -> ChatResult<Vec<FindableUser>> {
        let needle = query.trim().to_lowercase();
        let lists = self.registry.list_requests(user_id)?;

        Ok(self
            .db
            .list_users_except(&user_id.to_string())?
            .into_iter()
            .filter(|u| u.full_name.to_lowercase().contains(&needle))
            .map(|user| FindableUser {
                status: relation_status(&lists, user.id),
                user,
            })
            .collect())
    }

    /// Connected peers with their online flag and unseen count.
    pub fn sidebar_entries(&self, user_id: Uuid) -> ChatResult<Vec<SidebarEntry>> {
        let peers = self.connected_peers(user_id)?;
        let unseen = self.store.unseen_counts_for(user_id)?;
        let online = self.presence.snapshot();

        Ok(peers
            .into_iter()
            .map(|user| SidebarEntry {
                online: online.contains(&user.id),
                unseen: unseen.get(&user.id).copied().unwrap_or(0),
                user,
            })
            .collect())
    }

    /// Every other user plus unseen counts per sender.
    pub fn sidebar_users(&self, user_id: Uuid) -> ChatResult<SidebarUsersResponse> {
        Ok(SidebarUsersResponse {
            users: self.db.list_users_except(&user_id.to_string())?,
            unseen_messages: self.store.unseen_counts_for(user_id)?,
        })
    }

    /// The user's request lists joined with the other party's profile.
    pub fn request_inbox(&self, user_id: Uuid) -> ChatResult<RequestInbox> {
        let lists = self.registry.list_requests(user_id)?;

        let peer_ids: Vec<Uuid> = lists
            .received
            .iter()
            .chain(lists.sent.iter())
            .map(|r| r.counterpart(user_id))
            .collect::<HashSet<_>>()
            .into_iter()
            .collect();
        let profiles = self.db.get_profiles(&peer_ids)?;

        let join = |requests: Vec<ChatRequest>| -> Vec<RequestEntry> {
            requests
                .into_iter()
                .filter_map(|request| {
                    let peer_id = request.counterpart(user_id);
                    match profiles.get(&peer_id) {
                        Some(peer) => Some(RequestEntry {
                            peer: peer.clone(),
                            request,
                        }),
                        None => {
                            warn!("Chat request {} references unknown user {}", request.id, peer_id);
                            None
                        }
                    }
                })
                .collect()
        };

        Ok(RequestInbox {
            received: join(lists.received),
            sent: join(lists.sent),
        })
    }
}

fn relation_status(lists: &RequestLists, other: Uuid) -> RelationStatus {
    let received = lists.received.iter().filter(|r| r.sender_id == other);
    let sent = lists.sent.iter().filter(|r| r.receiver_id == other);
    let with_status = |status: RequestStatus| {
        let mut received = received.clone();
        let mut sent = sent.clone();
        (received.any(|r| r.status == status), sent.any(|r| r.status == status))
    };

    match (with_status(RequestStatus::Accepted), with_status(RequestStatus::Pending)) {
        ((true, _) | (_, true), _) => RelationStatus::Connected,
        (_, (true, _)) => RelationStatus::PendingReceived,
        (_, (_, true)) => RelationStatus::PendingSent,
        _ => RelationStatus::None,
    }
}

fn sort_by_name(users: &mut [UserProfile]) {
    users.sort_by(|a, b| {
        a.full_name
            .to_lowercase()
            .cmp(&b.full_name.to_lowercase())
            .then_with(|| a.username.cmp(&b.username))
    });
}

#[cfg(test)]
mod tests {
    use super::*;
    use quickchat_db::SendOutcome;
    use quickchat_gateway::{PresenceChannel, PresenceTracker};

    struct Fixture {
        db: Arc<Database>,
        registry: Arc<ConnectionRegistry>,
        store: Arc<MessageStore>,
        presence: PresenceTracker,
        projection: ClientProjection,
    }

    impl Fixture {
        fn new() -> Self {
            let db = Arc::new(Database::open_in_memory().unwrap());
            let registry = Arc::new(ConnectionRegistry::new(db.clone()));
            let store = Arc::new(MessageStore::new(db.clone()));
            let presence = PresenceTracker::new();
            let projection = ClientProjection::new(
                db.clone(),
                registry.clone(),
                store.clone(),
                Arc::new(presence.clone()),
            );
            Self {
                db,
                registry,
                store,
                presence,
                projection,
            }
        }

        fn user(&self, username: &str, full_name: &str) -> Uuid {
            let id = Uuid::new_v4();
            self.db
                .create_user(&id.to_string(), username, "hash", full_name, "bio")
                .unwrap();
            id
        }

        fn request(&self, from: Uuid, to: Uuid) -> ChatRequest {
            match self.registry.send_request(from, to).unwrap() {
                SendOutcome::Created(r) | SendOutcome::Resent(r) => r,
                SendOutcome::AlreadyConnected => panic!("already connected"),
            }
        }
    }

    fn status_of(users: &[FindableUser], id: Uuid) -> RelationStatus {
        users.iter().find(|u| u.user.id == id).map(|u| u.status).unwrap()
    }

    #[test]
    fn findable_users_filters_and_tags_status() {
        let fx = Fixture::new();
        let me = fx.user("me", "Me Myself");
        let john = fx.user("john", "John Doe");
        let jo = fx.user("jo", "JOANNA");
        let major = fx.user("major", "Major Tom");
        let bjorn = fx.user("bjorn", "Bjorn");
        let ann = fx.user("ann", "Ann");

        let accepted = fx.request(john, me);
        fx.registry.accept(accepted.id).unwrap();
        fx.request(jo, me);
        fx.request(me, major);
        let rejected = fx.request(me, ann);
        fx.registry.reject(rejected.id).unwrap();

        let found = fx.projection.findable_users(me, "jo").unwrap();
        let ids: HashSet<Uuid> = found.iter().map(|u| u.user.id).collect();
        assert_eq!(ids, HashSet::from([john, jo, major, bjorn]));

        assert_eq!(status_of(&found, john), RelationStatus::Connected);
        assert_eq!(status_of(&found, jo), RelationStatus::PendingReceived);
        assert_eq!(status_of(&found, major), RelationStatus::PendingSent);
        assert_eq!(status_of(&found, bjorn), RelationStatus::None);

        let all = fx.projection.findable_users(me, "").unwrap();
        assert_eq!(all.len(), 5);
        assert_eq!(status_of(&all, ann), RelationStatus::None);
    }

    #[test]
    fn connected_peers_covers_both_directions() {
        let fx = Fixture::new();
        let me = fx.user("me", "Me");
        let (a, b, c) = (fx.user("a", "Ann"), fx.user("b", "Bea"), fx.user("c", "Cid"));
        let r1 = fx.request(me, a);
        let r2 = fx.request(b, me);
        fx.request(me, c);
        fx.registry.accept(r1.id).unwrap();
        fx.registry.accept(r2.id).unwrap();

        let peers: Vec<Uuid> = fx.projection.connected_peers(me).unwrap().iter().map(|u| u.id).collect();
        assert_eq!(peers, vec![a, b]);
    }

    #[test]
    fn sidebar_joins_presence_and_unseen_counts() {
        let fx = Fixture::new();
        let me = fx.user("me", "Me");
        let (a, b) = (fx.user("a", "Ann"), fx.user("b", "Bea"));
        for peer in [a, b] {
            let r = fx.request(peer, me);
            fx.registry.accept(r.id).unwrap();
        }
        fx.store.append(a, me, Some("one".into()), None).unwrap();
        fx.store.append(a, me, Some("two".into()), None).unwrap();
        let (channel, _rx) = PresenceChannel::open();
        fx.presence.mark_online(b, channel);

        let entries = fx.projection.sidebar_entries(me).unwrap();
        assert_eq!(entries.len(), 2);
        assert_eq!((entries[0].user.id, entries[0].online, entries[0].unseen), (a, false, 2));
        assert_eq!((entries[1].user.id, entries[1].online, entries[1].unseen), (b, true, 0));

        let users = fx.projection.sidebar_users(me).unwrap();
        assert_eq!(users.users.len(), 2);
        assert_eq!(users.unseen_messages.get(&a), Some(&2));
    }

    #[test]
    fn request_inbox_joins_counterpart_profiles() {
        let fx = Fixture::new();
        let me = fx.user("me", "Me");
        let (a, b) = (fx.user("a", "Ann"), fx.user("b", "Bea"));
        let incoming = fx.request(a, me);
        let outgoing = fx.request(me, b);

        let inbox = fx.projection.request_inbox(me).unwrap();
        assert_eq!(inbox.received.len(), 1);
        assert_eq!(inbox.received[0].request, incoming);
        assert_eq!(inbox.received[0].peer.full_name, "Ann");
        assert_eq!(inbox.sent.len(), 1);
        assert_eq!(inbox.sent[0].request, outgoing);
        assert_eq!(inbox.sent[0].peer.full_name, "Bea");
    }
}
