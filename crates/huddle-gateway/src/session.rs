//! Per-connection view of the world: which workspace the client follows,
//! and the notification tracker fed from live events.

use tracing::debug;
use uuid::Uuid;

use huddle_db::{Database, StoreError};
use huddle_types::events::GatewayEvent;
use huddle_types::models::Destination;
use huddle_types::unread::NotificationTracker;

pub struct SessionState {
    user_id: Uuid,
    workspace_id: Option<Uuid>,
    tracker: NotificationTracker,
}

impl SessionState {
    pub fn new(user_id: Uuid) -> Self {
        Self {
            user_id,
            workspace_id: None,
            tracker: NotificationTracker::new(user_id),
        }
    }

    pub fn user_id(&self) -> Uuid {
        self.user_id
    }

    pub fn workspace_id(&self) -> Option<Uuid> {
        self.workspace_id
    }

    /// Follow a workspace. Whatever is already unread there is absorbed
    /// silently; the returned event carries the starting badge.
    pub fn subscribe(&mut self, db: &Database, workspace_id: Uuid) -> huddle_db::Result<GatewayEvent> {
        let counts = db.unread_counts(workspace_id, self.user_id)?;

        let mut tracker = NotificationTracker::new(self.user_id);
        let mut entries = counts.channels;
        entries.extend(counts.conversations);
        tracker.observe(&entries);

        self.tracker = tracker;
        self.workspace_id = Some(workspace_id);
        Ok(GatewayEvent::UnreadUpdate {
            workspace_id,
            total: counts.total,
        })
    }

    /// Decide what a broadcast event turns into for this client: nothing
    /// if it belongs to another workspace or a destination the user can't
    /// see, otherwise the event itself plus any notifications it triggers.
    pub fn route(&mut self, db: &Database, event: &GatewayEvent) -> huddle_db::Result<Vec<GatewayEvent>> {
        match event {
            GatewayEvent::WorkspaceDeleted { workspace_id } => {
                if self.workspace_id == Some(*workspace_id) {
                    self.workspace_id = None;
                    self.tracker = NotificationTracker::new(self.user_id);
                }
                return Ok(vec![event.clone()]);
            }
            GatewayEvent::Ready { .. } | GatewayEvent::PresenceUpdate { .. } => return Ok(vec![event.clone()]),
            _ => {}
        }

        let Some(workspace_id) = self.workspace_id else {
            return Ok(vec![]);
        };
        if event.workspace_id() != Some(workspace_id) {
            return Ok(vec![]);
        }

        if let Some(destination) = event.destination() {
            match db.authorize_destination(destination, self.user_id) {
                Ok(_) => {}
                Err(StoreError::Forbidden(_) | StoreError::NotFound { .. }) => return Ok(vec![]),
                Err(e) => return Err(e),
            }
        }

        let mut out = vec![event.clone()];
        match event {
            GatewayEvent::MessageCreate { .. } => out.extend(self.refresh(db)?),
            GatewayEvent::MessageDelete { destination, .. } => {
                self.tracker.rewind(*destination);
                out.extend(self.refresh(db)?);
            }
            _ => {}
        }
        Ok(out)
    }

    /// The user read `destination` from some client. Its count drops and
    /// the badge has to follow.
    pub fn read_marked(&mut self, db: &Database, destination: Destination) -> huddle_db::Result<Vec<GatewayEvent>> {
        self.tracker.rewind(destination);
        self.refresh(db)
    }

    /// Recompute unread state for the followed workspace and return the
    /// notifications it warrants followed by the new badge total.
    pub fn refresh(&mut self, db: &Database) -> huddle_db::Result<Vec<GatewayEvent>> {
        let Some(workspace_id) = self.workspace_id else {
            return Ok(vec![]);
        };

        let counts = db.unread_counts(workspace_id, self.user_id)?;
        let mut entries = counts.channels;
        entries.extend(counts.conversations);

        let mut out: Vec<GatewayEvent> = self
            .tracker
            .observe(&entries)
            .into_iter()
            .map(GatewayEvent::Notification)
            .collect();
        if !out.is_empty() {
            debug!("{} notification(s) for {}", out.len(), self.user_id);
        }

        out.push(GatewayEvent::UnreadUpdate {
            workspace_id,
            total: counts.total,
        });
        Ok(out)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, Utc};
    use huddle_db::messages::NewMessage;
    use huddle_types::api::MessageView;
    use huddle_types::models::{Message, Role, User};

    fn user(db: &Database, name: &str) -> User {
        db.upsert_user(Uuid::new_v4(), name, &format!("{name}@example.com"), None)
            .unwrap()
    }

    fn created(message: &Message) -> GatewayEvent {
        GatewayEvent::MessageCreate {
            workspace_id: message.workspace_id,
            message: MessageView {
                id: message.id,
                destination: message.destination,
                author_id: message.author_id,
                author_name: String::new(),
                author_image: None,
                text: message.text.clone(),
                reply_to: message.reply_to,
                attachments: vec![],
                link_previews: vec![],
                reactions: vec![],
                reply_count: 0,
                created_at: message.created_at,
            },
        }
    }

    #[test]
    fn subscribe_seeds_silently_then_notifies_on_new_messages() {
        let db = Database::open_in_memory().unwrap();
        let ada = user(&db, "ada");
        let bob = user(&db, "bob");
        let ws = db.create_workspace("Acme", ada.id, None).unwrap();
        db.add_member(ws.id, bob.id, Role::Member).unwrap();
        let general = Destination::Channel(db.create_channel(ws.id, "general", None, ada.id, false, &[]).unwrap().id);

        let t0 = Utc::now();
        db.post_message(NewMessage::text(general, bob.id, "before"), t0).unwrap();

        let mut session = SessionState::new(ada.id);
        match session.subscribe(&db, ws.id).unwrap() {
            GatewayEvent::UnreadUpdate { total, .. } => assert_eq!(total, 1),
            other => panic!("unexpected event: {other:?}"),
        }

        let msg = db
            .post_message(NewMessage::text(general, bob.id, "after"), t0 + Duration::seconds(1))
            .unwrap();
        let out = session.route(&db, &created(&msg)).unwrap();

        assert!(matches!(out[0], GatewayEvent::MessageCreate { .. }));
        match &out[1] {
            GatewayEvent::Notification(n) => assert_eq!(n.new_messages, 1),
            other => panic!("expected notification, got {other:?}"),
        }
        assert!(matches!(out[2], GatewayEvent::UnreadUpdate { total: 2, .. }));
    }

    #[test]
    fn own_messages_do_not_notify() {
        let db = Database::open_in_memory().unwrap();
        let ada = user(&db, "ada");
        let ws = db.create_workspace("Acme", ada.id, None).unwrap();
        let general = Destination::Channel(db.create_channel(ws.id, "general", None, ada.id, false, &[]).unwrap().id);

        let mut session = SessionState::new(ada.id);
        session.subscribe(&db, ws.id).unwrap();

        let msg = db.post_message(NewMessage::text(general, ada.id, "mine"), Utc::now()).unwrap();
        let out = session.route(&db, &created(&msg)).unwrap();
        assert_eq!(out.len(), 2);
        assert!(!out.iter().any(|e| matches!(e, GatewayEvent::Notification(_))));
    }

    #[test]
    fn private_and_foreign_events_are_filtered() {
        let db = Database::open_in_memory().unwrap();
        let ada = user(&db, "ada");
        let bob = user(&db, "bob");
        let ws = db.create_workspace("Acme", ada.id, None).unwrap();
        let other = db.create_workspace("Other", ada.id, None).unwrap();
        db.add_member(ws.id, bob.id, Role::Member).unwrap();
        let secret = Destination::Channel(db.create_channel(ws.id, "secret", None, ada.id, true, &[]).unwrap().id);
        let elsewhere = Destination::Channel(db.create_channel(other.id, "x", None, ada.id, false, &[]).unwrap().id);

        let mut session = SessionState::new(bob.id);
        session.subscribe(&db, ws.id).unwrap();

        let hidden = db.post_message(NewMessage::text(secret, ada.id, "hush"), Utc::now()).unwrap();
        assert!(session.route(&db, &created(&hidden)).unwrap().is_empty());

        let foreign = db.post_message(NewMessage::text(elsewhere, ada.id, "hi"), Utc::now()).unwrap();
        assert!(session.route(&db, &created(&foreign)).unwrap().is_empty());
    }

    #[test]
    fn non_member_cannot_subscribe() {
        let db = Database::open_in_memory().unwrap();
        let ada = user(&db, "ada");
        let eve = user(&db, "eve");
        let ws = db.create_workspace("Acme", ada.id, None).unwrap();

        let mut session = SessionState::new(eve.id);
        assert!(matches!(session.subscribe(&db, ws.id), Err(StoreError::Forbidden(_))));
        assert_eq!(session.workspace_id(), None);
    }

    #[test]
    fn deleted_newest_message_then_read_still_notifies_next_post() {
        let db = Database::open_in_memory().unwrap();
        let ada = user(&db, "ada");
        let bob = user(&db, "bob");
        let ws = db.create_workspace("Acme", ada.id, None).unwrap();
        db.add_member(ws.id, bob.id, Role::Member).unwrap();
        let general = Destination::Channel(db.create_channel(ws.id, "general", None, ada.id, false, &[]).unwrap().id);

        let mut session = SessionState::new(ada.id);
        session.subscribe(&db, ws.id).unwrap();

        let t0 = Utc::now();
        let m1 = db.post_message(NewMessage::text(general, bob.id, "one"), t0).unwrap();
        session.route(&db, &created(&m1)).unwrap();
        let m2 = db
            .post_message(NewMessage::text(general, bob.id, "two"), t0 + Duration::seconds(1))
            .unwrap();
        session.route(&db, &created(&m2)).unwrap();

        db.delete_message(m2.id, bob.id).unwrap();
        let deleted = GatewayEvent::MessageDelete {
            workspace_id: ws.id,
            destination: general,
            message_id: m2.id,
        };
        let out = session.route(&db, &deleted).unwrap();
        assert!(matches!(out.last(), Some(GatewayEvent::UnreadUpdate { total: 1, .. })));

        db.mark_read(ada.id, general, t0 + Duration::seconds(2)).unwrap();
        let out = session.read_marked(&db, general).unwrap();
        assert!(matches!(out.last(), Some(GatewayEvent::UnreadUpdate { total: 0, .. })));

        let m3 = db
            .post_message(NewMessage::text(general, bob.id, "three"), t0 + Duration::seconds(3))
            .unwrap();
        let out = session.route(&db, &created(&m3)).unwrap();
        let notifications: Vec<_> = out
            .iter()
            .filter_map(|e| match e {
                GatewayEvent::Notification(n) => Some(n.new_messages),
                _ => None,
            })
            .collect();
        assert_eq!(notifications, vec![1]);
    }
}
