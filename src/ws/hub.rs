use std::{collections::HashMap, sync::Arc};

use axum::extract::ws::Utf8Bytes;
use parking_lot::Mutex;
use tokio::sync::broadcast;
use tracing::{debug, warn};
use uuid::Uuid;

use super::Event;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Audience {
    /// Every open socket, signed in or not.
    All,
    Users(Vec<Uuid>),
}

/// One serialized event on its way to the sockets it is meant for.
#[derive(Debug)]
pub struct Delivery {
    pub audience: Audience,
    pub payload: Utf8Bytes,
}

impl Delivery {
    pub fn is_for(&self, user_id: Option<Uuid>) -> bool {
        match (&self.audience, user_id) {
            (Audience::All, _) => true,
            (Audience::Users(users), Some(user_id)) => users.contains(&user_id),
            (Audience::Users(_), None) => false,
        }
    }
}

/// Fan-out point for every socket. Each socket subscribes and filters
/// deliveries by audience; `presence` counts open sockets per user.
pub struct Hub {
    tx: broadcast::Sender<Arc<Delivery>>,
    presence: Mutex<HashMap<Uuid, usize>>,
}

impl Hub {
    pub fn new(capacity: usize) -> Self {
        Self {
            tx: broadcast::channel(capacity.max(1)).0,
            presence: Mutex::new(HashMap::new()),
        }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<Arc<Delivery>> {
        self.tx.subscribe()
    }

    pub fn to_all(&self, event: &Event) {
        self.send(Audience::All, event);
    }

    pub fn to_users(&self, users: &[Uuid], event: &Event) {
        if users.is_empty() {
            return;
        }
        self.send(Audience::Users(users.to_vec()), event);
    }

    fn send(&self, audience: Audience, event: &Event) {
        let payload = match serde_json::to_string(event) {
            Ok(payload) => payload,
            Err(err) => {
                warn!("dropping {} event: {err}", event.kind());
                return;
            }
        };

        // no receivers is fine, nobody is listening
        let receivers = self
            .tx
            .send(Arc::new(Delivery { audience, payload: payload.into() }))
            .unwrap_or(0);
        debug!("{} sent to {receivers} sockets", event.kind());
    }

    /// Returns true when this is the user's first open socket.
    pub fn connect(&self, user_id: Uuid) -> bool {
        let mut presence = self.presence.lock();
        let count = presence.entry(user_id).or_insert(0);
        *count += 1;
        *count == 1
    }

    /// Returns true when the user has no sockets left.
    pub fn disconnect(&self, user_id: Uuid) -> bool {
        let mut presence = self.presence.lock();
        match presence.get_mut(&user_id) {
            Some(count) if *count > 1 => {
                *count -= 1;
                false
            }
            Some(_) => {
                presence.remove(&user_id);
                true
            }
            None => false,
        }
    }

    pub fn is_online(&self, user_id: Uuid) -> bool {
        self.presence.lock().contains_key(&user_id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn welcome() -> Event {
        Event::Welcome { message: "hi".to_owned() }
    }

    #[test]
    fn presence_counts_sockets() {
        let hub = Hub::new(8);
        let user = Uuid::now_v7();

        assert!(hub.connect(user));
        assert!(!hub.connect(user));
        assert!(hub.is_online(user));

        assert!(!hub.disconnect(user));
        assert!(hub.is_online(user));
        assert!(hub.disconnect(user));
        assert!(!hub.is_online(user));

        // unknown users are not "last"
        assert!(!hub.disconnect(user));
    }

    #[tokio::test]
    async fn deliveries_are_filtered_by_audience() {
        let hub = Hub::new(8);
        let mut rx = hub.subscribe();
        let alice = Uuid::now_v7();
        let bob = Uuid::now_v7();

        hub.to_users(&[alice], &welcome());
        hub.to_all(&welcome());

        let first = rx.recv().await.unwrap();
        assert!(first.is_for(Some(alice)));
        assert!(!first.is_for(Some(bob)));
        assert!(!first.is_for(None));

        let second = rx.recv().await.unwrap();
        assert!(second.is_for(Some(bob)));
        assert!(second.is_for(None));
        assert_eq!(second.payload.as_str(), r#"{"type":"welcome","message":"hi"}"#);
    }

    #[tokio::test]
    async fn empty_audience_sends_nothing() {
        let hub = Hub::new(8);
        let mut rx = hub.subscribe();

        hub.to_users(&[], &welcome());
        assert!(matches!(rx.try_recv(), Err(broadcast::error::TryRecvError::Empty)));
    }

    #[test]
    fn sending_without_sockets_is_harmless() {
        let hub = Hub::new(1);
        hub.to_all(&welcome());
        hub.to_all(&welcome());
    }
}
