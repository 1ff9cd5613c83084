//! # Pub/Sub Registry
//!
//! Purpose: Track channel subscriptions per connection and fan published
//! messages into each subscriber's outbox.
//!
//! Delivery is best effort into an in-process channel per connection; a
//! closed outbox just drops the subscriber. Pattern subscriptions and
//! cross-node fan-out live outside this core.

use std::collections::HashMap;

use parking_lot::Mutex;
use tokio::sync::mpsc::UnboundedSender;

use crate::protocol;

type Outbox = UnboundedSender<Vec<u8>>;

/// Channel registry shared by every connection.
pub struct PubSub {
    channels: Mutex<HashMap<String, HashMap<u64, Outbox>>>,
}

impl PubSub {
    pub fn new() -> Self {
        PubSub {
            channels: Mutex::new(HashMap::new()),
        }
    }

    /// Adds `conn_id` to `channel`. Returns the connection's subscription
    /// count afterwards.
    pub fn subscribe(&self, conn_id: u64, channel: &str, outbox: Outbox) -> usize {
        let mut channels = self.channels.lock();
        channels
            .entry(channel.to_string())
            .or_default()
            .insert(conn_id, outbox);
        Self::count_for(&channels, conn_id)
    }

    /// Removes `conn_id` from `channel`. Returns the connection's
    /// remaining subscription count.
    pub fn unsubscribe(&self, conn_id: u64, channel: &str) -> usize {
        let mut channels = self.channels.lock();
        if let Some(subscribers) = channels.get_mut(channel) {
            subscribers.remove(&conn_id);
            if subscribers.is_empty() {
                channels.remove(channel);
            }
        }
        Self::count_for(&channels, conn_id)
    }

    /// Channels `conn_id` is currently subscribed to.
    pub fn channels_of(&self, conn_id: u64) -> Vec<String> {
        self.channels
            .lock()
            .iter()
            .filter(|(_, subscribers)| subscribers.contains_key(&conn_id))
            .map(|(channel, _)| channel.clone())
            .collect()
    }

    /// Delivers `payload` to every live subscriber of `channel`. Returns
    /// the number of receivers.
    pub fn publish(&self, channel: &str, payload: &str) -> usize {
        let message = protocol::array(&[
            protocol::bulk(b"message"),
            protocol::bulk(channel.as_bytes()),
            protocol::bulk(payload.as_bytes()),
        ]);

        let mut channels = self.channels.lock();
        let Some(subscribers) = channels.get_mut(channel) else {
            return 0;
        };
        let mut delivered = 0;
        subscribers.retain(|_, outbox| match outbox.send(message.clone()) {
            Ok(()) => {
                delivered += 1;
                true
            }
            // The connection went away; drop its subscription.
            Err(_) => false,
        });
        if subscribers.is_empty() {
            channels.remove(channel);
        }
        delivered
    }

    /// Removes every subscription held by a closed connection.
    pub fn drop_connection(&self, conn_id: u64) {
        let mut channels = self.channels.lock();
        channels.retain(|_, subscribers| {
            subscribers.remove(&conn_id);
            !subscribers.is_empty()
        });
    }

    fn count_for(channels: &HashMap<String, HashMap<u64, Outbox>>, conn_id: u64) -> usize {
        channels
            .values()
            .filter(|subscribers| subscribers.contains_key(&conn_id))
            .count()
    }
}

impl Default for PubSub {
    fn default() -> Self {
        PubSub::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::sync::mpsc::unbounded_channel;

    #[test]
    fn publish_reaches_subscribers() {
        let pubsub = PubSub::new();
        let (tx, mut rx) = unbounded_channel();
        assert_eq!(pubsub.subscribe(1, "news", tx), 1);

        assert_eq!(pubsub.publish("news", "hello"), 1);
        let message = rx.try_recv().unwrap();
        assert!(message.starts_with(b"*3\r\n$7\r\nmessage\r\n"));
        assert_eq!(pubsub.publish("other", "hello"), 0);
    }

    #[test]
    fn unsubscribe_and_drop_clean_up() {
        let pubsub = PubSub::new();
        let (tx, _rx) = unbounded_channel();
        pubsub.subscribe(1, "a", tx.clone());
        pubsub.subscribe(1, "b", tx);
        assert_eq!(pubsub.channels_of(1).len(), 2);

        assert_eq!(pubsub.unsubscribe(1, "a"), 1);
        pubsub.drop_connection(1);
        assert!(pubsub.channels_of(1).is_empty());
        assert_eq!(pubsub.publish("b", "x"), 0);
    }

    #[test]
    fn closed_outboxes_are_pruned_on_publish() {
        let pubsub = PubSub::new();
        let (tx, rx) = unbounded_channel();
        pubsub.subscribe(7, "news", tx);
        drop(rx);

        assert_eq!(pubsub.publish("news", "gone"), 0);
        assert!(pubsub.channels_of(7).is_empty());
    }
}
