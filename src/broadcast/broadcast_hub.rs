use std::sync::Arc;

use futures::future::join_all;
use log::{debug, error, warn};
use serde::Serialize;
use serde_json::json;
use tokio::sync::RwLock;
use uuid::Uuid;

use crate::broadcast::subscriber::Subscriber;
use crate::error_handling::types::BroadcastError;
use crate::storage::types::Exchange;

/// The set of currently connected subscribers.
///
/// Delivery is best-effort and at-most-once to whoever is connected at
/// publish time. Nothing is buffered for later subscribers.
#[derive(Default)]
pub struct BroadcastHub {
    subscribers: RwLock<Vec<Arc<dyn Subscriber>>>,
}

impl BroadcastHub {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn subscribe(&self, subscriber: Arc<dyn Subscriber>) {
        let mut subscribers = self.subscribers.write().await;
        if subscribers.iter().any(|s| s.id() == subscriber.id()) {
            return;
        }
        debug!("Subscriber {} connected", subscriber.id());
        subscribers.push(subscriber);
    }

    /// Returns whether a subscriber with `id` was present.
    pub async fn unsubscribe(&self, id: Uuid) -> bool {
        let mut subscribers = self.subscribers.write().await;
        let before = subscribers.len();
        subscribers.retain(|s| s.id() != id);
        let removed = subscribers.len() != before;
        if removed {
            debug!("Subscriber {} disconnected", id);
        }
        removed
    }

    pub async fn subscriber_count(&self) -> usize {
        self.subscribers.read().await.len()
    }

    /// Sends `exchange` in its wire format to every current subscriber.
    pub async fn publish(&self, exchange: &Exchange) {
        match encode(exchange) {
            Ok(text) => self.send_all(&text).await,
            Err(e) => error!("Dropping event for {} {}: {}", exchange.method, exchange.url, e),
        }
    }

    /// Tells live views that history was wiped.
    pub async fn publish_clear(&self) {
        let text = json!({ "type": "clear" }).to_string();
        self.send_all(&text).await;
    }

    async fn send_all(&self, text: &str) {
        // Sends run on a snapshot so subscribe/unsubscribe never wait on a slow peer.
        let snapshot: Vec<Arc<dyn Subscriber>> = self.subscribers.read().await.clone();
        if snapshot.is_empty() {
            return;
        }

        let sends = snapshot.iter().map(|subscriber| async move {
            if let Err(e) = subscriber.send_text(text).await {
                warn!("Failed to send to subscriber {}: {}", subscriber.id(), e);
            }
        });
        join_all(sends).await;
    }
}

fn encode<T: Serialize>(event: &T) -> Result<String, BroadcastError> {
    serde_json::to_string(event).map_err(|e| BroadcastError::Encode(e.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::broadcast::subscriber::ChannelSubscriber;
    use crate::storage::types::HttpMessage;
    use async_trait::async_trait;
    use std::time::Duration;
    use tokio::sync::Notify;

    struct FailingSubscriber {
        id: Uuid,
    }

    #[async_trait]
    impl Subscriber for FailingSubscriber {
        fn id(&self) -> Uuid {
            self.id
        }

        async fn send_text(&self, _text: &str) -> Result<(), BroadcastError> {
            Err(BroadcastError::SendFailed("connection reset".into()))
        }
    }

    struct StalledSubscriber {
        id: Uuid,
        release: Arc<Notify>,
    }

    #[async_trait]
    impl Subscriber for StalledSubscriber {
        fn id(&self) -> Uuid {
            self.id
        }

        async fn send_text(&self, _text: &str) -> Result<(), BroadcastError> {
            self.release.notified().await;
            Ok(())
        }
    }

    fn sample() -> Exchange {
        Exchange {
            id: Some(7),
            method: "GET".into(),
            url: "http://a.com/x".into(),
            status_line: "200 OK".into(),
            duration_label: "4ms".into(),
            timestamp: "2024-01-01 00:00:00".into(),
            request: HttpMessage::default(),
            response: HttpMessage::default(),
        }
    }

    #[tokio::test]
    async fn test_failing_subscriber_does_not_block_healthy_one() {
        let hub = BroadcastHub::new();
        hub.subscribe(Arc::new(FailingSubscriber { id: Uuid::new_v4() }))
            .await;
        let (healthy, mut receiver) = ChannelSubscriber::pair();
        hub.subscribe(Arc::new(healthy)).await;

        hub.publish(&sample()).await;

        let text = receiver.recv().await.unwrap();
        let value: serde_json::Value = serde_json::from_str(&text).unwrap();
        assert_eq!(value["url"], "http://a.com/x");
        assert_eq!(value["status"], "200 OK");
        assert_eq!(value["time"], "4ms");
    }

    #[tokio::test]
    async fn test_slow_subscriber_does_not_delay_others() {
        let hub = Arc::new(BroadcastHub::new());
        let release = Arc::new(Notify::new());
        hub.subscribe(Arc::new(StalledSubscriber {
            id: Uuid::new_v4(),
            release: release.clone(),
        }))
        .await;
        let (healthy, mut receiver) = ChannelSubscriber::pair();
        hub.subscribe(Arc::new(healthy)).await;

        let publisher = {
            let hub = hub.clone();
            tokio::spawn(async move { hub.publish(&sample()).await })
        };

        let delivered = tokio::time::timeout(Duration::from_secs(1), receiver.recv())
            .await
            .expect("healthy subscriber waited on the stalled one");
        assert!(delivered.is_some());
        assert!(!publisher.is_finished());

        release.notify_one();
        publisher.await.unwrap();
    }

    #[tokio::test]
    async fn test_unsubscribe_stops_delivery() {
        let hub = BroadcastHub::new();
        let (subscriber, mut receiver) = ChannelSubscriber::pair();
        let id = subscriber.id();
        hub.subscribe(Arc::new(subscriber)).await;
        assert_eq!(hub.subscriber_count().await, 1);

        assert!(hub.unsubscribe(id).await);
        assert!(!hub.unsubscribe(id).await);
        hub.publish(&sample()).await;
        assert!(receiver.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_publish_clear_control_message() {
        let hub = BroadcastHub::new();
        let (subscriber, mut receiver) = ChannelSubscriber::pair();
        hub.subscribe(Arc::new(subscriber)).await;

        hub.publish_clear().await;
        assert_eq!(receiver.recv().await.unwrap(), r#"{"type":"clear"}"#);
    }

    #[tokio::test]
    async fn test_late_subscriber_gets_no_replay() {
        let hub = BroadcastHub::new();
        hub.publish(&sample()).await;

        let (subscriber, mut receiver) = ChannelSubscriber::pair();
        hub.subscribe(Arc::new(subscriber)).await;
        assert!(receiver.try_recv().is_err());

        hub.publish(&sample()).await;
        assert!(receiver.recv().await.is_some());
    }

    #[tokio::test]
    async fn test_disconnected_channel_is_skipped() {
        let hub = BroadcastHub::new();
        let (gone, gone_receiver) = ChannelSubscriber::pair();
        drop(gone_receiver);
        hub.subscribe(Arc::new(gone)).await;
        let (live, mut receiver) = ChannelSubscriber::pair();
        hub.subscribe(Arc::new(live)).await;

        hub.publish_clear().await;
        assert!(receiver.recv().await.is_some());
    }

    #[test]
    fn test_unencodable_event_reports_encode_error() {
        let mut bad = std::collections::HashMap::new();
        bad.insert((1, 2), "tuple keys are not JSON object keys");
        assert!(matches!(encode(&bad), Err(BroadcastError::Encode(_))));
        assert!(encode(&sample()).unwrap().contains("\"method\""));
    }
}
