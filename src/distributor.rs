//! Hand-over of computed content between sections of one run.
//!
//! A producer owns one [`ResultDistributor`]; every consumer registers its
//! [`Inbox`] sender there before the run starts. Publishing pushes the content
//! into each consumer's inbox immediately, in registration order.

use crate::section::content::{ComputedContent, Received};
use tokio::sync::{mpsc, RwLock};
use tracing::debug;
use uuid::Uuid;

#[derive(Debug, Clone)]
pub struct Delivery {
    pub producer: String,
    pub content: ComputedContent,
}

pub type InboxSender = mpsc::UnboundedSender<Delivery>;

/// Receiving end of a consumer section.
#[derive(Debug)]
pub struct Inbox {
    sender: InboxSender,
    receiver: mpsc::UnboundedReceiver<Delivery>,
    received: Received,
}

impl Default for Inbox {
    fn default() -> Self {
        Self::new()
    }
}

impl Inbox {
    #[must_use]
    pub fn new() -> Self {
        let (sender, receiver) = mpsc::unbounded_channel();
        Self {
            sender,
            receiver,
            received: Received::default(),
        }
    }

    #[must_use]
    pub fn sender(&self) -> InboxSender {
        self.sender.clone()
    }

    /// Take in everything delivered so far; later deliveries of the same
    /// producer replace earlier ones.
    pub fn drain(&mut self) -> &Received {
        while let Ok(delivery) = self.receiver.try_recv() {
            self.received.insert(delivery.producer, delivery.content);
        }
        &self.received
    }
}

#[derive(Debug)]
struct Subscription {
    id: Uuid,
    consumer: String,
    sender: InboxSender,
}

#[derive(Debug, Default)]
pub struct ResultDistributor {
    subscriptions: RwLock<Vec<Subscription>>,
}

impl ResultDistributor {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn register(&self, consumer: &str, sender: InboxSender) -> Uuid {
        let id = Uuid::new_v4();
        self.subscriptions.write().await.push(Subscription {
            id,
            consumer: consumer.to_string(),
            sender,
        });
        id
    }

    /// Deliver `content` to every registered consumer except the producer
    /// itself. Returns the number of deliveries.
    pub async fn publish(&self, producer: &str, content: &ComputedContent) -> usize {
        let subscriptions = self.subscriptions.read().await;
        let mut delivered = 0;
        for subscription in subscriptions.iter() {
            if subscription.consumer == producer {
                continue;
            }
            let delivery = Delivery {
                producer: producer.to_string(),
                content: content.clone(),
            };
            // A dropped consumer simply misses the content
            if subscription.sender.send(delivery).is_ok() {
                delivered += 1;
            } else {
                debug!(
                    "{}: consumer {} ({}) is gone",
                    producer, subscription.consumer, subscription.id
                );
            }
        }
        debug!("{} distributed to {} consumer(s)", producer, delivered);
        delivered
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn content(payload: serde_json::Value, timestamp: f64) -> ComputedContent {
        ComputedContent { payload, timestamp }
    }

    #[tokio::test]
    async fn test_every_registration_is_delivered_to() {
        let distributor = ResultDistributor::new();
        let mut labels = Inbox::new();
        let mut metrics = Inbox::new();

        let id1 = distributor.register("ec2_labels", labels.sender()).await;
        let id2 = distributor.register("ec2", metrics.sender()).await;
        assert_ne!(id1, id2);

        let delivered = distributor.publish("ec2_summary", &content(json!({"i-1": {}}), 1.0)).await;
        assert_eq!(delivered, 2);
        assert!(labels.drain().get("ec2_summary").is_some());
        assert!(metrics.drain().get("ec2_summary").is_some());
    }

    #[tokio::test]
    async fn test_self_delivery_is_suppressed() {
        let distributor = ResultDistributor::new();
        let mut producer_inbox = Inbox::new();
        let mut consumer_inbox = Inbox::new();
        distributor.register("ec2_summary", producer_inbox.sender()).await;
        distributor.register("ec2_labels", consumer_inbox.sender()).await;

        let delivered = distributor.publish("ec2_summary", &content(json!({"i-1": {}}), 1.0)).await;
        assert_eq!(delivered, 1);
        assert!(producer_inbox.drain().get("ec2_summary").is_none());
        assert!(consumer_inbox.drain().get("ec2_summary").is_some());
    }

    #[tokio::test]
    async fn test_latest_publish_wins() {
        let distributor = ResultDistributor::new();
        let mut inbox = Inbox::new();
        distributor.register("ebs", inbox.sender()).await;

        distributor.publish("ebs_summary", &content(json!(["old"]), 1.0)).await;
        distributor.publish("ebs_summary", &content(json!(["new"]), 2.0)).await;

        let received = inbox.drain();
        assert_eq!(received.len(), 1);
        assert_eq!(received.get("ebs_summary").unwrap().payload, json!(["new"]));
    }

    #[tokio::test]
    async fn test_late_registration_misses_content() {
        let distributor = ResultDistributor::new();
        distributor.publish("s3_summary", &content(json!({"b": {}}), 1.0)).await;

        let mut inbox = Inbox::new();
        distributor.register("s3", inbox.sender()).await;
        assert!(inbox.drain().is_empty());
    }
}
