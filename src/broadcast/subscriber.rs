use async_trait::async_trait;
use tokio::sync::mpsc;
use uuid::Uuid;

use crate::error_handling::types::BroadcastError;

/// One live message channel to a connected viewer.
#[async_trait]
pub trait Subscriber: Send + Sync {
    /// Stable identity used for unsubscribe and logging.
    fn id(&self) -> Uuid;

    /// Sends one text frame. Implementations may suspend on network writes.
    async fn send_text(&self, text: &str) -> Result<(), BroadcastError>;
}

/// A subscriber backed by an unbounded tokio channel.
///
/// Drop the receiver to disconnect; later sends fail with
/// [`BroadcastError::Closed`].
pub struct ChannelSubscriber {
    id: Uuid,
    sender: mpsc::UnboundedSender<String>,
}

impl ChannelSubscriber {
    pub fn pair() -> (Self, mpsc::UnboundedReceiver<String>) {
        let (sender, receiver) = mpsc::unbounded_channel();
        (
            Self {
                id: Uuid::new_v4(),
                sender,
            },
            receiver,
        )
    }
}

#[async_trait]
impl Subscriber for ChannelSubscriber {
    fn id(&self) -> Uuid {
        self.id
    }

    async fn send_text(&self, text: &str) -> Result<(), BroadcastError> {
        self.sender
            .send(text.to_string())
            .map_err(|_| BroadcastError::Closed)
    }
}
