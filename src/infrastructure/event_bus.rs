use crate::domain::MigrationEnvelope;
use async_trait::async_trait;
use std::sync::{Arc, Mutex};
use thiserror::Error;
use tokio::sync::mpsc;
use tracing::debug;

#[derive(Debug, Error, Clone)]
pub enum EventBusError {
    #[error("Serialization error: {0}")]
    Serialization(String),
    #[error("Publish failed: {0}")]
    Publish(String),
    #[error("Bus is closed")]
    Closed,
}

/// At-least-once delivery of migration requests to every subscribed handler.
#[async_trait]
pub trait EventBus: Send + Sync {
    async fn publish(&self, envelope: MigrationEnvelope) -> Result<(), EventBusError>;
}

/// Channel-backed bus that also keeps a log of everything published.
#[derive(Clone)]
pub struct InMemoryEventBus {
    sender: Arc<Mutex<Option<mpsc::UnboundedSender<MigrationEnvelope>>>>,
    published: Arc<Mutex<Vec<MigrationEnvelope>>>,
}

impl Default for InMemoryEventBus {
    fn default() -> Self {
        Self::new()
    }
}

impl InMemoryEventBus {
    /// A bus with no subscriber; publishes are only recorded.
    pub fn new() -> Self {
        Self {
            sender: Arc::new(Mutex::new(None)),
            published: Arc::new(Mutex::new(Vec::new())),
        }
    }

    /// Attaches the single subscriber. A later call replaces the previous one.
    pub fn subscribe(&self) -> mpsc::UnboundedReceiver<MigrationEnvelope> {
        let (tx, rx) = mpsc::unbounded_channel();
        *self.sender.lock().unwrap_or_else(|e| e.into_inner()) = Some(tx);
        rx
    }

    pub fn published(&self) -> Vec<MigrationEnvelope> {
        self.published
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }

    pub fn published_count(&self) -> usize {
        self.published.lock().unwrap_or_else(|e| e.into_inner()).len()
    }
}

#[async_trait]
impl EventBus for InMemoryEventBus {
    async fn publish(&self, envelope: MigrationEnvelope) -> Result<(), EventBusError> {
        debug!(
            "Publishing migration request for {} (attempts {})",
            envelope.payload.lock_key(),
            envelope.attempts
        );
        self.published
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push(envelope.clone());

        let sender = self.sender.lock().unwrap_or_else(|e| e.into_inner()).clone();
        if let Some(sender) = sender {
            sender.send(envelope).map_err(|_| EventBusError::Closed)?;
        }
        Ok(())
    }
}
