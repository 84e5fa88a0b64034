//! Worker side of the message broker: consume, acknowledge, reject.
//!
//! The manager owns the publishing half; the two capability sets live in
//! separate traits so neither process depends on the other's surface.

use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::mpsc;

use common::pb::datatypes::Task;
use common::settings::{keys, Settings};
use common::Result;

pub mod amqp;

/// Capabilities the runner needs from the broker.
#[async_trait]
pub trait Broker: Send + Sync {
    /// Consume deliveries, decoding each into a [`Task`] and pushing it
    /// onto the internal stream. Returns only when the consumer closes.
    /// Run this in a background task.
    async fn listen(&self) -> Result<()>;

    /// Resolve once [`Broker::listen`] has opened the task stream, so
    /// callers can start the consumer in the background and know when
    /// `tasks` is safe to call.
    async fn wait_until_listening(&self);

    /// Take the task stream. Fails if [`Broker::listen`] has not yet
    /// initialized it.
    async fn tasks(&self) -> Result<mpsc::UnboundedReceiver<Task>>;

    /// Acknowledge the delivery of a finished task.
    async fn done(&self, task: &Task) -> Result<()>;

    /// Negatively acknowledge a failed task, asking the broker to
    /// redeliver it.
    async fn failed(&self, task: &Task) -> Result<()>;
}

/// Connect to the broker named by the settings.
pub async fn from_settings(settings: &Settings) -> Result<Arc<dyn Broker>> {
    let addr = settings.string(keys::BROKER_ADDRESS)?;
    let queue_name = settings.string(keys::BROKER_QUEUE_NAME)?;
    Ok(Arc::new(amqp::AmqpConsumer::connect(&addr, &queue_name).await?))
}
