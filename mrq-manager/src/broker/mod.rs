//! Manager side of the message broker: publish only.
//!
//! The worker owns the consuming half; keeping the two capability sets in
//! separate traits means neither process drags in the other's surface.

use std::sync::Arc;

use async_trait::async_trait;

use common::pb::datatypes::Task;
use common::settings::{keys, Settings};
use common::Result;

pub mod amqp;

/// Capability the scheduler needs: hand a task to the queue.
#[async_trait]
pub trait Broker: Send + Sync {
    /// Publish a serialized task to the durable queue. Returns once the
    /// broker has the message, not when a worker acknowledges it.
    async fn send(&self, task: &Task) -> Result<()>;
}

/// Connect to the broker named by the settings.
pub async fn from_settings(settings: &Settings) -> Result<Arc<dyn Broker>> {
    let addr = settings.string(keys::BROKER_ADDRESS)?;
    let queue_name = settings.string(keys::BROKER_QUEUE_NAME)?;
    Ok(Arc::new(amqp::AmqpPublisher::connect(&addr, &queue_name).await?))
}
