//! AMQP publisher for task messages.

use async_trait::async_trait;
use lapin::options::{BasicPublishOptions, QueueDeclareOptions};
use lapin::types::FieldTable;
use lapin::{BasicProperties, Channel, Connection, ConnectionProperties};
use prost::Message;
use tracing::{debug, info};

use common::pb::datatypes::Task;
use common::{Error, Result};

use super::Broker;

/// AMQP marker for messages that survive a broker restart.
const DELIVERY_MODE_PERSISTENT: u8 = 2;

pub struct AmqpPublisher {
    // The connection must outlive the channel.
    _connection: Connection,
    channel: Channel,
    queue_name: String,
}

impl AmqpPublisher {
    /// Open a connection and declare the durable task queue.
    pub async fn connect(addr: &str, queue_name: &str) -> Result<Self> {
        info!("connecting to broker at {addr}");
        let connection = Connection::connect(addr, ConnectionProperties::default())
            .await
            .map_err(transport)?;
        let channel = connection.create_channel().await.map_err(transport)?;

        channel
            .queue_declare(
                queue_name,
                QueueDeclareOptions {
                    durable: true,
                    ..Default::default()
                },
                FieldTable::default(),
            )
            .await
            .map_err(transport)?;
        info!("declared queue `{queue_name}`");

        Ok(AmqpPublisher {
            _connection: connection,
            channel,
            queue_name: queue_name.to_string(),
        })
    }
}

#[async_trait]
impl Broker for AmqpPublisher {
    async fn send(&self, task: &Task) -> Result<()> {
        let payload = task.encode_to_vec();

        self.channel
            .basic_publish(
                "",
                &self.queue_name,
                BasicPublishOptions::default(),
                &payload,
                BasicProperties::default().with_delivery_mode(DELIVERY_MODE_PERSISTENT),
            )
            .await
            .map_err(transport)?
            .await
            .map_err(transport)?;

        debug!("sent task {}", task.id);
        Ok(())
    }
}

fn transport(err: lapin::Error) -> Error {
    Error::Transport(err.to_string())
}
