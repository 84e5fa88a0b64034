//! AMQP manual-ack consumer for task messages.

use std::collections::HashMap;

use async_trait::async_trait;
use futures::StreamExt;
use lapin::acker::Acker;
use lapin::message::Delivery;
use lapin::options::{
    BasicAckOptions, BasicConsumeOptions, BasicNackOptions, QueueDeclareOptions,
};
use lapin::types::FieldTable;
use lapin::{Channel, Connection, ConnectionProperties};
use prost::Message;
use tokio::sync::{mpsc, Mutex, Notify};
use tracing::{debug, info, warn};

use common::pb::datatypes::Task;
use common::{Error, Result};

use super::Broker;

const CONSUMER_TAG: &str = "mrq-worker";

pub struct AmqpConsumer {
    // The connection must outlive the channel.
    _connection: Connection,
    channel: Channel,
    queue_name: String,

    /// Delivery handles of in-flight tasks, keyed by task id.
    ackers: Mutex<HashMap<String, Acker>>,

    /// Receiving half of the task stream, parked here by `listen` until
    /// the runner claims it through `tasks`.
    stream: Mutex<Option<mpsc::UnboundedReceiver<Task>>>,

    /// Signalled by `listen` once the stream is in place.
    listening: Notify,
}

impl AmqpConsumer {
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
        info!("connected to broker, consuming from `{queue_name}`");

        Ok(AmqpConsumer {
            _connection: connection,
            channel,
            queue_name: queue_name.to_string(),
            ackers: Mutex::new(HashMap::new()),
            stream: Mutex::new(None),
            listening: Notify::new(),
        })
    }

    async fn take_acker(&self, task_id: &str) -> Result<Acker> {
        self.ackers
            .lock()
            .await
            .remove(task_id)
            .ok_or_else(|| Error::UnknownTag(task_id.to_string()))
    }
}

#[async_trait]
impl Broker for AmqpConsumer {
    async fn listen(&self) -> Result<()> {
        let (tx, rx) = mpsc::unbounded_channel();
        *self.stream.lock().await = Some(rx);
        // A stored permit lets a waiter that arrives later pass through.
        self.listening.notify_one();

        let mut consumer = self
            .channel
            .basic_consume(
                &self.queue_name,
                CONSUMER_TAG,
                BasicConsumeOptions::default(),
                FieldTable::default(),
            )
            .await
            .map_err(transport)?;

        while let Some(delivery) = consumer.next().await {
            let Delivery {
                delivery_tag,
                data,
                acker,
                ..
            } = delivery.map_err(transport)?;

            let task = Task::decode(data.as_slice())?;
            debug!("got task {} with delivery tag {delivery_tag}", task.id);

            self.ackers.lock().await.insert(task.id.clone(), acker);
            if tx.send(task).is_err() {
                // The runner is gone; stop consuming.
                break;
            }
        }

        Ok(())
    }

    async fn wait_until_listening(&self) {
        self.listening.notified().await;
    }

    async fn tasks(&self) -> Result<mpsc::UnboundedReceiver<Task>> {
        self.stream
            .lock()
            .await
            .take()
            .ok_or_else(|| Error::Internal("the broker is not listening".to_string()))
    }

    async fn done(&self, task: &Task) -> Result<()> {
        let acker = self.take_acker(&task.id).await?;
        acker.ack(BasicAckOptions::default()).await.map_err(|err| {
            warn!("can't ack task {}: {err}", task.id);
            Error::AckFailure(task.id.clone())
        })
    }

    async fn failed(&self, task: &Task) -> Result<()> {
        let acker = self.take_acker(&task.id).await?;
        acker
            .nack(BasicNackOptions {
                requeue: true,
                ..Default::default()
            })
            .await
            .map_err(|err| {
                warn!("can't nack task {}: {err}", task.id);
                Error::AckFailure(task.id.clone())
            })
    }
}

fn transport(err: lapin::Error) -> Error {
    Error::Transport(err.to_string())
}
