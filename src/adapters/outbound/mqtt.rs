use async_trait::async_trait;
use rumqttc::{
    AsyncClient, ConnectReturnCode, ConnectionError, Event, EventLoop, MqttOptions, Outgoing,
    Packet, QoS,
};
use std::time::Duration;
use tokio::sync::{watch, Mutex};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use super::topics::{snapshot_messages, TopicMessage};
use crate::common::{RegistrySnapshot, SimResult, SimulationError};
use crate::config::MqttConfig;
use crate::domains::SnapshotPublisher;

/// Publishes every tick's device state to an MQTT broker.
///
/// A tick is only handed to the client while the broker connection is up.
/// Ticks produced during an outage fail with a transport error instead of
/// piling up in the client's request queue.
pub struct MqttPublisher {
    client: AsyncClient,
    base_topic: String,
    retain: bool,
    connected: watch::Receiver<bool>,
    event_loop: Mutex<Option<JoinHandle<()>>>,
}

impl MqttPublisher {
    /// Connect and wait for the broker's CONNACK. The event loop keeps
    /// running on its own task afterwards, reconnecting on errors.
    pub async fn connect(config: &MqttConfig) -> SimResult<Self> {
        let mut options = MqttOptions::new(&config.client_id, &config.broker, config.port);
        options.set_keep_alive(Duration::from_secs(config.keep_alive_secs.max(5)));
        if !config.username.is_empty() {
            options.set_credentials(&config.username, &config.password);
        }

        let (client, mut event_loop) = AsyncClient::new(options, 1024);

        let connect_timeout = Duration::from_secs(config.connect_timeout_secs);
        match tokio::time::timeout(connect_timeout, wait_for_connack(&mut event_loop)).await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => return Err(e),
            Err(_) => {
                return Err(SimulationError::Transport(format!(
                    "Timeout while connecting to MQTT broker {}:{}",
                    config.broker, config.port
                )))
            }
        }

        info!(broker = %config.broker, port = config.port, "Connected to MQTT broker");

        let (connected_tx, connected) = watch::channel(true);
        let handle = tokio::spawn(drive_event_loop(event_loop, connected_tx));
        Ok(Self::from_parts(client, config, connected, Some(handle)))
    }

    fn from_parts(
        client: AsyncClient,
        config: &MqttConfig,
        connected: watch::Receiver<bool>,
        event_loop: Option<JoinHandle<()>>,
    ) -> Self {
        Self {
            client,
            base_topic: config.base_topic.clone(),
            retain: config.retain,
            connected,
            event_loop: Mutex::new(event_loop),
        }
    }

    pub fn is_connected(&self) -> bool {
        *self.connected.borrow()
    }

    fn ensure_connected(&self) -> SimResult<()> {
        if self.is_connected() {
            Ok(())
        } else {
            Err(SimulationError::Transport(
                "MQTT broker not connected, dropping tick".to_string(),
            ))
        }
    }

    /// Queue a whole tick without waiting on the client's request queue.
    fn send_all(&self, messages: Vec<TopicMessage>, retain: bool) -> SimResult<()> {
        self.ensure_connected()?;
        for message in messages {
            self.client
                .try_publish(message.topic, QoS::AtMostOnce, retain, message.payload)
                .map_err(|e| SimulationError::Transport(format!("Failed to publish: {}", e)))?;
        }
        Ok(())
    }
}

/// Connection state implied by one event loop poll, if it changes it.
fn connection_update(polled: &Result<Event, ConnectionError>) -> Option<bool> {
    match polled {
        Ok(Event::Incoming(Packet::ConnAck(ack))) => Some(ack.code == ConnectReturnCode::Success),
        Ok(Event::Outgoing(Outgoing::Disconnect)) => Some(false),
        Ok(_) => None,
        Err(_) => Some(false),
    }
}

async fn wait_for_connack(event_loop: &mut EventLoop) -> SimResult<()> {
    loop {
        match event_loop.poll().await {
            Ok(Event::Incoming(Packet::ConnAck(ack))) => {
                return if ack.code == ConnectReturnCode::Success {
                    Ok(())
                } else {
                    Err(SimulationError::Transport(format!(
                        "MQTT broker refused connection: {:?}",
                        ack.code
                    )))
                };
            }
            Ok(_) => {}
            Err(e) => {
                return Err(SimulationError::Transport(format!(
                    "Error while connecting to MQTT broker: {}",
                    e
                )))
            }
        }
    }
}

async fn drive_event_loop(mut event_loop: EventLoop, connected: watch::Sender<bool>) {
    loop {
        let polled = event_loop.poll().await;
        if let Some(up) = connection_update(&polled) {
            let changed = connected.send_replace(up) != up;
            if changed && up {
                info!("Reconnected to MQTT broker");
            }
        }

        match polled {
            Ok(Event::Outgoing(Outgoing::Disconnect)) => {
                debug!("MQTT event loop finished");
                break;
            }
            Ok(_) => {}
            Err(e) => {
                warn!(error = %e, "MQTT connection error, retrying");
                tokio::time::sleep(Duration::from_secs(1)).await;
            }
        }
    }
}

#[async_trait]
impl SnapshotPublisher for MqttPublisher {
    async fn publish(&self, snapshot: &RegistrySnapshot) -> SimResult<()> {
        let messages = snapshot_messages(&self.base_topic, snapshot)?;
        let count = messages.len();
        self.send_all(messages, self.retain)?;
        debug!(tick = snapshot.tick, messages = count, "Published snapshot");
        Ok(())
    }

    async fn clear_retained(&self, snapshot: &RegistrySnapshot) -> SimResult<()> {
        let messages = snapshot_messages(&self.base_topic, snapshot)?;
        info!(topics = messages.len(), "Clearing retained MQTT messages");
        let empty = messages
            .into_iter()
            .map(|message| TopicMessage {
                topic: message.topic,
                payload: String::new(),
            })
            .collect();
        self.send_all(empty, true)
    }

    async fn shutdown(&self) -> SimResult<()> {
        let result = self
            .client
            .disconnect()
            .await
            .map_err(|e| SimulationError::Transport(format!("Failed to disconnect: {}", e)));

        let handle = self.event_loop.lock().await.take();
        if let Some(mut handle) = handle {
            if tokio::time::timeout(Duration::from_secs(1), &mut handle)
                .await
                .is_err()
            {
                warn!("MQTT event loop did not stop in time");
                handle.abort();
            }
        }
        info!("Disconnected from MQTT broker");
        result
    }
}
