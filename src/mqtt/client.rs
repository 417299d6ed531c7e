use std::collections::HashMap;
use std::time::Duration;

use rumqttc::{AsyncClient, Event, EventLoop, Incoming, MqttOptions, QoS};
use tokio::sync::mpsc;
use tracing::{debug, error, info, warn};

use crate::config::Config;

use super::{MqttMessage, StateUpdate};

pub struct MqttClient {
    client: AsyncClient,
    eventloop: EventLoop,
    config: Config,
}

impl MqttClient {
    pub fn new(config: &Config) -> Self {
        let mut mqttopts = MqttOptions::new(
            &config.mqtt.client_id,
            &config.mqtt.broker_host,
            config.mqtt.broker_port,
        );
        mqttopts.set_keep_alive(Duration::from_secs(30));

        if let (Some(user), Some(pass)) = (&config.mqtt.username, &config.mqtt.password) {
            mqttopts.set_credentials(user, pass);
        }

        // LWT: the broker flips bridge_status to "offline" if we drop off.
        let lwt = rumqttc::LastWill::new(
            config.device_status_topic(),
            "offline".as_bytes().to_vec(),
            QoS::AtLeastOnce,
            true,
        );
        mqttopts.set_last_will(lwt);

        let (client, eventloop) = AsyncClient::new(mqttopts, 100);

        Self {
            client,
            eventloop,
            config: config.clone(),
        }
    }

    /// Run the MQTT event loop. Subscribes to the command topic on connect,
    /// forwards incoming publish messages through command_tx, and publishes
    /// state updates received from state_rx.
    pub async fn run(
        mut self,
        command_tx: mpsc::Sender<MqttMessage>,
        mut state_rx: mpsc::Receiver<StateUpdate>,
    ) {
        let status_topic = self.config.device_status_topic();
        let command_topic = self.config.device_command_topic();
        let mut last_values: HashMap<&'static str, String> = HashMap::new();

        loop {
            tokio::select! {
                event = self.eventloop.poll() => {
                    match event {
                        Ok(Event::Incoming(Incoming::ConnAck(_))) => {
                            info!("Connected to MQTT broker");
                            if let Err(e) = self
                                .client
                                .publish(&status_topic, QoS::AtLeastOnce, true, "online")
                                .await
                            {
                                error!("Failed to publish online status: {}", e);
                            }
                            if let Err(e) = self
                                .client
                                .subscribe(&command_topic, QoS::AtLeastOnce)
                                .await
                            {
                                error!("Failed to subscribe to {}: {}", command_topic, e);
                            }
                            // republish everything after a reconnect
                            last_values.clear();
                        }
                        Ok(Event::Incoming(Incoming::Publish(publish))) => {
                            let msg = MqttMessage {
                                topic: publish.topic.clone(),
                                payload: String::from_utf8_lossy(&publish.payload).to_string(),
                            };
                            if command_tx.send(msg).await.is_err() {
                                warn!("Command channel closed");
                            }
                        }
                        Ok(_) => {}
                        Err(e) => {
                            error!("MQTT connection error: {}. Reconnecting...", e);
                            tokio::time::sleep(Duration::from_secs(5)).await;
                        }
                    }
                }
                Some(update) = state_rx.recv() => {
                    if last_values.get(update.suffix) == Some(&update.value) {
                        continue;
                    }
                    let topic = self.config.device_state_topic(update.suffix);
                    debug!("Publishing {}: {}", topic, update.value);
                    if let Err(e) = self
                        .client
                        .publish(&topic, QoS::AtMostOnce, true, update.value.as_bytes())
                        .await
                    {
                        warn!("Failed to publish {}: {}", topic, e);
                        continue;
                    }
                    last_values.insert(update.suffix, update.value);
                }
            }
        }
    }
}
