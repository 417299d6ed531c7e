mod config;
mod error;
mod mqtt;
mod tuya;
mod vacuum;

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc;
use tracing::{error, info, warn};

use crate::mqtt::StateUpdate;
use crate::vacuum::{Intent, Vacuum};

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let config = match config::Config::from_env() {
        Ok(c) => c,
        Err(e) => {
            error!("Configuration error: {}", e);
            std::process::exit(1);
        }
    };

    info!(
        "Starting proscenic-to-mqtt bridge (mqtt={}:{}, vacuum={} at {}, remember_fan_speed={})",
        config.mqtt.broker_host,
        config.mqtt.broker_port,
        config.vacuum.name,
        config.vacuum.ip,
        config.vacuum.remember_fan_speed,
    );

    // Channels
    let (mqtt_cmd_tx, mut mqtt_cmd_rx) = mpsc::channel::<mqtt::MqttMessage>(100);
    let (state_tx, state_rx) = mpsc::channel::<StateUpdate>(50);
    let (status_tx, mut status_rx) = mpsc::channel::<tuya::PollResult>(50);
    let (dp_cmd_tx, dp_cmd_rx) = mpsc::channel::<tuya::DpCommand>(50);

    // MQTT event loop (handles both MQTT I/O and state publishing)
    let mqtt_client = mqtt::client::MqttClient::new(&config);
    let mqtt_handle = tokio::spawn(async move {
        mqtt_client.run(mqtt_cmd_tx, state_rx).await;
    });

    // Tuya session for the vacuum
    let poll_interval = Duration::from_secs(config.tuya.poll_interval_secs);
    let client = tuya::client::TuyaClient::new(config.vacuum.clone());
    let device_handle = tokio::spawn(async move {
        client.run(status_tx, dp_cmd_rx, poll_interval).await;
    });

    let mut vacuum = Vacuum::new(
        config.vacuum.name.clone(),
        Arc::new(tuya::SessionHandle::new(dp_cmd_tx)),
        config.vacuum.remember_fan_speed,
        config.vacuum.restore_delay,
        config.vacuum.enable_debug,
    );
    let topic_prefix = config.mqtt.topic_prefix.clone();
    let topic_name = config.vacuum.topic_name.clone();

    let mut sigterm = match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
        Ok(s) => s,
        Err(e) => {
            error!("Failed to register SIGTERM handler: {}", e);
            std::process::exit(1);
        }
    };

    // Main loop: fold device status into the snapshot, route MQTT commands, handle shutdown
    loop {
        tokio::select! {
            Some(result) = status_rx.recv() => {
                vacuum.apply_poll(result);
                publish_state(&vacuum, &state_tx).await;
            }
            Some(msg) = mqtt_cmd_rx.recv() => {
                // Parse topic: {prefix}/{topic_name}/command/{action}
                let Some((name, action)) = parse_command_topic(&msg.topic, &topic_prefix) else {
                    continue;
                };
                if name != topic_name {
                    warn!("Unknown device in command topic: {}", name);
                    continue;
                }
                match Intent::parse(action, &msg.payload) {
                    Some(intent) => {
                        // failures are logged by the sequencer
                        let _ = vacuum.handle(intent).await;
                        publish_state(&vacuum, &state_tx).await;
                    }
                    None => warn!("Could not build command: action={}, payload={}", action, msg.payload),
                }
            }
            _ = tokio::signal::ctrl_c() => {
                info!("Received SIGINT, shutting down");
                break;
            }
            _ = sigterm.recv() => {
                info!("Received SIGTERM, shutting down");
                break;
            }
        }
    }

    // Cleanup
    device_handle.abort();
    mqtt_handle.abort();
    info!("proscenic-to-mqtt bridge stopped");
}

async fn publish_state(vacuum: &Vacuum, state_tx: &mpsc::Sender<StateUpdate>) {
    let snapshot = vacuum.snapshot();
    let state = match serde_json::to_string(&snapshot) {
        Ok(s) => s,
        Err(e) => {
            error!("Failed to serialize state of {}: {}", vacuum.name(), e);
            return;
        }
    };

    let updates = [
        StateUpdate {
            suffix: "state",
            value: state,
        },
        StateUpdate {
            suffix: "battery",
            value: snapshot.battery.to_string(),
        },
    ];
    for update in updates {
        if state_tx.send(update).await.is_err() {
            warn!("State update channel closed");
            return;
        }
    }
}

/// Parse a command topic into (topic_name, action).
/// Expected format: {prefix}/{topic_name}/command/{action}
fn parse_command_topic<'a>(topic: &'a str, prefix: &str) -> Option<(&'a str, &'a str)> {
    let rest = topic.strip_prefix(prefix)?.strip_prefix('/')?;
    // rest = "{topic_name}/command/{action}"
    let (topic_name, rest) = rest.split_once('/')?;
    let action = rest.strip_prefix("command/")?;
    if topic_name.is_empty() || action.is_empty() {
        return None;
    }
    Some((topic_name, action))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn command_topics() {
        assert_eq!(
            parse_command_topic("proscenic/living_room/command/set_fan_speed", "proscenic"),
            Some(("living_room", "set_fan_speed"))
        );
        assert_eq!(
            parse_command_topic("proscenic/living_room/state", "proscenic"),
            None
        );
        assert_eq!(parse_command_topic("other/x/command/start", "proscenic"), None);
        assert_eq!(parse_command_topic("proscenic//command/start", "proscenic"), None);
        assert_eq!(parse_command_topic("proscenic/x/command/", "proscenic"), None);
    }

    #[tokio::test]
    async fn state_after_command_carries_sequencer_fields() {
        let rec = Arc::new(crate::vacuum::testing::Recorder::default());
        let mut vacuum = Vacuum::new("Proscenic 850T Vacuum", rec, true, Duration::from_secs(6), false);
        let (state_tx, mut state_rx) = mpsc::channel(4);

        vacuum.handle(Intent::SetFanSpeed("strong".into())).await.unwrap();
        vacuum.handle(Intent::Start).await.unwrap();
        publish_state(&vacuum, &state_tx).await;

        let update = state_rx.recv().await.unwrap();
        assert_eq!(update.suffix, "state");
        let state: serde_json::Value = serde_json::from_str(&update.value).unwrap();
        assert_eq!(state["last_cleaning_command"], "smart");
        assert_eq!(state["remembered_fan_speed"], "strong");

        let battery = state_rx.recv().await.unwrap();
        assert_eq!(battery.suffix, "battery");
        assert_eq!(battery.value, "-1");
    }
}
