use std::time::Duration;

use rust_async_tuyapi::mesparse::CommandType;
use rust_async_tuyapi::tuyadevice::TuyaDevice;
use rust_async_tuyapi::{Payload, PayloadStruct};
use serde_json::{Value, json};
use tokio::sync::mpsc;
use tracing::{debug, error, info, warn};

use crate::config::VacuumConfig;
use crate::error::TransportError;

use super::{DpCommand, PollResult};

pub struct TuyaClient {
    config: VacuumConfig,
}

impl TuyaClient {
    pub fn new(config: VacuumConfig) -> Self {
        Self { config }
    }

    /// Main device loop. Connects, polls, handles commands, reconnects on failure.
    /// Every session failure is reported as a failed poll.
    pub async fn run(
        &self,
        status_tx: mpsc::Sender<PollResult>,
        mut cmd_rx: mpsc::Receiver<DpCommand>,
        poll_interval: Duration,
    ) {
        let mut backoff = Duration::from_secs(5);
        let max_backoff = Duration::from_secs(60);

        loop {
            info!(
                "Connecting to device {} ({}) at {}",
                self.config.name, self.config.id, self.config.ip
            );

            match self.run_session(&status_tx, &mut cmd_rx, poll_interval).await {
                Ok(()) => {
                    info!("Device {} session ended cleanly", self.config.name);
                    backoff = Duration::from_secs(5);
                }
                Err(e) => {
                    error!(
                        "Device {} session error: {}. Reconnecting in {:?}",
                        self.config.name, e, backoff
                    );
                    if status_tx.send(Err(e)).await.is_err() {
                        warn!("Status channel closed, stopping device task");
                        return;
                    }
                    self.sleep_rejecting_commands(&mut cmd_rx, backoff).await;
                    backoff = (backoff * 2).min(max_backoff);
                }
            }
        }
    }

    /// Waits out the reconnect backoff. Writes that arrive meanwhile fail
    /// right away instead of piling up until the device is back.
    async fn sleep_rejecting_commands(&self, cmd_rx: &mut mpsc::Receiver<DpCommand>, backoff: Duration) {
        let sleep = tokio::time::sleep(backoff);
        tokio::pin!(sleep);
        loop {
            tokio::select! {
                _ = &mut sleep => return,
                Some(cmd) = cmd_rx.recv() => {
                    let _ = cmd.resp_tx.send(Err(TransportError::ConnectionFailed(
                        format!("{} is offline", self.config.name),
                    )));
                }
            }
        }
    }

    async fn run_session(
        &self,
        status_tx: &mpsc::Sender<PollResult>,
        cmd_rx: &mut mpsc::Receiver<DpCommand>,
        poll_interval: Duration,
    ) -> Result<(), TransportError> {
        let mut device = TuyaDevice::new("3.3", &self.config.id, Some(&self.config.key), self.config.ip)
            .map_err(|e| TransportError::ConnectionFailed(format!("Failed to create device: {e:?}")))?;

        let mut receiver = device
            .connect()
            .await
            .map_err(|e| TransportError::ConnectionFailed(format!("Failed to connect: {e:?}")))?;

        info!("Connected to device {}", self.config.name);

        // Initial DP query
        self.query_all_dps(&mut device).await?;

        let mut heartbeat_interval = tokio::time::interval(Duration::from_secs(10));
        let mut poll_timer = tokio::time::interval(poll_interval);
        // Skip first tick (we already queried)
        poll_timer.tick().await;

        loop {
            tokio::select! {
                _ = heartbeat_interval.tick() => {
                    device.heartbeat().await
                        .map_err(|e| TransportError::ConnectionFailed(format!("Heartbeat failed: {e:?}")))?;
                }
                _ = poll_timer.tick() => {
                    if self.config.enable_debug {
                        warn!("About to check the status");
                    }
                    self.query_all_dps(&mut device).await?;
                }
                msg = receiver.recv() => {
                    match msg {
                        Some(Ok(messages)) => {
                            for m in messages {
                                if m.command == Some(CommandType::HeartBeat) {
                                    continue;
                                }
                                let Some(result) = self.poll_result(&m) else {
                                    continue;
                                };
                                if status_tx.send(result).await.is_err() {
                                    warn!("Status channel closed");
                                    return Ok(());
                                }
                            }
                        }
                        Some(Err(e)) => {
                            return Err(TransportError::ConnectionFailed(format!("Device error: {e:?}")));
                        }
                        None => {
                            return Err(TransportError::ConnectionFailed("Device channel closed".into()));
                        }
                    }
                }
                Some(cmd) = cmd_rx.recv() => {
                    if cmd.is_abandoned() {
                        debug!("Dropping timed-out command for {}: {}", self.config.name, cmd.dps);
                        continue;
                    }
                    info!("Sending command to {}: {}", self.config.name, cmd.dps);
                    let result = device
                        .set_values(cmd.dps.clone())
                        .await
                        .map_err(|e| TransportError::Send(format!("{e:?}")));
                    if let Err(e) = &result {
                        warn!("Failed to send command to {}: {}", self.config.name, e);
                    }
                    let _ = cmd.resp_tx.send(result);
                }
            }
        }
    }

    async fn query_all_dps(&self, device: &mut TuyaDevice) -> Result<(), TransportError> {
        let payload = Payload::Struct(PayloadStruct {
            dev_id: self.config.id.clone(),
            gw_id: Some(self.config.id.clone()),
            uid: None,
            t: None,
            dp_id: None,
            dps: Some(json!({})),
        });

        device
            .get(payload)
            .await
            .map_err(|e| TransportError::Query(format!("{e:?}")))
    }

    /// Turns a device message into a poll result.
    ///
    /// Replies to our status query always produce one, so a reply without dps
    /// shows up as a failed poll. Unsolicited messages without dps are dropped.
    fn poll_result(&self, msg: &rust_async_tuyapi::mesparse::Message) -> Option<PollResult> {
        // rust-async-tuyapi sometimes returns DP query responses as Payload::String
        // containing JSON like {"dps":{"1":true,"2":21,...}} instead of Payload::Struct.
        let payload: Option<Value> = match &msg.payload {
            Payload::Struct(ps) => {
                debug!("PayloadStruct: dev_id={}, dps={:?}", ps.dev_id, ps.dps);
                ps.dps.clone().map(|dps| json!({ "dps": dps }))
            }
            Payload::String(s) => {
                debug!("Payload::String, attempting JSON parse");
                serde_json::from_str::<Value>(s).ok()
            }
            Payload::Raw(b) => {
                debug!("Payload::Raw ({} bytes), skipping", b.len());
                None
            }
            _ => None,
        };

        let has_dps = payload
            .as_ref()
            .is_some_and(|p| p.get("dps").is_some_and(Value::is_object));

        if has_dps {
            if self.config.enable_debug {
                warn!("Status returned control back");
            }
            return payload.map(Ok);
        }

        if msg.command == Some(CommandType::DpQuery) {
            if self.config.enable_debug {
                warn!("'dps' was not included in the status");
            }
            return Some(Err(TransportError::MissingDps));
        }

        debug!("No dps in message, skipping");
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_async_tuyapi::mesparse::Message;

    fn client() -> TuyaClient {
        TuyaClient::new(VacuumConfig {
            id: "bf3e1a2b3c4d5e6f7a8b9c".into(),
            key: "0123456789abcdef".into(),
            ip: "192.168.1.40".parse().unwrap(),
            name: "Proscenic 850T Vacuum".into(),
            topic_name: "proscenic_850t_vacuum".into(),
            remember_fan_speed: false,
            restore_delay: Duration::from_secs(6),
            enable_debug: false,
        })
    }

    fn dps_struct(dps: Option<Value>) -> Payload {
        Payload::Struct(PayloadStruct {
            dev_id: "bf3e1a2b3c4d5e6f7a8b9c".into(),
            gw_id: None,
            uid: None,
            t: None,
            dp_id: None,
            dps,
        })
    }

    #[test]
    fn status_push_with_dps() {
        let msg = Message::new(dps_struct(Some(json!({"38": 5, "39": 80}))), CommandType::Status);
        assert_eq!(
            client().poll_result(&msg),
            Some(Ok(json!({"dps": {"38": 5, "39": 80}})))
        );
    }

    #[test]
    fn query_reply_as_json_string() {
        let msg = Message::new(
            Payload::String(r#"{"devId":"x","dps":{"11":0}}"#.into()),
            CommandType::DpQuery,
        );
        let result = client().poll_result(&msg).unwrap().unwrap();
        assert_eq!(result["dps"], json!({"11": 0}));
    }

    #[test]
    fn query_reply_without_dps_fails_the_poll() {
        let msg = Message::new(dps_struct(None), CommandType::DpQuery);
        assert_eq!(client().poll_result(&msg), Some(Err(TransportError::MissingDps)));

        let msg = Message::new(Payload::String("not json".into()), CommandType::DpQuery);
        assert_eq!(client().poll_result(&msg), Some(Err(TransportError::MissingDps)));
    }

    #[test]
    fn unsolicited_message_without_dps_is_skipped() {
        let msg = Message::new(dps_struct(None), CommandType::Status);
        assert_eq!(client().poll_result(&msg), None);

        let msg = Message::new(Payload::Raw(vec![0, 1, 2]), CommandType::Control);
        assert_eq!(client().poll_result(&msg), None);
    }
}
