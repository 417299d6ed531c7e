pub mod client;

use std::time::Duration;

use async_trait::async_trait;
use serde_json::Value;
use tokio::sync::{mpsc, oneshot};

use crate::error::TransportError;

const SEND_TIMEOUT: Duration = Duration::from_secs(10);

/// Outcome of one status query: the decoded JSON payload (normally
/// `{"dps": {...}}`) or the reason the session could not deliver it.
pub type PollResult = Result<Value, TransportError>;

/// A write for the Tuya session (dp_id → JSON value), acknowledged once the
/// device accepted or rejected it.
pub struct DpCommand {
    pub dps: Value,
    pub resp_tx: oneshot::Sender<Result<(), TransportError>>,
}

impl DpCommand {
    /// The sender stopped waiting (timed out or dropped); the write must not reach the device.
    pub fn is_abandoned(&self) -> bool {
        self.resp_tx.is_closed()
    }
}

/// Something that can push a single dps write to the device.
#[async_trait]
pub trait DpsTransport: Send + Sync {
    async fn send(&self, field_code: u32, value: Value) -> Result<(), TransportError>;
}

/// Hands writes to the running session task over a channel.
#[derive(Clone)]
pub struct SessionHandle {
    cmd_tx: mpsc::Sender<DpCommand>,
}

impl SessionHandle {
    pub fn new(cmd_tx: mpsc::Sender<DpCommand>) -> Self {
        Self { cmd_tx }
    }
}

#[async_trait]
impl DpsTransport for SessionHandle {
    async fn send(&self, field_code: u32, value: Value) -> Result<(), TransportError> {
        let mut dps = serde_json::Map::new();
        dps.insert(field_code.to_string(), value);

        let (resp_tx, resp_rx) = oneshot::channel();
        self.cmd_tx
            .send(DpCommand {
                dps: Value::Object(dps),
                resp_tx,
            })
            .await
            .map_err(|_| TransportError::ChannelClosed)?;

        match tokio::time::timeout(SEND_TIMEOUT, resp_rx).await {
            Ok(Ok(result)) => result,
            Ok(Err(_)) => Err(TransportError::ChannelClosed),
            Err(_) => Err(TransportError::Timeout(SEND_TIMEOUT.as_millis() as u64)),
        }
    }
}
