pub mod client;

/// An inbound publish on one of our command topics.
pub struct MqttMessage {
    pub topic: String,
    pub payload: String,
}

/// A retained value to publish under the device's topic (`state`, `battery`).
pub struct StateUpdate {
    pub suffix: &'static str,
    pub value: String,
}
