use serde_json::Value;

/// A command requested by the home-automation side.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Intent {
    Start,
    Pause,
    Stop,
    ReturnToBase,
    CleanSpot,
    SetCleaningMode(String),
    SetFanSpeed(String),
    SetWaterSpeed(String),
    RemoteControl(String),
}

impl Intent {
    /// Builds an intent from the action segment of a command topic and the
    /// message payload.
    ///
    /// Arguments may be sent bare (`strong`), as a JSON string (`"strong"`)
    /// or as a service-call object (`{"water_speed": "Big"}`).
    pub fn parse(action: &str, payload: &str) -> Option<Self> {
        let intent = match action {
            "start" => Intent::Start,
            "pause" => Intent::Pause,
            "stop" => Intent::Stop,
            "return_to_base" => Intent::ReturnToBase,
            "clean_spot" => Intent::CleanSpot,
            "set_cleaning_mode" => Intent::SetCleaningMode(argument(payload, "cleaning_mode")?),
            "set_fan_speed" => Intent::SetFanSpeed(argument(payload, "fan_speed")?),
            "set_water_speed" => Intent::SetWaterSpeed(argument(payload, "water_speed")?),
            "remote_control" => Intent::RemoteControl(argument(payload, "direction")?),
            _ => return None,
        };
        Some(intent)
    }

    pub fn action(&self) -> &'static str {
        match self {
            Intent::Start => "start",
            Intent::Pause => "pause",
            Intent::Stop => "stop",
            Intent::ReturnToBase => "return_to_base",
            Intent::CleanSpot => "clean_spot",
            Intent::SetCleaningMode(_) => "set_cleaning_mode",
            Intent::SetFanSpeed(_) => "set_fan_speed",
            Intent::SetWaterSpeed(_) => "set_water_speed",
            Intent::RemoteControl(_) => "remote_control",
        }
    }
}

fn argument(payload: &str, key: &str) -> Option<String> {
    let payload = payload.trim();
    let value = match serde_json::from_str::<Value>(payload) {
        Ok(Value::String(s)) => s,
        Ok(Value::Object(map)) => map.get(key)?.as_str()?.to_string(),
        _ => payload.to_string(),
    };
    let value = value.trim();
    (!value.is_empty()).then(|| value.to_string())
}
