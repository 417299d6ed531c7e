//! Device snapshot and the reducer that folds dps payloads into it.

use std::collections::BTreeMap;

use serde_json::{Map, Value, json};
use tracing::{debug, warn};

use crate::error::TransportError;

use super::fields::{Activity, FanSpeed, FaultFlags, Field, FieldValue, OperatingState, WaterSpeed};

pub const ATTR_CLEANED_AREA: &str = "cleaned_area";
pub const ATTR_CLEANING_TIME: &str = "cleaning_time";
pub const ATTR_MOP_EQUIPPED: &str = "mop_equipped";
pub const ATTR_ERROR: &str = "error";
pub const ATTR_DEVICE_MODEL: &str = "device_model";
pub const ATTR_RESET_FILTER: &str = "reset_filter";
pub const ATTR_FILTER_HEALTH: &str = "filter_health";
pub const ATTR_SIDE_BRUSH_HEALTH: &str = "side_brush_health";
pub const ATTR_BRUSH_HEALTH: &str = "brush_health";
pub const ATTR_SENSOR_HEALTH: &str = "sensor_health";
pub const ATTR_WATER_SPEED: &str = "water_speed";
pub const ATTR_WATER_SPEED_LIST: &str = "water_speed_list";

/// Last known state of the robot.
#[derive(Debug, Clone, PartialEq)]
pub struct DeviceState {
    operating_state: Option<OperatingState>,
    fault: FaultFlags,
    fan_speed: FanSpeed,
    water_speed: WaterSpeed,
    attributes: BTreeMap<String, Value>,
    available: bool,
}

impl Default for DeviceState {
    fn default() -> Self {
        Self {
            operating_state: None,
            fault: FaultFlags::NO_ERROR,
            fan_speed: FanSpeed::Normal,
            water_speed: WaterSpeed::Medium,
            attributes: BTreeMap::new(),
            available: false,
        }
    }
}

impl DeviceState {
    pub fn new() -> Self {
        Self::default()
    }

    /// Derived on every call. A fault always wins over the operating state;
    /// `None` means the robot has not reported an operating state yet.
    pub fn activity(&self) -> Option<Activity> {
        if !self.fault.is_empty() {
            return Some(Activity::Error);
        }
        self.operating_state.map(OperatingState::activity)
    }

    pub fn operating_state(&self) -> Option<OperatingState> {
        self.operating_state
    }

    pub fn fault(&self) -> FaultFlags {
        self.fault
    }

    pub fn fan_speed(&self) -> FanSpeed {
        self.fan_speed
    }

    pub fn water_speed(&self) -> WaterSpeed {
        self.water_speed
    }

    pub fn attributes(&self) -> &BTreeMap<String, Value> {
        &self.attributes
    }

    pub fn available(&self) -> bool {
        self.available
    }
}

/// Battery percentage, `-1` until the robot reports it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BatteryState {
    level: i64,
}

impl BatteryState {
    pub const UNKNOWN: i64 = -1;

    pub fn level(&self) -> i64 {
        self.level
    }
}

impl Default for BatteryState {
    fn default() -> Self {
        Self {
            level: Self::UNKNOWN,
        }
    }
}

/// Folds poll results into a [`DeviceState`] and [`BatteryState`].
///
/// Nothing in here returns an error: a field that cannot be decoded is
/// skipped and the rest of the payload still applies.
#[derive(Debug, Clone, Copy, Default)]
pub struct StatusReducer {
    verbose: bool,
}

impl StatusReducer {
    pub fn new(verbose: bool) -> Self {
        Self { verbose }
    }

    /// Applies one poll outcome. Failures mark the device unavailable and keep
    /// the last known values.
    pub fn update(
        &self,
        state: &mut DeviceState,
        battery: &mut BatteryState,
        result: Result<Value, TransportError>,
    ) {
        let outcome = result.and_then(|payload| match payload.get("dps") {
            Some(Value::Object(dps)) => Ok(dps.clone()),
            _ => Err(TransportError::MissingDps),
        });

        match outcome {
            Ok(dps) => self.apply(state, battery, &dps),
            Err(e) => {
                warn!("Status poll failed: {}", e);
                state.available = false;
            }
        }
    }

    pub fn apply(&self, state: &mut DeviceState, battery: &mut BatteryState, dps: &Map<String, Value>) {
        if self.verbose {
            warn!("Parsing status fields: {:?}", dps.keys().collect::<Vec<_>>());
        }

        for (key, raw) in dps {
            let decoded = key
                .parse::<Field>()
                .and_then(|field| FieldValue::decode(field, raw));

            match decoded {
                Ok(value) => apply_value(state, battery, value),
                Err(e) => {
                    if self.verbose {
                        warn!("Skipping dps {}={}: {}", key, raw, e);
                    } else {
                        debug!("Skipping dps {}={}: {}", key, raw, e);
                    }
                }
            }
        }

        state.available = true;
    }
}

fn apply_value(state: &mut DeviceState, battery: &mut BatteryState, value: FieldValue) {
    let attrs = &mut state.attributes;
    match value {
        // echoes of our own writes
        FieldValue::Power(_) | FieldValue::CleaningMode(_) | FieldValue::Direction(_) => {}
        // TODO: expose the clean record once its payload layout is decoded
        FieldValue::CleanRecord(_) => {}
        FieldValue::Fault(fault) => {
            state.fault = fault;
            if fault.is_empty() {
                attrs.remove(ATTR_ERROR);
            } else {
                attrs.insert(ATTR_ERROR.to_string(), json!(fault.name()));
            }
        }
        FieldValue::FanSpeed(speed) => state.fan_speed = speed,
        FieldValue::OperatingState(op) => state.operating_state = Some(op),
        FieldValue::Battery(level) => battery.level = level,
        FieldValue::CleanArea(v) => {
            attrs.insert(ATTR_CLEANED_AREA.to_string(), v);
        }
        FieldValue::CleanTime(v) => {
            attrs.insert(ATTR_CLEANING_TIME.to_string(), json!(v));
        }
        FieldValue::MopEquipped(v) => {
            attrs.insert(ATTR_MOP_EQUIPPED.to_string(), json!(v));
        }
        FieldValue::SensorHealth(v) => {
            attrs.insert(ATTR_SENSOR_HEALTH.to_string(), json!(v));
        }
        FieldValue::FilterHealth(v) => {
            attrs.insert(ATTR_FILTER_HEALTH.to_string(), json!(v));
        }
        FieldValue::SideBrushHealth(v) => {
            attrs.insert(ATTR_SIDE_BRUSH_HEALTH.to_string(), json!(v));
        }
        FieldValue::BrushHealth(v) => {
            attrs.insert(ATTR_BRUSH_HEALTH.to_string(), json!(v));
        }
        FieldValue::ResetFilter(v) => {
            attrs.insert(ATTR_RESET_FILTER.to_string(), v);
        }
        FieldValue::DeviceModel(v) => {
            attrs.insert(ATTR_DEVICE_MODEL.to_string(), v);
        }
        FieldValue::WaterSpeed(speed) => {
            state.water_speed = speed;
            attrs.insert(ATTR_WATER_SPEED.to_string(), json!(speed.as_str()));
            attrs.insert(ATTR_WATER_SPEED_LIST.to_string(), json!(WaterSpeed::values()));
        }
    }
}
