//! Field registry and codec for the 850T dps payload.
//!
//! Every status or command exchanged with the robot is a `(code, value)` pair.
//! This module knows which codes exist, which of them accept writes, and the
//! closed value domain of every settable field.

use std::fmt;
use std::str::FromStr;

use serde::{Serialize, Serializer};
use serde_json::{Value, json};

use crate::error::DecodeError;

/// Whether a field is only reported by the device or also accepts writes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Access {
    ReadOnly,
    ReadWrite,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Field {
    Power,
    Fault,
    CleaningMode,
    DirectionControl,
    FanSpeed,
    CurrentState,
    Battery,
    CleanRecord,
    CleanArea,
    CleanTime,
    SensorHealth,
    FilterHealth,
    SideBrushHealth,
    BrushHealth,
    SweepOrMop,
    ResetFilter,
    DeviceModel,
    WaterSpeed,
}

impl Field {
    pub const ALL: [Field; 18] = [
        Field::Power,
        Field::Fault,
        Field::CleaningMode,
        Field::DirectionControl,
        Field::FanSpeed,
        Field::CurrentState,
        Field::Battery,
        Field::CleanRecord,
        Field::CleanArea,
        Field::CleanTime,
        Field::SensorHealth,
        Field::FilterHealth,
        Field::SideBrushHealth,
        Field::BrushHealth,
        Field::SweepOrMop,
        Field::ResetFilter,
        Field::DeviceModel,
        Field::WaterSpeed,
    ];

    /// Numeric dps identifier used on the wire.
    pub const fn code(self) -> u32 {
        match self {
            Field::Power => 1,
            Field::Fault => 11,
            Field::CleaningMode => 25,
            Field::DirectionControl => 26,
            Field::FanSpeed => 27,
            Field::CurrentState => 38,
            Field::Battery => 39,
            Field::CleanRecord => 40,
            Field::CleanArea => 41,
            Field::CleanTime => 42,
            Field::SensorHealth => 44,
            Field::FilterHealth => 45,
            Field::SideBrushHealth => 47,
            Field::BrushHealth => 48,
            Field::SweepOrMop => 49,
            Field::ResetFilter => 52,
            Field::DeviceModel => 58,
            Field::WaterSpeed => 60,
        }
    }

    pub const fn access(self) -> Access {
        match self {
            Field::Power
            | Field::CleaningMode
            | Field::DirectionControl
            | Field::FanSpeed
            | Field::WaterSpeed => Access::ReadWrite,
            _ => Access::ReadOnly,
        }
    }

    pub fn is_writable(self) -> bool {
        self.access() == Access::ReadWrite
    }

    pub fn from_code(code: u32) -> Result<Self, DecodeError> {
        Self::ALL
            .iter()
            .copied()
            .find(|f| f.code() == code)
            .ok_or_else(|| DecodeError::UnknownField(code.to_string()))
    }
}

/// Parses the string keys of a dps object (`"38"`).
impl FromStr for Field {
    type Err = DecodeError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let code: u32 = s
            .trim()
            .parse()
            .map_err(|_| DecodeError::UnknownField(s.to_string()))?;
        Self::from_code(code)
    }
}

/// Declares a closed enumeration of wire strings belonging to one field.
macro_rules! wire_enum {
    (
        $(#[$meta:meta])*
        $name:ident for $field:ident {
            $($variant:ident = $wire:literal),+ $(,)?
        }
    ) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
        pub enum $name {
            $($variant),+
        }

        impl $name {
            pub const ALL: &'static [$name] = &[$($name::$variant),+];

            /// Raw value as the device expects it.
            pub const fn as_str(self) -> &'static str {
                match self {
                    $($name::$variant => $wire),+
                }
            }

            /// All raw values, in declaration order.
            pub fn values() -> Vec<&'static str> {
                Self::ALL.iter().map(|v| v.as_str()).collect()
            }
        }

        impl FromStr for $name {
            type Err = DecodeError;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                Self::ALL
                    .iter()
                    .copied()
                    .find(|v| v.as_str() == s)
                    .ok_or_else(|| DecodeError::UnknownValue {
                        field: Field::$field,
                        value: s.to_string(),
                    })
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(self.as_str())
            }
        }

        impl Serialize for $name {
            fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
                serializer.serialize_str(self.as_str())
            }
        }
    };
}

wire_enum! {
    /// Cleaning pattern selection. `ChargeGo` sends the robot back to its dock.
    CleaningMode for CleaningMode {
        Smart = "smart",
        WallFollow = "wallfollow",
        Mop = "mop",
        ChargeGo = "chargego",
        // firmware spelling
        Spiral = "sprial",
        Single = "single",
    }
}

wire_enum! {
    DirectionControl for DirectionControl {
        Forward = "forward",
        Backward = "backward",
        TurnLeft = "turnleft",
        TurnRight = "turnright",
        Stop = "stop",
    }
}

wire_enum! {
    FanSpeed for FanSpeed {
        Eco = "ECO",
        Normal = "normal",
        Strong = "strong",
    }
}

wire_enum! {
    /// Mop water flow.
    WaterSpeed for WaterSpeed {
        Low = "small",
        Medium = "medium",
        High = "Big",
    }
}

impl DirectionControl {
    /// Symbolic name used by remote-control callers (`TURN_LEFT`).
    pub const fn name(self) -> &'static str {
        match self {
            DirectionControl::Forward => "FORWARD",
            DirectionControl::Backward => "BACKWARD",
            DirectionControl::TurnLeft => "TURN_LEFT",
            DirectionControl::TurnRight => "TURN_RIGHT",
            DirectionControl::Stop => "STOP",
        }
    }

    /// Case-insensitive lookup by symbolic name or raw value.
    pub fn from_token(token: &str) -> Option<Self> {
        let token = token.trim();
        Self::ALL.iter().copied().find(|d| {
            d.name().eq_ignore_ascii_case(token) || d.as_str().eq_ignore_ascii_case(token)
        })
    }
}

/// Normalized high-level state shown to the home-automation side.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Activity {
    Idle,
    Cleaning,
    Returning,
    Docked,
    Paused,
    Error,
}

/// Raw operating mode reported in field 38.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum OperatingState {
    StandBy,
    CleanSmart,
    Mopping,
    CleanWallFollow,
    GoingCharging,
    Charging,
    Pause,
    CleanSingle,
}

impl OperatingState {
    pub fn from_code(code: i64) -> Option<Self> {
        // 6 is emitted by some firmwares but its meaning is unknown
        match code {
            0 => Some(OperatingState::StandBy),
            1 => Some(OperatingState::CleanSmart),
            2 => Some(OperatingState::Mopping),
            3 => Some(OperatingState::CleanWallFollow),
            4 => Some(OperatingState::GoingCharging),
            5 => Some(OperatingState::Charging),
            7 => Some(OperatingState::Pause),
            8 => Some(OperatingState::CleanSingle),
            _ => None,
        }
    }

    pub const fn activity(self) -> Activity {
        match self {
            OperatingState::StandBy => Activity::Idle,
            OperatingState::CleanSmart
            | OperatingState::Mopping
            | OperatingState::CleanWallFollow
            | OperatingState::CleanSingle => Activity::Cleaning,
            OperatingState::GoingCharging => Activity::Returning,
            OperatingState::Charging => Activity::Docked,
            OperatingState::Pause => Activity::Paused,
        }
    }
}

bitflags::bitflags! {
    /// Simultaneous fault conditions reported in field 11.
    ///
    /// The empty set means no error. Bits the firmware sets beyond the named
    /// ones are kept, so any nonzero raw value counts as a fault.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
    pub struct FaultFlags: u32 {
        const SIDE_BRUSH = 1;
        const ROLLER_BRUSH = 1 << 1;
        const LEFT_WHEEL = 1 << 2;
        const RIGHT_WHEEL = 1 << 3;
        const DUST_BIN = 1 << 4;
        const OFF_GROUND = 1 << 5;
        const COLLISION_SENSOR = 1 << 6;
        const WATER_TANK = 1 << 7;
        const VIRTUAL_WALL = 1 << 8;
        const TRAPPED = 1 << 9;
        const UNKNOWN = 1 << 10;
    }
}

impl FaultFlags {
    pub const NO_ERROR: Self = Self::empty();

    /// Symbolic name, e.g. `DUST_BIN|TRAPPED`.
    pub fn name(&self) -> String {
        if self.is_empty() {
            return "NO_ERROR".to_string();
        }
        let mut parts: Vec<String> = self.iter_names().map(|(n, _)| n.to_string()).collect();
        let unnamed = self.bits() & !Self::all().bits();
        if unnamed != 0 {
            parts.push(format!("{unnamed:#x}"));
        }
        parts.join("|")
    }
}

/// A decoded dps value.
#[derive(Debug, Clone, PartialEq)]
pub enum FieldValue {
    Power(bool),
    Fault(FaultFlags),
    CleaningMode(CleaningMode),
    Direction(DirectionControl),
    FanSpeed(FanSpeed),
    OperatingState(OperatingState),
    Battery(i64),
    CleanRecord(Value),
    CleanArea(Value),
    CleanTime(i64),
    SensorHealth(i64),
    FilterHealth(i64),
    SideBrushHealth(i64),
    BrushHealth(i64),
    MopEquipped(bool),
    ResetFilter(Value),
    DeviceModel(Value),
    WaterSpeed(WaterSpeed),
}

impl FieldValue {
    pub fn decode(field: Field, raw: &Value) -> Result<Self, DecodeError> {
        let value = match field {
            Field::Power => match raw {
                Value::Bool(b) => FieldValue::Power(*b),
                other => return Err(unknown(field, other)),
            },
            Field::Fault => {
                let bits = u32::try_from(int(field, raw)?).map_err(|_| unknown(field, raw))?;
                FieldValue::Fault(FaultFlags::from_bits_retain(bits))
            }
            Field::CleaningMode => FieldValue::CleaningMode(text(field, raw)?.parse()?),
            Field::DirectionControl => FieldValue::Direction(text(field, raw)?.parse()?),
            Field::FanSpeed => FieldValue::FanSpeed(text(field, raw)?.parse()?),
            Field::WaterSpeed => FieldValue::WaterSpeed(text(field, raw)?.parse()?),
            Field::CurrentState => FieldValue::OperatingState(
                OperatingState::from_code(int(field, raw)?).ok_or_else(|| unknown(field, raw))?,
            ),
            Field::Battery => FieldValue::Battery(int(field, raw)?),
            Field::CleanTime => FieldValue::CleanTime(int(field, raw)?),
            Field::SensorHealth => FieldValue::SensorHealth(int(field, raw)?),
            Field::FilterHealth => FieldValue::FilterHealth(int(field, raw)?),
            Field::SideBrushHealth => FieldValue::SideBrushHealth(int(field, raw)?),
            Field::BrushHealth => FieldValue::BrushHealth(int(field, raw)?),
            Field::SweepOrMop => FieldValue::MopEquipped(raw.as_str() != Some("sweep")),
            Field::CleanRecord => FieldValue::CleanRecord(raw.clone()),
            Field::CleanArea => FieldValue::CleanArea(raw.clone()),
            Field::ResetFilter => FieldValue::ResetFilter(raw.clone()),
            Field::DeviceModel => FieldValue::DeviceModel(raw.clone()),
        };
        Ok(value)
    }

    pub fn field(&self) -> Field {
        match self {
            FieldValue::Power(_) => Field::Power,
            FieldValue::Fault(_) => Field::Fault,
            FieldValue::CleaningMode(_) => Field::CleaningMode,
            FieldValue::Direction(_) => Field::DirectionControl,
            FieldValue::FanSpeed(_) => Field::FanSpeed,
            FieldValue::OperatingState(_) => Field::CurrentState,
            FieldValue::Battery(_) => Field::Battery,
            FieldValue::CleanRecord(_) => Field::CleanRecord,
            FieldValue::CleanArea(_) => Field::CleanArea,
            FieldValue::CleanTime(_) => Field::CleanTime,
            FieldValue::SensorHealth(_) => Field::SensorHealth,
            FieldValue::FilterHealth(_) => Field::FilterHealth,
            FieldValue::SideBrushHealth(_) => Field::SideBrushHealth,
            FieldValue::BrushHealth(_) => Field::BrushHealth,
            FieldValue::MopEquipped(_) => Field::SweepOrMop,
            FieldValue::ResetFilter(_) => Field::ResetFilter,
            FieldValue::DeviceModel(_) => Field::DeviceModel,
            FieldValue::WaterSpeed(_) => Field::WaterSpeed,
        }
    }

    /// Raw `(field, value)` for a write. `None` for read-only fields.
    pub fn encode(&self) -> Option<(Field, Value)> {
        let field = self.field();
        if !field.is_writable() {
            return None;
        }
        let raw = match self {
            FieldValue::Power(b) => json!(b),
            FieldValue::CleaningMode(m) => json!(m.as_str()),
            FieldValue::Direction(d) => json!(d.as_str()),
            FieldValue::FanSpeed(s) => json!(s.as_str()),
            FieldValue::WaterSpeed(w) => json!(w.as_str()),
            _ => return None,
        };
        Some((field, raw))
    }
}

fn unknown(field: Field, raw: &Value) -> DecodeError {
    let value = match raw {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    };
    DecodeError::UnknownValue { field, value }
}

fn text(field: Field, raw: &Value) -> Result<&str, DecodeError> {
    raw.as_str().ok_or_else(|| unknown(field, raw))
}

/// Integer fields arrive as numbers, occasionally as numeric strings.
fn int(field: Field, raw: &Value) -> Result<i64, DecodeError> {
    match raw {
        Value::Number(n) => n
            .as_i64()
            .or_else(|| n.as_f64().filter(|f| f.is_finite()).map(|f| f.trunc() as i64))
            .ok_or_else(|| unknown(field, raw)),
        Value::String(s) => s.trim().parse().map_err(|_| unknown(field, raw)),
        Value::Bool(b) => Ok(i64::from(*b)),
        _ => Err(unknown(field, raw)),
    }
}
