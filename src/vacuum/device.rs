use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use serde::Serialize;
use serde_json::Value;
use tracing::{info, warn};

use crate::error::CommandError;
use crate::tuya::{DpsTransport, PollResult};

use super::commands::CommandSequencer;
use super::fields::{Activity, CleaningMode, DirectionControl, FanSpeed, WaterSpeed};
use super::intent::Intent;
use super::state::{BatteryState, DeviceState, StatusReducer};

/// Read-only view published to the home-automation side.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Snapshot {
    pub name: String,
    pub activity: Option<Activity>,
    pub fan_speed: FanSpeed,
    pub fan_speed_list: Vec<&'static str>,
    pub water_speed: WaterSpeed,
    pub water_speed_list: Vec<&'static str>,
    pub direction_list: Vec<&'static str>,
    /// Mode `start` resumes when the robot is paused.
    pub last_cleaning_command: Option<CleaningMode>,
    pub remembered_fan_speed: FanSpeed,
    pub available: bool,
    pub attributes: BTreeMap<String, Value>,
    pub battery: i64,
}

/// One robot: its last known state and the command path to it.
pub struct Vacuum {
    name: String,
    verbose: bool,
    state: DeviceState,
    battery: BatteryState,
    reducer: StatusReducer,
    sequencer: CommandSequencer,
}

impl Vacuum {
    pub fn new(
        name: impl Into<String>,
        transport: Arc<dyn DpsTransport>,
        remember_fan_speed: bool,
        restore_delay: Duration,
        verbose: bool,
    ) -> Self {
        Self {
            name: name.into(),
            verbose,
            state: DeviceState::new(),
            battery: BatteryState::default(),
            reducer: StatusReducer::new(verbose),
            sequencer: CommandSequencer::new(transport, remember_fan_speed, restore_delay),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn apply_poll(&mut self, result: PollResult) {
        self.reducer
            .update(&mut self.state, &mut self.battery, result);
    }

    pub async fn start(&mut self) -> Result<(), CommandError> {
        self.sequencer
            .start(self.state.operating_state())
            .await
    }

    pub async fn pause(&mut self) -> Result<(), CommandError> {
        self.sequencer
            .pause(self.state.operating_state())
            .await
    }

    pub async fn stop(&mut self) -> Result<(), CommandError> {
        self.sequencer.stop().await
    }

    pub async fn return_to_base(&mut self) -> Result<(), CommandError> {
        self.sequencer.return_to_base().await
    }

    pub async fn clean_spot(&mut self) -> Result<(), CommandError> {
        self.sequencer.clean_spot().await
    }

    pub async fn set_cleaning_mode(&mut self, mode: &str) -> Result<(), CommandError> {
        self.sequencer.set_cleaning_mode(mode).await
    }

    pub async fn set_fan_speed(&mut self, speed: &str) -> Result<(), CommandError> {
        self.sequencer.set_fan_speed(speed).await
    }

    pub async fn set_water_speed(&mut self, speed: &str) -> Result<(), CommandError> {
        self.sequencer.set_water_speed(speed).await
    }

    pub async fn remote_control(&mut self, direction: &str) -> Result<(), CommandError> {
        self.sequencer.remote_control(direction).await
    }

    /// Routes an intent to the matching command. Failures are already logged
    /// by the sequencer and are only returned for the caller's information.
    pub async fn handle(&mut self, intent: Intent) -> Result<(), CommandError> {
        info!("{}: {}", self.name, intent.action());
        match intent {
            Intent::Start => self.start().await,
            Intent::Pause => self.pause().await,
            Intent::Stop => self.stop().await,
            Intent::ReturnToBase => self.return_to_base().await,
            Intent::CleanSpot => self.clean_spot().await,
            Intent::SetCleaningMode(mode) => self.set_cleaning_mode(&mode).await,
            Intent::SetFanSpeed(speed) => self.set_fan_speed(&speed).await,
            Intent::SetWaterSpeed(speed) => self.set_water_speed(&speed).await,
            Intent::RemoteControl(direction) => self.remote_control(&direction).await,
        }
    }

    pub fn snapshot(&self) -> Snapshot {
        let activity = self.state.activity();
        if self.verbose && activity == Some(Activity::Error) {
            warn!("Fault returned! ({})", self.state.fault().name());
        }

        Snapshot {
            name: self.name.clone(),
            activity,
            fan_speed: self.state.fan_speed(),
            fan_speed_list: FanSpeed::values(),
            water_speed: self.state.water_speed(),
            water_speed_list: WaterSpeed::values(),
            direction_list: DirectionControl::values(),
            last_cleaning_command: self.sequencer.last_cleaning_command(),
            remembered_fan_speed: self.sequencer.remembered_fan_speed(),
            available: self.state.available(),
            attributes: self.state.attributes().clone(),
            battery: self.battery.level(),
        }
    }
}
