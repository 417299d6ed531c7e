//! Outgoing command sequencing.
//!
//! The robot has no dedicated pause or resume value: re-sending the active
//! cleaning mode toggles pause. It also resets its fan speed whenever the
//! cleaning mode changes, so the user's last choice can be re-sent after a
//! short delay.

use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use serde_json::json;
use tokio::task::JoinHandle;
use tracing::{debug, error, info};

use crate::error::CommandError;
use crate::tuya::DpsTransport;

use super::fields::{CleaningMode, DirectionControl, FanSpeed, Field, FieldValue, OperatingState, WaterSpeed};

/// Delay before the remembered fan speed is re-sent.
pub const DEFAULT_RESTORE_DELAY: Duration = Duration::from_secs(6);

pub struct CommandSequencer {
    transport: Arc<dyn DpsTransport>,
    remember_fan_speed: bool,
    restore_delay: Duration,
    last_cleaning_command: Option<CleaningMode>,
    remembered_fan_speed: Arc<Mutex<FanSpeed>>,
    pending_restore: Option<JoinHandle<()>>,
}

impl CommandSequencer {
    pub fn new(
        transport: Arc<dyn DpsTransport>,
        remember_fan_speed: bool,
        restore_delay: Duration,
    ) -> Self {
        Self {
            transport,
            remember_fan_speed,
            restore_delay,
            last_cleaning_command: None,
            remembered_fan_speed: Arc::new(Mutex::new(FanSpeed::Normal)),
            pending_restore: None,
        }
    }

    /// Cleaning mode that `start` resumes from pause, if any.
    pub fn last_cleaning_command(&self) -> Option<CleaningMode> {
        self.last_cleaning_command
    }

    pub fn remembered_fan_speed(&self) -> FanSpeed {
        *self.remembered_fan_speed.lock()
    }

    /// Starts a smart clean, or resumes the remembered mode when paused.
    pub async fn start(&mut self, current: Option<OperatingState>) -> Result<(), CommandError> {
        let mode = match self.last_cleaning_command {
            Some(mode) if current == Some(OperatingState::Pause) => mode,
            _ => CleaningMode::Smart,
        };
        self.execute(FieldValue::CleaningMode(mode)).await
    }

    /// Re-sends the active cleaning mode, which the robot treats as pause.
    /// Does nothing when already paused or when no mode was requested yet.
    pub async fn pause(&mut self, current: Option<OperatingState>) -> Result<(), CommandError> {
        match self.last_cleaning_command {
            Some(mode) if current != Some(OperatingState::Pause) => {
                self.execute(FieldValue::CleaningMode(mode)).await
            }
            _ => {
                debug!("Nothing to pause (state={:?})", current);
                Ok(())
            }
        }
    }

    pub async fn stop(&mut self) -> Result<(), CommandError> {
        self.execute(FieldValue::Direction(DirectionControl::Stop))
            .await
    }

    pub async fn return_to_base(&mut self) -> Result<(), CommandError> {
        self.execute(FieldValue::CleaningMode(CleaningMode::ChargeGo))
            .await
    }

    pub async fn clean_spot(&mut self) -> Result<(), CommandError> {
        self.execute(FieldValue::CleaningMode(CleaningMode::Spiral))
            .await
    }

    pub async fn set_cleaning_mode(&mut self, mode: &str) -> Result<(), CommandError> {
        let mode: CleaningMode = mode
            .parse()
            .map_err(|_| invalid(Field::CleaningMode, mode, &CleaningMode::values()))?;
        self.execute(FieldValue::CleaningMode(mode)).await
    }

    /// Sends the fan speed and remembers it for later restoration.
    pub async fn set_fan_speed(&mut self, speed: &str) -> Result<(), CommandError> {
        let speed: FanSpeed = speed
            .parse()
            .map_err(|_| invalid(Field::FanSpeed, speed, &FanSpeed::values()))?;
        self.execute(FieldValue::FanSpeed(speed)).await?;
        *self.remembered_fan_speed.lock() = speed;
        Ok(())
    }

    pub async fn set_water_speed(&mut self, speed: &str) -> Result<(), CommandError> {
        let speed: WaterSpeed = speed
            .parse()
            .map_err(|_| invalid(Field::WaterSpeed, speed, &WaterSpeed::values()))?;
        self.execute(FieldValue::WaterSpeed(speed)).await
    }

    /// Manual drive. Accepts `turn_left`, `TURNLEFT`, `Forward`, ...
    pub async fn remote_control(&mut self, direction: &str) -> Result<(), CommandError> {
        let Some(direction) = DirectionControl::from_token(direction) else {
            let names: Vec<&str> = DirectionControl::ALL.iter().map(|d| d.name()).collect();
            return Err(invalid(Field::DirectionControl, direction, &names));
        };
        self.execute(FieldValue::Direction(direction)).await
    }

    async fn execute(&mut self, value: FieldValue) -> Result<(), CommandError> {
        let Some((field, raw)) = value.encode() else {
            return Err(invalid(value.field(), &format!("{value:?}"), &[]));
        };

        match value {
            FieldValue::CleaningMode(mode) => self.last_cleaning_command = Some(mode),
            FieldValue::Direction(_) => self.last_cleaning_command = None,
            _ => {}
        }

        info!("Sending {:?}={}", field, raw);
        if let Err(e) = self.transport.send(field.code(), raw.clone()).await {
            error!("Could not execute command {:?} with value {}: {}", field, raw, e);
            return Err(e.into());
        }

        if self.remember_fan_speed && field == Field::CleaningMode {
            self.schedule_fan_speed_restore();
        }
        Ok(())
    }

    /// Re-sends the remembered fan speed after `restore_delay`. A restore that
    /// is still waiting is replaced by the new one.
    fn schedule_fan_speed_restore(&mut self) {
        if let Some(pending) = self.pending_restore.take() {
            if !pending.is_finished() {
                debug!("Superseding pending fan speed restore");
                pending.abort();
            }
        }

        let transport = Arc::clone(&self.transport);
        let remembered = Arc::clone(&self.remembered_fan_speed);
        let delay = self.restore_delay;
        debug!("Waiting {:?} before setting the fan speed", delay);

        self.pending_restore = Some(tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            let speed = *remembered.lock();
            match transport
                .send(Field::FanSpeed.code(), json!(speed.as_str()))
                .await
            {
                Ok(()) => info!("Restored fan speed {}", speed),
                Err(e) => error!("Could not restore fan speed {}: {}", speed, e),
            }
        }));
    }
}

fn invalid(field: Field, value: &str, allowed: &[&str]) -> CommandError {
    error!(
        "{:?} value not recognized ({}). Valid values are: {:?}",
        field, value, allowed
    );
    CommandError::InvalidValue {
        field,
        value: value.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::TransportError;
    use crate::vacuum::testing::Recorder;

    fn sequencer(rec: &Arc<Recorder>, remember: bool) -> CommandSequencer {
        CommandSequencer::new(rec.clone(), remember, DEFAULT_RESTORE_DELAY)
    }

    #[tokio::test]
    async fn start_without_history_sends_smart() {
        let rec = Arc::new(Recorder::default());
        let mut seq = sequencer(&rec, false);

        seq.start(Some(OperatingState::StandBy)).await.unwrap();

        assert_eq!(rec.sent(), vec![(25, json!("smart"))]);
        assert_eq!(seq.last_cleaning_command(), Some(CleaningMode::Smart));
    }

    #[tokio::test]
    async fn start_resumes_remembered_mode_from_pause() {
        let rec = Arc::new(Recorder::default());
        let mut seq = sequencer(&rec, false);
        seq.set_cleaning_mode("wallfollow").await.unwrap();
        rec.clear();

        seq.start(Some(OperatingState::Pause)).await.unwrap();
        assert_eq!(rec.sent(), vec![(25, json!("wallfollow"))]);

        rec.clear();
        seq.start(Some(OperatingState::CleanWallFollow)).await.unwrap();
        assert_eq!(rec.sent(), vec![(25, json!("smart"))]);
    }

    #[tokio::test]
    async fn stop_forgets_cleaning_command() {
        let rec = Arc::new(Recorder::default());
        let mut seq = sequencer(&rec, false);
        seq.set_cleaning_mode("mop").await.unwrap();

        seq.stop().await.unwrap();
        assert_eq!(seq.last_cleaning_command(), None);

        seq.start(Some(OperatingState::Pause)).await.unwrap();
        assert_eq!(
            rec.sent(),
            vec![
                (25, json!("mop")),
                (26, json!("stop")),
                (25, json!("smart"))
            ]
        );
    }

    #[tokio::test]
    async fn pause_resends_active_mode() {
        let rec = Arc::new(Recorder::default());
        let mut seq = sequencer(&rec, false);

        seq.pause(Some(OperatingState::CleanSmart)).await.unwrap();
        assert!(rec.sent().is_empty());

        seq.clean_spot().await.unwrap();
        seq.pause(Some(OperatingState::Pause)).await.unwrap();
        assert_eq!(rec.sent(), vec![(25, json!("sprial"))]);

        seq.pause(Some(OperatingState::CleanSingle)).await.unwrap();
        assert_eq!(rec.sent(), vec![(25, json!("sprial")), (25, json!("sprial"))]);
    }

    #[tokio::test]
    async fn return_to_base_sends_chargego() {
        let rec = Arc::new(Recorder::default());
        let mut seq = sequencer(&rec, false);

        seq.return_to_base().await.unwrap();

        assert_eq!(rec.sent(), vec![(25, json!("chargego"))]);
        assert_eq!(seq.last_cleaning_command(), Some(CleaningMode::ChargeGo));
    }

    #[tokio::test]
    async fn bogus_fan_speed_is_not_dispatched() {
        let rec = Arc::new(Recorder::default());
        let mut seq = sequencer(&rec, false);
        seq.set_fan_speed("ECO").await.unwrap();
        rec.clear();

        let err = seq.set_fan_speed("bogus").await.unwrap_err();

        assert_eq!(
            err,
            CommandError::InvalidValue {
                field: Field::FanSpeed,
                value: "bogus".into()
            }
        );
        assert!(rec.sent().is_empty());
        assert_eq!(seq.remembered_fan_speed(), FanSpeed::Eco);
    }

    #[tokio::test]
    async fn fan_speed_is_only_remembered_after_dispatch() {
        let rec = Arc::new(Recorder::default());
        let mut seq = sequencer(&rec, false);
        rec.fail_sends(true);

        assert!(matches!(
            seq.set_fan_speed("strong").await,
            Err(CommandError::Transport(TransportError::Send(_)))
        ));
        assert_eq!(seq.remembered_fan_speed(), FanSpeed::Normal);
    }

    #[tokio::test]
    async fn water_speed() {
        let rec = Arc::new(Recorder::default());
        let mut seq = sequencer(&rec, true);

        seq.set_water_speed("Big").await.unwrap();
        assert!(seq.set_water_speed("huge").await.is_err());

        assert_eq!(rec.sent(), vec![(60, json!("Big"))]);
        assert_eq!(seq.last_cleaning_command(), None);
    }

    #[tokio::test]
    async fn remote_control_tokens() {
        let rec = Arc::new(Recorder::default());
        let mut seq = sequencer(&rec, false);
        seq.start(None).await.unwrap();
        rec.clear();

        seq.remote_control("turn_left").await.unwrap();
        assert_eq!(seq.last_cleaning_command(), None);
        seq.remote_control("Forward").await.unwrap();
        assert!(seq.remote_control("spin").await.is_err());

        assert_eq!(
            rec.sent(),
            vec![(26, json!("turnleft")), (26, json!("forward"))]
        );
    }

    #[tokio::test]
    async fn failed_send_still_records_intent() {
        let rec = Arc::new(Recorder::default());
        let mut seq = sequencer(&rec, true);
        rec.fail_sends(true);

        assert!(seq.start(None).await.is_err());
        assert_eq!(seq.last_cleaning_command(), Some(CleaningMode::Smart));
        assert!(seq.pending_restore.is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn remembered_fan_speed_is_restored_after_delay() {
        let rec = Arc::new(Recorder::default());
        let mut seq = sequencer(&rec, true);

        seq.set_fan_speed("strong").await.unwrap();
        seq.start(None).await.unwrap();
        assert_eq!(rec.sent(), vec![(27, json!("strong")), (25, json!("smart"))]);

        tokio::time::sleep(Duration::from_secs(5)).await;
        assert_eq!(rec.sent().len(), 2);

        tokio::time::sleep(Duration::from_secs(2)).await;
        assert_eq!(
            rec.sent(),
            vec![
                (27, json!("strong")),
                (25, json!("smart")),
                (27, json!("strong"))
            ]
        );

        tokio::time::sleep(Duration::from_secs(30)).await;
        assert_eq!(rec.sent().len(), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn no_restore_when_disabled() {
        let rec = Arc::new(Recorder::default());
        let mut seq = sequencer(&rec, false);

        seq.set_fan_speed("strong").await.unwrap();
        seq.start(None).await.unwrap();
        tokio::time::sleep(Duration::from_secs(30)).await;

        assert_eq!(rec.sent(), vec![(27, json!("strong")), (25, json!("smart"))]);
    }

    #[tokio::test(start_paused = true)]
    async fn overlapping_restores_coalesce() {
        let rec = Arc::new(Recorder::default());
        let mut seq = sequencer(&rec, true);

        seq.start(None).await.unwrap();
        tokio::time::sleep(Duration::from_secs(3)).await;
        seq.return_to_base().await.unwrap();

        // first restore would have fired at 6s
        tokio::time::sleep(Duration::from_secs(4)).await;
        assert_eq!(rec.sent().len(), 2);

        tokio::time::sleep(Duration::from_secs(3)).await;
        assert_eq!(
            rec.sent(),
            vec![
                (25, json!("smart")),
                (25, json!("chargego")),
                (27, json!("normal"))
            ]
        );
    }

    #[tokio::test(start_paused = true)]
    async fn restore_uses_speed_chosen_during_delay() {
        let rec = Arc::new(Recorder::default());
        let mut seq = sequencer(&rec, true);

        seq.start(None).await.unwrap();
        tokio::time::sleep(Duration::from_secs(1)).await;
        seq.set_fan_speed("ECO").await.unwrap();
        tokio::time::sleep(Duration::from_secs(10)).await;

        assert_eq!(
            rec.sent(),
            vec![(25, json!("smart")), (27, json!("ECO")), (27, json!("ECO"))]
        );
    }
}
