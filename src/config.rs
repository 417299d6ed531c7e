use std::env;
use std::net::IpAddr;
use std::str::FromStr;
use std::time::Duration;

use crate::vacuum::commands::DEFAULT_RESTORE_DELAY;

pub const DEFAULT_NAME: &str = "Proscenic 850T Vacuum";

#[derive(Debug, Clone)]
pub struct Config {
    pub mqtt: MqttConfig,
    pub tuya: TuyaConfig,
    pub vacuum: VacuumConfig,
}

#[derive(Debug, Clone)]
pub struct MqttConfig {
    pub broker_host: String,
    pub broker_port: u16,
    pub username: Option<String>,
    pub password: Option<String>,
    pub topic_prefix: String,
    pub client_id: String,
}

#[derive(Debug, Clone)]
pub struct TuyaConfig {
    pub poll_interval_secs: u64,
}

#[derive(Debug, Clone)]
pub struct VacuumConfig {
    pub id: String,
    pub key: String,
    pub ip: IpAddr,
    pub name: String,
    /// Sanitized name for use in MQTT topics (lowercase, spaces to underscores)
    pub topic_name: String,
    pub remember_fan_speed: bool,
    pub restore_delay: Duration,
    pub enable_debug: bool,
}

type Lookup<'a> = &'a dyn Fn(&str) -> Option<String>;

fn env_required(vars: Lookup, key: &str) -> Result<String, String> {
    vars(key).ok_or_else(|| format!("{key} environment variable is required"))
}

fn env_optional(vars: Lookup, key: &str) -> Option<String> {
    vars(key).filter(|v| !v.is_empty())
}

fn env_or_default<T: FromStr>(vars: Lookup, key: &str, default: T) -> T {
    vars(key).and_then(|v| v.parse().ok()).unwrap_or(default)
}

fn env_flag(vars: Lookup, key: &str) -> bool {
    vars(key).is_some_and(|v| {
        matches!(
            v.trim().to_ascii_lowercase().as_str(),
            "1" | "true" | "yes" | "on"
        )
    })
}

impl Config {
    pub fn from_env() -> Result<Self, String> {
        Self::from_vars(&|key: &str| env::var(key).ok())
    }

    fn from_vars(vars: Lookup) -> Result<Self, String> {
        let ip: IpAddr = env_required(vars, "VACUUM_HOST")?
            .parse()
            .map_err(|e| format!("VACUUM_HOST is not a valid IP address: {e}"))?;
        let name = env_optional(vars, "VACUUM_NAME").unwrap_or_else(|| DEFAULT_NAME.to_string());
        let restore_secs = env_or_default(
            vars,
            "VACUUM_FAN_SPEED_RESTORE_DELAY_SECS",
            DEFAULT_RESTORE_DELAY.as_secs(),
        );

        let config = Self {
            mqtt: MqttConfig {
                broker_host: env_required(vars, "MQTT_BROKER_HOST")?,
                broker_port: env_or_default(vars, "MQTT_BROKER_PORT", 1883),
                username: env_optional(vars, "MQTT_USERNAME"),
                password: env_optional(vars, "MQTT_PASSWORD"),
                topic_prefix: env_or_default(vars, "MQTT_TOPIC_PREFIX", "proscenic".to_string()),
                client_id: env_or_default(vars, "MQTT_CLIENT_ID", "proscenic-to-mqtt".to_string()),
            },
            tuya: TuyaConfig {
                poll_interval_secs: env_or_default(vars, "TUYA_POLL_INTERVAL_SECS", 30),
            },
            vacuum: VacuumConfig {
                id: env_required(vars, "VACUUM_DEVICE_ID")?,
                key: env_required(vars, "VACUUM_LOCAL_KEY")?,
                ip,
                topic_name: sanitize_topic_name(&name),
                name,
                remember_fan_speed: env_flag(vars, "VACUUM_REMEMBER_FAN_SPEED"),
                restore_delay: Duration::from_secs(restore_secs),
                enable_debug: env_flag(vars, "VACUUM_ENABLE_DEBUG"),
            },
        };
        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> Result<(), String> {
        if self.mqtt.broker_host.is_empty() {
            return Err("MQTT_BROKER_HOST must not be empty".into());
        }
        if self.tuya.poll_interval_secs == 0 {
            return Err("TUYA_POLL_INTERVAL_SECS must be > 0".into());
        }
        if self.vacuum.id.is_empty() {
            return Err("VACUUM_DEVICE_ID must not be empty".into());
        }
        let key_len = self.vacuum.key.chars().count();
        if !(15..=16).contains(&key_len) {
            return Err(format!(
                "VACUUM_LOCAL_KEY must be 15 or 16 characters, got {key_len}"
            ));
        }
        if self.vacuum.topic_name.is_empty() {
            return Err("VACUUM_NAME must contain at least one alphanumeric character".into());
        }
        Ok(())
    }

    pub fn device_status_topic(&self) -> String {
        format!("{}/{}/bridge_status", self.mqtt.topic_prefix, self.vacuum.topic_name)
    }

    pub fn device_command_topic(&self) -> String {
        format!("{}/{}/command/#", self.mqtt.topic_prefix, self.vacuum.topic_name)
    }

    pub fn device_state_topic(&self, suffix: &str) -> String {
        format!("{}/{}/{}", self.mqtt.topic_prefix, self.vacuum.topic_name, suffix)
    }
}

/// Convert a device name into a safe MQTT topic segment.
/// "Proscenic 850T Vacuum" → "proscenic_850t_vacuum"
fn sanitize_topic_name(name: &str) -> String {
    name.chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() {
                c.to_ascii_lowercase()
            } else {
                '_'
            }
        })
        .collect::<String>()
        .trim_matches('_')
        .to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn vars(pairs: &[(&str, &str)]) -> HashMap<String, String> {
        let mut map: HashMap<String, String> = [
            ("VACUUM_HOST", "192.168.1.40"),
            ("VACUUM_DEVICE_ID", "bf3e1a2b3c4d5e6f7a8b9c"),
            ("VACUUM_LOCAL_KEY", "0123456789abcdef"),
            ("MQTT_BROKER_HOST", "broker.local"),
        ]
        .iter()
        .map(|(k, v)| (k.to_string(), v.to_string()))
        .collect();
        for (k, v) in pairs {
            map.insert(k.to_string(), v.to_string());
        }
        map
    }

    fn load(map: &HashMap<String, String>) -> Result<Config, String> {
        Config::from_vars(&|key: &str| map.get(key).cloned())
    }

    #[test]
    fn defaults() {
        let config = load(&vars(&[])).unwrap();
        assert_eq!(config.vacuum.name, DEFAULT_NAME);
        assert_eq!(config.vacuum.topic_name, "proscenic_850t_vacuum");
        assert!(!config.vacuum.remember_fan_speed);
        assert!(!config.vacuum.enable_debug);
        assert_eq!(config.vacuum.restore_delay, Duration::from_secs(6));
        assert_eq!(config.mqtt.broker_port, 1883);
        assert_eq!(config.tuya.poll_interval_secs, 30);
        assert_eq!(
            config.device_command_topic(),
            "proscenic/proscenic_850t_vacuum/command/#"
        );
    }

    #[test]
    fn flags() {
        let config = load(&vars(&[
            ("VACUUM_REMEMBER_FAN_SPEED", "yes"),
            ("VACUUM_ENABLE_DEBUG", "TRUE"),
            ("VACUUM_NAME", "Upstairs Robot"),
        ]))
        .unwrap();
        assert!(config.vacuum.remember_fan_speed);
        assert!(config.vacuum.enable_debug);
        assert_eq!(config.device_state_topic("state"), "proscenic/upstairs_robot/state");
    }

    #[test]
    fn local_key_length() {
        assert!(load(&vars(&[("VACUUM_LOCAL_KEY", "0123456789abcde")])).is_ok());
        assert!(load(&vars(&[("VACUUM_LOCAL_KEY", "0123456789abcd")])).is_err());
        assert!(load(&vars(&[("VACUUM_LOCAL_KEY", "0123456789abcdefg")])).is_err());
    }

    #[test]
    fn invalid_host_and_interval() {
        assert!(load(&vars(&[("VACUUM_HOST", "vacuum.local")])).is_err());
        assert!(load(&vars(&[("TUYA_POLL_INTERVAL_SECS", "0")])).is_err());

        let mut missing = vars(&[]);
        missing.remove("VACUUM_DEVICE_ID");
        assert!(load(&missing).is_err());
    }
}
