use serde::Deserialize;

#[derive(Deserialize, Debug)]
pub struct Config {
    pub ipmi: IpmiConfig,
    pub mqtt: MqttConfig,
    #[serde(default)]
    pub output: u8,
    pub devices: Vec<DeviceConfig>,
}

#[derive(Deserialize, Debug, Clone)]
pub struct IpmiConfig {
    pub interval: u64,
    pub username: Option<String>,
    pub password: Option<String>,
}

#[derive(Deserialize, Debug)]
pub struct MqttConfig {
    pub host: String,
    pub port: u16,
    pub username: Option<String>,
    pub password: Option<String>,
}

#[derive(Deserialize, Debug, Clone)]
pub struct DeviceConfig {
    pub name: String,
    pub host: String,
    pub username: Option<String>,
    pub password: Option<String>,
}

#[derive(Debug, PartialEq)]
pub struct Credentials {
    pub username: String,
    pub password: String,
}

impl Credentials {
    /// Effective credentials for one device: configuration-level defaults
    /// overlaid with per-device overrides, independently per field.
    pub fn resolve(defaults: &IpmiConfig, device: &DeviceConfig) -> Self {
        Self {
            username: device
                .username
                .as_deref()
                .or(defaults.username.as_deref())
                .unwrap_or("")
                .to_string(),
            password: device
                .password
                .as_deref()
                .or(defaults.password.as_deref())
                .unwrap_or("")
                .to_string(),
        }
    }
}
