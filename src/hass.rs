use std::collections::HashSet;
use std::sync::{Mutex, MutexGuard, PoisonError};

use serde::Serialize;
use snafu::ResultExt;

use crate::ipmi::DeviceIdentity;
use crate::mqtt::{Publish, PublishError, SerializeSnafu};

pub const DISCOVERY_PREFIX: &str = "homeassistant";
pub const BASE_TOPIC: &str = "ipmi2mqtt";

/// The entities announced for every device: a power switch, three one-shot
/// buttons and, where the BMC supports power readings, a wattage sensor.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Entity {
    Switch,
    SoftShutdown,
    PowerCycle,
    HardReset,
    Watts,
}

impl Entity {
    pub const ALL: [Entity; 5] = [
        Entity::Switch,
        Entity::SoftShutdown,
        Entity::PowerCycle,
        Entity::HardReset,
        Entity::Watts,
    ];

    pub fn object_id(self) -> &'static str {
        match self {
            Entity::Switch => "switch",
            Entity::SoftShutdown => "soft_shutdown",
            Entity::PowerCycle => "power_cycle",
            Entity::HardReset => "hard_reset",
            Entity::Watts => "watts",
        }
    }

    fn component(self) -> &'static str {
        match self {
            Entity::Switch => "switch",
            Entity::SoftShutdown | Entity::PowerCycle | Entity::HardReset => "button",
            Entity::Watts => "sensor",
        }
    }

    fn command_verb(self) -> Option<&'static str> {
        match self {
            Entity::Switch => Some("set"),
            Entity::SoftShutdown | Entity::PowerCycle | Entity::HardReset => Some("press"),
            Entity::Watts => None,
        }
    }

    fn has_state(self) -> bool {
        matches!(self, Entity::Switch | Entity::Watts)
    }

    pub fn base_topic(self, device_name: &str) -> String {
        format!("{BASE_TOPIC}/{device_name}/{}", self.object_id())
    }

    pub fn state_topic(self, device_name: &str) -> String {
        format!("{}/state", self.base_topic(device_name))
    }

    pub fn command_topic(self, device_name: &str) -> Option<String> {
        self.command_verb()
            .map(|verb| format!("{}/{verb}", self.base_topic(device_name)))
    }

    pub fn config_topic(self, device_name: &str) -> String {
        format!(
            "{DISCOVERY_PREFIX}/{}/{device_name}/{}/config",
            self.component(),
            self.object_id()
        )
    }

    fn discovery(self, device_name: &str, identity: &DeviceIdentity) -> Discovery {
        let entity_name = format!("{device_name}_{}", self.object_id());
        Discovery {
            base_topic: self.base_topic(device_name),
            name: entity_name.clone(),
            unique_id: entity_name,
            manufacturer: identity.manufacturer.clone(),
            identifiers: identity.serial_number.clone(),
            model: identity.model.clone(),
            platform: "mqtt",
            command_topic: self.command_verb().map(|verb| format!("~/{verb}")),
            state_topic: self.has_state().then(|| "~/state".to_string()),
            device: Device {
                identifiers: identity.serial_number.clone(),
                manufacturer: identity.manufacturer.clone(),
                model: identity.model.clone(),
                name: device_name.to_string(),
            },
        }
    }
}

#[derive(Serialize)]
pub struct Discovery {
    #[serde(rename = "~")]
    pub base_topic: String,
    pub name: String,
    pub unique_id: String,
    pub manufacturer: String,
    pub identifiers: String,
    pub model: String,
    pub platform: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub command_topic: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub state_topic: Option<String>,
    pub device: Device,
}

#[derive(Clone, Serialize)]
pub struct Device {
    pub identifiers: String,
    pub manufacturer: String,
    pub model: String,
    pub name: String,
}

/// Tracks which devices have completed discovery registration and
/// serializes the publication bursts. The lock is held across a device's
/// whole document set so two devices registering at the same time never
/// interleave their announcements.
#[derive(Default)]
pub struct Registry {
    registered: Mutex<HashSet<String>>,
}

impl Registry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_registered(&self, device_name: &str) -> bool {
        self.lock().contains(device_name)
    }

    /// Publishes the discovery document set for one device. Does nothing if
    /// the device is already registered. On a failed publish the device is
    /// left unregistered, so the next poll retries the whole set.
    pub fn register<P: Publish>(
        &self,
        broker: &P,
        device_name: &str,
        identity: &DeviceIdentity,
        watts_supported: bool,
    ) -> Result<(), PublishError> {
        let mut registered = self.lock();
        if registered.contains(device_name) {
            return Ok(());
        }
        for entity in Entity::ALL {
            if entity == Entity::Watts && !watts_supported {
                continue;
            }
            let document = entity.discovery(device_name, identity);
            let payload = serde_json::to_string(&document).context(SerializeSnafu)?;
            broker.publish_retained(&entity.config_topic(device_name), &payload)?;
        }
        registered.insert(device_name.to_string());
        Ok(())
    }

    fn lock(&self) -> MutexGuard<'_, HashSet<String>> {
        self.registered
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::thread;

    use super::{Entity, Registry};
    use crate::ipmi::DeviceIdentity;
    use crate::mqtt::testing::RecordingBroker;

    fn identity() -> DeviceIdentity {
        DeviceIdentity {
            manufacturer: "Supermicro".to_string(),
            model: "SYS-5018D-MTF-O".to_string(),
            serial_number: "S16429N123456".to_string(),
        }
    }

    #[test]
    fn test_topics() {
        assert_eq!(Entity::Switch.state_topic("db01"), "ipmi2mqtt/db01/switch/state");
        assert_eq!(
            Entity::Switch.command_topic("db01").unwrap(),
            "ipmi2mqtt/db01/switch/set"
        );
        assert_eq!(
            Entity::PowerCycle.command_topic("db01").unwrap(),
            "ipmi2mqtt/db01/power_cycle/press"
        );
        assert_eq!(Entity::Watts.command_topic("db01"), None);
        assert_eq!(
            Entity::Watts.config_topic("db01"),
            "homeassistant/sensor/db01/watts/config"
        );
    }

    #[test]
    fn test_register_publishes_full_document_set() {
        let registry = Registry::new();
        let broker = RecordingBroker::new();
        registry
            .register(&broker, "db01", &identity(), true)
            .unwrap();

        let messages = broker.messages();
        let topics: Vec<_> = messages.iter().map(|m| m.topic.as_str()).collect();
        assert_eq!(
            topics,
            vec![
                "homeassistant/switch/db01/switch/config",
                "homeassistant/button/db01/soft_shutdown/config",
                "homeassistant/button/db01/power_cycle/config",
                "homeassistant/button/db01/hard_reset/config",
                "homeassistant/sensor/db01/watts/config",
            ]
        );
        assert!(messages.iter().all(|m| m.retained));
        assert!(registry.is_registered("db01"));
    }

    #[test]
    fn test_register_without_wattage_skips_sensor() {
        let registry = Registry::new();
        let broker = RecordingBroker::new();
        registry
            .register(&broker, "db01", &identity(), false)
            .unwrap();

        let messages = broker.messages();
        assert_eq!(messages.len(), 4);
        assert!(!messages.iter().any(|m| m.topic.contains("/sensor/")));
    }

    #[test]
    fn test_register_runs_once_per_device() {
        let registry = Registry::new();
        let broker = RecordingBroker::new();
        registry
            .register(&broker, "db01", &identity(), true)
            .unwrap();
        registry
            .register(&broker, "db01", &identity(), true)
            .unwrap();
        assert_eq!(broker.messages().len(), 5);
    }

    #[test]
    fn test_switch_document_layout() {
        let registry = Registry::new();
        let broker = RecordingBroker::new();
        registry
            .register(&broker, "db01", &identity(), true)
            .unwrap();

        let payloads = broker.payloads_for("homeassistant/switch/db01/switch/config");
        assert_eq!(
            payloads,
            vec![concat!(
                r#"{"~":"ipmi2mqtt/db01/switch","name":"db01_switch","unique_id":"db01_switch","#,
                r#""manufacturer":"Supermicro","identifiers":"S16429N123456","model":"SYS-5018D-MTF-O","#,
                r#""platform":"mqtt","command_topic":"~/set","state_topic":"~/state","#,
                r#""device":{"identifiers":"S16429N123456","manufacturer":"Supermicro","#,
                r#""model":"SYS-5018D-MTF-O","name":"db01"}}"#
            )
            .to_string()]
        );
    }

    #[test]
    fn test_button_and_sensor_documents() {
        let registry = Registry::new();
        let broker = RecordingBroker::new();
        registry
            .register(&broker, "db01", &identity(), true)
            .unwrap();

        let button: serde_json::Value = serde_json::from_str(
            &broker.payloads_for("homeassistant/button/db01/hard_reset/config")[0],
        )
        .unwrap();
        assert_eq!(button["~"], "ipmi2mqtt/db01/hard_reset");
        assert_eq!(button["command_topic"], "~/press");
        assert!(button.get("state_topic").is_none());

        let sensor: serde_json::Value = serde_json::from_str(
            &broker.payloads_for("homeassistant/sensor/db01/watts/config")[0],
        )
        .unwrap();
        assert_eq!(sensor["state_topic"], "~/state");
        assert_eq!(sensor["identifiers"], "S16429N123456");
        assert!(sensor.get("command_topic").is_none());
        assert_eq!(sensor["device"], button["device"]);
    }

    #[test]
    fn test_concurrent_registration_does_not_interleave() {
        let registry = Arc::new(Registry::new());
        let broker = Arc::new(RecordingBroker::new());

        let handles: Vec<_> = ["db01", "db02"]
            .into_iter()
            .map(|name| {
                let registry = Arc::clone(&registry);
                let broker = Arc::clone(&broker);
                thread::spawn(move || {
                    registry
                        .register(broker.as_ref(), name, &identity(), true)
                        .unwrap();
                })
            })
            .collect();
        for handle in handles {
            handle.join().unwrap();
        }

        let messages = broker.messages();
        assert_eq!(messages.len(), 10);
        // Whichever device went first, its five documents form a block.
        let first = if messages[0].topic.contains("/db01/") {
            "db01"
        } else {
            "db02"
        };
        assert!(messages[..5].iter().all(|m| m.topic.contains(&format!("/{first}/"))));
        assert!(messages[5..].iter().all(|m| !m.topic.contains(&format!("/{first}/"))));
    }
}
