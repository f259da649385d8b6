use std::collections::HashMap;
use std::sync::Arc;

use paho_mqtt as mqtt;
use snafu::{ResultExt, Snafu};

use crate::config::{Config, DeviceConfig};
use crate::hass::Entity;
use crate::ipmi::{BmcConnector, BmcSession, ChassisControl, PowerState, SessionError};
use crate::mqtt::{Publish, PublishError};

#[derive(Debug, Snafu)]
pub enum CommandError {
    #[snafu(display("Cannot connect to {host}: {source}"))]
    Connect { host: String, source: SessionError },
    #[snafu(display("Cannot send '{control}' to the device: {source}"))]
    Control {
        control: ChassisControl,
        source: SessionError,
    },
    #[snafu(display("Cannot query chassis status: {source}"))]
    Status { source: SessionError },
    #[snafu(display("Cannot publish state: {source}"))]
    Publish { source: PublishError },
}

/// One inbound command topic bound to the device and entity it controls.
pub struct Route {
    pub device: DeviceConfig,
    pub entity: Entity,
}

/// Full command-topic routing table for the configured devices: the switch
/// set topic plus the three button press topics, per device.
pub fn routes(config: &Config) -> HashMap<String, Route> {
    let mut routes = HashMap::new();
    for device in &config.devices {
        for entity in Entity::ALL {
            if let Some(topic) = entity.command_topic(&device.name) {
                routes.insert(
                    topic,
                    Route {
                        device: device.clone(),
                        entity,
                    },
                );
            }
        }
    }
    routes
}

/// Consumes inbound messages and dispatches them one at a time. Returns
/// only when the receiver disconnects, i.e. when the client is dropped.
pub fn run_router<C, P>(
    rx: mqtt::Receiver<Option<mqtt::Message>>,
    routes: HashMap<String, Route>,
    connector: Arc<C>,
    broker: Arc<P>,
) where
    C: BmcConnector,
    P: Publish,
{
    for message in rx.iter() {
        let message = match message {
            Some(message) => message,
            None => {
                log::warn!("Lost mqtt connection. Waiting for reconnect");
                continue;
            }
        };
        let route = match routes.get(message.topic()) {
            Some(route) => route,
            None => {
                log::trace!("Ignoring message on {}", message.topic());
                continue;
            }
        };
        if let Err(e) = dispatch(
            connector.as_ref(),
            broker.as_ref(),
            route,
            &message.payload_str(),
        ) {
            log::warn!("Error when handling command for {}: {e}", route.device.name);
        }
    }
}

fn dispatch<C: BmcConnector, P: Publish>(
    connector: &C,
    broker: &P,
    route: &Route,
    payload: &str,
) -> Result<(), CommandError> {
    let device = &route.device;
    match (route.entity, payload) {
        (Entity::Switch, "ON") => {
            log::info!("Powering Up {}", device.name);
            let mut session = open(connector, device)?;
            session
                .chassis_control(ChassisControl::PowerUp)
                .context(ControlSnafu {
                    control: ChassisControl::PowerUp,
                })?;
            let status = session.chassis_status().context(StatusSnafu)?;
            drop(session);
            let power = PowerState::from_power_on(status.power_on);
            broker
                .publish(&Entity::Switch.state_topic(&device.name), power.as_payload())
                .context(PublishSnafu)?;
        }
        (Entity::Switch, "OFF") => {
            log::info!("Shutting Down {}", device.name);
            control(connector, device, ChassisControl::PowerDown)?;
        }
        (Entity::SoftShutdown, "PRESS") => {
            log::info!("Shutting Down {}", device.name);
            control(connector, device, ChassisControl::SoftShutdown)?;
        }
        (Entity::PowerCycle, "PRESS") => {
            log::info!("Power cycling {}", device.name);
            control(connector, device, ChassisControl::PowerCycle)?;
        }
        (Entity::HardReset, "PRESS") => {
            log::info!("Resetting {}", device.name);
            control(connector, device, ChassisControl::HardReset)?;
        }
        _ => {
            log::trace!(
                "Ignoring payload '{payload}' on the {} topic of {}",
                route.entity.object_id(),
                device.name
            );
        }
    }
    Ok(())
}

fn open<C: BmcConnector>(
    connector: &C,
    device: &DeviceConfig,
) -> Result<C::Session, CommandError> {
    connector
        .open_session(device)
        .context(ConnectSnafu { host: &device.host })
}

fn control<C: BmcConnector>(
    connector: &C,
    device: &DeviceConfig,
    control: ChassisControl,
) -> Result<(), CommandError> {
    let mut session = open(connector, device)?;
    session.chassis_control(control).context(ControlSnafu { control })
}
