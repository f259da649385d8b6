use std::sync::Arc;
use std::thread;
use std::time::Duration;

use snafu::{ResultExt, Snafu};

use crate::config::{Config, DeviceConfig};
use crate::hass::{Entity, Registry};
use crate::ipmi::{
    BmcConnector, BmcSession, DeviceIdentity, PowerReading, PowerState, SessionError,
};
use crate::mqtt::{Publish, PublishError};

#[derive(Debug, Snafu)]
pub enum PollError {
    #[snafu(display("Cannot connect to {host}: {source}"))]
    Connect { host: String, source: SessionError },
    #[snafu(display("Cannot query chassis status: {source}"))]
    Status { source: SessionError },
    #[snafu(display("Cannot query power reading: {source}"))]
    Reading { source: SessionError },
    #[snafu(display("Cannot read FRU inventory: {source}"))]
    Inventory { source: SessionError },
    #[snafu(display("Cannot publish state: {source}"))]
    Publish { source: PublishError },
}

/// Launches one poll task per device every interval. Tasks from one cycle
/// are not joined before the next cycle starts, so a stuck device only
/// stalls its own thread. The cost is unbounded fan-out: a device that
/// stays slower than the interval accumulates one thread per cycle.
pub fn run_scheduler<C, P>(config: &Config, connector: Arc<C>, broker: Arc<P>) -> !
where
    C: BmcConnector + Send + Sync + 'static,
    P: Publish + Send + Sync + 'static,
{
    let registry = Arc::new(Registry::new());
    loop {
        for device in &config.devices {
            let thread_name = format!("poll-{}", device.name);
            let connector = Arc::clone(&connector);
            let broker = Arc::clone(&broker);
            let registry = Arc::clone(&registry);
            let device = device.clone();
            let spawned = thread::Builder::new().name(thread_name.clone()).spawn(move || {
                if let Err(e) = poll_device(connector.as_ref(), broker.as_ref(), &registry, &device)
                {
                    log::warn!("Error when polling {}: {e}", device.name);
                }
            });
            if let Err(e) = spawned {
                log::warn!("Cannot start {thread_name}: {e}");
            }
        }
        thread::sleep(Duration::from_secs(config.ipmi.interval));
    }
}

/// One poll of one device: read the power state, attempt a power reading,
/// register the device with the discovery registry on first contact, then
/// release the session and publish.
fn poll_device<C: BmcConnector, P: Publish>(
    connector: &C,
    broker: &P,
    registry: &Registry,
    device: &DeviceConfig,
) -> Result<(), PollError> {
    let mut session = connector
        .open_session(device)
        .context(ConnectSnafu { host: &device.host })?;
    let status = session.chassis_status().context(StatusSnafu)?;
    let power = PowerState::from_power_on(status.power_on);

    let watts = match session.power_reading().context(ReadingSnafu)? {
        PowerReading::Watts(watts) => Some(watts),
        PowerReading::Unsupported => {
            log::debug!("Failed to get power reading from {} (no PMBUS?)", device.name);
            None
        }
    };

    if !registry.is_registered(&device.name) {
        let fru = session.fru_inventory().context(InventorySnafu)?;
        let identity = DeviceIdentity::resolve(&fru);
        registry
            .register(broker, &device.name, &identity, watts.is_some())
            .context(PublishSnafu)?;
    }
    drop(session);

    match watts {
        Some(watts) => log::debug!(
            "IPMI: {} is powered {} ({watts}W)",
            device.host,
            power.as_payload()
        ),
        None => log::debug!("IPMI: {} is powered {}", device.host, power.as_payload()),
    }
    publish_state(broker, device, power, watts).context(PublishSnafu)
}

fn publish_state<P: Publish>(
    broker: &P,
    device: &DeviceConfig,
    power: PowerState,
    watts: Option<u32>,
) -> Result<(), PublishError> {
    broker.publish(&Entity::Switch.state_topic(&device.name), power.as_payload())?;
    if let Some(watts) = watts {
        broker.publish(&Entity::Watts.state_topic(&device.name), &watts.to_string())?;
    }
    Ok(())
}
