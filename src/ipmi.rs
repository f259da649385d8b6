use std::fmt;
use std::io;

use snafu::Snafu;

use crate::config::DeviceConfig;

#[derive(Debug, Snafu)]
#[snafu(visibility(pub(crate)))]
pub enum SessionError {
    #[snafu(display("Cannot start the IPMI client: {source}"))]
    ClientSpawn { source: io::Error },

    #[snafu(display("Cannot establish IPMI session: {message}"))]
    Connection { message: String },

    #[snafu(display("IPMI command failed: {message}"))]
    Command { message: String },

    #[snafu(display("Cannot parse {what} from IPMI client output: {output}"))]
    MalformedResponse { what: &'static str, output: String },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChassisStatus {
    pub power_on: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PowerState {
    On,
    Off,
}

impl PowerState {
    pub fn from_power_on(power_on: bool) -> Self {
        if power_on {
            Self::On
        } else {
            Self::Off
        }
    }

    pub fn as_payload(self) -> &'static str {
        match self {
            Self::On => "ON",
            Self::Off => "OFF",
        }
    }
}

/// Outcome of a power-reading query. Not every BMC implements the power
/// monitoring extension, so "the device said no" is a value, not an error.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PowerReading {
    Watts(u32),
    Unsupported,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChassisControl {
    PowerUp,
    PowerDown,
    SoftShutdown,
    PowerCycle,
    HardReset,
}

impl fmt::Display for ChassisControl {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::PowerUp => "power up",
            Self::PowerDown => "power down",
            Self::SoftShutdown => "soft shutdown",
            Self::PowerCycle => "power cycle",
            Self::HardReset => "hard reset",
        };
        f.write_str(name)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FruArea {
    pub manufacturer: String,
    pub part_number: String,
    pub serial_number: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FruInventory {
    pub product: FruArea,
    pub board: FruArea,
}

/// Stable identity of one managed device, resolved from its FRU inventory.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeviceIdentity {
    pub manufacturer: String,
    pub model: String,
    pub serial_number: String,
}

impl DeviceIdentity {
    /// Product-level fields win; a field that is empty or whitespace-only
    /// falls back to the board information area.
    pub fn resolve(fru: &FruInventory) -> Self {
        Self {
            manufacturer: pick(&fru.product.manufacturer, &fru.board.manufacturer),
            model: pick(&fru.product.part_number, &fru.board.part_number),
            serial_number: pick(&fru.product.serial_number, &fru.board.serial_number),
        }
    }
}

fn pick(product: &str, board: &str) -> String {
    if product.trim().is_empty() {
        board.to_string()
    } else {
        product.to_string()
    }
}

/// One authenticated session against one device, serving exactly one
/// logical operation. Dropping the session releases it.
pub trait BmcSession {
    fn chassis_status(&mut self) -> Result<ChassisStatus, SessionError>;
    fn power_reading(&mut self) -> Result<PowerReading, SessionError>;
    fn fru_inventory(&mut self) -> Result<FruInventory, SessionError>;
    fn chassis_control(&mut self, control: ChassisControl) -> Result<(), SessionError>;
}

/// Opens sessions against managed devices with the effective credentials
/// for each device already resolved.
pub trait BmcConnector {
    type Session: BmcSession;

    fn open_session(&self, device: &DeviceConfig) -> Result<Self::Session, SessionError>;
}


#[cfg(test)]
mod tests {
    use super::{DeviceIdentity, FruArea, FruInventory};

    fn inventory(product: FruArea, board: FruArea) -> FruInventory {
        FruInventory { product, board }
    }

    #[test]
    fn test_identity_prefers_product_area() {
        let fru = inventory(
            FruArea {
                manufacturer: "Supermicro".to_string(),
                part_number: "X10SLL-F".to_string(),
                serial_number: "S12345".to_string(),
            },
            FruArea {
                manufacturer: "Wrong".to_string(),
                part_number: "Wrong".to_string(),
                serial_number: "Wrong".to_string(),
            },
        );
        assert_eq!(
            DeviceIdentity::resolve(&fru),
            DeviceIdentity {
                manufacturer: "Supermicro".to_string(),
                model: "X10SLL-F".to_string(),
                serial_number: "S12345".to_string(),
            }
        );
    }

    #[test]
    fn test_identity_falls_back_to_board_area() {
        let fru = inventory(
            FruArea::default(),
            FruArea {
                manufacturer: "Supermicro".to_string(),
                part_number: "X10SLL-F".to_string(),
                serial_number: "NM149S".to_string(),
            },
        );
        assert_eq!(
            DeviceIdentity::resolve(&fru),
            DeviceIdentity {
                manufacturer: "Supermicro".to_string(),
                model: "X10SLL-F".to_string(),
                serial_number: "NM149S".to_string(),
            }
        );
    }

    #[test]
    fn test_identity_fallback_is_per_field() {
        // Product manufacturer blank, the rest present at product level.
        let fru = inventory(
            FruArea {
                manufacturer: String::new(),
                part_number: "PN-7".to_string(),
                serial_number: "SN-42".to_string(),
            },
            FruArea {
                manufacturer: "Acme".to_string(),
                part_number: "B-PN".to_string(),
                serial_number: "B-SN".to_string(),
            },
        );
        assert_eq!(
            DeviceIdentity::resolve(&fru),
            DeviceIdentity {
                manufacturer: "Acme".to_string(),
                model: "PN-7".to_string(),
                serial_number: "SN-42".to_string(),
            }
        );
    }

    #[test]
    fn test_identity_treats_whitespace_as_absent() {
        let fru = inventory(
            FruArea {
                manufacturer: "  ".to_string(),
                part_number: "\t".to_string(),
                serial_number: " \n".to_string(),
            },
            FruArea {
                manufacturer: "Acme".to_string(),
                part_number: "PN-1".to_string(),
                serial_number: "SN-1".to_string(),
            },
        );
        let identity = DeviceIdentity::resolve(&fru);
        assert_eq!(identity.manufacturer, "Acme");
        assert_eq!(identity.model, "PN-1");
        assert_eq!(identity.serial_number, "SN-1");
    }
}
