use std::process::Command;

use snafu::ResultExt;

use crate::config::{Credentials, DeviceConfig, IpmiConfig};
use crate::ipmi::{
    BmcConnector, BmcSession, ChassisControl, ChassisStatus, ClientSpawnSnafu, FruInventory,
    PowerReading, SessionError,
};

const IPMITOOL_BIN: &str = "ipmitool";
const IPMI_PORT: u16 = 623;

/// Production session gateway driving the external `ipmitool` client.
pub struct Ipmitool {
    defaults: IpmiConfig,
}

impl Ipmitool {
    pub fn new(defaults: IpmiConfig) -> Self {
        Self { defaults }
    }
}

impl BmcConnector for Ipmitool {
    type Session = IpmitoolSession;

    fn open_session(&self, device: &DeviceConfig) -> Result<IpmitoolSession, SessionError> {
        Ok(IpmitoolSession {
            host: device.host.clone(),
            credentials: Credentials::resolve(&self.defaults, device),
        })
    }
}

/// One `ipmitool` invocation per protocol operation over the RMCP+
/// `lanplus` interface. The client establishes and tears down the wire
/// session around each invocation, so dropping the value releases
/// everything this end holds.
pub struct IpmitoolSession {
    host: String,
    credentials: Credentials,
}

impl IpmitoolSession {
    fn base_args(&self) -> Vec<String> {
        vec![
            "-I".to_string(),
            "lanplus".to_string(),
            "-H".to_string(),
            self.host.clone(),
            "-p".to_string(),
            IPMI_PORT.to_string(),
            "-U".to_string(),
            self.credentials.username.clone(),
            "-P".to_string(),
            self.credentials.password.clone(),
        ]
    }

    fn run(&self, command: &[&str]) -> Result<String, SessionError> {
        log::trace!("Running ipmitool {} against {}", command.join(" "), self.host);
        let output = Command::new(IPMITOOL_BIN)
            .args(self.base_args())
            .args(command)
            .output()
            .context(ClientSpawnSnafu)?;
        if output.status.success() {
            Ok(String::from_utf8_lossy(&output.stdout).into_owned())
        } else {
            let message = String::from_utf8_lossy(&output.stderr).trim().to_string();
            if is_connection_failure(&message) {
                Err(SessionError::Connection { message })
            } else {
                Err(SessionError::Command { message })
            }
        }
    }
}

impl BmcSession for IpmitoolSession {
    fn chassis_status(&mut self) -> Result<ChassisStatus, SessionError> {
        let output = self.run(&["chassis", "power", "status"])?;
        parse_power_status(&output)
    }

    fn power_reading(&mut self) -> Result<PowerReading, SessionError> {
        match self.run(&["dcmi", "power", "reading"]) {
            Ok(output) => parse_power_reading(&output).map(PowerReading::Watts),
            // The BMC answered and rejected the command: power monitoring is
            // not implemented on this device.
            Err(SessionError::Command { .. }) => Ok(PowerReading::Unsupported),
            Err(e) => Err(e),
        }
    }

    fn fru_inventory(&mut self) -> Result<FruInventory, SessionError> {
        let output = self.run(&["fru", "print", "0"])?;
        Ok(parse_fru_inventory(&output))
    }

    fn chassis_control(&mut self, control: ChassisControl) -> Result<(), SessionError> {
        self.run(&["chassis", "power", control_arg(control)])
            .map(|_| ())
    }
}

fn control_arg(control: ChassisControl) -> &'static str {
    match control {
        ChassisControl::PowerUp => "on",
        ChassisControl::PowerDown => "off",
        ChassisControl::SoftShutdown => "soft",
        ChassisControl::PowerCycle => "cycle",
        ChassisControl::HardReset => "reset",
    }
}

fn is_connection_failure(stderr: &str) -> bool {
    // "Unable to establish IPMI v2 / RMCP+ session" and friends; RAKP
    // messages mean the authentication handshake itself failed.
    stderr.contains("Unable to establish") || stderr.contains("RAKP")
}

fn parse_power_status(output: &str) -> Result<ChassisStatus, SessionError> {
    if output.contains("Chassis Power is on") {
        Ok(ChassisStatus { power_on: true })
    } else if output.contains("Chassis Power is off") {
        Ok(ChassisStatus { power_on: false })
    } else {
        Err(SessionError::MalformedResponse {
            what: "chassis power status",
            output: output.trim().to_string(),
        })
    }
}

fn parse_power_reading(output: &str) -> Result<u32, SessionError> {
    for line in output.lines() {
        if let Some((label, value)) = line.split_once(':') {
            if label.trim() != "Instantaneous power reading" {
                continue;
            }
            return value
                .split_whitespace()
                .next()
                .and_then(|watts| watts.parse().ok())
                .ok_or_else(|| SessionError::MalformedResponse {
                    what: "power reading",
                    output: output.trim().to_string(),
                });
        }
    }
    Err(SessionError::MalformedResponse {
        what: "power reading",
        output: output.trim().to_string(),
    })
}

fn parse_fru_inventory(output: &str) -> FruInventory {
    let mut fru = FruInventory::default();
    for line in output.lines() {
        if let Some((label, value)) = line.split_once(':') {
            let field = match label.trim() {
                "Product Manufacturer" => &mut fru.product.manufacturer,
                "Product Part Number" => &mut fru.product.part_number,
                "Product Serial" => &mut fru.product.serial_number,
                "Board Mfg" => &mut fru.board.manufacturer,
                "Board Part Number" => &mut fru.board.part_number,
                "Board Serial" => &mut fru.board.serial_number,
                _ => continue,
            };
            *field = value.trim().to_string();
        }
    }
    fru
}
