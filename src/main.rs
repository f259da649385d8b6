use std::collections::HashSet;
use std::fs::File;
use std::io::BufReader;
use std::path::PathBuf;
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use clap::Parser;
use snafu::{whatever, ResultExt, Whatever};

mod command;
mod config;
mod hass;
mod ipmi;
mod ipmitool;
mod mqtt;
mod poll;

use crate::config::Config;
use crate::ipmitool::Ipmitool;
use crate::mqtt::Broker;

#[derive(Parser, Debug)]
struct Args {
    config: PathBuf,
}

fn main() -> Result<(), Whatever> {
    let args = Args::parse();

    let config_file = File::open(&args.config)
        .with_whatever_context(|e| format!("Cannot open config file: {e}"))?;
    let config_reader = BufReader::new(config_file);
    let config: Config = serde_yaml::from_reader(config_reader)
        .with_whatever_context(|e| format!("Error when parsing config file: {e}"))?;

    init_logging(config.output);

    // Device names go into topic paths verbatim, so a duplicate would cross
    // two devices' states and commands.
    let mut names = HashSet::new();
    for device in &config.devices {
        if !names.insert(device.name.as_str()) {
            whatever!("Duplicate device name in config: '{}'", device.name);
        }
    }

    let keep_alive = Duration::from_secs(config.ipmi.interval * 2);
    let (broker, rx) = Broker::connect(&config.mqtt, keep_alive)
        .with_whatever_context(|e| format!("Error when setting up mqtt: {e}"))?;
    log::info!("MQTT Connected");

    let routes = command::routes(&config);
    for topic in routes.keys() {
        broker
            .subscribe(topic)
            .with_whatever_context(|e| format!("Error when subscribing to commands: {e}"))?;
        log::info!("Subscribed to {topic}");
    }

    let broker = Arc::new(broker);
    let connector = Arc::new(Ipmitool::new(config.ipmi.clone()));

    {
        let connector = Arc::clone(&connector);
        let broker = Arc::clone(&broker);
        thread::Builder::new()
            .name("mqtt-router".to_string())
            .spawn(move || command::run_router(rx, routes, connector, broker))
            .with_whatever_context(|e| format!("Cannot start the command router: {e}"))?;
    }

    poll::run_scheduler(&config, connector, broker)
}

fn init_logging(output: u8) {
    let level = match output {
        0 => log::LevelFilter::Warn,
        1 => log::LevelFilter::Info,
        2 => log::LevelFilter::Debug,
        _ => log::LevelFilter::Trace,
    };
    env_logger::Builder::new()
        .filter_level(level)
        .parse_default_env()
        .init();
}
