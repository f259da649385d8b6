use std::time::Duration;

use paho_mqtt as mqtt;
use snafu::{ResultExt, Snafu};

use crate::config::MqttConfig;

const MQTT_CLIENT_ID: &str = "ipmi2mqtt";
const MQTT_MIN_RETRY_INTERVAL_SECS: u64 = 1;
const MQTT_MAX_RETRY_INTERVAL_SECS: u64 = 60;

#[derive(Debug, Snafu)]
pub enum BrokerError {
    #[snafu(display("Error creating mqtt client: {source}"))]
    CreateClient { source: mqtt::Error },
    #[snafu(display("Cannot connect to mqtt server: {source}"))]
    Connect { source: mqtt::Error },
    #[snafu(display("Cannot subscribe to {topic}: {source}"))]
    Subscribe { topic: String, source: mqtt::Error },
}

#[derive(Debug, Snafu)]
#[snafu(visibility(pub(crate)))]
pub enum PublishError {
    #[snafu(display("Cannot publish to {topic}: {source}"))]
    Send { topic: String, source: mqtt::Error },
    #[snafu(display("Error when serializing discovery message: {source}"))]
    Serialize { source: serde_json::Error },
}

/// Outbound half of the broker connection, shared between the pollers and
/// the command router.
pub trait Publish {
    fn publish(&self, topic: &str, payload: &str) -> Result<(), PublishError>;
    fn publish_retained(&self, topic: &str, payload: &str) -> Result<(), PublishError>;
}

pub struct Broker {
    client: mqtt::Client,
}

impl Broker {
    /// Connects to the broker and starts the consumer queue. The returned
    /// receiver yields every message for the subscribed topics; `None`
    /// entries mark a dropped connection that paho is reestablishing.
    pub fn connect(
        cfg: &MqttConfig,
        keep_alive: Duration,
    ) -> Result<(Broker, mqtt::Receiver<Option<mqtt::Message>>), BrokerError> {
        let create_opts = mqtt::CreateOptionsBuilder::new()
            .server_uri(server_uri(cfg))
            .client_id(MQTT_CLIENT_ID)
            .finalize();
        let mut client = mqtt::Client::new(create_opts).context(CreateClientSnafu)?;
        // Consuming must start before connect so no command is lost between
        // the two.
        let receiver = client.start_consuming();

        let mut conn_opts_builder = mqtt::ConnectOptionsBuilder::new();
        conn_opts_builder
            .keep_alive_interval(keep_alive)
            .automatic_reconnect(
                Duration::from_secs(MQTT_MIN_RETRY_INTERVAL_SECS),
                Duration::from_secs(MQTT_MAX_RETRY_INTERVAL_SECS),
            )
            .clean_session(true);
        if let (Some(user), Some(password)) = (&cfg.username, &cfg.password) {
            conn_opts_builder.user_name(user).password(password);
        }
        client
            .connect(conn_opts_builder.finalize())
            .context(ConnectSnafu)?;

        Ok((Broker { client }, receiver))
    }

    pub fn subscribe(&self, topic: &str) -> Result<(), BrokerError> {
        self.client
            .subscribe(topic, 0)
            .context(SubscribeSnafu { topic })?;
        Ok(())
    }
}

impl Publish for Broker {
    fn publish(&self, topic: &str, payload: &str) -> Result<(), PublishError> {
        log::trace!("Sending message to {topic}: {payload}");
        let msg = mqtt::Message::new(topic, payload, 0);
        self.client.publish(msg).context(SendSnafu { topic })
    }

    fn publish_retained(&self, topic: &str, payload: &str) -> Result<(), PublishError> {
        log::trace!("Sending message to {topic}: {payload}");
        let msg = mqtt::Message::new_retained(topic, payload, 0);
        self.client.publish(msg).context(SendSnafu { topic })
    }
}

fn server_uri(cfg: &MqttConfig) -> String {
    format!("tcp://{}:{}", cfg.host, cfg.port)
}
