//! Configuration for the bus client

use crate::error::{BusError, Result};
use std::time::Duration;
use url::Url;

/// Configuration for connecting to a bus endpoint
#[derive(Debug, Clone)]
pub struct BusConfig {
    /// Endpoint URL (e.g., "ws://localhost:4224/")
    pub url: String,

    /// Fixed delay between dial attempts
    pub reconnect_delay: Duration,

    /// Capacity of the queue feeding the connection writer
    pub outbound_capacity: usize,

    /// Capacity of the queue between the connection reader and the root router
    pub inbound_capacity: usize,

    /// Inbound queue capacity of typed and identifier routers
    pub router_capacity: usize,

    /// Stream capacity of each attached callback
    pub subscriber_capacity: usize,

    /// Control queue capacity of each router
    pub control_capacity: usize,

    /// Re-announce local definitions and subscriptions after a reconnect
    pub replay_on_reconnect: bool,
}

impl BusConfig {
    /// Create a new configuration for the given endpoint URL
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            reconnect_delay: Duration::from_secs(2),
            outbound_capacity: 30,
            inbound_capacity: 30,
            router_capacity: 10,
            subscriber_capacity: 10,
            control_capacity: 5,
            replay_on_reconnect: true,
        }
    }

    /// Parse and validate the endpoint URL
    pub fn endpoint(&self) -> Result<Url> {
        let url = Url::parse(&self.url)
            .map_err(|e| BusError::InvalidEndpoint(format!("{}: {}", self.url, e)))?;

        match url.scheme() {
            "ws" => {}
            "wss" if cfg!(feature = "tls") => {}
            "wss" => {
                return Err(BusError::InvalidEndpoint(format!(
                    "{}: wss requires the tls feature",
                    self.url
                )))
            }
            scheme => {
                return Err(BusError::InvalidEndpoint(format!(
                    "{}: unsupported scheme '{}'",
                    self.url, scheme
                )))
            }
        }

        if url.host_str().is_none() {
            return Err(BusError::InvalidEndpoint(format!("{}: missing host", self.url)));
        }

        Ok(url)
    }

    /// Check every setting, returning the parsed endpoint
    ///
    /// Called once when a client is built; a config that passes here cannot
    /// fail later for configuration reasons.
    pub fn validate(&self) -> Result<Url> {
        let capacities = [
            ("outbound_capacity", self.outbound_capacity),
            ("inbound_capacity", self.inbound_capacity),
            ("router_capacity", self.router_capacity),
            ("subscriber_capacity", self.subscriber_capacity),
            ("control_capacity", self.control_capacity),
        ];
        if let Some((name, _)) = capacities.iter().find(|(_, capacity)| *capacity == 0) {
            return Err(BusError::InvalidConfig(format!("{} must be greater than zero", name)));
        }
        self.endpoint()
    }

    /// Set the delay between dial attempts
    pub fn reconnect_delay(mut self, delay: Duration) -> Self {
        self.reconnect_delay = delay;
        self
    }

    /// Set both transport queue capacities
    pub fn queue_capacity(mut self, capacity: usize) -> Self {
        self.outbound_capacity = capacity;
        self.inbound_capacity = capacity;
        self
    }

    /// Set the inbound queue capacity of typed and identifier routers
    pub fn router_capacity(mut self, capacity: usize) -> Self {
        self.router_capacity = capacity;
        self
    }

    /// Set the stream capacity of each attached callback
    pub fn subscriber_capacity(mut self, capacity: usize) -> Self {
        self.subscriber_capacity = capacity;
        self
    }

    /// Do not re-announce local state after a reconnect
    pub fn no_replay(mut self) -> Self {
        self.replay_on_reconnect = false;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_config_new_defaults() {
        let config = BusConfig::new("ws://localhost:4224/");

        assert_eq!(config.url, "ws://localhost:4224/");
        assert_eq!(config.reconnect_delay, Duration::from_secs(2));
        assert_eq!(config.outbound_capacity, 30);
        assert_eq!(config.inbound_capacity, 30);
        assert_eq!(config.router_capacity, 10);
        assert_eq!(config.subscriber_capacity, 10);
        assert_eq!(config.control_capacity, 5);
        assert!(config.replay_on_reconnect);
    }

    #[test]
    fn test_config_builder_chain() {
        let config = BusConfig::new("ws://bus.local:4224/")
            .reconnect_delay(Duration::from_millis(50))
            .queue_capacity(64)
            .router_capacity(16)
            .subscriber_capacity(4)
            .no_replay();

        assert_eq!(config.reconnect_delay, Duration::from_millis(50));
        assert_eq!(config.outbound_capacity, 64);
        assert_eq!(config.inbound_capacity, 64);
        assert_eq!(config.router_capacity, 16);
        assert_eq!(config.subscriber_capacity, 4);
        assert!(!config.replay_on_reconnect);
    }

    #[test]
    fn test_endpoint_valid() {
        let url = BusConfig::new("ws://localhost:4224/").endpoint().unwrap();
        assert_eq!(url.host_str(), Some("localhost"));
        assert_eq!(url.port(), Some(4224));
    }

    #[cfg(feature = "tls")]
    #[test]
    fn test_endpoint_wss_with_tls() {
        assert!(BusConfig::new("wss://bus.example.com/ws").endpoint().is_ok());
    }

    #[cfg(not(feature = "tls"))]
    #[test]
    fn test_endpoint_wss_without_tls_rejected() {
        let err = BusConfig::new("wss://bus.example.com/ws").endpoint().unwrap_err();
        assert!(matches!(err, BusError::InvalidEndpoint(_)));
        assert!(err.to_string().contains("wss requires the tls feature"));
    }

    #[test]
    fn test_zero_capacity_rejected() {
        let cases = [
            ("outbound_capacity", BusConfig::new("ws://localhost/").queue_capacity(0)),
            ("router_capacity", BusConfig::new("ws://localhost/").router_capacity(0)),
            ("subscriber_capacity", BusConfig::new("ws://localhost/").subscriber_capacity(0)),
            (
                "control_capacity",
                BusConfig {
                    control_capacity: 0,
                    ..BusConfig::new("ws://localhost/")
                },
            ),
            (
                "inbound_capacity",
                BusConfig {
                    inbound_capacity: 0,
                    ..BusConfig::new("ws://localhost/")
                },
            ),
        ];

        for (name, config) in cases {
            let err = config.validate().unwrap_err();
            assert!(matches!(err, BusError::InvalidConfig(_)), "{}: {:?}", name, err);
            assert!(err.to_string().contains(name), "{}: {}", name, err);
        }
    }

    #[test]
    fn test_validate_checks_endpoint() {
        assert!(BusConfig::new("ws://localhost/").validate().is_ok());
        assert!(matches!(
            BusConfig::new("ftp://localhost/").validate(),
            Err(BusError::InvalidEndpoint(_))
        ));
    }

    #[test]
    fn test_endpoint_unparseable() {
        let err = BusConfig::new("not a url").endpoint().unwrap_err();
        assert!(matches!(err, BusError::InvalidEndpoint(_)));
    }

    #[test]
    fn test_endpoint_wrong_scheme() {
        let err = BusConfig::new("https://localhost:4224/").endpoint().unwrap_err();
        assert!(err.to_string().contains("unsupported scheme 'https'"));
    }
}
