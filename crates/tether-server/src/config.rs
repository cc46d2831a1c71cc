use std::time::Duration;

/// Server configuration.
#[derive(Clone, Debug)]
pub struct ServerConfig {
    /// Listen port; 0 picks an ephemeral one.
    pub port: u16,
    /// Frames buffered per transport before the session treats it as stalled.
    pub transport_queue: usize,
    pub sweep_interval: Duration,
    pub heartbeat_interval: Duration,
    /// How long a long-poll request waits for the first frame.
    pub poll_timeout: Duration,
    /// Document title of the bootstrap page.
    pub title: String,
    /// Script the bootstrap page loads to run the browser side of the bridge.
    pub client_script: String,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            port: 8080,
            transport_queue: 256,
            sweep_interval: Duration::from_secs(30),
            heartbeat_interval: Duration::from_secs(30),
            poll_timeout: Duration::from_secs(25),
            title: "tether".into(),
            client_script: "/tether.js".into(),
        }
    }
}
