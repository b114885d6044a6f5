use std::time::Duration;

use clap::Parser;

/// Configuration recognised by the wire protocol server, per spec §4.F:
/// `{bind, port, pingTimeout, authSaltBytes=4, dialectName, channelCapacity}`.
#[derive(Parser, Debug, Clone)]
#[command(name = "dmr-gateway", about = "DMR Homebrew/MMDVM UDP gateway")]
pub struct Config {
    #[arg(long, default_value = "0.0.0.0")]
    pub bind: String,

    #[arg(long, default_value_t = 62031)]
    pub port: u16,

    /// Seconds between inbound packets before a repeater is force-expired.
    #[arg(long, default_value_t = 30)]
    pub ping_timeout_secs: u64,

    #[arg(long, default_value = "mmdvm")]
    pub dialect_name: String,

    /// Registration channel capacity (§5, ≈500).
    #[arg(long, default_value_t = 500)]
    pub channel_capacity: usize,

    #[arg(long, env = "DMR_DATABASE_URL")]
    pub database_url: String,

    #[arg(long, default_value = "0.0.0.0:9100")]
    pub metrics_listen: String,

    /// Minimum interval between `last_connected_at` DB writes for the
    /// same repeater, per spec §5's keepalive-write debounce.
    #[arg(long, default_value_t = 30)]
    pub keepalive_debounce_secs: u64,
}

impl Config {
    pub fn ping_timeout(&self) -> Duration {
        Duration::from_secs(self.ping_timeout_secs)
    }

    pub fn keepalive_debounce(&self) -> Duration {
        Duration::from_secs(self.keepalive_debounce_secs)
    }
}
