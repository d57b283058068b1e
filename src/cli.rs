//! CLI for this application
//!
use std::net::IpAddr;
use std::time::Duration;

use crate::settings;

#[derive(Clone, Debug, clap::Parser)]
#[command(name = settings::APP_NAME, version = settings::APP_VERSION)]
pub struct Cli {
    // Local interface address
    #[clap(
        long,
        default_value = "0.0.0.0",
        env("ROCKETRING_BIND_ADDRESS"),
        help = "IP Address to bind both channels to"
    )]
    pub bind_address: IpAddr,

    // Address peers reach us on
    #[clap(
        long,
        env("ROCKETRING_ADVERTISE_IP"),
        help = "IP Address other nodes use for this node (detected if omitted)"
    )]
    pub advertise_ip: Option<IpAddr>,

    // Shared channel
    #[clap(
        long,
        default_value = settings::DEFAULT_BROADCAST_GROUP,
        env("ROCKETRING_BROADCAST_GROUP"),
        help = "Multicast group or broadcast address of the shared channel"
    )]
    pub broadcast_group: IpAddr,

    #[clap(
        long,
        default_value = settings::DEFAULT_PORT_BROADCAST,
        env("ROCKETRING_BROADCAST_PORT"),
        help = "UDP port of the shared channel"
    )]
    pub broadcast_port: u16,

    // Point-to-point channel
    #[clap(
        long,
        default_value = settings::DEFAULT_PORT_DIRECT,
        env("ROCKETRING_DIRECT_PORT"),
        help = "Well-known UDP port of the direct channel"
    )]
    pub direct_port: u16,

    // Ring parameters used if this node becomes coordinator
    #[clap(
        long,
        default_value = "0.5",
        env("ROCKETRING_FIRE_PROBABILITY"),
        help = "Initial probability of firing a rocket"
    )]
    pub fire_probability: f64,

    #[clap(
        long,
        default_value = "5",
        env("ROCKETRING_QUIET_THRESHOLD"),
        help = "Consecutive quiet rounds before the ring terminates"
    )]
    pub quiet_threshold: u32,

    #[clap(
        long,
        default_value = "10000",
        env("ROCKETRING_DISCOVERY_TIMEOUT_MS"),
        help = "How long to wait for a coordinator before becoming one"
    )]
    pub discovery_timeout_ms: u64,

    #[clap(
        long,
        default_value = "0",
        env("ROCKETRING_ELECTION_JITTER_MS"),
        help = "Upper bound of the random extra wait before self-declaring coordinator"
    )]
    pub election_jitter_ms: u64,

    #[clap(
        long,
        default_value = "500",
        env("ROCKETRING_DISPLAY_DELAY_MS"),
        help = "Pause after firing a rocket"
    )]
    pub display_delay_ms: u64,

    #[clap(
        long,
        default_value = "500",
        env("ROCKETRING_TERMINATION_GRACE_MS"),
        help = "Pause after announcing termination before stopping"
    )]
    pub termination_grace_ms: u64,

    #[clap(
        long,
        default_value = "1000",
        env("ROCKETRING_POLL_INTERVAL_MS"),
        help = "Receive timeout; bounds how quickly a shutdown is noticed"
    )]
    pub poll_interval_ms: u64,

    #[clap(
        long,
        default_value = "2000",
        env("ROCKETRING_RING_START_DELAY_MS"),
        help = "Pause between announcing ring start and injecting the token"
    )]
    pub ring_start_delay_ms: u64,

    #[clap(
        long,
        env("ROCKETRING_MAX_NODES"),
        help = "Reject joins once the lobby holds this many nodes"
    )]
    pub max_nodes: Option<usize>,

    #[clap(
        long,
        env("ROCKETRING_AUTO_START_NODES"),
        help = "Start the ring automatically once this many nodes joined"
    )]
    pub auto_start_nodes: Option<usize>,

    #[clap(long, env("ROCKETRING_SEED"), help = "Seed for fire decisions")]
    pub seed: Option<u64>,

    #[clap(long, env("ROCKETRING_LOG_JSON"), help = "Emit logs as JSON")]
    pub log_json: bool,
}

impl Cli {
    pub fn into_settings(self) -> settings::Settings {
        settings::Settings {
            bind_address: self.bind_address,
            advertise_ip: self.advertise_ip,
            broadcast_group: self.broadcast_group,
            broadcast_port: self.broadcast_port,
            direct_port: self.direct_port,
            fire_probability: self.fire_probability,
            quiet_threshold: self.quiet_threshold,
            discovery_timeout: Duration::from_millis(self.discovery_timeout_ms),
            election_jitter: Duration::from_millis(self.election_jitter_ms),
            display_delay: Duration::from_millis(self.display_delay_ms),
            termination_grace: Duration::from_millis(self.termination_grace_ms),
            ring_start_delay: Duration::from_millis(self.ring_start_delay_ms),
            poll_interval: Duration::from_millis(self.poll_interval_ms),
            max_nodes: self.max_nodes,
            auto_start_nodes: self.auto_start_nodes,
            rng_seed: self.seed,
        }
    }
}
