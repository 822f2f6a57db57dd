//! # Master configuration
//!
//! Parsed once at startup from CLI flags/environment variables (§6) using
//! `clap`'s `env` feature, so every setting can be supplied either way.
//! Missing `CLUSTER_SECRET` is not a hard failure: per §7, the master
//! starts without cluster mode (a "standalone" server with no tunnel
//! manager) and logs a warning instead.

use clap::Parser;
use std::time::Duration;

#[derive(Debug, Clone, Parser)]
#[command(name = "master", about = "Cluster tunnel fabric — master node")]
pub struct Config {
    /// "master" enables the tunnel manager; anything else runs standalone.
    #[arg(long, env = "DEPLOYMENT_MODE", default_value = "master")]
    pub deployment_mode: String,

    /// Shared secret slaves must present during the auth handshake.
    #[arg(long, env = "CLUSTER_SECRET")]
    pub cluster_secret: Option<String>,

    /// Address the HTTP/WS listener binds to.
    #[arg(long, env = "BIND_ADDR", default_value = "0.0.0.0:7070")]
    pub bind_addr: String,

    /// Deadline for a slave to complete the `auth` handshake.
    #[arg(long, env = "AUTH_TIMEOUT_SECS", default_value_t = 10)]
    pub auth_timeout_secs: u64,

    /// Deadline for a forwarded HTTP request to receive a `response` frame.
    #[arg(long, env = "REQUEST_TIMEOUT_SECS", default_value_t = 30)]
    pub request_timeout_secs: u64,
}

impl Config {
    pub fn auth_timeout(&self) -> Duration {
        Duration::from_secs(self.auth_timeout_secs)
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }

    /// Whether the tunnel manager should be instantiated at all. A master
    /// started without a shared secret cannot authenticate slaves, so it
    /// runs in standalone mode (spec §7, §8's "mode: standalone").
    pub fn cluster_mode_enabled(&self) -> bool {
        self.deployment_mode == "master" && self.cluster_secret.is_some()
    }
}
