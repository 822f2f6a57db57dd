//! # Slave configuration
//!
//! Parsed once at startup, mirroring the master's `clap` + `env` setup
//! (§6, SPEC_FULL 10.2). Unlike the master, a slave with missing required
//! settings cannot run in any degraded mode — there is no "standalone
//! slave" — so a missing `master_url`, `slave_id`, or `cluster_secret` is a
//! hard configuration error that exits before the process does anything
//! else (§7).

use clap::Parser;
use std::time::Duration;

#[derive(Debug, Clone, Parser)]
#[command(name = "slave", about = "Cluster tunnel fabric — slave node")]
pub struct Config {
    #[arg(long, env = "DEPLOYMENT_MODE", default_value = "slave")]
    pub deployment_mode: String,

    /// Base URL of the master's HTTP/WS listener, e.g. `ws://master:7070`.
    #[arg(long, env = "MASTER_URL")]
    pub master_url: String,

    /// This slave's id, as registered in the master's slave registry (C2).
    #[arg(long, env = "SLAVE_ID")]
    pub slave_id: String,

    /// Display name shown in `/api/cluster/slaves`. Defaults to the id.
    #[arg(long, env = "SLAVE_NAME")]
    pub slave_name: Option<String>,

    /// Shared secret presented during the `auth` handshake.
    #[arg(long, env = "CLUSTER_SECRET")]
    pub cluster_secret: String,

    /// Port the local service listens on.
    #[arg(long, env = "PORT", default_value_t = 3000)]
    pub port: u16,

    #[arg(long, env = "RECONNECT_BASE_DELAY_SECS", default_value_t = 5)]
    pub reconnect_base_delay_secs: u64,

    #[arg(long, env = "RECONNECT_MAX_DELAY_SECS", default_value_t = 60)]
    pub reconnect_max_delay_secs: u64,
}

impl Config {
    pub fn slave_name(&self) -> String {
        self.slave_name.clone().unwrap_or_else(|| self.slave_id.clone())
    }

    /// The `/cluster/tunnel` control-connection URL on the master.
    pub fn control_url(&self) -> String {
        format!("{}/cluster/tunnel", self.master_url.trim_end_matches('/'))
    }

    pub fn reconnect_base_delay(&self) -> Duration {
        Duration::from_secs(self.reconnect_base_delay_secs)
    }

    pub fn reconnect_max_delay(&self) -> Duration {
        Duration::from_secs(self.reconnect_max_delay_secs)
    }
}
