//! Server configuration: defaults, then `feed.toml`, then `FEED_*` env vars.

use std::{
    net::{Ipv4Addr, SocketAddr},
    path::Path,
};

use figment::{
    Figment,
    providers::{Env, Format, Serialized, Toml},
};
use serde::{Deserialize, Serialize};
use task_feed_session::FeedConfig;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServerConfig {
    #[serde(default = "default_bind")]
    pub bind: SocketAddr,
    /// Named viewers allowed to watch feeds; empty lets everyone in.
    #[serde(default)]
    pub viewers: Vec<String>,
    #[serde(default)]
    pub feed: FeedConfig,
    #[serde(default)]
    pub simulate: SimulateConfig,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind: default_bind(),
            viewers: Vec::new(),
            feed: FeedConfig::default(),
            simulate: SimulateConfig::default(),
        }
    }
}

/// Simulated producer writing install and job progress.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SimulateConfig {
    #[serde(default = "default_tasks")]
    pub tasks: u32,
    #[serde(default = "default_steps")]
    pub steps: u32,
    #[serde(default = "default_hosts")]
    pub hosts: u32,
    /// Pause between two produced entries.
    #[serde(default = "default_interval_ms")]
    pub interval_ms: u64,
}

impl Default for SimulateConfig {
    fn default() -> Self {
        Self {
            tasks: default_tasks(),
            steps: default_steps(),
            hosts: default_hosts(),
            interval_ms: default_interval_ms(),
        }
    }
}

fn default_bind() -> SocketAddr {
    SocketAddr::from((Ipv4Addr::LOCALHOST, 3000))
}
const fn default_tasks() -> u32 {
    3
}
const fn default_steps() -> u32 {
    4
}
const fn default_hosts() -> u32 {
    2
}
const fn default_interval_ms() -> u64 {
    500
}

/// Layer the config sources; a `--bind` flag wins over all of them.
pub fn load(path: &Path, bind: Option<SocketAddr>) -> Figment {
    let figment = Figment::from(Serialized::defaults(ServerConfig::default()))
        .merge(Toml::file(path))
        .merge(Env::prefixed("FEED_").split("__"));
    match bind {
        Some(bind) => figment.merge(Serialized::default("bind", bind)),
        None => figment,
    }
}
