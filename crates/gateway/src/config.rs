// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Gateway configuration.
//!
//! Loaded from a YAML file merged over serialized defaults; every key is
//! optional in the file, but the file itself must exist. Key names follow the
//! deployment convention (`channel.actionTimeout`, `channel.services.redis.*`).

use std::path::Path;
use std::time::Duration;

use figment::providers::{Format, Serialized, Yaml};
use figment::Figment;
use serde::{Deserialize, Serialize};

/// Root of the configuration file.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct GatewayConfig {
    #[serde(default)]
    pub channel: ChannelConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ChannelConfig {
    /// Host to bind the edge listener on.
    pub host: String,
    /// Port to listen on.
    pub port: u16,
    /// Bus request window in seconds. The configured value is authoritative
    /// for every dispatch; there is no hard-coded fallback.
    pub action_timeout: u64,
    /// Seconds of client-socket silence tolerated before teardown.
    pub pong_timeout: u64,
    /// Healthcheck response body.
    pub working_text: String,
    pub services: ServicesConfig,
}

impl Default for ChannelConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_owned(),
            port: 3000,
            action_timeout: 5,
            pong_timeout: 60,
            working_text: "WORKING".to_owned(),
            services: ServicesConfig::default(),
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ServicesConfig {
    pub session_manager: SessionManagerConfig,
    pub redis: RedisConfig,
    pub nats: NatsConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionManagerConfig {
    /// Session TTL in seconds.
    pub expiration: u64,
}

impl Default for SessionManagerConfig {
    fn default() -> Self {
        Self { expiration: 180 }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RedisConfig {
    pub host: String,
    pub port: u16,
    pub password: String,
    pub db: i64,
}

impl Default for RedisConfig {
    fn default() -> Self {
        Self { host: "localhost".to_owned(), port: 6379, password: String::new(), db: 0 }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct NatsConfig {
    pub url: String,
}

impl Default for NatsConfig {
    fn default() -> Self {
        Self { url: "nats://localhost:4222".to_owned() }
    }
}

impl GatewayConfig {
    /// Load from a YAML file, merging file values over defaults.
    /// A missing file is a startup error.
    pub fn load(path: &Path) -> anyhow::Result<Self> {
        if !path.is_file() {
            anyhow::bail!("config file {} does not exist", path.display());
        }
        let config: Self = Figment::new()
            .merge(Serialized::defaults(Self::default()))
            .merge(Yaml::file(path))
            .extract()?;
        Ok(config)
    }

    pub fn bind_addr(&self) -> String {
        format!("{}:{}", self.channel.host, self.channel.port)
    }

    pub fn action_timeout(&self) -> Duration {
        Duration::from_secs(self.channel.action_timeout)
    }

    pub fn pong_timeout(&self) -> Duration {
        Duration::from_secs(self.channel.pong_timeout)
    }
}

#[cfg(test)]
#[path = "config_tests.rs"]
mod tests;
