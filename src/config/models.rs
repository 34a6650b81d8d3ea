//! Configuration surface consumed at startup (§6). Every recognized value
//! is defaulted; `AppConfig::validate` enforces the ranges named in spec.
use std::collections::HashMap;
use std::time::Duration;

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub server: ServerConfig,
    pub tls: TlsConfig,
    pub backends: BackendsConfig,
    pub health: HealthConfig,
    pub ratelimit: RateLimitConfig,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            server: ServerConfig::default(),
            tls: TlsConfig::default(),
            backends: BackendsConfig::default(),
            health: HealthConfig::default(),
            ratelimit: RateLimitConfig::default(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
    pub https_port: u16,
    pub read_timeout_secs: u64,
    pub write_timeout_secs: u64,
    pub idle_timeout_secs: u64,
    pub graceful_timeout_secs: u64,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 8080,
            https_port: 8443,
            read_timeout_secs: 15,
            write_timeout_secs: 15,
            idle_timeout_secs: 60,
            graceful_timeout_secs: 30,
        }
    }
}

impl ServerConfig {
    pub fn read_timeout(&self) -> Duration {
        Duration::from_secs(self.read_timeout_secs)
    }
    pub fn write_timeout(&self) -> Duration {
        Duration::from_secs(self.write_timeout_secs)
    }
    pub fn idle_timeout(&self) -> Duration {
        Duration::from_secs(self.idle_timeout_secs)
    }
    pub fn graceful_timeout(&self) -> Duration {
        Duration::from_secs(self.graceful_timeout_secs)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TlsConfig {
    pub enabled: bool,
    pub auto_cert: bool,
    pub email: String,
    pub domains: Vec<String>,
    pub cache_dir: String,
    pub staging: bool,
    pub renew_before_days: u64,
    pub min_version: TlsVersion,
    pub cipher_suites: Vec<String>,
}

impl Default for TlsConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            auto_cert: false,
            email: String::new(),
            domains: Vec::new(),
            cache_dir: "./certs".to_string(),
            staging: true,
            renew_before_days: 30,
            min_version: TlsVersion::V1_2,
            cipher_suites: Vec::new(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TlsVersion {
    #[serde(rename = "1.2")]
    V1_2,
    #[serde(rename = "1.3")]
    V1_3,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct BackendsConfig {
    pub routes: HashMap<String, RouteConfig>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RouteConfig {
    pub url: String,
    pub health_path: String,
    pub health_interval_secs: u64,
    pub timeout_secs: u64,
    pub max_idle_conns: usize,
    pub max_idle_per_host: usize,
    pub dial_timeout_secs: u64,
}

impl Default for RouteConfig {
    fn default() -> Self {
        Self {
            url: String::new(),
            health_path: "/health".to_string(),
            health_interval_secs: 10,
            timeout_secs: 30,
            max_idle_conns: 100,
            max_idle_per_host: 10,
            dial_timeout_secs: 5,
        }
    }
}

impl RouteConfig {
    pub fn dial_timeout(&self) -> Duration {
        Duration::from_secs(self.dial_timeout_secs)
    }
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
    pub fn health_interval(&self) -> Duration {
        Duration::from_secs(self.health_interval_secs)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct HealthConfig {
    pub enabled: bool,
    pub path: String,
    pub timeout_secs: u64,
    pub interval_secs: u64,
    pub unhealthy_threshold: u32,
    pub healthy_threshold: u32,
}

impl Default for HealthConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            path: "/health".to_string(),
            timeout_secs: 5,
            interval_secs: 10,
            unhealthy_threshold: 3,
            healthy_threshold: 2,
        }
    }
}

impl HealthConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
    pub fn interval(&self) -> Duration {
        Duration::from_secs(self.interval_secs)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
pub enum RateLimitBy {
    #[default]
    #[serde(rename = "route")]
    Route,
    #[serde(rename = "ip")]
    Ip,
    #[serde(rename = "header")]
    Header,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
pub enum MissingKeyPolicy {
    #[default]
    #[serde(rename = "allow")]
    Allow,
    #[serde(rename = "deny")]
    Deny,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RateLimitConfig {
    pub enabled: bool,
    pub requests_per_second: u32,
    pub burst_size: u32,
    pub cleanup_interval_secs: u64,
    pub by: RateLimitBy,
    pub header_name: Option<String>,
    pub on_missing_key: MissingKeyPolicy,
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            requests_per_second: 50,
            burst_size: 100,
            cleanup_interval_secs: 60,
            by: RateLimitBy::Route,
            header_name: None,
            on_missing_key: MissingKeyPolicy::Allow,
        }
    }
}

impl RateLimitConfig {
    pub fn cleanup_interval(&self) -> Duration {
        Duration::from_secs(self.cleanup_interval_secs)
    }
}
