//! Collector configuration structs and defaults.

use serde::{Deserialize, Serialize};

use crate::collector::CollectorOptions;
use crate::ipmi::catalog::Protocol;
use crate::ipmi::transport::ipmitool::Bridge;
use crate::ipmi::transport::{TransportMode, TransportOptions};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CollectorConfig {
    #[serde(default)]
    pub ipmi: IpmiSettings,
    #[serde(default)]
    pub collector: CollectorSettings,
    #[serde(default = "default_log_level")]
    pub log_level: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct IpmiSettings {
    pub mode: TransportMode,
    pub protocol: Protocol,
    pub device: String,   // native driver node
    pub tool: String,     // ipmitool executable
    pub channel: u8,      // bridging override, used when slave != 0
    pub slave: u8,
    pub hosts: Vec<String>, // oob only
    pub user: String,
    pub password: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CollectorSettings {
    pub update_interval: f64, // seconds
    pub strict_validation: bool,
    pub collect_inventory: bool,
    pub collect_health: bool,
}

pub fn default_log_level() -> String {
    "info".to_string()
}

impl Default for CollectorConfig {
    fn default() -> Self {
        Self {
            ipmi: IpmiSettings::default(),
            collector: CollectorSettings::default(),
            log_level: default_log_level(),
        }
    }
}

impl Default for IpmiSettings {
    fn default() -> Self {
        Self {
            mode: TransportMode::LegacyInband,
            protocol: Protocol::Ipmi,
            device: "/dev/ipmi0".to_string(),
            tool: "ipmitool".to_string(),
            channel: 0,
            slave: 0,
            hosts: Vec::new(),
            user: String::new(),
            password: String::new(),
        }
    }
}

impl Default for CollectorSettings {
    fn default() -> Self {
        Self {
            update_interval: 10.0,
            strict_validation: false,
            collect_inventory: true,
            collect_health: true,
        }
    }
}

impl CollectorConfig {
    /// Apply `DCM_IPMI_HOST`, `DCM_IPMI_USER` and `DCM_IPMI_PASS` when set.
    pub fn apply_env_overrides(&mut self) {
        self.apply_overrides(|key| std::env::var(key).ok());
    }

    pub(crate) fn apply_overrides(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        if let Some(host) = lookup("DCM_IPMI_HOST") {
            self.ipmi.hosts = host
                .split(',')
                .map(str::trim)
                .filter(|h| !h.is_empty())
                .map(str::to_string)
                .collect();
        }
        if let Some(user) = lookup("DCM_IPMI_USER") {
            self.ipmi.user = user;
        }
        if let Some(pass) = lookup("DCM_IPMI_PASS") {
            self.ipmi.password = pass;
        }
    }

    pub fn validate(&self) -> anyhow::Result<()> {
        if self.ipmi.mode == TransportMode::Oob && self.ipmi.hosts.is_empty() {
            anyhow::bail!("oob mode requires at least one host in ipmi.hosts");
        }
        let interval = self.collector.update_interval;
        if interval.is_nan() || interval <= 0.0 {
            anyhow::bail!("collector.update_interval must be positive, got {}", interval);
        }
        Ok(())
    }

    pub fn transport_options(&self) -> TransportOptions {
        TransportOptions {
            mode: self.ipmi.mode,
            protocol: self.ipmi.protocol,
            device: self.ipmi.device.clone(),
            tool: self.ipmi.tool.clone(),
            bridge: Bridge {
                channel: i16::from(self.ipmi.channel),
                slave: self.ipmi.slave,
            },
            user: self.ipmi.user.clone(),
            password: self.ipmi.password.clone(),
        }
    }

    pub fn collector_options(&self) -> CollectorOptions {
        CollectorOptions {
            protocol: self.ipmi.protocol,
            strict_validation: self.collector.strict_validation,
            collect_inventory: self.collector.collect_inventory,
            collect_health: self.collector.collect_health,
        }
    }

    /// Hosts handed to the collector. In-band modes report under the local hostname.
    pub fn hosts(&self) -> Vec<String> {
        match self.ipmi.mode {
            TransportMode::Oob => self.ipmi.hosts.clone(),
            TransportMode::LegacyInband | TransportMode::LegacyInbandOpenipmi => Vec::new(),
        }
    }
}
