//! Transport abstraction: one capability set, three ways of reaching a BMC.
//!
//! - `openipmi`: in-band through the kernel IPMI driver (`/dev/ipmi0`)
//! - `local`:    in-band through the `ipmitool` CLI
//! - `remote`:   out-of-band through `ipmitool -I lanplus`
//!
//! No operation here supports cancellation or adds its own timeout; callers
//! needing bounded latency wrap the futures themselves.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use super::catalog::Protocol;
use super::{IpmiRequest, IpmiResponse, RequestDescription, Result};

pub mod ipmitool;
pub mod local;
pub mod openipmi;
pub mod probe;
pub mod remote;

pub use local::LocalIpmiTool;
pub use openipmi::OpenIpmi;
pub use remote::RemoteIpmiTool;

/// Per-host list of requests the platform answered during probing.
pub type Capabilities = HashMap<String, Vec<RequestDescription>>;

#[async_trait]
pub trait IpmiTransport: Send + Sync {
    /// Execute a single request against `host`.
    async fn exec_raw(&self, request: &IpmiRequest, host: &str) -> Result<IpmiResponse>;

    /// Execute a batch; responses come back in request order.
    async fn batch_exec_raw(&self, requests: &[IpmiRequest], host: &str) -> Result<Vec<IpmiResponse>>;

    /// Probe every candidate against every host and keep the supported ones.
    async fn platform_capabilities(&self, candidates: &[RequestDescription], hosts: &[String]) -> Capabilities;
}

/// How the collector reaches the BMC.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TransportMode {
    /// Local `ipmitool raw`.
    #[default]
    LegacyInband,
    /// Remote `ipmitool -I lanplus`.
    Oob,
    /// Kernel driver ioctl batch.
    LegacyInbandOpenipmi,
}

/// Everything needed to construct a transport.
#[derive(Debug, Clone)]
pub struct TransportOptions {
    pub mode: TransportMode,
    pub protocol: Protocol,
    pub device: String,
    pub tool: String,
    pub bridge: ipmitool::Bridge,
    pub user: String,
    pub password: String,
}

/// Build the transport selected by `options.mode`.
pub fn connect(options: &TransportOptions) -> Arc<dyn IpmiTransport> {
    let tool = ipmitool::IpmiTool::new(&options.tool, options.bridge);
    match options.mode {
        TransportMode::LegacyInband => Arc::new(LocalIpmiTool::new(tool, options.protocol)),
        TransportMode::Oob => Arc::new(RemoteIpmiTool::new(
            tool,
            &options.user,
            &options.password,
            options.protocol,
        )),
        TransportMode::LegacyInbandOpenipmi => Arc::new(OpenIpmi::new(&options.device, options.protocol)),
    }
}
