//! In-band transport through the local `ipmitool` binary.
//! One process per request, strictly sequential.

use async_trait::async_trait;
use tracing::{debug, info};

use super::ipmitool::IpmiTool;
use super::probe::{cli_supported, probe_dcmi_thermal};
use super::{Capabilities, IpmiTransport};
use crate::ipmi::catalog::Protocol;
use crate::ipmi::{hex, IpmiRequest, IpmiResponse, RequestDescription, Result};

pub struct LocalIpmiTool {
    tool: IpmiTool,
    protocol: Protocol,
}

impl LocalIpmiTool {
    pub fn new(tool: IpmiTool, protocol: Protocol) -> Self {
        Self { tool, protocol }
    }

    async fn run(&self, request: &IpmiRequest, bridged: bool) -> Result<IpmiResponse> {
        debug!("ipmitool raw {}", hex(&request.data));
        let data = self.tool.run(&self.tool.raw_args(request, bridged)).await?;
        // ipmitool has no way of telling an invalid answer apart
        Ok(IpmiResponse::valid(data))
    }
}

/// Host key used for the local machine's capabilities.
pub(crate) fn local_host(hosts: &[String]) -> String {
    if let Some(host) = hosts.first() {
        return host.clone();
    }
    hostname::get()
        .ok()
        .and_then(|h| h.into_string().ok())
        .unwrap_or_else(|| "localhost".to_string())
}

#[async_trait]
impl IpmiTransport for LocalIpmiTool {
    async fn exec_raw(&self, request: &IpmiRequest, _host: &str) -> Result<IpmiResponse> {
        self.run(request, false).await
    }

    async fn batch_exec_raw(&self, requests: &[IpmiRequest], _host: &str) -> Result<Vec<IpmiResponse>> {
        let mut responses = Vec::with_capacity(requests.len());
        for request in requests {
            responses.push(self.run(request, true).await?);
        }
        Ok(responses)
    }

    async fn platform_capabilities(&self, candidates: &[RequestDescription], hosts: &[String]) -> Capabilities {
        let host = local_host(hosts);
        let mut supported = Vec::new();

        for candidate in candidates {
            match self.run(&candidate.request, true).await {
                Ok(resp) if cli_supported(&resp.data) => supported.push(candidate.clone()),
                Ok(_) => debug!("{} not supported on {}", candidate.metrics_root, host),
                Err(e) => debug!("Probe of {} failed on {}: {}", candidate.metrics_root, host, e),
            }
        }

        if self.protocol == Protocol::Dcmi {
            if let Some(thermal) = probe_dcmi_thermal(self, &host).await {
                supported.push(thermal);
            }
        }

        info!("{}: {} of {} requests supported", host, supported.len(), candidates.len());
        let mut capabilities = Capabilities::new();
        capabilities.insert(host, supported);
        capabilities
    }
}
