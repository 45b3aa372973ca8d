//! Out-of-band transport: `ipmitool -I lanplus` against remote BMCs.
//!
//! Requests of a batch are dispatched concurrently and joined, but a single
//! lock serializes the process spawn + parse step, so at most one `ipmitool`
//! runs at a time. Every batch is effectively sequential at the process level.

use std::time::Instant;

use async_trait::async_trait;
use futures_util::future::join_all;
use tokio::sync::Mutex;
use tracing::{debug, info};

use super::ipmitool::IpmiTool;
use super::probe::{cli_supported, probe_dcmi_thermal};
use super::{Capabilities, IpmiTransport};
use crate::ipmi::catalog::Protocol;
use crate::ipmi::{hex, IpmiRequest, IpmiResponse, RequestDescription, Result};

pub struct RemoteIpmiTool {
    tool: IpmiTool,
    user: String,
    password: String,
    protocol: Protocol,
    spawn_lock: Mutex<()>,
}

impl RemoteIpmiTool {
    pub fn new(tool: IpmiTool, user: &str, password: &str, protocol: Protocol) -> Self {
        Self {
            tool,
            user: user.to_string(),
            password: password.to_string(),
            protocol,
            spawn_lock: Mutex::new(()),
        }
    }

    pub(crate) fn args(&self, request: &IpmiRequest, host: &str, bridged: bool) -> Vec<String> {
        let mut args: Vec<String> = vec![
            "-I".into(),
            "lanplus".into(),
            "-H".into(),
            host.into(),
            "-U".into(),
            self.user.clone(),
            "-P".into(),
            self.password.clone(),
        ];
        args.extend(self.tool.raw_args(request, bridged));
        args
    }

    async fn run(&self, request: &IpmiRequest, host: &str, bridged: bool) -> Result<IpmiResponse> {
        let args = self.args(request, host, bridged);
        let _guard = self.spawn_lock.lock().await;
        debug!("{}: ipmitool raw {}", host, hex(&request.data));
        let data = self.tool.run(&args).await?;
        Ok(IpmiResponse::valid(data))
    }
}

#[async_trait]
impl IpmiTransport for RemoteIpmiTool {
    async fn exec_raw(&self, request: &IpmiRequest, host: &str) -> Result<IpmiResponse> {
        self.run(request, host, false).await
    }

    async fn batch_exec_raw(&self, requests: &[IpmiRequest], host: &str) -> Result<Vec<IpmiResponse>> {
        let start = Instant::now();
        let responses = join_all(requests.iter().map(|r| self.run(r, host, true))).await;
        debug!("Collection took {:?} for {}", start.elapsed(), host);
        responses.into_iter().collect()
    }

    async fn platform_capabilities(&self, candidates: &[RequestDescription], hosts: &[String]) -> Capabilities {
        let start = Instant::now();
        // only Node Manager commands need to be bridged to reach the ME
        let bridged = self.protocol == Protocol::NodeManager;
        let mut capabilities = Capabilities::new();

        for host in hosts {
            let probes = join_all(candidates.iter().map(|c| self.run(&c.request, host, bridged))).await;

            let mut supported: Vec<RequestDescription> = candidates
                .iter()
                .zip(probes)
                .filter_map(|(candidate, probe)| match probe {
                    Ok(resp) if cli_supported(&resp.data) => Some(candidate.clone()),
                    Ok(_) => None,
                    Err(e) => {
                        debug!("Probe of {} failed on {}: {}", candidate.metrics_root, host, e);
                        None
                    }
                })
                .collect();

            if self.protocol == Protocol::Dcmi {
                if let Some(thermal) = probe_dcmi_thermal(self, host).await {
                    supported.push(thermal);
                }
            }

            info!("{}: {} of {} requests supported", host, supported.len(), candidates.len());
            capabilities.insert(host.clone(), supported);
        }

        debug!("Initialization took {:?}", start.elapsed());
        capabilities
    }
}
