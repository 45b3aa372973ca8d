//! Collection driver: probes capabilities, reads inventory and health once per
//! (re)initialization, and decodes batch responses into metric maps every cycle.
//!
//! The probed state lives in one immutable [`Snapshot`]; a rebuild publishes a
//! new `Arc` so readers never see a half-built snapshot.

use std::collections::BTreeMap;
use std::sync::{Arc, PoisonError, RwLock};
use std::time::Instant;

use futures_util::future::join_all;
use serde::Serialize;
use tracing::{debug, info, warn};

use crate::ipmi::catalog::{self, Protocol};
use crate::ipmi::formats::RESPONSE_INVALID;
use crate::ipmi::health::{self, ComponentHealth};
use crate::ipmi::transport::{Capabilities, IpmiTransport};
use crate::ipmi::{extend_path, fru, InventoryInfo, IpmiRequest, RequestDescription, Result};

/// Submetric path → value, per host.
pub type HostMetrics = BTreeMap<String, BTreeMap<String, u16>>;

#[derive(Debug, Clone, Copy)]
pub struct CollectorOptions {
    pub protocol: Protocol,
    /// Abort the cycle on the first response that fails validation.
    pub strict_validation: bool,
    pub collect_inventory: bool,
    pub collect_health: bool,
}

impl Default for CollectorOptions {
    fn default() -> Self {
        Self {
            protocol: Protocol::default(),
            strict_validation: false,
            collect_inventory: true,
            collect_health: true,
        }
    }
}

/// Read-only view of everything probed for the configured hosts.
#[derive(Debug, Clone, Default)]
pub struct Snapshot {
    pub capabilities: Capabilities,
    pub inventory: BTreeMap<String, InventoryInfo>,
    pub health: BTreeMap<String, ComponentHealth>,
}

impl Snapshot {
    /// Hosts with a capability list, sorted.
    pub fn hosts(&self) -> Vec<String> {
        let mut hosts: Vec<String> = self.capabilities.keys().cloned().collect();
        hosts.sort();
        hosts
    }

    pub fn requests(&self, host: &str) -> &[RequestDescription] {
        self.capabilities.get(host).map(Vec::as_slice).unwrap_or(&[])
    }
}

/// One metric the collector can report.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct MetricName {
    pub path: String,
    pub source: String,
}

pub struct Collector {
    transport: Arc<dyn IpmiTransport>,
    hosts: Vec<String>,
    options: CollectorOptions,
    snapshot: RwLock<Arc<Snapshot>>,
}

impl Collector {
    /// `hosts` may be empty for in-band transports, which then report under the local hostname.
    pub fn new(transport: Arc<dyn IpmiTransport>, hosts: Vec<String>, options: CollectorOptions) -> Self {
        Self {
            transport,
            hosts,
            options,
            snapshot: RwLock::new(Arc::new(Snapshot::default())),
        }
    }

    pub fn options(&self) -> &CollectorOptions {
        &self.options
    }

    /// Current snapshot. Cheap; holds no lock after returning.
    pub fn snapshot(&self) -> Arc<Snapshot> {
        Arc::clone(&self.snapshot.read().unwrap_or_else(PoisonError::into_inner))
    }

    fn publish(&self, snapshot: Snapshot) {
        *self.snapshot.write().unwrap_or_else(PoisonError::into_inner) = Arc::new(snapshot);
    }

    /// Probe capabilities and read inventory (and health, when enabled), then
    /// replace the snapshot.
    pub async fn initialize(&self) -> Arc<Snapshot> {
        let start = Instant::now();
        let candidates = catalog::vendor(self.options.protocol);
        let capabilities = self.transport.platform_capabilities(&candidates, &self.hosts).await;

        let mut snapshot = Snapshot { capabilities, ..Default::default() };
        let hosts = snapshot.hosts();

        if self.options.collect_inventory {
            snapshot.inventory = self.read_inventory(&hosts).await;
        }
        if self.options.collect_health {
            snapshot.health = self.read_health(&hosts).await;
        }

        info!(
            "Initialized {} host(s) with {} protocol in {:?}",
            hosts.len(),
            self.options.protocol,
            start.elapsed()
        );
        self.publish(snapshot);
        self.snapshot()
    }

    /// Rebuild only the health part of the snapshot.
    pub async fn refresh_health(&self) -> Arc<Snapshot> {
        let current = self.snapshot();
        let health = self.read_health(&current.hosts()).await;
        self.publish(Snapshot { health, ..(*current).clone() });
        self.snapshot()
    }

    async fn read_inventory(&self, hosts: &[String]) -> BTreeMap<String, InventoryInfo> {
        let reads = hosts.iter().map(|host| async move {
            match fru::inventory_info(self.transport.as_ref(), host).await {
                Ok(info) => info,
                Err(e) => {
                    warn!("{}: inventory unavailable: {}", host, e);
                    InventoryInfo::default()
                }
            }
        });
        hosts.iter().cloned().zip(join_all(reads).await).collect()
    }

    async fn read_health(&self, hosts: &[String]) -> BTreeMap<String, ComponentHealth> {
        let reads = hosts.iter().map(|host| async move {
            match health::component_health(self.transport.as_ref(), host).await {
                Ok(health) => health,
                Err(e) => {
                    warn!("{}: component health unavailable: {}", host, e);
                    ComponentHealth::default()
                }
            }
        });
        hosts.iter().cloned().zip(join_all(reads).await).collect()
    }

    /// Run one collection cycle over every host of the current snapshot.
    ///
    /// A host whose batch fails is logged and reported with an empty map.
    pub async fn collect(&self) -> Result<HostMetrics> {
        let start = Instant::now();
        let snapshot = self.snapshot();
        let hosts = snapshot.hosts();

        let cycles = hosts.iter().map(|host| self.collect_host(&snapshot, host));
        let mut metrics = HostMetrics::new();
        for (host, result) in hosts.iter().zip(join_all(cycles).await) {
            metrics.insert(host.clone(), result?);
        }

        debug!("Collection took {:?}", start.elapsed());
        Ok(metrics)
    }

    async fn collect_host(&self, snapshot: &Snapshot, host: &str) -> Result<BTreeMap<String, u16>> {
        let descriptions = snapshot.requests(host);
        let requests: Vec<IpmiRequest> = descriptions.iter().map(|d| d.request.clone()).collect();

        let responses = match self.transport.batch_exec_raw(&requests, host).await {
            Ok(responses) => responses,
            Err(e) => {
                warn!("{}: batch failed: {}", host, e);
                return Ok(BTreeMap::new());
            }
        };

        let mut metrics = BTreeMap::new();
        for (description, response) in descriptions.iter().zip(&responses) {
            let format = description.format;
            let submetrics = match format.validate(response) {
                Ok(()) => format.parse(response),
                Err(e) if self.options.strict_validation => return Err(e),
                Err(e) => {
                    debug!("{}: {}: {}", host, description.metrics_root, e);
                    format.sentinels(RESPONSE_INVALID)
                }
            };
            for (sub, value) in submetrics {
                metrics.insert(extend_path(&description.metrics_root, &sub), value);
            }
        }
        Ok(metrics)
    }

    /// Every metric path per host: supported requests, inventory and health.
    pub fn metric_names(&self) -> Vec<MetricName> {
        let snapshot = self.snapshot();
        let mut names = Vec::new();

        for host in snapshot.hosts() {
            let paths = snapshot
                .requests(&host)
                .iter()
                .flat_map(RequestDescription::metric_paths)
                .chain(catalog::INVENTORY_METRICS.iter().map(|m| m.to_string()))
                .chain(catalog::health_metrics().map(str::to_string));
            names.extend(paths.map(|path| MetricName { path, source: host.clone() }));
        }
        names
    }
}
