//! DCM platform collector: power, thermal, health and inventory telemetry
//! from server BMCs over IPMI.
//!
//! The [`ipmi`] module holds the protocol core; [`collector::Collector`]
//! turns it into per-host metric, inventory and health maps.

pub mod collector;
pub mod config;
pub mod ipmi;

pub use collector::{Collector, CollectorOptions, HostMetrics, MetricName, Snapshot};
pub use ipmi::transport::{connect, IpmiTransport, TransportMode, TransportOptions};
pub use ipmi::{Error, ErrorKind, InventoryInfo, IpmiRequest, IpmiResponse, RequestDescription, Result};
