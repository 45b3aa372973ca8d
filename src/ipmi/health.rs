//! Component health: SDR walk → live sensor status → per-domain severity.

use std::collections::BTreeMap;
use std::fmt;

use serde::{Serialize, Serializer};
use tracing::{debug, warn};

use super::catalog::{unexpected_bits, HealthDomain};
use super::sdr::{self, SensorStatus, READING_TYPE_THRESHOLD};
use super::transport::IpmiTransport;
use super::Result;

/// Severity of a health domain. Ordered from best to worst.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Severity {
    Ok,
    Unknown,
    Warning,
    Critical,
}

impl Severity {
    pub fn as_str(&self) -> &'static str {
        match self {
            Severity::Ok => "OK",
            Severity::Unknown => "SEV_UNKNOWN",
            Severity::Warning => "WARNING",
            Severity::Critical => "CRITICAL",
        }
    }
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl Serialize for Severity {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        serializer.serialize_str(self.as_str())
    }
}

/// Threshold crossing reported by a threshold sensor.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ThresholdEvent {
    pub code: u8,
    pub description: &'static str,
    pub severity: Severity,
}

/// Highest priority first: (status bit, event code, description, severity).
const THRESHOLD_EVENTS: [(u8, u8, &str, Severity); 6] = [
    (5, 0x06, "at or above upper non-recoverable threshold", Severity::Critical),
    (4, 0x05, "at or above upper critical threshold", Severity::Critical),
    (3, 0x04, "at or above upper non-critical threshold", Severity::Warning),
    (2, 0x03, "at or below lower non-recoverable threshold", Severity::Critical),
    (1, 0x02, "at or below lower critical threshold", Severity::Critical),
    (0, 0x01, "at or below lower non-critical threshold", Severity::Warning),
];

/// Most severe threshold crossed, `None` when the reading is within all thresholds.
pub fn threshold_event(status: u16) -> Option<ThresholdEvent> {
    THRESHOLD_EVENTS
        .iter()
        .find(|(bit, ..)| status & (1u16 << *bit) != 0)
        .map(|&(_, code, description, severity)| ThresholdEvent { code, description, severity })
}

/// Severity one sensor contributes to its domain, if any.
///
/// Threshold sensors always contribute (OK when nothing is crossed). Discrete
/// sensors contribute SEV_UNKNOWN only when one of their tracked bits is set.
pub fn classify(sensor: &SensorStatus) -> Option<(HealthDomain, Severity)> {
    if sensor.unavailable {
        return None;
    }
    let domain = HealthDomain::from_sensor_type(sensor.sensor_type)?;

    if sensor.reading_type == READING_TYPE_THRESHOLD {
        let severity = threshold_event(sensor.status).map_or(Severity::Ok, |e| e.severity);
        return Some((domain, severity));
    }

    let bits = unexpected_bits(sensor.sensor_type, sensor.reading_type)?;
    bits.iter()
        .any(|bit| sensor.status & (1u16 << *bit) != 0)
        .then_some((domain, Severity::Unknown))
}

/// Health domain → severity. Domains without a contributing sensor are absent.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ComponentHealth {
    pub domains: BTreeMap<HealthDomain, Severity>,
}

impl ComponentHealth {
    /// Fold sensor states; the worst severity per domain wins.
    pub fn from_sensors<'a>(sensors: impl IntoIterator<Item = &'a SensorStatus>) -> Self {
        let mut domains = BTreeMap::new();
        for (domain, severity) in sensors.into_iter().filter_map(classify) {
            domains
                .entry(domain)
                .and_modify(|current: &mut Severity| *current = (*current).max(severity))
                .or_insert(severity);
        }
        Self { domains }
    }

    pub fn get(&self, domain: HealthDomain) -> Option<Severity> {
        self.domains.get(&domain).copied()
    }

    pub fn is_empty(&self) -> bool {
        self.domains.is_empty()
    }

    /// `health/<domain>` → severity string.
    pub fn to_metrics(&self) -> BTreeMap<String, String> {
        self.domains
            .iter()
            .map(|(domain, severity)| (domain.metric().to_string(), severity.to_string()))
            .collect()
    }
}

/// Walk the SDR repository of `host` and classify every readable sensor.
///
/// A scan that stops midway still classifies the records accepted so far.
pub async fn component_health<T>(transport: &T, host: &str) -> Result<ComponentHealth>
where
    T: IpmiTransport + ?Sized,
{
    let repository = sdr::probe_repository(transport, host).await?;

    let records = match sdr::scan_repository(transport, host, repository).await {
        Ok(records) => records,
        Err(partial) => {
            warn!("{}: {}", host, partial);
            partial.records
        }
    };
    debug!("{}: {} sensor records", host, records.len());

    let statuses = sdr::read_sensor_status(transport, host, &records).await?;
    Ok(ComponentHealth::from_sensors(&statuses))
}
