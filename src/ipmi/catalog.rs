//! Command catalog: raw request templates, per-protocol request lists and sensor health tables.
//! Everything here is immutable; callers patch owned copies (`IpmiRequest::patched`).

use std::fmt;

use serde::{Deserialize, Serialize};

use super::{Format, IpmiRequest, RequestDescription};

/// Which command family to probe for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Protocol {
    /// Intel Node Manager OEM commands, bridged to the ME over IPMB.
    NodeManager,
    /// DCMI power reading plus the inlet-thermal discovery probe.
    Dcmi,
    /// Plain IPMI: DCMI power reading only.
    #[default]
    Ipmi,
}

impl fmt::Display for Protocol {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Protocol::NodeManager => "node_manager",
            Protocol::Dcmi => "dcmi",
            Protocol::Ipmi => "ipmi",
        };
        f.write_str(name)
    }
}

struct Template {
    data: &'static [u8],
    channel: i16,
    slave: u8,
    root: &'static str,
    format: Format,
}

impl Template {
    fn describe(&self) -> RequestDescription {
        RequestDescription::new(IpmiRequest::new(self.data, self.channel, self.slave), self.root, self.format)
    }
}

// Node Manager lives behind the BMC on channel 6, slave 0x2c.
const NM_CHANNEL: i16 = 6;
const NM_SLAVE: u8 = 0x2c;

const GENERIC_VENDOR: &[Template] = &[
    Template { data: &[0x2e, 0x65, 0x57, 0x01, 0x00, 0x02], channel: NM_CHANNEL, slave: NM_SLAVE, root: "cups", format: Format::Cups },
    Template { data: &[0x2e, 0x65, 0x57, 0x01, 0x00, 0x01], channel: NM_CHANNEL, slave: NM_SLAVE, root: "cups", format: Format::CupsIndex },
    Template { data: &[0x2e, 0xc8, 0x57, 0x01, 0x00, 0x01, 0x00, 0x00], channel: NM_CHANNEL, slave: NM_SLAVE, root: "power/system", format: Format::NodeManager },
    Template { data: &[0x2e, 0xc8, 0x57, 0x01, 0x00, 0x01, 0x01, 0x00], channel: NM_CHANNEL, slave: NM_SLAVE, root: "power/cpu", format: Format::NodeManager },
    Template { data: &[0x2e, 0xc8, 0x57, 0x01, 0x00, 0x01, 0x02, 0x00], channel: NM_CHANNEL, slave: NM_SLAVE, root: "power/memory", format: Format::NodeManager },
    Template { data: &[0x2e, 0xc8, 0x57, 0x01, 0x00, 0x02, 0x00, 0x00], channel: NM_CHANNEL, slave: NM_SLAVE, root: "thermal/inlet", format: Format::NodeManager },
    Template { data: &[0x2e, 0xc8, 0x57, 0x01, 0x00, 0x05, 0x00, 0x00], channel: NM_CHANNEL, slave: NM_SLAVE, root: "thermal/outlet", format: Format::NodeManager },
    Template {
        data: &[0x2e, 0x4b, 0x57, 0x01, 0x00, 0x03, 0xff, 0xff, 0xff, 0xff, 0xff, 0xff, 0xff, 0xff],
        channel: NM_CHANNEL,
        slave: NM_SLAVE,
        root: "thermal",
        format: Format::Temperature,
    },
    Template { data: &[0x2e, 0xc8, 0x57, 0x01, 0x00, 0x04, 0x00, 0x00], channel: NM_CHANNEL, slave: NM_SLAVE, root: "airflow", format: Format::NodeManager },
    Template {
        data: &[0x2e, 0x40, 0x57, 0x01, 0x00, 0x30, 0x05, 0x05, 0xa1, 0x00, 0x10, 0x00, 0x00],
        channel: NM_CHANNEL,
        slave: NM_SLAVE,
        root: "margin/cpu/tj",
        format: Format::Peci,
    },
    Template { data: &[0x04, 0x2d, 0x08], channel: NM_CHANNEL, slave: NM_SLAVE, root: "thermal/chipset", format: Format::SensorRecord },
    Template { data: &[0x2e, 0xc2, 0x57, 0x01, 0x00, 0x00, 0x01], channel: NM_CHANNEL, slave: NM_SLAVE, root: "power/policy", format: Format::Policy },
];

const DCMI_VENDOR: &[Template] = &[
    Template { data: &[0x2c, 0x02, 0xdc, 0x01, 0x00, 0x00], channel: 0, slave: 0, root: "power/system", format: Format::DcmiPower },
];

/// DCMI Get Temperature Readings, inlet entity. Payload bytes 3..5 hold the SDR record id.
pub const CMD_DCMI_THERMAL_CAP: &[u8] = &[0x2c, 0x07, 0xdc, 0x01, 0x40, 0x00, 0x00];
/// Get SDR: reservation 0, record id at bytes 4..6, offset 0, 8 bytes.
pub const CMD_SDR_LOOKUP: &[u8] = &[0x0a, 0x23, 0x00, 0x00, 0x00, 0x00, 0x00, 0x08];
pub const SDR_LOOKUP_RECORD_ID_OFFSET: usize = 4;
/// Get Sensor Reading template for the synthesized inlet thermal metric; sensor id at byte 2.
pub const CMD_DCMI_THERMAL_READING: &[u8] = &[0x04, 0x2d, 0x00];
pub const DCMI_THERMAL_ROOT: &str = "thermal/inlet";

pub const CMD_GET_DEVICE_ID: &[u8] = &[0x06, 0x01];
pub const CMD_FRU_INVENTORY_AREA_INFO: &[u8] = &[0x0a, 0x10, 0x00];
/// Read FRU Data: device 0, offset at bytes 3..5 (LS first), count at byte 5.
pub const CMD_FRU_READ_DATA: &[u8] = &[0x0a, 0x11, 0x00, 0x00, 0x00, 0x00];
/// Get LAN Configuration Parameters, channel 1, parameter 5 (MAC address).
pub const CMD_BMC_MAC: &[u8] = &[0x0c, 0x02, 0x01, 0x05, 0x00, 0x00];

pub const CMD_STORAGE_SDR_INFO: &[u8] = &[0x0a, 0x20];
pub const CMD_DEVICE_SDR_INFO: &[u8] = &[0x04, 0x20];
pub const CMD_RESERVE_STORAGE_SDR: &[u8] = &[0x0a, 0x22];
pub const CMD_RESERVE_DEVICE_SDR: &[u8] = &[0x04, 0x22];
pub const CMD_SDR_ALLOCATION_INFO: &[u8] = &[0x0a, 0x21];
/// Get SDR: reservation id 2..4, record id 4..6, offset 6, bytes to read 7.
pub const CMD_GET_STORAGE_SDR: &[u8] = &[0x0a, 0x23, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00];
pub const CMD_GET_DEVICE_SDR: &[u8] = &[0x04, 0x21, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00];
/// Get Sensor Reading; sensor number at byte 2.
pub const CMD_GET_SENSOR_READING: &[u8] = &[0x04, 0x2d, 0x00];

pub const INVENTORY_FIRMWARE_VERSION: &str = "inventory/firmware_version";
pub const INVENTORY_BMC_MAC: &str = "inventory/bmc_mac";
pub const INVENTORY_PRODUCT_MANUFACTURER: &str = "inventory/product_manufacturer";
pub const INVENTORY_PRODUCT_NAME: &str = "inventory/product_name";
pub const INVENTORY_PRODUCT_SERIAL: &str = "inventory/product_serial";

pub const INVENTORY_METRICS: [&str; 5] = [
    INVENTORY_FIRMWARE_VERSION,
    INVENTORY_BMC_MAC,
    INVENTORY_PRODUCT_MANUFACTURER,
    INVENTORY_PRODUCT_NAME,
    INVENTORY_PRODUCT_SERIAL,
];

/// Candidate request list for a protocol selection, freshly materialized from the templates.
pub fn vendor(protocol: Protocol) -> Vec<RequestDescription> {
    let templates = match protocol {
        Protocol::NodeManager => GENERIC_VENDOR,
        Protocol::Dcmi | Protocol::Ipmi => DCMI_VENDOR,
    };
    templates.iter().map(Template::describe).collect()
}

/// Inlet thermal description synthesized by the DCMI probe for the discovered sensor.
pub fn dcmi_thermal(sensor_id: u8) -> RequestDescription {
    RequestDescription::new(
        IpmiRequest::local(CMD_DCMI_THERMAL_READING).patched(2, &[sensor_id]),
        DCMI_THERMAL_ROOT,
        Format::SensorReading,
    )
}

/// Health domain a sensor type reports into.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum HealthDomain {
    Temperature,
    Voltage,
    Fan,
    Processor,
    PowerSupply,
    Memory,
    Storage,
    Battery,
}

impl HealthDomain {
    pub const ALL: [HealthDomain; 8] = [
        HealthDomain::Temperature,
        HealthDomain::Voltage,
        HealthDomain::Fan,
        HealthDomain::Processor,
        HealthDomain::PowerSupply,
        HealthDomain::Memory,
        HealthDomain::Storage,
        HealthDomain::Battery,
    ];

    /// Domain for an IPMI sensor type code, if the type is tracked at all.
    pub fn from_sensor_type(sensor_type: u8) -> Option<Self> {
        match sensor_type {
            0x01 => Some(HealthDomain::Temperature),
            0x02 => Some(HealthDomain::Voltage),
            0x04 => Some(HealthDomain::Fan),
            0x07 => Some(HealthDomain::Processor),
            0x08 => Some(HealthDomain::PowerSupply),
            0x0c => Some(HealthDomain::Memory),
            0x0d => Some(HealthDomain::Storage),
            0x29 => Some(HealthDomain::Battery),
            _ => None,
        }
    }

    pub fn component_type(&self) -> &'static str {
        match self {
            HealthDomain::Temperature => "TEMPERATURE_HEALTH",
            HealthDomain::Voltage => "VOLTAGE_HEALTH",
            HealthDomain::Fan => "FAN_HEALTH",
            HealthDomain::Processor => "PROCESSOR_HEALTH",
            HealthDomain::PowerSupply => "POWERSUPPLY_HEALTH",
            HealthDomain::Memory => "MEMORY_HEALTH",
            HealthDomain::Storage => "STORAGE_HEALTH",
            HealthDomain::Battery => "BATTERY_HEALTH",
        }
    }

    pub fn metric(&self) -> &'static str {
        match self {
            HealthDomain::Temperature => "health/temperature",
            HealthDomain::Voltage => "health/voltage",
            HealthDomain::Fan => "health/fan",
            HealthDomain::Processor => "health/processor",
            HealthDomain::PowerSupply => "health/powersupply",
            HealthDomain::Memory => "health/memory",
            HealthDomain::Storage => "health/storage",
            HealthDomain::Battery => "health/battery",
        }
    }
}

pub fn health_metrics() -> impl Iterator<Item = &'static str> {
    HealthDomain::ALL.iter().map(HealthDomain::metric)
}

/// (sensor type, event/reading type) → status bit offsets that indicate an unexpected state
/// for discrete sensors.
const DISCRETE_HEALTH_CONFIG: &[(u8, u8, &[u8])] = &[
    (1, 1, &[0, 1, 2, 3, 4, 5, 6, 7, 8, 9, 10, 11, 12]),
    (1, 3, &[1]),
    (1, 5, &[1]),
    (2, 1, &[0, 1, 2, 3, 4, 5, 6, 7, 8, 9, 10, 11, 12]),
    (2, 3, &[1]),
    (4, 1, &[0, 1, 2, 3, 4, 5, 6, 7, 8, 9, 10, 11, 12]),
    (4, 3, &[1]),
    (4, 7, &[2, 3, 5]),
    (4, 11, &[1, 5]),
    (7, 1, &[0, 1, 2, 3, 4, 5, 6, 7, 8, 9, 10, 11, 12]),
    (7, 3, &[1]),
    (7, 111, &[0, 1, 2, 3, 4, 5, 6, 11]),
    (8, 3, &[1]),
    (8, 7, &[2, 3, 5]),
    (8, 11, &[1, 5]),
    (8, 111, &[1, 2, 3, 4, 5, 6]),
    (12, 1, &[0, 1, 2, 3, 4, 5, 6, 7, 8, 9, 10, 11, 12]),
    (12, 111, &[1, 3, 7, 10]),
    (12, 3, &[1]),
    (13, 111, &[1, 2, 5, 6, 8]),
    (13, 3, &[1]),
    (41, 111, &[0, 1]),
];

/// Unexpected-state bit offsets for a discrete sensor, or `None` when the combination is untracked.
pub fn unexpected_bits(sensor_type: u8, reading_type: u8) -> Option<&'static [u8]> {
    DISCRETE_HEALTH_CONFIG
        .iter()
        .find(|(st, rt, _)| *st == sensor_type && *rt == reading_type)
        .map(|(_, _, bits)| *bits)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn node_manager_catalog_is_bridged() {
        let list = vendor(Protocol::NodeManager);
        assert_eq!(list.len(), 12);
        assert!(list.iter().all(|d| d.request.channel == 6 && d.request.slave == 0x2c));
    }

    #[test]
    fn dcmi_and_ipmi_share_power_reading() {
        let dcmi = vendor(Protocol::Dcmi);
        assert_eq!(dcmi, vendor(Protocol::Ipmi));
        assert_eq!(dcmi.len(), 1);
        assert_eq!(dcmi[0].metrics_root, "power/system");
        assert_eq!(dcmi[0].format, Format::DcmiPower);
    }

    #[test]
    fn dcmi_thermal_patches_sensor_id() {
        let desc = dcmi_thermal(0x31);
        assert_eq!(desc.request.data, vec![0x04, 0x2d, 0x31]);
        assert_eq!(desc.metric_paths(), vec!["thermal/inlet/cur".to_string()]);
        assert_eq!(CMD_DCMI_THERMAL_READING, &[0x04, 0x2d, 0x00]);
    }

    #[test]
    fn sensor_types_map_to_domains() {
        assert_eq!(HealthDomain::from_sensor_type(0x29), Some(HealthDomain::Battery));
        assert_eq!(HealthDomain::from_sensor_type(0x0c).map(|d| d.metric()), Some("health/memory"));
        assert_eq!(HealthDomain::from_sensor_type(0x03), None);
        assert_eq!(health_metrics().count(), 8);
    }

    #[test]
    fn discrete_table_lookup_requires_exact_key() {
        assert_eq!(unexpected_bits(4, 7), Some(&[2u8, 3, 5][..]));
        assert_eq!(unexpected_bits(41, 111), Some(&[0u8, 1][..]));
        assert_eq!(unexpected_bits(41, 3), None);
    }
}
