//! Response formats: named decoders turning a raw response into submetric values.
//!
//! Offsets in the tables below index the raw response buffer, whose byte 0 is the
//! completion code; e.g. the CUPS CPU factor at offset 4 is payload byte 3.

use std::collections::BTreeMap;

use tracing::debug;

use super::{Error, IpmiResponse, Result};

/// Value reported for every submetric of a response flagged invalid by the transport.
pub const RESPONSE_INVALID: u16 = 0xFFFF;
/// Value reported for a submetric the platform does not provide.
pub const SUBMETRIC_ABSENT: u16 = 0xFFFE;

const CUPS: &[(&str, usize)] = &[("cpu_bandwith", 4), ("memory_bandwith", 6), ("io_bandwith", 8)];
const CUPS_INDEX: &[(&str, usize)] = &[("index", 4)];
const NODE_MANAGER: &[(&str, usize)] = &[("", 4), ("min", 6), ("max", 8), ("avg", 10)];
const PMBUS: &[(&str, usize)] = &[("VR0", 4), ("VR1", 6), ("VR2", 8), ("VR3", 10), ("VR4", 12), ("VR5", 14)];
const PSU: &[(&str, usize)] = &[("0", 4), ("1", 6)];
const POLICY: &[(&str, usize)] = &[("power_limit", 13)];
const DCMI_POWER: &[(&str, usize)] = &[("cur", 2), ("min", 4), ("max", 6), ("avg", 8)];

const CPU_SOCKETS: usize = 4;
const DIMM_SLOTS: usize = 64;
const TEMPERATURE_CPU_OFFSET: usize = 4;
const TEMPERATURE_DIMM_OFFSET: usize = 8;
/// PMBus responses shorter than this (payload bytes) do not cover all regulators.
const PMBUS_MIN_PAYLOAD: usize = 14;

/// Decoder selected by a request description.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Format {
    /// Get CUPS Data (65h): CPU, memory and IO dynamic load factors.
    Cups,
    /// Get CUPS Data (65h), CUPS index parameter.
    CupsIndex,
    /// Get Node Manager Statistics (C8h): current, min, max, average.
    NodeManager,
    /// Get CPU and Memory Temperature (4Bh): 4 sockets and 64 DIMMs.
    Temperature,
    /// Send Raw PECI (40h): margin offset and Tj max.
    Peci,
    /// Send Raw PMBus (D9h): voltage regulator temperatures.
    Pmbus,
    /// PSU temperatures.
    Psu,
    /// Get Sensor Reading (2Dh), reported as `cur`.
    SensorReading,
    /// Get Sensor Reading (2Dh), reported as the main metric.
    SensorRecord,
    /// Get Node Manager Policy (C2h): power limit.
    Policy,
    /// DCMI Get Power Reading: current, min, max, average.
    DcmiPower,
}

impl Format {
    /// Submetric names in a fixed order. The main metric is the empty name.
    pub fn metrics(&self) -> Vec<String> {
        match self {
            Format::Temperature => {
                let cpus = (0..CPU_SOCKETS).map(|i| format!("cpu/{}", i));
                let dimms = (0..DIMM_SLOTS).map(|i| format!("memory/dimm/{}", i));
                cpus.chain(dimms).collect()
            }
            Format::Peci => vec![String::new(), "margin_offset".to_string()],
            Format::SensorReading => vec!["cur".to_string()],
            Format::SensorRecord => vec![String::new()],
            _ => self.u16_table().iter().map(|(name, _)| name.to_string()).collect(),
        }
    }

    /// Reject responses that cannot be decoded at all.
    /// Responses the transport flagged invalid pass; `parse` turns them into sentinels.
    pub fn validate(&self, response: &IpmiResponse) -> Result<()> {
        if !response.is_valid {
            debug!("Response is not valid, {:?} submetrics will carry sentinels", self);
            return Ok(());
        }
        match response.completion_code() {
            None => Err(Error::ZeroLength),
            Some(0) => Ok(()),
            Some(code) => Err(Error::CompletionCode { completion_code: code }),
        }
    }

    /// Extract every submetric. Never fails: unreadable values become sentinels.
    pub fn parse(&self, response: &IpmiResponse) -> BTreeMap<String, u16> {
        let data = &response.data;
        let valid = response.is_valid;

        match self {
            Format::Temperature => {
                let mut out = BTreeMap::new();
                for (i, name) in self.metrics().into_iter().enumerate() {
                    let offset = if i < CPU_SOCKETS {
                        TEMPERATURE_CPU_OFFSET + i
                    } else {
                        TEMPERATURE_DIMM_OFFSET + (i - CPU_SOCKETS)
                    };
                    let value = if valid {
                        match data.get(offset) {
                            Some(b) => u16::from(*b),
                            // DIMM slots past the end of the answer are simply not populated
                            None if i >= CPU_SOCKETS => continue,
                            None => RESPONSE_INVALID,
                        }
                    } else {
                        RESPONSE_INVALID
                    };
                    out.insert(name, value);
                }
                out
            }
            Format::Peci => {
                let mut out = BTreeMap::new();
                out.insert("margin_offset".to_string(), read_u8(data, 6, valid));
                out.insert(String::new(), read_u16(data, 7, valid));
                out
            }
            Format::SensorReading => BTreeMap::from([("cur".to_string(), read_u8(data, 1, valid))]),
            Format::SensorRecord => BTreeMap::from([(String::new(), read_u8(data, 1, valid))]),
            Format::Pmbus if response.payload().len() < PMBUS_MIN_PAYLOAD => PMBUS
                .iter()
                .map(|(name, _)| (name.to_string(), SUBMETRIC_ABSENT))
                .collect(),
            _ => self
                .u16_table()
                .iter()
                .map(|(name, offset)| (name.to_string(), read_u16(data, *offset, valid)))
                .collect(),
        }
    }

    /// `validate` then `parse`.
    pub fn decode(&self, response: &IpmiResponse) -> Result<BTreeMap<String, u16>> {
        self.validate(response)?;
        Ok(self.parse(response))
    }

    /// Every declared submetric set to `value`.
    pub fn sentinels(&self, value: u16) -> BTreeMap<String, u16> {
        self.metrics().into_iter().map(|name| (name, value)).collect()
    }

    fn u16_table(&self) -> &'static [(&'static str, usize)] {
        match self {
            Format::Cups => CUPS,
            Format::CupsIndex => CUPS_INDEX,
            Format::NodeManager => NODE_MANAGER,
            Format::Pmbus => PMBUS,
            Format::Psu => PSU,
            Format::Policy => POLICY,
            Format::DcmiPower => DCMI_POWER,
            Format::Temperature | Format::Peci | Format::SensorReading | Format::SensorRecord => &[],
        }
    }
}

/// Little-endian u16 at `offset`, low byte first.
pub fn u16_le(data: &[u8], offset: usize) -> Option<u16> {
    let lo = *data.get(offset)?;
    let hi = *data.get(offset + 1)?;
    Some(u16::from(hi) << 8 | u16::from(lo))
}

fn read_u16(data: &[u8], offset: usize, valid: bool) -> u16 {
    if !valid {
        return RESPONSE_INVALID;
    }
    u16_le(data, offset).unwrap_or(RESPONSE_INVALID)
}

fn read_u8(data: &[u8], offset: usize, valid: bool) -> u16 {
    if !valid {
        return RESPONSE_INVALID;
    }
    data.get(offset).map(|b| u16::from(*b)).unwrap_or(RESPONSE_INVALID)
}

#[cfg(test)]
mod tests {
    use super::*;

    const ALL: [Format; 11] = [
        Format::Cups,
        Format::CupsIndex,
        Format::NodeManager,
        Format::Temperature,
        Format::Peci,
        Format::Pmbus,
        Format::Psu,
        Format::SensorReading,
        Format::SensorRecord,
        Format::Policy,
        Format::DcmiPower,
    ];

    fn valid(data: &[u8]) -> IpmiResponse {
        IpmiResponse::valid(data.to_vec())
    }

    #[test]
    fn validator() {
        let ok = valid(&[0x00, 0x57, 0x01, 0x00, 0x64, 0x00, 0x50, 0x00, 0x00, 0x01]);
        assert!(Format::Cups.validate(&ok).is_ok());

        let err = Format::Cups.validate(&valid(&[])).unwrap_err();
        assert_eq!(err.to_string(), "Zero length response");

        let err = Format::Cups
            .validate(&valid(&[0x88, 0x57, 0x01, 0x00, 0x64, 0x00, 0x50, 0x00, 0x00, 0x01]))
            .unwrap_err();
        assert_eq!(err.to_string(), "Unexpected error code : 136");

        assert!(Format::Cups.validate(&IpmiResponse::invalid()).is_ok());
    }

    #[test]
    fn cups() {
        let response = valid(&[0x00, 0x57, 0x01, 0x00, 0x64, 0x00, 0x50, 0x00, 0x00, 0x01]);
        assert_eq!(Format::Cups.metrics(), vec!["cpu_bandwith", "memory_bandwith", "io_bandwith"]);
        let out = Format::Cups.parse(&response);
        assert_eq!(out["cpu_bandwith"], 100);
        assert_eq!(out["memory_bandwith"], 80);
        assert_eq!(out["io_bandwith"], 256);
    }

    #[test]
    fn node_manager() {
        let response = valid(&[
            0x00, 0x57, 0x01, 0x00, 0x69, 0x00, 0x03, 0x00, 0x7d, 0x01, 0x6E, 0x00, 0xC7, 0x3F, 0x05, 0x56,
            0xB9, 0xAD, 0x0C, 0x00, 0x50,
        ]);
        assert_eq!(Format::NodeManager.metrics(), vec!["", "min", "max", "avg"]);
        let out = Format::NodeManager.parse(&response);
        assert_eq!(out[""], 105);
        assert_eq!(out["min"], 3);
        assert_eq!(out["max"], 381);
        assert_eq!(out["avg"], 110);
    }

    #[test]
    fn peci() {
        let response = valid(&[0x00, 0x57, 0x01, 0x00, 0x40, 0x00, 0x0A, 0x59, 0x00]);
        assert_eq!(Format::Peci.metrics(), vec!["", "margin_offset"]);
        let out = Format::Peci.parse(&response);
        assert_eq!(out[""], 89);
        assert_eq!(out["margin_offset"], 10);
    }

    #[test]
    fn pmbus() {
        let response = valid(&[
            0x00, 0x57, 0x01, 0x00, 0x25, 0x00, 0x2A, 0x00, 0x1F, 0x00, 0x21, 0x00, 0x20, 0x00, 0x1F, 0x00,
        ]);
        let out = Format::Pmbus.parse(&response);
        let values: Vec<u16> = Format::Pmbus.metrics().iter().map(|m| out[m.as_str()]).collect();
        assert_eq!(values, vec![37, 42, 31, 33, 32, 31]);
    }

    #[test]
    fn pmbus_short_payload_reports_absent_regulators() {
        let out = Format::Pmbus.parse(&valid(&[0x00, 0x57, 0x01, 0x00, 0x25, 0x00]));
        assert_eq!(out.len(), 6);
        assert!(out.values().all(|v| *v == SUBMETRIC_ABSENT));

        let mut invalid = IpmiResponse::invalid();
        invalid.data = vec![0x00; 4];
        assert!(Format::Pmbus.parse(&invalid).values().all(|v| *v == SUBMETRIC_ABSENT));
    }

    #[test]
    fn temperature() {
        let mut data = vec![0x00, 0x57, 0x01, 0x00, 0x23, 0x25, 0xFF, 0xFF];
        data.extend((0..64u8).map(|i| 0x10 + i));
        let response = valid(&data);

        let metrics = Format::Temperature.metrics();
        assert_eq!(metrics.len(), 68);
        assert_eq!(metrics[0], "cpu/0");
        assert_eq!(metrics[3], "cpu/3");
        assert_eq!(metrics[4], "memory/dimm/0");
        assert_eq!(metrics[67], "memory/dimm/63");

        let out = Format::Temperature.parse(&response);
        assert_eq!(out.len(), 68);
        for (i, name) in metrics.iter().enumerate() {
            assert_eq!(out[name.as_str()], u16::from(data[i + 4]), "{}", name);
        }
    }

    #[test]
    fn sensor_readings_use_first_payload_byte() {
        let response = valid(&[0x00, 0x1b, 0xc0, 0x00]);
        assert_eq!(Format::SensorReading.parse(&response)["cur"], 0x1b);
        assert_eq!(Format::SensorRecord.parse(&response)[""], 0x1b);
    }

    #[test]
    fn policy_and_dcmi_power() {
        let mut policy = vec![0u8; 15];
        policy[13] = 0xf4;
        policy[14] = 0x01;
        assert_eq!(Format::Policy.parse(&valid(&policy))["power_limit"], 500);

        let dcmi = valid(&[0x00, 0xdc, 0x2c, 0x01, 0x10, 0x00, 0x90, 0x01, 0x28, 0x01]);
        let out = Format::DcmiPower.parse(&dcmi);
        assert_eq!(out["cur"], 300);
        assert_eq!(out["min"], 16);
        assert_eq!(out["max"], 400);
        assert_eq!(out["avg"], 296);
    }

    #[test]
    fn invalid_response_yields_sentinels_everywhere() {
        let mut response = IpmiResponse::invalid();
        // payload long enough that PMBus takes the invalid path too
        response.data = vec![0x00; 80];
        for format in ALL {
            let out = format.parse(&response);
            assert_eq!(out.len(), format.metrics().len(), "{:?}", format);
            assert!(out.values().all(|v| *v == RESPONSE_INVALID), "{:?}", format);
        }
    }

    #[test]
    fn short_valid_response_never_panics() {
        let response = valid(&[0x00, 0x01]);
        for format in ALL {
            let out = format.parse(&response);
            assert!(!out.is_empty(), "{:?}", format);
        }
        assert_eq!(Format::Cups.parse(&response)["cpu_bandwith"], RESPONSE_INVALID);
    }
}
