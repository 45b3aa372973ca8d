//! Sensor Data Record repository walk and live sensor status reads.
//!
//! The repository is reserved once and the reservation id is reused for the
//! whole traversal. Records are read in pages; only Full and Compact sensor
//! records are kept.

use std::collections::HashSet;

use serde::Serialize;
use tracing::debug;

use super::catalog::{
    CMD_DEVICE_SDR_INFO, CMD_GET_DEVICE_ID, CMD_GET_DEVICE_SDR, CMD_GET_SENSOR_READING, CMD_GET_STORAGE_SDR,
    CMD_RESERVE_DEVICE_SDR, CMD_RESERVE_STORAGE_SDR, CMD_SDR_ALLOCATION_INFO, CMD_STORAGE_SDR_INFO,
};
use super::transport::IpmiTransport;
use super::{Error, IpmiRequest, Result};

pub const SDR_TYPE_FULL: u8 = 0x01;
pub const SDR_TYPE_COMPACT: u8 = 0x02;
/// Next-record-id marking the last record.
pub const LAST_RECORD_ID: u16 = 0xFFFF;
/// Page size when the repository does not report its allocation unit.
pub const DEFAULT_MAX_READ: u8 = 16;

pub const READING_TYPE_THRESHOLD: u8 = 0x01;

const SDR_HEADER_LEN: u16 = 5;
/// Bytes of a record reachable through a one-byte Get SDR offset.
const MAX_RECORD_READ: u16 = u8::MAX as u16;
/// Get SDR data starts at byte 2 (after the reservation id).
const GET_SDR_PARAMS_INDEX: usize = 2;
const SENSOR_NUMBER_INDEX: usize = 2;

// Offsets into a record buffer that begins with the 2-byte next-record-id.
const BODY_SENSOR_NUMBER: usize = 9;
const BODY_SENSOR_TYPE: usize = 14;
const BODY_READING_TYPE: usize = 15;

/// Which SDR repository holds the sensor records.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum SdrRepository {
    /// The BMC's SDR repository (Storage NetFn).
    Storage,
    /// A device-resident repository (Sensor/Event NetFn).
    Device,
}

impl SdrRepository {
    fn info_cmd(self) -> &'static [u8] {
        match self {
            SdrRepository::Storage => CMD_STORAGE_SDR_INFO,
            SdrRepository::Device => CMD_DEVICE_SDR_INFO,
        }
    }

    fn reserve_cmd(self) -> &'static [u8] {
        match self {
            SdrRepository::Storage => CMD_RESERVE_STORAGE_SDR,
            SdrRepository::Device => CMD_RESERVE_DEVICE_SDR,
        }
    }

    fn get_cmd(self) -> &'static [u8] {
        match self {
            SdrRepository::Storage => CMD_GET_STORAGE_SDR,
            SdrRepository::Device => CMD_GET_DEVICE_SDR,
        }
    }

    /// Choose a repository from a Get Device ID payload.
    pub fn from_device_id(payload: &[u8]) -> Result<Self> {
        let revision = *payload
            .get(1)
            .ok_or_else(|| Error::protocol("device id: missing device revision"))?;
        if revision & 0x80 == 0 {
            return Ok(SdrRepository::Storage);
        }
        let support = *payload
            .get(5)
            .ok_or_else(|| Error::protocol("device id: missing additional device support"))?;
        if support & 0x02 != 0 {
            Ok(SdrRepository::Storage)
        } else if support & 0x01 != 0 {
            Ok(SdrRepository::Device)
        } else {
            Err(Error::protocol("Fail to find a valuable SDR"))
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct SdrHeader {
    pub next_record_id: u16,
    pub record_id: u16,
    pub version: u8,
    pub record_type: u8,
    pub record_length: u8,
}

impl SdrHeader {
    /// Parse from a buffer starting with the next-record-id.
    fn parse(buf: &[u8]) -> Result<Self> {
        if buf.len() < 7 {
            return Err(Error::protocol(format!("SDR header too short ({} bytes)", buf.len())));
        }
        Ok(Self {
            next_record_id: u16::from_le_bytes([buf[0], buf[1]]),
            record_id: u16::from_le_bytes([buf[2], buf[3]]),
            version: buf[4],
            record_type: buf[5],
            record_length: buf[6],
        })
    }

    pub fn is_sensor_record(&self) -> bool {
        matches!(self.record_type, SDR_TYPE_FULL | SDR_TYPE_COMPACT)
    }
}

/// A Full or Compact sensor record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct SdrInfo {
    pub header: SdrHeader,
    pub sensor_number: u8,
    pub sensor_type: u8,
    pub event_reading_type: u8,
}

/// Scan stopped early; `records` holds what was accepted before the failure.
#[derive(Debug, thiserror::Error)]
#[error("SDR scan stopped after {} records: {}", .records.len(), .source)]
pub struct PartialScan {
    pub records: Vec<SdrInfo>,
    #[source]
    pub source: Error,
}

/// Live state of one sensor.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct SensorStatus {
    pub sensor_number: u8,
    pub sensor_type: u8,
    pub reading_type: u8,
    pub status: u16,
    pub unavailable: bool,
}

impl SensorStatus {
    fn unavailable(sdr: &SdrInfo) -> Self {
        Self {
            sensor_number: sdr.sensor_number,
            sensor_type: sdr.sensor_type,
            reading_type: sdr.event_reading_type,
            status: 0,
            unavailable: true,
        }
    }

    /// Decode a Get Sensor Reading payload for the sensor described by `sdr`.
    pub fn decode(sdr: &SdrInfo, payload: &[u8]) -> Self {
        if payload.len() < 3 {
            return Self::unavailable(sdr);
        }
        // byte 1: bit 6 scanning enabled, bit 5 reading/state unavailable
        let flags = payload[1];
        if flags & 0x20 != 0 || flags & 0x40 == 0 {
            return Self::unavailable(sdr);
        }

        let rt = sdr.event_reading_type;
        let status = if is_discrete(rt) {
            let mut status = u16::from(payload[2]);
            if let Some(b) = payload.get(3) {
                status |= u16::from(b & 0x7f) << 8;
            }
            status
        } else if rt == READING_TYPE_THRESHOLD {
            u16::from(payload[2] & 0x3f)
        } else {
            0
        };

        Self {
            sensor_number: sdr.sensor_number,
            sensor_type: sdr.sensor_type,
            reading_type: rt,
            status,
            unavailable: false,
        }
    }
}

pub fn is_discrete(reading_type: u8) -> bool {
    reading_type == 0x6f || (0x02..=0x0c).contains(&reading_type)
}

/// Ask the BMC which repository to walk.
pub async fn probe_repository<T>(transport: &T, host: &str) -> Result<SdrRepository>
where
    T: IpmiTransport + ?Sized,
{
    let resp = transport.exec_raw(&IpmiRequest::local(CMD_GET_DEVICE_ID), host).await?;
    let payload = resp.require_payload(2, "device id")?;
    SdrRepository::from_device_id(payload)
}

/// Walk the whole repository and return its sensor records.
pub async fn scan_repository<T>(
    transport: &T,
    host: &str,
    repository: SdrRepository,
) -> std::result::Result<Vec<SdrInfo>, PartialScan>
where
    T: IpmiTransport + ?Sized,
{
    let walk = match Walk::start(transport, host, repository).await {
        Ok(walk) => walk,
        Err(source) => return Err(PartialScan { records: Vec::new(), source }),
    };

    let mut records = Vec::new();
    match walk.run(&mut records).await {
        Ok(()) => Ok(records),
        Err(source) => Err(PartialScan { records, source }),
    }
}

struct Walk<'a, T: ?Sized> {
    transport: &'a T,
    host: &'a str,
    repository: SdrRepository,
    reservation: [u8; 2],
    max_read: u8,
}

impl<'a, T> Walk<'a, T>
where
    T: IpmiTransport + ?Sized,
{
    async fn start(transport: &'a T, host: &'a str, repository: SdrRepository) -> Result<Walk<'a, T>> {
        transport.exec_raw(&IpmiRequest::local(repository.info_cmd()), host).await?;

        let resp = transport.exec_raw(&IpmiRequest::local(repository.reserve_cmd()), host).await?;
        let payload = resp.require_payload(2, "reserve SDR repository")?;
        let reservation = [payload[0], payload[1]];

        let max_read = match repository {
            SdrRepository::Storage => allocation_unit(transport, host).await?,
            SdrRepository::Device => DEFAULT_MAX_READ,
        };

        debug!(
            "{}: scanning {:?} SDR repository, reservation {:02x}{:02x}, page {}",
            host, repository, reservation[1], reservation[0], max_read
        );
        Ok(Walk { transport, host, repository, reservation, max_read })
    }

    async fn run(&self, records: &mut Vec<SdrInfo>) -> Result<()> {
        let mut visited = HashSet::new();
        let mut record_id: u16 = 0;

        loop {
            if !visited.insert(record_id) {
                return Err(Error::protocol(format!("SDR record {:#06x} visited twice", record_id)));
            }

            let header = SdrHeader::parse(&self.read_bytes(record_id, SDR_HEADER_LEN, DEFAULT_MAX_READ).await?)?;

            if header.is_sensor_record() {
                // id 0 addresses the first record; read its body by its real id
                let body_id = if record_id == 0 { header.record_id } else { record_id };
                records.push(self.read_record(body_id, &header).await?);
            } else {
                debug!(
                    "{}: skipping SDR {:#06x} of type {:#04x}",
                    self.host, header.record_id, header.record_type
                );
            }

            record_id = header.next_record_id;
            if record_id == LAST_RECORD_ID {
                return Ok(());
            }
        }
    }

    async fn read_record(&self, record_id: u16, header: &SdrHeader) -> Result<SdrInfo> {
        let total = (u16::from(header.record_length) + SDR_HEADER_LEN).min(MAX_RECORD_READ);
        let buf = self.read_bytes(record_id, total, self.max_read).await?;
        let full = SdrHeader::parse(&buf)?;

        if !full.is_sensor_record() {
            return Err(Error::protocol(format!(
                "SDR {:#06x}: unexpected record type {:#04x}",
                full.record_id, full.record_type
            )));
        }
        if buf.len() <= BODY_READING_TYPE {
            return Err(Error::protocol(format!(
                "SDR {:#06x}: record too short ({} bytes)",
                full.record_id,
                buf.len()
            )));
        }

        Ok(SdrInfo {
            header: full,
            sensor_number: buf[BODY_SENSOR_NUMBER],
            sensor_type: buf[BODY_SENSOR_TYPE],
            event_reading_type: buf[BODY_READING_TYPE],
        })
    }

    /// Read `total` bytes of a record in pages of at most `page` bytes.
    /// The result starts with the next-record-id, followed by the record bytes.
    async fn read_bytes(&self, record_id: u16, total: u16, page: u8) -> Result<Vec<u8>> {
        let mut data = vec![0u8; total as usize + 2];
        let mut read: u16 = 0;

        while read < total {
            let count = (total - read).min(u16::from(page));
            let offset = u8::try_from(read)
                .map_err(|_| Error::protocol(format!("SDR {:#06x}: offset {} out of range", record_id, read)))?;
            let [id_lo, id_hi] = record_id.to_le_bytes();

            let request = IpmiRequest::local(self.repository.get_cmd()).patched(
                GET_SDR_PARAMS_INDEX,
                &[self.reservation[0], self.reservation[1], id_lo, id_hi, offset, count as u8],
            );
            let resp = self.transport.exec_raw(&request, self.host).await?;
            let payload = resp.require_payload(2 + count as usize, "get SDR")?;

            data[0] = payload[0];
            data[1] = payload[1];
            let dst = 2 + read as usize;
            data[dst..dst + count as usize].copy_from_slice(&payload[2..2 + count as usize]);

            read += count;
        }

        Ok(data)
    }
}

/// Page size for the storage repository; falls back to 16 when the BMC
/// gives no usable allocation info.
async fn allocation_unit<T>(transport: &T, host: &str) -> Result<u8>
where
    T: IpmiTransport + ?Sized,
{
    let resp = transport.exec_raw(&IpmiRequest::local(CMD_SDR_ALLOCATION_INFO), host).await?;
    let payload = resp.payload();
    if resp.completion_code() != Some(0) || payload.len() != 9 {
        debug!("{}: no SDR allocation info, using {} byte pages", host, DEFAULT_MAX_READ);
        return Ok(DEFAULT_MAX_READ);
    }
    let unit = u16::from_le_bytes([payload[2], payload[3]]);
    if unit == 0 {
        return Ok(DEFAULT_MAX_READ);
    }
    Ok(u8::try_from(unit).unwrap_or(u8::MAX))
}

/// Read the live status of every record. A sensor that answers with an
/// error completion code or a short payload is reported unavailable.
pub async fn read_sensor_status<T>(transport: &T, host: &str, sdrs: &[SdrInfo]) -> Result<Vec<SensorStatus>>
where
    T: IpmiTransport + ?Sized,
{
    let mut statuses = Vec::with_capacity(sdrs.len());
    for sdr in sdrs {
        let request = IpmiRequest::local(CMD_GET_SENSOR_READING).patched(SENSOR_NUMBER_INDEX, &[sdr.sensor_number]);
        let resp = transport.exec_raw(&request, host).await?;
        let status = match resp.completion_code() {
            Some(0) => SensorStatus::decode(sdr, resp.payload()),
            _ => SensorStatus::unavailable(sdr),
        };
        statuses.push(status);
    }
    Ok(statuses)
}
