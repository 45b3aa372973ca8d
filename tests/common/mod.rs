#![allow(dead_code)]

use std::sync::Mutex;

use async_trait::async_trait;

use dcm_platform_collector::ipmi::transport::{Capabilities, IpmiTransport};
use dcm_platform_collector::{Error, IpmiRequest, IpmiResponse, RequestDescription, Result};

type Handler = Box<dyn Fn(&IpmiRequest, &str) -> Result<IpmiResponse> + Send + Sync>;

/// In-memory transport answering from a closure and recording every request.
pub struct ScriptedTransport {
    handler: Handler,
    calls: Mutex<Vec<(String, Vec<u8>)>>,
}

impl ScriptedTransport {
    pub fn new(handler: impl Fn(&IpmiRequest, &str) -> Result<IpmiResponse> + Send + Sync + 'static) -> Self {
        Self { handler: Box::new(handler), calls: Mutex::new(Vec::new()) }
    }

    pub fn calls(&self) -> Vec<Vec<u8>> {
        self.calls.lock().unwrap().iter().map(|(_, data)| data.clone()).collect()
    }

    /// Requests whose bytes start with `prefix`.
    pub fn calls_to(&self, prefix: &[u8]) -> Vec<Vec<u8>> {
        self.calls().into_iter().filter(|c| c.starts_with(prefix)).collect()
    }
}

#[async_trait]
impl IpmiTransport for ScriptedTransport {
    async fn exec_raw(&self, request: &IpmiRequest, host: &str) -> Result<IpmiResponse> {
        self.calls.lock().unwrap().push((host.to_string(), request.data.clone()));
        (self.handler)(request, host)
    }

    async fn batch_exec_raw(&self, requests: &[IpmiRequest], host: &str) -> Result<Vec<IpmiResponse>> {
        let mut out = Vec::with_capacity(requests.len());
        for request in requests {
            out.push(self.exec_raw(request, host).await?);
        }
        Ok(out)
    }

    async fn platform_capabilities(&self, candidates: &[RequestDescription], hosts: &[String]) -> Capabilities {
        let mut capabilities = Capabilities::new();
        for host in hosts {
            let mut supported = Vec::new();
            for candidate in candidates {
                if let Ok(resp) = self.exec_raw(&candidate.request, host).await {
                    if resp.is_valid && resp.completion_code() == Some(0) {
                        supported.push(candidate.clone());
                    }
                }
            }
            capabilities.insert(host.clone(), supported);
        }
        capabilities
    }
}

/// Valid response with completion code 0 and `payload`.
pub fn ok(payload: &[u8]) -> IpmiResponse {
    let mut data = vec![0x00];
    data.extend_from_slice(payload);
    IpmiResponse::valid(data)
}

pub fn completion(code: u8) -> IpmiResponse {
    IpmiResponse::valid(vec![code])
}

/// Fallback for commands a fixture does not model.
pub fn unsupported() -> Result<IpmiResponse> {
    Ok(completion(0xC1))
}

pub fn transport_failure(code: i32) -> Error {
    Error::System { code, errno: 5, message: "Input/output error".to_string() }
}

// ---------------------------------------------------------------------------
// SDR repository fixture

pub const RESERVATION: [u8; 2] = [0x34, 0x12];

/// Full sensor record (type 0x01) with the given identity.
pub fn full_record(id: u16, sensor_number: u8, sensor_type: u8, reading_type: u8) -> Vec<u8> {
    let body_len = 0x2b;
    let mut record = vec![0u8; 5 + body_len];
    record[0..2].copy_from_slice(&id.to_le_bytes());
    record[2] = 0x51;
    record[3] = 0x01;
    record[4] = body_len as u8;
    record[5] = 0x20; // owner id
    record[7] = sensor_number;
    record[8] = 0x07; // entity id
    record[12] = sensor_type;
    record[13] = reading_type;
    record
}

/// Compact sensor record (type 0x02).
pub fn compact_record(id: u16, sensor_number: u8, sensor_type: u8, reading_type: u8) -> Vec<u8> {
    let mut record = full_record(id, sensor_number, sensor_type, reading_type);
    record[3] = 0x02;
    record.truncate(5 + 0x1b);
    record[4] = 0x1b;
    record
}

/// Management controller locator record, not a sensor.
pub fn locator_record(id: u16) -> Vec<u8> {
    let mut record = vec![0u8; 5 + 11];
    record[0..2].copy_from_slice(&id.to_le_bytes());
    record[2] = 0x51;
    record[3] = 0x12;
    record[4] = 11;
    record
}

/// Repository contents and the live readings served for each sensor number.
#[derive(Clone, Default)]
pub struct SdrFixture {
    /// (record bytes, next record id)
    pub records: Vec<(Vec<u8>, u16)>,
    pub readings: Vec<(u8, Vec<u8>)>,
    pub device_id: Vec<u8>,
    pub allocation_unit: Option<u16>,
}

impl SdrFixture {
    /// Records linked in order, the last one terminating the chain.
    pub fn chain(records: Vec<Vec<u8>>) -> Self {
        let ids: Vec<u16> = records.iter().map(|r| u16::from_le_bytes([r[0], r[1]])).collect();
        let records = records
            .into_iter()
            .enumerate()
            .map(|(i, r)| (r, ids.get(i + 1).copied().unwrap_or(0xFFFF)))
            .collect();
        Self {
            records,
            readings: Vec::new(),
            device_id: vec![0x20, 0x01, 0x01, 0x25, 0x02, 0x00],
            allocation_unit: None,
        }
    }

    pub fn reading(mut self, sensor_number: u8, payload: &[u8]) -> Self {
        self.readings.push((sensor_number, payload.to_vec()));
        self
    }

    fn record(&self, id: u16) -> Option<&(Vec<u8>, u16)> {
        if id == 0 {
            return self.records.first();
        }
        self.records.iter().find(|(r, _)| u16::from_le_bytes([r[0], r[1]]) == id)
    }

    fn get_sdr(&self, data: &[u8]) -> IpmiResponse {
        if data[2..4] != RESERVATION {
            return completion(0xC5); // reservation cancelled
        }
        let id = u16::from_le_bytes([data[4], data[5]]);
        let (offset, count) = (data[6] as usize, data[7] as usize);
        match self.record(id) {
            Some((record, next)) if offset + count <= record.len() => {
                let mut payload = next.to_le_bytes().to_vec();
                payload.extend_from_slice(&record[offset..offset + count]);
                ok(&payload)
            }
            Some(_) => completion(0xCA),
            None => completion(0xCB),
        }
    }

    /// Answer the repository, device id and sensor reading commands.
    pub fn answer(&self, request: &IpmiRequest) -> Option<IpmiResponse> {
        let data = &request.data;
        let resp = match (data[0], data[1]) {
            (0x06, 0x01) => ok(&self.device_id),
            (0x0a, 0x20) | (0x04, 0x20) => ok(&[0x51, self.records.len() as u8, 0x00, 0x00]),
            (0x0a, 0x22) | (0x04, 0x22) => ok(&RESERVATION),
            (0x0a, 0x21) => match self.allocation_unit {
                Some(unit) => {
                    let [lo, hi] = unit.to_le_bytes();
                    ok(&[0x00, 0x01, lo, hi, 0x00, 0x01, 0x00, 0x00, 0x10])
                }
                None => completion(0xC1),
            },
            (0x0a, 0x23) | (0x04, 0x21) => self.get_sdr(data),
            (0x04, 0x2d) => match self.readings.iter().find(|(n, _)| *n == data[2]) {
                Some((_, payload)) => ok(payload),
                None => completion(0xCB),
            },
            _ => return None,
        };
        Some(resp)
    }
}

// ---------------------------------------------------------------------------
// FRU image fixture

/// Type/length encoded text field.
pub fn text_field(s: &str) -> Vec<u8> {
    let mut field = vec![0xC0 | s.len() as u8];
    field.extend_from_slice(s.as_bytes());
    field
}

/// FRU image with a common header and a product info area at byte 8.
pub fn fru_image(fields: &[Vec<u8>]) -> Vec<u8> {
    let mut area = vec![0x01, 0x00, 0x00];
    for field in fields {
        area.extend_from_slice(field);
    }
    area.push(0xC1);
    while (area.len() + 1) % 8 != 0 {
        area.push(0x00);
    }
    area.push(0x00); // checksum, not verified
    area[1] = (area.len() / 8) as u8;

    let mut image = vec![0x01, 0x00, 0x00, 0x00, 0x01, 0x00, 0x00, 0xfe];
    image.extend_from_slice(&area);
    while image.len() % 8 != 0 {
        image.push(0x00);
    }
    image
}

#[derive(Clone)]
pub struct FruFixture {
    pub image: Vec<u8>,
    /// Word (2 byte) access units.
    pub words: bool,
}

impl FruFixture {
    pub fn answer(&self, request: &IpmiRequest) -> Option<IpmiResponse> {
        let data = &request.data;
        let resp = match (data[0], data[1]) {
            (0x0a, 0x10) => {
                let [lo, hi] = (self.image.len() as u16).to_le_bytes();
                ok(&[lo, hi, u8::from(self.words)])
            }
            (0x0a, 0x11) => {
                let unit = if self.words { 2 } else { 1 };
                let offset = u16::from_le_bytes([data[3], data[4]]) as usize * unit;
                let count = data[5] as usize;
                let end = (offset + count).min(self.image.len());
                if offset >= end {
                    completion(0xC9)
                } else {
                    let mut payload = vec![(end - offset) as u8];
                    payload.extend_from_slice(&self.image[offset..end]);
                    ok(&payload)
                }
            }
            _ => return None,
        };
        Some(resp)
    }
}
