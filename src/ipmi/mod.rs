//! IPMI client core: request/response model, command catalog, decoders and transports.
//! Everything above the transport layer works on raw NetFn/Cmd byte sequences.

use std::collections::BTreeMap;
use std::fmt;

use serde::Serialize;

pub mod catalog;
pub mod error;
pub mod formats;
pub mod fru;
pub mod health;
pub mod sdr;
pub mod transport;

pub use error::{Error, ErrorKind, Result};
pub use formats::Format;

/// One raw IPMI request: NetFn, Cmd and request data, plus the IPMB bridging
/// target used when the request has to be forwarded (e.g. to the Node Manager).
#[derive(Clone, PartialEq, Eq, Hash)]
pub struct IpmiRequest {
    pub data: Vec<u8>,
    pub channel: i16,
    pub slave: u8,
}

impl IpmiRequest {
    pub fn new(data: &[u8], channel: i16, slave: u8) -> Self {
        Self { data: data.to_vec(), channel, slave }
    }

    /// Request addressed to the BMC itself (no bridging).
    pub fn local(data: &[u8]) -> Self {
        Self::new(data, 0, 0)
    }

    /// Owned copy of this request with `bytes` written starting at `offset`.
    /// Catalog templates are never patched in place; every call site works on its own copy.
    pub fn patched(&self, offset: usize, bytes: &[u8]) -> Self {
        let mut copy = self.clone();
        let end = offset + bytes.len();
        if copy.data.len() < end {
            copy.data.resize(end, 0);
        }
        copy.data[offset..end].copy_from_slice(bytes);
        copy
    }

    pub fn netfn(&self) -> u8 {
        self.data.first().copied().unwrap_or(0)
    }

    pub fn cmd(&self) -> u8 {
        self.data.get(1).copied().unwrap_or(0)
    }
}

impl fmt::Debug for IpmiRequest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("IpmiRequest")
            .field("data", &hex(&self.data))
            .field("channel", &self.channel)
            .field("slave", &format_args!("{:#04x}", self.slave))
            .finish()
    }
}

/// Raw IPMI response. `data[0]` is the completion code, the payload starts at `data[1]`.
#[derive(Clone, Default, PartialEq, Eq)]
pub struct IpmiResponse {
    pub data: Vec<u8>,
    pub is_valid: bool,
}

impl IpmiResponse {
    pub fn valid(data: Vec<u8>) -> Self {
        Self { data, is_valid: true }
    }

    pub fn invalid() -> Self {
        Self { data: Vec::new(), is_valid: false }
    }

    pub fn completion_code(&self) -> Option<u8> {
        self.data.first().copied()
    }

    /// Response bytes after the completion code.
    pub fn payload(&self) -> &[u8] {
        self.data.get(1..).unwrap_or(&[])
    }

    /// Payload of a response that must carry at least `min_len` payload bytes.
    /// Used by the multi-step FRU/SDR walks, which cannot continue on a short answer.
    pub(crate) fn require_payload(&self, min_len: usize, what: &str) -> Result<&[u8]> {
        match self.completion_code() {
            None => Err(Error::protocol(format!("{}: empty response", what))),
            Some(0) => {
                let payload = self.payload();
                if payload.len() < min_len {
                    return Err(Error::protocol(format!(
                        "{}: expected at least {} payload bytes, got {}",
                        what,
                        min_len,
                        payload.len()
                    )));
                }
                Ok(payload)
            }
            Some(code) => Err(Error::CompletionCode { completion_code: code }),
        }
    }
}

impl fmt::Debug for IpmiResponse {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("IpmiResponse")
            .field("data", &hex(&self.data))
            .field("is_valid", &self.is_valid)
            .finish()
    }
}

/// Binds a request to the metric subtree it feeds and the format that decodes it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RequestDescription {
    pub request: IpmiRequest,
    pub metrics_root: String,
    pub format: Format,
}

impl RequestDescription {
    pub fn new(request: IpmiRequest, metrics_root: &str, format: Format) -> Self {
        Self { request, metrics_root: metrics_root.to_string(), format }
    }

    /// Full metric paths this description produces.
    pub fn metric_paths(&self) -> Vec<String> {
        self.format
            .metrics()
            .iter()
            .map(|sub| extend_path(&self.metrics_root, sub))
            .collect()
    }
}

/// Join a metric root and a submetric name. The main metric (empty name) maps to the root itself.
pub fn extend_path(root: &str, sub: &str) -> String {
    if sub.is_empty() {
        root.to_string()
    } else {
        format!("{}/{}", root, sub)
    }
}

/// Platform inventory read from FRU, device id and the BMC LAN configuration.
/// Every field is independent; a failed read leaves it `None`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct InventoryInfo {
    pub manufacturer: Option<String>,
    pub product_name: Option<String>,
    pub serial: Option<String>,
    pub firmware_version: Option<String>,
    pub bmc_mac: Option<String>,
}

impl InventoryInfo {
    /// Inventory as metric path → value, absent fields omitted.
    pub fn to_metrics(&self) -> BTreeMap<String, String> {
        let fields = [
            (catalog::INVENTORY_PRODUCT_MANUFACTURER, &self.manufacturer),
            (catalog::INVENTORY_PRODUCT_NAME, &self.product_name),
            (catalog::INVENTORY_PRODUCT_SERIAL, &self.serial),
            (catalog::INVENTORY_FIRMWARE_VERSION, &self.firmware_version),
            (catalog::INVENTORY_BMC_MAC, &self.bmc_mac),
        ];
        fields
            .into_iter()
            .filter_map(|(key, value)| value.as_ref().map(|v| (key.to_string(), v.clone())))
            .collect()
    }
}

pub(crate) fn hex(bytes: &[u8]) -> String {
    bytes
        .iter()
        .map(|b| format!("{:02x}", b))
        .collect::<Vec<_>>()
        .join(" ")
}
