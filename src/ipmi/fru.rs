//! FRU inventory decoding: product info area (manufacturer, name, serial),
//! firmware revision from Get Device ID and the BMC MAC from the LAN configuration.

use tracing::{debug, warn};

use super::catalog::{CMD_BMC_MAC, CMD_FRU_INVENTORY_AREA_INFO, CMD_FRU_READ_DATA, CMD_GET_DEVICE_ID};
use super::transport::IpmiTransport;
use super::{Error, InventoryInfo, IpmiRequest, Result};

/// Largest chunk requested per Read FRU Data call.
pub const FRU_PAGE: u16 = 16;

const FRU_OFFSET_INDEX: usize = 3;
const BCD_PLUS: &[u8; 16] = b"0123456789 -.:,_";

/// Field type codes (top two bits of the type/length byte).
const TYPE_BINARY: u8 = 0;
const TYPE_BCD_PLUS: u8 = 1;
const TYPE_ASCII_6BIT: u8 = 2;
const TYPE_TEXT: u8 = 3;

/// Read Fru Data request for `count` bytes at access-unit `offset`.
fn read_request(offset: u16, count: u16) -> IpmiRequest {
    let [lo, hi] = offset.to_le_bytes();
    IpmiRequest::local(CMD_FRU_READ_DATA).patched(FRU_OFFSET_INDEX, &[lo, hi, count as u8])
}

/// Product info area location, in bytes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct ProductArea {
    start: u16,
    len: u16,
    access: u16,
}

async fn locate_product_area<T>(transport: &T, host: &str) -> Result<ProductArea>
where
    T: IpmiTransport + ?Sized,
{
    let resp = transport.exec_raw(&IpmiRequest::local(CMD_FRU_INVENTORY_AREA_INFO), host).await?;
    let info = resp.require_payload(3, "FRU inventory area info")?;
    let area_size = u16::from_le_bytes([info[0], info[1]]);
    if area_size == 0 {
        return Err(Error::protocol(format!("{} : Invalid fruInventoryAreaSize", area_size)));
    }
    let access = u16::from(info[2] & 0x01) + 1;

    let resp = transport.exec_raw(&read_request(0, 8), host).await?;
    let header = resp.require_payload(9, "FRU common header")?;
    let start = u16::from(header[5]) * 8;

    let resp = transport.exec_raw(&read_request(start / access, 2), host).await?;
    let area = resp.require_payload(3, "FRU product info header")?;
    let len = u16::from(area[2]) * 8;

    if len == 0 || u32::from(start) + u32::from(len) > u32::from(area_size) {
        return Err(Error::protocol(format!("{} : Invalid fruProductInfoSize", len)));
    }

    Ok(ProductArea { start, len, access })
}

/// Page the whole product info area into one buffer. A failing page ends the
/// read early; whatever arrived so far is still decoded.
async fn read_product_area<T>(transport: &T, host: &str, area: ProductArea) -> Vec<u8>
where
    T: IpmiTransport + ?Sized,
{
    let mut buf = vec![0u8; area.len as usize];
    let mut index: u16 = 0;

    while index < area.len {
        let count = (area.len - index).min(FRU_PAGE);
        let request = read_request((area.start + index) / area.access, count);

        let page = match transport.exec_raw(&request, host).await {
            Ok(resp) => match resp.require_payload(1, "FRU product info page") {
                Ok(payload) => payload.to_vec(),
                Err(e) => {
                    warn!("{}: FRU read at {} stopped: {}", host, index, e);
                    break;
                }
            },
            Err(e) => {
                warn!("{}: FRU read at {} failed: {}", host, index, e);
                break;
            }
        };

        let returned = (page[0] as usize).min(page.len() - 1);
        let dst = index as usize;
        let n = returned.min(buf.len() - dst);
        buf[dst..dst + n].copy_from_slice(&page[1..1 + n]);

        index += FRU_PAGE;
    }

    buf
}

/// Manufacturer, product name, (part number, version skipped), serial.
fn decode_product_fields(area: &[u8]) -> [Option<String>; 3] {
    let mut out: [Option<String>; 3] = Default::default();
    let slots = [Some(0), Some(1), None, None, Some(2)];
    let mut offset = 3usize;

    for slot in slots {
        if offset >= area.len() {
            break;
        }
        if let Some(i) = slot {
            out[i] = Some(decode_area_string(&area[offset..]));
        }
        offset += (area[offset] & 0x3f) as usize + 1;
    }
    out
}

/// Decode one FRU type/length encoded field starting at `data[0]`.
///
/// A field whose declared length does not fit in `data` decodes to "".
pub fn decode_area_string(data: &[u8]) -> String {
    let Some(&type_length) = data.first() else {
        return String::new();
    };
    let type_code = type_length >> 6;
    let declared = (type_length & 0x3f) as usize;
    if declared >= data.len() {
        return String::new();
    }

    let field = &data[1..1 + declared];
    let end = field.iter().position(|b| *b == 0x00 || *b == 0xFF).unwrap_or(field.len());
    let field = &field[..end];
    if field.is_empty() {
        return String::new();
    }

    match type_code {
        TYPE_TEXT => String::from_utf8_lossy(field).trim().to_string(),
        TYPE_BCD_PLUS => {
            let digits: String = field.iter().map(|b| BCD_PLUS[(b & 0x0f) as usize] as char).collect();
            digits.trim().to_string()
        }
        TYPE_ASCII_6BIT => unpack_6bit_ascii(field).trim().to_string(),
        TYPE_BINARY => String::new(),
        _ => String::new(),
    }
}

/// Every 3 packed bytes expand into 4 characters, least significant bits first.
fn unpack_6bit_ascii(field: &[u8]) -> String {
    let size = ((field.len() + 2) * 4 / 3) & !3;
    let mut out = Vec::with_capacity(size);
    let mut chars = [0u8; 4];

    for group in field.chunks(3) {
        chars[3] = group[0];
        chars[2] = group.get(1).copied().unwrap_or(0);
        chars[1] = group.get(2).copied().unwrap_or(0);

        for _ in 0..4 {
            out.push((chars[3] & 0x3f) + 0x20);
            for m in (1..4).rev() {
                chars[m] = (chars[m] >> 6) | ((chars[m - 1] & 0x3f) << 2);
            }
            chars[0] >>= 6;
        }
    }

    out.truncate(size);
    out.into_iter().map(char::from).collect()
}

/// `major.minor` from a Get Device ID payload; the minor revision is BCD.
pub fn firmware_version(payload: &[u8]) -> Option<String> {
    let (major, minor) = (*payload.get(2)?, *payload.get(3)?);
    let major = major & 0x7f;
    let minor = (minor >> 4) * 10 + (minor & 0x0f);
    Some(format!("{}.{}", major, minor))
}

/// MAC address from a Get LAN Configuration Parameters (MAC) payload.
pub fn bmc_mac(payload: &[u8]) -> Option<String> {
    let mac = payload.get(1..7)?;
    Some(
        mac.iter()
            .map(|b| format!("{:02X}", b))
            .collect::<Vec<_>>()
            .join(":"),
    )
}

/// Read the platform inventory of `host`.
///
/// FRU area discovery failures abort with an error. Firmware version and MAC are best effort.
pub async fn inventory_info<T>(transport: &T, host: &str) -> Result<InventoryInfo>
where
    T: IpmiTransport + ?Sized,
{
    let area = locate_product_area(transport, host).await?;
    debug!("{}: product info area at {} ({} bytes)", host, area.start, area.len);

    let buf = read_product_area(transport, host, area).await;
    let [manufacturer, product_name, serial] = decode_product_fields(&buf);

    let firmware_version = match transport.exec_raw(&IpmiRequest::local(CMD_GET_DEVICE_ID), host).await {
        Ok(resp) => resp.require_payload(4, "device id").ok().and_then(firmware_version),
        Err(e) => {
            debug!("{}: device id unavailable: {}", host, e);
            None
        }
    };

    let bmc_mac = match transport.exec_raw(&IpmiRequest::local(CMD_BMC_MAC), host).await {
        Ok(resp) => resp.require_payload(7, "BMC MAC").ok().and_then(bmc_mac),
        Err(e) => {
            debug!("{}: BMC MAC unavailable: {}", host, e);
            None
        }
    };

    Ok(InventoryInfo {
        manufacturer,
        product_name,
        serial,
        firmware_version,
        bmc_mac,
    })
}
