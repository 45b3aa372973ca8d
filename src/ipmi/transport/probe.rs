//! Capability probing helpers shared by all transports.

use tracing::{debug, info};

use super::IpmiTransport;
use crate::ipmi::catalog::{self, CMD_DCMI_THERMAL_CAP, CMD_SDR_LOOKUP, SDR_LOOKUP_RECORD_ID_OFFSET};
use crate::ipmi::{IpmiRequest, RequestDescription};

/// CLI responses carry no validity signal; an all-zero (or empty) answer means "unsupported".
pub fn cli_supported(data: &[u8]) -> bool {
    data.iter().any(|b| *b != 0)
}

/// Two-step DCMI inlet thermal discovery.
///
/// Get Temperature Readings for the inlet entity yields the SDR record id of the
/// inlet sensor; fetching that record yields the sensor number, which is patched
/// into an owned copy of the sensor reading template.
pub async fn probe_dcmi_thermal<T>(transport: &T, host: &str) -> Option<RequestDescription>
where
    T: IpmiTransport + ?Sized,
{
    let cap = match transport.exec_raw(&IpmiRequest::local(CMD_DCMI_THERMAL_CAP), host).await {
        Ok(resp) if resp.data.len() > 5 => resp,
        Ok(resp) => {
            debug!("DCMI thermal capability not reported on {} ({} bytes)", host, resp.data.len());
            return None;
        }
        Err(e) => {
            debug!("DCMI thermal capability query failed on {}: {}", host, e);
            return None;
        }
    };

    let record_id = &cap.payload()[3..5];
    let lookup = IpmiRequest::local(CMD_SDR_LOOKUP).patched(SDR_LOOKUP_RECORD_ID_OFFSET, record_id);

    match transport.exec_raw(&lookup, host).await {
        Ok(resp) if resp.data.len() > 10 => {
            let sensor_id = resp.payload()[9];
            info!("DCMI inlet thermal sensor {:#04x} discovered on {}", sensor_id, host);
            Some(catalog::dcmi_thermal(sensor_id))
        }
        Ok(_) => {
            debug!("DCMI inlet sensor record too short on {}", host);
            None
        }
        Err(e) => {
            debug!("DCMI inlet sensor record lookup failed on {}: {}", host, e);
            None
        }
    }
}
