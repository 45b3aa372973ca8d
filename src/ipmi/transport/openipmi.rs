//! In-band transport through the OpenIPMI kernel driver (`/dev/ipmi0`).
//!
//! A batch opens the device once, keeps up to [`N_SIM`] requests in flight and
//! collects the answers by message id. Every submission holds one lock so a
//! single instance never talks to the driver from two threads at once. The
//! blocking ioctl work runs on the tokio blocking pool.

use std::io;
use std::sync::{Arc, Mutex, PoisonError};

use async_trait::async_trait;
use tracing::{debug, info, warn};

use super::local::local_host;
use super::probe::probe_dcmi_thermal;
use super::{Capabilities, IpmiTransport};
use crate::ipmi::catalog::Protocol;
use crate::ipmi::{Error, IpmiRequest, IpmiResponse, RequestDescription, Result};

/// Requests kept in flight at once.
pub const N_SIM: usize = 3;
/// Per-message receive wait.
pub const RECV_TIMEOUT_MS: i32 = 5000;

const ERR_INVALID_BUFF_SIZE: i32 = -2;
const ERR_DEVICE_NOT_OPENED: i32 = 100;
const ERR_COMMAND_NOT_SENT: i32 = 200;
const ERR_DEVICE_NOT_READY: i32 = 300;
const ERR_DEVICE_TIMEOUT: i32 = 310;
const ERR_MESSAGE_NOT_RECEIVED: i32 = 320;

/// How requests are addressed on the driver.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Addressing {
    /// IPMB, using each request's channel/slave (Node Manager).
    Ipmb,
    /// The BMC system interface.
    SystemInterface,
}

pub struct OpenIpmi {
    device: String,
    protocol: Protocol,
    lock: Arc<Mutex<()>>,
}

impl OpenIpmi {
    pub fn new(device: &str, protocol: Protocol) -> Self {
        Self {
            device: device.to_string(),
            protocol,
            lock: Arc::new(Mutex::new(())),
        }
    }

    fn batch_addressing(&self) -> Addressing {
        match self.protocol {
            Protocol::NodeManager => Addressing::Ipmb,
            _ => Addressing::SystemInterface,
        }
    }

    async fn submit(&self, requests: Vec<IpmiRequest>, addressing: Addressing) -> Result<Vec<IpmiResponse>> {
        let device = self.device.clone();
        let lock = Arc::clone(&self.lock);

        tokio::task::spawn_blocking(move || {
            let _guard = lock.lock().unwrap_or_else(PoisonError::into_inner);
            driver::batch(&device, &requests, addressing)
        })
        .await
        .map_err(io::Error::from)?
    }
}

#[async_trait]
impl IpmiTransport for OpenIpmi {
    async fn exec_raw(&self, request: &IpmiRequest, _host: &str) -> Result<IpmiResponse> {
        let mut responses = self.submit(vec![request.clone()], Addressing::SystemInterface).await?;
        responses.pop().ok_or_else(|| Error::protocol("driver returned no response"))
    }

    async fn batch_exec_raw(&self, requests: &[IpmiRequest], _host: &str) -> Result<Vec<IpmiResponse>> {
        if requests.is_empty() {
            return Ok(Vec::new());
        }
        self.submit(requests.to_vec(), self.batch_addressing()).await
    }

    async fn platform_capabilities(&self, candidates: &[RequestDescription], hosts: &[String]) -> Capabilities {
        let host = local_host(hosts);
        let requests: Vec<IpmiRequest> = candidates.iter().map(|c| c.request.clone()).collect();

        let mut supported: Vec<RequestDescription> = match self.batch_exec_raw(&requests, &host).await {
            Ok(responses) => candidates
                .iter()
                .zip(responses)
                .filter(|(_, resp)| resp.is_valid)
                .map(|(candidate, _)| candidate.clone())
                .collect(),
            Err(e) => {
                warn!("Capability probe on {} failed: {}", self.device, e);
                Vec::new()
            }
        };

        if self.protocol == Protocol::Dcmi {
            if let Some(thermal) = probe_dcmi_thermal(self, &host).await {
                supported.push(thermal);
            }
        }

        info!("{}: {} of {} requests supported", host, supported.len(), candidates.len());
        let mut capabilities = Capabilities::new();
        capabilities.insert(host, supported);
        capabilities
    }
}

fn system_error(code: i32, err: &io::Error) -> Error {
    Error::System {
        code,
        errno: err.raw_os_error().unwrap_or(0),
        message: err.to_string(),
    }
}

fn check_lengths(requests: &[IpmiRequest]) -> Result<()> {
    if let Some(index) = requests.iter().position(|r| r.data.len() < 2) {
        debug!("Supplied buffer too short in msg {}", index);
        return Err(Error::InvalidCall { code: ERR_INVALID_BUFF_SIZE });
    }
    Ok(())
}

#[cfg(target_os = "linux")]
mod driver {
    use std::fs::OpenOptions;
    use std::io;
    use std::mem::size_of;
    use std::os::unix::io::{AsRawFd, RawFd};

    use libc::{c_int, c_long, c_short, c_uchar, c_uint, c_ushort};
    use tracing::trace;

    use super::*;

    const IPMI_IPMB_ADDR_TYPE: c_int = 0x01;
    const IPMI_SYSTEM_INTERFACE_ADDR_TYPE: c_int = 0x0c;
    const IPMI_BMC_CHANNEL: c_short = 0x0f;
    const IPMI_MAX_ADDR_SIZE: usize = 32;
    const RECV_BUFFER: usize = 1024;

    #[repr(C)]
    struct IpmiMsg {
        netfn: c_uchar,
        cmd: c_uchar,
        data_len: c_ushort,
        data: *mut c_uchar,
    }

    #[repr(C)]
    struct IpmiReq {
        addr: *mut c_uchar,
        addr_len: c_uint,
        msgid: c_long,
        msg: IpmiMsg,
    }

    #[repr(C)]
    struct IpmiRecv {
        recv_type: c_int,
        addr: *mut c_uchar,
        addr_len: c_uint,
        msgid: c_long,
        msg: IpmiMsg,
    }

    #[repr(C)]
    struct IpmiIpmbAddr {
        addr_type: c_int,
        channel: c_short,
        slave_addr: c_uchar,
        lun: c_uchar,
    }

    #[repr(C)]
    struct IpmiSystemInterfaceAddr {
        addr_type: c_int,
        channel: c_short,
        lun: c_uchar,
    }

    /// Generic address large enough for anything the driver reports back.
    #[repr(C)]
    struct IpmiAddr {
        addr_type: c_int,
        channel: c_short,
        data: [c_uchar; IPMI_MAX_ADDR_SIZE],
    }

    const IOC_WRITE: u32 = 1;
    const IOC_READ: u32 = 2;

    const fn ioc(dir: u32, nr: u32, size: usize) -> u32 {
        (dir << 30) | ((size as u32) << 16) | ((b'i' as u32) << 8) | nr
    }

    pub(super) const IPMICTL_RECEIVE_MSG_TRUNC: u32 = ioc(IOC_READ | IOC_WRITE, 11, size_of::<IpmiRecv>());
    pub(super) const IPMICTL_SEND_COMMAND: u32 = ioc(IOC_READ, 13, size_of::<IpmiReq>());

    pub(super) fn batch(device: &str, requests: &[IpmiRequest], addressing: Addressing) -> Result<Vec<IpmiResponse>> {
        check_lengths(requests)?;

        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .open(device)
            .map_err(|e| system_error(ERR_DEVICE_NOT_OPENED, &e))?;
        let fd = file.as_raw_fd();

        let n = requests.len();
        let mut responses = vec![IpmiResponse::invalid(); n];
        let mut deferred: Option<Error> = None;
        let mut recv_buf = vec![0u8; RECV_BUFFER];
        let (mut sent, mut in_flight, mut to_receive) = (0usize, 0usize, n);

        while to_receive > 0 {
            if sent < n && in_flight < N_SIM {
                match send(fd, sent, &requests[sent], addressing) {
                    Ok(()) => in_flight += 1,
                    Err(e) => {
                        deferred = Some(system_error(ERR_COMMAND_NOT_SENT, &e));
                        to_receive -= 1;
                    }
                }
                sent += 1;
                continue;
            }

            wait_readable(fd)?;

            match receive(fd, &mut recv_buf) {
                Ok((msgid, len)) => {
                    trace!("Driver answered msg {} with {} bytes", msgid, len);
                    if let Some(slot) = responses.get_mut(msgid) {
                        *slot = IpmiResponse::valid(recv_buf[..len].to_vec());
                    }
                }
                Err(e) => deferred = Some(system_error(ERR_MESSAGE_NOT_RECEIVED, &e)),
            }
            in_flight = in_flight.saturating_sub(1);
            to_receive -= 1;
        }

        match deferred {
            Some(e) => Err(e),
            None => Ok(responses),
        }
    }

    fn send(fd: RawFd, msgid: usize, request: &IpmiRequest, addressing: Addressing) -> io::Result<()> {
        let mut ipmb = IpmiIpmbAddr {
            addr_type: IPMI_IPMB_ADDR_TYPE,
            channel: request.channel,
            slave_addr: request.slave,
            lun: 0,
        };
        let mut system = IpmiSystemInterfaceAddr {
            addr_type: IPMI_SYSTEM_INTERFACE_ADDR_TYPE,
            channel: IPMI_BMC_CHANNEL,
            lun: 0,
        };
        let (addr, addr_len) = match addressing {
            Addressing::Ipmb => (&mut ipmb as *mut IpmiIpmbAddr as *mut c_uchar, size_of::<IpmiIpmbAddr>()),
            Addressing::SystemInterface => (
                &mut system as *mut IpmiSystemInterfaceAddr as *mut c_uchar,
                size_of::<IpmiSystemInterfaceAddr>(),
            ),
        };

        let mut body = request.data[2..].to_vec();
        let mut req = IpmiReq {
            addr,
            addr_len: addr_len as c_uint,
            msgid: msgid as c_long,
            msg: IpmiMsg {
                netfn: request.data[0],
                cmd: request.data[1],
                data_len: body.len() as c_ushort,
                data: body.as_mut_ptr(),
            },
        };

        // SAFETY: `req` points at `ipmb`/`system` and `body`, which outlive the call;
        // the driver copies both before returning.
        let rc = unsafe { libc::ioctl(fd, IPMICTL_SEND_COMMAND as _, &mut req as *mut IpmiReq) };
        if rc < 0 {
            return Err(io::Error::last_os_error());
        }
        Ok(())
    }

    fn wait_readable(fd: RawFd) -> Result<()> {
        let mut pfd = libc::pollfd { fd, events: libc::POLLIN, revents: 0 };
        // SAFETY: a single valid pollfd.
        let ready = unsafe { libc::poll(&mut pfd, 1, RECV_TIMEOUT_MS) };
        if ready < 0 {
            return Err(system_error(ERR_DEVICE_NOT_READY, &io::Error::last_os_error()));
        }
        if ready == 0 {
            return Err(Error::System {
                code: ERR_DEVICE_TIMEOUT,
                errno: 0,
                message: "Timeout on read select.".to_string(),
            });
        }
        Ok(())
    }

    fn receive(fd: RawFd, buf: &mut [u8]) -> io::Result<(usize, usize)> {
        let mut addr = IpmiAddr { addr_type: 0, channel: 0, data: [0; IPMI_MAX_ADDR_SIZE] };
        let mut recv = IpmiRecv {
            recv_type: 0,
            addr: &mut addr as *mut IpmiAddr as *mut c_uchar,
            addr_len: size_of::<IpmiAddr>() as c_uint,
            msgid: 0,
            msg: IpmiMsg {
                netfn: 0,
                cmd: 0,
                data_len: buf.len() as c_ushort,
                data: buf.as_mut_ptr(),
            },
        };

        // SAFETY: `recv` points at `addr` and `buf`, both valid for their declared lengths.
        let rc = unsafe { libc::ioctl(fd, IPMICTL_RECEIVE_MSG_TRUNC as _, &mut recv as *mut IpmiRecv) };
        if rc < 0 {
            return Err(io::Error::last_os_error());
        }

        let msgid = usize::try_from(recv.msgid).unwrap_or(usize::MAX);
        let len = (recv.msg.data_len as usize).min(buf.len());
        Ok((msgid, len))
    }
}

#[cfg(not(target_os = "linux"))]
mod driver {
    use super::*;

    pub(super) fn batch(_device: &str, requests: &[IpmiRequest], _addressing: Addressing) -> Result<Vec<IpmiResponse>> {
        check_lengths(requests)?;
        Err(Error::Unsupported("OpenIPMI driver is only available on Linux"))
    }
}
