//! `ipmitool raw` subprocess executor shared by the local and remote CLI transports.
//! Encodes request bytes as hex arguments and parses the hex dump printed back.

use std::io;

use serde::{Deserialize, Serialize};
use tracing::{debug, trace};

use crate::ipmi::{Error, IpmiRequest, Result};

/// IPMB bridging target (`-b <channel> -t <slave>`).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct Bridge {
    pub channel: i16,
    pub slave: u8,
}

impl Bridge {
    pub fn is_set(&self) -> bool {
        self.slave != 0
    }
}

#[derive(Debug, Clone)]
pub struct IpmiTool {
    program: String,
    /// Configured bridge; when unset, bridged calls use the request's own target.
    bridge: Bridge,
}

impl IpmiTool {
    pub fn new(program: &str, bridge: Bridge) -> Self {
        Self { program: program.to_string(), bridge }
    }

    pub fn program(&self) -> &str {
        &self.program
    }

    /// Bridging target for a bridged call, `None` when the call goes straight to the BMC.
    pub fn bridge_for(&self, request: &IpmiRequest) -> Option<Bridge> {
        if self.bridge.is_set() {
            return Some(self.bridge);
        }
        let own = Bridge { channel: request.channel, slave: request.slave };
        own.is_set().then_some(own)
    }

    /// Arguments after the interface/session flags: `[-b c -t s] raw 0x.. 0x..`
    pub fn raw_args(&self, request: &IpmiRequest, bridged: bool) -> Vec<String> {
        let mut args = Vec::with_capacity(request.data.len() + 5);
        if bridged {
            if let Some(bridge) = self.bridge_for(request) {
                args.extend([
                    "-b".to_string(),
                    bridge.channel.to_string(),
                    "-t".to_string(),
                    format!("0x{:02x}", bridge.slave),
                ]);
            }
        }
        args.push("raw".to_string());
        args.extend(request.data.iter().map(|b| format!("0x{:02x}", b)));
        args
    }

    /// Run the tool with `args` and return the response bytes (completion code first).
    ///
    /// A missing executable or a non-zero exit is not an error: the response is empty.
    /// Any other spawn failure is surfaced.
    pub async fn run(&self, args: &[String]) -> Result<Vec<u8>> {
        trace!("Executing: {} {}", self.program, masked(args).join(" "));

        let output = match tokio::process::Command::new(&self.program).args(args).output().await {
            Ok(output) => output,
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                debug!("{}", Error::ToolUnavailable(self.program.clone()));
                return Ok(Vec::new());
            }
            Err(e) => return Err(Error::Io(e)),
        };

        if !output.status.success() {
            debug!(
                "Unable to run {} raw: {}",
                self.program,
                String::from_utf8_lossy(&output.stderr).trim()
            );
            return Ok(Vec::new());
        }

        Ok(parse_output(&String::from_utf8_lossy(&output.stdout)))
    }
}

/// Parse `ipmitool raw` output into response bytes.
///
/// ipmitool prints only the payload and exits non-zero on a failing completion
/// code, so a printed answer implies completion code 0x00, which is prepended.
/// Tokens that are not hex become 0.
pub fn parse_output(stdout: &str) -> Vec<u8> {
    std::iter::once(0x00)
        .chain(
            stdout
                .split_whitespace()
                .map(|token| u8::from_str_radix(token.trim_start_matches("0x"), 16).unwrap_or(0)),
        )
        .collect()
}

/// Argument list safe for logging: the value after `-P` is hidden.
fn masked(args: &[String]) -> Vec<&str> {
    let mut out = Vec::with_capacity(args.len());
    let mut hide_next = false;
    for arg in args {
        if hide_next {
            out.push("****");
            hide_next = false;
            continue;
        }
        hide_next = arg == "-P";
        out.push(arg.as_str());
    }
    out
}
