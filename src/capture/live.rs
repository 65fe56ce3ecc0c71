//! Frames from a network interface via libpcap.

use super::{FrameSource, Next, Observed};
use crate::core::{PktwatchError, Result};
use chrono::{DateTime, Utc};
use std::time::Duration;

/// An open, filtered live capture.
pub struct LiveSource {
    capture: pcap::Capture<pcap::Active>,
    device: String,
    link_type: u16,
}

impl LiveSource {
    /// Attach to `interface`, or the first usable device when `None`.
    pub fn open(
        interface: Option<&str>,
        filter: Option<&str>,
        snaplen: i32,
        read_timeout: Duration,
    ) -> Result<Self> {
        let device = match interface {
            Some(name) => name.to_string(),
            None => {
                pcap::Device::lookup()
                    .map_err(|e| PktwatchError::capture(format!("interface lookup failed: {e}")))?
                    .ok_or(PktwatchError::NoInterface)?
                    .name
            },
        };

        let mut capture = pcap::Capture::from_device(device.as_str())
            .map_err(|e| PktwatchError::capture(format!("{device}: {e}")))?
            .promisc(true)
            .snaplen(snaplen)
            .timeout(read_timeout.as_millis().min(i32::MAX as u128) as i32)
            .open()
            .map_err(|e| PktwatchError::capture(format!("cannot open {device}: {e}")))?;

        if let Some(filter) = filter.filter(|f| !f.trim().is_empty()) {
            capture
                .filter(filter, true)
                .map_err(|e| PktwatchError::capture(format!("invalid filter '{filter}': {e}")))?;
        }

        let link_type = capture.get_datalink().0 as u16;
        tracing::info!("Capturing on {} (link type {})", device, link_type);

        Ok(Self {
            capture,
            device,
            link_type,
        })
    }
}

impl FrameSource for LiveSource {
    fn next(&mut self) -> Result<Next> {
        match self.capture.next_packet() {
            Ok(packet) => {
                let secs = packet.header.ts.tv_sec as i64;
                let micros = packet.header.ts.tv_usec as u32;
                Ok(Next::Frame(Observed {
                    timestamp: DateTime::from_timestamp(secs, micros.saturating_mul(1_000))
                        .unwrap_or_else(Utc::now),
                    length: packet.header.len,
                    link_type: self.link_type,
                    data: packet.data.to_vec(),
                }))
            },
            // read timeout, lets the worker look at the stop signal
            Err(pcap::Error::TimeoutExpired) => Ok(Next::Idle),
            Err(e) => Err(PktwatchError::capture(format!("{}: {}", self.device, e))),
        }
    }

    fn describe(&self) -> String {
        format!("interface {}", self.device)
    }
}
