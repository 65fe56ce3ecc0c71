//! Protocol classification.
//!
//! Turns a [`RawFrame`] into a [`ParsedRecord`]. Classification never
//! fails: a frame that cannot be read still yields a record, labelled
//! `Others` with `-` for every address the walk did not reach.
//!
//! Rules, first match wins:
//! 1. ARP
//! 2. IPv4, then TCP (`HTTP` on port 80), UDP (`DNS` on port 53), ICMP,
//!    else `Others`
//! 3. IPv6, same transport rules without the HTTP heuristic, else `IPv6`
//! 4. the frame's raw type name when it names a known label, else `Unknown`

pub mod dissect;
pub mod dns;
#[cfg(test)]
pub(crate) mod test_frames;

use std::net::IpAddr;

use crate::core::types::UNKNOWN_ADDRESS;
use crate::core::{FrameHints, ParsedRecord, PktwatchError, Protocol, RawFrame};
pub use dissect::{retained_prefix, Dissection, Network, Transport};

const HTTP_PORT: u16 = 80;

/// Label for the given layers.
pub fn label(
    network: Option<Network>,
    transport: Option<Transport>,
    ports: (Option<u16>, Option<u16>),
    raw_type: Option<&str>,
) -> Protocol {
    let either = |port: u16| ports.0 == Some(port) || ports.1 == Some(port);

    match (network, transport) {
        (Some(Network::Arp), _) => Protocol::Arp,
        (Some(Network::Ipv4), Some(Transport::Tcp)) if either(HTTP_PORT) => Protocol::Http,
        (Some(Network::Ipv4 | Network::Ipv6), Some(Transport::Tcp)) => Protocol::Tcp,
        (Some(Network::Ipv4 | Network::Ipv6), Some(Transport::Udp)) if either(dns::PORT) => {
            Protocol::Dns
        },
        (Some(Network::Ipv4 | Network::Ipv6), Some(Transport::Udp)) => Protocol::Udp,
        (Some(Network::Ipv4 | Network::Ipv6), Some(Transport::Icmp)) => Protocol::Icmp,
        (Some(Network::Ipv4), _) => Protocol::Others,
        (Some(Network::Ipv6), _) => Protocol::Ipv6,
        (None, _) => raw_type
            .and_then(Protocol::from_label)
            .unwrap_or(Protocol::Unknown),
    }
}

/// Classify one frame.
pub fn classify(frame: &RawFrame) -> ParsedRecord {
    if let Some(frame_hex) = &frame.frame_hex {
        return match hex::decode(frame_hex.trim()) {
            Ok(bytes) => from_dissection(frame, &Dissection::walk(frame.link_type, &bytes)),
            Err(e) => {
                unreadable(PktwatchError::parse(format!("frame bytes are not valid hex: {e}")));
                fallback(frame)
            },
        };
    }

    if frame.hints.is_empty() {
        unreadable(PktwatchError::parse("frame carries neither bytes nor fields"));
    }
    from_hints(frame, &frame.hints)
}

/// Log a frame that only yields a fallback record.
fn unreadable(err: PktwatchError) {
    tracing::warn!(category = err.category(), "{}, storing fallback record", err);
}

fn from_dissection(frame: &RawFrame, d: &Dissection) -> ParsedRecord {
    let protocol = match &d.error {
        Some(e) => {
            unreadable(PktwatchError::parse(format!(
                "dissection failed after [{}]: {}",
                d.layers.join(" / "),
                e
            )));
            Protocol::Others
        },
        None => label(d.network, d.transport, (d.src_port, d.dst_port), d.raw_type.as_deref()),
    };

    let mut record = ParsedRecord::new(
        d.src_addr.as_deref().unwrap_or(UNKNOWN_ADDRESS),
        d.dst_addr.as_deref().unwrap_or(UNKNOWN_ADDRESS),
        protocol,
        frame.timestamp,
        frame.origin,
    )
    .with_ports(d.src_port, d.dst_port)
    .with_summary(summary_or(frame, || d.summary()));

    if protocol == Protocol::Dns {
        record.dns_query = d.dns_query.clone();
    }
    record
}

fn from_hints(frame: &RawFrame, hints: &FrameHints) -> ParsedRecord {
    let addr = |value: &Option<String>| value.as_deref().and_then(|v| v.parse::<IpAddr>().ok());
    let network = match (addr(&hints.src_ip), addr(&hints.dst_ip)) {
        _ if hints.raw_proto.as_deref().is_some_and(|p| p.eq_ignore_ascii_case("ARP")) => {
            Some(Network::Arp)
        },
        (Some(IpAddr::V4(_)), _) | (None, Some(IpAddr::V4(_))) => Some(Network::Ipv4),
        (Some(IpAddr::V6(_)), _) | (None, Some(IpAddr::V6(_))) => Some(Network::Ipv6),
        (None, None) => None,
    };

    let transport = hints.transport.as_deref().and_then(|name| {
        match name.trim().to_ascii_uppercase().as_str() {
            "TCP" | "HTTP" => Some(Transport::Tcp),
            "UDP" | "DNS" => Some(Transport::Udp),
            "ICMP" | "ICMPV6" => Some(Transport::Icmp),
            _ => None,
        }
    });

    let raw_type = hints.raw_proto.as_deref().or(hints.transport.as_deref());
    let protocol = label(network, transport, (hints.src_port, hints.dst_port), raw_type);

    let src = hints.src_ip.clone().unwrap_or_else(|| UNKNOWN_ADDRESS.to_string());
    let dst = hints.dst_ip.clone().unwrap_or_else(|| UNKNOWN_ADDRESS.to_string());
    let (src_port, dst_port) = match transport {
        Some(Transport::Tcp | Transport::Udp) => (hints.src_port, hints.dst_port),
        _ => (None, None),
    };

    let record = ParsedRecord::new(src, dst, protocol, frame.timestamp, frame.origin)
        .with_ports(src_port, dst_port);
    let summary = summary_or(frame, || generated_summary(&record));
    record.with_summary(summary)
}

fn fallback(frame: &RawFrame) -> ParsedRecord {
    let record = ParsedRecord::new(
        UNKNOWN_ADDRESS,
        UNKNOWN_ADDRESS,
        Protocol::Others,
        frame.timestamp,
        frame.origin,
    );
    let summary = summary_or(frame, || generated_summary(&record));
    record.with_summary(summary)
}

fn summary_or(frame: &RawFrame, generate: impl FnOnce() -> String) -> String {
    if frame.summary.trim().is_empty() {
        generate()
    } else {
        frame.summary.clone()
    }
}

fn generated_summary(record: &ParsedRecord) -> String {
    let side = |addr: &str, port: Option<u16>| match port {
        Some(port) => format!("{addr}:{port}"),
        None => addr.to_string(),
    };
    format!(
        "{} {} > {}",
        record.protocol,
        side(&record.src_ip, record.src_port),
        side(&record.dst_ip, record.dst_port)
    )
}
