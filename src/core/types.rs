//! Records exchanged between the pipeline stages.
//!
//! A [`RawFrame`] lives only between capture and classification. The
//! classifier turns it into a [`ParsedRecord`], which is the unit the store
//! persists and the query service reads back as a [`StoredRecord`].

use chrono::{DateTime, SubsecRound, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::core::{PktwatchError, Result};

/// Address placeholder used when a layer could not supply one.
pub const UNKNOWN_ADDRESS: &str = "-";

/// pcap LINKTYPE numbers understood by the classifier.
pub mod link_type {
    /// Ethernet II
    pub const ETHERNET: u16 = 1;
    /// Raw IP (BSD value)
    pub const RAW_BSD: u16 = 12;
    /// Raw IP
    pub const RAW: u16 = 101;
    /// Linux cooked capture v1
    pub const LINUX_SLL: u16 = 113;
    /// Raw IPv4
    pub const IPV4: u16 = 228;
    /// Raw IPv6
    pub const IPV6: u16 = 229;
}

/// Protocol label attached to every record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum Protocol {
    #[serde(rename = "ARP")]
    Arp,
    #[serde(rename = "TCP")]
    Tcp,
    #[serde(rename = "UDP")]
    Udp,
    #[serde(rename = "ICMP")]
    Icmp,
    #[serde(rename = "DNS")]
    Dns,
    #[serde(rename = "HTTP")]
    Http,
    #[serde(rename = "IPv6")]
    Ipv6,
    Others,
    Unknown,
}

impl Protocol {
    /// Every label, in display order.
    pub const ALL: [Protocol; 9] = [
        Protocol::Arp,
        Protocol::Tcp,
        Protocol::Udp,
        Protocol::Icmp,
        Protocol::Dns,
        Protocol::Http,
        Protocol::Ipv6,
        Protocol::Others,
        Protocol::Unknown,
    ];

    /// Label as stored and served.
    pub fn as_str(&self) -> &'static str {
        match self {
            Protocol::Arp => "ARP",
            Protocol::Tcp => "TCP",
            Protocol::Udp => "UDP",
            Protocol::Icmp => "ICMP",
            Protocol::Dns => "DNS",
            Protocol::Http => "HTTP",
            Protocol::Ipv6 => "IPv6",
            Protocol::Others => "Others",
            Protocol::Unknown => "Unknown",
        }
    }

    /// Case-insensitive lookup, `None` for names outside the label set.
    pub fn from_label(name: &str) -> Option<Self> {
        let name = name.trim();
        Self::ALL
            .into_iter()
            .find(|p| p.as_str().eq_ignore_ascii_case(name))
    }
}

impl fmt::Display for Protocol {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Protocol {
    type Err = PktwatchError;

    fn from_str(s: &str) -> Result<Self> {
        Self::from_label(s)
            .ok_or_else(|| PktwatchError::invalid_request(format!("unknown protocol label '{s}'")))
    }
}

/// Where a record came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Origin {
    /// Observed on a live interface
    #[default]
    Live,
    /// Replayed from a recording
    Pcap,
}

impl Origin {
    /// Tag as stored and served.
    pub fn as_str(&self) -> &'static str {
        match self {
            Origin::Live => "LIVE",
            Origin::Pcap => "PCAP",
        }
    }
}

impl fmt::Display for Origin {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Origin {
    type Err = PktwatchError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_uppercase().as_str() {
            "LIVE" => Ok(Origin::Live),
            "PCAP" => Ok(Origin::Pcap),
            other => Err(PktwatchError::invalid_request(format!("unknown origin tag '{other}'"))),
        }
    }
}

/// Fields a producer extracted itself, used when no bytes are supplied.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct FrameHints {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub src_ip: Option<String>,
    #[serde(default, alias = "dest_ip", skip_serializing_if = "Option::is_none")]
    pub dst_ip: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub src_port: Option<u16>,
    #[serde(default, alias = "dest_port", skip_serializing_if = "Option::is_none")]
    pub dst_port: Option<u16>,
    /// Transport name such as `TCP`, `UDP` or `ICMP`
    #[serde(default, alias = "protocol", skip_serializing_if = "Option::is_none")]
    pub transport: Option<String>,
    /// Outermost layer name reported by the producer
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub raw_proto: Option<String>,
}

impl FrameHints {
    /// True when no hint is set.
    pub fn is_empty(&self) -> bool {
        *self == FrameHints::default()
    }
}

/// One observed or replayed frame, before classification.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RawFrame {
    #[serde(default = "Utc::now")]
    pub timestamp: DateTime<Utc>,
    #[serde(default)]
    pub length: u32,
    #[serde(default)]
    pub summary: String,
    /// Retained header bytes, hex encoded
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub frame_hex: Option<String>,
    #[serde(default, alias = "source")]
    pub origin: Origin,
    #[serde(default = "default_link_type")]
    pub link_type: u16,
    #[serde(flatten)]
    pub hints: FrameHints,
}

fn default_link_type() -> u16 {
    link_type::ETHERNET
}

impl RawFrame {
    /// Frame carrying captured bytes.
    pub fn from_bytes(
        timestamp: DateTime<Utc>,
        length: u32,
        link_type: u16,
        bytes: &[u8],
        origin: Origin,
    ) -> Self {
        Self {
            timestamp,
            length,
            summary: String::new(),
            frame_hex: Some(hex::encode(bytes)),
            origin,
            link_type,
            hints: FrameHints::default(),
        }
    }

    /// Frame described only by pre-extracted fields.
    pub fn from_hints(timestamp: DateTime<Utc>, hints: FrameHints, origin: Origin) -> Self {
        Self {
            timestamp,
            length: 0,
            summary: String::new(),
            frame_hex: None,
            origin,
            link_type: link_type::ETHERNET,
            hints,
        }
    }

    /// Set the one-line summary.
    pub fn with_summary(mut self, summary: impl Into<String>) -> Self {
        self.summary = summary.into();
        self
    }
}

/// The durable, classified form of a frame.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ParsedRecord {
    pub src_ip: String,
    #[serde(alias = "dest_ip")]
    pub dst_ip: String,
    pub protocol: Protocol,
    #[serde(default)]
    pub src_port: Option<u16>,
    #[serde(default, alias = "dest_port")]
    pub dst_port: Option<u16>,
    #[serde(default)]
    pub dns_query: Option<String>,
    #[serde(default)]
    pub summary: String,
    #[serde(deserialize_with = "micros")]
    pub timestamp: DateTime<Utc>,
    #[serde(default, alias = "source")]
    pub origin: Origin,
}

/// Stored text keeps microseconds, so drop anything finer on the way in.
fn micros<'de, D>(deserializer: D) -> std::result::Result<DateTime<Utc>, D::Error>
where
    D: serde::Deserializer<'de>,
{
    DateTime::<Utc>::deserialize(deserializer).map(|timestamp| timestamp.trunc_subsecs(6))
}

impl ParsedRecord {
    /// Record with only the mandatory fields, everything optional absent.
    pub fn new(
        src_ip: impl Into<String>,
        dst_ip: impl Into<String>,
        protocol: Protocol,
        timestamp: DateTime<Utc>,
        origin: Origin,
    ) -> Self {
        Self {
            src_ip: src_ip.into(),
            dst_ip: dst_ip.into(),
            protocol,
            src_port: None,
            dst_port: None,
            dns_query: None,
            summary: String::new(),
            // stored text keeps microseconds, so drop anything finer
            timestamp: timestamp.trunc_subsecs(6),
            origin,
        }
    }

    /// Set both ports.
    pub fn with_ports(mut self, src_port: Option<u16>, dst_port: Option<u16>) -> Self {
        self.src_port = src_port;
        self.dst_port = dst_port;
        self
    }

    /// Set the DNS query name.
    pub fn with_dns_query(mut self, name: impl Into<String>) -> Self {
        self.dns_query = Some(name.into());
        self
    }

    /// Set the summary text.
    pub fn with_summary(mut self, summary: impl Into<String>) -> Self {
        self.summary = summary.into();
        self
    }
}

/// A persisted record with its store-assigned identity.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StoredRecord {
    pub id: i64,
    #[serde(flatten)]
    pub record: ParsedRecord,
}
