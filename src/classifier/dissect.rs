//! Layer-by-layer walk over a captured frame.

use etherparse::{Ethernet2HeaderSlice, Ipv4HeaderSlice, Ipv6HeaderSlice, TcpHeaderSlice, UdpHeaderSlice};
use std::net::Ipv4Addr;

use super::dns;
use crate::core::types::link_type;

/// Well-known EtherTypes.
pub mod ethertype {
    pub const IPV4: u16 = 0x0800;
    pub const ARP: u16 = 0x0806;
    pub const RARP: u16 = 0x8035;
    pub const VLAN: u16 = 0x8100;
    pub const QINQ: u16 = 0x88a8;
    pub const IPV6: u16 = 0x86dd;
    pub const EAPOL: u16 = 0x888e;
    pub const LLDP: u16 = 0x88cc;
}

/// IP protocol numbers the classifier looks at.
pub mod ip_proto {
    pub const HOP_BY_HOP: u8 = 0;
    pub const ICMP: u8 = 1;
    pub const TCP: u8 = 6;
    pub const UDP: u8 = 17;
    pub const ROUTING: u8 = 43;
    pub const FRAGMENT: u8 = 44;
    pub const AUTH: u8 = 51;
    pub const ICMPV6: u8 = 58;
    pub const DEST_OPTS: u8 = 60;
}

const LINUX_SLL_LEN: usize = 16;
const ARP_IPV4_LEN: usize = 28;
const ICMP_HEADER_LEN: usize = 8;
const MAX_VLAN_TAGS: usize = 2;
const MAX_IPV6_EXTENSIONS: usize = 8;

/// Network layer of a frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Network {
    Arp,
    Ipv4,
    Ipv6,
}

/// Transport layer of an IP packet.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Transport {
    Tcp,
    Udp,
    Icmp,
    Other(u8),
}

/// Everything the walk learned about a frame.
///
/// Fields stay at their defaults for layers that were absent or could not
/// be read; `error` records why the walk stopped early.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Dissection {
    pub layers: Vec<String>,
    pub network: Option<Network>,
    pub transport: Option<Transport>,
    pub src_addr: Option<String>,
    pub dst_addr: Option<String>,
    pub src_port: Option<u16>,
    pub dst_port: Option<u16>,
    pub dns_query: Option<String>,
    /// Name of the outermost layer nothing recognized
    pub raw_type: Option<String>,
    /// Length of the header prefix; application payload starts here
    pub retained_len: usize,
    pub error: Option<String>,
}

impl Dissection {
    /// Walk `data` starting at the given pcap link type.
    pub fn walk(link: u16, data: &[u8]) -> Self {
        let mut dissection = Dissection::default();
        if let Err(e) = dissection.walk_link(link, data) {
            dissection.error = Some(e);
        }
        dissection
    }

    /// One-line description of the recognized layers and endpoints.
    pub fn summary(&self) -> String {
        let mut summary = if self.layers.is_empty() {
            self.raw_type.clone().unwrap_or_else(|| "Unknown frame".to_string())
        } else {
            self.layers.join(" / ")
        };

        if let (Some(src), Some(dst)) = (&self.src_addr, &self.dst_addr) {
            summary.push(' ');
            summary.push_str(&endpoint(src, self.src_port));
            summary.push_str(" > ");
            summary.push_str(&endpoint(dst, self.dst_port));
        }
        summary
    }

    fn walk_link(&mut self, link: u16, data: &[u8]) -> Result<(), String> {
        match link {
            link_type::ETHERNET => {
                let eth = Ethernet2HeaderSlice::from_slice(data)
                    .map_err(|e| format!("Ethernet parse error: {e}"))?;
                self.layers.push("Ethernet".to_string());
                let mut offset = eth.slice().len();
                let mut ether_type = eth.ether_type().0;
                self.retained_len = offset;

                let mut tags = 0;
                while matches!(ether_type, ethertype::VLAN | ethertype::QINQ) && tags < MAX_VLAN_TAGS {
                    let tag = data
                        .get(offset..offset + 4)
                        .ok_or_else(|| "VLAN tag truncated".to_string())?;
                    ether_type = u16::from_be_bytes([tag[2], tag[3]]);
                    offset += 4;
                    tags += 1;
                    self.layers.push("802.1Q".to_string());
                    self.retained_len = offset;
                }

                self.walk_ethertype(ether_type, data, offset)
            },
            link_type::LINUX_SLL => {
                let header = data
                    .get(..LINUX_SLL_LEN)
                    .ok_or_else(|| format!("Linux SLL header too short: {} bytes", data.len()))?;
                self.layers.push("Linux SLL".to_string());
                self.retained_len = LINUX_SLL_LEN;
                let ether_type = u16::from_be_bytes([header[14], header[15]]);
                self.walk_ethertype(ether_type, data, LINUX_SLL_LEN)
            },
            link_type::RAW | link_type::RAW_BSD | link_type::IPV4 | link_type::IPV6 => {
                let first = data.first().ok_or_else(|| "empty raw IP frame".to_string())?;
                match first >> 4 {
                    4 => self.walk_ipv4(data, 0),
                    6 => self.walk_ipv6(data, 0),
                    version => Err(format!("raw IP frame with version {version}")),
                }
            },
            other => {
                self.raw_type = Some(format!("LinkType {other}"));
                Ok(())
            },
        }
    }

    fn walk_ethertype(&mut self, ether_type: u16, data: &[u8], offset: usize) -> Result<(), String> {
        match ether_type {
            ethertype::IPV4 => self.walk_ipv4(data, offset),
            ethertype::IPV6 => self.walk_ipv6(data, offset),
            ethertype::ARP => self.walk_arp(data, offset),
            other => {
                self.raw_type = Some(ethertype_name(other));
                Ok(())
            },
        }
    }

    fn walk_arp(&mut self, data: &[u8], offset: usize) -> Result<(), String> {
        let arp = &data[offset..];
        if arp.len() < 8 {
            return Err(format!("ARP packet too short: {} bytes", arp.len()));
        }
        self.network = Some(Network::Arp);
        self.layers.push("ARP".to_string());

        let hardware_type = u16::from_be_bytes([arp[0], arp[1]]);
        let protocol_type = u16::from_be_bytes([arp[2], arp[3]]);
        let hardware_size = arp[4];
        let protocol_size = arp[5];

        // Ethernet/IPv4 resolution is the only layout with addresses we keep
        if hardware_type == 1
            && protocol_type == ethertype::IPV4
            && hardware_size == 6
            && protocol_size == 4
        {
            if arp.len() < ARP_IPV4_LEN {
                return Err(format!("ARP packet too short: {} bytes", arp.len()));
            }
            self.src_addr = Some(ipv4_at(&arp[14..18]).to_string());
            self.dst_addr = Some(ipv4_at(&arp[24..28]).to_string());
            self.retained_len = offset + ARP_IPV4_LEN;
        } else {
            let body = 8 + 2 * (hardware_size as usize + protocol_size as usize);
            self.retained_len = offset + body.min(arp.len());
        }
        Ok(())
    }

    fn walk_ipv4(&mut self, data: &[u8], offset: usize) -> Result<(), String> {
        let ip = Ipv4HeaderSlice::from_slice(&data[offset..])
            .map_err(|e| format!("IPv4 parse error: {e}"))?;
        self.network = Some(Network::Ipv4);
        self.layers.push("IPv4".to_string());
        self.src_addr = Some(ip.source_addr().to_string());
        self.dst_addr = Some(ip.destination_addr().to_string());

        let offset = offset + ip.slice().len();
        self.retained_len = offset;

        // Only the first fragment carries the transport header
        if ip.fragments_offset().value() != 0 {
            self.layers.push("Fragment".to_string());
            return Ok(());
        }
        self.walk_transport(ip.protocol().0, data, offset)
    }

    fn walk_ipv6(&mut self, data: &[u8], offset: usize) -> Result<(), String> {
        let ip = Ipv6HeaderSlice::from_slice(&data[offset..])
            .map_err(|e| format!("IPv6 parse error: {e}"))?;
        self.network = Some(Network::Ipv6);
        self.layers.push("IPv6".to_string());
        self.src_addr = Some(ip.source_addr().to_string());
        self.dst_addr = Some(ip.destination_addr().to_string());

        let mut next = ip.next_header().0;
        let mut offset = offset + ip.slice().len();
        self.retained_len = offset;

        for _ in 0..MAX_IPV6_EXTENSIONS {
            let len = match next {
                ip_proto::HOP_BY_HOP | ip_proto::ROUTING | ip_proto::DEST_OPTS => {
                    let ext = data
                        .get(offset..offset + 2)
                        .ok_or_else(|| "IPv6 extension header truncated".to_string())?;
                    (ext[1] as usize + 1) * 8
                },
                ip_proto::AUTH => {
                    let ext = data
                        .get(offset..offset + 2)
                        .ok_or_else(|| "IPv6 authentication header truncated".to_string())?;
                    (ext[1] as usize + 2) * 4
                },
                ip_proto::FRAGMENT => {
                    let ext = data
                        .get(offset..offset + 8)
                        .ok_or_else(|| "IPv6 fragment header truncated".to_string())?;
                    let fragment_offset = u16::from_be_bytes([ext[2], ext[3]]) >> 3;
                    if fragment_offset != 0 {
                        self.retained_len = offset + 8;
                        self.layers.push("Fragment".to_string());
                        return Ok(());
                    }
                    8
                },
                _ => break,
            };

            if offset + len > data.len() {
                return Err("IPv6 extension header truncated".to_string());
            }
            next = data[offset];
            offset += len;
            self.retained_len = offset;
        }

        self.walk_transport(next, data, offset)
    }

    fn walk_transport(&mut self, proto: u8, data: &[u8], offset: usize) -> Result<(), String> {
        let segment = &data[offset..];
        match proto {
            ip_proto::TCP => {
                let tcp = TcpHeaderSlice::from_slice(segment)
                    .map_err(|e| format!("TCP parse error: {e}"))?;
                self.transport = Some(Transport::Tcp);
                self.layers.push("TCP".to_string());
                self.src_port = Some(tcp.source_port());
                self.dst_port = Some(tcp.destination_port());
                self.retained_len = offset + tcp.slice().len();
            },
            ip_proto::UDP => {
                let udp = UdpHeaderSlice::from_slice(segment)
                    .map_err(|e| format!("UDP parse error: {e}"))?;
                self.transport = Some(Transport::Udp);
                self.layers.push("UDP".to_string());
                self.src_port = Some(udp.source_port());
                self.dst_port = Some(udp.destination_port());
                let offset = offset + udp.slice().len();
                self.retained_len = offset;

                if udp.source_port() == dns::PORT || udp.destination_port() == dns::PORT {
                    self.walk_dns(data, offset);
                }
            },
            ip_proto::ICMP | ip_proto::ICMPV6 => {
                self.transport = Some(Transport::Icmp);
                self.layers.push(if proto == ip_proto::ICMP { "ICMP" } else { "ICMPv6" }.to_string());
                self.retained_len = offset + segment.len().min(ICMP_HEADER_LEN);
            },
            other => {
                self.transport = Some(Transport::Other(other));
            },
        }
        Ok(())
    }

    fn walk_dns(&mut self, data: &[u8], offset: usize) {
        self.layers.push("DNS".to_string());
        match dns::parse_question(&data[offset..]) {
            Ok(Some(question)) => {
                self.dns_query = Some(question.name);
                self.retained_len = offset + question.consumed;
            },
            Ok(None) => {
                self.retained_len = offset + data[offset..].len().min(dns::HEADER_LEN);
            },
            // A broken DNS body leaves the transport layer intact
            Err(e) => {
                tracing::debug!("DNS question not readable: {}", e);
                self.retained_len = offset + data[offset..].len().min(dns::HEADER_LEN);
            },
        }
    }
}

fn ipv4_at(bytes: &[u8]) -> Ipv4Addr {
    Ipv4Addr::new(bytes[0], bytes[1], bytes[2], bytes[3])
}

fn endpoint(addr: &str, port: Option<u16>) -> String {
    match port {
        Some(port) if addr.contains(':') => format!("[{addr}]:{port}"),
        Some(port) => format!("{addr}:{port}"),
        None => addr.to_string(),
    }
}

fn ethertype_name(ether_type: u16) -> String {
    match ether_type {
        ethertype::RARP => "RARP".to_string(),
        ethertype::EAPOL => "EAPOL".to_string(),
        ethertype::LLDP => "LLDP".to_string(),
        // 802.3 length field, LLC follows
        len if len <= 1500 => "802.3".to_string(),
        other => format!("EtherType 0x{other:04x}"),
    }
}

/// Length of the header prefix of a frame; bytes past it are payload.
pub fn retained_prefix(link: u16, data: &[u8]) -> usize {
    Dissection::walk(link, data).retained_len.min(data.len())
}
