//! Frame builders shared by the classifier tests.

use etherparse::PacketBuilder;

const SRC_MAC: [u8; 6] = [0x02, 0x00, 0x00, 0x00, 0x00, 0x01];
const DST_MAC: [u8; 6] = [0x02, 0x00, 0x00, 0x00, 0x00, 0x02];

pub fn tcp_v4(src: [u8; 4], src_port: u16, dst: [u8; 4], dst_port: u16, payload: &[u8]) -> Vec<u8> {
    let builder = PacketBuilder::ethernet2(SRC_MAC, DST_MAC)
        .ipv4(src, dst, 64)
        .tcp(src_port, dst_port, 1, 65535);
    let mut frame = Vec::with_capacity(builder.size(payload.len()));
    builder.write(&mut frame, payload).unwrap();
    frame
}

pub fn udp_v4(src: [u8; 4], src_port: u16, dst: [u8; 4], dst_port: u16, payload: &[u8]) -> Vec<u8> {
    let builder = PacketBuilder::ethernet2(SRC_MAC, DST_MAC)
        .ipv4(src, dst, 64)
        .udp(src_port, dst_port);
    let mut frame = Vec::with_capacity(builder.size(payload.len()));
    builder.write(&mut frame, payload).unwrap();
    frame
}

pub fn icmp_v4(src: [u8; 4], dst: [u8; 4]) -> Vec<u8> {
    let builder = PacketBuilder::ethernet2(SRC_MAC, DST_MAC)
        .ipv4(src, dst, 64)
        .icmpv4_echo_request(7, 1);
    let mut frame = Vec::with_capacity(builder.size(4));
    builder.write(&mut frame, b"ping").unwrap();
    frame
}

pub fn tcp_v6(src_port: u16, dst_port: u16) -> Vec<u8> {
    let builder = PacketBuilder::ethernet2(SRC_MAC, DST_MAC)
        .ipv6(v6(1), v6(2), 64)
        .tcp(src_port, dst_port, 1, 65535);
    let mut frame = Vec::with_capacity(builder.size(0));
    builder.write(&mut frame, &[]).unwrap();
    frame
}

pub fn udp_v6(src_port: u16, dst_port: u16, payload: &[u8]) -> Vec<u8> {
    let builder = PacketBuilder::ethernet2(SRC_MAC, DST_MAC)
        .ipv6(v6(1), v6(2), 64)
        .udp(src_port, dst_port);
    let mut frame = Vec::with_capacity(builder.size(payload.len()));
    builder.write(&mut frame, payload).unwrap();
    frame
}

/// `2001:db8::<n>`
pub fn v6(n: u8) -> [u8; 16] {
    let mut addr = [0u8; 16];
    addr[0] = 0x20;
    addr[1] = 0x01;
    addr[2] = 0x0d;
    addr[3] = 0xb8;
    addr[15] = n;
    addr
}

/// IPv6 frame with a hop-by-hop header in front of an 8-byte UDP header.
pub fn ipv6_with_hop_by_hop_udp(src_port: u16, dst_port: u16) -> Vec<u8> {
    let mut ip = Vec::with_capacity(40 + 8 + 8);
    ip.extend_from_slice(&[0x60, 0, 0, 0]);
    ip.extend_from_slice(&16u16.to_be_bytes());
    ip.push(0); // next header: hop-by-hop
    ip.push(64);
    ip.extend_from_slice(&v6(1));
    ip.extend_from_slice(&v6(2));
    // hop-by-hop: next = UDP, length 0 (8 bytes), PadN
    ip.extend_from_slice(&[17, 0, 1, 4, 0, 0, 0, 0]);
    ip.extend_from_slice(&src_port.to_be_bytes());
    ip.extend_from_slice(&dst_port.to_be_bytes());
    ip.extend_from_slice(&8u16.to_be_bytes());
    ip.extend_from_slice(&[0, 0]);
    ethernet(0x86dd, &ip)
}

pub fn ethernet(ether_type: u16, payload: &[u8]) -> Vec<u8> {
    let mut frame = Vec::with_capacity(14 + payload.len());
    frame.extend_from_slice(&DST_MAC);
    frame.extend_from_slice(&SRC_MAC);
    frame.extend_from_slice(&ether_type.to_be_bytes());
    frame.extend_from_slice(payload);
    frame
}

/// Ethernet ARP request from `sender` asking for `target`.
pub fn arp_request(sender: [u8; 4], target: [u8; 4]) -> Vec<u8> {
    let mut arp = Vec::with_capacity(28);
    arp.extend_from_slice(&[0x00, 0x01, 0x08, 0x00, 6, 4, 0x00, 0x01]);
    arp.extend_from_slice(&SRC_MAC);
    arp.extend_from_slice(&sender);
    arp.extend_from_slice(&[0u8; 6]);
    arp.extend_from_slice(&target);
    ethernet(0x0806, &arp)
}

/// Insert an 802.1Q tag after the Ethernet addresses.
pub fn with_vlan(frame: &[u8], vlan_id: u16) -> Vec<u8> {
    let mut tagged = Vec::with_capacity(frame.len() + 4);
    tagged.extend_from_slice(&frame[..12]);
    tagged.extend_from_slice(&0x8100u16.to_be_bytes());
    tagged.extend_from_slice(&vlan_id.to_be_bytes());
    tagged.extend_from_slice(&frame[12..]);
    tagged
}

/// Linux cooked capture header in front of an IP packet.
pub fn linux_sll(ip_packet: &[u8]) -> Vec<u8> {
    let mut frame = Vec::with_capacity(16 + ip_packet.len());
    frame.extend_from_slice(&[0, 0, 0, 1, 0, 6]);
    frame.extend_from_slice(&SRC_MAC);
    frame.extend_from_slice(&[0, 0]);
    frame.extend_from_slice(&0x0800u16.to_be_bytes());
    frame.extend_from_slice(ip_packet);
    frame
}

/// Standard query for an A record.
pub fn dns_query(transaction_id: u16, name: &str) -> Vec<u8> {
    let mut message = Vec::with_capacity(12 + name.len() + 6);
    message.extend_from_slice(&transaction_id.to_be_bytes());
    message.extend_from_slice(&[0x01, 0x00]); // RD
    message.extend_from_slice(&[0x00, 0x01, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00]);
    for label in name.split('.') {
        message.push(label.len() as u8);
        message.extend_from_slice(label.as_bytes());
    }
    message.push(0);
    message.extend_from_slice(&[0x00, 0x01, 0x00, 0x01]);
    message
}
