//! Common test utilities and fixtures.

#![allow(dead_code)]

use chrono::{TimeZone, Utc};
use etherparse::PacketBuilder;
use pktwatch::core::{Origin, ParsedRecord, Protocol};
use pktwatch::storage::{ensure_schema, ConnectionPool};
use std::path::Path;
use std::time::Duration;
use tempfile::TempDir;

const SRC_MAC: [u8; 6] = [0x02, 0, 0, 0, 0, 0x0a];
const DST_MAC: [u8; 6] = [0x02, 0, 0, 0, 0, 0x0b];

/// Builder for Ethernet frames with sensible defaults.
pub struct FrameBuilder {
    src: [u8; 4],
    dst: [u8; 4],
    src_port: u16,
    dst_port: u16,
    payload: Vec<u8>,
}

impl FrameBuilder {
    pub fn new() -> Self {
        Self {
            src: [192, 168, 1, 10],
            dst: [93, 184, 216, 34],
            src_port: 51000,
            dst_port: 80,
            payload: Vec::new(),
        }
    }

    pub fn between(mut self, src: [u8; 4], dst: [u8; 4]) -> Self {
        self.src = src;
        self.dst = dst;
        self
    }

    pub fn ports(mut self, src_port: u16, dst_port: u16) -> Self {
        self.src_port = src_port;
        self.dst_port = dst_port;
        self
    }

    pub fn payload(mut self, payload: &[u8]) -> Self {
        self.payload = payload.to_vec();
        self
    }

    pub fn tcp(self) -> Vec<u8> {
        let builder = PacketBuilder::ethernet2(SRC_MAC, DST_MAC)
            .ipv4(self.src, self.dst, 64)
            .tcp(self.src_port, self.dst_port, 1, 65535);
        let mut frame = Vec::with_capacity(builder.size(self.payload.len()));
        builder.write(&mut frame, &self.payload).unwrap();
        frame
    }

    pub fn udp(self) -> Vec<u8> {
        let builder = PacketBuilder::ethernet2(SRC_MAC, DST_MAC)
            .ipv4(self.src, self.dst, 64)
            .udp(self.src_port, self.dst_port);
        let mut frame = Vec::with_capacity(builder.size(self.payload.len()));
        builder.write(&mut frame, &self.payload).unwrap();
        frame
    }
}

/// Ethernet ARP request from `sender` asking for `target`.
pub fn arp_request(sender: [u8; 4], target: [u8; 4]) -> Vec<u8> {
    let mut frame = Vec::with_capacity(42);
    frame.extend_from_slice(&[0xff; 6]);
    frame.extend_from_slice(&SRC_MAC);
    frame.extend_from_slice(&0x0806u16.to_be_bytes());
    frame.extend_from_slice(&[0x00, 0x01, 0x08, 0x00, 6, 4, 0x00, 0x01]);
    frame.extend_from_slice(&SRC_MAC);
    frame.extend_from_slice(&sender);
    frame.extend_from_slice(&[0u8; 6]);
    frame.extend_from_slice(&target);
    frame
}

/// DNS query message for an A record.
pub fn dns_query(name: &str) -> Vec<u8> {
    let mut message = vec![0x12, 0x34, 0x01, 0x00, 0, 1, 0, 0, 0, 0, 0, 0];
    for label in name.split('.') {
        message.push(label.len() as u8);
        message.extend_from_slice(label.as_bytes());
    }
    message.extend_from_slice(&[0, 0, 1, 0, 1]);
    message
}

/// Write a microsecond pcap file with Ethernet framing.
pub fn write_pcap(path: &Path, frames: &[Vec<u8>]) {
    let mut out = Vec::new();
    out.extend_from_slice(&0xa1b2c3d4u32.to_le_bytes());
    out.extend_from_slice(&2u16.to_le_bytes());
    out.extend_from_slice(&4u16.to_le_bytes());
    out.extend_from_slice(&[0u8; 8]);
    out.extend_from_slice(&65535u32.to_le_bytes());
    out.extend_from_slice(&1u32.to_le_bytes());
    for (i, data) in frames.iter().enumerate() {
        out.extend_from_slice(&(1_709_294_400u32 + i as u32).to_le_bytes());
        out.extend_from_slice(&0u32.to_le_bytes());
        out.extend_from_slice(&(data.len() as u32).to_le_bytes());
        out.extend_from_slice(&(data.len() as u32).to_le_bytes());
        out.extend_from_slice(data);
    }
    std::fs::write(path, out).unwrap();
}

/// Pool over a fresh database with the schema in place.
pub async fn temp_store(dir: &TempDir) -> ConnectionPool {
    let pool = ConnectionPool::open(dir.path().join("pktwatch.db"), 2, Duration::from_secs(1)).unwrap();
    pool.run(|conn| ensure_schema(conn)).await.unwrap();
    pool
}

/// Record at `2024-03-01 12:00:<second>`.
pub fn record(protocol: Protocol, origin: Origin, second: u32) -> ParsedRecord {
    let timestamp = Utc.with_ymd_and_hms(2024, 3, 1, 12, 0, second).unwrap();
    ParsedRecord::new("10.0.0.1", "10.0.0.2", protocol, timestamp, origin)
}
