//! Frames from a pcap or pcapng recording.

use super::{FrameSource, Next, Observed};
use crate::core::types::link_type;
use crate::core::{PktwatchError, Result};
use chrono::{DateTime, Utc};
use pcap_parser::traits::PcapReaderIterator;
use pcap_parser::{LegacyPcapReader, PcapBlockOwned, PcapError, PcapNGReader};
use std::fs::File;
use std::io::{Read, Seek};
use std::path::{Path, PathBuf};

const BUFFER_SIZE: usize = 65536;

/// Reject names that could leave the recordings directory, then resolve.
pub fn resolve(dir: &Path, name: &str) -> Result<PathBuf> {
    let name = name.trim();
    if name.is_empty() {
        return Err(PktwatchError::invalid_request("file name is empty"));
    }
    if name.contains(['/', '\\']) || name.contains("..") {
        return Err(PktwatchError::invalid_request(format!(
            "file name '{name}' must not contain path separators or '..'"
        )));
    }

    let path = dir.join(name);
    if !path.is_file() {
        return Err(PktwatchError::recording(format!(
            "'{}' not found in {}",
            name,
            dir.display()
        )));
    }
    Ok(path)
}

enum Reader {
    Legacy(LegacyPcapReader<File>),
    Ng(PcapNGReader<File>),
}

/// Link type and clock of one capture interface.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct Interface {
    link_type: u16,
    ticks_per_second: u64,
}

const MICROS: u64 = 1_000_000;
const NANOS: u64 = 1_000_000_000;

impl Default for Interface {
    fn default() -> Self {
        Self {
            link_type: link_type::ETHERNET,
            ticks_per_second: MICROS,
        }
    }
}

impl Interface {
    /// Split a tick count into a UTC timestamp.
    fn timestamp(&self, ticks: u64) -> DateTime<Utc> {
        let secs = ticks / self.ticks_per_second;
        let nanos = (ticks % self.ticks_per_second) as u128 * NANOS as u128 / self.ticks_per_second as u128;
        DateTime::from_timestamp(secs as i64, nanos as u32).unwrap_or_default()
    }
}

/// Ticks per second for a pcapng `if_tsresol` value: a power of ten, or of
/// two when the high bit is set.
fn ticks_per_second(tsresol: u8) -> Option<u64> {
    let exponent = u32::from(tsresol & 0x7f);
    if tsresol & 0x80 == 0 {
        10u64.checked_pow(exponent)
    } else {
        1u64.checked_shl(exponent)
    }
    .filter(|ticks| *ticks > 0)
}

/// Sequential reader over a recording.
pub struct Recording {
    reader: Reader,
    path: PathBuf,
    /// Interfaces of the current section, by pcapng interface id. A classic
    /// pcap file has exactly one.
    interfaces: Vec<Interface>,
    frames: u64,
}

impl std::fmt::Debug for Recording {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Recording")
            .field("path", &self.path)
            .field("interfaces", &self.interfaces)
            .field("frames", &self.frames)
            .finish()
    }
}

impl Recording {
    /// Open `path`, telling pcap from pcapng by the magic number.
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        let mut file = File::open(&path)
            .map_err(|e| PktwatchError::recording(format!("cannot open {}: {}", path.display(), e)))?;

        let mut magic = [0u8; 4];
        file.read_exact(&mut magic)
            .map_err(|_| PktwatchError::recording(format!("{} is too short to be a recording", path.display())))?;
        file.rewind()?;

        let reader = match magic {
            // microsecond and nanosecond pcap, either byte order
            [0xd4, 0xc3, 0xb2, 0xa1] | [0xa1, 0xb2, 0xc3, 0xd4] | [0x4d, 0x3c, 0xb2, 0xa1] | [0xa1, 0xb2, 0x3c, 0x4d] => {
                LegacyPcapReader::new(BUFFER_SIZE, file)
                    .map(Reader::Legacy)
                    .map_err(|e| PktwatchError::recording(format!("bad pcap header: {e}")))?
            },
            [0x0a, 0x0d, 0x0d, 0x0a] => PcapNGReader::new(BUFFER_SIZE, file)
                .map(Reader::Ng)
                .map_err(|e| PktwatchError::recording(format!("bad pcapng header: {e}")))?,
            other => {
                return Err(PktwatchError::recording(format!(
                    "{}: unknown magic number {:02x?}",
                    path.display(),
                    other
                )))
            },
        };

        tracing::debug!("Opened recording {}", path.display());
        Ok(Self {
            reader,
            path,
            interfaces: Vec::new(),
            frames: 0,
        })
    }

    /// Frames read so far.
    pub fn frames(&self) -> u64 {
        self.frames
    }

    /// Next frame, `None` at end of file.
    pub fn next_frame(&mut self) -> Result<Option<Observed>> {
        loop {
            let step = match &mut self.reader {
                Reader::Legacy(reader) => next_block(reader, &mut self.interfaces),
                Reader::Ng(reader) => next_block(reader, &mut self.interfaces),
            };

            match step? {
                Block::Frame(frame) => {
                    self.frames += 1;
                    return Ok(Some(frame));
                },
                Block::Skipped => continue,
                Block::End => return Ok(None),
            }
        }
    }
}

enum Block {
    Frame(Observed),
    Skipped,
    End,
}

fn interface(interfaces: &[Interface], id: u32) -> Result<Interface> {
    interfaces
        .get(id as usize)
        .copied()
        .ok_or_else(|| PktwatchError::recording(format!("packet refers to undeclared interface {id}")))
}

fn next_block<R: PcapReaderIterator>(reader: &mut R, interfaces: &mut Vec<Interface>) -> Result<Block> {
    match reader.next() {
        Ok((offset, block)) => {
            let result = match block {
                PcapBlockOwned::LegacyHeader(header) => {
                    interfaces.clear();
                    interfaces.push(Interface {
                        link_type: header.network.0 as u16,
                        ticks_per_second: if header.is_nanosecond_precision() { NANOS } else { MICROS },
                    });
                    Ok(Block::Skipped)
                },
                PcapBlockOwned::Legacy(packet) => interface(interfaces, 0).map(|iface| {
                    let fraction = u64::from(packet.ts_usec).min(iface.ticks_per_second - 1);
                    let ticks = packet.ts_sec as u64 * iface.ticks_per_second + fraction;
                    Block::Frame(Observed {
                        timestamp: iface.timestamp(ticks),
                        length: packet.origlen,
                        link_type: iface.link_type,
                        data: packet.data.to_vec(),
                    })
                }),
                PcapBlockOwned::NG(ng) => {
                    use pcap_parser::pcapng::Block as NgBlock;
                    match ng {
                        NgBlock::SectionHeader(_) => {
                            // interface ids restart with every section
                            interfaces.clear();
                            Ok(Block::Skipped)
                        },
                        NgBlock::InterfaceDescription(idb) => {
                            let ticks_per_second = ticks_per_second(idb.if_tsresol).unwrap_or_else(|| {
                                tracing::warn!("Unusable if_tsresol {}, assuming microseconds", idb.if_tsresol);
                                MICROS
                            });
                            interfaces.push(Interface {
                                link_type: idb.linktype.0 as u16,
                                ticks_per_second,
                            });
                            Ok(Block::Skipped)
                        },
                        NgBlock::EnhancedPacket(epb) => interface(interfaces, epb.if_id).map(|iface| {
                            let ticks = ((epb.ts_high as u64) << 32) | epb.ts_low as u64;
                            Block::Frame(Observed {
                                timestamp: iface.timestamp(ticks),
                                length: epb.origlen,
                                link_type: iface.link_type,
                                data: epb.data.to_vec(),
                            })
                        }),
                        // simple packets belong to the first interface and carry no time
                        NgBlock::SimplePacket(spb) => interface(interfaces, 0).map(|iface| {
                            Block::Frame(Observed {
                                timestamp: Utc::now(),
                                length: spb.origlen,
                                link_type: iface.link_type,
                                data: spb.data.to_vec(),
                            })
                        }),
                        _ => Ok(Block::Skipped),
                    }
                },
            };
            reader.consume(offset);
            result
        },
        Err(PcapError::Eof) => Ok(Block::End),
        Err(PcapError::Incomplete(_)) => {
            reader
                .refill()
                .map_err(|e| PktwatchError::recording(format!("refill error: {e}")))?;
            Ok(Block::Skipped)
        },
        Err(e) => Err(PktwatchError::recording(format!("parse error: {e}"))),
    }
}

impl FrameSource for Recording {
    fn next(&mut self) -> Result<Next> {
        Ok(match self.next_frame()? {
            Some(frame) => Next::Frame(frame),
            None => Next::End,
        })
    }

    fn describe(&self) -> String {
        format!("recording {}", self.path.display())
    }
}

/// Writes classic pcap files; used by tests.
#[cfg(test)]
pub(crate) fn write_pcap(path: &Path, link: u16, frames: &[(u32, Vec<u8>)]) {
    let mut out = Vec::new();
    out.extend_from_slice(&0xa1b2c3d4u32.to_le_bytes());
    out.extend_from_slice(&2u16.to_le_bytes());
    out.extend_from_slice(&4u16.to_le_bytes());
    out.extend_from_slice(&0i32.to_le_bytes());
    out.extend_from_slice(&0u32.to_le_bytes());
    out.extend_from_slice(&65535u32.to_le_bytes());
    out.extend_from_slice(&(link as u32).to_le_bytes());
    for (secs, data) in frames {
        out.extend_from_slice(&secs.to_le_bytes());
        out.extend_from_slice(&250_000u32.to_le_bytes());
        out.extend_from_slice(&(data.len() as u32).to_le_bytes());
        out.extend_from_slice(&(data.len() as u32).to_le_bytes());
        out.extend_from_slice(data);
    }
    std::fs::write(path, out).unwrap();
}

/// Writes a single-section pcapng file; used by tests.
///
/// `interfaces` are `(link type, if_tsresol)` pairs, `packets` are
/// `(interface id, timestamp ticks, bytes)`.
#[cfg(test)]
pub(crate) fn write_pcapng(path: &Path, interfaces: &[(u16, Option<u8>)], packets: &[(u32, u64, Vec<u8>)]) {
    fn block(out: &mut Vec<u8>, kind: u32, body: &[u8]) {
        let total = (12 + body.len()) as u32;
        out.extend_from_slice(&kind.to_le_bytes());
        out.extend_from_slice(&total.to_le_bytes());
        out.extend_from_slice(body);
        out.extend_from_slice(&total.to_le_bytes());
    }

    let mut out = Vec::new();
    let mut shb = Vec::new();
    shb.extend_from_slice(&0x1a2b3c4du32.to_le_bytes());
    shb.extend_from_slice(&1u16.to_le_bytes());
    shb.extend_from_slice(&0u16.to_le_bytes());
    shb.extend_from_slice(&(-1i64).to_le_bytes());
    block(&mut out, 0x0a0d0d0a, &shb);

    for (link, tsresol) in interfaces {
        let mut idb = Vec::new();
        idb.extend_from_slice(&link.to_le_bytes());
        idb.extend_from_slice(&0u16.to_le_bytes());
        idb.extend_from_slice(&65535u32.to_le_bytes());
        if let Some(tsresol) = tsresol {
            idb.extend_from_slice(&9u16.to_le_bytes());
            idb.extend_from_slice(&1u16.to_le_bytes());
            idb.extend_from_slice(&[*tsresol, 0, 0, 0]);
            idb.extend_from_slice(&[0, 0, 0, 0]);
        }
        block(&mut out, 1, &idb);
    }

    for (if_id, ticks, data) in packets {
        let mut epb = Vec::new();
        epb.extend_from_slice(&if_id.to_le_bytes());
        epb.extend_from_slice(&((ticks >> 32) as u32).to_le_bytes());
        epb.extend_from_slice(&(*ticks as u32).to_le_bytes());
        epb.extend_from_slice(&(data.len() as u32).to_le_bytes());
        epb.extend_from_slice(&(data.len() as u32).to_le_bytes());
        epb.extend_from_slice(data);
        epb.resize(epb.len() + (4 - data.len() % 4) % 4, 0);
        block(&mut out, 6, &epb);
    }
    std::fs::write(path, out).unwrap();
}
