use std::io::{Chain, Cursor, Read};

use pcap_parser::{
    Block, LegacyPcapReader, Linktype, PcapBlockOwned, PcapNGReader, traits::PcapReaderIterator,
};

use crate::source::{PacketEvent, PacketSource, SourceError};

use super::error::PcapSourceError;
use super::layout;
use super::reader::{
    is_pcapng_magic, linktype_for_interface, pcapng_ts_to_seconds, read_header, read_magic,
};

type HeaderChain<R> = Chain<Cursor<Vec<u8>>, R>;

/// Packet source over a non-seekable PCAP or PCAPNG byte stream.
///
/// Nothing is read until the first call to `next_packet`, so building a
/// source over a pipe never blocks.
pub struct PcapStreamSource<R: Read> {
    state: StreamState<R>,
    header_seen: bool,
}

enum StreamState<R: Read> {
    Pending(R),
    Legacy {
        reader: LegacyPcapReader<HeaderChain<R>>,
        linktype: Option<Linktype>,
    },
    Ng {
        reader: PcapNGReader<HeaderChain<R>>,
        linktypes: Vec<Linktype>,
    },
    Exhausted,
}

impl<R: Read> PcapStreamSource<R> {
    pub fn new(reader: R) -> Self {
        Self {
            state: StreamState::Pending(reader),
            header_seen: false,
        }
    }

    /// Whether the stream started with a capture header. `false` until then,
    /// and for a stream that ended before writing anything.
    pub fn header_seen(&self) -> bool {
        self.header_seen
    }
}

impl<R: Read> PacketSource for PcapStreamSource<R> {
    fn next_packet(&mut self) -> Result<Option<PacketEvent>, SourceError> {
        if matches!(self.state, StreamState::Pending(_)) {
            let pending = std::mem::replace(&mut self.state, StreamState::Exhausted);
            if let StreamState::Pending(reader) = pending {
                self.state = create_reader(reader).map_err(SourceError::from)?;
                self.header_seen = !matches!(self.state, StreamState::Exhausted);
            }
        }
        let result = next_packet(&mut self.state).map_err(SourceError::from);
        if !matches!(result, Ok(Some(_))) {
            self.state = StreamState::Exhausted;
        }
        result
    }
}

fn create_reader<R: Read>(mut input: R) -> Result<StreamState<R>, PcapSourceError> {
    let Some(magic) = read_magic(&mut input)? else {
        return Ok(StreamState::Exhausted);
    };
    let header = read_header(&mut input, magic)?;
    let chained = Cursor::new(header).chain(input);

    if is_pcapng_magic(&magic) {
        let reader = PcapNGReader::new(layout::PCAP_READER_BUFFER_SIZE, chained).map_err(|e| {
            PcapSourceError::Pcap {
                context: "pcapng reader init",
                message: e.to_string(),
            }
        })?;
        Ok(StreamState::Ng {
            reader,
            linktypes: Vec::new(),
        })
    } else {
        let reader =
            LegacyPcapReader::new(layout::PCAP_READER_BUFFER_SIZE, chained).map_err(|e| {
                PcapSourceError::Pcap {
                    context: "pcap reader init",
                    message: e.to_string(),
                }
            })?;
        Ok(StreamState::Legacy {
            reader,
            linktype: None,
        })
    }
}

fn next_packet<R: Read>(state: &mut StreamState<R>) -> Result<Option<PacketEvent>, PcapSourceError> {
    loop {
        match state {
            StreamState::Pending(_) | StreamState::Exhausted => return Ok(None),
            StreamState::Legacy { reader, linktype } => match reader.next() {
                Ok((offset, block)) => {
                    let event = match block {
                        PcapBlockOwned::LegacyHeader(header) => {
                            *linktype = Some(header.network);
                            None
                        }
                        PcapBlockOwned::Legacy(packet) => {
                            let ts = packet.ts_sec as f64 + (packet.ts_usec as f64 * 1e-6);
                            Some(PacketEvent {
                                ts: Some(ts),
                                linktype: linktype.unwrap_or(Linktype::ETHERNET),
                                interface_id: 0,
                                wire_len: packet.origlen,
                                data: packet.data.to_vec(),
                            })
                        }
                        _ => None,
                    };
                    reader.consume(offset);
                    if event.is_some() {
                        return Ok(event);
                    }
                }
                Err(pcap_parser::PcapError::Eof) => return Ok(None),
                Err(pcap_parser::PcapError::Incomplete(_)) => {
                    reader.refill().map_err(|e| PcapSourceError::Pcap {
                        context: "pcap reader refill",
                        message: e.to_string(),
                    })?;
                }
                Err(e) => {
                    return Err(PcapSourceError::Pcap {
                        context: "pcap reader next",
                        message: e.to_string(),
                    });
                }
            },
            StreamState::Ng { reader, linktypes } => match reader.next() {
                Ok((offset, block)) => {
                    let event = match block {
                        PcapBlockOwned::NG(Block::SectionHeader(_)) => {
                            // A new section restarts interface numbering.
                            linktypes.clear();
                            None
                        }
                        PcapBlockOwned::NG(Block::InterfaceDescription(intf)) => {
                            linktypes.push(intf.linktype);
                            None
                        }
                        PcapBlockOwned::NG(Block::EnhancedPacket(packet)) => {
                            Some(PacketEvent {
                                ts: Some(pcapng_ts_to_seconds(packet.ts_high, packet.ts_low)),
                                linktype: linktype_for_interface(linktypes, packet.if_id),
                                interface_id: packet.if_id,
                                wire_len: packet.origlen,
                                data: packet.data.to_vec(),
                            })
                        }
                        PcapBlockOwned::NG(Block::SimplePacket(packet)) => Some(PacketEvent {
                            ts: None,
                            linktype: linktype_for_interface(linktypes, 0),
                            interface_id: 0,
                            wire_len: packet.origlen,
                            data: packet.data.to_vec(),
                        }),
                        _ => None,
                    };
                    reader.consume(offset);
                    if event.is_some() {
                        return Ok(event);
                    }
                }
                Err(pcap_parser::PcapError::Eof) => return Ok(None),
                Err(pcap_parser::PcapError::Incomplete(_)) => {
                    reader.refill().map_err(|e| PcapSourceError::Pcap {
                        context: "pcapng reader refill",
                        message: e.to_string(),
                    })?;
                }
                Err(e) => {
                    return Err(PcapSourceError::Pcap {
                        context: "pcapng reader next",
                        message: e.to_string(),
                    });
                }
            },
        }
    }
}
