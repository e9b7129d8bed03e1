use std::io::Read;

use crate::error::CaptureError;
use crate::packet::Packet;
use crate::source::{PacketSource, PcapStreamSource};

/// Lazy decoder from a capture byte stream to `Packet` records.
///
/// The packet-count limit is enforced here: once it is reached no further
/// bytes are read from the stream.
///
/// # Examples
/// ```
/// use std::io::Cursor;
///
/// use livetap_core::PacketDecoder;
///
/// let mut decoder = PacketDecoder::new(Cursor::new(Vec::new()), Some(5), false);
/// assert!(decoder.next_packet()?.is_none());
/// # Ok::<(), livetap_core::CaptureError>(())
/// ```
pub struct PacketDecoder<R: Read> {
    source: PcapStreamSource<R>,
    remaining: Option<usize>,
    only_summaries: bool,
    decoded: u64,
    done: bool,
}

impl<R: Read> PacketDecoder<R> {
    pub fn new(reader: R, packet_count: Option<usize>, only_summaries: bool) -> Self {
        Self {
            source: PcapStreamSource::new(reader),
            remaining: packet_count,
            only_summaries,
            decoded: 0,
            done: false,
        }
    }

    /// Number of packets produced so far.
    pub fn decoded(&self) -> u64 {
        self.decoded
    }

    /// Whether the packet-count limit has been reached.
    pub fn limit_reached(&self) -> bool {
        self.remaining == Some(0)
    }

    /// Whether the stream carried a capture header, even one with no
    /// packets after it.
    pub fn header_seen(&self) -> bool {
        self.source.header_seen()
    }

    /// Decode the next packet, or `None` once the limit or end of stream is
    /// reached. After an error the decoder yields nothing further.
    pub fn next_packet(&mut self) -> Result<Option<Packet>, CaptureError> {
        if self.done || self.remaining == Some(0) {
            return Ok(None);
        }
        let event = match self.source.next_packet() {
            Ok(Some(event)) => event,
            Ok(None) => {
                self.done = true;
                return Ok(None);
            }
            Err(err) => {
                self.done = true;
                return Err(err.into());
            }
        };
        if let Some(remaining) = self.remaining.as_mut() {
            *remaining -= 1;
        }
        self.decoded += 1;
        Ok(Some(Packet::from_event(
            self.decoded,
            event,
            self.only_summaries,
        )))
    }
}

impl<R: Read> Iterator for PacketDecoder<R> {
    type Item = Result<Packet, CaptureError>;

    fn next(&mut self) -> Option<Self::Item> {
        self.next_packet().transpose()
    }
}
