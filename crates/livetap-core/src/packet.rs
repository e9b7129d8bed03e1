use pcap_parser::Linktype;

use crate::source::PacketEvent;
use crate::summary::{PacketSummary, summarize};

/// A packet captured from a live interface.
///
/// In summary-only captures `data` is empty and the summary computed at
/// decode time is kept instead.
#[derive(Debug, Clone)]
pub struct Packet {
    /// 1-based position in the capture stream that produced it.
    pub number: u64,
    /// Capture time in seconds since the Unix epoch.
    pub ts: Option<f64>,
    pub linktype: Linktype,
    /// Index of the capturing interface in parameter order.
    pub interface_id: u32,
    /// Original length on the wire.
    pub wire_len: u32,
    pub data: Vec<u8>,
    summary: Option<PacketSummary>,
}

impl Packet {
    pub(crate) fn from_event(number: u64, event: PacketEvent, only_summary: bool) -> Self {
        let PacketEvent {
            ts,
            linktype,
            interface_id,
            wire_len,
            data,
        } = event;
        if only_summary {
            let summary = summarize(ts, linktype, interface_id, wire_len, &data);
            Self {
                number,
                ts,
                linktype,
                interface_id,
                wire_len,
                data: Vec::new(),
                summary: Some(summary),
            }
        } else {
            Self {
                number,
                ts,
                linktype,
                interface_id,
                wire_len,
                data,
                summary: None,
            }
        }
    }

    /// Whether packet bytes were dropped at decode time.
    pub fn is_summary_only(&self) -> bool {
        self.summary.is_some()
    }

    /// Describe the packet; computed from the bytes unless already cached.
    pub fn summary(&self) -> PacketSummary {
        match &self.summary {
            Some(summary) => summary.clone(),
            None => summarize(
                self.ts,
                self.linktype,
                self.interface_id,
                self.wire_len,
                &self.data,
            ),
        }
    }
}
