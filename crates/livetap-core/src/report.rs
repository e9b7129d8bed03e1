use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::driver::{SniffOutcome, StopReason};
use crate::packet::Packet;
use crate::params::capture_parameters;
use crate::session::CaptureSession;
use crate::summary::{PacketSummary, ts_to_rfc3339};

/// Current report schema version.
pub const REPORT_VERSION: u32 = 1;
/// Default timestamp used when no capture time is available.
pub const DEFAULT_GENERATED_AT: &str = "1970-01-01T00:00:00Z";

/// Capture report with deterministic ordering.
///
/// `generated_at` is derived from the captured packets, not from the wall
/// clock, so identical captures produce identical reports.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Report {
    /// Report schema version (not the binary version).
    pub report_version: u32,
    /// Tool identification metadata.
    pub tool: ToolInfo,
    /// RFC3339 timestamp of the last captured packet.
    pub generated_at: String,
    /// How the capture was configured.
    pub capture: CaptureInfo,
    /// Why the capture stopped, when it was a blocking run.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub stop: Option<StopReason>,
    pub capture_summary: CaptureSummary,
    /// Per-protocol counters sorted by protocol name.
    pub protocols: Vec<ProtocolSummary>,
    /// Packet summaries in capture order.
    pub packets: Vec<PacketSummary>,
}

/// Tool metadata embedded in reports.
///
/// # Examples
/// ```
/// use livetap_core::ToolInfo;
///
/// let tool = ToolInfo::current();
/// assert_eq!(tool.name, "livetap");
/// ```
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolInfo {
    pub name: String,
    pub version: String,
}

impl ToolInfo {
    pub fn current() -> Self {
        Self {
            name: "livetap".to_string(),
            version: env!("CARGO_PKG_VERSION").to_string(),
        }
    }
}

/// Capture configuration embedded in reports.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CaptureInfo {
    pub interfaces: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub bpf_filter: Option<String>,
    pub only_summaries: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub packet_count: Option<usize>,
    /// Parameters the capture process was started with.
    pub parameters: Vec<String>,
}

/// Basic capture summary (timestamps may be absent).
///
/// # Examples
/// ```
/// use livetap_core::CaptureSummary;
///
/// let summary = CaptureSummary {
///     packets_total: 10,
///     bytes_total: 600,
///     time_start: None,
///     time_end: None,
/// };
/// assert_eq!(summary.packets_total, 10);
/// ```
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CaptureSummary {
    pub packets_total: u64,
    /// Sum of on-the-wire lengths.
    pub bytes_total: u64,
    /// RFC3339 timestamp of the first packet (if known).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub time_start: Option<String>,
    /// RFC3339 timestamp of the last packet (if known).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub time_end: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProtocolSummary {
    pub protocol: String,
    pub packets: u64,
    pub bytes: u64,
}

/// Build a report over the packets currently held by `session`.
pub fn build_report(
    session: &CaptureSession,
    packet_count: Option<usize>,
    outcome: Option<SniffOutcome>,
) -> Report {
    let config = session.config();
    let mut report = Report::from_packets(session.packets(), outcome.map(|o| o.reason));
    report.capture = CaptureInfo {
        interfaces: config.interfaces.clone(),
        bpf_filter: config.bpf_filter.clone(),
        only_summaries: config.only_summaries,
        packet_count,
        parameters: capture_parameters(config, packet_count),
    };
    report
}

impl Report {
    /// Report over `packets` with empty capture metadata.
    ///
    /// # Examples
    /// ```
    /// use livetap_core::{REPORT_VERSION, Report};
    ///
    /// let report = Report::from_packets(&[], None);
    /// assert_eq!(report.report_version, REPORT_VERSION);
    /// assert!(report.packets.is_empty());
    /// ```
    pub fn from_packets(packets: &[Packet], stop: Option<StopReason>) -> Self {
        let summaries: Vec<PacketSummary> = packets.iter().map(Packet::summary).collect();

        let mut protocols: BTreeMap<String, (u64, u64)> = BTreeMap::new();
        for summary in &summaries {
            let entry = protocols.entry(summary.protocol.clone()).or_default();
            entry.0 += 1;
            entry.1 += u64::from(summary.length);
        }

        let first_ts = packets.iter().find_map(|packet| packet.ts);
        let last_ts = packets.iter().rev().find_map(|packet| packet.ts);
        let capture_summary = CaptureSummary {
            packets_total: summaries.len() as u64,
            bytes_total: summaries.iter().map(|s| u64::from(s.length)).sum(),
            time_start: ts_to_rfc3339(first_ts),
            time_end: ts_to_rfc3339(last_ts),
        };
        let generated_at = capture_summary
            .time_end
            .clone()
            .or_else(|| capture_summary.time_start.clone())
            .unwrap_or_else(|| DEFAULT_GENERATED_AT.to_string());

        Self {
            report_version: REPORT_VERSION,
            tool: ToolInfo::current(),
            generated_at,
            capture: CaptureInfo {
                interfaces: Vec::new(),
                bpf_filter: None,
                only_summaries: false,
                packet_count: None,
                parameters: Vec::new(),
            },
            stop,
            capture_summary,
            protocols: protocols
                .into_iter()
                .map(|(protocol, (packets, bytes))| ProtocolSummary {
                    protocol,
                    packets,
                    bytes,
                })
                .collect(),
            packets: summaries,
        }
    }
}
