use std::net::IpAddr;

use etherparse::{LinkSlice, NetSlice, SlicedPacket, TransportSlice};
use pcap_parser::Linktype;
use serde::{Deserialize, Serialize};
use time::{OffsetDateTime, format_description::well_known::Rfc3339};

const ETHERTYPE_ARP: u16 = 0x0806;

/// One-line description of a captured packet.
///
/// # Examples
/// ```
/// use livetap_core::PacketSummary;
///
/// let summary = PacketSummary {
///     time: None,
///     interface_id: 0,
///     protocol: "udp".to_string(),
///     src: Some("10.0.0.1:53".to_string()),
///     dst: Some("10.0.0.2:5353".to_string()),
///     length: 60,
/// };
/// assert_eq!(summary.protocol, "udp");
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PacketSummary {
    /// RFC3339 capture time, when the capture format carries one.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub time: Option<String>,
    /// Index of the capturing interface in parameter order.
    pub interface_id: u32,
    /// Highest recognised protocol (`tcp`, `udp`, `icmp`, `icmpv6`, `ipv4`,
    /// `ipv6`, `arp` or `other`).
    pub protocol: String,
    /// Source endpoint (`ip` or `ip:port`).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub src: Option<String>,
    /// Destination endpoint (`ip` or `ip:port`).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub dst: Option<String>,
    /// Original length on the wire in bytes.
    pub length: u32,
}

pub(crate) fn summarize(
    ts: Option<f64>,
    linktype: Linktype,
    interface_id: u32,
    wire_len: u32,
    data: &[u8],
) -> PacketSummary {
    let (protocol, src, dst) = classify(linktype, data);
    PacketSummary {
        time: ts_to_rfc3339(ts),
        interface_id,
        protocol: protocol.to_string(),
        src,
        dst,
        length: wire_len,
    }
}

// Exhaustive on the etherparse version in use; the fallbacks cover variants
// added later.
#[allow(unreachable_patterns)]
fn classify(linktype: Linktype, data: &[u8]) -> (&'static str, Option<String>, Option<String>) {
    let sliced = match linktype {
        Linktype::ETHERNET => SlicedPacket::from_ethernet(data).ok(),
        Linktype::RAW | Linktype::IPV4 | Linktype::IPV6 => SlicedPacket::from_ip(data).ok(),
        _ => None,
    };
    let Some(sliced) = sliced else {
        return ("other", None, None);
    };

    let (src_ip, dst_ip, net_proto) = match &sliced.net {
        Some(NetSlice::Ipv4(ipv4)) => (
            IpAddr::V4(ipv4.header().source_addr()),
            IpAddr::V4(ipv4.header().destination_addr()),
            "ipv4",
        ),
        Some(NetSlice::Ipv6(ipv6)) => (
            IpAddr::V6(ipv6.header().source_addr()),
            IpAddr::V6(ipv6.header().destination_addr()),
            "ipv6",
        ),
        _ => return (link_protocol(&sliced), None, None),
    };

    let (proto, ports) = match &sliced.transport {
        Some(TransportSlice::Tcp(tcp)) => ("tcp", Some((tcp.source_port(), tcp.destination_port()))),
        Some(TransportSlice::Udp(udp)) => ("udp", Some((udp.source_port(), udp.destination_port()))),
        Some(TransportSlice::Icmpv4(_)) => ("icmp", None),
        Some(TransportSlice::Icmpv6(_)) => ("icmpv6", None),
        _ => (net_proto, None),
    };

    let (src, dst) = match ports {
        Some((src_port, dst_port)) => (
            format_endpoint(src_ip, src_port),
            format_endpoint(dst_ip, dst_port),
        ),
        None => (src_ip.to_string(), dst_ip.to_string()),
    };
    (proto, Some(src), Some(dst))
}

fn link_protocol(sliced: &SlicedPacket<'_>) -> &'static str {
    match &sliced.link {
        Some(LinkSlice::Ethernet2(eth)) if eth.ether_type().0 == ETHERTYPE_ARP => "arp",
        _ => "other",
    }
}

fn format_endpoint(ip: IpAddr, port: u16) -> String {
    match ip {
        IpAddr::V4(addr) => format!("{}:{}", addr, port),
        IpAddr::V6(addr) => format!("[{}]:{}", addr, port),
    }
}

pub(crate) fn ts_to_rfc3339(ts: Option<f64>) -> Option<String> {
    let ts = ts?;
    let nanos = (ts * 1_000_000_000.0) as i128;
    OffsetDateTime::from_unix_timestamp_nanos(nanos)
        .ok()
        .and_then(|dt| dt.format(&Rfc3339).ok())
}
