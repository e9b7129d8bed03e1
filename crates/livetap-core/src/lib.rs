//! livetap core library for driving live packet captures.
//!
//! A `CaptureSession` starts a capture tool (`tshark` by default) as a
//! subprocess, decodes the pcap/pcapng stream it writes to its stdout and
//! hands packets to the caller, either as a lazily consumed `PacketStream`
//! (`sniff_continuously`) or collected into the session by a blocking,
//! cancellable `sniff` run bounded by a packet count, a timeout and Ctrl-C.
//!
//! Invariants:
//! - A session has at most one capture process attached at a time.
//! - Every run ends with its process terminated and detached, whatever made
//!   it stop.
//! - Timeouts and interrupts are reported as stop reasons, not errors.
//!
//! The subprocess sits behind the `CaptureLauncher` trait so embedding
//! applications and tests can substitute their own capture source.
//!
//! # Examples
//! ```no_run
//! use std::time::Duration;
//!
//! use livetap_core::{CaptureConfig, CaptureSession};
//!
//! let config = CaptureConfig::default()
//!     .with_interface("eth0")
//!     .with_bpf_filter("udp port 53");
//! let mut session = CaptureSession::new(config)?;
//! for packet in session.sniff_continuously(Some(5))? {
//!     let packet = packet?;
//!     println!("{} {}", packet.number, packet.summary().protocol);
//! }
//! # Ok::<(), livetap_core::CaptureError>(())
//! ```

mod config;
mod decode;
mod driver;
mod error;
mod packet;
mod params;
mod process;
mod report;
mod session;
mod source;
mod stream;
mod summary;

pub use config::{CaptureConfig, DEFAULT_TSHARK};
pub use decode::PacketDecoder;
pub use driver::{
    Canceller, INTERRUPTED_EXIT_CODE, Interrupt, InterruptGuard, InterruptTrigger, SniffOutcome,
    StopReason,
};
pub use error::CaptureError;
pub use packet::Packet;
pub use params::{BASE_PARAMETERS, base_parameters, capture_parameters};
pub use process::{
    CaptureLauncher, CaptureProcess, ChildControl, ProcessControl, ProcessExit, TsharkLauncher,
    parse_interface_list,
};
pub use report::{
    CaptureInfo, CaptureSummary, DEFAULT_GENERATED_AT, ProtocolSummary, REPORT_VERSION, Report,
    ToolInfo, build_report,
};
pub use session::CaptureSession;
pub use source::{PacketEvent, PacketSource, PcapStreamSource, SourceError};
pub use stream::PacketStream;
pub use summary::PacketSummary;
