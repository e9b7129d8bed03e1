//! PCAP/PCAPNG stream source.
//!
//! Capture tools write their output to a pipe, so the stream cannot be
//! rewound after sniffing the format. The reader pre-reads the leading header
//! block into memory and chains it in front of the remaining stream; the
//! parser then drives `pcap-parser` over that chain and emits raw packet
//! events.

pub mod error;
pub mod layout;
pub mod parser;
pub mod reader;

pub use parser::PcapStreamSource;
