/// Buffer size handed to the pcap-parser readers; must hold the largest block.
pub const PCAP_READER_BUFFER_SIZE: usize = 512 * 1024;

pub const MAGIC_LEN: usize = 4;
pub const PCAPNG_MAGIC: [u8; MAGIC_LEN] = [0x0a, 0x0d, 0x0d, 0x0a];

/// Legacy pcap global header length.
pub const LEGACY_HEADER_LEN: usize = 24;

/// Section header block prefix: block type, total length, byte-order magic.
pub const SHB_PREFIX_LEN: usize = 12;
pub const SHB_LENGTH_RANGE: std::ops::Range<usize> = 4..8;
pub const SHB_BYTE_ORDER_RANGE: std::ops::Range<usize> = 8..12;
pub const SHB_BYTE_ORDER_MAGIC: u32 = 0x1A2B_3C4D;
/// Sanity bound for the section header block length.
pub const SHB_MAX_LEN: usize = 64 * 1024;
