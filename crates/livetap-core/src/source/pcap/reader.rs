use std::io::{ErrorKind, Read};

use super::error::PcapSourceError;
use super::layout;
use pcap_parser::Linktype;

/// Read into `buf` until it is full or the stream ends.
///
/// Returns the number of bytes read; a short count means end of stream.
pub fn read_up_to<R: Read>(reader: &mut R, buf: &mut [u8]) -> Result<usize, PcapSourceError> {
    let mut filled = 0;
    while filled < buf.len() {
        match reader.read(&mut buf[filled..]) {
            Ok(0) => break,
            Ok(n) => filled += n,
            Err(err) if err.kind() == ErrorKind::Interrupted => continue,
            Err(err) => return Err(PcapSourceError::Io(err)),
        }
    }
    Ok(filled)
}

/// Read the magic bytes of a capture stream.
///
/// Returns `Ok(None)` when the stream ends before producing a single byte,
/// which is how a capture process that was stopped early looks.
///
/// # Errors
/// Returns `PcapSourceError::Truncated` when the stream ends mid-magic.
pub fn read_magic<R: Read>(
    reader: &mut R,
) -> Result<Option<[u8; layout::MAGIC_LEN]>, PcapSourceError> {
    let mut magic = [0u8; layout::MAGIC_LEN];
    let read = read_up_to(reader, &mut magic)?;
    match read {
        0 => Ok(None),
        n if n < layout::MAGIC_LEN => Err(PcapSourceError::Truncated {
            needed: layout::MAGIC_LEN,
            actual: n,
        }),
        _ => Ok(Some(magic)),
    }
}

/// Check whether the magic bytes match PCAPNG.
///
/// # Examples
/// This helper is part of an internal module, so the example is marked as
/// text example.
/// ```text
/// use livetap_core::source::pcap::reader::is_pcapng_magic;
///
/// let magic = [0x0a, 0x0d, 0x0d, 0x0a];
/// assert!(is_pcapng_magic(&magic));
/// ```
pub fn is_pcapng_magic(magic: &[u8; layout::MAGIC_LEN]) -> bool {
    magic == &layout::PCAPNG_MAGIC
}

/// Read the complete leading header (legacy global header or PCAPNG section
/// header block), including the already consumed magic bytes.
///
/// pcap-parser validates the header from the first chunk it reads, so the
/// whole header must be available in one read.
///
/// # Errors
/// Returns `PcapSourceError::Truncated` when the stream ends inside the
/// header and `PcapSourceError::Pcap` when the section header is malformed.
pub fn read_header<R: Read>(
    reader: &mut R,
    magic: [u8; layout::MAGIC_LEN],
) -> Result<Vec<u8>, PcapSourceError> {
    if !is_pcapng_magic(&magic) {
        return read_exact_header(reader, magic.to_vec(), layout::LEGACY_HEADER_LEN);
    }

    let mut header = read_exact_header(reader, magic.to_vec(), layout::SHB_PREFIX_LEN)?;
    let block_len = section_header_len(&header)?;
    header = read_exact_header(reader, header, block_len)?;
    Ok(header)
}

fn read_exact_header<R: Read>(
    reader: &mut R,
    mut header: Vec<u8>,
    needed: usize,
) -> Result<Vec<u8>, PcapSourceError> {
    let have = header.len();
    if have >= needed {
        return Ok(header);
    }
    header.resize(needed, 0);
    let read = read_up_to(reader, &mut header[have..])?;
    if have + read < needed {
        return Err(PcapSourceError::Truncated {
            needed,
            actual: have + read,
        });
    }
    Ok(header)
}

fn section_header_len(prefix: &[u8]) -> Result<usize, PcapSourceError> {
    let bom: [u8; 4] = prefix
        .get(layout::SHB_BYTE_ORDER_RANGE)
        .and_then(|bytes| bytes.try_into().ok())
        .ok_or(PcapSourceError::Truncated {
            needed: layout::SHB_PREFIX_LEN,
            actual: prefix.len(),
        })?;
    let len: [u8; 4] = prefix
        .get(layout::SHB_LENGTH_RANGE)
        .and_then(|bytes| bytes.try_into().ok())
        .ok_or(PcapSourceError::Truncated {
            needed: layout::SHB_PREFIX_LEN,
            actual: prefix.len(),
        })?;

    let block_len = if u32::from_le_bytes(bom) == layout::SHB_BYTE_ORDER_MAGIC {
        u32::from_le_bytes(len)
    } else if u32::from_be_bytes(bom) == layout::SHB_BYTE_ORDER_MAGIC {
        u32::from_be_bytes(len)
    } else {
        return Err(PcapSourceError::Pcap {
            context: "pcapng section header",
            message: format!("invalid byte-order magic {bom:02x?}"),
        });
    };
    let block_len = block_len as usize;

    if block_len < layout::SHB_PREFIX_LEN || block_len % 4 != 0 || block_len > layout::SHB_MAX_LEN
    {
        return Err(PcapSourceError::Pcap {
            context: "pcapng section header",
            message: format!("invalid block length {block_len}"),
        });
    }
    Ok(block_len)
}

/// Resolve the linktype for a given interface id, defaulting to Ethernet.
pub fn linktype_for_interface(linktypes: &[Linktype], if_id: u32) -> Linktype {
    linktypes
        .get(if_id as usize)
        .copied()
        .unwrap_or(Linktype::ETHERNET)
}

/// Convert PCAPNG high/low timestamp to seconds.
///
/// # Examples
/// This helper is part of an internal module, so the example is marked as
/// text example.
/// ```text
/// use livetap_core::source::pcap::reader::pcapng_ts_to_seconds;
///
/// let seconds = pcapng_ts_to_seconds(0, 1_500_000);
/// assert!((seconds - 1.5).abs() < f64::EPSILON);
/// ```
pub fn pcapng_ts_to_seconds(ts_high: u32, ts_low: u32) -> f64 {
    let ts = ((ts_high as u64) << 32) | (ts_low as u64);
    ts as f64 * 1e-6
}
