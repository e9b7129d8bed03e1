#![allow(dead_code)]

use std::collections::VecDeque;
use std::io::{self, Read};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use crossbeam_channel::{Receiver, Sender, unbounded};
use livetap_core::{CaptureError, CaptureLauncher, CaptureProcess, ProcessControl, ProcessExit};

const ETHERTYPE_IPV4: u16 = 0x0800;
const UDP_PROTO: u8 = 17;

pub fn build_ipv4_udp_packet(src_port: u16, dst_port: u16, payload: &[u8]) -> Vec<u8> {
    let mut packet = Vec::new();
    packet.extend_from_slice(&[0x01, 0x02, 0x03, 0x04, 0x05, 0x06]);
    packet.extend_from_slice(&[0x0a, 0x0b, 0x0c, 0x0d, 0x0e, 0x0f]);
    packet.extend_from_slice(&ETHERTYPE_IPV4.to_be_bytes());

    let total_len = 20u16 + 8u16 + (payload.len() as u16);
    let mut ip_header = [0u8; 20];
    ip_header[0] = 0x45;
    ip_header[2..4].copy_from_slice(&total_len.to_be_bytes());
    ip_header[8] = 64;
    ip_header[9] = UDP_PROTO;
    ip_header[12..16].copy_from_slice(&[10, 0, 0, 1]);
    ip_header[16..20].copy_from_slice(&[10, 0, 0, 2]);
    let checksum = ipv4_checksum(&ip_header);
    ip_header[10..12].copy_from_slice(&checksum.to_be_bytes());
    packet.extend_from_slice(&ip_header);

    let udp_len = 8u16 + (payload.len() as u16);
    packet.extend_from_slice(&src_port.to_be_bytes());
    packet.extend_from_slice(&dst_port.to_be_bytes());
    packet.extend_from_slice(&udp_len.to_be_bytes());
    packet.extend_from_slice(&0u16.to_be_bytes());

    packet.extend_from_slice(payload);
    packet
}

fn ipv4_checksum(header: &[u8; 20]) -> u16 {
    let mut sum = 0u32;
    for chunk in header.chunks(2) {
        let part = u16::from_be_bytes([chunk[0], chunk[1]]) as u32;
        sum = sum.wrapping_add(part);
    }
    while (sum >> 16) != 0 {
        sum = (sum & 0xFFFF) + (sum >> 16);
    }
    !(sum as u16)
}

/// Section header plus one Ethernet interface description.
pub fn pcapng_header() -> Vec<u8> {
    let mut output = pcapng_block(0x0A0D0D0A, &section_header_body());
    output.extend_from_slice(&pcapng_block(1, &interface_desc_body()));
    output
}

/// Enhanced packet block on interface 0 carrying a UDP frame.
pub fn pcapng_udp_packet(ts_us: u64, src_port: u16) -> Vec<u8> {
    let frame = build_ipv4_udp_packet(src_port, 9000, &[0xab; 6]);
    pcapng_block(6, &enhanced_packet_body(ts_us, &frame))
}

/// Header followed by `count` packets one second apart.
pub fn pcapng_capture(count: usize) -> Vec<u8> {
    let mut output = pcapng_header();
    for idx in 0..count {
        output.extend_from_slice(&pcapng_udp_packet(idx as u64 * 1_000_000, 1000 + idx as u16));
    }
    output
}

/// Legacy pcap stream (little endian, Ethernet) with `count` packets.
pub fn legacy_capture(count: usize) -> Vec<u8> {
    let mut output = Vec::new();
    output.extend_from_slice(&0xa1b2_c3d4u32.to_le_bytes());
    output.extend_from_slice(&2u16.to_le_bytes());
    output.extend_from_slice(&4u16.to_le_bytes());
    output.extend_from_slice(&0i32.to_le_bytes());
    output.extend_from_slice(&0u32.to_le_bytes());
    output.extend_from_slice(&65535u32.to_le_bytes());
    output.extend_from_slice(&1u32.to_le_bytes());
    for idx in 0..count {
        let frame = build_ipv4_udp_packet(2000 + idx as u16, 9000, &[0xcd; 4]);
        output.extend_from_slice(&(idx as u32).to_le_bytes());
        output.extend_from_slice(&0u32.to_le_bytes());
        output.extend_from_slice(&(frame.len() as u32).to_le_bytes());
        output.extend_from_slice(&(frame.len() as u32).to_le_bytes());
        output.extend_from_slice(&frame);
    }
    output
}

fn pcapng_block(block_type: u32, body: &[u8]) -> Vec<u8> {
    let total_len = (8 + body.len() + 4) as u32;
    let mut block = Vec::with_capacity(total_len as usize);
    block.extend_from_slice(&block_type.to_be_bytes());
    block.extend_from_slice(&total_len.to_be_bytes());
    block.extend_from_slice(body);
    block.extend_from_slice(&total_len.to_be_bytes());
    block
}

fn section_header_body() -> Vec<u8> {
    let mut body = Vec::new();
    body.extend_from_slice(&0x1A2B3C4Du32.to_be_bytes());
    body.extend_from_slice(&1u16.to_be_bytes());
    body.extend_from_slice(&0u16.to_be_bytes());
    body.extend_from_slice(&(-1i64).to_be_bytes());
    body
}

fn interface_desc_body() -> Vec<u8> {
    let mut body = Vec::new();
    body.extend_from_slice(&1u16.to_be_bytes());
    body.extend_from_slice(&0u16.to_be_bytes());
    body.extend_from_slice(&65535u32.to_be_bytes());
    body
}

fn enhanced_packet_body(ts_us: u64, data: &[u8]) -> Vec<u8> {
    let ts_high = ((ts_us >> 32) & 0xFFFF_FFFF) as u32;
    let ts_low = (ts_us & 0xFFFF_FFFF) as u32;
    let cap_len = data.len() as u32;
    let mut body = Vec::new();
    body.extend_from_slice(&0u32.to_be_bytes());
    body.extend_from_slice(&ts_high.to_be_bytes());
    body.extend_from_slice(&ts_low.to_be_bytes());
    body.extend_from_slice(&cap_len.to_be_bytes());
    body.extend_from_slice(&cap_len.to_be_bytes());
    body.extend_from_slice(data);
    let pad_len = (4 - (data.len() % 4)) % 4;
    body.extend(std::iter::repeat_n(0u8, pad_len));
    body
}

/// Blocking reader over a byte channel; end of stream once every sender is
/// gone.
pub struct ChannelReader {
    receiver: Receiver<Vec<u8>>,
    pending: VecDeque<u8>,
}

impl Read for ChannelReader {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        if buf.is_empty() {
            return Ok(0);
        }
        while self.pending.is_empty() {
            match self.receiver.recv() {
                Ok(chunk) => self.pending.extend(chunk),
                Err(_) => return Ok(0),
            }
        }
        let n = buf.len().min(self.pending.len());
        for (slot, byte) in buf.iter_mut().zip(self.pending.drain(..n)) {
            *slot = byte;
        }
        Ok(n)
    }
}

/// Test-side handle on one fake capture process.
#[derive(Clone)]
pub struct FakeProcess {
    feed: Arc<Mutex<Option<Sender<Vec<u8>>>>>,
    terminations: Arc<AtomicUsize>,
}

impl FakeProcess {
    fn new() -> (Self, ChannelReader) {
        let (sender, receiver) = unbounded();
        let process = Self {
            feed: Arc::new(Mutex::new(Some(sender))),
            terminations: Arc::new(AtomicUsize::new(0)),
        };
        let reader = ChannelReader {
            receiver,
            pending: VecDeque::new(),
        };
        (process, reader)
    }

    /// Write bytes to the process output. Returns `false` once it exited.
    pub fn push(&self, bytes: Vec<u8>) -> bool {
        match self.feed.lock().unwrap().as_ref() {
            Some(sender) => sender.send(bytes).is_ok(),
            None => false,
        }
    }

    /// Let the process exit on its own, ending its output.
    pub fn finish(&self) {
        self.feed.lock().unwrap().take();
    }

    pub fn terminations(&self) -> usize {
        self.terminations.load(Ordering::SeqCst)
    }

    pub fn is_running(&self) -> bool {
        self.feed.lock().unwrap().is_some()
    }
}

/// Stderr line of a process planned with `After::Fail`.
pub const FAILURE_MESSAGE: &str = "capture failed: no such device";

struct FakeControl {
    process: FakeProcess,
    exit: Option<ProcessExit>,
}

impl ProcessControl for FakeControl {
    fn terminate(&mut self) -> io::Result<()> {
        self.process.terminations.fetch_add(1, Ordering::SeqCst);
        self.process.finish();
        Ok(())
    }

    fn wait_exit(&mut self) -> io::Result<Option<ProcessExit>> {
        Ok(self.exit.take())
    }
}

/// How a launched fake process behaves after writing its output.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum After {
    /// Exit, ending the stream.
    Exit,
    /// Stay alive without writing until terminated.
    Hang,
    /// Exit with status 2 and `FAILURE_MESSAGE` on stderr.
    Fail,
}

/// Capture launcher whose processes replay queued byte streams.
///
/// Launches beyond the queued plans write a bare capture header and hang.
pub struct FakeLauncher {
    interfaces: Vec<String>,
    plans: Mutex<VecDeque<(Vec<u8>, After)>>,
    launches: Mutex<Vec<Vec<String>>>,
    processes: Mutex<Vec<FakeProcess>>,
    fail_launch: bool,
}

impl FakeLauncher {
    pub fn new(interfaces: &[&str]) -> Self {
        Self {
            interfaces: interfaces.iter().map(|name| name.to_string()).collect(),
            plans: Mutex::new(VecDeque::new()),
            launches: Mutex::new(Vec::new()),
            processes: Mutex::new(Vec::new()),
            fail_launch: false,
        }
    }

    pub fn failing(interfaces: &[&str]) -> Self {
        Self {
            fail_launch: true,
            ..Self::new(interfaces)
        }
    }

    pub fn plan(self, output: Vec<u8>, after: After) -> Self {
        self.plans.lock().unwrap().push_back((output, after));
        self
    }

    pub fn launches(&self) -> Vec<Vec<String>> {
        self.launches.lock().unwrap().clone()
    }

    pub fn process(&self, idx: usize) -> FakeProcess {
        self.processes.lock().unwrap()[idx].clone()
    }

    pub fn process_count(&self) -> usize {
        self.processes.lock().unwrap().len()
    }
}

impl CaptureLauncher for FakeLauncher {
    fn list_interfaces(&self) -> Result<Vec<String>, CaptureError> {
        Ok(self.interfaces.clone())
    }

    fn launch(&self, params: &[String]) -> Result<CaptureProcess, CaptureError> {
        self.launches.lock().unwrap().push(params.to_vec());
        if self.fail_launch {
            return Err(CaptureError::SubprocessStart {
                program: "fake-tshark".to_string(),
                source: io::Error::new(io::ErrorKind::NotFound, "not installed"),
            });
        }
        let (output, after) = self
            .plans
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or_else(|| (pcapng_header(), After::Hang));

        let (process, reader) = FakeProcess::new();
        process.push(output);
        let exit = match after {
            After::Hang => None,
            After::Exit => Some(ProcessExit {
                success: true,
                status: "exit status: 0".to_string(),
                stderr: String::new(),
            }),
            After::Fail => Some(ProcessExit {
                success: false,
                status: "exit status: 2".to_string(),
                stderr: FAILURE_MESSAGE.to_string(),
            }),
        };
        if exit.is_some() {
            process.finish();
        }
        self.processes.lock().unwrap().push(process.clone());
        Ok(CaptureProcess::new(reader, FakeControl { process, exit }))
    }
}
