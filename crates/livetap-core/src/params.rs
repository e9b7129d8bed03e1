//! Capture-tool argument construction.
//!
//! Pure functions of the session configuration: base parameters first, then
//! one `-i` pair per interface in configured order, then the capture filter.

use crate::config::CaptureConfig;

/// Line-buffered, no name resolution, quiet, pcapng to stdout.
pub const BASE_PARAMETERS: &[&str] = &["-l", "-n", "-Q", "-w", "-"];

/// Parameters shared by every capture, before interface selection.
///
/// Never carries a display filter (`-Y`): tshark rejects one together with
/// `-w`, so sessions refuse display filters up front.
pub fn base_parameters(config: &CaptureConfig, packet_count: Option<usize>) -> Vec<String> {
    let mut params: Vec<String> = BASE_PARAMETERS.iter().map(|p| p.to_string()).collect();
    if let Some(count) = packet_count {
        params.push("-c".to_string());
        params.push(count.to_string());
    }
    params.extend(config.extra_parameters.iter().cloned());
    params
}

/// Full parameter list for a live capture.
///
/// # Examples
/// ```
/// use livetap_core::{CaptureConfig, capture_parameters};
///
/// let config = CaptureConfig::default()
///     .with_interfaces(["eth0", "eth1"])
///     .with_bpf_filter("tcp port 80");
/// let params = capture_parameters(&config, None);
/// let tail = &params[params.len() - 6..];
/// assert_eq!(tail, ["-i", "eth0", "-i", "eth1", "-f", "tcp port 80"]);
/// ```
pub fn capture_parameters(config: &CaptureConfig, packet_count: Option<usize>) -> Vec<String> {
    let mut params = base_parameters(config, packet_count);
    for interface in &config.interfaces {
        params.push("-i".to_string());
        params.push(interface.clone());
    }
    if let Some(filter) = config.bpf_filter.as_deref().filter(|f| !f.is_empty()) {
        params.push("-f".to_string());
        params.push(filter.to_string());
    }
    params
}
