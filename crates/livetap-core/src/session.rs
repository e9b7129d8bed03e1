use std::sync::Arc;
use std::time::{Duration, Instant};

use log::info;

use crate::config::CaptureConfig;
use crate::driver::{self, Canceller, Interrupt, RunControl, SniffOutcome};
use crate::error::CaptureError;
use crate::packet::Packet;
use crate::params::capture_parameters;
use crate::process::{CaptureLauncher, ProcessSlot, TsharkLauncher};
use crate::stream::PacketStream;

/// A live capture target and the packets captured from it so far.
///
/// A session owns at most one capture process at a time. `sniff` and
/// `sniff_continuously` may be called repeatedly; each call starts a new
/// process and tears it down before (or, for streams, when) it finishes.
/// Dropping the session terminates any process still attached, including
/// one feeding a stream that outlived it.
///
/// # Examples
/// ```no_run
/// use std::time::Duration;
///
/// use livetap_core::{CaptureConfig, CaptureSession};
///
/// let mut session = CaptureSession::new(CaptureConfig::default().with_interface("eth0"))?;
/// let outcome = session.sniff(Some(10), Some(Duration::from_secs(5)))?;
/// println!("{:?}: {} packets", outcome.reason, session.packets().len());
/// # Ok::<(), livetap_core::CaptureError>(())
/// ```
pub struct CaptureSession {
    config: CaptureConfig,
    launcher: Arc<dyn CaptureLauncher>,
    packets: Vec<Packet>,
    process: Arc<ProcessSlot>,
}

impl CaptureSession {
    /// Session that captures with `tshark` at `config.tshark_path`.
    ///
    /// # Errors
    /// Returns `CaptureError::Configuration` when no interface is configured
    /// and none can be listed.
    pub fn new(config: CaptureConfig) -> Result<Self, CaptureError> {
        let launcher = TsharkLauncher::new(config.tshark_path.clone());
        Self::with_launcher(config, Arc::new(launcher))
    }

    /// Session over a custom capture launcher.
    ///
    /// An empty interface list is resolved to every interface the launcher
    /// reports.
    ///
    /// # Errors
    /// `Configuration` for a non-empty display filter: the capture tool
    /// writes a pcapng stream, and tshark refuses display filters while
    /// saving captured packets. Use a capture filter instead.
    pub fn with_launcher(
        mut config: CaptureConfig,
        launcher: Arc<dyn CaptureLauncher>,
    ) -> Result<Self, CaptureError> {
        let display_filter = config.display_filter.as_deref().filter(|f| !f.trim().is_empty());
        if let Some(filter) = display_filter {
            return Err(CaptureError::Configuration(format!(
                "display filter `{filter}` cannot be applied to a live capture stream; \
                 use a capture filter instead"
            )));
        }
        if config.interfaces.is_empty() {
            config.interfaces = launcher.list_interfaces()?;
            info!("capturing on all interfaces: {:?}", config.interfaces);
        }
        if config.interfaces.is_empty() {
            return Err(CaptureError::Configuration(
                "no capture interfaces available".to_string(),
            ));
        }
        if config.interfaces.iter().any(|name| name.trim().is_empty()) {
            return Err(CaptureError::Configuration(
                "interface names must not be empty".to_string(),
            ));
        }
        Ok(Self {
            config,
            launcher,
            packets: Vec::new(),
            process: Arc::new(ProcessSlot::new()),
        })
    }

    pub fn config(&self) -> &CaptureConfig {
        &self.config
    }

    /// Interfaces in capture order.
    pub fn interfaces(&self) -> &[String] {
        &self.config.interfaces
    }

    /// Packets accumulated by `sniff`, in capture order.
    pub fn packets(&self) -> &[Packet] {
        &self.packets
    }

    pub fn take_packets(&mut self) -> Vec<Packet> {
        std::mem::take(&mut self.packets)
    }

    pub fn clear_packets(&mut self) {
        self.packets.clear();
    }

    /// Whether a capture process is currently attached.
    pub fn is_attached(&self) -> bool {
        self.process.is_attached()
    }

    /// Parameters passed to the capture process for a run with this limit.
    pub fn get_parameters(&self, packet_count: Option<usize>) -> Vec<String> {
        capture_parameters(&self.config, packet_count)
    }

    /// Start and attach a capture process without consuming it.
    ///
    /// A following `sniff_continuously` streams from this process and must
    /// ask for the same `packet_count`, which the process was launched with.
    ///
    /// # Errors
    /// `Configuration` when a process is already attached, `SubprocessStart`
    /// when the capture tool cannot be started.
    pub fn start(&mut self, packet_count: Option<usize>) -> Result<(), CaptureError> {
        validate_packet_count(packet_count)?;
        if self.process.is_attached() {
            return Err(CaptureError::Configuration(
                "a capture process is already attached to this session".to_string(),
            ));
        }
        let params = self.get_parameters(packet_count);
        let process = self.launcher.launch(&params)?;
        self.process.attach(process, packet_count)?;
        Ok(())
    }

    /// Stream packets as they are captured.
    ///
    /// Starts a capture process unless one is already attached, in which
    /// case its output is streamed instead.
    ///
    /// On unix the capture process runs in its own process group and does
    /// not see a terminal Ctrl-C. Programs that may be interrupted should
    /// install `Interrupt::ctrl_c` (and `arm` it) before calling this, so a
    /// press can never leave the process running after the program exits.
    ///
    /// # Errors
    /// `Configuration` when another stream is consuming the attached process,
    /// when it was started with a different packet count, or when the limit
    /// is zero. `SubprocessStart` when the capture tool cannot be started.
    /// A capture tool that fails after starting surfaces as a final
    /// `ProcessFailed` item of the stream.
    pub fn sniff_continuously(
        &mut self,
        packet_count: Option<usize>,
    ) -> Result<PacketStream, CaptureError> {
        validate_packet_count(packet_count)?;
        if !self.process.is_attached() {
            self.start(packet_count)?;
        }
        let (generation, output) = self.process.take_output(packet_count)?;
        let canceller = Canceller::new(Arc::clone(&self.process), generation);
        Ok(PacketStream::new(
            output,
            canceller,
            packet_count,
            self.config.only_summaries,
        ))
    }

    /// Capture until `packet_count` packets arrived, `timeout` elapsed or
    /// Ctrl-C is pressed, appending packets to the session.
    pub fn sniff(
        &mut self,
        packet_count: Option<usize>,
        timeout: Option<Duration>,
    ) -> Result<SniffOutcome, CaptureError> {
        self.sniff_with(packet_count, timeout, &Interrupt::ctrl_c())
    }

    /// `sniff` with an explicit interrupt source.
    ///
    /// The capture process is gone on return, whatever the stop reason.
    /// Packets captured before a stop or an error stay in the session. The
    /// interrupt is armed from before the launch until the run ends.
    ///
    /// # Errors
    /// `Configuration` when a process is still attached from an earlier call,
    /// `SubprocessStart` when the capture tool cannot be started,
    /// `ProcessFailed` when it exits with an error or without writing a
    /// capture, `Decode` when its output is malformed.
    pub fn sniff_with(
        &mut self,
        packet_count: Option<usize>,
        timeout: Option<Duration>,
        interrupt: &Interrupt,
    ) -> Result<SniffOutcome, CaptureError> {
        validate_packet_count(packet_count)?;
        if self.process.is_attached() {
            return Err(CaptureError::Configuration(
                "a capture process is still attached; call cleanup() first".to_string(),
            ));
        }
        let _armed = interrupt.arm();
        let started = Instant::now();
        let stream = self.sniff_continuously(packet_count)?;
        let control = RunControl {
            canceller: stream.canceller(),
            packet_count,
            deadline: timeout.map(|timeout| started + timeout),
        };

        let before = self.packets.len();
        let result = driver::drive(stream, &mut self.packets, &control, interrupt);
        control.canceller.release();
        let captured = self.packets.len() - before;

        let reason = result?;
        info!(
            "capture stopped ({:?}) after {} packets in {:.3}s",
            reason,
            captured,
            started.elapsed().as_secs_f64()
        );
        Ok(SniffOutcome { reason, captured })
    }

    /// Terminate and detach the capture process, if any. Idempotent.
    pub fn cleanup(&mut self) {
        self.process.release_current();
    }
}

impl Drop for CaptureSession {
    fn drop(&mut self) {
        self.process.release_current();
    }
}

impl std::fmt::Debug for CaptureSession {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CaptureSession")
            .field("config", &self.config)
            .field("packets", &self.packets.len())
            .field("attached", &self.is_attached())
            .finish()
    }
}

fn validate_packet_count(packet_count: Option<usize>) -> Result<(), CaptureError> {
    if packet_count == Some(0) {
        return Err(CaptureError::Configuration(
            "packet count must be at least 1".to_string(),
        ));
    }
    Ok(())
}
