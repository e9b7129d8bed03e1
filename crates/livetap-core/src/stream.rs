use std::io::Read;
use std::iter::FusedIterator;

use log::debug;

use crate::decode::PacketDecoder;
use crate::driver::Canceller;
use crate::error::CaptureError;
use crate::packet::Packet;
use crate::process::ProcessEnd;

/// Continuous packet stream from a live capture process.
///
/// Yields packets until the process ends, the packet-count limit is reached
/// or the stream is cancelled. The process is cleaned up exactly once on
/// every exit path: end of stream, decode error (cleanup happens before the
/// error is yielded), `close`, cancellation or drop. A stream cannot be
/// restarted; ask the session for a new one.
///
/// When the output ends before the limit and nobody cancelled, the process
/// exit is checked: a non-zero exit, or an exit without any capture header,
/// is yielded as a final `CaptureError::ProcessFailed`.
pub struct PacketStream {
    decoder: PacketDecoder<Box<dyn Read + Send>>,
    canceller: Canceller,
    closed: bool,
}

impl std::fmt::Debug for PacketStream {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PacketStream")
            .field("canceller", &self.canceller)
            .field("closed", &self.closed)
            .finish_non_exhaustive()
    }
}

impl PacketStream {
    pub(crate) fn new(
        output: Box<dyn Read + Send>,
        canceller: Canceller,
        packet_count: Option<usize>,
        only_summaries: bool,
    ) -> Self {
        Self {
            decoder: PacketDecoder::new(output, packet_count, only_summaries),
            canceller,
            closed: false,
        }
    }

    /// Handle to stop this stream from another thread.
    pub fn canceller(&self) -> Canceller {
        self.canceller.clone()
    }

    /// Packets yielded so far.
    pub fn decoded(&self) -> u64 {
        self.decoder.decoded()
    }

    pub fn is_closed(&self) -> bool {
        self.closed
    }

    /// Stop the stream and clean up its capture process. Idempotent.
    pub fn close(&mut self) {
        if self.closed {
            return;
        }
        self.closed = true;
        if self.canceller.release() {
            debug!("capture stream closed after {} packets", self.decoded());
        }
    }

    /// Reap a process whose output ran dry and report it when it failed.
    fn finish(&mut self) -> Option<CaptureError> {
        self.closed = true;
        let end = self.canceller.finish();
        if self.canceller.is_cancelled() {
            return None;
        }
        let header_seen = self.decoder.header_seen();
        let failure = match end {
            ProcessEnd::Released => None,
            ProcessEnd::Exited(exit) if !exit.success => Some(CaptureError::ProcessFailed {
                status: exit.status,
                stderr: exit.stderr,
            }),
            ProcessEnd::Exited(exit) if !header_seen => Some(CaptureError::ProcessFailed {
                status: format!("{} without writing a capture", exit.status),
                stderr: exit.stderr,
            }),
            ProcessEnd::Unobserved if !header_seen => Some(CaptureError::ProcessFailed {
                status: "output ended without a capture".to_string(),
                stderr: String::new(),
            }),
            ProcessEnd::Exited(_) | ProcessEnd::Unobserved => None,
        };
        if failure.is_none() {
            debug!("capture stream ended after {} packets", self.decoded());
        }
        failure
    }
}

impl Iterator for PacketStream {
    type Item = Result<Packet, CaptureError>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.closed {
            return None;
        }
        if self.canceller.is_cancelled() {
            self.close();
            return None;
        }
        match self.decoder.next_packet() {
            Ok(Some(packet)) => Some(Ok(packet)),
            Ok(None) if self.decoder.limit_reached() => {
                self.close();
                None
            }
            Ok(None) => self.finish().map(Err),
            Err(err) => {
                self.close();
                if self.canceller.is_cancelled() {
                    // Killing the process mid-block truncates the stream.
                    debug!("capture stream ended by cancellation: {err}");
                    None
                } else {
                    Some(Err(err))
                }
            }
        }
    }
}

impl FusedIterator for PacketStream {}

impl Drop for PacketStream {
    fn drop(&mut self) {
        self.close();
    }
}
