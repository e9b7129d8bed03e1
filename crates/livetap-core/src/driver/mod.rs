//! Supervision of one blocking `sniff` run.
//!
//! The capture loop runs on a dedicated thread that appends every packet to
//! the session. The calling thread waits for it, for the deadline, or for an
//! interrupt, whichever comes first. Timeouts and interrupts cancel the run
//! through its `Canceller`, which terminates the capture process and so
//! unblocks the capture thread even when it sits in a read.

mod cancel;
mod interrupt;

use std::thread;
use std::time::Instant;

use crossbeam_channel::{Receiver, at, bounded, never, select};
use log::{debug, info, warn};
use serde::{Deserialize, Serialize};

pub use cancel::Canceller;
pub use interrupt::{INTERRUPTED_EXIT_CODE, Interrupt, InterruptGuard, InterruptTrigger};

use crate::error::CaptureError;
use crate::packet::Packet;
use crate::stream::PacketStream;

/// Why a `sniff` run stopped.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StopReason {
    /// The stream ended or the packet-count limit was reached.
    Completed,
    /// The timeout elapsed first.
    TimedOut,
    /// An interrupt arrived first.
    Interrupted,
}

/// Result of a `sniff` run.
///
/// # Examples
/// ```
/// use livetap_core::{SniffOutcome, StopReason};
///
/// let outcome = SniffOutcome {
///     reason: StopReason::TimedOut,
///     captured: 0,
/// };
/// assert!(!outcome.completed());
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SniffOutcome {
    pub reason: StopReason,
    /// Packets appended to the session by this run.
    pub captured: usize,
}

impl SniffOutcome {
    pub fn completed(&self) -> bool {
        self.reason == StopReason::Completed
    }
}

/// Per-run control state of a `sniff` call.
#[derive(Debug)]
pub(crate) struct RunControl {
    pub canceller: Canceller,
    pub packet_count: Option<usize>,
    pub deadline: Option<Instant>,
}

/// Run `stream` to completion on a capture thread, appending to `packets`,
/// and stop it early on deadline or interrupt.
pub(crate) fn drive(
    stream: PacketStream,
    packets: &mut Vec<Packet>,
    control: &RunControl,
    interrupt: &Interrupt,
) -> Result<StopReason, CaptureError> {
    let (done_tx, done_rx) = bounded::<()>(1);

    thread::scope(|scope| {
        let worker = scope.spawn(move || {
            let result = collect(stream, packets);
            let _ = done_tx.send(());
            result
        });

        let mut reason = wait_for_stop(&done_rx, control.deadline, interrupt);
        if reason != StopReason::Completed && done_rx.try_recv().is_ok() {
            reason = StopReason::Completed;
        }
        match reason {
            StopReason::Completed => {
                debug!("capture run completed (limit {:?})", control.packet_count);
            }
            StopReason::TimedOut => {
                info!("capture timed out, stopping");
                cancel(&control.canceller);
            }
            StopReason::Interrupted => {
                warn!("interrupted, stopping capture");
                cancel(&control.canceller);
            }
        }

        let result = match worker.join() {
            Ok(result) => result,
            Err(panic) => std::panic::resume_unwind(panic),
        };
        result.map(|()| reason)
    })
}

fn collect(stream: PacketStream, packets: &mut Vec<Packet>) -> Result<(), CaptureError> {
    for packet in stream {
        packets.push(packet?);
    }
    Ok(())
}

fn wait_for_stop(
    done: &Receiver<()>,
    deadline: Option<Instant>,
    interrupt: &Interrupt,
) -> StopReason {
    let timer = deadline.map(at).unwrap_or_else(never);
    let closed = never();
    let mut interrupt_open = true;
    loop {
        let interrupts = if interrupt_open {
            interrupt.receiver()
        } else {
            &closed
        };
        select! {
            recv(done) -> _ => return StopReason::Completed,
            recv(timer) -> _ => return StopReason::TimedOut,
            recv(interrupts) -> msg => match msg {
                Ok(()) => return StopReason::Interrupted,
                // Every trigger was dropped; nothing can interrupt any more.
                Err(_) => interrupt_open = false,
            },
        }
    }
}

fn cancel(canceller: &Canceller) {
    if let Err(err) = canceller.cancel() {
        debug!("{err}");
    }
}
