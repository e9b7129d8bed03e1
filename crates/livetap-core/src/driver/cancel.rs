use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use crate::error::CaptureError;
use crate::process::{ProcessEnd, ProcessSlot};

/// Handle that stops one capture run from any thread.
///
/// Cancelling marks the run as cancelled and terminates its capture process
/// in the same call. Termination closes the process output, which is what
/// unblocks a consumer stuck reading from a quiet interface.
#[derive(Clone)]
pub struct Canceller {
    cancelled: Arc<AtomicBool>,
    slot: Arc<ProcessSlot>,
    generation: u64,
}

impl Canceller {
    pub(crate) fn new(slot: Arc<ProcessSlot>, generation: u64) -> Self {
        Self {
            cancelled: Arc::new(AtomicBool::new(false)),
            slot,
            generation,
        }
    }

    /// Cancel the run.
    ///
    /// # Errors
    /// Returns `CaptureError::CancellationDelivery` when the run had already
    /// finished and released its process. The error is benign: nothing was
    /// changed.
    pub fn cancel(&self) -> Result<(), CaptureError> {
        self.cancelled.store(true, Ordering::SeqCst);
        if self.slot.release(self.generation) {
            Ok(())
        } else {
            Err(CaptureError::CancellationDelivery)
        }
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::SeqCst)
    }

    /// Release the run's process without marking it cancelled.
    pub(crate) fn release(&self) -> bool {
        self.slot.release(self.generation)
    }

    /// Collect the exit of the run's process once its output ended.
    pub(crate) fn finish(&self) -> ProcessEnd {
        self.slot.finish(self.generation)
    }
}

impl std::fmt::Debug for Canceller {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Canceller")
            .field("generation", &self.generation)
            .field("cancelled", &self.is_cancelled())
            .finish()
    }
}
