use std::io::Read;
use std::sync::{Mutex, MutexGuard, PoisonError};

use log::debug;

use super::{CaptureProcess, ProcessControl, ProcessExit};
use crate::error::CaptureError;

/// What `ProcessSlot::finish` found when a process's output ended.
#[derive(Debug)]
pub(crate) enum ProcessEnd {
    /// The process was already released, by a cancel or a cleanup.
    Released,
    /// The process exit could not be observed.
    Unobserved,
    Exited(ProcessExit),
}

/// Holder for the single capture process a session may have attached.
///
/// Every attach bumps a generation counter. Releases name the generation
/// they were issued for, so a stale cancel handle can never stop a process
/// started by a later run.
pub(crate) struct ProcessSlot {
    state: Mutex<SlotState>,
}

#[derive(Default)]
struct SlotState {
    generation: u64,
    attached: Option<Attached>,
}

struct Attached {
    control: Box<dyn ProcessControl>,
    output: Option<Box<dyn Read + Send>>,
    /// Packet count the process was launched with.
    packet_count: Option<usize>,
}

impl ProcessSlot {
    pub(crate) fn new() -> Self {
        Self {
            state: Mutex::new(SlotState::default()),
        }
    }

    fn lock(&self) -> MutexGuard<'_, SlotState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub(crate) fn is_attached(&self) -> bool {
        self.lock().attached.is_some()
    }

    /// Attach a freshly started process launched with `packet_count` and
    /// return its generation.
    ///
    /// If a process is already attached the new one is terminated and the
    /// existing one is left untouched.
    pub(crate) fn attach(
        &self,
        process: CaptureProcess,
        packet_count: Option<usize>,
    ) -> Result<u64, CaptureError> {
        let (output, control) = process.into_parts();
        let mut state = self.lock();
        if state.attached.is_some() {
            drop(state);
            terminate(Attached {
                control,
                output: Some(output),
                packet_count,
            });
            return Err(CaptureError::Configuration(
                "a capture process is already attached to this session".to_string(),
            ));
        }
        state.generation += 1;
        state.attached = Some(Attached {
            control,
            output: Some(output),
            packet_count,
        });
        Ok(state.generation)
    }

    /// Hand the process output to a single consumer that expects the
    /// process to stop after `packet_count` packets.
    pub(crate) fn take_output(
        &self,
        packet_count: Option<usize>,
    ) -> Result<(u64, Box<dyn Read + Send>), CaptureError> {
        let mut state = self.lock();
        let generation = state.generation;
        let attached = state.attached.as_mut().ok_or_else(|| {
            CaptureError::Configuration("no capture process is attached".to_string())
        })?;
        if attached.packet_count != packet_count {
            return Err(CaptureError::Configuration(format!(
                "the attached capture process was started with packet count {}, not {}",
                describe_count(attached.packet_count),
                describe_count(packet_count)
            )));
        }
        let output = attached.output.take().ok_or_else(|| {
            CaptureError::Configuration("a capture is already in progress on this session".to_string())
        })?;
        Ok((generation, output))
    }

    /// Terminate and detach the process of `generation`, if still attached.
    ///
    /// Returns whether a process was released.
    pub(crate) fn release(&self, generation: u64) -> bool {
        let attached = {
            let mut state = self.lock();
            if state.generation != generation {
                return false;
            }
            state.attached.take()
        };
        match attached {
            Some(attached) => {
                terminate(attached);
                true
            }
            None => false,
        }
    }

    /// Collect the exit of the process of `generation` after its output
    /// ended, then terminate and detach it.
    pub(crate) fn finish(&self, generation: u64) -> ProcessEnd {
        let attached = {
            let mut state = self.lock();
            if state.generation != generation {
                return ProcessEnd::Released;
            }
            state.attached.take()
        };
        let Some(mut attached) = attached else {
            return ProcessEnd::Released;
        };
        let end = match attached.control.wait_exit() {
            Ok(Some(exit)) => ProcessEnd::Exited(exit),
            Ok(None) => ProcessEnd::Unobserved,
            Err(err) => {
                debug!("capture process {:?} exit unknown: {err}", attached.control.id());
                ProcessEnd::Unobserved
            }
        };
        terminate(attached);
        end
    }

    /// Terminate and detach whatever process is attached.
    pub(crate) fn release_current(&self) -> bool {
        let attached = self.lock().attached.take();
        match attached {
            Some(attached) => {
                terminate(attached);
                true
            }
            None => false,
        }
    }
}

impl Drop for ProcessSlot {
    fn drop(&mut self) {
        self.release_current();
    }
}

fn describe_count(packet_count: Option<usize>) -> String {
    match packet_count {
        Some(count) => count.to_string(),
        None => "unlimited".to_string(),
    }
}

fn terminate(attached: Attached) {
    let Attached {
        mut control,
        output,
        ..
    } = attached;
    let pid = control.id();
    if let Err(err) = control.terminate() {
        debug!("capture process {pid:?} cleanup failed: {err}");
    } else {
        debug!("capture process {pid:?} terminated");
    }
    drop(output);
}
