//! Capture subprocess collaborators.
//!
//! `CaptureLauncher` is the seam between the capture lifecycle and the tool
//! that actually captures: it lists interfaces and starts a process that
//! writes a capture stream. `ProcessSlot` holds the one process a session may
//! have attached at a time.

mod interfaces;
mod slot;
mod tshark;

use std::io::{self, Read};

pub use interfaces::parse_interface_list;
pub(crate) use slot::{ProcessEnd, ProcessSlot};
pub(crate) use tshark::kill_detached_groups;
pub use tshark::{ChildControl, TsharkLauncher};

use crate::error::CaptureError;

/// Control half of a running capture process.
pub trait ProcessControl: Send {
    /// Stop the process and release its resources.
    ///
    /// Must be idempotent and must cause any pending read on the process
    /// output to return.
    fn terminate(&mut self) -> io::Result<()>;

    /// Collect the exit of a process whose output has ended.
    ///
    /// Returns `None` when the exit cannot be observed, including a process
    /// that closed its output but keeps running. The caller terminates the
    /// process afterwards either way.
    fn wait_exit(&mut self) -> io::Result<Option<ProcessExit>> {
        Ok(None)
    }

    /// Operating system process id, when there is one.
    fn id(&self) -> Option<u32> {
        None
    }
}

/// How a capture process ended on its own.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProcessExit {
    pub success: bool,
    /// Exit status as reported by the operating system.
    pub status: String,
    /// Tail of what the process wrote to stderr.
    pub stderr: String,
}

/// A started capture process: its output stream and its control handle.
pub struct CaptureProcess {
    output: Box<dyn Read + Send>,
    control: Box<dyn ProcessControl>,
}

impl CaptureProcess {
    pub fn new(
        output: impl Read + Send + 'static,
        control: impl ProcessControl + 'static,
    ) -> Self {
        Self {
            output: Box::new(output),
            control: Box::new(control),
        }
    }

    pub fn id(&self) -> Option<u32> {
        self.control.id()
    }

    pub(crate) fn into_parts(self) -> (Box<dyn Read + Send>, Box<dyn ProcessControl>) {
        (self.output, self.control)
    }
}

/// Starts capture processes and answers interface queries.
pub trait CaptureLauncher: Send + Sync {
    /// Interfaces available for capture, in the tool's order.
    fn list_interfaces(&self) -> Result<Vec<String>, CaptureError>;

    /// Start a capture process with the given parameters.
    fn launch(&self, params: &[String]) -> Result<CaptureProcess, CaptureError>;
}
