use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, OnceLock};
use std::time::Duration;

use crossbeam_channel::{Receiver, Sender, bounded, never};
use log::warn;

use crate::process::kill_detached_groups;

/// Exit code of a program stopped by Ctrl-C (128 + SIGINT).
pub const INTERRUPTED_EXIT_CODE: i32 = 130;

static CTRL_C: OnceLock<Option<Arc<CtrlC>>> = OnceLock::new();

/// Source of interactive interrupts observed while `sniff` waits.
///
/// # Examples
/// ```
/// use livetap_core::Interrupt;
///
/// let (trigger, interrupt) = Interrupt::manual();
/// trigger.trigger();
/// assert!(interrupt.is_pending());
/// ```
#[derive(Debug, Clone)]
pub struct Interrupt {
    receiver: Receiver<()>,
    ctrl_c: Option<Arc<CtrlC>>,
}

/// Fires a manual `Interrupt`.
#[derive(Debug, Clone)]
pub struct InterruptTrigger {
    sender: Sender<()>,
}

impl InterruptTrigger {
    /// Request an interrupt. Repeated requests before one is observed
    /// collapse into one.
    pub fn trigger(&self) {
        let _ = self.sender.try_send(());
    }
}

/// Keeps Ctrl-C routed to an `Interrupt` until dropped.
#[derive(Debug)]
#[must_use = "Ctrl-C is only routed while the guard is alive"]
pub struct InterruptGuard {
    ctrl_c: Option<Arc<CtrlC>>,
}

impl Drop for InterruptGuard {
    fn drop(&mut self) {
        if let Some(ctrl_c) = &self.ctrl_c {
            ctrl_c.armed.fetch_sub(1, Ordering::SeqCst);
        }
    }
}

impl Interrupt {
    /// Interrupts raised by Ctrl-C.
    ///
    /// The process-wide handler is installed on first use. A press only
    /// becomes an interrupt while some `Interrupt::ctrl_c` is armed: during
    /// `sniff`, inside `wait`, or while a guard from `arm` is alive. Any
    /// other press keeps the default meaning of Ctrl-C: the handler kills
    /// the process groups of live capture processes and exits the program
    /// with `INTERRUPTED_EXIT_CODE`, without running destructors.
    ///
    /// When the handler cannot be installed (another one is registered)
    /// interrupts are disabled and a warning is logged.
    pub fn ctrl_c() -> Self {
        match CTRL_C.get_or_init(install_ctrl_c_handler) {
            Some(ctrl_c) => Self::routed(Arc::clone(ctrl_c)),
            None => Self::never(),
        }
    }

    /// An interrupt that never fires.
    pub fn never() -> Self {
        Self {
            receiver: never(),
            ctrl_c: None,
        }
    }

    /// A programmatic interrupt and the trigger that fires it.
    pub fn manual() -> (InterruptTrigger, Interrupt) {
        let (sender, receiver) = bounded(1);
        (
            InterruptTrigger { sender },
            Interrupt {
                receiver,
                ctrl_c: None,
            },
        )
    }

    fn routed(ctrl_c: Arc<CtrlC>) -> Self {
        Self {
            receiver: ctrl_c.receiver.clone(),
            ctrl_c: Some(ctrl_c),
        }
    }

    /// Route Ctrl-C presses to this interrupt until the guard is dropped.
    ///
    /// Arm before starting a capture that something else will wait on, so a
    /// press in between is queued instead of exiting the program. Presses
    /// left over from an earlier armed period are discarded. A no-op for
    /// manual and never-firing interrupts.
    pub fn arm(&self) -> InterruptGuard {
        if let Some(ctrl_c) = &self.ctrl_c {
            if ctrl_c.armed.fetch_add(1, Ordering::SeqCst) == 0 {
                while ctrl_c.receiver.try_recv().is_ok() {}
            }
        }
        InterruptGuard {
            ctrl_c: self.ctrl_c.clone(),
        }
    }

    /// Block until the interrupt fires. Returns `false` if it never can.
    pub fn wait(&self) -> bool {
        let _armed = self.arm();
        self.receiver.recv().is_ok()
    }

    /// Wait up to `timeout` for the interrupt. Returns whether it fired.
    pub fn wait_timeout(&self, timeout: Duration) -> bool {
        let _armed = self.arm();
        self.receiver.recv_timeout(timeout).is_ok()
    }

    /// Whether an interrupt is waiting to be observed.
    pub fn is_pending(&self) -> bool {
        !self.receiver.is_empty()
    }

    pub(crate) fn receiver(&self) -> &Receiver<()> {
        &self.receiver
    }
}

/// Shared state of the process-wide Ctrl-C handler.
#[derive(Debug)]
struct CtrlC {
    armed: AtomicUsize,
    sender: Sender<()>,
    receiver: Receiver<()>,
}

impl CtrlC {
    fn new() -> Self {
        let (sender, receiver) = bounded(1);
        Self {
            armed: AtomicUsize::new(0),
            sender,
            receiver,
        }
    }

    /// Queue a press for the armed interrupts. Returns `false` when nothing
    /// is armed to receive it.
    fn deliver(&self) -> bool {
        if self.armed.load(Ordering::SeqCst) == 0 {
            return false;
        }
        let _ = self.sender.try_send(());
        true
    }
}

fn install_ctrl_c_handler() -> Option<Arc<CtrlC>> {
    let ctrl_c = Arc::new(CtrlC::new());
    let route = Arc::clone(&ctrl_c);
    match ctrlc::set_handler(move || {
        if !route.deliver() {
            exit_interrupted();
        }
    }) {
        Ok(()) => Some(ctrl_c),
        Err(err) => {
            warn!("Ctrl-C handling unavailable: {err}");
            None
        }
    }
}

fn exit_interrupted() -> ! {
    let killed = kill_detached_groups();
    if killed > 0 {
        warn!("interrupted, killed {killed} capture process group(s)");
    }
    std::process::exit(INTERRUPTED_EXIT_CODE)
}
