//! Root processes and their supervision.
//!
//! A component's start callback hands back a [`RootProcess`]: a supervised
//! thread whose body receives a [`ProcessContext`]. The body may spawn
//! descendants through the context; the root only counts as terminated once
//! its body and every descendant have returned, which lets `stop` guarantee
//! that nothing the component started is still running when its post-stop
//! hook executes.
//!
//! Termination is cooperative: [`RootProcess::terminate`] raises a shared
//! request that bodies observe through [`ProcessContext::wait_for_shutdown`]
//! or [`ProcessContext::shutdown_requested`].

mod monitor;

use std::any::Any;
use std::fmt;
use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use parking_lot::{Condvar, Mutex};
use tracing::{debug, warn};

pub use monitor::{ProcessMonitor, Termination};

const PROCESS_TARGET: &str = "appctl::process";

static NEXT_PROCESS_ID: AtomicU64 = AtomicU64::new(1);

/// Identifier of a root process, unique within the host.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ProcessId(u64);

impl fmt::Display for ProcessId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "<{}>", self.0)
    }
}

/// Why a root process terminated.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ExitCause {
    /// The body finished on its own accord.
    Normal,
    /// The body honoured a termination request.
    Shutdown,
    /// The body reported a failure.
    Failed(String),
    /// The body or a descendant panicked.
    Panicked(String),
}

impl ExitCause {
    /// Returns `true` for the designated clean cause.
    #[must_use]
    pub const fn is_normal(&self) -> bool {
        matches!(self, Self::Normal)
    }
}

impl fmt::Display for ExitCause {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Normal => f.write_str("normal"),
            Self::Shutdown => f.write_str("shutdown"),
            Self::Failed(reason) => write!(f, "failed: {reason}"),
            Self::Panicked(message) => write!(f, "panicked: {message}"),
        }
    }
}

#[derive(Debug, Default)]
struct ShutdownToken {
    requested: Mutex<bool>,
    changed: Condvar,
}

impl ShutdownToken {
    fn request(&self) {
        let mut requested = self.requested.lock();
        *requested = true;
        self.changed.notify_all();
    }

    fn is_requested(&self) -> bool {
        *self.requested.lock()
    }

    fn wait(&self) {
        let mut requested = self.requested.lock();
        while !*requested {
            self.changed.wait(&mut requested);
        }
    }

    fn wait_for(&self, timeout: Duration) -> bool {
        let mut requested = self.requested.lock();
        let outcome = self
            .changed
            .wait_while_for(&mut requested, |flag| !*flag, timeout);
        !outcome.timed_out() || *requested
    }
}

#[derive(Debug, Default)]
struct ExitLatch {
    cause: Mutex<Option<ExitCause>>,
    exited: Condvar,
}

impl ExitLatch {
    fn set(&self, cause: ExitCause) {
        let mut slot = self.cause.lock();
        *slot = Some(cause);
        self.exited.notify_all();
    }

    fn wait(&self) -> ExitCause {
        let mut slot = self.cause.lock();
        loop {
            if let Some(cause) = slot.as_ref() {
                return cause.clone();
            }
            self.exited.wait(&mut slot);
        }
    }

    fn peek(&self) -> Option<ExitCause> {
        self.cause.lock().clone()
    }
}

type Descendants = Arc<Mutex<Vec<JoinHandle<Option<String>>>>>;

/// Capabilities available to a root process body and its descendants.
#[derive(Clone)]
pub struct ProcessContext {
    id: ProcessId,
    shutdown: Arc<ShutdownToken>,
    descendants: Descendants,
}

impl fmt::Debug for ProcessContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ProcessContext")
            .field("id", &self.id)
            .finish_non_exhaustive()
    }
}

impl ProcessContext {
    /// Identifier of the owning root process.
    #[must_use]
    pub const fn id(&self) -> ProcessId {
        self.id
    }

    /// Returns `true` once termination has been requested.
    #[must_use]
    pub fn shutdown_requested(&self) -> bool {
        self.shutdown.is_requested()
    }

    /// Blocks until termination is requested.
    pub fn wait_for_shutdown(&self) {
        self.shutdown.wait();
    }

    /// Blocks until termination is requested or `timeout` elapses, returning
    /// whether termination was requested.
    #[must_use]
    pub fn wait_for_shutdown_timeout(&self, timeout: Duration) -> bool {
        self.shutdown.wait_for(timeout)
    }

    /// Spawns a descendant that the root process waits for before it
    /// reports termination.
    pub fn spawn_child<F>(&self, label: &str, body: F)
    where
        F: FnOnce(ProcessContext) + Send + 'static,
    {
        let context = self.clone();
        let builder = thread::Builder::new().name(format!("{label}-{}", self.id.0));
        let spawned = builder.spawn(move || {
            panic::catch_unwind(AssertUnwindSafe(|| body(context)))
                .err()
                .map(|payload| panic_message(payload.as_ref()))
        });
        match spawned {
            Ok(handle) => self.descendants.lock().push(handle),
            Err(error) => warn!(
                target: PROCESS_TARGET,
                process = %self.id,
                error = %error,
                "failed to spawn descendant"
            ),
        }
    }

    fn join_descendants(&self) -> Option<String> {
        let mut first_panic = None;
        loop {
            let pending: Vec<_> = self.descendants.lock().drain(..).collect();
            if pending.is_empty() {
                return first_panic;
            }
            for handle in pending {
                let outcome = handle
                    .join()
                    .unwrap_or_else(|payload| Some(panic_message(payload.as_ref())));
                if first_panic.is_none() {
                    first_panic = outcome;
                }
            }
        }
    }
}

/// Handle to a supervised root process.
///
/// Cloning the handle shares the same process; dropping every handle does not
/// terminate it.
#[derive(Debug, Clone)]
pub struct RootProcess {
    id: ProcessId,
    label: Arc<str>,
    shutdown: Arc<ShutdownToken>,
    exit: Arc<ExitLatch>,
}

impl RootProcess {
    /// Spawns a root process running `body`.
    ///
    /// The body's return value becomes the exit cause unless it or a
    /// descendant panics, in which case the cause is [`ExitCause::Panicked`].
    ///
    /// # Errors
    ///
    /// Returns the OS error when the supervising thread cannot be created.
    pub fn spawn<F>(label: &str, body: F) -> std::io::Result<Self>
    where
        F: FnOnce(ProcessContext) -> ExitCause + Send + 'static,
    {
        let id = ProcessId(NEXT_PROCESS_ID.fetch_add(1, Ordering::Relaxed));
        let shutdown = Arc::new(ShutdownToken::default());
        let exit = Arc::new(ExitLatch::default());
        let context = ProcessContext {
            id,
            shutdown: Arc::clone(&shutdown),
            descendants: Arc::default(),
        };
        let latch = Arc::clone(&exit);
        thread::Builder::new()
            .name(format!("{label}-{}", id.0))
            .spawn(move || {
                let outcome = panic::catch_unwind(AssertUnwindSafe(|| body(context.clone())));
                // Descendants outlive their root only until they observe the request.
                context.shutdown.request();
                let child_panic = context.join_descendants();
                let cause = match (outcome, child_panic) {
                    (Err(payload), _) => ExitCause::Panicked(panic_message(payload.as_ref())),
                    (Ok(_), Some(message)) => ExitCause::Panicked(message),
                    (Ok(cause), None) => cause,
                };
                debug!(
                    target: PROCESS_TARGET,
                    process = %context.id,
                    %cause,
                    "root process terminated"
                );
                latch.set(cause);
            })?;
        Ok(Self {
            id,
            label: Arc::from(label),
            shutdown,
            exit,
        })
    }

    /// Spawns a root process that idles until termination is requested.
    ///
    /// # Errors
    ///
    /// Returns the OS error when the supervising thread cannot be created.
    pub fn idle(label: &str) -> std::io::Result<Self> {
        Self::spawn(label, |ctx| {
            ctx.wait_for_shutdown();
            ExitCause::Shutdown
        })
    }

    /// Process identifier.
    #[must_use]
    pub const fn id(&self) -> ProcessId {
        self.id
    }

    /// Label given at spawn time.
    #[must_use]
    pub fn label(&self) -> &str {
        &self.label
    }

    /// Requests termination without waiting for it.
    pub fn terminate(&self) {
        self.shutdown.request();
    }

    /// Blocks until the process and all descendants have terminated.
    #[must_use]
    pub fn wait(&self) -> ExitCause {
        self.exit.wait()
    }

    /// Exit cause, if the process has terminated.
    #[must_use]
    pub fn exit_cause(&self) -> Option<ExitCause> {
        self.exit.peek()
    }

    /// Returns `true` while the process or a descendant is running.
    #[must_use]
    pub fn is_alive(&self) -> bool {
        self.exit_cause().is_none()
    }
}

pub(crate) fn panic_message(payload: &(dyn Any + Send)) -> String {
    payload
        .downcast_ref::<&str>()
        .map(|message| (*message).to_owned())
        .or_else(|| payload.downcast_ref::<String>().cloned())
        .unwrap_or_else(|| String::from("non-string panic payload"))
}
