//! Background validation of all active sessions.
//!
//! The [`ValidationScheduler`] owns one tokio task that periodically asks a
//! [`ValidatingSessionManager`] to sweep its sessions. Tokio tasks do not keep
//! the process alive: when the runtime shuts down the task is dropped with it.

use std::fmt;
use std::sync::Weak;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::error::Result;

/// How long [`ValidationScheduler::shutdown`] waits for an in-flight sweep.
const SHUTDOWN_GRACE: Duration = Duration::from_secs(5);

/// Outcome of one sweep over all active sessions.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SweepReport {
    /// Sessions examined.
    pub checked: usize,
    /// Sessions found expired (including ones expired by this sweep).
    pub expired: usize,
    /// Sessions found explicitly stopped.
    pub stopped: usize,
    /// Sessions whose invalidation could not be written back.
    pub failed: usize,
    /// Whether the sweep was cancelled before reaching every session.
    pub interrupted: bool,
}

impl SweepReport {
    /// Sessions that failed validation during the sweep.
    pub fn invalidated(&self) -> usize {
        self.expired + self.stopped
    }
}

impl fmt::Display for SweepReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} checked, {} invalidated ({} expired, {} stopped), {} failed",
            self.checked,
            self.invalidated(),
            self.expired,
            self.stopped,
            self.failed
        )?;
        if self.interrupted {
            write!(f, ", interrupted")?;
        }
        Ok(())
    }
}

/// Anything that can sweep its sessions for validity.
///
/// The scheduler only ever talks to sessions through this trait.
#[async_trait]
pub trait ValidatingSessionManager: Send + Sync {
    /// Validate every active session.
    ///
    /// Per-session failures are absorbed into the report; only failures of
    /// the store itself are returned as errors.
    async fn validate_sessions(&self) -> Result<SweepReport>;

    /// Like [`validate_sessions`](Self::validate_sessions), but stops between
    /// sessions once `cancel` fires.
    async fn validate_sessions_until(&self, _cancel: &CancellationToken) -> Result<SweepReport> {
        self.validate_sessions().await
    }
}

struct Running {
    cancel: CancellationToken,
    handle: Option<JoinHandle<()>>,
}

/// Runs [`ValidatingSessionManager::validate_sessions_until`] at a fixed
/// interval.
///
/// States: disabled → `enable_session_validation` → enabled →
/// `disable_session_validation` → disabled. Sweeps never overlap: the next
/// tick is only awaited after the previous sweep finished, and missed ticks
/// are delayed rather than bursted.
pub struct ValidationScheduler {
    target: Weak<dyn ValidatingSessionManager>,
    interval: Duration,
    running: Mutex<Option<Running>>,
}

impl ValidationScheduler {
    /// A disabled scheduler for `target`.
    ///
    /// Holds only a weak reference so the manager can own its scheduler.
    pub fn new(target: Weak<dyn ValidatingSessionManager>, interval: Duration) -> Self {
        Self {
            target,
            interval,
            running: Mutex::new(None),
        }
    }

    pub fn interval(&self) -> Duration {
        self.interval
    }

    pub fn is_enabled(&self) -> bool {
        self.running.lock().is_some()
    }

    /// Start recurring validation.
    ///
    /// Returns `true` once the scheduler is enabled. A zero interval enables
    /// it without ever firing. Must be called within a tokio runtime;
    /// otherwise the error is logged and the scheduler stays disabled.
    pub fn enable_session_validation(&self) -> bool {
        let mut running = self.running.lock();
        if running.is_some() {
            return true;
        }

        if self.interval.is_zero() {
            info!("Session validation interval is zero; scheduler is inert");
            *running = Some(Running {
                cancel: CancellationToken::new(),
                handle: None,
            });
            return true;
        }

        let runtime = match tokio::runtime::Handle::try_current() {
            Ok(runtime) => runtime,
            Err(e) => {
                error!(error = %e, "Unable to start session validation; no tokio runtime. Session validation will not occur");
                return false;
            }
        };

        let cancel = CancellationToken::new();
        let handle = runtime.spawn(run_sweeps(
            self.target.clone(),
            self.interval,
            cancel.clone(),
        ));

        info!(interval = ?self.interval, "Enabled session validation scheduler");
        *running = Some(Running {
            cancel,
            handle: Some(handle),
        });
        true
    }

    /// Stop recurring validation.
    ///
    /// Idempotent and infallible. An in-flight sweep is asked to stop between
    /// sessions but is not waited for; no new sweep starts afterwards.
    pub fn disable_session_validation(&self) {
        let Some(running) = self.running.lock().take() else {
            debug!("Session validation already disabled");
            return;
        };
        running.cancel.cancel();
        info!("Disabled session validation scheduler");
    }

    /// Disable validation and wait briefly for the task to finish.
    ///
    /// Failures are logged and swallowed; this usually runs during teardown.
    pub async fn shutdown(&self) {
        let Some(running) = self.running.lock().take() else {
            return;
        };
        running.cancel.cancel();

        let Some(handle) = running.handle else {
            return;
        };
        match tokio::time::timeout(SHUTDOWN_GRACE, handle).await {
            Ok(Ok(())) => debug!("Session validation task stopped"),
            Ok(Err(e)) => warn!(error = %e, "Session validation task ended abnormally; ignoring (shutting down)"),
            Err(_) => warn!("Session validation task did not stop in time; ignoring (shutting down)"),
        }
    }
}

impl Drop for ValidationScheduler {
    fn drop(&mut self) {
        if let Some(running) = self.running.get_mut().take() {
            running.cancel.cancel();
        }
    }
}

async fn run_sweeps(
    target: Weak<dyn ValidatingSessionManager>,
    interval: Duration,
    cancel: CancellationToken,
) {
    let mut ticker = tokio::time::interval_at(Instant::now() + interval, interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            biased;
            _ = cancel.cancelled() => break,
            _ = ticker.tick() => {}
        }

        let Some(manager) = target.upgrade() else {
            debug!("Session manager dropped; stopping validation");
            break;
        };

        match manager.validate_sessions_until(&cancel).await {
            Ok(report) => debug!(%report, "Scheduled session validation finished"),
            Err(e) => warn!(error = %e, "Scheduled session validation failed"),
        }
    }
}
