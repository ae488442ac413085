//! Shared fixtures for the coordinator specs.

use async_trait::async_trait;
use evalcoord::{AbortRefused, OperationError, PolledOperation};
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::Mutex;
use std::time::Duration;
use tokio::sync::watch;

/// An evaluation blocked inside the debuggee: it cannot observe a
/// cancellation signal and only stops when an abort request reaches it or
/// it is force-shut-down.
pub struct BlockedEval {
    description: String,
    refuse_aborts: bool,
    done: watch::Sender<bool>,
    output: Mutex<Option<Result<String, OperationError>>>,
    abort_requests: AtomicU32,
    forced: AtomicBool,
}

impl BlockedEval {
    pub fn new(description: &str) -> Self {
        let (done, _rx) = watch::channel(false);
        Self {
            description: description.to_string(),
            refuse_aborts: false,
            done,
            output: Mutex::new(None),
            abort_requests: AtomicU32::new(0),
            forced: AtomicBool::new(false),
        }
    }

    /// An evaluation whose abort requests are always refused, for example
    /// because the debuggee cannot be interrupted.
    pub fn refusing_aborts(description: &str) -> Self {
        let mut eval = Self::new(description);
        eval.refuse_aborts = true;
        eval
    }

    pub fn abort_request_count(&self) -> u32 {
        self.abort_requests.load(Ordering::SeqCst)
    }

    pub fn was_forced(&self) -> bool {
        self.forced.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl PolledOperation for BlockedEval {
    type Output = String;

    fn description(&self) -> String {
        self.description.clone()
    }

    fn start(&self) {}

    fn request_abort(&self) -> Result<(), AbortRefused> {
        self.abort_requests.fetch_add(1, Ordering::SeqCst);
        if self.refuse_aborts {
            return Err(AbortRefused("debuggee is running".to_string()));
        }
        *self.output.lock().unwrap() = Some(Err(OperationError::Cancelled));
        self.done.send_replace(true);
        Ok(())
    }

    async fn wait_completed(&self, timeout: Duration) -> bool {
        let mut rx = self.done.subscribe();
        // The wait_for result borrows rx; resolve it before rx drops.
        let signalled = matches!(
            tokio::time::timeout(timeout, rx.wait_for(|done| *done)).await,
            Ok(Ok(_))
        );
        signalled
    }

    fn force_shutdown(&self) {
        self.forced.store(true, Ordering::SeqCst);
        self.done.send_replace(true);
    }

    fn take_output(&self) -> Option<Result<String, OperationError>> {
        self.output.lock().unwrap().take()
    }
}
