use std::sync::Mutex;

use tokio::sync::oneshot;
use tracing::{debug, warn};

use crate::relay::RelayError;

type Outcome = Result<(), RelayError>;

/// The single outstanding "wait for completion" handle.
///
/// `arm`, `resolve` and `clear` are the only transitions. At most one wait
/// can be armed at a time; only the line pump resolves it.
#[derive(Debug, Default)]
pub struct CompletionSlot {
    pending: Mutex<Option<oneshot::Sender<Outcome>>>,
}

/// The caller's side of an armed completion.
#[derive(Debug)]
pub struct CompletionWait {
    rx: oneshot::Receiver<Outcome>,
}

impl CompletionWait {
    /// Suspend until the line pump resolves the slot. A dropped slot means
    /// the session went away, which is reported as closed.
    pub async fn wait(self) -> Outcome {
        self.rx.await.unwrap_or(Err(RelayError::SessionClosed))
    }
}

impl CompletionSlot {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Option<oneshot::Sender<Outcome>>> {
        self.pending.lock().unwrap_or_else(|e| {
            warn!("completion lock was poisoned, recovering");
            e.into_inner()
        })
    }

    /// Arm the slot for a new completion-tracked command.
    ///
    /// Fails with [`RelayError::CompletionPending`] while another caller is
    /// still waiting. A wait whose caller has gone away is replaced.
    pub fn arm(&self) -> Result<CompletionWait, RelayError> {
        let mut pending = self.lock();
        if pending.as_ref().is_some_and(|tx| !tx.is_closed()) {
            return Err(RelayError::CompletionPending);
        }
        let (tx, rx) = oneshot::channel();
        *pending = Some(tx);
        Ok(CompletionWait { rx })
    }

    /// Deliver `outcome` to the armed waiter. Returns false if nothing was armed.
    pub fn resolve(&self, outcome: Outcome) -> bool {
        let Some(tx) = self.lock().take() else {
            return false;
        };
        debug!(ok = outcome.is_ok(), "resolving command completion");
        tx.send(outcome).is_ok()
    }

    /// Disarm without notifying, e.g. when the command could not be sent.
    pub fn clear(&self) {
        self.lock().take();
    }

    pub fn is_armed(&self) -> bool {
        self.lock().is_some()
    }
}
