//! Per-request evaluation context. Carries the repository being
//! processed and a cancellation flag shared with long-running forge
//! calls.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use pullgate_data::Repo;

#[derive(Clone)]
pub struct Ctx {
    pub repo: Repo,
    cancelled: Arc<AtomicBool>,
}

impl Ctx {
    pub fn new(repo: Repo) -> Self {
        Ctx {
            repo,
            cancelled: Arc::new(AtomicBool::new(false)),
        }
    }

    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::SeqCst)
    }

    /// Errors out when the request was cancelled, for use between
    /// expensive forge calls.
    pub fn check_cancelled(&self) -> anyhow::Result<()> {
        if self.is_cancelled() {
            anyhow::bail!("request cancelled");
        }
        Ok(())
    }
}
