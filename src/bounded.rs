//! Time-bounded calls into slow collaborators.
//!
//! Model calls (embedding, reranking, answer generation) run on tokio's
//! blocking pool under `tokio::time::timeout`. When the bound expires the
//! caller gets [`Error::Timeout`] and the call's [`Cancellation`] is set;
//! workers check it between units of work and stop early.

use std::{
    sync::{
        Arc,
        LazyLock,
        atomic::{AtomicBool, Ordering},
    },
    thread,
    time::Duration,
};

use tokio::runtime::{Builder, Handle, Runtime};
use tracing::warn;

use crate::error::{Error, Result};

/// Drives bounded calls for synchronous callers (CLI, rayon workers, MCP
/// blocking tasks). Never entered from an async worker thread.
static RUNTIME: LazyLock<Option<Runtime>> = LazyLock::new(|| {
    Builder::new_multi_thread()
        .worker_threads(1)
        .thread_name("docsift-bounded")
        .enable_time()
        .build()
        .inspect_err(|e| warn!(error = %e, "could not start runtime for bounded calls"))
        .ok()
});

/// Set once the caller has stopped waiting.
#[derive(Debug, Clone, Default)]
pub struct Cancellation(Arc<AtomicBool>);

impl Cancellation {
    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::Relaxed)
    }

    /// `Err` once cancelled, for use with `?` between units of work.
    pub fn ensure_active(&self, what: &'static str) -> Result<()> {
        if self.is_cancelled() {
            return Err(Error::ModelUnavailable {
                model: what,
                reason: "cancelled after timeout".to_string(),
            });
        }
        Ok(())
    }

    fn cancel(&self) {
        self.0.store(true, Ordering::Relaxed);
    }
}

/// Run `f` on the blocking pool and wait at most `timeout` for it.
///
/// Safe to call from inside another runtime's context: the wait then moves
/// to a plain scoped thread, since `block_on` cannot nest.
pub fn call_with_timeout<T, F>(what: &'static str, timeout: Duration, f: F) -> Result<T>
where
    T: Send + 'static,
    F: FnOnce(&Cancellation) -> Result<T> + Send + 'static,
{
    let runtime = RUNTIME.as_ref().ok_or_else(|| Error::ModelUnavailable {
        model: what,
        reason: "no runtime for bounded calls".to_string(),
    })?;
    let wait = move || runtime.block_on(bounded(what, timeout, f));

    if Handle::try_current().is_err() {
        return wait();
    }
    thread::scope(|scope| scope.spawn(wait).join()).unwrap_or_else(|_| {
        Err(Error::ModelUnavailable {
            model: what,
            reason: "waiter panicked".to_string(),
        })
    })
}

async fn bounded<T, F>(what: &'static str, timeout: Duration, f: F) -> Result<T>
where
    T: Send + 'static,
    F: FnOnce(&Cancellation) -> Result<T> + Send + 'static,
{
    let cancellation = Cancellation::default();
    let worker = cancellation.clone();
    let task = tokio::task::spawn_blocking(move || f(&worker));
    match tokio::time::timeout(timeout, task).await {
        Ok(Ok(result)) => result,
        Ok(Err(join)) => Err(Error::ModelUnavailable {
            model: what,
            reason: if join.is_panic() {
                "worker panicked".to_string()
            } else {
                "worker stopped without a result".to_string()
            },
        }),
        Err(_) => {
            cancellation.cancel();
            warn!(what, ?timeout, "model call timed out");
            Err(Error::Timeout {
                what,
                after: timeout,
            })
        }
    }
}
