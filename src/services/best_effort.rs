//! Fire-and-forget side effects.

use std::fmt::Display;
use std::future::Future;
use tokio::task::JoinHandle;
use tracing::warn;

/// Spawn `fut` without awaiting it on the caller's path.
///
/// An error is logged under `name` and then dropped; it never reaches the
/// caller. The returned handle is only useful to tests that want to wait.
pub fn spawn_best_effort<F, E>(name: &'static str, fut: F) -> JoinHandle<()>
where
    F: Future<Output = Result<(), E>> + Send + 'static,
    E: Display + Send + 'static,
{
    tokio::spawn(async move {
        if let Err(err) = fut.await {
            warn!(task = name, error = %err, "best-effort task failed");
        }
    })
}
