//! Bounded calls into model capabilities.
//!
//! Model inference is blocking and can hang (first download, stuck runtime).
//! Calls run on a helper thread and the caller stops waiting after the
//! deadline. A timed out call keeps running in the background and its result
//! is dropped.

use std::sync::mpsc::{self, RecvTimeoutError};
use std::time::Duration;

#[derive(Debug, thiserror::Error)]
pub enum CallError<E> {
    #[error("{0}")]
    Failed(E),

    #[error("timed out after {0:?}")]
    TimedOut(Duration),

    #[error("capability call panicked")]
    Panicked,

    #[error("failed to spawn capability thread: {0}")]
    Spawn(std::io::Error),
}

pub fn call_with_timeout<T, E, F>(name: &str, timeout: Duration, f: F) -> Result<T, CallError<E>>
where
    F: FnOnce() -> Result<T, E> + Send + 'static,
    T: Send + 'static,
    E: Send + 'static,
{
    let (tx, rx) = mpsc::sync_channel(1);

    std::thread::Builder::new()
        .name(name.to_string())
        .spawn(move || {
            // receiver may be gone after a timeout
            let _ = tx.send(f());
        })
        .map_err(CallError::Spawn)?;

    match rx.recv_timeout(timeout) {
        Ok(result) => result.map_err(CallError::Failed),
        Err(RecvTimeoutError::Timeout) => {
            log::warn!("{name} did not answer within {timeout:?}");
            Err(CallError::TimedOut(timeout))
        }
        Err(RecvTimeoutError::Disconnected) => Err(CallError::Panicked),
    }
}
