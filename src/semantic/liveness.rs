//! Liveness of a mutex guarded model.
//!
//! Status checks must not queue behind inference, so they only try the model
//! lock and look at how the most recent call went.

use std::fmt::Display;
use std::sync::{Mutex, TryLockError};

#[derive(Debug, Default)]
pub struct Liveness {
    last_error: Mutex<Option<String>>,
}

impl Liveness {
    /// Remember the outcome of a model call.
    pub fn record<T, E: Display>(&self, result: &Result<T, E>) {
        if let Ok(mut last) = self.last_error.lock() {
            *last = result.as_ref().err().map(|err| err.to_string());
        }
    }

    /// Never blocks. A model busy with another call counts as alive.
    pub fn check<M>(&self, model: &Mutex<M>) -> Result<(), String> {
        match model.try_lock() {
            Ok(_) | Err(TryLockError::WouldBlock) => {}
            Err(TryLockError::Poisoned(_)) => return Err("model lock poisoned".to_string()),
        }

        let last = self
            .last_error
            .lock()
            .map_err(|_| "liveness state poisoned".to_string())?;
        match last.as_deref() {
            Some(err) => Err(format!("last call failed: {err}")),
            None => Ok(()),
        }
    }
}
