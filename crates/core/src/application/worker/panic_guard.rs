// Panic isolation for worker safety
// Handlers run in their own task; a panic surfaces as a JoinError and is
// converted into an ordinary job failure so the worker loop survives.
use std::any::Any;
use tokio::task::JoinError;
use tracing::error;

/// Outcome of a guarded handler task
#[derive(Debug)]
pub enum PanicGuardResult<T> {
    /// Task ran to completion
    Success(T),
    /// Task panicked (message extracted from the payload)
    Panicked(String),
    /// Task was aborted before finishing
    Cancelled,
}

/// Extract a readable message from a panic payload
pub fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        s.to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "Unknown panic".to_string()
    }
}

/// Classify the result of awaiting a spawned handler task
pub fn guard_join<T>(joined: Result<T, JoinError>) -> PanicGuardResult<T> {
    match joined {
        Ok(value) => PanicGuardResult::Success(value),
        Err(join_err) if join_err.is_panic() => {
            let payload = join_err.into_panic();
            let panic_msg = panic_message(payload.as_ref());
            error!(panic_msg = %panic_msg, "Job handler panicked");
            PanicGuardResult::Panicked(panic_msg)
        }
        Err(_) => PanicGuardResult::Cancelled,
    }
}
