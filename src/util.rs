use std::any::Any;
use std::panic::AssertUnwindSafe;

use futures::Future;
use futures::FutureExt;

use crate::{AppError, AppResult};

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}

fn app_error_from_panic(payload: Box<dyn Any + Send>) -> AppError {
    let message = panic_message(payload.as_ref());
    tracing::error!(target: "recordkeep", event = "panic_caught", message = %message);
    AppError::new("RUNTIME/PANIC", message)
}

/// Run a request's work, turning a panic into a `RUNTIME/PANIC` error.
pub async fn dispatch_async_app_result<F, Fut, T>(f: F) -> AppResult<T>
where
    F: FnOnce() -> Fut,
    Fut: Future<Output = AppResult<T>>,
{
    match AssertUnwindSafe(f()).catch_unwind().await {
        Ok(result) => result,
        Err(payload) => Err(app_error_from_panic(payload)),
    }
}
