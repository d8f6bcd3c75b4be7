//! Download Engine
//!
//! Two strategies share the same building blocks:
//! - Multi-segment: probe, plan byte ranges, fetch them concurrently, merge in order
//! - Resumable single stream: continue a partial local file with a suffix range
//!
//! Both honor a cancellation token at every blocking point and report
//! progress through the core event channel.

mod download_task;
mod manager;
mod planner;
mod progress;
mod rate_limiter;
mod segment_worker;
mod stream_task;
mod verify;

pub use download_task::*;
pub use manager::*;
pub use planner::*;
pub use progress::*;
pub use rate_limiter::*;
pub use segment_worker::*;
pub use stream_task::*;
pub use verify::*;

use crate::error::RangedlError;
use futures::FutureExt;
use reqwest::header::{HeaderMap, CONTENT_LENGTH};
use std::any::Any;
use std::future::Future;
use std::panic::AssertUnwindSafe;

/// `Content-Length` from the headers, read directly so HEAD responses work too
pub(crate) fn content_length(headers: &HeaderMap) -> Option<u64> {
    headers
        .get(CONTENT_LENGTH)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.trim().parse::<u64>().ok())
}

/// Best-effort text of a caught panic payload
pub(crate) fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}

/// Await `future`, turning a panic inside it into `RangedlError::Panicked`
pub(crate) async fn contain_panic<T, F>(future: F) -> Result<T, RangedlError>
where
    F: Future<Output = Result<T, RangedlError>>,
{
    match AssertUnwindSafe(future).catch_unwind().await {
        Ok(result) => result,
        Err(payload) => Err(RangedlError::Panicked(panic_message(&*payload))),
    }
}
