//! Outbound calls to the inference service
//!
//! [`BackoffPolicy`] decides, [`RequestExecutor`] sends, and
//! [`InferenceClient`] knows what each endpoint expects.

mod backoff;
mod client;
mod error;
mod executor;
mod types;

pub use backoff::{BackoffDecision, BackoffPolicy, RATE_LIMIT_STATUS};
pub use client::{demo_reply, InferenceClient, DEMO_REPLY_PREFIX};
pub use error::{ErrorKind, InferenceError};
pub use executor::{
    AttemptObserver, Completion, HttpResponse, HttpTransport, Outcome, RequestExecutor,
    RequestSpec, ReqwestTransport, RetryContext,
};
pub use types::*;
