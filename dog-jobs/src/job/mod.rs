pub mod registry;
pub mod retry;
pub mod builtin;

pub use registry::{HandlerRegistry, HandlerFactory};
pub use retry::{RetryPolicy, RetryInterval, RetryBlock, RetryDecision};

use async_trait::async_trait;
use serde_json::Value;

use crate::{DispatchOptions, Dispatcher, JobError, JobId, QueueResult};

/// Executable behaviour behind a job type name
///
/// Handlers are resolved by name through the [`HandlerRegistry`] and run by a
/// worker; returning `Err` sends the job through its retry policy.
#[async_trait]
pub trait Handler: Send + Sync {
    /// Run the job with its arguments and, if requested, the worker's credentials
    async fn handle(&self, args: &Value, credentials: Option<&Value>) -> Result<(), JobError>;

    /// Whether the worker should forward its credentials to this handler
    fn requires_credentials(&self) -> bool {
        false
    }
}

/// A handler that knows its own job type and can enqueue more work of that type
#[async_trait]
pub trait Queueable: Handler + Default + 'static {
    /// Job type identifier used for registration and dispatch
    const JOB_TYPE: &'static str;

    /// Enqueue a new job of this handler's type
    async fn dispatch(
        &self,
        dispatcher: &Dispatcher,
        args: Value,
        options: DispatchOptions,
    ) -> QueueResult<JobId> {
        dispatcher.dispatch(args, Self::JOB_TYPE, options).await
    }
}
