use async_trait::async_trait;
use dog_jobs::prelude::*;
use serde::Deserialize;
use serde_json::{json, Value};
use tracing::info;

#[derive(Debug, Deserialize)]
struct CleanupArgs {
    days: u32,
}

/// Prunes old reports, then queues a log entry describing what it did
pub struct CleanupReports {
    dispatcher: Dispatcher,
}

impl CleanupReports {
    pub const JOB_TYPE: &'static str = "CleanupReports";

    pub fn new(dispatcher: Dispatcher) -> Self {
        Self { dispatcher }
    }
}

#[async_trait]
impl Handler for CleanupReports {
    async fn handle(&self, args: &Value, _credentials: Option<&Value>) -> Result<(), JobError> {
        let args: CleanupArgs =
            serde_json::from_value(args.clone()).map_err(|e| JobError::invalid_args(e.to_string()))?;

        info!(days = args.days, "Cleaning up reports");

        LogHandler
            .dispatch(
                &self.dispatcher,
                json!({"task": "cleanup finished", "days": args.days}),
                DispatchOptions::new(),
            )
            .await
            .map_err(|e| JobError::failed(e.to_string()))?;

        Ok(())
    }
}
