use std::collections::HashMap;
use std::sync::Arc;
use tracing::debug;

use super::{Handler, Queueable, RetryPolicy};
use crate::{JobError, QueueError, QueueResult};

/// Zero-argument constructor for a handler variant
pub type HandlerFactory = Arc<dyn Fn() -> Result<Box<dyn Handler>, JobError> + Send + Sync>;

/// Name → handler factory and name → retry policy lookup
///
/// Built once at startup and handed to dispatchers and workers behind an `Arc`.
pub struct HandlerRegistry {
    factories: HashMap<String, HandlerFactory>,
    retry_policies: HashMap<String, RetryPolicy>,
    default_retry_policy: RetryPolicy,
}

impl HandlerRegistry {
    /// Create an empty registry using [`RetryPolicy::registry_default`] for unregistered types
    pub fn new() -> Self {
        Self {
            factories: HashMap::new(),
            retry_policies: HashMap::new(),
            default_retry_policy: RetryPolicy::registry_default(),
        }
    }

    /// Replace the policy applied to job types without a registered one
    pub fn with_default_retry_policy(mut self, policy: RetryPolicy) -> Self {
        self.default_retry_policy = policy;
        self
    }

    /// Register a factory for a job type; re-registering overwrites
    pub fn register<F>(&mut self, name: impl Into<String>, factory: F) -> &mut Self
    where
        F: Fn() -> Result<Box<dyn Handler>, JobError> + Send + Sync + 'static,
    {
        let name = name.into();
        if self.factories.insert(name.clone(), Arc::new(factory)).is_some() {
            debug!("Replaced handler registration for {}", name);
        }
        self
    }

    /// Register a [`Queueable`] under its own job type
    pub fn register_queueable<Q: Queueable>(&mut self) -> &mut Self {
        self.register(Q::JOB_TYPE, || Ok(Box::new(Q::default()) as Box<dyn Handler>))
    }

    /// Construct a handler for a job type
    pub fn create(&self, name: &str) -> QueueResult<Box<dyn Handler>> {
        let factory = self
            .factories
            .get(name)
            .ok_or_else(|| QueueError::UnknownType(name.to_string()))?;

        factory().map_err(|e| QueueError::HandlerConstruction {
            name: name.to_string(),
            reason: e.to_string(),
        })
    }

    /// Attach a retry policy to a job type; re-registering overwrites
    pub fn register_retry_policy(&mut self, name: impl Into<String>, policy: RetryPolicy) -> &mut Self {
        self.retry_policies.insert(name.into(), policy);
        self
    }

    /// Registered retry policy for a job type
    pub fn retry_policy(&self, name: &str) -> QueueResult<RetryPolicy> {
        self.retry_policies
            .get(name)
            .cloned()
            .ok_or_else(|| QueueError::UnknownType(name.to_string()))
    }

    /// Registered retry policy, or the registry default
    pub fn retry_policy_or_default(&self, name: &str) -> &RetryPolicy {
        self.retry_policies.get(name).unwrap_or(&self.default_retry_policy)
    }

    pub fn default_retry_policy(&self) -> &RetryPolicy {
        &self.default_retry_policy
    }

    /// Check if a job type is registered
    pub fn is_registered(&self, name: &str) -> bool {
        self.factories.contains_key(name)
    }

    /// Get all registered job types, sorted
    pub fn registered_types(&self) -> Vec<String> {
        let mut types: Vec<String> = self.factories.keys().cloned().collect();
        types.sort();
        types
    }
}

impl Default for HandlerRegistry {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::job::RetryInterval;
    use async_trait::async_trait;
    use serde_json::{json, Value};
    use std::time::Duration;

    #[derive(Default)]
    struct EchoHandler;

    #[async_trait]
    impl Handler for EchoHandler {
        async fn handle(&self, args: &Value, _credentials: Option<&Value>) -> Result<(), JobError> {
            if args.get("fail").is_some() {
                return Err(JobError::failed("asked to fail"));
            }
            Ok(())
        }
    }

    impl Queueable for EchoHandler {
        const JOB_TYPE: &'static str = "Echo";
    }

    struct OtherHandler;

    #[async_trait]
    impl Handler for OtherHandler {
        async fn handle(&self, _args: &Value, _credentials: Option<&Value>) -> Result<(), JobError> {
            Err(JobError::failed("other"))
        }
    }

    #[tokio::test]
    async fn test_register_and_create() {
        let mut registry = HandlerRegistry::new();
        registry.register_queueable::<EchoHandler>();

        assert!(registry.is_registered("Echo"));
        assert_eq!(registry.registered_types(), vec!["Echo"]);

        let handler = registry.create("Echo").unwrap();
        assert!(handler.handle(&json!({}), None).await.is_ok());
        assert!(handler.handle(&json!({"fail": true}), None).await.is_err());
    }

    #[tokio::test]
    async fn test_reregistering_overwrites() {
        let mut registry = HandlerRegistry::new();
        registry.register_queueable::<EchoHandler>();
        registry.register("Echo", || Ok(Box::new(OtherHandler) as Box<dyn Handler>));

        let handler = registry.create("Echo").unwrap();
        let err = handler.handle(&json!({}), None).await.unwrap_err();
        assert_eq!(err.message(), "other");
    }

    #[test]
    fn test_unknown_type() {
        let registry = HandlerRegistry::new();
        match registry.create("LogQueueable") {
            Err(QueueError::UnknownType(name)) => assert_eq!(name, "LogQueueable"),
            _ => panic!("Expected UnknownType"),
        }
    }

    #[test]
    fn test_broken_factory() {
        let mut registry = HandlerRegistry::new();
        registry.register("Broken", || Err(JobError::failed("missing mailer")));

        match registry.create("Broken") {
            Err(QueueError::HandlerConstruction { name, reason }) => {
                assert_eq!(name, "Broken");
                assert!(reason.contains("missing mailer"));
            }
            _ => panic!("Expected HandlerConstruction"),
        }
    }

    #[test]
    fn test_retry_policy_lookup() {
        let mut registry = HandlerRegistry::new();
        assert!(matches!(registry.retry_policy("Echo"), Err(QueueError::UnknownType(_))));
        assert_eq!(registry.retry_policy_or_default("Echo").max_retries, RetryPolicy::registry_default().max_retries);

        registry.register_retry_policy(
            "Echo",
            RetryPolicy::new().with_interval(RetryInterval::Fixed(Duration::from_secs(5))).with_max_retries(7),
        );
        assert_eq!(registry.retry_policy("Echo").unwrap().max_retries, Some(7));
        assert_eq!(registry.retry_policy_or_default("Echo").max_retries, Some(7));
    }

    #[test]
    fn test_custom_default_policy() {
        let registry = HandlerRegistry::new()
            .with_default_retry_policy(RetryPolicy::new().with_max_retries(1));
        assert_eq!(registry.retry_policy_or_default("Anything").max_retries, Some(1));
    }
}
