//! Call Dispatcher
//!
//! Maps `(service, operation)` pairs to typed invokers and runs one call
//! with result extraction and a per-call timeout.

use async_trait::async_trait;
use serde_json::Value;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use super::selector::ResultSelector;
use super::types::{Parameters, ScanTarget};
use crate::aws::AwsCredentials;
use crate::error::{CallError, ConfigError, ErrorKind};

/// Operation name prefixes an inventory is allowed to call
pub const READ_ONLY_PREFIXES: &[&str] = &["describe_", "get_", "list_"];

/// Transport-level envelope removed from object responses
pub const METADATA_FIELD: &str = "ResponseMetadata";

/// Everything an invoker needs for one call
#[derive(Debug, Clone, Copy)]
pub struct InvokeRequest<'a> {
    pub credentials: &'a AwsCredentials,
    pub region: &'a str,
    pub parameters: Option<&'a Parameters>,
}

/// A typed handle to one provider operation
#[async_trait]
pub trait Invoker: Send + Sync {
    async fn invoke(&self, request: InvokeRequest<'_>) -> Result<Value, CallError>;
}

/// Whether an operation name is on the read-only allow-list
pub fn is_read_only(operation: &str) -> bool {
    READ_ONLY_PREFIXES.iter().any(|p| operation.starts_with(p))
}

/// Explicit `(service, operation)` to invoker mapping
#[derive(Default, Clone)]
pub struct OperationRegistry {
    invokers: HashMap<(String, String), Arc<dyn Invoker>>,
}

impl OperationRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry holding the built-in AWS catalog
    pub fn with_aws_catalog(client: &crate::aws::AwsHttpClient) -> Result<Self, ConfigError> {
        let mut registry = Self::new();
        crate::aws::catalog::register(&mut registry, client)?;
        Ok(registry)
    }

    /// Register an invoker. Only read-only operations are accepted.
    pub fn register(
        &mut self,
        service: &str,
        operation: &str,
        invoker: Arc<dyn Invoker>,
    ) -> Result<(), ConfigError> {
        if !is_read_only(operation) {
            return Err(ConfigError::Invalid(vec![format!(
                "Operation {}.{} is not read-only (allowed prefixes: {})",
                service,
                operation,
                READ_ONLY_PREFIXES.join(", ")
            )]));
        }
        self.invokers
            .insert((service.to_string(), operation.to_string()), invoker);
        Ok(())
    }

    pub fn get(&self, service: &str, operation: &str) -> Option<Arc<dyn Invoker>> {
        self.invokers
            .get(&(service.to_string(), operation.to_string()))
            .cloned()
    }

    pub fn contains(&self, service: &str, operation: &str) -> bool {
        self.invokers
            .contains_key(&(service.to_string(), operation.to_string()))
    }

    /// Operations registered for a service, sorted
    pub fn operations(&self, service: &str) -> Vec<String> {
        let mut ops: Vec<String> = self
            .invokers
            .keys()
            .filter(|(s, _)| s == service)
            .map(|(_, o)| o.clone())
            .collect();
        ops.sort();
        ops
    }

    pub fn len(&self) -> usize {
        self.invokers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.invokers.is_empty()
    }
}

/// Post-process a raw response: apply the selector, or strip metadata
/// from object responses when there is none
pub fn extract(response: Value, selector: Option<&ResultSelector>) -> Value {
    match selector {
        Some(selector) => selector.apply(response),
        None => match response {
            Value::Object(mut map) => {
                map.remove(METADATA_FIELD);
                Value::Object(map)
            }
            other => other,
        },
    }
}

/// Runs single calls against the registry
#[derive(Clone)]
pub struct CallDispatcher {
    registry: Arc<OperationRegistry>,
    call_timeout: Duration,
}

impl CallDispatcher {
    pub fn new(registry: Arc<OperationRegistry>, call_timeout: Duration) -> Self {
        Self {
            registry,
            call_timeout,
        }
    }

    pub fn registry(&self) -> &OperationRegistry {
        &self.registry
    }

    /// Invoke one operation and return the extracted result.
    ///
    /// Unknown operations fail fast with `OperationNotFound` and the call is
    /// bounded by the per-call timeout.
    pub async fn call(
        &self,
        credentials: &AwsCredentials,
        service: &str,
        operation: &str,
        region: &str,
        parameters: Option<&Parameters>,
        selector: Option<&ResultSelector>,
    ) -> Result<Value, CallError> {
        let invoker = self
            .registry
            .get(service, operation)
            .ok_or_else(|| CallError::operation_not_found(service, operation))?;

        // an empty parameter map is the same as no parameters
        let parameters = parameters.filter(|p| !p.is_empty());
        let request = InvokeRequest {
            credentials,
            region,
            parameters,
        };

        let response = tokio::time::timeout(self.call_timeout, invoker.invoke(request))
            .await
            .map_err(|_| {
                CallError::new(
                    ErrorKind::Timeout,
                    format!(
                        "{}.{} did not complete within {:?}",
                        service, operation, self.call_timeout
                    ),
                )
            })??;

        Ok(extract(response, selector))
    }

    /// Invoke the call described by a scan target
    pub async fn invoke(&self, credentials: &AwsCredentials, target: &ScanTarget) -> Result<Value, CallError> {
        self.call(
            credentials,
            &target.service,
            &target.operation,
            &target.region,
            target.parameters.as_ref(),
            target.result_selector.as_ref(),
        )
        .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct Fixed {
        response: Value,
        calls: AtomicUsize,
        seen_parameters: std::sync::Mutex<Option<Parameters>>,
    }

    impl Fixed {
        fn new(response: Value) -> Arc<Self> {
            Arc::new(Self {
                response,
                calls: AtomicUsize::new(0),
                seen_parameters: std::sync::Mutex::new(None),
            })
        }
    }

    #[async_trait]
    impl Invoker for Fixed {
        async fn invoke(&self, request: InvokeRequest<'_>) -> Result<Value, CallError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            *self.seen_parameters.lock().unwrap() = request.parameters.cloned();
            Ok(self.response.clone())
        }
    }

    struct Hangs;

    #[async_trait]
    impl Invoker for Hangs {
        async fn invoke(&self, _request: InvokeRequest<'_>) -> Result<Value, CallError> {
            tokio::time::sleep(Duration::from_secs(30)).await;
            Ok(Value::Null)
        }
    }

    fn creds() -> AwsCredentials {
        AwsCredentials::new("AKID", "secret")
    }

    fn reservations() -> Value {
        json!({
            "Reservations": [{"ReservationId": "r-1"}],
            "ResponseMetadata": {"RequestId": "abc", "HTTPStatusCode": 200}
        })
    }

    fn dispatcher_with(invoker: Arc<dyn Invoker>) -> CallDispatcher {
        let mut registry = OperationRegistry::new();
        registry.register("ec2", "describe_instances", invoker).unwrap();
        CallDispatcher::new(Arc::new(registry), Duration::from_secs(5))
    }

    #[test]
    fn test_register_rejects_mutating_operations() {
        let mut registry = OperationRegistry::new();
        let err = registry
            .register("ec2", "terminate_instances", Fixed::new(Value::Null))
            .unwrap_err();
        assert!(err.to_string().contains("not read-only"));
        assert!(registry.is_empty());
    }

    #[tokio::test]
    async fn test_selector_extracts_field() {
        let dispatcher = dispatcher_with(Fixed::new(reservations()));
        let selector = ResultSelector::parse("Reservations").unwrap();

        let result = dispatcher
            .call(&creds(), "ec2", "describe_instances", "us-east-1", None, Some(&selector))
            .await
            .unwrap();

        assert_eq!(result, json!([{"ReservationId": "r-1"}]));
    }

    #[tokio::test]
    async fn test_no_selector_strips_metadata() {
        let dispatcher = dispatcher_with(Fixed::new(reservations()));

        let result = dispatcher
            .call(&creds(), "ec2", "describe_instances", "us-east-1", None, None)
            .await
            .unwrap();

        assert_eq!(result, json!({"Reservations": [{"ReservationId": "r-1"}]}));
    }

    #[tokio::test]
    async fn test_list_responses_are_untouched() {
        let list = json!([{"ResponseMetadata": "kept"}]);
        let dispatcher = dispatcher_with(Fixed::new(list.clone()));

        let result = dispatcher
            .call(&creds(), "ec2", "describe_instances", "us-east-1", None, None)
            .await
            .unwrap();

        assert_eq!(result, list);
    }

    #[tokio::test]
    async fn test_unknown_operation_fails_fast() {
        let invoker = Fixed::new(reservations());
        let dispatcher = dispatcher_with(invoker.clone());

        let err = dispatcher
            .call(&creds(), "ec2", "describe_nothing", "us-east-1", None, None)
            .await
            .unwrap_err();

        assert_eq!(err.kind, ErrorKind::OperationNotFound);
        assert!(!err.is_retryable());
        assert_eq!(invoker.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_empty_parameters_are_omitted() {
        let invoker = Fixed::new(reservations());
        let dispatcher = dispatcher_with(invoker.clone());

        let empty = Parameters::new();
        dispatcher
            .call(&creds(), "ec2", "describe_instances", "us-east-1", Some(&empty), None)
            .await
            .unwrap();
        assert!(invoker.seen_parameters.lock().unwrap().is_none());

        let mut params = Parameters::new();
        params.insert("MaxResults".to_string(), json!(5));
        dispatcher
            .call(&creds(), "ec2", "describe_instances", "us-east-1", Some(&params), None)
            .await
            .unwrap();
        assert_eq!(invoker.seen_parameters.lock().unwrap().as_ref(), Some(&params));
    }

    #[tokio::test]
    async fn test_call_timeout() {
        let mut registry = OperationRegistry::new();
        registry
            .register("ec2", "describe_instances", Arc::new(Hangs))
            .unwrap();
        let dispatcher = CallDispatcher::new(Arc::new(registry), Duration::from_millis(20));

        let err = dispatcher
            .call(&creds(), "ec2", "describe_instances", "us-east-1", None, None)
            .await
            .unwrap_err();

        assert_eq!(err.kind, ErrorKind::Timeout);
        assert!(err.is_retryable());
    }
}
