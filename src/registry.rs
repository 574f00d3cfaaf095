//! Compensating action registry

use crate::ActionError;
use async_trait::async_trait;
use serde_json::Value;
use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;

/// A compensating function, invoked with a record's positional parameters.
///
/// # Example
///
/// ```rust,ignore
/// struct CancelOrder { client: OrderClient }
///
/// #[async_trait]
/// impl CompensatingAction for CancelOrder {
///     async fn compensate(&self, parameters: Vec<Value>) -> Result<Value, ActionError> {
///         let order_id = parameters[0].as_str().ok_or_else(|| ActionError::terminal("order id"))?;
///         self.client.cancel(order_id).await.map_err(|e| ActionError::retry(e.to_string()))?;
///         Ok(Value::Bool(true))
///     }
/// }
/// ```
#[async_trait]
pub trait CompensatingAction: Send + Sync + 'static {
    /// Undo the recorded step
    async fn compensate(&self, parameters: Vec<Value>) -> Result<Value, ActionError>;
}

/// Adapter turning an async closure into a [`CompensatingAction`]
pub struct FnAction<F>(F);

impl<F> FnAction<F> {
    /// Wrap `f`
    pub fn new(f: F) -> Self {
        Self(f)
    }
}

#[async_trait]
impl<F, Fut> CompensatingAction for FnAction<F>
where
    F: Fn(Vec<Value>) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<Value, ActionError>> + Send + 'static,
{
    async fn compensate(&self, parameters: Vec<Value>) -> Result<Value, ActionError> {
        (self.0)(parameters).await
    }
}

/// Mapping from action name to its compensating function
#[derive(Clone, Default)]
pub struct ActionRegistry {
    actions: HashMap<Box<str>, Arc<dyn CompensatingAction>>,
}

impl ActionRegistry {
    /// An empty registry
    pub fn new() -> Self {
        Self::default()
    }

    /// Register (or replace) an action under `name`
    pub fn register(&mut self, name: impl Into<Box<str>>, action: impl CompensatingAction) -> &mut Self {
        self.actions.insert(name.into(), Arc::new(action));
        self
    }

    /// Register an async closure under `name`
    pub fn register_fn<F, Fut>(&mut self, name: impl Into<Box<str>>, f: F) -> &mut Self
    where
        F: Fn(Vec<Value>) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<Value, ActionError>> + Send + 'static,
    {
        self.register(name, FnAction::new(f))
    }

    /// Builder-style [`register_fn`](Self::register_fn)
    pub fn with_fn<F, Fut>(mut self, name: impl Into<Box<str>>, f: F) -> Self
    where
        F: Fn(Vec<Value>) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<Value, ActionError>> + Send + 'static,
    {
        self.register_fn(name, f);
        self
    }

    /// Look up an action by name
    pub fn get(&self, name: &str) -> Option<Arc<dyn CompensatingAction>> {
        self.actions.get(name).cloned()
    }

    /// Whether `name` is registered
    pub fn contains(&self, name: &str) -> bool {
        self.actions.contains_key(name)
    }

    /// Registered action names, sorted
    pub fn names(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.actions.keys().map(|n| &**n).collect();
        names.sort_unstable();
        names
    }

    /// Number of registered actions
    pub fn len(&self) -> usize {
        self.actions.len()
    }

    /// Whether no action is registered
    pub fn is_empty(&self) -> bool {
        self.actions.is_empty()
    }
}

impl std::fmt::Debug for ActionRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ActionRegistry")
            .field("actions", &self.names())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    struct Echo;

    #[async_trait]
    impl CompensatingAction for Echo {
        async fn compensate(&self, parameters: Vec<Value>) -> Result<Value, ActionError> {
            Ok(Value::Array(parameters))
        }
    }

    #[tokio::test]
    async fn test_register_and_invoke() {
        let mut registry = ActionRegistry::new();
        registry
            .register("echo", Echo)
            .register_fn("fail", |_| async { Err::<Value, _>(ActionError::terminal("nope")) });

        assert_eq!(registry.names(), vec!["echo", "fail"]);
        assert!(registry.contains("echo"));
        assert!(registry.get("missing").is_none());

        let echo = registry.get("echo").unwrap();
        assert_eq!(echo.compensate(vec![json!(1)]).await.unwrap(), json!([1]));

        let fail = registry.get("fail").unwrap();
        assert_eq!(
            fail.compensate(vec![]).await.unwrap_err(),
            ActionError::terminal("nope")
        );
    }

    #[tokio::test]
    async fn test_register_replaces() {
        let registry = ActionRegistry::new()
            .with_fn("create", |_| async { Ok::<_, ActionError>(json!("first")) })
            .with_fn("create", |_| async { Ok::<_, ActionError>(json!("second")) });

        assert_eq!(registry.len(), 1);
        let action = registry.get("create").unwrap();
        assert_eq!(action.compensate(vec![]).await.unwrap(), json!("second"));
    }
}
