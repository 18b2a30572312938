//! TaskRegistry - task 定義の登録と管理
//!
//! 名前 → `TaskDefinition` (body + retry policy) の対応を持ちます。
//! 登録は engine を起動する前に行い、起動後は読み取り専用です。

use std::any::TypeId;
use std::collections::HashMap;
use std::sync::Arc;

use super::handler::{BoundHandler, DynHandler, Handler, TypedBoundHandler, TypedHandler};
use super::task::{Task, task_name};
use crate::queue::RetryPolicy;

/// A registered task: its name, retry policy and type-erased body.
pub struct TaskDefinition {
    name: String,
    policy: RetryPolicy,
    args_type: TypeId,
    body: Arc<dyn DynHandler>,
}

impl TaskDefinition {
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn policy(&self) -> &RetryPolicy {
        &self.policy
    }

    /// Does the body receive a `TaskContext`?
    pub fn binds_context(&self) -> bool {
        self.body.binds_context()
    }

    pub(crate) fn accepts<T: Task>(&self) -> bool {
        self.args_type == TypeId::of::<T>()
    }

    pub(crate) fn body(&self) -> Arc<dyn DynHandler> {
        Arc::clone(&self.body)
    }
}

impl std::fmt::Debug for TaskDefinition {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TaskDefinition")
            .field("name", &self.name)
            .field("policy", &self.policy)
            .field("bind", &self.binds_context())
            .finish()
    }
}

/// RegistryError は TaskRegistry の操作エラー
#[derive(Debug, thiserror::Error)]
pub enum RegistryError {
    #[error("task '{0}' is already registered")]
    AlreadyRegistered(String),
}

/// TaskRegistry は型付き Handler を登録・管理
///
/// # 使用例
/// ```ignore
/// let mut registry = TaskRegistry::new();
/// registry.register::<SendEmail, _>(SendEmailHandler, RetryPolicy::new(3))?;
///
/// let definition = registry.get("app.tasks.email_tasks.send_email_task");
/// ```
#[derive(Default)]
pub struct TaskRegistry {
    definitions: HashMap<String, Arc<TaskDefinition>>,
}

impl TaskRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register an unbound body.
    pub fn register<T: Task, H: Handler<T> + 'static>(
        &mut self,
        handler: H,
        policy: RetryPolicy,
    ) -> Result<(), RegistryError> {
        self.insert::<T>(Arc::new(TypedHandler::new(handler)), policy)
    }

    /// Register a bound body (receives a `TaskContext`).
    pub fn register_bound<T: Task, H: BoundHandler<T> + 'static>(
        &mut self,
        handler: H,
        policy: RetryPolicy,
    ) -> Result<(), RegistryError> {
        self.insert::<T>(Arc::new(TypedBoundHandler::new(handler)), policy)
    }

    fn insert<T: Task>(
        &mut self,
        body: Arc<dyn DynHandler>,
        policy: RetryPolicy,
    ) -> Result<(), RegistryError> {
        let name = task_name::<T>().to_string();
        if self.definitions.contains_key(&name) {
            return Err(RegistryError::AlreadyRegistered(name));
        }
        policy.warn_unenforced_limits(&name);
        let definition = TaskDefinition {
            name: name.clone(),
            policy,
            args_type: TypeId::of::<T>(),
            body,
        };
        self.definitions.insert(name, Arc::new(definition));
        Ok(())
    }

    pub fn get(&self, name: &str) -> Option<Arc<TaskDefinition>> {
        self.definitions.get(name).cloned()
    }

    pub fn contains(&self, name: &str) -> bool {
        self.definitions.contains_key(name)
    }

    /// Registered names, sorted.
    pub fn registered_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.definitions.keys().cloned().collect();
        names.sort();
        names
    }

    pub fn len(&self) -> usize {
        self.definitions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.definitions.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::TaskResult;
    use crate::typed::TaskContext;
    use async_trait::async_trait;
    use serde::{Deserialize, Serialize};
    use std::time::Duration;

    #[derive(Serialize, Deserialize)]
    struct Ping;

    impl Task for Ping {
        const NAME: &'static str = "test.ping";
    }

    #[derive(Serialize, Deserialize)]
    struct Pong;

    impl Task for Pong {
        const NAME: &'static str = "test.pong";
    }

    #[derive(Serialize, Deserialize)]
    struct PingAgain;

    impl Task for PingAgain {
        const NAME: &'static str = "test.ping";
    }

    struct Ok200;

    #[async_trait]
    impl Handler<Ping> for Ok200 {
        async fn handle(&self, _args: Ping) -> TaskResult {
            Ok(serde_json::json!("pong"))
        }
    }

    #[async_trait]
    impl Handler<PingAgain> for Ok200 {
        async fn handle(&self, _args: PingAgain) -> TaskResult {
            Ok(serde_json::Value::Null)
        }
    }

    #[async_trait]
    impl BoundHandler<Pong> for Ok200 {
        async fn handle(&self, _ctx: TaskContext, _args: Pong) -> TaskResult {
            Ok(serde_json::Value::Null)
        }
    }

    #[test]
    fn register_and_get() {
        let mut registry = TaskRegistry::new();
        registry
            .register::<Ping, _>(Ok200, RetryPolicy::new(2))
            .unwrap();

        let definition = registry.get("test.ping").unwrap();
        assert_eq!(definition.name(), "test.ping");
        assert_eq!(definition.policy().max_retries, 2);
        assert!(!definition.binds_context());
        assert!(definition.accepts::<Ping>());
        assert!(!definition.accepts::<Pong>());
    }

    #[test]
    fn duplicate_name_is_rejected() {
        let mut registry = TaskRegistry::new();
        registry
            .register::<Ping, _>(Ok200, RetryPolicy::none())
            .unwrap();
        let result = registry.register::<PingAgain, _>(Ok200, RetryPolicy::none());
        assert!(matches!(result, Err(RegistryError::AlreadyRegistered(name)) if name == "test.ping"));
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn bound_registration_is_flagged() {
        let mut registry = TaskRegistry::new();
        registry
            .register_bound::<Pong, _>(
                Ok200,
                RetryPolicy::new(3).with_default_delay(Duration::from_secs(30)),
            )
            .unwrap();
        assert!(registry.get("test.pong").unwrap().binds_context());
    }

    #[test]
    fn registered_names_are_sorted() {
        let mut registry = TaskRegistry::new();
        registry
            .register_bound::<Pong, _>(Ok200, RetryPolicy::none())
            .unwrap();
        registry
            .register::<Ping, _>(Ok200, RetryPolicy::none())
            .unwrap();
        assert_eq!(registry.registered_names(), vec!["test.ping", "test.pong"]);
        assert!(registry.get("test.unknown").is_none());
    }
}
