//! EngineBuilder - engine の構築とワイヤリング
//!
//! - task の登録 (unbound / bound)
//! - 起動時検証（Fail-fast: 期待した task が全部登録されているか）
//! - config / clock の差し替え

use std::sync::Arc;

use crate::config::{ConfigError, EngineConfig};
use crate::ports::{Clock, SystemClock};
use crate::queue::{Engine, RetryPolicy};
use crate::typed::{BoundHandler, Handler, RegistryError, Task, TaskRegistry};

/// EngineBuilder は Engine を構築
///
/// # 使用例
/// ```ignore
/// let engine = EngineBuilder::new()
///     .register_bound::<SendEmail, _>(SendEmailTask::new(mailer), RetryPolicy::new(3))?
///     .expect_tasks(&["app.tasks.email_tasks.send_email_task"])
///     .config(config.engine)
///     .build()?;
/// ```
///
/// # Fail-fast 設計
/// - `expect_tasks()` で期待される task 名を登録
/// - `build()` 時に「期待集合 ⊆ 登録済み集合」をチェック
/// - 不足があれば `BuildError::MissingTasks` を返す
pub struct EngineBuilder {
    registry: TaskRegistry,
    expected_tasks: Option<Vec<String>>,
    config: EngineConfig,
    clock: Arc<dyn Clock>,
}

/// BuildError は engine 構築時のエラー
#[derive(Debug, thiserror::Error)]
pub enum BuildError {
    #[error("missing tasks: {0:?}. These tasks were expected but not registered.")]
    MissingTasks(Vec<String>),

    #[error(transparent)]
    Registry(#[from] RegistryError),

    #[error(transparent)]
    Config(#[from] ConfigError),
}

impl EngineBuilder {
    pub fn new() -> Self {
        Self {
            registry: TaskRegistry::new(),
            expected_tasks: None,
            config: EngineConfig::default(),
            clock: Arc::new(SystemClock),
        }
    }

    /// Register an unbound body.
    pub fn register<T: Task, H: Handler<T> + 'static>(
        mut self,
        handler: H,
        policy: RetryPolicy,
    ) -> Result<Self, RegistryError> {
        self.registry.register::<T, H>(handler, policy)?;
        Ok(self)
    }

    /// Register a bound body (receives a `TaskContext`).
    pub fn register_bound<T: Task, H: BoundHandler<T> + 'static>(
        mut self,
        handler: H,
        policy: RetryPolicy,
    ) -> Result<Self, RegistryError> {
        self.registry.register_bound::<T, H>(handler, policy)?;
        Ok(self)
    }

    /// 期待される task 名のリストを設定
    pub fn expect_tasks(mut self, names: &[&str]) -> Self {
        self.expected_tasks = Some(names.iter().map(|s| s.to_string()).collect());
        self
    }

    pub fn config(mut self, config: EngineConfig) -> Self {
        self.config = config;
        self
    }

    pub fn clock(mut self, clock: impl Clock) -> Self {
        self.clock = Arc::new(clock);
        self
    }

    /// 検証して Engine を起動する
    ///
    /// worker を spawn するので tokio runtime の中で呼ぶこと。
    pub fn build(self) -> Result<Engine, BuildError> {
        if let Some(expected_tasks) = &self.expected_tasks {
            let missing_tasks: Vec<String> = expected_tasks
                .iter()
                .filter(|name| !self.registry.contains(name))
                .cloned()
                .collect();
            if !missing_tasks.is_empty() {
                return Err(BuildError::MissingTasks(missing_tasks));
            }
        }
        self.config.validate()?;
        Ok(Engine::start(self.registry, self.config, self.clock))
    }
}

impl Default for EngineBuilder {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::TaskResult;
    use async_trait::async_trait;
    use serde::{Deserialize, Serialize};

    #[derive(Serialize, Deserialize)]
    struct CleanupOldNotifications;

    impl Task for CleanupOldNotifications {
        const NAME: &'static str = "cleanup_old_notifications";
    }

    struct Cleanup;

    #[async_trait]
    impl Handler<CleanupOldNotifications> for Cleanup {
        async fn handle(&self, _args: CleanupOldNotifications) -> TaskResult {
            Ok(serde_json::json!({"status": "completed"}))
        }
    }

    #[tokio::test]
    async fn test_build_success() {
        let engine = EngineBuilder::new()
            .register::<CleanupOldNotifications, _>(Cleanup, RetryPolicy::none())
            .unwrap()
            .expect_tasks(&["cleanup_old_notifications"])
            .build()
            .unwrap();
        assert!(engine.is_open());
        assert_eq!(engine.registry().registered_names(), vec!["cleanup_old_notifications"]);
        engine.shutdown().await;
        assert!(!engine.is_open());
    }

    #[tokio::test]
    async fn test_build_missing_tasks() {
        let result = EngineBuilder::new()
            .register::<CleanupOldNotifications, _>(Cleanup, RetryPolicy::none())
            .unwrap()
            .expect_tasks(&["cleanup_old_notifications", "check_all_budgets"])
            .build();
        assert!(matches!(
            result,
            Err(BuildError::MissingTasks(missing)) if missing == vec!["check_all_budgets".to_string()]
        ));
    }

    #[tokio::test]
    async fn test_build_rejects_zero_workers() {
        let result = EngineBuilder::new()
            .config(EngineConfig {
                max_workers: 0,
                ..EngineConfig::default()
            })
            .build();
        assert!(matches!(result, Err(BuildError::Config(ConfigError::NoWorkers))));
    }

    #[test]
    fn test_duplicate_registration_fails() {
        let result = EngineBuilder::new()
            .register::<CleanupOldNotifications, _>(Cleanup, RetryPolicy::none())
            .unwrap()
            .register::<CleanupOldNotifications, _>(Cleanup, RetryPolicy::none());
        assert!(matches!(result, Err(RegistryError::AlreadyRegistered(_))));
    }
}
