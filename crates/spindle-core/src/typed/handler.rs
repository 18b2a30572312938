//! Handler trait - Task を実行する Handler の定義
//!
//! - `Handler<T>`: 引数だけを受け取る (unbound)
//! - `BoundHandler<T>`: `TaskContext` も受け取る (bound, retry を要求できる)
//! - `DynHandler`: object-safe な内部表現。registry はこれを保持する

use async_trait::async_trait;
use std::marker::PhantomData;

use super::context::TaskContext;
use super::task::Task;
use crate::domain::{TaskError, TaskResult};

/// Handler は Task の引数を受け取って結果を返す
///
/// # 使用例
/// ```ignore
/// struct CheckAllBudgets;
///
/// #[async_trait]
/// impl Handler<CheckAllBudgetsArgs> for CheckAllBudgets {
///     async fn handle(&self, _args: CheckAllBudgetsArgs) -> TaskResult {
///         Ok(json!({"status": "completed"}))
///     }
/// }
/// ```
#[async_trait]
pub trait Handler<T: Task>: Send + Sync {
    async fn handle(&self, args: T) -> TaskResult;
}

/// BoundHandler は試行ごとの `TaskContext` も受け取る
///
/// retry を要求するには `Err(ctx.retry(err, countdown))` を返します。
#[async_trait]
pub trait BoundHandler<T: Task>: Send + Sync {
    async fn handle(&self, ctx: TaskContext, args: T) -> TaskResult;
}

/// DynHandler は object-safe な Handler の抽象化
///
/// 引数は JSON のまま受け取り、実装側で `T` に戻します。
/// `ctx` は bound な定義にだけ渡されます。
#[async_trait]
pub trait DynHandler: Send + Sync {
    async fn call(&self, ctx: Option<TaskContext>, args: serde_json::Value) -> TaskResult;

    /// Does the body take a `TaskContext`?
    fn binds_context(&self) -> bool;
}

fn decode<T: Task>(args: serde_json::Value) -> Result<T, TaskError> {
    serde_json::from_value(args).map_err(|e| TaskError::Fatal(format!("invalid arguments: {e}")))
}

/// `Handler<T>` を DynHandler にする wrapper
pub(crate) struct TypedHandler<T: Task, H: Handler<T>> {
    handler: H,
    _marker: PhantomData<T>,
}

impl<T: Task, H: Handler<T>> TypedHandler<T, H> {
    pub(crate) fn new(handler: H) -> Self {
        Self {
            handler,
            _marker: PhantomData,
        }
    }
}

#[async_trait]
impl<T: Task, H: Handler<T>> DynHandler for TypedHandler<T, H> {
    async fn call(&self, _ctx: Option<TaskContext>, args: serde_json::Value) -> TaskResult {
        let args: T = decode(args)?;
        self.handler.handle(args).await
    }

    fn binds_context(&self) -> bool {
        false
    }
}

/// `BoundHandler<T>` を DynHandler にする wrapper
pub(crate) struct TypedBoundHandler<T: Task, H: BoundHandler<T>> {
    handler: H,
    _marker: PhantomData<T>,
}

impl<T: Task, H: BoundHandler<T>> TypedBoundHandler<T, H> {
    pub(crate) fn new(handler: H) -> Self {
        Self {
            handler,
            _marker: PhantomData,
        }
    }
}

#[async_trait]
impl<T: Task, H: BoundHandler<T>> DynHandler for TypedBoundHandler<T, H> {
    async fn call(&self, ctx: Option<TaskContext>, args: serde_json::Value) -> TaskResult {
        let ctx = ctx.ok_or_else(|| TaskError::fatal("bound task invoked without a context"))?;
        let args: T = decode(args)?;
        self.handler.handle(ctx, args).await
    }

    fn binds_context(&self) -> bool {
        true
    }
}
