//! Typed - 型付き Task API
//!
//! task 名の typo を型で排除し、Handler との対応付けを静的に保証します。
//!
//! # 二層構造
//! - **表層（Typed）**: `Task`, `Handler<T>`, `BoundHandler<T>` - 型安全
//! - **内部（Dyn）**: `DynHandler` - object-safe, type erasure

pub mod context;
pub mod handler;
pub mod registry;
pub mod task;

pub use self::context::TaskContext;
pub use self::handler::{BoundHandler, DynHandler, Handler};
pub use self::registry::{RegistryError, TaskDefinition, TaskRegistry};
pub use self::task::{Task, task_name};
