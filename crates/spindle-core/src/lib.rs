//! spindle-core
//!
//! In-process task engine: register task bodies, submit them, poll results.
//! Failed attempts can opt into delayed retries, and a calendar scheduler
//! can submit tasks periodically.
//!
//! # モジュール構成
//! - **domain**: ドメインモデル（ids, state, record, outcome, events, errors）
//! - **ports**: 抽象化レイヤー（Clock, IdGenerator）
//! - **typed**: 型付き Task API（Task, Handler, BoundHandler, TaskRegistry, TaskContext）
//! - **queue**: record store, retry policy, engine, workers
//! - **app**: EngineBuilder, TaskHandle, ステータスビュー
//! - **schedule**: calendar trigger と periodic scheduler
//! - **config**: YAML + 環境変数の設定

pub mod app;
pub mod config;
pub mod domain;
pub mod ports;
pub mod queue;
pub mod schedule;
pub mod typed;

pub use app::{BuildError, EngineBuilder, TaskCounts, TaskHandle, TaskRef, TaskStatus};
pub use config::{ConfigError, EngineConfig, ScheduleZone, SchedulerConfig, SpindleConfig};
pub use domain::{
    JobId, RetryRequest, SpindleError, TaskError, TaskEvent, TaskId, TaskRecord, TaskResult,
    TaskState,
};
pub use queue::{Engine, RetryPolicy, WeakEngine};
pub use schedule::{CalendarTrigger, ScheduleError, ScheduledJob, Scheduler, SchedulerHandle};
pub use typed::{BoundHandler, Handler, RegistryError, Task, TaskContext};
