//! Errors - エンジン操作のエラー
//!
//! タスク本体の失敗は [`TaskError`](super::TaskError) としてレコードに記録され、
//! ここには出てきません。`SpindleError` は「投入できなかった」ことだけを表します。

/// Error returned synchronously to a submitter.
#[derive(Debug, thiserror::Error)]
pub enum SpindleError {
    #[error("engine is shut down")]
    ShutDown,

    #[error("queue is full (capacity={capacity})")]
    QueueFull { capacity: usize },

    #[error("no task registered under name '{0}'")]
    UnknownTask(String),

    #[error("failed to encode task arguments: {0}")]
    Encode(#[from] serde_json::Error),
}
