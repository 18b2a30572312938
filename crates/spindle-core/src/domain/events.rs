//! Events - 状態遷移イベント
//!
//! エンジンは遷移のたびに `TaskEvent` を broadcast します。
//! 購読者がいなくても問題ありません（送信エラーは無視）。

use chrono::{DateTime, Utc};
use serde::Serialize;

use super::ids::TaskId;
use super::record::TaskRecord;
use super::state::TaskState;

/// One state transition of one task record.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TaskEvent {
    pub task_id: TaskId,
    pub name: String,
    pub state: TaskState,
    pub retries: u32,
    pub at: DateTime<Utc>,
}

impl TaskEvent {
    pub fn from_record(record: &TaskRecord) -> Self {
        Self {
            task_id: record.id,
            name: record.name.clone(),
            state: record.state,
            retries: record.retries,
            at: record.updated_at,
        }
    }
}
