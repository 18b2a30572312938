//! Domain - ドメインモデル（ids, state, record, outcome, events, errors）

pub mod errors;
pub mod events;
pub mod ids;
pub mod outcome;
pub mod record;
pub mod state;

pub use errors::SpindleError;
pub use events::TaskEvent;
pub use ids::{IdParseError, JobId, TaskId};
pub use outcome::{RetryRequest, TaskError, TaskResult};
pub use record::TaskRecord;
pub use state::TaskState;
