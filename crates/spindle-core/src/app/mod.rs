//! App - アプリケーション層
//!
//! engine を組み立てて、呼び出し側に見せる面を提供します。
//!
//! # 主要コンポーネント
//! - **EngineBuilder**: 登録・起動時検証・ワイヤリング
//! - **TaskHandle / TaskRef**: 投入と結果のポーリング
//! - **TaskStatus / TaskCounts**: ステータスビュー

pub mod builder;
pub mod handle;
pub mod status;

pub use self::builder::{BuildError, EngineBuilder};
pub use self::handle::{TaskHandle, TaskRef};
pub use self::status::{TaskCounts, TaskStatus};
