//! Ports - 抽象化レイヤー
//!
//! 時刻と ID 生成をエンジンから切り離し、テストで差し替えられるようにします。

pub mod clock;
pub mod id_generator;

pub use self::clock::{Clock, ManualClock, SystemClock};
pub use self::id_generator::{IdGenerator, UlidGenerator};
