//! Task trait - 型付き Task の定義
//!
//! 引数の型と task 名を対応付けます。`submit` に渡した値は JSON になり、
//! worker 側で同じ型にデシリアライズされてから Handler に渡ります。

use serde::Serialize;
use serde::de::DeserializeOwned;

/// Task は task 名と引数の型を対応付ける
///
/// # 使用例
/// ```ignore
/// #[derive(Serialize, Deserialize)]
/// struct SendEmail {
///     to: String,
///     subject: String,
/// }
///
/// impl Task for SendEmail {
///     const NAME: &'static str = "app.tasks.email_tasks.send_email_task";
/// }
/// ```
///
/// # Trait Bounds
/// - `Serialize`: submit 時に JSON にするため
/// - `DeserializeOwned`: worker 側で復元するため
/// - `Send + Sync + 'static`: worker タスクへ渡すため
pub trait Task: Serialize + DeserializeOwned + Send + Sync + 'static {
    /// Registered name. Empty means "use the Rust type name".
    const NAME: &'static str;
}

/// Effective registry name of `T`.
pub fn task_name<T: Task>() -> &'static str {
    if T::NAME.is_empty() {
        std::any::type_name::<T>()
    } else {
        T::NAME
    }
}
