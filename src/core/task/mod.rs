//! `task` 模块包含单个资源的传输逻辑
//!
//! 主要包括：
//! - `transfer`: 基于 `.incomplete` 文件长度的断点续传与 MD5 校验
//! - `retry`: 重试策略，以及在断点续传外层循环的 `ChunkedFetchStrategy`
//! - `util`: 工具类，如 `BufferManager`、`ShutdownSignal`

pub mod retry;
pub mod transfer;
pub mod util;

// 导出核心组件，方便外部使用
pub use self::retry::{ChunkedFetchStrategy, RetryContext, RetryStrategy};
pub use self::transfer::{NoopObserver, ResumableTransfer, TransferObserver, TransferOptions};
pub use self::util::{BufferManager, ShutdownSignal};
