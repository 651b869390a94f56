//! Core: 资源定位、断点续传、缓存清理以及串行执行获取请求的 actor

pub mod actor_manager;
pub mod asset;
pub mod cache;
pub mod coordinator;
pub mod error;
pub mod source;
pub mod task;

#[cfg(test)]
pub(crate) mod testing;

// 只导出主流程和其它模块实际用到的类型
pub use actor_manager::{Acquire, AcquisitionActor};
pub use asset::{Asset, AssetDescriptor, AssetLocator};
pub use coordinator::{AcquisitionCoordinator, MediaCoordinator};
pub use error::{AcquireError, AcquireResult};
