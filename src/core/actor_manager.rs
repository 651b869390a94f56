use actix::prelude::*;
use std::path::PathBuf;
use std::rc::Rc;

use crate::core::asset::AssetDescriptor;
use crate::core::cache::{FilesystemStats, PlaylistProvider};
use crate::core::coordinator::AcquisitionCoordinator;
use crate::core::error::AcquireError;
use crate::core::source::RangeSource;

/// ================== 获取请求 ==================
pub struct Acquire {
    pub descriptor: AssetDescriptor,
    /// 预计大小，未知时由探测到的 Content-Length 代替
    pub size_hint: Option<u64>,
}
impl Message for Acquire { type Result = Result<PathBuf, AcquireError>; }

/// 获取 actor
///
/// 每条 `Acquire` 都以 `AtomicResponse` 执行，前一条完成前不会处理下一条，
/// 因此同一时间只有一个传输，清理也不会与写入交错。
pub struct AcquisitionActor<S, P, F> {
    coordinator: Rc<AcquisitionCoordinator<S, P, F>>,
}

impl<S, P, F> AcquisitionActor<S, P, F> {
    pub fn new(coordinator: AcquisitionCoordinator<S, P, F>) -> Self {
        Self { coordinator: Rc::new(coordinator) }
    }

    pub fn with_shared(coordinator: Rc<AcquisitionCoordinator<S, P, F>>) -> Self {
        Self { coordinator }
    }
}

impl<S, P, F> Actor for AcquisitionActor<S, P, F>
where
    S: RangeSource + 'static,
    P: PlaylistProvider + 'static,
    F: FilesystemStats + 'static,
{
    type Context = Context<Self>;

    fn started(&mut self, _ctx: &mut Self::Context) {
        log::debug!("获取 actor 已启动: {:?}", self.coordinator.locator().media_dir());
    }
}

/// 处理获取请求
impl<S, P, F> Handler<Acquire> for AcquisitionActor<S, P, F>
where
    S: RangeSource + 'static,
    P: PlaylistProvider + 'static,
    F: FilesystemStats + 'static,
{
    type Result = AtomicResponse<Self, Result<PathBuf, AcquireError>>;

    fn handle(&mut self, msg: Acquire, _ctx: &mut Self::Context) -> Self::Result {
        let coordinator = Rc::clone(&self.coordinator);
        AtomicResponse::new(Box::pin(
            async move { coordinator.acquire_descriptor(&msg.descriptor, msg.size_hint).await }
                .into_actor(self),
        ))
    }
}
