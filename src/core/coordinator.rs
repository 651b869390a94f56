//! 获取协调器：外部调用方唯一的入口
//!
//! 先由 [`SpaceGuard`] 确认空间（必要时清理旧媒体），再交给
//! [`ChunkedFetchStrategy`] 下载。空间不足时不会发出任何下载请求。

use std::path::PathBuf;

use crate::config::Config;
use crate::core::asset::{Asset, AssetDescriptor, AssetLocator};
use crate::core::cache::{DiskStats, FilesystemStats, PlaylistProvider, SpaceGuard, StoredPlaylist};
use crate::core::error::{AcquireError, AcquireResult};
use crate::core::source::{HttpSource, OriginAuth, RangeSource};
use crate::core::task::{
    ChunkedFetchStrategy, ResumableTransfer, RetryStrategy, ShutdownSignal, TransferObserver,
    TransferOptions,
};

pub struct AcquisitionCoordinator<S, P, F> {
    locator: AssetLocator,
    guard: SpaceGuard<P, F>,
    strategy: ChunkedFetchStrategy<S>,
}

/// 生产环境使用的组合
pub type MediaCoordinator = AcquisitionCoordinator<HttpSource, StoredPlaylist, DiskStats>;

impl MediaCoordinator {
    pub fn from_config(
        config: &Config,
        observer: Box<dyn TransferObserver>,
        shutdown: ShutdownSignal,
    ) -> AcquireResult<Self> {
        let device_id = config.resolve_device_id()?;
        let auth = OriginAuth::new(&config.server_url, &device_id)?;
        let transfer = ResumableTransfer::new(
            HttpSource::new(config, auth),
            TransferOptions::from_config(config),
        )
        .with_observer(observer);
        let strategy = ChunkedFetchStrategy::new(transfer, RetryStrategy::from_config(config))
            .with_shutdown(shutdown);
        let playlist = StoredPlaylist::new(&config.playlist_file);
        let guard = SpaceGuard::from_config(config, playlist, DiskStats);
        Ok(Self::new(AssetLocator::new(config.media_path()), guard, strategy))
    }
}

impl<S: RangeSource, P: PlaylistProvider, F: FilesystemStats> AcquisitionCoordinator<S, P, F> {
    pub fn new(
        locator: AssetLocator,
        guard: SpaceGuard<P, F>,
        strategy: ChunkedFetchStrategy<S>,
    ) -> Self {
        Self { locator, guard, strategy }
    }

    pub fn locator(&self) -> &AssetLocator {
        &self.locator
    }

    #[cfg(test)]
    pub(crate) fn strategy(&self) -> &ChunkedFetchStrategy<S> {
        &self.strategy
    }

    /// 确定资源的本地身份；描述里缺少文件名或校验和时向服务器探测响应头。
    /// 第二个返回值是探测得到的 Content-Length
    pub async fn resolve(
        &self,
        descriptor: &AssetDescriptor,
    ) -> AcquireResult<(Asset, Option<u64>)> {
        if let (Some(filename), Some(hash)) = (&descriptor.filename, &descriptor.expected_hash) {
            return Ok((self.locator.locate(&descriptor.url, filename, hash)?, None));
        }

        log::debug!("探测资源信息: {}", descriptor.url);
        let meta = self.strategy.probe(&descriptor.url).await?;
        let hash = descriptor
            .expected_hash
            .clone()
            .or(meta.checksum)
            .ok_or_else(|| AcquireError::MissingChecksum(descriptor.url.clone()))?;
        let filename = descriptor.filename.clone().or(meta.filename).unwrap_or_default();
        let asset = self.locator.locate(&descriptor.url, &filename, &hash)?;
        Ok((asset, meta.content_length))
    }

    /// 获取资源，返回完整文件路径
    pub async fn acquire(&self, asset: &Asset, expected_size_hint: u64) -> AcquireResult<PathBuf> {
        if asset.is_complete() {
            log::info!("已缓存: {:?}", asset.complete_path);
            return Ok(asset.complete_path.clone());
        }

        let media_dir = self.locator.media_dir();
        std::fs::create_dir_all(media_dir).map_err(|e| AcquireError::file_system(media_dir, e))?;

        // 未完成文件已占用的部分不再重复申请
        let remaining = expected_size_hint.saturating_sub(asset.bytes_on_disk()?);
        let report = self.guard.ensure_room(remaining)?;
        if !report.evicted.is_empty() {
            log::info!("为 {} 清理了 {} 个旧文件", asset.remote_url, report.evicted.len());
        }

        self.strategy.fetch(asset).await
    }

    /// `resolve` 后 `acquire`；未给出大小时使用探测到的 Content-Length
    pub async fn acquire_descriptor(
        &self,
        descriptor: &AssetDescriptor,
        size_hint: Option<u64>,
    ) -> AcquireResult<PathBuf> {
        let (asset, probed_length) = self.resolve(descriptor).await?;
        let hint = size_hint.or(probed_length).unwrap_or(0);
        self.acquire(&asset, hint).await
    }
}
