use std::path::PathBuf;
use std::time::Duration;

use futures::StreamExt;

use crate::config::Config;
use crate::core::asset::{Asset, TransferProgress};
use crate::core::error::{AcquireError, AcquireResult, NetworkErrorKind};
use crate::core::source::{check_status, ByteStream, RangeSource};
use super::util::{file_md5, BufferManager, ShutdownSignal};

/// 传输进度回调
pub trait TransferObserver {
    fn on_progress(&self, asset: &Asset, progress: TransferProgress, total: Option<u64>);
}

pub struct NoopObserver;

impl TransferObserver for NoopObserver {
    fn on_progress(&self, _asset: &Asset, _progress: TransferProgress, _total: Option<u64>) {}
}

#[derive(Debug, Clone)]
pub struct TransferOptions {
    /// 每次落盘的字节数
    pub chunk_size: usize,
    /// 数据块看门狗：超过该时间没有新数据即放弃本次连接
    pub chunk_timeout: Duration,
}

impl TransferOptions {
    pub fn from_config(config: &Config) -> Self {
        Self {
            chunk_size: config.chunk_size,
            chunk_timeout: Duration::from_secs(config.chunk_timeout),
        }
    }
}

/// 断点续传
///
/// 进度只由 `.incomplete` 文件的长度表示：每次尝试都从文件长度处发 Range 请求，
/// 追加写入，读完后校验 MD5，一致才改名为完整文件。
pub struct ResumableTransfer<S> {
    source: S,
    options: TransferOptions,
    observer: Box<dyn TransferObserver>,
    shutdown: ShutdownSignal,
}

impl<S: RangeSource> ResumableTransfer<S> {
    pub fn new(source: S, options: TransferOptions) -> Self {
        Self {
            source,
            options,
            observer: Box::new(NoopObserver),
            shutdown: ShutdownSignal::new(),
        }
    }

    pub fn with_observer(mut self, observer: Box<dyn TransferObserver>) -> Self {
        self.observer = observer;
        self
    }

    pub fn with_shutdown(mut self, shutdown: ShutdownSignal) -> Self {
        self.shutdown = shutdown;
        self
    }

    pub fn source(&self) -> &S {
        &self.source
    }

    pub async fn fetch(&self, asset: &Asset) -> AcquireResult<PathBuf> {
        self.fetch_attempt(asset, 1).await
    }

    /// 执行一次完整的获取尝试
    pub async fn fetch_attempt(&self, asset: &Asset, attempt: u32) -> AcquireResult<PathBuf> {
        if asset.is_complete() {
            log::debug!("已存在完整文件，跳过下载: {:?}", asset.complete_path);
            return Ok(asset.complete_path.clone());
        }

        let offset = asset.bytes_on_disk()?;
        self.shutdown.check()?;
        if offset > 0 {
            log::info!("从第 {} 字节继续下载 {} (第 {} 次尝试)", offset, asset.remote_url, attempt);
        } else {
            log::info!("开始下载 {} (第 {} 次尝试)", asset.remote_url, attempt);
        }

        let response = self.source.open(&asset.remote_url, offset).await?;
        let mut skip = 0;
        match response.status {
            // 未完成文件已包含全部内容（例如改名前断电），直接校验
            416 if offset > 0 => {
                log::info!("服务器返回 416，本地已有全部 {} 字节", offset);
                return self.promote(asset);
            }
            200 if offset > 0 => {
                log::warn!("服务器忽略了 Range 请求，丢弃响应前 {} 字节", offset);
                skip = offset;
            }
            206 => {
                if let Some(start) = response.meta.range_start {
                    if start != offset {
                        return Err(AcquireError::network(
                            NetworkErrorKind::UnexpectedRange,
                            format!("请求偏移 {}，服务器从 {} 开始", offset, start),
                        ));
                    }
                }
            }
            status => check_status(&asset.remote_url, status)?,
        }

        let total = response.meta.content_length.map(|len| len + offset - skip);
        let progress = TransferProgress { bytes_written_so_far: offset, attempt_count: attempt };
        self.stream_to_file(asset, response.body, progress, skip, total).await?;
        self.promote(asset)
    }

    /// 把响应体追加到未完成文件。中途失败时先把已收到的数据刷盘再返回错误
    async fn stream_to_file(
        &self,
        asset: &Asset,
        mut body: ByteStream,
        mut progress: TransferProgress,
        mut skip: u64,
        total: Option<u64>,
    ) -> AcquireResult<u64> {
        let mut buffer = BufferManager::new(&asset.incomplete_path, self.options.chunk_size);

        loop {
            if let Err(cancelled) = self.shutdown.check() {
                buffer.flush()?;
                return Err(cancelled);
            }

            let next = match tokio::time::timeout(self.options.chunk_timeout, body.next()).await {
                Ok(next) => next,
                Err(_) => {
                    buffer.flush()?;
                    return Err(AcquireError::network(
                        NetworkErrorKind::ChunkTimeout,
                        format!("{:?} 内没有收到数据: {}", self.options.chunk_timeout, asset.remote_url),
                    ));
                }
            };

            let bytes = match next {
                None => break,
                Some(Ok(bytes)) => bytes,
                Some(Err(e)) => {
                    buffer.flush()?;
                    return Err(e);
                }
            };

            let mut data = &bytes[..];
            if skip > 0 {
                let dropped = skip.min(data.len() as u64);
                skip -= dropped;
                data = &data[dropped as usize..];
            }
            if data.is_empty() {
                continue;
            }

            buffer.write(data)?;
            progress.bytes_written_so_far += data.len() as u64;
            self.observer.on_progress(asset, progress, total);
        }

        let written = buffer.finish()?;
        log::debug!("本次写入 {} 字节，共 {} 字节", written, progress.bytes_written_so_far);
        Ok(written)
    }

    /// 校验并改名；校验失败时删除未完成文件，断点已不可信
    fn promote(&self, asset: &Asset) -> AcquireResult<PathBuf> {
        let actual = file_md5(&asset.incomplete_path)?;
        log::debug!("md5: {}", actual);
        if actual != asset.expected_hash {
            log::error!(
                "校验失败 {:?}: 预期 {}, 实际 {}，删除未完成文件",
                asset.incomplete_path,
                asset.expected_hash,
                actual
            );
            match std::fs::remove_file(&asset.incomplete_path) {
                Ok(()) => {}
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
                Err(e) => return Err(AcquireError::file_system(&asset.incomplete_path, e)),
            }
            return Err(AcquireError::IntegrityMismatch {
                path: asset.incomplete_path.clone(),
                expected: asset.expected_hash.clone(),
                actual,
            });
        }

        std::fs::rename(&asset.incomplete_path, &asset.complete_path)
            .map_err(|e| AcquireError::file_system(&asset.complete_path, e))?;
        log::info!("下载完成: {:?}", asset.complete_path);
        Ok(asset.complete_path.clone())
    }
}
