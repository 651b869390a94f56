use std::future::Future;
use std::path::PathBuf;
use std::time::Duration;

use crate::config::Config;
use crate::core::asset::Asset;
use crate::core::error::{AcquireError, AcquireResult};
use crate::core::source::{RangeSource, RemoteMeta};
use super::transfer::ResumableTransfer;
use super::util::ShutdownSignal;

/// 重试策略
#[derive(Debug, Clone)]
pub struct RetryStrategy {
    /// `None` 表示网络错误无限重试
    pub max_retries: Option<u32>,
    pub base_delay: Duration,
    pub max_delay: Duration,
    /// 1.0 即固定间隔
    pub backoff_multiplier: f64,
}

impl Default for RetryStrategy {
    fn default() -> Self {
        Self {
            max_retries: None,
            base_delay: Duration::from_secs(10),
            max_delay: Duration::from_secs(60),
            backoff_multiplier: 1.0,
        }
    }
}

impl RetryStrategy {
    pub fn from_config(config: &Config) -> Self {
        Self {
            max_retries: if config.max_retries == 0 { None } else { Some(config.max_retries) },
            base_delay: Duration::from_secs(config.retry_delay),
            max_delay: Duration::from_secs(config.retry_max_delay),
            backoff_multiplier: config.retry_backoff,
        }
    }

    /// 只看错误类别：网络错误可重试，其余（4xx、校验失败、磁盘问题、取消）立即返回
    pub fn should_retry(&self, error: &AcquireError, retry_count: u32) -> bool {
        if !error.is_retryable() {
            return false;
        }
        match self.max_retries {
            Some(max) => retry_count < max,
            None => true,
        }
    }

    pub fn get_delay(&self, retry_count: u32) -> Duration {
        let exponent = retry_count.saturating_sub(1).min(i32::MAX as u32) as i32;
        let delay_secs = self.base_delay.as_secs_f64() * self.backoff_multiplier.powi(exponent);
        if !delay_secs.is_finite() || delay_secs >= self.max_delay.as_secs_f64() {
            return self.max_delay.max(self.base_delay);
        }
        Duration::from_secs_f64(delay_secs.max(0.0))
    }
}

/// 重试上下文
#[derive(Debug)]
pub struct RetryContext {
    pub strategy: RetryStrategy,
    pub retry_count: u32,
    pub total_retry_time: Duration,
}

impl RetryContext {
    pub fn new(strategy: RetryStrategy) -> Self {
        Self { strategy, retry_count: 0, total_retry_time: Duration::ZERO }
    }

    pub fn should_retry(&self, error: &AcquireError) -> bool {
        self.strategy.should_retry(error, self.retry_count)
    }

    /// 记录一次重试并返回需要等待的时间
    pub fn record_retry(&mut self) -> Duration {
        self.retry_count += 1;
        let delay = self.strategy.get_delay(self.retry_count);
        self.total_retry_time += delay;
        delay
    }

    pub fn current_retries(&self) -> u32 {
        self.retry_count
    }
}

/// 在断点续传外面包一层重试：看门狗超时、连接重置后等待一段时间再从已落盘的位置继续
pub struct ChunkedFetchStrategy<S> {
    transfer: ResumableTransfer<S>,
    retry: RetryStrategy,
    shutdown: ShutdownSignal,
}

/// 等待期间检查取消标志的间隔
const SHUTDOWN_POLL: Duration = Duration::from_millis(200);

impl<S: RangeSource> ChunkedFetchStrategy<S> {
    pub fn new(transfer: ResumableTransfer<S>, retry: RetryStrategy) -> Self {
        Self { transfer, retry, shutdown: ShutdownSignal::new() }
    }

    pub fn with_shutdown(mut self, shutdown: ShutdownSignal) -> Self {
        self.transfer = self.transfer.with_shutdown(shutdown.clone());
        self.shutdown = shutdown;
        self
    }

    #[cfg(test)]
    pub(crate) fn transfer(&self) -> &ResumableTransfer<S> {
        &self.transfer
    }

    pub async fn fetch(&self, asset: &Asset) -> AcquireResult<PathBuf> {
        self.retrying("下载", &asset.remote_url, move |attempt| {
            self.transfer.fetch_attempt(asset, attempt)
        })
        .await
    }

    /// 探测响应头，网络错误与下载一样按策略重试
    pub async fn probe(&self, url: &str) -> AcquireResult<RemoteMeta> {
        self.retrying("探测", url, move |_| self.transfer.source().probe(url)).await
    }

    async fn retrying<T, Fut>(
        &self,
        action: &str,
        url: &str,
        mut attempt_fn: impl FnMut(u32) -> Fut,
    ) -> AcquireResult<T>
    where
        Fut: Future<Output = AcquireResult<T>>,
    {
        let mut context = RetryContext::new(self.retry.clone());
        loop {
            let attempt = context.current_retries() + 1;
            match attempt_fn(attempt).await {
                Ok(value) => return Ok(value),
                Err(error) if context.should_retry(&error) => {
                    let delay = context.record_retry();
                    log::warn!(
                        "{} {} 失败: {}，{:?} 后重试 (第 {} 次重试)",
                        action,
                        url,
                        error,
                        delay,
                        context.current_retries()
                    );
                    self.wait(delay).await?;
                }
                Err(error) => {
                    log::error!(
                        "{} {} 失败: {} (重试 {} 次，累计等待 {:?})",
                        action,
                        url,
                        error,
                        context.current_retries(),
                        context.total_retry_time
                    );
                    return Err(error);
                }
            }
        }
    }

    async fn wait(&self, delay: Duration) -> AcquireResult<()> {
        let mut remaining = delay;
        while !remaining.is_zero() {
            self.shutdown.check()?;
            let step = remaining.min(SHUTDOWN_POLL);
            tokio::time::sleep(step).await;
            remaining -= step;
        }
        self.shutdown.check()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::asset::AssetLocator;
    use crate::core::error::NetworkErrorKind;
    use crate::core::task::transfer::TransferOptions;
    use crate::core::testing::{sample_bytes, Interruption, MemorySource};

    const URL: &str = "http://signage.example.com/api/media/9";

    fn quick_retry() -> RetryStrategy {
        RetryStrategy {
            max_retries: None,
            base_delay: Duration::from_millis(5),
            max_delay: Duration::from_millis(20),
            backoff_multiplier: 1.0,
        }
    }

    fn strategy(source: MemorySource) -> ChunkedFetchStrategy<MemorySource> {
        let options = TransferOptions { chunk_size: 8, chunk_timeout: Duration::from_millis(50) };
        ChunkedFetchStrategy::new(ResumableTransfer::new(source, options), quick_retry())
    }

    #[test]
    fn test_should_retry_by_kind() {
        let strategy = RetryStrategy::default();
        let timeout = AcquireError::network(NetworkErrorKind::ChunkTimeout, "");
        assert!(strategy.should_retry(&timeout, 1_000_000));

        let gone = AcquireError::ClientRejected { url: "u".into(), status: 404 };
        assert!(!strategy.should_retry(&gone, 0));

        let bounded = RetryStrategy { max_retries: Some(2), ..RetryStrategy::default() };
        assert!(bounded.should_retry(&timeout, 1));
        assert!(!bounded.should_retry(&timeout, 2));
    }

    #[test]
    fn test_delay_fixed_and_backoff() {
        let fixed = RetryStrategy::default();
        assert_eq!(fixed.get_delay(1), Duration::from_secs(10));
        assert_eq!(fixed.get_delay(50), Duration::from_secs(10));

        let backoff = RetryStrategy { backoff_multiplier: 2.0, ..RetryStrategy::default() };
        assert_eq!(backoff.get_delay(1), Duration::from_secs(10));
        assert_eq!(backoff.get_delay(2), Duration::from_secs(20));
        assert_eq!(backoff.get_delay(3), Duration::from_secs(40));
        assert_eq!(backoff.get_delay(4), Duration::from_secs(60));
        assert_eq!(backoff.get_delay(5000), Duration::from_secs(60));
    }

    #[test]
    fn test_retry_context_accumulates() {
        let mut context = RetryContext::new(RetryStrategy::default());
        assert_eq!(context.record_retry(), Duration::from_secs(10));
        assert_eq!(context.record_retry(), Duration::from_secs(10));
        assert_eq!(context.current_retries(), 2);
        assert_eq!(context.total_retry_time, Duration::from_secs(20));
    }

    #[tokio::test]
    async fn test_stalls_resume_from_flushed_offset() {
        let dir = tempfile::tempdir().unwrap();
        let data = sample_bytes(120);
        let source = MemorySource::new(&data, "loop.mp4");
        source.interrupt(Interruption::Stall(30));
        source.interrupt(Interruption::Reset(25));
        let asset = AssetLocator::new(dir.path())
            .locate(URL, "loop.mp4", source.checksum())
            .unwrap();
        let strategy = strategy(source);

        let path = strategy.fetch(&asset).await.unwrap();

        assert_eq!(std::fs::read(path).unwrap(), data);
        let requests = strategy.transfer().source().requests();
        let offsets: Vec<u64> = requests.iter().map(|(_, offset)| *offset).collect();
        assert_eq!(offsets, vec![0, 30, 55]);
        // 没有重复下载已落盘的字节
        assert_eq!(strategy.transfer().source().bytes_served(), 120);
    }

    #[tokio::test]
    async fn test_server_errors_are_retried() {
        let dir = tempfile::tempdir().unwrap();
        let data = sample_bytes(20);
        let source = MemorySource::new(&data, "a.png");
        source.respond_with(503);
        source.respond_with(502);
        let asset = AssetLocator::new(dir.path()).locate(URL, "a.png", source.checksum()).unwrap();
        let strategy = strategy(source);

        strategy.fetch(&asset).await.unwrap();
        assert_eq!(strategy.transfer().source().requests().len(), 3);
    }

    #[tokio::test]
    async fn test_client_rejection_is_not_retried() {
        let dir = tempfile::tempdir().unwrap();
        let source = MemorySource::new(b"gone", "a.png");
        source.respond_with(404);
        let asset = AssetLocator::new(dir.path()).locate(URL, "a.png", source.checksum()).unwrap();
        let strategy = strategy(source);

        let err = strategy.fetch(&asset).await.unwrap_err();
        assert!(matches!(err, AcquireError::ClientRejected { status: 404, .. }));
        assert_eq!(strategy.transfer().source().requests().len(), 1);
    }

    #[tokio::test]
    async fn test_integrity_failure_is_not_retried() {
        let dir = tempfile::tempdir().unwrap();
        let source = MemorySource::new(b"content", "a.png")
            .with_checksum("ffffffffffffffffffffffffffffffff");
        let asset = AssetLocator::new(dir.path()).locate(URL, "a.png", source.checksum()).unwrap();
        let strategy = strategy(source);

        let err = strategy.fetch(&asset).await.unwrap_err();
        assert!(matches!(err, AcquireError::IntegrityMismatch { .. }));
        assert_eq!(strategy.transfer().source().requests().len(), 1);
    }

    #[tokio::test]
    async fn test_probe_retries_server_errors() {
        let source = MemorySource::new(&sample_bytes(20), "clip.mp4");
        source.respond_with(503);
        source.respond_with(500);
        let strategy = strategy(source);

        let meta = strategy.probe(URL).await.unwrap();
        assert_eq!(meta.filename.as_deref(), Some("clip.mp4"));
        assert_eq!(meta.content_length, Some(20));
        assert_eq!(strategy.transfer().source().requests().len(), 3);
    }

    #[tokio::test]
    async fn test_probe_client_rejection_is_not_retried() {
        let source = MemorySource::new(b"gone", "a.png");
        source.respond_with(403);
        let strategy = strategy(source);

        let err = strategy.probe(URL).await.unwrap_err();
        assert!(matches!(err, AcquireError::ClientRejected { status: 403, .. }));
        assert_eq!(strategy.transfer().source().requests().len(), 1);
    }

    #[tokio::test]
    async fn test_shutdown_stops_retry_loop() {
        let dir = tempfile::tempdir().unwrap();
        let source = MemorySource::new(&sample_bytes(10), "a.png");
        source.respond_with(500);
        let asset = AssetLocator::new(dir.path()).locate(URL, "a.png", source.checksum()).unwrap();
        let shutdown = ShutdownSignal::new();
        let strategy = strategy(source).with_shutdown(shutdown.clone());
        shutdown.trigger();

        let err = strategy.fetch(&asset).await.unwrap_err();
        assert!(matches!(err, AcquireError::Cancelled));
    }
}
