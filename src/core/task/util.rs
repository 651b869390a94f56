use std::fs::{File, OpenOptions};
use std::io::{Read, Write};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use md5::{Digest, Md5};

use crate::core::error::{AcquireError, AcquireResult};

/// 追加写缓冲区
///
/// 数据先积累到内存，满一个块再写入文件并 `sync_data`，断电后文件长度即可信的断点。
/// 文件在第一次真正写入时才创建，只以追加方式打开，从不截断。
pub struct BufferManager {
    path: PathBuf,
    buffer: Vec<u8>,
    buffer_size: usize,
    file_handle: Option<File>,
    total_written: u64,
    flush_count: u64,
}

impl BufferManager {
    pub fn new(path: impl Into<PathBuf>, buffer_size: usize) -> Self {
        let buffer_size = buffer_size.max(1);
        Self {
            path: path.into(),
            buffer: Vec::with_capacity(buffer_size),
            buffer_size,
            file_handle: None,
            total_written: 0,
            flush_count: 0,
        }
    }

    /// 写入数据，缓冲区满时刷入文件
    pub fn write(&mut self, mut data: &[u8]) -> AcquireResult<()> {
        while !data.is_empty() {
            let to_copy = (self.buffer_size - self.buffer.len()).min(data.len());
            self.buffer.extend_from_slice(&data[..to_copy]);
            data = &data[to_copy..];
            if self.buffer.len() == self.buffer_size {
                self.flush()?;
            }
        }
        Ok(())
    }

    /// 将缓冲区内容落盘
    pub fn flush(&mut self) -> AcquireResult<()> {
        if self.buffer.is_empty() {
            return Ok(());
        }
        self.ensure_open()?;
        if let Some(file) = self.file_handle.as_mut() {
            file.write_all(&self.buffer)
                .and_then(|_| file.sync_data())
                .map_err(|e| AcquireError::file_system(&self.path, e))?;
        }
        self.total_written += self.buffer.len() as u64;
        self.buffer.clear();
        self.flush_count += 1;
        Ok(())
    }

    /// 刷入剩余数据并确保文件存在（空资源也会得到一个零字节文件）
    pub fn finish(mut self) -> AcquireResult<u64> {
        self.flush()?;
        self.ensure_open()?;
        log::debug!("{:?}: 本次写入 {} 字节，落盘 {} 次", self.path, self.total_written, self.flush_count);
        Ok(self.total_written)
    }

    fn ensure_open(&mut self) -> AcquireResult<()> {
        if self.file_handle.is_none() {
            let file = OpenOptions::new()
                .create(true)
                .append(true)
                .open(&self.path)
                .map_err(|e| AcquireError::file_system(&self.path, e))?;
            self.file_handle = Some(file);
        }
        Ok(())
    }

}

/// 计算文件的 MD5，返回小写十六进制
pub fn file_md5(path: &Path) -> AcquireResult<String> {
    let mut file = File::open(path).map_err(|e| AcquireError::file_system(path, e))?;
    let mut hasher = Md5::new();
    let mut block = vec![0u8; 64 * 1024];
    loop {
        let n = file.read(&mut block).map_err(|e| AcquireError::file_system(path, e))?;
        if n == 0 {
            break;
        }
        hasher.update(&block[..n]);
    }
    Ok(hex::encode(hasher.finalize()))
}

/// 协作式取消标志，在数据块之间和重试等待期间检查
#[derive(Debug, Clone, Default)]
pub struct ShutdownSignal(Arc<AtomicBool>);

impl ShutdownSignal {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn trigger(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_triggered(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }

    pub fn check(&self) -> AcquireResult<()> {
        if self.is_triggered() {
            Err(AcquireError::Cancelled)
        } else {
            Ok(())
        }
    }
}
