//! 测试用的内存数据源与磁盘统计

use std::cell::{Cell, RefCell};
use std::path::Path;
use std::rc::Rc;

use async_trait::async_trait;
use bytes::Bytes;
use futures::StreamExt;
use md5::{Digest, Md5};

use crate::core::cache::space::FilesystemStats;
use crate::core::error::{AcquireError, AcquireResult, NetworkErrorKind};
use crate::core::source::{ByteStream, RangeSource, RemoteMeta, RemoteResponse};

#[derive(Debug, Clone, Copy)]
pub enum Interruption {
    /// 送出指定字节后不再有数据
    Stall(usize),
    /// 送出指定字节后连接被重置
    Reset(usize),
}

/// 内存数据源，记录每次请求的 (url, offset) 以及实际送出的正文字节数
pub struct MemorySource {
    data: Vec<u8>,
    filename: String,
    checksum: String,
    piece: usize,
    pub ignore_range: bool,
    requests: RefCell<Vec<(String, u64)>>,
    served: Rc<Cell<u64>>,
    interruptions: RefCell<Vec<Interruption>>,
    statuses: RefCell<Vec<u16>>,
}

impl MemorySource {
    pub fn new(data: &[u8], filename: &str) -> Self {
        Self {
            data: data.to_vec(),
            filename: filename.to_string(),
            checksum: md5_hex(data),
            piece: 7,
            ignore_range: false,
            requests: RefCell::new(Vec::new()),
            served: Rc::new(Cell::new(0)),
            interruptions: RefCell::new(Vec::new()),
            statuses: RefCell::new(Vec::new()),
        }
    }

    pub fn with_checksum(mut self, checksum: &str) -> Self {
        self.checksum = checksum.to_string();
        self
    }

    pub fn checksum(&self) -> &str {
        &self.checksum
    }

    /// 依次作用于之后的请求，每个只生效一次
    pub fn interrupt(&self, interruption: Interruption) {
        self.interruptions.borrow_mut().push(interruption);
    }

    /// 之后的请求依次返回这些状态码（空响应体）
    pub fn respond_with(&self, status: u16) {
        self.statuses.borrow_mut().push(status);
    }

    pub fn requests(&self) -> Vec<(String, u64)> {
        self.requests.borrow().clone()
    }

    pub fn bytes_served(&self) -> u64 {
        self.served.get()
    }
}

#[async_trait(?Send)]
impl RangeSource for MemorySource {
    async fn open(&self, url: &str, offset: u64) -> AcquireResult<RemoteResponse> {
        self.requests.borrow_mut().push((url.to_string(), offset));
        let mut meta = RemoteMeta {
            filename: Some(self.filename.clone()),
            checksum: Some(self.checksum.clone()),
            content_length: None,
            range_start: None,
        };

        let forced = {
            let mut statuses = self.statuses.borrow_mut();
            if statuses.is_empty() { None } else { Some(statuses.remove(0)) }
        };
        let len = self.data.len() as u64;
        let (status, body) = match forced {
            Some(status) => (status, &[][..]),
            None if offset > 0 && offset >= len && !self.ignore_range => (416, &[][..]),
            None if offset > 0 && !self.ignore_range => {
                meta.range_start = Some(offset);
                (206, &self.data[offset as usize..])
            }
            None => (200, &self.data[..]),
        };
        meta.content_length = Some(body.len() as u64);

        let interruption = {
            let mut pending = self.interruptions.borrow_mut();
            if pending.is_empty() { None } else { Some(pending.remove(0)) }
        };
        let cut = match interruption {
            Some(Interruption::Stall(n)) | Some(Interruption::Reset(n)) => n.min(body.len()),
            None => body.len(),
        };

        let served = Rc::clone(&self.served);
        let pieces: Vec<Bytes> =
            body[..cut].chunks(self.piece).map(Bytes::copy_from_slice).collect();
        let stream = futures::stream::iter(pieces).map(move |piece| {
            served.set(served.get() + piece.len() as u64);
            Ok::<_, AcquireError>(piece)
        });
        let body: ByteStream = match interruption {
            Some(Interruption::Stall(_)) => Box::pin(stream.chain(futures::stream::pending())),
            Some(Interruption::Reset(_)) => Box::pin(stream.chain(futures::stream::once(async {
                Err(AcquireError::network(NetworkErrorKind::Stream, "connection reset by peer"))
            }))),
            None => Box::pin(stream),
        };
        Ok(RemoteResponse { status, meta, body })
    }
}

/// 按“容量减去目录内文件大小”计算剩余空间，删除文件即释放空间
pub struct DirCapacityStats {
    pub capacity: u64,
}

impl FilesystemStats for DirCapacityStats {
    fn free_bytes(&self, path: &Path) -> AcquireResult<u64> {
        let mut used = 0;
        let entries = std::fs::read_dir(path).map_err(|e| AcquireError::file_system(path, e))?;
        for entry in entries {
            let entry = entry.map_err(|e| AcquireError::file_system(path, e))?;
            let meta = entry.metadata().map_err(|e| AcquireError::file_system(entry.path(), e))?;
            if meta.is_file() {
                used += meta.len();
            }
        }
        Ok(self.capacity.saturating_sub(used))
    }
}

pub fn md5_hex(data: &[u8]) -> String {
    hex::encode(Md5::digest(data))
}

/// 生成可辨认的测试数据
pub fn sample_bytes(len: usize) -> Vec<u8> {
    (0..len).map(|i| (i % 251) as u8).collect()
}
