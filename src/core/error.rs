use std::fmt;
use std::io;
use std::path::PathBuf;
use thiserror::Error;

/// 网络错误的具体类别，重试循环按类别判断，而不是按错误来源的类型
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NetworkErrorKind {
    /// 连接建立失败（DNS、拒绝连接、TLS 等）
    Connect,
    /// 等待响应头超时
    ResponseTimeout,
    /// 单个数据块在看门狗时限内没有到达
    ChunkTimeout,
    /// 传输过程中连接被重置或负载解析失败
    Stream,
    /// 服务器 5xx
    ServerStatus(u16),
    /// 206 响应的 Content-Range 起点与请求的偏移不一致
    UnexpectedRange,
}

impl fmt::Display for NetworkErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            NetworkErrorKind::Connect => write!(f, "连接失败"),
            NetworkErrorKind::ResponseTimeout => write!(f, "响应超时"),
            NetworkErrorKind::ChunkTimeout => write!(f, "数据块超时"),
            NetworkErrorKind::Stream => write!(f, "数据流中断"),
            NetworkErrorKind::ServerStatus(status) => write!(f, "服务器错误 {}", status),
            NetworkErrorKind::UnexpectedRange => write!(f, "断点位置不符"),
        }
    }
}

#[derive(Error, Debug)]
pub enum AcquireError {
    #[error("网络错误（{kind}）: {message}")]
    Network {
        kind: NetworkErrorKind,
        message: String,
    },

    #[error("服务器拒绝请求: {url} 返回 HTTP {status}")]
    ClientRejected {
        url: String,
        status: u16,
    },

    #[error("校验和不匹配: {path:?} 预期 {expected}, 实际 {actual}")]
    IntegrityMismatch {
        path: PathBuf,
        expected: String,
        actual: String,
    },

    #[error("磁盘空间不足: 需要 {required} 字节, 可用 {available} 字节")]
    InsufficientStorage {
        required: u64,
        available: u64,
    },

    #[error("文件系统错误 {path:?}: {source}")]
    FileSystem {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("响应缺少校验和: {0}")]
    MissingChecksum(String),

    #[error("无效的URL: {0}")]
    InvalidUrl(String),

    #[error("下载被取消")]
    Cancelled,

    #[error("配置错误: {0}")]
    Config(String),
}

impl AcquireError {
    pub fn network(kind: NetworkErrorKind, message: impl Into<String>) -> Self {
        AcquireError::Network { kind, message: message.into() }
    }

    pub fn file_system(path: impl Into<PathBuf>, source: io::Error) -> Self {
        AcquireError::FileSystem { path: path.into(), source }
    }

    /// 只有网络类错误会在核心内部重试
    pub fn is_retryable(&self) -> bool {
        matches!(self, AcquireError::Network { .. })
    }
}

impl From<toml::de::Error> for AcquireError {
    fn from(error: toml::de::Error) -> Self {
        AcquireError::Config(error.to_string())
    }
}

pub type AcquireResult<T> = Result<T, AcquireError>;
