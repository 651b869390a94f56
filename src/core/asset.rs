//! 资源定位：根据校验和与服务器声明的文件名推导本地缓存路径
//!
//! 完整文件名为 `md5{hash}{filename}`，未完成的文件在此基础上加 `.incomplete` 后缀。
//! 同样内容不同 URL 的资源落到同一个缓存项；同名文件内容变化则得到新的路径。

use std::io;
use std::path::{Path, PathBuf};

use base64::engine::general_purpose::STANDARD;
use base64::Engine;

use crate::core::error::{AcquireError, AcquireResult};

/// 完整文件名前缀
pub const HASH_PREFIX: &str = "md5";
/// 未完成文件的后缀
pub const INCOMPLETE_SUFFIX: &str = ".incomplete";

/// 外部调用方提供的资源描述。文件名和校验和缺失时由协调器向服务器探测
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AssetDescriptor {
    pub url: String,
    pub filename: Option<String>,
    pub expected_hash: Option<String>,
}

impl AssetDescriptor {
    pub fn new(url: impl Into<String>) -> Self {
        Self { url: url.into(), filename: None, expected_hash: None }
    }

    pub fn with_identity(
        url: impl Into<String>,
        filename: impl Into<String>,
        expected_hash: impl Into<String>,
    ) -> Self {
        Self {
            url: url.into(),
            filename: Some(filename.into()),
            expected_hash: Some(expected_hash.into()),
        }
    }
}

/// 一个已确定本地身份的远程资源
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Asset {
    pub remote_url: String,
    pub declared_filename: String,
    /// 小写十六进制的 MD5
    pub expected_hash: String,
    pub complete_path: PathBuf,
    pub incomplete_path: PathBuf,
}

impl Asset {
    pub fn is_complete(&self) -> bool {
        self.complete_path.is_file()
    }

    /// 已落盘的字节数，即断点位置；没有未完成文件时为 0
    pub fn bytes_on_disk(&self) -> AcquireResult<u64> {
        match std::fs::metadata(&self.incomplete_path) {
            Ok(meta) => Ok(meta.len()),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(0),
            Err(e) => Err(AcquireError::file_system(&self.incomplete_path, e)),
        }
    }
}

/// 传输进度，随时由未完成文件的大小重新计算，不单独持久化
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TransferProgress {
    pub bytes_written_so_far: u64,
    pub attempt_count: u32,
}

/// 资源定位器
#[derive(Debug, Clone)]
pub struct AssetLocator {
    media_dir: PathBuf,
}

impl AssetLocator {
    pub fn new(media_dir: impl Into<PathBuf>) -> Self {
        Self { media_dir: media_dir.into() }
    }

    pub fn media_dir(&self) -> &Path {
        &self.media_dir
    }

    /// 推导资源在媒体目录下的完整路径与未完成路径
    pub fn locate(&self, url: &str, filename: &str, expected_hash: &str) -> AcquireResult<Asset> {
        let hash = normalize_checksum(expected_hash)
            .ok_or_else(|| AcquireError::MissingChecksum(url.to_string()))?;
        let name = local_name(&hash, filename);
        let complete_path = self.media_dir.join(&name);
        let incomplete_path = self.media_dir.join(format!("{}{}", name, INCOMPLETE_SUFFIX));
        Ok(Asset {
            remote_url: url.to_string(),
            declared_filename: filename.to_string(),
            expected_hash: hash,
            complete_path,
            incomplete_path,
        })
    }
}

/// 组合哈希与文件名；文件名无效时只使用哈希
pub fn local_name(hash: &str, filename: &str) -> String {
    match sanitize_filename(filename) {
        Some(name) => format!("{}{}{}", HASH_PREFIX, hash, name),
        None => format!("{}{}", HASH_PREFIX, hash),
    }
}

/// 去掉路径成分与控制字符，防止服务器给出的文件名逃出媒体目录
fn sanitize_filename(filename: &str) -> Option<String> {
    let trimmed = filename.trim().trim_matches('"').trim();
    let last = trimmed.rsplit(['/', '\\']).next().unwrap_or_default();
    let cleaned: String = last.chars().filter(|c| !c.is_control()).collect();
    // 以 .incomplete 结尾的名字会被当成未完成文件，同样拒绝
    if cleaned.is_empty()
        || cleaned == "."
        || cleaned == ".."
        || cleaned.ends_with(INCOMPLETE_SUFFIX)
    {
        return None;
    }
    Some(cleaned)
}

/// 将 Content-MD5 的两种写法（32 位十六进制或 RFC 1864 的 base64）统一为小写十六进制
pub fn normalize_checksum(raw: &str) -> Option<String> {
    let raw = raw.trim();
    if raw.len() == 32 && raw.chars().all(|c| c.is_ascii_hexdigit()) {
        return Some(raw.to_ascii_lowercase());
    }
    match STANDARD.decode(raw) {
        Ok(bytes) if bytes.len() == 16 => Some(hex::encode(bytes)),
        _ => None,
    }
}
