use std::collections::HashSet;
use std::ffi::OsString;
use std::io;
use std::path::{Path, PathBuf};
use std::time::SystemTime;

use serde::Deserialize;

use crate::core::asset::INCOMPLETE_SUFFIX;
use crate::core::error::{AcquireError, AcquireResult};

/// 播放列表协作方：给出当前播放需要的本地文件，这些文件不会被清理
pub trait PlaylistProvider {
    fn currently_referenced_asset_paths(&self) -> AcquireResult<HashSet<PathBuf>>;
}

/// 固定集合，调用方自行维护引用关系时使用
impl PlaylistProvider for HashSet<PathBuf> {
    fn currently_referenced_asset_paths(&self) -> AcquireResult<HashSet<PathBuf>> {
        Ok(self.clone())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ContentType {
    Image,
    Video,
    WebPage,
    #[serde(other)]
    Other,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct PlaylistEntry {
    pub content_type: ContentType,
    pub content_uri: String,
}

/// 播放端保存在本地的 JSON 播放列表
///
/// 文件不存在时不保护任何文件；文件损坏时报错，避免在不知道引用关系的情况下清理。
#[derive(Debug, Clone)]
pub struct StoredPlaylist {
    path: PathBuf,
}

impl StoredPlaylist {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn entries(&self) -> AcquireResult<Vec<PlaylistEntry>> {
        let content = match std::fs::read_to_string(&self.path) {
            Ok(content) => content,
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                log::debug!("没有已保存的播放列表: {:?}", self.path);
                return Ok(Vec::new());
            }
            Err(e) => return Err(AcquireError::file_system(&self.path, e)),
        };
        if content.trim().is_empty() {
            return Ok(Vec::new());
        }
        serde_json::from_str(&content)
            .map_err(|e| AcquireError::Config(format!("播放列表 {:?} 格式错误: {}", self.path, e)))
    }
}

impl PlaylistProvider for StoredPlaylist {
    fn currently_referenced_asset_paths(&self) -> AcquireResult<HashSet<PathBuf>> {
        Ok(self
            .entries()?
            .into_iter()
            // 网页不是本地文件，不参与保护
            .filter(|entry| entry.content_type != ContentType::WebPage)
            .map(|entry| PathBuf::from(entry.content_uri))
            .collect())
    }
}

/// 由目录列表与播放列表即时推导出的缓存项
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CacheEntry {
    pub path: PathBuf,
    pub last_access_time: SystemTime,
    pub size: u64,
    pub is_referenced: bool,
}

/// 媒体目录清单。每次调用都重新读取目录与播放列表，不缓存
pub struct CacheInventory<P> {
    media_dir: PathBuf,
    playlist: P,
}

impl<P: PlaylistProvider> CacheInventory<P> {
    pub fn new(media_dir: impl Into<PathBuf>, playlist: P) -> Self {
        Self { media_dir: media_dir.into(), playlist }
    }

    pub fn media_dir(&self) -> &Path {
        &self.media_dir
    }

    /// 媒体目录中所有完整文件。`.incomplete` 文件不在其中
    pub fn entries(&self) -> AcquireResult<Vec<CacheEntry>> {
        // 媒体目录是平的，按文件名比对即可，不受播放列表里相对/绝对路径写法影响
        let referenced: HashSet<OsString> = self
            .playlist
            .currently_referenced_asset_paths()?
            .iter()
            .filter_map(|path| path.file_name().map(|name| name.to_os_string()))
            .collect();

        let dir = match std::fs::read_dir(&self.media_dir) {
            Ok(dir) => dir,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(AcquireError::file_system(&self.media_dir, e)),
        };

        let mut entries = Vec::new();
        for item in dir {
            let item = item.map_err(|e| AcquireError::file_system(&self.media_dir, e))?;
            let path = item.path();
            let name = item.file_name();
            if name.to_string_lossy().ends_with(INCOMPLETE_SUFFIX) {
                continue;
            }
            let meta = match item.metadata() {
                Ok(meta) => meta,
                // 列目录和读元数据之间被删掉了
                Err(e) if e.kind() == io::ErrorKind::NotFound => continue,
                Err(e) => return Err(AcquireError::file_system(&path, e)),
            };
            if !meta.is_file() {
                continue;
            }
            let last_access_time = meta
                .accessed()
                .or_else(|_| meta.modified())
                .unwrap_or(SystemTime::UNIX_EPOCH);
            entries.push(CacheEntry {
                is_referenced: referenced.contains(&name),
                path,
                last_access_time,
                size: meta.len(),
            });
        }
        Ok(entries)
    }

    /// 未被引用的文件，最久未访问的在前，时间相同按路径排序
    pub fn unreferenced_assets(&self) -> AcquireResult<Vec<CacheEntry>> {
        let mut candidates: Vec<CacheEntry> =
            self.entries()?.into_iter().filter(|entry| !entry.is_referenced).collect();
        candidates.sort_by(|a, b| {
            a.last_access_time
                .cmp(&b.last_access_time)
                .then_with(|| a.path.cmp(&b.path))
        });
        log::debug!("未使用的媒体文件: {}", candidates.len());
        Ok(candidates)
    }
}
